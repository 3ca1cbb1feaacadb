pub mod phi;
pub mod uid;

/// Provides validation functionality for types that need to verify their internal state
/// or conformance to specific rules.
///
/// The `ResultType` type parameter specifies the return type of the validation operation,
/// typically a bool, `Result` or similar type that can indicate success or specific validation errors.
pub trait Validate<ResultType> {
    /// Performs a validation of the type's internal state.
    ///
    /// # Return
    /// Returns a `ResultType` indicating whether validation succeeded or failed.
    /// The exact meaning of success/failure is defined by the implementing type.
    ///
    /// # Example
    /// ```
    /// use xrc_common::Validate;
    ///
    /// struct Technique {
    ///     kvp: f64,
    /// }
    ///
    /// impl Validate<bool> for Technique {
    ///     fn validate(&self) -> bool {
    ///         self.kvp > 0.0
    ///     }
    /// }
    ///
    /// let t = Technique { kvp: 81.0 };
    /// assert!(t.validate());
    /// ```
    fn validate(&self) -> ResultType;
}
