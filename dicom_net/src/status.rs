/// Classification of a DIMSE response status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Object arrived; the operator is informed.
    Warning,
    /// Transient SCP condition; retry with backoff.
    RetryableFailure,
    /// The SCP rejected the dataset or the request itself; retrying cannot
    /// help.
    TerminalFailure,
    /// C-FIND intermediate response; more identifiers follow.
    Pending,
}

/// Maps a DIMSE status code to the action the console takes.
///
/// Statuses outside the recognized ranges are treated as terminal: an SCP
/// answering with an unknown code is not going to accept the same object on
/// the next attempt.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        0x0000 => StatusClass::Success,
        0xFF00 | 0xFF01 => StatusClass::Pending,
        0xB000 | 0xB006 | 0xB007 => StatusClass::Warning,
        0x0110 => StatusClass::RetryableFailure,
        0xA700..=0xA7FF => StatusClass::RetryableFailure,
        0xA900..=0xA9FF => StatusClass::TerminalFailure,
        0xC000..=0xCFFF => StatusClass::TerminalFailure,
        _ => StatusClass::TerminalFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_warning_codes() {
        assert_eq!(classify_status(0x0000), StatusClass::Success);
        assert_eq!(classify_status(0xB000), StatusClass::Warning);
        assert_eq!(classify_status(0xB006), StatusClass::Warning);
        assert_eq!(classify_status(0xB007), StatusClass::Warning);
    }

    #[test]
    fn resource_failures_retry() {
        assert_eq!(classify_status(0xA700), StatusClass::RetryableFailure);
        assert_eq!(classify_status(0xA7FF), StatusClass::RetryableFailure);
        assert_eq!(classify_status(0x0110), StatusClass::RetryableFailure);
    }

    #[test]
    fn dataset_failures_are_terminal() {
        assert_eq!(classify_status(0xA900), StatusClass::TerminalFailure);
        assert_eq!(classify_status(0xA9FF), StatusClass::TerminalFailure);
        assert_eq!(classify_status(0xC000), StatusClass::TerminalFailure);
        assert_eq!(classify_status(0xCFFF), StatusClass::TerminalFailure);
    }

    #[test]
    fn pending_is_recognized_for_find() {
        assert_eq!(classify_status(0xFF00), StatusClass::Pending);
        assert_eq!(classify_status(0xFF01), StatusClass::Pending);
    }

    #[test]
    fn unknown_statuses_do_not_retry() {
        assert_eq!(classify_status(0x1234), StatusClass::TerminalFailure);
    }
}
