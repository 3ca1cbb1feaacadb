use crate::state::{Trigger, WorkflowState};
use xrc_journal::Category;

/// Guards attached to transitions, evaluated in declared order.
///
/// Evaluation is non-suspending: every guard reads snapshots prepared
/// before the transition attempt, never hardware.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Metadata carries a non-empty patient id and name
    PatientIdentified,
    /// Metadata carries a protocol that parses and passes device limits
    ProtocolValid,
    /// All nine interlocks pass
    InterlocksPass,
    /// AEC reports ready when the selected protocol uses it
    AecReadyIfEnabled,
    /// Projected DAP stays inside study and daily limits
    DoseWithinLimits,
    /// The armed protocol's technique factors are inside device limits
    ProtocolWithinSafetyLimits,
    /// The study has an exposure awaiting review
    HasAcquiredImage,
}

impl Guard {
    pub fn name(self) -> &'static str {
        match self {
            Guard::PatientIdentified => "patient_identified",
            Guard::ProtocolValid => "protocol_valid",
            Guard::InterlocksPass => "interlocks_pass",
            Guard::AecReadyIfEnabled => "aec_ready",
            Guard::DoseWithinLimits => "dose_within_limits",
            Guard::ProtocolWithinSafetyLimits => "protocol_within_safety_limits",
            Guard::HasAcquiredImage => "has_acquired_image",
        }
    }
}

/// One row of the static transition table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransitionRule {
    pub to: WorkflowState,
    pub guards: &'static [Guard],
    pub category: Category,
}

const fn rule(to: WorkflowState, guards: &'static [Guard]) -> TransitionRule {
    TransitionRule {
        to,
        guards,
        category: Category::Workflow,
    }
}

const fn safety_rule(to: WorkflowState, guards: &'static [Guard]) -> TransitionRule {
    TransitionRule {
        to,
        guards,
        category: Category::Safety,
    }
}

/// Entry guards of the exposure state.
pub const EXPOSURE_GUARDS: &[Guard] = &[
    Guard::InterlocksPass,
    Guard::AecReadyIfEnabled,
    Guard::DoseWithinLimits,
    Guard::ProtocolWithinSafetyLimits,
];

/// Looks up the `(state, trigger)` entry. `None` means the trigger is not
/// defined in the current state and the attempt is rejected without guard
/// evaluation.
pub fn lookup(state: WorkflowState, trigger: Trigger) -> Option<TransitionRule> {
    use Trigger::*;
    use WorkflowState::*;
    let rule = match (state, trigger) {
        (Idle, StartWorklistSync) => rule(WorklistSync, &[]),
        (Idle, EmergencyActivated) => safety_rule(PatientSelect, &[Guard::PatientIdentified]),
        (WorklistSync, PatientConfirmed) => rule(PatientSelect, &[Guard::PatientIdentified]),
        (WorklistSync, Timeout) => rule(Idle, &[]),
        (PatientSelect, ProtocolSelected) => rule(ProtocolSelect, &[Guard::ProtocolValid]),
        (ProtocolSelect, ProtocolSelected) => rule(ProtocolSelect, &[Guard::ProtocolValid]),
        (ProtocolSelect, PositioningComplete) => rule(PositionAndPreview, &[]),
        (PositionAndPreview, ExposeRequested) => rule(ExposureTrigger, EXPOSURE_GUARDS),
        (ExposureTrigger, ExposureFinished) => rule(QcReview, &[]),
        (ExposureTrigger, AbortRequested) => safety_rule(QcReview, &[]),
        (ExposureTrigger, Timeout) => safety_rule(QcReview, &[]),
        (QcReview, ImageAccepted) => rule(MppsComplete, &[Guard::HasAcquiredImage]),
        (QcReview, ImageRejected) => rule(RejectRetake, &[]),
        (QcReview, PositioningComplete) => rule(PositionAndPreview, &[]),
        (RejectRetake, RetakeApproved) => rule(PositionAndPreview, &[Guard::DoseWithinLimits]),
        (RejectRetake, RetakeCancelled) => rule(QcReview, &[]),
        (MppsComplete, StudyCompleted) => rule(PacsExport, &[]),
        (PacsExport, StudyCompleted) => rule(Idle, &[]),
        _ => return None,
    };
    Some(rule)
}
