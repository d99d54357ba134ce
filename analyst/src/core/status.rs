//! Step status transition rules.
//!
//! Statuses move forward only: `pending -> in_progress -> (completed |
//! failed)`. Anything else indicates a bug in the caller, not bad model
//! output, so violations are reported as stable error strings.

use crate::core::types::StepStatus;

/// Check whether `from -> to` is a legal forward transition.
pub fn is_forward_transition(from: StepStatus, to: StepStatus) -> bool {
    matches!(
        (from, to),
        (StepStatus::Pending, StepStatus::InProgress)
            | (StepStatus::InProgress, StepStatus::Completed)
            | (StepStatus::InProgress, StepStatus::Failed)
    )
}

/// Validate a transition, returning a stable error message on violation.
pub fn validate_transition(step_id: u32, from: StepStatus, to: StepStatus) -> Result<(), String> {
    if is_forward_transition(from, to) {
        return Ok(());
    }
    Err(format!(
        "illegal status transition for step {}: {} -> {}",
        step_id,
        from.as_str(),
        to.as_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(is_forward_transition(
            StepStatus::Pending,
            StepStatus::InProgress
        ));
        assert!(is_forward_transition(
            StepStatus::InProgress,
            StepStatus::Completed
        ));
        assert!(is_forward_transition(
            StepStatus::InProgress,
            StepStatus::Failed
        ));
    }

    #[test]
    fn backward_and_skipping_transitions_are_rejected() {
        assert!(!is_forward_transition(
            StepStatus::Completed,
            StepStatus::InProgress
        ));
        assert!(!is_forward_transition(
            StepStatus::Pending,
            StepStatus::Completed
        ));
        assert!(!is_forward_transition(
            StepStatus::Failed,
            StepStatus::InProgress
        ));
        assert!(!is_forward_transition(
            StepStatus::Pending,
            StepStatus::Pending
        ));
    }

    #[test]
    fn validate_transition_reports_step_and_statuses() {
        let err = validate_transition(4, StepStatus::Completed, StepStatus::InProgress)
            .expect_err("expected violation");
        assert!(err.contains("step 4"));
        assert!(err.contains("completed -> in_progress"));
    }
}
