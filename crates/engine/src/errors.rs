use thiserror::Error;

use signoff_core::gate::AccessDenial;
use signoff_db::StoreError;

/// Failure taxonomy for every controller operation. Tags are stable; the
/// calling feature owns translation into user-facing copy.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("not authorized: {reason}")]
    Authorization { reason: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("precondition failed: {reason}")]
    PreconditionFailed { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
    #[error("concurrent update conflict after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl WorkflowError {
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound { reason: reason.into() }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState { reason: reason.into() }
    }

    pub fn precondition_failed(reason: impl Into<String>) -> Self {
        Self::PreconditionFailed { reason: reason.into() }
    }

    /// Gate denials split three ways: status-related denials are
    /// invalid-state, structural ones are failed preconditions, everything
    /// else is an authorization failure.
    pub fn from_denial(denial: AccessDenial) -> Self {
        let reason = denial.reason();
        if denial.is_state_denial() {
            Self::InvalidState { reason }
        } else if denial.is_precondition_denial() {
            Self::PreconditionFailed { reason }
        } else {
            Self::Authorization { reason }
        }
    }
}

#[cfg(test)]
mod tests {
    use signoff_core::domain::round::RoundStatus;
    use signoff_core::gate::AccessDenial;

    use super::WorkflowError;

    #[test]
    fn ownership_denial_maps_to_authorization() {
        let error = WorkflowError::from_denial(AccessDenial::NotRoundOwner {
            user_id: "u-1".to_string(),
        });
        assert!(matches!(error, WorkflowError::Authorization { .. }));
    }

    #[test]
    fn status_denial_maps_to_invalid_state() {
        let error = WorkflowError::from_denial(AccessDenial::RoundNotSubmitted {
            status: RoundStatus::Declined,
        });
        assert!(matches!(error, WorkflowError::InvalidState { .. }));
    }

    #[test]
    fn empty_roster_denial_maps_to_precondition() {
        let error = WorkflowError::from_denial(AccessDenial::NoApproversAssigned);
        assert!(matches!(error, WorkflowError::PreconditionFailed { .. }));
    }
}
