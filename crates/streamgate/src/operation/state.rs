use std::fmt;
use std::sync::Arc;

use super::result::{Completion, VerificationResult};

/// Lifecycle of a verification run.
///
/// `Pending -> Running -> Completed | Cancelled`, plus `Pending -> Cancelled`
/// when cancellation arrives before `start()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Running,
    Completed(Arc<VerificationResult>),
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Completed(_) | OperationState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::Running => "running",
            OperationState::Completed(_) => "completed",
            OperationState::Cancelled => "cancelled",
        }
    }

    pub(crate) fn completion(&self) -> Option<Completion> {
        match self {
            OperationState::Completed(result) => Some(Completion::Completed(result.clone())),
            OperationState::Cancelled => Some(Completion::Cancelled),
            OperationState::Pending | OperationState::Running => None,
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
