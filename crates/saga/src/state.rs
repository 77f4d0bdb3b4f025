//! Saga lifecycle view.

use serde::{Deserialize, Serialize};

/// Where a saga instance is in its lifecycle.
///
/// State transitions:
/// ```text
/// Running ──┬──► Completed
///           └──► Compensating ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Forward steps are being executed.
    #[default]
    Running,

    /// A step failed and earlier steps are being compensated.
    Compensating,

    /// Every forward step ran (terminal state).
    Completed,

    /// Compensation reached the first step (terminal state).
    Compensated,
}

impl SagaState {
    /// Derives the state from a context's flags.
    pub fn from_flags(done: bool, compensating: bool) -> Self {
        match (done, compensating) {
            (false, false) => SagaState::Running,
            (false, true) => SagaState::Compensating,
            (true, false) => SagaState::Completed,
            (true, true) => SagaState::Compensated,
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Compensated)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Running => "Running",
            SagaState::Compensating => "Compensating",
            SagaState::Completed => "Completed",
            SagaState::Compensated => "Compensated",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
