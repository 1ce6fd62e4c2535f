use crate::policy::{Deadlines, OperationCategory};
use crate::supervisor::{CancelReason, OperationId};

/// A supervised operation did not run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SupervisionError {
    #[error("operation {id} cancelled: {reason}")]
    Cancelled { id: OperationId, reason: CancelReason },
}

impl SupervisionError {
    #[must_use]
    pub fn reason(&self) -> CancelReason {
        match self {
            Self::Cancelled { reason, .. } => *reason,
        }
    }

    /// Whether the operation was stopped by a timeout tier.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.reason(),
            CancelReason::MediumTimeout | CancelReason::HardTimeout
        )
    }
}

/// Invalid [`TimeoutPolicy`](crate::TimeoutPolicy).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("{category} deadlines must strictly increase from a non-zero soft deadline, got {deadlines:?}")]
    NotIncreasing {
        category: OperationCategory,
        deadlines: Deadlines,
    },
}
