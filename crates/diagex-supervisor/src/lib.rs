//! Timeout supervision for diagex operations.
//!
//! [`TimeoutSupervisor`] tracks running operations and escalates them through
//! soft, medium, hard and nuclear deadlines taken from a [`TimeoutPolicy`].
//! Cancellation is cooperative through [`CancellationToken`]; a hard timeout
//! inside [`TimeoutSupervisor::supervise`] drops the supervised future.
//!
//! # Example
//!
//! ```no_run
//! use diagex_supervisor::{OperationCallbacks, OperationCategory, TimeoutSupervisor};
//!
//! # async fn run() {
//! let supervisor = TimeoutSupervisor::default();
//! let result = supervisor
//!     .supervise("render flow.mmd", OperationCategory::Export, OperationCallbacks::new(), async {
//!         // render...
//!         "<svg/>"
//!     })
//!     .await;
//! assert!(result.is_ok());
//! # }
//! ```

mod cancel;
mod error;
mod policy;
mod supervisor;
mod timer;

pub use cancel::CancellationToken;
pub use error::{PolicyError, SupervisionError};
pub use policy::{Deadlines, OperationCategory, TimeoutPolicy};
pub use supervisor::{
    CancelReason, DEFAULT_EXPORT_COOLDOWN, MediumDecision, OperationCallbacks, OperationGuard,
    OperationId, OperationRecord, OperationStage, TimeoutSupervisor,
};
pub use timer::{Timer, TimerHandle};
