//! Error recovery
//!
//! Failure reports from the dispatcher and the heartbeat monitor arrive at
//! the [`RecoveryCoordinator`], which picks a [`RecoveryStrategy`] by
//! [`FailureKind`](crate::error::FailureKind) and retries under a
//! [`RetryPolicy`].

mod coordinator;
mod policy;
mod strategy;

pub use coordinator::{RecoveryCoordinator, RecoveryOutcome};
pub use policy::RetryPolicy;
pub use strategy::{RecoveryContext, RecoveryStrategy, ReconnectStrategy, RecreateSurfaceStrategy, ReplayStrategy};
