//! Error taxonomy for the collectives engine
//!
//! Argument and precondition violations are returned to the caller as
//! `Err`, while resource exhaustion and substrate failures are fatal and
//! are turned into a process abort by the public API layer
//! (`api::global_exit`).

use thiserror::Error;

/// Errors the collectives engine can report.
#[derive(Debug, Error)]
pub enum ShcollError {
    /// Null buffer, invalid team, negative/zero size, or a PE that is not a
    /// member of the team the call was issued against.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A precondition the chosen algorithm requires was not met, e.g. a
    /// non-power-of-2 team size for recursive doubling, or an odd team size
    /// for neighbor-exchange fcollect.
    #[error("precondition violation: {0}")]
    PreconditionViolation(String),

    /// Scratch (pSync/pWrk) allocation failed. Fatal: recovery would leave
    /// the team in an indeterminate state, so the caller should treat this
    /// the same as `global_exit`.
    #[error("scratch allocation failed: {0}")]
    ResourceExhausted(String),

    /// The RMA substrate (L0) reported a failure from `quiet` or
    /// `wait_until`. Fatal for the same reason as resource exhaustion.
    #[error("substrate failure: {0}")]
    SubstrateFailure(String),

    /// Operation referenced a team handle that does not exist, or that has
    /// already been destroyed.
    #[error("invalid team handle")]
    InvalidTeam,

    /// Operation referenced a context handle that does not exist, or that
    /// is already locked by another thread.
    #[error("invalid or busy context handle")]
    InvalidContext,
}

impl ShcollError {
    /// True for the two error classes that are fatal (resource exhaustion,
    /// substrate failure) rather than returned to the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShcollError::ResourceExhausted(_) | ShcollError::SubstrateFailure(_)
        )
    }
}

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, ShcollError>;
