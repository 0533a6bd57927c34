use mcsm_protocol::management::instance::InstanceStatus;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned synchronously to callers of the instance manager.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("instance {0} not found")]
    NotFound(Uuid),

    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("port {0} is already used by instance {1}")]
    PortConflict(u16, Uuid),

    /// The operation is not valid in the current lifecycle state.
    #[error("cannot {action} while instance is {status}")]
    InvalidState {
        action: &'static str,
        status: InstanceStatus,
    },

    #[error("no restart is scheduled")]
    NoRestartScheduled,

    #[error("failed to launch: {0}")]
    Launch(String),

    #[error("instance has no input stream attached")]
    NoInput,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl InstanceError {
    pub(crate) fn invalid_state(action: &'static str, status: InstanceStatus) -> Self {
        Self::InvalidState { action, status }
    }
}

pub type InstanceResult<T> = Result<T, InstanceError>;
