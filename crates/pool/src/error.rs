use {
    thiserror::Error,
    warmbox_common::ErrorKind,
    warmbox_runtime::RuntimeError,
};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("container pool is not enabled")]
    NotEnabled,

    #[error("container pool at capacity: {max} containers in use")]
    AtCapacity { max: usize },

    #[error("session {session_id} already has an assignment in progress")]
    AssignmentInProgress { session_id: String },

    #[error("no container assigned to session {session_id}")]
    NoContainer { session_id: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Policy(#[from] warmbox_policy::Error),
}

impl PoolError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotEnabled | Self::AssignmentInProgress { .. } | Self::NoContainer { .. } => {
                ErrorKind::Validation
            },
            Self::AtCapacity { .. } => ErrorKind::Capacity,
            Self::Runtime(e) => e.kind(),
            Self::Policy(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
