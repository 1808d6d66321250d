use thiserror::Error;

use crate::ids::{CommandId, DeputyId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SheriffError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("command id `{0}` already exists")]
    DuplicateId(CommandId),

    #[error("command `{0}` not found")]
    CommandNotFound(CommandId),

    #[error("deputy `{0}` not found")]
    DeputyNotFound(DeputyId),

    #[error("sheriff is in observer mode")]
    ObserverBlocked,
}
