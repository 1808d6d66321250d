//! Core of the Sheriff fleet control plane: the reconciliation engine and
//! the script execution engine described in the project specification.
//! Deputies, the pub/sub transport wire format, the config-file grammar,
//! and front-ends are external collaborators; this crate only depends on
//! the [`transport::Transport`] trait boundary for the first and ships a
//! parsed [`config::tree::ConfigTree`] model for the third.

pub mod cli;
pub mod commands;
pub mod config;
pub mod deputy;
pub mod event;
pub mod ids;
pub mod logging;
pub mod script;
pub mod sheriff;
pub mod transport;

pub use commands::{CommandRecord, CommandSpec, Status};
pub use deputy::DeputyRecord;
pub use event::SheriffEvent;
pub use ids::{CommandId, DeputyId, SheriffId};
pub use script::{Action, ScriptError, ScriptEvent, ScriptManager};
pub use sheriff::{AddCommandRequest, Sheriff, SheriffError};
