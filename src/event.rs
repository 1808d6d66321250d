//! Listener events the Sheriff dispatches outside its lock (spec §4.2,
//! §5). Modeled on the teacher's `event::event::Event` enum-of-enums.

use crate::commands::Status;
use crate::ids::{CommandId, DeputyId, SheriffId};

#[derive(Clone, Debug, PartialEq)]
pub enum SheriffEvent {
    CommandAdded(CommandId),
    CommandRemoved(CommandId),
    CommandGroupChanged(CommandId, String),
    CommandStatusChanged {
        command_id: CommandId,
        old: Status,
        new: Status,
    },
    DeputyInfoReceived(DeputyId),
    ObserverStatusChanged(bool),
    SheriffConflictDetected(SheriffId),
}

/// A listener callback. Invoked by the dispatch worker outside the Sheriff
/// lock; may safely call back into public Sheriff operations.
pub trait Listener: Fn(SheriffEvent) + Send + Sync {}
impl<F: Fn(SheriffEvent) + Send + Sync> Listener for F {}
