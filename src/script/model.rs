//! Script action model (spec §4.3).

use serde::{Deserialize, Serialize};

use crate::ids::CommandId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Everything,
    Group(String),
    Cmd(CommandId),
}

/// The predicate a `WaitStatus` (or a start/stop/restart's optional wait)
/// evaluates against a resolved target set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitStatusKind {
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    StartStopRestart {
        kind: ActionKind,
        target: Target,
        wait_status: Option<WaitStatusKind>,
    },
    WaitMs {
        delay_ms: i64,
    },
    WaitStatus {
        target: Target,
        wait_status: WaitStatusKind,
    },
    RunScript {
        name: String,
    },
}
