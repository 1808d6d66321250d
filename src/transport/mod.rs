//! The pub/sub transport is an external collaborator (spec §1, §6): this
//! module only defines the typed payloads and the trait boundary a real
//! binding implements. `memory` ships an in-memory double for tests and for
//! embedding a Sheriff in a single process.

pub mod memory;

#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commands::CommandSpec;
use crate::ids::{DeputyId, SheriffId};

/// Channel name constants, matching spec §6.
pub mod channels {
    pub const PM_INFO: &str = "PM_INFO";
    pub const PM_ORDERS: &str = "PM_ORDERS";
    pub const PM_DISCOVER: &str = "PM_DISCOVER";
    pub const PM_OUTPUT: &str = "PM_OUTPUT";
}

/// One command as self-reported by a deputy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedCommand {
    pub spec: CommandSpec,
    pub actual_runid: u32,
    pub pid: i32,
    pub exit_code: i32,
    pub cpu_usage: f64,
    pub mem_vsize: u64,
    pub mem_rss: u64,
}

/// Published by a deputy on `PM_INFO`: its self-reported actual state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeputyInfo {
    pub send_micros: u64,
    pub deputy_id: DeputyId,
    pub cpu_load: f64,
    pub phys_mem_total: u64,
    pub phys_mem_free: u64,
    pub cmds: Vec<ReportedCommand>,
}

/// One command as ordered by a sheriff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedCommand {
    pub spec: CommandSpec,
    pub desired_runid: u32,
    pub force_quit: bool,
}

/// Published by a sheriff on `PM_ORDERS`: desired state for one deputy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orders {
    pub send_micros: u64,
    pub deputy_id: DeputyId,
    pub sheriff_id: SheriffId,
    pub cmds: Vec<OrderedCommand>,
}

/// Published once at Sheriff startup on `PM_DISCOVER` to elicit immediate
/// `DeputyInfo` replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub send_micros: u64,
    pub transmitter_id: SheriffId,
    pub nonce: u64,
}

/// Command output, consumed only by front-ends; the core never subscribes
/// to it, but it is part of the documented wire surface (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub command_id: crate::ids::CommandId,
    pub stream: OutputStream,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to decode message on channel `{channel}`: {reason}")]
    Decode { channel: String, reason: String },
    #[error("transport is closed")]
    Closed,
}

/// Publish/subscribe boundary the core depends on. A real implementation
/// binds this to a message broker; `memory::MemoryTransport` is the only
/// implementation shipped here.
#[cfg_attr(test, automock)]
pub trait Transport: Send + Sync {
    fn publish_orders(&self, msg: &Orders) -> Result<(), TransportError>;
    fn publish_discovery(&self, msg: &Discovery) -> Result<(), TransportError>;

    /// Non-blocking drain of any `DeputyInfo` messages received since the
    /// last call.
    fn poll_deputy_info(&self) -> Vec<Result<DeputyInfo, TransportError>>;

    /// Non-blocking drain of any `Orders` messages received since the last
    /// call (from this sheriff or a rival one).
    fn poll_orders(&self) -> Vec<Result<Orders, TransportError>>;
}
