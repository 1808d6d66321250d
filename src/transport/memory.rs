//! An in-memory `Transport` double. Every clone of a `MemoryTransport`
//! shares the same bus, so spawning two clones models two sheriffs (or a
//! sheriff and a test harness) on the same pub/sub fabric — this is what
//! the end-to-end duplicate-sheriff scenario in spec §8 exercises.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{DeputyInfo, Discovery, Orders, Transport, TransportError};

#[derive(Default)]
struct Bus {
    deputy_info: VecDeque<DeputyInfo>,
    orders: VecDeque<Orders>,
    discovery: VecDeque<Discovery>,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    bus: Arc<Mutex<Bus>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: injects a `DeputyInfo` as if a deputy had published it.
    pub fn inject_deputy_info(&self, msg: DeputyInfo) {
        self.bus.lock().unwrap().deputy_info.push_back(msg);
    }

    /// Test helper: drains pending `Discovery` messages (what a deputy
    /// would have observed).
    pub fn drain_discovery(&self) -> Vec<Discovery> {
        self.bus.lock().unwrap().discovery.drain(..).collect()
    }
}

impl Transport for MemoryTransport {
    fn publish_orders(&self, msg: &Orders) -> Result<(), TransportError> {
        self.bus.lock().unwrap().orders.push_back(msg.clone());
        Ok(())
    }

    fn publish_discovery(&self, msg: &Discovery) -> Result<(), TransportError> {
        self.bus.lock().unwrap().discovery.push_back(msg.clone());
        Ok(())
    }

    fn poll_deputy_info(&self) -> Vec<Result<DeputyInfo, TransportError>> {
        self.bus
            .lock()
            .unwrap()
            .deputy_info
            .drain(..)
            .map(Ok)
            .collect()
    }

    fn poll_orders(&self) -> Vec<Result<Orders, TransportError>> {
        self.bus.lock().unwrap().orders.drain(..).map(Ok).collect()
    }
}
