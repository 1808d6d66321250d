//! The Sheriff aggregate: state model, conflict detection, at-most-once
//! broadcast scheduling, and listener dispatch (spec §4.2).

pub mod error;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

pub use error::SheriffError;

use crate::commands::{CommandRecord, CommandSpec, Status};
use crate::deputy::DeputyRecord;
use crate::event::{Listener, SheriffEvent};
use crate::ids::{CommandId, DeputyId, SheriffId};
use crate::transport::{DeputyInfo, Discovery, Orders, Transport};

const DEPUTY_INFO_MAX_AGE: Duration = Duration::from_secs(30);
const BROADCAST_PERIOD: Duration = Duration::from_secs(1);

/// A command spec plus the deputy it should run on — the argument to
/// `AddCommand`.
#[derive(Debug, Clone, PartialEq)]
pub struct AddCommandRequest {
    pub deputy_id: DeputyId,
    pub spec: CommandSpec,
}

struct SheriffState {
    is_observer: bool,
    deputies: BTreeMap<DeputyId, DeputyRecord>,
}

pub struct Sheriff {
    sheriff_id: SheriffId,
    transport: Arc<dyn Transport>,
    state: Mutex<SheriffState>,
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
    event_tx: mpsc::Sender<Option<SheriffEvent>>,
    event_rx: Mutex<Option<mpsc::Receiver<Option<SheriffEvent>>>>,
    wake_tx: Mutex<Option<mpsc::Sender<()>>>,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
    exiting: AtomicBool,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
    broadcaster_handle: Mutex<Option<JoinHandle<()>>>,
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

impl Sheriff {
    /// Constructs a Sheriff, starts its broadcaster and listener-dispatch
    /// worker threads, and publishes the startup `Discovery` message.
    pub fn new(sheriff_id: SheriffId, transport: Arc<dyn Transport>, is_observer: bool) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel();
        let (wake_tx, wake_rx) = mpsc::channel();

        let sheriff = Arc::new(Self {
            sheriff_id,
            transport,
            state: Mutex::new(SheriffState {
                is_observer,
                deputies: BTreeMap::new(),
            }),
            listeners: Mutex::new(Vec::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            wake_tx: Mutex::new(Some(wake_tx)),
            wake_rx: Mutex::new(Some(wake_rx)),
            exiting: AtomicBool::new(false),
            dispatch_handle: Mutex::new(None),
            broadcaster_handle: Mutex::new(None),
        });

        let dispatch_sheriff = Arc::clone(&sheriff);
        let event_rx = dispatch_sheriff.event_rx.lock().unwrap().take().unwrap();
        let dispatch_handle = std::thread::spawn(move || dispatch_sheriff.dispatch_loop(event_rx));
        *sheriff.dispatch_handle.lock().unwrap() = Some(dispatch_handle);

        let broadcast_sheriff = Arc::clone(&sheriff);
        let wake_rx = broadcast_sheriff.wake_rx.lock().unwrap().take().unwrap();
        let broadcaster_handle = std::thread::spawn(move || broadcast_sheriff.broadcaster_loop(wake_rx));
        *sheriff.broadcaster_handle.lock().unwrap() = Some(broadcaster_handle);

        sheriff.publish_discovery();
        sheriff
    }

    pub fn sheriff_id(&self) -> &SheriffId {
        &self.sheriff_id
    }

    pub fn is_observer(&self) -> bool {
        self.state.lock().unwrap().is_observer
    }

    pub fn add_listener<L: Listener + 'static>(&self, listener: L) {
        self.listeners.lock().unwrap().push(Arc::new(listener));
    }

    fn emit(&self, event: SheriffEvent) {
        let _ = self.event_tx.send(Some(event));
    }

    fn dispatch_loop(&self, rx: mpsc::Receiver<Option<SheriffEvent>>) {
        while let Ok(Some(event)) = rx.recv() {
            let listeners = self.listeners.lock().unwrap().clone();
            for listener in listeners {
                listener(event.clone());
            }
        }
        debug!("sheriff event dispatch worker exiting");
    }

    fn broadcaster_loop(&self, rx: mpsc::Receiver<()>) {
        loop {
            match rx.recv_timeout(BROADCAST_PERIOD) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
            if self.exiting.load(Ordering::SeqCst) {
                break;
            }
            self.send_orders();
        }
        debug!("sheriff broadcaster worker exiting");
    }

    fn trigger_broadcast(&self) {
        if let Some(tx) = self.wake_tx.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
    }

    fn publish_discovery(&self) {
        let msg = Discovery {
            send_micros: now_micros(),
            transmitter_id: self.sheriff_id.clone(),
            nonce: now_micros(),
        };
        if let Err(err) = self.transport.publish_discovery(&msg) {
            warn!(%err, "failed to publish discovery message");
        }
    }

    /// Publishes one `Orders` message per deputy that has been heard from
    /// and is not in observer mode. Suppressed entirely in observer mode.
    fn send_orders(&self) {
        let state = self.state.lock().unwrap();
        if state.is_observer {
            return;
        }
        let send_micros = now_micros();
        for dep in state.deputies.values() {
            if let Some(orders) = dep.build_orders(send_micros, &self.sheriff_id) {
                if let Err(err) = self.transport.publish_orders(&orders) {
                    warn!(deputy_id = %dep.deputy_id, %err, "failed to publish orders");
                }
            }
        }
    }

    /// Shuts the worker threads down deterministically. Idempotent.
    ///
    /// Each worker thread holds its own `Arc<Sheriff>` clone for the
    /// duration of its loop, so the last `Arc` is never dropped until the
    /// threads themselves exit — this must be called explicitly rather
    /// than relied on via `Drop`.
    pub fn shutdown(&self) {
        self.exiting.store(true, Ordering::SeqCst);
        self.wake_tx.lock().unwrap().take();
        if let Some(h) = self.broadcaster_handle.lock().unwrap().take() {
            let _ = h.join();
        }
        let _ = self.event_tx.send(None);
        if let Some(h) = self.dispatch_handle.lock().unwrap().take() {
            let _ = h.join();
        }
    }

    // ---- operator mutations -------------------------------------------------

    pub fn add_command(&self, req: AddCommandRequest) -> Result<(), SheriffError> {
        if req.spec.exec_str.trim().is_empty() {
            return Err(SheriffError::InvalidArg("exec_str must not be empty".into()));
        }
        if req.spec.command_id.0.trim().is_empty() {
            return Err(SheriffError::InvalidArg("command_id must not be empty".into()));
        }
        if req.deputy_id.0.trim().is_empty() {
            return Err(SheriffError::InvalidArg("deputy_id must not be empty".into()));
        }

        let mut state = self.state.lock().unwrap();
        if state.is_observer {
            return Err(SheriffError::ObserverBlocked);
        }
        if state
            .deputies
            .values()
            .any(|d| d.commands.contains_key(&req.spec.command_id))
        {
            return Err(SheriffError::DuplicateId(req.spec.command_id));
        }

        let dep = state
            .deputies
            .entry(req.deputy_id.clone())
            .or_insert_with(|| DeputyRecord::new(req.deputy_id.clone()));
        let command_id = req.spec.command_id.clone();
        dep.upsert_spec(req.spec);
        drop(state);

        info!(%command_id, deputy_id = %req.deputy_id, "command added");
        self.emit(SheriffEvent::CommandAdded(command_id));
        self.trigger_broadcast();
        Ok(())
    }

    fn mutate_command<F>(&self, id: &CommandId, f: F) -> Result<(), SheriffError>
    where
        F: FnOnce(&mut CommandRecord),
    {
        let mut state = self.state.lock().unwrap();
        if state.is_observer {
            return Err(SheriffError::ObserverBlocked);
        }
        let rec = state
            .deputies
            .values_mut()
            .find_map(|d| d.commands.get_mut(id))
            .ok_or_else(|| SheriffError::CommandNotFound(id.clone()))?;
        let old = rec.status();
        f(rec);
        let new = rec.status();
        drop(state);

        if old != new {
            self.emit(SheriffEvent::CommandStatusChanged {
                command_id: id.clone(),
                old,
                new,
            });
        }
        self.trigger_broadcast();
        Ok(())
    }

    pub fn start_command(&self, id: &CommandId) -> Result<(), SheriffError> {
        self.mutate_command(id, |c| c.start())
    }

    pub fn stop_command(&self, id: &CommandId) -> Result<(), SheriffError> {
        self.mutate_command(id, |c| c.stop())
    }

    pub fn restart_command(&self, id: &CommandId) -> Result<(), SheriffError> {
        self.mutate_command(id, |c| c.restart())
    }

    /// If the owning deputy has never been heard from, the record is
    /// dropped immediately — no confirmation is possible. Otherwise it
    /// persists, marked `scheduled_for_removal`, until the deputy's next
    /// info omits it.
    pub fn schedule_for_removal(&self, id: &CommandId) -> Result<(), SheriffError> {
        let mut state = self.state.lock().unwrap();
        if state.is_observer {
            return Err(SheriffError::ObserverBlocked);
        }
        let dep = state
            .deputies
            .values_mut()
            .find(|d| d.commands.contains_key(id))
            .ok_or_else(|| SheriffError::CommandNotFound(id.clone()))?;

        let never_heard_from = !dep.has_been_heard_from();
        if never_heard_from {
            dep.commands.remove(id);
            drop(state);
            self.emit(SheriffEvent::CommandRemoved(id.clone()));
        } else {
            dep.commands.get_mut(id).unwrap().scheduled_for_removal = true;
            drop(state);
        }
        self.trigger_broadcast();
        Ok(())
    }

    pub fn set_command_exec(&self, id: &CommandId, exec_str: String) -> Result<(), SheriffError> {
        self.mutate_spec(id, |s| s.exec_str = exec_str)
    }

    pub fn set_command_group(&self, id: &CommandId, group: String) -> Result<(), SheriffError> {
        let group_clone = group.clone();
        self.mutate_spec(id, |s| s.group = group)?;
        self.emit(SheriffEvent::CommandGroupChanged(id.clone(), group_clone));
        Ok(())
    }

    pub fn set_command_auto_respawn(&self, id: &CommandId, auto_respawn: bool) -> Result<(), SheriffError> {
        self.mutate_spec(id, |s| s.auto_respawn = auto_respawn)
    }

    pub fn set_command_stop_signal(&self, id: &CommandId, stop_signal: i32) -> Result<(), SheriffError> {
        self.mutate_spec(id, |s| s.stop_signal = stop_signal)
    }

    pub fn set_command_stop_time_allowed(&self, id: &CommandId, stop_time_allowed: u32) -> Result<(), SheriffError> {
        self.mutate_spec(id, |s| s.stop_time_allowed = stop_time_allowed)
    }

    fn mutate_spec<F>(&self, id: &CommandId, f: F) -> Result<(), SheriffError>
    where
        F: FnOnce(&mut CommandSpec),
    {
        let mut state = self.state.lock().unwrap();
        if state.is_observer {
            return Err(SheriffError::ObserverBlocked);
        }
        let rec = state
            .deputies
            .values_mut()
            .find_map(|d| d.commands.get_mut(id))
            .ok_or_else(|| SheriffError::CommandNotFound(id.clone()))?;
        f(&mut rec.spec);
        Ok(())
    }

    /// Idempotent with respect to the prior value; emits
    /// `ObserverStatusChanged` only on an actual transition.
    pub fn set_observer(&self, observer: bool) {
        let mut state = self.state.lock().unwrap();
        if state.is_observer == observer {
            return;
        }
        state.is_observer = observer;
        drop(state);
        info!(observer, "observer mode changed");
        self.emit(SheriffEvent::ObserverStatusChanged(observer));
        if !observer {
            self.trigger_broadcast();
        }
    }

    /// Removes deputy records that are empty or whose commands are all
    /// scheduled for removal.
    pub fn purge_useless(&self) {
        let mut state = self.state.lock().unwrap();
        state
            .deputies
            .retain(|_, d| !(d.is_empty() || d.all_scheduled_for_removal()));
    }

    // ---- queries -------------------------------------------------------

    pub fn get_deputies(&self) -> Vec<DeputyId> {
        self.state.lock().unwrap().deputies.keys().cloned().collect()
    }

    pub fn find_deputy(&self, id: &DeputyId) -> Option<DeputyRecord> {
        self.state.lock().unwrap().deputies.get(id).cloned()
    }

    pub fn get_all_commands(&self) -> Vec<CommandRecord> {
        self.state
            .lock()
            .unwrap()
            .deputies
            .values()
            .flat_map(|d| d.commands.values().cloned())
            .collect()
    }

    pub fn get_command_by_id(&self, id: &CommandId) -> Option<CommandRecord> {
        self.state
            .lock()
            .unwrap()
            .deputies
            .values()
            .find_map(|d| d.commands.get(id).cloned())
    }

    pub fn get_commands_by_group(&self, path: &str) -> Vec<CommandRecord> {
        self.state
            .lock()
            .unwrap()
            .deputies
            .values()
            .flat_map(|d| d.commands_in_group(path).into_iter().cloned())
            .collect()
    }

    // ---- inbound handlers ------------------------------------------------

    pub fn on_deputy_info(&self, msg: DeputyInfo) {
        let mut state = self.state.lock().unwrap();

        if !state.is_observer {
            let age = now_micros().saturating_sub(msg.send_micros);
            if age > DEPUTY_INFO_MAX_AGE.as_micros() as u64 {
                warn!(deputy_id = %msg.deputy_id, age_micros = age, "dropping stale DeputyInfo");
                return;
            }
        }

        let dep = state
            .deputies
            .entry(msg.deputy_id.clone())
            .or_insert_with(|| DeputyRecord::new(msg.deputy_id.clone()));

        let mut added = Vec::new();
        let mut status_changes = Vec::new();
        let mut seen = std::collections::BTreeSet::new();

        for reported in &msg.cmds {
            let id = reported.spec.command_id.clone();
            seen.insert(id.clone());
            match dep.commands.get_mut(&id) {
                Some(existing) => {
                    let old = existing.status();
                    existing.spec = reported.spec.clone();
                    existing.apply_deputy_report(
                        reported.actual_runid,
                        reported.pid,
                        reported.exit_code,
                        reported.cpu_usage,
                        reported.mem_vsize,
                        reported.mem_rss,
                    );
                    let new = existing.status();
                    if old != new {
                        status_changes.push((id, old, new));
                    }
                }
                None => {
                    let rec = CommandRecord::from_deputy_report(
                        reported.spec.clone(),
                        reported.actual_runid,
                        reported.pid,
                        reported.exit_code,
                    );
                    dep.commands.insert(id.clone(), rec);
                    added.push(id);
                }
            }
        }

        let removed: Vec<CommandId> = dep
            .commands
            .iter()
            .filter(|(id, c)| c.scheduled_for_removal && !seen.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed {
            dep.commands.remove(id);
        }

        dep.cpu_load = msg.cpu_load;
        dep.phys_mem_total = msg.phys_mem_total;
        dep.phys_mem_free = msg.phys_mem_free;
        dep.last_update_micros = now_micros();

        drop(state);

        self.emit(SheriffEvent::DeputyInfoReceived(msg.deputy_id));
        for id in added {
            self.emit(SheriffEvent::CommandAdded(id));
        }
        for (id, old, new) in status_changes {
            self.emit(SheriffEvent::CommandStatusChanged {
                command_id: id,
                old,
                new,
            });
        }
        for id in removed {
            self.emit(SheriffEvent::CommandRemoved(id));
        }
    }

    pub fn on_orders(&self, msg: Orders) {
        if msg.sheriff_id == self.sheriff_id {
            return;
        }

        let mut state = self.state.lock().unwrap();
        if !state.is_observer {
            drop(state);
            warn!(other = %msg.sheriff_id, "conflicting sheriff detected");
            self.emit(SheriffEvent::SheriffConflictDetected(msg.sheriff_id));
            return;
        }

        let dep = state
            .deputies
            .entry(msg.deputy_id.clone())
            .or_insert_with(|| DeputyRecord::new(msg.deputy_id.clone()));

        let mut status_changes = Vec::new();
        let mut seen = std::collections::BTreeSet::new();

        for ordered in &msg.cmds {
            let id = ordered.spec.command_id.clone();
            seen.insert(id.clone());
            let rec = dep
                .commands
                .entry(id.clone())
                .or_insert_with(|| CommandRecord::new(ordered.spec.clone()));
            let old = rec.status();
            rec.spec = ordered.spec.clone();
            rec.desired_runid = ordered.desired_runid;
            rec.force_quit = ordered.force_quit;
            let new = rec.status();
            if old != new {
                status_changes.push((id, old, new));
            }
        }

        for (id, rec) in dep.commands.iter_mut() {
            if !seen.contains(id) {
                rec.scheduled_for_removal = true;
            }
        }

        drop(state);
        for (id, old, new) in status_changes {
            self.emit(SheriffEvent::CommandStatusChanged {
                command_id: id,
                old,
                new,
            });
        }
    }
}
