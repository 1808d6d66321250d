//! `DeputyRecord`: the set of commands a Sheriff attributes to one deputy,
//! plus that deputy's self-reported resource usage (spec §3).

use std::collections::BTreeMap;
use std::time::Duration;

use crate::commands::{normalize_group, CommandRecord, CommandSpec};
use crate::transport::{OrderedCommand, Orders};

pub use crate::ids::{CommandId, DeputyId};

/// Coarse staleness classification for the "Deputies" view described in
/// spec §7: entries older than 2s should be flagged yellow, older than 5s
/// red.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Never heard from (`last_update_micros == 0`).
    NeverSeen,
    Fresh,
    Stale,
    Dead,
}

const STALE_AFTER: Duration = Duration::from_secs(2);
const DEAD_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DeputyRecord {
    pub deputy_id: DeputyId,
    pub commands: BTreeMap<CommandId, CommandRecord>,
    pub cpu_load: f64,
    pub phys_mem_total: u64,
    pub phys_mem_free: u64,
    /// Microseconds since the epoch of the last accepted `DeputyInfo`; 0
    /// until the first one arrives.
    pub last_update_micros: u64,
}

impl DeputyRecord {
    pub fn new(deputy_id: DeputyId) -> Self {
        Self {
            deputy_id,
            commands: BTreeMap::new(),
            cpu_load: 0.0,
            phys_mem_total: 0,
            phys_mem_free: 0,
            last_update_micros: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn all_scheduled_for_removal(&self) -> bool {
        !self.commands.is_empty() && self.commands.values().all(|c| c.scheduled_for_removal)
    }

    pub fn has_been_heard_from(&self) -> bool {
        self.last_update_micros != 0
    }

    /// Classifies staleness relative to `now_micros`, per spec §7.
    pub fn liveness(&self, now_micros: u64) -> Liveness {
        if !self.has_been_heard_from() {
            return Liveness::NeverSeen;
        }
        let age = Duration::from_micros(now_micros.saturating_sub(self.last_update_micros));
        if age >= DEAD_AFTER {
            Liveness::Dead
        } else if age >= STALE_AFTER {
            Liveness::Stale
        } else {
            Liveness::Fresh
        }
    }

    /// Builds the outgoing `Orders` message for this deputy: every command
    /// not scheduled for removal, tagged with desired state. Returns `None`
    /// if this deputy has never been heard from (orders are suppressed per
    /// spec §4.2) or if the command set is empty.
    pub fn build_orders(&self, send_micros: u64, sheriff_id: &crate::ids::SheriffId) -> Option<Orders> {
        if !self.has_been_heard_from() {
            return None;
        }
        let cmds: Vec<OrderedCommand> = self
            .commands
            .values()
            .filter(|c| !c.scheduled_for_removal)
            .map(|c| OrderedCommand {
                spec: c.spec.clone(),
                desired_runid: c.desired_runid,
                force_quit: c.force_quit,
            })
            .collect();
        Some(Orders {
            send_micros,
            deputy_id: self.deputy_id.clone(),
            sheriff_id: sheriff_id.clone(),
            cmds,
        })
    }

    /// Inserts or updates a command by id, respecting the `CommandId`
    /// uniqueness invariant within this deputy's map.
    pub fn upsert_spec(&mut self, spec: CommandSpec) -> &mut CommandRecord {
        self.commands
            .entry(spec.command_id.clone())
            .and_modify(|c| c.spec = spec.clone())
            .or_insert_with(|| CommandRecord::new(spec))
    }

    pub fn commands_in_group(&self, group_path: &str) -> Vec<&CommandRecord> {
        let prefix = normalize_group(group_path);
        self.commands
            .values()
            .filter(|c| group_matches(&c.spec.normalized_group(), &prefix))
            .collect()
    }
}

/// `group` matches `prefix` if `prefix` is empty (matches everything) or
/// `group` equals `prefix` or starts with `prefix + "/"`.
pub fn group_matches(group: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    group == prefix || group.starts_with(&format!("{prefix}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, group: &str) -> CommandSpec {
        CommandSpec {
            exec_str: "/bin/true".into(),
            command_id: id.into(),
            group: group.into(),
            auto_respawn: false,
            stop_signal: 15,
            stop_time_allowed: 5,
        }
    }

    #[test]
    fn orders_suppressed_when_never_heard_from() {
        let dep = DeputyRecord::new(DeputyId::from("dep1"));
        assert!(dep.build_orders(0, &crate::ids::SheriffId("sh".into())).is_none());
    }

    #[test]
    fn orders_omit_commands_scheduled_for_removal() {
        let mut dep = DeputyRecord::new(DeputyId::from("dep1"));
        dep.last_update_micros = 1;
        dep.upsert_spec(spec("s1", ""));
        dep.commands.get_mut(&CommandId::from("s1")).unwrap().scheduled_for_removal = true;
        let orders = dep.build_orders(100, &crate::ids::SheriffId("sh".into())).unwrap();
        assert!(orders.cmds.is_empty());
    }

    #[test]
    fn group_query_matches_subpaths() {
        let mut dep = DeputyRecord::new(DeputyId::from("dep1"));
        dep.upsert_spec(spec("a", "a/b"));
        dep.upsert_spec(spec("b", "a/b/c"));
        dep.upsert_spec(spec("c", "other"));

        assert_eq!(dep.commands_in_group("a/b").len(), 2);
        assert_eq!(dep.commands_in_group("a//b").len(), 2);
        assert_eq!(dep.commands_in_group("").len(), 3);
    }

    #[test]
    fn liveness_thresholds() {
        let mut dep = DeputyRecord::new(DeputyId::from("dep1"));
        assert_eq!(dep.liveness(1_000_000), Liveness::NeverSeen);
        dep.last_update_micros = 0;
        dep.last_update_micros = 1_000_000;
        assert_eq!(dep.liveness(1_000_000 + 500_000), Liveness::Fresh);
        assert_eq!(dep.liveness(1_000_000 + 3_000_000), Liveness::Stale);
        assert_eq!(dep.liveness(1_000_000 + 6_000_000), Liveness::Dead);
    }
}
