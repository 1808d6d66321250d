//! `CommandRecord` and the derived `Status` state machine (spec §3, §4.1).

use std::time::Duration;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::ids::CommandId;

/// Highest value `desiredRunid` can take before wrapping back to 1.
///
/// The upstream source wraps at `2 << 31`, which overruns a signed 32-bit
/// field. Per the corrected design note this implementation wraps an
/// unsigned counter at `2^31 - 1`.
const RUNID_MAX: u32 = (1u32 << 31) - 1;

/// Desired/actual reconciliation outcome derived from a `CommandRecord`'s
/// fields. See spec §4.1 for the full derivation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Unknown,
    TryingToStart,
    Running,
    Restarting,
    TryingToStop,
    Removing,
    StoppedOk,
    StoppedError,
}

/// Static policy and identity fields an operator supplies for a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub exec_str: String,
    pub command_id: CommandId,
    /// Slash-delimited path, possibly empty.
    pub group: String,
    pub auto_respawn: bool,
    pub stop_signal: i32,
    pub stop_time_allowed: u32,
}

impl CommandSpec {
    pub fn normalized_group(&self) -> String {
        normalize_group(&self.group)
    }
}

/// Collapses empty segments produced by e.g. `a//b` or a leading/trailing
/// slash, per spec §4.2's `GetCommandsByGroup` boundary behavior.
pub fn normalize_group(path: &str) -> String {
    path.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/")
}

/// One managed process, as tracked by the Sheriff. Created by an operator's
/// `AddCommand` or by first appearance in an inbound `DeputyInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub spec: CommandSpec,

    /// Monotonic counter, wraps at `RUNID_MAX` back to 1. Starts at 1 so
    /// that a freshly added command immediately desires to be running.
    pub desired_runid: u32,
    pub force_quit: bool,

    // Deputy-reported fields; meaningless until `updated_from_info`.
    pub actual_runid: u32,
    /// -1 unknown, 0 stopped, >0 running.
    pub pid: i32,
    pub exit_code: i32,
    pub cpu_usage: f64,
    pub mem_vsize: u64,
    pub mem_rss: u64,

    pub scheduled_for_removal: bool,
    pub updated_from_info: bool,
}

impl CommandRecord {
    /// Creates a record from an operator-supplied spec. `desired_runid`
    /// starts at 1 so the derived status is `TryingToStart` as soon as the
    /// deputy reports anything at all.
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            desired_runid: 1,
            force_quit: false,
            actual_runid: 0,
            pid: -1,
            exit_code: 0,
            cpu_usage: 0.0,
            mem_vsize: 0,
            mem_rss: 0,
            scheduled_for_removal: false,
            updated_from_info: false,
        }
    }

    /// Creates a record seeded from a deputy's self-report of a command the
    /// Sheriff did not already know about. `desired_runid` is set to match
    /// `actual_runid` so the Sheriff does not immediately try to restart
    /// something the deputy is already running as intended.
    pub fn from_deputy_report(spec: CommandSpec, actual_runid: u32, pid: i32, exit_code: i32) -> Self {
        let mut rec = Self::new(spec);
        rec.desired_runid = actual_runid.max(1);
        rec.actual_runid = actual_runid;
        rec.pid = pid;
        rec.exit_code = exit_code;
        rec.updated_from_info = true;
        rec
    }

    /// §4.1 status derivation table.
    pub fn status(&self) -> Status {
        if !self.updated_from_info {
            return Status::Unknown;
        }

        if self.desired_runid != self.actual_runid && !self.force_quit {
            return if self.pid == 0 {
                Status::TryingToStart
            } else {
                Status::Restarting
            };
        }

        if self.desired_runid == self.actual_runid {
            if self.pid > 0 {
                return if !self.force_quit && !self.scheduled_for_removal {
                    Status::Running
                } else {
                    Status::TryingToStop
                };
            }
            if self.pid == 0 {
                if self.scheduled_for_removal {
                    return Status::Removing;
                }
                if self.exit_code == 0 {
                    return Status::StoppedOk;
                }
                if self.force_quit && self.exited_by_clean_signal() {
                    return Status::StoppedOk;
                }
                return Status::StoppedError;
            }
        }

        Status::Unknown
    }

    fn exited_by_clean_signal(&self) -> bool {
        matches!(
            WaitStatus::from_raw(Pid::from_raw(0), self.exit_code),
            Ok(WaitStatus::Signaled(_, sig, _))
                if matches!(sig, Signal::SIGINT | Signal::SIGTERM | Signal::SIGKILL)
        )
    }

    fn next_runid(&self) -> u32 {
        if self.desired_runid >= RUNID_MAX {
            1
        } else {
            self.desired_runid + 1
        }
    }

    /// `Start`: no-op if already running and not force-quitting; otherwise
    /// bumps `desired_runid` and clears `force_quit`.
    ///
    /// Also a no-op while `!updated_from_info`: `new()` already seeds
    /// `desired_runid = 1` so a freshly added command desires to run
    /// before any deputy has reported on it. Bumping here too would
    /// desynchronize from the deputy's first report, whose `actualRunid`
    /// targets that initial `1` — not a `2` this command never asked for.
    pub fn start(&mut self) {
        if self.pid > 0 && !self.force_quit {
            return;
        }
        if !self.updated_from_info {
            return;
        }
        self.desired_runid = self.next_runid();
        self.force_quit = false;
    }

    /// `Stop`: sets `force_quit` without touching `desired_runid`.
    pub fn stop(&mut self) {
        self.force_quit = true;
    }

    /// `Restart`: always bumps `desired_runid` and clears `force_quit`.
    pub fn restart(&mut self) {
        self.desired_runid = self.next_runid();
        self.force_quit = false;
    }

    /// Applies one deputy-reported observation of this command, including
    /// the auto-`force_quit` guard described in spec §4.1: a command that
    /// has run to completion and does not auto-respawn must not be
    /// revived by a deputy that later restarts and re-reports it.
    pub fn apply_deputy_report(&mut self, actual_runid: u32, pid: i32, exit_code: i32, cpu_usage: f64, mem_vsize: u64, mem_rss: u64) {
        self.actual_runid = actual_runid;
        self.pid = pid;
        self.exit_code = exit_code;
        self.cpu_usage = cpu_usage;
        self.mem_vsize = mem_vsize;
        self.mem_rss = mem_rss;
        self.updated_from_info = true;

        if pid == 0 && actual_runid == self.desired_runid && !self.spec.auto_respawn && !self.force_quit {
            self.force_quit = true;
        }
    }

    pub fn stop_time_allowed(&self) -> Duration {
        Duration::from_secs(self.spec.stop_time_allowed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> CommandSpec {
        CommandSpec {
            exec_str: "/bin/sleep 60".into(),
            command_id: id.into(),
            group: String::new(),
            auto_respawn: false,
            stop_signal: 15,
            stop_time_allowed: 5,
        }
    }

    #[test]
    fn unknown_until_updated_from_info() {
        let rec = CommandRecord::new(spec("s1"));
        assert_eq!(rec.status(), Status::Unknown);
    }

    #[test]
    fn trying_to_start_then_running() {
        let mut rec = CommandRecord::new(spec("s1"));
        rec.apply_deputy_report(0, 0, 0, 0.0, 0, 0);
        assert_eq!(rec.status(), Status::TryingToStart);

        rec.apply_deputy_report(1, 1234, 0, 0.1, 1000, 500);
        assert_eq!(rec.status(), Status::Running);
    }

    #[test]
    fn stop_then_stopped_ok_on_sigint() {
        let mut rec = CommandRecord::new(spec("s1"));
        rec.apply_deputy_report(1, 1234, 0, 0.0, 0, 0);
        assert_eq!(rec.status(), Status::Running);

        rec.stop();
        assert_eq!(rec.status(), Status::TryingToStop);

        let sigint_status = 130; // low byte pattern for a SIGINT termination
        rec.apply_deputy_report(1, 0, sigint_status, 0.0, 0, 0);
        assert_eq!(rec.status(), Status::StoppedOk);
    }

    #[test]
    fn start_on_freshly_added_command_does_not_desync_from_first_deputy_report() {
        let mut rec = CommandRecord::new(spec("s1"));
        assert_eq!(rec.desired_runid, 1);

        // A script (or operator) calling `start` before the deputy has
        // ever reported on the command must not bump past the runid the
        // deputy's first report will use.
        rec.start();
        assert_eq!(rec.desired_runid, 1);

        rec.apply_deputy_report(1, 4242, 0, 0.0, 0, 0);
        assert_eq!(rec.status(), Status::Running);
    }

    #[test]
    fn stop_does_not_bump_desired_runid() {
        let mut rec = CommandRecord::new(spec("s1"));
        rec.apply_deputy_report(1, 0, 0, 0.0, 0, 0);
        let before = rec.desired_runid;
        rec.stop();
        assert_eq!(rec.desired_runid, before);
        assert!(rec.force_quit);
    }

    #[test]
    fn start_on_running_is_noop() {
        let mut rec = CommandRecord::new(spec("s1"));
        rec.apply_deputy_report(1, 1234, 0, 0.0, 0, 0);
        let before_runid = rec.desired_runid;
        let before_status = rec.status();
        rec.start();
        assert_eq!(rec.desired_runid, before_runid);
        assert_eq!(rec.status(), before_status);
    }

    #[test]
    fn runid_wraps_from_max_to_one() {
        let mut rec = CommandRecord::new(spec("s1"));
        rec.desired_runid = RUNID_MAX;
        rec.restart();
        assert_eq!(rec.desired_runid, 1);
    }

    #[test]
    fn auto_force_quit_prevents_zombie_respawn() {
        let mut rec = CommandRecord::new(spec("s1"));
        // desired==actual==1, pid goes to 0, no auto-respawn, not force-quit yet.
        rec.apply_deputy_report(1, 1234, 0, 0.0, 0, 0);
        rec.apply_deputy_report(1, 0, 0, 0.0, 0, 0);
        assert!(rec.force_quit);
        assert_eq!(rec.status(), Status::StoppedOk);
    }

    #[test]
    fn group_normalization_collapses_empty_segments() {
        assert_eq!(normalize_group("a//b"), "a/b");
        assert_eq!(normalize_group("/a/b/"), "a/b");
        assert_eq!(normalize_group(""), "");
    }
}
