//! Cleanup of descendants that leave the harness' process group
//!
//! `killpg` misses anything that called `setsid()`. To catch those, the
//! grader and every harness are child subreapers. While a harness runs,
//! orphans in its subtree are re-parented to the harness. When the harness
//! exits they are re-parented to this process, and [`sweep`] kills and reaps
//! every adopted child that is not a registered, still-running harness.

use nix::errno::Errno;
use nix::sys::prctl;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{getpid, Pid};
use std::sync::{Mutex, MutexGuard, Once};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Passes over the process table per sweep; each pass catches one more generation
const SWEEP_ROUNDS: usize = 16;

/// Pids of harnesses spawned by this process that have not been reaped yet
static LIVE: Mutex<Vec<i32>> = Mutex::new(Vec::new());

static ADOPT: Once = Once::new();

fn live() -> MutexGuard<'static, Vec<i32>> {
    LIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mark this process as subreaper for orphaned harness descendants
pub fn adopt_orphans() {
    ADOPT.call_once(|| match prctl::set_child_subreaper(true) {
        Ok(()) => debug!("Registered as child subreaper"),
        Err(e) => warn!("Failed to become child subreaper: {}", e),
    });
}

/// Child-side half of [`adopt_orphans`], called from `pre_exec`
pub fn adopt_in_child() -> std::io::Result<()> {
    prctl::set_child_subreaper(true).map_err(std::io::Error::from)
}

/// Registration of a spawned harness; removed on drop
#[derive(Debug)]
pub struct Tracked(Option<i32>);

impl Drop for Tracked {
    fn drop(&mut self) {
        if let Some(pid) = self.0 {
            live().retain(|p| *p != pid);
        }
    }
}

/// Spawn `cmd` and register the child before any sweep can see it
pub fn spawn_tracked(cmd: &mut Command) -> std::io::Result<(Child, Tracked)> {
    let mut live = live();
    let child = cmd.spawn()?;
    let pid = child.id().map(|id| id as i32);
    if let Some(pid) = pid {
        live.push(pid);
    }
    Ok((child, Tracked(pid)))
}

/// Kill and reap every adopted orphan. Blocking; returns how many were killed.
pub fn sweep() -> usize {
    let me = getpid().as_raw();
    let mut killed = 0;

    for _ in 0..SWEEP_ROUNDS {
        let orphans: Vec<i32> = {
            let live = live();
            children_of(me)
                .into_iter()
                .filter(|pid| !live.contains(pid))
                .collect()
        };
        if orphans.is_empty() {
            return killed;
        }

        for pid in orphans {
            let pid = Pid::from_raw(pid);
            match kill(pid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill orphan {}: {}", pid, e),
            }
            match waitpid(pid, None) {
                Ok(_) | Err(Errno::ECHILD) => {}
                Err(e) => warn!("Failed to reap orphan {}: {}", pid, e),
            }
            killed += 1;
        }
    }

    warn!("Orphans still appearing after {} sweep rounds", SWEEP_ROUNDS);
    killed
}

/// Pids whose parent is `parent`, from `/proc`
fn children_of(parent: i32) -> Vec<i32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .filter(|pid| {
            std::fs::read_to_string(format!("/proc/{}/stat", pid))
                .ok()
                .and_then(|stat| parent_of(&stat))
                == Some(parent)
        })
        .collect()
}

/// Parent pid from a `/proc/<pid>/stat` line; the command name may hold spaces and parens
fn parent_of(stat: &str) -> Option<i32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    fields.next()?; // state
    fields.next()?.parse().ok()
}
