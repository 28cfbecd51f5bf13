//! Process inspection through `/proc`.
//!
//! [`snapshot`] lists every visible process with the `stat` fields the
//! sandbox needs to follow a run's process tree: parent, process group,
//! start time, and resident memory. On hosts without `/proc` the snapshot
//! is empty.

use std::collections::HashMap;
use std::fs;

/// One process as seen in `/proc/<pid>/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcEntry {
    pub pid: i32,
    pub ppid: i32,
    pub pgrp: i32,
    /// Single-letter process state (`R`, `S`, `Z`, ...).
    pub state: char,
    /// Start time in clock ticks since boot; `(pid, start_time)` is unique.
    pub start_time: u64,
    /// Resident set size in pages.
    pub rss_pages: u64,
}

impl ProcEntry {
    pub fn is_zombie(&self) -> bool {
        self.state == 'Z' || self.state == 'X'
    }
}

/// Parse the fields of `/proc/<pid>/stat` we need.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
fn parse_stat(pid: i32, stat: &str) -> Option<ProcEntry> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is field 3 (state) of proc(5)
    let state = fields.first()?.chars().next()?;
    let ppid: i32 = fields.get(1)?.parse().ok()?;
    let pgrp: i32 = fields.get(2)?.parse().ok()?;
    let start_time: u64 = fields.get(19)?.parse().ok()?;
    let rss_pages: i64 = fields.get(21)?.parse().ok()?;
    Some(ProcEntry {
        pid,
        ppid,
        pgrp,
        state,
        start_time,
        rss_pages: rss_pages.max(0) as u64,
    })
}

/// Read one process. `None` if it is gone.
pub fn read_entry(pid: i32) -> Option<ProcEntry> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat(pid, &stat)
}

/// Every process visible in `/proc`, keyed by pid.
pub fn snapshot() -> HashMap<i32, ProcEntry> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return HashMap::new();
    };
    let mut procs = HashMap::new();
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
        else {
            continue;
        };
        // processes may vanish between listing and reading
        let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some(parsed) = parse_stat(pid, &stat) {
            procs.insert(pid, parsed);
        }
    }
    procs
}

/// Whether the initial environment of `pid` contains the exact `KEY=VALUE`
/// entry `needle`.
pub fn environ_contains(pid: i32, needle: &[u8]) -> bool {
    let Ok(environ) = fs::read(format!("/proc/{pid}/environ")) else {
        return false;
    };
    environ.split(|b| *b == 0).any(|var| var == needle)
}

/// Members of process group `pgid`.
pub fn group_members(pgid: i32) -> Vec<ProcEntry> {
    let mut members: Vec<ProcEntry> = snapshot()
        .into_values()
        .filter(|p| p.pgrp == pgid)
        .collect();
    members.sort_by_key(|m| m.pid);
    members
}

/// Pids of group members that are not zombies.
pub fn live_members(pgid: i32) -> Vec<i32> {
    group_members(pgid)
        .into_iter()
        .filter(|m| !m.is_zombie())
        .map(|m| m.pid)
        .collect()
}

/// Whether `pid` exists and is not a zombie.
pub fn is_alive(pid: i32) -> bool {
    read_entry(pid).is_some_and(|p| !p.is_zombie())
}

pub fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}
