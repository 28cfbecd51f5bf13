//! Tracking a run's whole process tree.
//!
//! A process group is not a containment boundary: any descendant can call
//! `setsid` and leave it. The tree therefore follows three links, repeated
//! to a fixpoint on every refresh:
//!
//! - membership in the run's process group
//! - a parent that is already tracked
//! - an orphan adopted by this host (it is a child subreaper) whose initial
//!   environment carries the run's marker
//!
//! Members are keyed by `(pid, start_time)` so a recycled pid is never
//! mistaken for a member.

use std::collections::HashMap;

use super::proc::{self, ProcEntry};

/// Environment variable injected into every run; its value is unique per run.
pub const RUN_MARKER_VAR: &str = "HACKEVAL_SANDBOX_RUN";

/// Make this process a child subreaper, so orphans of sandboxed runs are
/// reparented here instead of to init. Returns `false` if the kernel refused.
pub fn become_subreaper() -> bool {
    // SAFETY: prctl with PR_SET_CHILD_SUBREAPER only flips a process flag.
    unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) == 0 }
}

#[derive(Debug)]
pub(crate) struct ProcessTree {
    leader: i32,
    pgid: i32,
    host: i32,
    marker: Vec<u8>,
    /// pid -> start time
    members: HashMap<i32, u64>,
}

impl ProcessTree {
    pub(crate) fn new(leader: i32, marker_value: &str) -> Self {
        let mut members = HashMap::new();
        if let Some(entry) = proc::read_entry(leader) {
            members.insert(leader, entry.start_time);
        }
        Self {
            leader,
            pgid: leader,
            host: std::process::id() as i32,
            marker: format!("{RUN_MARKER_VAR}={marker_value}").into_bytes(),
            members,
        }
    }

    /// Re-scan `/proc` and return the current members, zombies included.
    pub(crate) fn refresh(&mut self) -> Vec<ProcEntry> {
        self.refresh_from(&proc::snapshot(), proc::environ_contains)
    }

    fn refresh_from(
        &mut self,
        procs: &HashMap<i32, ProcEntry>,
        has_marker: impl Fn(i32, &[u8]) -> bool,
    ) -> Vec<ProcEntry> {
        self.members
            .retain(|pid, start| procs.get(pid).is_some_and(|p| p.start_time == *start));
        loop {
            let mut grew = false;
            for p in procs.values() {
                if self.members.contains_key(&p.pid) || p.pid == self.host {
                    continue;
                }
                let joined = p.pgrp == self.pgid
                    || self.members.contains_key(&p.ppid)
                    || (p.ppid == self.host && has_marker(p.pid, &self.marker));
                if joined {
                    self.members.insert(p.pid, p.start_time);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        let mut found: Vec<ProcEntry> = self
            .members
            .keys()
            .filter_map(|pid| procs.get(pid).copied())
            .collect();
        found.sort_by_key(|p| p.pid);
        found
    }

    /// Resident memory of all live members.
    pub(crate) fn rss_bytes(&mut self, page_size: u64) -> u64 {
        self.refresh()
            .iter()
            .filter(|p| !p.is_zombie())
            .map(|p| p.rss_pages.saturating_mul(page_size))
            .sum()
    }

    /// SIGKILL every live member and the process group. Returns the pids
    /// that were still alive.
    pub(crate) fn kill_all(&mut self) -> Vec<i32> {
        let members = self.refresh();
        let mut live = Vec::new();
        for p in members.iter().filter(|p| !p.is_zombie()) {
            live.push(p.pid);
            // SAFETY: kill has no memory-safety preconditions.
            unsafe {
                libc::kill(p.pid, libc::SIGKILL);
            }
        }
        // killpg(0) would hit our own group
        if self.pgid > 1 {
            // SAFETY: as above.
            unsafe {
                libc::killpg(self.pgid, libc::SIGKILL);
            }
        }
        self.reap_adopted(&members);
        live
    }

    /// Collect exit statuses of members reparented to this host. The
    /// leader is reaped by its own waiter.
    fn reap_adopted(&self, members: &[ProcEntry]) {
        for p in members {
            if p.pid == self.leader || p.ppid != self.host || !p.is_zombie() {
                continue;
            }
            let mut status: libc::c_int = 0;
            // SAFETY: status points to a live local.
            unsafe {
                libc::waitpid(p.pid, &mut status, libc::WNOHANG);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;

    fn entry(pid: i32, ppid: i32, pgrp: i32, start_time: u64) -> ProcEntry {
        ProcEntry {
            pid,
            ppid,
            pgrp,
            state: 'S',
            start_time,
            rss_pages: 10,
        }
    }

    fn tree(leader: i32, host: i32) -> ProcessTree {
        let mut members = HashMap::new();
        members.insert(leader, 100);
        ProcessTree {
            leader,
            pgid: leader,
            host,
            marker: b"HACKEVAL_SANDBOX_RUN=abc".to_vec(),
            members,
        }
    }

    fn table(entries: &[ProcEntry]) -> HashMap<i32, ProcEntry> {
        entries.iter().map(|e| (e.pid, *e)).collect()
    }

    #[test]
    fn test_follows_group_and_parent_links() {
        let mut t = tree(500, 1);
        let procs = table(&[
            entry(500, 1, 500, 100),
            entry(501, 500, 500, 101),
            // left the group with setsid, still a child
            entry(502, 501, 502, 102),
            // grandchild of the escaped session
            entry(503, 502, 502, 103),
            entry(900, 1, 900, 50),
        ]);
        let pids: Vec<i32> = t.refresh_from(&procs, |_, _| false).iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![500, 501, 502, 503]);
    }

    #[test]
    fn test_keeps_members_after_reparenting() {
        let mut t = tree(500, 7);
        let first = table(&[entry(500, 7, 500, 100), entry(502, 500, 502, 102)]);
        t.refresh_from(&first, |_, _| false);

        // leader gone, escaped child adopted by the host
        let second = table(&[entry(502, 7, 502, 102)]);
        let pids: Vec<i32> = t.refresh_from(&second, |_, _| false).iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![502]);
    }

    #[test]
    fn test_adopted_orphan_needs_marker() {
        let mut t = tree(500, 7);
        let procs = table(&[entry(600, 7, 600, 200), entry(601, 7, 601, 201)]);
        let pids: Vec<i32> = t
            .refresh_from(&procs, |pid, needle| {
                pid == 600 && needle == b"HACKEVAL_SANDBOX_RUN=abc"
            })
            .iter()
            .map(|p| p.pid)
            .collect();
        assert_eq!(pids, vec![600]);
    }

    #[test]
    fn test_recycled_pid_is_dropped() {
        let mut t = tree(500, 7);
        t.refresh_from(&table(&[entry(500, 7, 500, 100), entry(501, 500, 500, 101)]), |_, _| false);

        // 501 exited and its pid now belongs to an unrelated process
        let procs = table(&[entry(500, 7, 500, 100), entry(501, 1, 501, 999)]);
        let pids: Vec<i32> = t.refresh_from(&procs, |_, _| false).iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![500]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_tree_sees_setsid_child() {
        let mut child = std::process::Command::new("sh")
            .args(["-c", "setsid sleep 5 & wait"])
            .process_group(0)
            .spawn()
            .expect("spawn sh");
        let leader = child.id() as i32;
        let mut t = ProcessTree::new(leader, "live-test");
        let mut escaped = None;
        for _ in 0..200 {
            escaped = t
                .refresh()
                .into_iter()
                .find(|p| p.pid != leader && p.pgrp != leader);
            if escaped.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let escaped = escaped.expect("setsid child tracked");
        t.kill_all();
        let _ = child.wait();
        for _ in 0..200 {
            if !proc::is_alive(escaped.pid) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(!proc::is_alive(escaped.pid));
    }
}
