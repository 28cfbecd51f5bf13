//! Bounded capture of child output, and the tree kill switch.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::tree::ProcessTree;

/// Why the sandbox killed a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    Time,
    Memory,
    Output,
    Cancelled,
}

impl KillReason {
    fn code(self) -> u8 {
        match self {
            KillReason::Time => 1,
            KillReason::Memory => 2,
            KillReason::Output => 3,
            KillReason::Cancelled => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(KillReason::Time),
            2 => Some(KillReason::Memory),
            3 => Some(KillReason::Output),
            4 => Some(KillReason::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for KillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillReason::Time => write!(f, "time"),
            KillReason::Memory => write!(f, "memory"),
            KillReason::Output => write!(f, "output"),
            KillReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Kills a run's process tree, remembering the first reason.
#[derive(Debug)]
pub(crate) struct KillSwitch {
    tree: Mutex<ProcessTree>,
    reason: AtomicU8,
}

impl KillSwitch {
    pub(crate) fn new(tree: ProcessTree) -> Self {
        Self {
            tree: Mutex::new(tree),
            reason: AtomicU8::new(0),
        }
    }

    fn tree(&self) -> MutexGuard<'_, ProcessTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `reason` if nothing tripped yet, and SIGKILL the tree.
    /// Returns `true` if this call set the reason.
    pub(crate) fn trip(&self, reason: KillReason) -> bool {
        let first = self
            .reason
            .compare_exchange(0, reason.code(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        self.kill_tree();
        first
    }

    pub(crate) fn reason(&self) -> Option<KillReason> {
        KillReason::from_code(self.reason.load(Ordering::SeqCst))
    }

    /// SIGKILL every tracked process. Returns the pids that were alive.
    pub(crate) fn kill_tree(&self) -> Vec<i32> {
        self.tree().kill_all()
    }

    pub(crate) fn rss_bytes(&self, page_size: u64) -> u64 {
        self.tree().rss_bytes(page_size)
    }
}

/// Output captured from one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Captured {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl Captured {
    pub(crate) fn into_lossy_string(self) -> String {
        match String::from_utf8(self.bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

/// Read until EOF, keeping at most `cap` bytes.
///
/// On overflow `on_overflow` runs once and reading stops; dropping the
/// reader closes the pipe so remaining writers get `SIGPIPE`.
pub(crate) fn read_capped<R: Read>(
    mut reader: R,
    cap: u64,
    on_overflow: impl FnOnce(),
) -> io::Result<Captured> {
    let cap = usize::try_from(cap).unwrap_or(usize::MAX);
    let mut bytes = Vec::with_capacity(cap.min(8192));
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let room = cap - bytes.len();
        if n > room {
            bytes.extend_from_slice(&buf[..room]);
            on_overflow();
            return Ok(Captured {
                bytes,
                truncated: true,
            });
        }
        bytes.extend_from_slice(&buf[..n]);
    }
    Ok(Captured {
        bytes,
        truncated: false,
    })
}

/// Write all of `input`, then close. A child that exits without reading
/// its stdin is not an error.
pub(crate) fn feed_stdin<W: Write>(mut writer: W, input: &[u8]) -> io::Result<()> {
    match writer.write_all(input).and_then(|_| writer.flush()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_read_under_cap() {
        let data = b"hello world".to_vec();
        let got = read_capped(&data[..], 64, || panic!("no overflow expected")).expect("read");
        assert_eq!(got.bytes, data);
        assert!(!got.truncated);
    }

    #[test]
    fn test_read_exactly_cap_is_not_truncated() {
        let data = vec![b'x'; 10];
        let got = read_capped(&data[..], 10, || panic!("no overflow expected")).expect("read");
        assert_eq!(got.bytes.len(), 10);
        assert!(!got.truncated);
    }

    #[test]
    fn test_read_over_cap_truncates_and_fires_once() {
        let data = vec![b'y'; 20_000];
        let fired = Cell::new(0);
        let got = read_capped(&data[..], 100, || fired.set(fired.get() + 1)).expect("read");
        assert_eq!(got.bytes.len(), 100);
        assert!(got.truncated);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_lossy_string() {
        let c = Captured {
            bytes: vec![b'o', b'k', 0xff],
            truncated: false,
        };
        assert!(c.into_lossy_string().starts_with("ok"));
    }

    #[test]
    fn test_kill_reason_roundtrip_codes() {
        for r in [
            KillReason::Time,
            KillReason::Memory,
            KillReason::Output,
            KillReason::Cancelled,
        ] {
            assert_eq!(KillReason::from_code(r.code()), Some(r));
        }
        assert_eq!(KillReason::from_code(0), None);
    }

    #[test]
    fn test_feed_stdin_into_buffer() {
        let mut sink = Vec::new();
        feed_stdin(&mut sink, b"2 3\n").expect("write");
        assert_eq!(sink, b"2 3\n");
    }
}
