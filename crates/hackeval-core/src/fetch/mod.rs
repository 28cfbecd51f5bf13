//! Fetcher: resolve a submission's ref, download its tree, and unpack it
//! into an isolated per-job [`Workspace`].
//!
//! Network failures are retried with exponential backoff. Every other
//! failure is reported immediately. The unpacked size is counted while
//! extracting so an oversized tree aborts mid-stream, and the partial
//! directory is removed with the `TempDir`.

pub mod error;
pub mod source;

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::FetchSection;
use crate::domain::SourceLocation;
use crate::sandbox::{retry_with_backoff, CancelSignal, RetryPolicy};

pub use error::FetchError;
pub use source::{match_ref, ByteStream, CommitHash, GitSourceProvider, SourceProvider};

const SOURCE_DIR: &str = "src";
const SCRATCH_DIR: &str = "scratch";

/// An unpacked submission snapshot plus per-run scratch space.
///
/// Layout: `<tmp>/src` holds the tree, `<tmp>/scratch/<name>` are writable
/// directories outside it. Dropping the workspace removes everything.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    commit: CommitHash,
    size_bytes: u64,
}

impl Workspace {
    /// Root of the unpacked source tree.
    pub fn root(&self) -> PathBuf {
        self.dir.path().join(SOURCE_DIR)
    }

    pub fn commit(&self) -> &CommitHash {
        &self.commit
    }

    /// Total file bytes unpacked.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Create (or reuse) a scratch directory outside the source tree.
    pub fn scratch_dir(&self, name: &str) -> std::io::Result<PathBuf> {
        let safe: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let path = self.dir.path().join(SCRATCH_DIR).join(safe);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Remove the workspace, surfacing any cleanup error.
    pub fn destroy(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Fetches submissions through a [`SourceProvider`].
pub struct Fetcher {
    provider: Arc<dyn SourceProvider>,
    settings: FetchSection,
    workspace_root: PathBuf,
}

impl Fetcher {
    pub fn new(
        provider: Arc<dyn SourceProvider>,
        settings: FetchSection,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            settings,
            workspace_root: workspace_root.into(),
        }
    }

    /// Git-backed fetcher built from configuration.
    pub fn git(settings: FetchSection, workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let provider = GitSourceProvider::new(
            Duration::from_millis(settings.git_timeout_ms),
            workspace_root.clone(),
        );
        Self::new(Arc::new(provider), settings, workspace_root)
    }

    fn check_host(&self, location: &SourceLocation) -> Result<(), FetchError> {
        if location.repo_url.starts_with('-') {
            return Err(FetchError::NotFound(format!(
                "invalid repository url: {}",
                location.repo_url
            )));
        }
        if self.settings.allowed_hosts.is_empty() {
            return Ok(());
        }
        match location.host() {
            Some(host)
                if self
                    .settings
                    .allowed_hosts
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(host)) =>
            {
                Ok(())
            }
            Some(host) => Err(FetchError::HostNotAllowed(host.to_string())),
            None => Err(FetchError::HostNotAllowed(location.repo_url.clone())),
        }
    }

    /// Resolve `location.reference` and materialize the tree on disk.
    pub async fn fetch(
        &self,
        location: &SourceLocation,
        cancel: &CancelSignal,
    ) -> Result<Workspace, FetchError> {
        self.check_host(location)?;
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let policy = RetryPolicy::new(self.settings.max_attempts, self.settings.backoff_base_ms);
        let provider = self.provider.as_ref();
        let repo_url = location.repo_url.as_str();
        let reference = location.reference.as_str();

        let commit = tokio::select! {
            res = retry_with_backoff(&policy, FetchError::is_retryable, move |_| {
                provider.resolve_ref(repo_url, reference)
            }) => res?,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };
        tracing::debug!(repo = %repo_url, reference = %reference, commit = %commit, "resolved ref");

        let pinned = &commit;
        let stream = tokio::select! {
            res = retry_with_backoff(&policy, FetchError::is_retryable, move |_| {
                provider.download(repo_url, pinned)
            }) => res?,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        std::fs::create_dir_all(&self.workspace_root)?;
        let dir = tempfile::Builder::new()
            .prefix("hackeval-ws-")
            .tempdir_in(&self.workspace_root)?;
        let limit = self.settings.max_workspace_bytes;
        let dest = dir.path().join(SOURCE_DIR);

        let unpack = tokio::task::spawn_blocking(move || {
            unpack_capped(stream, &dest, limit).map(|bytes| (dir, bytes))
        });
        let (dir, size_bytes) = tokio::select! {
            res = unpack => res.map_err(|e| FetchError::Workspace(std::io::Error::other(e)))??,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        Ok(Workspace {
            dir,
            commit,
            size_bytes,
        })
    }
}

/// Relative paths with no parent, root, or prefix components.
fn is_safe_entry_path(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn is_disk_exhaustion(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::ENOSPC || code == libc::EDQUOT)
}

/// Unpack `stream` into `dest`, counting file bytes against `limit`.
pub fn unpack_capped(stream: impl Read, dest: &Path, limit: u64) -> Result<u64, FetchError> {
    std::fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(stream);
    archive.set_preserve_permissions(false);
    archive.set_overwrite(true);

    let mut total: u64 = 0;
    let entries = archive
        .entries()
        .map_err(|e| FetchError::InvalidArchive(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| FetchError::InvalidArchive(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| FetchError::InvalidArchive(e.to_string()))?
            .into_owned();
        if !is_safe_entry_path(&path) {
            return Err(FetchError::InvalidArchive(format!(
                "unsafe entry path: {}",
                path.display()
            )));
        }
        if entry.header().entry_type().is_file() {
            let size = entry
                .header()
                .size()
                .map_err(|e| FetchError::InvalidArchive(e.to_string()))?;
            total = total.saturating_add(size);
            if total > limit {
                return Err(FetchError::PayloadTooLarge { limit });
            }
        }
        entry.unpack_in(dest).map_err(|e| {
            if is_disk_exhaustion(&e) {
                FetchError::Workspace(e)
            } else {
                FetchError::InvalidArchive(format!("{}: {e}", path.display()))
            }
        })?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::sandbox::cancel_pair;

    fn run_git(dir: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("git");
        assert!(
            out.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    fn make_git_repo() -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        let p = dir.path();
        run_git(p, &["init", "-q", "-b", "main"]);
        run_git(p, &["config", "user.email", "judge@hackeval.local"]);
        run_git(p, &["config", "user.name", "Judge"]);
        std::fs::write(p.join("solution.py"), "print(sum(map(int, input().split())))\n")
            .expect("write");
        std::fs::create_dir_all(p.join("lib")).expect("mkdir");
        std::fs::write(p.join("lib/util.py"), "X = 1\n").expect("write");
        run_git(p, &["add", "."]);
        run_git(p, &["commit", "-q", "-m", "initial"]);
        dir
    }

    fn settings() -> FetchSection {
        FetchSection {
            max_attempts: 3,
            backoff_base_ms: 1,
            ..FetchSection::default()
        }
    }

    fn tar_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, *data)
                .expect("append");
        }
        builder.into_inner().expect("finish")
    }

    #[tokio::test]
    async fn test_fetch_branch_from_local_repo() {
        let repo = make_git_repo();
        let head = run_git(repo.path(), &["rev-parse", "HEAD"]);
        let root = TempDir::new().expect("root");
        let fetcher = Fetcher::git(settings(), root.path());

        let location = SourceLocation::new(repo.path().to_string_lossy(), "main");
        let ws = fetcher
            .fetch(&location, &CancelSignal::never())
            .await
            .expect("fetch");

        assert_eq!(ws.commit().as_str(), head);
        assert!(ws.root().join("solution.py").is_file());
        assert!(ws.root().join("lib/util.py").is_file());
        assert!(ws.size_bytes() > 0);

        let scratch = ws.scratch_dir("case 0").expect("scratch");
        assert!(scratch.is_dir());
        assert!(!scratch.starts_with(ws.root()));

        let root_path = ws.root();
        ws.destroy().expect("destroy");
        assert!(!root_path.exists());
    }

    #[tokio::test]
    async fn test_fetch_pinned_sha() {
        let repo = make_git_repo();
        let first = run_git(repo.path(), &["rev-parse", "HEAD"]);
        std::fs::write(repo.path().join("later.txt"), "later\n").expect("write");
        run_git(repo.path(), &["add", "."]);
        run_git(repo.path(), &["commit", "-q", "-m", "second"]);

        let root = TempDir::new().expect("root");
        let fetcher = Fetcher::git(settings(), root.path());
        let location = SourceLocation::new(repo.path().to_string_lossy(), first.clone());
        let ws = fetcher
            .fetch(&location, &CancelSignal::never())
            .await
            .expect("fetch");
        assert_eq!(ws.commit().as_str(), first);
        assert!(!ws.root().join("later.txt").exists());
    }

    #[tokio::test]
    async fn test_fetch_annotated_tag_on_deleted_branch() {
        let repo = make_git_repo();
        let p = repo.path();
        run_git(p, &["checkout", "-q", "-b", "side"]);
        std::fs::write(p.join("side.txt"), "tagged only\n").expect("write");
        run_git(p, &["add", "."]);
        run_git(p, &["commit", "-q", "-m", "side"]);
        run_git(p, &["tag", "-a", "v1", "-m", "release"]);
        let tagged = run_git(p, &["rev-parse", "HEAD"]);
        run_git(p, &["checkout", "-q", "main"]);
        run_git(p, &["branch", "-q", "-D", "side"]);

        let root = TempDir::new().expect("root");
        let fetcher = Fetcher::git(settings(), root.path());
        let location = SourceLocation::new(format!("file://{}", p.display()), "v1");
        let ws = fetcher
            .fetch(&location, &CancelSignal::never())
            .await
            .expect("fetch");

        assert_eq!(ws.commit().as_str(), tagged);
        assert!(ws.root().join("side.txt").is_file());
    }

    #[tokio::test]
    async fn test_fetch_missing_branch_is_ref_ambiguous() {
        let repo = make_git_repo();
        let root = TempDir::new().expect("root");
        let fetcher = Fetcher::git(settings(), root.path());
        let location = SourceLocation::new(repo.path().to_string_lossy(), "no-such-branch");

        match fetcher.fetch(&location, &CancelSignal::never()).await {
            Err(FetchError::RefAmbiguous { matches, .. }) => assert_eq!(matches, 0),
            other => panic!("expected RefAmbiguous, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_missing_repo_is_not_found() {
        let root = TempDir::new().expect("root");
        let fetcher = Fetcher::git(settings(), root.path());
        let missing = root.path().join("nope");
        let location = SourceLocation::new(missing.to_string_lossy(), "main");

        match fetcher.fetch(&location, &CancelSignal::never()).await {
            Err(FetchError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_oversized_tree_is_rejected() {
        let repo = make_git_repo();
        let root = TempDir::new().expect("root");
        let fetcher = Fetcher::git(
            FetchSection {
                max_workspace_bytes: 8,
                ..settings()
            },
            root.path(),
        );
        let location = SourceLocation::new(repo.path().to_string_lossy(), "main");

        match fetcher.fetch(&location, &CancelSignal::never()).await {
            Err(FetchError::PayloadTooLarge { limit }) => assert_eq!(limit, 8),
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
        let leftovers: Vec<_> = std::fs::read_dir(root.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("hackeval-ws-"))
            .collect();
        assert!(leftovers.is_empty(), "partial workspace left behind");
    }

    #[tokio::test]
    async fn test_host_allowlist() {
        let root = TempDir::new().expect("root");
        let fetcher = Fetcher::git(
            FetchSection {
                allowed_hosts: vec!["github.com".into()],
                ..settings()
            },
            root.path(),
        );
        let location = SourceLocation::new("https://evil.example/x.git", "main");
        match fetcher.fetch(&location, &CancelSignal::never()).await {
            Err(FetchError::HostNotAllowed(host)) => assert_eq!(host, "evil.example"),
            other => panic!("expected HostNotAllowed, got {:?}", other),
        }
    }

    struct FlakyProvider {
        failures_left: AtomicU32,
        calls: AtomicU32,
        archive: Vec<u8>,
    }

    #[async_trait]
    impl SourceProvider for FlakyProvider {
        async fn resolve_ref(&self, _url: &str, _r: &str) -> Result<CommitHash, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(FetchError::NetworkFailure("connection reset".into()));
            }
            Ok(CommitHash::parse(&"a".repeat(40)).expect("hash"))
        }

        async fn download(&self, _url: &str, _c: &CommitHash) -> Result<ByteStream, FetchError> {
            Ok(Box::new(std::io::Cursor::new(self.archive.clone())))
        }
    }

    #[tokio::test]
    async fn test_network_failures_are_retried() {
        let provider = Arc::new(FlakyProvider {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
            archive: tar_with(&[("main.py", b"print(1)\n")]),
        });
        let root = TempDir::new().expect("root");
        let fetcher = Fetcher::new(provider.clone(), settings(), root.path());
        let ws = fetcher
            .fetch(&SourceLocation::new("https://h/x", "main"), &CancelSignal::never())
            .await
            .expect("fetch after retries");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(ws.root().join("main.py").is_file());
    }

    #[tokio::test]
    async fn test_network_failures_exhaust_attempts() {
        let provider = Arc::new(FlakyProvider {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
            archive: Vec::new(),
        });
        let root = TempDir::new().expect("root");
        let fetcher = Fetcher::new(provider.clone(), settings(), root.path());
        match fetcher
            .fetch(&SourceLocation::new("https://h/x", "main"), &CancelSignal::never())
            .await
        {
            Err(FetchError::NetworkFailure(_)) => {}
            other => panic!("expected NetworkFailure, got {:?}", other),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let root = TempDir::new().expect("root");
        let fetcher = Fetcher::git(settings(), root.path());
        match fetcher
            .fetch(&SourceLocation::new("/tmp/whatever", "main"), &signal)
            .await
        {
            Err(FetchError::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other),
        }
    }

    #[test]
    fn test_unpack_rejects_parent_traversal() {
        let mut header = tar::Header::new_gnu();
        let data = b"owned";
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        {
            let name = b"../escape.txt";
            let gnu = header.as_gnu_mut().expect("gnu header");
            gnu.name[..name.len()].copy_from_slice(name);
        }
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, &data[..]).expect("append");
        let bytes = builder.into_inner().expect("finish");

        let dest = TempDir::new().expect("dest");
        match unpack_capped(std::io::Cursor::new(bytes), &dest.path().join("src"), 1024) {
            Err(FetchError::InvalidArchive(msg)) => assert!(msg.contains("escape")),
            other => panic!("expected InvalidArchive, got {:?}", other),
        }
        assert!(!dest.path().join("escape.txt").exists());
    }

    #[test]
    fn test_unpack_counts_bytes() {
        let bytes = tar_with(&[("a.txt", b"12345"), ("dir/b.txt", b"678")]);
        let dest = TempDir::new().expect("dest");
        let total = unpack_capped(std::io::Cursor::new(bytes), dest.path(), 8).expect("unpack");
        assert_eq!(total, 8);
        assert_eq!(
            std::fs::read_to_string(dest.path().join("dir/b.txt")).expect("read"),
            "678"
        );
    }

    #[test]
    fn test_unpack_stops_at_limit() {
        let bytes = tar_with(&[("a.txt", b"12345"), ("b.txt", b"6789")]);
        let dest = TempDir::new().expect("dest");
        match unpack_capped(std::io::Cursor::new(bytes), dest.path(), 8) {
            Err(FetchError::PayloadTooLarge { limit }) => assert_eq!(limit, 8),
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
        assert!(!dest.path().join("b.txt").exists());
    }
}
