//! Source providers: resolve a ref to a commit and stream its tree.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::process::Command;

use super::error::FetchError;

/// A full 40-hex commit id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CommitHash(String);

impl CommitHash {
    /// Accepts exactly 40 hex digits; normalizes to lowercase.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        (s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tar stream of a commit's tree.
pub type ByteStream = Box<dyn Read + Send>;

/// Outbound source-fetch collaborator.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Resolve `reference` in the repository at `repo_url` to one commit.
    async fn resolve_ref(&self, repo_url: &str, reference: &str) -> Result<CommitHash, FetchError>;

    /// Stream the tree of `commit` as an uncompressed tar archive.
    async fn download(&self, repo_url: &str, commit: &CommitHash) -> Result<ByteStream, FetchError>;
}

// ---------------------------------------------------------------------------
// Ref matching
// ---------------------------------------------------------------------------

/// Pick the single commit `reference` names among `ls-remote` lines.
///
/// Exact matches only: `refs/heads/<ref>`, `refs/tags/<ref>` (the peeled
/// `^{}` entry wins for annotated tags), or the full ref name. Zero or
/// several distinct commits is `RefAmbiguous`.
pub fn match_ref(ls_remote: &str, reference: &str) -> Result<CommitHash, FetchError> {
    let mut entries: Vec<(&str, &str)> = Vec::new();
    for line in ls_remote.lines() {
        if let Some((sha, name)) = line.split_once('\t') {
            entries.push((sha.trim(), name.trim()));
        }
    }

    let head = format!("refs/heads/{reference}");
    let tag = format!("refs/tags/{reference}");
    let peeled_tag = format!("{tag}^{{}}");
    let peeled_full = format!("{reference}^{{}}");
    let tag_is_peeled = entries.iter().any(|(_, n)| *n == peeled_tag);
    let full_is_peeled = entries.iter().any(|(_, n)| *n == peeled_full);

    let mut commits: Vec<CommitHash> = Vec::new();
    for (sha, name) in &entries {
        let wanted = *name == head
            || (*name == tag && !tag_is_peeled)
            || *name == peeled_tag
            || (*name == reference && !full_is_peeled)
            || (*name == peeled_full && reference.starts_with("refs/"));
        if !wanted {
            continue;
        }
        if let Some(commit) = CommitHash::parse(sha) {
            if !commits.contains(&commit) {
                commits.push(commit);
            }
        }
    }

    if commits.len() == 1 {
        Ok(commits.remove(0))
    } else {
        Err(FetchError::RefAmbiguous {
            reference: reference.to_string(),
            matches: commits.len(),
        })
    }
}

/// Map git's stderr to a fetch error.
fn classify_git_failure(stderr: &str) -> FetchError {
    let lower = stderr.to_ascii_lowercase();
    let not_found = [
        "repository not found",
        "does not appear to be a git repository",
        "not a valid object name",
        "not our ref",
        "no such file or directory",
        "not found",
        "not a tree object",
        "bad object",
        "unknown revision",
        "couldn't find remote ref",
    ];
    if not_found.iter().any(|p| lower.contains(p)) {
        return FetchError::NotFound(stderr.trim().to_string());
    }
    FetchError::NetworkFailure(stderr.trim().to_string())
}

// ---------------------------------------------------------------------------
// GitSourceProvider
// ---------------------------------------------------------------------------

/// `git` CLI provider: `ls-remote`, a shallow fetch of the resolved
/// commit into an empty bare repository, `archive`.
#[derive(Debug, Clone)]
pub struct GitSourceProvider {
    timeout: Duration,
    scratch_root: PathBuf,
}

impl GitSourceProvider {
    pub fn new(timeout: Duration, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            timeout,
            scratch_root: scratch_root.into(),
        }
    }

    async fn git(&self, args: &[&str], cwd: Option<&Path>) -> Result<Output, FetchError> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_ASKPASS", "true")
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                FetchError::NetworkFailure(format!(
                    "git {} timed out after {}ms",
                    args.first().copied().unwrap_or(""),
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| FetchError::Workspace(std::io::Error::new(e.kind(), format!("git: {e}"))))?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_git_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

/// Archive file that deletes its clone directory when dropped.
struct ArchiveFile {
    file: File,
    _clone: TempDir,
}

impl Read for ArchiveFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

#[async_trait]
impl SourceProvider for GitSourceProvider {
    async fn resolve_ref(&self, repo_url: &str, reference: &str) -> Result<CommitHash, FetchError> {
        if let Some(pinned) = CommitHash::parse(reference) {
            return Ok(pinned);
        }
        let output = self.git(&["ls-remote", repo_url], None).await?;
        match_ref(&String::from_utf8_lossy(&output.stdout), reference)
    }

    async fn download(&self, repo_url: &str, commit: &CommitHash) -> Result<ByteStream, FetchError> {
        std::fs::create_dir_all(&self.scratch_root)?;
        let clone = tempfile::Builder::new()
            .prefix("hackeval-clone-")
            .tempdir_in(&self.scratch_root)?;
        let bare = clone.path().join("repo.git");
        let bare_str = bare.to_string_lossy().to_string();
        self.git(&["init", "--bare", "--quiet", &bare_str], None)
            .await?;

        // the commit may only be reachable from a tag, so ask for it by id
        let by_commit = self
            .git(
                &["fetch", "--quiet", "--no-tags", "--depth", "1", "--", repo_url, commit.as_str()],
                Some(&bare),
            )
            .await;
        if let Err(e) = by_commit {
            tracing::debug!(commit = %commit, error = %e, "fetch by commit id refused, fetching all refs");
            self.git(
                &[
                    "fetch",
                    "--quiet",
                    "--",
                    repo_url,
                    "+refs/heads/*:refs/heads/*",
                    "+refs/tags/*:refs/tags/*",
                ],
                Some(&bare),
            )
            .await?;
        }

        let archive = clone.path().join("tree.tar");
        let archive_str = archive.to_string_lossy().to_string();
        self.git(
            &["archive", "--format=tar", "-o", &archive_str, commit.as_str()],
            Some(&bare),
        )
        .await?;

        let file = File::open(&archive)?;
        Ok(Box::new(ArchiveFile {
            file,
            _clone: clone,
        }))
    }
}
