//! Shared fixtures: an in-memory tarball source and sandbox doubles.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hackeval_core::fetch::ByteStream;
use hackeval_core::sandbox::LandlockSupport;
use hackeval_core::{
    CancelSignal, CommitHash, FetchError, FetchSection, Fetcher, IsolationMode, ProcessSandbox,
    ResourceLimits, SandboxCapabilities, SandboxError, SandboxOutcome, SandboxRequest,
    SandboxResult, SandboxRunner, SandboxSection, SourceLocation, SourceProvider, Submission,
    Workspace,
};
use tempfile::TempDir;

pub const REPO: &str = "https://git.example/team/project.git";

/// Serves one fixed tree for the `main` branch.
pub struct TarProvider {
    files: Vec<(String, String)>,
}

impl TarProvider {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(path, body)| (path.to_string(), body.to_string()))
                .collect(),
        }
    }

    pub fn commit() -> CommitHash {
        CommitHash::parse(&"a".repeat(40)).expect("valid commit")
    }
}

#[async_trait]
impl SourceProvider for TarProvider {
    async fn resolve_ref(&self, _repo_url: &str, reference: &str) -> Result<CommitHash, FetchError> {
        if reference == "main" {
            Ok(Self::commit())
        } else {
            Err(FetchError::RefAmbiguous {
                reference: reference.to_string(),
                matches: 0,
            })
        }
    }

    async fn download(&self, _repo_url: &str, _commit: &CommitHash) -> Result<ByteStream, FetchError> {
        Ok(Box::new(Cursor::new(tarball(&self.files))))
    }
}

pub fn tarball(files: &[(String, String)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, body.as_bytes())
            .expect("append tar entry");
    }
    builder.into_inner().expect("finish tarball")
}

/// Materialize `files` as a workspace under a fresh temporary root.
pub async fn workspace(files: &[(&str, &str)]) -> (TempDir, Workspace) {
    let root = tempfile::tempdir().expect("tempdir");
    let fetcher = Fetcher::new(
        Arc::new(TarProvider::new(files)),
        FetchSection::default(),
        root.path(),
    );
    let ws = fetcher
        .fetch(&SourceLocation::new(REPO, "main"), &CancelSignal::never())
        .await
        .expect("fetch workspace");
    (root, ws)
}

pub fn submission(reference: &str) -> Submission {
    Submission::new("team-rocket", SourceLocation::new(REPO, reference), "spring-jam")
        .expect("valid submission")
}

/// A real process sandbox that runs without requiring Landlock.
pub fn process_sandbox() -> Arc<dyn SandboxRunner> {
    let settings = SandboxSection {
        mode: IsolationMode::BestEffort,
        ..SandboxSection::default()
    };
    Arc::new(ProcessSandbox::new(settings).expect("best-effort sandbox"))
}

pub fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// A sandbox whose backend is always down.
#[derive(Default)]
pub struct UnavailableSandbox {
    pub calls: AtomicU32,
}

#[async_trait]
impl SandboxRunner for UnavailableSandbox {
    async fn run(
        &self,
        _request: SandboxRequest,
        _limits: &ResourceLimits,
        _cancel: &CancelSignal,
    ) -> SandboxResult<SandboxOutcome> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(SandboxError::Unavailable("sandbox backend offline".to_string()))
    }

    fn capabilities(&self) -> SandboxCapabilities {
        SandboxCapabilities {
            mode: IsolationMode::BestEffort,
            landlock: LandlockSupport::default(),
            process_groups: false,
            subreaper: false,
            memory_accounting: false,
        }
    }
}

/// A sandbox whose backend panics on every run.
pub struct PanickingSandbox;

#[async_trait]
impl SandboxRunner for PanickingSandbox {
    async fn run(
        &self,
        _request: SandboxRequest,
        _limits: &ResourceLimits,
        _cancel: &CancelSignal,
    ) -> SandboxResult<SandboxOutcome> {
        panic!("sandbox backend crashed");
    }

    fn capabilities(&self) -> SandboxCapabilities {
        SandboxCapabilities {
            mode: IsolationMode::BestEffort,
            landlock: LandlockSupport::default(),
            process_groups: false,
            subreaper: false,
            memory_accounting: false,
        }
    }
}
