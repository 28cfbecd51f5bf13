//! Sandbox: resource-bounded, confined execution of untrusted commands.
//!
//! Every execution path in hackeval (test cases, builds, validators, lint
//! tools) runs through the [`SandboxRunner`] capability. Execution controls
//! (retry with backoff, circuit breaker) wrap callers that need them.
//!
//! # Modules
//!
//! - [`runner`]   - `SandboxRunner` trait, `ProcessSandbox`, request/outcome types
//! - [`limits`]   - `ResourceLimits`, `LimitOverrides`, `NetworkPolicy`, `LimitKind`
//! - [`cancel`]   - `CancelHandle` / `CancelSignal`
//! - [`landlock`] - Landlock ruleset preparation and enforcement
//! - [`proc`]     - process inspection via `/proc`
//! - [`tree`]     - process-tree tracking and cleanup across `setsid`
//! - [`output`]   - capped output capture, `KillReason`
//! - [`security`] - `SecurityScanner` for boundary-crossing attempts
//! - [`controls`] - `retry_with_backoff`, `CircuitBreaker`
//! - [`error`]    - `SandboxError` / `SandboxResult`

pub mod cancel;
pub mod controls;
pub mod error;
pub mod landlock;
pub mod limits;
pub mod output;
pub mod proc;
pub mod runner;
pub mod security;
pub mod tree;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use controls::{retry_with_backoff, CircuitBreaker, RetryPolicy};
pub use error::{SandboxError, SandboxResult};
pub use landlock::LandlockSupport;
pub use limits::{LimitKind, LimitOverrides, NetworkPolicy, ResourceLimits};
pub use output::KillReason;
pub use runner::{
    ProcessSandbox, SandboxCapabilities, SandboxOutcome, SandboxRequest, SandboxRunner,
    Termination,
};
pub use security::SecurityScanner;
