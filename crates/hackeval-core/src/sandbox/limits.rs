//! Resource limits and network policy for sandboxed runs.

use serde::{Deserialize, Serialize};

/// Which resource limit a run breached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Time,
    Memory,
    Output,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::Time => write!(f, "time"),
            LimitKind::Memory => write!(f, "memory"),
            LimitKind::Output => write!(f, "output"),
        }
    }
}

/// Outbound network access for sandboxed processes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NetworkPolicy {
    /// No TCP bind or connect at all.
    #[default]
    Deny,
    /// TCP connect permitted only to the listed ports.
    Allowlist { tcp_ports: Vec<u16> },
}

impl NetworkPolicy {
    pub fn allowed_ports(&self) -> &[u16] {
        match self {
            NetworkPolicy::Deny => &[],
            NetworkPolicy::Allowlist { tcp_ports } => tcp_ports,
        }
    }
}

/// Limits for a single sandboxed invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall-clock limit in milliseconds.
    pub time_ms: u64,

    /// Memory limit for the whole process tree, in MiB.
    pub memory_mb: u64,

    /// Maximum bytes captured per output stream before the run is killed.
    pub output_bytes: u64,

    /// Network policy.
    #[serde(default)]
    pub network: NetworkPolicy,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_ms: 2_000,
            memory_mb: 256,
            output_bytes: 64 * 1024,
            network: NetworkPolicy::Deny,
        }
    }
}

impl ResourceLimits {
    pub fn memory_bytes(&self) -> u64 {
        self.memory_mb.saturating_mul(1024 * 1024)
    }

    /// Apply per-case overrides on top of these limits.
    pub fn with_overrides(&self, overrides: &LimitOverrides) -> Self {
        Self {
            time_ms: overrides.time_ms.unwrap_or(self.time_ms),
            memory_mb: overrides.memory_mb.unwrap_or(self.memory_mb),
            output_bytes: overrides.output_bytes.unwrap_or(self.output_bytes),
            network: self.network.clone(),
        }
    }

    /// Name of the first non-positive limit, if any.
    pub fn first_invalid(&self) -> Option<&'static str> {
        if self.time_ms == 0 {
            Some("time_ms")
        } else if self.memory_mb == 0 {
            Some("memory_mb")
        } else if self.output_bytes == 0 {
            Some("output_bytes")
        } else {
            None
        }
    }
}

/// Optional per-case limit overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LimitOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<u64>,
}
