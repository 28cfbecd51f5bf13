//! Landlock filesystem and network confinement.
//!
//! Security model:
//! - read and execute are allowed everywhere; writes only beneath the run's
//!   writable directory and on `/dev/null`
//! - TCP bind/connect is handled (denied) unless a port is allowlisted
//! - the ruleset is built in the parent (allocations allowed) and enforced
//!   in the child between fork and exec, where only syscalls happen

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{SandboxError, SandboxResult};
use super::limits::NetworkPolicy;

/// What the running kernel can enforce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LandlockSupport {
    pub filesystem: bool,
    pub network: bool,
}

/// Probe kernel support by creating throw-away rulesets.
pub fn probe() -> LandlockSupport {
    #[cfg(target_os = "linux")]
    {
        imp::probe()
    }
    #[cfg(not(target_os = "linux"))]
    {
        LandlockSupport::default()
    }
}

/// A prepared ruleset waiting to be enforced in the child.
pub(crate) struct LandlockEnforcer {
    #[cfg(target_os = "linux")]
    ruleset: Option<imp::RulesetHandle>,
    required: bool,
}

impl LandlockEnforcer {
    /// An enforcer that does nothing.
    pub(crate) fn disabled() -> Self {
        Self {
            #[cfg(target_os = "linux")]
            ruleset: None,
            required: false,
        }
    }

    /// Enforce the ruleset on the calling process.
    ///
    /// Must only be called from `pre_exec`. The success path performs only
    /// `prctl` and `landlock_restrict_self`; failures return a raw errno.
    pub(crate) fn enforce(&mut self) -> std::io::Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(ruleset) = self.ruleset.take() {
            return imp::enforce_fork_safe(ruleset, self.required);
        }
        if self.required {
            return Err(std::io::Error::from_raw_os_error(libc::ENOTSUP));
        }
        Ok(())
    }
}

/// Build the ruleset for one run.
///
/// With `required`, every handled access right must be supported: any
/// failure to build is `Unavailable`, and the child refuses to exec unless
/// the kernel enforces the ruleset in full.
pub(crate) fn prepare(
    writable_dir: &Path,
    network: &NetworkPolicy,
    required: bool,
) -> SandboxResult<LandlockEnforcer> {
    #[cfg(target_os = "linux")]
    {
        match imp::create_ruleset(writable_dir, network, required) {
            Ok(ruleset) => Ok(LandlockEnforcer {
                ruleset: Some(ruleset),
                required,
            }),
            Err(e) if required => Err(SandboxError::Unavailable(format!("landlock: {e}"))),
            Err(e) => {
                tracing::debug!(error = %e, "landlock ruleset unavailable, running unconfined");
                Ok(LandlockEnforcer::disabled())
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (writable_dir, network);
        if required {
            return Err(SandboxError::Unavailable(
                "landlock is only available on linux".to_string(),
            ));
        }
        Ok(LandlockEnforcer::disabled())
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::path::Path;

    use landlock::{
        Access, AccessFs, AccessNet, CompatLevel, Compatible, NetPort, PathBeneath, PathFd,
        Ruleset, RulesetAttr, RulesetCreated, RulesetCreatedAttr, RulesetError, RulesetStatus,
        ABI,
    };

    use super::{LandlockSupport, NetworkPolicy};

    const ABI_TARGET: ABI = ABI::V4;

    pub(super) type RulesetHandle = RulesetCreated;

    pub(super) fn probe() -> LandlockSupport {
        let filesystem = Ruleset::default()
            .set_compatibility(CompatLevel::HardRequirement)
            .handle_access(AccessFs::from_all(ABI::V1))
            .and_then(|r| r.create())
            .is_ok();
        let network = Ruleset::default()
            .set_compatibility(CompatLevel::HardRequirement)
            .handle_access(AccessNet::from_all(ABI::V4))
            .and_then(|r| r.create())
            .is_ok();
        LandlockSupport {
            filesystem,
            network,
        }
    }

    pub(super) fn create_ruleset(
        writable_dir: &Path,
        network: &NetworkPolicy,
        required: bool,
    ) -> Result<RulesetCreated, RulesetError> {
        let abi = ABI_TARGET;
        let compat = if required {
            CompatLevel::HardRequirement
        } else {
            CompatLevel::BestEffort
        };
        let mut ruleset = Ruleset::default()
            .set_compatibility(compat)
            .handle_access(AccessFs::from_all(abi))?
            .handle_access(AccessNet::from_all(abi))?
            .create()?;

        // read + execute everywhere
        if let Ok(fd) = PathFd::new("/") {
            ruleset = ruleset.add_rule(PathBeneath::new(fd, AccessFs::from_read(abi)))?;
        }

        if let Ok(fd) = PathFd::new(writable_dir) {
            ruleset = ruleset.add_rule(PathBeneath::new(fd, AccessFs::from_all(abi)))?;
        }

        if let Ok(fd) = PathFd::new("/dev/null") {
            ruleset = ruleset.add_rule(PathBeneath::new(fd, AccessFs::from_file(abi)))?;
        }

        for port in network.allowed_ports() {
            ruleset = ruleset.add_rule(NetPort::new(*port, AccessNet::ConnectTcp))?;
        }

        Ok(ruleset)
    }

    /// Whether a run may proceed under `status`. A required ruleset must be
    /// enforced in full; a partial one leaves TCP or some write rights open.
    pub(super) fn status_acceptable(status: RulesetStatus, required: bool) -> bool {
        !required || status == RulesetStatus::FullyEnforced
    }

    /// Fork-safe enforcement: only syscalls, returns errno on failure.
    pub(super) fn enforce_fork_safe(ruleset: RulesetCreated, required: bool) -> std::io::Result<()> {
        match ruleset.restrict_self() {
            Ok(status) => {
                if !status_acceptable(status.ruleset, required) {
                    return Err(std::io::Error::from_raw_os_error(libc::ENOTSUP));
                }
                Ok(())
            }
            Err(_) if required => Err(std::io::Error::from_raw_os_error(libc::EPERM)),
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_enforcer_is_noop() {
        let mut enforcer = LandlockEnforcer::disabled();
        assert!(enforcer.enforce().is_ok());
    }

    #[test]
    fn test_best_effort_prepare_never_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = prepare(dir.path(), &NetworkPolicy::Deny, false);
        assert!(result.is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_required_ruleset_must_be_fully_enforced() {
        use ::landlock::RulesetStatus;

        assert!(imp::status_acceptable(RulesetStatus::FullyEnforced, true));
        assert!(!imp::status_acceptable(RulesetStatus::PartiallyEnforced, true));
        assert!(!imp::status_acceptable(RulesetStatus::NotEnforced, true));
        assert!(imp::status_acceptable(RulesetStatus::PartiallyEnforced, false));
        assert!(imp::status_acceptable(RulesetStatus::NotEnforced, false));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_required_prepare_fails_without_network_support() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = prepare(dir.path(), &NetworkPolicy::Deny, true);
        if probe().network {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(SandboxError::Unavailable(_))));
        }
    }

    #[test]
    fn test_probe_does_not_panic() {
        let support = probe();
        // network confinement implies a kernel with filesystem confinement
        if support.network {
            assert!(support.filesystem);
        }
    }
}
