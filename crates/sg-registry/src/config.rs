//! Distribution and runtime defaults configuration.
//!
//! A plain struct validated eagerly at construction rather than deferred
//! to first use (see `crates/domain/src/error.rs`'s `Error::Config`
//! variant, reused here unchanged).

use std::time::Duration;

use sg_domain::{Error, Result};

/// How the registry is backed: a single process, or a fixed set of cluster
/// members replicating via `ClusteredRegistry::converge`.
#[derive(Debug, Clone)]
pub enum DistributionConfig {
    Local,
    Clustered { members: Vec<String> },
}

impl Default for DistributionConfig {
    fn default() -> Self {
        DistributionConfig::Local
    }
}

/// Runtime-wide defaults handed to every `AgentWorker` at construction
/// unless a per-agent override is supplied.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub default_max_runs: u32,
    pub default_inactivity_timeout: Duration,
    pub default_grace_period: Duration,
    pub distribution: DistributionConfig,
}

impl RuntimeConfig {
    pub fn validate(self) -> Result<Self> {
        if self.default_max_runs == 0 {
            return Err(Error::Config("default_max_runs must be at least 1".into()));
        }
        if self.default_inactivity_timeout.is_zero() {
            return Err(Error::Config(
                "default_inactivity_timeout must be non-zero".into(),
            ));
        }
        if let DistributionConfig::Clustered { members } = &self.distribution {
            if members.is_empty() {
                return Err(Error::Config(
                    "clustered distribution requires at least one member".into(),
                ));
            }
        }
        Ok(self)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_max_runs: 50,
            default_inactivity_timeout: Duration::from_secs(5 * 60),
            default_grace_period: Duration::from_secs(5),
            distribution: DistributionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_max_runs_is_rejected() {
        let cfg = RuntimeConfig {
            default_max_runs: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn clustered_without_members_is_rejected() {
        let cfg = RuntimeConfig {
            distribution: DistributionConfig::Clustered { members: vec![] },
            ..RuntimeConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
