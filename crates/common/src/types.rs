//! Resource policy types shared by the runtime adapter, policy store and pool.

use serde::{Deserialize, Serialize};

/// Network access granted to a sandbox container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    /// No network interface besides loopback.
    #[default]
    None,
    /// Full default networking.
    Host,
    /// Network present but outbound name resolution disabled.
    Restricted,
}

impl NetworkPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Host => "host",
            Self::Restricted => "restricted",
        }
    }
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NetworkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "host" => Ok(Self::Host),
            "restricted" => Ok(Self::Restricted),
            other => Err(format!("unknown network policy: {other}")),
        }
    }
}

/// Limits enforced on a container at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// CPU quota in cores (fractional, e.g. 0.5 = half a core).
    pub cpu_limit: f64,
    pub memory_limit_mb: u64,
    pub network_policy: NetworkPolicy,
    /// Wall-clock budget handed to the in-container entrypoint. 0 = unlimited.
    pub timeout_seconds: u64,
    pub pids_limit: u32,
    /// Writable layer ceiling.
    pub storage_limit_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_limit: 1.0,
            memory_limit_mb: 512,
            network_policy: NetworkPolicy::None,
            timeout_seconds: 3600,
            pids_limit: 256,
            storage_limit_mb: 1024,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_policy_roundtrip_str() {
        for policy in [
            NetworkPolicy::None,
            NetworkPolicy::Host,
            NetworkPolicy::Restricted,
        ] {
            assert_eq!(policy.as_str().parse::<NetworkPolicy>(), Ok(policy));
        }
        assert!("bridge".parse::<NetworkPolicy>().is_err());
    }

    #[test]
    fn resource_limits_partial_serde_uses_defaults() {
        let limits: ResourceLimits =
            serde_json::from_str(r#"{"cpu_limit": 2.5, "network_policy": "restricted"}"#).unwrap();
        assert_eq!(limits.cpu_limit, 2.5);
        assert_eq!(limits.network_policy, NetworkPolicy::Restricted);
        assert_eq!(limits.memory_limit_mb, 512);
        assert_eq!(limits.pids_limit, 256);
    }
}
