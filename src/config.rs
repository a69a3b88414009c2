//! Runtime configuration.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Environment variable read by [`CacheConfig::from_env`].
pub const CACHE_POLICY_ENV: &str = "MEMO_FLOW_CACHE_POLICY";

/// Which nodes of a computation tree the runtime memoizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum CachePolicy {
    /// Never store or reuse results.
    None,
    /// Memoize only the root of each `compute` call; nested nodes run fresh.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "top-level"))]
    TopLevelOnly,
    /// Memoize every node at every depth.
    All,
}

impl CachePolicy {
    /// Whether a node at this position is memoized.
    pub fn memoizes(self, top_level: bool) -> bool {
        match self {
            CachePolicy::None => false,
            CachePolicy::TopLevelOnly => top_level,
            CachePolicy::All => true,
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CachePolicy::None => "none",
            CachePolicy::TopLevelOnly => "top-level",
            CachePolicy::All => "all",
        })
    }
}

impl FromStr for CachePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CachePolicy::None),
            "top-level" | "top_level" | "toplevel" => Ok(CachePolicy::TopLevelOnly),
            "all" => Ok(CachePolicy::All),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

/// How a canceled computation is reported by
/// [`ComputeRuntime::compute`](crate::ComputeRuntime::compute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum CancellationMode {
    /// An empty outcome carrying a warning.
    #[default]
    Empty,
    /// An empty outcome carrying an error.
    Fail,
}

impl fmt::Display for CancellationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CancellationMode::Empty => "empty",
            CancellationMode::Fail => "fail",
        })
    }
}

impl FromStr for CancellationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "empty" => Ok(CancellationMode::Empty),
            "fail" => Ok(CancellationMode::Fail),
            _ => Err(ConfigError::UnknownCancellationMode(s.to_string())),
        }
    }
}

/// Configuration of a [`ComputeRuntime`](crate::ComputeRuntime).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheConfig {
    /// Which nodes are memoized.
    pub policy: CachePolicy,
    /// How cancellation is rendered by `compute`.
    pub cancellation: CancellationMode,
    /// Polling interval, in milliseconds, while waiting on an in-flight
    /// execution. Bounds how late a waiter notices its own cancellation.
    pub wait_slice_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: CachePolicy::default(),
            cancellation: CancellationMode::default(),
            wait_slice_ms: 10,
        }
    }
}

impl CacheConfig {
    /// Default configuration with the policy taken from
    /// `MEMO_FLOW_CACHE_POLICY` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(policy) = lookup(CACHE_POLICY_ENV).filter(|v| !v.trim().is_empty()) {
            config.policy = policy.parse()?;
        }
        Ok(config)
    }

    /// Replace the cache policy.
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the cancellation mode.
    pub fn with_cancellation(mut self, cancellation: CancellationMode) -> Self {
        self.cancellation = cancellation;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_round_trips_through_text() {
        for policy in [CachePolicy::None, CachePolicy::TopLevelOnly, CachePolicy::All] {
            assert_eq!(policy.to_string().parse::<CachePolicy>().unwrap(), policy);
        }
        assert_eq!(" ALL ".parse::<CachePolicy>().unwrap(), CachePolicy::All);
        assert_eq!(
            "sometimes".parse::<CachePolicy>(),
            Err(ConfigError::UnknownPolicy("sometimes".into()))
        );
    }

    #[test]
    fn test_memoizes() {
        assert!(!CachePolicy::None.memoizes(true));
        assert!(CachePolicy::TopLevelOnly.memoizes(true));
        assert!(!CachePolicy::TopLevelOnly.memoizes(false));
        assert!(CachePolicy::All.memoizes(false));
    }

    #[test]
    fn test_lookup_falls_back_to_default() {
        let config = CacheConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.policy, CachePolicy::TopLevelOnly);

        let config = CacheConfig::from_lookup(|_| Some("all".into())).unwrap();
        assert_eq!(config.policy, CachePolicy::All);

        assert!(CacheConfig::from_lookup(|_| Some("bogus".into())).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_partial_config() {
        let config: CacheConfig = serde_json::from_str(r#"{"policy":"all"}"#).unwrap();
        assert_eq!(config.policy, CachePolicy::All);
        assert_eq!(config.cancellation, CancellationMode::Empty);
        assert_eq!(config.wait_slice_ms, 10);

        let json = serde_json::to_string(&CachePolicy::TopLevelOnly).unwrap();
        assert_eq!(json, r#""top-level""#);
    }
}
