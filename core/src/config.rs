use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::limits::GovernorConfig;
use crate::provider::ProviderClass;
use crate::provider::ProviderConfig;

/// Top-level `loreminer.toml`. Everything is optional; providers inherit
/// per-class defaults for any knob they leave out.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub governor: GovernorOverrides,
    #[serde(default)]
    pub providers: Vec<ProviderDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GovernorOverrides {
    pub local_cap: Option<usize>,
    pub remote_cap: Option<usize>,
    pub memory_high_water_mb: Option<u64>,
    pub memory_low_water_mb: Option<u64>,
    pub sample_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderDecl {
    pub name: String,
    pub class: ProviderClass,
    pub base_url: String,
    /// Name of the environment variable holding the API key, never the key
    /// itself.
    pub api_key_env: Option<String>,
    pub requests_per_minute: Option<u32>,
    pub batch_size: Option<usize>,
    pub max_attempts: Option<u32>,
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("failed to read {}: {err}", path.display()))?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Detected governor settings with any file overrides applied.
    pub fn governor_config(&self) -> GovernorConfig {
        let mut governor = GovernorConfig::detect();
        if let Some(cap) = self.governor.local_cap {
            governor.local_cap = cap;
        }
        if let Some(cap) = self.governor.remote_cap {
            governor.remote_cap = cap;
        }
        if let Some(mb) = self.governor.memory_high_water_mb {
            governor.memory_high_water_bytes = mb * 1024 * 1024;
        }
        if let Some(mb) = self.governor.memory_low_water_mb {
            governor.memory_low_water_bytes = mb * 1024 * 1024;
        }
        if let Some(ms) = self.governor.sample_interval_ms {
            governor.sample_interval = Duration::from_millis(ms);
        }
        governor
    }
}

impl ProviderDecl {
    pub fn provider_config(&self) -> ProviderConfig {
        let mut config = ProviderConfig::new(self.name.as_str(), self.class);
        if let Some(rpm) = self.requests_per_minute {
            config.requests_per_minute = rpm;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size.max(1);
        }
        if let Some(attempts) = self.max_attempts {
            config.max_attempts = attempts.max(1);
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
state_dir = "/var/lib/loreminer"

[governor]
local_cap = 2
memory_high_water_mb = 4096
memory_low_water_mb = 3072

[[providers]]
name = "cloud"
class = "remote"
base_url = "https://api.example.com"
api_key_env = "CLOUD_API_KEY"
requests_per_minute = 30

[[providers]]
name = "workstation"
class = "local"
base_url = "http://127.0.0.1:11434"
            "#,
        )
        .unwrap();

        assert_eq!(config.state_dir, Some(PathBuf::from("/var/lib/loreminer")));
        assert_eq!(config.providers.len(), 2);

        let cloud = config.providers[0].provider_config();
        assert_eq!(cloud.class, ProviderClass::Remote);
        assert_eq!(cloud.requests_per_minute, 30);
        // Remote defaults fill the rest.
        assert_eq!(cloud.batch_size, 8);
        assert_eq!(cloud.max_attempts, 4);

        let local = config.providers[1].provider_config();
        assert_eq!(local.class, ProviderClass::Local);
        assert_eq!(local.batch_size, 1);

        let governor = config.governor_config();
        assert_eq!(governor.local_cap, 2);
        assert_eq!(governor.memory_high_water_bytes, 4096 * 1024 * 1024);
    }

    #[test]
    fn empty_config_is_valid() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.providers.is_empty());
        assert!(config.state_dir.is_none());
    }
}
