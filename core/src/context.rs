use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::limits::ConcurrencyGovernor;
use crate::limits::GovernorConfig;
use crate::limits::RateLimiter;
use crate::provider::ProviderConfig;
use crate::provider::ProviderTransport;
use crate::transport::HttpProviderTransport;

pub(crate) struct ProviderEntry {
    pub(crate) config: ProviderConfig,
    pub(crate) limiter: RateLimiter,
    pub(crate) transport: Arc<dyn ProviderTransport>,
}

/// Process-wide execution shared state: the concurrency governor plus one
/// rate limiter and transport per configured provider. Built once at startup
/// and passed by reference everywhere, so hardware and provider limits hold
/// across every job in the process.
pub struct ExecutionContext {
    governor: Arc<ConcurrencyGovernor>,
    governor_config: GovernorConfig,
    providers: HashMap<String, ProviderEntry>,
}

impl ExecutionContext {
    pub fn new(governor_config: GovernorConfig) -> Self {
        Self {
            governor: ConcurrencyGovernor::new(&governor_config),
            governor_config,
            providers: HashMap::new(),
        }
    }

    /// Build the context from the loaded config file: HTTP transports for
    /// every declared provider, API keys pulled from the environment.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut context = Self::new(config.governor_config());
        for provider in &config.providers {
            let api_key = provider
                .api_key_env
                .as_deref()
                .map(|var| {
                    std::env::var(var)
                        .map_err(|_| anyhow::anyhow!("environment variable {var} is not set"))
                })
                .transpose()?;
            let transport = HttpProviderTransport::new(provider.base_url.as_str(), api_key)?;
            context.register_provider(provider.provider_config(), Arc::new(transport));
        }
        Ok(context)
    }

    /// Register a provider with an explicit transport. Tests use this to
    /// plug in mock transports.
    pub fn register_provider(
        &mut self,
        config: ProviderConfig,
        transport: Arc<dyn ProviderTransport>,
    ) {
        let limiter = RateLimiter::new(config.requests_per_minute);
        self.providers.insert(
            config.name.clone(),
            ProviderEntry {
                config,
                limiter,
                transport,
            },
        );
    }

    pub fn governor(&self) -> &Arc<ConcurrencyGovernor> {
        &self.governor
    }

    pub fn governor_config(&self) -> &GovernorConfig {
        &self.governor_config
    }

    pub fn provider_config(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name).map(|entry| &entry.config)
    }

    pub(crate) fn provider(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }
}
