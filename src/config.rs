//! Configuration types for discovery sessions

pub mod env;

use crate::{
    error::{DiscoveryError, Result},
    retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, RetryPolicy},
    types::{DEFAULT_DOMAIN, ServiceType},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};

/// Default caller-facing discovery timeout
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Configuration for a discovery session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Failure count at which a browse failure becomes terminal
    max_retries: u32,
    /// Delay applied after every browse failure
    retry_delay: Duration,
    /// Service type used by `discover_services`
    service_type: ServiceType,
    /// Domain used by `discover_services`
    domain: String,
    /// Timeout handed to streams created by `discover_services`
    discovery_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            service_type: ServiceType::meta_query(),
            domain: DEFAULT_DOMAIN.to_string(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the defaults with `DNSSD_MUX_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        let overrides = env::EnvOverrides::from_process_env()?;
        Self::default().apply(overrides)
    }

    /// Apply `DNSSD_MUX_*` overrides taken from a map instead of the process environment
    pub fn with_env_overrides(self, vars: &HashMap<String, String>) -> Result<Self> {
        let overrides = env::EnvOverrides::from_map(vars)?;
        self.apply(overrides)
    }

    fn apply(mut self, overrides: env::EnvOverrides) -> Result<Self> {
        if let Some(max_retries) = overrides.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(delay_ms) = overrides.retry_delay_ms {
            self.retry_delay = Duration::from_millis(delay_ms);
        }
        if let Some(service_type) = overrides.service_type {
            self.service_type = ServiceType::new(service_type)?;
        }
        if let Some(domain) = overrides.domain {
            self.domain = domain;
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.discovery_timeout = Duration::from_millis(timeout_ms);
        }
        self.validate()?;
        Ok(self)
    }

    /// Set the failure count at which browse failures become terminal
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Get the failure count at which browse failures become terminal
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Set the delay between browse attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Get the delay between browse attempts
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Set the default service type
    pub fn with_service_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = service_type;
        self
    }

    /// Get the default service type
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    /// Set the default domain
    pub fn with_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.domain = domain.into();
        self
    }

    /// Get the default domain
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Set the default discovery timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Get the default discovery timeout
    pub fn timeout(&self) -> Duration {
        self.discovery_timeout
    }

    /// Build the retry policy described by this configuration
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(DiscoveryError::configuration(
                "max_retries must be greater than 0",
            ));
        }

        if self.discovery_timeout.is_zero() {
            return Err(DiscoveryError::configuration(
                "Discovery timeout must be greater than 0",
            ));
        }

        if self.domain.trim_matches('.').trim().is_empty() {
            return Err(DiscoveryError::configuration("Domain cannot be empty"));
        }

        Ok(())
    }
}
