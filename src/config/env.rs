//! Environment overrides for [`SessionConfig`](super::SessionConfig)

use crate::error::Result;
use envconfig::Envconfig;
use std::collections::HashMap;

/// Optional `DNSSD_MUX_*` settings; unset variables keep the configured value
#[derive(Debug, Default, Envconfig)]
pub struct EnvOverrides {
    /// Failure count at which browse failures become terminal
    #[envconfig(from = "DNSSD_MUX_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Delay between browse attempts, in milliseconds
    #[envconfig(from = "DNSSD_MUX_RETRY_DELAY_MS")]
    pub retry_delay_ms: Option<u64>,

    /// Default service type
    #[envconfig(from = "DNSSD_MUX_SERVICE_TYPE")]
    pub service_type: Option<String>,

    /// Default browse domain
    #[envconfig(from = "DNSSD_MUX_DOMAIN")]
    pub domain: Option<String>,

    /// Default discovery timeout, in milliseconds
    #[envconfig(from = "DNSSD_MUX_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,
}

impl EnvOverrides {
    /// Read overrides from the process environment
    pub fn from_process_env() -> Result<Self> {
        Ok(Self::init_from_env()?)
    }

    /// Read overrides from a map of variables
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        Ok(Self::init_from_hashmap(vars)?)
    }

    /// Check if no override is set
    pub fn is_empty(&self) -> bool {
        self.max_retries.is_none()
            && self.retry_delay_ms.is_none()
            && self.service_type.is_none()
            && self.domain.is_none()
            && self.timeout_ms.is_none()
    }
}
