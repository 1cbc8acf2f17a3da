//! Type definitions for the dnssd-mux library

use crate::error::{DiscoveryError, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Service type browsed when the caller does not name one
pub const DEFAULT_SERVICE_TYPE: &str = "_services._dns-sd._udp";

/// Domain browsed when the caller does not name one
pub const DEFAULT_DOMAIN: &str = "local";

/// Longest label allowed by DNS
const MAX_LABEL_LEN: usize = 63;

/// TXT record attributes; keys are unique, values may be absent
pub type ServiceAttributes = BTreeMap<String, Option<String>>;

/// A DNS-SD service type such as `_http._tcp` or `_printer._sub._http._tcp`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceType {
    /// Labels up to and including the transport label, lowercased
    labels: Vec<String>,
}

impl ServiceType {
    /// Parse a service type
    ///
    /// Accepts `_http._tcp`, `_http._tcp.local`, `_http._tcp.local.` and
    /// subtype forms. Any labels after the transport label (`_tcp` or
    /// `_udp`) are treated as a domain and ignored; use [`BrowseQuery`] to
    /// carry a domain.
    pub fn new<S: AsRef<str>>(service_type: S) -> Result<Self> {
        let raw = service_type.as_ref().trim().trim_end_matches('.');
        if raw.is_empty() {
            return Err(DiscoveryError::invalid_data("Service type cannot be empty"));
        }

        let parts: Vec<&str> = raw.split('.').collect();
        let transport = parts
            .iter()
            .rposition(|part| {
                part.eq_ignore_ascii_case("_tcp") || part.eq_ignore_ascii_case("_udp")
            })
            .ok_or_else(|| {
                DiscoveryError::invalid_data(format!(
                    "Service type '{raw}' must end with '._tcp' or '._udp'"
                ))
            })?;

        if transport == 0 {
            return Err(DiscoveryError::invalid_data(format!(
                "Service type '{raw}' is missing a service label"
            )));
        }

        let mut labels = Vec::with_capacity(transport + 1);
        for part in &parts[..=transport] {
            if !part.starts_with('_') || part.len() < 2 {
                return Err(DiscoveryError::invalid_data(format!(
                    "Service type label '{part}' must start with '_'"
                )));
            }
            if part.len() > MAX_LABEL_LEN {
                return Err(DiscoveryError::invalid_data(format!(
                    "Service type label '{part}' is longer than {MAX_LABEL_LEN} bytes"
                )));
            }
            labels.push(part.to_ascii_lowercase());
        }

        Ok(Self { labels })
    }

    /// The meta-query type that enumerates every advertised service type
    pub fn meta_query() -> Self {
        Self {
            labels: vec!["_services".into(), "_dns-sd".into(), "_udp".into()],
        }
    }

    /// Check if this is the service type enumeration meta-query
    pub fn is_meta_query(&self) -> bool {
        *self == Self::meta_query()
    }

    /// Get the transport label (`_tcp` or `_udp`)
    pub fn transport(&self) -> &str {
        self.labels.last().map(String::as_str).unwrap_or_default()
    }

    /// Get the subtype label, if any (`_printer` in `_printer._sub._http._tcp`)
    pub fn subtype(&self) -> Option<&str> {
        match self.labels.as_slice() {
            [subtype, sub, _, _] if sub == "_sub" => Some(subtype.as_str()),
            _ => None,
        }
    }

    /// Name to browse for in the given domain, e.g. `_http._tcp.local.`
    pub fn browse_name(&self, domain: &str) -> String {
        format!("{}.{}.", self, domain.trim_matches('.'))
    }
}

impl FromStr for ServiceType {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        ServiceType::new(s)
    }
}

impl TryFrom<String> for ServiceType {
    type Error = DiscoveryError;

    fn try_from(value: String) -> Result<Self> {
        ServiceType::new(value)
    }
}

impl From<ServiceType> for String {
    fn from(service_type: ServiceType) -> Self {
        service_type.to_string()
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.labels.join("."))
    }
}

impl Default for ServiceType {
    fn default() -> Self {
        Self::meta_query()
    }
}

/// What a discovery session browses: a service type in a domain
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrowseQuery {
    service_type: ServiceType,
    domain: String,
}

impl BrowseQuery {
    /// Create a query, normalising the domain (`local.` becomes `local`)
    pub fn new(service_type: ServiceType, domain: &str) -> Result<Self> {
        let domain = domain.trim().trim_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return Err(DiscoveryError::invalid_data("Browse domain cannot be empty"));
        }
        Ok(Self {
            service_type,
            domain,
        })
    }

    /// Get the service type
    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    /// Get the normalised domain
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for BrowseQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.service_type.browse_name(&self.domain))
    }
}
