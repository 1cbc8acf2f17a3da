//! Discovered service records

use crate::{
    error::{DiscoveryError, Result},
    types::ServiceAttributes,
};
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr, ops::BitOr};

/// Event flags attached to a record by the discovery provider
///
/// The values follow the DNS-SD browse callback flags. The session treats
/// them as opaque and passes them through untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceFlags(u32);

impl ServiceFlags {
    /// More records are queued behind this one
    pub const MORE_COMING: Self = Self(0x1);
    /// The service was added; when clear the service was lost
    pub const ADD: Self = Self(0x2);

    /// Flags with no bits set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Wrap raw provider bits
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw provider bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check if every bit of `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ServiceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One discovered service instance
///
/// Records are plain values; they carry no identity beyond their fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    service_name: String,
    flags: ServiceFlags,
    interface_index: u32,
    registration_type: String,
    domain: String,
    host_name: Option<String>,
    port: Option<u16>,
    attributes: Option<ServiceAttributes>,
    full_name: Option<String>,
    addresses: Vec<IpAddr>,
}

impl ServiceRecord {
    /// Create a new record for a browse event
    ///
    /// # Errors
    ///
    /// Returns an error if `service_name` is empty
    pub fn new(
        service_name: impl Into<String>,
        registration_type: impl Into<String>,
        domain: impl Into<String>,
    ) -> Result<Self> {
        let service_name = service_name.into();
        if service_name.is_empty() {
            return Err(DiscoveryError::invalid_record(
                "service_name",
                "must not be empty",
            ));
        }

        Ok(Self {
            service_name,
            flags: ServiceFlags::ADD,
            interface_index: 0,
            registration_type: registration_type.into(),
            domain: domain.into(),
            host_name: None,
            port: None,
            attributes: None,
            full_name: None,
            addresses: Vec::new(),
        })
    }

    /// Set provider flags
    pub fn with_flags(mut self, flags: ServiceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the interface index the record was seen on
    pub fn with_interface_index(mut self, interface_index: u32) -> Self {
        self.interface_index = interface_index;
        self
    }

    /// Set the host name
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set a single TXT attribute
    pub fn with_attribute<K: Into<String>>(mut self, key: K, value: Option<&str>) -> Self {
        self.attributes
            .get_or_insert_with(ServiceAttributes::new)
            .insert(key.into(), value.map(str::to_owned));
        self
    }

    /// Replace all TXT attributes
    pub fn with_attributes(mut self, attributes: ServiceAttributes) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Set the fully qualified instance name
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    /// Add a resolved address
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.addresses.push(address);
        self
    }

    /// Get the service instance name
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Get the provider flags
    pub fn flags(&self) -> ServiceFlags {
        self.flags
    }

    /// Get the interface index, `0` meaning all interfaces
    pub fn interface_index(&self) -> u32 {
        self.interface_index
    }

    /// Get the registration type, e.g. `_http._tcp.`
    pub fn registration_type(&self) -> &str {
        &self.registration_type
    }

    /// Get the domain
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get the host name, if resolved
    pub fn host_name(&self) -> Option<&str> {
        self.host_name.as_deref()
    }

    /// Get the port, if resolved
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Get the TXT attributes, if any were published
    pub fn attributes(&self) -> Option<&ServiceAttributes> {
        self.attributes.as_ref()
    }

    /// Get a TXT attribute; `Some(None)` means the key is present without a value
    pub fn attribute(&self, key: &str) -> Option<Option<&str>> {
        self.attributes
            .as_ref()?
            .get(key)
            .map(|value| value.as_deref())
    }

    /// Get the fully qualified instance name
    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    /// Get addresses the provider resolved for this instance
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    /// Check if this record announces that the service went away
    pub fn is_lost(&self) -> bool {
        !self.flags.contains(ServiceFlags::ADD)
    }
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}{})",
            self.service_name, self.registration_type, self.domain
        )?;
        if let (Some(host), Some(port)) = (&self.host_name, self.port) {
            write!(f, " at {host}:{port}")?;
        }
        if self.is_lost() {
            write!(f, " [lost]")?;
        }
        Ok(())
    }
}
