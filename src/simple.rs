//! Shortcuts for one-shot lookups

use crate::{
    error::{DiscoveryError, Result},
    service::ServiceRecord,
};
use futures::{Stream, StreamExt, pin_mut};

#[cfg(feature = "mdns-sd")]
use crate::{config::SessionConfig, discovery::DiscoverySession, protocols::mdns::MdnsProvider};
#[cfg(feature = "mdns-sd")]
use std::sync::Arc;

/// Resolve to the first item of `stream`
///
/// An item that is an error is returned as-is. A stream that ends without
/// any item yields [`DiscoveryError::ServiceNotFound`].
pub async fn take_first<S, T>(stream: S) -> Result<T>
where
    S: Stream<Item = Result<T>>,
{
    pin_mut!(stream);
    match stream.next().await {
        Some(item) => item,
        None => Err(DiscoveryError::service_not_found(
            "Discovery ended before any service was found",
        )),
    }
}

/// Create a session over a fresh multicast DNS provider
///
/// # Example
///
/// ```rust,no_run
/// use dnssd_mux::{simple, SessionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = simple::mdns_session(SessionConfig::from_env()?)?;
///     let first = session.discover_services().first().await?;
///     println!("Found {first}");
///     Ok(())
/// }
/// ```
#[cfg(feature = "mdns-sd")]
pub fn mdns_session(config: SessionConfig) -> Result<DiscoverySession> {
    DiscoverySession::new(Arc::new(MdnsProvider::new()), config)
}

/// Discover the first instance of the configured service type
#[cfg(feature = "mdns-sd")]
pub async fn discover_first(config: SessionConfig) -> Result<ServiceRecord> {
    mdns_session(config)?.discover_services().first().await
}
