//! Discovery providers that perform the actual network browse

use crate::{error::Result, service::ServiceRecord, types::ServiceType};
use async_trait::async_trait;
use futures::stream::BoxStream;

#[cfg(feature = "mdns-sd")]
pub mod mdns;

/// Records produced by one browse; dropping the stream cancels the browse
pub type BrowseStream = BoxStream<'static, Result<ServiceRecord>>;

/// Trait for the component that talks to the network
///
/// A discovery session owns at most one stream returned by [`browse`] at a
/// time. Providers report failures either by returning `Err` from `browse`
/// or by yielding an `Err` item; both are subject to the session's retry
/// policy. A stream that ends without an error completes the session's
/// active period.
///
/// [`browse`]: DiscoveryProvider::browse
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Start browsing for `service_type` in `domain`
    async fn browse(&self, service_type: &ServiceType, domain: &str) -> Result<BrowseStream>;
}
