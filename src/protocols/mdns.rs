//! Multicast DNS provider backed by the `mdns-sd` daemon
//!
//! All browses started through one [`MdnsProvider`] (and its clones) share
//! a single [`ServiceDaemon`]. The daemon is started lazily by the first
//! browse and shut down when the last browse stream is dropped.

use super::{BrowseStream, DiscoveryProvider};
use crate::{
    error::{DiscoveryError, Result},
    retry::RetryPolicy,
    service::{ServiceFlags, ServiceRecord},
    types::{ServiceAttributes, ServiceType},
};
use async_trait::async_trait;
use flume::r#async::RecvStream;
use futures::{StreamExt, stream};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// The only domain multicast DNS answers for
pub const MDNS_DOMAIN: &str = "local";

const DAEMON_START_ATTEMPTS: u32 = 3;
const DAEMON_START_DELAY: Duration = Duration::from_millis(100);

#[derive(Default)]
struct DaemonSlot {
    daemon: Option<ServiceDaemon>,
    browses: usize,
}

/// Reference-counted daemon shared by every browse of a provider
#[derive(Default)]
struct SharedDaemon {
    slot: Mutex<DaemonSlot>,
}

impl SharedDaemon {
    async fn acquire(&self) -> Result<ServiceDaemon> {
        if let Some(daemon) = self.try_join() {
            return Ok(daemon);
        }

        let policy = RetryPolicy::new(DAEMON_START_ATTEMPTS, DAEMON_START_DELAY)?;
        let started = policy
            .run("mDNS daemon start", || async {
                ServiceDaemon::new().map_err(DiscoveryError::from)
            })
            .await?;

        let mut slot = self.slot.lock();
        slot.browses += 1;
        match &slot.daemon {
            // Another browse started one while we were waiting.
            Some(daemon) => {
                let daemon = daemon.clone();
                drop(slot);
                shutdown_daemon(&started);
                Ok(daemon)
            }
            None => {
                debug!("Started mDNS daemon");
                slot.daemon = Some(started.clone());
                Ok(started)
            }
        }
    }

    fn try_join(&self) -> Option<ServiceDaemon> {
        let mut slot = self.slot.lock();
        let daemon = slot.daemon.clone()?;
        slot.browses += 1;
        Some(daemon)
    }

    fn release(&self) {
        let mut slot = self.slot.lock();
        slot.browses = slot.browses.saturating_sub(1);
        if slot.browses == 0 {
            if let Some(daemon) = slot.daemon.take() {
                drop(slot);
                shutdown_daemon(&daemon);
                debug!("Stopped mDNS daemon");
            }
        }
    }

    fn browses(&self) -> usize {
        self.slot.lock().browses
    }
}

fn shutdown_daemon(daemon: &ServiceDaemon) {
    if let Err(err) = daemon.shutdown() {
        warn!("Failed to shut down mDNS daemon: {}", err);
    }
}

/// Stops the daemon browse and releases the daemon when dropped
struct BrowseGuard {
    daemon: ServiceDaemon,
    browse_name: String,
    shared: Arc<SharedDaemon>,
}

impl Drop for BrowseGuard {
    fn drop(&mut self) {
        if let Err(err) = self.daemon.stop_browse(&self.browse_name) {
            debug!("Failed to stop browse for {}: {}", self.browse_name, err);
        }
        self.shared.release();
    }
}

struct ActiveBrowse {
    events: RecvStream<'static, ServiceEvent>,
    registration_type: String,
    domain: String,
    _guard: BrowseGuard,
}

enum BrowseEvent {
    Record(ServiceRecord),
    Ignored,
    Stopped,
}

/// Discovery provider for multicast DNS on the `local` domain
#[derive(Clone, Default)]
pub struct MdnsProvider {
    daemon: Arc<SharedDaemon>,
}

impl MdnsProvider {
    /// Create a provider; no socket is opened until the first browse
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of browse streams currently holding the daemon
    pub fn active_browses(&self) -> usize {
        self.daemon.browses()
    }
}

impl fmt::Debug for MdnsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdnsProvider")
            .field("active_browses", &self.active_browses())
            .finish()
    }
}

#[async_trait]
impl DiscoveryProvider for MdnsProvider {
    fn name(&self) -> &'static str {
        "mdns"
    }

    async fn browse(&self, service_type: &ServiceType, domain: &str) -> Result<BrowseStream> {
        let domain = domain.trim_matches('.');
        if !domain.eq_ignore_ascii_case(MDNS_DOMAIN) {
            return Err(DiscoveryError::configuration(format!(
                "mDNS can only browse the '{MDNS_DOMAIN}' domain, not '{domain}'"
            )));
        }

        let browse_name = service_type.browse_name(MDNS_DOMAIN);
        let daemon = self.daemon.acquire().await?;
        let guard = BrowseGuard {
            daemon: daemon.clone(),
            browse_name: browse_name.clone(),
            shared: Arc::clone(&self.daemon),
        };
        let receiver = daemon.browse(&browse_name)?;
        debug!("Browsing {}", browse_name);

        let browse = ActiveBrowse {
            events: receiver.into_stream(),
            registration_type: format!("{service_type}."),
            domain: format!("{MDNS_DOMAIN}."),
            _guard: guard,
        };

        Ok(stream::unfold(Some(browse), |browse| async move {
            let mut browse = browse?;
            loop {
                let Some(event) = browse.events.next().await else {
                    let err = DiscoveryError::mdns("mDNS daemon channel closed");
                    return Some((Err(err), None));
                };
                match translate(event, &browse.registration_type, &browse.domain) {
                    BrowseEvent::Record(record) => return Some((Ok(record), Some(browse))),
                    BrowseEvent::Ignored => continue,
                    BrowseEvent::Stopped => return None,
                }
            }
        })
        .boxed())
    }
}

/// Instance label of `full_name`, e.g. `printer` for `printer._ipp._tcp.local.`
fn instance_name<'a>(full_name: &'a str, browse_name: &str, domain: &str) -> &'a str {
    full_name
        .strip_suffix(browse_name)
        .or_else(|| full_name.strip_suffix(domain))
        .unwrap_or(full_name)
        .trim_end_matches('.')
}

fn new_record(
    full_name: &str,
    registration_type: &str,
    domain: &str,
) -> Option<ServiceRecord> {
    let browse_name = format!("{registration_type}{domain}");
    let name = instance_name(full_name, &browse_name, domain);
    match ServiceRecord::new(name, registration_type, domain) {
        Ok(record) => Some(record.with_full_name(full_name)),
        Err(err) => {
            debug!("Skipping mDNS answer {}: {}", full_name, err);
            None
        }
    }
}

fn attributes(info: &ServiceInfo) -> ServiceAttributes {
    info.get_properties()
        .iter()
        .map(|property| {
            let value = property
                .val()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
            (property.key().to_string(), value)
        })
        .collect()
}

fn translate(event: ServiceEvent, registration_type: &str, domain: &str) -> BrowseEvent {
    let record = match event {
        ServiceEvent::ServiceFound(_, full_name) => {
            new_record(&full_name, registration_type, domain)
        }
        ServiceEvent::ServiceResolved(info) => {
            new_record(info.get_fullname(), registration_type, domain).map(|record| {
                let mut record = record
                    .with_host_name(info.get_hostname())
                    .with_port(info.get_port())
                    .with_attributes(attributes(&info));
                let mut addresses: Vec<_> = info.get_addresses().iter().copied().collect();
                addresses.sort();
                for address in addresses {
                    record = record.with_address(address);
                }
                record
            })
        }
        ServiceEvent::ServiceRemoved(_, full_name) => new_record(&full_name, registration_type, domain)
            .map(|record| record.with_flags(ServiceFlags::empty())),
        ServiceEvent::SearchStopped(browse_name) => {
            debug!("mDNS search stopped for {}", browse_name);
            return BrowseEvent::Stopped;
        }
        _ => None,
    };

    record.map_or(BrowseEvent::Ignored, BrowseEvent::Record)
}
