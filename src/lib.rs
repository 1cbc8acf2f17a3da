//! # dnssd-mux
//!
//! Shared DNS-SD discovery sessions for Rust applications.
//!
//! A [`DiscoverySession`] runs at most one network browse at a time and fans
//! its results out to every caller that asked for the same service type and
//! domain. Callers that join late are replayed what was already found, the
//! browse is retried with a fixed delay when the provider fails, and it is
//! cancelled as soon as the last caller goes away.
//!
//! ## Features
//!
//! - Reference-counted browse shared by concurrent subscribers
//! - Replay of earlier results to late subscribers
//! - Fixed-delay retry with a terminal error delivered to every subscriber
//! - Pluggable [`DiscoveryProvider`] with a multicast DNS implementation
//! - Environment-driven configuration and optional `metrics` counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dnssd_mux::{DiscoverySession, SessionConfig, ServiceType};
//! use dnssd_mux::protocols::mdns::MdnsProvider;
//! use futures::StreamExt;
//! use std::{sync::Arc, time::Duration};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = DiscoverySession::new(Arc::new(MdnsProvider::new()), SessionConfig::from_env()?)?;
//!     let http = ServiceType::new("_http._tcp")?;
//!
//!     // Both callers share one mDNS browse.
//!     let mut ui = session.discover(&http, "local", Duration::from_secs(3));
//!     let printer = session.discover(&http, "local", Duration::from_secs(3)).first();
//!
//!     println!("First: {}", printer.await?);
//!     while let Some(record) = ui.next().await {
//!         let record = record?;
//!         if record.is_lost() {
//!             println!("Gone: {}", record.service_name());
//!         } else {
//!             println!("Found: {record}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! [`SessionConfig::from_env`] reads `DNSSD_MUX_MAX_RETRIES`,
//! `DNSSD_MUX_RETRY_DELAY_MS`, `DNSSD_MUX_SERVICE_TYPE`, `DNSSD_MUX_DOMAIN`
//! and `DNSSD_MUX_TIMEOUT_MS` on top of the defaults (3 attempts, 2 s delay,
//! the `_services._dns-sd._udp` meta-query in `local`, 3 s timeout).

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod protocols;
mod replay;
pub mod retry;
pub mod service;
pub mod simple; // One-shot helpers
pub mod types;

// Re-export main types for convenience
pub use config::SessionConfig;
pub use discovery::{DiscoverySession, DiscoveryStream, SessionPhase, SessionStats};
pub use error::{DiscoveryError, Result};
pub use protocols::{BrowseStream, DiscoveryProvider};
pub use retry::RetryPolicy;
pub use service::{ServiceFlags, ServiceRecord};
pub use types::{BrowseQuery, ServiceAttributes, ServiceType};
