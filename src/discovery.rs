//! Discovery session: one provider browse shared by many subscribers
//!
//! The first subscriber to attach to an idle session starts a browse; later
//! subscribers asking for the same query join it and are replayed every
//! record of the current active period before they see new ones. The browse
//! is cancelled when the last subscriber detaches, when the provider stream
//! ends, when retries are exhausted, or on [`DiscoverySession::clear`].

use crate::{
    config::SessionConfig,
    error::{DiscoveryError, Result},
    metrics,
    protocols::DiscoveryProvider,
    replay::ReplayChannel,
    retry::RetryPolicy,
    service::ServiceRecord,
    simple::take_first,
    types::{BrowseQuery, ServiceType},
};
use backoff::backoff::Backoff;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::{
    fmt,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll},
    time::Duration,
};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle phase of a discovery session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No browse is running or winding down
    Idle,
    /// Subscribers are attached but the provider has no live browse yet
    Starting,
    /// The provider browse is live and records are fanned out
    Active,
    /// The last browse was cancelled and its task has not exited yet
    TearingDown,
}

/// Counters over the lifetime of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Active periods started
    pub periods_started: u64,
    /// Provider browse calls issued
    pub browses_started: u64,
    /// Failed browse attempts that were retried
    pub retries: u64,
    /// Records fanned out to subscribers
    pub records_published: u64,
    /// Active periods that ended with a terminal error
    pub terminal_failures: u64,
}

struct ActivePeriod {
    generation: u64,
    query: BrowseQuery,
    subscribers: usize,
    established: bool,
    channel: ReplayChannel<ServiceRecord>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SessionState {
    next_generation: u64,
    next_subscriber: u64,
    period: Option<ActivePeriod>,
    retiring: Option<JoinHandle<()>>,
    stats: SessionStats,
}

impl SessionState {
    fn current(&mut self, generation: u64) -> Option<&mut ActivePeriod> {
        self.period
            .as_mut()
            .filter(|period| period.generation == generation)
    }

    /// Cancel the browse and hand back the channel so the caller can close it
    fn end_period(&mut self, reason: &str) -> Option<ReplayChannel<ServiceRecord>> {
        let period = self.period.take()?;
        period.cancel.cancel();
        self.retiring = Some(period.task);
        metrics::set_subscribers(0);
        info!("Stopping browse for {}: {}", period.query, reason);
        Some(period.channel)
    }
}

struct Inner {
    provider: Arc<dyn DiscoveryProvider>,
    config: SessionConfig,
    retry: RetryPolicy,
    runtime: Handle,
    state: Mutex<SessionState>,
}

impl Inner {
    fn detach(&self, generation: u64, subscriber: u64) {
        let mut state = self.state.lock();
        let Some(period) = state.current(generation) else {
            return;
        };
        period.channel.unsubscribe(subscriber);
        period.subscribers = period.subscribers.saturating_sub(1);
        metrics::set_subscribers(period.subscribers);
        debug!(
            "Subscriber detached from {}, {} remaining ({} live outputs)",
            period.query,
            period.subscribers,
            period.channel.output_count()
        );
        if period.subscribers == 0 {
            if let Some(channel) = state.end_period("last subscriber detached") {
                channel.complete();
            }
        }
    }

    fn browse_started(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.current(generation).is_none() {
            return false;
        }
        state.stats.browses_started += 1;
        metrics::record_browse_started();
        true
    }

    fn set_established(&self, generation: u64, established: bool) -> bool {
        let mut state = self.state.lock();
        match state.current(generation) {
            Some(period) => {
                period.established = established;
                true
            }
            None => false,
        }
    }

    fn publish(&self, generation: u64, record: ServiceRecord) -> bool {
        let mut state = self.state.lock();
        let Some(period) = state.current(generation) else {
            return false;
        };
        debug!("Discovered {}", record);
        period.channel.publish(record);
        state.stats.records_published += 1;
        metrics::record_published();
        true
    }

    fn note_retry(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        let Some(period) = state.current(generation) else {
            return false;
        };
        period.established = false;
        state.stats.retries += 1;
        metrics::record_retry();
        true
    }

    fn finish(&self, generation: u64, failure: Option<DiscoveryError>) {
        let mut state = self.state.lock();
        if state.current(generation).is_none() {
            return;
        }
        match failure {
            Some(err) => {
                state.stats.terminal_failures += 1;
                metrics::record_terminal_failure();
                if let Some(channel) = state.end_period("retries exhausted") {
                    channel.fail(err);
                }
            }
            None => {
                if let Some(channel) = state.end_period("provider stream ended") {
                    channel.complete();
                }
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(period) = self.state.get_mut().period.take() {
            period.cancel.cancel();
        }
    }
}

/// Multiplexes one provider browse across any number of subscribers
///
/// Cloning the session yields another handle to the same state. Every
/// handle and every attached [`DiscoveryStream`] keeps the session alive;
/// once all of them are gone any running browse is cancelled.
///
/// # Example
///
/// ```rust,no_run
/// use dnssd_mux::{DiscoverySession, SessionConfig, ServiceType};
/// use dnssd_mux::protocols::mdns::MdnsProvider;
/// use futures::StreamExt;
/// use std::{sync::Arc, time::Duration};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = DiscoverySession::new(Arc::new(MdnsProvider::new()), SessionConfig::default())?;
///
///     let http = ServiceType::new("_http._tcp")?;
///     let mut services = session.discover(&http, "local", Duration::from_secs(3));
///     while let Some(record) = services.next().await {
///         println!("{}", record?);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DiscoverySession {
    inner: Arc<Inner>,
}

impl DiscoverySession {
    /// Create a session that spawns its browse tasks on the current Tokio runtime
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or if called outside
    /// a Tokio runtime
    pub fn new(provider: Arc<dyn DiscoveryProvider>, config: SessionConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            DiscoveryError::configuration("DiscoverySession must be created inside a Tokio runtime")
        })?;
        Self::with_runtime(provider, config, runtime)
    }

    /// Create a session that spawns its browse tasks on `runtime`
    pub fn with_runtime(
        provider: Arc<dyn DiscoveryProvider>,
        config: SessionConfig,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let retry = config.retry_policy()?;

        Ok(Self {
            inner: Arc::new(Inner {
                provider,
                config,
                retry,
                runtime,
                state: Mutex::new(SessionState::default()),
            }),
        })
    }

    /// Discover `service_type` in `domain`
    ///
    /// Returns immediately. The stream yields every record of the current
    /// active period, including those found before this call, then
    /// completes or ends with the terminal provider error. `timeout` only
    /// bounds [`DiscoveryStream::first`].
    ///
    /// Some failures come from the session rather than the provider. The
    /// stream yields a single error and ends without attaching when
    /// `domain` is empty ([`DiscoveryError::InvalidData`]) or when another
    /// service type or domain is already being browsed
    /// ([`DiscoveryError::QueryMismatch`]).
    pub fn discover(
        &self,
        service_type: &ServiceType,
        domain: &str,
        timeout: Duration,
    ) -> DiscoveryStream {
        match BrowseQuery::new(service_type.clone(), domain) {
            Ok(query) => self.attach(query, timeout),
            Err(err) => DiscoveryStream::failed(err, timeout),
        }
    }

    /// Discover with the configured service type, domain and timeout
    pub fn discover_services(&self) -> DiscoveryStream {
        let config = &self.inner.config;
        self.discover(config.service_type(), config.domain(), config.timeout())
    }

    fn attach(&self, query: BrowseQuery, timeout: Duration) -> DiscoveryStream {
        let (output, records) = mpsc::unbounded_channel();
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let subscriber = state.next_subscriber;
        state.next_subscriber += 1;

        let attached = match state.period.as_mut() {
            Some(period) if period.query == query => {
                period.subscribers += 1;
                period.channel.subscribe(subscriber, output);
                metrics::set_subscribers(period.subscribers);
                debug!(
                    "Joined browse for {}, {} subscribers, {} records replayed",
                    query,
                    period.subscribers,
                    period.channel.history_len()
                );
                Ok(period.generation)
            }
            Some(period) => Err(DiscoveryError::QueryMismatch {
                active: period.query.to_string(),
                requested: query.to_string(),
            }),
            None => {
                let generation = state.next_generation;
                state.next_generation += 1;
                let cancel = CancellationToken::new();

                // The task only takes the lock after the provider has answered,
                // so spawning it while holding the lock cannot deadlock.
                let task = self.inner.runtime.spawn(run_scan(
                    Arc::downgrade(&self.inner),
                    Arc::clone(&self.inner.provider),
                    self.inner.retry,
                    generation,
                    query.clone(),
                    cancel.clone(),
                    state.retiring.take(),
                ));

                let mut channel = ReplayChannel::new();
                channel.subscribe(subscriber, output);
                info!(
                    "Starting {} browse for {}",
                    self.inner.provider.name(),
                    query
                );
                state.period = Some(ActivePeriod {
                    generation,
                    query,
                    subscribers: 1,
                    established: false,
                    channel,
                    cancel,
                    task,
                });
                state.stats.periods_started += 1;
                metrics::set_subscribers(1);
                Ok(generation)
            }
        };
        drop(guard);

        match attached {
            Ok(generation) => DiscoveryStream {
                records: UnboundedReceiverStream::new(records),
                timeout,
                lease: Some(Lease {
                    session: Arc::clone(&self.inner),
                    generation,
                    subscriber,
                }),
            },
            Err(err) => {
                warn!("{}", err);
                DiscoveryStream::failed(err, timeout)
            }
        }
    }

    /// Cancel any running browse regardless of how many subscribers remain
    ///
    /// Attached streams complete. The next `discover` starts a fresh browse.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        if let Some(channel) = state.end_period("cleared") {
            channel.complete();
        }
    }

    /// Cancel any running browse and wait for its task to exit
    pub async fn shutdown(&self) {
        self.clear();
        let retiring = self.inner.state.lock().retiring.take();
        if let Some(task) = retiring {
            if let Err(err) = task.await {
                if err.is_panic() {
                    error!("Browse task panicked: {}", err);
                }
            }
        }
        debug!("Discovery session shut down");
    }

    /// Get the current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        let state = self.inner.state.lock();
        match &state.period {
            Some(period) if period.established => SessionPhase::Active,
            Some(_) => SessionPhase::Starting,
            None if state.retiring.as_ref().is_some_and(|task| !task.is_finished()) => {
                SessionPhase::TearingDown
            }
            None => SessionPhase::Idle,
        }
    }

    /// Number of subscribers attached to the active period
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .period
            .as_ref()
            .map_or(0, |period| period.subscribers)
    }

    /// Query of the active period, if any
    pub fn active_query(&self) -> Option<BrowseQuery> {
        self.inner
            .state
            .lock()
            .period
            .as_ref()
            .map(|period| period.query.clone())
    }

    /// Snapshot of the session counters
    pub fn stats(&self) -> SessionStats {
        self.inner.state.lock().stats
    }

    /// Get the session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl fmt::Debug for DiscoverySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoverySession")
            .field("provider", &self.inner.provider.name())
            .field("phase", &self.phase())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Detaches its subscriber from the session when dropped
struct Lease {
    session: Arc<Inner>,
    generation: u64,
    subscriber: u64,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.session.detach(self.generation, self.subscriber);
    }
}

/// One subscriber's view of a discovery session
///
/// Dropping the stream detaches the subscriber.
pub struct DiscoveryStream {
    records: UnboundedReceiverStream<Result<ServiceRecord>>,
    timeout: Duration,
    lease: Option<Lease>,
}

impl DiscoveryStream {
    fn failed(err: DiscoveryError, timeout: Duration) -> Self {
        let (output, records) = mpsc::unbounded_channel();
        let _ = output.send(Err(err));
        Self {
            records: UnboundedReceiverStream::new(records),
            timeout,
            lease: None,
        }
    }

    /// Timeout requested when the stream was created
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check if the stream counts towards the session's subscribers
    pub fn is_attached(&self) -> bool {
        self.lease.is_some()
    }

    /// Wait for the first record, bounded by the stream's timeout
    ///
    /// The stream is detached once this returns.
    pub async fn first(mut self) -> Result<ServiceRecord> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, take_first(&mut self))
            .await
            .map_err(|_| {
                DiscoveryError::timeout(format!("No service discovered within {timeout:?}"))
            })?
    }
}

impl Stream for DiscoveryStream {
    type Item = Result<ServiceRecord>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.records).poll_next(cx)
    }
}

impl fmt::Debug for DiscoveryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryStream")
            .field("timeout", &self.timeout)
            .field("attached", &self.is_attached())
            .finish()
    }
}

fn with_session(session: &Weak<Inner>, f: impl FnOnce(&Inner) -> bool) -> bool {
    session.upgrade().is_some_and(|inner| f(&inner))
}

/// Returns false if cancelled before `delay` elapsed
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn run_scan(
    session: Weak<Inner>,
    provider: Arc<dyn DiscoveryProvider>,
    policy: RetryPolicy,
    generation: u64,
    query: BrowseQuery,
    cancel: CancellationToken,
    previous: Option<JoinHandle<()>>,
) {
    // At most one provider browse may be outstanding.
    if let Some(previous) = previous {
        if let Err(err) = previous.await {
            if err.is_panic() {
                error!("Previous browse task panicked: {}", err);
            }
        }
    }

    let mut retry = policy.activate();
    loop {
        if !with_session(&session, |s| s.browse_started(generation)) {
            return;
        }

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            attempt = provider.browse(query.service_type(), query.domain()) => attempt,
        };

        let failure = match attempt {
            Ok(mut records) => {
                if !with_session(&session, |s| s.set_established(generation, true)) {
                    return;
                }
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        item = records.next() => item,
                    };
                    match item {
                        Some(Ok(record)) => {
                            if !with_session(&session, |s| s.publish(generation, record)) {
                                return;
                            }
                        }
                        Some(Err(err)) => break err,
                        None => {
                            with_session(&session, |s| {
                                s.finish(generation, None);
                                true
                            });
                            return;
                        }
                    }
                }
            }
            Err(err) => err,
        };

        match retry.next_backoff() {
            Some(delay) => {
                warn!(
                    "Browse for {} failed (attempt {}/{}): {}, retrying in {:?}",
                    query,
                    retry.failures(),
                    policy.max_retries(),
                    failure,
                    delay
                );
                if !with_session(&session, |s| s.note_retry(generation)) {
                    return;
                }
                if !sleep_or_cancel(&cancel, delay).await {
                    return;
                }
            }
            None => {
                if !sleep_or_cancel(&cancel, policy.retry_delay()).await {
                    return;
                }
                error!(
                    "Browse for {} failed after {} attempts: {}",
                    query,
                    retry.failures(),
                    failure
                );
                with_session(&session, |s| {
                    s.finish(generation, Some(failure));
                    true
                });
                return;
            }
        }
    }
}
