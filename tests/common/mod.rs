//! Scripted provider shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use dnssd_mux::{
    BrowseStream, DiscoveryError, DiscoveryProvider, Result, ServiceRecord, ServiceType,
};
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type RecordSender = mpsc::UnboundedSender<Result<ServiceRecord>>;

enum Script {
    Stream(mpsc::UnboundedReceiver<Result<ServiceRecord>>),
    Fail(DiscoveryError),
}

/// Answers each browse call with the next queued script
///
/// When the queue is empty a browse fails, or returns a stream that never
/// yields if the provider was built with [`ScriptedProvider::pending`].
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<(String, String)>>,
    pending_when_empty: bool,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending() -> Arc<Self> {
        Arc::new(Self {
            pending_when_empty: true,
            ..Self::default()
        })
    }

    /// Queue a browse that succeeds; records sent on the returned sender are
    /// yielded by the browse stream, dropping the sender ends it
    pub fn push_stream(&self) -> RecordSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().push_back(Script::Stream(rx));
        tx
    }

    /// Queue a browse that fails with `err`
    pub fn push_failure(&self, err: DiscoveryError) {
        self.scripts.lock().push_back(Script::Fail(err));
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn browse_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Browse streams not yet dropped
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    fn track(&self, records: BrowseStream) -> BrowseStream {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live));
        records
            .map(move |item| {
                let _live = &guard;
                item
            })
            .boxed()
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DiscoveryProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn browse(&self, service_type: &ServiceType, domain: &str) -> Result<BrowseStream> {
        self.calls
            .lock()
            .push((service_type.to_string(), domain.to_string()));

        let script = self.scripts.lock().pop_front();
        match script {
            Some(Script::Stream(rx)) => Ok(self.track(UnboundedReceiverStream::new(rx).boxed())),
            Some(Script::Fail(err)) => Err(err),
            None if self.pending_when_empty => Ok(self.track(stream::pending().boxed())),
            None => Err(DiscoveryError::provider("no scripted browse left")),
        }
    }
}

pub fn record(name: &str) -> ServiceRecord {
    ServiceRecord::new(name, "_http._tcp.", "local.").unwrap()
}

pub fn http() -> ServiceType {
    ServiceType::new("_http._tcp").unwrap()
}

/// Let spawned browse tasks run until they block
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
