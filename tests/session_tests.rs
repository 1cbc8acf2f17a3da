mod common;

use common::{ScriptedProvider, http, record, settle};
use dnssd_mux::{
    DiscoveryError, DiscoverySession, Result, SessionConfig, SessionPhase, ServiceType,
};
use futures::StreamExt;
use std::{collections::HashMap, time::Duration};
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_secs(3);

fn fast_config() -> SessionConfig {
    SessionConfig::default()
        .with_max_retries(3)
        .with_retry_delay(Duration::from_secs(2))
}

async fn next_name(stream: &mut dnssd_mux::DiscoveryStream) -> String {
    match stream.next().await {
        Some(Ok(record)) => record.service_name().to_string(),
        other => panic!("expected a record, got {other:?}"),
    }
}

#[test_log::test(tokio::test)]
async fn test_concurrent_subscribers_share_one_browse() -> Result<()> {
    let provider = ScriptedProvider::new();
    let tx = provider.push_stream();
    let session = DiscoverySession::new(provider.clone(), fast_config())?;

    let mut a = session.discover(&http(), "local", TIMEOUT);
    let mut b = session.discover(&http(), "local", TIMEOUT);
    let mut c = session.discover(&http(), "local.", TIMEOUT);
    settle().await;

    assert_eq!(provider.browse_count(), 1);
    assert_eq!(session.subscriber_count(), 3);
    assert_eq!(session.phase(), SessionPhase::Active);

    tx.send(Ok(record("printer"))).unwrap();
    for stream in [&mut a, &mut b, &mut c] {
        assert_eq!(next_name(stream).await, "printer");
    }

    drop(a);
    drop(b);
    settle().await;
    assert_eq!(provider.live(), 1);
    assert_eq!(session.subscriber_count(), 1);

    tx.send(Ok(record("later"))).unwrap();
    assert_eq!(next_name(&mut c).await, "later");

    drop(c);
    settle().await;
    assert_eq!(provider.live(), 0);
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(tx.is_closed());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_late_subscriber_gets_replay_then_live_records() -> Result<()> {
    let provider = ScriptedProvider::new();
    let tx = provider.push_stream();
    let session = DiscoverySession::new(provider.clone(), fast_config())?;

    let mut early = session.discover(&http(), "local", TIMEOUT);
    tx.send(Ok(record("alpha"))).unwrap();
    tx.send(Ok(record("beta"))).unwrap();
    assert_eq!(next_name(&mut early).await, "alpha");
    assert_eq!(next_name(&mut early).await, "beta");

    let mut late = session.discover(&http(), "local", TIMEOUT);
    assert_eq!(next_name(&mut late).await, "alpha");
    assert_eq!(next_name(&mut late).await, "beta");

    tx.send(Ok(record("gamma"))).unwrap();
    assert_eq!(next_name(&mut early).await, "gamma");
    assert_eq!(next_name(&mut late).await, "gamma");
    assert_eq!(provider.browse_count(), 1);
    assert_eq!(session.stats().records_published, 3);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_new_period_after_teardown_starts_fresh() -> Result<()> {
    let provider = ScriptedProvider::new();
    let first_tx = provider.push_stream();
    let session = DiscoverySession::new(provider.clone(), fast_config())?;

    let mut first = session.discover(&http(), "local", TIMEOUT);
    first_tx.send(Ok(record("old"))).unwrap();
    assert_eq!(next_name(&mut first).await, "old");
    drop(first);
    settle().await;
    assert!(first_tx.is_closed());

    let second_tx = provider.push_stream();
    let mut second = session.discover(&http(), "local", TIMEOUT);
    settle().await;
    second_tx.send(Ok(record("new"))).unwrap();

    assert_eq!(next_name(&mut second).await, "new");
    assert_eq!(provider.browse_count(), 2);
    assert_eq!(session.stats().periods_started, 2);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failed_browses_are_retried_after_delay() -> Result<()> {
    let provider = ScriptedProvider::new();
    provider.push_failure(DiscoveryError::provider("first"));
    provider.push_failure(DiscoveryError::provider("second"));
    let tx = provider.push_stream();
    tx.send(Ok(record("printer"))).unwrap();

    let session = DiscoverySession::new(provider.clone(), fast_config())?;
    let start = Instant::now();
    let mut stream = session.discover(&http(), "local", TIMEOUT);

    assert_eq!(next_name(&mut stream).await, "printer");
    assert!(start.elapsed() >= Duration::from_secs(4));
    assert_eq!(provider.browse_count(), 3);
    assert_eq!(session.stats().retries, 2);
    assert_eq!(session.phase(), SessionPhase::Active);
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_exhausted_retries_fail_every_subscriber() -> Result<()> {
    let provider = ScriptedProvider::new();
    let tx = provider.push_stream();
    tx.send(Ok(record("printer"))).unwrap();
    tx.send(Err(DiscoveryError::provider("lost"))).unwrap();
    provider.push_failure(DiscoveryError::provider("second"));
    provider.push_failure(DiscoveryError::provider("third"));

    let session = DiscoverySession::new(provider.clone(), fast_config())?;
    let start = Instant::now();
    let mut a = session.discover(&http(), "local", TIMEOUT);
    let mut b = session.discover(&http(), "local", TIMEOUT);

    for stream in [&mut a, &mut b] {
        assert_eq!(next_name(stream).await, "printer");
        match stream.next().await {
            Some(Err(DiscoveryError::Provider(msg))) => assert_eq!(msg, "third"),
            other => panic!("expected the last provider error, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    assert!(start.elapsed() >= Duration::from_secs(6));
    assert_eq!(provider.browse_count(), 3);
    assert_eq!(session.stats().terminal_failures, 1);

    // A failed period does not stick: the next subscriber starts over.
    let retry_tx = provider.push_stream();
    let mut c = session.discover(&http(), "local", TIMEOUT);
    retry_tx.send(Ok(record("scanner"))).unwrap();
    assert_eq!(next_name(&mut c).await, "scanner");
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_subscriber_joining_during_retry_delay_shares_period() -> Result<()> {
    let provider = ScriptedProvider::new();
    provider.push_failure(DiscoveryError::provider("flaky"));
    let tx = provider.push_stream();
    let session = DiscoverySession::new(provider.clone(), fast_config())?;

    let mut a = session.discover(&http(), "local", TIMEOUT);
    settle().await;
    assert_eq!(session.phase(), SessionPhase::Starting);

    let mut b = session.discover(&http(), "local", TIMEOUT);
    assert_eq!(provider.browse_count(), 1);
    assert_eq!(session.subscriber_count(), 2);

    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(provider.browse_count(), 2);

    tx.send(Ok(record("printer"))).unwrap();
    assert_eq!(next_name(&mut a).await, "printer");
    assert_eq!(next_name(&mut b).await, "printer");
    Ok(())
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_last_detach_during_retry_delay_cancels_retry() -> Result<()> {
    let provider = ScriptedProvider::new();
    provider.push_failure(DiscoveryError::provider("flaky"));
    let session = DiscoverySession::new(provider.clone(), fast_config())?;

    let stream = session.discover(&http(), "local", TIMEOUT);
    settle().await;
    drop(stream);
    settle().await;
    assert_eq!(session.phase(), SessionPhase::Idle);

    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(provider.browse_count(), 1);
    assert_eq!(session.stats().retries, 1);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_provider_stream_end_completes_subscribers() -> Result<()> {
    let provider = ScriptedProvider::new();
    let tx = provider.push_stream();
    let session = DiscoverySession::new(provider.clone(), fast_config())?;

    let mut stream = session.discover(&http(), "local", TIMEOUT);
    tx.send(Ok(record("printer"))).unwrap();
    drop(tx);

    assert_eq!(next_name(&mut stream).await, "printer");
    assert!(stream.next().await.is_none());
    assert_eq!(session.subscriber_count(), 0);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_clear_cancels_browse_for_everyone() -> Result<()> {
    let provider = ScriptedProvider::pending();
    let session = DiscoverySession::new(provider.clone(), fast_config())?;

    let mut a = session.discover(&http(), "local", TIMEOUT);
    let mut b = session.discover(&http(), "local", TIMEOUT);
    settle().await;
    assert_eq!(provider.live(), 1);

    session.clear();
    assert!(a.next().await.is_none());
    assert!(b.next().await.is_none());
    settle().await;
    assert_eq!(provider.live(), 0);

    let _c = session.discover(&http(), "local", TIMEOUT);
    settle().await;
    assert_eq!(provider.browse_count(), 2);
    assert_eq!(session.subscriber_count(), 1);

    // Streams from the cleared period no longer count towards the new one.
    drop(a);
    drop(b);
    settle().await;
    assert_eq!(session.subscriber_count(), 1);
    assert_eq!(provider.live(), 1);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_discover_services_uses_configured_query() -> Result<()> {
    let provider = ScriptedProvider::pending();
    let vars = HashMap::from([
        ("DNSSD_MUX_SERVICE_TYPE".to_string(), "_ipp._tcp".to_string()),
        ("DNSSD_MUX_DOMAIN".to_string(), "Example.COM.".to_string()),
        ("DNSSD_MUX_TIMEOUT_MS".to_string(), "1500".to_string()),
    ]);
    let config = SessionConfig::default().with_env_overrides(&vars)?;
    let session = DiscoverySession::new(provider.clone(), config)?;

    let stream = session.discover_services();
    assert_eq!(stream.timeout(), Duration::from_millis(1500));
    settle().await;

    assert_eq!(
        provider.calls(),
        vec![("_ipp._tcp".to_string(), "example.com".to_string())]
    );
    assert_eq!(
        session.active_query().map(|query| query.service_type().clone()),
        Some(ServiceType::new("_ipp._tcp")?)
    );
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_attach_and_detach_keeps_one_browse() -> Result<()> {
    let provider = ScriptedProvider::pending();
    let session = DiscoverySession::new(provider.clone(), fast_config())?;

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let stream = session.discover(&http(), "local", TIMEOUT);
                    tokio::task::yield_now().await;
                    drop(stream);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.await.unwrap();
    }

    session.shutdown().await;
    assert!(provider.max_live() <= 1);
    assert_eq!(provider.live(), 0);
    assert_eq!(session.subscriber_count(), 0);
    assert_eq!(session.phase(), SessionPhase::Idle);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_two_consumers_see_the_same_resolved_printer() -> Result<()> {
    let provider = ScriptedProvider::new();
    let tx = provider.push_stream();
    let session = DiscoverySession::new(provider.clone(), fast_config())?;

    let a = session.discover(&http(), "local", TIMEOUT);
    let b = session.discover(&http(), "local", TIMEOUT);
    tx.send(Ok(record("printer")
        .with_host_name("printer.local.")
        .with_port(631)))
        .unwrap();
    drop(tx);

    let (a, b) = tokio::join!(a.collect::<Vec<_>>(), b.collect::<Vec<_>>());
    for found in [a, b] {
        assert_eq!(found.len(), 1);
        let printer = found.into_iter().next().unwrap()?;
        assert_eq!(printer.service_name(), "printer");
        assert_eq!(printer.port(), Some(631));
    }
    assert_eq!(
        provider.calls(),
        vec![("_http._tcp".to_string(), "local".to_string())]
    );
    Ok(())
}
