use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::address::extract_source;
use crate::persistence::StateFile;
use crate::ping_log::PingLog;
use crate::shutdown::Shutdown;
use crate::types::{Address, Observation};

/// Record the source of one captured packet.
///
/// Payloads that are not IPv4 or IPv6 are logged and dropped.
pub fn ingest_payload(log: &PingLog, payload: &[u8], now: Observation) -> Option<Address> {
    let Some(ip) = extract_source(payload) else {
        warn!("invalid ICMP packet: {:02x?}", payload);
        return None;
    };
    let address = Address::from(ip);
    if let Some(evicted) = log.record(address.clone(), now) {
        debug!("evicted {} to make room for {}", evicted, address);
    }
    Some(address)
}

/// Consume captured payloads until every sender is gone.
pub async fn run_ingest(mut rx: mpsc::Receiver<Vec<u8>>, log: Arc<PingLog>) -> u64 {
    info!("Ingest worker started");
    let mut recorded = 0u64;
    while let Some(payload) = rx.recv().await {
        if ingest_payload(&log, &payload, Utc::now()).is_some() {
            recorded += 1;
        }
    }
    info!("Ingest worker exited after recording {} pings", recorded);
    recorded
}

/// Store the log every `interval` until shutdown.
///
/// Failed stores are logged and retried on the next tick. The final store at
/// shutdown is left to the caller, once ingestion has drained.
pub async fn run_persistence(
    log: Arc<PingLog>,
    state: StateFile,
    interval: Duration,
    shutdown: Shutdown,
) {
    info!(
        "Persisting ping log to {} every {:?}",
        state.path().display(),
        interval
    );
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                store_log(log.clone(), state.clone()).await;
            }
            _ = shutdown.wait() => {
                debug!("Persistence worker: shutdown signal received");
                break;
            }
        }
    }
}

/// One store on the blocking pool. Errors are logged, never returned.
pub async fn store_log(log: Arc<PingLog>, state: StateFile) -> bool {
    let path = state.path().to_path_buf();
    match tokio::task::spawn_blocking(move || state.store(&log)).await {
        Ok(Ok(())) => {
            debug!("Stored ping log to {}", path.display());
            true
        }
        Ok(Err(e)) => {
            error!("cannot store state to {}: {}", path.display(), e);
            false
        }
        Err(e) => {
            error!("state store task failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::net::{IpAddr, Ipv4Addr};
    use tracing_test::traced_test;

    fn ipv4_payload(src: Ipv4Addr) -> Vec<u8> {
        let mut pkt = vec![0u8; 28];
        pkt[0] = 0x45;
        pkt[12..16].copy_from_slice(&src.octets());
        pkt
    }

    #[test]
    fn records_ipv4_source() {
        let log = PingLog::new(10);
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let recorded = ingest_payload(&log, &ipv4_payload(Ipv4Addr::new(10, 0, 0, 1)), now);

        let expected = Address::from(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(recorded, Some(expected.clone()));
        assert_eq!(log.history(&expected), Some(vec![now]));
    }

    #[traced_test]
    #[test]
    fn short_payload_is_logged_and_dropped() {
        let log = PingLog::new(10);
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(ingest_payload(&log, &[0x45; 20], now), None);
        assert!(log.is_empty());
        assert!(logs_contain("invalid ICMP packet"));
    }

    #[tokio::test]
    async fn ingest_drains_queue() {
        let log = Arc::new(PingLog::new(10));
        let (tx, rx) = mpsc::channel(16);
        for last in 1..=3u8 {
            tx.send(ipv4_payload(Ipv4Addr::new(10, 0, 0, last))).await.unwrap();
        }
        tx.send(vec![0x00; 30]).await.unwrap();
        tx.send(ipv4_payload(Ipv4Addr::new(10, 0, 0, 1))).await.unwrap();
        drop(tx);

        assert_eq!(run_ingest(rx, log.clone()).await, 4);
        assert_eq!(log.len(), 3);
        let first: Address = "10.0.0.1".parse().unwrap();
        assert_eq!(log.history(&first).map(|h| h.len()), Some(2));
    }

    #[tokio::test]
    async fn persistence_stops_on_shutdown() {
        let dir = std::env::temp_dir().join(format!("pingwatch-worker-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let state = StateFile::in_dir(&dir);
        let log = Arc::new(PingLog::new(10));
        log.record("10.0.0.1".parse().unwrap(), Utc::now());

        let shutdown = Shutdown::new();
        let worker = tokio::spawn(run_persistence(
            log.clone(),
            state.clone(),
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("persistence worker did not stop")
            .unwrap();

        let restored = PingLog::new(10);
        assert!(state.load(&restored).unwrap());
        assert_eq!(restored.snapshot(), log.snapshot());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn failed_store_is_reported_not_raised() {
        let state = StateFile::in_dir(
            std::env::temp_dir()
                .join(uuid::Uuid::new_v4().to_string())
                .join("nested"),
        );
        assert!(!store_log(Arc::new(PingLog::new(1)), state).await);
    }
}
