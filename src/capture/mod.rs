//! Packet capture front end.
//!
//! A [`PacketSource`] delivers raw network-layer payloads, or nothing, at its
//! own discretion. [`run_capture`] drives a source on a blocking thread and
//! forwards each payload to the ingest task without ever waiting on it: a
//! full queue drops the payload.

pub mod nflog;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, info, trace};

use crate::error::Result;
use crate::shutdown::Shutdown;

pub use nflog::NflogCapture;

pub trait PacketSource: Send + 'static {
    /// Append zero or more payloads to `out`. May block for a bounded time.
    fn read_payloads(&mut self, out: &mut Vec<Vec<u8>>) -> Result<()>;
}

/// Counters reported when a capture loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Pump payloads from `source` into `tx` until shutdown, until the receiver
/// goes away, or until the source fails.
///
/// Blocking; run it on a dedicated or blocking-pool thread.
pub fn run_capture<S: PacketSource>(
    mut source: S,
    tx: mpsc::Sender<Vec<u8>>,
    shutdown: Shutdown,
) -> Result<CaptureStats> {
    let mut stats = CaptureStats::default();
    let mut batch = Vec::new();

    let result = loop {
        if shutdown.is_triggered() {
            break Ok(());
        }

        batch.clear();
        if let Err(e) = source.read_payloads(&mut batch) {
            error!("Packet capture failed: {}", e);
            break Err(e);
        }

        let mut closed = false;
        for payload in batch.drain(..) {
            match tx.try_send(payload) {
                Ok(()) => stats.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    stats.dropped += 1;
                    trace!("ingest queue full, dropping packet");
                }
                Err(TrySendError::Closed(_)) => {
                    closed = true;
                    break;
                }
            }
        }
        if closed {
            break Ok(());
        }
    };

    info!(
        "Packet capture stopped: {} delivered, {} dropped",
        stats.delivered, stats.dropped
    );
    result.map(|()| stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::VecDeque;
    use std::io;

    /// Replays scripted batches, then triggers shutdown.
    struct ScriptedSource {
        batches: VecDeque<Vec<Vec<u8>>>,
        shutdown: Shutdown,
        fail_at_end: bool,
    }

    impl PacketSource for ScriptedSource {
        fn read_payloads(&mut self, out: &mut Vec<Vec<u8>>) -> Result<()> {
            match self.batches.pop_front() {
                Some(batch) => out.extend(batch),
                None if self.fail_at_end => {
                    return Err(Error::NflogRead(io::Error::from_raw_os_error(libc::EBADF)))
                }
                None => self.shutdown.trigger(),
            }
            Ok(())
        }
    }

    #[test]
    fn forwards_until_shutdown() {
        let shutdown = Shutdown::new();
        let source = ScriptedSource {
            batches: VecDeque::from(vec![vec![vec![1u8], vec![2u8]], vec![], vec![vec![3u8]]]),
            shutdown: shutdown.clone(),
            fail_at_end: false,
        };
        let (tx, mut rx) = mpsc::channel(8);

        let stats = run_capture(source, tx, shutdown).unwrap();
        assert_eq!(stats, CaptureStats { delivered: 3, dropped: 0 });

        let mut received = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            received.push(payload);
        }
        assert_eq!(received, vec![vec![1u8], vec![2u8], vec![3u8]]);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let shutdown = Shutdown::new();
        let source = ScriptedSource {
            batches: VecDeque::from(vec![vec![vec![1u8]; 5]]),
            shutdown: shutdown.clone(),
            fail_at_end: false,
        };
        let (tx, _rx) = mpsc::channel(2);

        let stats = run_capture(source, tx, shutdown).unwrap();
        assert_eq!(stats, CaptureStats { delivered: 2, dropped: 3 });
    }

    #[test]
    fn closed_receiver_ends_capture() {
        let shutdown = Shutdown::new();
        let source = ScriptedSource {
            batches: VecDeque::from(vec![vec![vec![1u8]]; 100]),
            shutdown: shutdown.clone(),
            fail_at_end: false,
        };
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let stats = run_capture(source, tx, shutdown.clone()).unwrap();
        assert_eq!(stats.delivered, 0);
        assert!(!shutdown.is_triggered());
    }

    #[test]
    fn source_failure_is_returned() {
        let shutdown = Shutdown::new();
        let source = ScriptedSource {
            batches: VecDeque::new(),
            shutdown: shutdown.clone(),
            fail_at_end: true,
        };
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            run_capture(source, tx, shutdown),
            Err(Error::NflogRead(_))
        ));
    }
}
