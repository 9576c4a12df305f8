//! Bounded per-address history of recorded pings.
//!
//! The log tracks at most `max_entries` addresses and keeps at most
//! `max_entries` observations for each of them. A new address arriving at
//! capacity evicts the address that has been quiet the longest, i.e. the one
//! whose latest observation is the oldest.
//!
//! Every mutation happens inside a single write-lock critical section, so
//! readers see either all of a `record` call or none of it.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use crate::error::Result;
use crate::types::{Address, Observation, PingSnapshot};

pub const DEFAULT_MAX_ENTRIES: usize = 200;

type History = VecDeque<Observation>;

#[derive(Debug)]
pub struct PingLog {
    max_entries: usize,
    pings: RwLock<HashMap<Address, History>>,
}

impl Default for PingLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl PingLog {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            max_entries,
            pings: RwLock::new(HashMap::with_capacity(max_entries)),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Number of distinct addresses currently tracked.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of one address's observations, oldest first.
    pub fn history(&self, address: &Address) -> Option<Vec<Observation>> {
        self.read()
            .get(address)
            .map(|history| history.iter().copied().collect())
    }

    /// Appends `now` to the history of `address`.
    ///
    /// Returns the address evicted to make room, if any. An observation older
    /// than the address's latest one is clamped to it, so a wall clock step
    /// backwards never reorders a history.
    pub fn record(&self, address: Address, now: Observation) -> Option<Address> {
        let mut pings = self.write();

        let mut evicted = None;
        if !pings.contains_key(&address) {
            while pings.len() >= self.max_entries {
                let Some(quietest) = quietest_address(&pings) else {
                    break;
                };
                pings.remove(&quietest);
                evicted = Some(quietest);
            }
        }

        let history = pings.entry(address).or_default();
        while history.len() >= self.max_entries {
            history.pop_front();
        }
        let now = match history.back() {
            Some(&last) if last > now => last,
            _ => now,
        };
        history.push_back(now);

        evicted
    }

    /// Consistent deep copy of the whole log.
    pub fn snapshot(&self) -> PingSnapshot {
        let pings = self.read();
        PingSnapshot {
            pings: pings
                .iter()
                .map(|(address, history)| (address.clone(), history.iter().copied().collect()))
                .collect(),
        }
    }

    /// Writes the log as a JSON document followed by a newline.
    ///
    /// The lock is only held while the snapshot is copied, never while
    /// writing to `sink`.
    pub fn serialize<W: Write>(&self, mut sink: W) -> Result<()> {
        let snapshot = self.snapshot();
        serde_json::to_writer(&mut sink, &snapshot)?;
        sink.write_all(b"\n")?;
        sink.flush()?;
        Ok(())
    }

    /// Replaces the whole log with the document read from `source`.
    ///
    /// Decoding finishes before the lock is taken; a malformed document leaves
    /// the current contents untouched. Accepted documents are cut down to the
    /// log's bounds before they become visible.
    pub fn deserialize<R: Read>(&self, source: R) -> Result<()> {
        let snapshot: PingSnapshot = serde_json::from_reader(source)?;
        let pings = self.bounded(snapshot);
        *self.write() = pings;
        Ok(())
    }

    fn bounded(&self, snapshot: PingSnapshot) -> HashMap<Address, History> {
        let mut histories: Vec<(Address, History)> = Vec::with_capacity(snapshot.pings.len());
        for (address, mut observations) in snapshot.pings {
            if observations.is_empty() {
                continue;
            }
            observations.sort();
            if observations.len() > self.max_entries {
                warn!(
                    "truncating history of {} from {} to {} observations",
                    address,
                    observations.len(),
                    self.max_entries
                );
                observations.drain(..observations.len() - self.max_entries);
            }
            histories.push((address, observations.into()));
        }

        if histories.len() > self.max_entries {
            warn!(
                "keeping {} most recently active of {} addresses",
                self.max_entries,
                histories.len()
            );
            histories.sort_by(|(_, a), (_, b)| b.back().cmp(&a.back()));
            histories.truncate(self.max_entries);
        }

        histories.into_iter().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Address, History>> {
        self.pings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Address, History>> {
        self.pings.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn quietest_address(pings: &HashMap<Address, History>) -> Option<Address> {
    pings
        .iter()
        .min_by_key(|(_, history)| history.back().copied())
        .map(|(address, _)| address.clone())
}
