//! Pair cache: holds the first-arriving half of each exchange until its
//! partner shows up or the entry ages out.
//!
//! Entries remember which side arrived first so the emitted witness can be
//! addressed from the client's point of view regardless of arrival order.
//! They age by `cached_at`, the collector's clock when the half was cached.
//! `observation_time` is carried through to the report untouched, and may be
//! far in the past for replayed traffic.

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};

use witness_core::wire::ReportError;
use witness_core::{NetworkDirection, PairKey, Side, Witness, WitnessReport};

/// A cached half.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub observation_time: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
    pub first_side: Side,
    pub witness: Witness,
}

impl CacheEntry {
    /// Address the entry. The origin is always the request sender: a cached
    /// response was sent by the server, so its addressing is flipped.
    pub fn into_addressed(self, id: PairKey) -> AddressedWitness {
        let (origin, destination) = match self.first_side {
            Side::Request => (self.src, self.dst),
            Side::Response => (self.dst, self.src),
        };
        AddressedWitness {
            origin,
            destination,
            observation_time: self.observation_time,
            id,
            witness: self.witness,
        }
    }
}

/// A witness ready for the upload path.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressedWitness {
    pub origin: SocketAddr,
    pub destination: SocketAddr,
    pub observation_time: DateTime<Utc>,
    pub id: PairKey,
    pub witness: Witness,
}

impl AddressedWitness {
    pub fn to_report(&self, direction: NetworkDirection) -> Result<WitnessReport, ReportError> {
        WitnessReport::new(
            direction,
            self.origin,
            self.destination,
            self.observation_time,
            &self.id,
            &self.witness,
        )
    }
}

#[derive(Debug, Default)]
pub struct PairCache {
    entries: HashMap<PairKey, CacheEntry>,
}

impl PairCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a half. An existing entry under the same key is replaced.
    pub fn insert(&mut self, key: PairKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Remove and return the entry for `key`, if any.
    pub fn take(&mut self, key: &PairKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &PairKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry cached strictly before `cutoff`, oldest first.
    pub fn drain_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<(PairKey, CacheEntry)> {
        let stale: Vec<PairKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.cached_at < cutoff)
            .map(|(k, _)| *k)
            .collect();

        let mut drained: Vec<(PairKey, CacheEntry)> = stale
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|e| (k, e)))
            .collect();
        drained.sort_by_key(|(k, e)| (e.cached_at, *k));
        drained
    }

    /// Remove every entry, oldest first.
    pub fn drain_all(&mut self) -> Vec<(PairKey, CacheEntry)> {
        let mut drained: Vec<(PairKey, CacheEntry)> = self.entries.drain().collect();
        drained.sort_by_key(|(k, e)| (e.cached_at, *k));
        drained
    }
}
