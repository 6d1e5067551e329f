//! Per-peer fingerprint trust records.
//!
//! The store is shared by every conversation with the same peer. Lookups
//! take read locks only; writes are serialized per peer by the record's
//! own lock, so two peers never contend with each other.
//!
//! A fingerprint is never removed implicitly. New fingerprints always enter
//! untrusted, and only a successful verification flips the flag.

use crate::error::Result;
use crate::identity::{Fingerprint, PeerId};
use crate::logging::RedactedHex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// A fingerprint seen for a peer and whether it is trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownFingerprint {
    /// The key fingerprint.
    pub fingerprint: Fingerprint,
    /// Whether out-of-band verification confirmed it.
    pub trusted: bool,
}

/// Everything known about one peer's keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    fingerprints: Vec<KnownFingerprint>,
}

impl TrustRecord {
    fn find(&self, fp: &Fingerprint) -> Option<&KnownFingerprint> {
        self.fingerprints.iter().find(|k| &k.fingerprint == fp)
    }

    /// Insert `fp` as untrusted if unseen. Returns whether it was new.
    pub fn ensure_fingerprint(&mut self, fp: &Fingerprint) -> bool {
        if self.find(fp).is_some() {
            return false;
        }
        self.fingerprints.push(KnownFingerprint {
            fingerprint: fp.clone(),
            trusted: false,
        });
        true
    }

    /// Whether `fp` is known and trusted.
    pub fn is_trusted(&self, fp: &Fingerprint) -> bool {
        self.find(fp).map(|k| k.trusted).unwrap_or(false)
    }

    /// Set the trusted flag. No-op if the fingerprint was never recorded.
    pub fn mark_trusted(&mut self, fp: &Fingerprint) -> bool {
        match self.fingerprints.iter_mut().find(|k| &k.fingerprint == fp) {
            Some(known) => {
                known.trusted = true;
                true
            }
            None => false,
        }
    }

    /// All known fingerprints in the order they were first seen.
    pub fn fingerprints(&self) -> &[KnownFingerprint] {
        &self.fingerprints
    }
}

/// Serializable form of one peer's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTrust {
    /// The peer.
    pub peer: PeerId,
    /// Its fingerprints.
    pub fingerprints: Vec<KnownFingerprint>,
}

/// Shared fingerprint trust store.
///
/// Cloning is cheap and every clone sees the same records.
#[derive(Clone, Default)]
pub struct TrustStore {
    peers: Arc<RwLock<HashMap<PeerId, Arc<RwLock<TrustRecord>>>>>,
}

impl TrustStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, peer: &PeerId) -> Result<Option<Arc<RwLock<TrustRecord>>>> {
        let peers = self.peers.read()?;
        Ok(peers.get(peer).cloned())
    }

    fn record_or_create(&self, peer: &PeerId) -> Result<Arc<RwLock<TrustRecord>>> {
        if let Some(record) = self.record(peer)? {
            return Ok(record);
        }
        let mut peers = self.peers.write()?;
        let record = peers.entry(peer.clone()).or_insert_with(|| {
            debug!(peer = %peer, "Creating trust record");
            Arc::new(RwLock::new(TrustRecord::default()))
        });
        Ok(record.clone())
    }

    /// Record that `fp` was observed for `peer`.
    ///
    /// Returns `true` exactly once per distinct fingerprint.
    pub fn record_fingerprint(&self, peer: &PeerId, fp: &Fingerprint) -> Result<bool> {
        let record = self.record_or_create(peer)?;
        let mut record = record.write()?;
        let is_new = record.ensure_fingerprint(fp);
        if is_new {
            info!(peer = %peer, fingerprint = %RedactedHex(&fp.to_hex()), "New fingerprint recorded");
        }
        Ok(is_new)
    }

    /// Whether `fp` is a trusted fingerprint of `peer`. False for unknown peers or keys.
    pub fn is_trusted(&self, peer: &PeerId, fp: &Fingerprint) -> Result<bool> {
        match self.record(peer)? {
            Some(record) => Ok(record.read()?.is_trusted(fp)),
            None => Ok(false),
        }
    }

    /// Mark `fp` trusted for `peer`. Silently does nothing if it was never recorded.
    pub fn mark_trusted(&self, peer: &PeerId, fp: &Fingerprint) -> Result<()> {
        let Some(record) = self.record(peer)? else {
            debug!(peer = %peer, "mark_trusted on unknown peer ignored");
            return Ok(());
        };
        let marked = record.write()?.mark_trusted(fp);
        if marked {
            info!(peer = %peer, fingerprint = %RedactedHex(&fp.to_hex()), "Fingerprint marked trusted");
        } else {
            debug!(peer = %peer, "mark_trusted on unrecorded fingerprint ignored");
        }
        Ok(())
    }

    /// Known fingerprints of a peer, in first-seen order.
    pub fn fingerprints(&self, peer: &PeerId) -> Result<Vec<KnownFingerprint>> {
        match self.record(peer)? {
            Some(record) => Ok(record.read()?.fingerprints().to_vec()),
            None => Ok(Vec::new()),
        }
    }

    /// Copy of all records, sorted by peer, for external persistence.
    pub fn snapshot(&self) -> Result<Vec<PeerTrust>> {
        let peers = self.peers.read()?;
        let mut out = Vec::with_capacity(peers.len());
        for (peer, record) in peers.iter() {
            out.push(PeerTrust {
                peer: peer.clone(),
                fingerprints: record.read()?.fingerprints().to_vec(),
            });
        }
        out.sort_by(|a, b| a.peer.cmp(&b.peer));
        Ok(out)
    }

    /// Rebuild a store from a snapshot.
    pub fn restore(snapshot: Vec<PeerTrust>) -> Self {
        let peers = snapshot
            .into_iter()
            .map(|p| {
                let record = TrustRecord {
                    fingerprints: p.fingerprints,
                };
                (p.peer, Arc::new(RwLock::new(record)))
            })
            .collect();
        Self {
            peers: Arc::new(RwLock::new(peers)),
        }
    }

    /// Encode the snapshot for the configuration collaborator to store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.snapshot()?)?)
    }

    /// Decode a store previously produced by [`TrustStore::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let snapshot: Vec<PeerTrust> = bincode::deserialize(bytes)?;
        Ok(Self::restore(snapshot))
    }
}
