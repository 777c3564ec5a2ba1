//! Persistent storage using RocksDB.
//!
//! Key layout (values are JSON unless noted):
//!
//! - `ping:{ts:020}:{node}:{nonce}` - stored pings, time ordered
//! - `node:{node}` - latest sighting per node
//! - `cred:{node}` - registered credential
//! - `nonce:{node}:{nonce}` - first-seen time, 8-byte big-endian ms
//! - `signal:{id}`, `signal_idx:{node}:{rev_ts}:{id}`, `signal_all:{rev_ts}:{id}`
//! - `sv:{node}` - SV ledger rows
//! - `meta:ping_count` - 8-byte big-endian counter

use crate::error::{Error, Result};
use crate::models::{NodeCredential, NodeSummary, Signal, StoredPing};
use aesc_sv::{SvState, SvStore};
use parking_lot::Mutex;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use std::path::Path;

const PING_COUNT_KEY: &[u8] = b"meta:ping_count";

/// Storage backend for Meshwork data.
pub struct Storage {
    db: DB,
    /// Serializes read-check-write sequences (nonces, summaries, CAS).
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Values under a prefix, in ascending key order, at most `limit`.
    fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str, limit: usize) -> Result<Vec<T>> {
        let prefix = prefix.as_bytes();
        let mut out = Vec::new();
        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item?;
            if !key.starts_with(prefix) || out.len() >= limit {
                break;
            }
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Keys under a prefix.
    fn scan_keys(&self, prefix: &str) -> Result<Vec<Box<[u8]>>> {
        let prefix = prefix.as_bytes();
        let mut out = Vec::new();
        for item in self.db.prefix_iterator(prefix) {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push(key);
        }
        Ok(out)
    }

    // --- Pings ---

    /// Store a ping and fold it into the node summary.
    ///
    /// Returns the updated summary.
    pub fn record_ping(&self, ping: &StoredPing) -> Result<NodeSummary> {
        let _guard = self.write_lock.lock();

        let summary_key = format!("node:{}", ping.node_id);
        let summary = match self.get_json::<NodeSummary>(&summary_key)? {
            Some(mut existing) => {
                existing.observe(ping.ts, ping.lat, ping.lon);
                existing
            }
            None => NodeSummary {
                node_id: ping.node_id.clone(),
                last_seen: ping.ts,
                lat: ping.lat,
                lon: ping.lon,
            },
        };

        let count = self.ping_count_locked()? + 1;

        let mut batch = WriteBatch::default();
        batch.put(ping.storage_key().as_bytes(), serde_json::to_vec(ping)?);
        batch.put(summary_key.as_bytes(), serde_json::to_vec(&summary)?);
        batch.put(PING_COUNT_KEY, count.to_be_bytes());
        self.db.write(batch)?;

        Ok(summary)
    }

    fn ping_count_locked(&self) -> Result<u64> {
        match self.db.get(PING_COUNT_KEY)? {
            Some(data) => {
                let bytes: [u8; 8] = data
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("corrupt ping counter".into()))?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Total pings ever stored.
    pub fn ping_count(&self) -> Result<u64> {
        self.ping_count_locked()
    }

    /// Most recent pings, newest first.
    pub fn recent_pings(&self, limit: usize) -> Result<Vec<StoredPing>> {
        let mut out = Vec::new();
        // ';' sorts right after ':', so this seeks to the last "ping:" key.
        let iter = self.db.iterator(IteratorMode::From(b"ping;", Direction::Reverse));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(b"ping:") || out.len() >= limit {
                break;
            }
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    // --- Node summaries ---

    /// Get the summary for one node.
    pub fn get_node(&self, node_id: &str) -> Result<Option<NodeSummary>> {
        self.get_json(&format!("node:{node_id}"))
    }

    /// Latest sighting per node, most recent first, at most `limit`.
    pub fn list_nodes(&self, limit: usize) -> Result<Vec<NodeSummary>> {
        let mut nodes: Vec<NodeSummary> = self.scan_prefix("node:", usize::MAX)?;
        nodes.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.node_id.cmp(&b.node_id)));
        nodes.truncate(limit);
        Ok(nodes)
    }

    /// Number of nodes ever seen.
    pub fn node_count(&self) -> Result<usize> {
        Ok(self.scan_keys("node:")?.len())
    }

    // --- Credentials ---

    /// Get a node's credential.
    pub fn get_credential(&self, node_id: &str) -> Result<Option<NodeCredential>> {
        self.get_json(&format!("cred:{node_id}"))
    }

    /// Store or replace a credential.
    pub fn put_credential(&self, credential: &NodeCredential) -> Result<()> {
        let key = format!("cred:{}", credential.node_id);
        let _guard = self.write_lock.lock();
        self.db.put(key.as_bytes(), serde_json::to_vec(credential)?)?;
        Ok(())
    }

    /// Store a credential only if the node has none. Returns whether it was stored.
    pub fn put_credential_if_absent(&self, credential: &NodeCredential) -> Result<bool> {
        let key = format!("cred:{}", credential.node_id);
        let _guard = self.write_lock.lock();
        if self.db.get(key.as_bytes())?.is_some() {
            return Ok(false);
        }
        self.db.put(key.as_bytes(), serde_json::to_vec(credential)?)?;
        Ok(true)
    }

    /// Remove a credential. Returns whether one existed.
    pub fn delete_credential(&self, node_id: &str) -> Result<bool> {
        let key = format!("cred:{node_id}");
        let _guard = self.write_lock.lock();
        let existed = self.db.get(key.as_bytes())?.is_some();
        self.db.delete(key.as_bytes())?;
        Ok(existed)
    }

    /// All registered credentials.
    pub fn list_credentials(&self) -> Result<Vec<NodeCredential>> {
        self.scan_prefix("cred:", usize::MAX)
    }

    // --- Nonces ---

    /// Record a nonce for a node. Returns false if it was already recorded.
    pub fn record_nonce(&self, node_id: &str, nonce: &str, seen_at_ms: i64) -> Result<bool> {
        let key = format!("nonce:{node_id}:{nonce}");
        let _guard = self.write_lock.lock();
        if self.db.get(key.as_bytes())?.is_some() {
            return Ok(false);
        }
        self.db.put(key.as_bytes(), seen_at_ms.to_be_bytes())?;
        Ok(true)
    }

    /// Delete nonces first seen before `cutoff_ms`. Returns how many were removed.
    pub fn prune_nonces(&self, cutoff_ms: i64) -> Result<usize> {
        let prefix = b"nonce:";
        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let seen_at = <[u8; 8]>::try_from(value.as_ref())
                .map(i64::from_be_bytes)
                .unwrap_or(i64::MIN);
            if seen_at < cutoff_ms {
                batch.delete(&key);
                removed += 1;
            }
        }
        self.db.write(batch)?;
        Ok(removed)
    }

    // --- Signals ---

    /// Store a signal and its indexes.
    pub fn put_signal(&self, signal: &Signal) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put(Signal::record_key(&signal.id).as_bytes(), serde_json::to_vec(signal)?);
        batch.put(signal.node_index_key().as_bytes(), signal.id.as_bytes());
        batch.put(signal.global_index_key().as_bytes(), signal.id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    /// Get a signal by ID.
    pub fn get_signal(&self, id: &str) -> Result<Option<Signal>> {
        self.get_json(&Signal::record_key(id))
    }

    /// Signals newest first, for one node or across all nodes.
    pub fn list_signals(&self, node_id: Option<&str>, limit: usize) -> Result<Vec<Signal>> {
        let prefix = match node_id {
            Some(node_id) => format!("signal_idx:{node_id}:"),
            None => "signal_all:".to_string(),
        };
        let prefix = prefix.as_bytes();
        let mut signals = Vec::new();
        for item in self.db.prefix_iterator(prefix) {
            let (key, id) = item?;
            if !key.starts_with(prefix) || signals.len() >= limit {
                break;
            }
            let id = String::from_utf8_lossy(&id);
            if let Some(signal) = self.get_signal(&id)? {
                signals.push(signal);
            }
        }
        Ok(signals)
    }

    // --- SV ledger rows ---

    fn load_sv(&self, node_id: &str) -> Result<Option<SvState>> {
        self.get_json(&format!("sv:{node_id}"))
    }

    fn swap_sv(&self, node_id: &str, expected: Option<u64>, next: &SvState) -> Result<bool> {
        let key = format!("sv:{node_id}");
        let _guard = self.write_lock.lock();
        let current = self.get_json::<SvState>(&key)?.map(|s| s.revision);
        if current != expected {
            return Ok(false);
        }
        self.db.put(key.as_bytes(), serde_json::to_vec(next)?)?;
        Ok(true)
    }
}

impl SvStore for Storage {
    fn load(&self, node_id: &str) -> aesc_sv::Result<Option<SvState>> {
        self.load_sv(node_id).map_err(|e| aesc_sv::Error::Store(e.to_string()))
    }

    fn compare_and_swap(&self, node_id: &str, expected: Option<u64>, next: &SvState) -> aesc_sv::Result<bool> {
        self.swap_sv(node_id, expected, next)
            .map_err(|e| aesc_sv::Error::Store(e.to_string()))
    }

    fn list(&self) -> aesc_sv::Result<Vec<SvState>> {
        self.scan_prefix("sv:", usize::MAX)
            .map_err(|e| aesc_sv::Error::Store(e.to_string()))
    }
}
