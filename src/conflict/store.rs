//! Conflict Store
//!
//! Persistent map of active conflicts keyed by canonical pair key.
//!
//! Writes are debounced: every mutation publishes a fresh snapshot on a watch
//! channel, and a background task waits out the debounce window before encoding
//! the latest snapshot. Several mutations inside one window coalesce into one
//! durable write. On restart the store loads the last successful write.

use super::types::{Conflict, PairKey};
use crate::platform::{CommunityId, PartyId};
use crate::serialization::{from_cbor, to_cbor, SerializationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// Default debounce window for durable writes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("Snapshot writer stopped")]
    WriterStopped,
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable layout: one record per conflict keyed by pair id.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    conflicts: BTreeMap<PairKey, Conflict>,
}

/// Read the conflicts persisted at `path` without starting a writer.
///
/// A missing file is an empty store.
pub fn read_snapshot(path: &Path) -> StoreResult<BTreeMap<PairKey, Conflict>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let bytes = fs::read(path)?;
    let snapshot: Snapshot = from_cbor(&bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StoreError::UnsupportedVersion(snapshot.version));
    }
    Ok(snapshot.conflicts)
}

/// Atomically replace the snapshot at `path` (temp file + rename).
fn write_snapshot(path: &Path, conflicts: &BTreeMap<PairKey, Conflict>) -> StoreResult<()> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        conflicts: conflicts.clone(),
    };
    let bytes = to_cbor(&snapshot)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Immediate write requested by [`ConflictStore::flush`].
struct FlushRequest {
    conflicts: BTreeMap<PairKey, Conflict>,
    ack: oneshot::Sender<StoreResult<()>>,
}

/// Background writer coalescing snapshots published within the debounce window.
///
/// Every write, debounced or flushed, runs on this one task, so writes never
/// overlap and a flush is never overtaken by an older snapshot.
struct DebouncedWriter {
    tx: watch::Sender<Option<BTreeMap<PairKey, Conflict>>>,
    flush_tx: mpsc::UnboundedSender<FlushRequest>,
    writes: Arc<AtomicU64>,
}

impl DebouncedWriter {
    /// Must be called from within a Tokio runtime.
    fn spawn(path: PathBuf, debounce: Duration) -> Self {
        let (tx, mut rx) = watch::channel(None::<BTreeMap<PairKey, Conflict>>);
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel::<FlushRequest>();
        let writes = Arc::new(AtomicU64::new(0));

        let task_writes = writes.clone();
        tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        // A flush arriving mid-window supersedes the pending write
                        tokio::select! {
                            _ = tokio::time::sleep(debounce) => None,
                            request = flush_rx.recv() => request,
                        }
                    }
                    request = flush_rx.recv() => match request {
                        Some(request) => Some(request),
                        None => break,
                    },
                };

                // Published snapshots are never newer than a flush request
                let latest = rx.borrow_and_update().clone();
                let (conflicts, ack) = match request {
                    Some(FlushRequest { conflicts, ack }) => (Some(conflicts), Some(ack)),
                    None => (latest, None),
                };
                let result = match conflicts {
                    Some(conflicts) => write_in_background(path.clone(), conflicts).await,
                    None => Ok(()),
                };

                match &result {
                    Ok(()) => {
                        task_writes.fetch_add(1, Ordering::SeqCst);
                        debug!(path = %path.display(), "conflict snapshot written");
                    }
                    Err(e) => warn!(path = %path.display(), "snapshot write failed: {}", e),
                }
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
        });

        Self {
            tx,
            flush_tx,
            writes,
        }
    }

    fn publish(&self, conflicts: &BTreeMap<PairKey, Conflict>) {
        self.tx.send_replace(Some(conflicts.clone()));
    }

    async fn flush(&self, conflicts: &BTreeMap<PairKey, Conflict>) -> StoreResult<()> {
        let (ack, done) = oneshot::channel();
        self.flush_tx
            .send(FlushRequest {
                conflicts: conflicts.clone(),
                ack,
            })
            .map_err(|_| StoreError::WriterStopped)?;
        done.await.map_err(|_| StoreError::WriterStopped)?
    }
}

/// Run the blocking snapshot write off the async runtime.
async fn write_in_background(path: PathBuf, conflicts: BTreeMap<PairKey, Conflict>) -> StoreResult<()> {
    tokio::task::spawn_blocking(move || write_snapshot(&path, &conflicts))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

/// Persistent map of active conflicts.
pub struct ConflictStore {
    conflicts: BTreeMap<PairKey, Conflict>,
    writer: Option<DebouncedWriter>,
}

impl ConflictStore {
    /// Store without durability (tests, dry runs).
    pub fn in_memory() -> Self {
        Self {
            conflicts: BTreeMap::new(),
            writer: None,
        }
    }

    /// Load the last successful write at `path` and start the debounced writer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(path: impl AsRef<Path>, debounce: Duration) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conflicts = read_snapshot(&path)?;
        debug!(path = %path.display(), conflicts = conflicts.len(), "conflict store loaded");

        Ok(Self {
            conflicts,
            writer: Some(DebouncedWriter::spawn(path, debounce)),
        })
    }

    /// Create a conflict, or return the existing one for the pair.
    ///
    /// Returns `(conflict, created)`; an existing record is never overwritten.
    pub fn create(
        &mut self,
        community: CommunityId,
        party_a: PartyId,
        party_b: PartyId,
        moderator_id: PartyId,
        reason: &str,
        now: u64,
    ) -> (Conflict, bool) {
        let key = PairKey::new(party_a, party_b);
        if let Some(existing) = self.conflicts.get(&key) {
            return (existing.clone(), false);
        }

        let conflict = Conflict::new(community, party_a, party_b, moderator_id, reason, now);
        self.conflicts.insert(key, conflict.clone());
        self.mark_dirty();
        (conflict, true)
    }

    pub fn get(&self, key: &PairKey) -> Option<&Conflict> {
        self.conflicts.get(key)
    }

    /// Replace a stored conflict with an updated copy.
    ///
    /// Ignored if the conflict was deleted in the meantime, so a late update
    /// can never resurrect a closed case.
    pub fn put(&mut self, conflict: Conflict) {
        match self.conflicts.get_mut(&conflict.id) {
            Some(slot) => {
                if *slot != conflict {
                    *slot = conflict;
                    self.mark_dirty();
                }
            }
            None => debug!(pair = %conflict.id, "update for deleted conflict dropped"),
        }
    }

    /// Conflicts involving `party`, oldest first.
    pub fn involving(&self, party: PartyId) -> Vec<Conflict> {
        let mut found: Vec<Conflict> = self
            .conflicts
            .values()
            .filter(|c| c.involves(party))
            .cloned()
            .collect();
        found.sort_by_key(|c| c.created_at);
        found
    }

    pub fn delete(&mut self, key: &PairKey) -> Option<Conflict> {
        let removed = self.conflicts.remove(key);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    pub fn keys(&self) -> Vec<PairKey> {
        self.conflicts.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.values()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Write the current state now, bypassing the debounce window.
    ///
    /// Resolves once the snapshot is on disk.
    pub async fn flush(&self) -> StoreResult<()> {
        match &self.writer {
            Some(writer) => writer.flush(&self.conflicts).await,
            None => Ok(()),
        }
    }

    /// Number of durable writes completed so far.
    pub fn durable_writes(&self) -> u64 {
        self.writer
            .as_ref()
            .map(|w| w.writes.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn mark_dirty(&self) {
        if let Some(writer) = &self.writer {
            writer.publish(&self.conflicts);
        }
    }
}
