//! Conflict engine service.
//!
//! One `ConflictEngine` is instantiated per process. It owns the conflict store
//! and the voice lock table behind a single async mutex; every public
//! operation holds that mutex for its full duration, so event handling, sweeps
//! and moderator commands never interleave on a conflict.
//!
//! The components live in sibling modules as `impl` blocks on this type:
//! monitor (messages), locks (voice + sweep), tamper (grant changes),
//! reset (rolling window), lifecycle (create/close/list).

use super::locks::LockTable;
use crate::config::EngineSettings;
use crate::conflict::{ConflictStore, PairKey, StoreError, StoreResult};
use crate::platform::{PartyId, PlatformClient, PlatformError, PlatformEvent, PlatformResult};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Engine errors surfaced to the command layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("A conflict needs two distinct parties (got {0} twice)")]
    SameParty(PartyId),

    #[error("No active conflict for pair {0}")]
    ConflictNotFound(PairKey),

    #[error("Conflict {pair} still has {remaining} outstanding mutation(s); retry close")]
    CloseIncomplete { pair: PairKey, remaining: usize },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Engine result type.
pub type EngineResult<T> = Result<T, EngineError>;

/// Mutable engine state. Only reachable through the engine mutex.
pub(crate) struct EngineState {
    pub(crate) store: ConflictStore,
    /// Index over the voice locks recorded on stored conflicts
    pub(crate) locks: LockTable,
}

/// Outcome of a platform call under the enforcement error policy.
pub(crate) enum Settled<T> {
    Done(T),
    /// Target vanished; treated as already resolved
    Gone,
    /// Transient or permission failure; already logged
    Failed,
}

/// Apply the error policy: NotFound is resolved silently, anything else is
/// logged once and the enclosing enforcement cycle continues.
pub(crate) fn settle<T>(result: PlatformResult<T>, action: &str) -> Settled<T> {
    match result {
        Ok(value) => Settled::Done(value),
        Err(PlatformError::NotFound(what)) => {
            debug!(action, "target gone ({}), treating as resolved", what);
            Settled::Gone
        }
        Err(e) => {
            warn!(action, "platform call failed: {}", e);
            Settled::Failed
        }
    }
}

/// The conflict enforcement service.
pub struct ConflictEngine<P: PlatformClient> {
    pub(crate) platform: P,
    pub(crate) settings: EngineSettings,
    pub(crate) state: Mutex<EngineState>,
}

impl<P: PlatformClient> ConflictEngine<P> {
    /// Build the engine over a loaded store. Voice locks recorded on stored
    /// conflicts are picked up again, so they still expire after a restart.
    pub fn new(platform: P, settings: EngineSettings, store: ConflictStore) -> Self {
        let locks = LockTable::from_conflicts(store.iter());
        if !locks.is_empty() {
            debug!(locks = locks.len(), "voice locks recovered from store");
        }
        Self {
            platform,
            settings,
            state: Mutex::new(EngineState { store, locks }),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Dispatch one platform event to the component that owns it.
    pub async fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::Message(message) => {
                self.handle_message(&message).await;
            }
            PlatformEvent::VoiceState(change) => {
                self.handle_voice_state(&change).await;
            }
            PlatformEvent::GrantsChanged(change) => {
                self.handle_grant_change(&change).await;
            }
        }
    }

    /// Write the conflict store immediately.
    pub async fn flush(&self) -> StoreResult<()> {
        let state = self.state.lock().await;
        state.store.flush().await
    }
}
