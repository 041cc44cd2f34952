//! Conflict records and their persistent store.

pub mod store;
pub mod types;

pub use store::{read_snapshot, ConflictStore, StoreError, StoreResult, DEFAULT_DEBOUNCE};
pub use types::{now_ms, Conflict, ConflictState, PairKey, PartyMutations, VoiceLock};
