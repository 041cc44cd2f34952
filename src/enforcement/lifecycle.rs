//! Conflict Lifecycle Controller
//!
//! Creation and closure of conflicts, plus the read-side queries exposed to
//! the command layer. A conflict record is only deleted once every mutation
//! it caused has been reversed; a partial close keeps the record so the
//! moderator can retry.

use super::engine::{ConflictEngine, EngineError, EngineResult};
use crate::conflict::{now_ms, Conflict, ConflictState, PairKey};
use crate::platform::{CommunityId, PartyId, PlatformClient};
use tracing::{info, warn};

/// Result of a create request.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Conflict),
    /// The pair already had an active conflict; nothing changed
    Existing(Conflict),
}

impl CreateOutcome {
    pub fn conflict(&self) -> &Conflict {
        match self {
            CreateOutcome::Created(c) | CreateOutcome::Existing(c) => c,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

impl<P: PlatformClient> ConflictEngine<P> {
    /// Open a conflict between two parties.
    pub async fn create_conflict(
        &self,
        community: CommunityId,
        party_a: PartyId,
        party_b: PartyId,
        moderator: PartyId,
        reason: &str,
    ) -> EngineResult<CreateOutcome> {
        if party_a == party_b {
            return Err(EngineError::SameParty(party_a));
        }

        let mut state = self.state.lock().await;
        let (mut conflict, created) =
            state
                .store
                .create(community, party_a, party_b, moderator, reason, now_ms());
        if !created {
            info!(pair = %conflict.id, "conflict already active");
            return Ok(CreateOutcome::Existing(conflict));
        }

        conflict.state = ConflictState::Active;
        for (party, other) in [(party_a, party_b), (party_b, party_a)] {
            self.notify(
                party,
                &format!(
                    "A moderator opened a no-contact case between you and {}. Do not mention \
                     or reply to them until it is closed. Reason: {}",
                    other, reason
                ),
            )
            .await;
        }
        self.audit(
            community,
            &format!(
                "Conflict opened: {} by {} ({})",
                conflict.id, moderator, reason
            ),
        )
        .await;

        state.store.put(conflict.clone());
        info!(pair = %conflict.id, moderator = %moderator, "conflict created");
        Ok(CreateOutcome::Created(conflict))
    }

    /// Close a conflict, reversing everything it did.
    ///
    /// Returns [`EngineError::CloseIncomplete`] and keeps the record when any
    /// mutation or lock could not be reversed.
    pub async fn close_conflict(&self, key: &PairKey, closed_by: PartyId) -> EngineResult<Conflict> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut conflict = state
            .store
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::ConflictNotFound(key.clone()))?;

        for party in conflict.parties() {
            self.restore_party(&mut conflict, party).await;
        }

        let mut locks_left = 0;
        for record in conflict.voice_locks.clone() {
            // Another conflict holds the same lock; leave its override in place
            let shared = state
                .locks
                .get(record.channel, record.party)
                .map_or(false, |lock| &lock.pair != key);
            if shared {
                conflict.clear_voice_lock(record.channel, record.party);
            } else if self.release_lock(record.channel, record.party).await {
                state.locks.remove(record.channel, record.party);
                conflict.clear_voice_lock(record.channel, record.party);
            } else {
                locks_left += 1;
            }
        }

        let remaining = conflict.outstanding_mutations() + locks_left;
        if remaining > 0 {
            warn!(pair = %key, remaining, "close incomplete, record kept");
            state.store.put(conflict);
            return Err(EngineError::CloseIncomplete {
                pair: key.clone(),
                remaining,
            });
        }

        conflict.state = ConflictState::Closed;
        for (party, other) in [
            (conflict.party_a, conflict.party_b),
            (conflict.party_b, conflict.party_a),
        ] {
            self.notify(
                party,
                &format!("Your no-contact case with {} has been closed.", other),
            )
            .await;
        }
        self.audit(
            conflict.community,
            &format!("Conflict closed: {} by {}", conflict.id, closed_by),
        )
        .await;

        state.store.delete(key);
        info!(pair = %key, closed_by = %closed_by, "conflict closed");
        Ok(conflict)
    }

    /// Active conflicts involving `party`, oldest first.
    pub async fn list_conflicts_involving(&self, party: PartyId) -> Vec<Conflict> {
        self.state.lock().await.store.involving(party)
    }

    pub async fn get_conflict(&self, key: &PairKey) -> Option<Conflict> {
        self.state.lock().await.store.get(key).cloned()
    }
}
