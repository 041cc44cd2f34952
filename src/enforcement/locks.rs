//! Lock Scheduler
//!
//! Voice proximity enforcement. When both parties of a conflict sit in the same
//! voice channel, the entering party is evicted. Non-exempt parties also get a
//! connect-deny override recorded as a [`Lock`] with an absolute expiry.
//! Re-entering while locked strips administrative grants (the only way past a
//! connect-deny override).
//!
//! Each lock is also recorded on the owning conflict, and the table is rebuilt
//! from those records at startup. A single periodic sweep expires locks and
//! runs due restorations; there is no timer per lock or per mutation, so both
//! survive restarts through the persisted `expires_at` and `restore_due_at`.

use super::engine::{settle, ConflictEngine, Settled};
use crate::conflict::{now_ms, Conflict, PairKey, VoiceLock};
use crate::platform::{
    ChannelId, CommunityId, OverrideKind, PartyId, PlatformClient, VoiceStateChange,
};
use std::collections::HashMap;
use tracing::{info, warn};

/// A time-boxed connect-deny override on a voice channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub channel: ChannelId,
    pub party: PartyId,
    pub community: CommunityId,
    /// Conflict that caused the lock
    pub pair: PairKey,
    /// Absolute expiry, ms since epoch
    pub expires_at: u64,
}

impl Lock {
    fn recorded(conflict: &Conflict, record: &VoiceLock) -> Self {
        Lock {
            channel: record.channel,
            party: record.party,
            community: conflict.community,
            pair: conflict.id.clone(),
            expires_at: record.expires_at,
        }
    }

    fn record(&self) -> VoiceLock {
        VoiceLock {
            channel: self.channel,
            party: self.party,
            expires_at: self.expires_at,
        }
    }
}

/// Lock table keyed by (channel, party).
#[derive(Debug, Default)]
pub struct LockTable {
    locks: HashMap<(ChannelId, PartyId), Lock>,
}

impl LockTable {
    /// Rebuild the table from the locks recorded on stored conflicts.
    ///
    /// When two conflicts recorded the same channel and party, the later
    /// expiry wins.
    pub fn from_conflicts<'a>(conflicts: impl IntoIterator<Item = &'a Conflict>) -> Self {
        let mut table = LockTable::default();
        for conflict in conflicts {
            for record in &conflict.voice_locks {
                let lock = Lock::recorded(conflict, record);
                let later = table
                    .locks
                    .get(&(lock.channel, lock.party))
                    .map_or(true, |existing| existing.expires_at < lock.expires_at);
                if later {
                    table.insert(lock);
                }
            }
        }
        table
    }

    pub fn insert(&mut self, lock: Lock) {
        self.locks.insert((lock.channel, lock.party), lock);
    }

    /// Unexpired lock for `party` on `channel`.
    pub fn active(&self, channel: ChannelId, party: PartyId, now: u64) -> Option<&Lock> {
        self.locks
            .get(&(channel, party))
            .filter(|lock| lock.expires_at > now)
    }

    pub fn expired(&self, now: u64) -> Vec<Lock> {
        self.locks
            .values()
            .filter(|lock| lock.expires_at <= now)
            .cloned()
            .collect()
    }

    pub fn get(&self, channel: ChannelId, party: PartyId) -> Option<&Lock> {
        self.locks.get(&(channel, party))
    }

    pub fn remove(&mut self, channel: ChannelId, party: PartyId) -> Option<Lock> {
        self.locks.remove(&(channel, party))
    }

    pub fn all(&self) -> Vec<Lock> {
        let mut all: Vec<Lock> = self.locks.values().cloned().collect();
        all.sort_by_key(|lock| (lock.expires_at, lock.channel, lock.party));
        all
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// What happened to a voice join, per conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceOutcome {
    /// Evicted; `locked` when a connect-deny lock was installed
    Evicted { locked: bool },
    /// Evicted while locked; administrative grants removed
    ReEntry { stripped: usize },
    /// Evicted; party outranks the enforcer so no lock
    ExemptEvicted,
}

/// Counts from one enforcement sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub locks_expired: usize,
    pub restorations: usize,
}

impl<P: PlatformClient> ConflictEngine<P> {
    /// React to a voice presence change.
    pub async fn handle_voice_state(&self, change: &VoiceStateChange) -> Vec<VoiceOutcome> {
        let Some(channel) = change.channel else {
            return Vec::new();
        };
        let party = change.party;
        if party == self.platform.enforcer_id() {
            return Vec::new();
        }

        let now = now_ms();
        let mut state = self.state.lock().await;
        let mut outcomes = Vec::new();

        for mut conflict in state.store.involving(party) {
            if conflict.community != change.community {
                continue;
            }
            let Some(other) = conflict.counterpart(party) else {
                continue;
            };
            match settle(
                self.platform.voice_channel_of(change.community, other).await,
                "fetch voice presence",
            ) {
                Settled::Done(Some(other_channel)) if other_channel == channel => {}
                _ => continue,
            }
            if let Settled::Done(info) =
                settle(self.platform.channel_info(channel).await, "fetch channel")
            {
                if !info.voice_capable {
                    continue;
                }
            }

            let _ = settle(
                self.platform.evict_from_voice(change.community, party).await,
                "evict from voice",
            );

            let exempt = matches!(
                settle(
                    self.platform
                        .outranks(change.community, party, self.platform.enforcer_id())
                        .await,
                    "compare standing",
                ),
                Settled::Done(true)
            );

            let outcome = if exempt {
                if !conflict.voice_warned(party) {
                    let text = format!(
                        "{} joined voice channel {} with {} (conflict {}). They outrank the \
                         moderation bot, so they were disconnected but cannot be locked out.",
                        party, channel, other, conflict.id
                    );
                    self.notify(party, &voice_notice(other)).await;
                    self.notify_oversight(change.community, &text).await;
                    conflict.voice_warned.insert(party, true);
                }
                VoiceOutcome::ExemptEvicted
            } else if state.locks.active(channel, party, now).is_some() {
                let stripped = self.strip_privileged(&mut conflict, party, now).await;
                self.audit(
                    change.community,
                    &format!(
                        "Voice lock re-entry: {} rejoined locked channel {} (conflict {}); \
                         {} administrative grant(s) removed",
                        party, channel, conflict.id, stripped
                    ),
                )
                .await;
                VoiceOutcome::ReEntry { stripped }
            } else {
                let locked = self
                    .install_lock(&mut state.locks, &mut conflict, channel, party, now)
                    .await;
                if !conflict.voice_warned(party) {
                    self.notify(party, &voice_notice(other)).await;
                    conflict.voice_warned.insert(party, true);
                }
                self.audit(
                    change.community,
                    &format!(
                        "Voice eviction: {} joined {} in channel {} (conflict {})",
                        party, other, channel, conflict.id
                    ),
                )
                .await;
                VoiceOutcome::Evicted { locked }
            };

            info!(pair = %conflict.id, party = %party, channel = %channel, ?outcome, "voice contact handled");
            outcomes.push(outcome);
            state.store.put(conflict);
        }

        outcomes
    }

    async fn install_lock(
        &self,
        locks: &mut LockTable,
        conflict: &mut Conflict,
        channel: ChannelId,
        party: PartyId,
        now: u64,
    ) -> bool {
        match settle(
            self.platform
                .set_channel_override(channel, party, OverrideKind::ConnectDeny)
                .await,
            "set connect-deny override",
        ) {
            Settled::Done(()) => {
                let lock = Lock {
                    channel,
                    party,
                    community: conflict.community,
                    pair: conflict.id.clone(),
                    expires_at: now.saturating_add(self.settings.enforcement.lock_duration_ms),
                };
                conflict.set_voice_lock(lock.record());
                locks.insert(lock);
                true
            }
            _ => false,
        }
    }

    /// Delete a connect-deny override. Returns `false` if it must be retried.
    pub(crate) async fn release_lock(&self, channel: ChannelId, party: PartyId) -> bool {
        !matches!(
            settle(
                self.platform
                    .delete_channel_override(channel, party, OverrideKind::ConnectDeny)
                    .await,
                "delete connect-deny override",
            ),
            Settled::Failed
        )
    }

    /// Run the periodic enforcement sweep at the current time.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(now_ms()).await
    }

    /// Expire locks and run every restoration due at `now`.
    pub async fn sweep_at(&self, now: u64) -> SweepReport {
        let mut state = self.state.lock().await;
        let mut report = SweepReport::default();

        for lock in state.locks.expired(now) {
            if self.release_lock(lock.channel, lock.party).await {
                state.locks.remove(lock.channel, lock.party);
                if let Some(mut owner) = state.store.get(&lock.pair).cloned() {
                    owner.clear_voice_lock(lock.channel, lock.party);
                    state.store.put(owner);
                }
                report.locks_expired += 1;
            } else {
                warn!(channel = %lock.channel, party = %lock.party, "lock release failed, will retry");
            }
        }

        for key in state.store.keys() {
            let Some(mut conflict) = state.store.get(&key).cloned() else {
                continue;
            };
            let mut touched = false;
            for party in conflict.parties() {
                let due = conflict
                    .mutations_of(party)
                    .and_then(|m| m.restore_due_at)
                    .map_or(false, |due| due <= now);
                if due {
                    self.restore_party(&mut conflict, party).await;
                    report.restorations += 1;
                    touched = true;
                }
            }
            if touched {
                state.store.put(conflict);
            }
        }

        report
    }

    /// Snapshot of every active lock.
    pub async fn active_locks(&self) -> Vec<Lock> {
        self.state.lock().await.locks.all()
    }
}

fn voice_notice(other: PartyId) -> String {
    format!(
        "You were disconnected from voice because {} is in the same channel and you are \
         in an active no-contact case with them.",
        other
    )
}
