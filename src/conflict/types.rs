//! Conflict record types.
//!
//! A conflict is an active no-contact case between two parties. It is keyed by
//! a canonical, order-independent [`PairKey`] and owns the complete record of
//! every reversible mutation applied to either party.

use crate::platform::{ChannelId, CommunityId, GrantId, MessageId, PartyId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Canonical unordered pair key: `"<min>:<max>"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairKey(String);

impl PairKey {
    pub fn new(a: PartyId, b: PartyId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        PairKey(format!("{}:{}", lo, hi))
    }

    /// Parse a key typed by an operator. Accepts either order.
    pub fn parse(raw: &str) -> Option<Self> {
        let (a, b) = raw.trim().split_once(':')?;
        let a = a.trim().parse::<u64>().ok()?;
        let b = b.trim().parse::<u64>().ok()?;
        if a == b {
            return None;
        }
        Some(Self::new(PartyId(a), PartyId(b)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conflict lifecycle state.
///
/// Per-party escalation is derived from violation counts and does not change
/// the overall state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictState {
    /// Persisted, parties not yet notified
    Created,
    #[default]
    Active,
    /// Terminal; the record is deleted right after entering this state
    Closed,
}

/// Reversible mutations applied to one party. Written only by the mutation engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyMutations {
    /// Administrative-equivalent grants removed from the party
    #[serde(default)]
    pub removed_privileged: BTreeSet<GrantId>,
    /// Communicate-capable grants removed from the party
    #[serde(default)]
    pub removed_comm: BTreeSet<GrantId>,
    /// Channels carrying a communicate-deny override for the party
    #[serde(default)]
    pub channel_overrides: BTreeSet<ChannelId>,
    #[serde(default)]
    pub strict_mode: bool,
    /// Mute-equivalent grant applied by the engine and not yet lifted
    #[serde(default)]
    pub muted: bool,
    /// When the pending restoration is due (ms since epoch)
    #[serde(default)]
    pub restore_due_at: Option<u64>,
}

impl PartyMutations {
    /// No outstanding mutation remains.
    pub fn is_empty(&self) -> bool {
        self.removed_privileged.is_empty()
            && self.removed_comm.is_empty()
            && self.channel_overrides.is_empty()
            && !self.muted
    }

    pub fn was_removed(&self, grant: GrantId) -> bool {
        self.removed_privileged.contains(&grant) || self.removed_comm.contains(&grant)
    }

    /// All recorded grant removals, deduplicated.
    pub fn removed_grants(&self) -> BTreeSet<GrantId> {
        self.removed_privileged
            .union(&self.removed_comm)
            .copied()
            .collect()
    }

    pub fn outstanding(&self) -> usize {
        self.removed_privileged.len()
            + self.removed_comm.len()
            + self.channel_overrides.len()
            + usize::from(self.muted)
    }
}

/// Connect-deny voice lock installed by a conflict, persisted so it can be
/// released after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceLock {
    pub channel: ChannelId,
    pub party: PartyId,
    /// Absolute expiry, ms since epoch
    pub expires_at: u64,
}

/// An active no-contact case between two parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: PairKey,
    pub community: CommunityId,
    pub party_a: PartyId,
    pub party_b: PartyId,
    pub moderator_id: PartyId,
    pub reason: String,
    pub created_at: u64,
    pub last_reset_at: u64,
    #[serde(default)]
    pub state: ConflictState,
    #[serde(default)]
    pub violation_counts: BTreeMap<PartyId, u32>,
    #[serde(default)]
    pub responded_once: BTreeMap<PartyId, bool>,
    #[serde(default)]
    pub mutations: BTreeMap<PartyId, PartyMutations>,
    #[serde(default)]
    pub voice_warned: BTreeMap<PartyId, bool>,
    #[serde(default)]
    pub oversight_notified: BTreeMap<PartyId, bool>,
    /// Running log record in the community's audit channel
    #[serde(default)]
    pub log_ref: Option<MessageId>,
    #[serde(default)]
    pub voice_locks: Vec<VoiceLock>,
    /// Parties whose unauthorized-unmute audit entry was already written
    #[serde(default)]
    pub tamper_logged: BTreeSet<PartyId>,
    /// Parties whose regained-grant audit entry was already written
    #[serde(default)]
    pub regrant_logged: BTreeSet<PartyId>,
}

impl Conflict {
    pub fn new(
        community: CommunityId,
        party_a: PartyId,
        party_b: PartyId,
        moderator_id: PartyId,
        reason: impl Into<String>,
        now: u64,
    ) -> Self {
        Self {
            id: PairKey::new(party_a, party_b),
            community,
            party_a,
            party_b,
            moderator_id,
            reason: reason.into(),
            created_at: now,
            last_reset_at: now,
            state: ConflictState::Created,
            violation_counts: BTreeMap::new(),
            responded_once: BTreeMap::new(),
            mutations: BTreeMap::new(),
            voice_warned: BTreeMap::new(),
            oversight_notified: BTreeMap::new(),
            log_ref: None,
            voice_locks: Vec::new(),
            tamper_logged: BTreeSet::new(),
            regrant_logged: BTreeSet::new(),
        }
    }

    pub fn parties(&self) -> [PartyId; 2] {
        [self.party_a, self.party_b]
    }

    pub fn involves(&self, party: PartyId) -> bool {
        self.party_a == party || self.party_b == party
    }

    /// The other side of the conflict, if `party` is one of its parties.
    pub fn counterpart(&self, party: PartyId) -> Option<PartyId> {
        if party == self.party_a {
            Some(self.party_b)
        } else if party == self.party_b {
            Some(self.party_a)
        } else {
            None
        }
    }

    pub fn violations(&self, party: PartyId) -> u32 {
        self.violation_counts.get(&party).copied().unwrap_or(0)
    }

    pub fn has_responded(&self, party: PartyId) -> bool {
        self.responded_once.get(&party).copied().unwrap_or(false)
    }

    /// Per-party escalation: more than one targeted message in the current window.
    pub fn is_escalated(&self, party: PartyId) -> bool {
        self.violations(party) > 1
    }

    pub fn voice_warned(&self, party: PartyId) -> bool {
        self.voice_warned.get(&party).copied().unwrap_or(false)
    }

    pub fn mutations_of(&self, party: PartyId) -> Option<&PartyMutations> {
        self.mutations.get(&party)
    }

    pub fn mutations_mut(&mut self, party: PartyId) -> &mut PartyMutations {
        self.mutations.entry(party).or_default()
    }

    /// Party currently carries enforcement that can be tampered with.
    pub fn under_enforcement(&self, party: PartyId) -> bool {
        self.mutations
            .get(&party)
            .map(|m| !m.is_empty() || m.restore_due_at.is_some())
            .unwrap_or(false)
    }

    /// Restoration for `party` is due or already under way at `now`.
    pub fn restoring(&self, party: PartyId, now: u64) -> bool {
        self.mutations
            .get(&party)
            .and_then(|m| m.restore_due_at)
            .map_or(false, |due| due <= now)
    }

    /// Record a voice lock, replacing any earlier one on the same channel.
    pub fn set_voice_lock(&mut self, lock: VoiceLock) {
        self.clear_voice_lock(lock.channel, lock.party);
        self.voice_locks.push(lock);
    }

    pub fn clear_voice_lock(&mut self, channel: ChannelId, party: PartyId) -> bool {
        let before = self.voice_locks.len();
        self.voice_locks
            .retain(|l| !(l.channel == channel && l.party == party));
        self.voice_locks.len() != before
    }

    /// Total outstanding mutations across both parties.
    pub fn outstanding_mutations(&self) -> usize {
        self.mutations.values().map(PartyMutations::outstanding).sum()
    }

    /// Drop per-party mutation entries that no longer hold anything.
    pub fn prune_mutations(&mut self) {
        self.mutations
            .retain(|_, m| !m.is_empty() || m.restore_due_at.is_some());
    }
}
