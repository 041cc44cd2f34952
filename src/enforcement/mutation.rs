//! Mutation Engine
//!
//! Reversible privilege removal and channel-level communicate-deny overrides.
//!
//! Two removal classes:
//! - Administrative-equivalent grants: always removed, regardless of naming
//! - Communicate-capable grants: removed when their effective name length is
//!   short (normal mode) or unconditionally (strict mode)
//!
//! Every removal is recorded on the conflict only after the platform confirmed
//! it, and records are sets, so re-running a pass never duplicates anything.
//! Restoration is due `mute_duration_ms` after the last mutation and is driven
//! by the periodic sweep (see `locks.rs`).

use super::engine::{settle, ConflictEngine, Settled};
use crate::conflict::{Conflict, PartyMutations};
use crate::platform::{ChannelId, GrantId, GrantInfo, OverrideKind, PartyId, PlatformClient};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Characters weighted as three characters by [`effective_length`].
pub const WEIGHTED_PUNCTUATION: [char; 5] = ['.', ',', '-', '_', '\''];

/// Effective display length of a grant name.
///
/// Weighted punctuation counts as 3 characters each; everything else as 1.
pub fn effective_length(name: &str) -> usize {
    name.chars()
        .map(|c| if WEIGHTED_PUNCTUATION.contains(&c) { 3 } else { 1 })
        .sum()
}

/// Why a grant is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalClass {
    Privileged,
    Communicate,
}

/// Classify a grant for removal.
///
/// Administrative grants always match. Communicate-capable grants match in
/// strict mode, or when their effective name length is at most `short_name_max`.
pub fn classify(info: &GrantInfo, strict: bool, short_name_max: usize) -> Option<RemovalClass> {
    if info.administrative {
        return Some(RemovalClass::Privileged);
    }
    if info.can_communicate && (strict || effective_length(&info.name) <= short_name_max) {
        return Some(RemovalClass::Communicate);
    }
    None
}

/// Push the restoration due time out to `due`, never pulling it in.
fn schedule_restore(m: &mut PartyMutations, due: u64) {
    m.restore_due_at = Some(m.restore_due_at.map_or(due, |d| d.max(due)));
}

const MUTATION_REASON: &str = "Conflict enforcement: contact with the other party";
const RESTORE_REASON: &str = "Conflict enforcement: restoring after mute period";

impl<P: PlatformClient> ConflictEngine<P> {
    /// Apply violation mutations to `party`.
    ///
    /// Applies the mute grant, removes matching grants and installs a
    /// communicate-deny override on `channel` unless it is inside its grace
    /// period. Returns `false` when the community has no mute grant configured
    /// (warning-only mode) or the party has left.
    pub(crate) async fn apply_mutations(
        &self,
        conflict: &mut Conflict,
        party: PartyId,
        channel: Option<ChannelId>,
        strict: bool,
        now: u64,
    ) -> bool {
        let settings = self.settings.community(conflict.community);
        let Some(mute) = settings.mute_grant else {
            warn!(
                community = %conflict.community,
                pair = %conflict.id,
                "no mute grant configured; enforcement degraded to warning-only"
            );
            return false;
        };

        // Without the current holdings there is no telling whose mute is on
        let held = match settle(
            self.platform.party_grants(conflict.community, party).await,
            "fetch party grants",
        ) {
            Settled::Done(held) => Some(held),
            Settled::Gone => return false,
            Settled::Failed => None,
        };

        match &held {
            Some(held) => {
                // Only a mute the engine added is the engine's to lift later
                let already_ours = conflict.mutations_of(party).map_or(false, |m| m.muted);
                if !held.contains(&mute) {
                    if let Settled::Done(()) = settle(
                        self.platform
                            .add_grant(conflict.community, party, mute, MUTATION_REASON)
                            .await,
                        "apply mute grant",
                    ) {
                        conflict.mutations_mut(party).muted = true;
                    }
                } else if !already_ours {
                    debug!(party = %party, "party already muted by someone else");
                }

                self.remove_matching(conflict, party, held, strict, false)
                    .await;
            }
            None => warn!(
                pair = %conflict.id,
                party = %party,
                "grants unavailable; mute and removals skipped this time"
            ),
        }

        if let Some(channel) = channel {
            self.deny_communicate(conflict, party, channel, now).await;
        }

        let removed = {
            let m = conflict.mutations_mut(party);
            m.strict_mode |= strict;
            schedule_restore(m, now.saturating_add(settings.mute_duration_ms));
            m.removed_privileged.len() + m.removed_comm.len()
        };

        info!(pair = %conflict.id, party = %party, strict, removed, "mutations applied");
        true
    }

    /// Remove only administrative-equivalent grants from `party`.
    ///
    /// Returns the number of grants newly removed.
    pub(crate) async fn strip_privileged(
        &self,
        conflict: &mut Conflict,
        party: PartyId,
        now: u64,
    ) -> usize {
        let held = match settle(
            self.platform.party_grants(conflict.community, party).await,
            "fetch party grants",
        ) {
            Settled::Done(held) => held,
            Settled::Gone | Settled::Failed => return 0,
        };

        let removed = self
            .remove_matching(conflict, party, &held, false, true)
            .await;
        if removed > 0 {
            let duration = self.settings.community(conflict.community).mute_duration_ms;
            schedule_restore(conflict.mutations_mut(party), now.saturating_add(duration));
        }
        removed
    }

    /// Remove every held grant matching the heuristics and record it.
    async fn remove_matching(
        &self,
        conflict: &mut Conflict,
        party: PartyId,
        held: &BTreeSet<GrantId>,
        strict: bool,
        privileged_only: bool,
    ) -> usize {
        let settings = self.settings.community(conflict.community);
        let short_name_max = self.settings.enforcement.short_name_max;
        let mut removed = 0;

        for &grant in held {
            if Some(grant) == settings.mute_grant {
                continue;
            }
            let info = match settle(
                self.platform.grant_info(conflict.community, grant).await,
                "fetch grant info",
            ) {
                Settled::Done(info) => info,
                _ => continue,
            };
            if !info.manageable {
                debug!(grant = %grant, name = %info.name, "grant not manageable, skipped");
                continue;
            }
            let Some(class) = classify(&info, strict, short_name_max) else {
                continue;
            };
            if privileged_only && class != RemovalClass::Privileged {
                continue;
            }

            if let Settled::Done(()) = settle(
                self.platform
                    .remove_grant(conflict.community, party, grant, MUTATION_REASON)
                    .await,
                "remove grant",
            ) {
                let m = conflict.mutations_mut(party);
                let fresh = match class {
                    RemovalClass::Privileged => m.removed_privileged.insert(grant),
                    RemovalClass::Communicate => m.removed_comm.insert(grant),
                };
                if fresh {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Install a communicate-deny override unless the channel is too young.
    async fn deny_communicate(
        &self,
        conflict: &mut Conflict,
        party: PartyId,
        channel: ChannelId,
        now: u64,
    ) {
        let info = match settle(self.platform.channel_info(channel).await, "fetch channel") {
            Settled::Done(info) => info,
            _ => return,
        };
        let grace = self.settings.enforcement.channel_grace_ms;
        if now.saturating_sub(info.created_at) < grace {
            debug!(channel = %channel, "channel inside grace period, no override");
            return;
        }

        if let Settled::Done(()) = settle(
            self.platform
                .set_channel_override(channel, party, OverrideKind::CommunicateDeny)
                .await,
            "set communicate-deny override",
        ) {
            conflict.mutations_mut(party).channel_overrides.insert(channel);
        }
    }

    /// Reverse every recorded mutation of `party`.
    ///
    /// Vanished parties, grants and channels count as restored. Items that fail
    /// transiently stay recorded for the next sweep. Returns `true` once
    /// nothing remains outstanding.
    pub(crate) async fn restore_party(&self, conflict: &mut Conflict, party: PartyId) -> bool {
        let Some(record) = conflict.mutations.get(&party).cloned() else {
            return true;
        };
        let community = conflict.community;

        let held = match settle(
            self.platform.party_grants(community, party).await,
            "fetch party grants",
        ) {
            Settled::Done(held) => Some(held),
            Settled::Gone => {
                info!(pair = %conflict.id, party = %party, "party gone, restoration resolved");
                conflict.mutations.remove(&party);
                return true;
            }
            Settled::Failed => None,
        };

        let mut remaining = PartyMutations {
            strict_mode: record.strict_mode,
            restore_due_at: record.restore_due_at,
            ..Default::default()
        };

        for (grants, kept) in [
            (&record.removed_privileged, &mut remaining.removed_privileged),
            (&record.removed_comm, &mut remaining.removed_comm),
        ] {
            for &grant in grants {
                if held.as_ref().map_or(false, |h| h.contains(&grant)) {
                    continue;
                }
                if let Settled::Failed = settle(
                    self.platform
                        .add_grant(community, party, grant, RESTORE_REASON)
                        .await,
                    "restore grant",
                ) {
                    kept.insert(grant);
                }
            }
        }

        for &channel in &record.channel_overrides {
            if let Settled::Failed = settle(
                self.platform
                    .delete_channel_override(channel, party, OverrideKind::CommunicateDeny)
                    .await,
                "delete communicate-deny override",
            ) {
                remaining.channel_overrides.insert(channel);
            }
        }

        if record.muted {
            if let Some(mute) = self.settings.community(community).mute_grant {
                if let Settled::Failed = settle(
                    self.platform
                        .remove_grant(community, party, mute, RESTORE_REASON)
                        .await,
                    "lift mute grant",
                ) {
                    remaining.muted = true;
                }
            }
        }

        if remaining.is_empty() {
            conflict.mutations.remove(&party);
            info!(pair = %conflict.id, party = %party, "mutations restored");
            true
        } else {
            warn!(
                pair = %conflict.id,
                party = %party,
                outstanding = remaining.outstanding(),
                "restoration incomplete, will retry"
            );
            conflict.mutations.insert(party, remaining);
            false
        }
    }
}
