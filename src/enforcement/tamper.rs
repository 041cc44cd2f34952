//! Tamper Guard
//!
//! Watches grant-change events for parties under enforcement:
//! - mute grant removed by someone without authority: re-applied at once
//! - previously removed grant handed back: removed again
//! - new grant matching the removal heuristics: removed proactively
//!
//! Audit entries for the first two cases are written once per party per
//! conflict, not per occurrence; the flags live on the conflict record.
//!
//! Once a party's restoration is due the guard stands down for them: the
//! grant changes seen from then on are the restoration itself.

use super::engine::{settle, ConflictEngine, Settled};
use super::mutation::{classify, RemovalClass};
use crate::conflict::{now_ms, Conflict};
use crate::platform::{CommunityId, GrantChange, GrantId, PartyId, PlatformClient};
use tracing::{debug, info, warn};

const TAMPER_REASON: &str = "Conflict enforcement: reversing unauthorized change";

/// Actions taken for one grant-change event, summed over conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TamperReport {
    pub mute_reasserted: bool,
    pub reremoved: usize,
    pub proactively_removed: usize,
}

impl<P: PlatformClient> ConflictEngine<P> {
    /// React to a change in a party's grant set.
    pub async fn handle_grant_change(&self, change: &GrantChange) -> TamperReport {
        let mut report = TamperReport::default();
        let party = change.party;
        if party == self.platform.enforcer_id() {
            return report;
        }

        let now = now_ms();
        let mut state = self.state.lock().await;
        let settings = self.settings.community(change.community);

        for mut conflict in state.store.involving(party) {
            if conflict.community != change.community || !conflict.under_enforcement(party) {
                continue;
            }
            if conflict.restoring(party, now) {
                debug!(pair = %conflict.id, party = %party, "restoration due, grant change left alone");
                continue;
            }

            if let Some(mute) = settings.mute_grant {
                let muted = conflict.mutations_of(party).map_or(false, |m| m.muted);
                if muted && change.old.contains(&mute) && !change.new.contains(&mute) {
                    if self.removal_authorized(change.community, party, mute).await {
                        info!(pair = %conflict.id, party = %party, "mute lifted by authorized actor");
                        conflict.mutations_mut(party).muted = false;
                    } else if self.reassert_mute(&mut conflict, party, mute).await {
                        report.mute_reasserted = true;
                    }
                }
            }

            let added: Vec<GrantId> = change
                .new
                .difference(&change.old)
                .copied()
                .filter(|g| Some(*g) != settings.mute_grant)
                .collect();

            let mut regained = Vec::new();
            for grant in added {
                let was_removed = conflict
                    .mutations_of(party)
                    .map_or(false, |m| m.was_removed(grant));
                if was_removed {
                    if self.take_back(&conflict, party, grant).await {
                        regained.push(grant);
                        report.reremoved += 1;
                    }
                } else if self.remove_if_matching(&mut conflict, party, grant).await {
                    report.proactively_removed += 1;
                }
            }

            if !regained.is_empty() && conflict.regrant_logged.insert(party) {
                let names = regained
                    .iter()
                    .map(|g| g.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.audit(
                    conflict.community,
                    &format!(
                        "Enforcement tamper: {} regained removed grant(s) {} during conflict {}; \
                         removed again",
                        party, names, conflict.id
                    ),
                )
                .await;
            }

            debug!(pair = %conflict.id, party = %party, ?report, "grant change evaluated");
            state.store.put(conflict);
        }

        report
    }

    /// True when whoever removed `grant` from `target` inside the tamper
    /// window is the owner, the enforcer itself or an oversight holder.
    ///
    /// A removal with no attributable actor is treated as unauthorized.
    async fn removal_authorized(&self, community: CommunityId, target: PartyId, grant: GrantId) -> bool {
        let window = self.settings.enforcement.tamper_window();
        let actor = match settle(
            self.platform
                .find_recent_actor(community, target, grant, window)
                .await,
            "query recent actor",
        ) {
            Settled::Done(Some(actor)) => actor,
            _ => return false,
        };

        if actor == self.platform.enforcer_id() {
            return true;
        }
        if let Settled::Done(owner) =
            settle(self.platform.community_owner(community).await, "fetch owner")
        {
            if actor == owner {
                return true;
            }
        }

        let oversight = self.settings.community(community).oversight_grants;
        if oversight.is_empty() {
            return false;
        }
        match settle(
            self.platform.party_grants(community, actor).await,
            "fetch actor grants",
        ) {
            Settled::Done(held) => oversight.iter().any(|g| held.contains(g)),
            _ => false,
        }
    }

    async fn reassert_mute(&self, conflict: &mut Conflict, party: PartyId, mute: GrantId) -> bool {
        let Settled::Done(()) = settle(
            self.platform
                .add_grant(conflict.community, party, mute, TAMPER_REASON)
                .await,
            "reassert mute grant",
        ) else {
            warn!(pair = %conflict.id, party = %party, "mute could not be reasserted");
            return false;
        };

        if conflict.tamper_logged.insert(party) {
            self.audit(
                conflict.community,
                &format!(
                    "Enforcement tamper: mute on {} was removed without authority during \
                     conflict {}; reapplied",
                    party, conflict.id
                ),
            )
            .await;
        }
        true
    }

    async fn take_back(&self, conflict: &Conflict, party: PartyId, grant: GrantId) -> bool {
        matches!(
            settle(
                self.platform
                    .remove_grant(conflict.community, party, grant, TAMPER_REASON)
                    .await,
                "re-remove regained grant",
            ),
            Settled::Done(())
        )
    }

    /// Evaluate a newly observed grant against the removal heuristics.
    async fn remove_if_matching(&self, conflict: &mut Conflict, party: PartyId, grant: GrantId) -> bool {
        let strict = conflict.mutations_of(party).map_or(false, |m| m.strict_mode);
        let info = match settle(
            self.platform.grant_info(conflict.community, grant).await,
            "fetch grant info",
        ) {
            Settled::Done(info) if info.manageable => info,
            _ => return false,
        };
        let Some(class) = classify(&info, strict, self.settings.enforcement.short_name_max) else {
            return false;
        };

        if let Settled::Done(()) = settle(
            self.platform
                .remove_grant(conflict.community, party, grant, TAMPER_REASON)
                .await,
            "remove new grant",
        ) {
            let m = conflict.mutations_mut(party);
            match class {
                RemovalClass::Privileged => m.removed_privileged.insert(grant),
                RemovalClass::Communicate => m.removed_comm.insert(grant),
            };
            info!(pair = %conflict.id, party = %party, grant = %grant, "new grant removed while under enforcement");
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommunitySettings, EngineSettings, EnforcementConfig};
    use crate::conflict::{ConflictStore, PairKey};
    use crate::platform::{ChannelId, MockPlatform};
    use std::collections::BTreeSet;

    const COMMUNITY: CommunityId = CommunityId(0);
    const U1: PartyId = PartyId(100);
    const U2: PartyId = PartyId(200);
    const MUTE: GrantId = GrantId(50);
    const OVERSIGHT: GrantId = GrantId(60);
    const AUDIT: ChannelId = ChannelId(900);

    /// Engine with U1 already muted and stripped of grant 11.
    async fn enforced() -> (MockPlatform, ConflictEngine<MockPlatform>) {
        enforced_at(now_ms()).await
    }

    /// Same, with the mutations applied at `applied_at`.
    async fn enforced_at(applied_at: u64) -> (MockPlatform, ConflictEngine<MockPlatform>) {
        let platform = MockPlatform::new(PartyId(1), PartyId(2));
        platform.define(MUTE.0, "Muted", false, false);
        platform.define(OVERSIGHT.0, "Oversight", false, false);
        platform.define(10, "admin", true, false);
        platform.define(11, "ab", false, true);
        platform.define(12, "regulars", false, true);
        platform.add_party(U1);
        platform.add_party(U2);
        platform.add_party(PartyId(300));
        platform.add_party(PartyId(400));
        platform.give(U1, &[11]);
        platform.give(PartyId(300), &[OVERSIGHT.0]);
        platform.add_channel(AUDIT.0, 0, false);

        let settings = EngineSettings::new(
            EnforcementConfig::default(),
            vec![CommunitySettings {
                audit_channel: Some(AUDIT),
                mute_grant: Some(MUTE),
                mute_duration_ms: 600_000,
                oversight_grants: vec![OVERSIGHT],
                ..CommunitySettings::unconfigured(COMMUNITY)
            }],
        );
        let mut store = ConflictStore::in_memory();
        store.create(COMMUNITY, U1, U2, PartyId(2), "test", 0);
        let engine = ConflictEngine::new(platform.clone(), settings, store);

        {
            let mut state = engine.state.lock().await;
            let key = PairKey::new(U1, U2);
            let mut conflict = state.store.get(&key).cloned().unwrap();
            assert!(engine.apply_mutations(&mut conflict, U1, None, false, applied_at).await);
            state.store.put(conflict);
        }
        assert!(platform.holdings(U1).contains(&MUTE));
        (platform, engine)
    }

    fn change(old: &[u64], new: &[u64]) -> GrantChange {
        GrantChange {
            community: COMMUNITY,
            party: U1,
            old: old.iter().map(|g| GrantId(*g)).collect::<BTreeSet<_>>(),
            new: new.iter().map(|g| GrantId(*g)).collect::<BTreeSet<_>>(),
        }
    }

    fn tamper_entries(platform: &MockPlatform) -> usize {
        platform
            .logs()
            .iter()
            .filter(|(_, text)| text.starts_with("Enforcement tamper"))
            .count()
    }

    #[tokio::test]
    async fn test_unauthorized_unmute_is_reasserted_and_logged_once() {
        let (platform, engine) = enforced().await;
        platform.set_recent_actor(U1, MUTE, PartyId(400));

        for _ in 0..2 {
            platform.take(U1, MUTE);
            let report = engine.handle_grant_change(&change(&[50], &[])).await;
            assert!(report.mute_reasserted);
            assert!(platform.holdings(U1).contains(&MUTE));
        }

        assert_eq!(tamper_entries(&platform), 1);
    }

    #[tokio::test]
    async fn test_unattributed_unmute_is_unauthorized() {
        let (platform, engine) = enforced().await;
        platform.take(U1, MUTE);

        let report = engine.handle_grant_change(&change(&[50], &[])).await;

        assert!(report.mute_reasserted);
        assert!(platform.holdings(U1).contains(&MUTE));
    }

    #[tokio::test]
    async fn test_authorized_unmute_is_respected() {
        for actor in [PartyId(2), PartyId(300), PartyId(1)] {
            let (platform, engine) = enforced().await;
            platform.set_recent_actor(U1, MUTE, actor);
            platform.take(U1, MUTE);

            let report = engine.handle_grant_change(&change(&[50], &[])).await;

            assert!(!report.mute_reasserted, "actor {} should be authorized", actor);
            assert!(!platform.holdings(U1).contains(&MUTE));
            let conflict = engine.get_conflict(&PairKey::new(U1, U2)).await.unwrap();
            assert!(!conflict.mutations_of(U1).unwrap().muted);
        }
    }

    #[tokio::test]
    async fn test_regained_grant_is_removed_again() {
        let (platform, engine) = enforced().await;

        for _ in 0..2 {
            platform.give(U1, &[11]);
            let report = engine.handle_grant_change(&change(&[50], &[50, 11])).await;
            assert_eq!(report.reremoved, 1);
            assert!(!platform.holdings(U1).contains(&GrantId(11)));
        }

        assert_eq!(tamper_entries(&platform), 1);
    }

    #[tokio::test]
    async fn test_new_matching_grant_is_removed_proactively() {
        let (platform, engine) = enforced().await;
        platform.give(U1, &[10, 12]);

        let report = engine.handle_grant_change(&change(&[50], &[50, 10, 12])).await;

        assert_eq!(report.proactively_removed, 1);
        let held = platform.holdings(U1);
        assert!(!held.contains(&GrantId(10)));
        assert!(held.contains(&GrantId(12)));
        let conflict = engine.get_conflict(&PairKey::new(U1, U2)).await.unwrap();
        assert!(conflict.mutations_of(U1).unwrap().removed_privileged.contains(&GrantId(10)));
    }

    #[tokio::test]
    async fn test_party_without_enforcement_is_ignored() {
        let (platform, engine) = enforced().await;
        platform.give(U2, &[10]);

        let report = engine
            .handle_grant_change(&GrantChange {
                party: U2,
                ..change(&[], &[10])
            })
            .await;

        assert_eq!(report, TamperReport::default());
        assert!(platform.holdings(U2).contains(&GrantId(10)));
    }

    #[tokio::test]
    async fn test_dedup_flags_are_kept_on_the_record() {
        let (platform, engine) = enforced().await;
        platform.take(U1, MUTE);
        engine.handle_grant_change(&change(&[50], &[])).await;

        let conflict = engine.get_conflict(&PairKey::new(U1, U2)).await.unwrap();
        assert!(conflict.tamper_logged.contains(&U1));
        assert!(conflict.regrant_logged.is_empty());
    }

    #[tokio::test]
    async fn test_partial_restoration_keeps_restored_grants() {
        // Mute period already over
        let (platform, engine) = enforced_at(now_ms() - 700_000).await;
        platform.fail_grant(MUTE, true);

        let before = platform.holdings(U1);
        assert_eq!(engine.sweep().await.restorations, 1);
        let after = platform.holdings(U1);
        assert!(after.contains(&GrantId(11)));
        assert!(after.contains(&MUTE));

        // The platform reports the re-grant back to the engine
        let report = engine
            .handle_grant_change(&GrantChange {
                community: COMMUNITY,
                party: U1,
                old: before,
                new: after,
            })
            .await;

        assert_eq!(report, TamperReport::default());
        assert!(platform.holdings(U1).contains(&GrantId(11)));
        let conflict = engine.get_conflict(&PairKey::new(U1, U2)).await.unwrap();
        assert!(conflict.mutations_of(U1).unwrap().muted);
    }
}
