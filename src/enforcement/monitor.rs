//! Violation Monitor
//!
//! Classifies inbound messages from conflict parties as contact attempts
//! (mention of, or reply to, the other party) and drives escalation:
//!
//! | Targeted message | Effect |
//! |------------------|--------|
//! | 1st | Warning: message kept, count = 1 |
//! | 2nd+ | Message deleted, count incremented |
//! | count > mute threshold | Mute + grant removal |
//! | count > strict threshold | Strict mode (all communicate grants) |
//!
//! Parties that outrank the enforcer are never mutated; their repeat
//! violations still get deleted and a one-time oversight notice goes out.

use super::engine::{settle, ConflictEngine, Settled};
use super::notices::{contacted_text, removed_text, warning_text};
use crate::conflict::{now_ms, Conflict};
use crate::platform::{InboundMessage, PartyId, PlatformClient};
use tracing::info;

/// What happened to one targeted message, per conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationOutcome {
    /// First contact: warning only, message kept
    Warned,
    /// Message deleted, no mutation (below threshold or warning-only mode)
    Deleted { count: u32 },
    /// Message deleted and mutations applied
    Enforced { count: u32, strict: bool },
    /// Message deleted; party outranks the enforcer so oversight was told instead
    Exempt { count: u32 },
}

impl<P: PlatformClient> ConflictEngine<P> {
    /// Evaluate an inbound message against every conflict of its author.
    pub async fn handle_message(&self, message: &InboundMessage) -> Vec<ViolationOutcome> {
        if message.author == self.platform.enforcer_id() {
            return Vec::new();
        }

        let mut state = self.state.lock().await;
        let mut outcomes = Vec::new();

        for mut conflict in state.store.involving(message.author) {
            if conflict.community != message.community {
                continue;
            }
            let Some(other) = conflict.counterpart(message.author) else {
                continue;
            };
            if !message.targets(other) {
                continue;
            }

            let outcome = self.record_violation(&mut conflict, message, other).await;
            info!(
                pair = %conflict.id,
                party = %message.author,
                ?outcome,
                "contact attempt handled"
            );
            outcomes.push(outcome);
            state.store.put(conflict);
        }

        outcomes
    }

    async fn record_violation(
        &self,
        conflict: &mut Conflict,
        message: &InboundMessage,
        other: PartyId,
    ) -> ViolationOutcome {
        let author = message.author;

        if !conflict.has_responded(author) {
            conflict.violation_counts.insert(author, 1);
            conflict.responded_once.insert(author, true);
            self.notify(author, &warning_text(other)).await;
            self.notify(other, &contacted_text(author, 1)).await;
            self.update_running_log(conflict).await;
            return ViolationOutcome::Warned;
        }

        let count = conflict.violations(author).saturating_add(1);
        conflict.violation_counts.insert(author, count);

        // Deletion failures are logged by settle; the counter still advances
        let _ = settle(
            self.platform.delete_message(message.channel, message.id).await,
            "delete violating message",
        );

        let exempt = matches!(
            settle(
                self.platform
                    .outranks(conflict.community, author, self.platform.enforcer_id())
                    .await,
                "compare standing",
            ),
            Settled::Done(true)
        );

        let thresholds = &self.settings.enforcement;
        let outcome = if exempt {
            if !conflict.oversight_notified.get(&author).copied().unwrap_or(false) {
                let text = format!(
                    "{} outranks the moderation bot and keeps contacting {} in conflict {} \
                     (violation {}). Their messages are being removed but no mute can be applied.",
                    author, other, conflict.id, count
                );
                self.notify_oversight(conflict.community, &text).await;
                conflict.oversight_notified.insert(author, true);
            }
            self.notify(author, &removed_text(count, false)).await;
            ViolationOutcome::Exempt { count }
        } else if count > thresholds.mute_threshold {
            let strict = count > thresholds.strict_threshold;
            let enforced = self
                .apply_mutations(conflict, author, Some(message.channel), strict, now_ms())
                .await;
            self.notify(author, &removed_text(count, enforced)).await;
            if enforced {
                ViolationOutcome::Enforced { count, strict }
            } else {
                ViolationOutcome::Deleted { count }
            }
        } else {
            self.notify(author, &removed_text(count, false)).await;
            ViolationOutcome::Deleted { count }
        };

        self.notify(other, &contacted_text(author, count)).await;
        self.update_running_log(conflict).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommunitySettings, EngineSettings, EnforcementConfig};
    use crate::conflict::{ConflictStore, PairKey};
    use crate::platform::{ChannelId, CommunityId, GrantId, MessageId, MockPlatform};

    const COMMUNITY: CommunityId = CommunityId(0);
    const U1: PartyId = PartyId(100);
    const U2: PartyId = PartyId(200);
    const MUTE: GrantId = GrantId(50);
    const OVERSIGHT: GrantId = GrantId(60);
    const AUDIT: ChannelId = ChannelId(900);

    fn engine(mute: Option<GrantId>) -> (MockPlatform, ConflictEngine<MockPlatform>) {
        let platform = MockPlatform::new(PartyId(1), PartyId(2));
        platform.define(MUTE.0, "Muted", false, false);
        platform.define(OVERSIGHT.0, "Oversight", false, true);
        platform.define(11, "ab", false, true);
        platform.add_party(U1);
        platform.add_party(U2);
        platform.add_party(PartyId(300));
        platform.give(U1, &[11]);
        platform.give(PartyId(300), &[OVERSIGHT.0]);
        platform.add_channel(500, 0, false);
        platform.add_channel(AUDIT.0, 0, false);

        let settings = EngineSettings::new(
            EnforcementConfig::default(),
            vec![CommunitySettings {
                audit_channel: Some(AUDIT),
                mute_grant: mute,
                mute_duration_ms: 600_000,
                oversight_grants: vec![OVERSIGHT],
                ..CommunitySettings::unconfigured(COMMUNITY)
            }],
        );
        let mut store = ConflictStore::in_memory();
        store.create(COMMUNITY, U1, U2, PartyId(2), "test", 0);
        (platform.clone(), ConflictEngine::new(platform, settings, store))
    }

    fn mention(id: u64, author: PartyId, target: PartyId) -> InboundMessage {
        InboundMessage {
            id: MessageId(id),
            community: COMMUNITY,
            channel: ChannelId(500),
            author,
            mentions: vec![target],
            reply_to_author: None,
        }
    }

    async fn conflict(engine: &ConflictEngine<MockPlatform>) -> Conflict {
        engine.get_conflict(&PairKey::new(U1, U2)).await.unwrap()
    }

    #[tokio::test]
    async fn test_first_contact_is_warning_only() {
        let (platform, engine) = engine(Some(MUTE));

        let outcomes = engine.handle_message(&mention(1, U1, U2)).await;

        assert_eq!(outcomes, vec![ViolationOutcome::Warned]);
        assert!(platform.deleted_messages().is_empty());
        let c = conflict(&engine).await;
        assert_eq!(c.violations(U1), 1);
        assert!(c.has_responded(U1));
        assert_eq!(platform.notices_for(U1).len(), 1);
        assert_eq!(platform.notices_for(U2).len(), 1);
    }

    #[tokio::test]
    async fn test_escalation_sequence() {
        let (platform, engine) = engine(Some(MUTE));

        engine.handle_message(&mention(1, U1, U2)).await;
        let second = engine.handle_message(&mention(2, U1, U2)).await;
        let third = engine.handle_message(&mention(3, U1, U2)).await;

        assert_eq!(second, vec![ViolationOutcome::Enforced { count: 2, strict: false }]);
        assert_eq!(third, vec![ViolationOutcome::Enforced { count: 3, strict: true }]);
        assert_eq!(platform.deleted_messages(), vec![MessageId(2), MessageId(3)]);
        assert!(platform.holdings(U1).contains(&MUTE));
        assert!(!platform.holdings(U1).contains(&GrantId(11)));

        let c = conflict(&engine).await;
        assert_eq!(c.violations(U1), 3);
        assert!(c.is_escalated(U1));
        assert!(!c.is_escalated(U2));
        assert!(c.mutations_of(U1).unwrap().strict_mode);
    }

    #[tokio::test]
    async fn test_reply_counts_as_contact_and_unrelated_message_does_not() {
        let (_platform, engine) = engine(Some(MUTE));

        let unrelated = InboundMessage {
            mentions: vec![PartyId(300)],
            ..mention(1, U1, U2)
        };
        assert!(engine.handle_message(&unrelated).await.is_empty());

        let reply = InboundMessage {
            mentions: vec![],
            reply_to_author: Some(U1),
            ..mention(2, U2, U1)
        };
        assert_eq!(engine.handle_message(&reply).await, vec![ViolationOutcome::Warned]);
        assert_eq!(conflict(&engine).await.violations(U2), 1);
        assert_eq!(conflict(&engine).await.violations(U1), 0);
    }

    #[tokio::test]
    async fn test_running_log_updated_in_place() {
        let (platform, engine) = engine(Some(MUTE));

        for id in 1..=4 {
            engine.handle_message(&mention(id, U1, U2)).await;
        }

        assert_eq!(platform.log_posts(), 1);
        let logs = platform.logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].1.contains("4 violation(s)"));
    }

    #[tokio::test]
    async fn test_running_log_reposted_when_deleted() {
        let (platform, engine) = engine(Some(MUTE));
        engine.handle_message(&mention(1, U1, U2)).await;
        let log_ref = conflict(&engine).await.log_ref.unwrap();

        platform.delete_log(log_ref);
        engine.handle_message(&mention(2, U1, U2)).await;

        assert_eq!(platform.log_posts(), 2);
        assert_ne!(conflict(&engine).await.log_ref, Some(log_ref));
    }

    #[tokio::test]
    async fn test_high_privilege_party_is_exempt_from_mutation() {
        let (platform, engine) = engine(Some(MUTE));
        platform.set_outranks(U1);

        engine.handle_message(&mention(1, U1, U2)).await;
        let second = engine.handle_message(&mention(2, U1, U2)).await;
        let third = engine.handle_message(&mention(3, U1, U2)).await;

        assert_eq!(second, vec![ViolationOutcome::Exempt { count: 2 }]);
        assert_eq!(third, vec![ViolationOutcome::Exempt { count: 3 }]);
        assert_eq!(platform.deleted_messages(), vec![MessageId(2), MessageId(3)]);
        assert!(!platform.holdings(U1).contains(&MUTE));
        assert!(platform.holdings(U1).contains(&GrantId(11)));
        // Oversight told exactly once
        assert_eq!(platform.notices_for(PartyId(300)).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_mute_grant_degrades_to_warning_only() {
        let (platform, engine) = engine(None);

        engine.handle_message(&mention(1, U1, U2)).await;
        let second = engine.handle_message(&mention(2, U1, U2)).await;

        assert_eq!(second, vec![ViolationOutcome::Deleted { count: 2 }]);
        assert_eq!(platform.deleted_messages(), vec![MessageId(2)]);
        assert!(platform.holdings(U1).contains(&GrantId(11)));
        assert!(conflict(&engine).await.mutations.is_empty());
    }

    #[tokio::test]
    async fn test_failed_notices_do_not_block_counters() {
        let (platform, engine) = engine(Some(MUTE));
        platform.fail_notices(true);

        engine.handle_message(&mention(1, U1, U2)).await;
        engine.handle_message(&mention(2, U1, U2)).await;

        assert_eq!(conflict(&engine).await.violations(U1), 2);
        assert!(platform.holdings(U1).contains(&MUTE));
    }

    #[tokio::test]
    async fn test_enforcer_messages_are_ignored() {
        let (_platform, engine) = engine(Some(MUTE));
        assert!(engine.handle_message(&mention(1, PartyId(1), U2)).await.is_empty());
    }
}
