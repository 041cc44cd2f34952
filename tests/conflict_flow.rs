//! End-to-end conflict flows against the mock platform.
//!
//! Covers:
//! - Warning, escalation and timed restoration for one offending party
//! - Close leaves zero outstanding mutations behind
//! - Reset sweep clears counters without touching mutations or locks
//! - Event dispatch through `handle_event`

use cordon::config::{CommunitySettings, EngineSettings, EnforcementConfig};
use cordon::conflict::{now_ms, ConflictStore, PairKey};
use cordon::enforcement::{ConflictEngine, ViolationOutcome};
use cordon::platform::{
    ChannelId, CommunityId, GrantId, InboundMessage, MessageId, MockPlatform, OverrideKind,
    PartyId, PlatformEvent, VoiceStateChange,
};

// === Test Fixtures ===

const COMMUNITY: CommunityId = CommunityId(0);
const U1: PartyId = PartyId(1001);
const U2: PartyId = PartyId(1002);
const MODERATOR: PartyId = PartyId(2);
const MUTE: GrantId = GrantId(50);
const CHAT: ChannelId = ChannelId(500);
const VOICE: ChannelId = ChannelId(700);
const AUDIT: ChannelId = ChannelId(900);
const MUTE_DURATION_MS: u64 = 600_000;

/// U1 holds an administrative grant, a short-named communicate grant and a
/// long-named one that normal mode leaves alone.
fn setup() -> (MockPlatform, ConflictEngine<MockPlatform>) {
    let platform = MockPlatform::new(PartyId(1), MODERATOR);
    platform.define(MUTE.0, "Muted", false, false);
    platform.define(10, "Moderators", true, true);
    platform.define(11, "vip", false, true);
    platform.define(12, "long time members", false, true);
    platform.add_party(U1);
    platform.add_party(U2);
    platform.give(U1, &[10, 11, 12]);
    platform.add_channel(CHAT.0, 0, false);
    platform.add_channel(VOICE.0, 0, true);
    platform.add_channel(AUDIT.0, 0, false);

    let settings = EngineSettings::new(
        EnforcementConfig::default(),
        vec![CommunitySettings {
            audit_channel: Some(AUDIT),
            mute_grant: Some(MUTE),
            mute_duration_ms: MUTE_DURATION_MS,
            ..CommunitySettings::unconfigured(COMMUNITY)
        }],
    );
    let engine = ConflictEngine::new(platform.clone(), settings, ConflictStore::in_memory());
    (platform, engine)
}

fn mention(id: u64, author: PartyId, target: PartyId) -> InboundMessage {
    InboundMessage {
        id: MessageId(id),
        community: COMMUNITY,
        channel: CHAT,
        author,
        mentions: vec![target],
        reply_to_author: None,
    }
}

// === Flows ===

#[tokio::test]
async fn test_warn_escalate_and_restore_after_mute_duration() {
    let (platform, engine) = setup();
    let original = platform.holdings(U1);
    let key = PairKey::new(U1, U2);
    engine
        .create_conflict(COMMUNITY, U1, U2, MODERATOR, "harassment")
        .await
        .unwrap();

    // First mention: warning only
    let first = engine.handle_message(&mention(1, U1, U2)).await;
    assert_eq!(first, vec![ViolationOutcome::Warned]);
    assert!(platform.deleted_messages().is_empty());
    assert_eq!(engine.get_conflict(&key).await.unwrap().violations(U1), 1);

    // Second mention: deleted, muted, short-named grants removed
    let second = engine.handle_message(&mention(2, U1, U2)).await;
    assert_eq!(second, vec![ViolationOutcome::Enforced { count: 2, strict: false }]);
    assert_eq!(platform.deleted_messages(), vec![MessageId(2)]);
    let held = platform.holdings(U1);
    assert!(held.contains(&MUTE));
    assert!(!held.contains(&GrantId(10)));
    assert!(!held.contains(&GrantId(11)));
    assert!(held.contains(&GrantId(12)));

    let conflict = engine.get_conflict(&key).await.unwrap();
    assert_eq!(conflict.violations(U1), 2);
    let m = conflict.mutations_of(U1).unwrap();
    assert!(m.removed_privileged.contains(&GrantId(10)));
    assert!(m.removed_comm.contains(&GrantId(11)));

    // Nothing is restored before the mute duration elapses
    assert_eq!(engine.sweep_at(now_ms()).await.restorations, 0);
    assert!(platform.holdings(U1).contains(&MUTE));

    // After the mute duration every removal is reversed and the mute lifted
    let report = engine.sweep_at(now_ms() + MUTE_DURATION_MS + 1).await;
    assert_eq!(report.restorations, 1);
    assert_eq!(platform.holdings(U1), original);
    assert!(platform.overrides_for(U1).is_empty());
    assert_eq!(engine.get_conflict(&key).await.unwrap().outstanding_mutations(), 0);
}

#[tokio::test]
async fn test_close_leaves_nothing_outstanding() {
    let (platform, engine) = setup();
    let original = platform.holdings(U1);
    let key = PairKey::new(U1, U2);
    engine
        .create_conflict(COMMUNITY, U1, U2, MODERATOR, "harassment")
        .await
        .unwrap();

    for id in 1..=4 {
        engine.handle_message(&mention(id, U1, U2)).await;
    }
    platform.join_voice(U2, VOICE);
    platform.join_voice(U1, VOICE);
    engine
        .handle_event(PlatformEvent::VoiceState(VoiceStateChange {
            community: COMMUNITY,
            party: U1,
            channel: Some(VOICE),
        }))
        .await;
    assert!(platform.has_override(VOICE, U1, OverrideKind::ConnectDeny));

    let closed = engine.close_conflict(&key, MODERATOR).await.unwrap();

    assert_eq!(closed.outstanding_mutations(), 0);
    assert_eq!(platform.holdings(U1), original);
    assert!(platform.overrides_for(U1).is_empty());
    assert!(engine.active_locks().await.is_empty());
    assert!(engine.list_conflicts_involving(U1).await.is_empty());

    // Audit trail carries the opening and closing entries
    let logs: Vec<String> = platform.logs().into_iter().map(|(_, text)| text).collect();
    assert!(logs.iter().any(|t| t.starts_with("Conflict opened")));
    assert!(logs.iter().any(|t| t.starts_with("Conflict closed")));
}

#[tokio::test]
async fn test_reset_keeps_mutations_and_locks() {
    let (platform, engine) = setup();
    let key = PairKey::new(U1, U2);
    engine
        .create_conflict(COMMUNITY, U1, U2, MODERATOR, "harassment")
        .await
        .unwrap();
    engine.handle_message(&mention(1, U1, U2)).await;
    engine.handle_message(&mention(2, U1, U2)).await;
    platform.join_voice(U2, VOICE);
    platform.join_voice(U1, VOICE);
    engine
        .handle_voice_state(&VoiceStateChange {
            community: COMMUNITY,
            party: U1,
            channel: Some(VOICE),
        })
        .await;
    let before = engine.get_conflict(&key).await.unwrap();

    let reset = engine.reset_sweep_at(now_ms() + 86_400_000).await;

    assert_eq!(reset, vec![key.clone()]);
    let after = engine.get_conflict(&key).await.unwrap();
    assert_eq!(after.violations(U1), 0);
    assert!(!after.has_responded(U1));
    assert!(!after.voice_warned(U1));
    assert_eq!(after.mutations, before.mutations);
    assert_eq!(engine.active_locks().await.len(), 1);

    // Counters start over: the next mention is a warning again
    let next = engine.handle_message(&mention(3, U1, U2)).await;
    assert_eq!(next, vec![ViolationOutcome::Warned]);
}

#[tokio::test]
async fn test_queued_events_dispatch_to_components() {
    let (platform, engine) = setup();
    engine
        .create_conflict(COMMUNITY, U1, U2, MODERATOR, "harassment")
        .await
        .unwrap();
    engine.handle_message(&mention(1, U1, U2)).await;
    engine.handle_message(&mention(2, U1, U2)).await;

    // Someone hands the short-named grant back
    platform.give(U1, &[11]);
    let mut old = platform.holdings(U1);
    old.remove(&GrantId(11));
    engine
        .handle_event(PlatformEvent::GrantsChanged(cordon::platform::GrantChange {
            community: COMMUNITY,
            party: U1,
            old,
            new: platform.holdings(U1),
        }))
        .await;

    assert!(!platform.holdings(U1).contains(&GrantId(11)));
}
