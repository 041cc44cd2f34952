//! Integration tests for restart recovery of the conflict store.
//!
//! These tests validate that enforcement survives a process restart:
//! - Engine mutates → flushes → restarts → pending restoration still runs
//! - Voice locks are released after a restart, by the sweep or by close
//! - Tamper audit dedup survives a restart
//! - Debounced writes reach disk without an explicit flush
//! - A corrupt snapshot fails loudly instead of starting empty

use cordon::config::{CommunitySettings, EngineSettings, EnforcementConfig};
use cordon::conflict::{now_ms, read_snapshot, ConflictStore, PairKey, StoreError};
use cordon::enforcement::ConflictEngine;
use cordon::platform::{
    ChannelId, CommunityId, GrantChange, GrantId, InboundMessage, MessageId, MockPlatform,
    OverrideKind, PartyId, VoiceStateChange,
};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

// === Test Fixtures ===

const COMMUNITY: CommunityId = CommunityId(0);
const U1: PartyId = PartyId(1001);
const U2: PartyId = PartyId(1002);
const MUTE: GrantId = GrantId(50);
const VOICE: ChannelId = ChannelId(700);
const AUDIT: ChannelId = ChannelId(900);

fn platform() -> MockPlatform {
    let platform = MockPlatform::new(PartyId(1), PartyId(2));
    platform.define(MUTE.0, "Muted", false, false);
    platform.define(11, "vip", false, true);
    platform.add_party(U1);
    platform.add_party(U2);
    platform.give(U1, &[11]);
    platform.add_channel(500, 0, false);
    platform.add_channel(VOICE.0, 0, true);
    platform.add_channel(AUDIT.0, 0, false);
    platform
}

fn settings() -> EngineSettings {
    EngineSettings::new(
        EnforcementConfig::default(),
        vec![CommunitySettings {
            audit_channel: Some(AUDIT),
            mute_grant: Some(MUTE),
            mute_duration_ms: 600_000,
            ..CommunitySettings::unconfigured(COMMUNITY)
        }],
    )
}

fn engine_at(platform: &MockPlatform, path: &Path, debounce: Duration) -> ConflictEngine<MockPlatform> {
    let store = ConflictStore::open(path, debounce).unwrap();
    ConflictEngine::new(platform.clone(), settings(), store)
}

fn mention(id: u64) -> InboundMessage {
    InboundMessage {
        id: MessageId(id),
        community: COMMUNITY,
        channel: ChannelId(500),
        author: U1,
        mentions: vec![U2],
        reply_to_author: None,
    }
}

// === Recovery ===

#[tokio::test]
async fn test_pending_restoration_survives_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("conflicts.cbor");
    let platform = platform();

    {
        let engine = engine_at(&platform, &path, Duration::from_secs(60));
        engine
            .create_conflict(COMMUNITY, U1, U2, PartyId(2), "spam")
            .await
            .unwrap();
        engine.handle_message(&mention(1)).await;
        engine.handle_message(&mention(2)).await;
        engine.flush().await.unwrap();
    }
    assert!(platform.holdings(U1).contains(&MUTE));
    assert!(!platform.holdings(U1).contains(&GrantId(11)));

    // Restart: a fresh engine over the same snapshot
    let engine = engine_at(&platform, &path, Duration::from_secs(60));
    let key = PairKey::new(U1, U2);
    let recovered = engine.get_conflict(&key).await.unwrap();
    assert_eq!(recovered.violations(U1), 2);
    assert!(recovered.mutations_of(U1).unwrap().restore_due_at.is_some());

    let report = engine.sweep_at(now_ms() + 600_001).await;

    assert_eq!(report.restorations, 1);
    assert!(!platform.holdings(U1).contains(&MUTE));
    assert!(platform.holdings(U1).contains(&GrantId(11)));
}

/// Lock U1 out of the voice channel U2 sits in, then flush and drop the engine.
async fn lock_then_restart(platform: &MockPlatform, path: &Path) -> ConflictEngine<MockPlatform> {
    {
        let engine = engine_at(platform, path, Duration::from_secs(60));
        engine
            .create_conflict(COMMUNITY, U1, U2, PartyId(2), "spam")
            .await
            .unwrap();
        platform.join_voice(U2, VOICE);
        platform.join_voice(U1, VOICE);
        engine
            .handle_voice_state(&VoiceStateChange {
                community: COMMUNITY,
                party: U1,
                channel: Some(VOICE),
            })
            .await;
        engine.flush().await.unwrap();
    }
    assert!(platform.has_override(VOICE, U1, OverrideKind::ConnectDeny));
    engine_at(platform, path, Duration::from_secs(60))
}

#[tokio::test]
async fn test_voice_lock_expires_after_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("conflicts.cbor");
    let platform = platform();

    let engine = lock_then_restart(&platform, &path).await;
    let locks = engine.active_locks().await;
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].party, U1);

    let report = engine.sweep_at(locks[0].expires_at).await;

    assert_eq!(report.locks_expired, 1);
    assert!(!platform.has_override(VOICE, U1, OverrideKind::ConnectDeny));
    assert!(engine.active_locks().await.is_empty());
}

#[tokio::test]
async fn test_close_after_restart_releases_voice_lock() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("conflicts.cbor");
    let platform = platform();

    let engine = lock_then_restart(&platform, &path).await;
    engine
        .close_conflict(&PairKey::new(U1, U2), PartyId(2))
        .await
        .unwrap();

    assert!(platform.overrides_for(U1).is_empty());
    assert!(engine.active_locks().await.is_empty());
}

#[tokio::test]
async fn test_tamper_entry_not_repeated_after_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("conflicts.cbor");
    let platform = platform();
    let unmute = || GrantChange {
        community: COMMUNITY,
        party: U1,
        old: [MUTE].into_iter().collect(),
        new: Default::default(),
    };

    {
        let engine = engine_at(&platform, &path, Duration::from_secs(60));
        engine
            .create_conflict(COMMUNITY, U1, U2, PartyId(2), "spam")
            .await
            .unwrap();
        engine.handle_message(&mention(1)).await;
        engine.handle_message(&mention(2)).await;
        platform.take(U1, MUTE);
        assert!(engine.handle_grant_change(&unmute()).await.mute_reasserted);
        engine.flush().await.unwrap();
    }

    let engine = engine_at(&platform, &path, Duration::from_secs(60));
    platform.take(U1, MUTE);
    assert!(engine.handle_grant_change(&unmute()).await.mute_reasserted);

    let entries = platform
        .logs()
        .iter()
        .filter(|(_, text)| text.starts_with("Enforcement tamper"))
        .count();
    assert_eq!(entries, 1);
}

#[tokio::test]
async fn test_debounced_write_reaches_disk() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("conflicts.cbor");
    let platform = platform();
    let engine = engine_at(&platform, &path, Duration::from_millis(20));

    engine
        .create_conflict(COMMUNITY, U1, U2, PartyId(2), "spam")
        .await
        .unwrap();
    engine.handle_message(&mention(1)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let on_disk = read_snapshot(&path).unwrap();
    assert_eq!(on_disk.len(), 1);
    assert_eq!(on_disk[&PairKey::new(U1, U2)].violations(U1), 1);
}

#[tokio::test]
async fn test_closed_conflict_is_gone_after_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("conflicts.cbor");
    let platform = platform();
    let key = PairKey::new(U1, U2);

    {
        let engine = engine_at(&platform, &path, Duration::from_secs(60));
        engine
            .create_conflict(COMMUNITY, U1, U2, PartyId(2), "spam")
            .await
            .unwrap();
        engine.flush().await.unwrap();
        engine.close_conflict(&key, PartyId(2)).await.unwrap();
        engine.flush().await.unwrap();
    }

    let engine = engine_at(&platform, &path, Duration::from_secs(60));
    assert!(engine.get_conflict(&key).await.is_none());
}

#[tokio::test]
async fn test_corrupt_snapshot_is_an_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("conflicts.cbor");
    std::fs::write(&path, b"definitely not cbor").unwrap();

    let result = ConflictStore::open(&path, Duration::from_millis(20));
    assert!(matches!(result, Err(StoreError::Serialization(_))));
}
