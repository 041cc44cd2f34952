//! Platform Integration Module
//!
//! The chat platform is an external collaborator. This module defines the
//! capabilities the engine consumes from it and an in-memory mock for tests.

pub mod mock;
pub mod traits;

pub use mock::MockPlatform;
pub use traits::{
    ChannelId, ChannelInfo, CommunityId, GrantChange, GrantId, GrantInfo, InboundMessage,
    MessageId, OverrideKind, PartyId, PlatformClient, PlatformError, PlatformEvent,
    PlatformResult, VoiceStateChange,
};
