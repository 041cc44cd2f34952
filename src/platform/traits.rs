//! Platform Client Trait Abstractions
//!
//! The enforcement engine never talks to a chat platform directly. Everything it
//! needs (grant directory, channel overrides, voice presence, message delivery,
//! audit trail) goes through [`PlatformClient`], which lets `MockPlatform` stand
//! in for the real client in every test.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake!(
    /// A participant on the platform (member or bot account)
    PartyId
);
snowflake!(
    /// A privilege grant (role) that can be held by a party
    GrantId
);
snowflake!(
    /// A text or voice channel
    ChannelId
);
snowflake!(
    /// A community (guild) hosting channels and grants
    CommunityId
);
snowflake!(
    /// A delivered message, including log records posted by the engine
    MessageId
);

/// Directory information about a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantInfo {
    pub id: GrantId,
    pub name: String,
    /// Grant confers administrative-equivalent power (administrator, manage roles, ...)
    pub administrative: bool,
    /// Grant lets the holder send messages or speak somewhere
    pub can_communicate: bool,
    /// Enforcer is able to add/remove this grant (position and integration checks)
    pub manageable: bool,
}

/// Channel metadata used for the override grace period and voice checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub community: CommunityId,
    /// Creation time, milliseconds since UNIX epoch
    pub created_at: u64,
    pub voice_capable: bool,
}

/// Channel-scoped deny override kinds installed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OverrideKind {
    /// Deny sending messages / speaking in the channel
    CommunicateDeny,
    /// Deny connecting to a voice channel
    ConnectDeny,
}

/// Inbound message as delivered by the platform.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub community: CommunityId,
    pub channel: ChannelId,
    pub author: PartyId,
    pub mentions: Vec<PartyId>,
    /// Author of the message this one replies to, if any
    pub reply_to_author: Option<PartyId>,
}

impl InboundMessage {
    /// Whether the message mentions or replies to `party`.
    pub fn targets(&self, party: PartyId) -> bool {
        self.mentions.contains(&party) || self.reply_to_author == Some(party)
    }
}

/// Voice presence change. `channel` is `None` when the party left voice.
#[derive(Debug, Clone)]
pub struct VoiceStateChange {
    pub community: CommunityId,
    pub party: PartyId,
    pub channel: Option<ChannelId>,
}

/// Grant set change observed for a party.
#[derive(Debug, Clone)]
pub struct GrantChange {
    pub community: CommunityId,
    pub party: PartyId,
    pub old: BTreeSet<GrantId>,
    pub new: BTreeSet<GrantId>,
}

/// Events the platform delivers to the engine.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    Message(InboundMessage),
    VoiceState(VoiceStateChange),
    GrantsChanged(GrantChange),
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Platform client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// Party, channel, grant or message no longer exists
    #[error("Not found: {0}")]
    NotFound(String),

    /// Call failed but may succeed later (rate limit, network, 5xx)
    #[error("Transient platform error: {0}")]
    Transient(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }
}

/// Platform client abstraction consumed by the enforcement engine.
#[async_trait]
pub trait PlatformClient: Send + Sync + 'static {
    /// Identity the engine enforces as
    fn enforcer_id(&self) -> PartyId;

    async fn community_owner(&self, community: CommunityId) -> PlatformResult<PartyId>;

    /// Whether `party`'s standing outranks `enforcer` (capability comparison).
    async fn outranks(
        &self,
        community: CommunityId,
        party: PartyId,
        enforcer: PartyId,
    ) -> PlatformResult<bool>;

    /// Grants currently held by a party
    async fn party_grants(
        &self,
        community: CommunityId,
        party: PartyId,
    ) -> PlatformResult<BTreeSet<GrantId>>;

    async fn grant_info(&self, community: CommunityId, grant: GrantId) -> PlatformResult<GrantInfo>;

    async fn add_grant(
        &self,
        community: CommunityId,
        party: PartyId,
        grant: GrantId,
        reason: &str,
    ) -> PlatformResult<()>;

    async fn remove_grant(
        &self,
        community: CommunityId,
        party: PartyId,
        grant: GrantId,
        reason: &str,
    ) -> PlatformResult<()>;

    async fn channel_info(&self, channel: ChannelId) -> PlatformResult<ChannelInfo>;

    async fn set_channel_override(
        &self,
        channel: ChannelId,
        party: PartyId,
        kind: OverrideKind,
    ) -> PlatformResult<()>;

    async fn delete_channel_override(
        &self,
        channel: ChannelId,
        party: PartyId,
        kind: OverrideKind,
    ) -> PlatformResult<()>;

    /// Voice channel the party is currently connected to
    async fn voice_channel_of(
        &self,
        community: CommunityId,
        party: PartyId,
    ) -> PlatformResult<Option<ChannelId>>;

    /// Disconnect a party from whatever voice channel it is in
    async fn evict_from_voice(&self, community: CommunityId, party: PartyId) -> PlatformResult<()>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> PlatformResult<()>;

    async fn send_private_notice(&self, party: PartyId, text: &str) -> PlatformResult<()>;

    /// Post a log record to a channel, returning its reference for later edits
    async fn post_log(&self, channel: ChannelId, text: &str) -> PlatformResult<MessageId>;

    async fn edit_log(&self, channel: ChannelId, message: MessageId, text: &str)
        -> PlatformResult<()>;

    /// Most recent actor that changed `grant` on `target` within `window`.
    ///
    /// Audit-trail correlation is a heuristic: an unrelated change inside the
    /// window can be misattributed.
    async fn find_recent_actor(
        &self,
        community: CommunityId,
        target: PartyId,
        grant: GrantId,
        window: Duration,
    ) -> PlatformResult<Option<PartyId>>;

    async fn parties_with_grant(
        &self,
        community: CommunityId,
        grant: GrantId,
    ) -> PlatformResult<Vec<PartyId>>;

    /// Drain pending events (empty when nothing arrived)
    async fn receive_events(&self) -> PlatformResult<Vec<PlatformEvent>>;
}
