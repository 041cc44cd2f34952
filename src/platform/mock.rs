//! Mock Platform Client for Testing
//!
//! Provides MockPlatform: a single-community, in-memory platform that records
//! every side effect so tests can assert on grants, overrides, notices and logs.

use super::traits::*;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock platform client for testing
#[derive(Clone)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
    enforcer: PartyId,
}

#[derive(Default)]
struct MockState {
    owner: PartyId,
    grants: HashMap<GrantId, GrantInfo>,
    /// Party exists iff it has an entry (possibly empty)
    holdings: HashMap<PartyId, BTreeSet<GrantId>>,
    outranking: HashSet<PartyId>,
    channels: HashMap<ChannelId, ChannelInfo>,
    overrides: BTreeSet<(ChannelId, PartyId, OverrideKind)>,
    voice: HashMap<PartyId, ChannelId>,
    evictions: Vec<PartyId>,
    deleted_messages: Vec<MessageId>,
    notices: Vec<(PartyId, String)>,
    logs: BTreeMap<MessageId, (ChannelId, String)>,
    log_posts: usize,
    recent_actors: HashMap<(PartyId, GrantId), PartyId>,
    failing_grants: HashSet<GrantId>,
    fail_holdings: bool,
    fail_notices: bool,
    events: Vec<PlatformEvent>,
    next_message_id: u64,
}

impl MockPlatform {
    /// Create new mock platform enforcing as `enforcer`, community owned by `owner`
    pub fn new(enforcer: PartyId, owner: PartyId) -> Self {
        let state = MockState {
            owner,
            next_message_id: 1,
            ..Default::default()
        };
        let mock = Self {
            state: Arc::new(Mutex::new(state)),
            enforcer,
        };
        mock.add_party(enforcer);
        mock.add_party(owner);
        mock
    }

    /// Register a grant in the directory
    pub fn define_grant(&self, info: GrantInfo) {
        self.state.lock().unwrap().grants.insert(info.id, info);
    }

    /// Shorthand for a manageable grant definition
    pub fn define(&self, id: u64, name: &str, administrative: bool, can_communicate: bool) {
        self.define_grant(GrantInfo {
            id: GrantId(id),
            name: name.to_string(),
            administrative,
            can_communicate,
            manageable: true,
        });
    }

    pub fn add_party(&self, party: PartyId) {
        self.state
            .lock()
            .unwrap()
            .holdings
            .entry(party)
            .or_default();
    }

    /// Simulate a party leaving the community
    pub fn remove_party(&self, party: PartyId) {
        let mut state = self.state.lock().unwrap();
        state.holdings.remove(&party);
        state.voice.remove(&party);
    }

    /// Give grants directly (no events emitted)
    pub fn give(&self, party: PartyId, grants: &[u64]) {
        let mut state = self.state.lock().unwrap();
        let held = state.holdings.entry(party).or_default();
        held.extend(grants.iter().map(|g| GrantId(*g)));
    }

    /// Take a grant directly (no events emitted)
    pub fn take(&self, party: PartyId, grant: GrantId) {
        if let Some(held) = self.state.lock().unwrap().holdings.get_mut(&party) {
            held.remove(&grant);
        }
    }

    pub fn holdings(&self, party: PartyId) -> BTreeSet<GrantId> {
        self.state
            .lock()
            .unwrap()
            .holdings
            .get(&party)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_outranks(&self, party: PartyId) {
        self.state.lock().unwrap().outranking.insert(party);
    }

    pub fn add_channel(&self, id: u64, created_at: u64, voice_capable: bool) {
        self.state.lock().unwrap().channels.insert(
            ChannelId(id),
            ChannelInfo {
                id: ChannelId(id),
                community: CommunityId(0),
                created_at,
                voice_capable,
            },
        );
    }

    pub fn join_voice(&self, party: PartyId, channel: ChannelId) {
        self.state.lock().unwrap().voice.insert(party, channel);
    }

    pub fn voice_of(&self, party: PartyId) -> Option<ChannelId> {
        self.state.lock().unwrap().voice.get(&party).copied()
    }

    pub fn evictions(&self) -> Vec<PartyId> {
        self.state.lock().unwrap().evictions.clone()
    }

    pub fn has_override(&self, channel: ChannelId, party: PartyId, kind: OverrideKind) -> bool {
        self.state
            .lock()
            .unwrap()
            .overrides
            .contains(&(channel, party, kind))
    }

    /// Overrides currently installed for a party
    pub fn overrides_for(&self, party: PartyId) -> Vec<(ChannelId, OverrideKind)> {
        self.state
            .lock()
            .unwrap()
            .overrides
            .iter()
            .filter(|(_, p, _)| *p == party)
            .map(|(c, _, k)| (*c, *k))
            .collect()
    }

    pub fn deleted_messages(&self) -> Vec<MessageId> {
        self.state.lock().unwrap().deleted_messages.clone()
    }

    pub fn notices_for(&self, party: PartyId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .notices
            .iter()
            .filter(|(p, _)| *p == party)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Current text of every log record, in posting order
    pub fn logs(&self) -> Vec<(ChannelId, String)> {
        self.state.lock().unwrap().logs.values().cloned().collect()
    }

    /// Number of `post_log` calls so far (edits are not counted)
    pub fn log_posts(&self) -> usize {
        self.state.lock().unwrap().log_posts
    }

    /// Simulate a human deleting a log record
    pub fn delete_log(&self, message: MessageId) {
        self.state.lock().unwrap().logs.remove(&message);
    }

    /// Record `actor` in the audit trail as the last one to change `grant` on `target`
    pub fn set_recent_actor(&self, target: PartyId, grant: GrantId, actor: PartyId) {
        self.state
            .lock()
            .unwrap()
            .recent_actors
            .insert((target, grant), actor);
    }

    /// Make add/remove of `grant` fail transiently
    pub fn fail_grant(&self, grant: GrantId, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing_grants.insert(grant);
        } else {
            state.failing_grants.remove(&grant);
        }
    }

    /// Make grant-set lookups fail transiently
    pub fn fail_holdings(&self, failing: bool) {
        self.state.lock().unwrap().fail_holdings = failing;
    }

    pub fn fail_notices(&self, failing: bool) {
        self.state.lock().unwrap().fail_notices = failing;
    }

    /// Queue an event for `receive_events`
    pub fn push_event(&self, event: PlatformEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    fn next_id(state: &mut MockState) -> MessageId {
        let id = MessageId(state.next_message_id);
        state.next_message_id += 1;
        id
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    fn enforcer_id(&self) -> PartyId {
        self.enforcer
    }

    async fn community_owner(&self, _community: CommunityId) -> PlatformResult<PartyId> {
        Ok(self.state.lock().unwrap().owner)
    }

    async fn outranks(
        &self,
        _community: CommunityId,
        party: PartyId,
        _enforcer: PartyId,
    ) -> PlatformResult<bool> {
        Ok(self.state.lock().unwrap().outranking.contains(&party))
    }

    async fn party_grants(
        &self,
        _community: CommunityId,
        party: PartyId,
    ) -> PlatformResult<BTreeSet<GrantId>> {
        let state = self.state.lock().unwrap();
        if state.fail_holdings {
            return Err(PlatformError::Transient(format!("grants of {}", party)));
        }
        state
            .holdings
            .get(&party)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("party {}", party)))
    }

    async fn grant_info(&self, _community: CommunityId, grant: GrantId) -> PlatformResult<GrantInfo> {
        self.state
            .lock()
            .unwrap()
            .grants
            .get(&grant)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("grant {}", grant)))
    }

    async fn add_grant(
        &self,
        _community: CommunityId,
        party: PartyId,
        grant: GrantId,
        _reason: &str,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_grants.contains(&grant) {
            return Err(PlatformError::Transient(format!("add grant {}", grant)));
        }
        if !state.grants.contains_key(&grant) {
            return Err(PlatformError::NotFound(format!("grant {}", grant)));
        }
        let held = state
            .holdings
            .get_mut(&party)
            .ok_or_else(|| PlatformError::NotFound(format!("party {}", party)))?;
        held.insert(grant);
        Ok(())
    }

    async fn remove_grant(
        &self,
        _community: CommunityId,
        party: PartyId,
        grant: GrantId,
        _reason: &str,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_grants.contains(&grant) {
            return Err(PlatformError::Transient(format!("remove grant {}", grant)));
        }
        let held = state
            .holdings
            .get_mut(&party)
            .ok_or_else(|| PlatformError::NotFound(format!("party {}", party)))?;
        held.remove(&grant);
        Ok(())
    }

    async fn channel_info(&self, channel: ChannelId) -> PlatformResult<ChannelInfo> {
        self.state
            .lock()
            .unwrap()
            .channels
            .get(&channel)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("channel {}", channel)))
    }

    async fn set_channel_override(
        &self,
        channel: ChannelId,
        party: PartyId,
        kind: OverrideKind,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.channels.contains_key(&channel) {
            return Err(PlatformError::NotFound(format!("channel {}", channel)));
        }
        state.overrides.insert((channel, party, kind));
        Ok(())
    }

    async fn delete_channel_override(
        &self,
        channel: ChannelId,
        party: PartyId,
        kind: OverrideKind,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.channels.contains_key(&channel) {
            return Err(PlatformError::NotFound(format!("channel {}", channel)));
        }
        if state.overrides.remove(&(channel, party, kind)) {
            Ok(())
        } else {
            Err(PlatformError::NotFound(format!(
                "override {:?} for {} on {}",
                kind, party, channel
            )))
        }
    }

    async fn voice_channel_of(
        &self,
        _community: CommunityId,
        party: PartyId,
    ) -> PlatformResult<Option<ChannelId>> {
        Ok(self.state.lock().unwrap().voice.get(&party).copied())
    }

    async fn evict_from_voice(&self, _community: CommunityId, party: PartyId) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.voice.remove(&party);
        state.evictions.push(party);
        Ok(())
    }

    async fn delete_message(&self, _channel: ChannelId, message: MessageId) -> PlatformResult<()> {
        self.state.lock().unwrap().deleted_messages.push(message);
        Ok(())
    }

    async fn send_private_notice(&self, party: PartyId, text: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_notices {
            return Err(PlatformError::Forbidden("direct messages closed".to_string()));
        }
        state.notices.push((party, text.to_string()));
        Ok(())
    }

    async fn post_log(&self, channel: ChannelId, text: &str) -> PlatformResult<MessageId> {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.logs.insert(id, (channel, text.to_string()));
        state.log_posts += 1;
        Ok(id)
    }

    async fn edit_log(
        &self,
        _channel: ChannelId,
        message: MessageId,
        text: &str,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.logs.get_mut(&message) {
            Some((_, existing)) => {
                *existing = text.to_string();
                Ok(())
            }
            None => Err(PlatformError::NotFound(format!("log record {}", message))),
        }
    }

    async fn find_recent_actor(
        &self,
        _community: CommunityId,
        target: PartyId,
        grant: GrantId,
        _window: Duration,
    ) -> PlatformResult<Option<PartyId>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .recent_actors
            .get(&(target, grant))
            .copied())
    }

    async fn parties_with_grant(
        &self,
        _community: CommunityId,
        grant: GrantId,
    ) -> PlatformResult<Vec<PartyId>> {
        let state = self.state.lock().unwrap();
        let mut parties: Vec<PartyId> = state
            .holdings
            .iter()
            .filter(|(_, held)| held.contains(&grant))
            .map(|(party, _)| *party)
            .collect();
        parties.sort();
        Ok(parties)
    }

    async fn receive_events(&self) -> PlatformResult<Vec<PlatformEvent>> {
        let mut state = self.state.lock().unwrap();
        Ok(state.events.drain(..).collect())
    }
}
