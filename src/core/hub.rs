/// Server-side routing between authoritative sessions and parties, plus an
/// in-process loopback that plays the part of the network for followers.
///
/// The hub never applies anything on a follower's behalf. It collects each
/// session's outgoing messages into per-session queues that a transport (or
/// `Loopback`) delivers, and feeds follower requests back in.
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::condition::ConditionRegistry;
use crate::core::event::{EventRegistry, TargetedEffect};
use crate::core::library::DefinitionLibrary;
use crate::core::party::{party_session_id, MemberSnapshot, PartyCoordinator};
use crate::core::session::{NetMode, NetRole, SessionComponent, SessionError};
use crate::core::settings::DialogueSettings;
use crate::schema::message::{ClientMessage, ServerRequest};
use crate::schema::node::{NodeId, PartyId, SessionId};

/// Rounds of message and effect routing per pump before giving up.
const MAX_PUMP_ROUNDS: usize = 16;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("session {0} is already registered")]
    DuplicateSession(SessionId),
    #[error("session {0} is not an authority")]
    NotAuthority(SessionId),
    #[error("session {0} uses an ID reserved for parties")]
    ReservedId(SessionId),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

pub struct SessionHub {
    library: Arc<DefinitionLibrary>,
    settings: DialogueSettings,
    conditions: ConditionRegistry,
    events: EventRegistry,
    sessions: BTreeMap<SessionId, SessionComponent>,
    parties: BTreeMap<PartyId, PartyCoordinator>,
    next_party: u64,
    delivered: BTreeMap<SessionId, Vec<ClientMessage>>,
}

impl SessionHub {
    pub fn new(library: Arc<DefinitionLibrary>, settings: DialogueSettings) -> Self {
        Self {
            library,
            settings,
            conditions: ConditionRegistry::with_builtins(),
            events: EventRegistry::with_builtins(),
            sessions: BTreeMap::new(),
            parties: BTreeMap::new(),
            next_party: 1,
            delivered: BTreeMap::new(),
        }
    }

    /// Registries handed to party sessions created from now on.
    pub fn with_registries(mut self, conditions: ConditionRegistry, events: EventRegistry) -> Self {
        self.conditions = conditions;
        self.events = events;
        self
    }

    pub fn library(&self) -> &Arc<DefinitionLibrary> {
        &self.library
    }

    pub fn add_session(&mut self, session: SessionComponent) -> Result<(), HubError> {
        let id = session.id();
        if !session.has_authority() {
            return Err(HubError::NotAuthority(id));
        }
        if id.0 >= crate::core::party::PARTY_SESSION_BASE {
            return Err(HubError::ReservedId(id));
        }
        if self.sessions.contains_key(&id) {
            return Err(HubError::DuplicateSession(id));
        }
        self.sessions.insert(id, session);
        Ok(())
    }

    pub fn session(&self, id: SessionId) -> Option<&SessionComponent> {
        self.sessions.get(&id)
    }

    /// Direct access for game code. Call `pump` afterwards so replies reach followers.
    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut SessionComponent> {
        self.sessions.get_mut(&id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    // Parties

    pub fn create_party(&mut self) -> Result<PartyId, HubError> {
        let id = PartyId(self.next_party);
        self.next_party += 1;
        let session = SessionComponent::builder()
            .id(party_session_id(id).0)
            .role(NetRole::Authority)
            .mode(NetMode::Networked)
            .seed(id.0)
            .with_settings(self.settings.clone())
            .with_library(self.library.clone())
            .with_conditions(self.conditions.clone())
            .with_events(self.events.clone())
            .build()?;
        self.parties.insert(id, PartyCoordinator::new(id, session));
        debug!(party = %id, "party created");
        Ok(id)
    }

    pub fn party(&self, id: PartyId) -> Option<&PartyCoordinator> {
        self.parties.get(&id)
    }

    pub fn party_mut(&mut self, id: PartyId) -> Option<&mut PartyCoordinator> {
        self.parties.get_mut(&id)
    }

    pub fn party_leader(&self, id: PartyId) -> Option<SessionId> {
        self.parties.get(&id).and_then(PartyCoordinator::leader)
    }

    /// Add `member` to `party`, leaving any party it was already in.
    pub fn add_party_member(&mut self, party: PartyId, member: SessionId) -> bool {
        if !self.parties.contains_key(&party) || !self.sessions.contains_key(&member) {
            warn!(party = %party, session = %member, "unknown party or session");
            return false;
        }
        let current = self.sessions.get(&member).and_then(SessionComponent::party);
        if current == Some(party) {
            return false;
        }
        if let Some(old) = current {
            self.remove_party_member(old, member);
        }
        if let Some(p) = self.parties.get_mut(&party) {
            p.add_member(member);
        }
        if let Some(session) = self.sessions.get_mut(&member) {
            session.set_party(Some(party));
        }
        debug!(party = %party, session = %member, "joined party");
        self.refresh_party(party);
        self.pump();
        true
    }

    pub fn remove_party_member(&mut self, party: PartyId, member: SessionId) -> bool {
        let removed = self
            .parties
            .get_mut(&party)
            .is_some_and(|p| p.remove_member(member));
        if !removed {
            return false;
        }
        if let Some(session) = self.sessions.get_mut(&member) {
            if session.party_dialogue() == Some(party) {
                session.leave_party_dialogue();
                self.delivered
                    .entry(member)
                    .or_default()
                    .push(ClientMessage::ExitPartyDialogue);
            }
            session.set_party(None);
        }
        debug!(party = %party, session = %member, "left party");
        self.refresh_party(party);
        self.pump();
        true
    }

    /// Start a dialogue shared by every member of `party`.
    pub fn begin_party_dialogue(&mut self, party: PartyId, dialogue: &str, start: Option<&NodeId>) -> bool {
        self.refresh_party(party);
        let begun = self
            .parties
            .get_mut(&party)
            .is_some_and(|p| p.session_mut().begin_dialogue(dialogue, start));
        self.pump();
        begun
    }

    pub fn select_party_option(&mut self, party: PartyId, member: SessionId, option: &NodeId) -> bool {
        if !self.parties.get(&party).is_some_and(|p| p.contains(member)) {
            debug!(party = %party, session = %member, "only members can pick party replies");
            return false;
        }
        self.refresh_party(party);
        let selected = self
            .parties
            .get_mut(&party)
            .is_some_and(|p| p.session_mut().select_option_from(option, Some(member)));
        self.pump();
        selected
    }

    fn refresh_parties(&mut self) {
        let parties: Vec<PartyId> = self.parties.keys().copied().collect();
        for party in parties {
            self.refresh_party(party);
        }
    }

    fn refresh_party(&mut self, party: PartyId) {
        let Some(p) = self.parties.get_mut(&party) else {
            return;
        };
        let snapshots = p
            .members()
            .iter()
            .filter_map(|id| self.sessions.get(id).map(MemberSnapshot::of))
            .collect();
        p.session_mut().set_party_members(snapshots);
    }

    // Requests and time

    /// Act on a follower's request, routing it to the party when the member is
    /// in a party dialogue.
    pub fn handle_request(&mut self, from: SessionId, request: ServerRequest) -> bool {
        let Some(session) = self.sessions.get_mut(&from) else {
            warn!(session = %from, "request from an unknown session");
            return false;
        };
        let handled = match session.party_dialogue() {
            Some(party) => {
                self.refresh_party(party);
                match self.parties.get_mut(&party) {
                    Some(p) => {
                        let shared = p.session_mut();
                        match request {
                            ServerRequest::SelectOption { option } => shared.select_option_from(&option, Some(from)),
                            ServerRequest::SkipCurrentLine => shared.skip_current_line(),
                            ServerRequest::ExitDialogue => shared.exit_dialogue(),
                        }
                    }
                    None => false,
                }
            }
            None => session.handle_request(request),
        };
        self.pump();
        handled
    }

    /// Advance every authoritative clock, sessions first, then parties.
    pub fn advance(&mut self, seconds: f32) {
        for session in self.sessions.values_mut() {
            session.advance(seconds);
        }
        let parties: Vec<PartyId> = self.parties.keys().copied().collect();
        for party in parties {
            self.refresh_party(party);
            if let Some(p) = self.parties.get_mut(&party) {
                p.session_mut().advance(seconds);
            }
        }
        self.pump();
    }

    /// Route outgoing messages, cross-session effects, and forwarded data tasks
    /// until nothing moves. Party member snapshots are refreshed after every round.
    pub fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut moved = false;
            let mut effects: Vec<TargetedEffect> = Vec::new();
            let mut forwarded = Vec::new();

            for (&id, session) in self.sessions.iter_mut() {
                let outgoing = session.drain_outbox();
                if !outgoing.is_empty() {
                    moved = true;
                    self.delivered.entry(id).or_default().extend(outgoing);
                }
                effects.extend(session.take_foreign_effects());
                if let Some(party) = session.party() {
                    forwarded.extend(
                        session
                            .take_forwarded_tasks()
                            .into_iter()
                            .map(|task| (party, task)),
                    );
                } else {
                    session.take_forwarded_tasks();
                }
            }

            for (&party, p) in self.parties.iter_mut() {
                let outgoing = p.session_mut().drain_outbox();
                effects.extend(p.session_mut().take_foreign_effects());
                if outgoing.is_empty() {
                    continue;
                }
                moved = true;
                let members = p.members().to_vec();
                for message in outgoing {
                    fan_out(party, message, &members, &mut self.sessions, &mut self.delivered);
                }
            }

            if !effects.is_empty() || !forwarded.is_empty() {
                moved = true;
            }
            for TargetedEffect { target, effect } in effects {
                if let Some(session) = self.sessions.get_mut(&target) {
                    session.apply_effect(effect);
                } else if let Some(p) = self.parties.values_mut().find(|p| party_session_id(p.id()) == target) {
                    p.session_mut().apply_effect(effect);
                } else {
                    warn!(session = %target, "effect for an unknown session dropped");
                }
            }
            for (party, (task, argument, quantity)) in forwarded {
                if let Some(p) = self.parties.get_mut(&party) {
                    p.session_mut().complete_data_task(&task, &argument, quantity);
                }
            }

            // Party checks in the next round see what this one changed on members.
            self.refresh_parties();

            if !moved {
                return;
            }
        }
        warn!("message routing did not settle; leaving the rest for the next pump");
    }

    /// Messages waiting for `session`'s follower, oldest first.
    pub fn take_messages(&mut self, session: SessionId) -> Vec<ClientMessage> {
        self.delivered.remove(&session).unwrap_or_default()
    }
}

/// Turn one party-session message into per-member messages.
fn fan_out(
    party: PartyId,
    message: ClientMessage,
    members: &[SessionId],
    sessions: &mut BTreeMap<SessionId, SessionComponent>,
    delivered: &mut BTreeMap<SessionId, Vec<ClientMessage>>,
) {
    let per_member = match message {
        ClientMessage::BeginDialogue { dialogue, chunk } => {
            for member in members {
                if let Some(session) = sessions.get_mut(member) {
                    session.join_party_dialogue(party);
                }
            }
            ClientMessage::BeginPartyDialogue { party, dialogue, chunk }
        }
        ClientMessage::ExitDialogue => {
            for member in members {
                if let Some(session) = sessions.get_mut(member) {
                    session.leave_party_dialogue();
                }
            }
            ClientMessage::ExitPartyDialogue
        }
        message @ (ClientMessage::ReceiveChunk(_) | ClientMessage::SelectOption { .. }) => message,
        _ => {
            // Party quest state stays on the server; members keep their own logs.
            debug!(party = %party, "party update not fanned out");
            return;
        }
    };
    for member in members {
        delivered.entry(*member).or_default().push(per_member.clone());
    }
}

/// Followers wired straight to a hub, standing in for the network.
#[derive(Default)]
pub struct Loopback {
    followers: BTreeMap<SessionId, SessionComponent>,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// The follower receives whatever the hub queues for the session with the same ID.
    pub fn add_follower(&mut self, follower: SessionComponent) -> Result<(), HubError> {
        let id = follower.id();
        if follower.has_authority() {
            return Err(HubError::NotAuthority(id));
        }
        if self.followers.contains_key(&id) {
            return Err(HubError::DuplicateSession(id));
        }
        self.followers.insert(id, follower);
        Ok(())
    }

    pub fn follower(&self, id: SessionId) -> Option<&SessionComponent> {
        self.followers.get(&id)
    }

    pub fn follower_mut(&mut self, id: SessionId) -> Option<&mut SessionComponent> {
        self.followers.get_mut(&id)
    }

    /// Shuttle messages and requests until both sides are quiet.
    pub fn deliver(&mut self, hub: &mut SessionHub) {
        for _ in 0..MAX_PUMP_ROUNDS {
            hub.pump();
            let mut moved = false;
            for (&id, follower) in self.followers.iter_mut() {
                for message in hub.take_messages(id) {
                    moved = true;
                    follower.receive(message);
                }
                for request in follower.drain_requests() {
                    moved = true;
                    hub.handle_request(id, request);
                }
            }
            if !moved {
                return;
            }
        }
        warn!("loopback delivery did not settle");
    }

    /// Advance the hub and every follower by the same amount, then deliver.
    pub fn advance(&mut self, hub: &mut SessionHub, seconds: f32) {
        hub.advance(seconds);
        self.deliver(hub);
        for follower in self.followers.values_mut() {
            follower.advance(seconds);
        }
        self.deliver(hub);
    }
}
