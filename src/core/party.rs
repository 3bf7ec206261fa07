/// Parties: an ordered member list (index 0 leads) plus a session of the
/// party's own that runs shared dialogue and party quests.
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use crate::core::condition::{ActorContext, NarrativeView};
use crate::core::quest::QuestCompletion;
use crate::core::session::SessionComponent;
use crate::schema::node::{NodeId, PartyId, SessionId};

/// Party sessions get IDs from here up so they never collide with players.
pub const PARTY_SESSION_BASE: u64 = 1 << 32;

pub fn party_session_id(party: PartyId) -> SessionId {
    SessionId(PARTY_SESSION_BASE + party.0)
}

/// A member's narrative state, frozen for party condition and event checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberSnapshot {
    session: SessionId,
    actor: ActorContext,
    quests: FxHashMap<String, (QuestCompletion, Option<NodeId>)>,
    ledger: BTreeMap<String, i32>,
}

impl MemberSnapshot {
    pub fn of(member: &SessionComponent) -> Self {
        Self {
            session: member.id(),
            actor: member.actor_context(),
            quests: member
                .quests()
                .iter()
                .map(|q| (q.name().to_string(), (q.completion(), q.current_state_id().cloned())))
                .collect(),
            ledger: member.core().ledger().snapshot(),
        }
    }
}

impl NarrativeView for MemberSnapshot {
    fn session_id(&self) -> SessionId {
        self.session
    }

    fn actor(&self) -> ActorContext {
        self.actor
    }

    fn quest_completion(&self, quest: &str) -> QuestCompletion {
        self.quests.get(quest).map_or(QuestCompletion::NotStarted, |(c, _)| *c)
    }

    fn quest_state(&self, quest: &str) -> Option<NodeId> {
        self.quests.get(quest).and_then(|(_, state)| state.clone())
    }

    fn data_task_count(&self, key: &str) -> i32 {
        self.ledger.get(key).copied().unwrap_or(0)
    }
}

pub struct PartyCoordinator {
    id: PartyId,
    session: SessionComponent,
    members: Vec<SessionId>,
}

impl PartyCoordinator {
    /// `session` must be a networked authority; it becomes the party's stand-in.
    pub fn new(id: PartyId, mut session: SessionComponent) -> Self {
        debug_assert!(session.has_authority(), "party sessions are authoritative");
        session.set_party_members(Vec::new());
        Self {
            id,
            session,
            members: Vec::new(),
        }
    }

    pub fn id(&self) -> PartyId {
        self.id
    }

    pub fn session(&self) -> &SessionComponent {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionComponent {
        &mut self.session
    }

    pub fn members(&self) -> &[SessionId] {
        &self.members
    }

    pub fn leader(&self) -> Option<SessionId> {
        self.members.first().copied()
    }

    pub fn contains(&self, member: SessionId) -> bool {
        self.members.contains(&member)
    }

    pub(crate) fn add_member(&mut self, member: SessionId) -> bool {
        if self.contains(member) {
            return false;
        }
        self.members.push(member);
        true
    }

    pub(crate) fn remove_member(&mut self, member: SessionId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| *m != member);
        self.members.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::condition::{Audience, ConditionRegistry};
    use crate::core::library::DefinitionLibrary;
    use crate::core::session::{NetMode, NetRole};
    use crate::schema::node::{ConditionSpec, PartyConditionPolicy};
    use crate::schema::quest::{QuestBranchDef, QuestDef, QuestStateDef, StateKind, TaskDef};
    use std::sync::Arc;

    fn fetch_quest() -> QuestDef {
        QuestDef {
            name: "Fetch".to_string(),
            title: String::new(),
            description: String::new(),
            start_state: NodeId::new("Start"),
            states: vec![
                QuestStateDef::new("Start", StateKind::Regular, &["Get"]),
                QuestStateDef::new("Done", StateKind::Success, &[]),
            ],
            branches: vec![QuestBranchDef::new("Get", "Done", vec![TaskDef::new("Find", "Ring", 1)])],
        }
    }

    fn member(id: u64, library: &Arc<DefinitionLibrary>) -> SessionComponent {
        SessionComponent::builder()
            .id(id)
            .with_library(library.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn leader_is_first_member() {
        let session = SessionComponent::builder()
            .id(party_session_id(PartyId(1)).0)
            .role(NetRole::Authority)
            .mode(NetMode::Networked)
            .build()
            .unwrap();
        let mut party = PartyCoordinator::new(PartyId(1), session);
        assert_eq!(party.leader(), None);
        assert!(party.add_member(SessionId(7)));
        assert!(party.add_member(SessionId(3)));
        assert!(!party.add_member(SessionId(7)));
        assert_eq!(party.leader(), Some(SessionId(7)));

        assert!(party.remove_member(SessionId(7)));
        assert_eq!(party.leader(), Some(SessionId(3)));
        assert!(!party.remove_member(SessionId(7)));
    }

    #[test]
    fn any_player_passes_with_one_passing_member() {
        let mut library = DefinitionLibrary::new();
        library.add_quest(fetch_quest()).unwrap();
        let library = Arc::new(library);

        let a = member(1, &library);
        let mut b = member(2, &library);
        b.begin_quest("Fetch", None);
        b.complete_data_task("Find", "Ring", 1);
        assert!(b.is_quest_succeeded("Fetch"));

        let snapshots = [MemberSnapshot::of(&a), MemberSnapshot::of(&b)];
        let party_view = MemberSnapshot::default();
        let audience = Audience::Party {
            party: &party_view,
            members: snapshots.iter().map(|m| m as &dyn NarrativeView).collect(),
        };
        let registry = ConditionRegistry::with_builtins();
        let any = ConditionSpec::new("quest_succeeded", &["Fetch"]).with_policy(PartyConditionPolicy::AnyPlayerPasses);
        let all = ConditionSpec::new("quest_succeeded", &["Fetch"]).with_policy(PartyConditionPolicy::AllPlayersPass);
        let leader = ConditionSpec::new("quest_succeeded", &["Fetch"]).with_policy(PartyConditionPolicy::PartyLeaderPasses);

        assert!(registry.conditions_met(&[any], &audience));
        assert!(!registry.conditions_met(&[all], &audience));
        assert!(!registry.conditions_met(&[leader], &audience));
    }

    #[test]
    fn snapshot_reads_ledger_and_states() {
        let mut library = DefinitionLibrary::new();
        library.add_quest(fetch_quest()).unwrap();
        let library = Arc::new(library);
        let mut s = member(4, &library);
        s.begin_quest("Fetch", None);
        s.complete_data_task("Talk", "Smith", 2);

        let snap = MemberSnapshot::of(&s);
        assert_eq!(snap.session_id(), SessionId(4));
        assert_eq!(snap.quest_state("Fetch"), Some(NodeId::new("Start")));
        assert_eq!(snap.data_task_count("talk_smith"), 2);
        assert_eq!(snap.quest_completion("Other"), QuestCompletion::NotStarted);
    }
}
