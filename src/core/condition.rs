/// Node guard evaluation, for a single session or aggregated over a party.
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::warn;

use crate::core::ledger::make_task_key;
use crate::core::quest::QuestCompletion;
use crate::schema::node::{ActorId, ConditionSpec, NodeId, PartyConditionPolicy, SessionId};

/// Host-engine actors a session acts through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActorContext {
    pub pawn: Option<ActorId>,
    pub controller: Option<ActorId>,
}

/// Read-only narrative state of one session, as seen by conditions and events.
pub trait NarrativeView {
    fn session_id(&self) -> SessionId;
    fn actor(&self) -> ActorContext;
    /// `NotStarted` for quests the session has never begun.
    fn quest_completion(&self, quest: &str) -> QuestCompletion;
    fn quest_state(&self, quest: &str) -> Option<NodeId>;
    fn data_task_count(&self, key: &str) -> i32;
}

/// Who a node's conditions and events are evaluated against.
pub enum Audience<'a> {
    Solo(&'a dyn NarrativeView),
    Party {
        party: &'a dyn NarrativeView,
        /// Index 0 is the leader.
        members: Vec<&'a dyn NarrativeView>,
    },
}

pub trait NarrativeCondition: Send + Sync {
    fn check(&self, args: &[String], view: &dyn NarrativeView) -> bool;
}

struct FnCondition<F>(F);

impl<F> NarrativeCondition for FnCondition<F>
where
    F: Fn(&[String], &dyn NarrativeView) -> bool + Send + Sync,
{
    fn check(&self, args: &[String], view: &dyn NarrativeView) -> bool {
        (self.0)(args, view)
    }
}

/// Named condition implementations that `ConditionSpec`s resolve against.
#[derive(Clone, Default)]
pub struct ConditionRegistry {
    conditions: FxHashMap<String, Arc<dyn NarrativeCondition>>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the quest and data-task queries.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_fn("has_completed_data_task", |args, view| {
            let (Some(task), Some(argument)) = (args.first(), args.get(1)) else {
                return false;
            };
            let quantity = args.get(2).and_then(|q| q.parse::<i32>().ok()).unwrap_or(1);
            view.data_task_count(&make_task_key(task, argument)) >= quantity
        });
        registry.register_fn("quest_in_progress", |args, view| {
            quest_arg(args, view) == Some(QuestCompletion::Started)
        });
        registry.register_fn("quest_succeeded", |args, view| {
            quest_arg(args, view) == Some(QuestCompletion::Succeeded)
        });
        registry.register_fn("quest_failed", |args, view| {
            quest_arg(args, view) == Some(QuestCompletion::Failed)
        });
        registry.register_fn("quest_finished", |args, view| {
            quest_arg(args, view).is_some_and(|c| c.is_finished())
        });
        registry.register_fn("quest_started_or_finished", |args, view| {
            quest_arg(args, view).is_some_and(|c| c != QuestCompletion::NotStarted)
        });
        registry.register_fn("quest_in_state", |args, view| {
            match (args.first(), args.get(1)) {
                (Some(quest), Some(state)) => {
                    view.quest_state(quest).is_some_and(|s| s.as_str() == state)
                }
                _ => false,
            }
        });
        registry
    }

    pub fn register(&mut self, name: &str, condition: Arc<dyn NarrativeCondition>) {
        self.conditions.insert(name.to_string(), condition);
    }

    pub fn register_fn<F>(&mut self, name: &str, check: F)
    where
        F: Fn(&[String], &dyn NarrativeView) -> bool + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnCondition(check)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.conditions.contains_key(name)
    }

    /// One condition against one view, with negation applied.
    /// Unknown conditions are skipped (treated as passing).
    pub fn check(&self, spec: &ConditionSpec, view: &dyn NarrativeView) -> bool {
        match self.conditions.get(&spec.condition) {
            Some(condition) => condition.check(&spec.args, view) != spec.negate,
            None => {
                warn!(condition = %spec.condition, "unknown condition; skipping");
                true
            }
        }
    }

    /// All of `conditions` must pass for the audience.
    pub fn conditions_met(&self, conditions: &[ConditionSpec], audience: &Audience<'_>) -> bool {
        match audience {
            Audience::Solo(view) => conditions.iter().all(|c| self.check(c, *view)),
            Audience::Party { party, members } => conditions.iter().all(|c| match c.party_policy {
                PartyConditionPolicy::AnyPlayerPasses => members.iter().any(|m| self.check(c, *m)),
                PartyConditionPolicy::AllPlayersPass => members.iter().all(|m| self.check(c, *m)),
                PartyConditionPolicy::PartyLeaderPasses => match members.first() {
                    Some(leader) => self.check(c, *leader),
                    None => {
                        warn!(condition = %c.condition, "party has no leader to check");
                        false
                    }
                },
                PartyConditionPolicy::PartyPasses => self.check(c, *party),
            }),
        }
    }
}

fn quest_arg(args: &[String], view: &dyn NarrativeView) -> Option<QuestCompletion> {
    args.first().map(|quest| view.quest_completion(quest))
}
