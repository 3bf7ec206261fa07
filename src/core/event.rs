/// Node side effects: named event handlers that emit effects for a session to apply.
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

use crate::core::condition::{Audience, NarrativeView};
use crate::schema::node::{EventRuntime, EventSpec, NodeId, PartyEventPolicy, SessionId};

/// A state change requested by an event, applied by the receiving session.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    BeginQuest { quest: String, start: Option<NodeId> },
    RestartQuest { quest: String },
    ForgetQuest { quest: String },
    EnterQuestState { quest: String, state: NodeId },
    CompleteDataTask { task: String, argument: String, quantity: i32 },
    ExitDialogue,
    /// Handed to the host as a notification.
    Custom { event: String, args: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetedEffect {
    pub target: SessionId,
    pub effect: Effect,
}

pub trait NarrativeEvent: Send + Sync {
    fn execute(&self, args: &[String], target: &dyn NarrativeView, effects: &mut Vec<Effect>);
}

struct FnEvent<F>(F);

impl<F> NarrativeEvent for FnEvent<F>
where
    F: Fn(&[String], &dyn NarrativeView, &mut Vec<Effect>) + Send + Sync,
{
    fn execute(&self, args: &[String], target: &dyn NarrativeView, effects: &mut Vec<Effect>) {
        (self.0)(args, target, effects)
    }
}

#[derive(Clone, Default)]
pub struct EventRegistry {
    events: FxHashMap<String, Arc<dyn NarrativeEvent>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the quest, data-task, and dialogue effects.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_fn("begin_quest", |args, _, effects| {
            if let Some(quest) = args.first() {
                effects.push(Effect::BeginQuest {
                    quest: quest.clone(),
                    start: args.get(1).map(|s| NodeId::new(s.as_str())),
                });
            }
        });
        registry.register_fn("restart_quest", |args, _, effects| {
            if let Some(quest) = args.first() {
                effects.push(Effect::RestartQuest { quest: quest.clone() });
            }
        });
        registry.register_fn("forget_quest", |args, _, effects| {
            if let Some(quest) = args.first() {
                effects.push(Effect::ForgetQuest { quest: quest.clone() });
            }
        });
        registry.register_fn("enter_quest_state", |args, _, effects| {
            if let (Some(quest), Some(state)) = (args.first(), args.get(1)) {
                effects.push(Effect::EnterQuestState {
                    quest: quest.clone(),
                    state: NodeId::new(state.as_str()),
                });
            }
        });
        registry.register_fn("complete_data_task", |args, _, effects| {
            if let (Some(task), Some(argument)) = (args.first(), args.get(1)) {
                effects.push(Effect::CompleteDataTask {
                    task: task.clone(),
                    argument: argument.clone(),
                    quantity: args.get(2).and_then(|q| q.parse().ok()).unwrap_or(1),
                });
            }
        });
        registry.register_fn("exit_dialogue", |_, _, effects| {
            effects.push(Effect::ExitDialogue);
        });
        registry
    }

    pub fn register(&mut self, name: &str, event: Arc<dyn NarrativeEvent>) {
        self.events.insert(name.to_string(), event);
    }

    pub fn register_fn<F>(&mut self, name: &str, execute: F)
    where
        F: Fn(&[String], &dyn NarrativeView, &mut Vec<Effect>) + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnEvent(execute)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.events.contains_key(name)
    }

    /// Run every event in `events` that fires at `at`, once per recipient.
    pub fn dispatch(
        &self,
        events: &[EventSpec],
        at: EventRuntime,
        audience: &Audience<'_>,
    ) -> Vec<TargetedEffect> {
        let mut out = Vec::new();
        for spec in events.iter().filter(|e| e.runtime.fires_at(at)) {
            let recipients: Vec<&dyn NarrativeView> = match audience {
                Audience::Solo(view) => vec![*view],
                Audience::Party { party, members } => match spec.party_policy {
                    PartyEventPolicy::Party => vec![*party],
                    PartyEventPolicy::PartyLeader => members.first().copied().into_iter().collect(),
                    PartyEventPolicy::AllPartyMembers => members.clone(),
                },
            };

            for recipient in recipients {
                let mut effects = Vec::new();
                match self.events.get(&spec.event) {
                    Some(event) => event.execute(&spec.args, recipient, &mut effects),
                    None => {
                        debug!(event = %spec.event, "no handler registered; passing to host");
                        effects.push(Effect::Custom {
                            event: spec.event.clone(),
                            args: spec.args.clone(),
                        });
                    }
                }
                let target = recipient.session_id();
                out.extend(effects.into_iter().map(|effect| TargetedEffect { target, effect }));
            }
        }
        out
    }
}
