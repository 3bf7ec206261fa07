use serde::{Deserialize, Serialize};

/// Kind of a replicated quest mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateKind {
    #[default]
    None,
    /// Payload: data-task key. Int payload: `[quantity]`.
    CompleteTask,
    /// Payload: start state ID, empty for the quest's own start state.
    BeginQuest,
    ForgetQuest,
    RestartQuest,
    /// Payload: ID of the state entered.
    QuestNewState,
    /// Payload: branch ID. Int payload: `[task_index, new_progress]`.
    TaskProgressMade,
}

/// One entry in the ordered update log the authority replicates to its follower.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NarrativeUpdate {
    pub kind: UpdateKind,
    pub quest: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub int_payload: Vec<i32>,
    /// Set locally once the follower has applied this entry; never replicated.
    #[serde(skip)]
    pub acked: bool,
    #[serde(default)]
    pub created_at: f64,
}

impl NarrativeUpdate {
    pub fn new(kind: UpdateKind, quest: &str) -> Self {
        Self {
            kind,
            quest: quest.to_string(),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: &str) -> Self {
        self.payload = payload.to_string();
        self
    }

    pub fn with_ints(mut self, ints: Vec<i32>) -> Self {
        self.int_payload = ints;
        self
    }
}
