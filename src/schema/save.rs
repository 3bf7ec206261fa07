use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::node::NodeId;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SavedBranch {
    pub branch: NodeId,
    pub task_progress: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SavedQuest {
    pub quest: String,
    pub current_state: NodeId,
    #[serde(default)]
    pub branches: Vec<SavedBranch>,
    #[serde(default)]
    pub reached_states: Vec<NodeId>,
}

/// Everything persisted for one session: quest progress plus the data-task ledger.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SaveRecord {
    #[serde(default)]
    pub quests: Vec<SavedQuest>,
    #[serde(default)]
    pub ledger: BTreeMap<String, i32>,
}
