/// Quest definitions: states, branches, and the tasks that gate them.
use serde::{Deserialize, Serialize};

use super::node::{ConditionSpec, EventSpec, GraphPos, NarrativeNode, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StateKind {
    /// The quest is still in progress while in this state.
    #[default]
    Regular,
    /// Reaching this state succeeds the quest.
    Success,
    /// Reaching this state fails the quest.
    Failure,
}

/// A unit of work inside a branch.
///
/// `kind` and `argument` name the data task that advances it, so finding
/// "FindItem"/"Rusty Key" progresses a task with that pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub kind: String,
    #[serde(default)]
    pub argument: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required_quantity: i32,
    /// Optional tasks always count as complete.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub hidden: bool,
}

fn default_required() -> i32 {
    1
}

impl TaskDef {
    pub fn new(kind: &str, argument: &str, required_quantity: i32) -> Self {
        Self {
            kind: kind.to_string(),
            argument: argument.to_string(),
            description: String::new(),
            required_quantity,
            optional: false,
            hidden: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestStateDef {
    pub id: NodeId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: StateKind,
    /// Outgoing branches, by ID.
    #[serde(default)]
    pub branches: Vec<NodeId>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
    #[serde(default)]
    pub pos: GraphPos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestBranchDef {
    pub id: NodeId,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
    pub destination: NodeId,
    #[serde(default)]
    pub events: Vec<EventSpec>,
    #[serde(default)]
    pub pos: GraphPos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestDef {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_state: NodeId,
    pub states: Vec<QuestStateDef>,
    pub branches: Vec<QuestBranchDef>,
}

impl QuestStateDef {
    pub fn new(id: &str, kind: StateKind, branches: &[&str]) -> Self {
        Self {
            id: NodeId::new(id),
            description: String::new(),
            kind,
            branches: branches.iter().map(|b| NodeId::new(*b)).collect(),
            events: Vec::new(),
            pos: GraphPos::default(),
        }
    }
}

impl QuestBranchDef {
    pub fn new(id: &str, destination: &str, tasks: Vec<TaskDef>) -> Self {
        Self {
            id: NodeId::new(id),
            tasks,
            destination: NodeId::new(destination),
            events: Vec::new(),
            pos: GraphPos::default(),
        }
    }
}

impl QuestDef {
    pub fn state(&self, id: &NodeId) -> Option<&QuestStateDef> {
        self.states.iter().find(|s| &s.id == id)
    }

    pub fn branch(&self, id: &NodeId) -> Option<&QuestBranchDef> {
        self.branches.iter().find(|b| &b.id == id)
    }
}

// Quest nodes carry no guards; conditions are a dialogue concern.
impl NarrativeNode for QuestStateDef {
    fn id(&self) -> &NodeId {
        &self.id
    }
    fn conditions(&self) -> &[ConditionSpec] {
        &[]
    }
    fn events(&self) -> &[EventSpec] {
        &self.events
    }
    fn pos(&self) -> GraphPos {
        self.pos
    }
}

impl NarrativeNode for QuestBranchDef {
    fn id(&self) -> &NodeId {
        &self.id
    }
    fn conditions(&self) -> &[ConditionSpec] {
        &[]
    }
    fn events(&self) -> &[EventSpec] {
        &self.events
    }
    fn pos(&self) -> GraphPos {
        self.pos
    }
}
