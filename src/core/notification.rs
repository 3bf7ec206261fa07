/// Observable narrative events, queued by a session for its host to drain.
use crate::schema::node::{NodeId, PartyId, SessionId};

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    DialogueBegan {
        dialogue: String,
    },
    /// `replaced` is true when another dialogue is starting in its place.
    DialogueFinished {
        dialogue: String,
        replaced: bool,
    },
    NpcLineStarted {
        node: NodeId,
        speaker: String,
        text: String,
    },
    NpcLineFinished {
        node: NodeId,
        speaker: String,
    },
    PlayerLineStarted {
        node: NodeId,
        text: String,
    },
    PlayerLineFinished {
        node: NodeId,
    },
    RepliesAvailable {
        options: Vec<NodeId>,
    },
    OptionSelected {
        option: NodeId,
        selector: Option<SessionId>,
    },
    QuestStarted {
        quest: String,
    },
    QuestNewState {
        quest: String,
        state: NodeId,
    },
    QuestSucceeded {
        quest: String,
        message: String,
    },
    QuestFailed {
        quest: String,
        message: String,
    },
    QuestForgotten {
        quest: String,
    },
    QuestRestarted {
        quest: String,
    },
    TaskProgressChanged {
        quest: String,
        branch: NodeId,
        task_index: usize,
        old: i32,
        new: i32,
        required: i32,
    },
    TaskCompleted {
        quest: String,
        branch: NodeId,
        task_index: usize,
    },
    BranchCompleted {
        quest: String,
        branch: NodeId,
    },
    DataTaskCompleted {
        task: String,
        argument: String,
    },
    /// An event with no built-in effect, for game code to handle.
    CustomEvent {
        event: String,
        args: Vec<String>,
    },
    PartyChanged {
        party: Option<PartyId>,
    },
    SaveBegan {
        name: String,
    },
    SaveCompleted {
        name: String,
        success: bool,
    },
    LoadBegan {
        name: String,
    },
    LoadCompleted {
        name: String,
        success: bool,
    },
}
