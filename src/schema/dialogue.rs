/// Dialogue definitions: lines, speakers, NPC/player reply nodes, and the dialogue asset.
use serde::{Deserialize, Serialize};

use super::node::{ConditionSpec, EventSpec, GraphPos, NarrativeNode, NodeId};

/// Reserved speaker ID used for every player line.
pub const PLAYER_SPEAKER_ID: &str = "Player";

/// When a line is considered finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineDuration {
    /// Pick one of the concrete policies from the line's content.
    #[default]
    Default,
    UntilAudioEnds,
    UntilSequenceEnds,
    AfterReadingTime,
    AfterFixedDuration,
    /// Wait until the line is skipped.
    Never,
}

/// Reference to a sound asset, with its length when known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRef {
    pub asset: String,
    #[serde(default)]
    pub seconds: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DialogueLine {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub duration: LineDuration,
    #[serde(default)]
    pub fixed_duration_seconds: f32,
    #[serde(default)]
    pub audio: Option<AudioRef>,
    /// Camera sequence played while the line is shown.
    #[serde(default)]
    pub shot: Option<String>,
    #[serde(default)]
    pub animation: Option<String>,
    #[serde(default)]
    pub facial_animation: Option<String>,
}

impl DialogueLine {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// A line that shows, plays, and films nothing.
    pub fn is_empty(&self) -> bool {
        !self.has_text() && self.audio.is_none() && self.shot.is_none()
    }
}

/// Who says a line and how their avatar is found.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeakerInfo {
    pub id: String,
    /// Class spawned as the avatar when none is found by tag.
    #[serde(default)]
    pub avatar_class: Option<String>,
    /// Tag used to locate an existing avatar in the world.
    #[serde(default)]
    pub avatar_tag: Option<String>,
    /// Shot used for this speaker's lines when a line names none.
    #[serde(default)]
    pub default_shot: Option<String>,
}

impl SpeakerInfo {
    pub fn named(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }
}

/// A line spoken by an NPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcNode {
    pub id: NodeId,
    pub speaker: String,
    #[serde(default)]
    pub line: DialogueLine,
    #[serde(default)]
    pub alternative_lines: Vec<DialogueLine>,
    /// Next NPC lines, tried in graph order.
    #[serde(default)]
    pub npc_follow_ups: Vec<NodeId>,
    /// Replies offered once the NPC chain ends here.
    #[serde(default)]
    pub player_follow_ups: Vec<NodeId>,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
    #[serde(default = "default_true")]
    pub skippable: bool,
    #[serde(default)]
    pub pos: GraphPos,
}

/// A reply the player can choose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerNode {
    pub id: NodeId,
    #[serde(default)]
    pub line: DialogueLine,
    #[serde(default)]
    pub alternative_lines: Vec<DialogueLine>,
    /// Text shown in the option list; falls back to the line text.
    #[serde(default)]
    pub option_text: String,
    #[serde(default)]
    pub hint_text: String,
    #[serde(default)]
    pub auto_select: bool,
    #[serde(default)]
    pub npc_follow_ups: Vec<NodeId>,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
    #[serde(default = "default_true")]
    pub skippable: bool,
    #[serde(default)]
    pub pos: GraphPos,
}

fn default_true() -> bool {
    true
}

impl NpcNode {
    pub fn new(id: &str, speaker: &str, text: &str) -> Self {
        Self {
            id: NodeId::new(id),
            speaker: speaker.to_string(),
            line: DialogueLine::text(text),
            alternative_lines: Vec::new(),
            npc_follow_ups: Vec::new(),
            player_follow_ups: Vec::new(),
            conditions: Vec::new(),
            events: Vec::new(),
            skippable: true,
            pos: GraphPos::default(),
        }
    }

    /// Content-free passthrough node.
    pub fn is_routing(&self) -> bool {
        self.line.is_empty() && self.events.is_empty()
    }
}

impl PlayerNode {
    pub fn new(id: &str, text: &str) -> Self {
        Self {
            id: NodeId::new(id),
            line: DialogueLine::text(text),
            alternative_lines: Vec::new(),
            option_text: String::new(),
            hint_text: String::new(),
            auto_select: false,
            npc_follow_ups: Vec::new(),
            conditions: Vec::new(),
            events: Vec::new(),
            skippable: true,
            pos: GraphPos::default(),
        }
    }

    pub fn is_routing(&self) -> bool {
        self.line.is_empty() && self.events.is_empty()
    }

    /// Routing replies are always picked without waiting for input.
    pub fn is_auto_select(&self) -> bool {
        self.auto_select || self.is_routing()
    }

    pub fn option_text(&self) -> &str {
        if self.option_text.trim().is_empty() {
            &self.line.text
        } else {
            &self.option_text
        }
    }

    /// Explicit hint, else the hints of this reply's events joined with ", ".
    pub fn hint_text(&self) -> String {
        if !self.hint_text.trim().is_empty() {
            return self.hint_text.clone();
        }
        self.events
            .iter()
            .filter_map(|e| e.hint.as_deref())
            .filter(|h| !h.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl NarrativeNode for NpcNode {
    fn id(&self) -> &NodeId {
        &self.id
    }
    fn conditions(&self) -> &[ConditionSpec] {
        &self.conditions
    }
    fn events(&self) -> &[EventSpec] {
        &self.events
    }
    fn pos(&self) -> GraphPos {
        self.pos
    }
}

impl NarrativeNode for PlayerNode {
    fn id(&self) -> &NodeId {
        &self.id
    }
    fn conditions(&self) -> &[ConditionSpec] {
        &self.conditions
    }
    fn events(&self) -> &[EventSpec] {
        &self.events
    }
    fn pos(&self) -> GraphPos {
        self.pos
    }
}

/// A dialogue asset as authored. Nodes reference each other by ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueDef {
    pub name: String,
    pub root: NodeId,
    pub npc_nodes: Vec<NpcNode>,
    #[serde(default)]
    pub player_nodes: Vec<PlayerNode>,
    #[serde(default)]
    pub speakers: Vec<SpeakerInfo>,
    #[serde(default)]
    pub player_speaker: SpeakerInfo,
    /// Player keeps moving while talking; single replies are picked automatically.
    #[serde(default)]
    pub free_movement: bool,
    #[serde(default = "default_true")]
    pub can_be_exited: bool,
}

impl DialogueDef {
    pub fn new(name: &str, root: &str) -> Self {
        Self {
            name: name.to_string(),
            root: NodeId::new(root),
            npc_nodes: Vec::new(),
            player_nodes: Vec::new(),
            speakers: Vec::new(),
            player_speaker: SpeakerInfo::default(),
            free_movement: false,
            can_be_exited: true,
        }
    }

    pub fn npc(&self, id: &NodeId) -> Option<&NpcNode> {
        self.npc_nodes.iter().find(|n| &n.id == id)
    }

    pub fn player(&self, id: &NodeId) -> Option<&PlayerNode> {
        self.player_nodes.iter().find(|n| &n.id == id)
    }

    pub fn speaker(&self, id: &str) -> Option<&SpeakerInfo> {
        self.speakers.iter().find(|s| s.id == id)
    }
}
