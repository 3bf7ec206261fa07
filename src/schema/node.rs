use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Stable identifier of a dialogue or quest node, unique within its graph.
///
/// Node identity crosses the wire as this string; object identity never does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Newtype wrapper for session IDs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Newtype wrapper for party IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartyId(pub u64);

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "party#{}", self.0)
    }
}

/// Newtype wrapper for host-engine actor handles (pawns, controllers, avatars).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u64);

/// Editor graph position. Only used to order sibling nodes deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphPos {
    pub x: f32,
    pub y: f32,
}

impl GraphPos {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Sibling order: ascending Y, or ascending X when the graph is wired vertically.
    pub fn graph_order(&self, other: &GraphPos, vertical_wiring: bool) -> Ordering {
        if vertical_wiring {
            self.x.total_cmp(&other.x)
        } else {
            self.y.total_cmp(&other.y)
        }
    }
}

/// How a condition aggregates over a party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartyConditionPolicy {
    /// Passes if any member passes.
    #[default]
    AnyPlayerPasses,
    /// Passes only if every member passes.
    AllPlayersPass,
    /// Checked against the party leader only.
    PartyLeaderPasses,
    /// Checked against the party's own stand-in context.
    PartyPasses,
}

/// Who receives an event fired by a party dialogue or quest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartyEventPolicy {
    /// The party's own stand-in context.
    #[default]
    Party,
    /// Only the party leader.
    PartyLeader,
    /// Every member, once each.
    AllPartyMembers,
}

/// Node lifecycle point at which an event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventRuntime {
    #[default]
    Start,
    End,
    Both,
}

impl EventRuntime {
    /// Whether an event authored with `self` fires at lifecycle point `at`.
    pub fn fires_at(self, at: EventRuntime) -> bool {
        self == EventRuntime::Both || self == at
    }
}

/// A guard predicate attached to a node, resolved by name through the condition registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub condition: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Inverts the result.
    #[serde(default)]
    pub negate: bool,
    #[serde(default)]
    pub party_policy: PartyConditionPolicy,
}

impl ConditionSpec {
    pub fn new(condition: &str, args: &[&str]) -> Self {
        Self {
            condition: condition.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            negate: false,
            party_policy: PartyConditionPolicy::default(),
        }
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }

    pub fn with_policy(mut self, policy: PartyConditionPolicy) -> Self {
        self.party_policy = policy;
        self
    }
}

/// A side effect attached to a node, resolved by name through the event registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub event: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub runtime: EventRuntime,
    #[serde(default)]
    pub party_policy: PartyEventPolicy,
    /// Shown next to a player option that carries this event.
    #[serde(default)]
    pub hint: Option<String>,
}

impl EventSpec {
    pub fn new(event: &str, args: &[&str]) -> Self {
        Self {
            event: event.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            runtime: EventRuntime::default(),
            party_policy: PartyEventPolicy::default(),
            hint: None,
        }
    }

    pub fn at(mut self, runtime: EventRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_policy(mut self, policy: PartyEventPolicy) -> Self {
        self.party_policy = policy;
        self
    }
}

/// Behaviour shared by every node kind: dialogue lines, quest states, quest branches.
pub trait NarrativeNode {
    fn id(&self) -> &NodeId;
    fn conditions(&self) -> &[ConditionSpec];
    fn events(&self) -> &[EventSpec];
    fn pos(&self) -> GraphPos;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizontal_wiring_orders_by_y() {
        let a = GraphPos::new(100.0, 10.0);
        let b = GraphPos::new(0.0, 20.0);
        assert_eq!(a.graph_order(&b, false), Ordering::Less);
        assert_eq!(a.graph_order(&b, true), Ordering::Greater);
    }

    #[test]
    fn event_runtime_matching() {
        assert!(EventRuntime::Start.fires_at(EventRuntime::Start));
        assert!(!EventRuntime::Start.fires_at(EventRuntime::End));
        assert!(EventRuntime::Both.fires_at(EventRuntime::End));
        assert!(EventRuntime::Both.fires_at(EventRuntime::Start));
    }

    #[test]
    fn condition_spec_parses_with_defaults() {
        let spec: ConditionSpec =
            ron::from_str(r#"(condition: "quest_succeeded", args: ["find_the_ring"])"#).unwrap();
        assert_eq!(spec.condition, "quest_succeeded");
        assert!(!spec.negate);
        assert_eq!(spec.party_policy, PartyConditionPolicy::AnyPlayerPasses);
    }

    #[test]
    fn node_id_is_a_plain_string_in_ron() {
        let id: NodeId = ron::from_str(r#""Tavern_Barkeep_Welcome""#).unwrap();
        assert_eq!(id.as_str(), "Tavern_Barkeep_Welcome");
        assert!(NodeId::new("  ").is_empty());
    }
}
