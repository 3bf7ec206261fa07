/// Messages exchanged between an authoritative session and its follower.
use serde::{Deserialize, Serialize};

use super::node::{NodeId, PartyId, SessionId};
use super::save::SaveRecord;
use super::update::NarrativeUpdate;

/// A dialogue chunk as it crosses the wire: node IDs, never nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkIds {
    pub npc_chain: Vec<NodeId>,
    pub responses: Vec<NodeId>,
}

/// Authority to follower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    BeginDialogue {
        dialogue: String,
        chunk: ChunkIds,
    },
    BeginPartyDialogue {
        party: PartyId,
        dialogue: String,
        chunk: ChunkIds,
    },
    ReceiveChunk(ChunkIds),
    SelectOption {
        option: NodeId,
        selector: Option<SessionId>,
    },
    ExitDialogue,
    ExitPartyDialogue,
    /// The whole update log; the follower applies entries it has not acked.
    UpdateLog(Vec<NarrativeUpdate>),
    ReceiveSave(SaveRecord),
    PartyChanged {
        party: Option<PartyId>,
    },
}

/// Follower to authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerRequest {
    SelectOption { option: NodeId },
    SkipCurrentLine,
    ExitDialogue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_message_carries_only_ids() {
        let msg = ClientMessage::ReceiveChunk(ChunkIds {
            npc_chain: vec![NodeId::new("hello")],
            responses: vec![NodeId::new("bye"), NodeId::new("ask")],
        });
        let wire = ron::to_string(&msg).unwrap();
        assert!(wire.contains("\"hello\""));
        let back: ClientMessage = ron::from_str(&wire).unwrap();
        assert_eq!(back, msg);
    }
}
