/// Node identity: ID lookup tables, ID generation, and definition errors.
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::warn;

use crate::schema::node::{NarrativeNode, NodeId};

#[derive(Debug, Error, PartialEq)]
pub enum DefinitionError {
    #[error("node has an empty ID in '{0}'")]
    EmptyId(String),
    #[error("duplicate node ID '{id}' in '{owner}'")]
    DuplicateId { owner: String, id: NodeId },
    #[error("'{owner}' references missing node '{id}'")]
    DanglingReference { owner: String, id: NodeId },
    #[error("dialogue '{0}' has no NPC nodes")]
    NoNpcNodes(String),
    #[error("dialogue '{0}' root node is missing")]
    MissingRoot(String),
    #[error("quest '{0}' has no states")]
    NoStates(String),
    #[error("quest '{0}' has no branches")]
    NoBranches(String),
    #[error("quest '{0}' start state is missing")]
    MissingStartState(String),
    #[error("task '{task}' in '{owner}' needs a required quantity of at least 1")]
    InvalidQuantity { owner: String, task: String },
}

/// ID → index table for one node list of a graph.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    index: FxHashMap<NodeId, usize>,
}

impl NodeRegistry {
    /// Index `nodes`, rejecting empty and duplicate IDs.
    pub fn build<'a, N, I>(owner: &str, nodes: I) -> Result<Self, DefinitionError>
    where
        N: NarrativeNode + 'a,
        I: IntoIterator<Item = &'a N>,
    {
        let mut index = FxHashMap::default();
        for (i, node) in nodes.into_iter().enumerate() {
            if node.id().is_empty() {
                return Err(DefinitionError::EmptyId(owner.to_string()));
            }
            if index.insert(node.id().clone(), i).is_some() {
                return Err(DefinitionError::DuplicateId {
                    owner: owner.to_string(),
                    id: node.id().clone(),
                });
            }
        }
        Ok(Self { index })
    }

    pub fn get(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Resolve wire IDs to indices, keeping order and skipping unknown IDs.
    pub fn resolve_ids(&self, ids: &[NodeId]) -> Vec<usize> {
        ids.iter()
            .filter_map(|id| {
                let found = self.get(id);
                if found.is_none() {
                    warn!(node = %id, "could not resolve node ID; definitions may differ between peers");
                }
                found
            })
            .collect()
    }
}

/// IDs of `nodes[indices]`, in order.
pub fn ids_of<N: NarrativeNode>(nodes: &[N], indices: &[usize]) -> Vec<NodeId> {
    indices
        .iter()
        .filter_map(|&i| nodes.get(i).map(|n| n.id().clone()))
        .collect()
}

/// `{asset}_{speaker}_{FirstFourWords}`, keeping letters only in the word part.
pub fn generate_id_from_text(asset: &str, speaker: &str, text: &str) -> NodeId {
    let words: String = text
        .split_whitespace()
        .take(4)
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    let letters: String = words.chars().filter(|c| c.is_alphabetic()).collect();

    let mut id = String::new();
    if !asset.is_empty() {
        id.push_str(asset);
        id.push('_');
    }
    id.push_str(speaker);
    id.push('_');
    id.push_str(&letters);
    NodeId(id)
}

/// Append `1`, `2`, ... to `id` until it is not in `taken`.
pub fn ensure_unique_id(id: &NodeId, taken: &FxHashSet<NodeId>) -> NodeId {
    if !taken.contains(id) {
        return id.clone();
    }
    let mut suffix = 1u32;
    loop {
        let candidate = NodeId(format!("{}{}", id.0, suffix));
        if !taken.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
