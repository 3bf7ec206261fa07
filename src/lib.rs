//! Narrative State: replicated dialogue and quest state machines for games.
//!
//! An authoritative session walks dialogue graphs and quest state machines,
//! and keeps remote followers in step by sending node-ID chunks for dialogue
//! and an ordered, acknowledged update log for quests. Parties share one
//! dialogue across several sessions and aggregate conditions over members.

pub mod core;
pub mod schema;
