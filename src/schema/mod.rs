pub mod dialogue;
pub mod message;
pub mod node;
pub mod quest;
pub mod save;
pub mod update;
