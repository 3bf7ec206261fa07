pub mod condition;
pub mod dialogue;
pub mod event;
pub mod hub;
pub mod ledger;
pub mod library;
pub mod media;
pub mod notification;
pub mod party;
pub mod persistence;
pub mod quest;
pub mod registry;
pub mod replication;
pub mod session;
pub mod settings;
pub mod timer;
