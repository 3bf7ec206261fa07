//! Shared fixtures: the tavern content and an authority/follower world wired
//! through the in-process loopback.
#![allow(dead_code)]

use narrative_state::core::hub::{Loopback, SessionHub};
use narrative_state::core::library::DefinitionLibrary;
use narrative_state::core::session::{NetMode, NetRole, SessionComponent};
use narrative_state::core::settings::DialogueSettings;
use narrative_state::schema::node::{NodeId, SessionId};
use std::path::Path;
use std::sync::Arc;

pub fn library() -> Arc<DefinitionLibrary> {
    Arc::new(DefinitionLibrary::load_dir(Path::new("content/tavern")).unwrap())
}

pub fn settings() -> DialogueSettings {
    DialogueSettings::load_from_ron(Path::new("content/settings.ron")).unwrap()
}

pub fn authority(id: u64, library: &Arc<DefinitionLibrary>) -> SessionComponent {
    session(id, NetRole::Authority, library, settings())
}

pub fn follower(id: u64, library: &Arc<DefinitionLibrary>) -> SessionComponent {
    session(id, NetRole::Follower, library, settings())
}

fn session(id: u64, role: NetRole, library: &Arc<DefinitionLibrary>, settings: DialogueSettings) -> SessionComponent {
    SessionComponent::builder()
        .id(id)
        .role(role)
        .mode(NetMode::Networked)
        .with_settings(settings)
        .with_library(library.clone())
        .build()
        .unwrap()
}

pub struct World {
    pub hub: SessionHub,
    pub net: Loopback,
}

impl World {
    /// One authority in the hub and one follower on the loopback per ID.
    pub fn new(ids: &[u64]) -> Self {
        Self::with_settings(ids, settings())
    }

    pub fn with_settings(ids: &[u64], settings: DialogueSettings) -> Self {
        let library = library();
        let mut hub = SessionHub::new(library.clone(), settings.clone());
        let mut net = Loopback::new();
        for &id in ids {
            hub.add_session(session(id, NetRole::Authority, &library, settings.clone()))
                .unwrap();
            net.add_follower(session(id, NetRole::Follower, &library, settings.clone()))
                .unwrap();
        }
        World { hub, net }
    }

    pub fn authority(&mut self, id: u64) -> &mut SessionComponent {
        self.hub.session_mut(SessionId(id)).unwrap()
    }

    pub fn follower(&mut self, id: u64) -> &mut SessionComponent {
        self.net.follower_mut(SessionId(id)).unwrap()
    }

    pub fn deliver(&mut self) {
        self.net.deliver(&mut self.hub);
    }

    pub fn advance(&mut self, seconds: f32) {
        self.net.advance(&mut self.hub, seconds);
    }
}

pub fn id(s: &str) -> NodeId {
    NodeId::new(s)
}

/// Current node of a session's dialogue, if it is in one.
pub fn current_node(session: &SessionComponent) -> Option<String> {
    session
        .dialogue()
        .and_then(|d| d.current_node_id())
        .map(|n| n.as_str().to_string())
}
