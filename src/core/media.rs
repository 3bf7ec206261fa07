/// Collaborator contracts for line playback and actor management.
///
/// The engine never plays audio or moves cameras itself; it asks these traits
/// to, and learns about finished media through `SessionComponent::media_finished`.
use crate::schema::dialogue::{DialogueLine, SpeakerInfo};
use crate::schema::node::{ActorId, NodeId};

/// Which kind of media a line is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Sequence,
}

pub trait MediaPlayer {
    /// Start a line's audio, animation, and shot.
    fn play_line(&mut self, node: &NodeId, line: &DialogueLine, speaker: &SpeakerInfo, avatar: Option<ActorId>);
    /// Stop whatever the current line started.
    fn stop_line(&mut self);
}

pub trait ActorProvider {
    /// Find or spawn the avatar for a speaker.
    fn link_speaker_avatar(&mut self, speaker: &SpeakerInfo) -> Option<ActorId>;
    /// Head or eye-line location of an avatar.
    fn head_location(&self, _avatar: ActorId) -> Option<[f32; 3]> {
        None
    }
    fn spawn_actor(&mut self, class: &str) -> Option<ActorId>;
    fn destroy_actor(&mut self, actor: ActorId);
}

/// Plays nothing. Used by dedicated servers and headless tools.
#[derive(Debug, Default)]
pub struct NullMedia;

impl MediaPlayer for NullMedia {
    fn play_line(&mut self, _: &NodeId, _: &DialogueLine, _: &SpeakerInfo, _: Option<ActorId>) {}
    fn stop_line(&mut self) {}
}

/// Hands out sequential actor IDs and forgets them on destroy.
#[derive(Debug, Default)]
pub struct NullActors {
    next: u64,
    pub live: Vec<ActorId>,
}

impl ActorProvider for NullActors {
    fn link_speaker_avatar(&mut self, speaker: &SpeakerInfo) -> Option<ActorId> {
        speaker.avatar_class.as_deref().and_then(|class| self.spawn_actor(class))
    }

    fn spawn_actor(&mut self, _class: &str) -> Option<ActorId> {
        self.next += 1;
        let actor = ActorId(self.next);
        self.live.push(actor);
        Some(actor)
    }

    fn destroy_actor(&mut self, actor: ActorId) {
        self.live.retain(|a| *a != actor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_actors_spawn_only_with_class() {
        let mut actors = NullActors::default();
        assert!(actors.link_speaker_avatar(&SpeakerInfo::named("Barkeep")).is_none());

        let mut guard = SpeakerInfo::named("Guard");
        guard.avatar_class = Some("GuardPawn".to_string());
        let avatar = actors.link_speaker_avatar(&guard).unwrap();
        assert_eq!(actors.live, vec![avatar]);
        actors.destroy_actor(avatar);
        assert!(actors.live.is_empty());
    }
}
