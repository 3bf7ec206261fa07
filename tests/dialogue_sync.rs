/// Dialogue synchronization tests: an authority and its follower over the loopback.
mod common;

use common::{current_node, id, World};
use narrative_state::core::dialogue::DialoguePhase;
use narrative_state::core::notification::Notification;

fn phase(session: &narrative_state::core::session::SessionComponent) -> Option<DialoguePhase> {
    session.dialogue().map(|d| d.phase())
}

#[test]
fn follower_mirrors_chunks_and_selection() {
    let mut w = World::new(&[1]);
    assert!(w.authority(1).begin_dialogue("Tavern", None));
    w.deliver();

    // The hidden "brag" reply never reaches the follower.
    let authority_chunk = w.authority(1).dialogue().unwrap().chunk_ids();
    let follower_chunk = w.follower(1).dialogue().unwrap().chunk_ids();
    assert_eq!(authority_chunk, follower_chunk);
    assert_eq!(follower_chunk.npc_chain, vec![id("rumour")]);
    assert_eq!(follower_chunk.responses, vec![id("ask_rats"), id("leave")]);
    assert_eq!(current_node(w.follower(1)).as_deref(), Some("welcome"));

    w.advance(4.0);
    assert_eq!(phase(w.authority(1)), Some(DialoguePhase::AwaitingPlayerSelection));
    assert_eq!(phase(w.follower(1)), Some(DialoguePhase::AwaitingPlayerSelection));
    assert!(w.follower(1).has_completed_data_task("PlayDialogueNode", "welcome", 1));

    assert!(w.follower(1).try_select_option(&id("ask_rats")));
    w.deliver();
    assert_eq!(current_node(w.authority(1)).as_deref(), Some("ask_rats"));
    assert_eq!(current_node(w.follower(1)).as_deref(), Some("ask_rats"));

    // The reply leads to a new chunk whose first line begins the quest.
    w.advance(2.0);
    assert_eq!(current_node(w.authority(1)).as_deref(), Some("rats_info"));
    assert_eq!(current_node(w.follower(1)).as_deref(), Some("rats_info"));
    assert!(w.authority(1).is_quest_in_progress("RatProblem"));
    assert!(w.follower(1).is_quest_in_progress("RatProblem"));

    let notes = w.follower(1).drain_notifications();
    assert!(notes.contains(&Notification::OptionSelected {
        option: id("ask_rats"),
        selector: None,
    }));
}

#[test]
fn follower_plays_the_authoritys_auto_selection() {
    let mut settings = common::settings();
    settings.auto_select_single_response = true;
    let mut w = World::with_settings(&[1], settings);
    w.authority(1).begin_dialogue("Tavern", None);
    w.deliver();

    // Two replies on offer, so both sides wait.
    w.advance(4.0);
    assert_eq!(phase(w.follower(1)), Some(DialoguePhase::AwaitingPlayerSelection));
    assert!(w.follower(1).try_select_option(&id("ask_rats")));
    w.deliver();
    w.advance(2.0);
    assert_eq!(current_node(w.follower(1)).as_deref(), Some("rats_info"));
    w.follower(1).drain_notifications();

    // "rats_info" offers only "leave"; the authority picks it once the line ends.
    w.advance(3.0);
    assert_eq!(current_node(w.authority(1)).as_deref(), Some("leave"));
    assert_eq!(current_node(w.follower(1)).as_deref(), Some("leave"));
    let notes = w.follower(1).drain_notifications();
    let picked = notes
        .iter()
        .filter(|n| {
            **n == Notification::OptionSelected {
                option: id("leave"),
                selector: None,
            }
        })
        .count();
    assert_eq!(picked, 1);

    w.advance(2.5);
    assert!(!w.authority(1).is_in_dialogue());
    assert!(!w.follower(1).is_in_dialogue());
}

#[test]
fn skip_resends_remaining_chunk() {
    let mut w = World::new(&[1]);
    w.authority(1).begin_dialogue("Tavern", None);
    w.deliver();
    w.follower(1).drain_notifications();

    assert!(w.follower(1).try_skip_current_line());
    w.deliver();
    assert_eq!(current_node(w.authority(1)).as_deref(), Some("rumour"));
    assert_eq!(current_node(w.follower(1)).as_deref(), Some("rumour"));

    // The skipped line's timer is gone, so nothing advances twice.
    w.advance(2.0);
    assert_eq!(phase(w.follower(1)), Some(DialoguePhase::AwaitingPlayerSelection));
    let notes = w.follower(1).drain_notifications();
    let started = notes
        .iter()
        .filter(|n| matches!(n, Notification::NpcLineStarted { node, .. } if node.as_str() == "rumour"))
        .count();
    let offered = notes
        .iter()
        .filter(|n| matches!(n, Notification::RepliesAvailable { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(offered, 1);
    assert!(!notes
        .iter()
        .any(|n| matches!(n, Notification::NpcLineFinished { node, .. } if node.as_str() == "welcome")));
}

#[test]
fn followers_ask_instead_of_acting() {
    let mut w = World::new(&[1]);
    w.authority(1).begin_dialogue("Tavern", None);
    w.deliver();

    assert!(!w.follower(1).select_option(&id("leave")));
    assert!(!w.follower(1).skip_current_line());
    assert!(!w.follower(1).begin_dialogue("Tavern", None));

    assert!(w.follower(1).try_exit_dialogue());
    w.deliver();
    assert!(!w.authority(1).is_in_dialogue());
    assert!(!w.follower(1).is_in_dialogue());
    assert!(w.follower(1).drain_notifications().contains(&Notification::DialogueFinished {
        dialogue: "Tavern".to_string(),
        replaced: false,
    }));
}

#[test]
fn beginning_again_replaces_running_dialogue() {
    let mut w = World::new(&[1]);
    w.authority(1).begin_dialogue("Tavern", None);
    w.authority(1).begin_dialogue("Tavern", None);
    w.deliver();

    let replaced = Notification::DialogueFinished {
        dialogue: "Tavern".to_string(),
        replaced: true,
    };
    assert!(w.authority(1).drain_notifications().contains(&replaced));
    assert!(w.follower(1).drain_notifications().contains(&replaced));
    assert_eq!(current_node(w.follower(1)).as_deref(), Some("welcome"));
}

#[test]
fn last_reply_ends_dialogue_everywhere() {
    let mut w = World::new(&[1]);
    w.authority(1).begin_dialogue("Tavern", None);
    w.deliver();
    w.advance(4.0);

    assert!(w.follower(1).try_select_option(&id("leave")));
    w.deliver();
    w.advance(2.0);

    assert!(!w.authority(1).is_in_dialogue());
    assert!(!w.follower(1).is_in_dialogue());
    assert!(w.authority(1).has_completed_data_task("PlayDialogueNode", "leave", 1));
}

#[test]
fn unknown_dialogue_is_rejected_cleanly() {
    let mut w = World::new(&[1]);
    assert!(!w.authority(1).begin_dialogue("Nowhere", None));
    w.deliver();
    assert!(!w.follower(1).is_in_dialogue());
    assert!(w.hub.take_messages(narrative_state::schema::node::SessionId(1)).is_empty());
}
