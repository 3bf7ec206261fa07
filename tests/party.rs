/// Party tests: shared dialogue, aggregated conditions, and member fan-out.
mod common;

use common::{current_node, id, World};
use narrative_state::core::dialogue::DialoguePhase;
use narrative_state::core::notification::Notification;
use narrative_state::schema::node::{PartyId, SessionId};

/// Members 1 (leader) and 2, where only member 2 has cleared the cellar.
fn tavern_party() -> (World, PartyId) {
    let mut w = World::new(&[1, 2]);
    w.authority(2).begin_quest("RatProblem", None);
    w.authority(2).complete_data_task("Kill", "Rat", 3);
    let party = w.hub.create_party().unwrap();
    assert!(w.hub.add_party_member(party, SessionId(1)));
    assert!(w.hub.add_party_member(party, SessionId(2)));
    w.deliver();
    (w, party)
}

#[test]
fn any_player_passes_when_one_member_passes() {
    let (mut w, party) = tavern_party();
    assert_eq!(w.hub.party_leader(party), Some(SessionId(1)));
    assert!(w.hub.begin_party_dialogue(party, "Tavern", None));
    w.deliver();

    // "brag" needs the quest in Report: member 1 fails it, member 2 passes.
    let shared = w.hub.party(party).unwrap().session().dialogue().unwrap().chunk_ids();
    assert_eq!(shared.responses, vec![id("ask_rats"), id("brag"), id("leave")]);
    for member in [1, 2] {
        let f = w.follower(member);
        assert_eq!(f.party(), Some(party));
        assert_eq!(f.party_dialogue(), Some(party));
        assert_eq!(f.dialogue().unwrap().chunk_ids(), shared);
    }
}

#[test]
fn member_reply_plays_for_everyone() {
    let (mut w, party) = tavern_party();
    w.hub.begin_party_dialogue(party, "Tavern", None);
    w.deliver();
    w.advance(4.0);
    assert_eq!(
        w.follower(1).dialogue().map(|d| d.phase()),
        Some(DialoguePhase::AwaitingPlayerSelection)
    );

    assert!(w.follower(2).try_select_option(&id("brag")));
    w.deliver();
    let shared = w.hub.party(party).unwrap().session();
    assert_eq!(current_node(shared).as_deref(), Some("brag"));
    assert_eq!(current_node(w.follower(1)).as_deref(), Some("brag"));
    assert!(w.follower(1).drain_notifications().contains(&Notification::OptionSelected {
        option: id("brag"),
        selector: Some(SessionId(2)),
    }));

    // "thanks" hands its data task to every member.
    w.advance(2.0);
    assert_eq!(current_node(w.follower(1)).as_deref(), Some("thanks"));
    assert_eq!(current_node(w.follower(2)).as_deref(), Some("thanks"));
    assert!(w.authority(2).is_quest_succeeded("RatProblem"));
    assert!(w.follower(2).is_quest_succeeded("RatProblem"));
    assert!(w.authority(1).has_completed_data_task("Report", "Barkeep", 1));
    assert!(w.authority(1).quest("RatProblem").is_none());
}

#[test]
fn member_data_tasks_forward_to_party() {
    let (mut w, party) = tavern_party();
    w.authority(1).complete_data_task("Find", "Ring", 1);
    w.hub.pump();
    let shared = w.hub.party(party).unwrap().session();
    assert!(shared.has_completed_data_task("Find", "Ring", 1));
}

#[test]
fn leaving_mid_dialogue_exits_only_that_member() {
    let (mut w, party) = tavern_party();
    w.hub.begin_party_dialogue(party, "Tavern", None);
    w.deliver();

    assert!(w.hub.remove_party_member(party, SessionId(1)));
    w.deliver();
    assert_eq!(w.hub.party_leader(party), Some(SessionId(2)));
    assert!(!w.follower(1).is_in_dialogue());
    assert_eq!(w.follower(1).party(), None);
    assert!(w.follower(2).is_in_dialogue());
    assert!(!w.hub.remove_party_member(party, SessionId(1)));
}

#[test]
fn party_dialogue_replaces_a_members_own() {
    let (mut w, party) = tavern_party();
    w.authority(1).begin_dialogue("Tavern", None);
    w.deliver();
    assert!(w.follower(1).is_in_dialogue());

    w.hub.begin_party_dialogue(party, "Tavern", None);
    w.deliver();
    assert!(!w.authority(1).is_in_dialogue());
    assert_eq!(w.authority(1).party_dialogue(), Some(party));
    assert_eq!(w.follower(1).party_dialogue(), Some(party));
    assert_eq!(current_node(w.follower(1)).as_deref(), Some("welcome"));
}

#[test]
fn member_exit_request_ends_the_shared_dialogue() {
    let (mut w, party) = tavern_party();
    w.hub.begin_party_dialogue(party, "Tavern", None);
    w.deliver();

    assert!(!w.hub.select_party_option(party, SessionId(9), &id("leave")));
    assert!(w.follower(2).try_exit_dialogue());
    w.deliver();
    assert!(!w.hub.party(party).unwrap().session().is_in_dialogue());
    for member in [1, 2] {
        assert!(!w.follower(member).is_in_dialogue());
        assert_eq!(w.authority(member).party_dialogue(), None);
    }
}
