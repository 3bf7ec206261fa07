/// Quest replication tests: the ordered update log between authority and follower.
mod common;

use common::{authority, follower, id, library, World};
use narrative_state::core::notification::Notification;
use narrative_state::core::quest::QuestCompletion;
use narrative_state::schema::message::ClientMessage;
use narrative_state::schema::update::{NarrativeUpdate, UpdateKind};

#[test]
fn follower_replays_log_in_order() {
    let mut w = World::new(&[1]);
    assert!(w.authority(1).begin_quest("RatProblem", None));
    for _ in 0..3 {
        assert!(w.authority(1).complete_data_task("Kill", "Rat", 1));
    }
    w.deliver();

    let f = w.follower(1);
    let quest = f.quest("RatProblem").unwrap();
    assert_eq!(quest.current_state_id(), Some(&id("Report")));
    assert_eq!(quest.completion(), QuestCompletion::Started);
    assert_eq!(quest.task(0, 0).unwrap().progress, 3);
    assert_eq!(f.data_task_count("Kill", "Rat"), 3);

    w.authority(1).complete_data_task("Report", "Barkeep", 1);
    w.deliver();
    assert!(w.follower(1).is_quest_succeeded("RatProblem"));
    assert!(w.follower(1).drain_notifications().contains(&Notification::QuestSucceeded {
        quest: "RatProblem".to_string(),
        message: "Drinks are on the house.".to_string(),
    }));
}

#[test]
fn replaying_an_acknowledged_log_changes_nothing() {
    let library = library();
    let mut a = authority(1, &library);
    let mut f = follower(1, &library);
    a.begin_quest("RatProblem", None);
    a.complete_data_task("Kill", "Rat", 2);
    let log = a.core().update_log().entries().to_vec();
    assert_eq!(log.len(), 3);

    f.receive(ClientMessage::UpdateLog(log.clone()));
    let first = f.to_save_record();
    f.drain_notifications();

    f.receive(ClientMessage::UpdateLog(log));
    assert_eq!(f.to_save_record(), first);
    assert!(f.drain_notifications().is_empty());
    assert!(f.core().update_log().unacked().is_empty());
}

#[test]
fn follower_never_takes_branches_itself() {
    let library = library();
    let mut f = follower(1, &library);
    f.receive(ClientMessage::UpdateLog(vec![
        NarrativeUpdate::new(UpdateKind::BeginQuest, "RatProblem"),
        NarrativeUpdate::new(UpdateKind::TaskProgressMade, "RatProblem")
            .with_payload("KillRats")
            .with_ints(vec![0, 3]),
    ]));

    let quest = f.quest("RatProblem").unwrap();
    assert_eq!(quest.current_state_id(), Some(&id("Start")));
    assert_eq!(quest.task(0, 0).unwrap().progress, 3);
}

#[test]
fn unresolvable_entries_are_skipped_once() {
    let library = library();
    let mut f = follower(1, &library);
    let ghost = NarrativeUpdate::new(UpdateKind::TaskProgressMade, "Ghost")
        .with_payload("Haunt")
        .with_ints(vec![0, 1]);

    f.receive(ClientMessage::UpdateLog(vec![ghost.clone()]));
    assert!(f.quests().is_empty());

    f.receive(ClientMessage::UpdateLog(vec![
        ghost,
        NarrativeUpdate::new(UpdateKind::BeginQuest, "RatProblem"),
    ]));
    assert!(f.is_quest_in_progress("RatProblem"));
    assert!(f.core().update_log().unacked().is_empty());
}

#[test]
fn restart_and_forget_replicate() {
    let mut w = World::new(&[1]);
    w.authority(1).begin_quest("RatProblem", None);
    w.authority(1).complete_data_task("Kill", "Rat", 2);
    w.deliver();
    assert_eq!(w.follower(1).quest("RatProblem").unwrap().task(0, 0).unwrap().progress, 2);

    assert!(w.authority(1).restart_quest("RatProblem", None));
    w.deliver();
    assert_eq!(w.follower(1).quest("RatProblem").unwrap().task(0, 0).unwrap().progress, 0);
    assert_eq!(w.follower(1).data_task_count("Kill", "Rat"), 2);
    assert!(w.follower(1).drain_notifications().contains(&Notification::QuestRestarted {
        quest: "RatProblem".to_string(),
    }));

    assert!(w.authority(1).forget_quest("RatProblem"));
    w.deliver();
    assert!(w.authority(1).quest("RatProblem").is_none());
    assert!(w.follower(1).quest("RatProblem").is_none());
}

#[test]
fn state_jumps_replicate() {
    let mut w = World::new(&[1]);
    w.authority(1).begin_quest("RatProblem", None);
    assert!(w.authority(1).enter_quest_state("RatProblem", &id("Report")));
    let logged = w.authority(1).core().update_log().len();
    assert!(!w.authority(1).enter_quest_state("RatProblem", &id("Nowhere")));
    assert_eq!(w.authority(1).core().update_log().len(), logged);
    w.deliver();

    let quest = w.follower(1).quest("RatProblem").unwrap();
    assert_eq!(quest.current_state_id(), Some(&id("Report")));
    let reached: Vec<&str> = quest.reached_states().iter().map(|s| s.as_str()).collect();
    assert_eq!(reached, vec!["Start", "Report"]);
}

#[test]
fn followers_cannot_mutate_quests() {
    let mut w = World::new(&[1]);
    assert!(!w.follower(1).begin_quest("RatProblem", None));
    assert!(!w.follower(1).complete_data_task("Kill", "Rat", 1));
    assert!(!w.follower(1).forget_quest("RatProblem"));
    w.deliver();
    assert!(w.authority(1).quests().is_empty());
    assert!(w.follower(1).quests().is_empty());
}

#[test]
fn begun_quests_cannot_be_begun_twice() {
    let mut w = World::new(&[1]);
    assert!(w.authority(1).begin_quest("RatProblem", None));
    assert!(!w.authority(1).begin_quest("RatProblem", None));
    assert!(!w.authority(1).begin_quest("Unknown", None));
    assert_eq!(w.authority(1).in_progress_quests(), vec!["RatProblem"]);
}
