/// Tavern example: two players share one conversation with the barkeep.
///
/// Bram has already cleared the cellar, so the party is offered the "brag"
/// reply even though Ada has not. Ada picks it, the barkeep thanks everyone,
/// and the quest succeeds for Bram on both the authority and the follower.
///
/// Run with: cargo run --example tavern
use narrative_state::core::hub::{Loopback, SessionHub};
use narrative_state::core::library::DefinitionLibrary;
use narrative_state::core::notification::Notification;
use narrative_state::core::session::{NetMode, NetRole, SessionComponent};
use narrative_state::core::settings::DialogueSettings;
use narrative_state::schema::node::{NodeId, SessionId};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const ADA: SessionId = SessionId(1);
const BRAM: SessionId = SessionId(2);

fn session(
    id: SessionId,
    role: NetRole,
    name: &str,
    library: &Arc<DefinitionLibrary>,
    settings: &DialogueSettings,
) -> SessionComponent {
    let mut variables: FxHashMap<String, String> = FxHashMap::default();
    variables.insert("player_name".to_string(), name.to_string());
    SessionComponent::builder()
        .id(id.0)
        .role(role)
        .mode(NetMode::Networked)
        .seed(2026)
        .with_settings(settings.clone())
        .with_library(library.clone())
        .with_variables(Box::new(variables))
        .build()
        .expect("Failed to build session")
}

fn show(label: &str, net: &mut Loopback, id: SessionId) {
    let Some(follower) = net.follower_mut(id) else {
        return;
    };
    for note in follower.drain_notifications() {
        match note {
            Notification::NpcLineStarted { speaker, text, .. } => println!("[{}] {}: {}", label, speaker, text),
            Notification::PlayerLineStarted { text, .. } => println!("[{}] > {}", label, text),
            Notification::RepliesAvailable { options } => {
                let options: Vec<&str> = options.iter().map(NodeId::as_str).collect();
                println!("[{}]   replies: {}", label, options.join(" | "));
            }
            Notification::OptionSelected { option, selector: Some(by) } => {
                println!("[{}]   {} picked '{}'", label, by, option)
            }
            Notification::QuestStarted { quest } => println!("[{}] ** quest started: {}", label, quest),
            Notification::QuestSucceeded { quest, message } => {
                println!("[{}] ** quest succeeded: {} ({})", label, quest, message)
            }
            Notification::DialogueFinished { dialogue, .. } => println!("[{}] -- {} ends", label, dialogue),
            _ => {}
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // --- Load the tavern content ---
    let library = Arc::new(
        DefinitionLibrary::load_dir(Path::new("content/tavern")).expect("Failed to load tavern definitions"),
    );
    let settings =
        DialogueSettings::load_from_ron(Path::new("content/settings.ron")).expect("Failed to load settings");

    // --- One authority in the hub and one follower per player ---
    let mut hub = SessionHub::new(library.clone(), settings.clone());
    let mut net = Loopback::new();
    for (id, name) in [(ADA, "Ada"), (BRAM, "Bram")] {
        hub.add_session(session(id, NetRole::Authority, name, &library, &settings))
            .expect("Failed to add authority");
        net.add_follower(session(id, NetRole::Follower, name, &library, &settings))
            .expect("Failed to add follower");
    }

    // --- Bram clears the cellar alone ---
    {
        let bram = hub.session_mut(BRAM).expect("Bram is registered");
        bram.begin_quest("RatProblem", None);
        bram.complete_data_task("Kill", "Rat", 3);
    }
    net.deliver(&mut hub);
    show("Bram", &mut net, BRAM);

    // --- Form the party and talk to the barkeep together ---
    let party = hub.create_party().expect("Failed to create party");
    hub.add_party_member(party, ADA);
    hub.add_party_member(party, BRAM);
    info!(%party, leader = ?hub.party_leader(party), "party formed");

    hub.begin_party_dialogue(party, "Tavern", None);
    net.deliver(&mut hub);
    show("Ada", &mut net, ADA);
    net.advance(&mut hub, 4.0);
    show("Ada", &mut net, ADA);

    // Ada's follower asks the party session to play the reply only Bram qualifies for.
    if let Some(ada) = net.follower_mut(ADA) {
        ada.try_select_option(&NodeId::new("brag"));
    }
    net.deliver(&mut hub);
    for _ in 0..4 {
        net.advance(&mut hub, 2.5);
    }
    show("Ada", &mut net, ADA);
    show("Bram", &mut net, BRAM);

    // --- Where everyone ended up ---
    for (id, name) in [(ADA, "Ada"), (BRAM, "Bram")] {
        let Some(follower) = net.follower(id) else {
            continue;
        };
        println!(
            "{}: RatProblem {:?}, reported to barkeep: {}",
            name,
            follower.quest_completion("RatProblem"),
            follower.has_completed_data_task("Report", "Barkeep", 1)
        );
    }

    if let Some(bram) = hub.session_mut(BRAM) {
        bram.save("bram", 0);
        info!(saved = ?bram.to_save_record(), "Bram's progress");
    }
}
