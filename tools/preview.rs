/// Preview: interactive shell that plays dialogues and quests through an authority and a follower.
///
/// Usage: preview --definitions <dir> [--settings <path>] [--seed <n>] [--player <name>]
///
/// Commands:
///   dialogues                  - list loaded dialogues and quests
///   talk <dialogue> [node]     - begin a dialogue on the authority
///   pick <n>                   - ask the authority to select reply n
///   skip                       - ask the authority to skip the current line
///   leave                      - ask the authority to exit the dialogue
///   wait <seconds>             - advance both sides
///   begin <quest>              - begin a quest
///   task <kind> <arg> [n]      - complete a data task
///   quest <name>               - show a quest as the follower sees it
///   save <name> [slot]         - save the authority
///   load <name> [slot]         - load on the authority and resync the follower
///   log                        - show the authority's update log
///   help                       - list commands
///   quit                       - exit
use narrative_state::core::hub::{Loopback, SessionHub};
use narrative_state::core::library::DefinitionLibrary;
use narrative_state::core::notification::Notification;
use narrative_state::core::session::{NetMode, NetRole, SessionComponent};
use narrative_state::core::settings::DialogueSettings;
use narrative_state::schema::node::{NodeId, SessionId};
use rustc_hash::FxHashMap;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const PLAYER: SessionId = SessionId(1);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let mut definitions_path = None;
    let mut settings_path = None;
    let mut seed: u64 = 42;
    let mut player_name = "Traveller".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--definitions" if i + 1 < args.len() => {
                i += 1;
                definitions_path = Some(args[i].clone());
            }
            "--settings" if i + 1 < args.len() => {
                i += 1;
                settings_path = Some(args[i].clone());
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse().unwrap_or(42);
            }
            "--player" if i + 1 < args.len() => {
                i += 1;
                player_name = args[i].clone();
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(definitions_path) = definitions_path else {
        eprintln!("ERROR: --definitions is required");
        print_usage();
        std::process::exit(1);
    };

    let library = match DefinitionLibrary::load_dir(Path::new(&definitions_path)) {
        Ok(library) => Arc::new(library),
        Err(e) => {
            eprintln!("ERROR: Failed to load definitions: {}", e);
            std::process::exit(1);
        }
    };
    let settings = match settings_path {
        Some(ref path) => match DialogueSettings::load_from_ron(Path::new(path)) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("ERROR: Failed to load settings: {}", e);
                std::process::exit(1);
            }
        },
        None => DialogueSettings::default(),
    };

    let mut hub = SessionHub::new(library.clone(), settings.clone());
    let mut net = Loopback::new();
    let built = build_session(NetRole::Authority, &library, &settings, seed, &player_name)
        .and_then(|s| hub.add_session(s).map_err(|e| e.to_string()))
        .and_then(|_| build_session(NetRole::Follower, &library, &settings, seed, &player_name))
        .and_then(|s| net.add_follower(s).map_err(|e| e.to_string()));
    if let Err(e) = built {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }

    println!(
        "Loaded {} dialogues and {} quests",
        library.dialogue_names().len(),
        library.quest_names().len()
    );
    println!("Seed: {}", seed);
    println!("Type 'help' for commands.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("preview> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts[0].to_lowercase();

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "dialogues" => {
                println!("  Dialogues: {}", library.dialogue_names().join(", "));
                println!("  Quests: {}", library.quest_names().join(", "));
            }
            "talk" => {
                if parts.len() < 2 {
                    println!("Usage: talk <dialogue> [node]");
                    continue;
                }
                let start = parts.get(2).map(|s| NodeId::new(*s));
                let Some(authority) = hub.session_mut(PLAYER) else {
                    continue;
                };
                if !authority.begin_dialogue(parts[1], start.as_ref()) {
                    println!("Dialogue '{}' could not begin.", parts[1]);
                }
            }
            "pick" => {
                let Some(follower) = net.follower_mut(PLAYER) else {
                    continue;
                };
                let options: Vec<NodeId> = follower
                    .dialogue()
                    .map(|d| d.available_responses().iter().map(|p| p.id.clone()).collect())
                    .unwrap_or_default();
                let choice = parts.get(1).and_then(|s| s.parse::<usize>().ok());
                match choice.and_then(|n| options.get(n.wrapping_sub(1))) {
                    Some(option) => {
                        if !follower.try_select_option(option) {
                            println!("Reply '{}' cannot be picked right now.", option);
                        }
                    }
                    None => println!("Usage: pick <n> (1..={})", options.len()),
                }
            }
            "skip" => {
                if let Some(follower) = net.follower_mut(PLAYER) {
                    if !follower.try_skip_current_line() {
                        println!("Nothing to skip.");
                    }
                }
            }
            "leave" => {
                if let Some(follower) = net.follower_mut(PLAYER) {
                    if !follower.try_exit_dialogue() {
                        println!("This dialogue cannot be left.");
                    }
                }
            }
            "wait" => {
                let seconds = parts.get(1).and_then(|s| s.parse::<f32>().ok()).unwrap_or(1.0);
                net.advance(&mut hub, seconds);
            }
            "begin" => {
                if parts.len() < 2 {
                    println!("Usage: begin <quest>");
                    continue;
                }
                if let Some(authority) = hub.session_mut(PLAYER) {
                    if !authority.begin_quest(parts[1], None) {
                        println!("Quest '{}' could not begin.", parts[1]);
                    }
                }
            }
            "task" => {
                if parts.len() < 3 {
                    println!("Usage: task <kind> <arg> [n]");
                    continue;
                }
                let quantity = parts.get(3).and_then(|s| s.parse::<i32>().ok()).unwrap_or(1);
                if let Some(authority) = hub.session_mut(PLAYER) {
                    authority.complete_data_task(parts[1], parts[2], quantity);
                }
            }
            "quest" => {
                if parts.len() < 2 {
                    println!("Usage: quest <name>");
                    continue;
                }
                if let Some(follower) = net.follower(PLAYER) {
                    print_quest(follower, parts[1]);
                }
            }
            "save" | "load" => {
                if parts.len() < 2 {
                    println!("Usage: {} <name> [slot]", cmd);
                    continue;
                }
                let slot = parts.get(2).and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
                if let Some(authority) = hub.session_mut(PLAYER) {
                    let ok = if cmd == "save" {
                        authority.save(parts[1], slot)
                    } else {
                        authority.load(parts[1], slot)
                    };
                    if !ok {
                        println!("{} of '{}' slot {} failed.", cmd, parts[1], slot);
                    }
                }
            }
            "log" => {
                if let Some(authority) = hub.session(PLAYER) {
                    for (index, update) in authority.core().update_log().entries().iter().enumerate() {
                        println!(
                            "  [{}] {:?} {} {} {:?}{}",
                            index,
                            update.kind,
                            update.quest,
                            update.payload,
                            update.int_payload,
                            if update.acked { "" } else { " (unacked)" }
                        );
                    }
                }
            }
            _ => {
                println!("Unknown command: '{}'. Type 'help' for commands.", cmd);
                continue;
            }
        }

        net.deliver(&mut hub);
        if let Some(follower) = net.follower_mut(PLAYER) {
            for note in follower.drain_notifications() {
                print_notification(&note);
            }
        }
        if let Some(authority) = hub.session_mut(PLAYER) {
            authority.drain_notifications();
        }
    }
}

fn build_session(
    role: NetRole,
    library: &Arc<DefinitionLibrary>,
    settings: &DialogueSettings,
    seed: u64,
    player_name: &str,
) -> Result<SessionComponent, String> {
    let mut variables: FxHashMap<String, String> = FxHashMap::default();
    variables.insert("player_name".to_string(), player_name.to_string());
    SessionComponent::builder()
        .id(PLAYER.0)
        .role(role)
        .mode(NetMode::Networked)
        .seed(seed)
        .with_settings(settings.clone())
        .with_library(library.clone())
        .with_variables(Box::new(variables))
        .build()
        .map_err(|e| e.to_string())
}

fn print_notification(note: &Notification) {
    match note {
        Notification::NpcLineStarted { speaker, text, .. } => println!("  {}: {}", speaker, text),
        Notification::PlayerLineStarted { text, .. } => println!("  You: {}", text),
        Notification::RepliesAvailable { options } => {
            for (n, option) in options.iter().enumerate() {
                println!("    {}) {}", n + 1, option);
            }
        }
        Notification::NpcLineFinished { .. } | Notification::PlayerLineFinished { .. } => {}
        Notification::QuestSucceeded { quest, message } | Notification::QuestFailed { quest, message } => {
            println!("  [{}] {} {}", discriminant_name(note), quest, message)
        }
        other => println!("  [{}]", discriminant_name(other)),
    }
}

fn discriminant_name(note: &Notification) -> String {
    let debug = format!("{:?}", note);
    debug.split([' ', '{', '(']).next().unwrap_or_default().to_string()
}

fn print_quest(session: &SessionComponent, name: &str) {
    let Some(quest) = session.quest(name) else {
        println!("  Quest '{}' is not started.", name);
        return;
    };
    println!(
        "  {} - {:?}, state {}",
        quest.name(),
        quest.completion(),
        quest.current_state_id().map(NodeId::as_str).unwrap_or("-")
    );
    let reached: Vec<&str> = quest.reached_states().iter().map(|s| s.as_str()).collect();
    println!("  Reached: {}", reached.join(" -> "));
    if let Some(state) = quest.current_state() {
        for branch_id in &state.branches {
            let Some(branch) = quest.branch_index(branch_id) else {
                continue;
            };
            println!("    Branch {}:", branch_id);
            for task in quest.branch_tasks(branch) {
                println!(
                    "      {}/{} {}/{}{}",
                    task.def.kind,
                    task.def.argument,
                    task.progress,
                    task.def.required_quantity,
                    if task.def.optional { " (optional)" } else { "" }
                );
            }
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  dialogues               - list loaded dialogues and quests");
    println!("  talk <dialogue> [node]  - begin a dialogue");
    println!("  pick <n>                - pick reply n");
    println!("  skip                    - skip the current line");
    println!("  leave                   - exit the dialogue");
    println!("  wait <seconds>          - advance time");
    println!("  begin <quest>           - begin a quest");
    println!("  task <kind> <arg> [n]   - complete a data task");
    println!("  quest <name>            - show quest progress");
    println!("  save <name> [slot]      - save progress");
    println!("  load <name> [slot]      - load progress");
    println!("  log                     - show the update log");
    println!("  help                    - this list");
    println!("  quit                    - exit");
}

fn print_usage() {
    println!("Usage: preview --definitions <dir> [--settings <path>] [--seed <n>] [--player <name>]");
}
