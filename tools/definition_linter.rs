/// Definition Linter: validates dialogue and quest definitions and cross-checks their references.
///
/// Usage: definition_linter <definitions_dir> [--strict]
use narrative_state::core::condition::ConditionRegistry;
use narrative_state::core::event::EventRegistry;
use narrative_state::core::library::{Definition, DefinitionLibrary};
use narrative_state::schema::dialogue::DialogueDef;
use narrative_state::schema::node::{ConditionSpec, EventSpec, NodeId};
use narrative_state::schema::quest::{QuestDef, StateKind};
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

/// Conditions and events whose first argument names a quest.
const QUEST_CONDITIONS: [&str; 6] = [
    "quest_in_progress",
    "quest_succeeded",
    "quest_failed",
    "quest_finished",
    "quest_started_or_finished",
    "quest_in_state",
];
const QUEST_EVENTS: [&str; 4] = ["begin_quest", "restart_quest", "forget_quest", "enter_quest_state"];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: definition_linter <definitions_dir> [--strict]");
        process::exit(0);
    }

    let definitions_dir = Path::new(&args[1]);
    let strict = args[2..].iter().any(|a| a == "--strict");

    let mut library = DefinitionLibrary::new();
    let mut errors = Vec::new();

    if definitions_dir.is_file() {
        load_file(definitions_dir, &mut library, &mut errors);
    } else if definitions_dir.is_dir() {
        load_recursive(definitions_dir, &mut library, &mut errors);
    } else {
        eprintln!("ERROR: Path '{}' does not exist", definitions_dir.display());
        process::exit(1);
    }

    println!(
        "Loaded {} dialogues and {} quests",
        library.dialogue_names().len(),
        library.quest_names().len()
    );

    let warnings = lint_library(&library, &mut errors);

    println!("\n=== Definition Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() && !(strict && !warnings.is_empty()) {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn load_file(path: &Path, library: &mut DefinitionLibrary, errors: &mut Vec<String>) {
    let result = Definition::load_from_ron(path).and_then(|definition| library.add(definition));
    match result {
        Ok(()) => println!("  Loaded: {}", path.display()),
        Err(e) => errors.push(format!("{}: {}", path.display(), e)),
    }
}

fn load_recursive(dir: &Path, library: &mut DefinitionLibrary, errors: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        errors.push(format!("{}: could not read directory", dir.display()));
        return;
    };
    let mut paths: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            load_recursive(&path, library, errors);
        } else if path.extension().and_then(|s| s.to_str()) == Some("ron") {
            // Session settings live next to definitions but are not definitions.
            if path.file_stem().and_then(|s| s.to_str()) == Some("settings") {
                continue;
            }
            load_file(&path, library, errors);
        }
    }
}

fn lint_library(library: &DefinitionLibrary, errors: &mut Vec<String>) -> Vec<String> {
    let conditions = ConditionRegistry::with_builtins();
    let events = EventRegistry::with_builtins();
    let mut warnings = Vec::new();

    for name in library.dialogue_names() {
        if let Some(def) = library.dialogue(name) {
            lint_dialogue(def, library, &conditions, &events, errors, &mut warnings);
        }
    }
    for name in library.quest_names() {
        if let Some(def) = library.quest(name) {
            lint_quest(def, library, &events, errors, &mut warnings);
        }
    }
    warnings
}

fn lint_dialogue(
    def: &DialogueDef,
    library: &DefinitionLibrary,
    conditions: &ConditionRegistry,
    events: &EventRegistry,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let owner = format!("Dialogue '{}'", def.name);

    // Reachability from the root over both node kinds.
    let mut seen: BTreeSet<&NodeId> = BTreeSet::new();
    let mut queue: VecDeque<&NodeId> = VecDeque::from([&def.root]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(npc) = def.npc(id) {
            queue.extend(npc.npc_follow_ups.iter().chain(&npc.player_follow_ups));
        } else if let Some(player) = def.player(id) {
            queue.extend(player.npc_follow_ups.iter());
        }
    }
    for id in def.npc_nodes.iter().map(|n| &n.id).chain(def.player_nodes.iter().map(|n| &n.id)) {
        if !seen.contains(id) {
            warnings.push(format!("{}: node '{}' is unreachable from the root", owner, id));
        }
    }

    for npc in &def.npc_nodes {
        let node = format!("{} node '{}'", owner, npc.id);
        if !npc.player_follow_ups.is_empty() && !npc.npc_follow_ups.is_empty() {
            warnings.push(format!(
                "{}: has both NPC and player follow-ups; the NPC chain is taken first",
                node
            ));
        }
        if def.speaker(&npc.speaker).is_none() {
            warnings.push(format!("{}: speaker '{}' has no speaker info", node, npc.speaker));
        }
        lint_conditions(&node, &npc.conditions, library, conditions, warnings);
        lint_events(&node, &npc.events, library, events, warnings);
    }

    for player in &def.player_nodes {
        let node = format!("{} reply '{}'", owner, player.id);
        if !player.is_routing() && player.option_text().trim().is_empty() {
            warnings.push(format!("{}: has events but no option text", node));
        }
        lint_conditions(&node, &player.conditions, library, conditions, warnings);
        lint_events(&node, &player.events, library, events, warnings);
    }

    let any_exit = def.player_nodes.iter().any(|p| p.npc_follow_ups.is_empty())
        || def.npc_nodes.iter().any(|n| n.npc_follow_ups.is_empty() && n.player_follow_ups.is_empty());
    if !any_exit && !def.can_be_exited {
        errors.push(format!("{}: has no ending and cannot be exited", owner));
    }
}

fn lint_quest(
    def: &QuestDef,
    library: &DefinitionLibrary,
    events: &EventRegistry,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let owner = format!("Quest '{}'", def.name);

    let mut seen: BTreeSet<&NodeId> = BTreeSet::new();
    let mut queue: VecDeque<&NodeId> = VecDeque::from([&def.start_state]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(state) = def.state(id) {
            for branch in state.branches.iter().filter_map(|b| def.branch(b)) {
                queue.push_back(&branch.destination);
            }
        }
    }

    for state in &def.states {
        let node = format!("{} state '{}'", owner, state.id);
        if !seen.contains(&state.id) {
            warnings.push(format!("{}: is unreachable from the start state", node));
        }
        if state.kind == StateKind::Regular && state.branches.is_empty() {
            errors.push(format!("{}: is a dead end that neither succeeds nor fails", node));
        }
        if state.kind != StateKind::Regular && !state.branches.is_empty() {
            warnings.push(format!("{}: is terminal but lists branches", node));
        }
        lint_events(&node, &state.events, library, events, warnings);
    }

    if !def.states.iter().any(|s| s.kind == StateKind::Success) {
        warnings.push(format!("{}: has no success state", owner));
    }

    for branch in &def.branches {
        let node = format!("{} branch '{}'", owner, branch.id);
        if branch.tasks.is_empty() {
            warnings.push(format!("{}: has no tasks and completes immediately", node));
        }
        for task in &branch.tasks {
            if task.required_quantity < 1 {
                errors.push(format!(
                    "{}: task '{}/{}' requires {} (must be at least 1)",
                    node, task.kind, task.argument, task.required_quantity
                ));
            }
        }
        if branch.tasks.iter().all(|t| t.optional) && !branch.tasks.is_empty() {
            warnings.push(format!("{}: every task is optional", node));
        }
        lint_events(&node, &branch.events, library, events, warnings);
    }
}

fn lint_conditions(
    node: &str,
    specs: &[ConditionSpec],
    library: &DefinitionLibrary,
    conditions: &ConditionRegistry,
    warnings: &mut Vec<String>,
) {
    for spec in specs {
        if !conditions.contains(&spec.condition) {
            warnings.push(format!(
                "{}: condition '{}' is not built in and must be registered by the host",
                node, spec.condition
            ));
        }
        if QUEST_CONDITIONS.contains(&spec.condition.as_str()) {
            check_quest_arg(node, &spec.condition, &spec.args, library, warnings);
        }
    }
}

fn lint_events(
    node: &str,
    specs: &[EventSpec],
    library: &DefinitionLibrary,
    events: &EventRegistry,
    warnings: &mut Vec<String>,
) {
    for spec in specs {
        if !events.contains(&spec.event) {
            warnings.push(format!(
                "{}: event '{}' is not built in and will be passed to the host",
                node, spec.event
            ));
        }
        if QUEST_EVENTS.contains(&spec.event.as_str()) {
            check_quest_arg(node, &spec.event, &spec.args, library, warnings);
        }
    }
}

fn check_quest_arg(
    node: &str,
    what: &str,
    args: &[String],
    library: &DefinitionLibrary,
    warnings: &mut Vec<String>,
) {
    match args.first() {
        None => warnings.push(format!("{}: '{}' is missing its quest argument", node, what)),
        Some(quest) => match library.quest(quest) {
            None => warnings.push(format!(
                "{}: '{}' references quest '{}' which is not loaded",
                node, what, quest
            )),
            Some(def) => {
                if let Some(state) = args.get(1).filter(|_| what.contains("state")) {
                    if def.state(&NodeId::new(state.as_str())).is_none() {
                        warnings.push(format!(
                            "{}: '{}' references state '{}' missing from quest '{}'",
                            node, what, state, quest
                        ));
                    }
                }
            }
        },
    }
}
