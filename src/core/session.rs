/// Per-session façade: owns the quest list, the data-task ledger, the update
/// log, and at most one running dialogue.
///
/// Every mutating operation is authority-only. A follower mirrors its
/// authority through `receive`, and asks it to act through the `try_*` calls,
/// which queue a `ServerRequest` instead of mutating locally.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::condition::{ActorContext, Audience, ConditionRegistry, NarrativeView};
use crate::core::dialogue::{Dialogue, DialogueHost, DialoguePhase, VariableResolver};
use crate::core::event::{Effect, EventRegistry, TargetedEffect};
use crate::core::ledger::{make_task_key, DataTaskLedger};
use crate::core::library::{DefinitionLibrary, LibraryError};
use crate::core::media::{ActorProvider, MediaKind, MediaPlayer, NullActors, NullMedia};
use crate::core::notification::Notification;
use crate::core::party::MemberSnapshot;
use crate::core::persistence::{MemoryStore, PersistenceError, PersistenceStore};
use crate::core::quest::{ProgressSource, Quest, QuestCompletion, QuestSignal, StateEntry};
use crate::core::replication::UpdateLog;
use crate::core::settings::{DialogueSettings, SettingsError};
use crate::core::timer::{TimerHandle, TimerQueue};
use crate::schema::message::{ChunkIds, ClientMessage, ServerRequest};
use crate::schema::node::{ActorId, ConditionSpec, EventRuntime, EventSpec, NodeId, PartyId, SessionId};
use crate::schema::save::SaveRecord;
use crate::schema::update::{NarrativeUpdate, UpdateKind};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("library error: {0}")]
    Library(#[from] LibraryError),
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetRole {
    Authority,
    Follower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetMode {
    /// Single process; media callbacks are trusted to end lines.
    Standalone,
    Networked,
}

/// Everything a session owns except the dialogue. The dialogue borrows this
/// as its `DialogueHost`.
pub struct SessionCore {
    id: SessionId,
    role: NetRole,
    mode: NetMode,
    settings: DialogueSettings,
    library: Arc<DefinitionLibrary>,
    conditions: ConditionRegistry,
    events: EventRegistry,
    rng: StdRng,
    timers: TimerQueue<()>,
    media: Box<dyn MediaPlayer>,
    actors: Box<dyn ActorProvider>,
    variables: Box<dyn VariableResolver>,
    store: Box<dyn PersistenceStore>,
    actor: ActorContext,
    quests: Vec<Quest>,
    ledger: DataTaskLedger,
    log: UpdateLog,
    loading: bool,
    exit_requested: bool,
    party: Option<PartyId>,
    /// `Some` for a party's own session; conditions and events then see the members.
    party_members: Option<Vec<MemberSnapshot>>,
    notifications: VecDeque<Notification>,
    outbox: Vec<ClientMessage>,
    requests: Vec<ServerRequest>,
    foreign_effects: Vec<TargetedEffect>,
    forwarded_tasks: Vec<(String, String, i32)>,
}

impl SessionCore {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn mode(&self) -> NetMode {
        self.mode
    }

    pub fn library(&self) -> &DefinitionLibrary {
        &self.library
    }

    pub fn ledger(&self) -> &DataTaskLedger {
        &self.ledger
    }

    pub fn update_log(&self) -> &UpdateLog {
        &self.log
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn party(&self) -> Option<PartyId> {
        self.party
    }

    pub fn now(&self) -> f64 {
        self.timers.now()
    }

    pub fn quests(&self) -> &[Quest] {
        &self.quests
    }

    pub fn quest(&self, name: &str) -> Option<&Quest> {
        self.quests.iter().find(|q| q.name() == name)
    }

    fn quest_index(&self, name: &str) -> Option<usize> {
        self.quests.iter().position(|q| q.name() == name)
    }

    fn is_networked_authority(&self) -> bool {
        self.role == NetRole::Authority && self.mode == NetMode::Networked
    }

    fn audience(&self) -> Audience<'_> {
        match &self.party_members {
            Some(members) => Audience::Party {
                party: self,
                members: members.iter().map(|m| m as &dyn NarrativeView).collect(),
            },
            None => Audience::Solo(self),
        }
    }

    /// Append to the update log. Only a networked authority keeps one, and
    /// restoring a save never adds to it.
    fn send_update(&mut self, update: NarrativeUpdate) {
        if self.is_networked_authority() && !self.loading {
            let now = self.timers.now();
            self.log.append(update, now);
        }
    }

    fn instantiate_quest(&mut self, name: &str) -> bool {
        if self.quest_index(name).is_some() {
            warn!(session = %self.id, quest = name, "quest already started; use restart_quest to replay it");
            return false;
        }
        let Some(def) = self.library.quest(name) else {
            warn!(session = %self.id, quest = name, "unknown quest");
            return false;
        };
        match Quest::new(def) {
            Ok(quest) => {
                self.quests.push(quest);
                true
            }
            Err(e) => {
                warn!(session = %self.id, quest = name, error = %e, "invalid quest definition");
                false
            }
        }
    }

    fn start_quest(&mut self, name: &str, start: Option<&NodeId>) {
        let loading = self.loading;
        if let Some(index) = self.quest_index(name) {
            self.quests[index].begin(start, loading);
            self.process_quest_signals(name);
        }
    }

    fn remove_quest(&mut self, name: &str) -> bool {
        let Some(index) = self.quest_index(name) else {
            return false;
        };
        let mut quest = self.quests.remove(index);
        quest.teardown();
        for signal in quest.drain_signals() {
            if let QuestSignal::ActorsReleased { actors, .. } = signal {
                self.release_actors(&actors);
            }
        }
        info!(session = %self.id, quest = name, "quest forgotten");
        if !self.loading {
            self.notify(Notification::QuestForgotten {
                quest: name.to_string(),
            });
        }
        true
    }

    fn release_actors(&mut self, actors: &[ActorId]) {
        for &actor in actors {
            self.actors.destroy_actor(actor);
        }
    }

    /// Drain and handle a quest's signals until it stops producing new ones.
    fn process_quest_signals(&mut self, name: &str) {
        loop {
            let Some(index) = self.quest_index(name) else {
                return;
            };
            let signals = self.quests[index].drain_signals();
            if signals.is_empty() {
                return;
            }
            for signal in signals {
                self.handle_quest_signal(signal);
            }
        }
    }

    fn handle_quest_signal(&mut self, signal: QuestSignal) {
        let loading = self.loading;
        match signal {
            QuestSignal::Started { quest } => {
                info!(session = %self.id, quest = %quest, "quest started");
                if !loading {
                    self.notify(Notification::QuestStarted { quest });
                }
            }
            QuestSignal::NewState { quest, state, entry } => {
                info!(session = %self.id, quest = %quest, state = %state, "quest entered state");
                if matches!(entry, StateEntry::Branch | StateEntry::Jump) {
                    self.send_update(
                        NarrativeUpdate::new(UpdateKind::QuestNewState, &quest).with_payload(state.as_str()),
                    );
                }
                if !loading {
                    self.notify(Notification::QuestNewState { quest, state });
                }
            }
            QuestSignal::Succeeded { quest, message } => {
                info!(session = %self.id, quest = %quest, "quest succeeded");
                if !loading {
                    self.notify(Notification::QuestSucceeded { quest, message });
                }
            }
            QuestSignal::Failed { quest, message } => {
                info!(session = %self.id, quest = %quest, "quest failed");
                if !loading {
                    self.notify(Notification::QuestFailed { quest, message });
                }
            }
            QuestSignal::TaskProgressChanged {
                quest,
                branch,
                task_index,
                old,
                new,
                required,
            } => {
                info!(session = %self.id, quest = %quest, branch = %branch, task_index, new, required, "task progress");
                self.send_update(
                    NarrativeUpdate::new(UpdateKind::TaskProgressMade, &quest)
                        .with_payload(branch.as_str())
                        .with_ints(vec![task_index as i32, new]),
                );
                if !loading {
                    self.notify(Notification::TaskProgressChanged {
                        quest,
                        branch,
                        task_index,
                        old,
                        new,
                        required,
                    });
                }
            }
            QuestSignal::TaskCompleted {
                quest,
                branch,
                task_index,
            } => {
                if !loading {
                    self.notify(Notification::TaskCompleted {
                        quest,
                        branch,
                        task_index,
                    });
                }
            }
            QuestSignal::BranchCompleted { quest, branch } => {
                if !loading {
                    self.notify(Notification::BranchCompleted { quest, branch });
                }
            }
            QuestSignal::NodeEvents { events, runtime, .. } => {
                if !loading {
                    self.fire_events(&events, runtime);
                }
            }
            QuestSignal::ActorsReleased { actors, .. } => self.release_actors(&actors),
        }
    }

    /// Begin a quest at `start`, or at its own start state.
    pub fn begin_quest(&mut self, name: &str, start: Option<&NodeId>) -> bool {
        if !self.has_authority() {
            debug!(session = %self.id, quest = name, "only the authority can begin quests");
            return false;
        }
        if !self.instantiate_quest(name) {
            return false;
        }
        // Logged before the start state runs, so anything its events do lands after it.
        self.send_update(
            NarrativeUpdate::new(UpdateKind::BeginQuest, name).with_payload(start.map_or("", NodeId::as_str)),
        );
        self.start_quest(name, start);
        true
    }

    /// Forget the quest if it is known, then begin it again.
    pub fn restart_quest(&mut self, name: &str, start: Option<&NodeId>) -> bool {
        if !self.has_authority() {
            debug!(session = %self.id, quest = name, "only the authority can restart quests");
            return false;
        }
        self.remove_quest(name);
        if !self.instantiate_quest(name) {
            return false;
        }
        self.send_update(
            NarrativeUpdate::new(UpdateKind::RestartQuest, name).with_payload(start.map_or("", NodeId::as_str)),
        );
        self.notify(Notification::QuestRestarted {
            quest: name.to_string(),
        });
        self.start_quest(name, start);
        true
    }

    pub fn forget_quest(&mut self, name: &str) -> bool {
        if !self.has_authority() {
            debug!(session = %self.id, quest = name, "only the authority can forget quests");
            return false;
        }
        if !self.remove_quest(name) {
            return false;
        }
        self.send_update(NarrativeUpdate::new(UpdateKind::ForgetQuest, name));
        true
    }

    /// Jump a running quest straight to `state`.
    pub fn enter_quest_state(&mut self, quest: &str, state: &NodeId) -> bool {
        if !self.has_authority() {
            debug!(session = %self.id, quest, "only the authority can move quests");
            return false;
        }
        let Some(index) = self.quest_index(quest) else {
            warn!(session = %self.id, quest, "cannot enter state of a quest that is not started");
            return false;
        };
        if !self.quests[index].enter_state_by_id(state, StateEntry::Jump, false) {
            warn!(session = %self.id, quest, state = %state, "unknown quest state");
            return false;
        }
        self.process_quest_signals(quest);
        true
    }

    pub fn set_task_progress(&mut self, quest: &str, branch: &NodeId, task: usize, progress: i32) -> bool {
        if !self.has_authority() {
            debug!(session = %self.id, quest, "only the authority can change task progress");
            return false;
        }
        let Some(index) = self.quest_index(quest) else {
            return false;
        };
        let Some(b) = self.quests[index].branch_index(branch) else {
            warn!(session = %self.id, quest, branch = %branch, "unknown branch");
            return false;
        };
        let changed = self.quests[index].set_task_progress(b, task, progress, ProgressSource::Authority, false);
        self.process_quest_signals(quest);
        changed
    }

    pub fn add_task_progress(&mut self, quest: &str, branch: &NodeId, task: usize, amount: i32) -> bool {
        let current = self.quest(quest).and_then(|q| {
            let b = q.branch_index(branch)?;
            q.task(b, task).map(|t| t.progress)
        });
        match current {
            Some(progress) => self.set_task_progress(quest, branch, task, progress.saturating_add(amount)),
            None => false,
        }
    }

    /// Record a data task in the ledger and advance every active quest task that
    /// names the same task and argument.
    pub fn complete_data_task(&mut self, task: &str, argument: &str, quantity: i32) -> bool {
        if !self.has_authority() {
            debug!(session = %self.id, task, "only the authority can complete data tasks");
            return false;
        }
        if task.trim().is_empty() || argument.trim().is_empty() {
            warn!(session = %self.id, "data task or argument is empty");
            return false;
        }
        let key = make_task_key(task, argument);
        self.ledger.record(&key, quantity);
        self.send_update(
            NarrativeUpdate::new(UpdateKind::CompleteTask, "")
                .with_payload(&key)
                .with_ints(vec![quantity]),
        );
        self.notify(Notification::DataTaskCompleted {
            task: task.to_string(),
            argument: argument.to_string(),
        });
        if self.party.is_some() {
            self.forwarded_tasks
                .push((task.to_string(), argument.to_string(), quantity));
        }

        let running: Vec<String> = self
            .quests
            .iter()
            .filter(|q| q.completion() == QuestCompletion::Started)
            .map(|q| q.name().to_string())
            .collect();
        for name in running {
            let Some(index) = self.quest_index(&name) else {
                continue;
            };
            for (branch, task_index) in self.quests[index].tasks_matching(&key) {
                if let Some(index) = self.quest_index(&name) {
                    self.quests[index].add_task_progress(branch, task_index, quantity, ProgressSource::Authority);
                }
                self.process_quest_signals(&name);
            }
        }
        true
    }

    /// Spawn an actor that is destroyed with the quest.
    pub fn spawn_quest_actor(&mut self, quest: &str, class: &str) -> Option<ActorId> {
        if !self.has_authority() {
            return None;
        }
        let index = self.quest_index(quest)?;
        let actor = self.actors.spawn_actor(class)?;
        self.quests[index].track_actor(actor);
        Some(actor)
    }

    pub(crate) fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::BeginQuest { quest, start } => {
                self.begin_quest(&quest, start.as_ref());
            }
            Effect::RestartQuest { quest } => {
                self.restart_quest(&quest, None);
            }
            Effect::ForgetQuest { quest } => {
                self.forget_quest(&quest);
            }
            Effect::EnterQuestState { quest, state } => {
                self.enter_quest_state(&quest, &state);
            }
            Effect::CompleteDataTask {
                task,
                argument,
                quantity,
            } => {
                self.complete_data_task(&task, &argument, quantity);
            }
            Effect::ExitDialogue => self.request_exit(),
            Effect::Custom { event, args } => self.notify(Notification::CustomEvent { event, args }),
        }
    }

    /// Follower: apply one entry of the authority's update log.
    fn apply_update(&mut self, update: &NarrativeUpdate) -> bool {
        let start = (!update.payload.is_empty()).then(|| NodeId::new(update.payload.as_str()));
        match update.kind {
            UpdateKind::None => true,
            UpdateKind::CompleteTask => match update.int_payload.first() {
                Some(&quantity) => {
                    self.ledger.record(&update.payload, quantity);
                    true
                }
                None => false,
            },
            UpdateKind::BeginQuest => {
                if !self.instantiate_quest(&update.quest) {
                    return false;
                }
                self.start_quest(&update.quest, start.as_ref());
                true
            }
            UpdateKind::RestartQuest => {
                self.remove_quest(&update.quest);
                if !self.instantiate_quest(&update.quest) {
                    return false;
                }
                self.notify(Notification::QuestRestarted {
                    quest: update.quest.clone(),
                });
                self.start_quest(&update.quest, start.as_ref());
                true
            }
            UpdateKind::ForgetQuest => self.remove_quest(&update.quest),
            UpdateKind::QuestNewState => {
                let Some(index) = self.quest_index(&update.quest) else {
                    return false;
                };
                let state = NodeId::new(update.payload.as_str());
                if !self.quests[index].enter_state_by_id(&state, StateEntry::Replicated, false) {
                    return false;
                }
                self.process_quest_signals(&update.quest);
                true
            }
            UpdateKind::TaskProgressMade => {
                let (Some(&task), Some(&progress)) = (update.int_payload.first(), update.int_payload.get(1)) else {
                    return false;
                };
                let Some(index) = self.quest_index(&update.quest) else {
                    return false;
                };
                let Some(branch) = self.quests[index].branch_index(&NodeId::new(update.payload.as_str())) else {
                    return false;
                };
                self.quests[index].set_task_progress(
                    branch,
                    task.max(0) as usize,
                    progress,
                    ProgressSource::Replication,
                    false,
                );
                self.process_quest_signals(&update.quest);
                true
            }
        }
    }

    /// Follower: merge the authority's log and apply new entries in order.
    fn receive_update_log(&mut self, updates: Vec<NarrativeUpdate>) {
        for index in self.log.merge(updates) {
            if let Some(update) = self.log.get(index).cloned() {
                if !self.apply_update(&update) {
                    warn!(session = %self.id, kind = ?update.kind, quest = %update.quest, "could not apply replicated update");
                }
            }
            self.log.ack(index);
        }
    }

    pub fn to_save_record(&self) -> SaveRecord {
        SaveRecord {
            quests: self.quests.iter().filter_map(Quest::to_saved).collect(),
            ledger: self.ledger.snapshot(),
        }
    }

    /// Replace all quest progress and the ledger with `record`.
    fn restore(&mut self, record: &SaveRecord) {
        self.loading = true;
        let names: Vec<String> = self.quests.iter().map(|q| q.name().to_string()).collect();
        for name in names {
            self.remove_quest(&name);
        }
        self.log.clear();
        self.ledger.restore(&record.ledger);

        for saved in &record.quests {
            if !self.instantiate_quest(&saved.quest) {
                warn!(session = %self.id, quest = %saved.quest, "saved quest could not be restored");
                continue;
            }
            self.start_quest(&saved.quest, Some(&saved.current_state));
            if let Some(index) = self.quest_index(&saved.quest) {
                let quest = &mut self.quests[index];
                for branch in &saved.branches {
                    let Some(b) = quest.branch_index(&branch.branch) else {
                        warn!(quest = %saved.quest, branch = %branch.branch, "saved branch no longer exists");
                        continue;
                    };
                    for (task, &progress) in branch.task_progress.iter().enumerate() {
                        quest.set_task_progress(b, task, progress, ProgressSource::Replication, true);
                    }
                }
                quest.restore_reached_states(&saved.reached_states);
            }
            self.process_quest_signals(&saved.quest);
        }
        self.loading = false;
    }

    pub fn save(&mut self, name: &str, slot: u32) -> bool {
        self.notify(Notification::SaveBegan {
            name: name.to_string(),
        });
        let record = self.to_save_record();
        let success = match self.store.save(name, slot, &record) {
            Ok(()) => true,
            Err(e) => {
                warn!(session = %self.id, save = name, slot, error = %e, "save failed");
                false
            }
        };
        debug!(session = %self.id, save = name, slot, success, "save finished");
        self.notify(Notification::SaveCompleted {
            name: name.to_string(),
            success,
        });
        success
    }

    /// Restore a save. A networked authority then sends the whole record to its follower.
    pub fn load(&mut self, name: &str, slot: u32) -> bool {
        if !self.has_authority() {
            debug!(session = %self.id, "only the authority can load saves");
            return false;
        }
        let record = match self.store.load(name, slot) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(session = %self.id, save = name, slot, "no save to load");
                return false;
            }
            Err(e) => {
                warn!(session = %self.id, save = name, slot, error = %e, "load failed");
                return false;
            }
        };
        self.notify(Notification::LoadBegan {
            name: name.to_string(),
        });
        self.restore(&record);
        debug!(session = %self.id, save = name, slot, quests = record.quests.len(), "save loaded");
        self.notify(Notification::LoadCompleted {
            name: name.to_string(),
            success: true,
        });
        if self.is_networked_authority() {
            self.outbox.push(ClientMessage::ReceiveSave(record));
        }
        true
    }

    pub fn delete_save(&mut self, name: &str, slot: u32) -> bool {
        match self.store.delete(name, slot) {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(session = %self.id, save = name, slot, error = %e, "delete failed");
                false
            }
        }
    }

    pub fn has_completed_data_task(&self, task: &str, argument: &str, quantity: i32) -> bool {
        self.ledger.has_completed(task, argument, quantity)
    }

    pub fn quest_completion(&self, quest: &str) -> QuestCompletion {
        self.quest(quest).map_or(QuestCompletion::NotStarted, Quest::completion)
    }

    fn quests_with(&self, completion: QuestCompletion) -> Vec<&str> {
        self.quests
            .iter()
            .filter(|q| q.completion() == completion)
            .map(Quest::name)
            .collect()
    }
}

impl NarrativeView for SessionCore {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn actor(&self) -> ActorContext {
        self.actor
    }

    fn quest_completion(&self, quest: &str) -> QuestCompletion {
        SessionCore::quest_completion(self, quest)
    }

    fn quest_state(&self, quest: &str) -> Option<NodeId> {
        self.quest(quest).and_then(|q| q.current_state_id().cloned())
    }

    fn data_task_count(&self, key: &str) -> i32 {
        self.ledger.count(key)
    }
}

impl DialogueHost for SessionCore {
    fn has_authority(&self) -> bool {
        self.role == NetRole::Authority
    }

    fn is_standalone(&self) -> bool {
        self.mode == NetMode::Standalone
    }

    fn settings(&self) -> &DialogueSettings {
        &self.settings
    }

    fn random_index(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.rng.gen_range(0..len)
    }

    fn conditions_met(&self, conditions: &[ConditionSpec]) -> bool {
        self.conditions.conditions_met(conditions, &self.audience())
    }

    /// Effects aimed at this session apply now; the rest wait for the hub.
    fn fire_events(&mut self, events: &[EventSpec], at: EventRuntime) {
        let targeted = self.events.dispatch(events, at, &self.audience());
        for TargetedEffect { target, effect } in targeted {
            if target == self.id {
                self.apply_effect(effect);
            } else {
                self.foreign_effects.push(TargetedEffect { target, effect });
            }
        }
    }

    fn schedule_line_timer(&mut self, seconds: f32) -> TimerHandle {
        self.timers.schedule(seconds, ())
    }

    fn cancel_timer(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }

    fn media(&mut self) -> &mut dyn MediaPlayer {
        self.media.as_mut()
    }

    fn actors(&mut self) -> &mut dyn ActorProvider {
        self.actors.as_mut()
    }

    fn string_variable(&self, node: &NodeId, name: &str) -> String {
        self.variables.resolve(node, name)
    }

    fn notify(&mut self, notification: Notification) {
        self.notifications.push_back(notification);
    }

    fn send_chunk(&mut self, chunk: ChunkIds) {
        if self.is_networked_authority() {
            self.outbox.push(ClientMessage::ReceiveChunk(chunk));
        }
    }

    fn replicate_selection(&mut self, option: &NodeId) {
        if self.is_networked_authority() {
            self.outbox.push(ClientMessage::SelectOption {
                option: option.clone(),
                selector: None,
            });
        }
    }

    fn record_data_task(&mut self, task: &str, argument: &str) {
        self.complete_data_task(task, argument, 1);
    }

    fn request_exit(&mut self) {
        if self.has_authority() {
            self.exit_requested = true;
        } else {
            debug!(session = %self.id, "followers wait for the authority to end dialogue");
        }
    }

    fn exit_requested(&self) -> bool {
        self.exit_requested
    }
}

pub struct SessionComponent {
    dialogue: Option<Dialogue>,
    /// Set while this session takes part in a party's dialogue.
    party_dialogue: Option<PartyId>,
    core: SessionCore,
}

/// Builder for constructing a `SessionComponent`.
pub struct SessionBuilder {
    id: SessionId,
    role: NetRole,
    mode: NetMode,
    seed: u64,
    settings_path: Option<PathBuf>,
    definitions_dir: Option<PathBuf>,
    actor: ActorContext,
    /// Directly provided settings (for testing without files).
    settings: Option<DialogueSettings>,
    /// Directly provided definitions (for testing without files).
    library: Option<Arc<DefinitionLibrary>>,
    conditions: Option<ConditionRegistry>,
    events: Option<EventRegistry>,
    media: Option<Box<dyn MediaPlayer>>,
    actors: Option<Box<dyn ActorProvider>>,
    variables: Option<Box<dyn VariableResolver>>,
    store: Option<Box<dyn PersistenceStore>>,
}

impl SessionComponent {
    pub fn builder() -> SessionBuilder {
        SessionBuilder {
            id: SessionId(1),
            role: NetRole::Authority,
            mode: NetMode::Standalone,
            seed: 0,
            settings_path: None,
            definitions_dir: None,
            actor: ActorContext::default(),
            settings: None,
            library: None,
            conditions: None,
            events: None,
            media: None,
            actors: None,
            variables: None,
            store: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.core.id
    }

    pub fn role(&self) -> NetRole {
        self.core.role
    }

    pub fn has_authority(&self) -> bool {
        self.core.has_authority()
    }

    pub fn is_standalone(&self) -> bool {
        self.core.is_standalone()
    }

    pub fn settings(&self) -> &DialogueSettings {
        &self.core.settings
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }

    pub fn dialogue(&self) -> Option<&Dialogue> {
        self.dialogue.as_ref()
    }

    pub fn is_in_dialogue(&self) -> bool {
        self.dialogue.is_some()
    }

    pub fn party(&self) -> Option<PartyId> {
        self.core.party
    }

    pub fn party_dialogue(&self) -> Option<PartyId> {
        self.party_dialogue
    }

    pub fn actor_context(&self) -> ActorContext {
        self.core.actor
    }

    pub fn set_actor_context(&mut self, actor: ActorContext) {
        self.core.actor = actor;
    }

    // Dialogue

    /// Start a dialogue, replacing any running one. Fails without side effects
    /// if the dialogue is unknown, invalid, or has nothing to play.
    pub fn begin_dialogue(&mut self, name: &str, start: Option<&NodeId>) -> bool {
        if !self.core.has_authority() {
            debug!(session = %self.core.id, dialogue = name, "only the authority can begin dialogue");
            return false;
        }
        let Some(def) = self.core.library.dialogue(name) else {
            warn!(session = %self.core.id, dialogue = name, "unknown dialogue");
            return false;
        };
        let mut dialogue = match Dialogue::new(def) {
            Ok(dialogue) => dialogue,
            Err(e) => {
                warn!(session = %self.core.id, dialogue = name, error = %e, "invalid dialogue definition");
                return false;
            }
        };
        if !dialogue.initialize(start, &mut self.core) {
            warn!(session = %self.core.id, dialogue = name, "dialogue has nothing to play");
            return false;
        }

        self.end_dialogue(true);
        self.party_dialogue = None;
        self.core.notify(Notification::DialogueBegan {
            dialogue: name.to_string(),
        });
        if self.core.is_networked_authority() {
            self.core.outbox.push(ClientMessage::BeginDialogue {
                dialogue: name.to_string(),
                chunk: dialogue.chunk_ids(),
            });
        }
        dialogue.play(&mut self.core);
        self.dialogue = Some(dialogue);
        self.finish_operation();
        true
    }

    pub fn select_option(&mut self, option: &NodeId) -> bool {
        self.select_option_from(option, None)
    }

    /// Select on behalf of `selector`, which is reported with the selection.
    pub fn select_option_from(&mut self, option: &NodeId, selector: Option<SessionId>) -> bool {
        if !self.core.has_authority() {
            debug!(session = %self.core.id, "only the authority can select options; use try_select_option");
            return false;
        }
        let Some(dialogue) = self.dialogue.as_mut() else {
            return false;
        };
        let Some(index) = dialogue.player_index(option) else {
            warn!(session = %self.core.id, option = %option, "unknown option");
            return false;
        };
        if !dialogue.can_select(index) || dialogue.phase() != DialoguePhase::AwaitingPlayerSelection {
            debug!(session = %self.core.id, option = %option, "option is not available");
            return false;
        }
        if self.core.is_networked_authority() {
            self.core.outbox.push(ClientMessage::SelectOption {
                option: option.clone(),
                selector,
            });
        }
        dialogue.select_option(index, selector, &mut self.core);
        self.finish_operation();
        true
    }

    pub fn skip_current_line(&mut self) -> bool {
        if !self.core.has_authority() {
            debug!(session = %self.core.id, "only the authority can skip lines; use try_skip_current_line");
            return false;
        }
        let Some(dialogue) = self.dialogue.as_mut() else {
            return false;
        };
        let skipped = dialogue.skip_current_line(&mut self.core);
        self.finish_operation();
        skipped
    }

    /// End the dialogue on request. Refused when the dialogue cannot be exited.
    pub fn exit_dialogue(&mut self) -> bool {
        if !self.core.has_authority() {
            debug!(session = %self.core.id, "only the authority can exit dialogue; use try_exit_dialogue");
            return false;
        }
        match &self.dialogue {
            Some(d) if d.can_be_exited() => {}
            Some(d) => {
                debug!(session = %self.core.id, dialogue = d.name(), "dialogue cannot be exited");
                return false;
            }
            None => return false,
        }
        self.end_dialogue(false);
        self.finish_operation();
        true
    }

    /// Follower-friendly selection: acts directly on the authority, otherwise
    /// asks the authority if the option is on offer locally.
    pub fn try_select_option(&mut self, option: &NodeId) -> bool {
        if self.core.has_authority() {
            return self.select_option(option);
        }
        let offered = self.dialogue.as_ref().is_some_and(|d| {
            d.phase() == DialoguePhase::AwaitingPlayerSelection
                && d.player_index(option).is_some_and(|i| d.can_select(i))
        });
        if offered {
            self.core.requests.push(ServerRequest::SelectOption {
                option: option.clone(),
            });
        }
        offered
    }

    pub fn try_skip_current_line(&mut self) -> bool {
        if self.core.has_authority() {
            return self.skip_current_line();
        }
        let in_flight = self.dialogue.as_ref().is_some_and(Dialogue::is_line_in_flight);
        if in_flight {
            self.core.requests.push(ServerRequest::SkipCurrentLine);
        }
        in_flight
    }

    pub fn try_exit_dialogue(&mut self) -> bool {
        if self.core.has_authority() {
            return self.exit_dialogue();
        }
        let exitable = self.dialogue.as_ref().is_some_and(Dialogue::can_be_exited);
        if exitable {
            self.core.requests.push(ServerRequest::ExitDialogue);
        }
        exitable
    }

    /// Authority: act on a follower's request.
    pub fn handle_request(&mut self, request: ServerRequest) -> bool {
        match request {
            ServerRequest::SelectOption { option } => self.select_option(&option),
            ServerRequest::SkipCurrentLine => self.skip_current_line(),
            ServerRequest::ExitDialogue => self.exit_dialogue(),
        }
    }

    fn end_dialogue(&mut self, replaced: bool) {
        if let Some(mut dialogue) = self.dialogue.take() {
            dialogue.deinitialize(&mut self.core);
            self.core.notify(Notification::DialogueFinished {
                dialogue: dialogue.name().to_string(),
                replaced,
            });
            if !replaced && self.core.is_networked_authority() {
                self.core.outbox.push(ClientMessage::ExitDialogue);
            }
        }
        self.core.exit_requested = false;
    }

    /// Close out an authority operation: honour exit requests and send the log.
    fn finish_operation(&mut self) {
        if self.core.exit_requested {
            self.end_dialogue(false);
            self.party_dialogue = None;
        }
        if let Some(updates) = self.core.log.flush() {
            self.core.outbox.push(ClientMessage::UpdateLog(updates));
        }
    }

    // Time and media

    /// Move this session's clock forward, firing due line timers one by one.
    pub fn advance(&mut self, seconds: f32) {
        let until = self.core.timers.now() + f64::from(seconds.max(0.0));
        while let Some((handle, ())) = self.core.timers.pop_until(until) {
            if let Some(dialogue) = self.dialogue.as_mut() {
                dialogue.on_line_timer(handle, &mut self.core);
            }
            if self.core.exit_requested {
                self.finish_operation();
            }
        }
        self.core.timers.advance_clock_to(until);
        self.finish_operation();
    }

    /// The host's media for the current line finished.
    pub fn media_finished(&mut self, kind: MediaKind) {
        if let Some(dialogue) = self.dialogue.as_mut() {
            dialogue.on_media_finished(kind, &mut self.core);
        }
        self.finish_operation();
    }

    // Replication

    /// Follower: apply one message from the authority.
    pub fn receive(&mut self, message: ClientMessage) {
        if self.core.has_authority() {
            warn!(session = %self.core.id, "authority received a client message; ignoring");
            return;
        }
        match message {
            ClientMessage::BeginDialogue { dialogue, chunk } => {
                self.follow_dialogue(&dialogue, &chunk, None);
            }
            ClientMessage::BeginPartyDialogue { party, dialogue, chunk } => {
                self.follow_dialogue(&dialogue, &chunk, Some(party));
            }
            ClientMessage::ReceiveChunk(chunk) => match self.dialogue.as_mut() {
                Some(dialogue) => {
                    debug!(session = %self.core.id, npc = chunk.npc_chain.len(), replies = chunk.responses.len(), "received chunk");
                    dialogue.receive_chunk(&chunk, &mut self.core);
                }
                None => warn!(session = %self.core.id, "received a chunk outside dialogue"),
            },
            ClientMessage::SelectOption { option, selector } => match self.dialogue.as_mut() {
                Some(dialogue) => {
                    dialogue.apply_replicated_selection(&option, selector, &mut self.core);
                }
                None => warn!(session = %self.core.id, option = %option, "received a selection outside dialogue"),
            },
            ClientMessage::ExitDialogue | ClientMessage::ExitPartyDialogue => {
                self.end_dialogue(false);
                self.party_dialogue = None;
            }
            ClientMessage::UpdateLog(updates) => self.core.receive_update_log(updates),
            ClientMessage::ReceiveSave(record) => {
                self.core.notify(Notification::LoadBegan { name: String::new() });
                self.core.restore(&record);
                self.core.notify(Notification::LoadCompleted {
                    name: String::new(),
                    success: true,
                });
            }
            ClientMessage::PartyChanged { party } => {
                self.core.party = party;
                self.core.notify(Notification::PartyChanged { party });
            }
        }
    }

    fn follow_dialogue(&mut self, name: &str, chunk: &ChunkIds, party: Option<PartyId>) {
        let Some(def) = self.core.library.dialogue(name) else {
            warn!(session = %self.core.id, dialogue = name, "authority began a dialogue this session does not have");
            return;
        };
        let mut dialogue = match Dialogue::new(def) {
            Ok(dialogue) => dialogue,
            Err(e) => {
                warn!(session = %self.core.id, dialogue = name, error = %e, "invalid dialogue definition");
                return;
            }
        };
        self.end_dialogue(true);
        self.party_dialogue = party;
        dialogue.initialize(None, &mut self.core);
        self.core.notify(Notification::DialogueBegan {
            dialogue: name.to_string(),
        });
        dialogue.receive_chunk(chunk, &mut self.core);
        self.dialogue = Some(dialogue);
    }

    pub fn drain_outbox(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.core.outbox)
    }

    pub fn drain_requests(&mut self) -> Vec<ServerRequest> {
        std::mem::take(&mut self.core.requests)
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.core.notifications.drain(..).collect()
    }

    // Quests and data tasks

    pub fn begin_quest(&mut self, name: &str, start: Option<&NodeId>) -> bool {
        let begun = self.core.begin_quest(name, start);
        self.finish_operation();
        begun
    }

    pub fn restart_quest(&mut self, name: &str, start: Option<&NodeId>) -> bool {
        let restarted = self.core.restart_quest(name, start);
        self.finish_operation();
        restarted
    }

    pub fn forget_quest(&mut self, name: &str) -> bool {
        let forgotten = self.core.forget_quest(name);
        self.finish_operation();
        forgotten
    }

    pub fn enter_quest_state(&mut self, quest: &str, state: &NodeId) -> bool {
        let entered = self.core.enter_quest_state(quest, state);
        self.finish_operation();
        entered
    }

    pub fn set_task_progress(&mut self, quest: &str, branch: &NodeId, task: usize, progress: i32) -> bool {
        let changed = self.core.set_task_progress(quest, branch, task, progress);
        self.finish_operation();
        changed
    }

    pub fn add_task_progress(&mut self, quest: &str, branch: &NodeId, task: usize, amount: i32) -> bool {
        let changed = self.core.add_task_progress(quest, branch, task, amount);
        self.finish_operation();
        changed
    }

    pub fn complete_data_task(&mut self, task: &str, argument: &str, quantity: i32) -> bool {
        let completed = self.core.complete_data_task(task, argument, quantity);
        self.finish_operation();
        completed
    }

    pub fn spawn_quest_actor(&mut self, quest: &str, class: &str) -> Option<ActorId> {
        self.core.spawn_quest_actor(quest, class)
    }

    pub fn quest(&self, name: &str) -> Option<&Quest> {
        self.core.quest(name)
    }

    pub fn quests(&self) -> &[Quest] {
        &self.core.quests
    }

    pub fn quest_completion(&self, name: &str) -> QuestCompletion {
        self.core.quest_completion(name)
    }

    pub fn is_quest_started_or_finished(&self, name: &str) -> bool {
        self.quest_completion(name) != QuestCompletion::NotStarted
    }

    pub fn is_quest_in_progress(&self, name: &str) -> bool {
        self.quest_completion(name) == QuestCompletion::Started
    }

    pub fn is_quest_succeeded(&self, name: &str) -> bool {
        self.quest_completion(name) == QuestCompletion::Succeeded
    }

    pub fn is_quest_failed(&self, name: &str) -> bool {
        self.quest_completion(name) == QuestCompletion::Failed
    }

    pub fn is_quest_finished(&self, name: &str) -> bool {
        self.quest_completion(name).is_finished()
    }

    pub fn succeeded_quests(&self) -> Vec<&str> {
        self.core.quests_with(QuestCompletion::Succeeded)
    }

    pub fn failed_quests(&self) -> Vec<&str> {
        self.core.quests_with(QuestCompletion::Failed)
    }

    pub fn in_progress_quests(&self) -> Vec<&str> {
        self.core.quests_with(QuestCompletion::Started)
    }

    pub fn has_completed_data_task(&self, task: &str, argument: &str, quantity: i32) -> bool {
        self.core.has_completed_data_task(task, argument, quantity)
    }

    pub fn data_task_count(&self, task: &str, argument: &str) -> i32 {
        self.core.ledger.count(&make_task_key(task, argument))
    }

    // Persistence

    pub fn save(&mut self, name: &str, slot: u32) -> bool {
        self.core.save(name, slot)
    }

    pub fn load(&mut self, name: &str, slot: u32) -> bool {
        let loaded = self.core.load(name, slot);
        self.finish_operation();
        loaded
    }

    pub fn delete_save(&mut self, name: &str, slot: u32) -> bool {
        self.core.delete_save(name, slot)
    }

    pub fn to_save_record(&self) -> SaveRecord {
        self.core.to_save_record()
    }

    // Party plumbing, driven by the hub

    pub(crate) fn set_party(&mut self, party: Option<PartyId>) {
        if self.core.party == party {
            return;
        }
        self.core.party = party;
        self.core.notify(Notification::PartyChanged { party });
        if self.core.is_networked_authority() {
            self.core.outbox.push(ClientMessage::PartyChanged { party });
        }
    }

    pub(crate) fn set_party_members(&mut self, members: Vec<MemberSnapshot>) {
        self.core.party_members = Some(members);
    }

    /// Join a party's dialogue: any dialogue of this session's own ends.
    pub(crate) fn join_party_dialogue(&mut self, party: PartyId) {
        self.end_dialogue(true);
        self.party_dialogue = Some(party);
    }

    pub(crate) fn leave_party_dialogue(&mut self) {
        self.party_dialogue = None;
    }

    pub(crate) fn push_message(&mut self, message: ClientMessage) {
        self.core.outbox.push(message);
    }

    pub(crate) fn apply_effect(&mut self, effect: Effect) {
        self.core.apply_effect(effect);
        self.finish_operation();
    }

    pub(crate) fn take_foreign_effects(&mut self) -> Vec<TargetedEffect> {
        std::mem::take(&mut self.core.foreign_effects)
    }

    pub(crate) fn take_forwarded_tasks(&mut self) -> Vec<(String, String, i32)> {
        std::mem::take(&mut self.core.forwarded_tasks)
    }
}

impl SessionBuilder {
    pub fn id(mut self, id: u64) -> Self {
        self.id = SessionId(id);
        self
    }

    pub fn role(mut self, role: NetRole) -> Self {
        self.role = role;
        self
    }

    pub fn mode(mut self, mode: NetMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn settings_path(mut self, path: &str) -> Self {
        self.settings_path = Some(PathBuf::from(path));
        self
    }

    pub fn definitions_dir(mut self, path: &str) -> Self {
        self.definitions_dir = Some(PathBuf::from(path));
        self
    }

    pub fn actor(mut self, actor: ActorContext) -> Self {
        self.actor = actor;
        self
    }

    /// Provide settings directly (for testing without files).
    pub fn with_settings(mut self, settings: DialogueSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Provide definitions directly (for testing without files).
    pub fn with_library(mut self, library: Arc<DefinitionLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn with_conditions(mut self, conditions: ConditionRegistry) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_events(mut self, events: EventRegistry) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_media(mut self, media: Box<dyn MediaPlayer>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_actors(mut self, actors: Box<dyn ActorProvider>) -> Self {
        self.actors = Some(actors);
        self
    }

    pub fn with_variables(mut self, variables: Box<dyn VariableResolver>) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_store(mut self, store: Box<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<SessionComponent, SessionError> {
        let settings = match (self.settings, &self.settings_path) {
            (Some(settings), _) => settings,
            (None, Some(path)) if path.exists() => DialogueSettings::load_from_ron(path)?,
            (None, _) => DialogueSettings::default(),
        };
        let library = match (self.library, &self.definitions_dir) {
            (Some(library), _) => library,
            (None, Some(dir)) if dir.exists() => Arc::new(DefinitionLibrary::load_dir(dir)?),
            (None, _) => Arc::new(DefinitionLibrary::default()),
        };

        Ok(SessionComponent {
            dialogue: None,
            party_dialogue: None,
            core: SessionCore {
                id: self.id,
                role: self.role,
                mode: self.mode,
                settings,
                library,
                conditions: self.conditions.unwrap_or_else(ConditionRegistry::with_builtins),
                events: self.events.unwrap_or_else(EventRegistry::with_builtins),
                rng: StdRng::seed_from_u64(self.seed),
                timers: TimerQueue::new(),
                media: self.media.unwrap_or_else(|| Box::new(NullMedia)),
                actors: self.actors.unwrap_or_else(|| Box::new(NullActors::default())),
                variables: self
                    .variables
                    .unwrap_or_else(|| Box::new(FxHashMap::<String, String>::default())),
                store: self.store.unwrap_or_else(|| Box::new(MemoryStore::new())),
                actor: self.actor,
                quests: Vec::new(),
                ledger: DataTaskLedger::new(),
                log: UpdateLog::new(),
                loading: false,
                exit_requested: false,
                party: None,
                party_members: None,
                notifications: VecDeque::new(),
                outbox: Vec::new(),
                requests: Vec::new(),
                foreign_effects: Vec::new(),
                forwarded_tasks: Vec::new(),
            },
        })
    }
}
