/// Quest runtime: a state machine over states and branches, gated by task progress.
///
/// A `Quest` never talks to the outside world directly. Every observable change
/// is queued as a `QuestSignal`; the owning session drains the queue after each
/// call and turns signals into notifications, replication updates, and events.
use tracing::debug;

use crate::core::ledger::make_task_key;
use crate::core::registry::{DefinitionError, NodeRegistry};
use crate::schema::node::{ActorId, EventRuntime, EventSpec, NodeId};
use crate::schema::quest::{QuestBranchDef, QuestDef, QuestStateDef, StateKind, TaskDef};
use crate::schema::save::{SavedBranch, SavedQuest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuestCompletion {
    #[default]
    NotStarted,
    Started,
    Succeeded,
    Failed,
}

impl QuestCompletion {
    pub fn is_finished(self) -> bool {
        matches!(self, QuestCompletion::Succeeded | QuestCompletion::Failed)
    }
}

/// How a state was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEntry {
    /// The quest's first state, from `begin`.
    Begin,
    /// A completed branch led here.
    Branch,
    /// An explicit jump requested by game code or an event.
    Jump,
    /// Mirrored from the authority's update log.
    Replicated,
}

/// Whether a progress change may complete branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSource {
    Authority,
    /// Mirrored for display; branch transitions arrive separately.
    Replication,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuestSignal {
    Started {
        quest: String,
    },
    NewState {
        quest: String,
        state: NodeId,
        entry: StateEntry,
    },
    Succeeded {
        quest: String,
        message: String,
    },
    Failed {
        quest: String,
        message: String,
    },
    TaskProgressChanged {
        quest: String,
        branch: NodeId,
        task_index: usize,
        old: i32,
        new: i32,
        required: i32,
    },
    TaskCompleted {
        quest: String,
        branch: NodeId,
        task_index: usize,
    },
    BranchCompleted {
        quest: String,
        branch: NodeId,
    },
    NodeEvents {
        quest: String,
        node: NodeId,
        events: Vec<EventSpec>,
        runtime: EventRuntime,
    },
    ActorsReleased {
        quest: String,
        actors: Vec<ActorId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskProgress {
    pub progress: i32,
    pub active: bool,
}

/// A task's definition together with its live progress.
#[derive(Debug, Clone, Copy)]
pub struct TaskStatus<'a> {
    pub def: &'a TaskDef,
    pub progress: i32,
    pub active: bool,
}

impl TaskStatus<'_> {
    pub fn is_complete(&self) -> bool {
        self.progress >= self.def.required_quantity || self.def.optional
    }
}

/// Check a quest definition without instantiating it.
pub fn validate_quest(def: &QuestDef) -> Result<(NodeRegistry, NodeRegistry), DefinitionError> {
    if def.states.is_empty() {
        return Err(DefinitionError::NoStates(def.name.clone()));
    }
    if def.branches.is_empty() {
        return Err(DefinitionError::NoBranches(def.name.clone()));
    }
    let states = NodeRegistry::build(&def.name, &def.states)?;
    let branches = NodeRegistry::build(&def.name, &def.branches)?;
    if !states.contains(&def.start_state) {
        return Err(DefinitionError::MissingStartState(def.name.clone()));
    }
    for state in &def.states {
        if let Some(missing) = state.branches.iter().find(|b| !branches.contains(b)) {
            return Err(DefinitionError::DanglingReference {
                owner: format!("{}/{}", def.name, state.id),
                id: missing.clone(),
            });
        }
    }
    for branch in &def.branches {
        if !states.contains(&branch.destination) {
            return Err(DefinitionError::DanglingReference {
                owner: format!("{}/{}", def.name, branch.id),
                id: branch.destination.clone(),
            });
        }
        if let Some(task) = branch.tasks.iter().find(|t| t.required_quantity < 1) {
            return Err(DefinitionError::InvalidQuantity {
                owner: format!("{}/{}", def.name, branch.id),
                task: task.kind.clone(),
            });
        }
    }
    Ok((states, branches))
}

/// A running quest instance. Holds its own copy of the definition.
#[derive(Debug, Clone)]
pub struct Quest {
    def: QuestDef,
    states: NodeRegistry,
    branches: NodeRegistry,
    state_active: Vec<bool>,
    branch_active: Vec<bool>,
    tasks: Vec<Vec<TaskProgress>>,
    current_state: Option<usize>,
    reached_states: Vec<usize>,
    completion: QuestCompletion,
    actors: Vec<ActorId>,
    signals: Vec<QuestSignal>,
}

impl Quest {
    pub fn new(def: &QuestDef) -> Result<Self, DefinitionError> {
        let (states, branches) = validate_quest(def)?;
        Ok(Self {
            def: def.clone(),
            states,
            branches,
            state_active: vec![false; def.states.len()],
            branch_active: vec![false; def.branches.len()],
            tasks: def
                .branches
                .iter()
                .map(|b| vec![TaskProgress::default(); b.tasks.len()])
                .collect(),
            current_state: None,
            reached_states: Vec::new(),
            completion: QuestCompletion::NotStarted,
            actors: Vec::new(),
            signals: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &QuestDef {
        &self.def
    }

    pub fn completion(&self) -> QuestCompletion {
        self.completion
    }

    pub fn current_state(&self) -> Option<&QuestStateDef> {
        self.current_state.map(|i| &self.def.states[i])
    }

    pub fn current_state_id(&self) -> Option<&NodeId> {
        self.current_state().map(|s| &s.id)
    }

    pub fn reached_states(&self) -> Vec<&NodeId> {
        self.reached_states.iter().map(|&i| &self.def.states[i].id).collect()
    }

    pub fn branch_index(&self, id: &NodeId) -> Option<usize> {
        self.branches.get(id)
    }

    pub fn state_index(&self, id: &NodeId) -> Option<usize> {
        self.states.get(id)
    }

    pub fn branch_def(&self, branch: usize) -> &QuestBranchDef {
        &self.def.branches[branch]
    }

    pub fn is_branch_active(&self, branch: usize) -> bool {
        self.branch_active.get(branch).copied().unwrap_or(false)
    }

    pub fn is_state_active(&self, state: usize) -> bool {
        self.state_active.get(state).copied().unwrap_or(false)
    }

    pub fn task(&self, branch: usize, task: usize) -> Option<TaskStatus<'_>> {
        let def = self.def.branches.get(branch)?.tasks.get(task)?;
        let live = self.tasks[branch][task];
        Some(TaskStatus {
            def,
            progress: live.progress,
            active: live.active,
        })
    }

    pub fn branch_tasks(&self, branch: usize) -> Vec<TaskStatus<'_>> {
        (0..self.def.branches.get(branch).map_or(0, |b| b.tasks.len()))
            .filter_map(|t| self.task(branch, t))
            .collect()
    }

    /// A branch is complete once every task is complete; optional tasks always are.
    pub fn is_branch_complete(&self, branch: usize) -> bool {
        self.branch_tasks(branch).iter().all(|t| t.is_complete())
    }

    /// Active tasks advanced by the data task `key`, as `(branch, task)` pairs.
    pub fn tasks_matching(&self, key: &str) -> Vec<(usize, usize)> {
        let mut found = Vec::new();
        for (b, branch) in self.def.branches.iter().enumerate() {
            for (t, task) in branch.tasks.iter().enumerate() {
                if self.tasks[b][t].active && make_task_key(&task.kind, &task.argument) == key {
                    found.push((b, t));
                }
            }
        }
        found
    }

    /// Signals queued since the last drain.
    pub fn drain_signals(&mut self) -> Vec<QuestSignal> {
        std::mem::take(&mut self.signals)
    }

    /// Enter `start` (or the definition's start state) and mark the quest started.
    pub fn begin(&mut self, start: Option<&NodeId>, loading: bool) {
        let start_index = match start.and_then(|id| self.states.get(id)) {
            Some(index) => index,
            None => {
                if let Some(id) = start {
                    debug!(quest = %self.def.name, state = %id, "unknown start state; using the quest's own");
                }
                self.states.get(&self.def.start_state).unwrap_or(0)
            }
        };
        self.completion = QuestCompletion::Started;
        self.enter_state(start_index, StateEntry::Begin, loading);
        self.signals.push(QuestSignal::Started {
            quest: self.def.name.clone(),
        });
    }

    /// Jump to a state by ID. Returns false if the state is unknown.
    pub fn enter_state_by_id(&mut self, id: &NodeId, entry: StateEntry, loading: bool) -> bool {
        match self.states.get(id) {
            Some(index) => {
                self.enter_state(index, entry, loading);
                true
            }
            None => false,
        }
    }

    pub fn enter_state(&mut self, index: usize, entry: StateEntry, loading: bool) {
        if let Some(previous) = self.current_state {
            self.deactivate_state(previous);
        }
        self.current_state = Some(index);
        self.reached_states.push(index);

        let state = &self.def.states[index];
        match state.kind {
            StateKind::Regular => {}
            StateKind::Success => {
                self.completion = QuestCompletion::Succeeded;
                self.signals.push(QuestSignal::Succeeded {
                    quest: self.def.name.clone(),
                    message: state.description.clone(),
                });
                self.teardown();
            }
            StateKind::Failure => {
                self.completion = QuestCompletion::Failed;
                self.signals.push(QuestSignal::Failed {
                    quest: self.def.name.clone(),
                    message: state.description.clone(),
                });
                self.teardown();
            }
        }

        self.activate_state(index, loading);
        self.signals.push(QuestSignal::NewState {
            quest: self.def.name.clone(),
            state: self.def.states[index].id.clone(),
            entry,
        });
    }

    /// Set a task's progress, clamped to `[0, required]`.
    ///
    /// Returns true if progress changed. While loading, inactive tasks are
    /// restored silently.
    pub fn set_task_progress(
        &mut self,
        branch: usize,
        task: usize,
        new_progress: i32,
        source: ProgressSource,
        loading: bool,
    ) -> bool {
        let Some(required) = self
            .def
            .branches
            .get(branch)
            .and_then(|b| b.tasks.get(task))
            .map(|t| t.required_quantity)
        else {
            return false;
        };
        let clamped = new_progress.clamp(0, required);
        let live = &mut self.tasks[branch][task];

        if loading && !live.active {
            live.progress = clamped;
            return false;
        }
        if !live.active || clamped == live.progress {
            return false;
        }

        let old = live.progress;
        live.progress = clamped;
        let branch_id = self.def.branches[branch].id.clone();
        self.signals.push(QuestSignal::TaskProgressChanged {
            quest: self.def.name.clone(),
            branch: branch_id.clone(),
            task_index: task,
            old,
            new: clamped,
            required,
        });

        if clamped >= required {
            self.signals.push(QuestSignal::TaskCompleted {
                quest: self.def.name.clone(),
                branch: branch_id,
                task_index: task,
            });
            if source == ProgressSource::Authority
                && self.is_branch_active(branch)
                && self.is_branch_complete(branch)
            {
                self.take_branch(branch);
            }
        }
        true
    }

    pub fn add_task_progress(
        &mut self,
        branch: usize,
        task: usize,
        amount: i32,
        source: ProgressSource,
    ) -> bool {
        let Some(current) = self.task(branch, task).map(|t| t.progress) else {
            return false;
        };
        self.set_task_progress(branch, task, current.saturating_add(amount), source, false)
    }

    /// Finish a branch and move to its destination.
    pub fn take_branch(&mut self, branch: usize) {
        self.deactivate_branch(branch);
        let def = &self.def.branches[branch];
        let destination = def.destination.clone();
        self.signals.push(QuestSignal::BranchCompleted {
            quest: self.def.name.clone(),
            branch: def.id.clone(),
        });
        if let Some(index) = self.states.get(&destination) {
            self.enter_state(index, StateEntry::Branch, false);
        }
    }

    /// Deactivate every node and release spawned actors.
    pub fn teardown(&mut self) {
        for branch in 0..self.def.branches.len() {
            self.deactivate_branch(branch);
        }
        for state in 0..self.def.states.len() {
            self.deactivate_state(state);
        }
        if !self.actors.is_empty() {
            self.signals.push(QuestSignal::ActorsReleased {
                quest: self.def.name.clone(),
                actors: std::mem::take(&mut self.actors),
            });
        }
    }

    /// Record an actor that lives and dies with this quest.
    pub fn track_actor(&mut self, actor: ActorId) {
        self.actors.push(actor);
    }

    pub fn actors(&self) -> &[ActorId] {
        &self.actors
    }

    pub fn restore_reached_states(&mut self, ids: &[NodeId]) {
        self.reached_states = self.states.resolve_ids(ids);
    }

    pub fn to_saved(&self) -> Option<SavedQuest> {
        let current_state = self.current_state_id()?.clone();
        Some(SavedQuest {
            quest: self.def.name.clone(),
            current_state,
            branches: self
                .def
                .branches
                .iter()
                .zip(&self.tasks)
                .map(|(b, tasks)| SavedBranch {
                    branch: b.id.clone(),
                    task_progress: tasks.iter().map(|t| t.progress).collect(),
                })
                .collect(),
            reached_states: self.reached_states().into_iter().cloned().collect(),
        })
    }

    fn activate_state(&mut self, index: usize, loading: bool) {
        self.state_active[index] = true;
        let branch_ids = self.def.states[index].branches.clone();
        for id in &branch_ids {
            if let Some(branch) = self.branches.get(id) {
                self.activate_branch(branch, loading);
            }
        }
        self.push_node_events(NodeRef::State(index), EventRuntime::Start);
    }

    fn deactivate_state(&mut self, index: usize) {
        if !self.state_active[index] {
            return;
        }
        let branch_ids = self.def.states[index].branches.clone();
        for id in &branch_ids {
            if let Some(branch) = self.branches.get(id) {
                self.deactivate_branch(branch);
            }
        }
        self.state_active[index] = false;
        self.push_node_events(NodeRef::State(index), EventRuntime::End);
    }

    fn activate_branch(&mut self, index: usize, loading: bool) {
        self.branch_active[index] = true;
        for task in &mut self.tasks[index] {
            task.active = true;
            if !loading {
                task.progress = 0;
            }
        }
        self.push_node_events(NodeRef::Branch(index), EventRuntime::Start);
    }

    fn deactivate_branch(&mut self, index: usize) {
        if !self.branch_active[index] {
            return;
        }
        for task in &mut self.tasks[index] {
            task.active = false;
        }
        self.branch_active[index] = false;
        self.push_node_events(NodeRef::Branch(index), EventRuntime::End);
    }

    fn push_node_events(&mut self, node: NodeRef, runtime: EventRuntime) {
        let (id, events) = match node {
            NodeRef::State(i) => (&self.def.states[i].id, &self.def.states[i].events),
            NodeRef::Branch(i) => (&self.def.branches[i].id, &self.def.branches[i].events),
        };
        let firing: Vec<EventSpec> = events
            .iter()
            .filter(|e| e.runtime.fires_at(runtime))
            .cloned()
            .collect();
        if firing.is_empty() {
            return;
        }
        self.signals.push(QuestSignal::NodeEvents {
            quest: self.def.name.clone(),
            node: id.clone(),
            events: firing,
            runtime,
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum NodeRef {
    State(usize),
    Branch(usize),
}
