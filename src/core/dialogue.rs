/// Dialogue runtime: chunk generation, line playback, skip and selection.
///
/// A `Dialogue` owns a copy of its definition plus the traversal state. All
/// side effects go through a `DialogueHost`, which the owning session implements.
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::core::media::{ActorProvider, MediaKind, MediaPlayer};
use crate::core::notification::Notification;
use crate::core::registry::{ids_of, DefinitionError, NodeRegistry};
use crate::core::settings::DialogueSettings;
use crate::core::timer::TimerHandle;
use crate::schema::dialogue::{
    DialogueDef, DialogueLine, LineDuration, NpcNode, PlayerNode, SpeakerInfo, PLAYER_SPEAKER_ID,
};
use crate::schema::message::ChunkIds;
use crate::schema::node::{ActorId, ConditionSpec, EventRuntime, EventSpec, NarrativeNode, NodeId, SessionId};

/// Data task recorded by the authority each time a line finishes.
pub const PLAY_NODE_TASK: &str = "PlayDialogueNode";

const MAX_VARIABLE_REPLACEMENTS: usize = 50;

/// Everything a dialogue needs from the session that owns it.
pub trait DialogueHost {
    fn has_authority(&self) -> bool;
    fn is_standalone(&self) -> bool;
    fn settings(&self) -> &DialogueSettings;
    fn random_index(&mut self, len: usize) -> usize;
    fn conditions_met(&self, conditions: &[ConditionSpec]) -> bool;
    fn fire_events(&mut self, events: &[EventSpec], at: EventRuntime);
    fn schedule_line_timer(&mut self, seconds: f32) -> TimerHandle;
    fn cancel_timer(&mut self, handle: TimerHandle);
    fn media(&mut self) -> &mut dyn MediaPlayer;
    fn actors(&mut self) -> &mut dyn ActorProvider;
    /// Value substituted for `{name}` in a line.
    fn string_variable(&self, node: &NodeId, name: &str) -> String;
    fn notify(&mut self, notification: Notification);
    /// Send the current chunk to followers. No-op unless networked authority.
    fn send_chunk(&mut self, chunk: ChunkIds);
    /// Tell followers which option the authority picked.
    fn replicate_selection(&mut self, option: &NodeId);
    fn record_data_task(&mut self, task: &str, argument: &str);
    fn request_exit(&mut self);
    fn exit_requested(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialoguePhase {
    Idle,
    ChunkGenerated,
    PlayingNpcChain,
    AwaitingPlayerSelection,
    PlayingPlayerLine,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Npc(usize),
    Player(usize),
}

/// Check a dialogue definition and index its nodes.
pub fn validate_dialogue(def: &DialogueDef) -> Result<(NodeRegistry, NodeRegistry), DefinitionError> {
    if def.npc_nodes.is_empty() {
        return Err(DefinitionError::NoNpcNodes(def.name.clone()));
    }
    let npcs = NodeRegistry::build(&def.name, &def.npc_nodes)?;
    let players = NodeRegistry::build(&def.name, &def.player_nodes)?;
    if let Some(clash) = def.player_nodes.iter().find(|p| npcs.contains(&p.id)) {
        return Err(DefinitionError::DuplicateId {
            owner: def.name.clone(),
            id: clash.id.clone(),
        });
    }
    if !npcs.contains(&def.root) {
        return Err(DefinitionError::MissingRoot(def.name.clone()));
    }

    let dangling = |owner: &NodeId, id: &NodeId| DefinitionError::DanglingReference {
        owner: format!("{}/{}", def.name, owner),
        id: id.clone(),
    };
    for node in &def.npc_nodes {
        if let Some(id) = node.npc_follow_ups.iter().find(|id| !npcs.contains(id)) {
            return Err(dangling(&node.id, id));
        }
        if let Some(id) = node.player_follow_ups.iter().find(|id| !players.contains(id)) {
            return Err(dangling(&node.id, id));
        }
    }
    for node in &def.player_nodes {
        if let Some(id) = node.npc_follow_ups.iter().find(|id| !npcs.contains(id)) {
            return Err(dangling(&node.id, id));
        }
    }
    Ok((npcs, players))
}

/// Resolve a `Default` duration from the line's content, then downgrade
/// media-driven durations to fixed ones for networked sessions.
pub fn resolve_line_duration(line: &mut DialogueLine, standalone: bool, settings: &DialogueSettings) {
    if line.duration == LineDuration::Default {
        line.duration = if line.audio.is_some() {
            LineDuration::UntilAudioEnds
        } else if line.shot.is_some() && !line.has_text() {
            LineDuration::UntilSequenceEnds
        } else {
            LineDuration::AfterReadingTime
        };
    }

    // Remote peers never hear about local media finishing.
    if !standalone {
        if line.duration == LineDuration::UntilSequenceEnds {
            warn!("sequence-timed lines are not supported in networked sessions; using audio length");
        }
        if matches!(line.duration, LineDuration::UntilAudioEnds | LineDuration::UntilSequenceEnds) {
            line.duration = LineDuration::AfterFixedDuration;
            line.fixed_duration_seconds = match &line.audio {
                Some(audio) if audio.seconds > 0.0 => audio.seconds + settings.line_audio_silence,
                _ => settings.networked_fallback_seconds,
            };
        }
    }
}

/// Seconds until the line ends on its own, or `None` if it waits for media or a skip.
pub fn line_duration(line: &DialogueLine, settings: &DialogueSettings) -> Option<f32> {
    match line.duration {
        LineDuration::AfterReadingTime => Some(settings.reading_time(&line.text)),
        LineDuration::AfterFixedDuration => Some(line.fixed_duration_seconds),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Dialogue {
    def: DialogueDef,
    npcs: NodeRegistry,
    players: NodeRegistry,
    root: usize,
    npc_chain: VecDeque<usize>,
    responses: Vec<usize>,
    current: Option<NodeRef>,
    current_line: Option<DialogueLine>,
    current_speaker: Option<SpeakerInfo>,
    phase: DialoguePhase,
    line_in_flight: bool,
    line_timer: Option<TimerHandle>,
    awaiting_media: Option<MediaKind>,
    begun: bool,
    avatars: FxHashMap<String, ActorId>,
}

impl Dialogue {
    pub fn new(def: &DialogueDef) -> Result<Self, DefinitionError> {
        let mut def = def.clone();
        if def.speakers.is_empty() {
            def.speakers.push(SpeakerInfo::named(&def.name));
        }
        def.player_speaker.id = PLAYER_SPEAKER_ID.to_string();

        let (npcs, players) = validate_dialogue(&def)?;
        let root = npcs.get(&def.root).unwrap_or(0);
        Ok(Self {
            def,
            npcs,
            players,
            root,
            npc_chain: VecDeque::new(),
            responses: Vec::new(),
            current: None,
            current_line: None,
            current_speaker: None,
            phase: DialoguePhase::Idle,
            line_in_flight: false,
            line_timer: None,
            awaiting_media: None,
            begun: false,
            avatars: FxHashMap::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &DialogueDef {
        &self.def
    }

    pub fn phase(&self) -> DialoguePhase {
        self.phase
    }

    pub fn is_ended(&self) -> bool {
        self.phase == DialoguePhase::Ended
    }

    pub fn can_be_exited(&self) -> bool {
        self.def.can_be_exited
    }

    pub fn npc(&self, index: usize) -> &NpcNode {
        &self.def.npc_nodes[index]
    }

    pub fn player(&self, index: usize) -> &PlayerNode {
        &self.def.player_nodes[index]
    }

    pub fn npc_index(&self, id: &NodeId) -> Option<usize> {
        self.npcs.get(id)
    }

    pub fn player_index(&self, id: &NodeId) -> Option<usize> {
        self.players.get(id)
    }

    pub fn current_node(&self) -> Option<NodeRef> {
        self.current
    }

    pub fn current_node_id(&self) -> Option<&NodeId> {
        self.current.map(|node| match node {
            NodeRef::Npc(i) => &self.def.npc_nodes[i].id,
            NodeRef::Player(i) => &self.def.player_nodes[i].id,
        })
    }

    pub fn current_line(&self) -> Option<&DialogueLine> {
        self.current_line.as_ref()
    }

    pub fn current_speaker(&self) -> Option<&SpeakerInfo> {
        self.current_speaker.as_ref()
    }

    /// True between a line starting and it finishing, skipping, or being superseded.
    pub fn is_line_in_flight(&self) -> bool {
        self.line_in_flight
    }

    pub fn npc_chain(&self) -> Vec<usize> {
        self.npc_chain.iter().copied().collect()
    }

    pub fn responses(&self) -> &[usize] {
        &self.responses
    }

    pub fn available_responses(&self) -> Vec<&PlayerNode> {
        self.responses.iter().map(|&i| self.player(i)).collect()
    }

    pub fn chunk_ids(&self) -> ChunkIds {
        ChunkIds {
            npc_chain: ids_of(&self.def.npc_nodes, &self.npc_chain()),
            responses: ids_of(&self.def.player_nodes, &self.responses),
        }
    }

    /// Pick the start node and, on the authority, generate the first chunk.
    pub fn initialize(&mut self, start: Option<&NodeId>, host: &mut dyn DialogueHost) -> bool {
        let start_index = match start {
            Some(id) => self.npcs.get(id).unwrap_or_else(|| {
                warn!(dialogue = %self.def.name, node = %id, "start node not found; starting from root");
                self.root
            }),
            None => self.root,
        };
        if host.has_authority() && !self.generate_chunk(start_index, host) {
            debug!(dialogue = %self.def.name, "first chunk has nothing to play");
            return false;
        }
        true
    }

    /// Walk NPC follow-ups from `start` and collect the replies offered at the end.
    pub fn generate_chunk(&mut self, start: usize, host: &mut dyn DialogueHost) -> bool {
        if !host.has_authority() {
            debug!(dialogue = %self.def.name, "followers never generate chunks");
            return false;
        }
        let chain = self.reply_chain(start, &*host);
        let last = chain.last().copied().unwrap_or(start);
        self.responses = self.player_replies(last, &*host);
        self.npc_chain = chain.into();
        self.phase = DialoguePhase::ChunkGenerated;
        self.has_valid_chunk()
    }

    /// `start` followed by the first passing NPC follow-up of each node, in graph order.
    pub fn reply_chain(&self, start: usize, host: &dyn DialogueHost) -> Vec<usize> {
        let vertical = host.settings().vertical_wiring;
        let mut chain = vec![start];
        let mut visited = FxHashSet::default();
        visited.insert(start);
        let mut current = start;

        loop {
            let candidates = self.sorted(self.npcs.resolve_ids(&self.npc(current).npc_follow_ups), NodeKind::Npc, vertical);
            let next = candidates
                .into_iter()
                .find(|&c| c != start && host.conditions_met(&self.npc(c).conditions));
            match next {
                Some(n) if visited.insert(n) => {
                    chain.push(n);
                    current = n;
                }
                Some(n) => {
                    warn!(dialogue = %self.def.name, node = %self.npc(n).id, "NPC reply chain loops; stopping");
                    break;
                }
                None => break,
            }
        }
        chain
    }

    /// Player follow-ups of an NPC node whose conditions pass, in graph order.
    pub fn player_replies(&self, npc: usize, host: &dyn DialogueHost) -> Vec<usize> {
        let replies: Vec<usize> = self
            .players
            .resolve_ids(&self.npc(npc).player_follow_ups)
            .into_iter()
            .filter(|&p| host.conditions_met(&self.player(p).conditions))
            .collect();
        self.sorted(replies, NodeKind::Player, host.settings().vertical_wiring)
    }

    /// A chunk is worth playing if it offers replies or shows at least one line.
    pub fn has_valid_chunk(&self) -> bool {
        !self.responses.is_empty() || self.npc_chain.iter().any(|&i| !self.npc(i).is_routing())
    }

    /// Play the current chunk from its head.
    pub fn play(&mut self, host: &mut dyn DialogueHost) {
        if self.is_ended() {
            return;
        }
        if !self.begun {
            self.begun = true;
            self.link_avatars(host);
        }
        self.play_next_npc_reply(host);
    }

    pub fn can_select(&self, option: usize) -> bool {
        !self.is_ended() && self.responses.contains(&option)
    }

    /// Play a player reply from the available responses.
    pub fn select_option(&mut self, option: usize, selector: Option<SessionId>, host: &mut dyn DialogueHost) -> bool {
        if !self.can_select(option) {
            return false;
        }
        host.notify(Notification::OptionSelected {
            option: self.player(option).id.clone(),
            selector,
        });
        self.play_player_node(option, host);
        true
    }

    /// Follower side of an authority selection: drop whatever is still playing first.
    pub fn apply_replicated_selection(
        &mut self,
        option: &NodeId,
        selector: Option<SessionId>,
        host: &mut dyn DialogueHost,
    ) -> bool {
        let Some(index) = self.players.get(option) else {
            warn!(dialogue = %self.def.name, node = %option, "selected option not found locally");
            return false;
        };
        if !self.can_select(index) {
            warn!(dialogue = %self.def.name, node = %option, "selected option was not offered locally");
            return false;
        }
        self.abandon_current_line(host);
        self.npc_chain.clear();
        self.select_option(index, selector, host)
    }

    /// Authority-only. Re-sends the remaining chunk when skipping an NPC line.
    pub fn skip_current_line(&mut self, host: &mut dyn DialogueHost) -> bool {
        if !host.has_authority() || !self.line_in_flight {
            return false;
        }
        let skippable = match self.current {
            Some(NodeRef::Npc(i)) => self.npc(i).skippable,
            Some(NodeRef::Player(i)) => self.player(i).skippable,
            None => false,
        };
        if !skippable {
            return false;
        }
        if matches!(self.current, Some(NodeRef::Npc(_))) {
            host.send_chunk(self.chunk_ids());
        }
        self.end_current_line(host);
        true
    }

    /// Finish the line in flight. Unbinds media and cancels the timer first, so
    /// whichever trigger arrives second finds nothing to finish.
    pub fn end_current_line(&mut self, host: &mut dyn DialogueHost) {
        if !self.line_in_flight {
            return;
        }
        self.awaiting_media = None;
        if let Some(timer) = self.line_timer.take() {
            host.cancel_timer(timer);
        }
        match self.current {
            Some(NodeRef::Npc(_)) => self.finish_npc_node(host),
            Some(NodeRef::Player(_)) => self.finish_player_node(host),
            None => {}
        }
    }

    pub fn on_line_timer(&mut self, handle: TimerHandle, host: &mut dyn DialogueHost) {
        if self.line_timer == Some(handle) {
            self.line_timer = None;
            self.end_current_line(host);
        }
    }

    pub fn on_media_finished(&mut self, kind: MediaKind, host: &mut dyn DialogueHost) {
        if self.awaiting_media == Some(kind) {
            self.end_current_line(host);
        }
    }

    /// Follower: replace in-flight state with the authority's chunk and play it.
    pub fn receive_chunk(&mut self, chunk: &ChunkIds, host: &mut dyn DialogueHost) {
        if self.is_ended() {
            return;
        }
        self.abandon_current_line(host);
        self.npc_chain = self.npcs.resolve_ids(&chunk.npc_chain).into();
        self.responses = self.players.resolve_ids(&chunk.responses);
        self.phase = DialoguePhase::ChunkGenerated;
        self.play(host);
    }

    /// End the dialogue. Safe to call more than once.
    pub fn deinitialize(&mut self, host: &mut dyn DialogueHost) {
        if self.is_ended() {
            return;
        }
        self.abandon_current_line(host);
        self.phase = DialoguePhase::Ended;
        self.npc_chain.clear();
        self.responses.clear();
        for (_, avatar) in self.avatars.drain() {
            host.actors().destroy_actor(avatar);
        }
    }

    /// Stop the current line without running its end lifecycle or advancing.
    fn abandon_current_line(&mut self, host: &mut dyn DialogueHost) {
        self.awaiting_media = None;
        if let Some(timer) = self.line_timer.take() {
            host.cancel_timer(timer);
        }
        if self.current.is_some() {
            self.line_in_flight = false;
            host.media().stop_line();
        }
    }

    fn link_avatars(&mut self, host: &mut dyn DialogueHost) {
        let speakers = self.def.speakers.iter().chain(std::iter::once(&self.def.player_speaker));
        for speaker in speakers {
            if let Some(avatar) = host.actors().link_speaker_avatar(speaker) {
                self.avatars.insert(speaker.id.clone(), avatar);
            }
        }
    }

    fn play_next_npc_reply(&mut self, host: &mut dyn DialogueHost) {
        match self.npc_chain.pop_front() {
            Some(next) => self.play_npc_node(next, host),
            None => self.npc_finished_talking(host),
        }
    }

    fn play_npc_node(&mut self, index: usize, host: &mut dyn DialogueHost) {
        self.phase = DialoguePhase::PlayingNpcChain;
        self.current = Some(NodeRef::Npc(index));
        let line = self.pick_line(NodeRef::Npc(index), host);
        let speaker = self.speaker_for(&self.npc(index).speaker).clone();
        self.current_line = Some(line.clone());
        self.current_speaker = Some(speaker.clone());

        host.fire_events(&self.def.npc_nodes[index].events, EventRuntime::Start);
        if self.is_ended() || host.exit_requested() {
            return;
        }
        if self.npc(index).is_routing() {
            self.finish_npc_node(host);
            return;
        }

        self.line_in_flight = true;
        let avatar = self.avatars.get(&speaker.id).copied();
        host.media().play_line(&self.npc(index).id, &line, &speaker, avatar);
        host.notify(Notification::NpcLineStarted {
            node: self.npc(index).id.clone(),
            speaker: speaker.id.clone(),
            text: line.text.clone(),
        });
        self.start_line_timer(&line, host);
    }

    fn finish_npc_node(&mut self, host: &mut dyn DialogueHost) {
        let Some(NodeRef::Npc(index)) = self.current else {
            return;
        };
        let shown = self.line_in_flight;
        self.line_in_flight = false;
        host.media().stop_line();

        if host.has_authority() {
            host.record_data_task(PLAY_NODE_TASK, self.npc(index).id.as_str());
        }
        host.fire_events(&self.def.npc_nodes[index].events, EventRuntime::End);
        if self.is_ended() || host.exit_requested() {
            return;
        }
        if shown {
            host.notify(Notification::NpcLineFinished {
                node: self.npc(index).id.clone(),
                speaker: self.npc(index).speaker.clone(),
            });
        }
        self.play_next_npc_reply(host);
    }

    fn npc_finished_talking(&mut self, host: &mut dyn DialogueHost) {
        if self.is_ended() {
            return;
        }
        if self.responses.is_empty() {
            host.request_exit();
            return;
        }
        self.phase = DialoguePhase::AwaitingPlayerSelection;

        // Only the authority auto-selects; followers get its pick.
        if host.has_authority() {
            let single = (self.def.free_movement || host.settings().auto_select_single_response)
                && self.responses.len() == 1;
            let auto = if single {
                self.responses.last().copied()
            } else {
                self.responses
                    .iter()
                    .copied()
                    .find(|&r| self.player(r).is_auto_select())
            };
            if let Some(option) = auto {
                host.replicate_selection(&self.player(option).id);
                self.select_option(option, None, host);
                return;
            }
        }

        host.media().stop_line();
        host.notify(Notification::RepliesAvailable {
            options: ids_of(&self.def.player_nodes, &self.responses),
        });
    }

    fn play_player_node(&mut self, index: usize, host: &mut dyn DialogueHost) {
        debug_assert!(self.npc_chain.is_empty(), "player reply played while NPC lines are pending");
        self.responses.clear();
        self.phase = DialoguePhase::PlayingPlayerLine;
        self.current = Some(NodeRef::Player(index));

        host.fire_events(&self.def.player_nodes[index].events, EventRuntime::Start);
        if self.is_ended() || host.exit_requested() {
            return;
        }
        if self.player(index).is_routing() {
            self.finish_player_node(host);
            return;
        }

        let line = self.pick_line(NodeRef::Player(index), host);
        let speaker = self.def.player_speaker.clone();
        self.current_line = Some(line.clone());
        self.current_speaker = Some(speaker.clone());
        self.line_in_flight = true;

        host.notify(Notification::PlayerLineStarted {
            node: self.player(index).id.clone(),
            text: line.text.clone(),
        });
        let avatar = self.avatars.get(&speaker.id).copied();
        host.media().play_line(&self.player(index).id, &line, &speaker, avatar);
        self.start_line_timer(&line, host);
    }

    fn finish_player_node(&mut self, host: &mut dyn DialogueHost) {
        let Some(NodeRef::Player(index)) = self.current else {
            return;
        };
        let shown = self.line_in_flight;
        self.line_in_flight = false;
        host.media().stop_line();
        if shown {
            host.notify(Notification::PlayerLineFinished {
                node: self.player(index).id.clone(),
            });
        }

        host.fire_events(&self.def.player_nodes[index].events, EventRuntime::End);
        if self.is_ended() || host.exit_requested() || !host.has_authority() {
            return;
        }
        host.record_data_task(PLAY_NODE_TASK, self.player(index).id.as_str());

        let follow_ups = self.npcs.resolve_ids(&self.player(index).npc_follow_ups);
        if follow_ups.is_empty() {
            host.request_exit();
            return;
        }
        let next = follow_ups
            .into_iter()
            .find(|&n| host.conditions_met(&self.npc(n).conditions));
        let generated = match next {
            Some(next) => self.generate_chunk(next, host),
            None => false,
        };
        if generated {
            host.send_chunk(self.chunk_ids());
            self.play(host);
        } else {
            warn!(dialogue = %self.def.name, node = %self.player(index).id, "reply leads nowhere playable; ending dialogue");
            host.request_exit();
        }
    }

    fn start_line_timer(&mut self, line: &DialogueLine, host: &mut dyn DialogueHost) {
        self.awaiting_media = match line.duration {
            LineDuration::UntilAudioEnds => Some(MediaKind::Audio),
            LineDuration::UntilSequenceEnds => Some(MediaKind::Sequence),
            _ => None,
        };
        match line_duration(line, host.settings()) {
            None => {}
            Some(seconds) if seconds > 0.01 => {
                self.line_timer = Some(host.schedule_line_timer(seconds));
            }
            Some(_) => self.end_current_line(host),
        }
    }

    /// Uniform pick among the primary line and its alternatives, with variables
    /// substituted and the duration resolved.
    fn pick_line(&self, node: NodeRef, host: &mut dyn DialogueHost) -> DialogueLine {
        let (id, line, alternatives) = match node {
            NodeRef::Npc(i) => (&self.npc(i).id, &self.npc(i).line, &self.npc(i).alternative_lines),
            NodeRef::Player(i) => (&self.player(i).id, &self.player(i).line, &self.player(i).alternative_lines),
        };
        let mut chosen = if alternatives.is_empty() {
            line.clone()
        } else {
            let pick = host.random_index(alternatives.len() + 1);
            alternatives.get(pick).unwrap_or(line).clone()
        };
        chosen.text = replace_variables(&chosen.text, |name| host.string_variable(id, name));
        resolve_line_duration(&mut chosen, host.is_standalone(), host.settings());
        chosen
    }

    fn speaker_for(&self, id: &str) -> &SpeakerInfo {
        self.def
            .speaker(id)
            .or_else(|| self.def.speakers.first())
            .unwrap_or(&self.def.player_speaker)
    }

    fn sorted(&self, mut nodes: Vec<usize>, kind: NodeKind, vertical: bool) -> Vec<usize> {
        nodes.sort_by(|&a, &b| {
            let (pa, pb) = match kind {
                NodeKind::Npc => (self.npc(a).pos(), self.npc(b).pos()),
                NodeKind::Player => (self.player(a).pos(), self.player(b).pos()),
            };
            pa.graph_order(&pb, vertical)
        });
        nodes
    }
}

#[derive(Clone, Copy)]
enum NodeKind {
    Npc,
    Player,
}

/// Supplies values for `{name}` placeholders in lines.
pub trait VariableResolver {
    fn resolve(&self, node: &NodeId, name: &str) -> String;
}

/// Looks names up in the map and leaves unknown names as they are.
impl VariableResolver for FxHashMap<String, String> {
    fn resolve(&self, _node: &NodeId, name: &str) -> String {
        self.get(name).cloned().unwrap_or_else(|| name.to_string())
    }
}

/// Replace `{name}` placeholders through `lookup`, at most 50 times.
/// A name never contains a brace; stray braces are left as they are.
pub fn replace_variables(text: &str, mut lookup: impl FnMut(&str) -> String) -> String {
    let mut out = text.to_string();
    let mut from = 0;
    for _ in 0..MAX_VARIABLE_REPLACEMENTS {
        let Some(close) = out[from..].find('}').map(|c| from + c) else {
            break;
        };
        let Some(open) = out[from..close].rfind('{').map(|o| from + o) else {
            from = close + 1;
            continue;
        };
        let value = lookup(&out[open + 1..close]);
        out.replace_range(open..=close, &value);
        from = open + value.len();
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::media::{NullActors, NullMedia};
    use crate::core::timer::TimerQueue;
    use crate::schema::dialogue::AudioRef;
    use crate::schema::node::GraphPos;

    /// Minimal host: conditions named in `failing` fail, everything else passes.
    pub(crate) struct FakeHost {
        pub authority: bool,
        pub standalone: bool,
        pub settings: DialogueSettings,
        pub failing: FxHashSet<String>,
        pub timers: TimerQueue<()>,
        pub notifications: Vec<Notification>,
        pub sent_chunks: Vec<ChunkIds>,
        pub selections: Vec<NodeId>,
        pub data_tasks: Vec<String>,
        pub fired: Vec<(String, EventRuntime)>,
        pub exit: bool,
        media: NullMedia,
        actors: NullActors,
    }

    impl FakeHost {
        pub fn authority() -> Self {
            Self {
                authority: true,
                standalone: true,
                settings: DialogueSettings::default(),
                failing: FxHashSet::default(),
                timers: TimerQueue::new(),
                notifications: Vec::new(),
                sent_chunks: Vec::new(),
                selections: Vec::new(),
                data_tasks: Vec::new(),
                fired: Vec::new(),
                exit: false,
                media: NullMedia,
                actors: NullActors::default(),
            }
        }

        pub fn follower() -> Self {
            Self {
                authority: false,
                standalone: false,
                ..Self::authority()
            }
        }

        fn lines_started(&self) -> Vec<String> {
            self.notifications
                .iter()
                .filter_map(|n| match n {
                    Notification::NpcLineStarted { node, .. } => Some(node.0.clone()),
                    Notification::PlayerLineStarted { node, .. } => Some(node.0.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl DialogueHost for FakeHost {
        fn has_authority(&self) -> bool {
            self.authority
        }
        fn is_standalone(&self) -> bool {
            self.standalone
        }
        fn settings(&self) -> &DialogueSettings {
            &self.settings
        }
        fn random_index(&mut self, _len: usize) -> usize {
            0
        }
        fn conditions_met(&self, conditions: &[ConditionSpec]) -> bool {
            conditions.iter().all(|c| !self.failing.contains(&c.condition))
        }
        fn fire_events(&mut self, events: &[EventSpec], at: EventRuntime) {
            for event in events.iter().filter(|e| e.runtime.fires_at(at)) {
                self.fired.push((event.event.clone(), at));
                if event.event == "exit_dialogue" {
                    self.exit = true;
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
            &mut self.media
        }
        fn actors(&mut self) -> &mut dyn ActorProvider {
            &mut self.actors
        }
        fn string_variable(&self, _node: &NodeId, name: &str) -> String {
            match name {
                "player_name" => "Ash".to_string(),
                other => other.to_string(),
            }
        }
        fn notify(&mut self, notification: Notification) {
            self.notifications.push(notification);
        }
        fn send_chunk(&mut self, chunk: ChunkIds) {
            self.sent_chunks.push(chunk);
        }
        fn replicate_selection(&mut self, option: &NodeId) {
            self.selections.push(option.clone());
        }
        fn record_data_task(&mut self, task: &str, argument: &str) {
            self.data_tasks.push(format!("{}_{}", task, argument));
        }
        fn request_exit(&mut self) {
            self.exit = true;
        }
        fn exit_requested(&self) -> bool {
            self.exit
        }
    }

    /// Root "Hi" offering two replies, one hidden behind a failing condition.
    pub(crate) fn greeting() -> DialogueDef {
        let mut def = DialogueDef::new("Greeting", "hello");
        let mut hello = NpcNode::new("hello", "Barkeep", "Hi");
        hello.player_follow_ups = vec![NodeId::new("secret"), NodeId::new("bye")];
        def.npc_nodes.push(hello);

        let mut secret = PlayerNode::new("secret", "Tell me the password.");
        secret.conditions.push(ConditionSpec::new("knows_password", &[]));
        secret.pos = GraphPos::new(0.0, -10.0);
        def.player_nodes.push(secret);
        def.player_nodes.push(PlayerNode::new("bye", "Goodbye."));
        def.speakers.push(SpeakerInfo::named("Barkeep"));
        def
    }

    fn npc_at(id: &str, text: &str, y: f32) -> NpcNode {
        let mut node = NpcNode::new(id, "Barkeep", text);
        node.pos = GraphPos::new(0.0, y);
        node
    }

    #[test]
    fn chunk_hides_replies_with_failing_conditions() {
        let mut host = FakeHost::authority();
        host.failing.insert("knows_password".to_string());
        let mut dialogue = Dialogue::new(&greeting()).unwrap();

        assert!(dialogue.initialize(None, &mut host));
        let chunk = dialogue.chunk_ids();
        assert_eq!(chunk.npc_chain, vec![NodeId::new("hello")]);
        assert_eq!(chunk.responses, vec![NodeId::new("bye")]);
    }

    #[test]
    fn reply_chain_takes_first_passing_follow_up_by_position() {
        let mut def = DialogueDef::new("Chain", "a");
        let mut a = npc_at("a", "First.", 0.0);
        a.npc_follow_ups = vec![NodeId::new("low"), NodeId::new("high"), NodeId::new("blocked")];
        let mut blocked = npc_at("blocked", "Blocked.", -50.0);
        blocked.conditions.push(ConditionSpec::new("never", &[]));
        def.npc_nodes = vec![a, npc_at("low", "Low.", 20.0), npc_at("high", "High.", 10.0), blocked];

        let mut host = FakeHost::authority();
        host.failing.insert("never".to_string());
        let dialogue = Dialogue::new(&def).unwrap();
        let chain: Vec<&str> = dialogue
            .reply_chain(0, &host)
            .into_iter()
            .map(|i| dialogue.npc(i).id.as_str())
            .collect();
        assert_eq!(chain, vec!["a", "high"]);

        host.settings.vertical_wiring = true;
        host.failing.clear();
        let chain = dialogue.reply_chain(0, &host);
        // All X are equal, so the authored order stands.
        assert_eq!(dialogue.npc(chain[1]).id.as_str(), "low");
    }

    #[test]
    fn reply_chain_stops_on_loops() {
        let mut def = DialogueDef::new("Loop", "a");
        let mut a = NpcNode::new("a", "Barkeep", "A");
        a.npc_follow_ups = vec![NodeId::new("b")];
        let mut b = NpcNode::new("b", "Barkeep", "B");
        b.npc_follow_ups = vec![NodeId::new("c")];
        let mut c = NpcNode::new("c", "Barkeep", "C");
        c.npc_follow_ups = vec![NodeId::new("b"), NodeId::new("a")];
        def.npc_nodes = vec![a, b, c];

        let host = FakeHost::authority();
        let dialogue = Dialogue::new(&def).unwrap();
        assert_eq!(dialogue.reply_chain(0, &host), vec![0, 1, 2]);
    }

    #[test]
    fn chunk_validity_needs_replies_or_a_visible_line() {
        let mut def = DialogueDef::new("Empty", "route");
        def.npc_nodes.push(NpcNode::new("route", "Barkeep", ""));
        let mut host = FakeHost::authority();
        let mut dialogue = Dialogue::new(&def).unwrap();
        assert!(!dialogue.initialize(None, &mut host));
        assert!(!dialogue.has_valid_chunk());

        let mut dialogue = Dialogue::new(&greeting()).unwrap();
        assert!(dialogue.initialize(None, &mut host));
        assert!(dialogue.has_valid_chunk());
    }

    #[test]
    fn unknown_start_falls_back_to_root() {
        let mut host = FakeHost::authority();
        let mut dialogue = Dialogue::new(&greeting()).unwrap();
        assert!(dialogue.initialize(Some(&NodeId::new("nope")), &mut host));
        assert_eq!(dialogue.chunk_ids().npc_chain, vec![NodeId::new("hello")]);
    }

    #[test]
    fn line_plays_until_timer_then_offers_replies() {
        let mut host = FakeHost::authority();
        let mut dialogue = Dialogue::new(&greeting()).unwrap();
        dialogue.initialize(None, &mut host);
        dialogue.play(&mut host);

        assert_eq!(dialogue.phase(), DialoguePhase::PlayingNpcChain);
        assert!(dialogue.is_line_in_flight());
        assert_eq!(host.lines_started(), vec!["hello"]);

        let fired = host.timers.advance(2.0);
        for (handle, ()) in fired {
            dialogue.on_line_timer(handle, &mut host);
        }
        assert_eq!(dialogue.phase(), DialoguePhase::AwaitingPlayerSelection);
        assert!(host
            .notifications
            .contains(&Notification::RepliesAvailable { options: vec![NodeId::new("secret"), NodeId::new("bye")] }));
        assert_eq!(host.data_tasks, vec!["PlayDialogueNode_hello"]);
    }

    #[test]
    fn skip_cancels_timer_and_media() {
        let mut def = greeting();
        def.npc_nodes[0].line.audio = Some(AudioRef {
            asset: "hi.wav".to_string(),
            seconds: 1.0,
        });
        let mut host = FakeHost::authority();
        let mut dialogue = Dialogue::new(&def).unwrap();
        dialogue.initialize(None, &mut host);
        dialogue.play(&mut host);
        assert!(dialogue.skip_current_line(&mut host));
        assert_eq!(dialogue.phase(), DialoguePhase::AwaitingPlayerSelection);
        assert_eq!(host.sent_chunks.len(), 1);

        // Late triggers for the skipped line change nothing.
        let finished_before = host.data_tasks.len();
        for (handle, ()) in host.timers.advance(10.0) {
            dialogue.on_line_timer(handle, &mut host);
        }
        dialogue.on_media_finished(MediaKind::Audio, &mut host);
        assert_eq!(host.data_tasks.len(), finished_before);
        assert_eq!(dialogue.phase(), DialoguePhase::AwaitingPlayerSelection);
        assert!(!dialogue.skip_current_line(&mut host));
    }

    #[test]
    fn audio_line_waits_for_media_when_standalone() {
        let mut def = greeting();
        def.npc_nodes[0].line.audio = Some(AudioRef {
            asset: "hi.wav".to_string(),
            seconds: 1.0,
        });
        let mut host = FakeHost::authority();
        let mut dialogue = Dialogue::new(&def).unwrap();
        dialogue.initialize(None, &mut host);
        dialogue.play(&mut host);
        assert!(host.timers.is_empty());

        dialogue.on_media_finished(MediaKind::Sequence, &mut host);
        assert!(dialogue.is_line_in_flight());
        dialogue.on_media_finished(MediaKind::Audio, &mut host);
        assert_eq!(dialogue.phase(), DialoguePhase::AwaitingPlayerSelection);
    }

    #[test]
    fn unskippable_lines_stay() {
        let mut def = greeting();
        def.npc_nodes[0].skippable = false;
        let mut host = FakeHost::authority();
        let mut dialogue = Dialogue::new(&def).unwrap();
        dialogue.initialize(None, &mut host);
        dialogue.play(&mut host);
        assert!(!dialogue.skip_current_line(&mut host));
        assert!(dialogue.is_line_in_flight());
    }

    #[test]
    fn selecting_last_reply_requests_exit() {
        let mut host = FakeHost::authority();
        let mut dialogue = Dialogue::new(&greeting()).unwrap();
        dialogue.initialize(None, &mut host);
        dialogue.play(&mut host);
        dialogue.skip_current_line(&mut host);

        let bye = dialogue.player_index(&NodeId::new("bye")).unwrap();
        assert!(dialogue.select_option(bye, None, &mut host));
        assert_eq!(dialogue.phase(), DialoguePhase::PlayingPlayerLine);
        assert!(dialogue.skip_current_line(&mut host));
        assert!(host.exit);
        assert!(!dialogue.select_option(bye, None, &mut host));
    }

    #[test]
    fn routing_reply_is_auto_selected_by_authority_only() {
        let mut def = greeting();
        def.player_nodes = vec![PlayerNode::new("continue", "")];
        def.npc_nodes[0].player_follow_ups = vec![NodeId::new("continue")];
        def.player_nodes[0].npc_follow_ups = vec![NodeId::new("more")];
        def.npc_nodes.push(NpcNode::new("more", "Barkeep", "And another thing."));

        let mut host = FakeHost::authority();
        let mut dialogue = Dialogue::new(&def).unwrap();
        dialogue.initialize(None, &mut host);
        dialogue.play(&mut host);
        dialogue.skip_current_line(&mut host);
        assert_eq!(host.selections, vec![NodeId::new("continue")]);
        assert_eq!(dialogue.current_node_id(), Some(&NodeId::new("more")));
        assert_eq!(host.sent_chunks.last().unwrap().npc_chain, vec![NodeId::new("more")]);

        let mut follower = FakeHost::follower();
        let mut mirror = Dialogue::new(&def).unwrap();
        mirror.initialize(None, &mut follower);
        mirror.receive_chunk(
            &ChunkIds {
                npc_chain: vec![NodeId::new("hello")],
                responses: vec![NodeId::new("continue")],
            },
            &mut follower,
        );
        for (handle, ()) in follower.timers.advance(5.0) {
            mirror.on_line_timer(handle, &mut follower);
        }
        assert!(follower.selections.is_empty());
        assert_eq!(mirror.phase(), DialoguePhase::AwaitingPlayerSelection);
    }

    #[test]
    fn single_reply_is_auto_selected_when_enabled() {
        let mut host = FakeHost::authority();
        host.failing.insert("knows_password".to_string());
        let mut dialogue = Dialogue::new(&greeting()).unwrap();
        dialogue.initialize(None, &mut host);
        dialogue.play(&mut host);
        dialogue.skip_current_line(&mut host);
        assert_eq!(dialogue.phase(), DialoguePhase::AwaitingPlayerSelection);
        assert!(host.selections.is_empty());

        let mut host = FakeHost::authority();
        host.failing.insert("knows_password".to_string());
        host.settings.auto_select_single_response = true;
        let mut dialogue = Dialogue::new(&greeting()).unwrap();
        dialogue.initialize(None, &mut host);
        dialogue.play(&mut host);
        dialogue.skip_current_line(&mut host);
        assert_eq!(host.selections, vec![NodeId::new("bye")]);
        assert_eq!(dialogue.phase(), DialoguePhase::PlayingPlayerLine);
        assert_eq!(dialogue.current_node_id(), Some(&NodeId::new("bye")));
    }

    #[test]
    fn free_movement_auto_selects_single_reply() {
        let mut def = greeting();
        def.free_movement = true;
        let mut host = FakeHost::authority();
        host.failing.insert("knows_password".to_string());
        let mut dialogue = Dialogue::new(&def).unwrap();
        dialogue.initialize(None, &mut host);
        dialogue.play(&mut host);
        dialogue.skip_current_line(&mut host);
        assert_eq!(host.selections, vec![NodeId::new("bye")]);
        assert_eq!(dialogue.phase(), DialoguePhase::PlayingPlayerLine);

        // Two replies on offer: nothing is picked.
        let mut host = FakeHost::authority();
        let mut dialogue = Dialogue::new(&def).unwrap();
        dialogue.initialize(None, &mut host);
        dialogue.play(&mut host);
        dialogue.skip_current_line(&mut host);
        assert!(host.selections.is_empty());
        assert_eq!(dialogue.phase(), DialoguePhase::AwaitingPlayerSelection);
    }

    #[test]
    fn flagged_reply_is_auto_selected_among_several() {
        let mut def = greeting();
        def.player_nodes[1].auto_select = true;

        let mut host = FakeHost::authority();
        let mut dialogue = Dialogue::new(&def).unwrap();
        dialogue.initialize(None, &mut host);
        assert_eq!(dialogue.responses().len(), 2);
        dialogue.play(&mut host);
        dialogue.skip_current_line(&mut host);
        assert_eq!(host.selections, vec![NodeId::new("bye")]);
        assert_eq!(dialogue.current_node_id(), Some(&NodeId::new("bye")));
        assert!(!host
            .notifications
            .iter()
            .any(|n| matches!(n, Notification::RepliesAvailable { .. })));

        let mut follower = FakeHost::follower();
        let mut mirror = Dialogue::new(&def).unwrap();
        mirror.initialize(None, &mut follower);
        mirror.receive_chunk(
            &ChunkIds {
                npc_chain: vec![NodeId::new("hello")],
                responses: vec![NodeId::new("secret"), NodeId::new("bye")],
            },
            &mut follower,
        );
        for (handle, ()) in follower.timers.advance(5.0) {
            mirror.on_line_timer(handle, &mut follower);
        }
        assert!(follower.selections.is_empty());
        assert_eq!(mirror.phase(), DialoguePhase::AwaitingPlayerSelection);
    }

    #[test]
    fn received_chunk_supersedes_line_without_advancing() {
        let mut def = greeting();
        let mut more = NpcNode::new("more", "Barkeep", "More.");
        more.player_follow_ups = vec![NodeId::new("bye")];
        def.npc_nodes[0].npc_follow_ups = vec![NodeId::new("more")];
        def.npc_nodes.push(more);

        let mut host = FakeHost::follower();
        let mut dialogue = Dialogue::new(&def).unwrap();
        dialogue.receive_chunk(
            &ChunkIds {
                npc_chain: vec![NodeId::new("hello"), NodeId::new("more")],
                responses: vec![NodeId::new("bye")],
            },
            &mut host,
        );
        assert_eq!(dialogue.current_node_id(), Some(&NodeId::new("hello")));

        dialogue.receive_chunk(
            &ChunkIds {
                npc_chain: vec![NodeId::new("more")],
                responses: vec![NodeId::new("bye")],
            },
            &mut host,
        );
        assert_eq!(dialogue.current_node_id(), Some(&NodeId::new("more")));
        assert_eq!(host.timers.len(), 1);
        // The superseded line never ran its end events or finish notification.
        assert!(!host
            .notifications
            .iter()
            .any(|n| matches!(n, Notification::NpcLineFinished { .. })));
    }

    #[test]
    fn networked_durations_fall_back_to_fixed() {
        let settings = DialogueSettings::default();
        let mut line = DialogueLine::text("");
        line.shot = Some("Pan".to_string());
        resolve_line_duration(&mut line, true, &settings);
        assert_eq!(line.duration, LineDuration::UntilSequenceEnds);
        assert_eq!(line_duration(&line, &settings), None);

        let mut line = DialogueLine::text("");
        line.shot = Some("Pan".to_string());
        resolve_line_duration(&mut line, false, &settings);
        assert_eq!(line.duration, LineDuration::AfterFixedDuration);
        assert_eq!(line_duration(&line, &settings), Some(0.2));

        let mut line = DialogueLine::text("Hello");
        line.audio = Some(AudioRef {
            asset: "a.wav".to_string(),
            seconds: 3.0,
        });
        resolve_line_duration(&mut line, false, &settings);
        assert_eq!(line_duration(&line, &settings), Some(3.5));
    }

    #[test]
    fn variables_are_replaced() {
        let text = replace_variables("Welcome, {player_name}. {unknown}!", |name| match name {
            "player_name" => "Ash".to_string(),
            other => other.to_uppercase(),
        });
        assert_eq!(text, "Welcome, Ash. UNKNOWN!");

        // Substituted values are not scanned again.
        let text = replace_variables("{x}", |_| "{x}".to_string());
        assert_eq!(text, "{x}");
    }

    #[test]
    fn stray_braces_survive_replacement() {
        let lookup = |name: &str| match name {
            "x" => "Ash".to_string(),
            other => other.to_string(),
        };
        assert_eq!(replace_variables("{ {x}", lookup), "{ Ash");
        assert_eq!(replace_variables("} then {x} {", lookup), "} then Ash {");
        assert_eq!(replace_variables("{x}{x}", lookup), "AshAsh");
    }

    #[test]
    fn validation_catches_bad_references() {
        let mut def = greeting();
        def.npc_nodes[0].player_follow_ups.push(NodeId::new("ghost"));
        assert!(matches!(
            Dialogue::new(&def),
            Err(DefinitionError::DanglingReference { .. })
        ));

        let mut def = greeting();
        def.root = NodeId::new("ghost");
        assert_eq!(
            Dialogue::new(&def).unwrap_err(),
            DefinitionError::MissingRoot("Greeting".to_string())
        );

        let mut def = greeting();
        def.player_nodes.push(PlayerNode::new("hello", "Clash"));
        assert!(matches!(Dialogue::new(&def), Err(DefinitionError::DuplicateId { .. })));
    }

    #[test]
    fn speakers_are_normalized() {
        let mut def = greeting();
        def.speakers.clear();
        def.player_speaker.id = "Hero".to_string();
        let dialogue = Dialogue::new(&def).unwrap();
        assert_eq!(dialogue.def().speakers[0].id, "Greeting");
        assert_eq!(dialogue.def().player_speaker.id, PLAYER_SPEAKER_ID);
        assert_eq!(dialogue.speaker_for("Barkeep").id, "Greeting");
    }
}
