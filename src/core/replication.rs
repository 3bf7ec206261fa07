/// The ordered quest update log.
///
/// The authority appends one record per visible quest mutation and sends the
/// whole list. A follower merges each received list into its own copy and
/// applies the entries it has not acknowledged, strictly in order.
use tracing::warn;

use crate::schema::update::NarrativeUpdate;

#[derive(Debug, Clone, Default)]
pub struct UpdateLog {
    entries: Vec<NarrativeUpdate>,
    dirty: bool,
}

impl UpdateLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[NarrativeUpdate] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&NarrativeUpdate> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Authority: append an entry stamped with the session clock.
    pub fn append(&mut self, mut update: NarrativeUpdate, now: f64) {
        update.created_at = now;
        update.acked = false;
        self.entries.push(update);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Authority: the full list to send, if anything was appended since the last flush.
    pub fn flush(&mut self) -> Option<Vec<NarrativeUpdate>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.entries.clone())
    }

    /// Follower: adopt `incoming`, keeping the ack flag of every entry already held.
    ///
    /// Returns the indices still to apply, in log order. A list shorter than the
    /// one held means the authority reset its log, so everything is taken as new.
    pub fn merge(&mut self, incoming: Vec<NarrativeUpdate>) -> Vec<usize> {
        if incoming.len() < self.entries.len() {
            warn!(
                held = self.entries.len(),
                received = incoming.len(),
                "received a shorter update log; resetting"
            );
            self.entries.clear();
        }
        let merged: Vec<NarrativeUpdate> = incoming
            .into_iter()
            .enumerate()
            .map(|(i, mut update)| {
                update.acked = self.entries.get(i).is_some_and(|held| held.acked);
                update
            })
            .collect();
        self.entries = merged;
        self.unacked()
    }

    pub fn ack(&mut self, index: usize) {
        if let Some(update) = self.entries.get_mut(index) {
            update.acked = true;
        }
    }

    pub fn unacked(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, u)| !u.acked)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty = false;
    }
}
