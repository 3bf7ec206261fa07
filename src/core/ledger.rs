/// Data-task ledger: how many times a session has completed each named task.
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Ledger key: `task_argument`, lowercased with whitespace removed.
pub fn make_task_key(task: &str, argument: &str) -> String {
    format!("{}_{}", task, argument)
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTaskLedger {
    counts: FxHashMap<String, i32>,
}

impl DataTaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `quantity` completions under `key`; returns the new count.
    pub fn record(&mut self, key: &str, quantity: i32) -> i32 {
        let count = self.counts.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(quantity);
        *count
    }

    pub fn count(&self, key: &str) -> i32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn has_completed(&self, task: &str, argument: &str, quantity: i32) -> bool {
        self.count(&make_task_key(task, argument)) >= quantity
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sorted copy for persistence.
    pub fn snapshot(&self) -> BTreeMap<String, i32> {
        self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Replace the whole ledger.
    pub fn restore(&mut self, saved: &BTreeMap<String, i32>) {
        self.counts = saved.iter().map(|(k, v)| (k.clone(), *v)).collect();
    }
}
