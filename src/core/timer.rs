/// Deferred, cancellable, fire-once callbacks driven by explicit time advancement.

/// Handle to a scheduled timer. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone)]
struct Pending<T> {
    handle: TimerHandle,
    due: f64,
    payload: T,
}

/// Single-threaded delayed-task queue.
#[derive(Debug, Clone)]
pub struct TimerQueue<T> {
    now: f64,
    next_handle: u64,
    pending: Vec<Pending<T>>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            now: 0.0,
            next_handle: 1,
            pending: Vec::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds elapsed since the queue was created.
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn schedule(&mut self, delay_seconds: f32, payload: T) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.pending.push(Pending {
            handle,
            due: self.now + f64::from(delay_seconds.max(0.0)),
            payload,
        });
        handle
    }

    /// Returns false if the timer already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.handle != handle);
        self.pending.len() != before
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.iter().any(|p| p.handle == handle)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Move the clock forward and return every timer that came due, earliest first.
    pub fn advance(&mut self, seconds: f32) -> Vec<(TimerHandle, T)> {
        self.now += f64::from(seconds.max(0.0));
        let now = self.now;
        let (mut due, rest): (Vec<_>, Vec<_>) = self.pending.drain(..).partition(|p| p.due <= now);
        self.pending = rest;
        due.sort_by(|a, b| a.due.total_cmp(&b.due).then(a.handle.cmp(&b.handle)));
        due.into_iter().map(|p| (p.handle, p.payload)).collect()
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to its due time.
    ///
    /// Lets callers fire timers one at a time while each callback schedules or
    /// cancels others.
    pub fn pop_until(&mut self, until: f64) -> Option<(TimerHandle, T)> {
        let index = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.due <= until)
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.handle.cmp(&b.handle)))
            .map(|(i, _)| i)?;
        let p = self.pending.remove(index);
        self.now = self.now.max(p.due);
        Some((p.handle, p.payload))
    }

    pub fn advance_clock_to(&mut self, until: f64) {
        self.now = self.now.max(until);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
