//! Time-ordered event queue with stable tie-breaking.
//!
//! Entries are kept sorted ascending by time; entries scheduled at the same
//! time keep their insertion order. `next` pops the earliest entry only once
//! it is due; there is no peek-without-remove.

/// An opaque handle to a scheduled entry, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventRef(u64);

/// An entry together with its scheduled time and cancellation handle.
#[derive(Debug, Clone)]
pub struct ScheduledEvent<T> {
    pub reference: EventRef,
    pub time: f64,
    pub event: T,
}

/// Ascending-time-sorted collection of scheduled entries.
#[derive(Debug)]
pub struct EventQueue<T> {
    events: Vec<ScheduledEvent<T>>,
    latest_ref: u64,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            latest_ref: 0,
        }
    }

    /// Schedule `event` at `time`. NaN times clamp to 0. Returns a handle for
    /// [`EventQueue::remove`].
    pub fn add(&mut self, time: f64, event: T) -> EventRef {
        let time = if time.is_nan() { 0.0 } else { time };
        let reference = EventRef(self.latest_ref);
        self.latest_ref += 1;

        // Insert after every entry at the same time to keep ties stable.
        let index = self.events.partition_point(|e| e.time <= time);
        self.events.insert(
            index,
            ScheduledEvent {
                reference,
                time,
                event,
            },
        );

        reference
    }

    /// Pop the earliest entry if it is due at or before `now`.
    pub fn next(&mut self, now: f64) -> Option<ScheduledEvent<T>> {
        if self.events.first()?.time <= now {
            Some(self.events.remove(0))
        } else {
            None
        }
    }

    /// Cancel a scheduled entry. Returns it if it was still pending.
    pub fn remove(&mut self, reference: EventRef) -> Option<ScheduledEvent<T>> {
        let index = self.events.iter().position(|e| e.reference == reference)?;
        Some(self.events.remove(index))
    }

    /// Drop every pending entry.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Keep only the entries the predicate accepts.
    pub fn retain(&mut self, f: impl FnMut(&ScheduledEvent<T>) -> bool) {
        self.events.retain(f);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
