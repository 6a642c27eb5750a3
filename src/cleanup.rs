//! Delayed-deletion tracker that absorbs flapping containers.
//!
//! When the planner decides a record should be deleted, the controller does not delete it
//! immediately - it marks it here and only actually deletes it once the mark has aged past a
//! configurable delay. If the container that prompted the deletion comes back in the
//! meantime, the controller unmarks it and nothing is ever removed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::endpoint::EndpointId;

const DEFAULT_DELAY: Duration = Duration::from_secs(15 * 60);

/// Parses a duration string of the form `<digits><unit>` where unit is one of `s`, `m`, `h`,
/// `d` (seconds, minutes=60s, hours=3600s, days=86400s). Falls back to the default 15 minute
/// delay on anything that doesn't parse, rather than failing startup over a typo'd config value.
pub fn parse_delay(s: &str) -> Duration {
    let s = s.trim();
    if s.is_empty() {
        return DEFAULT_DELAY;
    }
    let split = s.len() - 1;
    let (digits, unit) = s.split_at(split);
    let Ok(n) = digits.parse::<u64>() else {
        return DEFAULT_DELAY;
    };
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return DEFAULT_DELAY,
    };
    Duration::from_secs(n * multiplier)
}

/// Tracks endpoints that the planner wants gone but which haven't aged past `delay` yet.
///
/// Entirely in-memory: a restart forgets every pending deletion. This is intentional - the
/// next reconciliation cycle re-derives the same set from the desired/current diff, so nothing
/// is lost except the elapsed wait time, and a just-restarted controller shouldn't be in a
/// hurry to delete things anyway.
pub struct CleanupTracker {
    delay: Duration,
    marked: HashMap<EndpointId, Instant>,
}

impl CleanupTracker {
    pub fn new(delay: Duration) -> Self {
        CleanupTracker {
            delay,
            marked: HashMap::new(),
        }
    }

    /// Marks `id` for deletion if not already marked. Idempotent: a repeated mark does not
    /// reset the clock, otherwise a flapping container could keep a record alive forever.
    pub fn mark_for_deletion(&mut self, id: EndpointId) {
        self.marked.entry(id).or_insert_with(Instant::now);
    }

    pub fn unmark_for_deletion(&mut self, id: &EndpointId) {
        self.marked.remove(id);
    }

    /// Returns and removes every id whose mark has aged past the configured delay. Callers are
    /// expected to actually delete the returned ids promptly; an id that fails to delete will
    /// simply be re-marked on the next cycle (the planner will still see it as no longer
    /// desired).
    pub fn get_eligible_for_deletion(&mut self) -> Vec<EndpointId> {
        let now = Instant::now();
        let eligible: Vec<EndpointId> = self
            .marked
            .iter()
            .filter(|(_, marked_at)| now.duration_since(**marked_at) >= self.delay)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &eligible {
            self.marked.remove(id);
        }
        eligible
    }

    /// Diagnostic view: seconds remaining before each currently-marked id becomes eligible.
    /// Never mutates tracker state.
    pub fn get_pending_status(&self) -> HashMap<EndpointId, u64> {
        let now = Instant::now();
        self.marked
            .iter()
            .map(|(id, marked_at)| {
                let elapsed = now.duration_since(*marked_at);
                let remaining = self.delay.saturating_sub(elapsed).as_secs();
                (id.clone(), remaining)
            })
            .collect()
    }
}
