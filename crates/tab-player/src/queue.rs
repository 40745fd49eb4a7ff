//! Play queue reconciliation.
//!
//! The queue is never patched in place: every change builds a new list and
//! swaps the shared snapshot, so readers can hold a [`Queue`] as an immutable
//! view of one operation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use player_bus_types::{TrackId, TrackProjection};

/// Immutable queue snapshot in playback order.
pub type Queue = Arc<[TrackProjection]>;

/// Merge a requested track into a queue.
///
/// With a non-empty `queue_hint`, the hint becomes the new queue: duplicate ids
/// collapse to their first occurrence, and the requested track is appended only
/// if the hint does not already contain it. Without a hint, `current` is used,
/// any entry with the requested id is removed, and the requested track goes to
/// the tail.
pub fn reconcile(
    current: &[TrackProjection],
    requested: &TrackProjection,
    queue_hint: Option<&[TrackProjection]>,
) -> Vec<TrackProjection> {
    match queue_hint {
        Some(hint) if !hint.is_empty() => {
            let mut next = dedup_first(hint);
            if !next.iter().any(|track| track.id() == requested.id()) {
                next.push(requested.clone());
            }
            next
        }
        _ => {
            let mut next: Vec<TrackProjection> = current
                .iter()
                .filter(|track| track.id() != requested.id())
                .cloned()
                .collect();
            next.push(requested.clone());
            next
        }
    }
}

/// Drop repeated ids, keeping the first occurrence of each.
pub fn dedup_first(tracks: &[TrackProjection]) -> Vec<TrackProjection> {
    let mut seen = HashSet::with_capacity(tracks.len());
    tracks
        .iter()
        .filter(|track| seen.insert(track.id().clone()))
        .cloned()
        .collect()
}

/// Per-tab queue holder.
#[derive(Clone)]
pub struct QueueService {
    queue: Arc<Mutex<Queue>>,
}

impl QueueService {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(Arc::from(Vec::new()))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Queue {
        self.lock().clone()
    }

    /// Reconcile a play request against the current queue and store the result.
    pub fn apply_play(
        &self,
        requested: &TrackProjection,
        queue_hint: Option<&[TrackProjection]>,
    ) -> Queue {
        let mut guard = self.lock();
        let next: Queue = Arc::from(reconcile(&guard, requested, queue_hint));
        *guard = next.clone();
        next
    }

    /// Replace the queue wholesale (forwarded queues from peers).
    pub fn replace(&self, tracks: &[TrackProjection]) -> Queue {
        let next: Queue = Arc::from(dedup_first(tracks));
        *self.lock() = next.clone();
        next
    }

    /// Clear the queue.
    pub fn clear(&self) {
        let mut guard = self.lock();
        if !guard.is_empty() {
            *guard = Arc::from(Vec::new());
        }
    }

    /// Track after `current` in queue order, if any.
    pub fn next_after(&self, current: &TrackId) -> Option<TrackProjection> {
        let queue = self.snapshot();
        let pos = queue.iter().position(|track| track.id() == current)?;
        queue.get(pos + 1).cloned()
    }

    /// Track before `current` in queue order, if any.
    pub fn previous_before(&self, current: &TrackId) -> Option<TrackProjection> {
        let queue = self.snapshot();
        let pos = queue.iter().position(|track| track.id() == current)?;
        pos.checked_sub(1).and_then(|prev| queue.get(prev).cloned())
    }
}
