//! Append-only chronological store of snapshots with a replay cursor.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::telemetry::Snapshot;

/// How the cursor reacts to appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorMode {
    /// The cursor only moves when stepped, advanced or seeked.
    #[default]
    Manual,
    /// The cursor tracks the append point (live mode).
    Follow,
}

/// Errors raised when appending to a timeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimelineError {
    #[error("Snapshot at {timestamp}ms arrived after snapshot at {last}ms")]
    OutOfOrder { timestamp: u64, last: u64 },
    #[error("Snapshot has {found} regions, timeline holds {expected}")]
    RegionCountMismatch { expected: usize, found: usize },
}

#[derive(Debug, Default)]
struct TimelineState {
    snapshots: Vec<Arc<Snapshot>>,
    cursor: usize,
    reference_time: u64,
    mode: CursorMode,
}

impl TimelineState {
    fn append(&mut self, snapshot: Snapshot) -> Result<(), TimelineError> {
        if let Some(last) = self.snapshots.last() {
            if snapshot.timestamp() < last.timestamp() {
                return Err(TimelineError::OutOfOrder {
                    timestamp: snapshot.timestamp(),
                    last: last.timestamp(),
                });
            }
            if snapshot.region_count() != last.region_count() {
                return Err(TimelineError::RegionCountMismatch {
                    expected: last.region_count(),
                    found: snapshot.region_count(),
                });
            }
        } else {
            self.reference_time = snapshot.timestamp();
        }

        self.snapshots.push(Arc::new(snapshot));
        if self.mode == CursorMode::Follow {
            self.cursor = self.snapshots.len();
        }
        Ok(())
    }

    fn advance_to(&mut self, time: u64) -> usize {
        let mut cursor = self.cursor;
        while cursor < self.snapshots.len() && self.snapshots[cursor].timestamp() <= time {
            cursor += 1;
        }
        self.cursor = cursor;
        self.reference_time = time;
        cursor
    }

    fn clear(&mut self, mode: CursorMode) {
        self.snapshots.clear();
        self.cursor = 0;
        self.reference_time = 0;
        self.mode = mode;
    }
}

/// Chronological snapshot history shared between one writer and many readers.
///
/// Every operation takes the same lock, so operations are linearizable with
/// respect to each other. Readers get `Arc`s to immutable snapshots and never
/// hold the lock while inspecting them.
#[derive(Debug, Default)]
pub struct Timeline {
    state: Mutex<TimelineState>,
}

impl Timeline {
    pub fn new(mode: CursorMode) -> Self {
        Self {
            state: Mutex::new(TimelineState {
                mode,
                ..Default::default()
            }),
        }
    }

    /// Append a snapshot.
    ///
    /// Fails if its timestamp is earlier than the last snapshot's, or if its
    /// region count differs from the rest of the timeline.
    pub fn append(&self, snapshot: Snapshot) -> Result<(), TimelineError> {
        self.state.lock().append(snapshot)
    }

    /// Append a snapshot unless it equals the last one.
    ///
    /// Returns whether the snapshot was appended.
    pub fn append_if_changed(&self, snapshot: Snapshot) -> Result<bool, TimelineError> {
        let mut state = self.state.lock();
        if state.snapshots.last().is_some_and(|last| **last == snapshot) {
            return Ok(false);
        }
        state.append(snapshot)?;
        Ok(true)
    }

    /// Drop all snapshots and replace them with `snapshots`, atomically.
    ///
    /// On error the timeline is left empty rather than half loaded.
    pub fn replace(&self, snapshots: Vec<Snapshot>, mode: CursorMode) -> Result<usize, TimelineError> {
        let mut state = self.state.lock();
        state.clear(mode);
        for snapshot in snapshots {
            if let Err(e) = state.append(snapshot) {
                state.clear(mode);
                return Err(e);
            }
        }
        Ok(state.snapshots.len())
    }

    /// Drop all snapshots and switch cursor mode.
    pub fn clear(&self, mode: CursorMode) {
        self.state.lock().clear(mode);
    }

    pub fn set_mode(&self, mode: CursorMode) {
        let mut state = self.state.lock();
        state.mode = mode;
        if mode == CursorMode::Follow {
            state.cursor = state.snapshots.len();
        }
    }

    pub fn mode(&self) -> CursorMode {
        self.state.lock().mode
    }

    /// Move the cursor by `n` snapshots, keeping at least one in range.
    ///
    /// Does nothing on an empty timeline. Returns the new cursor.
    pub fn step_by(&self, n: i64) -> usize {
        let mut state = self.state.lock();
        let len = state.snapshots.len();
        if len == 0 {
            return 0;
        }
        let target = (state.cursor as i64).saturating_add(n).clamp(1, len as i64) as usize;
        state.cursor = target;
        state.reference_time = state.snapshots[target - 1].timestamp();
        target
    }

    /// Move the cursor forward past every snapshot at or before `time`.
    ///
    /// Never moves backwards. Scans from the current cursor, so the cost is
    /// proportional to the distance moved. Returns the new cursor.
    pub fn advance_to(&self, time: u64) -> usize {
        self.state.lock().advance_to(time)
    }

    /// Advance by `duration` milliseconds past the reference time.
    ///
    /// Reading the reference time and advancing happen under one lock, so a
    /// concurrent step or seek is never overwritten with a stale target.
    pub fn advance_by(&self, duration: u64) -> usize {
        let mut state = self.state.lock();
        let time = state.reference_time.saturating_add(duration);
        state.advance_to(time)
    }

    /// Place the cursor just past the last snapshot at or before `time`, in
    /// either direction.
    pub fn seek_to(&self, time: u64) -> usize {
        let mut state = self.state.lock();
        let cursor = state.snapshots.partition_point(|s| s.timestamp() <= time);
        state.cursor = cursor;
        state.reference_time = time;
        cursor
    }

    /// Snapshots before the cursor, oldest first.
    pub fn in_range(&self) -> Vec<Arc<Snapshot>> {
        let state = self.state.lock();
        state.snapshots[..state.cursor].to_vec()
    }

    /// Snapshot just before the cursor.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        let state = self.state.lock();
        state
            .cursor
            .checked_sub(1)
            .map(|i| Arc::clone(&state.snapshots[i]))
    }

    pub fn get(&self, index: usize) -> Option<Arc<Snapshot>> {
        self.state.lock().snapshots.get(index).cloned()
    }

    pub fn cursor(&self) -> usize {
        self.state.lock().cursor
    }

    /// Time the cursor was last advanced or stepped to, in milliseconds.
    pub fn reference_time(&self) -> u64 {
        self.state.lock().reference_time
    }

    pub fn len(&self) -> usize {
        self.state.lock().snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().snapshots.is_empty()
    }

    /// Whether the cursor has reached the last stored snapshot.
    pub fn at_end(&self) -> bool {
        let state = self.state.lock();
        state.cursor == state.snapshots.len()
    }

    pub fn first_timestamp(&self) -> Option<u64> {
        self.state.lock().snapshots.first().map(|s| s.timestamp())
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.state.lock().snapshots.last().map(|s| s.timestamp())
    }
}
