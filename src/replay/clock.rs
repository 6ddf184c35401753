//! Playback clock with start/stop and speed multiplier semantics.

use std::time::{Duration, Instant};

/// Invalid arguments to clock operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClockError {
    #[error("Elapsed time must be non-negative, got {0}ms")]
    NegativeElapsed(i64),
    #[error("Speed multiplier must be finite and positive, got {0}")]
    InvalidSpeed(f64),
}

/// Outcome of a start or stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockTransition {
    Started,
    Stopped,
    /// `start` on a running clock; nothing changed.
    AlreadyRunning,
    /// `stop` on a stopped clock; nothing changed.
    AlreadyStopped,
}

/// Virtual replay clock.
///
/// Elapsed time accrues only while running, scaled by the speed multiplier in
/// effect at the time it accrued. Changing the multiplier flushes the time
/// accrued so far under the old multiplier first.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    elapsed: Duration,
    started_at: Option<Instant>,
    speed: f64,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock {
    /// Create a stopped clock at zero with a 1.0 multiplier.
    pub fn new() -> Self {
        Self {
            elapsed: Duration::ZERO,
            started_at: None,
            speed: 1.0,
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    #[inline]
    pub fn speed_multiplier(&self) -> f64 {
        self.speed
    }

    pub fn start(&mut self) -> ClockTransition {
        self.start_at(Instant::now())
    }

    pub fn start_at(&mut self, now: Instant) -> ClockTransition {
        if self.is_running() {
            log::warn!("Playback clock already running");
            return ClockTransition::AlreadyRunning;
        }
        self.started_at = Some(now);
        ClockTransition::Started
    }

    pub fn stop(&mut self) -> ClockTransition {
        self.stop_at(Instant::now())
    }

    pub fn stop_at(&mut self, now: Instant) -> ClockTransition {
        match self.started_at.take() {
            Some(start) => {
                self.elapsed = self
                    .elapsed
                    .saturating_add(self.scaled(now.saturating_duration_since(start)));
                ClockTransition::Stopped
            }
            None => {
                log::warn!("Playback clock already stopped");
                ClockTransition::AlreadyStopped
            }
        }
    }

    /// Jump to `millis` of elapsed time, keeping the running state.
    pub fn set_elapsed_millis(&mut self, millis: i64) -> Result<(), ClockError> {
        self.set_elapsed_millis_at(millis, Instant::now())
    }

    pub fn set_elapsed_millis_at(&mut self, millis: i64, now: Instant) -> Result<(), ClockError> {
        let millis = u64::try_from(millis).map_err(|_| ClockError::NegativeElapsed(millis))?;
        self.elapsed = Duration::from_millis(millis);
        if self.is_running() {
            self.started_at = Some(now);
        }
        Ok(())
    }

    /// Change the speed multiplier without rescaling time already accrued.
    pub fn set_speed_multiplier(&mut self, speed: f64) -> Result<(), ClockError> {
        self.set_speed_multiplier_at(speed, Instant::now())
    }

    pub fn set_speed_multiplier_at(&mut self, speed: f64, now: Instant) -> Result<(), ClockError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ClockError::InvalidSpeed(speed));
        }
        let was_running = self.is_running();
        if was_running {
            self.stop_at(now);
        }
        self.speed = speed;
        if was_running {
            self.start_at(now);
        }
        Ok(())
    }

    /// Stop and rewind to zero. The multiplier is kept.
    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
        self.started_at = None;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        match self.started_at {
            Some(start) => self
                .elapsed
                .saturating_add(self.scaled(now.saturating_duration_since(start))),
            None => self.elapsed,
        }
    }

    /// Elapsed virtual time in whole milliseconds, saturating at `u64::MAX`.
    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Scale wall time by the multiplier, saturating at `Duration::MAX`.
    #[inline]
    fn scaled(&self, wall: Duration) -> Duration {
        Duration::try_from_secs_f64(wall.as_secs_f64() * self.speed).unwrap_or(Duration::MAX)
    }
}
