//! Session driving one timeline from a live source or a recorded log.
//!
//! A session owns a single background worker. In live mode the worker polls a
//! [`CounterSource`] every poll interval and appends changed snapshots with
//! the cursor following the newest one. In replay mode the worker moves the
//! cursor to the log's first timestamp plus the playback clock's elapsed time.
//!
//! Switching source stops and joins the old worker (dropping the source it
//! owned) and clears the timeline before the new source's first snapshot is
//! appended, so readers never see a mix of the two.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::replay::{
    ClockError, CursorMode, FormatError, LogReader, PlaybackClock, Timeline, TimelineError,
};
use crate::schema::{ConfigError, SessionConfig};
use crate::telemetry::{CounterSource, Snapshot, sample};

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error("Failed to spawn session worker: {0}")]
    Spawn(#[from] io::Error),
    #[error("Playback controls need a loaded log")]
    NotReplaying,
}

/// What the session is currently doing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Live,
    Replaying,
    /// The live source failed and the session ended.
    Failed(String),
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))?;
        Ok(Self { stop, handle })
    }

    fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.thread().unpark();
        if self.handle.join().is_err() {
            log::error!("Session worker panicked");
        }
    }
}

/// Sleep until `deadline` or until the stop flag is raised.
fn park_until(deadline: Instant, stop: &AtomicBool) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}

/// A timeline plus the worker feeding it.
///
/// Usage:
/// ```ignore
/// let mut session = Session::new(SessionConfig::default())?;
/// session.load_log("gc-regions.log")?;
/// session.play()?;
/// let timeline = session.timeline();
/// if let Some(snapshot) = timeline.latest() {
///     println!("{} regions, phase {:?}", snapshot.region_count(), snapshot.phase());
/// }
/// ```
pub struct Session {
    config: SessionConfig,
    timeline: Arc<Timeline>,
    /// Locked before the timeline whenever both are touched.
    clock: Arc<Mutex<PlaybackClock>>,
    status: Arc<Mutex<SessionStatus>>,
    worker: Option<Worker>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            config,
            timeline: Arc::new(Timeline::default()),
            clock: Arc::new(Mutex::new(PlaybackClock::new())),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            worker: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Shared handle for readers.
    pub fn timeline(&self) -> Arc<Timeline> {
        Arc::clone(&self.timeline)
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().clone()
    }

    /// Whether replay is currently advancing.
    pub fn is_playing(&self) -> bool {
        self.clock.lock().is_running()
    }

    pub fn elapsed_millis(&self) -> u64 {
        self.clock.lock().elapsed_millis()
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.clock.lock().speed_multiplier()
    }

    /// Switch to polling `source`, discarding the current timeline.
    pub fn start_live(&mut self, source: Box<dyn CounterSource>) -> Result<(), SessionError> {
        self.switch_source(CursorMode::Follow);
        *self.status.lock() = SessionStatus::Live;

        let timeline = Arc::clone(&self.timeline);
        let status = Arc::clone(&self.status);
        let interval = self.config.poll_interval();
        let worker = Worker::spawn("region-scope-live", move |stop| {
            live_loop(source, &timeline, &status, interval, &stop);
        });
        self.install(worker)?;
        log::info!("Started live session polling every {interval:?}");
        Ok(())
    }

    /// Parse a recorded log and switch to replaying it.
    ///
    /// The log is parsed before anything is torn down, so a malformed file
    /// leaves the current session untouched.
    pub fn load_log<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, SessionError> {
        let snapshots = LogReader::new()
            .with_default_version(self.config.default_log_version)
            .with_parallel_threshold(self.config.parallel_decode_threshold)
            .parse(path.as_ref())?;
        log::info!(
            "Loaded {} snapshots from {}",
            snapshots.len(),
            path.as_ref().display()
        );
        self.load_snapshots(snapshots)
    }

    /// Switch to replaying `snapshots`. The clock starts paused at zero.
    pub fn load_snapshots(&mut self, snapshots: Vec<Snapshot>) -> Result<usize, SessionError> {
        self.switch_source(CursorMode::Manual);

        let count = self.timeline.replace(snapshots, CursorMode::Manual)?;
        self.clock
            .lock()
            .set_speed_multiplier(self.config.speed_multiplier)?;
        *self.status.lock() = SessionStatus::Replaying;

        let timeline = Arc::clone(&self.timeline);
        let clock = Arc::clone(&self.clock);
        let tick = self.config.replay_tick();
        let worker = Worker::spawn("region-scope-replay", move |stop| {
            replay_loop(&timeline, &clock, tick, &stop);
        });
        self.install(worker)?;
        Ok(count)
    }

    /// Start or resume replay. Rewinds first if the cursor is at the end.
    pub fn play(&self) -> Result<(), SessionError> {
        self.require_replay()?;
        let mut clock = self.clock.lock();
        if self.timeline.at_end() {
            clock.set_elapsed_millis(0)?;
            if let Some(first) = self.timeline.first_timestamp() {
                self.timeline.seek_to(first);
            }
        }
        clock.start();
        self.wake_worker();
        Ok(())
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        self.require_replay()?;
        self.clock.lock().stop();
        Ok(())
    }

    pub fn set_speed(&self, speed: f64) -> Result<(), SessionError> {
        self.clock.lock().set_speed_multiplier(speed)?;
        Ok(())
    }

    /// Pause and step the cursor by `n` snapshots. Returns the new cursor.
    pub fn step(&self, n: i64) -> Result<usize, SessionError> {
        self.require_replay()?;
        let mut clock = self.clock.lock();
        clock.stop();
        let cursor = self.timeline.step_by(n);
        self.sync_clock(&mut clock)?;
        Ok(cursor)
    }

    /// Move the cursor to `time` (milliseconds) in either direction, keeping
    /// the play/pause state. Returns the new cursor.
    pub fn seek(&self, time: u64) -> Result<usize, SessionError> {
        self.require_replay()?;
        let mut clock = self.clock.lock();
        let cursor = self.timeline.seek_to(time);
        self.sync_clock(&mut clock)?;
        Ok(cursor)
    }

    /// Stop the worker and keep the collected history for inspection.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        {
            let mut clock = self.clock.lock();
            if clock.is_running() {
                clock.stop();
            }
        }
        let mut status = self.status.lock();
        if !matches!(*status, SessionStatus::Failed(_)) {
            *status = SessionStatus::Idle;
        }
    }

    fn switch_source(&mut self, mode: CursorMode) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        self.clock.lock().reset();
        self.timeline.clear(mode);
        *self.status.lock() = SessionStatus::Idle;
    }

    fn install(&mut self, worker: io::Result<Worker>) -> Result<(), SessionError> {
        match worker {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(err) => {
                *self.status.lock() = SessionStatus::Idle;
                Err(err.into())
            }
        }
    }

    fn require_replay(&self) -> Result<(), SessionError> {
        if *self.status.lock() == SessionStatus::Replaying {
            Ok(())
        } else {
            Err(SessionError::NotReplaying)
        }
    }

    /// Align the clock with the timeline's reference time.
    fn sync_clock(&self, clock: &mut PlaybackClock) -> Result<(), SessionError> {
        let first = self.timeline.first_timestamp().unwrap_or(0);
        let offset = self.timeline.reference_time().saturating_sub(first);
        clock.set_elapsed_millis(i64::try_from(offset).unwrap_or(i64::MAX))?;
        Ok(())
    }

    fn wake_worker(&self) {
        if let Some(worker) = &self.worker {
            worker.handle.thread().unpark();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

fn live_loop(
    source: Box<dyn CounterSource>,
    timeline: &Timeline,
    status: &Mutex<SessionStatus>,
    interval: Duration,
    stop: &AtomicBool,
) {
    let mut deadline = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        match sample(source.as_ref()) {
            Ok(snapshot) => {
                let timestamp = snapshot.timestamp();
                match timeline.append_if_changed(snapshot) {
                    Ok(true) => log::trace!("Appended snapshot at {timestamp}ms"),
                    Ok(false) => {}
                    Err(err) => {
                        log::error!("Live session ended: {err}");
                        *status.lock() = SessionStatus::Failed(err.to_string());
                        return;
                    }
                }
            }
            Err(err) if !err.is_fatal() => log::debug!("No snapshot this tick: {err}"),
            Err(err) => {
                log::error!("Live session ended: {err}");
                *status.lock() = SessionStatus::Failed(err.to_string());
                return;
            }
        }

        deadline += interval;
        let now = Instant::now();
        if deadline < now {
            // Fell behind; do not try to catch up with a burst of samples.
            deadline = now;
        }
        park_until(deadline, stop);
    }
}

fn replay_loop(
    timeline: &Timeline,
    clock: &Mutex<PlaybackClock>,
    tick: Duration,
    stop: &AtomicBool,
) {
    let Some(first) = timeline.first_timestamp() else {
        return;
    };
    while !stop.load(Ordering::Relaxed) {
        {
            let mut clock = clock.lock();
            if clock.is_running() {
                let cursor = timeline.advance_to(first.saturating_add(clock.elapsed_millis()));
                if timeline.at_end() {
                    clock.stop();
                    log::info!("Replay reached the end of the log at snapshot {cursor}");
                }
            }
        }
        park_until(Instant::now() + tick, stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Affiliation, ProtocolVersion, RegionLevels, RegionRecord, RegionState};
    use crate::telemetry::FakeSource;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            poll_interval_ms: 2,
            replay_tick_ms: 1,
            ..Default::default()
        }
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn snapshots(timestamps: &[u64]) -> Vec<Snapshot> {
        let record = RegionRecord::new(
            RegionLevels {
                used: 40,
                ..Default::default()
            },
            RegionState::Regular,
            0,
            Affiliation::Young,
        );
        timestamps
            .iter()
            .map(|&ts| Snapshot::new(ts, 1024, ProtocolVersion::V2, vec![record.clone(); 2], 0))
            .collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SessionConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            Session::new(config),
            Err(SessionError::Config(ConfigError::InvalidPollInterval))
        ));
    }

    #[test]
    fn test_live_session_follows_appends() {
        let mut session = Session::new(fast_config()).unwrap();
        session
            .start_live(Box::new(FakeSource::new(vec![2 << 59, 0])))
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Live);

        let timeline = session.timeline();
        assert!(wait_for(|| timeline.len() >= 3));
        assert_eq!(timeline.mode(), CursorMode::Follow);
        assert!(timeline.cursor() >= 3);
        session.stop();
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_stalled_source_keeps_polling() {
        let mut source = FakeSource::new(vec![0]);
        source.stalled = true;
        let mut session = Session::new(fast_config()).unwrap();
        session.start_live(Box::new(source)).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(session.status(), SessionStatus::Live);
        assert!(session.timeline().is_empty());
    }

    #[test]
    fn test_missing_counter_ends_session() {
        let mut source = FakeSource::new(vec![0]);
        source.missing = Some("region_size");
        let mut session = Session::new(fast_config()).unwrap();
        session.start_live(Box::new(source)).unwrap();

        assert!(wait_for(|| matches!(
            session.status(),
            SessionStatus::Failed(_)
        )));
        session.stop();
        assert!(matches!(session.status(), SessionStatus::Failed(_)));
    }

    #[test]
    fn test_switch_clears_old_data() {
        let mut session = Session::new(fast_config()).unwrap();
        let timeline = session.timeline();
        session
            .start_live(Box::new(FakeSource::new(vec![0, 0])))
            .unwrap();
        assert!(wait_for(|| timeline.len() >= 2));

        let loaded = session.load_snapshots(snapshots(&[1000, 2000])).unwrap();
        assert_eq!(loaded, 2);
        thread::sleep(Duration::from_millis(20));

        let timestamps: Vec<u64> = (0..timeline.len())
            .filter_map(|i| timeline.get(i))
            .map(|s| s.timestamp())
            .collect();
        assert_eq!(timestamps, vec![1000, 2000]);
        assert_eq!(timeline.cursor(), 0);
        assert_eq!(session.status(), SessionStatus::Replaying);
    }

    #[test]
    fn test_out_of_order_load_leaves_session_idle() {
        let mut session = Session::new(fast_config()).unwrap();
        let err = session.load_snapshots(snapshots(&[20, 10])).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Timeline(TimelineError::OutOfOrder { .. })
        ));
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.timeline().is_empty());
    }

    #[test]
    fn test_controls_need_replay() {
        let session = Session::new(fast_config()).unwrap();
        assert!(matches!(session.play(), Err(SessionError::NotReplaying)));
        assert!(matches!(session.seek(10), Err(SessionError::NotReplaying)));
    }

    #[test]
    fn test_replay_progresses_to_end() {
        let mut session = Session::new(fast_config()).unwrap();
        session
            .load_snapshots(snapshots(&[100, 110, 120, 130, 140]))
            .unwrap();
        session.set_speed(4.0).unwrap();
        let timeline = session.timeline();
        assert_eq!(timeline.cursor(), 0);

        session.play().unwrap();
        assert!(wait_for(|| timeline.at_end()));
        assert!(wait_for(|| !session.is_playing()));
        assert_eq!(timeline.latest().unwrap().timestamp(), 140);

        // Playing again from the end starts over.
        session.pause().unwrap();
        session.play().unwrap();
        assert!(timeline.cursor() <= timeline.len());
    }

    #[test]
    fn test_seek_and_step() {
        let mut session = Session::new(fast_config()).unwrap();
        session.load_snapshots(snapshots(&[0, 10, 20, 30, 40])).unwrap();
        let timeline = session.timeline();

        assert_eq!(session.seek(25).unwrap(), 3);
        assert_eq!(session.elapsed_millis(), 25);
        assert_eq!(session.seek(5).unwrap(), 1);

        assert_eq!(session.step(2).unwrap(), 3);
        assert_eq!(timeline.latest().unwrap().timestamp(), 20);
        assert_eq!(session.elapsed_millis(), 20);
        assert!(!session.is_playing());
    }

    #[test]
    fn test_load_log_parse_failure_keeps_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.log");
        std::fs::write(&path, "0 0 2 1024 2\n0\n").unwrap();

        let mut session = Session::new(fast_config()).unwrap();
        session.load_snapshots(snapshots(&[5])).unwrap();
        assert!(matches!(
            session.load_log(&path),
            Err(SessionError::Format(FormatError::TokenCount { .. }))
        ));
        assert_eq!(session.status(), SessionStatus::Replaying);
        assert_eq!(session.timeline().len(), 1);
    }
}
