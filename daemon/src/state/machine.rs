//! Core capture session implementation
//!
//! Drives the countdown, capture, flash and inter-shot wait phases for a
//! fixed number of shots, then hands the ordered frames to a sink.
//!
//! Every phase is an awaited suspension point. A run is identified by a
//! generation number; `reset()` bumps it and wakes the pending timer, and
//! every transition re-checks the generation under the state lock, so an
//! aborted run can never touch the state of a later one.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::capture::{Frame, FrameSink, FrameSource, SinkError, SourceError};
use crate::events::{FlowEvent, SessionEvent};

use super::options::{Flow, SessionOptions};

/// Cadence of the visible countdown
const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

/// Phases of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No run in progress
    Idle,
    /// Showing the countdown before a shot
    CountingDown,
    /// Taking a frame from the source
    Capturing,
    /// Holding the flash cue after a shot
    Flashing,
    /// Pause between a shot and the next countdown
    InterShotWait,
    /// Every shot taken and handed off
    Complete,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    /// True while a run is between its first and last phase
    pub fn is_active(self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Complete)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::CountingDown => write!(f, "CountingDown"),
            SessionState::Capturing => write!(f, "Capturing"),
            SessionState::Flashing => write!(f, "Flashing"),
            SessionState::InterShotWait => write!(f, "InterShotWait"),
            SessionState::Complete => write!(f, "Complete"),
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub flow: Flow,
    pub state: SessionState,
    pub shots_taken: u32,
    pub total_shots: u32,
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// All shots taken, in capture order
    Completed(Vec<Frame>),
    /// Another run was active, nothing happened
    Ignored,
    /// `reset()` was called before the run finished
    Cancelled,
}

/// Result of asking a session to start in the background
#[derive(Debug)]
pub enum StartOutcome {
    /// The run was accepted and is driven by this task
    Started(JoinHandle<Result<RunOutcome, SessionError>>),
    /// Another run was active, nothing happened
    Ignored,
}

/// Errors that abort a run
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("frame source unavailable after {captured} shot(s): {source}")]
    SourceUnavailable {
        captured: u32,
        #[source]
        source: SourceError,
    },

    #[error("failed to hand off frames: {0}")]
    Handoff(#[from] SinkError),

    #[error("invalid session options: {0}")]
    InvalidOptions(String),
}

/// Why a run stopped early
enum Halt {
    Cancelled,
    Failed(SessionError),
}

/// Mutable session state, only touched under the lock
#[derive(Default)]
struct Inner {
    state: SessionState,
    /// Set from acceptance until the run completes, aborts or is reset
    running: bool,
    shots_taken: u32,
    frames: Vec<Frame>,
    generation: u64,
}

struct Shared {
    flow: Flow,
    options: SessionOptions,
    inner: RwLock<Inner>,
    /// Latest generation; pending timers wake when it changes
    cancel_tx: watch::Sender<u64>,
    event_tx: broadcast::Sender<FlowEvent>,
    sink: Arc<dyn FrameSink>,
}

/// A parameterized multi-shot capture session
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct CaptureSession {
    shared: Arc<Shared>,
}

impl CaptureSession {
    /// Create an idle session for `flow`
    pub fn new(
        flow: Flow,
        options: SessionOptions,
        sink: Arc<dyn FrameSink>,
        event_tx: broadcast::Sender<FlowEvent>,
    ) -> Result<Self, SessionError> {
        options.validate().map_err(SessionError::InvalidOptions)?;
        let (cancel_tx, _) = watch::channel(0);

        Ok(Self {
            shared: Arc::new(Shared {
                flow,
                options,
                inner: RwLock::new(Inner::default()),
                cancel_tx,
                event_tx,
                sink,
            }),
        })
    }

    #[cfg(test)]
    pub fn options(&self) -> &SessionOptions {
        &self.shared.options
    }

    /// Get the current state
    pub async fn state(&self) -> SessionState {
        self.shared.inner.read().await.state
    }

    #[cfg(test)]
    pub async fn shots_taken(&self) -> u32 {
        self.shared.inner.read().await.shots_taken
    }

    /// Frames captured so far in the current run
    #[cfg(test)]
    pub async fn frames(&self) -> Vec<Frame> {
        self.shared.inner.read().await.frames.clone()
    }

    pub async fn snapshot(&self) -> SessionStatus {
        let inner = self.shared.inner.read().await;
        SessionStatus {
            flow: self.shared.flow,
            state: inner.state,
            shots_taken: inner.shots_taken,
            total_shots: self.shared.options.total_shots,
        }
    }

    /// Run a full session on the current task
    ///
    /// Returns `RunOutcome::Ignored` without touching any state if a run
    /// is already active.
    pub async fn run(&self, source: Arc<dyn FrameSource>) -> Result<RunOutcome, SessionError> {
        match self.begin().await {
            Some(generation) => self.drive(generation, source).await,
            None => Ok(RunOutcome::Ignored),
        }
    }

    /// Accept a run and drive it on a spawned task
    pub async fn start(&self, source: Arc<dyn FrameSource>) -> StartOutcome {
        match self.begin().await {
            Some(generation) => {
                let session = self.clone();
                StartOutcome::Started(tokio::spawn(async move {
                    session.drive(generation, source).await
                }))
            }
            None => StartOutcome::Ignored,
        }
    }

    /// Force the session back to Idle, dropping any captured frames
    ///
    /// A run in progress stops at its next suspension point without any
    /// further transition or event.
    pub async fn reset(&self) {
        let mut inner = self.shared.inner.write().await;
        inner.generation += 1;
        inner.running = false;
        inner.state = SessionState::Idle;
        inner.shots_taken = 0;
        inner.frames.clear();
        self.shared.cancel_tx.send_replace(inner.generation);

        info!(flow = %self.shared.flow, generation = inner.generation, "session reset");
        self.emit(SessionEvent::Reset);
    }

    /// Guard against overlapping runs and prepare a fresh one
    async fn begin(&self) -> Option<u64> {
        let mut inner = self.shared.inner.write().await;

        if inner.running {
            debug!(flow = %self.shared.flow, state = %inner.state, "start ignored, run already active");
            self.emit(SessionEvent::StartIgnored { state: inner.state });
            return None;
        }

        inner.generation += 1;
        inner.running = true;
        inner.state = SessionState::Idle;
        inner.shots_taken = 0;
        inner.frames.clear();
        self.shared.cancel_tx.send_replace(inner.generation);

        info!(
            flow = %self.shared.flow,
            generation = inner.generation,
            total_shots = self.shared.options.total_shots,
            "capture run started"
        );
        self.emit(SessionEvent::RunStarted {
            total_shots: self.shared.options.total_shots,
        });

        Some(inner.generation)
    }

    async fn drive(
        &self,
        generation: u64,
        source: Arc<dyn FrameSource>,
    ) -> Result<RunOutcome, SessionError> {
        match self.cycle(generation, source.as_ref()).await {
            Ok(frames) => Ok(RunOutcome::Completed(frames)),
            Err(Halt::Cancelled) => {
                debug!(flow = %self.shared.flow, generation, "run cancelled");
                Ok(RunOutcome::Cancelled)
            }
            Err(Halt::Failed(e)) => Err(e),
        }
    }

    async fn cycle(&self, generation: u64, source: &dyn FrameSource) -> Result<Vec<Frame>, Halt> {
        let options = self.shared.options;

        for shot in 1..=options.total_shots {
            self.count_down(generation, shot).await?;
            self.capture(generation, shot, source).await?;

            {
                let mut inner = self.lock_current(generation).await?;
                self.transition(&mut inner, SessionState::Flashing, shot);
                self.emit(SessionEvent::Flash { shot });
            }
            self.hold(generation, options.flash_duration()).await?;

            if shot < options.total_shots {
                {
                    let mut inner = self.lock_current(generation).await?;
                    self.transition(&mut inner, SessionState::InterShotWait, shot);
                }
                self.hold(generation, options.inter_shot_delay()).await?;
            }
        }

        self.finish(generation).await
    }

    /// Count down from `countdown_seconds` to 1; 0 is never shown
    async fn count_down(&self, generation: u64, shot: u32) -> Result<(), Halt> {
        let seconds = self.shared.options.countdown_seconds;
        if seconds == 0 {
            return Ok(());
        }

        {
            let mut inner = self.lock_current(generation).await?;
            self.transition(&mut inner, SessionState::CountingDown, shot);
        }

        for value in (1..=seconds).rev() {
            {
                let _inner = self.lock_current(generation).await?;
                self.emit(SessionEvent::CountdownTick { shot, value });
            }
            self.hold(generation, COUNTDOWN_STEP).await?;
        }

        Ok(())
    }

    async fn capture(&self, generation: u64, shot: u32, source: &dyn FrameSource) -> Result<(), Halt> {
        let mut inner = self.lock_current(generation).await?;
        self.transition(&mut inner, SessionState::Capturing, shot);

        let frame = match source.current_frame() {
            Ok(raw) => raw.mirrored(),
            Err(e) => {
                let captured = inner.shots_taken;
                inner.state = SessionState::Idle;
                inner.running = false;

                error!(
                    flow = %self.shared.flow,
                    shot,
                    captured,
                    error = %e,
                    "capture failed, aborting run"
                );
                self.emit(SessionEvent::Error {
                    reason: e.to_string(),
                    captured,
                });
                return Err(Halt::Failed(SessionError::SourceUnavailable {
                    captured,
                    source: e,
                }));
            }
        };

        self.emit(SessionEvent::ShotCaptured {
            shot,
            width: frame.width(),
            height: frame.height(),
        });
        inner.frames.push(frame);
        inner.shots_taken += 1;

        info!(
            flow = %self.shared.flow,
            shot,
            total_shots = self.shared.options.total_shots,
            "shot captured"
        );
        Ok(())
    }

    async fn finish(&self, generation: u64) -> Result<Vec<Frame>, Halt> {
        let mut inner = self.lock_current(generation).await?;
        let shot = inner.shots_taken;
        inner.running = false;
        self.transition(&mut inner, SessionState::Complete, shot);

        let frames = inner.frames.clone();
        match self.shared.sink.deliver(self.shared.flow, &frames) {
            Ok(()) => {
                info!(flow = %self.shared.flow, count = frames.len(), "run complete, frames handed off");
                self.emit(SessionEvent::Complete {
                    frames: frames.iter().enumerate().map(|(i, f)| f.info(i)).collect(),
                });
                Ok(frames)
            }
            Err(e) => {
                error!(flow = %self.shared.flow, error = %e, "frame handoff failed");
                self.emit(SessionEvent::Error {
                    reason: e.to_string(),
                    captured: shot,
                });
                Err(Halt::Failed(SessionError::Handoff(e)))
            }
        }
    }

    /// Wait for `duration` unless the run is reset first
    async fn hold(&self, generation: u64, duration: Duration) -> Result<(), Halt> {
        if !duration.is_zero() {
            let mut cancel = self.shared.cancel_tx.subscribe();
            let current = *cancel.borrow_and_update();

            if current == generation {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = cancel.changed() => {}
                }
            }
        }

        self.check_current(generation).await
    }

    async fn check_current(&self, generation: u64) -> Result<(), Halt> {
        if self.shared.inner.read().await.generation == generation {
            Ok(())
        } else {
            Err(Halt::Cancelled)
        }
    }

    /// Lock the state if `generation` is still the live run
    async fn lock_current(&self, generation: u64) -> Result<RwLockWriteGuard<'_, Inner>, Halt> {
        let inner = self.shared.inner.write().await;
        if inner.generation != generation {
            return Err(Halt::Cancelled);
        }
        Ok(inner)
    }

    fn transition(&self, inner: &mut Inner, to: SessionState, shot: u32) {
        debug!(
            flow = %self.shared.flow,
            from = %inner.state,
            to = %to,
            shot,
            "session transition"
        );
        inner.state = to;
        self.emit(SessionEvent::PhaseEntered { phase: to, shot });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.shared.event_tx.send(FlowEvent {
            flow: self.shared.flow,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_pending, assert_ready_ok, task};

    use crate::capture::{FrameInfo, SessionStore};

    /// Returns 2x1 frames whose left pixel carries the call number
    struct ScriptedSource {
        calls: AtomicU32,
        fail_on: Option<u32>,
        captured_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedSource {
        fn new(fail_on: Option<u32>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_on,
                captured_at: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn captured_at(&self) -> Vec<Instant> {
            self.captured_at.lock().unwrap().clone()
        }
    }

    impl FrameSource for ScriptedSource {
        fn current_frame(&self) -> Result<Frame, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.captured_at.lock().unwrap().push(Instant::now());
            if self.fail_on == Some(call) {
                return Err(SourceError::Unavailable);
            }
            Ok(Frame::new(2, 1, vec![call as u8, 0, 0, 255, 0, 0, 0, 255])?)
        }
    }

    fn opts(total_shots: u32, countdown_seconds: u32, delay_ms: u64, flash_ms: u64) -> SessionOptions {
        SessionOptions {
            total_shots,
            countdown_seconds,
            inter_shot_delay_ms: delay_ms,
            flash_duration_ms: flash_ms,
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn create_session(
        options: SessionOptions,
    ) -> (CaptureSession, Arc<SessionStore>, broadcast::Receiver<FlowEvent>) {
        create_session_with_store(options, SessionStore::new())
    }

    fn create_session_with_store(
        options: SessionOptions,
        store: SessionStore,
    ) -> (CaptureSession, Arc<SessionStore>, broadcast::Receiver<FlowEvent>) {
        let (tx, rx) = broadcast::channel(256);
        let store = Arc::new(store);
        let session = CaptureSession::new(Flow::FilmCamera, options, store.clone(), tx).unwrap();
        (session, store, rx)
    }

    fn drain(rx: &mut broadcast::Receiver<FlowEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.event);
        }
        events
    }

    fn ticks(events: &[SessionEvent]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::CountdownTick { value, .. } => Some(*value),
                _ => None,
            })
            .collect()
    }

    fn completed(outcome: RunOutcome) -> Vec<Frame> {
        match outcome {
            RunOutcome::Completed(frames) => frames,
            other => panic!("expected a completed run, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_shots() {
        let (tx, _rx) = broadcast::channel(4);
        let result = CaptureSession::new(
            Flow::Photobooth,
            opts(0, 3, 0, 0),
            Arc::new(SessionStore::new()),
            tx,
        );
        assert!(matches!(result, Err(SessionError::InvalidOptions(_))));
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (session, _, _) = create_session(opts(3, 3, 3000, 200));
        assert_eq!(session.state().await, SessionState::Idle);
        assert_eq!(session.shots_taken().await, 0);
        assert!(session.frames().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_shot_scenario() {
        let (session, store, mut rx) = create_session(opts(3, 3, 3000, 200));
        let source = ScriptedSource::new(None);
        let started = Instant::now();

        let frames = completed(session.run(source.clone()).await.unwrap());

        assert_eq!(started.elapsed(), ms(15_600));
        let offsets: Vec<Duration> = source.captured_at().iter().map(|t| *t - started).collect();
        assert_eq!(offsets, vec![ms(3000), ms(9200), ms(15_400)]);

        let events = drain(&mut rx);
        assert_eq!(ticks(&events), vec![3, 2, 1, 3, 2, 1, 3, 2, 1]);
        assert_eq!(events.iter().filter(|e| matches!(e, SessionEvent::Flash { .. })).count(), 3);
        assert!(matches!(events.last(), Some(SessionEvent::Complete { frames }) if frames.len() == 3));

        assert_eq!(frames.len(), 3);
        assert_eq!(session.state().await, SessionState::Complete);
        assert_eq!(session.shots_taken().await, 3);
        assert_eq!(store.get_item("filmPhotos").unwrap(), frames);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_ordered_and_mirrored() {
        let (session, _, _) = create_session(opts(4, 0, 10, 10));
        let frames = completed(session.run(ScriptedSource::new(None)).await.unwrap());

        assert_eq!(frames.len(), 4);
        for (i, frame) in frames.iter().enumerate() {
            // The call number was drawn on the left, mirroring moves it right
            assert_eq!(frame.pixel(0, 0), Some([0, 0, 0, 255]));
            assert_eq!(frame.pixel(1, 0), Some([i as u8 + 1, 0, 0, 255]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_sequence() {
        let (session, _, mut rx) = create_session(opts(2, 1, 100, 50));
        session.run(ScriptedSource::new(None)).await.unwrap();

        use SessionEvent::*;
        use SessionState as S;
        assert_eq!(
            drain(&mut rx),
            vec![
                RunStarted { total_shots: 2 },
                PhaseEntered { phase: S::CountingDown, shot: 1 },
                CountdownTick { shot: 1, value: 1 },
                PhaseEntered { phase: S::Capturing, shot: 1 },
                ShotCaptured { shot: 1, width: 2, height: 1 },
                PhaseEntered { phase: S::Flashing, shot: 1 },
                Flash { shot: 1 },
                PhaseEntered { phase: S::InterShotWait, shot: 1 },
                PhaseEntered { phase: S::CountingDown, shot: 2 },
                CountdownTick { shot: 2, value: 1 },
                PhaseEntered { phase: S::Capturing, shot: 2 },
                ShotCaptured { shot: 2, width: 2, height: 1 },
                PhaseEntered { phase: S::Flashing, shot: 2 },
                Flash { shot: 2 },
                PhaseEntered { phase: S::Complete, shot: 2 },
                Complete {
                    frames: vec![
                        FrameInfo { index: 0, width: 2, height: 1 },
                        FrameInfo { index: 1, width: 2, height: 1 },
                    ]
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_phases_do_not_overlap() {
        let (session, _, mut rx) = create_session(opts(2, 2, 300, 200));
        let started = Instant::now();

        let recorder = tokio::spawn(async move {
            let mut entries = Vec::new();
            while let Ok(event) = rx.recv().await {
                if let SessionEvent::PhaseEntered { phase, .. } = event.event {
                    entries.push((phase, Instant::now() - started));
                    if phase == SessionState::Complete {
                        break;
                    }
                }
            }
            entries
        });

        session.run(ScriptedSource::new(None)).await.unwrap();
        let entries = recorder.await.unwrap();

        use SessionState::*;
        assert_eq!(
            entries,
            vec![
                (CountingDown, ms(0)),
                (Capturing, ms(2000)),
                (Flashing, ms(2000)),
                (InterShotWait, ms(2200)),
                (CountingDown, ms(2500)),
                (Capturing, ms(4500)),
                (Flashing, ms(4500)),
                (Complete, ms(4700)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_countdown_captures_without_ticks() {
        let (session, _, mut rx) = create_session(opts(3, 0, 0, 0));
        let started = Instant::now();

        let frames = completed(session.run(ScriptedSource::new(None)).await.unwrap());

        assert_eq!(frames.len(), 3);
        assert_eq!(started.elapsed(), Duration::ZERO);
        let events = drain(&mut rx);
        assert!(ticks(&events).is_empty());
        assert!(!events.iter().any(|e| matches!(
            e,
            SessionEvent::PhaseEntered { phase: SessionState::CountingDown, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_during_run_is_ignored() {
        let (session, _, mut rx) = create_session(opts(2, 3, 1000, 200));
        let source = ScriptedSource::new(None);

        let handle = match session.start(source.clone()).await {
            StartOutcome::Started(handle) => handle,
            StartOutcome::Ignored => panic!("first start must be accepted"),
        };

        // Rejected even before the spawned task has run
        assert!(matches!(session.start(source.clone()).await, StartOutcome::Ignored));

        // Shot 1 at 3.0s, flash until 3.2s, waiting until 4.2s
        tokio::time::sleep(ms(3500)).await;
        assert_eq!(session.state().await, SessionState::InterShotWait);
        let before = session.frames().await;

        assert!(matches!(session.run(source.clone()).await.unwrap(), RunOutcome::Ignored));
        assert_eq!(session.state().await, SessionState::InterShotWait);
        assert_eq!(session.shots_taken().await, 1);
        assert_eq!(session.frames().await, before);

        let frames = completed(handle.await.unwrap().unwrap());
        assert_eq!(frames.len(), 2);
        assert_eq!(source.calls(), 2);

        let ignored = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::StartIgnored { .. }))
            .count();
        assert_eq!(ignored, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_complete_runs_again() {
        let (session, store, _) = create_session(opts(2, 0, 0, 0));
        let source = ScriptedSource::new(None);

        completed(session.run(source.clone()).await.unwrap());
        let second = completed(session.run(source.clone()).await.unwrap());

        assert_eq!(source.calls(), 4);
        assert_eq!(second[0].pixel(1, 0), Some([3, 0, 0, 255]));
        assert_eq!(store.get_item("filmPhotos").unwrap(), second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_countdown() {
        let (session, store, mut rx) = create_session(opts(3, 3, 3000, 200));
        let source = ScriptedSource::new(None);

        let handle = match session.start(source.clone()).await {
            StartOutcome::Started(handle) => handle,
            StartOutcome::Ignored => panic!("start must be accepted"),
        };

        tokio::time::sleep(ms(1500)).await;
        assert_eq!(session.state().await, SessionState::CountingDown);

        session.reset().await;
        assert_eq!(session.state().await, SessionState::Idle);
        assert!(session.frames().await.is_empty());
        assert_eq!(drain(&mut rx).last(), Some(&SessionEvent::Reset));

        assert!(matches!(handle.await.unwrap().unwrap(), RunOutcome::Cancelled));

        tokio::time::sleep(ms(20_000)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(source.calls(), 0);
        assert_eq!(session.state().await, SessionState::Idle);
        assert!(store.get_item("filmPhotos").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_wakes_pending_timer() {
        let (session, _, _) = create_session(opts(2, 3, 3000, 200));
        let source = ScriptedSource::new(None);
        let mut run = task::spawn(session.run(source.clone()));

        // Parked on the first countdown second
        assert_pending!(run.poll());
        assert_eq!(session.state().await, SessionState::CountingDown);
        assert!(!run.is_woken());

        session.reset().await;
        assert!(run.is_woken());

        let outcome = assert_ready_ok!(run.poll());
        assert!(matches!(outcome, RunOutcome::Cancelled));
        assert_eq!(source.calls(), 0);
        assert_eq!(session.state().await, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_flash_drops_frames() {
        let (session, store, mut rx) = create_session(opts(3, 3, 3000, 200));
        let source = ScriptedSource::new(None);

        let handle = match session.start(source.clone()).await {
            StartOutcome::Started(handle) => handle,
            StartOutcome::Ignored => panic!("start must be accepted"),
        };

        tokio::time::sleep(ms(3100)).await;
        assert_eq!(session.state().await, SessionState::Flashing);
        assert_eq!(session.shots_taken().await, 1);

        session.reset().await;
        assert_eq!(session.shots_taken().await, 0);
        assert!(session.frames().await.is_empty());
        assert!(matches!(handle.await.unwrap().unwrap(), RunOutcome::Cancelled));

        drain(&mut rx);
        tokio::time::sleep(ms(20_000)).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(source.calls(), 1);
        assert!(store.get_item("filmPhotos").is_none());

        // The session is usable again after a reset
        let frames = completed(session.run(source.clone()).await.unwrap());
        assert_eq!(frames.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_failure_aborts_run() {
        let (session, store, mut rx) = create_session(opts(3, 3, 3000, 200));
        let source = ScriptedSource::new(Some(2));

        let err = assert_err!(session.run(source.clone()).await);
        assert!(matches!(
            err,
            SessionError::SourceUnavailable { captured: 1, source: SourceError::Unavailable }
        ));

        assert_eq!(session.state().await, SessionState::Idle);
        assert_eq!(session.frames().await.len(), 1);
        assert_eq!(session.shots_taken().await, 1);
        assert!(store.get_item("filmPhotos").is_none());

        let errors: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Error { .. }))
            .collect();
        assert_eq!(
            errors,
            vec![SessionEvent::Error {
                reason: "capture surface is not available".into(),
                captured: 1
            }]
        );

        // No automatic retry, but the caller may start again
        let frames = completed(session.run(source.clone()).await.unwrap());
        assert_eq!(frames.len(), 3);
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handoff_failure() {
        let (session, _, mut rx) = create_session_with_store(opts(2, 0, 0, 0), SessionStore::with_quota(0));

        let err = assert_err!(session.run(ScriptedSource::new(None)).await);
        assert!(matches!(err, SessionError::Handoff(SinkError::QuotaExceeded { .. })));

        // Every shot was taken, so the session is complete even though handoff failed
        assert_eq!(session.state().await, SessionState::Complete);
        assert_eq!(session.shots_taken().await, 2);

        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|e| matches!(e, SessionEvent::Error { .. })).count(), 1);
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn test_snapshot() {
        let (session, _, _) = create_session(opts(3, 3, 3000, 200));
        let status = session.snapshot().await;
        assert_eq!(
            status,
            SessionStatus {
                flow: Flow::FilmCamera,
                state: SessionState::Idle,
                shots_taken: 0,
                total_shots: 3,
            }
        );
    }
}
