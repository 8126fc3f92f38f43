//! Stream session state machine
//!
//! Composes the capture process, frame extractor, reconnection policy and
//! broadcaster into one supervised pipeline. A single supervisor task owns
//! all mutable session state and consumes two channels: control commands
//! from the HTTP layer and events from the active capture attempt. Public
//! operations only enqueue a command and await its acknowledgment.
//!
//! # States
//!
//! ```text
//! Idle -> Starting -> Streaming <-> Reconnecting
//!                          \            |
//!                           +--> Stopped (placeholder installed on
//!                                         ladder exhaustion)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{CaptureProfile, ConfigStore};
use crate::error::{AppError, Result};

use super::broadcaster::Broadcaster;
use super::capture::{CaptureCommand, CaptureError, CaptureEvent, CaptureProcess};
use super::extractor::{ExtractorStats, FrameExtractor};
use super::frame::FrameLimits;
use super::policy::{
    FailureContext, NextAttempt, ReconnectionPolicy, DEFAULT_FALLBACK_DELAY, DEFAULT_RETRY_DELAY,
};
use super::synthetic::{SyntheticSource, DEFAULT_PLACEHOLDER_INTERVAL};

/// Depth of the control command channel
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, never started
    Idle,
    /// Capture attempt launched, no frame published yet
    Starting,
    /// Frames are flowing to the broadcaster
    Streaming,
    /// Waiting to launch the next attempt after a failure
    Reconnecting,
    /// Explicitly stopped, or degraded to the placeholder source
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Reconnecting => write!(f, "reconnecting"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Timing knobs and frame limits for one session
#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub limits: FrameLimits,
    /// Pause between the stop and start halves of a restart
    pub restart_delay: Duration,
    /// Pause before launching the next fallback rung
    pub fallback_delay: Duration,
    /// Pause before retrying a rung that had already produced output
    pub retry_delay: Duration,
    /// Republish period of the placeholder source
    pub placeholder_interval: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            limits: FrameLimits::default(),
            restart_delay: Duration::from_millis(500),
            fallback_delay: DEFAULT_FALLBACK_DELAY,
            retry_delay: DEFAULT_RETRY_DELAY,
            placeholder_interval: DEFAULT_PLACEHOLDER_INTERVAL,
        }
    }
}

/// Point-in-time session status, served by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Clients currently attached to the broadcaster
    pub clients: usize,
    /// Clients ever attached
    pub lifetime_clients: u64,
    /// Whether a capture subprocess is currently running
    pub capture_active: bool,
    /// Whether a frame is cached for new joiners
    pub has_frame: bool,
    /// Whether the synthetic placeholder source is publishing
    pub placeholder_active: bool,
    /// Profile of the current or last capture attempt
    pub profile: Option<CaptureProfile>,
    pub frames_published: u64,
    pub extractor: ExtractorTotals,
    /// When the state last changed
    pub since: DateTime<Utc>,
}

/// Extraction counters accumulated across all attempts of this session
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExtractorTotals {
    pub frames_extracted: u64,
    pub frames_discarded: u64,
    pub overflows: u64,
}

impl ExtractorTotals {
    fn absorb(&mut self, stats: ExtractorStats) {
        self.frames_extracted += stats.frames_extracted;
        self.frames_discarded += stats.frames_discarded;
        self.overflows += stats.overflows;
    }
}

enum Wake {
    Command(Option<Command>),
    Capture(Option<CaptureEvent>),
    Timer,
}

enum Command {
    Start(oneshot::Sender<SessionState>),
    Stop(oneshot::Sender<SessionState>),
    Restart(oneshot::Sender<SessionState>),
    Status(oneshot::Sender<SessionStatus>),
}

/// Handle to a running stream session
///
/// Cheap to clone; all clones talk to the same supervisor task. Dropping
/// the last clone shuts the supervisor down and kills any capture process.
#[derive(Clone)]
pub struct StreamSession {
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<SessionState>,
    broadcaster: Arc<Broadcaster>,
}

impl StreamSession {
    /// Spawn the supervisor task and return its handle
    pub fn spawn(config: ConfigStore, tuning: SessionTuning) -> Self {
        let broadcaster = Arc::new(Broadcaster::new());
        Self::with_broadcaster(config, tuning, broadcaster)
    }

    pub fn with_broadcaster(
        config: ConfigStore,
        tuning: SessionTuning,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let (commands, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let supervisor = Supervisor {
            config,
            tuning,
            broadcaster: broadcaster.clone(),
            cmd_rx,
            state_tx,
            state: SessionState::Idle,
            since: Utc::now(),
            policy: None,
            active: None,
            pending: None,
            synthetic: None,
            profile: None,
            totals: ExtractorTotals::default(),
        };
        tokio::spawn(supervisor.run());

        Self {
            commands,
            state_rx,
            broadcaster,
        }
    }

    /// Begin streaming; no-op reporting the current state if already running
    pub async fn start(&self) -> Result<SessionState> {
        self.send(Command::Start).await
    }

    /// Stop streaming, kill the capture process, clear cached state; idempotent
    pub async fn stop(&self) -> Result<SessionState> {
        self.send(Command::Stop).await
    }

    /// Stop, then start again after the restart delay; legal from any state
    pub async fn restart(&self) -> Result<SessionState> {
        self.send(Command::Restart).await
    }

    /// Current status snapshot
    pub async fn status(&self) -> Result<SessionStatus> {
        self.send(Command::Status).await
    }

    /// Last observed state, without a supervisor round trip
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    async fn send<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| AppError::Internal("stream session supervisor is gone".into()))?;
        rx.await
            .map_err(|_| AppError::Internal("stream session supervisor is gone".into()))
    }
}

/// One launched capture attempt
struct ActiveAttempt {
    process: CaptureProcess,
    extractor: FrameExtractor,
    profile: CaptureProfile,
    /// Set on the first chunk of real output
    proven: bool,
}

/// A scheduled deferred action with its firing time
struct PendingTimer {
    at: Instant,
    action: PendingAction,
}

enum PendingAction {
    /// Launch a specific profile (fallback rung or proven retry)
    Attempt(CaptureProfile),
    /// Start a fresh run from the current config (restart's second half)
    Start,
}

/// Owns every piece of mutable session state; runs until the last
/// [`StreamSession`] handle is dropped.
struct Supervisor {
    config: ConfigStore,
    tuning: SessionTuning,
    broadcaster: Arc<Broadcaster>,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
    since: DateTime<Utc>,
    policy: Option<ReconnectionPolicy>,
    active: Option<ActiveAttempt>,
    pending: Option<PendingTimer>,
    synthetic: Option<SyntheticSource>,
    /// Profile of the current or most recent attempt
    profile: Option<CaptureProfile>,
    totals: ExtractorTotals,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            // Resolve the wakeup first so the handler below has the
            // supervisor to itself
            let wake = tokio::select! {
                cmd = self.cmd_rx.recv() => Wake::Command(cmd),
                event = next_capture_event(self.active.as_mut()),
                    if self.active.is_some() => Wake::Capture(event),
                _ = fire_at(self.pending.as_ref().map(|p| p.at)),
                    if self.pending.is_some() => Wake::Timer,
            };

            match wake {
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Command(None) => break,
                Wake::Capture(event) => self.handle_capture_event(event).await,
                Wake::Timer => {
                    if let Some(pending) = self.pending.take() {
                        match pending.action {
                            PendingAction::Attempt(profile) => self.launch(profile).await,
                            PendingAction::Start => self.begin_run().await,
                        }
                    }
                }
            }
        }

        // All handles dropped: tear the pipeline down before exiting
        self.teardown().await;
        debug!("Stream session supervisor finished");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(ack) => {
                match self.state {
                    SessionState::Starting
                    | SessionState::Streaming
                    | SessionState::Reconnecting => {
                        debug!(state = %self.state, "Start requested while already running");
                    }
                    SessionState::Idle | SessionState::Stopped => {
                        self.begin_run().await;
                    }
                }
                let _ = ack.send(self.state);
            }
            Command::Stop(ack) => {
                self.teardown().await;
                self.set_state(SessionState::Stopped);
                let _ = ack.send(self.state);
            }
            Command::Restart(ack) => {
                info!(delay = ?self.tuning.restart_delay, "Restarting stream session");
                self.teardown().await;
                self.set_state(SessionState::Stopped);
                self.pending = Some(PendingTimer {
                    at: Instant::now() + self.tuning.restart_delay,
                    action: PendingAction::Start,
                });
                let _ = ack.send(self.state);
            }
            Command::Status(ack) => {
                let _ = ack.send(self.status());
            }
        }
    }

    /// Fresh run: snapshot the config, rebuild the ladder, launch rung one
    async fn begin_run(&mut self) {
        let snapshot = self.config.get();
        let profile = CaptureProfile::from_video(&snapshot.video);
        info!(profile = %profile, "Starting stream session");

        // A fresh run supersedes anything previously scheduled
        self.pending = None;
        self.synthetic = None;
        self.policy = Some(ReconnectionPolicy::with_delays(
            &profile,
            self.tuning.fallback_delay,
            self.tuning.retry_delay,
        ));
        self.set_state(SessionState::Starting);
        self.launch(profile).await;
    }

    /// Spawn the capture tool for one profile
    async fn launch(&mut self, profile: CaptureProfile) {
        // Only one capture process per session; kill any predecessor first
        if let Some(previous) = self.active.take() {
            self.totals.absorb(previous.extractor.stats());
            previous.process.kill().await;
        }

        let tool = self.config.get().capture.tool.clone();
        let command = CaptureCommand::for_profile(&tool, &profile);
        self.profile = Some(profile.clone());

        match CaptureProcess::spawn(&command) {
            Ok(process) => {
                self.active = Some(ActiveAttempt {
                    process,
                    extractor: FrameExtractor::new(self.tuning.limits),
                    profile,
                    proven: false,
                });
            }
            Err(CaptureError::ToolMissing(tool)) => {
                // Lowering the resolution cannot conjure the binary; go
                // straight to the placeholder
                error!(tool, "Capture tool not found, installing placeholder source");
                self.install_placeholder();
            }
            Err(e) => {
                warn!(error = %e, "Capture spawn failed");
                self.attempt_failed(false).await;
            }
        }
    }

    async fn handle_capture_event(&mut self, event: Option<CaptureEvent>) {
        match event {
            Some(CaptureEvent::Chunk(chunk)) => {
                let Some(attempt) = self.active.as_mut() else {
                    return;
                };
                if !attempt.proven {
                    attempt.proven = true;
                    debug!(profile = %attempt.profile, "Capture attempt proven");
                }

                let mut published = 0usize;
                for frame in attempt.extractor.feed(&chunk) {
                    self.broadcaster.publish(&frame);
                    published += 1;
                }
                if published > 0 && self.state != SessionState::Streaming {
                    self.set_state(SessionState::Streaming);
                }
            }
            Some(CaptureEvent::Fatal(line)) => {
                let proven = self.active.as_ref().is_some_and(|a| a.proven);
                warn!(line, proven, "Abandoning capture attempt on fatal diagnostic");
                self.attempt_failed(proven).await;
            }
            Some(CaptureEvent::Exited(code)) => {
                let proven = self.active.as_ref().is_some_and(|a| a.proven);
                info!(code = ?code, proven, "Capture process exited");
                self.attempt_failed(proven).await;
            }
            Some(CaptureEvent::IoError(e)) => {
                let proven = self.active.as_ref().is_some_and(|a| a.proven);
                warn!(error = %e, proven, "Capture pipe failed");
                self.attempt_failed(proven).await;
            }
            // The pump never closes its channel before an Exited or
            // IoError event, so this is an attempt failure too
            None => {
                let proven = self.active.as_ref().is_some_and(|a| a.proven);
                warn!(proven, "Capture event channel closed unexpectedly");
                self.attempt_failed(proven).await;
            }
        }
    }

    /// Tear down the active attempt and consult the policy.
    ///
    /// Any unproven failure advances the fallback ladder, whatever its
    /// cause; a proven attempt's death schedules a retry of the same
    /// profile. Exhaustion installs the placeholder source.
    async fn attempt_failed(&mut self, proven: bool) {
        if let Some(attempt) = self.active.take() {
            self.totals.absorb(attempt.extractor.stats());
            attempt.process.kill().await;
        }

        let Some(policy) = self.policy.as_mut() else {
            return;
        };
        match policy.next_attempt(FailureContext { proven }) {
            NextAttempt::Fallback { profile, delay } => {
                info!(profile = %profile, ?delay, "Falling back to a lower profile");
                self.set_state(SessionState::Reconnecting);
                self.pending = Some(PendingTimer {
                    at: Instant::now() + delay,
                    action: PendingAction::Attempt(profile),
                });
            }
            NextAttempt::Retry { profile, delay } => {
                info!(profile = %profile, ?delay, "Retrying the proven profile");
                self.set_state(SessionState::Reconnecting);
                self.pending = Some(PendingTimer {
                    at: Instant::now() + delay,
                    action: PendingAction::Attempt(profile),
                });
            }
            NextAttempt::Exhausted => {
                warn!("Fallback ladder exhausted, installing placeholder source");
                self.install_placeholder();
            }
        }
    }

    /// Degrade to the synthetic source so viewers keep getting frames
    fn install_placeholder(&mut self) {
        let (width, height) = self
            .profile
            .as_ref()
            .map(|p| p.resolution())
            .unwrap_or((640, 480));

        match SyntheticSource::start(
            self.broadcaster.clone(),
            width,
            height,
            &self.tuning.limits,
            self.tuning.placeholder_interval,
        ) {
            Ok(source) => self.synthetic = Some(source),
            Err(e) => error!(error = %e, "Placeholder source failed to start"),
        }
        self.pending = None;
        self.set_state(SessionState::Stopped);
    }

    /// Kill the capture process, cancel timers, drop the placeholder and
    /// the cached frame. Safe to call in any state.
    async fn teardown(&mut self) {
        self.pending = None;
        self.synthetic = None;
        if let Some(attempt) = self.active.take() {
            self.totals.absorb(attempt.extractor.stats());
            attempt.process.kill().await;
        }
        self.policy = None;
        self.broadcaster.clear_last_frame();
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Session state changed");
            self.state = next;
            self.since = Utc::now();
            let _ = self.state_tx.send(next);
        }
    }

    fn status(&self) -> SessionStatus {
        let mut totals = self.totals;
        if let Some(attempt) = self.active.as_ref() {
            totals.absorb(attempt.extractor.stats());
        }
        SessionStatus {
            state: self.state,
            clients: self.broadcaster.client_count(),
            lifetime_clients: self.broadcaster.lifetime_clients(),
            capture_active: self.active.is_some(),
            has_frame: self.broadcaster.last_frame().is_some(),
            placeholder_active: self.synthetic.is_some(),
            profile: self.profile.clone(),
            frames_published: self.broadcaster.frames_published(),
            extractor: totals,
            since: self.since,
        }
    }
}

async fn next_capture_event(active: Option<&mut ActiveAttempt>) -> Option<CaptureEvent> {
    match active {
        Some(attempt) => attempt.process.next_event().await,
        None => std::future::pending().await,
    }
}

async fn fire_at(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
