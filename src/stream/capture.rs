//! Capture subprocess supervision
//!
//! Owns one external capture tool invocation (ffmpeg): derives its command
//! line from a capture profile, spawns it with piped stdio, forwards stdout
//! bytes as ordered events over a bounded channel, and classifies stderr
//! diagnostics so the session can tell a dead device from harmless decoder
//! noise.

use bytes::{Bytes, BytesMut};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CaptureProfile;
use crate::utils::LogThrottler;

/// Stdout read size per syscall
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Event channel depth; bounds memory and back-pressures the child
const EVENT_QUEUE_DEPTH: usize = 32;

/// How long to collect trailing stderr after the stream ends
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// stderr lines that mean this profile cannot capture at all
///
/// Matched case-insensitively as substrings. Kept narrow so a decode
/// hiccup never tears down a working stream.
const FATAL_STDERR_PATTERNS: &[&str] = &[
    "no such file or directory",
    "no such device",
    "cannot open video device",
    "error opening input",
    "device or resource busy",
    "not a video capture device",
    "inappropriate ioctl for device",
    "permission denied",
];

/// stderr lines that are pure noise at streaming rates
const NOISY_STDERR_PATTERNS: &[&str] = &[
    "frame=",
    "fps=",
    "bitrate=",
    "speed=",
    "overread",
    "eoi missing",
    "error dc",
    "bad huffman",
];

/// How a stderr line should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrClass {
    /// The device cannot deliver at this profile; abandon the attempt
    Fatal,
    /// Expected high-rate output (progress lines, decode artifacts)
    Noisy,
    /// Anything else, logged once at debug level
    Info,
}

pub fn classify_stderr_line(line: &str) -> StderrClass {
    let lower = line.to_ascii_lowercase();
    if FATAL_STDERR_PATTERNS.iter().any(|p| lower.contains(p)) {
        StderrClass::Fatal
    } else if NOISY_STDERR_PATTERNS.iter().any(|p| lower.contains(p)) {
        StderrClass::Noisy
    } else {
        StderrClass::Info
    }
}

/// Spawn-time failures, distinguishable from runtime diagnostics
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Capture tool not found: {0}")]
    ToolMissing(String),

    #[error("Failed to spawn capture process: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Everything the subprocess produces, in stream order
#[derive(Debug)]
pub enum CaptureEvent {
    /// Raw stdout bytes with arbitrary boundaries
    Chunk(Bytes),
    /// A stderr line classified as fatal for this profile
    Fatal(String),
    /// The process exited; code if one was available
    Exited(Option<i32>),
    /// Reading stdout failed
    IoError(std::io::Error),
}

/// Fully resolved invocation of the capture tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl CaptureCommand {
    /// Derive ffmpeg arguments for one capture profile.
    ///
    /// Low resolutions (height <= 480) get a small realtime buffer and
    /// higher JPEG quality; larger ones get a bigger ring buffer and a
    /// decoder that tolerates transfer errors. Output is raw MJPEG on
    /// stdout with audio disabled.
    pub fn for_profile(tool: &str, profile: &CaptureProfile) -> Self {
        let low_tier = profile.height <= 480;

        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "info".into(),
            "-f".into(),
            "v4l2".into(),
            "-video_size".into(),
            format!("{}x{}", profile.width, profile.height),
            "-framerate".into(),
            profile.fps.to_string(),
            "-rtbufsize".into(),
            if low_tier { "1M".into() } else { "8M".into() },
        ];
        if !low_tier {
            args.push("-err_detect".into());
            args.push("ignore_err".into());
        }
        args.push("-i".into());
        args.push(profile.device.to_path());

        args.push("-f".into());
        args.push("mjpeg".into());
        args.push("-q:v".into());
        args.push(if low_tier { "4".into() } else { "6".into() });
        args.push("-an".into());
        args.push("pipe:1".into());

        Self {
            program: tool.to_string(),
            args,
        }
    }
}

/// Handle to a running capture subprocess
///
/// Events arrive through [`next_event`](Self::next_event) in stream order.
/// Dropping the handle kills the child; [`kill`](Self::kill) does the same
/// but waits until the process is reaped.
pub struct CaptureProcess {
    events: mpsc::Receiver<CaptureEvent>,
    kill_tx: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

impl CaptureProcess {
    pub fn spawn(command: &CaptureCommand) -> Result<Self, CaptureError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    CaptureError::ToolMissing(command.program.clone())
                }
                _ => CaptureError::Spawn(e),
            })?;

        info!(
            program = %command.program,
            pid = child.id(),
            "Capture process started"
        );
        debug!(args = ?command.args, "Capture arguments");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Spawn(std::io::Error::other("stdout pipe missing")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CaptureError::Spawn(std::io::Error::other("stderr pipe missing")))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (kill_tx, kill_rx) = oneshot::channel();

        let supervisor = tokio::spawn(supervise(child, stdout, stderr, event_tx, kill_rx));

        Ok(Self {
            events: event_rx,
            kill_tx: Some(kill_tx),
            supervisor,
        })
    }

    /// Next event in stream order; `None` once drained after exit
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        self.events.recv().await
    }

    /// Force-terminate the subprocess and wait until it is reaped
    pub async fn kill(mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        // Unblocks a pump stalled on a full event queue; it then observes
        // the send failure and kills the child itself
        self.events.close();
        let _ = self.supervisor.await;
    }
}

/// Owns the child for its whole life: pumps stdout into chunk events,
/// classifies stderr, reaps on exit, kills on request or when the
/// consumer goes away.
async fn supervise(
    mut child: Child,
    mut stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::Sender<CaptureEvent>,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stderr_open = true;
    let mut buf = BytesMut::with_capacity(READ_CHUNK_BYTES);
    let throttler = LogThrottler::default();

    loop {
        buf.reserve(READ_CHUNK_BYTES);

        tokio::select! {
            read = stdout.read_buf(&mut buf) => match read {
                Ok(0) => {
                    // Stream over. Collect any last diagnostics, then reap.
                    if stderr_open {
                        let drain = async {
                            while let Ok(Some(line)) = stderr_lines.next_line().await {
                                report_stderr(&line, &throttler, &tx).await;
                            }
                        };
                        let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, drain).await;
                    }
                    let _ = child.start_kill();
                    let code = child.wait().await.ok().and_then(|s| s.code());
                    info!(code = ?code, "Capture process exited");
                    let _ = tx.send(CaptureEvent::Exited(code)).await;
                    break;
                }
                Ok(_) => {
                    let chunk = buf.split().freeze();
                    if tx.send(CaptureEvent::Chunk(chunk)).await.is_err() {
                        // Consumer gone, nothing left to capture for
                        let _ = child.kill().await;
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Capture stdout read failed");
                    let _ = child.kill().await;
                    let _ = tx.send(CaptureEvent::IoError(e)).await;
                    break;
                }
            },
            line = stderr_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => report_stderr(&line, &throttler, &tx).await,
                Ok(None) => stderr_open = false,
                Err(e) => {
                    debug!(error = %e, "Capture stderr read failed");
                    stderr_open = false;
                }
            },
            _ = &mut kill_rx => {
                let _ = child.kill().await;
                debug!("Capture process killed");
                break;
            }
        }
    }
}

async fn report_stderr(line: &str, throttler: &LogThrottler, tx: &mpsc::Sender<CaptureEvent>) {
    match classify_stderr_line(line) {
        StderrClass::Fatal => {
            warn!(line, "Capture tool reported a fatal condition");
            let _ = tx.send(CaptureEvent::Fatal(line.to_string())).await;
        }
        StderrClass::Noisy => {
            if throttler.should_log("capture_stderr_noise") {
                debug!(line, "Capture tool noise (throttled)");
            }
        }
        StderrClass::Info => {
            debug!(line, "capture stderr");
        }
    }
}
