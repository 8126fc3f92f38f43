//! Capture reconnection policy
//!
//! Decides what to attempt after a capture failure: retry the same
//! profile, fall back to a smaller resolution, or give up. Pure decision
//! logic; the session owns the timers that realize the returned delays.

use std::time::Duration;

use crate::config::CaptureProfile;

/// Descending fallback resolutions tried after the configured one
pub const STANDARD_RUNGS: [(u32, u32); 3] = [(1280, 720), (640, 480), (320, 240)];

/// Frame rate ceiling for fallback attempts
pub const FALLBACK_FPS_CAP: u32 = 30;

/// Pause before trying the next rung after an unproven failure
pub const DEFAULT_FALLBACK_DELAY: Duration = Duration::from_millis(500);

/// Pause before retrying a rung that had already produced output
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// What the failed attempt had achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureContext {
    /// Whether the attempt delivered at least one byte of output
    pub proven: bool,
}

/// Decision for the next capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAttempt {
    /// Unproven rung failed: advance to a smaller resolution
    Fallback {
        profile: CaptureProfile,
        delay: Duration,
    },
    /// Proven rung died: try the same profile again, it is known to work
    Retry {
        profile: CaptureProfile,
        delay: Duration,
    },
    /// No rungs left
    Exhausted,
}

/// Fallback ladder for one session run
///
/// Built from the configured profile: the original first, then every
/// standard rung strictly smaller than it, frame rate capped at
/// [`FALLBACK_FPS_CAP`]. Any failure before first output advances the
/// ladder; a proven attempt's death never does.
#[derive(Debug)]
pub struct ReconnectionPolicy {
    ladder: Vec<CaptureProfile>,
    index: usize,
    fallback_delay: Duration,
    retry_delay: Duration,
}

impl ReconnectionPolicy {
    pub fn new(original: &CaptureProfile) -> Self {
        Self::with_delays(original, DEFAULT_FALLBACK_DELAY, DEFAULT_RETRY_DELAY)
    }

    pub fn with_delays(
        original: &CaptureProfile,
        fallback_delay: Duration,
        retry_delay: Duration,
    ) -> Self {
        let capped_fps = original.fps.min(FALLBACK_FPS_CAP);
        let mut ladder = vec![original.clone()];
        for &(width, height) in STANDARD_RUNGS.iter() {
            if width < original.width && height < original.height {
                ladder.push(CaptureProfile {
                    device: original.device.clone(),
                    width,
                    height,
                    fps: capped_fps,
                });
            }
        }
        Self {
            ladder,
            index: 0,
            fallback_delay,
            retry_delay,
        }
    }

    /// Profile of the rung currently being attempted
    pub fn current(&self) -> Option<&CaptureProfile> {
        self.ladder.get(self.index)
    }

    /// Number of rungs including the original profile
    pub fn rung_count(&self) -> usize {
        self.ladder.len()
    }

    /// Record a failure of the current attempt and decide what comes next
    pub fn next_attempt(&mut self, failure: FailureContext) -> NextAttempt {
        if self.index >= self.ladder.len() {
            return NextAttempt::Exhausted;
        }
        if failure.proven {
            return NextAttempt::Retry {
                profile: self.ladder[self.index].clone(),
                delay: self.retry_delay,
            };
        }
        self.index += 1;
        match self.ladder.get(self.index) {
            Some(profile) => NextAttempt::Fallback {
                profile: profile.clone(),
                delay: self.fallback_delay,
            },
            None => NextAttempt::Exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceId;

    fn profile(width: u32, height: u32, fps: u32) -> CaptureProfile {
        CaptureProfile {
            device: DeviceId::Path("/dev/video0".into()),
            width,
            height,
            fps,
        }
    }

    fn unproven() -> FailureContext {
        FailureContext { proven: false }
    }

    fn proven() -> FailureContext {
        FailureContext { proven: true }
    }

    #[test]
    fn ladder_descends_from_original() {
        let mut policy = ReconnectionPolicy::new(&profile(1920, 1080, 30));
        assert_eq!(policy.rung_count(), 4);

        let mut resolutions = Vec::new();
        while let NextAttempt::Fallback { profile, delay } = policy.next_attempt(unproven()) {
            assert_eq!(delay, DEFAULT_FALLBACK_DELAY);
            resolutions.push(profile.resolution());
        }
        assert_eq!(resolutions, vec![(1280, 720), (640, 480), (320, 240)]);
        assert_eq!(policy.next_attempt(unproven()), NextAttempt::Exhausted);
    }

    #[test]
    fn unproven_720p_falls_back_to_480p() {
        let mut policy = ReconnectionPolicy::new(&profile(1280, 720, 30));
        match policy.next_attempt(unproven()) {
            NextAttempt::Fallback { profile, .. } => {
                assert_eq!(profile.resolution(), (640, 480));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn fallback_fps_is_capped() {
        let mut policy = ReconnectionPolicy::new(&profile(1920, 1080, 60));
        match policy.next_attempt(unproven()) {
            NextAttempt::Fallback { profile, .. } => assert_eq!(profile.fps, 30),
            other => panic!("expected fallback, got {other:?}"),
        }

        // A rate below the ceiling is preserved
        let mut policy = ReconnectionPolicy::new(&profile(1920, 1080, 15));
        match policy.next_attempt(unproven()) {
            NextAttempt::Fallback { profile, .. } => assert_eq!(profile.fps, 15),
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn proven_failure_retries_same_rung() {
        let mut policy = ReconnectionPolicy::new(&profile(1280, 720, 30));

        // Advance once, then prove the 480p rung and have it die
        let _ = policy.next_attempt(unproven());
        match policy.next_attempt(proven()) {
            NextAttempt::Retry { profile, delay } => {
                assert_eq!(profile.resolution(), (640, 480));
                assert_eq!(delay, DEFAULT_RETRY_DELAY);
            }
            other => panic!("expected retry, got {other:?}"),
        }

        // Retrying does not consume rungs: the next unproven failure
        // still has 240p to go to
        match policy.next_attempt(unproven()) {
            NextAttempt::Fallback { profile, .. } => {
                assert_eq!(profile.resolution(), (320, 240));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn smallest_original_exhausts_immediately() {
        let mut policy = ReconnectionPolicy::new(&profile(320, 240, 30));
        assert_eq!(policy.rung_count(), 1);
        assert_eq!(policy.next_attempt(unproven()), NextAttempt::Exhausted);
        // Sticky once exhausted
        assert_eq!(policy.next_attempt(proven()), NextAttempt::Exhausted);
    }

    #[test]
    fn non_standard_original_keeps_only_smaller_rungs() {
        let policy = ReconnectionPolicy::new(&profile(800, 600, 30));
        let sizes: Vec<_> = policy.ladder.iter().map(|p| p.resolution()).collect();
        assert_eq!(sizes, vec![(800, 600), (640, 480), (320, 240)]);
    }
}
