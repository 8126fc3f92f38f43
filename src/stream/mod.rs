//! MJPEG streaming engine
//!
//! Pipeline: a capture subprocess produces raw bytes, the extractor
//! reassembles them into validated JPEG frames, and the broadcaster fans
//! the frames out to attached HTTP clients. The session state machine
//! supervises the whole thing across failures and resolution fallbacks.

pub mod broadcaster;
pub mod capture;
pub mod extractor;
pub mod frame;
pub mod policy;
pub mod session;
pub mod synthetic;

pub use broadcaster::{Broadcaster, StreamClient, BOUNDARY, STREAM_CONTENT_TYPE};
pub use capture::{CaptureCommand, CaptureError, CaptureEvent, CaptureProcess};
pub use extractor::{ExtractorStats, FrameExtractor};
pub use frame::{Frame, FrameLimits};
pub use policy::{FailureContext, NextAttempt, ReconnectionPolicy};
pub use session::{SessionState, SessionStatus, SessionTuning, StreamSession};
pub use synthetic::SyntheticSource;
