//! Configuration module
//!
//! TOML-file-backed configuration with a lock-free in-memory snapshot.

pub mod schema;
pub mod store;

pub use schema::{AppConfig, CaptureConfig, CaptureProfile, DeviceId, ServerConfig, VideoConfig};
pub use store::ConfigStore;
