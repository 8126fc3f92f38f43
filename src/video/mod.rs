//! Video device discovery
//!
//! Only enumeration lives here; capture is owned by the stream module's
//! external subprocess.

pub mod device;

pub use device::{enumerate_devices, VideoDeviceInfo};
