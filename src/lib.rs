//! camfeed - MJPEG camera streaming server
//!
//! Supervises an external capture process, reassembles its output into
//! JPEG frames, and serves them to any number of HTTP viewers as a
//! `multipart/x-mixed-replace` stream.

pub mod config;
pub mod error;
pub mod state;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;

pub use error::{AppError, Result};
