use std::sync::Arc;

use crate::config::ConfigStore;
use crate::stream::StreamSession;

/// Application-wide state shared across handlers
///
/// The stream session is the single entry point for all streaming
/// operations; handlers reach the broadcaster through it.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// The one stream session of this process
    pub session: StreamSession,
}

impl AppState {
    pub fn new(config: ConfigStore, session: StreamSession) -> Arc<Self> {
        Arc::new(Self { config, session })
    }
}
