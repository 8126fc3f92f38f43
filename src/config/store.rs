use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a TOML file
///
/// Uses `ArcSwap` for lock-free reads, providing high performance
/// for frequent configuration access in hot paths.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    /// Lock-free cache using ArcSwap for zero-cost reads
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Create a new configuration store
    ///
    /// Loads the file at `path`, or writes a default one if it is absent.
    pub async fn new(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let config = Self::load_or_init(path).await?;
        let cache = Arc::new(ArcSwap::from_pointee(config));

        Ok(Self {
            path: path.to_path_buf(),
            cache,
        })
    }

    /// Load configuration from file, creating a default file if missing
    async fn load_or_init(path: &Path) -> Result<AppConfig> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let config: AppConfig =
                    toml::from_str(&text).map_err(|e| AppError::Config(e.to_string()))?;
                config.validate().map_err(AppError::Config)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = AppConfig::default();
                Self::save_to_file(path, &config).await?;
                tracing::info!(path = %path.display(), "Created default configuration file");
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Save configuration to file
    async fn save_to_file(path: &Path, config: &AppConfig) -> Result<()> {
        let text =
            toml::to_string_pretty(config).map_err(|e| AppError::Config(e.to_string()))?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    /// Get current configuration (lock-free, zero-copy)
    ///
    /// Returns an `Arc<AppConfig>` for efficient sharing without cloning.
    /// This is a lock-free operation with minimal overhead.
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Update configuration with a closure
    ///
    /// Note: This uses a read-modify-write pattern. For concurrent updates,
    /// the last write wins. This is acceptable for configuration changes
    /// which are infrequent and typically user-initiated.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        // Load current config, clone it for modification
        let current = self.cache.load();
        let mut config = (**current).clone();
        f(&mut config);
        config.validate().map_err(AppError::Config)?;

        // Persist to disk first
        Self::save_to_file(&self.path, &config).await?;

        // Then update cache atomically
        self.cache.store(Arc::new(config));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_store_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("camfeed.toml");

        let store = ConfigStore::new(&path).await.unwrap();

        // Default file was written
        assert!(path.exists());
        let config = store.get();
        assert_eq!(config.video.width, 1280);

        // Update config
        store
            .update(|c| {
                c.video.width = 640;
                c.video.height = 480;
                c.server.port = 9000;
            })
            .await
            .unwrap();

        // Verify update
        let config = store.get();
        assert_eq!(config.video.width, 640);
        assert_eq!(config.server.port, 9000);

        // Create new store instance and verify persistence
        let store2 = ConfigStore::new(&path).await.unwrap();
        let config = store2.get();
        assert_eq!(config.video.height, 480);
        assert_eq!(config.server.port, 9000);
    }

    #[tokio::test]
    async fn test_config_store_rejects_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        tokio::fs::write(&path, "video = \"not a table\"")
            .await
            .unwrap();

        assert!(ConfigStore::new(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_config_store_rejects_zero_dimensions_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zero.toml");
        tokio::fs::write(&path, "[video]\nwidth = 0\n")
            .await
            .unwrap();

        // A hand-edited file must not smuggle an invalid profile in
        assert!(ConfigStore::new(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("camfeed.toml");
        let store = ConfigStore::new(&path).await.unwrap();

        assert!(store.update(|c| c.video.fps = 0).await.is_err());

        // Neither the cache nor the file took the bad value
        assert_eq!(store.get().video.fps, 30);
        let store2 = ConfigStore::new(&path).await.unwrap();
        assert_eq!(store2.get().video.fps, 30);
    }
}
