use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::HubConfig;
use crate::error::{Result, UvcError};

/// Configuration store backed by a JSON file
///
/// Uses `ArcSwap` for lock-free reads; the coordinator reads the config on
/// every attach and negotiation.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Arc<ArcSwap<HubConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// The configuration after the change
    pub config: Arc<HubConfig>,
}

impl ConfigStore {
    /// Load the configuration at `path`, writing defaults if it does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let config = match tokio::fs::read_to_string(path).await {
            Ok(json) => serde_json::from_str::<HubConfig>(&json).map_err(|e| {
                UvcError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration at {}, writing defaults", path.display());
                let config = HubConfig::default();
                Self::write_file(path, &config).await?;
                config
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;

        Ok(Self::with_config(path.to_path_buf(), config))
    }

    /// Store that starts from `config` without reading the file
    pub fn with_config(path: PathBuf, config: HubConfig) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            path,
            cache: Arc::new(ArcSwap::from_pointee(config)),
            change_tx,
        }
    }

    async fn write_file(path: &Path, config: &HubConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        // Write then rename so a crash never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current configuration (lock-free)
    pub fn get(&self) -> Arc<HubConfig> {
        self.cache.load_full()
    }

    /// Replace the whole configuration
    pub async fn set(&self, config: HubConfig) -> Result<()> {
        config.validate()?;
        Self::write_file(&self.path, &config).await?;
        let config = Arc::new(config);
        self.cache.store(config.clone());

        let _ = self.change_tx.send(ConfigChange { config });
        Ok(())
    }

    /// Modify the configuration in place
    ///
    /// Read-modify-write; concurrent updates are last-writer-wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut HubConfig),
    {
        let mut config = (*self.cache.load_full()).clone();
        f(&mut config);
        self.set(config).await
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceFilter;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hub.json");

        let store = ConfigStore::load(&path).await.unwrap();
        assert!(path.exists());
        assert!(!store.get().video.prefer_h264);

        let mut changes = store.subscribe();
        store
            .update(|c| {
                c.video.prefer_h264 = true;
                c.filters.push(DeviceFilter::exclude(0x046d, None));
            })
            .await
            .unwrap();

        let change = changes.recv().await.unwrap();
        assert!(change.config.video.prefer_h264);
        assert!(store.get().video.prefer_h264);

        // Reload from disk
        let store2 = ConfigStore::load(&path).await.unwrap();
        let config = store2.get();
        assert!(config.video.prefer_h264);
        assert_eq!(config.filters, vec![DeviceFilter::exclude(0x046d, None)]);
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::load(&dir.path().join("hub.json")).await.unwrap();

        let result = store.update(|c| c.video.default_height = 0).await;
        assert!(matches!(result, Err(UvcError::Config(_))));
        assert_eq!(store.get().video.default_height, 720);
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hub.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        assert!(matches!(
            ConfigStore::load(&path).await,
            Err(UvcError::Config(_))
        ));
    }
}
