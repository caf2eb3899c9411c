use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a TOML file
///
/// Uses `ArcSwap` for lock-free reads; the running pipeline reads the
/// configuration from callback threads.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Load the configuration at `path`
    ///
    /// A missing file yields the defaults; nothing is written until the
    /// first `set` or `update`.
    pub async fn open(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(text) => parse(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No configuration at {}, using defaults", path.display());
                AppConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;

        Ok(Self {
            path: path.to_path_buf(),
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Validate, persist and publish a whole configuration
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        config.validate()?;
        self.save(&config).await?;
        self.cache.store(Arc::new(config));
        Ok(())
    }

    /// Update configuration with a closure
    ///
    /// Read-modify-write; concurrent updates are last-write-wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (**self.cache.load()).clone();
        f(&mut config);
        self.set(config).await
    }

    async fn save(&self, config: &AppConfig) -> Result<()> {
        let text = toml::to_string_pretty(config).map_err(|e| AppError::Config(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, text).await?;
        Ok(())
    }
}

/// Parse a TOML configuration document
pub fn parse(text: &str) -> Result<AppConfig> {
    toml::from_str(text).map_err(|e| AppError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputConnection, SimDeviceKind};
    use crate::video::format::PixelFormat;
    use crate::video::mode::{DisplayModeId, LinkConfiguration};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bridge.toml");

        let store = ConfigStore::open(&path).await.unwrap();

        let config = store.get();
        assert_eq!(config.input.device_match, "DeckLink Duo (2)");
        assert_eq!(config.output.device_match, "DeckLink Duo (4)");
        assert_eq!(config.output.pixel_format, PixelFormat::Yuv8);
        assert_eq!(config.sim.devices.len(), 2);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_update_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.toml");

        let store = ConfigStore::open(&path).await.unwrap();
        store
            .update(|c| {
                c.output.display_mode = DisplayModeId::Hd1080p6000;
                c.output.link_configuration = Some(LinkConfiguration::DualLink);
                c.input.connection = Some(InputConnection::Hdmi);
            })
            .await
            .unwrap();
        assert_eq!(store.get().output.display_mode, DisplayModeId::Hd1080p6000);

        let reopened = ConfigStore::open(&path).await.unwrap();
        let config = reopened.get();
        assert_eq!(config.output.display_mode, DisplayModeId::Hd1080p6000);
        assert_eq!(config.output.link_configuration, Some(LinkConfiguration::DualLink));
        assert_eq!(config.input.connection, Some(InputConnection::Hdmi));
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::open(&dir.path().join("bridge.toml")).await.unwrap();

        let result = store.update(|c| c.input.device_match.clear()).await;

        assert!(matches!(result, Err(AppError::Config(_))));
        assert_eq!(store.get().input.device_match, "DeckLink Duo (2)");
    }

    #[tokio::test]
    async fn test_malformed_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        tokio::fs::write(&path, "[output]\npixel_format = 12\n").await.unwrap();

        assert!(matches!(
            ConfigStore::open(&path).await,
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = parse(
            r#"
            [input]
            device_match = "Duo (1)"
            apply_detected_format = true
            connection = "optical_sdi"

            [output]
            pixel_format = "BGRA8"

            [[sim.devices]]
            name = "DeckLink Duo (1)"
            kind = "input"
            "#,
        )
        .unwrap();

        assert_eq!(config.input.device_match, "Duo (1)");
        assert!(config.input.apply_detected_format);
        assert_eq!(config.input.connection, Some(InputConnection::OpticalSdi));
        assert_eq!(config.input.display_mode, DisplayModeId::Hd1080p5994);
        assert_eq!(config.output.pixel_format, PixelFormat::Bgra8);
        assert_eq!(config.output.device_match, "DeckLink Duo (4)");
        assert!(config.overlay.enabled);
        assert_eq!(config.sim.devices.len(), 1);
        assert_eq!(config.sim.devices[0].kind, SimDeviceKind::Input);
    }
}
