use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::encoder::EncoderOptions;
use crate::session::ControllerConfig;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "clipinc".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7878,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in each captured frame
    pub frame_size: usize,
    /// WAV file played as the captured tab
    pub source: Option<String>,
    /// Pace file frames at playback speed
    pub realtime: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            frame_size: 1024,
            source: None,
            realtime: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub kbps: u16,
    pub cover_timeout_secs: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            kbps: 256,
            cover_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    pub dir: String,
    pub prefix: String,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            dir: "~/Downloads".to_string(),
            prefix: "clipinc".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ContentConfig {
    /// Webhook of the page hosting the player
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "~/.clipinc/session.json".to_string(),
        }
    }
}

impl Config {
    /// Load from `path` (extension picks the format), then apply `CLIPINC_*` overrides
    ///
    /// Nested keys use a double underscore, e.g. `CLIPINC_ENCODER__KBPS=192`.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("CLIPINC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;

        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.audio.channels != 2 {
            bail!("audio.channels must be 2, got {}", self.audio.channels);
        }
        if self.audio.frame_size == 0 {
            bail!("audio.frame_size must be positive");
        }
        Ok(())
    }

    pub fn downloads_dir(&self) -> PathBuf {
        expand(&self.downloads.dir)
    }

    pub fn storage_path(&self) -> PathBuf {
        expand(&self.storage.path)
    }

    pub fn cover_timeout(&self) -> Duration {
        Duration::from_secs(self.encoder.cover_timeout_secs)
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            encoder: EncoderOptions {
                kbps: self.encoder.kbps,
                ..EncoderOptions::default()
            },
            download_prefix: self.downloads.prefix.clone(),
        }
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
