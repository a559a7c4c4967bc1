//! Daemon configuration, read from a TOML file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Device brightness bounds. Every value written to hardware is clamped into
/// `min..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrightnessLimits {
    pub min: u32,
    pub max: u32,
    /// Used whenever no sane brightness is known, e.g. when turning a
    /// display back on after it was switched off at brightness 0
    pub default: u32,
}

impl Default for BrightnessLimits {
    fn default() -> Self {
        BrightnessLimits {
            min: 1,
            max: 255,
            default: 102,
        }
    }
}

impl BrightnessLimits {
    pub fn clamp(&self, value: u32) -> u32 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// The value itself if it's in range and not zero, the default otherwise
    pub fn sane_or_default(&self, value: u32) -> u32 {
        if value != 0 && self.contains(value) {
            value
        } else {
            self.default
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    pub tick_ms: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        AnimationConfig { tick_ms: 30 }
    }
}

impl AnimationConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DisplaysConfig {
    pub ids: Vec<u32>,
    pub main: u32,
}

impl Default for DisplaysConfig {
    fn default() -> Self {
        DisplaysConfig {
            ids: vec![0],
            main: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BacklightConfig {
    pub root: PathBuf,
    pub device: String,
}

impl Default for BacklightConfig {
    fn default() -> Self {
        BacklightConfig {
            root: PathBuf::from("/sys/class/backlight"),
            device: "intel_backlight".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("/var/lib/lucerna/brightness"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub brightness: BrightnessLimits,
    pub animation: AnimationConfig,
    pub displays: DisplaysConfig,
    pub backlight: BacklightConfig,
    pub store: StoreConfig,
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Config> {
        let mut config: Config = toml::from_str(contents).context("Malformed configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Couldn't read configuration file {:?}", path))?;
        let config = Self::from_toml_str(&contents)?;
        log::debug!("Loaded configuration from {:?}: {:?}", path, config);
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        let limits = self.brightness;
        if limits.min > limits.max {
            bail!(
                "brightness.min ({}) is greater than brightness.max ({})",
                limits.min,
                limits.max
            );
        }
        if !limits.contains(limits.default) {
            bail!(
                "brightness.default ({}) is outside of {}..={}",
                limits.default,
                limits.min,
                limits.max
            );
        }
        if self.animation.tick_ms == 0 {
            bail!("animation.tick_ms must be positive");
        }
        if self.displays.ids.is_empty() {
            log::warn!("No display ids configured, falling back to display 0");
            self.displays.ids = vec![0];
        }
        Ok(())
    }
}
