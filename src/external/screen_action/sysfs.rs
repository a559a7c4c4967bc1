use super::{DisplayState, ScreenAction, StateCommitted};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncReadExt};

/// Kernel framebuffer blanking levels, as accepted by `bl_power`
const FB_BLANK_UNBLANK: u32 = 0;
const FB_BLANK_NORMAL: u32 = 1;
const FB_BLANK_VSYNC_SUSPEND: u32 = 2;
const FB_BLANK_POWERDOWN: u32 = 4;

/// A [ScreenAction] which drives a single device of the kernel's
/// /sys/class/backlight class, exposed as display 0.
///
/// Brightness values are in `0..=level_max` and scaled to the device's own
/// `max_brightness` on the way in and out.
#[derive(Debug, Clone)]
pub struct SysfsScreenAction {
    device_path: PathBuf,
    max_brightness: u32,
    level_max: u32,
}

impl SysfsScreenAction {
    /// Create an action which controls `{root}/{device}`.
    pub async fn new(
        root: impl AsRef<Path>,
        device: &str,
        level_max: u32,
    ) -> Result<SysfsScreenAction> {
        if level_max == 0 {
            bail!("Brightness range of the backlight must not be empty");
        }
        let device_path = root.as_ref().join(device);
        let max_brightness = read_number_from_file(device_path.join("max_brightness")).await?;
        if max_brightness == 0 {
            bail!("Backlight {} reports max_brightness of 0", device);
        }
        log::debug!(
            "Using backlight {:?} with max_brightness {}",
            device_path,
            max_brightness
        );
        Ok(SysfsScreenAction {
            device_path,
            max_brightness,
            level_max,
        })
    }

    fn check_display(display: u32) -> Result<()> {
        if display == 0 {
            Ok(())
        } else {
            Err(anyhow!("Backlight only drives display 0, not {}", display))
        }
    }

    fn to_raw(&self, value: u32) -> u32 {
        let value = value.min(self.level_max) as u64;
        ((value * self.max_brightness as u64 + self.level_max as u64 / 2) / self.level_max as u64)
            as u32
    }

    fn from_raw(&self, raw: u32) -> u32 {
        let raw = raw.min(self.max_brightness) as u64;
        ((raw * self.level_max as u64 + self.max_brightness as u64 / 2)
            / self.max_brightness as u64) as u32
    }

    async fn write_power(device_path: &Path, state: DisplayState) -> Result<()> {
        let level = match state {
            DisplayState::On => FB_BLANK_UNBLANK,
            DisplayState::Dim => FB_BLANK_NORMAL,
            DisplayState::Suspend => FB_BLANK_VSYNC_SUSPEND,
            DisplayState::Off => FB_BLANK_POWERDOWN,
            DisplayState::Unknown => bail!("Cannot put backlight into an unknown state"),
        };
        Ok(fs::write(device_path.join("bl_power"), format!("{}\n", level)).await?)
    }
}

#[async_trait]
impl ScreenAction for SysfsScreenAction {
    async fn get_display_ids(&self) -> Result<Vec<u32>> {
        Ok(vec![0])
    }

    async fn get_default_display_id(&self) -> Result<u32> {
        Ok(0)
    }

    async fn get_power_state(&self, display: u32) -> Result<DisplayState> {
        Self::check_display(display)?;
        let state = match read_number_from_file(self.device_path.join("bl_power")).await? {
            FB_BLANK_UNBLANK => DisplayState::On,
            FB_BLANK_NORMAL => DisplayState::Dim,
            FB_BLANK_VSYNC_SUSPEND | 3 => DisplayState::Suspend,
            FB_BLANK_POWERDOWN => DisplayState::Off,
            _ => DisplayState::Unknown,
        };
        Ok(state)
    }

    async fn get_brightness(&self, display: u32) -> Result<u32> {
        Self::check_display(display)?;
        let raw = read_number_from_file(self.device_path.join("brightness")).await?;
        Ok(self.from_raw(raw))
    }

    async fn set_brightness(&self, display: u32, value: u32) -> Result<()> {
        Self::check_display(display)?;
        if value > self.level_max {
            bail!(
                "Cannot set brightness {} higher than {}",
                value,
                self.level_max
            );
        }
        let raw = self.to_raw(value);
        Ok(fs::write(self.device_path.join("brightness"), format!("{}\n", raw)).await?)
    }

    async fn set_power_state(&self, display: u32, state: DisplayState, reason: u32) -> Result<()> {
        Self::check_display(display)?;
        log::debug!("Setting backlight power to {} (reason {})", state, reason);
        Self::write_power(&self.device_path, state).await
    }

    async fn set_power_state_async(
        &self,
        display: u32,
        state: DisplayState,
        reason: u32,
        on_committed: StateCommitted,
    ) -> Result<()> {
        Self::check_display(display)?;
        if state == DisplayState::Unknown {
            bail!("Cannot put backlight into an unknown state");
        }
        log::debug!(
            "Setting backlight power to {} in background (reason {})",
            state,
            reason
        );
        let device_path = self.device_path.clone();
        tokio::spawn(async move {
            match Self::write_power(&device_path, state).await {
                Ok(()) => on_committed(state),
                Err(e) => log::error!("Couldn't set backlight power to {}: {}", state, e),
            }
        });
        Ok(())
    }
}

pub(crate) async fn read_number_from_file(path: impl AsRef<Path>) -> Result<u32> {
    let mut f = fs::File::open(path).await?;
    let mut contents = String::new();
    f.read_to_string(&mut contents).await?;
    Ok(contents.trim().parse()?)
}
