use super::{
    brightness_store::{file::FileBrightnessStore, mock::MockBrightnessStore, BrightnessStore},
    scheduler::{tokio_scheduler::TokioScheduler, DelayScheduler},
    screen_action::{mock::MockScreenAction, sysfs::SysfsScreenAction, ScreenAction},
};
use crate::config::Config;
use anyhow::Result;
use std::sync::Arc;

/// Hands out the collaborators the display controllers are built from.
pub struct DependencyProvider<A: ScreenAction, S: BrightnessStore> {
    screen_action: A,
    brightness_store: S,
    scheduler: Arc<dyn DelayScheduler>,
}

impl<A: ScreenAction, S: BrightnessStore> DependencyProvider<A, S> {
    pub fn new(
        screen_action: A,
        brightness_store: S,
        scheduler: Arc<dyn DelayScheduler>,
    ) -> DependencyProvider<A, S> {
        DependencyProvider {
            screen_action,
            brightness_store,
            scheduler,
        }
    }

    pub fn get_screen_action(&self) -> A {
        self.screen_action.clone()
    }

    pub fn get_brightness_store(&self) -> S {
        self.brightness_store.clone()
    }

    pub fn get_scheduler(&self) -> Arc<dyn DelayScheduler> {
        self.scheduler.clone()
    }
}

impl DependencyProvider<SysfsScreenAction, FileBrightnessStore> {
    pub async fn make_system(config: &Config) -> Result<Self> {
        let screen_action = SysfsScreenAction::new(
            &config.backlight.root,
            &config.backlight.device,
            config.brightness.max,
        )
        .await?;
        Ok(DependencyProvider::new(
            screen_action,
            FileBrightnessStore::new(&config.store.path),
            Arc::new(TokioScheduler::new()?),
        ))
    }
}

impl DependencyProvider<MockScreenAction, MockBrightnessStore> {
    pub fn make_mock(config: &Config) -> Result<Self> {
        Ok(DependencyProvider::new(
            MockScreenAction::new(&config.displays.ids, config.brightness.default),
            MockBrightnessStore::new(),
            Arc::new(TokioScheduler::new()?),
        ))
    }
}
