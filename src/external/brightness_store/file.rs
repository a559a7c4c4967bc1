use super::BrightnessStore;
use crate::external::screen_action::sysfs::read_number_from_file;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A [BrightnessStore] keeping the value as plain text in a single file.
#[derive(Debug, Clone)]
pub struct FileBrightnessStore {
    path: PathBuf,
}

impl FileBrightnessStore {
    pub fn new(path: impl AsRef<Path>) -> FileBrightnessStore {
        FileBrightnessStore {
            path: path.as_ref().to_owned(),
        }
    }
}

#[async_trait]
impl BrightnessStore for FileBrightnessStore {
    async fn load(&self) -> Result<u32> {
        read_number_from_file(&self.path)
            .await
            .with_context(|| format!("Couldn't read brightness from {:?}", self.path))
    }

    async fn persist(&self, value: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Readers must never see a partially written value
        let temporary = self.path.with_extension("tmp");
        fs::write(&temporary, format!("{}\n", value)).await?;
        fs::rename(&temporary, &self.path).await?;
        log::trace!("Persisted brightness {} to {:?}", value, self.path);
        Ok(())
    }
}
