use anyhow::Result;
use async_trait::async_trait;

/// Keeps the last brightness the user asked for across restarts
#[async_trait]
pub trait BrightnessStore: Clone + Send + Sync + 'static {
    async fn load(&self) -> Result<u32>;
    async fn persist(&self, value: u32) -> Result<()>;
}
