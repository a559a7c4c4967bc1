use super::BrightnessStore;
use crate::util::lock;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// A mock [BrightnessStore] keeping the value in memory
#[derive(Clone, Default)]
pub struct MockBrightnessStore {
    value: Arc<Mutex<Option<u32>>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockBrightnessStore {
    /// Create a store with nothing persisted yet
    pub fn new() -> MockBrightnessStore {
        Default::default()
    }

    /// Create a store which already holds a value
    pub fn with_value(value: u32) -> MockBrightnessStore {
        let store = MockBrightnessStore::new();
        *lock(&store.value) = Some(value);
        store
    }

    pub fn set_failure_mode(&self, should_fail: bool) {
        *lock(&self.should_fail) = should_fail;
    }

    pub fn stored(&self) -> Option<u32> {
        *lock(&self.value)
    }
}

#[async_trait]
impl BrightnessStore for MockBrightnessStore {
    async fn load(&self) -> Result<u32> {
        if *lock(&self.should_fail) {
            return Err(anyhow!("Mock BrightnessStore is failing"));
        }
        lock(&self.value).ok_or_else(|| anyhow!("No brightness persisted yet"))
    }

    async fn persist(&self, value: u32) -> Result<()> {
        if *lock(&self.should_fail) {
            return Err(anyhow!("Mock BrightnessStore is failing"));
        }
        *lock(&self.value) = Some(value);
        Ok(())
    }
}
