use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ RawStorage, StoreError };

#[derive(Default)]
pub struct MemoryHistoryStore {
    values: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl RawStorage for MemoryHistoryStore {
    async fn read(&self, conversation_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().await.get(conversation_id).cloned())
    }

    async fn write(&self, conversation_id: &str, value: &str) -> Result<(), StoreError> {
        self.values.write().await.insert(conversation_id.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.values.write().await.remove(conversation_id);
        Ok(())
    }

    fn describe(&self, conversation_id: &str) -> String {
        format!("memory ({})", conversation_id)
    }
}
