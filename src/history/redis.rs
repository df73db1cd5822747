use async_trait::async_trait;
use redis::{ Client, AsyncCommands };

use super::{ check_conversation_id, RawStorage, StoreError };

pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
}

impl RedisHistoryStore {
    pub fn new(host: &str, key_prefix: &str, key: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: format!("{}{}", key_prefix, key),
        })
    }

    fn key(&self, conversation_id: &str) -> Result<String, StoreError> {
        check_conversation_id(conversation_id)?;
        Ok(format!("{}:{}", self.key_prefix, conversation_id))
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }
}

#[async_trait]
impl RawStorage for RedisHistoryStore {
    async fn read(&self, conversation_id: &str) -> Result<Option<String>, StoreError> {
        let key = self.key(conversation_id)?;
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(&key).await?;
        Ok(value)
    }

    async fn write(&self, conversation_id: &str, value: &str) -> Result<(), StoreError> {
        let key = self.key(conversation_id)?;
        let mut conn = self.get_connection().await?;
        let _: () = conn.set(&key, value).await?;
        Ok(())
    }

    async fn remove(&self, conversation_id: &str) -> Result<(), StoreError> {
        let key = self.key(conversation_id)?;
        let mut conn = self.get_connection().await?;
        let _: i64 = conn.del(&key).await?;
        Ok(())
    }

    fn describe(&self, conversation_id: &str) -> String {
        format!("redis key {}:{}", self.key_prefix, conversation_id)
    }
}
