mod file;
mod memory;
mod redis;

use async_trait::async_trait;
use chrono::Utc;
use log::{ info, warn };
use serde::Deserialize;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use uuid::Uuid;

use crate::cli::Args;
use crate::models::chat::{ Message, Snapshot };

pub use self::file::FileHistoryStore;
pub use self::memory::MemoryHistoryStore;
pub use self::redis::RedisHistoryStore;

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("history store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history store redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid conversation id: {0:?}")]
    InvalidConversationId(String),
}

const MAX_CONVERSATION_ID_LEN: usize = 64;

/// Conversation ids double as file names and redis key suffixes, so only
/// ASCII letters, digits, `-` and `_` are accepted.
pub fn is_valid_conversation_id(id: &str) -> bool {
    !id.is_empty() &&
        id.len() <= MAX_CONVERSATION_ID_LEN &&
        id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn new_conversation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Returns `requested` when it is a usable id, otherwise a freshly generated one.
pub fn resolve_conversation_id(requested: Option<&str>) -> String {
    match requested {
        Some(id) if is_valid_conversation_id(id) => id.to_string(),
        _ => new_conversation_id(),
    }
}

pub(crate) fn check_conversation_id(id: &str) -> Result<(), StoreError> {
    if is_valid_conversation_id(id) {
        Ok(())
    } else {
        Err(StoreError::InvalidConversationId(id.to_string()))
    }
}

/// Raw key/value access, one value per conversation. Backends only move
/// strings around; the snapshot format and expiry rules live in
/// [`SnapshotStore`].
#[async_trait]
pub trait RawStorage: Send + Sync {
    async fn read(&self, conversation_id: &str) -> Result<Option<String>, StoreError>;
    async fn write(&self, conversation_id: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, conversation_id: &str) -> Result<(), StoreError>;
    fn describe(&self, conversation_id: &str) -> String;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns the saved conversation, or `None` when nothing usable is stored.
    async fn load(&self, conversation_id: &str) -> Option<Vec<Message>>;

    /// Overwrites the stored snapshot with `messages` stamped with the current time.
    async fn save(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StoreError>;

    async fn clear(&self, conversation_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, PartialEq)]
pub enum Decoded {
    Fresh(Vec<Message>),
    Expired,
    Corrupt(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Snapshot(Snapshot),
    Legacy(Vec<Message>),
}

/// Classifies a stored value. Legacy bare arrays carry no timestamp and are
/// always fresh.
pub fn decode_snapshot(raw: &str, now_ms: i64, ttl: Duration) -> Decoded {
    match serde_json::from_str::<StoredValue>(raw) {
        Ok(StoredValue::Snapshot(snapshot)) => {
            let age = now_ms.saturating_sub(snapshot.timestamp);
            if age > (ttl.as_millis() as i64) {
                Decoded::Expired
            } else {
                Decoded::Fresh(snapshot.messages)
            }
        }
        Ok(StoredValue::Legacy(messages)) => Decoded::Fresh(messages),
        Err(e) => Decoded::Corrupt(e.to_string()),
    }
}

pub fn encode_snapshot(messages: &[Message], now_ms: i64) -> Result<String, StoreError> {
    let snapshot = Snapshot {
        messages: messages.to_vec(),
        timestamp: now_ms,
    };
    Ok(serde_json::to_string(&snapshot)?)
}

pub struct SnapshotStore<S: RawStorage> {
    storage: S,
    ttl: Duration,
}

impl<S: RawStorage> SnapshotStore<S> {
    pub fn new(storage: S, ttl: Duration) -> Self {
        Self { storage, ttl }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}

#[async_trait]
impl<S: RawStorage> ConversationStore for SnapshotStore<S> {
    async fn load(&self, conversation_id: &str) -> Option<Vec<Message>> {
        let location = self.storage.describe(conversation_id);
        let raw = match self.storage.read(conversation_id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return None;
            }
            Err(e) => {
                warn!("Failed to read history from {}: {}", location, e);
                return None;
            }
        };

        match decode_snapshot(&raw, Utc::now().timestamp_millis(), self.ttl) {
            Decoded::Fresh(messages) => {
                info!("Hydrated {} messages from {}", messages.len(), location);
                Some(messages)
            }
            Decoded::Expired => {
                info!("Stored conversation in {} expired, discarding", location);
                if let Err(e) = self.storage.remove(conversation_id).await {
                    warn!("Failed to remove expired history: {}", e);
                }
                None
            }
            Decoded::Corrupt(reason) => {
                warn!("Ignoring corrupt history in {}: {}", location, reason);
                None
            }
        }
    }

    async fn save(&self, conversation_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let json = encode_snapshot(messages, Utc::now().timestamp_millis())?;
        self.storage.write(conversation_id, &json).await
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.storage.remove(conversation_id).await
    }
}

pub fn create_history_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    let ttl = Duration::from_secs(args.history_ttl_secs);
    match args.history_type.to_lowercase().as_str() {
        "file" => {
            let storage = FileHistoryStore::new(&args.history_dir, &args.history_key)?;
            Ok(Arc::new(SnapshotStore::new(storage, ttl)))
        }
        "redis" => {
            let storage = RedisHistoryStore::new(
                &args.history_host,
                &args.history_redis_prefix,
                &args.history_key
            )?;
            Ok(Arc::new(SnapshotStore::new(storage, ttl)))
        }
        "memory" => Ok(Arc::new(SnapshotStore::new(MemoryHistoryStore::default(), ttl))),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_history_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    info!(
        "Chat history will be stored in: {} (key prefix '{}', ttl {}s)",
        args.history_type,
        args.history_key,
        args.history_ttl_secs
    );
    create_history_store(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;

    const TTL: Duration = Duration::from_secs(60);

    fn sample() -> Vec<Message> {
        vec![
            Message::new(Role::Assistant, "Hello! How can I help you?", Utc::now()),
            Message::new(Role::User, "What plans do you offer?", Utc::now())
        ]
    }

    #[test]
    fn fresh_snapshot_decodes() {
        let now = 1_700_000_000_000;
        let messages = sample();
        let raw = encode_snapshot(&messages, now - 1_000).unwrap();
        assert_eq!(decode_snapshot(&raw, now, TTL), Decoded::Fresh(messages));
    }

    #[test]
    fn snapshot_older_than_ttl_is_expired() {
        let now = 1_700_000_000_000;
        let raw = encode_snapshot(&sample(), now - 120_000).unwrap();
        assert_eq!(decode_snapshot(&raw, now, TTL), Decoded::Expired);
    }

    #[test]
    fn legacy_bare_array_is_always_fresh() {
        let raw = serde_json::to_string(&sample()).unwrap();
        match decode_snapshot(&raw, i64::MAX, TTL) {
            Decoded::Fresh(messages) => assert_eq!(messages.len(), 2),
            other => panic!("expected legacy array to load, got {:?}", other),
        }
    }

    #[test]
    fn malformed_values_are_corrupt() {
        for raw in ["not json", "{\"messages\": 3}", "{\"timestamp\": 5}", "42"] {
            assert!(
                matches!(decode_snapshot(raw, 0, TTL), Decoded::Corrupt(_)),
                "{} should be corrupt",
                raw
            );
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips_within_window() {
        let store = SnapshotStore::new(MemoryHistoryStore::default(), TTL);
        let messages = sample();
        store.save("alpha", &messages).await.unwrap();
        assert_eq!(store.load("alpha").await, Some(messages));
    }

    #[tokio::test]
    async fn conversations_are_kept_apart() {
        let store = SnapshotStore::new(MemoryHistoryStore::default(), TTL);
        let alpha = sample();
        let beta = vec![Message::new(Role::User, "Is my data private?", Utc::now())];
        store.save("alpha", &alpha).await.unwrap();
        store.save("beta", &beta).await.unwrap();

        assert_eq!(store.load("alpha").await, Some(alpha.clone()));
        assert_eq!(store.load("beta").await, Some(beta));
        assert_eq!(store.load("gamma").await, None);

        store.clear("beta").await.unwrap();
        assert_eq!(store.load("beta").await, None);
        assert_eq!(store.load("alpha").await, Some(alpha));
    }

    #[tokio::test]
    async fn expired_snapshot_is_removed_on_load() {
        let storage = MemoryHistoryStore::default();
        let stale = encode_snapshot(&sample(), Utc::now().timestamp_millis() - 120_000).unwrap();
        storage.write("alpha", &stale).await.unwrap();

        let store = SnapshotStore::new(storage, TTL);
        assert_eq!(store.load("alpha").await, None);
        assert_eq!(store.storage().read("alpha").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_value_loads_as_empty() {
        let storage = MemoryHistoryStore::default();
        storage.write("alpha", "{oops").await.unwrap();
        let store = SnapshotStore::new(storage, TTL);
        assert_eq!(store.load("alpha").await, None);
    }

    #[test]
    fn conversation_ids_are_restricted_to_safe_characters() {
        assert!(is_valid_conversation_id("3f0c9a1e-7b2d-4c55-9e11-0a1b2c3d4e5f"));
        assert!(is_valid_conversation_id("widget_42"));
        let too_long = "x".repeat(65);
        for bad in ["", "../etc/passwd", "a b", "key:other", too_long.as_str()] {
            assert!(!is_valid_conversation_id(bad), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn unusable_requested_ids_are_replaced() {
        assert_eq!(resolve_conversation_id(Some("widget_42")), "widget_42");

        let generated = resolve_conversation_id(Some("../../secret"));
        assert_ne!(generated, "../../secret");
        assert!(is_valid_conversation_id(&generated));

        assert_ne!(resolve_conversation_id(None), resolve_conversation_id(None));
    }
}
