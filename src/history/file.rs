use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{ Path, PathBuf };
use tokio::fs;

use super::{ check_conversation_id, RawStorage, StoreError };

/// One JSON document per conversation, kept in a directory on disk as
/// `<dir>/<prefix>_<conversation id>.json`.
pub struct FileHistoryStore {
    dir: PathBuf,
    prefix: String,
}

impl FileHistoryStore {
    pub fn new(dir: impl AsRef<Path>, prefix: &str) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
        })
    }

    pub fn path(&self, conversation_id: &str) -> Result<PathBuf, StoreError> {
        check_conversation_id(conversation_id)?;
        Ok(self.dir.join(format!("{}_{}.json", self.prefix, conversation_id)))
    }
}

#[async_trait]
impl RawStorage for FileHistoryStore {
    async fn read(&self, conversation_id: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(conversation_id)?).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, conversation_id: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path(conversation_id)?;
        // Readers never see a half-written snapshot.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, conversation_id: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(conversation_id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self, conversation_id: &str) -> String {
        format!("file {}/{}_{}.json", self.dir.display(), self.prefix, conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ ConversationStore, SnapshotStore };
    use crate::models::chat::{ Message, Role };
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path(), "cloudy_chat_history").unwrap();
        assert_eq!(store.read("widget").await.unwrap(), None);
        store.remove("widget").await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_survives_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let messages = vec![Message::new(Role::User, "Do you offer backups?", Utc::now())];

        let first = SnapshotStore::new(
            FileHistoryStore::new(dir.path(), "chat").unwrap(),
            Duration::from_secs(60)
        );
        first.save("widget", &messages).await.unwrap();
        assert!(first.storage().path("widget").unwrap().exists());

        let second = SnapshotStore::new(
            FileHistoryStore::new(dir.path(), "chat").unwrap(),
            Duration::from_secs(60)
        );
        assert_eq!(second.load("widget").await, Some(messages));
        assert_eq!(second.load("someone-else").await, None);

        second.clear("widget").await.unwrap();
        assert!(!second.storage().path("widget").unwrap().exists());
    }

    #[tokio::test]
    async fn path_like_ids_never_reach_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path().join("history"), "chat").unwrap();

        let err = store.write("../escaped", "[]").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidConversationId(_)));
        assert!(!dir.path().join("escaped.json").exists());
        assert!(store.read("../escaped").await.is_err());
    }
}
