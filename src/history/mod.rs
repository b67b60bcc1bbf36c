use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

use crate::cli::Args;
use crate::models::conversation::{ Conversation, ConversationsData };

/// Persistence boundary for conversations. The chat core only creates
/// and updates; deletion is always a user action.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// All conversations, most recently updated first.
    async fn load_all(&self) -> Result<Vec<Conversation>, Box<dyn Error + Send + Sync>>;

    async fn create(
        &self,
        conversation: &Conversation
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn update(
        &self,
        conversation: &Conversation
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn rename(&self, id: &str, title: &str) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn delete(&self, id: &str) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Store keeping every conversation in one JSON document, written
/// atomically (temp file, then rename).
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, write_lock: Mutex::new(()) }
    }

    pub fn default_path() -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
        let data_dir = dirs::data_local_dir()
            .ok_or("Failed to get local data directory")?
            .join("kiroaas");
        Ok(data_dir.join("conversations.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<ConversationsData, Box<dyn Error + Send + Sync>> {
        if !self.path.exists() {
            return Ok(ConversationsData::default());
        }

        let content = fs
            ::read_to_string(&self.path).await
            .map_err(|e| format!("Failed to read conversations file: {}", e))?;

        let data: ConversationsData = serde_json
            ::from_str(&content)
            .map_err(|e| format!("Failed to parse conversations file: {}", e))?;

        Ok(data)
    }

    async fn write(&self, data: &ConversationsData) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(parent) = self.path.parent() {
            fs
                ::create_dir_all(parent).await
                .map_err(|e| format!("Failed to create conversations directory: {}", e))?;
        }

        let content = serde_json
            ::to_string_pretty(data)
            .map_err(|e| format!("Failed to serialize conversations: {}", e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs
            ::write(&tmp_path, &content).await
            .map_err(|e| format!("Failed to write conversations temp file: {}", e))?;

        fs
            ::rename(&tmp_path, &self.path).await
            .map_err(|e| format!("Failed to rename conversations temp file: {}", e))?;

        Ok(())
    }
}

#[async_trait]
impl ConversationStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<Conversation>, Box<dyn Error + Send + Sync>> {
        let mut conversations = self.read().await?.conversations;
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn create(
        &self,
        conversation: &Conversation
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read().await?;
        data.conversations.insert(0, conversation.clone());
        self.write(&data).await
    }

    async fn update(
        &self,
        conversation: &Conversation
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read().await?;
        match data.conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(existing) => {
                *existing = conversation.clone();
            }
            None => {
                data.conversations.insert(0, conversation.clone());
            }
        }
        self.write(&data).await
    }

    async fn rename(&self, id: &str, title: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read().await?;
        let conversation = data.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| format!("Conversation not found: {}", id))?;
        conversation.title = title.to_string();
        self.write(&data).await
    }

    async fn delete(&self, id: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read().await?;
        data.conversations.retain(|c| c.id != id);
        self.write(&data).await
    }
}

pub fn initialize_conversation_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    let path = match &args.conversations_path {
        Some(p) => PathBuf::from(p),
        None => JsonFileStore::default_path()?,
    };
    info!("Conversations will be stored in: {}", path.display());
    Ok(Arc::new(JsonFileStore::new(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::now_millis;

    fn store_in(dir: &tempfile::TempDir) -> JsonFileStore {
        JsonFileStore::new(dir.path().join("conversations.json"))
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_update_rename_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut conv = Conversation::new(Some("claude-sonnet-4-5".to_string()));
        store.create(&conv).await.unwrap();

        conv.title = "Quarterly report".to_string();
        conv.updated_at = now_millis();
        store.update(&conv).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "Quarterly report");

        store.rename(&conv.id, "Renamed").await.unwrap();
        assert_eq!(store.load_all().await.unwrap()[0].title, "Renamed");

        store.delete(&conv.id).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_all_orders_by_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut older = Conversation::new(None);
        older.title = "older".to_string();
        older.updated_at = 1;
        let mut newer = Conversation::new(None);
        newer.title = "newer".to_string();
        newer.updated_at = 2;

        store.create(&older).await.unwrap();
        store.create(&newer).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].title, "newer");
        assert_eq!(loaded[1].title, "older");
    }

    #[tokio::test]
    async fn rename_unknown_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.rename("no-such-id", "x").await.is_err());
    }
}
