//! Conversation persistence.
//!
//! The file backend keeps one pretty-printed JSON document per conversation
//! at `<dir>/<conversationId>.json`. Records are written to a temporary file
//! in the same directory and renamed into place, so a concurrent scan sees
//! either the old record or the new one.

use crate::locks::KeyedLocks;
use crate::models::Conversation;
use async_trait::async_trait;
use relay_common::config::{StorageBackend, StorageConfig};
use relay_common::{validate_owner_id, validate_record_id, Error, Result, ResultExt};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Durable conversation storage.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Insert or fully replace the record with this conversation id.
    async fn put(&self, conversation: &Conversation) -> Result<()>;

    /// Fetch one conversation.
    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Every conversation owned by `owner_id`, in no particular order.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Conversation>>;

    /// Every stored conversation.
    async fn list_all(&self) -> Result<Vec<Conversation>>;
}

/// Build the backend selected in configuration.
pub fn create_store(config: &StorageConfig) -> Arc<dyn ConversationStore> {
    match config.backend {
        StorageBackend::File => Arc::new(FileConversationStore::new(config.chats_dir())),
        StorageBackend::Memory => Arc::new(MemoryConversationStore::new()),
    }
}

// ============================================================================
// File backend
// ============================================================================

/// One JSON file per conversation.
pub struct FileConversationStore {
    dir: PathBuf,
    write_locks: KeyedLocks,
}

impl FileConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_locks: KeyedLocks::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", conversation_id))
    }

    /// Read every parseable record, skipping files that fail to load.
    async fn scan<F>(&self, keep: F) -> Result<Vec<Conversation>>
    where
        F: Fn(&Conversation) -> bool + Send,
    {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::from(e)
                    .with_context(format!("reading chats directory {}", self.dir.display())))
            }
        };

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("listing chats directory")?
        {
            let path = entry.path();
            if !is_record_file(&path) {
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable chat file");
                    continue;
                }
            };

            match serde_json::from_slice::<Conversation>(&bytes) {
                Ok(conversation) if keep(&conversation) => found.push(conversation),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping malformed chat file");
                }
            }
        }

        Ok(found)
    }
}

fn is_record_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map_or(true, |name| name.starts_with('.'));
    !hidden && path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(&self, conversation: &Conversation) -> Result<()> {
        let id = conversation.conversation_id.as_str();
        validate_record_id("conversationId", id)?;
        validate_owner_id("ownerId", &conversation.owner_id)?;

        let json = serde_json::to_vec_pretty(conversation)?;
        let _guard = self.write_locks.lock(id).await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .context(format!("creating chats directory {}", self.dir.display()))?;

        let target = self.path_for(id);
        let temp = self
            .dir
            .join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4().simple()));

        tokio::fs::write(&temp, &json)
            .await
            .context(format!("writing {}", temp.display()))?;

        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(Error::from(e).with_context(format!("replacing {}", target.display())));
        }

        tracing::debug!(
            conversation_id = %id,
            path = %target.display(),
            messages = conversation.messages.len(),
            "Conversation saved"
        );
        Ok(())
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        validate_record_id("conversationId", conversation_id)?;
        let path = self.path_for(conversation_id);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::from(e).with_context(format!("reading {}", path.display()))),
        };

        let conversation = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Storage(format!("{} is not a valid chat record: {}", path.display(), e)))?;
        Ok(Some(conversation))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let owner_id = owner_id.to_string();
        self.scan(move |c| c.owner_id == owner_id).await
    }

    async fn list_all(&self) -> Result<Vec<Conversation>> {
        self.scan(|_| true).await
    }
}

// ============================================================================
// Memory backend
// ============================================================================

/// In-process store; contents are lost on restart.
#[derive(Default)]
pub struct MemoryConversationStore {
    records: RwLock<HashMap<String, Conversation>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, conversation: &Conversation) -> Result<()> {
        validate_record_id("conversationId", &conversation.conversation_id)?;
        validate_owner_id("ownerId", &conversation.owner_id)?;

        self.records
            .write()
            .await
            .insert(conversation.conversation_id.clone(), conversation.clone());
        Ok(())
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.records.read().await.get(conversation_id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Conversation>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
