//! Conversation data model.
//!
//! Field names are camelCase on the wire. Records written by older chat
//! clients use `chatId`, `userId`, `messageId` and `timestamp`; those names
//! are accepted as aliases on input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    System,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "messageId")]
    pub id: String,
    pub speaker: Speaker,
    #[serde(default)]
    pub text: String,
    #[serde(alias = "timestamp", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A user message with a fresh id.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text.into())
    }

    /// An empty system message, filled in while the response streams.
    pub fn system_placeholder() -> Self {
        Self::new(Speaker::System, String::new())
    }

    fn new(speaker: Speaker, text: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            speaker,
            text,
            created_at: Utc::now(),
        }
    }
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "chatId")]
    pub conversation_id: String,
    #[serde(alias = "userId")]
    pub owner_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(alias = "timestamp", default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(conversation_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            owner_id: owner_id.into(),
            messages: Vec::new(),
            saved_at: Utc::now(),
        }
    }

    /// File name of this conversation in a file-backed store.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.conversation_id)
    }
}
