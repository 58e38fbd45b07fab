//! Session orchestration: one chat exchange from request to persisted record.
//!
//! A session loads (or creates) the conversation, appends the user message,
//! relays the completion into a frame channel and, only when the stream
//! completed, appends the system message and persists the conversation.
//! A conversation id can have at most one session in flight.

use crate::locks::{KeyGuard, KeyedLocks};
use crate::models::Conversation;
use crate::models::Message;
use crate::relay::{FragmentSink, Relay, RelayController, RelayFrame, RelayOutcome};
use crate::store::ConversationStore;
use chrono::Utc;
use relay_common::config::RelayConfig;
use relay_common::logging::generate_trace_id;
use relay_common::{relay_span, validate_owner_id, validate_record_id, Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Parameters of one streaming exchange.
#[derive(Debug, Clone, Default)]
pub struct MessageRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub owner_id: Option<String>,
}

/// Coordinates relays and conversation persistence.
pub struct SessionOrchestrator {
    relay: RelayController,
    store: Arc<dyn ConversationStore>,
    active: Arc<KeyedLocks>,
    channel_capacity: usize,
    default_owner: String,
}

impl SessionOrchestrator {
    pub fn new(relay: RelayController, store: Arc<dyn ConversationStore>, config: &RelayConfig) -> Self {
        Self {
            relay,
            store,
            active: Arc::new(KeyedLocks::new()),
            channel_capacity: config.channel_capacity.max(1),
            default_owner: config.default_owner.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Whether a session is currently streaming into this conversation.
    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.active.try_lock(conversation_id).is_none()
    }

    /// Start a streaming exchange.
    ///
    /// Returns the receiving end of the frame channel. The first frame is
    /// [`RelayFrame::Started`] and the last is [`RelayFrame::Done`], unless
    /// the receiver is dropped first, in which case nothing is persisted.
    pub async fn start(&self, request: MessageRequest) -> Result<mpsc::Receiver<RelayFrame>> {
        if request.message.trim().is_empty() {
            return Err(Error::InvalidInput("message is required".into()));
        }

        let conversation_id = non_empty(request.conversation_id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let owner_id = non_empty(request.owner_id).unwrap_or_else(|| self.default_owner.clone());
        validate_record_id("conversationId", &conversation_id)?;
        validate_owner_id("userId", &owner_id)?;

        let guard = self.active.try_lock(&conversation_id).ok_or_else(|| {
            Error::Conflict(format!(
                "conversation {} already has a response streaming",
                conversation_id
            ))
        })?;

        let mut conversation = match self.store.get(&conversation_id).await? {
            Some(existing) => {
                if existing.owner_id != owner_id {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        stored_owner = %existing.owner_id,
                        requested_owner = %owner_id,
                        "Continuing conversation under its stored owner"
                    );
                }
                existing
            }
            None => Conversation::new(&conversation_id, &owner_id),
        };
        conversation.messages.push(Message::user(request.message.as_str()));

        let relay = self.relay.begin(&request.message);
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let span = relay_span!(
            generate_trace_id(),
            conversation.conversation_id,
            conversation.owner_id,
            source = %self.relay.source_name()
        );
        let session = Session {
            conversation,
            relay,
            store: self.store.clone(),
            sink: tx,
            _guard: guard,
        };
        tokio::spawn(session.run().instrument(span));

        Ok(rx)
    }

    /// Store a client-supplied conversation, returning its file name.
    pub async fn save(&self, mut conversation: Conversation) -> Result<String> {
        conversation.saved_at = Utc::now();
        self.store.put(&conversation).await?;

        tracing::info!(
            conversation_id = %conversation.conversation_id,
            owner_id = %conversation.owner_id,
            messages = conversation.messages.len(),
            "Chat saved"
        );
        Ok(conversation.file_name())
    }

    /// Conversations of one owner, or every conversation when no owner is given.
    ///
    /// An empty result is [`Error::NotFound`].
    pub async fn search(&self, owner_id: Option<&str>) -> Result<Vec<Conversation>> {
        let owner_id = owner_id.filter(|id| !id.is_empty());
        let found = match owner_id {
            Some(owner_id) => self.store.list_by_owner(owner_id).await?,
            None => self.store.list_all().await?,
        };
        if found.is_empty() {
            return Err(Error::NotFound(match owner_id {
                Some(owner_id) => format!("no chats for owner {}", owner_id),
                None => "no chats saved".into(),
            }));
        }
        Ok(found)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// State owned by one spawned exchange.
struct Session {
    conversation: Conversation,
    relay: Relay,
    store: Arc<dyn ConversationStore>,
    sink: mpsc::Sender<RelayFrame>,
    _guard: KeyGuard,
}

impl Session {
    async fn run(self) {
        let Session {
            conversation,
            relay,
            store,
            sink,
            _guard: guard,
        } = self;

        relay_and_persist(conversation, relay, store.as_ref(), &sink).await;

        // Release the conversation before the caller sees the stream end.
        drop(guard);
        drop(sink);
    }
}

async fn relay_and_persist(
    mut conversation: Conversation,
    relay: Relay,
    store: &dyn ConversationStore,
    sink: &mpsc::Sender<RelayFrame>,
) {
    let started = RelayFrame::Started {
        conversation_id: conversation.conversation_id.clone(),
        message_id: relay.message_id().to_string(),
    };
    if !sink.forward(started).await {
        tracing::info!("Caller left before the relay started");
        return;
    }

    match relay.run(sink).await {
        RelayOutcome::Completed(message) => {
            conversation.messages.push(message);
            conversation.saved_at = Utc::now();

            let frame = match store.put(&conversation).await {
                Ok(()) => {
                    tracing::info!(messages = conversation.messages.len(), "Conversation persisted");
                    RelayFrame::Saved {
                        conversation_id: conversation.conversation_id.clone(),
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to persist conversation");
                    RelayFrame::SaveFailed {
                        error: e.to_string(),
                    }
                }
            };
            sink.forward(frame).await;
            sink.forward(RelayFrame::Done).await;
        }
        RelayOutcome::Failed(e) => {
            let err = Error::from(e);
            tracing::info!(code = err.code(), "Conversation not persisted after upstream failure");
            sink.forward(RelayFrame::Error {
                error: err.to_string(),
            })
            .await;
            sink.forward(RelayFrame::Done).await;
        }
        RelayOutcome::Disconnected { partial } => {
            tracing::info!(
                partial_chars = partial.text.chars().count(),
                "Conversation not persisted after caller disconnect"
            );
        }
    }
}
