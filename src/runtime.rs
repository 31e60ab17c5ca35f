//! Conversation runtimes and the registry that owns them
//!
//! Each conversation runs as its own actor task; the registry creates them
//! on demand and hands out lightweight handles carrying the command mailbox
//! and the live-update broadcast channel.

mod command;
mod conversation;
mod executor;
mod snapshot;

#[cfg(test)]
pub mod testing;

pub use command::{Command, CommandError, CommandOutcome};
pub use snapshot::ConversationSnapshot;

use conversation::Conversation;

use crate::call::CallStateView;
use crate::collab::media::MediaGateway;
use crate::collab::payment::PaymentGateway;
use crate::collab::transport::Transport;
use crate::ledger::Proposal;
use crate::thread::ThreadEvent;
use chrono::{DateTime, Utc};
use executor::{ConversationRuntime, Mail};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use uuid::Uuid;

/// Live updates published by a conversation actor, bridged to SSE for the
/// presentation layer.
#[derive(Debug, Clone)]
pub enum Update {
    /// A new event was appended to the thread.
    Event { event: ThreadEvent },
    /// An existing event's delivery state changed.
    Delivery { event: ThreadEvent },
    /// A proposal was created or resolved.
    Proposal { proposal: Proposal },
    /// The call state changed.
    Call { call: CallStateView },
    /// Once-a-second elapsed time while a call is active. Display only.
    CallTick { elapsed_secs: u64 },
}

/// Handle to a running conversation actor.
#[derive(Clone)]
pub struct ConversationHandle {
    pub id: Uuid,
    pub client_id: String,
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
    mail_tx: mpsc::Sender<Mail>,
    updates: broadcast::Sender<Update>,
}

impl ConversationHandle {
    /// Submit one command and wait for its reply. Commands are applied
    /// strictly in arrival order by the owning actor.
    pub async fn command(&self, command: Command) -> Result<CommandOutcome, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.mail_tx
            .send(Mail::Command {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CommandError::Closed)?;
        reply_rx.await.map_err(|_| CommandError::Closed)?
    }

    /// Consistent read of the whole conversation.
    pub async fn snapshot(&self) -> Result<ConversationSnapshot, CommandError> {
        match self.command(Command::Snapshot).await? {
            CommandOutcome::Snapshot(snapshot) => Ok(snapshot),
            other => {
                tracing::error!(?other, "unexpected reply to snapshot command");
                Err(CommandError::Closed)
            }
        }
    }

    /// Subscribe to live updates.
    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.updates.subscribe()
    }
}

/// Owns every running conversation actor, keyed by conversation id.
pub struct ConversationRegistry {
    transport: Arc<dyn Transport>,
    media: Arc<dyn MediaGateway>,
    payments: Arc<dyn PaymentGateway>,
    conversations: RwLock<HashMap<Uuid, ConversationHandle>>,
}

impl ConversationRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        media: Arc<dyn MediaGateway>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            transport,
            media,
            payments,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Create a conversation for a client–provider pair and start its actor.
    pub async fn create(
        &self,
        client_id: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> ConversationHandle {
        let id = Uuid::new_v4();
        let client_id = client_id.into();
        let provider_id = provider_id.into();
        let created_at = Utc::now();

        let (mail_tx, mail_rx) = mpsc::channel(32);
        let (updates_tx, _) = broadcast::channel(128);

        let conversation = Conversation::new(id, &client_id, &provider_id, created_at);
        let runtime = ConversationRuntime::new(
            conversation,
            Arc::clone(&self.transport),
            Arc::clone(&self.media),
            Arc::clone(&self.payments),
            mail_rx,
            mail_tx.clone(),
            updates_tx.clone(),
        );
        tokio::spawn(runtime.run());

        let handle = ConversationHandle {
            id,
            client_id,
            provider_id,
            created_at,
            mail_tx,
            updates: updates_tx,
        };
        self.conversations
            .write()
            .await
            .insert(id, handle.clone());

        tracing::info!(conversation = %id, "conversation created");
        handle
    }

    pub async fn get(&self, id: Uuid) -> Option<ConversationHandle> {
        self.conversations.read().await.get(&id).cloned()
    }

    /// All known conversations, oldest first.
    pub async fn list(&self) -> Vec<ConversationHandle> {
        let mut handles: Vec<_> = self
            .conversations
            .read()
            .await
            .values()
            .cloned()
            .collect();
        handles.sort_by_key(|h| h.created_at);
        handles
    }
}
