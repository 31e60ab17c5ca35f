//! Append-only conversation event log
//!
//! The thread is a pure ordered store: it owns event identity and admission
//! order, and nothing else. Proposal and call semantics live in their own
//! modules and only append here.

use crate::ledger::ProposalId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a thread event, allocated by the owning thread.
///
/// Ids are strictly increasing in creation order, so they double as a
/// tiebreaker when timestamps collide.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a thread event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorRole {
    Client,
    Provider,
    System,
}

impl AuthorRole {
    /// The human participant behind this role, if any.
    pub fn participant(self) -> Option<ParticipantRole> {
        match self {
            AuthorRole::Client => Some(ParticipantRole::Client),
            AuthorRole::Provider => Some(ParticipantRole::Provider),
            AuthorRole::System => None,
        }
    }
}

/// The two human participants of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Client,
    Provider,
}

impl From<ParticipantRole> for AuthorRole {
    fn from(role: ParticipantRole) -> Self {
        match role {
            ParticipantRole::Client => AuthorRole::Client,
            ParticipantRole::Provider => AuthorRole::Provider,
        }
    }
}

/// Kind-specific event data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Text { body: String },
    Proposal { proposal_id: ProposalId },
    SystemNotice { notice: String },
}

/// Transport-delivery status of an event.
///
/// This is the only field of an event that may change after creation:
/// order, author, timestamp and payload are immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    /// Appended locally, transport round-trip still in flight.
    Delivering,
    Delivered,
    /// Transport reported a failure; the event stays in the log and can be
    /// retried explicitly.
    Failed { reason: String },
}

/// One entry of the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEvent {
    pub id: EventId,
    pub author: AuthorRole,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub delivery: DeliveryState,
}

impl ThreadEvent {
    pub fn text(
        id: EventId,
        author: AuthorRole,
        created_at: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id,
            author,
            created_at,
            payload: EventPayload::Text { body: body.into() },
            delivery: DeliveryState::Delivering,
        }
    }

    pub fn proposal(
        id: EventId,
        author: AuthorRole,
        created_at: DateTime<Utc>,
        proposal_id: ProposalId,
    ) -> Self {
        Self {
            id,
            author,
            created_at,
            payload: EventPayload::Proposal { proposal_id },
            delivery: DeliveryState::Delivering,
        }
    }

    /// Machine-generated notice; always authored by the system.
    pub fn notice(id: EventId, created_at: DateTime<Utc>, notice: impl Into<String>) -> Self {
        Self {
            id,
            author: AuthorRole::System,
            created_at,
            payload: EventPayload::SystemNotice {
                notice: notice.into(),
            },
            delivery: DeliveryState::Delivering,
        }
    }
}

/// Errors from log operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadError {
    #[error("event {id} would break creation order")]
    OutOfOrder { id: EventId },
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("no event with id {0}")]
    NotFound(EventId),
}

/// The ordered, append-only event log of one conversation.
#[derive(Debug, Default)]
pub struct MessageThread {
    events: Vec<ThreadEvent>,
    next_id: u64,
}

impl MessageThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next event id. Ids are never reused.
    pub fn allocate_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }

    /// A wall-clock reading clamped to the log tail, so a backward clock
    /// step cannot make a valid command fail the monotonicity check.
    /// Admission order remains the ordering authority.
    pub fn admission_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.events.last() {
            Some(tail) => now.max(tail.created_at),
            None => now,
        }
    }

    /// Append a fully-formed event at the tail and return its position.
    ///
    /// Rejects events whose timestamp or id would decrease relative to the
    /// current tail, and events with malformed payloads. A rejected event is
    /// not inserted.
    pub fn append(&mut self, event: ThreadEvent) -> Result<usize, ThreadError> {
        match &event.payload {
            EventPayload::Text { body } if body.trim().is_empty() => {
                return Err(ThreadError::InvalidEvent("empty text body".to_string()));
            }
            EventPayload::SystemNotice { notice } if notice.trim().is_empty() => {
                return Err(ThreadError::InvalidEvent("empty notice".to_string()));
            }
            _ => {}
        }

        if let Some(tail) = self.events.last() {
            if event.created_at < tail.created_at || event.id <= tail.id {
                return Err(ThreadError::OutOfOrder { id: event.id });
            }
        }

        self.events.push(event);
        Ok(self.events.len() - 1)
    }

    /// The event sequence as owned snapshots. Restartable; mutating a
    /// returned event does not affect the log.
    pub fn events(&self) -> impl Iterator<Item = ThreadEvent> + '_ {
        self.events.iter().cloned()
    }

    pub fn get(&self, id: EventId) -> Option<&ThreadEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Flip the delivery flag of an existing event and return the updated
    /// copy. Everything else about an appended event is immutable.
    pub fn set_delivery(
        &mut self,
        id: EventId,
        delivery: DeliveryState,
    ) -> Result<ThreadEvent, ThreadError> {
        let event = self
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(ThreadError::NotFound(id))?;
        event.delivery = delivery;
        Ok(event.clone())
    }

    #[allow(dead_code)] // Useful for tests
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[allow(dead_code)] // Useful for tests
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
