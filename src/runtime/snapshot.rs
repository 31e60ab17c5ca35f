//! Read-only snapshot of one conversation
//!
//! Assembled by the actor between commands, so it is always internally
//! consistent: events, proposal statuses and call state come from the same
//! instant.

use crate::call::CallStateView;
use crate::ledger::Proposal;
use crate::thread::ThreadEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: Uuid,
    pub client_id: String,
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
    /// Full ordered log, oldest first.
    pub events: Vec<ThreadEvent>,
    /// All proposals in creation order with their current statuses.
    pub proposals: Vec<Proposal>,
    pub call: CallStateView,
}
