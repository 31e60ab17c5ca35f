//! Commands, replies and the command error surface

use super::snapshot::ConversationSnapshot;
use crate::call::{CallError, CallMode, CallStateView};
use crate::ledger::{Decision, LedgerError, Proposal, ProposalId};
use crate::thread::{AuthorRole, EventId, ThreadError, ThreadEvent};
use std::time::Duration;
use thiserror::Error;

/// External commands accepted by a conversation actor. Each is answered on
/// a oneshot reply channel; processing is strictly one at a time.
#[derive(Debug, Clone)]
pub enum Command {
    SendText {
        author: AuthorRole,
        body: String,
    },
    SendProposal {
        author: AuthorRole,
        amount: i64,
        description: String,
    },
    RespondToProposal {
        author: AuthorRole,
        proposal_id: ProposalId,
        decision: Decision,
    },
    /// Re-run transport delivery for an event the transport failed.
    RetryDelivery {
        event_id: EventId,
    },
    /// Begin a call; the reply arrives once media acquisition resolves (or
    /// the caller-supplied timeout expires).
    StartCall {
        mode: CallMode,
        timeout: Option<Duration>,
    },
    EndCall,
    ToggleMute,
    ToggleCamera,
    Snapshot,
}

/// Successful command replies.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Event(ThreadEvent),
    Proposal(Proposal),
    CallState(CallStateView),
    Muted(bool),
    CameraOff(bool),
    Snapshot(ConversationSnapshot),
}

/// Everything a command can fail with. Validation and protocol errors are
/// synchronous and leave the aggregate untouched; none is fatal to the
/// conversation.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("message text is empty")]
    EmptyMessage,
    #[error("role is not a participant in this conversation")]
    InvalidRole,
    #[error("event {0} is not awaiting retry")]
    NotRetryable(EventId),
    #[error(transparent)]
    Thread(#[from] ThreadError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("conversation task is no longer running")]
    Closed,
}
