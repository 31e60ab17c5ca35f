//! Price-proposal negotiation protocol
//!
//! A proposal is created atomically with its thread event, stays `Pending`
//! until the counter-party resolves it, and leaves `Pending` at most once.
//! Resolution by the proposing side is rejected here, not in the UI, so the
//! guard holds regardless of how a command reaches the ledger.

use crate::thread::{MessageThread, ParticipantRole, ThreadEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a proposal, allocated by the ledger in creation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProposalId(pub u64);

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
}

/// The counter-party's verdict on a pending proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

/// A structured price offer embedded in the thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    /// The thread event that carries this proposal.
    pub event_id: crate::thread::EventId,
    /// Minor units of the conversation currency; strictly positive.
    pub amount: i64,
    pub description: String,
    pub proposed_by: ParticipantRole,
    pub status: ProposalStatus,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Proposal {
    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),
    #[error("no proposal with id {0}")]
    NotFound(ProposalId),
    #[error("a proposal cannot be resolved by its proposer")]
    Forbidden,
    #[error("proposal {0} was already resolved")]
    AlreadyResolved(ProposalId),
    #[error(transparent)]
    Thread(#[from] crate::thread::ThreadError),
}

/// The outcome of a successful `resolve`, handed back so the caller can
/// broadcast the updated proposal and deliver the notice event.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub proposal: Proposal,
    pub notice: ThreadEvent,
}

/// Lifecycle tracking for every proposal of one conversation.
#[derive(Debug, Default)]
pub struct ProposalLedger {
    proposals: Vec<Proposal>,
    next_id: u64,
}

impl ProposalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Pending` proposal and its thread event atomically.
    ///
    /// Nothing is recorded if validation or the append fails.
    pub fn propose(
        &mut self,
        thread: &mut MessageThread,
        author: ParticipantRole,
        amount: i64,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<(Proposal, ThreadEvent), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidProposal(
                "amount must be positive".to_string(),
            ));
        }
        let description = description.trim();
        if description.is_empty() {
            return Err(LedgerError::InvalidProposal(
                "description must not be empty".to_string(),
            ));
        }

        let proposal_id = ProposalId(self.next_id);
        let event_id = thread.allocate_id();
        let event = ThreadEvent::proposal(event_id, author.into(), at, proposal_id);
        thread.append(event.clone())?;

        self.next_id += 1;
        let proposal = Proposal {
            id: proposal_id,
            event_id,
            amount,
            description: description.to_string(),
            proposed_by: author,
            status: ProposalStatus::Pending,
            resolved_at: None,
        };
        self.proposals.push(proposal.clone());

        Ok((proposal, event))
    }

    /// Resolve a pending proposal. Only the non-proposing participant may
    /// resolve, and only once; the outcome is summarized as a system notice
    /// appended after the proposal's own event.
    pub fn resolve(
        &mut self,
        thread: &mut MessageThread,
        id: ProposalId,
        resolver: ParticipantRole,
        decision: Decision,
        at: DateTime<Utc>,
    ) -> Result<Resolution, LedgerError> {
        let index = self
            .proposals
            .iter()
            .position(|p| p.id == id)
            .ok_or(LedgerError::NotFound(id))?;

        // Guard order matters: self-resolution is reported as Forbidden
        // even when the proposal is no longer pending.
        if self.proposals[index].proposed_by == resolver {
            return Err(LedgerError::Forbidden);
        }
        if !self.proposals[index].is_pending() {
            return Err(LedgerError::AlreadyResolved(id));
        }

        let verdict = match decision {
            Decision::Accept => "accepted",
            Decision::Reject => "rejected",
        };
        let notice_id = thread.allocate_id();
        let notice = ThreadEvent::notice(
            notice_id,
            at,
            format!("Proposal of {} {verdict}", self.proposals[index].amount),
        );
        // Append first: if the notice cannot be admitted, the proposal
        // stays pending and the command can be retried.
        thread.append(notice.clone())?;

        let proposal = &mut self.proposals[index];
        proposal.status = match decision {
            Decision::Accept => ProposalStatus::Accepted,
            Decision::Reject => ProposalStatus::Rejected,
        };
        proposal.resolved_at = Some(at);

        Ok(Resolution {
            proposal: proposal.clone(),
            notice,
        })
    }

    #[allow(dead_code)] // Useful for tests
    pub fn get(&self, id: ProposalId) -> Option<&Proposal> {
        self.proposals.iter().find(|p| p.id == id)
    }

    /// All proposals in creation order, as owned snapshots.
    pub fn proposals(&self) -> Vec<Proposal> {
        self.proposals.clone()
    }

    #[allow(dead_code)] // Useful for tests
    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}
