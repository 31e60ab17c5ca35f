//! The conversation aggregate
//!
//! Owns the thread, the ledger and the call session for one client–provider
//! pair and is the unit of consistency: the actor task in `executor` holds
//! it exclusively and applies one command at a time. Everything here is
//! synchronous and free of I/O so the invariants can be tested directly.

use super::command::CommandError;
use super::snapshot::ConversationSnapshot;
use crate::call::{CallError, CallMode, CallSession, CallStateView};
use crate::collab::media::MediaLease;
use crate::collab::payment::{CaptureReceipt, CaptureRequest, PaymentError};
use crate::ledger::{Decision, Proposal, ProposalId, ProposalLedger};
use crate::thread::{
    AuthorRole, DeliveryState, EventId, MessageThread, ParticipantRole, ThreadError, ThreadEvent,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Outcome of resolving a proposal, including the capture request to hand
/// to the payment collaborator when the decision was an acceptance.
#[derive(Debug)]
pub struct ProposalResolution {
    pub proposal: Proposal,
    pub notice: ThreadEvent,
    pub capture: Option<CaptureRequest>,
}

pub struct Conversation {
    id: Uuid,
    client_id: String,
    provider_id: String,
    created_at: DateTime<Utc>,
    thread: MessageThread,
    ledger: ProposalLedger,
    /// Live session or the last ended one; `None` until the first call.
    call: Option<CallSession>,
}

impl Conversation {
    pub fn new(
        id: Uuid,
        client_id: impl Into<String>,
        provider_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            client_id: client_id.into(),
            provider_id: provider_id.into(),
            created_at,
            thread: MessageThread::new(),
            ledger: ProposalLedger::new(),
            call: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Commands must come from one of the two participants; the system role
    /// is reserved for machine-generated notices.
    fn participant(author: AuthorRole) -> Result<ParticipantRole, CommandError> {
        author.participant().ok_or(CommandError::InvalidRole)
    }

    // ========================================================================
    // Messaging
    // ========================================================================

    pub fn send_text(
        &mut self,
        author: AuthorRole,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<ThreadEvent, CommandError> {
        Self::participant(author)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(CommandError::EmptyMessage);
        }

        let at = self.thread.admission_timestamp(now);
        let id = self.thread.allocate_id();
        let event = ThreadEvent::text(id, author, at, body);
        self.thread.append(event.clone())?;
        Ok(event)
    }

    /// Re-queue a failed delivery. Only events the transport has actually
    /// failed are retryable.
    pub fn retry_delivery(&mut self, event_id: EventId) -> Result<ThreadEvent, CommandError> {
        let event = self
            .thread
            .get(event_id)
            .ok_or(ThreadError::NotFound(event_id))?;
        if !matches!(event.delivery, DeliveryState::Failed { .. }) {
            return Err(CommandError::NotRetryable(event_id));
        }
        Ok(self.thread.set_delivery(event_id, DeliveryState::Delivering)?)
    }

    pub fn set_delivery(
        &mut self,
        event_id: EventId,
        state: DeliveryState,
    ) -> Result<ThreadEvent, CommandError> {
        Ok(self.thread.set_delivery(event_id, state)?)
    }

    // ========================================================================
    // Negotiation
    // ========================================================================

    pub fn send_proposal(
        &mut self,
        author: AuthorRole,
        amount: i64,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(Proposal, ThreadEvent), CommandError> {
        let role = Self::participant(author)?;
        let at = self.thread.admission_timestamp(now);
        let (proposal, event) = self
            .ledger
            .propose(&mut self.thread, role, amount, description, at)?;
        Ok((proposal, event))
    }

    pub fn respond_to_proposal(
        &mut self,
        author: AuthorRole,
        proposal_id: ProposalId,
        decision: Decision,
        now: DateTime<Utc>,
    ) -> Result<ProposalResolution, CommandError> {
        let role = Self::participant(author)?;
        let at = self.thread.admission_timestamp(now);
        let resolution = self
            .ledger
            .resolve(&mut self.thread, proposal_id, role, decision, at)?;

        let capture = (decision == Decision::Accept).then(|| CaptureRequest {
            proposal_id,
            amount: resolution.proposal.amount,
            client_id: self.client_id.clone(),
            provider_id: self.provider_id.clone(),
        });

        Ok(ProposalResolution {
            proposal: resolution.proposal,
            notice: resolution.notice,
            capture,
        })
    }

    /// Record the asynchronous settlement result as an audit-trail notice.
    /// The proposal itself stays terminal at `Accepted`.
    pub fn record_payment_outcome(
        &mut self,
        proposal_id: ProposalId,
        outcome: &Result<CaptureReceipt, PaymentError>,
        now: DateTime<Utc>,
    ) -> Result<ThreadEvent, CommandError> {
        let text = match outcome {
            Ok(receipt) => format!(
                "payment captured for proposal {proposal_id} (ref {})",
                receipt.reference
            ),
            Err(error) => format!("payment failed for proposal {proposal_id}: {error}"),
        };
        self.append_notice(text, now)
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Begin a new session. Fails while another is requesting or active.
    pub fn start_call(
        &mut self,
        mode: CallMode,
        now: DateTime<Utc>,
    ) -> Result<CallStateView, CommandError> {
        if self.call.as_ref().is_some_and(CallSession::is_live) {
            return Err(CommandError::Call(CallError::AlreadyActive));
        }
        let session = CallSession::start(mode, now);
        let view = session.view(now);
        self.call = Some(session);
        Ok(view)
    }

    pub fn activate_call(
        &mut self,
        lease: MediaLease,
        now: DateTime<Utc>,
    ) -> Result<ThreadEvent, CommandError> {
        let session = self.call.as_mut().ok_or(CallError::NoActiveCall)?;
        let notice = session.activate(lease, now)?;
        self.append_notice(notice, now)
    }

    pub fn fail_call(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ThreadEvent, CommandError> {
        let session = self.call.as_mut().ok_or(CallError::NoActiveCall)?;
        let notice = session.fail(reason, now)?;
        self.append_notice(notice, now)
    }

    pub fn cancel_call(&mut self, now: DateTime<Utc>) -> Result<ThreadEvent, CommandError> {
        let session = self.call.as_mut().ok_or(CallError::NoActiveCall)?;
        let notice = session.cancel(now)?;
        self.append_notice(notice, now)
    }

    pub fn end_call(&mut self, now: DateTime<Utc>) -> Result<ThreadEvent, CommandError> {
        let session = self.call.as_mut().ok_or(CallError::NoActiveCall)?;
        let notice = session.end(now)?;
        self.append_notice(notice, now)
    }

    pub fn toggle_mute(&mut self) -> Result<bool, CommandError> {
        let session = self.call.as_mut().ok_or(CallError::NoActiveCall)?;
        Ok(session.toggle_mute()?)
    }

    pub fn toggle_camera(&mut self) -> Result<bool, CommandError> {
        let session = self.call.as_mut().ok_or(CallError::NoActiveCall)?;
        Ok(session.toggle_camera()?)
    }

    pub fn call_is_requesting(&self) -> bool {
        self.call.as_ref().is_some_and(CallSession::is_requesting)
    }

    pub fn call_elapsed(&self, now: DateTime<Utc>) -> Option<u64> {
        self.call.as_ref().and_then(|c| c.elapsed_secs(now))
    }

    pub fn call_view(&self, now: DateTime<Utc>) -> CallStateView {
        self.call
            .as_ref()
            .map_or(CallStateView::Idle, |c| c.view(now))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Side-effect-free, consistent read of the whole aggregate.
    pub fn snapshot(&self, now: DateTime<Utc>) -> ConversationSnapshot {
        ConversationSnapshot {
            id: self.id,
            client_id: self.client_id.clone(),
            provider_id: self.provider_id.clone(),
            created_at: self.created_at,
            events: self.thread.events().collect(),
            proposals: self.ledger.proposals(),
            call: self.call_view(now),
        }
    }

    fn append_notice(
        &mut self,
        text: String,
        now: DateTime<Utc>,
    ) -> Result<ThreadEvent, CommandError> {
        let at = self.thread.admission_timestamp(now);
        let id = self.thread.allocate_id();
        let event = ThreadEvent::notice(id, at, text);
        self.thread.append(event.clone())?;
        Ok(event)
    }
}
