//! Mock collaborators and actor integration tests
//!
//! The mocks queue scripted results and count resource traffic so the
//! tests can assert release-exactly-once without real devices or network.

use super::{
    Command, CommandError, CommandOutcome, ConversationHandle, ConversationRegistry,
    ConversationSnapshot,
};
use crate::call::CallMode;
use crate::collab::media::{DeviceError, MediaGateway, MediaHandle};
use crate::collab::payment::{CaptureReceipt, CaptureRequest, PaymentError, PaymentGateway};
use crate::collab::transport::{DeliveryAck, DeliveryError, Transport};
use crate::thread::ThreadEvent;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ============================================================================
// Mock transport
// ============================================================================

/// Transport with scripted failures; unqueued deliveries succeed.
pub struct MockTransport {
    results: Mutex<VecDeque<Result<DeliveryAck, DeliveryError>>>,
    delivered: Mutex<Vec<ThreadEvent>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_failure(&self, error: DeliveryError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    /// Every event handed to `deliver`, in call order.
    pub fn deliveries(&self) -> Vec<ThreadEvent> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn deliver(
        &self,
        _conversation_id: Uuid,
        event: &ThreadEvent,
    ) -> Result<DeliveryAck, DeliveryError> {
        self.delivered.lock().unwrap().push(event.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(DeliveryAck {
                    delivered_at: Utc::now(),
                })
            })
    }
}

// ============================================================================
// Mock media gateway
// ============================================================================

/// Scripted acquisition behavior; unqueued acquisitions grant immediately.
#[derive(Debug, Clone)]
pub enum MediaBehavior {
    Grant,
    Deny(DeviceError),
    /// Sleep, then grant regardless of the cancellation token. Exercises
    /// the late-acquisition release path.
    DelayThenGrant(Duration),
}

pub struct MockMediaGateway {
    script: Mutex<VecDeque<MediaBehavior>>,
    next_handle: AtomicU64,
    acquired: AtomicUsize,
    released: AtomicUsize,
    /// Notified when an acquisition begins, for test synchronization.
    pub acquire_started: Arc<Notify>,
}

impl MockMediaGateway {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            next_handle: AtomicU64::new(1),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            acquire_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue(&self, behavior: MediaBehavior) {
        self.script.lock().unwrap().push_back(behavior);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.acquired() - self.released()
    }

    fn grant(&self) -> MediaHandle {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        MediaHandle(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl MediaGateway for MockMediaGateway {
    async fn acquire(
        &self,
        _mode: CallMode,
        _cancel: &CancellationToken,
    ) -> Result<MediaHandle, DeviceError> {
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MediaBehavior::Grant);
        // notify_one stores a permit, so a waiter that registers late still
        // observes the start.
        self.acquire_started.notify_one();

        match behavior {
            MediaBehavior::Grant => Ok(self.grant()),
            MediaBehavior::Deny(error) => Err(error),
            MediaBehavior::DelayThenGrant(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.grant())
            }
        }
    }

    fn release(&self, _handle: MediaHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock payments
// ============================================================================

/// Payment gateway with scripted results; unqueued captures succeed.
pub struct MockPayments {
    results: Mutex<VecDeque<Result<CaptureReceipt, PaymentError>>>,
    requests: Mutex<Vec<CaptureRequest>>,
}

impl MockPayments {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_failure(&self, error: PaymentError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<CaptureRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPayments {
    async fn capture(&self, request: CaptureRequest) -> Result<CaptureReceipt, PaymentError> {
        self.requests.lock().unwrap().push(request);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(CaptureReceipt {
                    reference: "mock-cap".to_string(),
                    captured_at: Utc::now(),
                })
            })
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct TestHarness {
    pub handle: ConversationHandle,
    pub transport: Arc<MockTransport>,
    pub media: Arc<MockMediaGateway>,
    pub payments: Arc<MockPayments>,
}

/// Spin up one conversation actor against fresh mocks.
pub async fn harness() -> TestHarness {
    let transport = Arc::new(MockTransport::new());
    let media = Arc::new(MockMediaGateway::new());
    let payments = Arc::new(MockPayments::new());

    let registry = ConversationRegistry::new(
        transport.clone(),
        media.clone(),
        payments.clone(),
    );
    let handle = registry.create("client-a", "provider-b").await;

    TestHarness {
        handle,
        transport,
        media,
        payments,
    }
}

/// Poll snapshots until the predicate holds or the deadline passes.
pub async fn wait_until<F>(
    handle: &ConversationHandle,
    timeout: Duration,
    predicate: F,
) -> ConversationSnapshot
where
    F: Fn(&ConversationSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last = handle.snapshot().await.expect("snapshot");
    while tokio::time::Instant::now() < deadline {
        if predicate(&last) {
            return last;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        last = handle.snapshot().await.expect("snapshot");
    }
    panic!("condition not reached before deadline; last snapshot: {last:?}");
}

// ============================================================================
// Integration tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{CallError, CallStateView, EndReason};
    use crate::ledger::{Decision, LedgerError, ProposalStatus};
    use crate::thread::{AuthorRole, DeliveryState, EventPayload};

    const WAIT: Duration = Duration::from_secs(2);

    fn is_notice(event: &ThreadEvent, text: &str) -> bool {
        matches!(&event.payload, EventPayload::SystemNotice { notice } if notice.contains(text))
    }

    #[tokio::test]
    async fn text_message_is_appended_and_delivered() {
        let h = harness().await;

        let outcome = h
            .handle
            .command(Command::SendText {
                author: AuthorRole::Client,
                body: "Bonjour".to_string(),
            })
            .await
            .unwrap();
        let event = match outcome {
            CommandOutcome::Event(event) => event,
            other => panic!("expected event outcome, got {other:?}"),
        };
        assert_eq!(event.author, AuthorRole::Client);

        let snapshot = wait_until(&h.handle, WAIT, |s| {
            s.events.len() == 1 && s.events[0].delivery == DeliveryState::Delivered
        })
        .await;
        assert_eq!(
            snapshot.events[0].payload,
            EventPayload::Text {
                body: "Bonjour".to_string()
            }
        );
        assert_eq!(h.transport.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_is_marked_and_retryable() {
        let h = harness().await;
        h.transport
            .queue_failure(DeliveryError::Unreachable("socket closed".to_string()));

        let outcome = h
            .handle
            .command(Command::SendText {
                author: AuthorRole::Provider,
                body: "Disponible demain".to_string(),
            })
            .await
            .unwrap();
        let event_id = match outcome {
            CommandOutcome::Event(event) => event.id,
            other => panic!("expected event outcome, got {other:?}"),
        };

        // The failed event stays in the log, flagged, never retracted.
        let snapshot = wait_until(&h.handle, WAIT, |s| {
            matches!(s.events[0].delivery, DeliveryState::Failed { .. })
        })
        .await;
        assert_eq!(snapshot.events.len(), 1);

        h.handle
            .command(Command::RetryDelivery { event_id })
            .await
            .unwrap();
        wait_until(&h.handle, WAIT, |s| {
            s.events[0].delivery == DeliveryState::Delivered
        })
        .await;
        assert_eq!(h.transport.deliveries().len(), 2);
    }

    #[tokio::test]
    async fn accepted_proposal_settles_payment_and_audits() {
        let h = harness().await;

        let outcome = h
            .handle
            .command(Command::SendProposal {
                author: AuthorRole::Provider,
                amount: 200,
                description: "Réparation fuite".to_string(),
            })
            .await
            .unwrap();
        let proposal = match outcome {
            CommandOutcome::Proposal(p) => p,
            other => panic!("expected proposal outcome, got {other:?}"),
        };
        assert_eq!(proposal.status, ProposalStatus::Pending);

        let outcome = h
            .handle
            .command(Command::RespondToProposal {
                author: AuthorRole::Client,
                proposal_id: proposal.id,
                decision: Decision::Accept,
            })
            .await
            .unwrap();
        let resolved = match outcome {
            CommandOutcome::Proposal(p) => p,
            other => panic!("expected proposal outcome, got {other:?}"),
        };
        assert_eq!(resolved.status, ProposalStatus::Accepted);
        assert!(resolved.resolved_at.is_some());

        // Resolution notice right after the proposal event, then the
        // asynchronous settlement notice.
        let snapshot = wait_until(&h.handle, WAIT, |s| {
            s.events.iter().any(|e| is_notice(e, "payment captured"))
        })
        .await;
        assert!(matches!(
            snapshot.events[0].payload,
            EventPayload::Proposal { .. }
        ));
        assert!(is_notice(&snapshot.events[1], "200 accepted"));

        let requests = h.payments.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount, 200);
        assert_eq!(requests[0].client_id, "client-a");
    }

    #[tokio::test]
    async fn proposer_cannot_accept_own_proposal() {
        let h = harness().await;

        let outcome = h
            .handle
            .command(Command::SendProposal {
                author: AuthorRole::Provider,
                amount: 150,
                description: "Remplacement joint".to_string(),
            })
            .await
            .unwrap();
        let proposal = match outcome {
            CommandOutcome::Proposal(p) => p,
            other => panic!("expected proposal outcome, got {other:?}"),
        };

        let err = h
            .handle
            .command(Command::RespondToProposal {
                author: AuthorRole::Provider,
                proposal_id: proposal.id,
                decision: Decision::Accept,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Ledger(LedgerError::Forbidden)
        ));

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.proposals[0].status, ProposalStatus::Pending);
        assert!(h.payments.requests().is_empty());
    }

    #[tokio::test]
    async fn denied_media_fails_start_and_allows_retry() {
        let h = harness().await;
        h.media.queue(MediaBehavior::Deny(DeviceError::PermissionDenied(
            "camera blocked".to_string(),
        )));

        let err = h
            .handle
            .command(Command::StartCall {
                mode: CallMode::Video,
                timeout: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Call(CallError::DeviceUnavailable(_))
        ));
        assert_eq!(h.media.acquired(), 0, "no handle was ever granted");

        let snapshot = h.handle.snapshot().await.unwrap();
        assert!(matches!(
            snapshot.call,
            CallStateView::Ended {
                reason: EndReason::AcquisitionFailed,
                started_at: None,
                ..
            }
        ));
        assert!(snapshot.events.iter().any(|e| is_notice(e, "call failed")));

        // Retry with the same mode succeeds.
        let outcome = h
            .handle
            .command(Command::StartCall {
                mode: CallMode::Video,
                timeout: None,
            })
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            CommandOutcome::CallState(CallStateView::Active { .. })
        ));
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_call_is_live() {
        let h = harness().await;
        h.handle
            .command(Command::StartCall {
                mode: CallMode::Audio,
                timeout: None,
            })
            .await
            .unwrap();

        let err = h
            .handle
            .command(Command::StartCall {
                mode: CallMode::Audio,
                timeout: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Call(CallError::AlreadyActive)
        ));
    }

    #[tokio::test]
    async fn camera_toggle_rejected_on_audio_call() {
        let h = harness().await;
        h.handle
            .command(Command::StartCall {
                mode: CallMode::Audio,
                timeout: None,
            })
            .await
            .unwrap();

        let err = h.handle.command(Command::ToggleCamera).await.unwrap_err();
        assert!(matches!(
            err,
            CommandError::Call(CallError::NotApplicable)
        ));

        // Mute and call state are untouched by the rejected toggle.
        let outcome = h.handle.command(Command::ToggleMute).await.unwrap();
        assert!(matches!(outcome, CommandOutcome::Muted(true)));
        let snapshot = h.handle.snapshot().await.unwrap();
        assert!(matches!(
            snapshot.call,
            CallStateView::Active { muted: true, .. }
        ));
    }

    #[tokio::test]
    async fn ending_a_call_releases_the_lease_once() {
        let h = harness().await;
        h.handle
            .command(Command::StartCall {
                mode: CallMode::Video,
                timeout: None,
            })
            .await
            .unwrap();
        assert_eq!(h.media.outstanding(), 1);

        let outcome = h.handle.command(Command::EndCall).await.unwrap();
        assert!(matches!(
            outcome,
            CommandOutcome::CallState(CallStateView::Ended {
                reason: EndReason::HungUp,
                ..
            })
        ));
        assert_eq!(h.media.acquired(), 1);
        assert_eq!(h.media.released(), 1);

        let snapshot = h.handle.snapshot().await.unwrap();
        assert!(snapshot
            .events
            .iter()
            .any(|e| is_notice(e, "call ended, duration")));

        // Nothing left to end.
        let err = h.handle.command(Command::EndCall).await.unwrap_err();
        assert!(matches!(err, CommandError::Call(CallError::NoActiveCall)));
        assert_eq!(h.media.released(), 1);
    }

    #[tokio::test]
    async fn hangup_while_requesting_cancels_and_releases_late_grant() {
        let h = harness().await;
        h.media
            .queue(MediaBehavior::DelayThenGrant(Duration::from_millis(300)));
        let started = h.media.acquire_started.clone();

        // Start in the background; its reply only comes once acquisition
        // resolves one way or the other.
        let start_handle = h.handle.clone();
        let start_task = tokio::spawn(async move {
            start_handle
                .command(Command::StartCall {
                    mode: CallMode::Video,
                    timeout: None,
                })
                .await
        });

        tokio::time::timeout(WAIT, started.notified())
            .await
            .expect("acquisition should start");

        // Hang up mid-Requesting: the session ends immediately.
        let hangup_started = tokio::time::Instant::now();
        let outcome = h.handle.command(Command::EndCall).await.unwrap();
        assert!(
            hangup_started.elapsed() < Duration::from_millis(200),
            "hang-up must not wait for the acquisition"
        );
        assert!(matches!(
            outcome,
            CommandOutcome::CallState(CallStateView::Ended {
                reason: EndReason::CancelledBeforeActive,
                ..
            })
        ));

        let start_result = start_task.await.unwrap();
        assert!(matches!(
            start_result,
            Err(CommandError::Call(CallError::Cancelled))
        ));

        // The acquisition ignores the cancel and grants late; the stale
        // lease must be released and the session must stay ended.
        let deadline = tokio::time::Instant::now() + WAIT;
        while h.media.released() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.media.acquired(), 1);
        assert_eq!(h.media.released(), 1, "late grant must be released");

        let snapshot = h.handle.snapshot().await.unwrap();
        assert!(matches!(
            snapshot.call,
            CallStateView::Ended {
                reason: EndReason::CancelledBeforeActive,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn acquisition_timeout_is_reported_as_device_unavailable() {
        let h = harness().await;
        h.media
            .queue(MediaBehavior::DelayThenGrant(Duration::from_secs(5)));

        let err = h
            .handle
            .command(Command::StartCall {
                mode: CallMode::Audio,
                timeout: Some(Duration::from_millis(50)),
            })
            .await
            .unwrap_err();
        let CommandError::Call(CallError::DeviceUnavailable(reason)) = err else {
            panic!("expected DeviceUnavailable");
        };
        assert!(reason.contains("timed out"));

        let snapshot = h.handle.snapshot().await.unwrap();
        assert!(matches!(
            snapshot.call,
            CallStateView::Ended {
                reason: EndReason::AcquisitionFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn payment_failure_is_audited_not_fatal() {
        let h = harness().await;
        h.payments
            .queue_failure(PaymentError::Declined("insufficient funds".to_string()));

        let outcome = h
            .handle
            .command(Command::SendProposal {
                author: AuthorRole::Client,
                amount: 90,
                description: "diagnostic".to_string(),
            })
            .await
            .unwrap();
        let proposal = match outcome {
            CommandOutcome::Proposal(p) => p,
            other => panic!("expected proposal outcome, got {other:?}"),
        };

        h.handle
            .command(Command::RespondToProposal {
                author: AuthorRole::Provider,
                proposal_id: proposal.id,
                decision: Decision::Accept,
            })
            .await
            .unwrap();

        let snapshot = wait_until(&h.handle, WAIT, |s| {
            s.events.iter().any(|e| is_notice(e, "payment failed"))
        })
        .await;
        // The proposal stays terminal at Accepted; the conversation keeps
        // working.
        assert_eq!(snapshot.proposals[0].status, ProposalStatus::Accepted);
        h.handle
            .command(Command::SendText {
                author: AuthorRole::Client,
                body: "On réessaie ?".to_string(),
            })
            .await
            .unwrap();
    }
}
