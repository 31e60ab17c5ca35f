//! Conversation actor
//!
//! One task owns one [`Conversation`] and processes its mailbox strictly
//! sequentially, which is the whole concurrency story: no two commands for
//! the same conversation ever interleave their state mutation. Anything
//! slow or fallible (transport delivery, media acquisition, payment
//! capture, the call ticker) runs in spawned tasks that post completions
//! back into the same mailbox.

use super::command::{Command, CommandError, CommandOutcome};
use super::conversation::Conversation;
use super::Update;
use crate::call::CallError;
use crate::collab::media::{DeviceError, MediaGateway, MediaLease};
use crate::collab::payment::{CaptureReceipt, CaptureRequest, PaymentError, PaymentGateway};
use crate::collab::transport::{DeliveryAck, DeliveryError, Transport};
use crate::ledger::ProposalId;
use crate::thread::{DeliveryState, EventId, ThreadEvent};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Acquisition bound when the caller does not supply one.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

type Reply = oneshot::Sender<Result<CommandOutcome, CommandError>>;

/// Everything that can arrive in a conversation's mailbox.
pub(crate) enum Mail {
    Command { command: Command, reply: Reply },
    Completion(Completion),
}

/// Results of spawned work, re-entering the single-writer loop.
pub(crate) enum Completion {
    Delivery {
        event_id: EventId,
        result: Result<DeliveryAck, DeliveryError>,
    },
    MediaReady {
        attempt: u64,
        lease: MediaLease,
    },
    MediaFailed {
        attempt: u64,
        reason: String,
    },
    PaymentSettled {
        proposal_id: ProposalId,
        result: Result<CaptureReceipt, PaymentError>,
    },
    Tick,
}

pub(crate) struct ConversationRuntime {
    conversation: Conversation,
    transport: Arc<dyn Transport>,
    media: Arc<dyn MediaGateway>,
    payments: Arc<dyn PaymentGateway>,
    mail_rx: mpsc::Receiver<Mail>,
    mail_tx: mpsc::Sender<Mail>,
    updates: broadcast::Sender<Update>,
    /// Monotonic counter distinguishing the current acquisition from stale
    /// completions of abandoned ones.
    acquire_attempt: u64,
    acquire_cancel: Option<CancellationToken>,
    /// Reply channel of the `StartCall` whose acquisition is in flight.
    pending_start: Option<Reply>,
    ticker_cancel: Option<CancellationToken>,
}

impl ConversationRuntime {
    pub(crate) fn new(
        conversation: Conversation,
        transport: Arc<dyn Transport>,
        media: Arc<dyn MediaGateway>,
        payments: Arc<dyn PaymentGateway>,
        mail_rx: mpsc::Receiver<Mail>,
        mail_tx: mpsc::Sender<Mail>,
        updates: broadcast::Sender<Update>,
    ) -> Self {
        Self {
            conversation,
            transport,
            media,
            payments,
            mail_rx,
            mail_tx,
            updates,
            acquire_attempt: 0,
            acquire_cancel: None,
            pending_start: None,
            ticker_cancel: None,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!(conversation = %self.conversation.id(), "conversation runtime started");

        while let Some(mail) = self.mail_rx.recv().await {
            match mail {
                Mail::Command { command, reply } => self.handle_command(command, reply),
                Mail::Completion(completion) => self.handle_completion(completion),
            }
        }

        // Teardown: abandon in-flight work. Dropping the conversation drops
        // any active media lease, which releases the handle.
        if let Some(token) = self.acquire_cancel.take() {
            token.cancel();
        }
        if let Some(token) = self.ticker_cancel.take() {
            token.cancel();
        }
        tracing::info!(conversation = %self.conversation.id(), "conversation runtime stopped");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_command(&mut self, command: Command, reply: Reply) {
        let now = Utc::now();
        match command {
            Command::SendText { author, body } => {
                match self.conversation.send_text(author, &body, now) {
                    Ok(event) => {
                        self.announce_and_deliver(event.clone());
                        let _ = reply.send(Ok(CommandOutcome::Event(event)));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }

            Command::SendProposal {
                author,
                amount,
                description,
            } => match self
                .conversation
                .send_proposal(author, amount, &description, now)
            {
                Ok((proposal, event)) => {
                    self.broadcast(Update::Proposal {
                        proposal: proposal.clone(),
                    });
                    self.announce_and_deliver(event);
                    let _ = reply.send(Ok(CommandOutcome::Proposal(proposal)));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },

            Command::RespondToProposal {
                author,
                proposal_id,
                decision,
            } => match self
                .conversation
                .respond_to_proposal(author, proposal_id, decision, now)
            {
                Ok(resolution) => {
                    self.broadcast(Update::Proposal {
                        proposal: resolution.proposal.clone(),
                    });
                    self.announce_and_deliver(resolution.notice);
                    if let Some(capture) = resolution.capture {
                        self.spawn_payment(capture);
                    }
                    let _ = reply.send(Ok(CommandOutcome::Proposal(resolution.proposal)));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },

            Command::RetryDelivery { event_id } => {
                match self.conversation.retry_delivery(event_id) {
                    Ok(event) => {
                        self.broadcast(Update::Delivery {
                            event: event.clone(),
                        });
                        self.spawn_delivery(event.clone());
                        let _ = reply.send(Ok(CommandOutcome::Event(event)));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }

            Command::StartCall { mode, timeout } => {
                match self.conversation.start_call(mode, now) {
                    Ok(view) => {
                        self.broadcast(Update::Call { call: view });
                        // The reply is held until acquisition resolves.
                        self.pending_start = Some(reply);
                        self.spawn_acquisition(mode, timeout.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }

            Command::EndCall => {
                let result = if self.conversation.call_is_requesting() {
                    // Hang-up before the devices answered: abandon the
                    // acquisition and settle the waiting start command.
                    if let Some(token) = self.acquire_cancel.take() {
                        token.cancel();
                    }
                    let result = self.conversation.cancel_call(now);
                    if result.is_ok() {
                        if let Some(pending) = self.pending_start.take() {
                            let _ = pending.send(Err(CommandError::Call(CallError::Cancelled)));
                        }
                    }
                    result
                } else {
                    self.stop_ticker();
                    self.conversation.end_call(now)
                };

                match result {
                    Ok(notice) => {
                        let view = self.conversation.call_view(now);
                        self.broadcast(Update::Call { call: view.clone() });
                        self.announce_and_deliver(notice);
                        let _ = reply.send(Ok(CommandOutcome::CallState(view)));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }

            Command::ToggleMute => match self.conversation.toggle_mute() {
                Ok(muted) => {
                    self.broadcast(Update::Call {
                        call: self.conversation.call_view(now),
                    });
                    let _ = reply.send(Ok(CommandOutcome::Muted(muted)));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },

            Command::ToggleCamera => match self.conversation.toggle_camera() {
                Ok(camera_off) => {
                    self.broadcast(Update::Call {
                        call: self.conversation.call_view(now),
                    });
                    let _ = reply.send(Ok(CommandOutcome::CameraOff(camera_off)));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },

            Command::Snapshot => {
                let _ = reply.send(Ok(CommandOutcome::Snapshot(self.conversation.snapshot(now))));
            }
        }
    }

    // ========================================================================
    // Completions
    // ========================================================================

    fn handle_completion(&mut self, completion: Completion) {
        let now = Utc::now();
        match completion {
            Completion::Delivery { event_id, result } => {
                let state = match result {
                    Ok(_) => DeliveryState::Delivered,
                    Err(error) => {
                        tracing::warn!(event = %event_id, %error, "event delivery failed");
                        DeliveryState::Failed {
                            reason: error.to_string(),
                        }
                    }
                };
                match self.conversation.set_delivery(event_id, state) {
                    Ok(event) => self.broadcast(Update::Delivery { event }),
                    Err(error) => {
                        tracing::error!(event = %event_id, %error, "delivery result for unknown event");
                    }
                }
            }

            Completion::MediaReady { attempt, lease } => {
                if attempt != self.acquire_attempt {
                    // A newer session owns the devices now; the stale lease
                    // releases on drop.
                    return;
                }
                self.acquire_cancel = None;
                match self.conversation.activate_call(lease, now) {
                    Ok(notice) => {
                        let view = self.conversation.call_view(now);
                        self.broadcast(Update::Call { call: view.clone() });
                        self.announce_and_deliver(notice);
                        if let Some(pending) = self.pending_start.take() {
                            let _ = pending.send(Ok(CommandOutcome::CallState(view)));
                        }
                        self.start_ticker();
                    }
                    Err(_) => {
                        tracing::debug!("media acquired after the session ended; lease released");
                    }
                }
            }

            Completion::MediaFailed { attempt, reason } => {
                if attempt != self.acquire_attempt {
                    return;
                }
                self.acquire_cancel = None;
                match self.conversation.fail_call(&reason, now) {
                    Ok(notice) => {
                        self.broadcast(Update::Call {
                            call: self.conversation.call_view(now),
                        });
                        self.announce_and_deliver(notice);
                        if let Some(pending) = self.pending_start.take() {
                            let _ = pending.send(Err(CommandError::Call(
                                CallError::DeviceUnavailable(reason),
                            )));
                        }
                    }
                    Err(_) => {
                        tracing::debug!("media failure for a session no longer requesting");
                    }
                }
            }

            Completion::PaymentSettled {
                proposal_id,
                result,
            } => {
                if let Err(error) = &result {
                    tracing::warn!(proposal = %proposal_id, %error, "payment capture failed");
                }
                match self
                    .conversation
                    .record_payment_outcome(proposal_id, &result, now)
                {
                    Ok(notice) => self.announce_and_deliver(notice),
                    Err(error) => {
                        tracing::error!(proposal = %proposal_id, %error, "failed to record payment outcome");
                    }
                }
            }

            Completion::Tick => {
                if let Some(elapsed_secs) = self.conversation.call_elapsed(now) {
                    self.broadcast(Update::CallTick { elapsed_secs });
                }
            }
        }
    }

    // ========================================================================
    // Spawned work
    // ========================================================================

    fn broadcast(&self, update: Update) {
        // No receivers is fine; snapshots remain available on demand.
        let _ = self.updates.send(update);
    }

    /// Broadcast a freshly appended event and start its transport delivery.
    fn announce_and_deliver(&self, event: ThreadEvent) {
        self.broadcast(Update::Event {
            event: event.clone(),
        });
        self.spawn_delivery(event);
    }

    fn spawn_delivery(&self, event: ThreadEvent) {
        let transport = Arc::clone(&self.transport);
        let mail_tx = self.mail_tx.clone();
        let conversation_id = self.conversation.id();
        tokio::spawn(async move {
            let result = transport.deliver(conversation_id, &event).await;
            let _ = mail_tx
                .send(Mail::Completion(Completion::Delivery {
                    event_id: event.id,
                    result,
                }))
                .await;
        });
    }

    fn spawn_payment(&self, request: CaptureRequest) {
        let payments = Arc::clone(&self.payments);
        let mail_tx = self.mail_tx.clone();
        tokio::spawn(async move {
            let proposal_id = request.proposal_id;
            let result = payments.capture(request).await;
            let _ = mail_tx
                .send(Mail::Completion(Completion::PaymentSettled {
                    proposal_id,
                    result,
                }))
                .await;
        });
    }

    fn spawn_acquisition(&mut self, mode: crate::call::CallMode, timeout: Duration) {
        self.acquire_attempt += 1;
        let attempt = self.acquire_attempt;
        let cancel = CancellationToken::new();
        self.acquire_cancel = Some(cancel.clone());

        let media = Arc::clone(&self.media);
        let mail_tx = self.mail_tx.clone();
        tokio::spawn(async move {
            // The acquire future runs to completion except on timeout, so a
            // gateway that ignores its token and resolves after a hang-up
            // still hands its lease to the stale-lease path above for
            // release.
            let outcome = tokio::time::timeout(timeout, media.acquire(mode, &cancel)).await;

            let completion = match outcome {
                Ok(Ok(handle)) => Completion::MediaReady {
                    attempt,
                    lease: MediaLease::new(handle, media),
                },
                Ok(Err(DeviceError::Cancelled)) => {
                    // The hang-up path already settled the session.
                    return;
                }
                Ok(Err(error)) => Completion::MediaFailed {
                    attempt,
                    reason: error.to_string(),
                },
                Err(_) => {
                    cancel.cancel();
                    Completion::MediaFailed {
                        attempt,
                        reason: format!("acquisition timed out after {}s", timeout.as_secs()),
                    }
                }
            };
            let _ = mail_tx.send(Mail::Completion(completion)).await;
        });
    }

    fn start_ticker(&mut self) {
        self.stop_ticker();
        let cancel = CancellationToken::new();
        self.ticker_cancel = Some(cancel.clone());

        let mail_tx = self.mail_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if mail_tx
                            .send(Mail::Completion(Completion::Tick))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn stop_ticker(&mut self) {
        if let Some(token) = self.ticker_cancel.take() {
            token.cancel();
        }
    }
}
