//! Payment collaborator
//!
//! Invoked only when a proposal reaches `Accepted`. Fund movement is
//! outside this core's state machine; the capture result comes back
//! asynchronously and is surfaced as a system notice in the thread.

use crate::ledger::ProposalId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use thiserror::Error;

/// What the payment side needs to settle an accepted proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub proposal_id: ProposalId,
    pub amount: i64,
    pub client_id: String,
    pub provider_id: String,
}

#[derive(Debug, Clone)]
pub struct CaptureReceipt {
    pub reference: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("payment service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(&self, request: CaptureRequest) -> Result<CaptureReceipt, PaymentError>;
}

/// Journaling gateway: acknowledges every capture and keeps the requests
/// for inspection. Real settlement is a deployment concern behind the
/// trait.
#[derive(Debug, Default)]
pub struct RecordingPayments {
    journal: Mutex<Vec<CaptureRequest>>,
}

impl RecordingPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> Vec<CaptureRequest> {
        self.journal.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingPayments {
    async fn capture(&self, request: CaptureRequest) -> Result<CaptureReceipt, PaymentError> {
        let mut journal = self.journal.lock().unwrap();
        journal.push(request.clone());
        let reference = format!("cap-{:06}", journal.len());
        drop(journal);

        tracing::info!(
            proposal = %request.proposal_id,
            amount = request.amount,
            %reference,
            "payment capture recorded"
        );
        Ok(CaptureReceipt {
            reference,
            captured_at: Utc::now(),
        })
    }
}
