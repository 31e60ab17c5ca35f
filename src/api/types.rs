//! API request and response types

use crate::call::{CallError, CallMode, CallStateView};
use crate::ledger::{Decision, LedgerError, Proposal};
use crate::runtime::{CommandError, ConversationHandle};
use crate::thread::{AuthorRole, ThreadError, ThreadEvent};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================
// Requests
// ============================================================

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub client_id: String,
    pub provider_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub role: AuthorRole,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct SendProposalRequest {
    pub role: AuthorRole,
    pub amount: i64,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondToProposalRequest {
    pub role: AuthorRole,
    pub decision: Decision,
}

#[derive(Debug, Deserialize)]
pub struct StartCallRequest {
    pub mode: CallMode,
    /// Acquisition bound in seconds; the server default applies if absent.
    pub timeout_secs: Option<u64>,
}

// ============================================================
// Responses
// ============================================================

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub client_id: String,
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ConversationHandle> for ConversationResponse {
    fn from(handle: &ConversationHandle) -> Self {
        Self {
            id: handle.id,
            client_id: handle.client_id.clone(),
            provider_id: handle.provider_id.clone(),
            created_at: handle.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationResponse>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub event: ThreadEvent,
}

#[derive(Debug, Serialize)]
pub struct ProposalResponse {
    pub proposal: Proposal,
}

#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub call: CallStateView,
}

#[derive(Debug, Serialize)]
pub struct MuteResponse {
    pub muted: bool,
}

#[derive(Debug, Serialize)]
pub struct CameraResponse {
    pub camera_off: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================
// Error mapping
// ============================================================

/// Handler-level errors, mapped onto the HTTP status space.
#[derive(Debug)]
pub enum AppError {
    UnknownConversation(Uuid),
    Command(CommandError),
}

impl From<CommandError> for AppError {
    fn from(error: CommandError) -> Self {
        AppError::Command(error)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::UnknownConversation(id) => {
                (StatusCode::NOT_FOUND, format!("no conversation {id}"))
            }
            AppError::Command(error) => (status_for(error), error.to_string()),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Validation → 400, protocol misuse → 403/409, missing → 404, transient
/// device trouble → 503.
fn status_for(error: &CommandError) -> StatusCode {
    match error {
        CommandError::EmptyMessage => StatusCode::BAD_REQUEST,
        CommandError::InvalidRole => StatusCode::FORBIDDEN,
        CommandError::NotRetryable(_) => StatusCode::CONFLICT,
        CommandError::Thread(ThreadError::NotFound(_)) => StatusCode::NOT_FOUND,
        CommandError::Thread(_) => StatusCode::CONFLICT,
        CommandError::Ledger(error) => match error {
            LedgerError::InvalidProposal(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Forbidden => StatusCode::FORBIDDEN,
            LedgerError::AlreadyResolved(_) | LedgerError::Thread(_) => StatusCode::CONFLICT,
        },
        CommandError::Call(error) => match error {
            CallError::AlreadyActive
            | CallError::NoActiveCall
            | CallError::Cancelled => StatusCode::CONFLICT,
            CallError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CallError::NotApplicable => StatusCode::BAD_REQUEST,
        },
        CommandError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    }
}
