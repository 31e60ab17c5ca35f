//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    AppError, CallResponse, CameraResponse, ConversationListResponse, ConversationResponse,
    CreateConversationRequest, EventResponse, MuteResponse, ProposalResponse,
    RespondToProposalRequest, SendProposalRequest, SendTextRequest, StartCallRequest,
};
use super::AppState;
use crate::ledger::ProposalId;
use crate::runtime::{Command, CommandError, CommandOutcome, ConversationHandle};
use crate::thread::EventId;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use std::time::Duration;
use uuid::Uuid;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/conversations/:id/stream", get(stream_conversation))
        .route("/api/conversations/:id/messages", post(send_text))
        .route(
            "/api/conversations/:id/events/:event_id/retry",
            post(retry_delivery),
        )
        .route("/api/conversations/:id/proposals", post(send_proposal))
        .route(
            "/api/conversations/:id/proposals/:proposal_id/response",
            post(respond_to_proposal),
        )
        .route("/api/conversations/:id/call/start", post(start_call))
        .route("/api/conversations/:id/call/end", post(end_call))
        .route("/api/conversations/:id/call/mute", post(toggle_mute))
        .route("/api/conversations/:id/call/camera", post(toggle_camera))
        .route("/version", get(get_version))
        .with_state(state)
}

async fn conversation(state: &AppState, id: Uuid) -> Result<ConversationHandle, AppError> {
    state
        .registry
        .get(id)
        .await
        .ok_or(AppError::UnknownConversation(id))
}

/// A reply variant the command contract does not produce for this request.
fn unexpected(outcome: &CommandOutcome) -> AppError {
    tracing::error!(?outcome, "unexpected command outcome");
    AppError::Command(CommandError::Closed)
}

// ============================================================
// Conversation lifecycle
// ============================================================

async fn create_conversation(
    State(state): State<AppState>,
    Json(request): Json<CreateConversationRequest>,
) -> Json<ConversationResponse> {
    let handle = state
        .registry
        .create(request.client_id, request.provider_id)
        .await;
    Json(ConversationResponse::from(&handle))
}

async fn list_conversations(State(state): State<AppState>) -> Json<ConversationListResponse> {
    let conversations = state
        .registry
        .list()
        .await
        .iter()
        .map(ConversationResponse::from)
        .collect();
    Json(ConversationListResponse { conversations })
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::runtime::ConversationSnapshot>, AppError> {
    let handle = conversation(&state, id).await?;
    Ok(Json(handle.snapshot().await?))
}

async fn stream_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, AppError> {
    let handle = conversation(&state, id).await?;
    let updates = handle.subscribe();
    let snapshot = handle.snapshot().await?;
    Ok(sse_stream(snapshot, updates))
}

// ============================================================
// Messaging
// ============================================================

async fn send_text(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendTextRequest>,
) -> Result<Json<EventResponse>, AppError> {
    let handle = conversation(&state, id).await?;
    match handle
        .command(Command::SendText {
            author: request.role,
            body: request.body,
        })
        .await?
    {
        CommandOutcome::Event(event) => Ok(Json(EventResponse { event })),
        other => Err(unexpected(&other)),
    }
}

async fn retry_delivery(
    State(state): State<AppState>,
    Path((id, event_id)): Path<(Uuid, u64)>,
) -> Result<Json<EventResponse>, AppError> {
    let handle = conversation(&state, id).await?;
    match handle
        .command(Command::RetryDelivery {
            event_id: EventId(event_id),
        })
        .await?
    {
        CommandOutcome::Event(event) => Ok(Json(EventResponse { event })),
        other => Err(unexpected(&other)),
    }
}

// ============================================================
// Negotiation
// ============================================================

async fn send_proposal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendProposalRequest>,
) -> Result<Json<ProposalResponse>, AppError> {
    let handle = conversation(&state, id).await?;
    match handle
        .command(Command::SendProposal {
            author: request.role,
            amount: request.amount,
            description: request.description,
        })
        .await?
    {
        CommandOutcome::Proposal(proposal) => Ok(Json(ProposalResponse { proposal })),
        other => Err(unexpected(&other)),
    }
}

async fn respond_to_proposal(
    State(state): State<AppState>,
    Path((id, proposal_id)): Path<(Uuid, u64)>,
    Json(request): Json<RespondToProposalRequest>,
) -> Result<Json<ProposalResponse>, AppError> {
    let handle = conversation(&state, id).await?;
    match handle
        .command(Command::RespondToProposal {
            author: request.role,
            proposal_id: ProposalId(proposal_id),
            decision: request.decision,
        })
        .await?
    {
        CommandOutcome::Proposal(proposal) => Ok(Json(ProposalResponse { proposal })),
        other => Err(unexpected(&other)),
    }
}

// ============================================================
// Calls
// ============================================================

async fn start_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StartCallRequest>,
) -> Result<Json<CallResponse>, AppError> {
    let handle = conversation(&state, id).await?;
    match handle
        .command(Command::StartCall {
            mode: request.mode,
            timeout: request.timeout_secs.map(Duration::from_secs),
        })
        .await?
    {
        CommandOutcome::CallState(call) => Ok(Json(CallResponse { call })),
        other => Err(unexpected(&other)),
    }
}

async fn end_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CallResponse>, AppError> {
    let handle = conversation(&state, id).await?;
    match handle.command(Command::EndCall).await? {
        CommandOutcome::CallState(call) => Ok(Json(CallResponse { call })),
        other => Err(unexpected(&other)),
    }
}

async fn toggle_mute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MuteResponse>, AppError> {
    let handle = conversation(&state, id).await?;
    match handle.command(Command::ToggleMute).await? {
        CommandOutcome::Muted(muted) => Ok(Json(MuteResponse { muted })),
        other => Err(unexpected(&other)),
    }
}

async fn toggle_camera(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CameraResponse>, AppError> {
    let handle = conversation(&state, id).await?;
    match handle.command(Command::ToggleCamera).await? {
        CommandOutcome::CameraOff(camera_off) => Ok(Json(CameraResponse { camera_off })),
        other => Err(unexpected(&other)),
    }
}

// ============================================================
// Misc
// ============================================================

async fn get_version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
