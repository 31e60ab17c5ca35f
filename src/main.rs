//! haggle: conversation and price-negotiation core for a service
//! marketplace
//!
//! Per-conversation actors own an ordered event thread, a proposal ledger
//! and at most one live call session, exposed over a thin HTTP/SSE surface.

mod api;
mod call;
mod collab;
mod ledger;
mod runtime;
mod thread;

use api::{create_router, AppState};
use collab::media::LeaseTracker;
use collab::payment::RecordingPayments;
use collab::transport::{NullTransport, Transport, WebhookTransport};
use runtime::ConversationRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haggle=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let port: u16 = std::env::var("HAGGLE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8600);

    // Counter-party delivery goes to a webhook when one is configured;
    // otherwise the in-process transport acks everything.
    let transport: Arc<dyn Transport> = match std::env::var("HAGGLE_WEBHOOK_URL") {
        Ok(url) if !url.is_empty() => {
            tracing::info!(%url, "delivering events via webhook transport");
            Arc::new(WebhookTransport::new(url))
        }
        _ => {
            tracing::info!("no HAGGLE_WEBHOOK_URL set; using in-process transport");
            Arc::new(NullTransport)
        }
    };

    let registry = Arc::new(ConversationRegistry::new(
        transport,
        Arc::new(LeaseTracker::new()),
        Arc::new(RecordingPayments::new()),
    ));

    // Create application state and router
    let state = AppState::new(registry);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state).layer(cors).layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("haggle server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
