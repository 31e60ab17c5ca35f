//! HTTP surface for the conversation core
//!
//! The core stays an in-process state machine; this layer only translates
//! requests into commands, command errors into status codes, and the
//! update broadcast into an SSE stream. It owns no conversation state.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::runtime::ConversationRegistry;
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConversationRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<ConversationRegistry>) -> Self {
        Self { registry }
    }
}
