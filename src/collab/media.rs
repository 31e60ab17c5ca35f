//! Device/media collaborator
//!
//! The call session is the sole caller of `acquire` and `release`. A
//! successful acquisition is wrapped in a [`MediaLease`], an owned guard
//! that releases the underlying handle when dropped, so every exit path
//! out of a call (hang-up, acquisition landing after cancellation, actor
//! teardown) releases exactly once.

use crate::call::CallMode;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Opaque identifier of acquired microphone/camera tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaHandle(pub u64);

#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("acquisition cancelled")]
    Cancelled,
}

#[async_trait]
pub trait MediaGateway: Send + Sync {
    /// Acquire tracks for the given mode. Implementations must observe the
    /// token and give up promptly once it is cancelled.
    async fn acquire(
        &self,
        mode: CallMode,
        cancel: &CancellationToken,
    ) -> Result<MediaHandle, DeviceError>;

    /// Release a previously acquired handle. Infallible and idempotent-safe
    /// to call exactly once per handle.
    fn release(&self, handle: MediaHandle);
}

/// Exclusive ownership of one acquired handle.
///
/// Not `Clone`: there is exactly one lease per acquisition, and dropping it
/// is the release.
pub struct MediaLease {
    handle: Option<MediaHandle>,
    gateway: Arc<dyn MediaGateway>,
}

impl MediaLease {
    pub fn new(handle: MediaHandle, gateway: Arc<dyn MediaGateway>) -> Self {
        Self {
            handle: Some(handle),
            gateway,
        }
    }

    pub fn handle(&self) -> Option<MediaHandle> {
        self.handle
    }
}

impl Drop for MediaLease {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.gateway.release(handle);
        }
    }
}

impl std::fmt::Debug for MediaLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MediaLease").field(&self.handle).finish()
    }
}

/// In-memory gateway tracking outstanding leases.
///
/// The real devices live with the host application; this adapter keeps the
/// accounting honest (a handle is outstanding from `acquire` until exactly
/// one `release`) and is what the server binary and the tests run against.
#[derive(Debug, Default)]
pub struct LeaseTracker {
    next_handle: AtomicU64,
    outstanding: Mutex<HashSet<MediaHandle>>,
}

impl LeaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles acquired but not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaGateway for LeaseTracker {
    async fn acquire(
        &self,
        mode: CallMode,
        cancel: &CancellationToken,
    ) -> Result<MediaHandle, DeviceError> {
        if cancel.is_cancelled() {
            return Err(DeviceError::Cancelled);
        }
        let handle = MediaHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.outstanding.lock().unwrap().insert(handle);
        tracing::debug!(handle = handle.0, ?mode, "media tracks acquired");
        Ok(handle)
    }

    fn release(&self, handle: MediaHandle) {
        let known = self.outstanding.lock().unwrap().remove(&handle);
        if known {
            tracing::debug!(handle = handle.0, "media tracks released");
        } else {
            tracing::warn!(handle = handle.0, "release of unknown media handle");
        }
    }
}
