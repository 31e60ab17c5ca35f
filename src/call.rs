//! Live call session lifecycle
//!
//! One session per conversation at a time, overlaid on the message thread.
//! The phases are `Requesting → Active → Ended`, with `Requesting → Ended`
//! on acquisition failure or hang-up-before-connect. While Active the
//! session exclusively owns a [`MediaLease`]; leaving Active (or an
//! acquisition landing after the session already ended) drops the lease,
//! which is the release.

use crate::collab::media::MediaLease;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    Audio,
    Video,
}

/// Why a session reached `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    HungUp,
    AcquisitionFailed,
    CancelledBeforeActive,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("a call is already requesting or active")]
    AlreadyActive,
    #[error("media devices unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera controls do not apply to an audio call")]
    NotApplicable,
    #[error("no active call")]
    NoActiveCall,
    #[error("call was ended before media was acquired")]
    Cancelled,
}

#[derive(Debug)]
enum Phase {
    Requesting {
        requested_at: DateTime<Utc>,
    },
    Active {
        started_at: DateTime<Utc>,
        muted: bool,
        camera_off: bool,
        lease: MediaLease,
    },
    Ended {
        started_at: Option<DateTime<Utc>>,
        ended_at: DateTime<Utc>,
        reason: EndReason,
    },
}

/// One audio/video session. Mode is fixed at start.
#[derive(Debug)]
pub struct CallSession {
    mode: CallMode,
    phase: Phase,
}

impl CallSession {
    /// Enter `Requesting`; media acquisition runs elsewhere and reports
    /// back through [`CallSession::activate`] or [`CallSession::fail`].
    pub fn start(mode: CallMode, now: DateTime<Utc>) -> Self {
        Self {
            mode,
            phase: Phase::Requesting { requested_at: now },
        }
    }

    #[allow(dead_code)] // State query utility
    pub fn mode(&self) -> CallMode {
        self.mode
    }

    /// Requesting or Active. At most one live session exists per
    /// conversation; the aggregate enforces that before starting another.
    pub fn is_live(&self) -> bool {
        matches!(
            self.phase,
            Phase::Requesting { .. } | Phase::Active { .. }
        )
    }

    pub fn is_requesting(&self) -> bool {
        matches!(self.phase, Phase::Requesting { .. })
    }

    #[allow(dead_code)] // State query utility
    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Active { .. })
    }

    /// Acquisition succeeded: take ownership of the lease and go Active.
    ///
    /// If the session already left `Requesting`, the lease is dropped (and
    /// so released) immediately and the late acquisition is reported as
    /// cancelled.
    pub fn activate(&mut self, lease: MediaLease, now: DateTime<Utc>) -> Result<String, CallError> {
        match self.phase {
            Phase::Requesting { .. } => {
                self.phase = Phase::Active {
                    started_at: now,
                    muted: false,
                    camera_off: false,
                    lease,
                };
                Ok("call started".to_string())
            }
            _ => Err(CallError::Cancelled),
        }
    }

    /// Acquisition failed or timed out. No handle was ever held.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<String, CallError> {
        match self.phase {
            Phase::Requesting { .. } => {
                self.phase = Phase::Ended {
                    started_at: None,
                    ended_at: now,
                    reason: EndReason::AcquisitionFailed,
                };
                Ok(format!("call failed: {reason}"))
            }
            _ => Err(CallError::NoActiveCall),
        }
    }

    /// Hang-up while still `Requesting`: the session ends immediately and
    /// the in-flight acquisition is abandoned.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<String, CallError> {
        match self.phase {
            Phase::Requesting { .. } => {
                self.phase = Phase::Ended {
                    started_at: None,
                    ended_at: now,
                    reason: EndReason::CancelledBeforeActive,
                };
                Ok("call ended before connecting".to_string())
            }
            _ => Err(CallError::NoActiveCall),
        }
    }

    /// Hang up an active call. Release is the first effect: the lease is
    /// dropped before the notice text is even built, so nothing downstream
    /// can leak the handle.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<String, CallError> {
        let started_at = match &self.phase {
            Phase::Active { started_at, .. } => *started_at,
            _ => return Err(CallError::NoActiveCall),
        };

        let previous = std::mem::replace(
            &mut self.phase,
            Phase::Ended {
                started_at: Some(started_at),
                ended_at: now,
                reason: EndReason::HungUp,
            },
        );
        drop(previous);

        let secs = (now - started_at).num_seconds().max(0);
        Ok(format!("call ended, duration {secs}s"))
    }

    /// Flip the microphone flag; returns the new value.
    pub fn toggle_mute(&mut self) -> Result<bool, CallError> {
        match &mut self.phase {
            Phase::Active { muted, .. } => {
                *muted = !*muted;
                Ok(*muted)
            }
            _ => Err(CallError::NoActiveCall),
        }
    }

    /// Flip the camera flag; returns the new value. Audio calls have no
    /// camera to toggle.
    pub fn toggle_camera(&mut self) -> Result<bool, CallError> {
        if self.mode == CallMode::Audio {
            return Err(CallError::NotApplicable);
        }
        match &mut self.phase {
            Phase::Active { camera_off, .. } => {
                *camera_off = !*camera_off;
                Ok(*camera_off)
            }
            _ => Err(CallError::NoActiveCall),
        }
    }

    /// Seconds since the call went active. Display-only; never stored.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        match &self.phase {
            Phase::Active { started_at, .. } => {
                Some(u64::try_from((now - *started_at).num_seconds().max(0)).unwrap_or(0))
            }
            _ => None,
        }
    }

    /// Read-only view for snapshots and broadcasts.
    pub fn view(&self, now: DateTime<Utc>) -> CallStateView {
        match &self.phase {
            Phase::Requesting { requested_at } => CallStateView::Requesting {
                mode: self.mode,
                requested_at: *requested_at,
            },
            Phase::Active {
                started_at,
                muted,
                camera_off,
                ..
            } => CallStateView::Active {
                mode: self.mode,
                started_at: *started_at,
                muted: *muted,
                camera_off: *camera_off,
                elapsed_secs: u64::try_from((now - *started_at).num_seconds().max(0))
                    .unwrap_or(0),
            },
            Phase::Ended {
                started_at,
                ended_at,
                reason,
            } => CallStateView::Ended {
                mode: self.mode,
                started_at: *started_at,
                ended_at: *ended_at,
                reason: *reason,
            },
        }
    }
}

/// Serializable projection of the call state. `Idle` is the absence of a
/// session; the aggregate produces it when no call was ever started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CallStateView {
    Idle,
    Requesting {
        mode: CallMode,
        requested_at: DateTime<Utc>,
    },
    Active {
        mode: CallMode,
        started_at: DateTime<Utc>,
        muted: bool,
        camera_off: bool,
        elapsed_secs: u64,
    },
    Ended {
        mode: CallMode,
        started_at: Option<DateTime<Utc>>,
        ended_at: DateTime<Utc>,
        reason: EndReason,
    },
}
