//! Session lifecycle and the admin-facing projection.
//!
//! A [`TrackingSession`] follows one tracked user identifier from its first
//! sample to `Stopped` or `Removed`. The state machine enforces the allowed
//! transitions; duration accounting accumulates only while the session is
//! `Active`. [`TrackedUserRecord`] is the registry projection the admin view
//! reads, serialized with the camelCase field names of the source store
//! format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Samples are being captured and recorded.
    Active,
    /// Capture is suspended; the session can resume.
    Paused,
    /// Tracking ended; the record remains visible.
    Stopped,
    /// Terminal; the record is deleted and cannot be reactivated.
    Removed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

impl SessionState {
    /// Check whether this state admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Removed)
    }

    /// Check whether a transition from this state to `to` is allowed.
    ///
    /// Allowed transitions are `Active ⇄ Paused`, `Active|Paused → Stopped`,
    /// and `(anything but Removed) → Removed`.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (Self::Active, Self::Paused)
            | (Self::Paused, Self::Active)
            | (Self::Active | Self::Paused, Self::Stopped) => true,
            (from, Self::Removed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Errors from session state handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The requested transition is not in the allowed set.
    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition {
        /// State the session was in.
        from: SessionState,
        /// State that was requested.
        to: SessionState,
    },

    /// An operation requiring an active session was attempted.
    #[error("session is not active (state: {state})")]
    NotActive {
        /// State the session was in.
        state: SessionState,
    },
}

/// The lifecycle of one tracked user identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSession {
    user_id: String,
    state: SessionState,
    session_start: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    sample_count: u64,
    tracked_secs: u64,
    active_since: Option<DateTime<Utc>>,
}

impl TrackingSession {
    /// Begin a new active session at the given instant.
    #[must_use]
    pub fn begin(user_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            state: SessionState::Active,
            session_start: at,
            last_seen: at,
            sample_count: 0,
            tracked_secs: 0,
            active_since: Some(at),
        }
    }

    /// The stable user identifier this session tracks.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// When the session started. Fixed at creation, never mutated.
    #[must_use]
    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    /// Timestamp of the most recent sample or state transition.
    #[must_use]
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// Number of samples recorded while active.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Check whether the session is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Record one sample captured at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotActive`] unless the session is `Active`.
    pub fn record_sample(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive { state: self.state });
        }
        self.sample_count += 1;
        self.last_seen = at;
        Ok(())
    }

    /// Suspend the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] unless the session is `Active`.
    pub fn pause(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.transition(SessionState::Paused, at)
    }

    /// Resume a paused session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] unless the session is `Paused`.
    pub fn resume(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.transition(SessionState::Active, at)
    }

    /// End the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] unless the session is
    /// `Active` or `Paused`.
    pub fn stop(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.transition(SessionState::Stopped, at)
    }

    /// Remove the session. Terminal: a removed session cannot be reactivated;
    /// a new session with a new user identifier is required.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] if already removed.
    pub fn remove(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.transition(SessionState::Removed, at)
    }

    /// Seconds of tracked time, accumulating only while `Active`.
    #[must_use]
    pub fn duration_secs(&self, now: DateTime<Utc>) -> u64 {
        let live = self
            .active_since
            .map(|since| u64::try_from((now - since).num_seconds().max(0)).unwrap_or(0))
            .unwrap_or(0);
        self.tracked_secs + live
    }

    fn transition(&mut self, to: SessionState, at: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.state.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        // Close out the live span when leaving Active, open one when entering.
        if let Some(since) = self.active_since.take() {
            self.tracked_secs += u64::try_from((at - since).num_seconds().max(0)).unwrap_or(0);
        }
        if to == SessionState::Active {
            self.active_since = Some(at);
        }

        self.state = to;
        self.last_seen = at;
        Ok(())
    }
}

/// The admin-visible projection of a tracked user.
///
/// Stored in the registry as JSON; field names stay camelCase on the wire so
/// records written by older producers remain readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedUserRecord {
    /// Stable user identifier.
    pub user_id: String,

    /// Timestamp of the most recent sample or state transition.
    pub last_seen: DateTime<Utc>,

    /// Human-readable place label, or the fixed fallback when unresolved.
    pub location_label: String,

    /// Coordinates formatted for display (`"26.7795°, 80.9760°"`).
    pub coordinates: String,

    /// Seconds of tracked time at the last update.
    pub tracking_duration_seconds: u64,

    /// Whether the producer considered the session active at the last update.
    pub is_active: bool,

    /// Short device descriptor.
    pub device_info: String,

    /// When the session started. Preserved from the first write.
    pub session_start: DateTime<Utc>,
}

impl TrackedUserRecord {
    /// Fold this record onto an existing one: `session_start` is preserved
    /// from the existing record, every other field is last-writer-wins.
    #[must_use]
    pub fn preserving_session_start(mut self, existing: Option<&Self>) -> Self {
        if let Some(previous) = existing {
            self.session_start = previous.session_start;
        }
        self
    }
}

/// Format a duration for display, e.g. `"2h 0m 5s"`, `"5m 30s"`, `"45s"`.
#[must_use]
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
