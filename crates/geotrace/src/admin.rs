//! Admin aggregate view.
//!
//! Reads the registry projection of every tracked user and issues commands
//! back through the registry and the collector. All collector submissions
//! here are fire-and-forget: the view never blocks on network completion,
//! and a lost notification is not retried.
//!
//! `stop_tracking` is the only operation with a producer-side consumer
//! (the command channel polls the stop flag). `remove_user` deletes the
//! local record unconditionally but cannot force the remote producer to
//! stop, and `resume_tracking`/`send_custom_command` are telemetry-only.

use std::sync::Arc;

use chrono::Utc;

use crate::command::CommandKind;
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::pipeline::CollectorClient;
use crate::registry::Registry;
use crate::session::TrackedUserRecord;

/// `admin_session` tag for panel-issued commands.
const ADMIN_SESSION_PANEL: &str = "admin_control_panel";

/// `admin_session` tag for free-form commands.
const ADMIN_SESSION_CUSTOM: &str = "custom_control";

/// Command text sent with a stop.
const STOP_COMMAND_TEXT: &str = "STOP_TRACKING_24H";

/// Command text sent with a removal.
const REMOVE_COMMAND_TEXT: &str = "REMOVE_USER_PERMANENTLY";

/// Command text sent with a resume.
const RESUME_COMMAND_TEXT: &str = "RESUME_TRACKING";

/// Counts shown in the dashboard stat row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingCounts {
    /// Sessions last reported active.
    pub active: usize,
    /// Sessions last reported inactive.
    pub inactive: usize,
    /// All tracked sessions.
    pub total: usize,
}

/// The administrator's view over the shared registry.
#[derive(Debug, Clone)]
pub struct AdminView {
    registry: Registry,
    collector: CollectorClient,
    sink: Arc<dyn EventSink>,
}

impl AdminView {
    /// Create a view over the given registry and collector.
    #[must_use]
    pub fn new(registry: Registry, collector: CollectorClient, sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            collector,
            sink,
        }
    }

    /// All tracked-user records, ordered by user identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unavailable.
    pub fn tracked_users(&self) -> Result<Vec<TrackedUserRecord>> {
        self.registry.records()
    }

    /// Tracked-user records filtered by activity.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unavailable.
    pub fn tracked_users_filtered(&self, active: bool) -> Result<Vec<TrackedUserRecord>> {
        let mut records = self.registry.records()?;
        records.retain(|record| record.is_active == active);
        Ok(records)
    }

    /// Active/inactive/total counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unavailable.
    pub fn counts(&self) -> Result<TrackingCounts> {
        let records = self.registry.records()?;
        let active = records.iter().filter(|record| record.is_active).count();
        Ok(TrackingCounts {
            active,
            inactive: records.len() - active,
            total: records.len(),
        })
    }

    /// Stop tracking for one user.
    ///
    /// Sets the stop flag the producer's command channel polls, marks the
    /// cached record inactive, and notifies the collector fire-and-forget.
    /// The producer honors the stop within one command-poll period.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unavailable.
    pub fn stop_tracking(&self, user_id: &str) -> Result<()> {
        self.registry.request_stop(user_id)?;

        if let Some(mut record) = self.registry.record(user_id)? {
            record.is_active = false;
            record.last_seen = Utc::now();
            self.registry.upsert_record(record)?;
        }

        self.notify(
            user_id,
            &CommandKind::Stop,
            STOP_COMMAND_TEXT,
            ADMIN_SESSION_PANEL,
        );
        Ok(())
    }

    /// Remove a user's record unconditionally.
    ///
    /// Deletes the record and the user's stop flag, and notifies the
    /// collector. Does not guarantee the remote producer stops: there is no
    /// producer-side removal consumer. Returns `true` if a record existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unavailable.
    pub fn remove_user(&self, user_id: &str) -> Result<bool> {
        let removed = self.registry.remove_record(user_id)?;
        self.registry.clear_stop(user_id)?;

        self.notify(
            user_id,
            &CommandKind::Remove,
            REMOVE_COMMAND_TEXT,
            ADMIN_SESSION_PANEL,
        );
        Ok(removed)
    }

    /// Ask a producer to resume tracking.
    ///
    /// Telemetry-only: no producer-side consumer applies resumes, so this
    /// is a best-effort notification with no local effect.
    pub fn resume_tracking(&self, user_id: &str) {
        self.notify(
            user_id,
            &CommandKind::Resume,
            RESUME_COMMAND_TEXT,
            ADMIN_SESSION_PANEL,
        );
    }

    /// Send a free-form command to a producer.
    ///
    /// Telemetry-only, like resume.
    ///
    /// # Errors
    ///
    /// Returns an error if the command text is empty or the target user is
    /// unknown.
    pub fn send_custom_command(&self, user_id: &str, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::invalid_command("command text is empty"));
        }
        if self.registry.record(user_id)?.is_none() {
            return Err(Error::unknown_user(user_id));
        }

        self.notify(
            user_id,
            &CommandKind::Custom(text.to_string()),
            text,
            ADMIN_SESSION_CUSTOM,
        );
        Ok(())
    }

    /// Stop every user last reported active. Returns how many stops were
    /// issued.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unavailable.
    pub fn stop_all(&self) -> Result<usize> {
        let active = self.tracked_users_filtered(true)?;
        for record in &active {
            self.stop_tracking(&record.user_id)?;
        }
        Ok(active.len())
    }

    /// Drop every record and stop flag. Returns how many records were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unavailable.
    pub fn clear_all(&self) -> Result<usize> {
        self.registry.clear_all()
    }

    /// Fire-and-forget command notification to the collector.
    fn notify(&self, user_id: &str, kind: &CommandKind, command_text: &str, admin_session: &str) {
        let fields = vec![
            ("command_type".to_string(), kind.wire_name().to_string()),
            ("target_user_id".to_string(), user_id.to_string()),
            ("admin_command".to_string(), command_text.to_string()),
            ("timestamp".to_string(), Utc::now().to_rfc3339()),
            ("admin_session".to_string(), admin_session.to_string()),
        ];
        self.collector
            .deliver(user_id, fields, Arc::clone(&self.sink));
    }
}
