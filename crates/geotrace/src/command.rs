//! The remote command channel.
//!
//! Administrator commands are registry entries, not a durable queue. The
//! producer subscribes to a [`CommandChannel`], which owns a fixed-period
//! poll of the per-user stop flag and pushes observed commands into an
//! async receiver. Delivery latency is therefore bounded by one poll
//! period (default 10 seconds), never zero.
//!
//! Known limitation, preserved deliberately: only `stop` has a consuming
//! loop. `resume` and `custom` commands are delivered to the remote
//! collector as telemetry and are never read back by the producer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::events::{EventSink, TrackerEvent};
use crate::registry::Registry;

/// Capacity of the command receiver.
const COMMAND_CHANNEL_CAPACITY: usize = 4;

/// Default period between registry polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// What an administrator asked a producer to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Stop tracking. The only kind with a producer-side consumer.
    Stop,
    /// Resume tracking. Outbound telemetry only; never consumed.
    Resume,
    /// Remove the user. Outbound telemetry only; never consumed.
    Remove,
    /// Free-form command text. Outbound telemetry only; never consumed.
    Custom(String),
}

impl CommandKind {
    /// The `command_type` value used in collector submissions.
    #[must_use]
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Stop => "stop_tracking",
            Self::Resume => "resume_tracking",
            Self::Remove => "remove_user",
            Self::Custom(_) => "custom_admin_command",
        }
    }
}

/// One administrator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCommand {
    /// The producer the command targets.
    pub target_user_id: String,
    /// What was asked.
    pub kind: CommandKind,
    /// When the command was observed by the channel.
    pub issued_at: DateTime<Utc>,
}

/// Poll-driven command delivery with a bounded latency.
///
/// Each subscription spawns one poll task. A pending stop flag is delivered
/// exactly once per subscription and left set in the registry: observing it
/// again after the session stopped is a no-op, and a fresh subscription
/// against a still-set flag re-delivers `stop` (which a stopped session
/// rejects).
#[derive(Debug, Clone)]
pub struct CommandChannel {
    poll_interval: Duration,
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl CommandChannel {
    /// Create a channel with the given poll period.
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// The configured poll period; the delivery latency bound.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Subscribe to commands for one user.
    ///
    /// The first poll happens one period after subscribing. Registry
    /// failures are reported to the sink and treated as "no command".
    /// Dropping the receiver ends the poll task.
    #[must_use]
    pub fn subscribe(
        &self,
        registry: Registry,
        user_id: impl Into<String>,
        sink: Arc<dyn EventSink>,
    ) -> mpsc::Receiver<AdminCommand> {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let user_id = user_id.into();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first interval tick completes immediately; consume it so
            // observation starts one full period after subscription.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }

                match registry.stop_requested(&user_id) {
                    Ok(true) => {
                        let command = AdminCommand {
                            target_user_id: user_id.clone(),
                            kind: CommandKind::Stop,
                            issued_at: Utc::now(),
                        };
                        // Delivered once; the flag stays set in the registry.
                        let _ = tx.send(command).await;
                        break;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        sink.emit(&TrackerEvent::StoreUnavailable {
                            operation: "stop_requested",
                            reason: err.to_string(),
                        });
                    }
                }
            }
            debug!("command poll ended for {user_id}");
        });

        rx
    }
}
