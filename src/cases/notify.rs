//! Case notifications
//!
//! Every case transition is reported to a `NotificationSink`. Delivery is
//! fire-and-forget: a failed report is logged and never undoes or blocks the
//! transition that produced it.

use crate::cases::{Case, NotifyError};
use crate::duration::format_duration;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

/// Something that happened to a case
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseEvent {
    /// A ban, timeout or warning was recorded
    Opened(Case),
    /// A moderator lifted a restriction
    Revoked {
        case: Case,
        moderator_id: u64,
        reason: String,
    },
    /// A temporary ban expired and was lifted by the sweeper
    Expired(Case),
    /// A timeout ran out; the platform lifts these itself
    TimeoutExpired(Case),
    /// The sweeper could not lift an expired ban; the case is closed anyway
    ReversalFailed { case: Case, error: String },
}

impl CaseEvent {
    #[must_use]
    pub fn case(&self) -> &Case {
        match self {
            Self::Opened(case)
            | Self::Expired(case)
            | Self::TimeoutExpired(case)
            | Self::Revoked { case, .. }
            | Self::ReversalFailed { case, .. } => case,
        }
    }

    /// Short action name for log headings
    #[must_use]
    pub fn action(&self) -> String {
        match self {
            Self::Opened(case) => case.action_label().to_uppercase(),
            Self::Revoked { case, .. } => match case.kind {
                crate::cases::CaseKind::Timeout => "TIMEOUT REMOVED".to_string(),
                _ => "UNBAN".to_string(),
            },
            Self::Expired(_) => "AUTO-UNBAN".to_string(),
            Self::TimeoutExpired(_) => "TIMEOUT EXPIRED".to_string(),
            Self::ReversalFailed { .. } => "AUTO-UNBAN FAILED".to_string(),
        }
    }

    /// Moderation log entry for this event
    #[must_use]
    pub fn render(&self) -> String {
        let case = self.case();
        let mut out = format!("**[{}] | ACTION: {}**\n", case.guild_id, self.action());
        let _ = writeln!(out, "**User:** <@{0}> | `{0}`", case.target_user_id);

        match self {
            Self::Opened(_) => {
                let _ = writeln!(out, "**Moderator:** <@{0}> | `{0}`", case.moderator_id);
                if case.kind.is_restriction() {
                    let length = case
                        .duration_ms
                        .map_or_else(|| "Permanent".to_string(), format_duration);
                    let _ = writeln!(out, "**Duration:** {length}");
                }
                if let Some(expires_at) = case.expires_at {
                    let ts = expires_at.timestamp();
                    let _ = writeln!(out, "**Expires:** <t:{ts}:f> (<t:{ts}:R>)");
                }
                let _ = writeln!(out, "**Reason:** {}", case.reason);
            }
            Self::Revoked {
                moderator_id,
                reason,
                ..
            } => {
                let _ = writeln!(out, "**Moderator:** <@{moderator_id}> | `{moderator_id}`");
                let _ = writeln!(out, "**Reason:** {reason}");
            }
            Self::Expired(_) | Self::TimeoutExpired(_) => {
                let _ = writeln!(out, "**Reason:** Temporary restriction expired");
                let _ = writeln!(out, "**Original reason:** {}", case.reason);
            }
            Self::ReversalFailed { error, .. } => {
                let _ = writeln!(out, "**Error:** {error}");
                let _ = writeln!(out, "**Original reason:** {}", case.reason);
            }
        }

        let _ = write!(out, "**Case:** `#{}`", case.case_id);
        out
    }
}

/// Destination for case events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn report(&self, event: &CaseEvent) -> Result<(), NotifyError>;
}

/// Report an event, logging instead of propagating a failure
pub(crate) async fn deliver(sink: &dyn NotificationSink, event: &CaseEvent) {
    if let Err(e) = sink.report(event).await {
        warn!(
            target: crate::ERROR_TARGET,
            case_id = %event.case().case_id,
            action = %event.action(),
            error = %e,
            "Failed to deliver case notification"
        );
    }
}

/// Writes case events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn report(&self, event: &CaseEvent) -> Result<(), NotifyError> {
        let case = event.case();
        info!(
            target: crate::CASE_TARGET,
            case_id = %case.case_id,
            kind = %case.kind,
            guild_id = %case.guild_id,
            user_id = %case.target_user_id,
            action = %event.action(),
            event = "case_event",
            "Case event"
        );
        Ok(())
    }
}

/// Delivers each event to several sinks
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    /// Fails only if every sink failed
    async fn report(&self, event: &CaseEvent) -> Result<(), NotifyError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.report(event).await {
                warn!(
                    target: crate::ERROR_TARGET,
                    case_id = %event.case().case_id,
                    error = %e,
                    "Notification sink failed"
                );
                failures.push(e.0);
            }
        }

        if !self.sinks.is_empty() && failures.len() == self.sinks.len() {
            return Err(NotifyError(failures.join("; ")));
        }
        Ok(())
    }
}
