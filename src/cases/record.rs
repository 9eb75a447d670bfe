//! Case records
//!
//! A case is one moderation action. Ban and Timeout cases start active and
//! are resolved at most once; Warn cases are informational.

use crate::cases::{CaseError, CaseResult};
use chrono::{DateTime, Duration, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Prefix shared by every case id
pub const CASE_ID_PREFIX: &str = "PL";
/// Length of each random segment of a case id
pub const SEGMENT_LEN: usize = 6;
/// Characters a case id segment is drawn from
pub const CASE_ID_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Kind of moderation action a case records
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseKind {
    Ban,
    Timeout,
    Warn,
}

impl CaseKind {
    /// All kinds; case ids are unique across every one of them
    pub const ALL: [Self; 3] = [Self::Ban, Self::Timeout, Self::Warn];

    /// Whether cases of this kind restrict the user and carry `active`
    #[must_use]
    pub const fn is_restriction(self) -> bool {
        matches!(self, Self::Ban | Self::Timeout)
    }
}

/// Human-readable case identifier, `PL-XXXXXX-XXXXXX`
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    /// Build an id from two segments of alphabet indices.
    ///
    /// Indices are reduced modulo the alphabet size.
    #[must_use]
    pub fn from_indices(first: [usize; SEGMENT_LEN], second: [usize; SEGMENT_LEN]) -> Self {
        let segment = |indices: [usize; SEGMENT_LEN]| -> String {
            indices
                .iter()
                .map(|i| char::from(CASE_ID_ALPHABET[i % CASE_ID_ALPHABET.len()]))
                .collect()
        };
        Self(format!("{CASE_ID_PREFIX}-{}-{}", segment(first), segment(second)))
    }

    /// Parse an id typed by a user.
    ///
    /// Accepts an optional leading `#` and lowercase letters.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = input.trim().trim_start_matches('#').to_ascii_uppercase();
        let mut parts = normalized.split('-');

        if parts.next() != Some(CASE_ID_PREFIX) {
            return None;
        }
        let valid_segment = |segment: Option<&str>| {
            segment.is_some_and(|s| {
                s.len() == SEGMENT_LEN && s.bytes().all(|b| b.is_ascii_alphanumeric())
            })
        };
        if !valid_segment(parts.next()) || !valid_segment(parts.next()) || parts.next().is_some() {
            return None;
        }

        Some(Self(normalized))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CaseId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Record of a moderation action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    /// Unique id across all kinds
    pub case_id: CaseId,
    pub kind: CaseKind,
    pub guild_id: u64,
    /// User the action was taken against
    pub target_user_id: u64,
    pub moderator_id: u64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// Length of a temporary restriction in milliseconds
    pub duration_ms: Option<u64>,
    /// `created_at + duration_ms`; present iff `duration_ms` is
    pub expires_at: Option<DateTime<Utc>>,
    /// True while a Ban or Timeout is in effect; always false for Warn
    pub active: bool,
    /// When the restriction was lifted
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Moderator who lifted it; `None` when it expired
    #[serde(default)]
    pub resolved_by: Option<u64>,
    #[serde(default)]
    pub resolution_reason: Option<String>,
}

impl Case {
    /// Create a new case at `created_at`.
    ///
    /// Restrictions start active. A duration makes the case temporary and
    /// fixes `expires_at`.
    ///
    /// # Errors
    /// Returns a validation error for a Warn with a duration, or when the
    /// expiry cannot be represented.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        case_id: CaseId,
        kind: CaseKind,
        guild_id: u64,
        target_user_id: u64,
        moderator_id: u64,
        reason: impl Into<String>,
        created_at: DateTime<Utc>,
        duration_ms: Option<u64>,
    ) -> CaseResult<Self> {
        if kind == CaseKind::Warn && duration_ms.is_some() {
            return Err(CaseError::validation("a warning cannot have a duration"));
        }

        let expires_at = duration_ms
            .map(|ms| {
                i64::try_from(ms)
                    .ok()
                    .and_then(Duration::try_milliseconds)
                    .and_then(|d| created_at.checked_add_signed(d))
                    .ok_or_else(|| CaseError::validation(format!("duration {ms}ms is too large")))
            })
            .transpose()?;

        Ok(Self {
            case_id,
            kind,
            guild_id,
            target_user_id,
            moderator_id,
            reason: reason.into(),
            created_at,
            duration_ms,
            expires_at,
            active: kind.is_restriction(),
            resolved_at: None,
            resolved_by: None,
            resolution_reason: None,
        })
    }

    /// Whether this is a temporary restriction
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        self.duration_ms.is_some()
    }

    /// Whether the restriction is active and its expiry is at or before `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.is_some_and(|at| at <= now)
    }

    /// Lift the restriction.
    ///
    /// Returns false, changing nothing, when the case is not active.
    pub fn deactivate(
        &mut self,
        at: DateTime<Utc>,
        by: Option<u64>,
        reason: Option<String>,
    ) -> bool {
        if !self.active {
            return false;
        }

        self.active = false;
        self.resolved_at = Some(at);
        self.resolved_by = by;
        self.resolution_reason = reason;

        info!(
            target: crate::CASE_TARGET,
            case_id = %self.case_id,
            kind = %self.kind,
            guild_id = %self.guild_id,
            user_id = %self.target_user_id,
            resolved_by = ?self.resolved_by,
            event = "case_deactivated",
            "Case deactivated"
        );

        true
    }

    /// Label used in audit logs and notifications
    #[must_use]
    pub fn action_label(&self) -> &'static str {
        match (self.kind, self.is_temporary()) {
            (CaseKind::Ban, true) => "Temporary ban",
            (CaseKind::Ban, false) => "Permanent ban",
            (CaseKind::Timeout, _) => "Timeout",
            (CaseKind::Warn, _) => "Warning",
        }
    }

    /// Reason recorded at the enforcement layer, tagged with the case id
    #[must_use]
    pub fn audit_reason(&self) -> String {
        format!(
            "{} | Reason: {} | Case: #{}",
            self.action_label(),
            self.reason,
            self.case_id
        )
    }
}
