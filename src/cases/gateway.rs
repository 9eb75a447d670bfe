//! Enforcement gateway
//!
//! The boundary to the platform that actually applies restrictions. The
//! moderation service and the sweeper only ever talk to it through this
//! trait; `crate::discord::SerenityGateway` is the production implementation.

use crate::cases::GatewayResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Applies and lifts restrictions at the platform.
///
/// Implementations must return `GatewayError::NotFound` when the restriction
/// being lifted no longer exists, and `GatewayError::GuildUnavailable` when
/// the guild itself can no longer be reached.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnforcementGateway: Send + Sync {
    /// Ban a user from a guild
    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> GatewayResult<()>;

    /// Lift a ban
    async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> GatewayResult<()>;

    /// Time a member out until `until`
    async fn timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> GatewayResult<()>;

    /// Lift a timeout early
    async fn remove_timeout(&self, guild_id: u64, user_id: u64, reason: &str)
    -> GatewayResult<()>;
}
