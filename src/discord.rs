//! Discord adapters
//!
//! Enforcement and notification over serenity's HTTP client. No gateway
//! connection is needed for either.

use crate::cases::{
    CaseEvent, EnforcementGateway, GatewayError, GatewayResult, NotificationSink, NotifyError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, EditMember, GuildId, Http, UserId};
use serenity::http::HttpError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Unknown Guild
const UNKNOWN_GUILD: isize = 10004;
/// Unknown Member
const UNKNOWN_MEMBER: isize = 10007;
/// Unknown Ban
const UNKNOWN_BAN: isize = 10026;

/// Discord's message length limit
const MAX_MESSAGE_LEN: usize = 2000;

/// Gateway error for a Discord JSON error code, if the code has a meaning
/// of its own
fn error_for_code(code: isize, guild_id: u64) -> Option<GatewayError> {
    match code {
        UNKNOWN_BAN | UNKNOWN_MEMBER => Some(GatewayError::NotFound),
        UNKNOWN_GUILD => Some(GatewayError::GuildUnavailable(guild_id)),
        _ => None,
    }
}

fn map_error(err: serenity::Error, guild_id: u64) -> GatewayError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &err {
        if let Some(mapped) = error_for_code(response.error.code, guild_id) {
            return mapped;
        }
    }
    GatewayError::Discord(Box::new(err))
}

/// Applies restrictions through the Discord REST API
#[derive(Clone)]
pub struct SerenityGateway {
    http: Arc<Http>,
}

impl SerenityGateway {
    #[must_use]
    pub const fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl EnforcementGateway for SerenityGateway {
    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> GatewayResult<()> {
        GuildId::new(guild_id)
            .ban_with_reason(&*self.http, UserId::new(user_id), 0, reason)
            .await
            .map_err(|e| map_error(e, guild_id))?;

        info!("Banned user {user_id} in guild {guild_id}");
        Ok(())
    }

    async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> GatewayResult<()> {
        self.http
            .remove_ban(GuildId::new(guild_id), UserId::new(user_id), Some(reason))
            .await
            .map_err(|e| map_error(e, guild_id))?;

        info!("Unbanned user {user_id} in guild {guild_id}");
        Ok(())
    }

    async fn timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> GatewayResult<()> {
        let builder = EditMember::new()
            .disable_communication_until_datetime(until.into())
            .audit_log_reason(reason);

        GuildId::new(guild_id)
            .edit_member(&*self.http, UserId::new(user_id), builder)
            .await
            .map_err(|e| map_error(e, guild_id))?;

        info!("Timed out user {user_id} in guild {guild_id} until {until}");
        Ok(())
    }

    async fn remove_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> GatewayResult<()> {
        let builder = EditMember::new()
            .enable_communication()
            .audit_log_reason(reason);

        GuildId::new(guild_id)
            .edit_member(&*self.http, UserId::new(user_id), builder)
            .await
            .map_err(|e| map_error(e, guild_id))?;

        info!("Removed timeout of user {user_id} in guild {guild_id}");
        Ok(())
    }
}

/// Posts case events to each guild's moderation log channel
#[derive(Clone)]
pub struct ChannelNotifier {
    http: Arc<Http>,
    /// Guild id to log channel id
    channels: HashMap<u64, u64>,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>, channels: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            http,
            channels: channels.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn channel_for(&self, guild_id: u64) -> Option<u64> {
        self.channels.get(&guild_id).copied()
    }
}

#[async_trait]
impl NotificationSink for ChannelNotifier {
    async fn report(&self, event: &CaseEvent) -> Result<(), NotifyError> {
        let guild_id = event.case().guild_id;
        let Some(channel_id) = self.channel_for(guild_id) else {
            debug!("No log channel configured for guild {guild_id}");
            return Ok(());
        };

        ChannelId::new(channel_id)
            .say(&*self.http, truncate(event.render()))
            .await
            .map_err(|e| NotifyError(format!("Failed to post to channel {channel_id}: {e}")))?;
        Ok(())
    }
}

fn truncate(mut message: String) -> String {
    if message.chars().count() > MAX_MESSAGE_LEN {
        message = message.chars().take(MAX_MESSAGE_LEN - 1).collect();
        message.push('…');
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert!(matches!(error_for_code(10026, 1), Some(GatewayError::NotFound)));
        assert!(matches!(error_for_code(10007, 1), Some(GatewayError::NotFound)));
        assert!(matches!(
            error_for_code(10004, 67890),
            Some(GatewayError::GuildUnavailable(67890))
        ));
        // Missing Permissions stays a Discord error
        assert!(error_for_code(50013, 1).is_none());
    }

    #[test]
    fn test_other_errors_stay_discord_errors() {
        let err = map_error(serenity::Error::Other("boom"), 1);
        assert!(matches!(err, GatewayError::Discord(_)));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short".to_string()), "short");

        let long = truncate("x".repeat(MAX_MESSAGE_LEN + 50));
        assert_eq!(long.chars().count(), MAX_MESSAGE_LEN);
        assert!(long.ends_with('…'));
    }

    #[tokio::test]
    async fn test_unconfigured_guild_is_skipped() {
        use crate::cases::{Case, CaseId, CaseKind};

        let http = Arc::new(Http::new("token"));
        let notifier = ChannelNotifier::new(http, [(1, 100)]);
        let case = Case::open(
            CaseId::parse("PL-AAAAAA-BBBBBB").unwrap(),
            CaseKind::Warn,
            2,
            3,
            4,
            "rude",
            Utc::now(),
            None,
        )
        .unwrap();

        assert_eq!(notifier.channel_for(1), Some(100));
        assert!(notifier.report(&CaseEvent::Opened(case)).await.is_ok());
    }
}
