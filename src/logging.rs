use crate::cases::{Case, CaseError};
use crate::{CASE_TARGET, CONSOLE_TARGET, ERROR_TARGET};
use std::path::Path;
use tracing::{debug, error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log directory name
pub const LOG_DIR: &str = "logs";
/// Case log file name
pub const CASE_LOG_FILE: &str = "cases";

/// Initialize the logging system with console and file outputs
pub fn init(log_dir: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let log_dir = log_dir.as_ref();
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    // Daily rotation, JSON lines
    let case_file = RollingFileAppender::new(Rotation::DAILY, log_dir, CASE_LOG_FILE);

    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    let case_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(case_file);

    // Default to INFO, keep serenity's HTTP chatter out
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info").add_directive("serenity=error".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(case_layer)
        .try_init()?;

    info!("Logging system initialized");
    Ok(())
}

/// Log a newly recorded case
pub fn log_case_opened(case: &Case) {
    info!(
        target: CASE_TARGET,
        case_id = %case.case_id,
        kind = %case.kind,
        guild_id = %case.guild_id,
        user_id = %case.target_user_id,
        moderator_id = %case.moderator_id,
        duration_ms = ?case.duration_ms,
        expires_at = ?case.expires_at,
        event = "opened",
        "Case opened"
    );
}

/// Log a restriction lifted by a moderator
pub fn log_case_revoked(case: &Case, moderator_id: u64) {
    info!(
        target: CASE_TARGET,
        case_id = %case.case_id,
        kind = %case.kind,
        guild_id = %case.guild_id,
        user_id = %case.target_user_id,
        moderator_id = %moderator_id,
        event = "revoked",
        "Case revoked"
    );
}

/// Log a failed moderation operation.
///
/// Input errors are expected traffic and only show up at debug level.
pub fn log_case_error(operation: &str, err: &CaseError) {
    if err.is_user_facing() {
        debug!(
            target: CASE_TARGET,
            operation = %operation,
            error = %err,
            "Moderation request rejected"
        );
    } else {
        error!(
            target: ERROR_TARGET,
            operation = %operation,
            error = %err,
            "Moderation operation failed"
        );
    }
}

pub fn log_console(message: String) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}
