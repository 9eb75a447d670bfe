//! Moderation service
//!
//! Applies bans, timeouts and warnings, records them as cases, and lifts
//! restrictions on request. Every change to `active` goes through a
//! conditional store update so a moderator and the expiry sweeper can race
//! on the same case without both "winning".

use crate::cases::notify::deliver;
use crate::cases::{
    Case, CaseError, CaseEvent, CaseFilter, CaseId, CaseIdAllocator, CaseKind, CasePatch,
    CaseResult, CaseStore, Clock, EnforcementGateway, GatewayError, NotificationSink,
    RandomSource, StoreError, SystemClock, ThreadRandom,
};
use crate::logging;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Longest timeout the platform accepts (28 days)
pub const MAX_TIMEOUT_MS: u64 = 28 * 24 * 60 * 60 * 1000;

/// A moderator's request to act against a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationRequest {
    pub guild_id: u64,
    pub target_user_id: u64,
    pub moderator_id: u64,
    pub reason: String,
    /// Requested length in milliseconds, as entered
    pub duration_ms: Option<i64>,
}

impl ModerationRequest {
    pub fn new(
        guild_id: u64,
        target_user_id: u64,
        moderator_id: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            guild_id,
            target_user_id,
            moderator_id,
            reason: reason.into(),
            duration_ms: None,
        }
    }

    #[must_use]
    pub const fn for_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Ban counts for one user in a guild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanSummary {
    pub user_id: u64,
    pub total: usize,
    pub active: usize,
}

/// Orchestrates moderation actions and their cases
#[derive(Clone)]
pub struct ModerationService {
    store: Arc<dyn CaseStore>,
    allocator: CaseIdAllocator,
    gateway: Arc<dyn EnforcementGateway>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl ModerationService {
    /// Create a service using the wall clock and the thread RNG
    pub fn new(
        store: Arc<dyn CaseStore>,
        gateway: Arc<dyn EnforcementGateway>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            allocator: CaseIdAllocator::new(store.clone(), Arc::new(ThreadRandom)),
            store,
            gateway,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.allocator = CaseIdAllocator::new(self.store.clone(), random);
        self
    }

    pub(crate) fn store(&self) -> Arc<dyn CaseStore> {
        self.store.clone()
    }

    pub(crate) fn gateway(&self) -> Arc<dyn EnforcementGateway> {
        self.gateway.clone()
    }

    pub(crate) fn notifier(&self) -> Arc<dyn NotificationSink> {
        self.notifier.clone()
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Ban a user until the requested duration has passed.
    ///
    /// # Errors
    /// `Validation` if the duration is missing or not positive, `Enforcement`
    /// if the ban could not be applied (nothing is recorded), `Persistence`
    /// if the case could not be stored.
    pub async fn temp_ban(&self, request: ModerationRequest) -> CaseResult<Case> {
        let result = async {
            let duration = positive_duration(request.duration_ms, "temporary ban")?;
            self.open_case(&request, CaseKind::Ban, Some(duration)).await
        }
        .await;
        result.inspect_err(|e| logging::log_case_error("temp_ban", e))
    }

    /// Ban a user with no expiry.
    ///
    /// # Errors
    /// Same as [`Self::temp_ban`]; a duration on the request is a validation
    /// error.
    pub async fn perma_ban(&self, request: ModerationRequest) -> CaseResult<Case> {
        let result = async {
            if request.duration_ms.is_some() {
                return Err(CaseError::validation("a permanent ban cannot have a duration"));
            }
            self.open_case(&request, CaseKind::Ban, None).await
        }
        .await;
        result.inspect_err(|e| logging::log_case_error("perma_ban", e))
    }

    /// Time a member out for the requested duration, at most 28 days.
    ///
    /// # Errors
    /// Same as [`Self::temp_ban`].
    pub async fn timeout(&self, request: ModerationRequest) -> CaseResult<Case> {
        let result = async {
            let duration = positive_duration(request.duration_ms, "timeout")?;
            if duration > MAX_TIMEOUT_MS {
                return Err(CaseError::validation("a timeout cannot exceed 28 days"));
            }
            self.open_case(&request, CaseKind::Timeout, Some(duration)).await
        }
        .await;
        result.inspect_err(|e| logging::log_case_error("timeout", e))
    }

    /// Record a warning. No restriction is applied.
    ///
    /// # Errors
    /// `Validation` if a duration is given, `Persistence` if the case could
    /// not be stored.
    pub async fn warn(&self, request: ModerationRequest) -> CaseResult<Case> {
        let result = async {
            if request.duration_ms.is_some() {
                return Err(CaseError::validation("a warning cannot have a duration"));
            }
            self.open_case(&request, CaseKind::Warn, None).await
        }
        .await;
        result.inspect_err(|e| logging::log_case_error("warn", e))
    }

    /// Lift an active ban.
    ///
    /// A ban already gone at the platform still closes the case.
    ///
    /// # Errors
    /// `NotFound` if the guild has no active ban with this id, including when
    /// it was already lifted; `Enforcement` if the platform refused.
    pub async fn unban(
        &self,
        case_id: &str,
        guild_id: u64,
        moderator_id: u64,
        reason: &str,
    ) -> CaseResult<Case> {
        self.revoke(CaseKind::Ban, case_id, guild_id, moderator_id, reason)
            .await
            .inspect_err(|e| logging::log_case_error("unban", e))
    }

    /// Lift an active timeout early.
    ///
    /// # Errors
    /// Same as [`Self::unban`].
    pub async fn remove_timeout(
        &self,
        case_id: &str,
        guild_id: u64,
        moderator_id: u64,
        reason: &str,
    ) -> CaseResult<Case> {
        self.revoke(CaseKind::Timeout, case_id, guild_id, moderator_id, reason)
            .await
            .inspect_err(|e| logging::log_case_error("remove_timeout", e))
    }

    /// All ban cases of a guild, active and historical, oldest first.
    ///
    /// # Errors
    /// `Persistence` if the store is unavailable.
    pub async fn list_bans(&self, guild_id: u64) -> CaseResult<Vec<Case>> {
        let filter = CaseFilter::new().guild(guild_id).kind(CaseKind::Ban);
        Ok(self.store.find(&filter).await?)
    }

    /// Ban history of one user in a guild, newest first.
    ///
    /// # Errors
    /// `Persistence` if the store is unavailable.
    pub async fn ban_history(&self, guild_id: u64, user_id: u64) -> CaseResult<Vec<Case>> {
        let filter = CaseFilter::new()
            .guild(guild_id)
            .target(user_id)
            .kind(CaseKind::Ban);
        let mut cases = self.store.find(&filter).await?;
        cases.reverse();
        Ok(cases)
    }

    /// Ban counts per user in a guild, ordered by user id.
    ///
    /// # Errors
    /// `Persistence` if the store is unavailable.
    pub async fn ban_summary(&self, guild_id: u64) -> CaseResult<Vec<BanSummary>> {
        let mut by_user: BTreeMap<u64, BanSummary> = BTreeMap::new();
        for case in self.list_bans(guild_id).await? {
            let entry = by_user.entry(case.target_user_id).or_insert(BanSummary {
                user_id: case.target_user_id,
                total: 0,
                active: 0,
            });
            entry.total += 1;
            entry.active += usize::from(case.active);
        }
        Ok(by_user.into_values().collect())
    }

    /// Warnings of one user in a guild, oldest first.
    ///
    /// # Errors
    /// `Persistence` if the store is unavailable.
    pub async fn list_warns(&self, guild_id: u64, user_id: u64) -> CaseResult<Vec<Case>> {
        let filter = CaseFilter::new()
            .guild(guild_id)
            .target(user_id)
            .kind(CaseKind::Warn);
        Ok(self.store.find(&filter).await?)
    }

    /// Look up any case of a guild by id, whatever its state.
    ///
    /// # Errors
    /// `NotFound` for an unknown or malformed id.
    pub async fn case(&self, guild_id: u64, case_id: &str) -> CaseResult<Case> {
        let id = parse_case_id(case_id)?;
        self.store
            .find_one(&CaseFilter::new().case_id(&id).guild(guild_id))
            .await?
            .ok_or_else(|| CaseError::NotFound(format!("#{id}")))
    }

    async fn open_case(
        &self,
        request: &ModerationRequest,
        kind: CaseKind,
        duration_ms: Option<u64>,
    ) -> CaseResult<Case> {
        let case_id = self.allocator.allocate().await?;
        let mut case = Case::open(
            case_id,
            kind,
            request.guild_id,
            request.target_user_id,
            request.moderator_id,
            request.reason.clone(),
            self.clock.now(),
            duration_ms,
        )?;

        self.enforce(&case).await.map_err(CaseError::Enforcement)?;

        // The existence check and the write are not atomic; the store has
        // the final say on uniqueness, so a clash gets one fresh id.
        let stored = match self.store.create(case.clone()).await {
            Err(StoreError::DuplicateCaseId(taken)) => {
                warn!(
                    target: crate::CASE_TARGET,
                    case_id = %taken,
                    "Case id taken at write time, allocating a new one"
                );
                match self.allocator.allocate().await {
                    Ok(fresh) => {
                        case.case_id = fresh;
                        self.store.create(case.clone()).await
                    }
                    Err(e) => Err(e),
                }
            }
            other => other,
        };

        if let Err(e) = stored {
            self.compensate(&case).await;
            return Err(e.into());
        }

        logging::log_case_opened(&case);
        deliver(self.notifier.as_ref(), &CaseEvent::Opened(case.clone())).await;
        Ok(case)
    }

    async fn enforce(&self, case: &Case) -> Result<(), GatewayError> {
        let reason = case.audit_reason();
        match (case.kind, case.expires_at) {
            (CaseKind::Ban, _) => {
                self.gateway
                    .ban(case.guild_id, case.target_user_id, &reason)
                    .await
            }
            (CaseKind::Timeout, Some(until)) => {
                self.gateway
                    .timeout(case.guild_id, case.target_user_id, until, &reason)
                    .await
            }
            (CaseKind::Timeout, None) => Err(GatewayError::Other(
                "timeout case without an expiry".to_string(),
            )),
            (CaseKind::Warn, _) => Ok(()),
        }
    }

    /// Undo a restriction whose case could not be stored
    async fn compensate(&self, case: &Case) {
        let reason = format!("Case #{} could not be recorded", case.case_id);
        let result = match case.kind {
            CaseKind::Ban => {
                self.gateway
                    .unban(case.guild_id, case.target_user_id, &reason)
                    .await
            }
            CaseKind::Timeout => {
                self.gateway
                    .remove_timeout(case.guild_id, case.target_user_id, &reason)
                    .await
            }
            CaseKind::Warn => return,
        };

        match result {
            Ok(()) | Err(GatewayError::NotFound) => info!(
                target: crate::CASE_TARGET,
                case_id = %case.case_id,
                "Reverted restriction after failed case write"
            ),
            Err(e) => error!(
                target: crate::ERROR_TARGET,
                case_id = %case.case_id,
                guild_id = %case.guild_id,
                user_id = %case.target_user_id,
                error = %e,
                "Restriction applied but neither recorded nor reverted"
            ),
        }
    }

    async fn revoke(
        &self,
        kind: CaseKind,
        case_id: &str,
        guild_id: u64,
        moderator_id: u64,
        reason: &str,
    ) -> CaseResult<Case> {
        let id = parse_case_id(case_id)?;
        let filter = CaseFilter::new()
            .case_id(&id)
            .guild(guild_id)
            .kind(kind)
            .active(true);

        let Some(case) = self.store.find_one(&filter).await? else {
            return Err(CaseError::NotFound(format!("#{id}")));
        };

        let lifted = match kind {
            CaseKind::Timeout => {
                self.gateway
                    .remove_timeout(guild_id, case.target_user_id, reason)
                    .await
            }
            _ => self.gateway.unban(guild_id, case.target_user_id, reason).await,
        };
        match lifted {
            Ok(()) => {}
            Err(GatewayError::NotFound) => info!(
                target: crate::CASE_TARGET,
                case_id = %id,
                "Restriction already gone at the platform, closing case"
            ),
            Err(e) => return Err(CaseError::Enforcement(e)),
        }

        let patch = CasePatch::deactivate(
            self.clock.now(),
            Some(moderator_id),
            Some(reason.to_string()),
        );
        if self.store.conditional_update(&filter, &patch).await? == 0 {
            // Someone else closed it between our read and our write
            return Err(CaseError::NotFound(format!("#{id}")));
        }

        let resolved = self
            .store
            .find_one(&CaseFilter::new().case_id(&id))
            .await?
            .unwrap_or(case);

        logging::log_case_revoked(&resolved, moderator_id);
        let event = CaseEvent::Revoked {
            case: resolved.clone(),
            moderator_id,
            reason: reason.to_string(),
        };
        deliver(self.notifier.as_ref(), &event).await;
        Ok(resolved)
    }
}

fn parse_case_id(input: &str) -> CaseResult<CaseId> {
    CaseId::parse(input).ok_or_else(|| CaseError::NotFound(input.to_string()))
}

fn positive_duration(duration_ms: Option<i64>, action: &str) -> CaseResult<u64> {
    match duration_ms {
        None => Err(CaseError::validation(format!("a {action} requires a duration"))),
        Some(ms) if ms <= 0 => Err(CaseError::validation(format!(
            "a {action} requires a positive duration, got {ms}ms"
        ))),
        Some(ms) => u64::try_from(ms).map_err(|_| CaseError::validation("invalid duration")),
    }
}
