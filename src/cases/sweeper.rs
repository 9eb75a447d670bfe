//! Expiry sweeper
//!
//! Background task that lifts temporary bans once they expire and closes
//! timeouts the platform has already lifted. Due cases are handled one at a
//! time. Every case is closed once per expiry even when lifting the ban
//! fails; a failure is reported, never retried.

use crate::SWEEP_TARGET;
use crate::cases::notify::deliver;
use crate::cases::{
    Case, CaseError, CaseEvent, CaseFilter, CaseKind, CasePatch, CaseResult, CaseStore, Clock,
    EnforcementGateway, GatewayError, ModerationService, NotificationSink, StoreResult,
    SystemClock,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Resolution recorded on cases closed by expiry
const EXPIRY_RESOLUTION: &str = "Temporary restriction expired";

/// Requests accepted by a running sweeper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRequest {
    /// Run a tick now instead of waiting for the timer
    SweepNow,
    /// Finish the current tick and stop
    Shutdown,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired bans and timeouts found
    pub due: usize,
    /// Bans lifted at the platform
    pub reversed: usize,
    /// Bans the platform no longer had
    pub already_absent: usize,
    /// Bans that could not be lifted; closed anyway
    pub failed: usize,
    /// Cases deleted because their guild is gone
    pub purged: usize,
    /// Expired timeouts closed
    pub timeouts_settled: usize,
    /// Cases someone else closed first
    pub lost_races: usize,
}

impl SweepReport {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.due == 0
    }
}

/// Periodically closes expired restrictions
pub struct ExpirySweeper {
    store: Arc<dyn CaseStore>,
    gateway: Arc<dyn EnforcementGateway>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn CaseStore>,
        gateway: Arc<dyn EnforcementGateway>,
        notifier: Arc<dyn NotificationSink>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            clock: Arc::new(SystemClock),
            period,
        }
    }

    /// Sweeper sharing a service's store, gateway, notifier and clock
    pub fn from_service(service: &ModerationService, period: Duration) -> Self {
        Self {
            store: service.store(),
            gateway: service.gateway(),
            notifier: service.notifier(),
            clock: service.clock(),
            period,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one sweep.
    ///
    /// # Errors
    /// `Persistence` if the due cases could not be read. Failures on
    /// individual cases are reported and counted instead.
    pub async fn tick(&self) -> CaseResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let bans = self.store.find(&CaseFilter::due(CaseKind::Ban, now)).await?;
        let timeouts = self
            .store
            .find(&CaseFilter::due(CaseKind::Timeout, now))
            .await?;
        report.due = bans.len() + timeouts.len();

        for case in bans {
            self.expire_ban(case, now, &mut report).await;
        }
        for case in timeouts {
            self.settle_timeout(case, now, &mut report).await;
        }

        Ok(report)
    }

    /// Spawn the sweeper onto the runtime.
    ///
    /// # Errors
    /// `Validation` if the period is zero.
    pub fn start(self) -> CaseResult<SweeperHandle> {
        if self.period.is_zero() {
            return Err(CaseError::validation("sweep period must be greater than zero"));
        }

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(self.run(rx));
        Ok(SweeperHandle { tx, task })
    }

    async fn run(self, mut rx: Receiver<SweepRequest>) {
        info!(
            target: SWEEP_TARGET,
            period_secs = self.period.as_secs(),
            "Starting expiry sweeper"
        );

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // A tick runs inside the loop body, so ticks never overlap and a
        // shutdown request waits for the current one to finish.
        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(SweepRequest::SweepNow) => {
                        debug!(target: SWEEP_TARGET, "Sweep requested");
                        self.run_tick().await;
                    }
                    Some(SweepRequest::Shutdown) | None => break,
                },
                _ = interval.tick() => self.run_tick().await,
            }
        }

        info!(target: SWEEP_TARGET, "Expiry sweeper stopped");
    }

    async fn run_tick(&self) {
        match self.tick().await {
            Ok(report) if report.is_empty() => {
                debug!(target: SWEEP_TARGET, "Nothing due");
            }
            Ok(report) => info!(
                target: SWEEP_TARGET,
                due = report.due,
                reversed = report.reversed,
                already_absent = report.already_absent,
                failed = report.failed,
                purged = report.purged,
                timeouts_settled = report.timeouts_settled,
                lost_races = report.lost_races,
                event = "sweep",
                "Sweep finished"
            ),
            Err(e) => error!(
                target: crate::ERROR_TARGET,
                error = %e,
                "Sweep failed, retrying next tick"
            ),
        }
    }

    async fn expire_ban(&self, case: Case, now: DateTime<Utc>, report: &mut SweepReport) {
        let reason = format!("Temporary ban expired | Case: #{}", case.case_id);
        let failure = match self
            .gateway
            .unban(case.guild_id, case.target_user_id, &reason)
            .await
        {
            Ok(()) => {
                report.reversed += 1;
                None
            }
            Err(GatewayError::NotFound) => {
                report.already_absent += 1;
                None
            }
            Err(GatewayError::GuildUnavailable(guild_id)) => {
                self.purge(&case, guild_id, report).await;
                return;
            }
            Err(e) => {
                report.failed += 1;
                error!(
                    target: crate::ERROR_TARGET,
                    case_id = %case.case_id,
                    guild_id = %case.guild_id,
                    user_id = %case.target_user_id,
                    error = %e,
                    "Failed to lift expired ban, closing case without retry"
                );
                Some(e.to_string())
            }
        };

        match self.close(&case, now).await {
            Ok(Some(closed)) => {
                info!(
                    target: SWEEP_TARGET,
                    case_id = %closed.case_id,
                    guild_id = %closed.guild_id,
                    user_id = %closed.target_user_id,
                    event = "expired",
                    "Temporary ban expired"
                );
                let event = match failure {
                    Some(error) => CaseEvent::ReversalFailed {
                        case: closed,
                        error,
                    },
                    None => CaseEvent::Expired(closed),
                };
                deliver(self.notifier.as_ref(), &event).await;
            }
            Ok(None) => report.lost_races += 1,
            Err(e) => error!(
                target: crate::ERROR_TARGET,
                case_id = %case.case_id,
                error = %e,
                "Failed to close expired ban"
            ),
        }
    }

    async fn settle_timeout(&self, case: Case, now: DateTime<Utc>, report: &mut SweepReport) {
        match self.close(&case, now).await {
            Ok(Some(closed)) => {
                report.timeouts_settled += 1;
                info!(
                    target: SWEEP_TARGET,
                    case_id = %closed.case_id,
                    guild_id = %closed.guild_id,
                    user_id = %closed.target_user_id,
                    event = "timeout_expired",
                    "Timeout expired"
                );
                deliver(self.notifier.as_ref(), &CaseEvent::TimeoutExpired(closed)).await;
            }
            Ok(None) => report.lost_races += 1,
            Err(e) => error!(
                target: crate::ERROR_TARGET,
                case_id = %case.case_id,
                error = %e,
                "Failed to close expired timeout"
            ),
        }
    }

    /// Deactivate a case if it is still active.
    ///
    /// Returns the closed case, or `None` when another writer got there first.
    async fn close(&self, case: &Case, now: DateTime<Utc>) -> StoreResult<Option<Case>> {
        let filter = CaseFilter::new().case_id(&case.case_id).active(true);
        let patch = CasePatch::deactivate(now, None, Some(EXPIRY_RESOLUTION.to_string()));

        if self.store.conditional_update(&filter, &patch).await? == 0 {
            return Ok(None);
        }

        let closed = self
            .store
            .find_one(&CaseFilter::new().case_id(&case.case_id))
            .await?
            .unwrap_or_else(|| case.clone());
        Ok(Some(closed))
    }

    async fn purge(&self, case: &Case, guild_id: u64, report: &mut SweepReport) {
        let filter = CaseFilter::new().case_id(&case.case_id).active(true);
        match self.store.delete(&filter).await {
            Ok(0) => report.lost_races += 1,
            Ok(removed) => {
                report.purged += usize::try_from(removed).unwrap_or(usize::MAX);
                warn!(
                    target: SWEEP_TARGET,
                    case_id = %case.case_id,
                    guild_id = %guild_id,
                    event = "purged",
                    "Guild unreachable, case deleted"
                );
            }
            Err(e) => error!(
                target: crate::ERROR_TARGET,
                case_id = %case.case_id,
                error = %e,
                "Failed to delete case of unreachable guild"
            ),
        }
    }
}

/// Control handle for a running sweeper
pub struct SweeperHandle {
    tx: Sender<SweepRequest>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Ask for an immediate sweep; false if the sweeper has stopped
    pub async fn sweep_now(&self) -> bool {
        self.tx.send(SweepRequest::SweepNow).await.is_ok()
    }

    /// Stop the sweeper, waiting for an in-flight tick to finish
    pub async fn stop(self) {
        if self.tx.send(SweepRequest::Shutdown).await.is_err() {
            debug!(target: SWEEP_TARGET, "Sweeper already stopped");
        }
        if let Err(e) = self.task.await {
            error!(target: crate::ERROR_TARGET, error = %e, "Sweeper task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::testing::{GUILD, RecordingSink, TARGET, t0};
    use crate::cases::{
        CaseId, GatewayResult, ManualClock, MemoryCaseStore, MockEnforcementGateway,
    };
    use mockall::predicate::{always, eq};

    const TEN_MINUTES: u64 = 600_000;

    fn seed(store: &MemoryCaseStore, n: usize, kind: CaseKind, duration_ms: Option<u64>) -> CaseId {
        let case = Case::open(
            CaseId::from_indices([n; 6], [n; 6]),
            kind,
            GUILD,
            TARGET,
            42,
            "spam",
            t0(),
            duration_ms,
        )
        .unwrap();
        let id = case.case_id.clone();
        store.insert(case).unwrap();
        id
    }

    fn sweeper(
        store: &MemoryCaseStore,
        gateway: MockEnforcementGateway,
        sink: &Arc<RecordingSink>,
        now_ms: i64,
    ) -> ExpirySweeper {
        let clock = ManualClock::new(t0() + chrono::Duration::milliseconds(now_ms));
        ExpirySweeper::new(
            Arc::new(store.clone()),
            Arc::new(gateway),
            sink.clone(),
            Duration::from_secs(60),
        )
        .with_clock(Arc::new(clock))
    }

    fn active(store: &MemoryCaseStore, id: &CaseId) -> bool {
        store
            .snapshot()
            .iter()
            .any(|c| &c.case_id == id && c.active)
    }

    #[tokio::test]
    async fn test_expired_temp_ban_is_lifted_once() {
        let store = MemoryCaseStore::new();
        let id = seed(&store, 1, CaseKind::Ban, Some(TEN_MINUTES));
        let mut gateway = MockEnforcementGateway::new();
        gateway
            .expect_unban()
            .with(eq(GUILD), eq(TARGET), always())
            .times(1)
            .returning(|_, _, _| Ok(()));
        let sink = Arc::new(RecordingSink::default());
        let sweeper = sweeper(&store, gateway, &sink, 600_001);

        let report = sweeper.tick().await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.reversed, 1);
        assert!(!active(&store, &id));

        let closed = store.snapshot().remove(0);
        assert_eq!(closed.resolved_by, None);
        assert_eq!(closed.resolution_reason.as_deref(), Some(EXPIRY_RESOLUTION));
        assert_eq!(sink.count(|e| matches!(e, CaseEvent::Expired(_))), 1);

        // Already closed: not due again, no second unban
        let again = sweeper.tick().await.unwrap();
        assert_eq!(again, SweepReport::default());
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_only_due_cases_are_selected() {
        let store = MemoryCaseStore::new();
        let perma = seed(&store, 1, CaseKind::Ban, None);
        let later = seed(&store, 2, CaseKind::Ban, Some(2 * TEN_MINUTES));
        let warn = seed(&store, 3, CaseKind::Warn, None);
        // No expectations: any gateway call fails the test
        let sink = Arc::new(RecordingSink::default());
        let sweeper = sweeper(&store, MockEnforcementGateway::new(), &sink, 600_001);

        let report = sweeper.tick().await.unwrap();
        assert!(report.is_empty());
        assert!(active(&store, &perma));
        assert!(active(&store, &later));
        assert!(store.snapshot().iter().any(|c| c.case_id == warn));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_inclusive() {
        let store = MemoryCaseStore::new();
        let id = seed(&store, 1, CaseKind::Ban, Some(TEN_MINUTES));
        let mut gateway = MockEnforcementGateway::new();
        gateway.expect_unban().times(1).returning(|_, _, _| Ok(()));
        let sink = Arc::new(RecordingSink::default());

        let early = sweeper(&store, MockEnforcementGateway::new(), &sink, 599_999);
        assert!(early.tick().await.unwrap().is_empty());
        assert!(active(&store, &id));

        let exact = sweeper(&store, gateway, &sink, 600_000);
        assert_eq!(exact.tick().await.unwrap().reversed, 1);
        assert!(!active(&store, &id));
    }

    #[tokio::test]
    async fn test_ban_already_gone_still_closes() {
        let store = MemoryCaseStore::new();
        let id = seed(&store, 1, CaseKind::Ban, Some(TEN_MINUTES));
        let mut gateway = MockEnforcementGateway::new();
        gateway
            .expect_unban()
            .times(1)
            .returning(|_, _, _| Err(GatewayError::NotFound));
        let sink = Arc::new(RecordingSink::default());

        let report = sweeper(&store, gateway, &sink, 600_001).tick().await.unwrap();
        assert_eq!(report.already_absent, 1);
        assert!(!active(&store, &id));
        assert_eq!(sink.count(|e| matches!(e, CaseEvent::Expired(_))), 1);
    }

    #[tokio::test]
    async fn test_failed_reversal_is_reported_and_not_retried() {
        let store = MemoryCaseStore::new();
        let id = seed(&store, 1, CaseKind::Ban, Some(TEN_MINUTES));
        let mut gateway = MockEnforcementGateway::new();
        gateway
            .expect_unban()
            .times(1)
            .returning(|_, _, _| Err(GatewayError::Other("Missing permissions".into())));
        let sink = Arc::new(RecordingSink::default());
        let sweeper = sweeper(&store, gateway, &sink, 600_001);

        let report = sweeper.tick().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(!active(&store, &id));
        assert_eq!(sink.count(|e| matches!(e, CaseEvent::ReversalFailed { .. })), 1);
        assert_eq!(sink.count(|e| matches!(e, CaseEvent::Expired(_))), 0);

        assert!(sweeper.tick().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_guild_purges_case() {
        let store = MemoryCaseStore::new();
        seed(&store, 1, CaseKind::Ban, Some(TEN_MINUTES));
        let mut gateway = MockEnforcementGateway::new();
        gateway
            .expect_unban()
            .times(1)
            .returning(|guild, _, _| Err(GatewayError::GuildUnavailable(guild)));
        let sink = Arc::new(RecordingSink::default());

        let report = sweeper(&store, gateway, &sink, 600_001).tick().await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(store.is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_moderator_wins_race() {
        let store = MemoryCaseStore::new();
        let id = seed(&store, 1, CaseKind::Ban, Some(TEN_MINUTES));

        // A moderator closes the case while the sweeper is lifting the ban
        let gateway = racing_gateway(&store, &id, |_| Ok(()));
        let sink = Arc::new(RecordingSink::default());

        let report = sweeper(&store, gateway, &sink, 600_001).tick().await.unwrap();
        assert_eq!(report.lost_races, 1);
        assert!(sink.events().is_empty());

        let case = store.snapshot().remove(0);
        assert_eq!(case.resolved_by, Some(7));
    }

    #[tokio::test]
    async fn test_expired_timeout_settled_without_gateway() {
        let store = MemoryCaseStore::new();
        let timeout = seed(&store, 1, CaseKind::Timeout, Some(TEN_MINUTES));
        let ban = seed(&store, 2, CaseKind::Ban, Some(TEN_MINUTES));
        let mut gateway = MockEnforcementGateway::new();
        gateway.expect_unban().times(1).returning(|_, _, _| Ok(()));
        let sink = Arc::new(RecordingSink::default());

        let report = sweeper(&store, gateway, &sink, 600_001).tick().await.unwrap();
        assert_eq!(report.due, 2);
        assert_eq!(report.timeouts_settled, 1);
        assert!(!active(&store, &timeout));
        assert!(!active(&store, &ban));
        assert_eq!(sink.count(|e| matches!(e, CaseEvent::TimeoutExpired(_))), 1);
    }

    /// Gateway whose unban closes the case as a moderator would, then answers
    /// with `outcome`
    fn racing_gateway(
        store: &MemoryCaseStore,
        id: &CaseId,
        outcome: fn(u64) -> GatewayResult<()>,
    ) -> MockEnforcementGateway {
        let racing = store.clone();
        let filter = CaseFilter::new().case_id(id).active(true);
        let patch = CasePatch::deactivate(t0(), Some(7), Some("appeal".into()));
        let mut gateway = MockEnforcementGateway::new();
        gateway.expect_unban().times(1).returning(move |guild, _, _| {
            racing.update(&filter, &patch);
            outcome(guild)
        });
        gateway
    }

    #[tokio::test]
    async fn test_failure_on_case_closed_elsewhere_is_not_reported() {
        let store = MemoryCaseStore::new();
        let id = seed(&store, 1, CaseKind::Ban, Some(TEN_MINUTES));
        let gateway = racing_gateway(&store, &id, |_| {
            Err(GatewayError::Other("Missing permissions".into()))
        });
        let sink = Arc::new(RecordingSink::default());

        let report = sweeper(&store, gateway, &sink, 600_001).tick().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.lost_races, 1);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_purge_keeps_case_closed_elsewhere() {
        let store = MemoryCaseStore::new();
        let id = seed(&store, 1, CaseKind::Ban, Some(TEN_MINUTES));
        let gateway = racing_gateway(&store, &id, |guild| {
            Err(GatewayError::GuildUnavailable(guild))
        });
        let sink = Arc::new(RecordingSink::default());

        let report = sweeper(&store, gateway, &sink, 600_001).tick().await.unwrap();
        assert_eq!(report.purged, 0);
        assert_eq!(report.lost_races, 1);

        let case = store.snapshot().remove(0);
        assert_eq!(case.resolved_by, Some(7));
    }

    #[test]
    fn test_zero_period_is_rejected() {
        let store = MemoryCaseStore::new();
        let sink = Arc::new(RecordingSink::default());
        let sweeper = ExpirySweeper::new(
            Arc::new(store),
            Arc::new(MockEnforcementGateway::new()),
            sink,
            Duration::ZERO,
        );

        assert!(matches!(sweeper.start(), Err(CaseError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_runs_until_stopped() {
        let store = MemoryCaseStore::new();
        let first = seed(&store, 1, CaseKind::Ban, Some(TEN_MINUTES));
        let mut gateway = MockEnforcementGateway::new();
        gateway.expect_unban().times(2).returning(|_, _, _| Ok(()));
        let sink = Arc::new(RecordingSink::default());

        let handle = sweeper(&store, gateway, &sink, 600_001).start().unwrap();

        // The first tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!active(&store, &first));

        let second = seed(&store, 2, CaseKind::Ban, Some(TEN_MINUTES));
        assert!(handle.sweep_now().await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!active(&store, &second));

        handle.stop().await;
        assert_eq!(sink.count(|e| matches!(e, CaseEvent::Expired(_))), 2);

        // Stopped: nothing else is processed
        let third = seed(&store, 3, CaseKind::Ban, Some(TEN_MINUTES));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(active(&store, &third));
    }
}
