//! Moderation case lifecycle
//!
//! Case identifiers, case records and their persistence, the moderation
//! service that applies and revokes restrictions, and the sweeper that lifts
//! temporary restrictions once they expire.

mod allocator;
mod clock;
mod error;
mod file_store;
mod gateway;
mod notify;
mod record;
mod service;
mod store;
mod sweeper;
#[cfg(test)]
mod testing;

pub use allocator::{CaseIdAllocator, RandomSource, ThreadRandom};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    CaseError, CaseResult, GatewayError, GatewayResult, NotifyError, StoreError, StoreResult,
};
pub use file_store::FileCaseStore;
pub use gateway::EnforcementGateway;
pub use notify::{CaseEvent, FanoutSink, NotificationSink, TracingSink};
pub use record::{Case, CaseId, CaseKind};
pub use service::{BanSummary, ModerationRequest, ModerationService, MAX_TIMEOUT_MS};
pub use store::{CaseFilter, CasePatch, CaseStore, MemoryCaseStore};
pub use sweeper::{ExpirySweeper, SweepReport, SweepRequest, SweeperHandle};

#[cfg(test)]
pub(crate) use gateway::MockEnforcementGateway;
#[cfg(test)]
pub(crate) use notify::MockNotificationSink;
