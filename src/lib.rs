pub mod cases;
pub mod config;
pub mod discord;
pub mod duration;
pub mod logging;

// Logging targets
pub const CASE_TARGET: &str = "case_ledger::case";
pub const SWEEP_TARGET: &str = "case_ledger::sweep";
pub const ERROR_TARGET: &str = "case_ledger::error";
pub const CONSOLE_TARGET: &str = "case_ledger";

pub use cases::{
    Case, CaseError, CaseEvent, CaseId, CaseKind, CaseResult, CaseStore, ExpirySweeper,
    ModerationRequest, ModerationService, SweeperHandle,
};
pub use config::Config;
pub type Error = Box<dyn std::error::Error + Send + Sync>;
