pub mod stats;
pub mod supervisor;

pub use stats::{SessionStats, SessionStatsSnapshot};
pub use supervisor::{AriTransfer, NoopToolHandler, Outcome, SessionConfig, ToolHandler, run_session};
