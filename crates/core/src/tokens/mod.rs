//! Token refresh orchestration.
//!
//! State machine per integration: `connected <-> refreshing -> connected | error`.

mod refresh;

use serde::{Deserialize, Serialize};

pub use refresh::TokenRefreshOrchestrator;

/// Outcome of one proactive refresh sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshBatchReport {
    pub scanned: u64,
    pub refreshed: u64,
    pub failed: u64,
    /// Integrations whose refresh lease was held by another worker.
    pub skipped: u64,
}
