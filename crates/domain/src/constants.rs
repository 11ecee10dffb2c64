//! Application constants
//!
//! Centralized location for domain-level constants used throughout the
//! application.

// Token refresh
pub const TOKEN_REFRESH_BUFFER_SECS: i64 = 300;
pub const REFRESH_LEASE_TTL_SECS: i64 = 60;

// Webhook queue
pub const WEBHOOK_MAX_RETRIES: u32 = 5;
pub const WEBHOOK_RETRY_DELAY_SECS: u64 = 30;
pub const WEBHOOK_MAX_RETRY_DELAY_SECS: u64 = 3600;
pub const WEBHOOK_COMPLETED_RETENTION_DAYS: i64 = 7;
pub const WEBHOOK_DISPATCH_BATCH_SIZE: usize = 50;
pub const WEBHOOK_STALE_PROCESSING_SECS: i64 = 600;

// Sender verification replay windows
pub const WEBHOOK_MIN_REPLAY_WINDOW_SECS: i64 = 60;
pub const WEBHOOK_MAX_REPLAY_WINDOW_SECS: i64 = 300;

// Sync engine
pub const CALENDAR_LOOKBACK_DAYS: i64 = 90;
pub const SYNC_PAGE_SIZE: u32 = 250;
pub const SYNC_LEASE_TTL_SECS: i64 = 600;

// Webhook channel renewal
pub const WEBHOOK_RENEWAL_WINDOW_SECS: i64 = 24 * 60 * 60;

// OAuth state
pub const OAUTH_STATE_TTL_SECS: i64 = 600;
pub const OAUTH_STATE_NONCE_BYTES: usize = 16;
