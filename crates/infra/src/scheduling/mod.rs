//! Scheduling infrastructure for the periodic OrgSync jobs.
//!
//! A single cron scheduler drives token refresh, webhook dispatch, webhook
//! cleanup, channel renewal and the optional sync sweep. Job failures are
//! logged and counted; they never stop the scheduler.

pub mod cron_scheduler;
pub mod error;
pub mod jobs;

pub use cron_scheduler::{CronScheduler, CronSchedulerConfig, JobStats};
pub use error::{SchedulerError, SchedulerResult};
pub use jobs::{
    ScheduledJob, SyncSweepJob, TokenRefreshJob, WebhookCleanupJob, WebhookDispatchJob,
    WebhookRenewalJob,
};
