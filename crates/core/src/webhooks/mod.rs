//! Webhook ingestion: intake, durable queue and dispatcher.

mod dispatcher;
mod intake;
pub mod ports;
mod queue;
mod retry;
pub mod verification;

pub use dispatcher::WebhookDispatcher;
pub use intake::{IntakeOutcome, WebhookIntake};
pub use queue::WebhookQueue;
pub use retry::RetryPolicy;
