//! Webhook API.
//!
//! Receives the extraction service's completion notifications so exams
//! resolve through the push path without waiting for a poll.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::webhook_router;
pub use server::{start_webhook_server, WebhookServer};
pub use types::ApiContext;
