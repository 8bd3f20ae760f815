pub mod breaker;
pub mod consumer;
pub mod dead_letter;
pub mod dispatch;
pub mod error;
pub mod idempotency;
pub mod render;
pub mod retry;
pub mod status;
