//! Shared application state for the Axum API server.

use courier_common::config::AppConfig;
use redis::aio::ConnectionManager;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub redis: ConnectionManager,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(redis: ConnectionManager, config: AppConfig) -> Self {
        Self { redis, config }
    }
}
