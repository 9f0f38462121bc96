pub mod auth;
pub mod client;
pub mod models;

pub use auth::TokenCache;
pub use client::MetricsClient;
pub use models::{AggregateMetrics, Item, ItemMetrics};

use thiserror::Error;

/// Failure of a single marketplace call. None of them is retried in place;
/// the next scheduled cycle is the retry.
#[derive(Debug, Error)]
pub enum AvitoError {
    #[error("token exchange failed: {0}")]
    Auth(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("bad status: {0}")]
    Status(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl AvitoError {
    pub fn kind(&self) -> &'static str {
        match self {
            AvitoError::Auth(_) => "auth",
            AvitoError::Transport(_) => "transport",
            AvitoError::Status(_) => "status",
            AvitoError::Decode(_) => "decode",
        }
    }
}
