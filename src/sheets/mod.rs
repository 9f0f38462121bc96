pub mod auth;
pub mod client;

pub use auth::{ServiceAccountAuth, TokenSource};
pub use client::SheetsClient;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Row-major cell values as the Sheets API exchanges them.
pub type Grid = Vec<Vec<Value>>;

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("service account unusable: {0}")]
    Credentials(String),
    #[error("sheets auth failed: {0}")]
    Auth(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("bad status: {0}")]
    Status(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Reporting destination. Values are written verbatim (no formula parsing).
#[async_trait]
pub trait SheetSink: Send + Sync {
    async fn update_range(&self, range: &str, values: Grid) -> Result<(), SheetsError>;

    /// Writes several ranges in one call; an empty grid clears its range.
    async fn batch_update(&self, data: BTreeMap<String, Grid>) -> Result<(), SheetsError>;

    async fn read_range(&self, range: &str) -> Result<Grid, SheetsError>;
}
