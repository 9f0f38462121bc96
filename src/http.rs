use reqwest::Client;
use std::time::Duration;

/// Shared reqwest client for both the marketplace and the sheets APIs.
///
/// Timeouts come from `HTTP_TIMEOUT_SECS` / `HTTP_CONNECT_TIMEOUT_SECS`; they
/// are the only deadline an upstream call has besides cycle cancellation.
pub fn build_client() -> Client {
    let timeout = env_secs("HTTP_TIMEOUT_SECS", 15);
    let connect = env_secs("HTTP_CONNECT_TIMEOUT_SECS", 5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .user_agent(concat!("avito-sheets-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn env_secs(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
