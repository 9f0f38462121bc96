use crate::avito::AvitoError;
use crate::avito::models::TokenResponse;
use crate::config::Credential;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A token is treated as expired this long before its real expiry.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && now < self.expires_at - TimeDelta::seconds(REFRESH_MARGIN_SECS)
    }
}

/// Access tokens per `client_id`, refreshed with a client-credentials grant
/// whenever the cached one is missing or about to expire.
///
/// The map lock is only held for lookups and inserts. Two callers racing on
/// the same credential may both hit the token endpoint; the later write wins.
pub struct TokenCache {
    http: Client,
    token_url: String,
    entries: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCache {
    pub fn new(http: Client, token_url: impl Into<String>) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_token(&self, credential: &Credential) -> Result<String, AvitoError> {
        {
            let entries = self.entries.lock().await;
            if let Some(cached) = entries.get(&credential.client_id)
                && cached.is_fresh(Utc::now())
            {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.exchange(credential).await.inspect_err(|err| {
            warn!(
                target = "avito.auth",
                client_id = %credential.client_id,
                error = %err,
                "token_refresh_failed"
            );
        })?;
        let token = fresh.token.clone();
        self.entries
            .lock()
            .await
            .insert(credential.client_id.clone(), fresh);
        crate::metrics::token_refreshed();
        Ok(token)
    }

    pub async fn invalidate(&self, client_id: &str) {
        self.entries.lock().await.remove(client_id);
    }

    async fn exchange(&self, credential: &Credential) -> Result<CachedToken, AvitoError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(self.token_url.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|err| AvitoError::Auth(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AvitoError::Auth(format!("HTTP {}", response.status())));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| AvitoError::Auth(err.to_string()))?;
        debug!(
            target = "avito.auth",
            client_id = %credential.client_id,
            expires_in = payload.expires_in,
            "token_refreshed"
        );
        Ok(CachedToken {
            token: payload.access_token,
            expires_at: Utc::now() + TimeDelta::seconds(payload.expires_in),
        })
    }

    #[cfg(test)]
    pub(crate) async fn seed(&self, client_id: &str, token: &str, expires_at: DateTime<Utc>) {
        self.entries.lock().await.insert(
            client_id.to_string(),
            CachedToken {
                token: token.to_string(),
                expires_at,
            },
        );
    }

    #[cfg(test)]
    pub(crate) async fn cached(&self, client_id: &str) -> Option<CachedToken> {
        self.entries.lock().await.get(client_id).cloned()
    }
}
