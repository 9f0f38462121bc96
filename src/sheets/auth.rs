use crate::sheets::SheetsError;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;
use yup_oauth2::{
    ServiceAccountAuthenticator, ServiceAccountKey, authenticator::DefaultAuthenticator,
};

pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Bearer tokens for the Sheets API.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, SheetsError>;
}

/// Service-account credentials. Token exchange, caching and refresh before
/// expiry are done by the authenticator.
pub struct ServiceAccountAuth {
    account: String,
    authenticator: DefaultAuthenticator,
}

impl ServiceAccountAuth {
    pub async fn from_file(path: &Path) -> Result<Self, SheetsError> {
        let key = yup_oauth2::read_service_account_key(path)
            .await
            .map_err(|err| {
                SheetsError::Credentials(format!("unable to read {}: {err}", path.display()))
            })?;
        Self::from_key(key).await
    }

    pub async fn from_key(key: ServiceAccountKey) -> Result<Self, SheetsError> {
        let account = key.client_email.clone();
        let authenticator = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|err| SheetsError::Credentials(err.to_string()))?;
        Ok(Self {
            account,
            authenticator,
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String, SheetsError> {
        let token = self
            .authenticator
            .token(&[SPREADSHEETS_SCOPE])
            .await
            .map_err(|err| SheetsError::Auth(err.to_string()))?;
        debug!(target = "avito.sheets", account = %self.account, "sheets_token_ready");
        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| SheetsError::Auth("token response without access_token".into()))
    }
}
