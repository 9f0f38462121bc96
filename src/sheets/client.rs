use crate::sheets::{Grid, SheetSink, SheetsError, TokenSource};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;
use urlencoding::encode;

pub const SHEETS_API_ROOT: &str = "https://sheets.googleapis.com";
const VALUE_INPUT_OPTION: &str = "RAW";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: &'a Grid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest<'a> {
    value_input_option: &'static str,
    data: Vec<ValueRange<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchClearRequest<'a> {
    ranges: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Grid,
}

/// Google Sheets v4 values API bound to one spreadsheet.
pub struct SheetsClient {
    http: Client,
    api_root: String,
    spreadsheet_id: String,
    auth: Arc<dyn TokenSource>,
}

impl SheetsClient {
    pub fn new(
        http: Client,
        spreadsheet_id: impl Into<String>,
        auth: Arc<dyn TokenSource>,
    ) -> Self {
        Self::with_api_root(http, SHEETS_API_ROOT, spreadsheet_id, auth)
    }

    pub fn with_api_root(
        http: Client,
        api_root: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        auth: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            api_root: api_root.into().trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            auth,
        }
    }

    fn values_url(&self, suffix: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values{}",
            self.api_root,
            encode(&self.spreadsheet_id),
            suffix
        )
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, SheetsError> {
        let token = self.auth.access_token().await?;
        Ok(request.bearer_auth(token))
    }
}

#[async_trait]
impl SheetSink for SheetsClient {
    async fn update_range(&self, range: &str, values: Grid) -> Result<(), SheetsError> {
        let url = self.values_url(&format!("/{}", encode(range)));
        let body = ValueRange {
            range,
            major_dimension: "ROWS",
            values: &values,
        };
        let request = self
            .authorized(
                self.http
                    .put(url)
                    .query(&[("valueInputOption", VALUE_INPUT_OPTION)])
                    .json(&body),
            )
            .await?;
        send(request).await?;
        debug!(target = "avito.sheets", range, rows = values.len(), "range_updated");
        Ok(())
    }

    async fn batch_update(&self, data: BTreeMap<String, Grid>) -> Result<(), SheetsError> {
        // The API ignores empty value ranges instead of blanking them, so
        // empty grids go through batchClear.
        let (clears, writes): (Vec<_>, Vec<_>) =
            data.iter().partition(|(_, values)| values.is_empty());

        if !writes.is_empty() {
            let body = BatchUpdateRequest {
                value_input_option: VALUE_INPUT_OPTION,
                data: writes
                    .iter()
                    .map(|&(range, values)| ValueRange {
                        range: range.as_str(),
                        major_dimension: "ROWS",
                        values,
                    })
                    .collect(),
            };
            let request = self
                .authorized(self.http.post(self.values_url(":batchUpdate")).json(&body))
                .await?;
            send(request).await?;
        }

        if !clears.is_empty() {
            let body = BatchClearRequest {
                ranges: clears.iter().map(|&(range, _)| range.as_str()).collect(),
            };
            let request = self
                .authorized(self.http.post(self.values_url(":batchClear")).json(&body))
                .await?;
            send(request).await?;
        }

        debug!(
            target = "avito.sheets",
            written = writes.len(),
            cleared = clears.len(),
            "batch_updated"
        );
        Ok(())
    }

    async fn read_range(&self, range: &str) -> Result<Grid, SheetsError> {
        let url = self.values_url(&format!("/{}", encode(range)));
        let request = self.authorized(self.http.get(url)).await?;
        let payload: ValueRangeResponse = send_json(request).await?;
        Ok(payload.values)
    }
}

async fn send(request: RequestBuilder) -> Result<reqwest::Response, SheetsError> {
    let response = request
        .send()
        .await
        .map_err(|err| SheetsError::Transport(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(SheetsError::Status(status.to_string()));
    }
    Ok(response)
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, SheetsError> {
    send(request)
        .await?
        .json::<T>()
        .await
        .map_err(|err| SheetsError::Decode(err.to_string()))
}
