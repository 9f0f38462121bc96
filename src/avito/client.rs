use crate::avito::models::{
    AggregateMetrics, Grouping, Item, ItemMetrics, ItemsPage, MetricsRequest, MetricsResponse,
    PromotionsRequest, PromotionsResponse, metric_map,
};
use crate::avito::{AvitoError, TokenCache};
use crate::config::{Credential, Urls};
use chrono::{FixedOffset, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tracing::{debug, info, warn};

/// Listing page size; a shorter page ends pagination.
pub const PAGE_SIZE: usize = 100;
/// Upper bound of item ids per promotions request.
pub const BID_BATCH_SIZE: usize = 200;
const METRICS_LIMIT: u32 = 1000;

const TOTALS_METRICS: &[&str] = &[
    "views",
    "contacts",
    "impressions",
    "spending",
    "clickPackages",
    "impressionsToViewsConversion",
    "viewsToContactsConversion",
];
const ITEM_METRICS: &[&str] = &["views", "contacts", "impressions", "spending"];

pub struct MetricsClient {
    http: Client,
    tokens: Arc<TokenCache>,
    metrics_url: String,
    api_base_url: String,
    offset: FixedOffset,
}

impl MetricsClient {
    pub fn new(http: Client, tokens: Arc<TokenCache>, urls: &Urls, offset: FixedOffset) -> Self {
        Self {
            http,
            tokens,
            metrics_url: urls.metrics_url.trim_end_matches('/').to_string(),
            api_base_url: urls.api_base_url.trim_end_matches('/').to_string(),
            offset,
        }
    }

    /// Today's totals for one account.
    pub async fn aggregate_metrics(
        &self,
        user_id: i64,
        credential: &Credential,
    ) -> Result<AggregateMetrics, AvitoError> {
        let token = self.tokens.get_token(credential).await?;
        let started = Instant::now();
        let response = self
            .post_metrics(user_id, &token, "totals", TOTALS_METRICS)
            .await;
        let response = self.forget_rejected(credential, response).await?;
        crate::metrics::stage_elapsed("aggregate_metrics", started.elapsed());
        Ok(AggregateMetrics::from_metric_map(&metric_map(
            &response.result.groupings,
        )))
    }

    /// Every active listing joined with today's metrics and its manual bid.
    ///
    /// Any failing stage fails the whole call; no partial list is returned.
    pub async fn item_metrics(
        &self,
        user_id: i64,
        credential: &Credential,
    ) -> Result<Vec<ItemMetrics>, AvitoError> {
        let token = self.tokens.get_token(credential).await?;
        let items = self.collect_items(user_id, &token).await;
        self.forget_rejected(credential, items).await
    }

    /// A 401 means the cached token was revoked before its expiry; dropping it
    /// makes the next call exchange a new one.
    async fn forget_rejected<T>(
        &self,
        credential: &Credential,
        result: Result<T, AvitoError>,
    ) -> Result<T, AvitoError> {
        if let Err(AvitoError::Status(status)) = &result
            && status.starts_with("401")
        {
            warn!(target = "avito.client", client_id = %credential.client_id, "token_rejected");
            self.tokens.invalidate(&credential.client_id).await;
        }
        result
    }

    async fn collect_items(
        &self,
        user_id: i64,
        token: &str,
    ) -> Result<Vec<ItemMetrics>, AvitoError> {
        let started = Instant::now();
        let items = self.list_items(token).await?;
        crate::metrics::stage_elapsed("list_items", started.elapsed());
        info!(target = "avito.client", user_id, total = items.len(), "items_listed");
        if items.is_empty() {
            warn!(target = "avito.client", user_id, "no_active_items");
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let groupings = self
            .post_metrics(user_id, token, "item", ITEM_METRICS)
            .await?
            .result
            .groupings;
        crate::metrics::stage_elapsed("item_metrics", started.elapsed());

        let started = Instant::now();
        let ids: Vec<i64> = items.iter().map(|item| item.id).collect();
        let bids = self.fetch_bids(token, &ids).await?;
        crate::metrics::stage_elapsed("fetch_bids", started.elapsed());

        let joined = join_items(&items, &groupings, &bids);
        if !joined.missing.is_empty() {
            crate::metrics::join_misses(joined.missing.len());
            info!(
                target = "avito.client",
                user_id,
                missing = joined.missing.len(),
                "items_without_metrics"
            );
        }
        Ok(joined.items)
    }

    async fn list_items(&self, token: &str) -> Result<Vec<Item>, AvitoError> {
        let url = format!("{}/core/v1/items", self.api_base_url);
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let request = self
                .http
                .get(&url)
                .bearer_auth(token)
                .query(&[
                    ("status", "active".to_string()),
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ]);
            let payload: ItemsPage = send_json(request).await.inspect_err(|err| {
                warn!(target = "avito.client", page, error = %err, "items_page_failed");
            })?;
            let fetched = payload.resources.len();
            debug!(target = "avito.client", page, count = fetched, "items_page_fetched");
            items.extend(payload.resources);
            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    async fn fetch_bids(&self, token: &str, ids: &[i64]) -> Result<HashMap<i64, i64>, AvitoError> {
        let url = format!("{}/cpxpromo/1/getPromotionsByItemIds", self.api_base_url);
        let mut bids = HashMap::with_capacity(ids.len());
        for (index, batch) in ids.chunks(BID_BATCH_SIZE).enumerate() {
            let request = self
                .http
                .post(&url)
                .bearer_auth(token)
                .json(&PromotionsRequest { item_ids: batch });
            let payload: PromotionsResponse = send_json(request).await.inspect_err(|err| {
                warn!(
                    target = "avito.client",
                    batch = index,
                    size = batch.len(),
                    error = %err,
                    "bid_batch_failed"
                );
            })?;
            debug!(
                target = "avito.client",
                batch = index,
                bids = payload.items.len(),
                "bid_batch_fetched"
            );
            for promotion in payload.items {
                let bid = promotion
                    .manual_promotion
                    .map(|manual| manual.bid_penny)
                    .unwrap_or_default();
                bids.insert(promotion.item_id, bid);
            }
        }
        Ok(bids)
    }

    async fn post_metrics(
        &self,
        user_id: i64,
        token: &str,
        grouping: &'static str,
        metrics: &'static [&'static str],
    ) -> Result<MetricsResponse, AvitoError> {
        let today = self.today();
        let body = MetricsRequest {
            date_from: today.clone(),
            date_to: today,
            grouping,
            limit: METRICS_LIMIT,
            offset: 0,
            metrics,
        };
        let url = format!("{}/{}/items", self.metrics_url, user_id);
        let request = self.http.post(url).bearer_auth(token).json(&body);
        send_json(request).await.inspect_err(|err| {
            warn!(
                target = "avito.client",
                user_id,
                grouping,
                error = %err,
                "metrics_request_failed"
            );
        })
    }

    fn today(&self) -> String {
        Utc::now()
            .with_timezone(&self.offset)
            .format("%Y-%m-%d")
            .to_string()
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, AvitoError> {
    let response = request
        .send()
        .await
        .map_err(|err| AvitoError::Transport(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(AvitoError::Status(status.to_string()));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| AvitoError::Decode(err.to_string()))
}

#[derive(Debug, Default)]
pub struct JoinOutcome {
    pub items: Vec<ItemMetrics>,
    /// Listed ids with no metrics grouping; they are reported with zeros.
    pub missing: Vec<i64>,
}

/// Joins the listing with grouped metrics and bids, keeping listing order.
///
/// A listed item without a grouping or a bid is a normal state (fresh listing
/// without traffic) and comes out zero-filled.
pub fn join_items(
    items: &[Item],
    groupings: &[Grouping],
    bids: &HashMap<i64, i64>,
) -> JoinOutcome {
    let empty = Grouping::default();
    let mut outcome = JoinOutcome {
        items: Vec::with_capacity(items.len()),
        missing: Vec::new(),
    };
    for item in items {
        let grouping = match groupings.iter().find(|g| g.id == item.id) {
            Some(found) => found,
            None => {
                debug!(target = "avito.client", item_id = item.id, "metrics_not_found");
                outcome.missing.push(item.id);
                &empty
            }
        };
        let bid = bids.get(&item.id).copied().unwrap_or_default();
        outcome
            .items
            .push(ItemMetrics::join(item, &grouping.metric_map(), bid));
    }
    outcome
}
