use crate::avito::MetricsClient;
use crate::config::ShopConfig;
use crate::report::ReportRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration, time::Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Pause between two shops of one cycle. This is the only upstream rate
/// limiting; shops are never processed in parallel.
#[derive(Debug, Clone, Copy)]
pub struct ShopThrottle {
    delay: Duration,
}

impl ShopThrottle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Returns `false` if cancelled before the delay elapsed.
    pub async fn pause(&self, cancel: &CancellationToken) -> bool {
        if self.delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopStatus {
    Written,
    FetchFailed,
    WriteFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShopReport {
    pub name: String,
    pub status: ShopStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_written: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_error: Option<String>,
}

impl ShopReport {
    fn new(name: &str, status: ShopStatus, error: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            error,
            items_written: None,
            items_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub shops: Vec<ShopReport>,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.shops
            .iter()
            .filter(|shop| shop.status == ShopStatus::Written)
            .count()
    }
}

/// One sweep over all shops: fetch, write, pause, next shop.
pub struct CycleRunner {
    client: Arc<MetricsClient>,
    report: Arc<ReportRepository>,
    shops: Vec<ShopConfig>,
    throttle: ShopThrottle,
    last: Arc<RwLock<Option<CycleReport>>>,
}

impl CycleRunner {
    pub fn new(
        client: Arc<MetricsClient>,
        report: Arc<ReportRepository>,
        shops: Vec<ShopConfig>,
        throttle: ShopThrottle,
    ) -> Self {
        Self {
            client,
            report,
            shops,
            throttle,
            last: Arc::new(RwLock::new(None)),
        }
    }

    /// Shared handle to the most recent finished cycle.
    pub fn last_report(&self) -> Arc<RwLock<Option<CycleReport>>> {
        self.last.clone()
    }

    /// A failing shop is logged and skipped; the cycle itself never fails.
    /// Cancellation stops the cycle at the next HTTP call or pause.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let run_id = Uuid::new_v4();
        let span = info_span!(target: "avito.worker", "cycle", run_id = %run_id);
        let report = self.sweep(run_id, cancel).instrument(span).await;
        *self.last.write().await = Some(report.clone());
        report
    }

    async fn sweep(&self, run_id: Uuid, cancel: &CancellationToken) -> CycleReport {
        let started = Instant::now();
        let started_at = Utc::now();
        let mut shops = Vec::with_capacity(self.shops.len());
        let mut cancelled = false;

        for (index, shop) in self.shops.iter().enumerate() {
            if index > 0 && !self.throttle.pause(cancel).await {
                cancelled = true;
                break;
            }
            match until_cancelled(cancel, self.process_shop(shop)).await {
                Some(report) => shops.push(report),
                None => {
                    cancelled = true;
                    break;
                }
            }
        }

        if cancelled {
            warn!(target = "avito.worker", processed = shops.len(), "cycle_cancelled");
        }
        crate::metrics::cycle_finished(started.elapsed());
        let report = CycleReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled,
            shops,
        };
        info!(
            target = "avito.worker",
            succeeded = report.succeeded(),
            total = self.shops.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle_finished"
        );
        report
    }

    async fn process_shop(&self, shop: &ShopConfig) -> ShopReport {
        info!(target = "avito.worker", shop = %shop.name, "processing_shop");

        let metrics = match self
            .client
            .aggregate_metrics(shop.user_id, &shop.credential)
            .await
        {
            Ok(metrics) => metrics,
            Err(err) => {
                error!(
                    target = "avito.worker",
                    shop = %shop.name,
                    kind = err.kind(),
                    error = %err,
                    "metrics_fetch_failed"
                );
                crate::metrics::shop_processed("fetch_failed");
                return ShopReport::new(&shop.name, ShopStatus::FetchFailed, Some(err.to_string()));
            }
        };
        info!(target = "avito.worker", shop = %shop.name, ?metrics, "metrics_fetched");

        let mut report = match self.report.update_shop_totals(&shop.name, &metrics).await {
            Ok(()) => {
                crate::metrics::shop_processed("written");
                ShopReport::new(&shop.name, ShopStatus::Written, None)
            }
            Err(err) => {
                error!(target = "avito.worker", shop = %shop.name, error = %err, "sheet_update_failed");
                crate::metrics::shop_processed("write_failed");
                ShopReport::new(&shop.name, ShopStatus::WriteFailed, Some(err.to_string()))
            }
        };

        if shop.items_range.is_some() {
            let written = match self.client.item_metrics(shop.user_id, &shop.credential).await {
                Ok(items) => self
                    .report
                    .update_shop_items(shop, &items)
                    .await
                    .map(|()| items.len())
                    .map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match written {
                Ok(count) => report.items_written = Some(count),
                Err(err) => {
                    error!(target = "avito.worker", shop = %shop.name, error = %err, "items_update_failed");
                    report.items_error = Some(err);
                }
            }
        }
        report
    }
}

async fn until_cancelled<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        value = fut => Some(value),
    }
}
