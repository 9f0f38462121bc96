use crate::avito::{AggregateMetrics, ItemMetrics};
use crate::config::ShopConfig;
use crate::sheets::{Grid, SheetSink, SheetsError};
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Value, json};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("sheet range not found for shop {0}")]
    UnknownShop(String),
    #[error("unable to write to sheet: {0}")]
    Sheets(#[from] SheetsError),
}

/// Turns metrics into sheet rows and owns the snapshot ranges.
pub struct ReportRepository {
    sink: Arc<dyn SheetSink>,
    shops: Vec<ShopConfig>,
    offset: FixedOffset,
}

impl ReportRepository {
    pub fn new(sink: Arc<dyn SheetSink>, shops: Vec<ShopConfig>, offset: FixedOffset) -> Self {
        Self {
            sink,
            shops,
            offset,
        }
    }

    pub async fn update_shop_totals(
        &self,
        shop_name: &str,
        metrics: &AggregateMetrics,
    ) -> Result<(), ReportError> {
        let shop = self
            .shops
            .iter()
            .find(|shop| shop.name == shop_name)
            .ok_or_else(|| ReportError::UnknownShop(shop_name.to_string()))?;
        self.sink
            .update_range(&shop.sheet_range, totals_rows(metrics))
            .await?;
        debug!(target = "avito.report", shop = shop_name, "totals_written");
        Ok(())
    }

    pub async fn update_shop_items(
        &self,
        shop: &ShopConfig,
        items: &[ItemMetrics],
    ) -> Result<(), ReportError> {
        let range = shop.items_target();
        let rows: Grid = items.iter().map(item_row).collect();
        self.sink
            .update_range(range, rows)
            .await
            .inspect_err(|err| {
                warn!(target = "avito.report", shop = %shop.name, range, error = %err, "items_write_failed");
            })?;
        info!(
            target = "avito.report",
            shop = %shop.name,
            range,
            rows = items.len(),
            "items_written"
        );
        Ok(())
    }

    /// Copies every live range whose snapshot time is the current minute into
    /// its snapshot range, rows turned into columns. A minute the scheduler
    /// missed is not caught up later.
    ///
    /// Returns how many snapshot ranges were written.
    pub async fn save_due_snapshots(&self, now: DateTime<Utc>) -> Result<usize, ReportError> {
        let current = now.with_timezone(&self.offset).format("%H:%M").to_string();
        let mut updates: BTreeMap<String, Grid> = BTreeMap::new();

        for shop in &self.shops {
            for snap in shop.snapshots.iter().filter(|s| s.time_of_day == current) {
                match self.sink.read_range(&shop.sheet_range).await {
                    Ok(values) => {
                        updates.insert(snap.target_range.clone(), transpose(&values));
                    }
                    Err(err) => {
                        warn!(
                            target = "avito.report",
                            shop = %shop.name,
                            range = %shop.sheet_range,
                            error = %err,
                            "snapshot_read_failed"
                        );
                    }
                }
            }
        }

        if updates.is_empty() {
            return Ok(0);
        }
        let count = updates.len();
        let ranges: Vec<String> = updates.keys().cloned().collect();
        self.sink.batch_update(updates).await?;
        crate::metrics::snapshots_written(count);
        info!(target = "avito.report", time = %current, ?ranges, "snapshots_saved");
        Ok(count)
    }

    /// Blanks every configured snapshot range in one batch call.
    pub async fn clear_all_snapshot_ranges(&self) -> Result<usize, ReportError> {
        let updates: BTreeMap<String, Grid> = self
            .shops
            .iter()
            .flat_map(|shop| shop.snapshots.iter())
            .map(|snap| (snap.target_range.clone(), Grid::new()))
            .collect();
        if updates.is_empty() {
            return Ok(0);
        }
        let count = updates.len();
        self.sink.batch_update(updates).await?;
        info!(target = "avito.report", ranges = count, "snapshot_ranges_cleared");
        Ok(count)
    }
}

/// Kopecks to rubles.
fn money(minor: i64) -> Value {
    json!(minor as f64 / 100.0)
}

/// Single-column block: spending, impressions, views, contacts.
pub fn totals_rows(metrics: &AggregateMetrics) -> Grid {
    vec![
        vec![money(metrics.spending)],
        vec![json!(metrics.impressions)],
        vec![json!(metrics.views)],
        vec![json!(metrics.contacts)],
    ]
}

/// Columns after spending are: two conversion columns, cost per contact,
/// three diff columns, bid. Conversions and diffs are not computed yet and
/// stay zero.
pub fn item_row(item: &ItemMetrics) -> Vec<Value> {
    vec![
        json!(item.link),
        json!(item.title),
        json!(item.id),
        json!(item.impressions),
        json!(item.views),
        json!(item.contacts),
        money(item.spending),
        json!(0),
        json!(0),
        json!(item.cost_per_contact),
        json!(0),
        json!(0),
        json!(0),
        json!(item.bid_penny),
    ]
}

/// Rows become columns; rows shorter than the widest one are padded with "".
pub fn transpose(values: &Grid) -> Grid {
    let width = values.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
        .map(|col| {
            values
                .iter()
                .map(|row| row.get(col).cloned().unwrap_or_else(|| json!("")))
                .collect()
        })
        .collect()
}
