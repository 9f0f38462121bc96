use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRequest {
    pub date_from: String,
    pub date_to: String,
    pub grouping: &'static str,
    pub limit: u32,
    pub offset: u32,
    pub metrics: &'static [&'static str],
}

#[derive(Debug, Default, Deserialize)]
pub struct MetricsResponse {
    #[serde(default)]
    pub result: MetricsResult,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResult {
    #[serde(default)]
    pub groupings: Vec<Grouping>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Grouping {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

impl Grouping {
    pub fn metric_map(&self) -> HashMap<&str, f64> {
        metric_map(std::slice::from_ref(self))
    }
}

/// Flattens the metric lists of all groupings into slug → value. A slug
/// repeated across groupings keeps the last value.
pub fn metric_map(groupings: &[Grouping]) -> HashMap<&str, f64> {
    groupings
        .iter()
        .flat_map(|g| g.metrics.iter())
        .map(|m| (m.slug.as_str(), m.value))
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metric {
    pub slug: String,
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct ItemsPage {
    #[serde(default)]
    pub resources: Vec<Item>,
}

/// One active listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PromotionsRequest<'a> {
    #[serde(rename = "itemIDs")]
    pub item_ids: &'a [i64],
}

#[derive(Debug, Default, Deserialize)]
pub struct PromotionsResponse {
    #[serde(default)]
    pub items: Vec<Promotion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    #[serde(rename = "itemID")]
    pub item_id: i64,
    #[serde(default)]
    pub manual_promotion: Option<ManualPromotion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualPromotion {
    #[serde(default)]
    pub bid_penny: i64,
}

/// Shop totals for today. `spending` is in kopecks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub spending: i64,
    pub impressions: i64,
    pub contacts: i64,
    pub views: i64,
    pub impressions_to_views_conversion: f64,
    pub views_to_contacts_conversion: f64,
}

impl AggregateMetrics {
    pub fn from_metric_map(map: &HashMap<&str, f64>) -> Self {
        Self {
            spending: count(map, "spending"),
            impressions: count(map, "impressions"),
            contacts: count(map, "contacts"),
            views: count(map, "views"),
            impressions_to_views_conversion: map
                .get("impressionsToViewsConversion")
                .copied()
                .unwrap_or_default(),
            views_to_contacts_conversion: map
                .get("viewsToContactsConversion")
                .copied()
                .unwrap_or_default(),
        }
    }
}

/// Joined per-item record: listing + grouped metrics + bid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemMetrics {
    pub id: i64,
    pub link: String,
    pub title: String,
    pub impressions: i64,
    pub views: i64,
    pub contacts: i64,
    pub spending: i64,
    pub bid_penny: i64,
    pub cost_per_contact: f64,
}

impl ItemMetrics {
    pub fn join(item: &Item, metrics: &HashMap<&str, f64>, bid_penny: i64) -> Self {
        let contacts = count(metrics, "contacts");
        let spending = count(metrics, "spending");
        let cost_per_contact = if contacts > 0 {
            spending as f64 / contacts as f64
        } else {
            0.0
        };
        Self {
            id: item.id,
            link: item.url.clone(),
            title: item.title.clone(),
            impressions: count(metrics, "impressions"),
            views: count(metrics, "views"),
            contacts,
            spending,
            bid_penny,
            cost_per_contact,
        }
    }
}

fn count(map: &HashMap<&str, f64>, slug: &str) -> i64 {
    map.get(slug).map(|v| v.round() as i64).unwrap_or_default()
}
