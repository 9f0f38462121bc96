//! In-process fakes shared by the unit tests: an axum stand-in for the
//! marketplace API and a recording `SheetSink`.

use crate::avito::Item;
use crate::config::Urls;
use crate::sheets::{Grid, SheetSink, SheetsError};
use async_trait::async_trait;
use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

#[derive(Default)]
pub struct FakeState {
    pub token_calls: AtomicUsize,
    pub fail_token: AtomicBool,
    pub fail_bids: AtomicBool,
    /// The listing route answers 500.
    pub fail_items: AtomicBool,
    /// Item-grouped metrics requests answer 500; totals are unaffected.
    pub fail_item_metrics: AtomicBool,
    pub garbage_metrics: AtomicBool,
    /// Data routes answer 401 as if every issued token was revoked.
    pub reject_tokens: AtomicBool,
    pub totals: Mutex<HashMap<i64, Value>>,
    pub failing_users: Mutex<HashSet<i64>>,
    pub items: Mutex<Vec<Item>>,
    pub item_groupings: Mutex<Value>,
    pub bids: Mutex<HashMap<i64, i64>>,
    pub pages: Mutex<Vec<u32>>,
    pub bid_batches: Mutex<Vec<usize>>,
    pub metrics_requests: Mutex<Vec<Value>>,
}

pub struct FakeAvito {
    pub base_url: String,
    pub state: Arc<FakeState>,
}

impl FakeAvito {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/token", post(token))
            .route("/stats/{user_id}/items", post(metrics))
            .route("/core/v1/items", get(items))
            .route("/cpxpromo/1/getPromotionsByItemIds", post(promotions))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake avito");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.base_url)
    }

    pub fn urls(&self) -> Urls {
        Urls {
            token_url: self.token_url(),
            metrics_url: format!("{}/stats/", self.base_url),
            api_base_url: self.base_url.clone(),
        }
    }

    pub fn set_totals(&self, user_id: i64, metrics: Value) {
        self.state.totals.lock().unwrap().insert(user_id, metrics);
    }

    pub fn fail_user(&self, user_id: i64) {
        self.state.failing_users.lock().unwrap().insert(user_id);
    }

    pub fn set_items(&self, items: Vec<Item>) {
        *self.state.items.lock().unwrap() = items;
    }

    pub fn set_item_groupings(&self, groupings: Value) {
        *self.state.item_groupings.lock().unwrap() = groupings;
    }

    pub fn set_bids(&self, bids: impl IntoIterator<Item = (i64, i64)>) {
        self.state.bids.lock().unwrap().extend(bids);
    }
}

/// Items with ids `1..=count`.
pub fn fake_items(count: i64) -> Vec<Item> {
    (1..=count)
        .map(|id| Item {
            id,
            title: format!("Item {id}"),
            url: format!("https://www.avito.ru/items/{id}"),
        })
        .collect()
}

fn bearer(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer "))
}

async fn token(
    State(state): State<Arc<FakeState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if state.fail_token.load(Ordering::SeqCst) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if form.get("grant_type").map(String::as_str) != Some("client_credentials")
        || !form.contains_key("client_id")
        || !form.contains_key("client_secret")
    {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let n = state.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("token-{n}"),
        "expires_in": 86400,
        "token_type": "Bearer",
    }))
    .into_response()
}

async fn metrics(
    State(state): State<Arc<FakeState>>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !bearer(&headers) || state.reject_tokens.load(Ordering::SeqCst) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.metrics_requests.lock().unwrap().push(body.clone());
    if state.failing_users.lock().unwrap().contains(&user_id) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if body["grouping"] == "item" && state.fail_item_metrics.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if state.garbage_metrics.load(Ordering::SeqCst) {
        return (StatusCode::OK, "not json").into_response();
    }
    let groupings = if body["grouping"] == "item" {
        let groupings = state.item_groupings.lock().unwrap().clone();
        if groupings.is_null() { json!([]) } else { groupings }
    } else {
        let metrics = state
            .totals
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| json!([]));
        json!([{"id": 0, "type": "totals", "metrics": metrics}])
    };
    Json(json!({"result": {"groupings": groupings}})).into_response()
}

async fn items(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !bearer(&headers) || state.reject_tokens.load(Ordering::SeqCst) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let per_page: usize = query
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(100);
    state.pages.lock().unwrap().push(page);
    if state.fail_items.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let all = state.items.lock().unwrap().clone();
    let resources: Vec<Item> = all
        .into_iter()
        .skip((page as usize - 1) * per_page)
        .take(per_page)
        .collect();
    Json(json!({"meta": {"page": page, "per_page": per_page}, "resources": resources}))
        .into_response()
}

async fn promotions(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !bearer(&headers) || state.reject_tokens.load(Ordering::SeqCst) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.fail_bids.load(Ordering::SeqCst) {
        return StatusCode::BAD_GATEWAY.into_response();
    }
    let ids: Vec<i64> = body["itemIDs"]
        .as_array()
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();
    state.bid_batches.lock().unwrap().push(ids.len());
    let bids = state.bids.lock().unwrap().clone();
    let items: Vec<Value> = ids
        .iter()
        .filter_map(|id| bids.get(id).map(|bid| (id, bid)))
        .map(|(id, bid)| json!({"itemID": id, "manualPromotion": {"bidPenny": bid}}))
        .collect();
    Json(json!({"items": items})).into_response()
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Update { range: String, values: Grid },
    Batch(BTreeMap<String, Grid>),
    Read(String),
}

/// Records every call; reads are served from `ranges`.
#[derive(Default)]
pub struct MemorySink {
    pub calls: Mutex<Vec<SinkCall>>,
    pub ranges: Mutex<HashMap<String, Grid>>,
    pub fail_reads: Mutex<HashSet<String>>,
    pub fail_writes: AtomicBool,
}

impl MemorySink {
    pub fn with_range(self, range: &str, values: Grid) -> Self {
        self.ranges.lock().unwrap().insert(range.to_string(), values);
        self
    }

    pub fn writes(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| !matches!(call, SinkCall::Read(_)))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SheetSink for MemorySink {
    async fn update_range(&self, range: &str, values: Grid) -> Result<(), SheetsError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SheetsError::Status("503 Service Unavailable".into()));
        }
        self.calls.lock().unwrap().push(SinkCall::Update {
            range: range.to_string(),
            values,
        });
        Ok(())
    }

    async fn batch_update(&self, data: BTreeMap<String, Grid>) -> Result<(), SheetsError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SheetsError::Status("503 Service Unavailable".into()));
        }
        self.calls.lock().unwrap().push(SinkCall::Batch(data));
        Ok(())
    }

    async fn read_range(&self, range: &str) -> Result<Grid, SheetsError> {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Read(range.to_string()));
        if self.fail_reads.lock().unwrap().contains(range) {
            return Err(SheetsError::Status("404 Not Found".into()));
        }
        Ok(self
            .ranges
            .lock()
            .unwrap()
            .get(range)
            .cloned()
            .unwrap_or_default())
    }
}
