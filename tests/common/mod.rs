//! Local stand-in for the odds provider.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri},
    Router,
};
use serde_json::{json, Value};

use props_ingestion::{
    CacheStore, CredentialPlacement, CredentialRotator, PropsService, ProviderClient, ProviderConfig,
    ServiceConfig, SnapshotStore,
};

#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
}

impl Hit {
    pub fn api_key(&self) -> Option<&str> {
        self.query.get("apiKey").map(String::as_str)
    }
}

type Responder = Arc<dyn Fn(&Hit) -> (StatusCode, String) + Send + Sync>;

#[derive(Clone)]
struct Shared {
    hits: Arc<Mutex<Vec<Hit>>>,
    responder: Responder,
}

pub struct FakeUpstream {
    pub base_url: String,
    hits: Arc<Mutex<Vec<Hit>>>,
}

impl FakeUpstream {
    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hit_count(&self) -> usize {
        self.hits.lock().unwrap().len()
    }
}

async fn handle(
    State(shared): State<Shared>,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    let hit = Hit {
        path: uri.path().to_string(),
        query,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    let response = (shared.responder)(&hit);
    shared.hits.lock().unwrap().push(hit);
    response
}

pub async fn spawn<F>(responder: F) -> FakeUpstream
where
    F: Fn(&Hit) -> (StatusCode, String) + Send + Sync + 'static,
{
    let hits = Arc::new(Mutex::new(Vec::new()));
    let shared = Shared {
        hits: hits.clone(),
        responder: Arc::new(responder),
    };
    let app = Router::new().fallback(handle).with_state(shared);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeUpstream {
        base_url: format!("http://{}", addr),
        hits,
    }
}

pub fn client(base_url: &str, keys: &[&str]) -> ProviderClient {
    client_with(base_url, keys, CredentialPlacement::default())
}

pub fn client_with(base_url: &str, keys: &[&str], placement: CredentialPlacement) -> ProviderClient {
    let rotator = CredentialRotator::from_values(keys.iter().copied()).unwrap();
    ProviderClient::new(
        rotator,
        ProviderConfig {
            base_url: base_url.to_string(),
            placement,
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            requests_per_minute: 0,
            ..ProviderConfig::default()
        },
    )
    .unwrap()
}

pub fn service(base_url: &str, keys: &[&str], snapshot_dir: Option<&Path>) -> PropsService {
    let cache = CacheStore::new(snapshot_dir.map(|dir| SnapshotStore::new(dir, 1 << 20)));
    PropsService::new(client(base_url, keys), cache, ServiceConfig::default())
}

pub fn ok(body: Value) -> (StatusCode, String) {
    (StatusCode::OK, body.to_string())
}

pub fn quota() -> (StatusCode, String) {
    (
        StatusCode::UNAUTHORIZED,
        json!({"message": "Usage quota has been reached", "error_code": "OUT_OF_USAGE_CREDITS"}).to_string(),
    )
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Behaves like The Odds API for one listed event: the events listing
/// answers with E1, the per-event endpoint with `event_payload`, and the
/// bulk odds endpoint rejects player markets.
pub fn feed(hit: &Hit) -> (StatusCode, String) {
    let market = hit.query.get("markets").map(String::as_str).unwrap_or("");
    if hit.path.ends_with("/events") {
        ok(events_payload())
    } else if hit.path.contains("/events/") {
        ok(event_payload(market))
    } else {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({"message": "Invalid markets", "error_code": "INVALID_MARKET"}).to_string(),
        )
    }
}

pub fn events_payload() -> Value {
    json!([{
        "id": "E1",
        "sport_key": "americanfootball_nfl",
        "commence_time": "2025-09-14T17:00:00Z",
        "home_team": "BUF",
        "away_team": "NYJ"
    }])
}

/// One NFL event carrying `market` at DraftKings and BetMGM.
pub fn event_payload(market: &str) -> Value {
    json!([{
        "id": "E1",
        "sport_key": "americanfootball_nfl",
        "commence_time": "2025-09-14T17:00:00Z",
        "home_team": "BUF",
        "away_team": "NYJ",
        "bookmakers": [
            {
                "key": "draftkings",
                "title": "DraftKings",
                "markets": [{
                    "key": market,
                    "outcomes": [
                        {"name": "Over", "description": "Josh Allen", "point": 1.5, "price": -135},
                        {"name": "Under", "description": "Josh Allen", "point": 1.5, "price": 110}
                    ]
                }]
            },
            {
                "key": "betmgm",
                "markets": [{
                    "key": market,
                    "outcomes": [{"name": "Over", "description": "Josh Allen", "point": 1.5, "price": -140}]
                }]
            }
        ]
    }])
}
