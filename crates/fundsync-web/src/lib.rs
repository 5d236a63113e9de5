//! Axum HTTP surface: trigger a preload and read funds back.

use std::error::Error as StdError;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fundsync_storage::{FundStore, StoreError};
use fundsync_sync::PreloadPipeline;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const CRATE_NAME: &str = "fundsync-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FundStore>,
    pub pipeline: Arc<PreloadPipeline>,
}

impl AppState {
    pub fn new(store: Arc<dyn FundStore>, pipeline: Arc<PreloadPipeline>) -> Self {
        Self { store, pipeline }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to preload funds")]
    Preload(#[source] JoinError),
    #[error("Failed to fetch funds")]
    ListFunds(#[source] StoreError),
    #[error("Failed to fetch fund by ID")]
    FundById(#[source] StoreError),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    message: String,
    error: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let source = StdError::source(&self).map(ToString::to_string).unwrap_or_default();
        error!(error = %source, "{}", self);
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let body = ErrorBody {
            status_code: status.as_u16(),
            message: self.to_string(),
            error: "Internal Server Error",
        };
        (status, Json(body)).into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/preload", get(preload_handler))
        .route("/funds", get(funds_handler))
        .route("/funds/{id}", get(fund_detail_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "http server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Integer-prefix parse of a path id: leading whitespace and one sign are
/// skipped, then digits are read up to the first non-digit. No digits, or a
/// value outside `i32`, yields `None`, which matches no fund.
pub fn parse_fund_id(raw: &str) -> Option<i32> {
    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let digits = &rest[..digits_end];
    if digits.is_empty() {
        return None;
    }
    let magnitude: i64 = digits.parse().ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i32::try_from(value).ok()
}

async fn preload_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let pipeline = Arc::clone(&state.pipeline);
    let status = tokio::spawn(async move { pipeline.preload_funds().await })
        .await
        .map_err(ApiError::Preload)?;
    Ok(Json(status).into_response())
}

async fn funds_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let funds = state.store.find_all_funds().await.map_err(ApiError::ListFunds)?;
    Ok(Json(funds).into_response())
}

async fn fund_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let fund = state
        .store
        .find_fund_with_relations(parse_fund_id(&raw_id))
        .await
        .map_err(ApiError::FundById)?;
    Ok(Json(fund).into_response())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use fundsync_adapters::{endpoint_url, load_fixture_payload, SourceEndpoint};
    use fundsync_core::{
        Document, DocumentDraft, Fund, FundAttributes, FundWithRelations, Holding, HoldingDraft,
        PortfolioAsset, PortfolioAssetDraft, SchedulerConfig,
    };
    use fundsync_storage::{FeedClient, FetchError, MemoryFundStore, StaticFeedClient};
    use fundsync_sync::SyncConfig;
    use http_body_util::BodyExt;
    use serde_json::{json, Value as JsonValue};
    use tower::ServiceExt;

    use super::*;

    const BASE: &str = "https://feeds.test/interview";

    fn sync_config(source_ids: &[&str]) -> SyncConfig {
        SyncConfig {
            endpoints: source_ids
                .iter()
                .map(|id| SourceEndpoint {
                    source_id: id.to_string(),
                    url: endpoint_url(BASE, id),
                })
                .collect(),
            scheduler: SchedulerConfig {
                enabled: false,
                preload_cron: "0 0 6 * * *".to_string(),
            },
        }
    }

    fn fixture(source_id: &str) -> JsonValue {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures")
            .join(source_id)
            .join("sample/payload.json");
        load_fixture_payload(path).unwrap()
    }

    fn state_with(store: Arc<dyn FundStore>, feed: Arc<dyn FeedClient>, source_ids: &[&str]) -> AppState {
        let pipeline = PreloadPipeline::new(sync_config(source_ids), feed, Arc::clone(&store));
        AppState::new(store, Arc::new(pipeline))
    }

    fn seeded_state() -> AppState {
        let feed = StaticFeedClient::new()
            .with_payload(endpoint_url(BASE, "BYW8RV9"), fixture("BYW8RV9"))
            .with_payload(endpoint_url(BASE, "BN0S2V9"), fixture("BN0S2V9"));
        state_with(Arc::new(MemoryFundStore::new()), Arc::new(feed), &["BYW8RV9", "BN0S2V9"])
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, JsonValue) {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn parse_fund_id_reads_integer_prefix() {
        assert_eq!(parse_fund_id("42"), Some(42));
        assert_eq!(parse_fund_id("12abc"), Some(12));
        assert_eq!(parse_fund_id("  7"), Some(7));
        assert_eq!(parse_fund_id("-3"), Some(-3));
        assert_eq!(parse_fund_id("+5x"), Some(5));
        assert_eq!(parse_fund_id("abc"), None);
        assert_eq!(parse_fund_id("-"), None);
        assert_eq!(parse_fund_id(""), None);
        assert_eq!(parse_fund_id("99999999999"), None);
    }

    #[tokio::test]
    async fn preload_then_list_and_fetch_by_id() {
        let app = app(seeded_state());

        let (status, body) = get_json(&app, "/preload").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": 200, "message": "Funds preloaded successfully"}));

        let (status, funds) = get_json(&app, "/funds").await;
        assert_eq!(status, StatusCode::OK);
        let funds = funds.as_array().unwrap();
        assert_eq!(funds.len(), 2);
        assert!(funds[0].get("documents").is_none());
        assert_eq!(funds[0]["marketCode"], "FUND:BYW8RV9");

        let id = funds[0]["id"].as_i64().unwrap();
        let (status, fund) = get_json(&app, &format!("/funds/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fund["id"], json!(id));
        assert_eq!(fund["documents"].as_array().unwrap().len(), 2);
        assert_eq!(fund["holdings"].as_array().unwrap().len(), 3);
        assert_eq!(fund["portfolioAssets"].as_array().unwrap().len(), 3);
        assert!(fund["documents"][0].get("type").is_some());
        assert!(fund["documents"][0].get("fundId").is_none());
    }

    #[tokio::test]
    async fn preload_twice_does_not_duplicate_rows() {
        let app = app(seeded_state());
        get_json(&app, "/preload").await;
        let (_, first) = get_json(&app, "/funds").await;
        get_json(&app, "/preload").await;
        let (_, second) = get_json(&app, "/funds").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_or_non_numeric_id_returns_null() {
        let app = app(seeded_state());
        get_json(&app, "/preload").await;

        let (status, body) = get_json(&app, "/funds/999").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, JsonValue::Null);

        let (status, body) = get_json(&app, "/funds/abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, JsonValue::Null);
    }

    #[tokio::test]
    async fn preload_reports_success_when_every_endpoint_fails() {
        let feed = StaticFeedClient::new().with_failure(endpoint_url(BASE, "BYW8RV9"), 503);
        let store: Arc<dyn FundStore> = Arc::new(MemoryFundStore::new());
        let app = app(state_with(store, Arc::new(feed), &["BYW8RV9"]));

        let (status, body) = get_json(&app, "/preload").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Funds preloaded successfully");

        let (_, funds) = get_json(&app, "/funds").await;
        assert_eq!(funds, json!([]));
    }

    struct PanickingFeed;

    #[async_trait]
    impl FeedClient for PanickingFeed {
        async fn fetch_json(&self, _url: &str) -> Result<JsonValue, FetchError> {
            panic!("feed exploded");
        }
    }

    #[tokio::test]
    async fn panic_during_preload_becomes_server_error() {
        let store: Arc<dyn FundStore> = Arc::new(MemoryFundStore::new());
        let app = app(state_with(store, Arc::new(PanickingFeed), &["BYW8RV9"]));

        let (status, body) = get_json(&app, "/preload").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({
                "statusCode": 500,
                "message": "Failed to preload funds",
                "error": "Internal Server Error"
            })
        );
    }

    struct UnavailableStore;

    fn unavailable<T>() -> Result<T, StoreError> {
        Err(StoreError::NotFound { entity: "fund", id: 0 })
    }

    #[async_trait]
    impl FundStore for UnavailableStore {
        async fn find_fund_by_market_code(&self, _: &str) -> Result<Option<FundWithRelations>, StoreError> {
            unavailable()
        }
        async fn find_fund_with_relations(&self, _: Option<i32>) -> Result<Option<FundWithRelations>, StoreError> {
            unavailable()
        }
        async fn find_all_funds(&self) -> Result<Vec<Fund>, StoreError> {
            unavailable()
        }
        async fn create_fund(&self, _: &FundAttributes) -> Result<Fund, StoreError> {
            unavailable()
        }
        async fn save_fund(&self, _: &Fund) -> Result<Fund, StoreError> {
            unavailable()
        }
        async fn delete_fund(&self, _: i32) -> Result<bool, StoreError> {
            unavailable()
        }
        async fn create_document(&self, _: i32, _: &DocumentDraft) -> Result<Document, StoreError> {
            unavailable()
        }
        async fn save_document(&self, _: &Document) -> Result<Document, StoreError> {
            unavailable()
        }
        async fn create_holding(&self, _: i32, _: &HoldingDraft) -> Result<Holding, StoreError> {
            unavailable()
        }
        async fn save_holding(&self, _: &Holding) -> Result<Holding, StoreError> {
            unavailable()
        }
        async fn create_portfolio_asset(&self, _: i32, _: &PortfolioAssetDraft) -> Result<PortfolioAsset, StoreError> {
            unavailable()
        }
        async fn save_portfolio_asset(&self, _: &PortfolioAsset) -> Result<PortfolioAsset, StoreError> {
            unavailable()
        }
    }

    #[tokio::test]
    async fn store_failures_map_to_500_bodies() {
        let app = app(state_with(Arc::new(UnavailableStore), Arc::new(StaticFeedClient::new()), &[]));

        let (status, body) = get_json(&app, "/funds").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["statusCode"], 500);
        assert_eq!(body["message"], "Failed to fetch funds");

        let (status, body) = get_json(&app, "/funds/1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to fetch fund by ID");
        assert_eq!(body["error"], "Internal Server Error");
    }
}
