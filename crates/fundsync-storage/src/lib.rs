//! Fund record store (Postgres + in-memory) and the upstream feed fetch client.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use fundsync_core::{
    DatabaseConfig, Document, DocumentDraft, Fund, FundAttributes, FundWithRelations, Holding,
    HoldingDraft, PortfolioAsset, PortfolioAssetDraft,
};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use thiserror::Error;
use tracing::{debug, info, Instrument};

mod memory;
mod postgres;

pub use memory::{MemoryFundStore, RowCounts};
pub use postgres::PgFundStore;
pub use sqlx::PgPool;

pub const CRATE_NAME: &str = "fundsync-storage";

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("check constraint violated: {0}")]
    CheckViolation(String),
    #[error("foreign key violated: {0}")]
    ForeignKeyViolation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        if let Some(db_err) = err.as_database_error() {
            let constraint = db_err
                .constraint()
                .map(ToString::to_string)
                .unwrap_or_else(|| db_err.message().to_string());
            match db_err.kind() {
                ErrorKind::UniqueViolation => return StoreError::UniqueViolation(constraint),
                ErrorKind::CheckViolation => return StoreError::CheckViolation(constraint),
                ErrorKind::ForeignKeyViolation => return StoreError::ForeignKeyViolation(constraint),
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

/// Persistence boundary for the four fund entities.
///
/// Child rows are always owned by exactly one fund; removing a fund removes its
/// documents, holdings and portfolio assets with it.
#[async_trait]
pub trait FundStore: Send + Sync {
    /// Look a fund up by its natural key, loading all three child collections.
    async fn find_fund_by_market_code(
        &self,
        market_code: &str,
    ) -> Result<Option<FundWithRelations>, StoreError>;

    /// Look a fund up by surrogate id with relations expanded. `None` is the
    /// not-a-number id and never matches a row.
    async fn find_fund_with_relations(
        &self,
        id: Option<i32>,
    ) -> Result<Option<FundWithRelations>, StoreError>;

    /// All funds, without relations.
    async fn find_all_funds(&self) -> Result<Vec<Fund>, StoreError>;

    async fn create_fund(&self, attributes: &FundAttributes) -> Result<Fund, StoreError>;
    async fn save_fund(&self, fund: &Fund) -> Result<Fund, StoreError>;
    async fn delete_fund(&self, id: i32) -> Result<bool, StoreError>;

    async fn create_document(&self, fund_id: i32, draft: &DocumentDraft) -> Result<Document, StoreError>;
    async fn save_document(&self, document: &Document) -> Result<Document, StoreError>;

    async fn create_holding(&self, fund_id: i32, draft: &HoldingDraft) -> Result<Holding, StoreError>;
    async fn save_holding(&self, holding: &Holding) -> Result<Holding, StoreError>;

    async fn create_portfolio_asset(
        &self,
        fund_id: i32,
        draft: &PortfolioAssetDraft,
    ) -> Result<PortfolioAsset, StoreError>;
    async fn save_portfolio_asset(&self, asset: &PortfolioAsset) -> Result<PortfolioAsset, StoreError>;
}

pub fn connect_options(config: &DatabaseConfig) -> anyhow::Result<PgConnectOptions> {
    let options = match &config.url {
        Some(url) => PgConnectOptions::from_str(url).context("parsing DATABASE_URL")?,
        None => PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(PgSslMode::Disable),
    };
    // Require encrypts without verifying the server certificate.
    Ok(if config.ssl {
        options.ssl_mode(PgSslMode::Require)
    } else {
        options
    })
}

pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let options = connect_options(config)?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to postgres at {}", config.display_target()))?;
    info!(target_db = %config.display_target(), "connected to database");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    MIGRATOR.run(pool).await.context("running database migrations")?;
    info!("database migrations applied");
    Ok(())
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("empty response body from {url}")]
    EmptyBody { url: String },
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fetches a JSON document from an upstream feed URL.
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch_json(&self, url: &str) -> Result<JsonValue, FetchError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// No timeout unless configured; a hung upstream only stalls its own endpoint.
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

#[async_trait]
impl FeedClient for HttpFetcher {
    async fn fetch_json(&self, url: &str) -> Result<JsonValue, FetchError> {
        let span = tracing::info_span!("feed_fetch", url);
        async move {
            let fetched = self.fetch_bytes(url).await?;
            if fetched.body.iter().all(u8::is_ascii_whitespace) {
                return Err(FetchError::EmptyBody {
                    url: fetched.final_url,
                });
            }
            debug!(status = %fetched.status, bytes = fetched.body.len(), "feed fetched");
            serde_json::from_slice(&fetched.body).map_err(|source| FetchError::Decode {
                url: fetched.final_url,
                source,
            })
        }
        .instrument(span)
        .await
    }
}

/// Feed client answering from a fixed URL table; unknown URLs behave like a 404.
#[derive(Debug, Clone, Default)]
pub struct StaticFeedClient {
    responses: HashMap<String, Result<JsonValue, u16>>,
}

impl StaticFeedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, url: impl Into<String>, payload: JsonValue) -> Self {
        self.responses.insert(url.into(), Ok(payload));
        self
    }

    /// Registers a URL whose fetch fails with the given upstream status.
    pub fn with_failure(mut self, url: impl Into<String>, status: u16) -> Self {
        self.responses.insert(url.into(), Err(status));
        self
    }
}

#[async_trait]
impl FeedClient for StaticFeedClient {
    async fn fetch_json(&self, url: &str) -> Result<JsonValue, FetchError> {
        match self.responses.get(url) {
            Some(Ok(payload)) => Ok(payload.clone()),
            Some(Err(status)) => Err(FetchError::HttpStatus {
                status: *status,
                url: url.to_string(),
            }),
            None => Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.expect("write");
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/BYW8RV9.json")
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Some(Duration::from_secs(5)),
            user_agent: Some("fundsync-test".into()),
        })
        .expect("fetcher")
    }

    #[tokio::test]
    async fn fetch_json_decodes_success_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 21\r\nConnection: close\r\n\r\n{\"data\":{\"quote\":{}}}",
        )
        .await;
        let value = fetcher().fetch_json(&url).await.expect("payload");
        assert_eq!(value, json!({"data": {"quote": {}}}));
    }

    #[tokio::test]
    async fn fetch_json_rejects_empty_body() {
        let url = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let err = fetcher().fetch_json(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::EmptyBody { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn fetch_json_surfaces_non_success_status() {
        let url = serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let err = fetcher().fetch_json(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn fetch_json_reports_malformed_json() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot json!",
        )
        .await;
        let err = fetcher().fetch_json(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn static_client_answers_known_urls_only() {
        let client = StaticFeedClient::new()
            .with_payload("http://mock/a.json", json!({"data": {}}))
            .with_failure("http://mock/b.json", 503);
        assert!(client.fetch_json("http://mock/a.json").await.is_ok());
        assert!(matches!(
            client.fetch_json("http://mock/b.json").await,
            Err(FetchError::HttpStatus { status: 503, .. })
        ));
        assert!(matches!(
            client.fetch_json("http://mock/c.json").await,
            Err(FetchError::HttpStatus { status: 404, .. })
        ));
    }

    #[test]
    fn connect_options_honours_discrete_fields() {
        let config = fundsync_core::AppConfig::from_lookup(|key| match key {
            "DB_HOST" => Some("db.internal".to_string()),
            "DB_PORT" => Some("6543".to_string()),
            "DB_NAME" => Some("fundsdb".to_string()),
            _ => None,
        })
        .unwrap();
        let options = connect_options(&config.database).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("fundsdb"));
    }
}
