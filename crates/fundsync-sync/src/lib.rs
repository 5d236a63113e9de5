//! Preload pipeline: reconcile normalized payloads into the store and
//! orchestrate best-effort runs over every configured endpoint.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fundsync_adapters::{endpoints_for, transform_payload, SourceEndpoint};
use fundsync_core::{
    AppConfig, Document, DocumentDraft, FundAttributes, FundPayload, FundWithRelations, Holding,
    HoldingDraft, PortfolioAsset, PortfolioAssetDraft, SchedulerConfig,
};
use fundsync_storage::{FeedClient, FundStore, HttpClientConfig, HttpFetcher, StoreError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fundsync-sync";

pub const PRELOAD_SUCCESS_MESSAGE: &str = "Funds preloaded successfully";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub endpoints: Vec<SourceEndpoint>,
    pub scheduler: SchedulerConfig,
}

impl SyncConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoints: endpoints_for(&config.feed),
            scheduler: config.scheduler.clone(),
        }
    }
}

/// A child row that is matched against incoming drafts by a natural key
/// unique within its fund.
#[async_trait]
pub trait ChildRecord: Sized + Send + Sync {
    type Draft: Send + Sync;

    const KIND: &'static str;

    fn natural_key(&self) -> &str;
    fn draft_key(draft: &Self::Draft) -> &str;
    /// Overwrite the non-key fields from the draft.
    fn apply_draft(&mut self, draft: &Self::Draft);

    async fn create(store: &dyn FundStore, fund_id: i32, draft: &Self::Draft) -> Result<Self, StoreError>;
    async fn save(store: &dyn FundStore, row: &Self) -> Result<Self, StoreError>;
}

#[async_trait]
impl ChildRecord for Document {
    type Draft = DocumentDraft;

    const KIND: &'static str = "document";

    fn natural_key(&self) -> &str {
        &self.url
    }

    fn draft_key(draft: &DocumentDraft) -> &str {
        &draft.url
    }

    fn apply_draft(&mut self, draft: &DocumentDraft) {
        self.doc_type = draft.doc_type.clone();
    }

    async fn create(store: &dyn FundStore, fund_id: i32, draft: &DocumentDraft) -> Result<Self, StoreError> {
        store.create_document(fund_id, draft).await
    }

    async fn save(store: &dyn FundStore, row: &Self) -> Result<Self, StoreError> {
        store.save_document(row).await
    }
}

#[async_trait]
impl ChildRecord for Holding {
    type Draft = HoldingDraft;

    const KIND: &'static str = "holding";

    fn natural_key(&self) -> &str {
        &self.name
    }

    fn draft_key(draft: &HoldingDraft) -> &str {
        &draft.name
    }

    /// An update without a weighting stores zero; inserts keep it null.
    fn apply_draft(&mut self, draft: &HoldingDraft) {
        self.weighting = draft.weighting.or(Some(Decimal::ZERO));
    }

    async fn create(store: &dyn FundStore, fund_id: i32, draft: &HoldingDraft) -> Result<Self, StoreError> {
        store.create_holding(fund_id, draft).await
    }

    async fn save(store: &dyn FundStore, row: &Self) -> Result<Self, StoreError> {
        store.save_holding(row).await
    }
}

#[async_trait]
impl ChildRecord for PortfolioAsset {
    type Draft = PortfolioAssetDraft;

    const KIND: &'static str = "portfolio_asset";

    fn natural_key(&self) -> &str {
        &self.label
    }

    fn draft_key(draft: &PortfolioAssetDraft) -> &str {
        &draft.label
    }

    fn apply_draft(&mut self, draft: &PortfolioAssetDraft) {
        self.value = draft.value;
    }

    async fn create(
        store: &dyn FundStore,
        fund_id: i32,
        draft: &PortfolioAssetDraft,
    ) -> Result<Self, StoreError> {
        store.create_portfolio_asset(fund_id, draft).await
    }

    async fn save(store: &dyn FundStore, row: &Self) -> Result<Self, StoreError> {
        store.save_portfolio_asset(row).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSyncCounts {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone)]
pub struct UpsertedFund {
    pub fund: FundWithRelations,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub fund_id: i32,
    pub fund_name: String,
    pub market_code: String,
    pub fund_created: bool,
    pub documents: ChildSyncCounts,
    pub holdings: ChildSyncCounts,
    pub portfolio_assets: ChildSyncCounts,
}

/// Idempotent upsert of one payload. Funds are keyed by market code; child
/// rows by url, name and label within their fund. Nothing is ever deleted.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn FundStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn FundStore>) -> Self {
        Self { store }
    }

    pub async fn upsert_fund(&self, attributes: &FundAttributes) -> Result<UpsertedFund, StoreError> {
        match self.store.find_fund_by_market_code(&attributes.market_code).await? {
            Some(mut existing) => {
                existing.fund.apply(attributes);
                existing.fund = self.store.save_fund(&existing.fund).await?;
                info!(fund_id = existing.fund.id, market_code = %attributes.market_code, "updated fund");
                Ok(UpsertedFund {
                    fund: existing,
                    created: false,
                })
            }
            None => {
                let fund = self.store.create_fund(attributes).await?;
                info!(fund_id = fund.id, market_code = %attributes.market_code, "inserted fund");
                Ok(UpsertedFund {
                    fund: FundWithRelations::without_relations(fund),
                    created: true,
                })
            }
        }
    }

    /// Match each draft against `existing` by natural key, updating hits and
    /// inserting misses. Inserted rows join `existing`, so a key repeated
    /// later in the same batch updates the row created for it.
    pub async fn reconcile_children<C: ChildRecord>(
        &self,
        fund_id: i32,
        existing: &mut Vec<C>,
        incoming: &[C::Draft],
    ) -> Result<ChildSyncCounts, StoreError> {
        let store = self.store.as_ref();
        let mut counts = ChildSyncCounts::default();

        for draft in incoming {
            let key = C::draft_key(draft);
            match existing.iter().position(|row| row.natural_key() == key) {
                Some(idx) => {
                    let row = &mut existing[idx];
                    row.apply_draft(draft);
                    let saved = C::save(store, row).await?;
                    *row = saved;
                    counts.updated += 1;
                }
                None => {
                    let created = C::create(store, fund_id, draft).await?;
                    existing.push(created);
                    counts.inserted += 1;
                }
            }
        }

        if counts.inserted > 0 || counts.updated > 0 {
            info!(
                fund_id,
                kind = C::KIND,
                inserted = counts.inserted,
                updated = counts.updated,
                "reconciled child rows"
            );
        }
        Ok(counts)
    }

    pub async fn reconcile_payload(&self, payload: &FundPayload) -> Result<ReconcileSummary, StoreError> {
        let UpsertedFund { fund: mut current, created } = self.upsert_fund(&payload.fund).await?;
        let fund_id = current.fund.id;

        let documents = self
            .reconcile_children(fund_id, &mut current.documents, &payload.documents)
            .await?;
        let holdings = self
            .reconcile_children(fund_id, &mut current.holdings, &payload.holdings)
            .await?;
        let portfolio_assets = self
            .reconcile_children(fund_id, &mut current.portfolio_assets, &payload.portfolio_assets)
            .await?;

        Ok(ReconcileSummary {
            fund_id,
            fund_name: current.fund.attributes.name.clone(),
            market_code: current.fund.attributes.market_code.clone(),
            fund_created: created,
            documents,
            holdings,
            portfolio_assets,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStage {
    Fetching,
    Transforming,
    Reconciling,
}

impl fmt::Display for EndpointStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetching => "fetching",
            Self::Transforming => "transforming",
            Self::Reconciling => "reconciling",
        })
    }
}

#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct EndpointError {
    pub stage: EndpointStage,
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
}

impl EndpointError {
    fn new(stage: EndpointStage, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EndpointStatus {
    Done(ReconcileSummary),
    Failed { stage: EndpointStage, error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointOutcome {
    pub source_id: String,
    pub url: String,
    pub status: EndpointStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<EndpointOutcome>,
}

impl PreloadRunSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, EndpointStatus::Done(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Body returned by a completed preload, whatever the per-endpoint outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadStatus {
    pub status: u16,
    pub message: String,
}

impl PreloadStatus {
    pub fn completed() -> Self {
        Self {
            status: 200,
            message: PRELOAD_SUCCESS_MESSAGE.to_string(),
        }
    }
}

pub struct PreloadPipeline {
    config: SyncConfig,
    feed: Arc<dyn FeedClient>,
    reconciler: Reconciler,
    run_lock: Mutex<()>,
}

impl PreloadPipeline {
    pub fn new(config: SyncConfig, feed: Arc<dyn FeedClient>, store: Arc<dyn FundStore>) -> Self {
        Self {
            config,
            feed,
            reconciler: Reconciler::new(store),
            run_lock: Mutex::new(()),
        }
    }

    /// Pipeline over the configured endpoints using the live HTTP fetcher.
    pub fn from_config(config: &AppConfig, store: Arc<dyn FundStore>) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.feed.timeout_secs.map(Duration::from_secs),
            user_agent: Some(config.feed.user_agent.clone()),
        })
        .context("building feed http client")?;
        Ok(Self::new(SyncConfig::from_app_config(config), Arc::new(http), store))
    }

    pub fn endpoints(&self) -> &[SourceEndpoint] {
        &self.config.endpoints
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Process every endpoint once, in configured order. A failure is logged
    /// and recorded against its endpoint; the rest still run. Writes made
    /// before a failure are kept. Runs never overlap.
    pub async fn run_once(&self) -> PreloadRunSummary {
        let _guard = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, endpoints = self.config.endpoints.len(), "preload run started");

        let mut outcomes = Vec::with_capacity(self.config.endpoints.len());
        for endpoint in &self.config.endpoints {
            let span = info_span!(
                "preload_endpoint",
                %run_id,
                source_id = %endpoint.source_id,
                url = %endpoint.url
            );
            let status = match self.process_endpoint(endpoint).instrument(span).await {
                Ok(summary) => {
                    info!(
                        %run_id,
                        fund_id = summary.fund_id,
                        market_code = %summary.market_code,
                        fund_name = %summary.fund_name,
                        "preloaded fund"
                    );
                    EndpointStatus::Done(summary)
                }
                Err(err) => {
                    error!(
                        %run_id,
                        url = %endpoint.url,
                        stage = %err.stage,
                        error = %err,
                        "failed to load fund feed"
                    );
                    EndpointStatus::Failed {
                        stage: err.stage,
                        error: err.to_string(),
                    }
                }
            };
            outcomes.push(EndpointOutcome {
                source_id: endpoint.source_id.clone(),
                url: endpoint.url.clone(),
                status,
            });
        }

        let summary = PreloadRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            %run_id,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "preload run finished"
        );
        summary
    }

    pub async fn preload_funds(&self) -> PreloadStatus {
        self.run_once().await;
        PreloadStatus::completed()
    }

    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler.enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.scheduler.preload_cron.as_str();
        let pipeline = Arc::clone(self);
        let job = Job::new_async(cron, move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                let summary = pipeline.run_once().await;
                info!(run_id = %summary.run_id, "scheduled preload finished");
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }

    async fn process_endpoint(&self, endpoint: &SourceEndpoint) -> Result<ReconcileSummary, EndpointError> {
        info!("loading fund feed");
        let raw = self
            .feed
            .fetch_json(&endpoint.url)
            .await
            .map_err(|err| EndpointError::new(EndpointStage::Fetching, err))?;
        let payload =
            transform_payload(&raw).map_err(|err| EndpointError::new(EndpointStage::Transforming, err))?;
        self.reconciler
            .reconcile_payload(&payload)
            .await
            .map_err(|err| EndpointError::new(EndpointStage::Reconciling, err))
    }
}
