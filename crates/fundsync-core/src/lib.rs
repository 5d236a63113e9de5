//! Core domain model for fund ingestion: persisted rows, transformer drafts and configuration.

use std::ops::RangeInclusive;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod config;

pub use config::{AppConfig, ConfigError, DatabaseConfig, FeedConfig, SchedulerConfig, WebConfig};

pub const CRATE_NAME: &str = "fundsync-core";

/// Allowed analyst rating values; mirrors the `funds` check constraint.
pub const ANALYST_RATING_RANGE: RangeInclusive<i32> = 0..=10;

/// Allowed SRRI (synthetic risk and reward indicator) values.
pub const SRRI_RANGE: RangeInclusive<i32> = 1..=7;

/// Scalar fund attributes, shared by new-fund creation and in-place updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FundAttributes {
    pub name: String,
    pub market_code: String,
    pub last_price: Option<Decimal>,
    pub last_price_date: Option<NaiveDate>,
    pub ongoing_charge: Decimal,
    pub sector_name: Option<String>,
    pub currency: String,
    pub objective: Option<String>,
    pub analyst_rating: Option<i32>,
    pub srri: Option<i32>,
    pub analyst_rating_label: Option<String>,
}

/// A persisted fund row, keyed by surrogate id; `market_code` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fund {
    pub id: i32,
    #[serde(flatten)]
    pub attributes: FundAttributes,
}

impl Fund {
    pub fn market_code(&self) -> &str {
        &self.attributes.market_code
    }

    /// Overwrite every scalar attribute in place.
    pub fn apply(&mut self, attributes: &FundAttributes) {
        self.attributes = attributes.clone();
    }
}

/// A fund together with its owned child collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundWithRelations {
    #[serde(flatten)]
    pub fund: Fund,
    pub documents: Vec<Document>,
    pub holdings: Vec<Holding>,
    pub portfolio_assets: Vec<PortfolioAsset>,
}

impl FundWithRelations {
    /// A freshly created fund owns no children yet.
    pub fn without_relations(fund: Fund) -> Self {
        Self {
            fund,
            documents: Vec::new(),
            holdings: Vec::new(),
            portfolio_assets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: i32,
    #[serde(skip_serializing, default)]
    pub fund_id: i32,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub id: i32,
    #[serde(skip_serializing, default)]
    pub fund_id: i32,
    pub name: String,
    pub weighting: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioAsset {
    pub id: i32,
    #[serde(skip_serializing, default)]
    pub fund_id: i32,
    pub label: String,
    pub value: Decimal,
}

/// Normalized document entry; `url` is the natural key within a fund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDraft {
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub url: String,
}

/// Normalized holding entry; `name` is the natural key within a fund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldingDraft {
    pub name: String,
    pub weighting: Option<Decimal>,
}

/// Normalized portfolio asset entry; `label` is the natural key within a fund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioAssetDraft {
    pub label: String,
    pub value: Decimal,
}

/// Handoff contract from the payload transformer into the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FundPayload {
    pub fund: FundAttributes,
    pub documents: Vec<DocumentDraft>,
    pub holdings: Vec<HoldingDraft>,
    pub portfolio_assets: Vec<PortfolioAssetDraft>,
}
