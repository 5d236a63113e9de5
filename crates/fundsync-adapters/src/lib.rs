//! Upstream fund feed adapters: endpoint registry and payload normalization.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use fundsync_core::{
    DocumentDraft, FeedConfig, FundAttributes, FundPayload, HoldingDraft, PortfolioAssetDraft,
    ANALYST_RATING_RANGE, SRRI_RANGE,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "fundsync-adapters";

/// One configured upstream source and the URL its JSON document lives at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEndpoint {
    pub source_id: String,
    pub url: String,
}

pub fn endpoint_url(base_url: &str, source_id: &str) -> String {
    format!("{}/{}.json", base_url.trim_end_matches('/'), source_id)
}

pub fn endpoints_for(feed: &FeedConfig) -> Vec<SourceEndpoint> {
    feed.source_ids
        .iter()
        .map(|source_id| SourceEndpoint {
            source_id: source_id.clone(),
            url: endpoint_url(&feed.base_url, source_id),
        })
        .collect()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("no data returned from API")]
    NoData,
}

/// Normalize an upstream fund document.
///
/// Missing or mistyped fields never fail the transform: identity strings fall
/// back to `""`, `ongoingCharge` and `analystRating` to `0`, everything else to
/// null. Child entries without their natural key are dropped. Only a document
/// that is not a JSON object at all is rejected.
pub fn transform_payload(raw: &JsonValue) -> Result<FundPayload, TransformError> {
    if !raw.is_object() {
        return Err(TransformError::NoData);
    }

    let quote = |key: &str| json_at(raw, &["data", "quote", key]);
    let market_code = quote("marketCode").and_then(JsonValue::as_str).unwrap_or_default();

    let analyst_rating = json_rating(
        raw,
        &["data", "ratings", "analystRating"],
        &ANALYST_RATING_RANGE,
        market_code,
    )
    .or(Some(0));
    let srri = json_rating(raw, &["data", "ratings", "SRRI"], &SRRI_RANGE, market_code);

    let fund = FundAttributes {
        name: quote("name").and_then(JsonValue::as_str).unwrap_or_default().to_string(),
        market_code: market_code.to_string(),
        last_price: quote("lastPrice").and_then(json_decimal),
        last_price_date: quote("lastPriceDate")
            .and_then(JsonValue::as_str)
            .and_then(parse_price_date),
        ongoing_charge: quote("ongoingCharge").and_then(json_decimal).unwrap_or(Decimal::ZERO),
        sector_name: json_string(raw, &["data", "quote", "sectorName"]),
        currency: quote("currency").and_then(JsonValue::as_str).unwrap_or_default().to_string(),
        objective: json_string(raw, &["data", "profile", "objective"]),
        analyst_rating,
        srri,
        analyst_rating_label: json_string(raw, &["data", "ratings", "analystRatingLabel"]),
    };

    let documents = json_array(raw, &["data", "documents"])
        .iter()
        .filter_map(|doc| {
            Some(DocumentDraft {
                url: natural_key(doc, "url")?,
                doc_type: json_string(doc, &["type"]),
            })
        })
        .collect();

    let holdings = json_array(raw, &["data", "portfolio", "top10Holdings"])
        .iter()
        .filter_map(|holding| {
            Some(HoldingDraft {
                name: natural_key(holding, "name")?,
                weighting: json_at(holding, &["weighting"]).and_then(json_decimal),
            })
        })
        .collect();

    let portfolio_assets = json_array(raw, &["data", "portfolio", "asset"])
        .iter()
        .filter_map(|asset| {
            Some(PortfolioAssetDraft {
                label: natural_key(asset, "label")?,
                value: json_at(asset, &["value"])
                    .and_then(json_decimal)
                    .unwrap_or(Decimal::ZERO),
            })
        })
        .collect();

    Ok(FundPayload {
        fund,
        documents,
        holdings,
        portfolio_assets,
    })
}

/// Parse a price date leniently; anything unrecognised yields `None`.
pub fn parse_price_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw).or_else(|_| DateTime::parse_from_rfc2822(raw)) {
        return Some(ts.date_naive());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.date());
        }
    }
    ["%Y-%m-%d", "%Y/%m/%d", "%b %d, %Y", "%B %d, %Y", "%d %b %Y", "%d %B %Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_string(value: &JsonValue, path: &[&str]) -> Option<String> {
    json_at(value, path)?.as_str().map(ToString::to_string)
}

fn json_array<'a>(value: &'a JsonValue, path: &[&str]) -> &'a [JsonValue] {
    json_at(value, path)
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn natural_key(entry: &JsonValue, key: &str) -> Option<String> {
    json_string(entry, &[key]).filter(|s| !s.is_empty())
}

fn json_decimal(value: &JsonValue) -> Option<Decimal> {
    let number = value.as_number()?;
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .or_else(|| number.as_f64().and_then(Decimal::from_f64))
}

fn json_int(value: &JsonValue) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

fn json_rating(
    value: &JsonValue,
    path: &[&str],
    range: &std::ops::RangeInclusive<i32>,
    market_code: &str,
) -> Option<i32> {
    let raw = json_at(value, path).filter(|v| !v.is_null())?;
    let rating = json_int(raw)
        .and_then(|n| i32::try_from(n).ok())
        .filter(|n| range.contains(n));
    if rating.is_none() {
        warn!(
            market_code,
            field = path.last().copied().unwrap_or_default(),
            value = %raw,
            "rating outside its domain; treating as absent"
        );
    }
    rating
}

pub fn load_fixture_payload(path: impl AsRef<Path>) -> Result<JsonValue> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}
