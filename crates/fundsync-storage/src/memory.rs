use async_trait::async_trait;
use fundsync_core::{
    Document, DocumentDraft, Fund, FundAttributes, FundWithRelations, Holding, HoldingDraft,
    PortfolioAsset, PortfolioAssetDraft, ANALYST_RATING_RANGE, SRRI_RANGE,
};
use tokio::sync::Mutex;

use crate::{FundStore, StoreError};

/// In-process store with the same unique, check and cascade rules as the
/// Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryFundStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowCounts {
    pub funds: usize,
    pub documents: usize,
    pub holdings: usize,
    pub portfolio_assets: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    funds: Vec<Fund>,
    documents: Vec<Document>,
    holdings: Vec<Holding>,
    portfolio_assets: Vec<PortfolioAsset>,
    fund_seq: i32,
    document_seq: i32,
    holding_seq: i32,
    portfolio_asset_seq: i32,
}

fn next_id(seq: &mut i32) -> i32 {
    *seq += 1;
    *seq
}

impl MemoryState {
    fn check_fund(&self, id: Option<i32>, attributes: &FundAttributes) -> Result<(), StoreError> {
        if let Some(rating) = attributes.analyst_rating {
            if !ANALYST_RATING_RANGE.contains(&rating) {
                return Err(StoreError::CheckViolation("funds_analyst_rating_check".into()));
            }
        }
        if let Some(srri) = attributes.srri {
            if !SRRI_RANGE.contains(&srri) {
                return Err(StoreError::CheckViolation("funds_srri_check".into()));
            }
        }
        if self
            .funds
            .iter()
            .any(|f| Some(f.id) != id && f.attributes.market_code == attributes.market_code)
        {
            return Err(StoreError::UniqueViolation("funds_market_code_key".into()));
        }
        Ok(())
    }

    fn require_fund(&self, fund_id: i32) -> Result<(), StoreError> {
        if self.funds.iter().any(|f| f.id == fund_id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKeyViolation(format!("fund {fund_id} does not exist")))
        }
    }

    fn with_relations(&self, fund: &Fund) -> FundWithRelations {
        FundWithRelations {
            fund: fund.clone(),
            documents: self
                .documents
                .iter()
                .filter(|d| d.fund_id == fund.id)
                .cloned()
                .collect(),
            holdings: self
                .holdings
                .iter()
                .filter(|h| h.fund_id == fund.id)
                .cloned()
                .collect(),
            portfolio_assets: self
                .portfolio_assets
                .iter()
                .filter(|a| a.fund_id == fund.id)
                .cloned()
                .collect(),
        }
    }
}

impl MemoryFundStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row_counts(&self) -> RowCounts {
        let state = self.state.lock().await;
        RowCounts {
            funds: state.funds.len(),
            documents: state.documents.len(),
            holdings: state.holdings.len(),
            portfolio_assets: state.portfolio_assets.len(),
        }
    }
}

#[async_trait]
impl FundStore for MemoryFundStore {
    async fn find_fund_by_market_code(
        &self,
        market_code: &str,
    ) -> Result<Option<FundWithRelations>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .funds
            .iter()
            .find(|f| f.attributes.market_code == market_code)
            .map(|f| state.with_relations(f)))
    }

    async fn find_fund_with_relations(
        &self,
        id: Option<i32>,
    ) -> Result<Option<FundWithRelations>, StoreError> {
        let Some(id) = id else {
            return Ok(None);
        };
        let state = self.state.lock().await;
        Ok(state
            .funds
            .iter()
            .find(|f| f.id == id)
            .map(|f| state.with_relations(f)))
    }

    async fn find_all_funds(&self) -> Result<Vec<Fund>, StoreError> {
        Ok(self.state.lock().await.funds.clone())
    }

    async fn create_fund(&self, attributes: &FundAttributes) -> Result<Fund, StoreError> {
        let mut state = self.state.lock().await;
        state.check_fund(None, attributes)?;
        let fund = Fund {
            id: next_id(&mut state.fund_seq),
            attributes: attributes.clone(),
        };
        state.funds.push(fund.clone());
        Ok(fund)
    }

    async fn save_fund(&self, fund: &Fund) -> Result<Fund, StoreError> {
        let mut state = self.state.lock().await;
        state.check_fund(Some(fund.id), &fund.attributes)?;
        let slot = state
            .funds
            .iter_mut()
            .find(|f| f.id == fund.id)
            .ok_or(StoreError::NotFound {
                entity: "fund",
                id: fund.id,
            })?;
        *slot = fund.clone();
        Ok(fund.clone())
    }

    async fn delete_fund(&self, id: i32) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.funds.len();
        state.funds.retain(|f| f.id != id);
        if state.funds.len() == before {
            return Ok(false);
        }
        state.documents.retain(|d| d.fund_id != id);
        state.holdings.retain(|h| h.fund_id != id);
        state.portfolio_assets.retain(|a| a.fund_id != id);
        Ok(true)
    }

    async fn create_document(&self, fund_id: i32, draft: &DocumentDraft) -> Result<Document, StoreError> {
        let mut state = self.state.lock().await;
        state.require_fund(fund_id)?;
        if state
            .documents
            .iter()
            .any(|d| d.fund_id == fund_id && d.url == draft.url)
        {
            return Err(StoreError::UniqueViolation("documents_fund_id_url_key".into()));
        }
        let document = Document {
            id: next_id(&mut state.document_seq),
            fund_id,
            doc_type: draft.doc_type.clone(),
            url: draft.url.clone(),
        };
        state.documents.push(document.clone());
        Ok(document)
    }

    async fn save_document(&self, document: &Document) -> Result<Document, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .documents
            .iter()
            .any(|d| d.id != document.id && d.fund_id == document.fund_id && d.url == document.url)
        {
            return Err(StoreError::UniqueViolation("documents_fund_id_url_key".into()));
        }
        let slot = state
            .documents
            .iter_mut()
            .find(|d| d.id == document.id)
            .ok_or(StoreError::NotFound {
                entity: "document",
                id: document.id,
            })?;
        *slot = document.clone();
        Ok(document.clone())
    }

    async fn create_holding(&self, fund_id: i32, draft: &HoldingDraft) -> Result<Holding, StoreError> {
        let mut state = self.state.lock().await;
        state.require_fund(fund_id)?;
        if state
            .holdings
            .iter()
            .any(|h| h.fund_id == fund_id && h.name == draft.name)
        {
            return Err(StoreError::UniqueViolation("holdings_fund_id_name_key".into()));
        }
        let holding = Holding {
            id: next_id(&mut state.holding_seq),
            fund_id,
            name: draft.name.clone(),
            weighting: draft.weighting,
        };
        state.holdings.push(holding.clone());
        Ok(holding)
    }

    async fn save_holding(&self, holding: &Holding) -> Result<Holding, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .holdings
            .iter()
            .any(|h| h.id != holding.id && h.fund_id == holding.fund_id && h.name == holding.name)
        {
            return Err(StoreError::UniqueViolation("holdings_fund_id_name_key".into()));
        }
        let slot = state
            .holdings
            .iter_mut()
            .find(|h| h.id == holding.id)
            .ok_or(StoreError::NotFound {
                entity: "holding",
                id: holding.id,
            })?;
        *slot = holding.clone();
        Ok(holding.clone())
    }

    async fn create_portfolio_asset(
        &self,
        fund_id: i32,
        draft: &PortfolioAssetDraft,
    ) -> Result<PortfolioAsset, StoreError> {
        let mut state = self.state.lock().await;
        state.require_fund(fund_id)?;
        if state
            .portfolio_assets
            .iter()
            .any(|a| a.fund_id == fund_id && a.label == draft.label)
        {
            return Err(StoreError::UniqueViolation(
                "portfolio_assets_fund_id_label_key".into(),
            ));
        }
        let asset = PortfolioAsset {
            id: next_id(&mut state.portfolio_asset_seq),
            fund_id,
            label: draft.label.clone(),
            value: draft.value,
        };
        state.portfolio_assets.push(asset.clone());
        Ok(asset)
    }

    async fn save_portfolio_asset(&self, asset: &PortfolioAsset) -> Result<PortfolioAsset, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .portfolio_assets
            .iter()
            .any(|a| a.id != asset.id && a.fund_id == asset.fund_id && a.label == asset.label)
        {
            return Err(StoreError::UniqueViolation(
                "portfolio_assets_fund_id_label_key".into(),
            ));
        }
        let slot = state
            .portfolio_assets
            .iter_mut()
            .find(|a| a.id == asset.id)
            .ok_or(StoreError::NotFound {
                entity: "portfolio_asset",
                id: asset.id,
            })?;
        *slot = asset.clone();
        Ok(asset.clone())
    }
}
