use async_trait::async_trait;
use fundsync_core::{
    Document, DocumentDraft, Fund, FundAttributes, FundWithRelations, Holding, HoldingDraft,
    PortfolioAsset, PortfolioAssetDraft,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::{FundStore, StoreError};

#[derive(Debug, Clone)]
pub struct PgFundStore {
    pool: PgPool,
}

impl PgFundStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_relations(&self, fund: Fund) -> Result<FundWithRelations, StoreError> {
        let documents = sqlx::query(
            r#"
            SELECT id, fund_id, type, url
              FROM documents
             WHERE fund_id = $1
             ORDER BY id
            "#,
        )
        .bind(fund.id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(document_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let holdings = sqlx::query(
            r#"
            SELECT id, fund_id, name, weighting
              FROM holdings
             WHERE fund_id = $1
             ORDER BY id
            "#,
        )
        .bind(fund.id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(holding_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let portfolio_assets = sqlx::query(
            r#"
            SELECT id, fund_id, label, value
              FROM portfolio_assets
             WHERE fund_id = $1
             ORDER BY id
            "#,
        )
        .bind(fund.id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(portfolio_asset_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(FundWithRelations {
            fund,
            documents,
            holdings,
            portfolio_assets,
        })
    }
}

fn fund_from_row(row: &PgRow) -> Result<Fund, sqlx::Error> {
    Ok(Fund {
        id: row.try_get("id")?,
        attributes: FundAttributes {
            name: row.try_get("name")?,
            market_code: row.try_get("market_code")?,
            last_price: row.try_get("last_price")?,
            last_price_date: row.try_get("last_price_date")?,
            ongoing_charge: row.try_get("ongoing_charge")?,
            sector_name: row.try_get("sector_name")?,
            currency: row.try_get("currency")?,
            objective: row.try_get("objective")?,
            analyst_rating: row.try_get("analyst_rating")?,
            srri: row.try_get("srri")?,
            analyst_rating_label: row.try_get("analyst_rating_label")?,
        },
    })
}

fn document_from_row(row: &PgRow) -> Result<Document, sqlx::Error> {
    Ok(Document {
        id: row.try_get("id")?,
        fund_id: row.try_get("fund_id")?,
        doc_type: row.try_get("type")?,
        url: row.try_get("url")?,
    })
}

fn holding_from_row(row: &PgRow) -> Result<Holding, sqlx::Error> {
    Ok(Holding {
        id: row.try_get("id")?,
        fund_id: row.try_get("fund_id")?,
        name: row.try_get("name")?,
        weighting: row.try_get("weighting")?,
    })
}

fn portfolio_asset_from_row(row: &PgRow) -> Result<PortfolioAsset, sqlx::Error> {
    Ok(PortfolioAsset {
        id: row.try_get("id")?,
        fund_id: row.try_get("fund_id")?,
        label: row.try_get("label")?,
        value: row.try_get("value")?,
    })
}

#[async_trait]
impl FundStore for PgFundStore {
    async fn find_fund_by_market_code(
        &self,
        market_code: &str,
    ) -> Result<Option<FundWithRelations>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, market_code, last_price, last_price_date, ongoing_charge,
                   sector_name, currency, objective, analyst_rating, srri, analyst_rating_label
              FROM funds
             WHERE market_code = $1
            "#,
        )
        .bind(market_code)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_relations(fund_from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn find_fund_with_relations(
        &self,
        id: Option<i32>,
    ) -> Result<Option<FundWithRelations>, StoreError> {
        // A NULL id is bound as-is and compares unknown, so it matches nothing.
        let row = sqlx::query(
            r#"
            SELECT id, name, market_code, last_price, last_price_date, ongoing_charge,
                   sector_name, currency, objective, analyst_rating, srri, analyst_rating_label
              FROM funds
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_relations(fund_from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn find_all_funds(&self) -> Result<Vec<Fund>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, market_code, last_price, last_price_date, ongoing_charge,
                   sector_name, currency, objective, analyst_rating, srri, analyst_rating_label
              FROM funds
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(fund_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn create_fund(&self, attributes: &FundAttributes) -> Result<Fund, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO funds (name, market_code, last_price, last_price_date, ongoing_charge,
                               sector_name, currency, objective, analyst_rating, srri,
                               analyst_rating_label)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, name, market_code, last_price, last_price_date, ongoing_charge,
                      sector_name, currency, objective, analyst_rating, srri, analyst_rating_label
            "#,
        )
        .bind(&attributes.name)
        .bind(&attributes.market_code)
        .bind(attributes.last_price)
        .bind(attributes.last_price_date)
        .bind(attributes.ongoing_charge)
        .bind(&attributes.sector_name)
        .bind(&attributes.currency)
        .bind(&attributes.objective)
        .bind(attributes.analyst_rating)
        .bind(attributes.srri)
        .bind(&attributes.analyst_rating_label)
        .fetch_one(&self.pool)
        .await?;

        Ok(fund_from_row(&row)?)
    }

    async fn save_fund(&self, fund: &Fund) -> Result<Fund, StoreError> {
        let attributes = &fund.attributes;
        let row = sqlx::query(
            r#"
            UPDATE funds
               SET name = $2,
                   market_code = $3,
                   last_price = $4,
                   last_price_date = $5,
                   ongoing_charge = $6,
                   sector_name = $7,
                   currency = $8,
                   objective = $9,
                   analyst_rating = $10,
                   srri = $11,
                   analyst_rating_label = $12
             WHERE id = $1
            RETURNING id, name, market_code, last_price, last_price_date, ongoing_charge,
                      sector_name, currency, objective, analyst_rating, srri, analyst_rating_label
            "#,
        )
        .bind(fund.id)
        .bind(&attributes.name)
        .bind(&attributes.market_code)
        .bind(attributes.last_price)
        .bind(attributes.last_price_date)
        .bind(attributes.ongoing_charge)
        .bind(&attributes.sector_name)
        .bind(&attributes.currency)
        .bind(&attributes.objective)
        .bind(attributes.analyst_rating)
        .bind(attributes.srri)
        .bind(&attributes.analyst_rating_label)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(fund_from_row(&row)?),
            None => Err(StoreError::NotFound {
                entity: "fund",
                id: fund.id,
            }),
        }
    }

    async fn delete_fund(&self, id: i32) -> Result<bool, StoreError> {
        // documents, holdings and portfolio_assets go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM funds WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_document(&self, fund_id: i32, draft: &DocumentDraft) -> Result<Document, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO documents (fund_id, type, url)
            VALUES ($1, $2, $3)
            RETURNING id, fund_id, type, url
            "#,
        )
        .bind(fund_id)
        .bind(&draft.doc_type)
        .bind(&draft.url)
        .fetch_one(&self.pool)
        .await?;

        Ok(document_from_row(&row)?)
    }

    async fn save_document(&self, document: &Document) -> Result<Document, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE documents
               SET type = $2,
                   url = $3
             WHERE id = $1
            RETURNING id, fund_id, type, url
            "#,
        )
        .bind(document.id)
        .bind(&document.doc_type)
        .bind(&document.url)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(document_from_row(&row)?),
            None => Err(StoreError::NotFound {
                entity: "document",
                id: document.id,
            }),
        }
    }

    async fn create_holding(&self, fund_id: i32, draft: &HoldingDraft) -> Result<Holding, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO holdings (fund_id, name, weighting)
            VALUES ($1, $2, $3)
            RETURNING id, fund_id, name, weighting
            "#,
        )
        .bind(fund_id)
        .bind(&draft.name)
        .bind(draft.weighting)
        .fetch_one(&self.pool)
        .await?;

        Ok(holding_from_row(&row)?)
    }

    async fn save_holding(&self, holding: &Holding) -> Result<Holding, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE holdings
               SET name = $2,
                   weighting = $3
             WHERE id = $1
            RETURNING id, fund_id, name, weighting
            "#,
        )
        .bind(holding.id)
        .bind(&holding.name)
        .bind(holding.weighting)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(holding_from_row(&row)?),
            None => Err(StoreError::NotFound {
                entity: "holding",
                id: holding.id,
            }),
        }
    }

    async fn create_portfolio_asset(
        &self,
        fund_id: i32,
        draft: &PortfolioAssetDraft,
    ) -> Result<PortfolioAsset, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO portfolio_assets (fund_id, label, value)
            VALUES ($1, $2, $3)
            RETURNING id, fund_id, label, value
            "#,
        )
        .bind(fund_id)
        .bind(&draft.label)
        .bind(draft.value)
        .fetch_one(&self.pool)
        .await?;

        Ok(portfolio_asset_from_row(&row)?)
    }

    async fn save_portfolio_asset(&self, asset: &PortfolioAsset) -> Result<PortfolioAsset, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE portfolio_assets
               SET label = $2,
                   value = $3
             WHERE id = $1
            RETURNING id, fund_id, label, value
            "#,
        )
        .bind(asset.id)
        .bind(&asset.label)
        .bind(asset.value)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(portfolio_asset_from_row(&row)?),
            None => Err(StoreError::NotFound {
                entity: "portfolio_asset",
                id: asset.id,
            }),
        }
    }
}
