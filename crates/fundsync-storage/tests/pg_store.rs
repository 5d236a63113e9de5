// Runs against a real Postgres only when FUNDSYNC_TEST_DATABASE_URL is set.

use fundsync_core::{DocumentDraft, FundAttributes, HoldingDraft};
use fundsync_storage::{run_migrations, FundStore, PgFundStore, StoreError};
use rust_decimal::Decimal;
use sqlx::PgPool;

async fn test_store() -> Option<PgFundStore> {
    let url = std::env::var("FUNDSYNC_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.expect("connect test database");
    run_migrations(&pool).await.expect("migrations");
    Some(PgFundStore::new(pool))
}

fn attributes(market_code: &str) -> FundAttributes {
    FundAttributes {
        name: "Integration Fund".into(),
        market_code: market_code.into(),
        last_price: Some(Decimal::new(12345, 4)),
        ongoing_charge: Decimal::new(50, 2),
        currency: "GBP".into(),
        analyst_rating: Some(5),
        srri: Some(3),
        ..FundAttributes::default()
    }
}

#[tokio::test]
async fn pg_store_round_trips_fund_and_children() {
    let Some(store) = test_store().await else {
        return;
    };
    let code = format!("IT:{}", std::process::id());
    if let Some(existing) = store.find_fund_by_market_code(&code).await.unwrap() {
        store.delete_fund(existing.fund.id).await.unwrap();
    }

    let fund = store.create_fund(&attributes(&code)).await.unwrap();
    let doc = store
        .create_document(
            fund.id,
            &DocumentDraft {
                doc_type: Some("KIID".into()),
                url: "https://example.test/kiid.pdf".into(),
            },
        )
        .await
        .unwrap();
    store
        .create_holding(
            fund.id,
            &HoldingDraft {
                name: "Apple".into(),
                weighting: None,
            },
        )
        .await
        .unwrap();

    let dup = store
        .create_document(
            fund.id,
            &DocumentDraft {
                doc_type: None,
                url: doc.url.clone(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(dup, StoreError::UniqueViolation(_)));

    let loaded = store
        .find_fund_with_relations(Some(fund.id))
        .await
        .unwrap()
        .expect("fund");
    assert_eq!(loaded.fund.attributes.last_price, Some(Decimal::new(12345, 4)));
    assert_eq!(loaded.documents.len(), 1);
    assert_eq!(loaded.holdings.len(), 1);
    assert!(store.find_fund_with_relations(None).await.unwrap().is_none());

    assert!(store.delete_fund(fund.id).await.unwrap());
    assert!(store.find_fund_by_market_code(&code).await.unwrap().is_none());
}

#[tokio::test]
async fn pg_store_enforces_rating_checks() {
    let Some(store) = test_store().await else {
        return;
    };
    let mut attrs = attributes(&format!("IT:SRRI:{}", std::process::id()));
    attrs.srri = Some(9);
    let err = store.create_fund(&attrs).await.unwrap_err();
    assert!(matches!(err, StoreError::CheckViolation(_)));
}
