mod common;

use leadbroker::ledger::{EntryType, LedgerError, LedgerStore, NewLedgerEntry};
use sqlx::PgPool;

use common::{balance_of, seed_company};

// key: ledger-tests -> balance projection, overdraft, race
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn balance_matches_entry_sum(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "sum@movers.test", &["SW"], 2_000).await;
    let ledger = LedgerStore::new(pool.clone());

    ledger
        .apply_entry(company_id, -500, EntryType::LeadPurchase, "lead", None)
        .await
        .unwrap();
    ledger
        .apply_entry(company_id, 250, EntryType::Refund, "bad lead refund", None)
        .await
        .unwrap();

    let balance = ledger.current_balance(company_id).await.unwrap();
    assert_eq!(balance, 1_750);
    assert_eq!(ledger.ledger_sum(company_id).await.unwrap(), balance);

    let page = ledger.entries_for(company_id, None, 10).await.unwrap();
    let kinds: Vec<_> = page.entries.iter().filter_map(|entry| entry.kind()).collect();
    assert_eq!(
        kinds,
        vec![EntryType::TopUp, EntryType::LeadPurchase, EntryType::Refund]
    );
    assert!(page.next_cursor.is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn overdraft_is_rejected_without_mutation(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "poor@movers.test", &["SW"], 300).await;
    let ledger = LedgerStore::new(pool.clone());

    let err = ledger
        .apply_entry(company_id, -500, EntryType::LeadPurchase, "lead", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance {
            balance: 300,
            amount: -500,
            ..
        }
    ));
    assert_eq!(balance_of(&pool, company_id).await, 300);
    let page = ledger.entries_for(company_id, None, 10).await.unwrap();
    assert_eq!(page.entries.len(), 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn concurrent_charges_for_last_funds_yield_one_success(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "race@movers.test", &["SW"], 500).await;
    let ledger = LedgerStore::new(pool.clone());

    let first = ledger.clone();
    let second = ledger.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move {
            first
                .apply_entry(company_id, -500, EntryType::LeadPurchase, "lead a", None)
                .await
        }),
        tokio::spawn(async move {
            second
                .apply_entry(company_id, -500, EntryType::LeadPurchase, "lead b", None)
                .await
        }),
    );
    let results = [a.unwrap(), b.unwrap()];

    let successes = results.iter().filter(|result| result.is_ok()).count();
    let overdrafts = results
        .iter()
        .filter(|result| matches!(result, Err(LedgerError::InsufficientBalance { .. })))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(overdrafts, 1);
    assert_eq!(balance_of(&pool, company_id).await, 0);
    assert_eq!(ledger.ledger_sum(company_id).await.unwrap(), 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn external_ref_applies_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "replay@movers.test", &["SW"], 0).await;
    let ledger = LedgerStore::new(pool.clone());
    let entry = NewLedgerEntry::new(company_id, 5_000, EntryType::TopUp, "top-up")
        .with_external_ref("cs_replayed");

    assert!(ledger.apply(&entry).await.unwrap().was_applied());
    assert!(!ledger.apply(&entry).await.unwrap().was_applied());
    assert_eq!(balance_of(&pool, company_id).await, 5_000);

    let found = ledger
        .entry_by_external_ref("cs_replayed")
        .await
        .unwrap()
        .expect("entry recorded");
    assert_eq!(found.amount, 5_000);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn entries_page_through_cursor(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "pages@movers.test", &["SW"], 100).await;
    let ledger = LedgerStore::new(pool.clone());
    for _ in 0..4 {
        ledger
            .apply_entry(company_id, 100, EntryType::TopUp, "top-up", None)
            .await
            .unwrap();
    }

    let first = ledger.entries_for(company_id, None, 3).await.unwrap();
    assert_eq!(first.entries.len(), 3);
    let cursor = first.next_cursor.expect("full page has a cursor");
    let rest = ledger.entries_for(company_id, Some(cursor), 3).await.unwrap();
    assert_eq!(rest.entries.len(), 2);
    assert!(rest.next_cursor.is_none());
    assert!(rest.entries[0].seq > first.entries[2].seq);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unknown_company_is_reported(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let missing = uuid::Uuid::new_v4();
    let err = LedgerStore::new(pool.clone())
        .apply_entry(missing, 100, EntryType::TopUp, "top-up", Some("cs_orphan"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::CompanyNotFound(id) if id == missing));
}
