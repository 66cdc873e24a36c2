mod common;

use std::sync::Arc;

use chrono::Utc;
use leadbroker::billing::{
    sign_payload, BillingService, OfflineProvider, ReconciliationError, ReconciliationOutcome,
    Reconciler, SubscriptionStatus,
};
use leadbroker::ledger::LedgerStore;
use leadbroker::notifications::LogDispatcher;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use common::{balance_of, count, seed_company};

const SECRET: &str = "whsec_integration";

fn reconciler(pool: &PgPool) -> Reconciler {
    Reconciler::new(
        pool.clone(),
        Arc::new(OfflineProvider),
        Arc::new(LogDispatcher),
        SECRET,
        300,
    )
}

async fn try_deliver(
    reconciler: &Reconciler,
    event: Value,
) -> Result<ReconciliationOutcome, ReconciliationError> {
    let body = serde_json::to_vec(&event).unwrap();
    let now = Utc::now().timestamp();
    let header = sign_payload(&body, SECRET, now);
    reconciler.handle(&body, Some(&header), now).await
}

async fn deliver(reconciler: &Reconciler, event: Value) -> ReconciliationOutcome {
    try_deliver(reconciler, event).await.unwrap()
}

async fn company_state(pool: &PgPool, company_id: Uuid) -> (bool, String) {
    sqlx::query_as("SELECT is_active, plan FROM companies WHERE id = $1")
        .bind(company_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn subscription_checkout(session: &str, created: i64, company_id: Uuid, subscription: &str) -> Value {
    event(
        &format!("evt_{session}"),
        "checkout.session.completed",
        created,
        json!({
            "id": session,
            "customer": "cus_1",
            "subscription": subscription,
            "metadata": { "type": "subscription", "company_id": company_id.to_string(), "plan": "premium" },
        }),
    )
}

fn event(id: &str, kind: &str, created: i64, object: Value) -> Value {
    json!({ "id": id, "type": kind, "created": created, "data": { "object": object } })
}

// key: reconciliation-tests -> replay safety per branch
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn replayed_top_up_credits_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "topup@movers.test", &["SW"], 0).await;
    let reconciler = reconciler(&pool);
    let top_up = event(
        "evt_topup",
        "checkout.session.completed",
        Utc::now().timestamp(),
        json!({
            "id": "cs_topup_1",
            "amount_total": 5000,
            "payment_status": "paid",
            "metadata": { "type": "balance_topup", "company_id": company_id.to_string() },
        }),
    );

    assert_eq!(
        deliver(&reconciler, top_up.clone()).await,
        ReconciliationOutcome::Applied {
            action: "balance_top_up"
        }
    );
    assert_eq!(
        deliver(&reconciler, top_up).await,
        ReconciliationOutcome::AlreadyApplied {
            action: "balance_top_up"
        }
    );

    assert_eq!(balance_of(&pool, company_id).await, 5000);
    assert_eq!(
        count(
            &pool,
            "SELECT COUNT(*) FROM ledger_entries WHERE company_id = $1 AND entry_type = 'top_up'",
            company_id
        )
        .await,
        1
    );
    assert_eq!(
        LedgerStore::new(pool.clone()).ledger_sum(company_id).await.unwrap(),
        5000
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn top_up_for_unknown_company_needs_an_operator(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let outcome = deliver(
        &reconciler(&pool),
        event(
            "evt_orphan",
            "checkout.session.completed",
            Utc::now().timestamp(),
            json!({
                "id": "cs_orphan",
                "amount_total": 2500,
                "metadata": { "type": "balance_topup", "company_id": Uuid::new_v4().to_string() },
            }),
        ),
    )
    .await;
    assert!(matches!(outcome, ReconciliationOutcome::ManualIntervention { .. }));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn credit_packs_accumulate_per_session(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let user_id = Uuid::new_v4();
    let reconciler = reconciler(&pool);
    let pack = |session: &str| {
        event(
            &format!("evt_{session}"),
            "checkout.session.completed",
            Utc::now().timestamp(),
            json!({
                "id": session,
                "metadata": { "type": "quote_credits", "user_id": user_id.to_string(), "credits": "5" },
            }),
        )
    };

    deliver(&reconciler, pack("cs_pack_1")).await;
    deliver(&reconciler, pack("cs_pack_1")).await;
    deliver(&reconciler, pack("cs_pack_2")).await;

    let credits = BillingService::new(pool.clone())
        .quote_credits(user_id)
        .await
        .unwrap();
    assert_eq!(credits, 10);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn subscription_lifecycle_is_order_safe(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "subs@movers.test", &["SW"], 0).await;
    let reconciler = reconciler(&pool);
    let billing = BillingService::new(pool.clone());
    let base = Utc::now().timestamp() - 1_000;

    let activation = event(
        "evt_sub_checkout",
        "checkout.session.completed",
        base,
        json!({
            "id": "cs_sub_1",
            "customer": "cus_1",
            "subscription": "sub_1",
            "metadata": { "type": "subscription", "company_id": company_id.to_string(), "plan": "premium" },
        }),
    );
    deliver(&reconciler, activation.clone()).await;
    deliver(&reconciler, activation.clone()).await;

    let stages = billing.pipeline_stages(company_id).await.unwrap();
    assert_eq!(stages.len(), 6);
    assert_eq!(stages[0].name, "New Lead");

    let subscription = billing.subscription_for(company_id).await.unwrap().unwrap();
    assert_eq!(subscription.status(), SubscriptionStatus::Active);
    let plan: String = sqlx::query_scalar("SELECT plan FROM companies WHERE id = $1")
        .bind(company_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(plan, "premium");

    let newer = event(
        "evt_past_due",
        "customer.subscription.updated",
        base + 200,
        json!({ "id": "sub_1", "status": "past_due" }),
    );
    let older = event(
        "evt_stale_active",
        "customer.subscription.updated",
        base + 100,
        json!({ "id": "sub_1", "status": "active" }),
    );
    assert_eq!(
        deliver(&reconciler, newer).await,
        ReconciliationOutcome::Applied {
            action: "subscription_updated"
        }
    );
    assert_eq!(
        deliver(&reconciler, older).await,
        ReconciliationOutcome::Stale {
            action: "subscription_updated"
        }
    );
    let subscription = billing.subscription_for(company_id).await.unwrap().unwrap();
    assert_eq!(subscription.status(), SubscriptionStatus::PastDue);

    deliver(
        &reconciler,
        event(
            "evt_deleted",
            "customer.subscription.deleted",
            base + 300,
            json!({ "id": "sub_1", "status": "canceled" }),
        ),
    )
    .await;
    // Redelivered activation and late update arrive after deletion.
    deliver(&reconciler, activation).await;
    deliver(
        &reconciler,
        event(
            "evt_late_update",
            "customer.subscription.updated",
            base + 400,
            json!({ "id": "sub_1", "status": "active" }),
        ),
    )
    .await;

    let subscription = billing.subscription_for(company_id).await.unwrap().unwrap();
    assert_eq!(subscription.status(), SubscriptionStatus::Canceled);
    let (active, plan): (bool, String) =
        sqlx::query_as("SELECT is_active, plan FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(!active);
    assert_eq!(plan, "trial");
    assert_eq!(billing.pipeline_stages(company_id).await.unwrap().len(), 6);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn older_activation_does_not_undo_newer_update(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "late@movers.test", &["SW"], 0).await;
    let reconciler = reconciler(&pool);
    let billing = BillingService::new(pool.clone());
    let base = Utc::now().timestamp() - 1_000;
    let activation = subscription_checkout("cs_late_1", base, company_id, "sub_late");

    assert_eq!(
        deliver(&reconciler, activation.clone()).await,
        ReconciliationOutcome::Applied {
            action: "subscription_activated"
        }
    );
    deliver(
        &reconciler,
        event(
            "evt_late_past_due",
            "customer.subscription.updated",
            base + 200,
            json!({ "id": "sub_late", "status": "past_due" }),
        ),
    )
    .await;

    assert_eq!(
        deliver(&reconciler, activation).await,
        ReconciliationOutcome::Stale {
            action: "subscription_activated"
        }
    );
    let subscription = billing.subscription_for(company_id).await.unwrap().unwrap();
    assert_eq!(subscription.status(), SubscriptionStatus::PastDue);
    assert_eq!(
        subscription.last_event_at.map(|at| at.timestamp()),
        Some(base + 200)
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn one_time_plan_after_cancellation_reactivates_company(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "founder@movers.test", &["SW"], 0).await;
    let reconciler = reconciler(&pool);
    let billing = BillingService::new(pool.clone());
    let base = Utc::now().timestamp() - 1_000;

    deliver(
        &reconciler,
        subscription_checkout("cs_founder_1", base, company_id, "sub_old"),
    )
    .await;
    let deleted = event(
        "evt_founder_deleted",
        "customer.subscription.deleted",
        base + 100,
        json!({ "id": "sub_old", "status": "canceled" }),
    );
    deliver(&reconciler, deleted.clone()).await;
    assert_eq!(company_state(&pool, company_id).await, (false, "trial".into()));

    let outcome = deliver(
        &reconciler,
        event(
            "evt_founder_link",
            "checkout.session.completed",
            base + 200,
            json!({
                "id": "cs_founder_link",
                "customer_details": { "email": "founder@movers.test" },
                "line_items": { "data": [{
                    "description": "Founding Partner lifetime",
                    "price": { "type": "one_time" }
                }] },
            }),
        ),
    )
    .await;
    assert_eq!(
        outcome,
        ReconciliationOutcome::Applied {
            action: "subscription_activated"
        }
    );
    assert_eq!(company_state(&pool, company_id).await, (true, "founding".into()));
    let subscription = billing.subscription_for(company_id).await.unwrap().unwrap();
    assert_eq!(subscription.status(), SubscriptionStatus::Active);
    assert_eq!(subscription.stripe_subscription_id, None);

    // The old reference no longer points at this company.
    assert!(matches!(
        deliver(&reconciler, deleted).await,
        ReconciliationOutcome::Ignored { .. }
    ));
    assert_eq!(company_state(&pool, company_id).await, (true, "founding".into()));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn subscription_checkout_without_company_is_rejected(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let err = try_deliver(
        &reconciler(&pool),
        event(
            "evt_sub_no_company",
            "checkout.session.completed",
            Utc::now().timestamp(),
            json!({
                "id": "cs_sub_no_company",
                "subscription": "sub_orphan",
                "metadata": { "type": "subscription", "plan": "standard" },
            }),
        ),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ReconciliationError::MissingField("metadata.company_id")
    ));
    let subscriptions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(subscriptions, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn subscription_checkout_without_processor_reference_activates(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "noref@movers.test", &["SW"], 0).await;
    let outcome = deliver(
        &reconciler(&pool),
        event(
            "evt_sub_no_ref",
            "checkout.session.completed",
            Utc::now().timestamp(),
            json!({
                "id": "cs_sub_no_ref",
                "metadata": { "type": "subscription", "company_id": company_id.to_string() },
            }),
        ),
    )
    .await;
    assert_eq!(
        outcome,
        ReconciliationOutcome::Applied {
            action: "subscription_activated"
        }
    );
    assert_eq!(company_state(&pool, company_id).await, (true, "standard".into()));
    let subscription = BillingService::new(pool.clone())
        .subscription_for(company_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subscription.stripe_subscription_id, None);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn payment_link_matches_company_by_email(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let company_id = seed_company(&pool, "Owner@Movers.test", &["SW"], 0).await;
    let reconciler = reconciler(&pool);

    let outcome = deliver(
        &reconciler,
        event(
            "evt_link",
            "checkout.session.completed",
            Utc::now().timestamp(),
            json!({
                "id": "cs_link_1",
                "customer": "cus_link",
                "customer_details": { "email": "owner@movers.TEST" },
                "line_items": { "data": [{
                    "description": "Founding partner (lifetime)",
                    "price": { "type": "one_time" }
                }] },
            }),
        ),
    )
    .await;
    assert_eq!(
        outcome,
        ReconciliationOutcome::Applied {
            action: "subscription_activated"
        }
    );

    let (plan, customer): (String, Option<String>) =
        sqlx::query_as("SELECT plan, stripe_customer_id FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(plan, "founding");
    assert_eq!(customer.as_deref(), Some("cus_link"));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn payment_link_without_matching_company_changes_nothing(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let outcome = deliver(
        &reconciler(&pool),
        event(
            "evt_link_orphan",
            "checkout.session.completed",
            Utc::now().timestamp(),
            json!({
                "id": "cs_link_2",
                "customer_email": "stranger@example.com",
                "line_items": { "data": [{
                    "description": "Standard listing",
                    "price": { "type": "recurring", "recurring": { "interval": "month" } }
                }] },
            }),
        ),
    )
    .await;
    assert!(matches!(outcome, ReconciliationOutcome::ManualIntervention { .. }));
    let subscriptions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(subscriptions, 0);
}
