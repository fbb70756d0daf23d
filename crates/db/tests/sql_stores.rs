use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use slideboard_core::domain::template::QuoteTemplate;
use slideboard_core::{
    ApplicationError, Caller, ConfiguredPolicyResolver, FixedClock, NewBundle,
    NewQuote, ProductId, Quote, QuoteEngine, QuoteItemInput, QuoteStatus, QuoteStore,
    StoreError, TemplateDraft, TemplateId, TemplateStore, TenantId, WriteOutcome,
};
use slideboard_db::migrations::run_pending;
use slideboard_db::{connect_with_settings, DbPool, SqlQuoteStore, SqlTemplateStore};

const TENANT: &str = "tenant-east";

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

async fn migrated_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    run_pending(&pool).await.expect("migrate");
    pool
}

fn line(name: &str, quantity: i64, cost: i64, price: &str) -> QuoteItemInput {
    QuoteItemInput {
        product_id: Some(ProductId(format!("p-{name}"))),
        product_name: name.to_owned(),
        category: Some("CURTAIN".to_owned()),
        quantity: Decimal::from(quantity),
        unit_cost: Decimal::from(cost),
        unit_price: price.parse().expect("price"),
    }
}

fn priced_quote(tenant: &str, rate: &str) -> Quote {
    let mut quote = Quote::new_draft(TenantId(tenant.to_owned()), "sales-1", noon());
    quote.items = vec![
        line("blackout", 3, 40, "59.90").into_item().expect("item"),
        line("sheer", 1, 20, "45").into_item().expect("item"),
    ];
    quote.set_discount_rate(rate.parse().expect("rate")).expect("valid rate");
    quote.set_validity(noon(), 30).expect("validity");
    quote.reprice();
    quote
}

#[tokio::test]
async fn quote_round_trips_with_lines_in_order() {
    let store = SqlQuoteStore::new(migrated_pool().await);
    let quote = priced_quote(TENANT, "0.93");
    store.insert_quote(&quote).await.expect("insert");

    let loaded = store
        .find_quote(&quote.tenant_id, &quote.id)
        .await
        .expect("find")
        .expect("quote present");

    assert_eq!(loaded, quote);
    assert_eq!(loaded.items[0].product_name, "blackout");
    assert_eq!(loaded.total_amount, "224.70".parse::<Decimal>().expect("decimal"));
    assert_eq!(loaded.final_amount, "208.97".parse::<Decimal>().expect("decimal"));
}

#[tokio::test]
async fn other_tenants_cannot_read_or_write_a_quote() {
    let store = SqlQuoteStore::new(migrated_pool().await);
    let quote = priced_quote(TENANT, "0.95");
    store.insert_quote(&quote).await.expect("insert");

    let outsider = TenantId("tenant-west".to_owned());
    assert!(store.find_quote(&outsider, &quote.id).await.expect("find").is_none());

    let mut forged = quote.clone();
    forged.tenant_id = outsider;
    forged.version = 1;
    let outcome = store.update_quote(&forged, 0).await.expect("update");
    assert_eq!(outcome, WriteOutcome::Conflict);
}

#[tokio::test]
async fn stale_version_update_is_a_conflict_and_keeps_the_stored_row() {
    let store = SqlQuoteStore::new(migrated_pool().await);
    let mut quote = priced_quote(TENANT, "0.95");
    store.insert_quote(&quote).await.expect("insert");

    quote.items.truncate(1);
    quote.reprice();
    quote.version = 1;
    assert_eq!(store.update_quote(&quote, 0).await.expect("first"), WriteOutcome::Applied);

    let mut stale = quote.clone();
    stale.items.clear();
    stale.reprice();
    stale.version = 1;
    assert_eq!(store.update_quote(&stale, 0).await.expect("stale"), WriteOutcome::Conflict);

    let stored = store
        .find_quote(&quote.tenant_id, &quote.id)
        .await
        .expect("find")
        .expect("quote present");
    assert_eq!(stored.version, 1);
    assert_eq!(stored.items.len(), 1);
}

#[tokio::test]
async fn duplicate_insert_reports_duplicate() {
    let store = SqlQuoteStore::new(migrated_pool().await);
    let quote = priced_quote(TENANT, "0.95");
    store.insert_quote(&quote).await.expect("insert");

    let error = store.insert_quote(&quote).await.expect_err("duplicate id");
    assert!(matches!(error, StoreError::Duplicate(_)));
}

#[tokio::test]
async fn revision_swap_rolls_back_when_the_successor_cannot_be_inserted() {
    let store = SqlQuoteStore::new(migrated_pool().await);
    let source = priced_quote(TENANT, "0.95");
    let taken = priced_quote(TENANT, "0.95");
    store.insert_quote(&source).await.expect("insert source");
    store.insert_quote(&taken).await.expect("insert taken");

    let mut retired = source.clone();
    retired.is_active = false;
    retired.version = 1;
    let swap = store.replace_revision(&retired, 0, &taken).await;
    assert!(matches!(swap, Err(StoreError::Duplicate(_))));

    let kept = store.find_quote(&source.tenant_id, &source.id).await.expect("find");
    let kept = kept.expect("source present");
    assert!(kept.is_active);
    assert_eq!(kept.version, 0);
    assert_eq!(kept.items.len(), 2);

    let mut successor = priced_quote(TENANT, "0.95");
    successor.root_quote_id = source.root_quote_id.clone();
    successor.revision = 2;
    let outcome = store.replace_revision(&retired, 0, &successor).await.expect("swap");
    assert_eq!(outcome, WriteOutcome::Applied);
    let stale = store.replace_revision(&retired, 0, &priced_quote(TENANT, "1")).await;
    assert_eq!(stale.expect("stale swap"), WriteOutcome::Conflict);

    let retired = store.find_quote(&source.tenant_id, &source.id).await.expect("find");
    assert!(!retired.expect("source present").is_active);
    let next = store.find_quote(&source.tenant_id, &successor.id).await.expect("find");
    assert_eq!(next.expect("successor present").revision, 2);
}

#[tokio::test]
async fn expirable_lists_only_lapsed_quotes_that_can_still_expire() {
    let store = SqlQuoteStore::new(migrated_pool().await);
    let mut lapsed = priced_quote(TENANT, "0.95");
    lapsed.valid_until = Some(noon() - Duration::days(1));
    let mut current = priced_quote(TENANT, "0.95");
    current.valid_until = Some(noon() + Duration::days(1));
    let mut rejected = priced_quote(TENANT, "0.95");
    rejected.valid_until = Some(noon() - Duration::days(2));
    rejected.status = QuoteStatus::Rejected;
    let mut open_ended = priced_quote(TENANT, "0.95");
    open_ended.valid_until = None;
    let mut elsewhere = priced_quote("tenant-west", "0.95");
    elsewhere.valid_until = Some(noon() - Duration::days(1));

    for quote in [&lapsed, &current, &rejected, &open_ended, &elsewhere] {
        store.insert_quote(quote).await.expect("insert");
    }

    let found = store
        .list_expirable(&TenantId(TENANT.to_owned()), noon())
        .await
        .expect("list expirable");
    let ids: Vec<_> = found.iter().map(|quote| quote.id.clone()).collect();
    assert_eq!(ids, vec![lapsed.id]);
}

fn template(id: &str, category: &str, created_at: DateTime<Utc>) -> QuoteTemplate {
    QuoteTemplate {
        id: TemplateId(id.to_owned()),
        tenant_id: TenantId(TENANT.to_owned()),
        name: format!("{id} set"),
        description: None,
        category: category.to_owned(),
        source_quote_id: None,
        discount_rate: "0.9".parse().expect("rate"),
        items: vec![line("blackout", 2, 40, "59.90")],
        is_active: true,
        created_by: "sales-1".to_owned(),
        created_at,
        updated_at: created_at,
    }
}

#[tokio::test]
async fn templates_list_newest_first_and_hide_deactivated_rows() {
    let store = SqlTemplateStore::new(migrated_pool().await);
    let tenant = TenantId(TENANT.to_owned());
    let older = template("tpl-older", "CURTAIN", noon());
    let newer = template("tpl-newer", "CURTAIN", noon() + Duration::hours(1));
    let paper = template("tpl-paper", "WALLPAPER", noon() + Duration::hours(2));
    for entry in [&older, &newer, &paper] {
        store.insert_template(entry).await.expect("insert template");
    }

    let curtains = store.list_templates(&tenant, Some("CURTAIN")).await.expect("list");
    let names: Vec<_> = curtains.iter().map(|entry| entry.id.0.as_str()).collect();
    assert_eq!(names, vec!["tpl-newer", "tpl-older"]);
    assert_eq!(curtains[0].items, newer.items);
    assert_eq!(store.list_templates(&tenant, None).await.expect("list all").len(), 3);

    assert!(store.deactivate_template(&tenant, &older.id, noon()).await.expect("deactivate"));
    assert!(!store.deactivate_template(&tenant, &older.id, noon()).await.expect("again"));
    assert!(store.find_template(&tenant, &older.id).await.expect("find").is_none());
    assert_eq!(store.list_templates(&tenant, None).await.expect("list all").len(), 2);
}

fn sql_engine(pool: DbPool) -> QuoteEngine {
    QuoteEngine::new(
        Arc::new(SqlQuoteStore::new(pool.clone())),
        Arc::new(SqlTemplateStore::new(pool)),
        Arc::new(ConfiguredPolicyResolver::default()),
    )
    .with_clock(Arc::new(FixedClock::at(noon())))
}

#[tokio::test]
async fn engine_runs_a_bundle_lifecycle_on_sqlite() {
    let engine = sql_engine(migrated_pool().await);
    let sales = Caller::new(TENANT, "sales-1");
    let manager = Caller::new(TENANT, "manager-1");

    let bundle = engine
        .create_bundle(&sales, NewBundle { title: Some("villa".to_owned()), ..Default::default() })
        .await
        .expect("bundle");
    let child = engine
        .create_quote(
            &sales,
            NewQuote {
                bundle_id: Some(bundle.id.clone()),
                items: vec![line("blackout", 2, 100, "200")],
                discount_rate: Some("0.95".parse().expect("rate")),
                ..Default::default()
            },
        )
        .await
        .expect("child");

    let rolled_up = engine.get_quote(&sales, &bundle.id).await.expect("bundle reload");
    assert_eq!(rolled_up.final_amount, Decimal::from(380));

    let submitted = engine.submit(&sales, &child.quote.id, child.quote.version).await;
    let submitted = submitted.expect("submit");
    assert_eq!(submitted.quote.status, QuoteStatus::PendingApproval);

    let approved = engine
        .approve(&manager, &child.quote.id, submitted.quote.version)
        .await
        .expect("approve");
    assert_eq!(approved.status, QuoteStatus::Approved);

    let stale = engine.approve(&manager, &child.quote.id, submitted.quote.version).await;
    assert!(matches!(stale, Err(ApplicationError::ConcurrencyConflict { .. })));
}

#[tokio::test]
async fn templates_stamp_new_quotes_on_sqlite() {
    let engine = sql_engine(migrated_pool().await);
    let sales = Caller::new(TENANT, "sales-1");
    let source = engine
        .create_quote(
            &sales,
            NewQuote {
                items: vec![line("blackout", 2, 100, "200")],
                discount_rate: Some("0.9".parse().expect("rate")),
                ..Default::default()
            },
        )
        .await
        .expect("source");

    let draft = TemplateDraft { name: "living room".to_owned(), ..Default::default() };
    let saved = engine.save_as_template(&sales, &source.quote.id, draft).await.expect("save");
    let stamped = engine
        .create_from_template(&sales, &saved.id, None, 7)
        .await
        .expect("stamp");

    assert_ne!(stamped.quote.id, source.quote.id);
    assert_eq!(stamped.quote.final_amount, Decimal::from(360));
    assert_eq!(stamped.quote.valid_until, Some(noon() + Duration::days(7)));
    assert_eq!(engine.list_templates(&sales, Some("CURTAIN")).await.expect("list").len(), 1);
}
