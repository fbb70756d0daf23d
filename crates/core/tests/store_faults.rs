use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use slideboard_core::{
    ApplicationError, Caller, ConfiguredPolicyResolver, EngineSettings, FixedClock,
    InMemoryQuoteStore, InMemoryTemplateStore, NewBundle, NewQuote, Quote, QuoteEngine, QuoteId,
    QuoteItemInput, QuoteStore, StoreError, TenantId, WriteOutcome,
};

const TENANT: &str = "tenant-east";

#[derive(Default)]
struct Faults {
    /// Every write to this quote fails in the backend.
    broken_quote: Option<QuoteId>,
    /// Revision swaps fail before anything lands.
    broken_swaps: bool,
    /// Writes to this quote lose a version race while `races_left > 0`.
    contended: Option<QuoteId>,
    races_left: u32,
    /// Committed by the competing writer just before the first lost race.
    rival_write: Option<Quote>,
}

/// In-memory store with switchable backend failures and version races.
#[derive(Default)]
struct FaultyQuoteStore {
    inner: InMemoryQuoteStore,
    faults: Mutex<Faults>,
    contended_writes: AtomicU32,
}

impl FaultyQuoteStore {
    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn contended_writes(&self) -> u32 {
        self.contended_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteStore for FaultyQuoteStore {
    async fn find_quote(
        &self,
        tenant: &TenantId,
        id: &QuoteId,
    ) -> Result<Option<Quote>, StoreError> {
        self.inner.find_quote(tenant, id).await
    }

    async fn insert_quote(&self, quote: &Quote) -> Result<(), StoreError> {
        self.inner.insert_quote(quote).await
    }

    async fn update_quote(
        &self,
        quote: &Quote,
        expected_version: u32,
    ) -> Result<WriteOutcome, StoreError> {
        let (broken, race) = {
            let mut faults = self.faults();
            let broken = faults.broken_quote.as_ref() == Some(&quote.id);
            let mut race = None;
            if faults.contended.as_ref() == Some(&quote.id) {
                self.contended_writes.fetch_add(1, Ordering::SeqCst);
                if faults.races_left > 0 {
                    faults.races_left -= 1;
                    race = Some(faults.rival_write.take());
                }
            }
            (broken, race)
        };

        if broken {
            return Err(StoreError::Backend("io".to_owned()));
        }
        if let Some(rival) = race {
            if let Some(rival) = rival {
                let outcome = self.inner.update_quote(&rival, rival.version - 1).await?;
                assert_eq!(outcome, WriteOutcome::Applied, "rival write must land");
            }
            return Ok(WriteOutcome::Conflict);
        }
        self.inner.update_quote(quote, expected_version).await
    }

    async fn replace_revision(
        &self,
        retired: &Quote,
        expected_version: u32,
        successor: &Quote,
    ) -> Result<WriteOutcome, StoreError> {
        let broken = self.faults().broken_swaps;
        if broken {
            return Err(StoreError::Backend("disk full".to_owned()));
        }
        self.inner.replace_revision(retired, expected_version, successor).await
    }

    async fn list_bundle_children(
        &self,
        tenant: &TenantId,
        bundle_id: &QuoteId,
    ) -> Result<Vec<Quote>, StoreError> {
        self.inner.list_bundle_children(tenant, bundle_id).await
    }

    async fn list_expirable(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Quote>, StoreError> {
        self.inner.list_expirable(tenant, now).await
    }
}

struct Harness {
    engine: QuoteEngine,
    store: Arc<FaultyQuoteStore>,
    clock: FixedClock,
}

fn harness_with(settings: EngineSettings) -> Harness {
    let clock = FixedClock::at(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
    let store = Arc::new(FaultyQuoteStore::default());
    let engine = QuoteEngine::new(
        store.clone(),
        Arc::new(InMemoryTemplateStore::default()),
        Arc::new(ConfiguredPolicyResolver::default()),
    )
    .with_clock(Arc::new(clock.clone()))
    .with_settings(settings);

    Harness { engine, store, clock }
}

fn harness() -> Harness {
    harness_with(EngineSettings::default())
}

fn sales() -> Caller {
    Caller::new(TENANT, "sales-1")
}

fn tenant() -> TenantId {
    TenantId(TENANT.to_owned())
}

/// Two units at cost 100, list 200: total 400.
fn sofa_cover() -> QuoteItemInput {
    QuoteItemInput {
        product_id: None,
        product_name: "sofa cover".to_owned(),
        category: Some("CURTAIN".to_owned()),
        quantity: Decimal::from(2),
        unit_cost: Decimal::from(100),
        unit_price: Decimal::from(200),
    }
}

fn priced(bundle_id: Option<&QuoteId>, discount_rate: Decimal, valid_days: u32) -> NewQuote {
    NewQuote {
        bundle_id: bundle_id.cloned(),
        items: vec![sofa_cover()],
        discount_rate: Some(discount_rate),
        valid_days: Some(valid_days),
        ..Default::default()
    }
}

async fn bundle_final(h: &Harness, bundle_id: &QuoteId) -> Decimal {
    h.engine.get_quote(&sales(), bundle_id).await.expect("bundle").final_amount
}

#[tokio::test]
async fn sweep_skips_a_failed_write_and_still_rolls_up_bundles() {
    let h = harness();
    let bundle = h.engine.create_bundle(&sales(), NewBundle::default()).await.expect("bundle");
    let child = h
        .engine
        .create_quote(&sales(), priced(Some(&bundle.id), Decimal::new(95, 2), 1))
        .await
        .expect("child")
        .quote;
    let standalone =
        h.engine.create_quote(&sales(), priced(None, Decimal::ONE, 2)).await.expect("quote").quote;
    assert_eq!(bundle_final(&h, &bundle.id).await, Decimal::from(380));

    h.store.faults().broken_quote = Some(standalone.id.clone());
    h.clock.advance(Duration::days(3));

    let report = h.engine.batch_expire(&sales()).await.expect("sweep keeps going");
    assert_eq!(report.scanned, 2);
    assert_eq!(report.expired, vec![child.id.clone()]);
    assert_eq!(report.failed, vec![standalone.id.clone()]);
    assert_eq!(report.bundles_recomputed, vec![bundle.id.clone()]);
    assert_eq!(bundle_final(&h, &bundle.id).await, Decimal::ZERO);

    h.store.faults().broken_quote = None;
    let retry = h.engine.batch_expire(&sales()).await.expect("second sweep");
    assert_eq!(retry.expired, vec![standalone.id.clone()]);
    assert!(retry.failed.is_empty());
}

#[tokio::test]
async fn failed_revision_swap_keeps_the_source_current() {
    let h = harness();
    let source =
        h.engine.create_quote(&sales(), priced(None, Decimal::ONE, 30)).await.expect("quote").quote;

    h.store.faults().broken_swaps = true;
    let error =
        h.engine.create_next_version(&sales(), &source.id, 0).await.expect_err("swap fails");
    assert!(matches!(error, ApplicationError::Persistence(_)));

    let stored = h.engine.get_quote(&sales(), &source.id).await.expect("source");
    assert!(stored.is_active);
    assert_eq!(stored.version, 0);

    h.store.faults().broken_swaps = false;
    let next =
        h.engine.create_next_version(&sales(), &source.id, 0).await.expect("retry").quote;
    assert_eq!(next.revision, source.revision + 1);
    assert_eq!(next.root_quote_id, source.root_quote_id);

    let retired = h.engine.get_quote(&sales(), &source.id).await.expect("source");
    assert!(!retired.is_active);
    assert_eq!(retired.version, 1);
}

#[tokio::test]
async fn bundle_rollup_retries_from_the_newer_child_state() {
    let h = harness();
    let bundle = h.engine.create_bundle(&sales(), NewBundle::default()).await.expect("bundle");
    let living = h
        .engine
        .create_quote(&sales(), priced(Some(&bundle.id), Decimal::new(95, 2), 30))
        .await
        .expect("child")
        .quote;
    assert_eq!(bundle_final(&h, &bundle.id).await, Decimal::from(380));

    // Another writer reprices the living room while the next rollup is in flight.
    let mut rival = h.store.find_quote(&tenant(), &living.id).await.expect("read").expect("child");
    rival.set_discount_rate(Decimal::new(90, 2)).expect("rate");
    rival.reprice();
    rival.version += 1;
    {
        let mut faults = h.store.faults();
        faults.contended = Some(bundle.id.clone());
        faults.races_left = 1;
        faults.rival_write = Some(rival);
    }

    h.engine
        .create_quote(&sales(), priced(Some(&bundle.id), Decimal::ONE, 30))
        .await
        .expect("second child");

    let rolled = h.engine.get_quote(&sales(), &bundle.id).await.expect("bundle");
    assert_eq!(h.store.contended_writes(), 2);
    assert_eq!(rolled.final_amount, Decimal::from(760));
    assert_eq!(rolled.version, 2);
}

#[tokio::test]
async fn exhausted_rollup_retries_leave_the_child_write_committed() {
    let h = harness_with(EngineSettings { bundle_recompute_retries: 2, ..Default::default() });
    let bundle = h.engine.create_bundle(&sales(), NewBundle::default()).await.expect("bundle");
    {
        let mut faults = h.store.faults();
        faults.contended = Some(bundle.id.clone());
        faults.races_left = u32::MAX;
    }

    let child = h
        .engine
        .create_quote(&sales(), priced(Some(&bundle.id), Decimal::new(95, 2), 30))
        .await
        .expect("child write survives a failed rollup")
        .quote;
    assert_eq!(h.store.contended_writes(), 2);
    assert!(h.engine.get_quote(&sales(), &child.id).await.is_ok());
    assert_eq!(bundle_final(&h, &bundle.id).await, Decimal::ZERO);

    let error =
        h.engine.recompute_bundle_total(&sales(), &bundle.id).await.expect_err("still contended");
    assert!(error.is_conflict());
    assert_eq!(h.store.contended_writes(), 4);

    h.store.faults().races_left = 0;
    let repaired = h.engine.recompute_bundle_total(&sales(), &bundle.id).await.expect("repair");
    assert_eq!(repaired.final_amount, Decimal::from(380));
}
