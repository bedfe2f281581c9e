//! Bind engine against a real Postgres.
//!
//! Run with:
//! ```sh
//! DATABASE_URL="postgresql:///site_binding" \
//!   cargo test -p site_binding_postgres --test pg_bind_integration -- --ignored --nocapture
//! ```
//!
//! Every test provisions its own station and resource ids, so runs do not
//! interfere with each other or with leftovers from earlier runs.

use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use site_binding_core::{
    BindDetail, BindEngine, BindError, BindOption, BindRequest, BindStore, BindVerb,
    BoundResourceRequest, EngineConfig, SiteCatalog, SiteContent, SiteSpec, SiteSubType,
    SiteType, UniqueSite,
};
use site_binding_postgres::{DatabaseConfig, DatabaseManager, PgBindStore};

// ── Test Infrastructure ──────────────────────────────────────────

struct Harness {
    pool: PgPool,
    store: PgBindStore,
    engine: BindEngine,
    station: String,
    tag: String,
}

async fn harness() -> Harness {
    let _ = dotenvy::dotenv();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let db = DatabaseManager::new(DatabaseConfig::default())
        .await
        .expect("connect to DATABASE_URL");
    db.run_migrations().await.expect("apply migrations");

    let pool = db.pool().clone();
    let store = PgBindStore::new(pool.clone());
    let engine = BindEngine::new(Arc::new(store.clone()), EngineConfig::default());
    let tag = Uuid::new_v4().simple().to_string();
    Harness {
        pool,
        store,
        engine,
        station: format!("ST-{tag}"),
        tag,
    }
}

impl Harness {
    fn rid(&self, name: &str) -> String {
        format!("{name}-{}", self.tag)
    }

    async fn site(&self, name: &str, site_type: SiteType, sub_type: SiteSubType) -> UniqueSite {
        self.store
            .provision_site(&self.station, &SiteSpec::new(name, 0, site_type, sub_type))
            .await
            .unwrap()
            .key()
            .clone()
    }

    async fn seed(&self, name: &str, qty: i64) {
        let rid = self.rid(name);
        sqlx::query(
            r#"
            INSERT INTO site_binding.material_resources
                (resource_id, product_type, product_id, quantity, warehouse_id, location)
            VALUES ($1, 'RAW', $2, $3, $4, 'L1')
            "#,
        )
        .bind(&rid)
        .bind(format!("P-{rid}"))
        .bind(Decimal::from(qty))
        .bind(format!("W-{}", self.tag))
        .execute(&self.pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            INSERT INTO site_binding.warehouse_stock (warehouse_id, location, product_id, quantity)
            VALUES ($1, 'L1', $2, $3)
            "#,
        )
        .bind(format!("W-{}", self.tag))
        .bind(format!("P-{rid}"))
        .bind(Decimal::from(qty))
        .execute(&self.pool)
        .await
        .unwrap();
    }

    fn req(&self, name: &str, qty: Option<i64>) -> BoundResourceRequest {
        let rid = self.rid(name);
        BoundResourceRequest::new(&rid, format!("P-{rid}"), "RAW", qty.map(Decimal::from))
    }

    async fn ledger(&self, name: &str) -> Decimal {
        sqlx::query_scalar(
            "SELECT quantity FROM site_binding.material_resources \
             WHERE resource_id = $1 AND product_type = 'RAW'",
        )
        .bind(self.rid(name))
        .fetch_one(&self.pool)
        .await
        .unwrap()
    }

    async fn stock(&self, name: &str) -> Decimal {
        sqlx::query_scalar(
            "SELECT quantity FROM site_binding.warehouse_stock \
             WHERE warehouse_id = $1 AND location = 'L1' AND product_id = $2",
        )
        .bind(format!("W-{}", self.tag))
        .bind(format!("P-{}", self.rid(name)))
        .fetch_one(&self.pool)
        .await
        .unwrap()
    }

    async fn records(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM site_binding.bind_records WHERE created_by = $1")
            .bind(&self.station)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    async fn bind(
        &self,
        details: Vec<BindDetail>,
    ) -> Result<site_binding_core::BindOutcome, BindError> {
        self.engine
            .bind(&BindRequest::new(&self.station, details))
            .await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
#[ignore]
async fn slot_rebind_moves_ledger_and_stock() {
    let h = harness().await;
    let slot = h.site("feeder", SiteType::Slot, SiteSubType::Material).await;
    h.seed("A", 100).await;
    h.seed("B", 50).await;

    h.bind(vec![BindDetail::new(slot.clone(), BindVerb::SlotBind, vec![h.req("A", Some(10))])])
        .await
        .unwrap();
    assert_eq!(h.ledger("A").await, Decimal::from(90));
    assert_eq!(h.stock("A").await, Decimal::from(90));

    let outcome = h
        .bind(vec![BindDetail::new(slot.clone(), BindVerb::SlotBind, vec![h.req("B", Some(20))])])
        .await
        .unwrap();
    assert_eq!(outcome.displaced[0].resources[0].resource_id(), h.rid("A"));
    assert_eq!(h.ledger("A").await, Decimal::from(100));
    assert_eq!(h.stock("A").await, Decimal::from(100));
    assert_eq!(h.ledger("B").await, Decimal::from(30));
    assert_eq!(h.stock("B").await, Decimal::from(30));
    assert_eq!(h.records().await, 2);

    let site = h.store.site(&slot).await.unwrap().unwrap();
    match site.content() {
        SiteContent::Slot(s) => assert_eq!(
            s.resource().map(|r| r.resource_id().to_string()),
            Some(h.rid("B"))
        ),
        other => panic!("expected slot, got {other:?}"),
    }
}

#[tokio::test]
#[ignore]
async fn failed_batch_rolls_back_record_and_contents() {
    let h = harness().await;
    let slot = h.site("feeder", SiteType::Slot, SiteSubType::Material).await;
    let tool = h.site("mold", SiteType::Slot, SiteSubType::Tool).await;
    h.seed("A", 100).await;

    let err = h
        .bind(vec![
            BindDetail::new(slot.clone(), BindVerb::SlotBind, vec![h.req("A", Some(5))]),
            BindDetail::new(tool, BindVerb::SlotBind, vec![h.req("A", Some(5))]),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, BindError::SubTypeMismatch { .. }));
    assert_eq!(h.ledger("A").await, Decimal::from(100));
    assert_eq!(h.records().await, 0);
    assert!(h.store.site(&slot).await.unwrap().unwrap().content().is_empty());
}

#[tokio::test]
#[ignore]
async fn held_site_lock_fails_fast_as_contention() {
    let h = harness().await;
    let slot = h.site("feeder", SiteType::Slot, SiteSubType::Material).await;

    let mut holder = h.store.begin().await.unwrap();
    holder.lock_sites(std::slice::from_ref(&slot)).await.unwrap();

    let err = h
        .bind(vec![BindDetail::new(slot.clone(), BindVerb::SlotClear, vec![])])
        .await
        .unwrap_err();
    assert!(matches!(err, BindError::Contention(_)), "got {err:?}");
    assert!(err.is_retriable());

    drop(holder);
    h.bind(vec![BindDetail::new(slot, BindVerb::SlotClear, vec![])])
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn stock_row_is_created_on_first_return() {
    let h = harness().await;
    let bin = h.site("bin", SiteType::Container, SiteSubType::Material).await;
    h.seed("A", 10).await;
    sqlx::query("DELETE FROM site_binding.warehouse_stock WHERE warehouse_id = $1")
        .bind(format!("W-{}", h.tag))
        .execute(&h.pool)
        .await
        .unwrap();

    h.bind(vec![BindDetail::new(bin.clone(), BindVerb::ContainerAdd, vec![h.req("A", Some(4))])])
        .await
        .unwrap();
    assert_eq!(h.stock("A").await, Decimal::from(-4));

    h.bind(vec![BindDetail::new(bin, BindVerb::ContainerClear, vec![])])
        .await
        .unwrap();
    assert_eq!(h.stock("A").await, Decimal::ZERO);
    assert_eq!(h.ledger("A").await, Decimal::from(10));
}

#[tokio::test]
#[ignore]
async fn colqueue_round_trip() {
    let h = harness().await;
    let rack = h.site("rack", SiteType::Colqueue, SiteSubType::Material).await;
    h.seed("A", 10).await;

    h.bind(vec![BindDetail::new(rack.clone(), BindVerb::ColqueuePush, vec![h.req("A", Some(3))])
        .with_option(BindOption::at(0))])
        .await
        .unwrap();
    assert_eq!(h.ledger("A").await, Decimal::from(7));

    let outcome = h
        .bind(vec![BindDetail::new(rack.clone(), BindVerb::ColqueuePop, vec![])])
        .await
        .unwrap();
    assert_eq!(outcome.displaced[0].resources.len(), 1);
    assert_eq!(h.ledger("A").await, Decimal::from(10));
}

#[tokio::test]
#[ignore]
async fn catalog_lifecycle() {
    let h = harness().await;
    let bin = h.site("bin", SiteType::Container, SiteSubType::Material).await;
    let other = format!("ST2-{}", h.tag);

    assert!(matches!(
        h.store
            .provision_site(
                &h.station,
                &SiteSpec::new("bin", 0, SiteType::Container, SiteSubType::Material),
            )
            .await,
        Err(BindError::Conflict(_))
    ));

    h.store.share_site(&other, &bin).await.unwrap();
    assert_eq!(
        h.store.associated_stations(&bin).await.unwrap(),
        vec![h.station.clone(), other.clone()]
    );
    assert_eq!(h.store.list_station_sites(&other).await.unwrap().len(), 1);
    assert!(matches!(
        h.store.remove_site(&h.station, &bin).await,
        Err(BindError::Conflict(_))
    ));

    h.store
        .update_limitation(&bin, vec!["P-only".into()])
        .await
        .unwrap();
    let err = h
        .bind(vec![BindDetail::new(bin.clone(), BindVerb::ContainerAdd, vec![h.req("A", Some(1))])])
        .await
        .unwrap_err();
    assert!(matches!(err, BindError::LimitationViolated { .. }));

    sqlx::query("DELETE FROM site_binding.station_sites WHERE station = $1")
        .bind(&other)
        .execute(&h.pool)
        .await
        .unwrap();
    h.store.remove_site(&h.station, &bin).await.unwrap();
    assert!(h.store.site(&bin).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn read_without_content_row_is_integrity_fault() {
    let h = harness().await;
    let slot = h.site("feeder", SiteType::Slot, SiteSubType::Material).await;
    sqlx::query("DELETE FROM site_binding.site_contents WHERE station = $1")
        .bind(&h.station)
        .execute(&h.pool)
        .await
        .unwrap();

    let err = h.store.site(&slot).await.unwrap_err();
    assert!(matches!(err, BindError::SiteContentNotFound(_)), "got {err:?}");
    let err = h.store.list_station_sites(&h.station).await.unwrap_err();
    assert!(matches!(err, BindError::SiteContentNotFound(_)), "got {err:?}");
    assert!(h
        .store
        .site(&UniqueSite::new(&h.station, "ghost", 0))
        .await
        .unwrap()
        .is_none());
}
