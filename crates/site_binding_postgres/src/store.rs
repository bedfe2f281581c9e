//! Postgres implementations of the site_binding_core port traits.
//!
//! All SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`) so building
//! does not require a live database. Row locks use `FOR UPDATE NOWAIT`: a
//! held lock surfaces as SQLSTATE 55P03 and maps to `BindError::Contention`.

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, info};

use site_binding_core::error::{BindError, Result};
use site_binding_core::lifecycle::{ensure_removable, SiteSpec};
use site_binding_core::ports::{BindStore, BindTransaction, SiteCatalog};
use site_binding_core::request::{BindRecord, ResourceDelta, StockDelta};
use site_binding_core::site::Site;
use site_binding_core::types::{MaterialResource, ResourceKey, UniqueSite};

use crate::db::map_sqlx;
use crate::sqlx_types::{PgContentRow, PgMaterialResourceRow, PgSiteRow, PgSiteWithContentRow};

/// Column-wise site keys for `UNNEST` binds.
struct SiteKeyColumns {
    stations: Vec<String>,
    names: Vec<String>,
    idxs: Vec<i16>,
}

impl SiteKeyColumns {
    fn new(keys: &[UniqueSite]) -> Self {
        Self {
            stations: keys.iter().map(|k| k.station.clone()).collect(),
            names: keys.iter().map(|k| k.name.clone()).collect(),
            idxs: keys.iter().map(|k| k.index).collect(),
        }
    }
}

/// Locks sites, then their content rows, and returns them in `keys` order.
async fn lock_sites_on(conn: &mut PgConnection, keys: &[UniqueSite]) -> Result<Vec<Site>> {
    let cols = SiteKeyColumns::new(keys);

    let heads = sqlx::query_as::<_, PgSiteRow>(
        r#"
        SELECT s.station, s.name, s.idx, s.site_type, s.sub_type, s.limitation
        FROM site_binding.sites s
        JOIN UNNEST($1::text[], $2::text[], $3::int2[]) AS k(station, name, idx)
          ON s.station = k.station AND s.name = k.name AND s.idx = k.idx
        FOR UPDATE OF s NOWAIT
        "#,
    )
    .bind(&cols.stations)
    .bind(&cols.names)
    .bind(&cols.idxs)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    let mut heads: HashMap<UniqueSite, PgSiteRow> =
        heads.into_iter().map(|row| (row.key(), row)).collect();
    if let Some(missing) = keys.iter().find(|k| !heads.contains_key(*k)) {
        return Err(BindError::SiteNotFound(missing.clone()));
    }

    let contents = sqlx::query_as::<_, PgContentRow>(
        r#"
        SELECT c.station, c.name, c.idx, c.content
        FROM site_binding.site_contents c
        JOIN UNNEST($1::text[], $2::text[], $3::int2[]) AS k(station, name, idx)
          ON c.station = k.station AND c.name = k.name AND c.idx = k.idx
        FOR UPDATE OF c NOWAIT
        "#,
    )
    .bind(&cols.stations)
    .bind(&cols.names)
    .bind(&cols.idxs)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    let mut contents: HashMap<UniqueSite, serde_json::Value> =
        contents.into_iter().map(|row| (row.key(), row.content)).collect();

    keys.iter()
        .map(|key| {
            let content = contents
                .remove(key)
                .ok_or_else(|| BindError::SiteContentNotFound(key.clone()))?;
            let head = heads
                .remove(key)
                .ok_or_else(|| BindError::SiteNotFound(key.clone()))?;
            head.into_site(content)
        })
        .collect()
}

async fn site_exists(conn: &mut PgConnection, key: &UniqueSite) -> Result<bool> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM site_binding.sites
            WHERE station = $1 AND name = $2 AND idx = $3
        )
        "#,
    )
    .bind(&key.station)
    .bind(&key.name)
    .bind(key.index)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_sqlx)
}

/// Owner first, then sharing stations in name order.
async fn associated_on(conn: &mut PgConnection, key: &UniqueSite) -> Result<Vec<String>> {
    let shared = sqlx::query_scalar::<_, String>(
        r#"
        SELECT station FROM site_binding.station_sites
        WHERE site_station = $1 AND site_name = $2 AND site_idx = $3
        ORDER BY station
        "#,
    )
    .bind(&key.station)
    .bind(&key.name)
    .bind(key.index)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    Ok(std::iter::once(key.station.clone()).chain(shared).collect())
}

// ── PgBindStore ───────────────────────────────────────────────

/// Postgres-backed store for bind transactions and the site catalog.
#[derive(Clone)]
pub struct PgBindStore {
    pool: PgPool,
}

impl PgBindStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BindStore for PgBindStore {
    async fn begin(&self) -> Result<Box<dyn BindTransaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx)?;
        Ok(Box::new(PgBindTransaction { tx }))
    }

    async fn site(&self, key: &UniqueSite) -> Result<Option<Site>> {
        let row = sqlx::query_as::<_, PgSiteWithContentRow>(
            r#"
            SELECT s.station, s.name, s.idx, s.site_type, s.sub_type, s.limitation, c.content
            FROM site_binding.sites s
            LEFT JOIN site_binding.site_contents c
              ON c.station = s.station AND c.name = s.name AND c.idx = s.idx
            WHERE s.station = $1 AND s.name = $2 AND s.idx = $3
            "#,
        )
        .bind(&key.station)
        .bind(&key.name)
        .bind(key.index)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(Site::try_from).transpose()
    }

    async fn list_station_sites(&self, station: &str) -> Result<Vec<Site>> {
        let rows = sqlx::query_as::<_, PgSiteWithContentRow>(
            r#"
            SELECT s.station, s.name, s.idx, s.site_type, s.sub_type, s.limitation, c.content
            FROM site_binding.sites s
            LEFT JOIN site_binding.site_contents c
              ON c.station = s.station AND c.name = s.name AND c.idx = s.idx
            WHERE s.station = $1
               OR EXISTS (
                   SELECT 1 FROM site_binding.station_sites a
                   WHERE a.station = $1
                     AND a.site_station = s.station
                     AND a.site_name = s.name
                     AND a.site_idx = s.idx
               )
            ORDER BY s.station, s.name, s.idx
            "#,
        )
        .bind(station)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(Site::try_from).collect()
    }
}

#[async_trait]
impl SiteCatalog for PgBindStore {
    async fn provision_site(&self, station: &str, spec: &SiteSpec) -> Result<Site> {
        let site = spec.build(station)?;
        let key = site.key();
        let content = serde_json::to_value(site.content()).map_err(|e| anyhow!(e))?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO site_binding.sites (station, name, idx, site_type, sub_type, limitation)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&key.station)
        .bind(&key.name)
        .bind(key.index)
        .bind(site.site_type().as_str())
        .bind(site.sub_type().as_str())
        .bind(site.limitation())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        if inserted.rows_affected() == 0 {
            return Err(BindError::Conflict(format!("site {key} already exists")));
        }

        sqlx::query(
            r#"
            INSERT INTO site_binding.site_contents (station, name, idx, content)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&key.station)
        .bind(&key.name)
        .bind(key.index)
        .bind(&content)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        info!(site = %key, site_type = %site.site_type(), "site provisioned");
        Ok(site)
    }

    async fn share_site(&self, station: &str, key: &UniqueSite) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        if !site_exists(&mut conn, key).await? {
            return Err(BindError::SiteNotFound(key.clone()));
        }
        if key.station == station {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO site_binding.station_sites (station, site_station, site_name, site_idx)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(station)
        .bind(&key.station)
        .bind(&key.name)
        .bind(key.index)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx)?;
        debug!(site = %key, station, "site shared");
        Ok(())
    }

    async fn associated_stations(&self, key: &UniqueSite) -> Result<Vec<String>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        if !site_exists(&mut conn, key).await? {
            return Err(BindError::SiteNotFound(key.clone()));
        }
        associated_on(&mut conn, key).await
    }

    async fn update_limitation(&self, key: &UniqueSite, limitation: Vec<String>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let locked = sqlx::query_scalar::<_, i16>(
            r#"
            SELECT idx FROM site_binding.sites
            WHERE station = $1 AND name = $2 AND idx = $3
            FOR UPDATE NOWAIT
            "#,
        )
        .bind(&key.station)
        .bind(&key.name)
        .bind(key.index)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        if locked.is_none() {
            return Err(BindError::SiteNotFound(key.clone()));
        }

        sqlx::query(
            r#"
            UPDATE site_binding.sites SET limitation = $4
            WHERE station = $1 AND name = $2 AND idx = $3
            "#,
        )
        .bind(&key.station)
        .bind(&key.name)
        .bind(key.index)
        .bind(&limitation)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn remove_site(&self, station: &str, key: &UniqueSite) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let sites = lock_sites_on(&mut tx, std::slice::from_ref(key)).await?;
        let site = sites
            .first()
            .ok_or_else(|| BindError::SiteNotFound(key.clone()))?;
        let associated = associated_on(&mut tx, key).await?;
        ensure_removable(station, site, &associated)?;

        sqlx::query(
            r#"
            DELETE FROM site_binding.sites
            WHERE station = $1 AND name = $2 AND idx = $3
            "#,
        )
        .bind(&key.station)
        .bind(&key.name)
        .bind(key.index)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        info!(site = %key, "site removed");
        Ok(())
    }
}

// ── PgBindTransaction ─────────────────────────────────────────

/// One bind unit of work. Dropping it without `commit` rolls back.
pub struct PgBindTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BindTransaction for PgBindTransaction {
    async fn record_bind(&mut self, record: &BindRecord) -> Result<()> {
        let details = serde_json::to_value(&record.details).map_err(|e| anyhow!(e))?;
        sqlx::query(
            r#"
            INSERT INTO site_binding.bind_records (details, created_by, created_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&details)
        .bind(&record.created_by)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn lock_sites(&mut self, keys: &[UniqueSite]) -> Result<Vec<Site>> {
        let sites = lock_sites_on(&mut self.tx, keys).await?;
        debug!(count = sites.len(), "sites locked");
        Ok(sites)
    }

    async fn lock_resources(&mut self, keys: &[ResourceKey]) -> Result<Vec<MaterialResource>> {
        let resource_ids: Vec<String> = keys.iter().map(|k| k.resource_id.clone()).collect();
        let product_types: Vec<String> = keys.iter().map(|k| k.product_type.clone()).collect();

        let rows = sqlx::query_as::<_, PgMaterialResourceRow>(
            r#"
            SELECT m.resource_id, m.product_type, m.product_id, m.quantity, m.status,
                   m.warehouse_id, m.location, m.expiry
            FROM site_binding.material_resources m
            JOIN UNNEST($1::text[], $2::text[]) AS k(resource_id, product_type)
              ON m.resource_id = k.resource_id AND m.product_type = k.product_type
            ORDER BY m.resource_id, m.product_type
            FOR UPDATE OF m NOWAIT
            "#,
        )
        .bind(&resource_ids)
        .bind(&product_types)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        debug!(requested = keys.len(), found = rows.len(), "ledger rows locked");
        rows.into_iter().map(MaterialResource::try_from).collect()
    }

    async fn accumulate_stock(&mut self, deltas: &[StockDelta]) -> Result<()> {
        let warehouse_ids: Vec<String> =
            deltas.iter().map(|d| d.key.warehouse_id.clone()).collect();
        let locations: Vec<String> = deltas.iter().map(|d| d.key.location.clone()).collect();
        let product_ids: Vec<String> = deltas.iter().map(|d| d.key.product_id.clone()).collect();
        let quantities: Vec<_> = deltas.iter().map(|d| d.quantity).collect();

        sqlx::query(
            r#"
            INSERT INTO site_binding.warehouse_stock (warehouse_id, location, product_id, quantity)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::numeric[])
            ON CONFLICT (warehouse_id, location, product_id) DO UPDATE
            SET quantity = warehouse_stock.quantity + EXCLUDED.quantity,
                updated_at = now()
            "#,
        )
        .bind(&warehouse_ids)
        .bind(&locations)
        .bind(&product_ids)
        .bind(&quantities)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn apply_resource_deltas(
        &mut self,
        deltas: &[ResourceDelta],
        updated_by: &str,
    ) -> Result<()> {
        let resource_ids: Vec<String> = deltas.iter().map(|d| d.key.resource_id.clone()).collect();
        let product_types: Vec<String> =
            deltas.iter().map(|d| d.key.product_type.clone()).collect();
        let quantities: Vec<_> = deltas.iter().map(|d| d.quantity).collect();

        let updated = sqlx::query(
            r#"
            UPDATE site_binding.material_resources m
            SET quantity = m.quantity + d.delta,
                updated_by = $4,
                updated_at = now()
            FROM UNNEST($1::text[], $2::text[], $3::numeric[])
                 AS d(resource_id, product_type, delta)
            WHERE m.resource_id = d.resource_id AND m.product_type = d.product_type
            "#,
        )
        .bind(&resource_ids)
        .bind(&product_types)
        .bind(&quantities)
        .bind(updated_by)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        if updated.rows_affected() != deltas.len() as u64 {
            return Err(BindError::Integrity(format!(
                "expected {} ledger rows to update, touched {}",
                deltas.len(),
                updated.rows_affected()
            )));
        }
        Ok(())
    }

    async fn save_contents(&mut self, sites: &[Site], updated_by: &str) -> Result<()> {
        for site in sites {
            let key = site.key();
            let content = serde_json::to_value(site.content()).map_err(|e| anyhow!(e))?;
            let updated = sqlx::query(
                r#"
                UPDATE site_binding.site_contents
                SET content = $4, updated_by = $5, updated_at = now()
                WHERE station = $1 AND name = $2 AND idx = $3
                "#,
            )
            .bind(&key.station)
            .bind(&key.name)
            .bind(key.index)
            .bind(&content)
            .bind(updated_by)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
            if updated.rows_affected() == 0 {
                return Err(BindError::SiteContentNotFound(key.clone()));
            }
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx)
    }
}
