//! Row types read through `sqlx::query_as` and their conversion into core
//! domain types. Anything a row cannot express cleanly (unknown enum text,
//! content JSON of the wrong shape) is an integrity error.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use site_binding_core::error::{BindError, Result};
use site_binding_core::site::Site;
use site_binding_core::topology::SiteContent;
use site_binding_core::types::{MaterialResource, UniqueSite, WarehouseLocation};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgSiteRow {
    pub station: String,
    pub name: String,
    pub idx: i16,
    pub site_type: String,
    pub sub_type: String,
    pub limitation: Vec<String>,
}

impl PgSiteRow {
    pub fn key(&self) -> UniqueSite {
        UniqueSite::new(&self.station, &self.name, self.idx)
    }

    pub fn into_site(self, content: serde_json::Value) -> Result<Site> {
        let key = self.key();
        let content: SiteContent = serde_json::from_value(content).map_err(|e| {
            BindError::Integrity(format!("site {key} has malformed content: {e}"))
        })?;
        Site::new(
            key,
            self.site_type.parse()?,
            self.sub_type.parse()?,
            self.limitation,
            content,
        )
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgContentRow {
    pub station: String,
    pub name: String,
    pub idx: i16,
    pub content: serde_json::Value,
}

impl PgContentRow {
    pub fn key(&self) -> UniqueSite {
        UniqueSite::new(&self.station, &self.name, self.idx)
    }
}

/// Site left-joined with its content row, for unlocked reads. `content` is
/// `None` when the site exists but its content row is gone.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgSiteWithContentRow {
    #[sqlx(flatten)]
    pub site: PgSiteRow,
    pub content: Option<serde_json::Value>,
}

impl TryFrom<PgSiteWithContentRow> for Site {
    type Error = BindError;

    fn try_from(row: PgSiteWithContentRow) -> Result<Self> {
        match row.content {
            Some(content) => row.site.into_site(content),
            None => Err(BindError::SiteContentNotFound(row.site.key())),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgMaterialResourceRow {
    pub resource_id: String,
    pub product_type: String,
    pub product_id: String,
    pub quantity: Decimal,
    pub status: String,
    pub warehouse_id: Option<String>,
    pub location: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl TryFrom<PgMaterialResourceRow> for MaterialResource {
    type Error = BindError;

    fn try_from(row: PgMaterialResourceRow) -> Result<Self> {
        let warehouse = match (row.warehouse_id, row.location) {
            (Some(warehouse_id), Some(location)) => {
                Some(WarehouseLocation::new(warehouse_id, location))
            }
            _ => None,
        };
        Ok(MaterialResource {
            status: row.status.parse()?,
            resource_id: row.resource_id,
            product_type: row.product_type,
            product_id: row.product_id,
            quantity: row.quantity,
            warehouse,
            expiry: row.expiry,
        })
    }
}
