//! Storage port traits. Implemented by `site_binding_postgres` and by the
//! in-memory store in [`crate::memory`]; the orchestrator depends only on
//! these traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::lifecycle::SiteSpec;
use crate::request::{BindRecord, ResourceDelta, StockDelta};
use crate::site::Site;
use crate::types::{MaterialResource, ResourceKey, UniqueSite};

/// Entry point for bind transactions plus non-locking reads.
#[async_trait]
pub trait BindStore: Send + Sync {
    /// Opens a unit of work. Dropping the transaction without calling
    /// [`BindTransaction::commit`] rolls everything back.
    async fn begin(&self) -> Result<Box<dyn BindTransaction>>;

    /// Snapshot read of one site; no lock is taken. A site whose content
    /// row is missing yields `SiteContentNotFound`, not `None`.
    async fn site(&self, key: &UniqueSite) -> Result<Option<Site>>;

    /// Sites owned by or shared with `station`, ordered by key.
    async fn list_station_sites(&self, station: &str) -> Result<Vec<Site>>;
}

/// One bind transaction.
///
/// All `lock_*` methods are lock-or-fail: a row already locked by another
/// transaction yields `BindError::Contention` immediately instead of waiting.
#[async_trait]
pub trait BindTransaction: Send {
    async fn record_bind(&mut self, record: &BindRecord) -> Result<()>;

    /// Locks every site and its content row, returned in `keys` order.
    ///
    /// Errors: `SiteNotFound` if any key is absent, `SiteContentNotFound` if a
    /// site has no content row.
    async fn lock_sites(&mut self, keys: &[UniqueSite]) -> Result<Vec<Site>>;

    /// Locks the ledger rows that exist among `keys`; absent keys are skipped.
    async fn lock_resources(&mut self, keys: &[ResourceKey]) -> Result<Vec<MaterialResource>>;

    /// Insert-or-accumulate per stock key.
    async fn accumulate_stock(&mut self, deltas: &[StockDelta]) -> Result<()>;

    /// Adds each delta to its (previously locked) ledger row.
    async fn apply_resource_deltas(
        &mut self,
        deltas: &[ResourceDelta],
        updated_by: &str,
    ) -> Result<()>;

    async fn save_contents(&mut self, sites: &[Site], updated_by: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Station/site lifecycle consumed alongside the binding engine.
#[async_trait]
pub trait SiteCatalog: Send + Sync {
    /// Creates a site owned by `station` with empty content of its type.
    async fn provision_site(&self, station: &str, spec: &SiteSpec) -> Result<Site>;

    /// Associates an existing site with another station.
    async fn share_site(&self, station: &str, key: &UniqueSite) -> Result<()>;

    /// Owner first, then sharing stations.
    async fn associated_stations(&self, key: &UniqueSite) -> Result<Vec<String>>;

    async fn update_limitation(&self, key: &UniqueSite, limitation: Vec<String>) -> Result<()>;

    /// Deletes the site if [`crate::lifecycle::ensure_removable`] allows it.
    async fn remove_site(&self, station: &str, key: &UniqueSite) -> Result<()>;
}
