//! In-memory implementation of the storage ports.
//!
//! Row locks are emulated with per-key lock sets so no-wait contention
//! behaves like the Postgres adapter: a second transaction touching a locked
//! site or ledger row fails immediately. Writes are staged on the
//! transaction and applied on commit; dropping the transaction discards
//! them and releases its locks.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{BindError, Result};
use crate::lifecycle::{ensure_removable, SiteSpec};
use crate::ports::{BindStore, BindTransaction, SiteCatalog};
use crate::request::{BindRecord, ResourceDelta, StockDelta};
use crate::site::Site;
use crate::types::{MaterialResource, ResourceKey, StockKey, UniqueSite};

#[derive(Debug, Default)]
struct MemoryState {
    sites: BTreeMap<UniqueSite, Site>,
    /// Stations sharing a site, owner excluded.
    shared_with: BTreeMap<UniqueSite, BTreeSet<String>>,
    /// Sites whose content row has gone missing.
    detached: BTreeSet<UniqueSite>,
    resources: BTreeMap<ResourceKey, MaterialResource>,
    stock: BTreeMap<StockKey, Decimal>,
    records: Vec<BindRecord>,
    site_locks: HashSet<UniqueSite>,
    resource_locks: HashSet<ResourceKey>,
}

impl MemoryState {
    fn associated(&self, key: &UniqueSite) -> Vec<String> {
        std::iter::once(key.station.clone())
            .chain(self.shared_with.get(key).into_iter().flatten().cloned())
            .collect()
    }
}

/// Shared, cloneable handle; clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        lock_state(&self.state)
    }

    /// Seeds or replaces a ledger row.
    pub fn insert_resource(&self, resource: MaterialResource) -> Result<()> {
        self.state()?.resources.insert(resource.key(), resource);
        Ok(())
    }

    pub fn resource(&self, key: &ResourceKey) -> Result<Option<MaterialResource>> {
        Ok(self.state()?.resources.get(key).cloned())
    }

    /// Current stock for a key; missing rows read as zero.
    pub fn stock(&self, key: &StockKey) -> Result<Decimal> {
        Ok(self.state()?.stock.get(key).copied().unwrap_or_default())
    }

    pub fn set_stock(&self, key: StockKey, quantity: Decimal) -> Result<()> {
        self.state()?.stock.insert(key, quantity);
        Ok(())
    }

    pub fn records(&self) -> Result<Vec<BindRecord>> {
        Ok(self.state()?.records.clone())
    }

    /// Drops a site's content row while keeping the site, reproducing a
    /// desynchronized directory.
    pub fn detach_content(&self, key: &UniqueSite) -> Result<()> {
        self.state()?.detached.insert(key.clone());
        Ok(())
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>> {
    state
        .lock()
        .map_err(|_| BindError::Internal(anyhow!("in-memory store mutex poisoned")))
}

#[async_trait]
impl BindStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn BindTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            site_locks: Vec::new(),
            resource_locks: Vec::new(),
            pending: Vec::new(),
        }))
    }

    async fn site(&self, key: &UniqueSite) -> Result<Option<Site>> {
        let state = self.state()?;
        let Some(site) = state.sites.get(key) else {
            return Ok(None);
        };
        if state.detached.contains(key) {
            return Err(BindError::SiteContentNotFound(key.clone()));
        }
        Ok(Some(site.clone()))
    }

    async fn list_station_sites(&self, station: &str) -> Result<Vec<Site>> {
        let state = self.state()?;
        state
            .sites
            .iter()
            .filter(|(key, _)| {
                key.station == station
                    || state
                        .shared_with
                        .get(*key)
                        .is_some_and(|stations| stations.contains(station))
            })
            .map(|(key, site)| {
                if state.detached.contains(key) {
                    Err(BindError::SiteContentNotFound(key.clone()))
                } else {
                    Ok(site.clone())
                }
            })
            .collect()
    }
}

#[async_trait]
impl SiteCatalog for InMemoryStore {
    async fn provision_site(&self, station: &str, spec: &SiteSpec) -> Result<Site> {
        let site = spec.build(station)?;
        let mut state = self.state()?;
        if state.sites.contains_key(site.key()) {
            return Err(BindError::Conflict(format!(
                "site {} already exists",
                site.key()
            )));
        }
        state.sites.insert(site.key().clone(), site.clone());
        Ok(site)
    }

    async fn share_site(&self, station: &str, key: &UniqueSite) -> Result<()> {
        let mut state = self.state()?;
        if !state.sites.contains_key(key) {
            return Err(BindError::SiteNotFound(key.clone()));
        }
        if key.station != station {
            state
                .shared_with
                .entry(key.clone())
                .or_default()
                .insert(station.to_string());
        }
        Ok(())
    }

    async fn associated_stations(&self, key: &UniqueSite) -> Result<Vec<String>> {
        let state = self.state()?;
        if !state.sites.contains_key(key) {
            return Err(BindError::SiteNotFound(key.clone()));
        }
        Ok(state.associated(key))
    }

    async fn update_limitation(&self, key: &UniqueSite, limitation: Vec<String>) -> Result<()> {
        let mut state = self.state()?;
        if state.site_locks.contains(key) {
            return Err(BindError::Contention(format!("site {key} is locked")));
        }
        let site = state
            .sites
            .get_mut(key)
            .ok_or_else(|| BindError::SiteNotFound(key.clone()))?;
        site.set_limitation(limitation);
        Ok(())
    }

    async fn remove_site(&self, station: &str, key: &UniqueSite) -> Result<()> {
        let mut state = self.state()?;
        if state.site_locks.contains(key) {
            return Err(BindError::Contention(format!("site {key} is locked")));
        }
        let site = state
            .sites
            .get(key)
            .ok_or_else(|| BindError::SiteNotFound(key.clone()))?;
        ensure_removable(station, site, &state.associated(key))?;
        state.sites.remove(key);
        state.shared_with.remove(key);
        Ok(())
    }
}

enum PendingWrite {
    Record(BindRecord),
    Stock(Vec<StockDelta>),
    Resources(Vec<ResourceDelta>),
    Contents(Vec<Site>),
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    site_locks: Vec<UniqueSite>,
    resource_locks: Vec<ResourceKey>,
    pending: Vec<PendingWrite>,
}

impl MemoryTransaction {
    fn release(&mut self, state: &mut MemoryState) {
        for key in self.site_locks.drain(..) {
            state.site_locks.remove(&key);
        }
        for key in self.resource_locks.drain(..) {
            state.resource_locks.remove(&key);
        }
    }
}

#[async_trait]
impl BindTransaction for MemoryTransaction {
    async fn record_bind(&mut self, record: &BindRecord) -> Result<()> {
        self.pending.push(PendingWrite::Record(record.clone()));
        Ok(())
    }

    async fn lock_sites(&mut self, keys: &[UniqueSite]) -> Result<Vec<Site>> {
        let mut state = lock_state(&self.state)?;
        let mut sites = Vec::with_capacity(keys.len());
        for key in keys {
            let site = state
                .sites
                .get(key)
                .ok_or_else(|| BindError::SiteNotFound(key.clone()))?;
            if state.detached.contains(key) {
                return Err(BindError::SiteContentNotFound(key.clone()));
            }
            if state.site_locks.contains(key) && !self.site_locks.contains(key) {
                return Err(BindError::Contention(format!("site {key} is locked")));
            }
            sites.push(site.clone());
        }
        for key in keys {
            if state.site_locks.insert(key.clone()) {
                self.site_locks.push(key.clone());
            }
        }
        Ok(sites)
    }

    async fn lock_resources(&mut self, keys: &[ResourceKey]) -> Result<Vec<MaterialResource>> {
        let mut state = lock_state(&self.state)?;
        let mut rows = Vec::new();
        for key in keys {
            let Some(row) = state.resources.get(key) else {
                continue;
            };
            if state.resource_locks.contains(key) && !self.resource_locks.contains(key) {
                return Err(BindError::Contention(format!("resource {key} is locked")));
            }
            rows.push(row.clone());
        }
        for row in &rows {
            if state.resource_locks.insert(row.key()) {
                self.resource_locks.push(row.key());
            }
        }
        Ok(rows)
    }

    async fn accumulate_stock(&mut self, deltas: &[StockDelta]) -> Result<()> {
        self.pending.push(PendingWrite::Stock(deltas.to_vec()));
        Ok(())
    }

    async fn apply_resource_deltas(
        &mut self,
        deltas: &[ResourceDelta],
        _updated_by: &str,
    ) -> Result<()> {
        self.pending.push(PendingWrite::Resources(deltas.to_vec()));
        Ok(())
    }

    async fn save_contents(&mut self, sites: &[Site], _updated_by: &str) -> Result<()> {
        self.pending.push(PendingWrite::Contents(sites.to_vec()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let shared = Arc::clone(&this.state);
        let mut state = lock_state(&shared)?;
        for write in std::mem::take(&mut this.pending) {
            match write {
                PendingWrite::Record(record) => state.records.push(record),
                PendingWrite::Stock(deltas) => {
                    for delta in deltas {
                        *state.stock.entry(delta.key).or_default() += delta.quantity;
                    }
                }
                PendingWrite::Resources(deltas) => {
                    for delta in deltas {
                        if let Some(row) = state.resources.get_mut(&delta.key) {
                            row.quantity += delta.quantity;
                        }
                    }
                }
                PendingWrite::Contents(sites) => {
                    for site in sites {
                        state.sites.insert(site.key().clone(), site);
                    }
                }
            }
        }
        this.release(&mut state);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.site_locks.is_empty() && self.resource_locks.is_empty() {
            return;
        }
        let shared = Arc::clone(&self.state);
        if let Ok(mut state) = shared.lock() {
            self.release(&mut state);
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceStatus, SiteSubType, SiteType};

    fn spec(name: &str) -> SiteSpec {
        SiteSpec::new(name, 0, SiteType::Slot, SiteSubType::Material)
    }

    fn ledger_row(id: &str) -> MaterialResource {
        MaterialResource {
            resource_id: id.into(),
            product_type: "RAW".into(),
            product_id: "P".into(),
            quantity: Decimal::from(5),
            status: ResourceStatus::Available,
            warehouse: None,
            expiry: None,
        }
    }

    #[tokio::test]
    async fn second_transaction_fails_fast_on_locked_site() {
        let store = InMemoryStore::new();
        let site = store.provision_site("ST", &spec("a")).await.unwrap();
        let key = site.key().clone();

        let mut first = store.begin().await.unwrap();
        first.lock_sites(&[key.clone()]).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_sites(&[key.clone()]).await.unwrap_err();
        assert!(matches!(err, BindError::Contention(_)));

        drop(first);
        assert!(second.lock_sites(&[key]).await.is_ok());
    }

    #[tokio::test]
    async fn failed_lock_acquires_nothing() {
        let store = InMemoryStore::new();
        let a = store.provision_site("ST", &spec("a")).await.unwrap();
        let b = store.provision_site("ST", &spec("b")).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_sites(&[b.key().clone()]).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx
            .lock_sites(&[a.key().clone(), b.key().clone()])
            .await
            .is_err());

        let mut other = store.begin().await.unwrap();
        assert!(other.lock_sites(&[a.key().clone()]).await.is_ok());
    }

    #[tokio::test]
    async fn missing_site_and_detached_content() {
        let store = InMemoryStore::new();
        let site = store.provision_site("ST", &spec("a")).await.unwrap();
        let mut tx = store.begin().await.unwrap();

        let ghost = UniqueSite::new("ST", "ghost", 0);
        assert!(matches!(
            tx.lock_sites(&[ghost]).await,
            Err(BindError::SiteNotFound(_))
        ));

        store.detach_content(site.key()).unwrap();
        assert!(matches!(
            tx.lock_sites(&[site.key().clone()]).await,
            Err(BindError::SiteContentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn reads_report_detached_content_as_integrity_fault() {
        let store = InMemoryStore::new();
        let site = store.provision_site("ST", &spec("a")).await.unwrap();
        assert!(store
            .site(&UniqueSite::new("ST", "ghost", 0))
            .await
            .unwrap()
            .is_none());

        store.detach_content(site.key()).unwrap();
        assert!(matches!(
            store.site(site.key()).await,
            Err(BindError::SiteContentNotFound(_))
        ));
        assert!(matches!(
            store.list_station_sites("ST").await,
            Err(BindError::SiteContentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn resource_locks_skip_absent_rows() {
        let store = InMemoryStore::new();
        store.insert_resource(ledger_row("A")).unwrap();

        let mut tx = store.begin().await.unwrap();
        let rows = tx
            .lock_resources(&[ResourceKey::new("A", "RAW"), ResourceKey::new("Z", "RAW")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let mut other = store.begin().await.unwrap();
        assert!(matches!(
            other.lock_resources(&[ResourceKey::new("A", "RAW")]).await,
            Err(BindError::Contention(_))
        ));
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = InMemoryStore::new();
        store.insert_resource(ledger_row("A")).unwrap();
        let key = ResourceKey::new("A", "RAW");

        let mut tx = store.begin().await.unwrap();
        tx.lock_resources(&[key.clone()]).await.unwrap();
        tx.apply_resource_deltas(
            &[ResourceDelta {
                key: key.clone(),
                quantity: Decimal::from(-5),
            }],
            "op",
        )
        .await
        .unwrap();
        drop(tx);
        assert_eq!(store.resource(&key).unwrap().unwrap().quantity, Decimal::from(5));

        let mut tx = store.begin().await.unwrap();
        tx.lock_resources(&[key.clone()]).await.unwrap();
        tx.apply_resource_deltas(
            &[ResourceDelta {
                key: key.clone(),
                quantity: Decimal::from(-5),
            }],
            "op",
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.resource(&key).unwrap().unwrap().quantity, Decimal::ZERO);
    }

    #[tokio::test]
    async fn lifecycle_sharing_and_removal() {
        let store = InMemoryStore::new();
        let site = store.provision_site("ST-01", &spec("bin")).await.unwrap();
        let key = site.key().clone();

        assert!(matches!(
            store.provision_site("ST-01", &spec("bin")).await,
            Err(BindError::Conflict(_))
        ));

        store.share_site("ST-02", &key).await.unwrap();
        assert_eq!(
            store.associated_stations(&key).await.unwrap(),
            vec!["ST-01".to_string(), "ST-02".to_string()]
        );
        assert_eq!(store.list_station_sites("ST-02").await.unwrap().len(), 1);

        assert!(store.remove_site("ST-01", &key).await.is_err());

        store
            .update_limitation(&key, vec!["P-1".into()])
            .await
            .unwrap();
        let reread = store.site(&key).await.unwrap().unwrap();
        assert_eq!(reread.limitation().to_vec(), vec!["P-1".to_string()]);
    }

    #[tokio::test]
    async fn owner_removes_unshared_empty_site() {
        let store = InMemoryStore::new();
        let site = store.provision_site("ST-01", &spec("bin")).await.unwrap();
        store.remove_site("ST-01", site.key()).await.unwrap();
        assert!(store.site(site.key()).await.unwrap().is_none());
    }
}
