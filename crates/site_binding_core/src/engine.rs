//! Bind orchestrator.
//!
//! One bind request is one transaction: record the request, lock every target
//! site, gate the whole batch, mutate contents in memory, lock and adjust the
//! touched ledger rows, accumulate warehouse stock, write contents back and
//! commit. Any error drops the transaction, which rolls everything back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{BindError, Result};
use crate::ports::BindStore;
use crate::request::{
    Arity, BindDetail, BindOutcome, BindRecord, BindRequest, BindVerb, BoundResourceRequest,
    DisplacedResources,
};
use crate::resource_manager::ResourceManager;
use crate::site::Site;
use crate::topology::{Collection, DeviationFilter, SiteContent, TopologyError};
use crate::types::{BoundResource, SiteSubType, UniqueSite};

pub struct BindEngine {
    store: Arc<dyn BindStore>,
    config: EngineConfig,
    deviation: Arc<dyn DeviationFilter>,
}

impl BindEngine {
    pub fn new(store: Arc<dyn BindStore>, config: EngineConfig) -> Self {
        let deviation: Arc<dyn DeviationFilter> = Arc::new(config.deviation);
        Self {
            store,
            config,
            deviation,
        }
    }

    /// Replaces the configured deviation rule with a custom predicate.
    pub fn with_deviation_filter(mut self, filter: Arc<dyn DeviationFilter>) -> Self {
        self.deviation = filter;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current site and content, read without locking.
    pub async fn site(&self, key: &UniqueSite) -> Result<Site> {
        self.store
            .site(key)
            .await?
            .ok_or_else(|| BindError::SiteNotFound(key.clone()))
    }

    pub async fn list_station_sites(&self, station: &str) -> Result<Vec<Site>> {
        self.store.list_station_sites(station).await
    }

    /// Binds under the configured deadline.
    pub async fn bind(&self, request: &BindRequest) -> Result<BindOutcome> {
        self.bind_with_deadline(request, self.config.bind_timeout())
            .await
    }

    /// Binds under a caller-supplied deadline. On expiry the in-flight
    /// transaction is dropped and nothing is applied.
    pub async fn bind_with_deadline(
        &self,
        request: &BindRequest,
        deadline: Duration,
    ) -> Result<BindOutcome> {
        match tokio::time::timeout(deadline, self.run(request)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    debug!(error = %e, retriable = e.is_retriable(), "bind aborted");
                }
                result
            }
            Err(_) => {
                warn!(?deadline, updated_by = %request.updated_by, "bind deadline exceeded");
                Err(BindError::Timeout(deadline))
            }
        }
    }

    async fn run(&self, request: &BindRequest) -> Result<BindOutcome> {
        validate_request(request)?;
        if request.details.is_empty() {
            return Ok(BindOutcome::default());
        }

        let mut tx = self.store.begin().await?;
        tx.record_bind(&BindRecord {
            details: request.details.clone(),
            created_by: request.updated_by.clone(),
            created_at: Utc::now(),
        })
        .await?;

        let keys: Vec<UniqueSite> = request.details.iter().map(|d| d.site.clone()).collect();
        let mut sites = tx.lock_sites(&keys).await?;
        check_gates(&request.details, &sites)?;

        let mut manager = ResourceManager::new();
        let mut displaced = Vec::with_capacity(sites.len());
        for (index, (detail, site)) in request.details.iter().zip(sites.iter_mut()).enumerate() {
            let out = apply_detail(index, detail, site, self.deviation.as_ref())?;
            if detail.verb.arity() != Arity::None {
                manager.enter(&detail.resources);
            }
            manager.displaced(&out);
            displaced.push(DisplacedResources {
                site: detail.site.clone(),
                resources: out,
            });
        }

        let resource_keys = manager.resource_keys();
        let ledger = if resource_keys.is_empty() {
            Vec::new()
        } else {
            tx.lock_resources(&resource_keys).await?
        };
        let (resource_deltas, stock_deltas) = manager.deltas(&ledger);

        if !stock_deltas.is_empty() {
            tx.accumulate_stock(&stock_deltas).await?;
        }
        if !resource_deltas.is_empty() {
            tx.apply_resource_deltas(&resource_deltas, &request.updated_by)
                .await?;
        }
        tx.save_contents(&sites, &request.updated_by).await?;
        tx.commit().await?;

        info!(
            details = request.details.len(),
            ledger_rows = resource_deltas.len(),
            stock_rows = stock_deltas.len(),
            updated_by = %request.updated_by,
            "bind committed"
        );
        Ok(BindOutcome {
            displaced,
            resource_deltas,
            stock_deltas,
        })
    }
}

/// Request-only checks, run before any row is touched.
fn validate_request(request: &BindRequest) -> Result<()> {
    let mut seen = HashSet::new();
    for detail in &request.details {
        if !seen.insert(&detail.site) {
            return Err(BindError::DuplicatedSites(detail.site.clone()));
        }
    }

    for (index, detail) in request.details.iter().enumerate() {
        let verb = detail.verb;
        if let Some(r) = detail.resources.iter().find(|r| r.quantity.is_none()) {
            if !verb.accepts_unspecified_quantity() {
                return Err(BindError::UnspecifiedQuantity {
                    detail: index,
                    resource_id: r.resource_id.clone(),
                    verb,
                });
            }
        }
        if verb.arity() == Arity::ExactlyOne && detail.resources.len() != 1 {
            return Err(BindError::InvalidRequest(format!(
                "detail #{index}: {verb} takes exactly one resource, got {}",
                detail.resources.len()
            )));
        }
        if verb.requires_queue_index() && detail.option.queue_index.is_none() {
            return Err(BindError::InvalidOption {
                detail: index,
                reason: format!("{verb} requires a queue index"),
            });
        }
        if let Some(r) = detail
            .resources
            .iter()
            .find(|r| r.resource_id.is_empty() || r.product_type.is_empty())
        {
            return Err(BindError::InvalidRequest(format!(
                "detail #{index}: resource '{}' lacks an id or product type",
                r.resource_id
            )));
        }
    }
    Ok(())
}

/// Batch-wide gates against the locked sites. Every detail is checked
/// before any of them is applied.
fn check_gates(details: &[BindDetail], sites: &[Site]) -> Result<()> {
    for site in sites {
        if site.sub_type() != SiteSubType::Material {
            return Err(BindError::SubTypeMismatch {
                site: site.key().clone(),
                sub_type: site.sub_type(),
            });
        }
    }
    for (index, (detail, site)) in details.iter().zip(sites).enumerate() {
        if detail.verb.family() != site.site_type() {
            return Err(BindError::TypeMismatch {
                detail: index,
                site: site.key().clone(),
                site_type: site.site_type(),
                verb: detail.verb,
            });
        }
    }
    for (index, (detail, site)) in details.iter().zip(sites).enumerate() {
        if detail.verb.arity() == Arity::None {
            continue;
        }
        if let Some(r) = detail.resources.iter().find(|r| !site.allows(&r.product_id)) {
            return Err(BindError::LimitationViolated {
                detail: index,
                site: site.key().clone(),
                product_id: r.product_id.clone(),
            });
        }
    }
    Ok(())
}

/// Runs one verb against its site and returns what it displaced.
fn apply_detail(
    index: usize,
    detail: &BindDetail,
    site: &mut Site,
    deviation: &dyn DeviationFilter,
) -> Result<Vec<BoundResource>> {
    let site_type = site.site_type();
    let out_of_range = |e: TopologyError| BindError::InvalidOption {
        detail: index,
        reason: e.to_string(),
    };
    let incoming = || -> Vec<BoundResource> {
        detail
            .resources
            .iter()
            .map(BoundResourceRequest::to_bound)
            .collect()
    };
    let single = || -> Result<BoundResource> {
        detail
            .resources
            .first()
            .map(BoundResourceRequest::to_bound)
            .ok_or_else(|| {
                BindError::InvalidRequest(format!("detail #{index}: no resource supplied"))
            })
    };
    let queue_index = || -> Result<usize> {
        detail
            .option
            .queue_index
            .map(usize::from)
            .ok_or_else(|| BindError::InvalidOption {
                detail: index,
                reason: format!("{} requires a queue index", detail.verb),
            })
    };
    let head = detail.option.head;

    let displaced = match (detail.verb, site.content_mut()) {
        (BindVerb::SlotBind, SiteContent::Slot(s)) => s.bind(single()?).into_iter().collect(),
        (BindVerb::SlotClear, SiteContent::Slot(s)) => s.clear().into_iter().collect(),

        (BindVerb::ContainerBind, SiteContent::Container(c)) => c.bind(incoming()),
        (BindVerb::ContainerAdd, SiteContent::Container(c)) => {
            c.add(incoming());
            Vec::new()
        }
        (BindVerb::ContainerClear, SiteContent::Container(c)) => c.clear(),
        (BindVerb::ContainerClearDeviation, SiteContent::Container(c)) => {
            c.clean_deviation(deviation);
            Vec::new()
        }

        (BindVerb::CollectionBind, SiteContent::Collection(c)) => c.bind(incoming()),
        (BindVerb::CollectionAdd, SiteContent::Collection(c)) => {
            c.add(incoming());
            Vec::new()
        }
        (BindVerb::CollectionClear, SiteContent::Collection(c)) => c.clear(),
        (BindVerb::CollectionClearDeviation, SiteContent::Collection(c)) => {
            c.clean_deviation(deviation);
            Vec::new()
        }

        (BindVerb::QueueBind, SiteContent::Queue(q)) => {
            q.bind(queue_index()?, single()?).into_iter().collect()
        }
        (BindVerb::QueueClear, SiteContent::Queue(q)) => q.clear(),
        (BindVerb::QueuePush, SiteContent::Queue(q)) => {
            q.push(single()?, head);
            Vec::new()
        }
        (BindVerb::QueuePushPop, SiteContent::Queue(q)) => {
            q.push_pop(single()?, head).into_iter().collect()
        }
        (BindVerb::QueuePop, SiteContent::Queue(q)) => q.pop().into_iter().collect(),
        (BindVerb::QueueRemove, SiteContent::Queue(q)) => q
            .remove(queue_index()?)
            .map_err(out_of_range)?
            .into_iter()
            .collect(),

        (BindVerb::ColqueueBind, SiteContent::Colqueue(q)) => q.bind(queue_index()?, incoming()),
        (BindVerb::ColqueueClear, SiteContent::Colqueue(q)) => q.clear(),
        (BindVerb::ColqueueAdd, SiteContent::Colqueue(q)) => {
            q.add(queue_index()?, incoming());
            Vec::new()
        }
        (BindVerb::ColqueuePush, SiteContent::Colqueue(q)) => {
            q.push(queue_index()?, Collection::new(incoming()))
                .map_err(out_of_range)?;
            Vec::new()
        }
        (BindVerb::ColqueuePushPop, SiteContent::Colqueue(q)) => q
            .push_pop(queue_index()?, Collection::new(incoming()))
            .map_err(out_of_range)?,
        (BindVerb::ColqueuePop, SiteContent::Colqueue(q)) => q.pop(),
        (BindVerb::ColqueueRemove, SiteContent::Colqueue(q)) => {
            q.remove(queue_index()?).map_err(out_of_range)?
        }

        (verb, _) => {
            return Err(BindError::TypeMismatch {
                detail: index,
                site: detail.site.clone(),
                site_type,
                verb,
            })
        }
    };
    Ok(displaced)
}
