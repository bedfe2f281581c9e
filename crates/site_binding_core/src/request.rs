//! Bind request and response shapes exchanged with callers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BindError;
use crate::types::{
    BoundResource, MaterialSite, ResourceKey, ResourceStatus, SiteType, StockKey, UniqueSite,
    WarehouseLocation,
};

// ── Verbs ─────────────────────────────────────────────────────

/// Bind operation; the prefix names the container family it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BindVerb {
    ContainerBind,
    ContainerAdd,
    ContainerClear,
    ContainerClearDeviation,
    SlotBind,
    SlotClear,
    CollectionBind,
    CollectionAdd,
    CollectionClear,
    CollectionClearDeviation,
    QueueBind,
    QueueClear,
    QueuePush,
    QueuePushPop,
    QueuePop,
    QueueRemove,
    ColqueueBind,
    ColqueueClear,
    ColqueueAdd,
    ColqueuePush,
    ColqueuePushPop,
    ColqueuePop,
    ColqueueRemove,
}

/// How many resources a verb consumes from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Request resources are ignored.
    None,
    ExactlyOne,
    Any,
}

impl BindVerb {
    pub const ALL: [BindVerb; 23] = [
        Self::ContainerBind,
        Self::ContainerAdd,
        Self::ContainerClear,
        Self::ContainerClearDeviation,
        Self::SlotBind,
        Self::SlotClear,
        Self::CollectionBind,
        Self::CollectionAdd,
        Self::CollectionClear,
        Self::CollectionClearDeviation,
        Self::QueueBind,
        Self::QueueClear,
        Self::QueuePush,
        Self::QueuePushPop,
        Self::QueuePop,
        Self::QueueRemove,
        Self::ColqueueBind,
        Self::ColqueueClear,
        Self::ColqueueAdd,
        Self::ColqueuePush,
        Self::ColqueuePushPop,
        Self::ColqueuePop,
        Self::ColqueueRemove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContainerBind => "container_bind",
            Self::ContainerAdd => "container_add",
            Self::ContainerClear => "container_clear",
            Self::ContainerClearDeviation => "container_clear_deviation",
            Self::SlotBind => "slot_bind",
            Self::SlotClear => "slot_clear",
            Self::CollectionBind => "collection_bind",
            Self::CollectionAdd => "collection_add",
            Self::CollectionClear => "collection_clear",
            Self::CollectionClearDeviation => "collection_clear_deviation",
            Self::QueueBind => "queue_bind",
            Self::QueueClear => "queue_clear",
            Self::QueuePush => "queue_push",
            Self::QueuePushPop => "queue_push_pop",
            Self::QueuePop => "queue_pop",
            Self::QueueRemove => "queue_remove",
            Self::ColqueueBind => "colqueue_bind",
            Self::ColqueueClear => "colqueue_clear",
            Self::ColqueueAdd => "colqueue_add",
            Self::ColqueuePush => "colqueue_push",
            Self::ColqueuePushPop => "colqueue_push_pop",
            Self::ColqueuePop => "colqueue_pop",
            Self::ColqueueRemove => "colqueue_remove",
        }
    }

    /// Site type the verb is allowed on.
    pub fn family(&self) -> SiteType {
        match self {
            Self::ContainerBind
            | Self::ContainerAdd
            | Self::ContainerClear
            | Self::ContainerClearDeviation => SiteType::Container,
            Self::SlotBind | Self::SlotClear => SiteType::Slot,
            Self::CollectionBind
            | Self::CollectionAdd
            | Self::CollectionClear
            | Self::CollectionClearDeviation => SiteType::Collection,
            Self::QueueBind
            | Self::QueueClear
            | Self::QueuePush
            | Self::QueuePushPop
            | Self::QueuePop
            | Self::QueueRemove => SiteType::Queue,
            Self::ColqueueBind
            | Self::ColqueueClear
            | Self::ColqueueAdd
            | Self::ColqueuePush
            | Self::ColqueuePushPop
            | Self::ColqueuePop
            | Self::ColqueueRemove => SiteType::Colqueue,
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Self::SlotBind | Self::QueueBind | Self::QueuePush | Self::QueuePushPop => {
                Arity::ExactlyOne
            }
            Self::ContainerBind
            | Self::ContainerAdd
            | Self::CollectionBind
            | Self::CollectionAdd
            | Self::ColqueueBind
            | Self::ColqueueAdd
            | Self::ColqueuePush
            | Self::ColqueuePushPop => Arity::Any,
            _ => Arity::None,
        }
    }

    /// Only placement-style binds may carry resources of unspecified quantity.
    pub fn accepts_unspecified_quantity(&self) -> bool {
        matches!(self, Self::SlotBind | Self::QueueBind)
    }

    /// Verbs that address a queue position or a colqueue collection by index.
    pub fn requires_queue_index(&self) -> bool {
        matches!(
            self,
            Self::QueueBind
                | Self::QueueRemove
                | Self::ColqueueBind
                | Self::ColqueueAdd
                | Self::ColqueueRemove
                | Self::ColqueuePush
                | Self::ColqueuePushPop
        )
    }
}

impl fmt::Display for BindVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindVerb {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| BindError::UnknownVerb(s.to_string()))
    }
}

impl TryFrom<String> for BindVerb {
    type Error = BindError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BindVerb> for String {
    fn from(v: BindVerb) -> Self {
        v.as_str().to_string()
    }
}

// ── Request ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindOption {
    /// Queue push end; `push_pop` pops from the opposite end.
    #[serde(default)]
    pub head: bool,
    /// Position within a queue, or collection index within a colqueue.
    #[serde(default)]
    pub queue_index: Option<u16>,
}

impl BindOption {
    pub fn head() -> Self {
        Self {
            head: true,
            queue_index: None,
        }
    }

    pub fn at(index: u16) -> Self {
        Self {
            head: false,
            queue_index: Some(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundResourceRequest {
    pub resource_id: String,
    pub product_id: String,
    pub product_type: String,
    /// `None` binds the resource for placement only.
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub grade: String,
    /// Overrides the warehouse location recorded in the ledger.
    #[serde(default)]
    pub warehouse: Option<WarehouseLocation>,
}

impl BoundResourceRequest {
    pub fn new(
        resource_id: impl Into<String>,
        product_id: impl Into<String>,
        product_type: impl Into<String>,
        quantity: Option<Decimal>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            product_id: product_id.into(),
            product_type: product_type.into(),
            quantity,
            status: ResourceStatus::default(),
            expiry: None,
            grade: String::new(),
            warehouse: None,
        }
    }

    pub fn with_warehouse(mut self, warehouse: WarehouseLocation) -> Self {
        self.warehouse = Some(warehouse);
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.resource_id, &self.product_type)
    }

    pub fn to_bound(&self) -> BoundResource {
        BoundResource::Material(MaterialSite {
            resource_id: self.resource_id.clone(),
            product_id: self.product_id.clone(),
            product_type: self.product_type.clone(),
            quantity: self.quantity,
            status: self.status,
            expiry: self.expiry,
            grade: self.grade.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindDetail {
    pub site: UniqueSite,
    pub verb: BindVerb,
    #[serde(default)]
    pub resources: Vec<BoundResourceRequest>,
    #[serde(default)]
    pub option: BindOption,
}

impl BindDetail {
    pub fn new(site: UniqueSite, verb: BindVerb, resources: Vec<BoundResourceRequest>) -> Self {
        Self {
            site,
            verb,
            resources,
            option: BindOption::default(),
        }
    }

    pub fn with_option(mut self, option: BindOption) -> Self {
        self.option = option;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindRequest {
    pub details: Vec<BindDetail>,
    pub updated_by: String,
}

impl BindRequest {
    pub fn new(updated_by: impl Into<String>, details: Vec<BindDetail>) -> Self {
        Self {
            details,
            updated_by: updated_by.into(),
        }
    }
}

/// Append-only audit row written at the start of every bind transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindRecord {
    pub details: Vec<BindDetail>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// ── Response ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplacedResources {
    pub site: UniqueSite,
    pub resources: Vec<BoundResource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDelta {
    pub key: ResourceKey,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub key: StockKey,
    pub quantity: Decimal,
}

/// What a committed bind changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindOutcome {
    /// One entry per detail, in request order (possibly empty).
    pub displaced: Vec<DisplacedResources>,
    pub resource_deltas: Vec<ResourceDelta>,
    pub stock_deltas: Vec<StockDelta>,
}
