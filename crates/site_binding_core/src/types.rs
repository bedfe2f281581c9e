//! Identity and value types shared by the topology model, the orchestrator
//! and the storage ports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BindError;

// ── Site identity ─────────────────────────────────────────────

/// (station, site-name, site-index). The station is the owning station;
/// other stations reference the same site through an association.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UniqueSite {
    pub station: String,
    pub name: String,
    pub index: i16,
}

impl UniqueSite {
    pub fn new(station: impl Into<String>, name: impl Into<String>, index: i16) -> Self {
        Self {
            station: station.into(),
            name: name.into(),
            index,
        }
    }
}

impl fmt::Display for UniqueSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.station, self.name, self.index)
    }
}

/// Container topology of a site. Immutable once the site is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteType {
    Slot,
    Container,
    Collection,
    Queue,
    Colqueue,
}

impl SiteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slot => "slot",
            Self::Container => "container",
            Self::Collection => "collection",
            Self::Queue => "queue",
            Self::Colqueue => "colqueue",
        }
    }
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteType {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slot" => Ok(Self::Slot),
            "container" => Ok(Self::Container),
            "collection" => Ok(Self::Collection),
            "queue" => Ok(Self::Queue),
            "colqueue" => Ok(Self::Colqueue),
            other => Err(BindError::Integrity(format!("unknown site type: {other}"))),
        }
    }
}

/// What kind of thing a site is meant to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteSubType {
    Operator,
    Material,
    Tool,
}

impl SiteSubType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Material => "material",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for SiteSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteSubType {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operator" => Ok(Self::Operator),
            "material" => Ok(Self::Material),
            "tool" => Ok(Self::Tool),
            other => Err(BindError::Integrity(format!("unknown site sub-type: {other}"))),
        }
    }
}

// ── Bound resources ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    #[default]
    Available,
    Hold,
    Inspection,
    Mounted,
    Unavailable,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Hold => "hold",
            Self::Inspection => "inspection",
            Self::Mounted => "mounted",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "hold" => Ok(Self::Hold),
            "inspection" => Ok(Self::Inspection),
            "mounted" => Ok(Self::Mounted),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(BindError::Integrity(format!(
                "unknown resource status: {other}"
            ))),
        }
    }
}

/// Material placed on a site.
///
/// `quantity == None` means the amount is untracked: the entry is
/// placement-only and never contributes ledger or stock deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSite {
    pub resource_id: String,
    pub product_id: String,
    pub product_type: String,
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub status: ResourceStatus,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub grade: String,
}

impl MaterialSite {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.resource_id, &self.product_type)
    }
}

/// Tool mounted on a site. Tools carry no quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSite {
    pub resource_id: String,
    pub tool_id: String,
    pub installed_at: DateTime<Utc>,
}

/// Material-or-tool union; exactly one side is populated by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundResource {
    Material(MaterialSite),
    Tool(ToolSite),
}

impl BoundResource {
    pub fn resource_id(&self) -> &str {
        match self {
            Self::Material(m) => &m.resource_id,
            Self::Tool(t) => &t.resource_id,
        }
    }

    pub fn as_material(&self) -> Option<&MaterialSite> {
        match self {
            Self::Material(m) => Some(m),
            Self::Tool(_) => None,
        }
    }

    /// Quantity that participates in ledger math, if any.
    pub fn tracked_quantity(&self) -> Option<Decimal> {
        self.as_material().and_then(|m| m.quantity)
    }
}

impl From<MaterialSite> for BoundResource {
    fn from(m: MaterialSite) -> Self {
        Self::Material(m)
    }
}

impl From<ToolSite> for BoundResource {
    fn from(t: ToolSite) -> Self {
        Self::Tool(t)
    }
}

// ── Ledger and stock keys ─────────────────────────────────────

/// Ledger identity: one row per (resource-id, product-type).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_id: String,
    pub product_type: String,
}

impl ResourceKey {
    pub fn new(resource_id: impl Into<String>, product_type: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            product_type: product_type.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.resource_id, self.product_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WarehouseLocation {
    pub warehouse_id: String,
    pub location: String,
}

impl WarehouseLocation {
    pub fn new(warehouse_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            warehouse_id: warehouse_id.into(),
            location: location.into(),
        }
    }
}

/// Aggregate stock identity: (warehouse-id, location, product-id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub warehouse_id: String,
    pub location: String,
    pub product_id: String,
}

impl StockKey {
    pub fn new(warehouse: &WarehouseLocation, product_id: impl Into<String>) -> Self {
        Self {
            warehouse_id: warehouse.warehouse_id.clone(),
            location: warehouse.location.clone(),
            product_id: product_id.into(),
        }
    }
}

/// Ledger row for one (resource-id, product-type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialResource {
    pub resource_id: String,
    pub product_type: String,
    pub product_id: String,
    pub quantity: Decimal,
    pub status: ResourceStatus,
    pub warehouse: Option<WarehouseLocation>,
    pub expiry: Option<DateTime<Utc>>,
}

impl MaterialResource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.resource_id, &self.product_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_type_round_trips_through_text() {
        for t in [
            SiteType::Slot,
            SiteType::Container,
            SiteType::Collection,
            SiteType::Queue,
            SiteType::Colqueue,
        ] {
            assert_eq!(t.as_str().parse::<SiteType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_site_type_is_integrity_fault() {
        let err = "drawer".parse::<SiteType>().unwrap_err();
        assert!(matches!(err, BindError::Integrity(_)));
    }

    #[test]
    fn bound_resource_serializes_externally_tagged() {
        let r = BoundResource::Material(MaterialSite {
            resource_id: "R1".into(),
            product_id: "P1".into(),
            product_type: "RUBBER".into(),
            quantity: Some(Decimal::new(125, 1)),
            status: ResourceStatus::Available,
            expiry: None,
            grade: "A".into(),
        });
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["material"]["resource_id"], "R1");
        assert_eq!(json["material"]["quantity"], "12.5");
        let back: BoundResource = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn tools_have_no_tracked_quantity() {
        let t = BoundResource::Tool(ToolSite {
            resource_id: "T1".into(),
            tool_id: "MOLD-7".into(),
            installed_at: Utc::now(),
        });
        assert_eq!(t.tracked_quantity(), None);
        assert_eq!(t.resource_id(), "T1");
    }
}
