//! Resource binding engine for factory-floor sites.
//!
//! Stations own sites; sites hold material in one of five topologies (slot,
//! container, collection, queue, colqueue). A bind request applies a batch of
//! verbs to distinct sites in a single transaction, moving resource
//! quantities between the material ledger, warehouse stock and the sites.
//!
//! This crate has no database dependency. Storage is reached through the
//! traits in [`ports`]; `site_binding_postgres` implements them with sqlx and
//! [`memory::InMemoryStore`] implements them for tests and embedding.

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod ports;
pub mod request;
pub mod resource_manager;
pub mod site;
pub mod topology;
pub mod types;

pub use config::{DeviationRule, EngineConfig};
pub use engine::BindEngine;
pub use error::{BindError, ErrorCategory, Result};
pub use lifecycle::SiteSpec;
pub use memory::InMemoryStore;
pub use ports::{BindStore, BindTransaction, SiteCatalog};
pub use request::{BindDetail, BindOption, BindOutcome, BindRequest, BindVerb, BoundResourceRequest};
pub use site::Site;
pub use topology::{Collection, Colqueue, Container, DeviationFilter, Queue, SiteContent, Slot};
pub use types::{
    BoundResource, MaterialResource, MaterialSite, ResourceKey, ResourceStatus, SiteSubType,
    SiteType, StockKey, ToolSite, UniqueSite, WarehouseLocation,
};
