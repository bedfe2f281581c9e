//! PostgreSQL adapter for `site_binding_core`.
//!
//! [`PgBindStore`] implements the `BindStore`, `BindTransaction` and
//! `SiteCatalog` ports against the `site_binding` schema shipped in
//! `migrations/`. [`DatabaseManager`] owns the pool and applies migrations.

pub mod db;
pub mod store;
mod sqlx_types;

pub use db::{DatabaseConfig, DatabaseManager};
pub use store::{PgBindStore, PgBindTransaction};
