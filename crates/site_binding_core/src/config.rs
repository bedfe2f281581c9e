//! Engine configuration.

use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::topology::DeviationFilter;
use crate::types::BoundResource;

/// Default deadline for one bind transaction.
pub const DEFAULT_BIND_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline applied by `BindEngine::bind`; exceeding it rolls back.
    pub bind_timeout_ms: u64,
    /// Which container entries `*_clear_deviation` verbs drop.
    pub deviation: DeviationRule,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_timeout_ms: DEFAULT_BIND_TIMEOUT_MS,
            deviation: DeviationRule::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config = serde_yaml::from_str(yaml).context("parsing engine config")?;
        Ok(config)
    }

    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms)
    }
}

/// Built-in deviation predicates. Hosts needing something else pass their
/// own [`DeviationFilter`] to `BindEngine::with_deviation_filter`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationRule {
    /// Material whose tracked quantity is zero or negative.
    #[default]
    NonPositiveQuantity,
    /// Material whose tracked quantity is exactly zero.
    ZeroQuantity,
    /// Material placed without a tracked quantity.
    UntrackedQuantity,
}

impl DeviationFilter for DeviationRule {
    fn is_deviation(&self, resource: &BoundResource) -> bool {
        let Some(material) = resource.as_material() else {
            return false;
        };
        match self {
            Self::NonPositiveQuantity => material.quantity.is_some_and(|q| q <= Decimal::ZERO),
            Self::ZeroQuantity => material.quantity.is_some_and(|q| q.is_zero()),
            Self::UntrackedQuantity => material.quantity.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MaterialSite, ToolSite};

    fn mat(qty: Option<i64>) -> BoundResource {
        BoundResource::Material(MaterialSite {
            resource_id: "R".into(),
            product_id: "P".into(),
            product_type: "T".into(),
            quantity: qty.map(Decimal::from),
            status: Default::default(),
            expiry: None,
            grade: String::new(),
        })
    }

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config = EngineConfig::from_yaml_str("bind_timeout_ms: 250\n").unwrap();
        assert_eq!(config.bind_timeout(), Duration::from_millis(250));
        assert_eq!(config.deviation, DeviationRule::NonPositiveQuantity);
    }

    #[test]
    fn deviation_rule_from_yaml() {
        let config = EngineConfig::from_yaml_str("deviation: untracked_quantity\n").unwrap();
        assert_eq!(config.bind_timeout_ms, DEFAULT_BIND_TIMEOUT_MS);
        assert_eq!(config.deviation, DeviationRule::UntrackedQuantity);
    }

    #[test]
    fn malformed_yaml_is_internal_error() {
        assert!(EngineConfig::from_yaml_str("bind_timeout_ms: [").is_err());
    }

    #[test]
    fn rules_classify_entries() {
        let rule = DeviationRule::NonPositiveQuantity;
        assert!(rule.is_deviation(&mat(Some(0))));
        assert!(rule.is_deviation(&mat(Some(-3))));
        assert!(!rule.is_deviation(&mat(Some(1))));
        assert!(!rule.is_deviation(&mat(None)));

        assert!(DeviationRule::ZeroQuantity.is_deviation(&mat(Some(0))));
        assert!(!DeviationRule::ZeroQuantity.is_deviation(&mat(Some(-1))));
        assert!(DeviationRule::UntrackedQuantity.is_deviation(&mat(None)));

        let tool = BoundResource::Tool(ToolSite {
            resource_id: "T".into(),
            tool_id: "X".into(),
            installed_at: chrono::Utc::now(),
        });
        assert!(!rule.is_deviation(&tool));
    }
}
