//! Per-request accumulator turning resource movements into net ledger and
//! stock deltas.
//!
//! A resource entering a site leaves its warehouse placement (negative
//! delta); a displaced resource returns to it (positive delta). Untracked
//! quantities and tools never move numbers.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::request::{BoundResourceRequest, ResourceDelta, StockDelta};
use crate::types::{BoundResource, MaterialResource, ResourceKey, StockKey, WarehouseLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Enter,
    Leave,
}

#[derive(Debug, Clone)]
struct Movement {
    key: ResourceKey,
    product_id: String,
    quantity: Decimal,
    direction: Direction,
    warehouse: Option<WarehouseLocation>,
}

impl Movement {
    fn signed(&self) -> Decimal {
        match self.direction {
            Direction::Enter => -self.quantity,
            Direction::Leave => self.quantity,
        }
    }
}

#[derive(Debug, Default)]
pub struct ResourceManager {
    movements: Vec<Movement>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records requested resources moving onto a site.
    pub fn enter<'a>(&mut self, requests: impl IntoIterator<Item = &'a BoundResourceRequest>) {
        for req in requests {
            let Some(quantity) = req.quantity else {
                continue;
            };
            self.movements.push(Movement {
                key: req.key(),
                product_id: req.product_id.clone(),
                quantity,
                direction: Direction::Enter,
                warehouse: req.warehouse.clone(),
            });
        }
    }

    /// Records resources a mutation pushed off a site.
    pub fn displaced<'a>(&mut self, resources: impl IntoIterator<Item = &'a BoundResource>) {
        for material in resources.into_iter().filter_map(BoundResource::as_material) {
            let Some(quantity) = material.quantity else {
                continue;
            };
            self.movements.push(Movement {
                key: material.key(),
                product_id: material.product_id.clone(),
                quantity,
                direction: Direction::Leave,
                warehouse: None,
            });
        }
    }

    /// Distinct ledger keys touched, sorted so locks are taken in a stable order.
    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        self.movements
            .iter()
            .map(|m| m.key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Net deltas against the locked ledger rows. Resources absent from the
    /// ledger contribute nothing; resources without a resolvable warehouse
    /// location move the ledger but not the stock.
    pub fn deltas(&self, ledger: &[MaterialResource]) -> (Vec<ResourceDelta>, Vec<StockDelta>) {
        let rows: HashMap<ResourceKey, &MaterialResource> =
            ledger.iter().map(|row| (row.key(), row)).collect();

        let mut resource_deltas: BTreeMap<ResourceKey, Decimal> = BTreeMap::new();
        let mut stock_deltas: BTreeMap<StockKey, Decimal> = BTreeMap::new();

        for movement in &self.movements {
            let Some(row) = rows.get(&movement.key) else {
                debug!(
                    resource_id = %movement.key.resource_id,
                    product_type = %movement.key.product_type,
                    "resource not in ledger, skipping delta"
                );
                continue;
            };
            *resource_deltas.entry(movement.key.clone()).or_default() += movement.signed();

            match movement.warehouse.as_ref().or(row.warehouse.as_ref()) {
                Some(location) => {
                    *stock_deltas
                        .entry(StockKey::new(location, &movement.product_id))
                        .or_default() += movement.signed();
                }
                None => warn!(
                    resource_id = %movement.key.resource_id,
                    product_type = %movement.key.product_type,
                    "no warehouse location for resource, stock left untouched"
                ),
            }
        }

        let resource_deltas = resource_deltas
            .into_iter()
            .filter(|(_, q)| !q.is_zero())
            .map(|(key, quantity)| ResourceDelta { key, quantity })
            .collect();
        let stock_deltas = stock_deltas
            .into_iter()
            .filter(|(_, q)| !q.is_zero())
            .map(|(key, quantity)| StockDelta { key, quantity })
            .collect();
        (resource_deltas, stock_deltas)
    }
}
