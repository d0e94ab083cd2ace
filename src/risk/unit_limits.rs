// =============================================================================
// Unit limit manager — per-stock, per-sector, and portfolio unit caps
// =============================================================================
//
// A "unit" is one Turtle position block. Checks run in order: total cap,
// per-stock cap, sector cap. Every rejection carries a structured reason so
// the order manager can surface unit_limit_blocked decisions verbatim.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;

use crate::config::RiskConfig;
use crate::error::Result;
use crate::store::Store;

/// Snapshot of unit allocation across open positions.
#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub total_units: u32,
    pub available_units: u32,
    pub max_units_total: u32,
    pub stock_units: HashMap<i64, u32>,
    pub sector_units: HashMap<String, u32>,
}

/// Outcome of a can-add check.
#[derive(Debug, Clone, Serialize)]
pub struct UnitCheckResult {
    pub can_add: bool,
    pub reason: String,
    pub limit_kind: Option<&'static str>,
    pub current_units: u32,
    pub limit: u32,
}

pub struct UnitLimitManager {
    max_units_per_stock: u32,
    max_units_correlated: u32,
    max_units_loosely_correlated: u32,
    max_units_total: u32,
    store: Store,
}

impl UnitLimitManager {
    pub fn new(config: &RiskConfig, store: Store) -> Self {
        Self {
            max_units_per_stock: config.max_units_per_stock,
            max_units_correlated: config.max_units_correlated,
            max_units_loosely_correlated: config.max_units_loosely_correlated,
            max_units_total: config.max_units_total,
            store,
        }
    }

    pub async fn unit_status(&self) -> Result<UnitStatus> {
        let rows = self.store.open_position_units().await?;

        let mut total_units = 0u32;
        let mut stock_units: HashMap<i64, u32> = HashMap::new();
        let mut sector_units: HashMap<String, u32> = HashMap::new();

        for (stock_id, units, sector) in rows {
            total_units += units;
            *stock_units.entry(stock_id).or_insert(0) += units;
            if let Some(sector) = sector {
                *sector_units.entry(sector).or_insert(0) += units;
            }
        }

        Ok(UnitStatus {
            total_units,
            available_units: self.max_units_total.saturating_sub(total_units),
            max_units_total: self.max_units_total,
            stock_units,
            sector_units,
        })
    }

    pub async fn available_units(&self) -> Result<u32> {
        Ok(self.unit_status().await?.available_units)
    }

    /// Can one more unit be added for this stock? Checks total, per-stock,
    /// then sector cap, returning the first violated limit.
    pub async fn can_add_unit(
        &self,
        stock_id: i64,
        sector: Option<&str>,
    ) -> Result<UnitCheckResult> {
        let status = self.unit_status().await?;

        if status.available_units == 0 {
            return Ok(UnitCheckResult {
                can_add: false,
                reason: format!(
                    "total unit limit reached ({}/{})",
                    status.total_units, self.max_units_total
                ),
                limit_kind: Some("total"),
                current_units: status.total_units,
                limit: self.max_units_total,
            });
        }

        let stock_units = status.stock_units.get(&stock_id).copied().unwrap_or(0);
        if stock_units >= self.max_units_per_stock {
            return Ok(UnitCheckResult {
                can_add: false,
                reason: format!(
                    "stock unit limit reached ({stock_units}/{})",
                    self.max_units_per_stock
                ),
                limit_kind: Some("per-stock"),
                current_units: stock_units,
                limit: self.max_units_per_stock,
            });
        }

        if let Some(sector) = sector {
            let sector_units = status.sector_units.get(sector).copied().unwrap_or(0);
            if sector_units >= self.max_units_correlated {
                return Ok(UnitCheckResult {
                    can_add: false,
                    reason: format!(
                        "sector unit limit reached for {sector} ({sector_units}/{})",
                        self.max_units_correlated
                    ),
                    limit_kind: Some("sector"),
                    current_units: sector_units,
                    limit: self.max_units_correlated,
                });
            }
        }

        Ok(UnitCheckResult {
            can_add: true,
            reason: "unit can be added".to_string(),
            limit_kind: None,
            current_units: stock_units,
            limit: self.max_units_per_stock,
        })
    }

    /// Cap on simultaneously held stocks implied by the unit budget.
    pub fn max_positions(&self) -> u32 {
        self.max_units_total / self.max_units_per_stock
    }

    pub fn sector_capacity(&self, current_sector_units: u32) -> u32 {
        self.max_units_correlated.saturating_sub(current_sector_units)
    }

    pub fn loosely_correlated_capacity(&self, current_units: u32) -> u32 {
        self.max_units_loosely_correlated.saturating_sub(current_units)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderMethod, Side, StopLossKind, Venue};
    use rust_decimal_macros::dec;

    async fn open_position(store: &Store, symbol: &str, sector: Option<&str>, units: u32) -> i64 {
        let stock_id = store
            .insert_stock(symbol, symbol, Venue::Kospi, sector)
            .await
            .unwrap();
        let order = store
            .create_order(stock_id, None, Side::Buy, OrderMethod::Market, 100, None)
            .await
            .unwrap();
        let position_id = store
            .record_entry_fill(
                order, None, None, stock_id, 100, dec!(50000), Some(1),
                dec!(48000), StopLossKind::TwoN,
            )
            .await
            .unwrap();
        for _ in 1..units {
            let add = store
                .create_order(stock_id, Some(position_id), Side::Buy, OrderMethod::Market, 100, None)
                .await
                .unwrap();
            store
                .record_pyramid_fill(add, None, None, position_id, 100, dec!(50500), None)
                .await
                .unwrap();
        }
        stock_id
    }

    fn manager(store: &Store) -> UnitLimitManager {
        UnitLimitManager::new(&RiskConfig::default(), store.clone())
    }

    #[tokio::test]
    async fn empty_portfolio_allows_unit() {
        let store = Store::open_in_memory().unwrap();
        let check = manager(&store).can_add_unit(1, None).await.unwrap();
        assert!(check.can_add);
        assert_eq!(check.limit_kind, None);
    }

    #[tokio::test]
    async fn per_stock_cap_blocks_fifth_unit() {
        let store = Store::open_in_memory().unwrap();
        let stock_id = open_position(&store, "005930", None, 4).await;

        let check = manager(&store).can_add_unit(stock_id, None).await.unwrap();
        assert!(!check.can_add);
        assert_eq!(check.limit_kind, Some("per-stock"));
        assert_eq!(check.current_units, 4);
        assert_eq!(check.limit, 4);

        // A different stock is still allowed.
        let other = manager(&store).can_add_unit(999, None).await.unwrap();
        assert!(other.can_add);
    }

    #[tokio::test]
    async fn sector_cap_blocks_crowded_sector() {
        let store = Store::open_in_memory().unwrap();
        // 3 stocks x 4 units each = 12 Tech units, over the 10-unit cap.
        for symbol in ["A1", "A2", "A3"] {
            open_position(&store, symbol, Some("Tech"), 4).await;
        }

        let check = manager(&store)
            .can_add_unit(777, Some("Tech"))
            .await
            .unwrap();
        assert!(!check.can_add);
        assert_eq!(check.limit_kind, Some("sector"));

        let other_sector = manager(&store)
            .can_add_unit(777, Some("Energy"))
            .await
            .unwrap();
        assert!(other_sector.can_add);
    }

    #[tokio::test]
    async fn total_cap_checked_first() {
        let store = Store::open_in_memory().unwrap();
        // 5 stocks x 4 units = 20 units: the portfolio is full.
        for symbol in ["B1", "B2", "B3", "B4", "B5"] {
            open_position(&store, symbol, None, 4).await;
        }

        let mgr = manager(&store);
        let status = mgr.unit_status().await.unwrap();
        assert_eq!(status.total_units, 20);
        assert_eq!(status.available_units, 0);

        let check = mgr.can_add_unit(12345, None).await.unwrap();
        assert!(!check.can_add);
        assert_eq!(check.limit_kind, Some("total"));
        assert_eq!(check.current_units, 20);
    }

    #[tokio::test]
    async fn capacity_helpers() {
        let store = Store::open_in_memory().unwrap();
        let mgr = manager(&store);
        assert_eq!(mgr.max_positions(), 5);
        assert_eq!(mgr.sector_capacity(7), 3);
        assert_eq!(mgr.sector_capacity(12), 0);
        assert_eq!(mgr.loosely_correlated_capacity(10), 6);
    }
}
