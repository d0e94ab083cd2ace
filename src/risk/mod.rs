// =============================================================================
// Risk Module
// =============================================================================
//
// Position sizing, stop-loss policy, and the unit caps that bound portfolio
// heat. Sizing and stops are pure; the unit-limit manager reads open
// positions from the store.

pub mod position_sizing;
pub mod stop_loss;
pub mod unit_limits;

pub use position_sizing::{PositionSizeResult, PositionSizer};
pub use stop_loss::{StopLossCalculator, StopLossResult, StopReason};
pub use unit_limits::{UnitCheckResult, UnitLimitManager, UnitStatus};
