// =============================================================================
// Execution Module
// =============================================================================
//
// Signal execution against the broker, portfolio views, and trade-history
// statistics. The order manager owns the single-transaction fill boundary;
// the portfolio manager only observes.

pub mod order_manager;
pub mod performance;
pub mod portfolio;

pub use order_manager::{ExecutionResult, OrderManager};
pub use performance::{PerformanceStats, PerformanceTracker};
pub use portfolio::{PortfolioManager, PortfolioRisk, PortfolioSummary};
