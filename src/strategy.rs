use crate::config::{RiskConfig, StrategyParams};
use crate::models::{Candle, ExitMode, PositionView, WeeklyPlan};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Weekly signal generator.
///
/// `open_positions` is a required parameter on purpose: a generator that
/// does not see the engine's held positions cannot emit HOLD/REDUCE/SELL
/// and silently degrades the manual exit modes into buy-and-hold.
pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;
    fn version(&self) -> &str;

    /// Build the plan for the week starting at `week_start` (a Monday).
    /// `market_data` must contain only bars dated strictly before
    /// `week_start`; the driver enforces that slice.
    fn generate_weekly_plan(
        &self,
        market_data: &HashMap<String, Vec<Candle>>,
        open_positions: &BTreeMap<String, PositionView>,
        risk: &RiskConfig,
        exit_mode: ExitMode,
        week_start: NaiveDate,
    ) -> WeeklyPlan;
}

#[path = "strategies/trend_momentum_atr.rs"]
pub mod trend_momentum_atr;

pub use trend_momentum_atr::TrendMomentumAtrStrategy;

pub fn create_strategy(strategy_id: &str, params: StrategyParams) -> Result<Box<dyn Strategy>> {
    match strategy_id {
        "trend_momentum_atr" => Ok(Box::new(TrendMomentumAtrStrategy::new(params)?)),
        other => Err(anyhow::anyhow!("Unknown strategy '{}'", other)),
    }
}
