use crate::errors::RunFailure;
use anyhow::{ensure, Result};
use log::warn;
use std::path::Path;

/// Builtin watchlist used when no universe file is supplied (or the supplied
/// file contains no symbols). Liquid HOSE names.
pub const DEFAULT_UNIVERSE: &[&str] = &[
    "FPT", "GAS", "HPG", "MBB", "MWG", "SSI", "TCB", "VCB", "VHM", "VIC", "VNM", "VRE",
];

/// Signal-generation parameters. Indicator windows are in weekly bars.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub ma_short: usize,
    pub ma_long: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub atr_stop_mult: f64,
    pub atr_target_mult: f64,
    pub breakout_volume_window: usize,
    pub max_buys_per_week: usize,
    /// RSI floor for the breakout path.
    pub rsi_breakout_min: f64,
    /// RSI ceiling above which new entries are blocked.
    pub rsi_overbought: f64,
    /// Buffer applied above the prior week's high for breakout entries.
    pub entry_buffer_pct: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            ma_short: 10,
            ma_long: 30,
            rsi_period: 14,
            atr_period: 14,
            atr_stop_mult: 1.5,
            atr_target_mult: 2.5,
            breakout_volume_window: 14,
            max_buys_per_week: 4,
            rsi_breakout_min: 50.0,
            rsi_overbought: 70.0,
            entry_buffer_pct: 0.001,
        }
    }
}

impl StrategyParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.ma_short >= 2, "ma_short must be at least 2");
        ensure!(
            self.ma_long > self.ma_short,
            "ma_long ({}) must exceed ma_short ({})",
            self.ma_long,
            self.ma_short
        );
        ensure!(self.rsi_period >= 2, "rsi_period must be at least 2");
        ensure!(self.atr_period >= 2, "atr_period must be at least 2");
        ensure!(
            self.atr_stop_mult > 0.0 && self.atr_stop_mult.is_finite(),
            "atr_stop_mult must be positive"
        );
        ensure!(
            self.atr_target_mult > 0.0 && self.atr_target_mult.is_finite(),
            "atr_target_mult must be positive"
        );
        ensure!(
            self.breakout_volume_window >= 1,
            "breakout_volume_window must be at least 1"
        );
        ensure!(self.max_buys_per_week >= 1, "max_buys_per_week must be at least 1");
        Ok(())
    }
}

/// Risk and account-level knobs.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub risk_per_trade_pct: f64,
    pub min_alloc_pct: f64,
    pub max_alloc_pct: f64,
    /// Flat VND fee applied to each side of a trade.
    pub fee_per_trade: i64,
    /// Keep unfilled pending entries past the week they were issued in.
    /// The default matches the cancel-at-week-end policy.
    pub carry_pending_entries: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_pct: 0.01,
            min_alloc_pct: 0.03,
            max_alloc_pct: 0.15,
            fee_per_trade: 0,
            carry_pending_entries: false,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.risk_per_trade_pct > 0.0 && self.risk_per_trade_pct < 1.0,
            "risk_per_trade_pct must be inside (0, 1)"
        );
        ensure!(
            self.min_alloc_pct > 0.0 && self.min_alloc_pct <= self.max_alloc_pct,
            "min_alloc_pct ({}) must be positive and <= max_alloc_pct ({})",
            self.min_alloc_pct,
            self.max_alloc_pct
        );
        ensure!(
            self.max_alloc_pct <= 1.0,
            "max_alloc_pct must not exceed 1.0"
        );
        ensure!(self.fee_per_trade >= 0, "fee_per_trade must be non-negative");
        Ok(())
    }
}

/// Load the symbol universe.
///
/// `None` falls back to the builtin watchlist. A supplied file must be
/// readable (input error otherwise); `#` comment lines and blanks are
/// skipped, symbols are upper-cased and de-duplicated in order. An empty
/// file falls back to the builtin watchlist too.
pub fn load_universe(path: Option<&Path>) -> Result<Vec<String>> {
    let Some(path) = path else {
        return Ok(builtin_universe());
    };

    let content = std::fs::read_to_string(path).map_err(|err| {
        RunFailure::Input(format!("cannot read universe file {}: {}", path.display(), err))
    })?;

    let mut symbols = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let symbol = trimmed.to_ascii_uppercase();
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }

    if symbols.is_empty() {
        warn!(
            "Universe file {} contains no symbols; using the builtin watchlist",
            path.display()
        );
        return Ok(builtin_universe());
    }
    Ok(symbols)
}

fn builtin_universe() -> Vec<String> {
    DEFAULT_UNIVERSE.iter().map(|s| s.to_string()).collect()
}
