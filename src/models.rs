use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One daily (or, after resampling, weekly) OHLCV bar.
///
/// Invariant: `low <= open, close <= high` and `volume >= 0`. Bars from a
/// provider are ordered by strictly increasing date; bars that violate the
/// range invariant are dropped at the ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= 0.0
            && [self.open, self.high, self.low, self.close]
                .iter()
                .all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Hold,
    Reduce,
    Sell,
    Watch,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Hold => "HOLD",
            Action::Reduce => "REDUCE",
            Action::Sell => "SELL",
            Action::Watch => "WATCH",
        }
    }

    /// Ordering rank inside a weekly plan: BUY first, WATCH last.
    pub fn plan_rank(&self) -> u8 {
        match self {
            Action::Buy => 0,
            Action::Hold => 1,
            Action::Reduce => 2,
            Action::Sell => 3,
            Action::Watch => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Breakout,
    Pullback,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitReason {
    Tp,
    Sl,
    Sell,
    Reduce,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Tp => "TP",
            ExitReason::Sl => "SL",
            ExitReason::Sell => "SELL",
            ExitReason::Reduce => "REDUCE",
        }
    }
}

/// Policy for a bar that touches both the stop and the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreaker {
    Worst,
    Best,
}

impl TieBreaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            TieBreaker::Worst => "worst",
            TieBreaker::Best => "best",
        }
    }
}

impl FromStr for TieBreaker {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worst" => Ok(TieBreaker::Worst),
            "best" => Ok(TieBreaker::Best),
            other => Err(anyhow!(
                "tie-breaker must be 'worst' or 'best' (got '{}')",
                other
            )),
        }
    }
}

/// How positions are closed.
///
/// `TpslOnly` runs mechanical stop/target exits; the two manual modes
/// disable them and rely on weekly SELL (and, for `FourAction`, REDUCE)
/// signals instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitMode {
    TpslOnly,
    ThreeAction,
    FourAction,
}

impl ExitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitMode::TpslOnly => "tpsl_only",
            ExitMode::ThreeAction => "3action",
            ExitMode::FourAction => "4action",
        }
    }

    pub fn is_manual(&self) -> bool {
        !matches!(self, ExitMode::TpslOnly)
    }
}

impl FromStr for ExitMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tpsl_only" => Ok(ExitMode::TpslOnly),
            "3action" => Ok(ExitMode::ThreeAction),
            "4action" => Ok(ExitMode::FourAction),
            other => Err(anyhow!(
                "exit-mode must be 'tpsl_only', '3action' or '4action' (got '{}')",
                other
            )),
        }
    }
}

/// One per-symbol line of a weekly plan.
///
/// For BUY: `stop_loss < entry_price <= buy_zone_high`, `take_profit >
/// entry_price` and `position_target_pct` sits inside the configured
/// allocation band. Non-BUY actions carry zeroed price fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub action: Action,
    #[serde(default)]
    pub entry_type: EntryType,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default)]
    pub buy_zone_low: f64,
    #[serde(default)]
    pub buy_zone_high: f64,
    #[serde(default)]
    pub stop_loss: f64,
    #[serde(default)]
    pub take_profit: f64,
    #[serde(default)]
    pub position_target_pct: f64,
    /// First date a breakout entry is allowed to fill (Monday of week T+1).
    #[serde(default)]
    pub earliest_fill_date: Option<NaiveDate>,
    #[serde(default)]
    pub rationale: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyPlan {
    pub generated_at: DateTime<Utc>,
    pub week_start: NaiveDate,
    pub strategy_id: String,
    pub strategy_version: String,
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Read-only view of a held position handed to the signal generator.
#[derive(Debug, Clone, Copy)]
pub struct PositionView {
    pub qty: i64,
    pub entry_price: f64,
}

/// An accepted BUY waiting for a price touch.
///
/// Destroyed on fill, on expiry, or when a newer BUY for the same symbol
/// replaces it.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub symbol: String,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub target_qty: i64,
    pub entry_type: EntryType,
    pub earliest_fill_date: Option<NaiveDate>,
    pub expires_at: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct OpenTrade {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub qty: i64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Entry cost in VND including the entry-side fee.
    pub cost: i64,
    pub entry_type: EntryType,
}

#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub qty: i64,
    pub reason: ExitReason,
    pub return_pct: f64,
    pub pnl_vnd: i64,
    pub hold_days: i64,
}

/// One point of the daily equity curve. All values are integer VND.
#[derive(Debug, Clone, Copy)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub cash: i64,
    pub open_positions_value: i64,
    pub total_value: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_breaker_and_exit_mode_parse_round_trip() {
        assert_eq!("worst".parse::<TieBreaker>().unwrap(), TieBreaker::Worst);
        assert_eq!("BEST".parse::<TieBreaker>().unwrap(), TieBreaker::Best);
        assert!("coin-flip".parse::<TieBreaker>().is_err());

        for mode in [ExitMode::TpslOnly, ExitMode::ThreeAction, ExitMode::FourAction] {
            assert_eq!(mode.as_str().parse::<ExitMode>().unwrap(), mode);
        }
        assert!("5action".parse::<ExitMode>().is_err());
    }

    #[test]
    fn action_serializes_uppercase() {
        let json = serde_json::to_string(&Action::Reduce).unwrap();
        assert_eq!(json, "\"REDUCE\"");
        let back: Action = serde_json::from_str("\"WATCH\"").unwrap();
        assert_eq!(back, Action::Watch);
    }

    #[test]
    fn candle_validity_rejects_inverted_range() {
        let candle = Candle {
            symbol: "AAA".into(),
            date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            open: 100.0,
            high: 99.0,
            low: 101.0,
            close: 100.0,
            volume: 10.0,
        };
        assert!(!candle.is_valid());
    }
}
