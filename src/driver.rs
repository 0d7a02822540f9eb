use crate::config::RiskConfig;
use crate::engine::BacktestEngine;
use crate::models::{Action, Candle, ExitMode, ExitReason, PendingEntry, TieBreaker, WeeklyPlan};
use crate::strategy::Strategy;
use crate::trading_rules::{determine_position_size, PositionSizingOutcome, PositionSizingParams};
use crate::week_utils::{trading_days, week_starts};
use anyhow::Result;
use chrono::{Duration, NaiveDate};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

pub struct SimulationParams<'a> {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub initial_cash: i64,
    /// Fixed VND per trade; `None` uses risk-based percentage sizing.
    pub order_size: Option<i64>,
    pub trades_per_week: usize,
    pub tie_breaker: TieBreaker,
    pub exit_mode: ExitMode,
    pub strategy: &'a dyn Strategy,
    /// Reuse one plan for every week instead of generating per week.
    pub static_plan: Option<&'a WeeklyPlan>,
    pub risk: &'a RiskConfig,
}

/// Week-by-week simulation loop.
///
/// Each cycle: slice history strictly before the week's Monday, hand the
/// engine's open positions to the signal generator, seed pending entries
/// from BUY recommendations, apply manual SELL/REDUCE at the next trading
/// day's open, then advance the engine one day at a time.
pub fn run_simulation(
    params: &SimulationParams,
    history: &HashMap<String, Vec<Candle>>,
) -> Result<BacktestEngine> {
    let mut engine = BacktestEngine::new(
        params.initial_cash,
        params.tie_breaker,
        params.exit_mode,
        params.risk.fee_per_trade,
    );

    let candles_by_date: HashMap<&str, HashMap<NaiveDate, &Candle>> = history
        .iter()
        .map(|(symbol, candles)| {
            (
                symbol.as_str(),
                candles.iter().map(|c| (c.date, c)).collect(),
            )
        })
        .collect();

    let weeks = week_starts(params.from_date, params.to_date);
    info!(
        "Simulating {} weeks ({} -> {}), tie_breaker={}, exit_mode={}",
        weeks.len(),
        params.from_date,
        params.to_date,
        params.tie_breaker.as_str(),
        params.exit_mode.as_str()
    );

    for week_start in weeks {
        let week_end = week_start + Duration::days(4);

        let generated;
        let plan: &WeeklyPlan = match params.static_plan {
            Some(static_plan) => static_plan,
            None => {
                let snapshot = slice_history_before(history, week_start);
                if snapshot.is_empty() {
                    warn!("No market data before {}, skipping week", week_start);
                    engine.clear_pending_entries();
                    continue;
                }
                generated = params.strategy.generate_weekly_plan(
                    &snapshot,
                    &engine.open_positions_view(),
                    params.risk,
                    params.exit_mode,
                    week_start,
                );
                debug!(
                    "Week {}: {} recommendations",
                    week_start,
                    generated.recommendations.len()
                );
                &generated
            }
        };

        seed_pending_entries(&mut engine, params, plan, history, week_start)?;

        // Manual exits fire at the open of the symbol's next traded day.
        let mut manual: BTreeMap<String, Action> = BTreeMap::new();
        if params.exit_mode.is_manual() {
            for rec in &plan.recommendations {
                match rec.action {
                    Action::Sell => {
                        manual.insert(rec.symbol.clone(), Action::Sell);
                    }
                    Action::Reduce if params.exit_mode == ExitMode::FourAction => {
                        manual.insert(rec.symbol.clone(), Action::Reduce);
                    }
                    _ => {}
                }
            }
        }

        let sim_start = week_start.max(params.from_date);
        let sim_end = week_end.min(params.to_date);
        for day in trading_days(sim_start, sim_end) {
            apply_manual_exits(&mut engine, &mut manual, &candles_by_date, day)?;

            let mut today: BTreeMap<String, Candle> = BTreeMap::new();
            let relevant: Vec<String> = engine
                .pending_entries()
                .keys()
                .chain(engine.open_trades().keys())
                .cloned()
                .collect();
            for symbol in relevant {
                if let Some(candle) = candles_by_date
                    .get(symbol.as_str())
                    .and_then(|dates| dates.get(&day))
                {
                    today.insert(symbol, (*candle).clone());
                }
            }

            engine.process_day(&today, day)?;
        }

        if !params.risk.carry_pending_entries {
            engine.clear_pending_entries();
        }
    }

    Ok(engine)
}

/// Per-symbol daily bars dated strictly before `week_start` -- the
/// lookahead guard for the signal generator.
fn slice_history_before(
    history: &HashMap<String, Vec<Candle>>,
    week_start: NaiveDate,
) -> HashMap<String, Vec<Candle>> {
    let mut sliced = HashMap::new();
    for (symbol, candles) in history {
        let cut = candles.partition_point(|c| c.date < week_start);
        if cut > 0 {
            sliced.insert(symbol.clone(), candles[..cut].to_vec());
        }
    }
    sliced
}

fn seed_pending_entries(
    engine: &mut BacktestEngine,
    params: &SimulationParams,
    plan: &WeeklyPlan,
    history: &HashMap<String, Vec<Candle>>,
    week_start: NaiveDate,
) -> Result<()> {
    let mut seeded = 0usize;
    for rec in plan.recommendations.iter().filter(|r| r.action == Action::Buy) {
        if seeded >= params.trades_per_week {
            break;
        }
        if engine.open_trades().contains_key(&rec.symbol) {
            // Contradictory plan line; the generator should have said HOLD.
            debug!("{}: BUY for already-held symbol ignored", rec.symbol);
            continue;
        }
        if !history.contains_key(&rec.symbol) {
            continue;
        }
        if !(rec.entry_price > 0.0
            && rec.stop_loss > 0.0
            && rec.stop_loss < rec.entry_price
            && rec.take_profit > rec.entry_price)
        {
            debug!("{}: BUY with degenerate prices ignored", rec.symbol);
            continue;
        }

        let outcome = determine_position_size(PositionSizingParams {
            entry_price: rec.entry_price,
            equity: engine.current_equity(),
            available_cash: engine.cash(),
            position_target_pct: rec.position_target_pct,
            fixed_order_size: params.order_size,
            fee_per_trade: params.risk.fee_per_trade,
        });
        let allocation = match outcome {
            PositionSizingOutcome::Sized(allocation) => allocation,
            PositionSizingOutcome::TooSmall => {
                debug!("{}: sizing produced zero shares, entry dropped", rec.symbol);
                continue;
            }
            PositionSizingOutcome::InsufficientCash { required } => {
                debug!(
                    "{}: cash {} short of required {}, entry dropped",
                    rec.symbol,
                    engine.cash(),
                    required
                );
                continue;
            }
        };

        // Cancel-at-week-end by default; the carry knob grants one extra week.
        let lifetime_days = if params.risk.carry_pending_entries { 14 } else { 7 };
        engine.register_pending(PendingEntry {
            symbol: rec.symbol.clone(),
            entry_price: rec.entry_price,
            stop_loss: rec.stop_loss,
            take_profit: rec.take_profit,
            target_qty: allocation.qty,
            entry_type: rec.entry_type,
            earliest_fill_date: rec.earliest_fill_date,
            expires_at: week_start + Duration::days(lifetime_days),
        })?;
        seeded += 1;
    }
    Ok(())
}

fn apply_manual_exits(
    engine: &mut BacktestEngine,
    manual: &mut BTreeMap<String, Action>,
    candles_by_date: &HashMap<&str, HashMap<NaiveDate, &Candle>>,
    day: NaiveDate,
) -> Result<()> {
    if manual.is_empty() {
        return Ok(());
    }

    let due: Vec<(String, Action)> = manual
        .iter()
        .filter(|(symbol, _)| {
            candles_by_date
                .get(symbol.as_str())
                .is_some_and(|dates| dates.contains_key(&day))
        })
        .map(|(symbol, action)| (symbol.clone(), *action))
        .collect();

    for (symbol, action) in due {
        let open_price = candles_by_date[symbol.as_str()][&day].open;
        let acted = match action {
            Action::Sell => {
                engine.force_exit_at_market(&symbol, day, open_price, ExitReason::Sell)?
            }
            Action::Reduce => engine.reduce_position(&symbol, day, open_price)?,
            _ => false,
        };
        if acted {
            debug!("{}: {} applied at {} open {}", symbol, action.as_str(), day, open_price);
        }
        manual.remove(&symbol);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionView;
    use chrono::Duration;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn candle(symbol: &str, date: NaiveDate, close: f64) -> Candle {
        Candle {
            symbol: symbol.into(),
            date,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn history_slice_excludes_the_week_start() {
        let monday = day(2025, 6, 9);
        let candles: Vec<Candle> = (0..10)
            .map(|i| candle("AAA", day(2025, 6, 2) + Duration::days(i), 100.0))
            .collect();
        let history = HashMap::from([("AAA".to_string(), candles)]);

        let sliced = slice_history_before(&history, monday);
        let bars = &sliced["AAA"];
        assert!(bars.iter().all(|c| c.date < monday));
        assert_eq!(bars.len(), 7);

        let nothing = slice_history_before(&history, day(2025, 6, 2));
        assert!(nothing.is_empty());
    }

    struct NullStrategy;

    impl Strategy for NullStrategy {
        fn id(&self) -> &str {
            "null"
        }
        fn version(&self) -> &str {
            "0.0.0"
        }
        fn generate_weekly_plan(
            &self,
            _market_data: &HashMap<String, Vec<Candle>>,
            _open_positions: &BTreeMap<String, PositionView>,
            _risk: &RiskConfig,
            _exit_mode: ExitMode,
            week_start: NaiveDate,
        ) -> WeeklyPlan {
            WeeklyPlan {
                generated_at: chrono::Utc::now(),
                week_start,
                strategy_id: "null".into(),
                strategy_version: "0.0.0".into(),
                recommendations: Vec::new(),
                notes: Vec::new(),
            }
        }
    }

    #[test]
    fn empty_history_produces_a_flat_run() {
        let risk = RiskConfig::default();
        let strategy = NullStrategy;
        let params = SimulationParams {
            from_date: day(2025, 6, 2),
            to_date: day(2025, 6, 20),
            initial_cash: 10_000_000,
            order_size: None,
            trades_per_week: 4,
            tie_breaker: TieBreaker::Worst,
            exit_mode: ExitMode::TpslOnly,
            strategy: &strategy,
            static_plan: None,
            risk: &risk,
        };

        let engine = run_simulation(&params, &HashMap::new()).unwrap();
        assert!(engine.closed_trades().is_empty());
        assert!(engine.open_trades().is_empty());
        assert_eq!(engine.cash(), 10_000_000);
        assert!(engine.equity_curve().is_empty());
    }
}
