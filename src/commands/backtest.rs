use crate::config::{load_universe, RiskConfig, StrategyParams};
use crate::driver::{run_simulation, SimulationParams};
use crate::errors::RunFailure;
use crate::models::{Candle, ExitMode, TieBreaker, WeeklyPlan};
use crate::provider::{default_provider, PriceProvider};
use crate::reporter::{
    build_range_summary, compute_summary, make_output_dir, write_equity_curve, write_range_summary,
    write_summary, write_trades,
};
use crate::strategy::create_strategy;
use anyhow::Result;
use chrono::{Duration, NaiveDate};
use log::{info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Weeks of history fetched before `from_date` so indicators are warm for
/// the first simulated week.
const HISTORY_WARMUP_WEEKS: i64 = 52;

pub struct BacktestArgs {
    pub from: String,
    pub to: String,
    pub initial_cash: i64,
    pub order_size: Option<i64>,
    pub trades_per_week: usize,
    pub universe: Option<PathBuf>,
    pub mode: String,
    pub plan_file: PathBuf,
    pub tie_breaker: String,
    pub exit_mode: String,
    pub run_range: bool,
    pub output: PathBuf,
}

fn input_error(message: String) -> anyhow::Error {
    RunFailure::Input(message).into()
}

fn parse_date(raw: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| input_error(format!("{} must be a YYYY-MM-DD date (got '{}')", flag, raw)))
}

fn load_plan_file(path: &Path) -> Result<WeeklyPlan> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| input_error(format!("cannot read plan file {}: {}", path.display(), err)))?;
    serde_json::from_str(&content)
        .map_err(|err| input_error(format!("invalid plan file {}: {}", path.display(), err)))
}

/// Fetch the full daily history for every symbol once, up front. Failures
/// and empty series degrade to "symbol unavailable".
pub async fn fetch_history(
    provider: &dyn PriceProvider,
    symbols: &[String],
    from: NaiveDate,
    to: NaiveDate,
) -> HashMap<String, Vec<Candle>> {
    info!(
        "Fetching daily history for {} symbols ({} -> {})",
        symbols.len(),
        from,
        to
    );

    let mut history = HashMap::new();
    for symbol in symbols {
        match provider.get_daily_history(symbol, from, to).await {
            Ok(candles) if !candles.is_empty() => {
                history.insert(symbol.clone(), candles);
            }
            Ok(_) => warn!("No history available for {}", symbol),
            Err(err) => warn!("get_daily_history failed for {}: {}", symbol, err),
        }
    }
    info!("Data fetched for {}/{} symbols", history.len(), symbols.len());
    history
}

pub async fn run(args: &BacktestArgs) -> Result<PathBuf> {
    let from_date = parse_date(&args.from, "--from")?;
    let to_date = parse_date(&args.to, "--to")?;
    if from_date > to_date {
        return Err(input_error(format!(
            "--from {} is after --to {}",
            from_date, to_date
        )));
    }
    if args.initial_cash <= 0 {
        return Err(input_error("--initial-cash must be positive".to_string()));
    }
    if args.trades_per_week == 0 {
        return Err(input_error("--trades-per-week must be at least 1".to_string()));
    }
    if let Some(order_size) = args.order_size {
        if order_size <= 0 {
            return Err(input_error("--order-size must be positive".to_string()));
        }
    }

    let tie_breaker =
        TieBreaker::from_str(&args.tie_breaker).map_err(|err| input_error(err.to_string()))?;
    let exit_mode =
        ExitMode::from_str(&args.exit_mode).map_err(|err| input_error(err.to_string()))?;

    let static_plan = match args.mode.trim() {
        "generate" => None,
        "plan" => Some(load_plan_file(&args.plan_file)?),
        other => {
            return Err(input_error(format!(
                "--mode must be 'generate' or 'plan' (got '{}')",
                other
            )))
        }
    };

    let universe = load_universe(args.universe.as_deref())?;
    let risk = RiskConfig::default();
    risk.validate()?;
    let strategy = create_strategy("trend_momentum_atr", StrategyParams::default())?;

    let provider = default_provider()?;
    let history_start = from_date - Duration::weeks(HISTORY_WARMUP_WEEKS);
    let history = fetch_history(provider.as_ref(), &universe, history_start, to_date).await;
    if history.is_empty() {
        return Err(RunFailure::NoData.into());
    }

    let output_dir = make_output_dir(&args.output)?;

    let tie_breakers = if args.run_range {
        vec![TieBreaker::Worst, TieBreaker::Best]
    } else {
        vec![tie_breaker]
    };

    let mut summaries = Vec::with_capacity(tie_breakers.len());
    for tb in &tie_breakers {
        info!("--- Running backtest: tie_breaker={} ---", tb.as_str());
        let engine = run_simulation(
            &SimulationParams {
                from_date,
                to_date,
                initial_cash: args.initial_cash,
                order_size: args.order_size,
                trades_per_week: args.trades_per_week,
                tie_breaker: *tb,
                exit_mode,
                strategy: strategy.as_ref(),
                static_plan: static_plan.as_ref(),
                risk: &risk,
            },
            &history,
        )?;

        let summary = compute_summary(
            args.initial_cash,
            engine.equity_curve(),
            engine.closed_trades(),
            from_date,
            to_date,
            *tb,
        );

        let label = if args.run_range { tb.as_str() } else { "" };
        write_equity_curve(&output_dir, engine.equity_curve(), label)?;
        write_trades(&output_dir, engine.closed_trades(), label)?;
        write_summary(&output_dir, &summary, label)?;
        summaries.push(summary);
    }

    if args.run_range {
        let best = summaries.pop().expect("range run produced two summaries");
        let worst = summaries.pop().expect("range run produced two summaries");
        write_range_summary(&output_dir, &build_range_summary(worst, best))?;
    }

    Ok(output_dir)
}
