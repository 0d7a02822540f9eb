use crate::models::{ClosedTrade, EquityPoint, TieBreaker};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Aggregate run metrics. `profit_factor` is `None` when there are gains
/// and no losses (effectively infinite).
#[derive(Debug, Clone, Serialize)]
pub struct BacktestSummary {
    pub tie_breaker: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub initial_cash: i64,
    pub final_value: i64,
    pub total_return: f64,
    pub cagr: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub avg_hold_days: f64,
    pub num_trades: usize,
    pub profit_factor: Option<f64>,
    pub avg_invested_pct: f64,
}

#[derive(Debug, Serialize)]
pub struct RangeSummary {
    pub worst: BacktestSummary,
    pub best: BacktestSummary,
    pub best_minus_worst: BTreeMap<&'static str, Option<f64>>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

pub fn compute_summary(
    initial_cash: i64,
    equity_curve: &[EquityPoint],
    closed_trades: &[ClosedTrade],
    from_date: NaiveDate,
    to_date: NaiveDate,
    tie_breaker: TieBreaker,
) -> BacktestSummary {
    let total_days = (to_date - from_date).num_days().max(1);
    let final_value = equity_curve
        .last()
        .map(|point| point.total_value)
        .unwrap_or(initial_cash);

    let total_return = if initial_cash > 0 {
        round4(final_value as f64 / initial_cash as f64 - 1.0)
    } else {
        0.0
    };

    let cagr = if final_value > 0 && initial_cash > 0 {
        let ratio = final_value as f64 / initial_cash as f64;
        round4(ratio.powf(365.0 / total_days as f64) - 1.0)
    } else {
        -1.0
    };

    let mut peak = initial_cash.max(1) as f64;
    let mut max_drawdown = 0.0f64;
    for point in equity_curve {
        let value = point.total_value as f64;
        if value > peak {
            peak = value;
        } else if peak > 0.0 {
            let drawdown = (peak - value) / peak;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }

    let num_trades = closed_trades.len();
    let wins: Vec<&ClosedTrade> = closed_trades.iter().filter(|t| t.pnl_vnd > 0).collect();
    let win_rate = if num_trades > 0 {
        round4(wins.len() as f64 / num_trades as f64)
    } else {
        0.0
    };

    let avg_hold_days = if num_trades > 0 {
        round2(closed_trades.iter().map(|t| t.hold_days as f64).sum::<f64>() / num_trades as f64)
    } else {
        0.0
    };

    let gross_profit: i64 = wins.iter().map(|t| t.pnl_vnd).sum();
    let gross_loss: i64 = closed_trades
        .iter()
        .filter(|t| t.pnl_vnd <= 0)
        .map(|t| t.pnl_vnd)
        .sum::<i64>()
        .abs();
    let profit_factor = if gross_loss > 0 {
        Some(round4(gross_profit as f64 / gross_loss as f64))
    } else if gross_profit > 0 {
        None
    } else {
        Some(0.0)
    };

    let invested_fracs: Vec<f64> = equity_curve
        .iter()
        .filter(|p| p.total_value > 0)
        .map(|p| p.open_positions_value as f64 / p.total_value as f64)
        .collect();
    let avg_invested_pct = if invested_fracs.is_empty() {
        0.0
    } else {
        round4(invested_fracs.iter().sum::<f64>() / invested_fracs.len() as f64)
    };

    BacktestSummary {
        tie_breaker: tie_breaker.as_str().to_string(),
        from_date,
        to_date,
        initial_cash,
        final_value,
        total_return,
        cagr,
        max_drawdown: round4(max_drawdown),
        win_rate,
        avg_hold_days,
        num_trades,
        profit_factor,
        avg_invested_pct,
    }
}

pub fn build_range_summary(worst: BacktestSummary, best: BacktestSummary) -> RangeSummary {
    let diff_f64 = |w: f64, b: f64| Some(round4(b - w));
    let mut best_minus_worst = BTreeMap::new();
    best_minus_worst.insert(
        "final_value",
        Some((best.final_value - worst.final_value) as f64),
    );
    best_minus_worst.insert("total_return", diff_f64(worst.total_return, best.total_return));
    best_minus_worst.insert("cagr", diff_f64(worst.cagr, best.cagr));
    best_minus_worst.insert("max_drawdown", diff_f64(worst.max_drawdown, best.max_drawdown));
    best_minus_worst.insert("win_rate", diff_f64(worst.win_rate, best.win_rate));
    best_minus_worst.insert(
        "avg_hold_days",
        diff_f64(worst.avg_hold_days, best.avg_hold_days),
    );
    best_minus_worst.insert(
        "num_trades",
        Some(best.num_trades as f64 - worst.num_trades as f64),
    );
    best_minus_worst.insert(
        "profit_factor",
        match (worst.profit_factor, best.profit_factor) {
            (Some(w), Some(b)) => Some(round4(b - w)),
            _ => None,
        },
    );
    best_minus_worst.insert(
        "avg_invested_pct",
        diff_f64(worst.avg_invested_pct, best.avg_invested_pct),
    );

    RangeSummary {
        worst,
        best,
        best_minus_worst,
    }
}

/// Create a unique timestamped run directory under `base`.
pub fn make_output_dir(base: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let output_dir = base.join(stamp.to_string());
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create report directory {}", output_dir.display()))?;
    info!("Report directory: {}", output_dir.display());
    Ok(output_dir)
}

fn labelled(name: &str, ext: &str, label: &str) -> String {
    if label.is_empty() {
        format!("{}.{}", name, ext)
    } else {
        format!("{}_{}.{}", name, label, ext)
    }
}

pub fn write_summary(output_dir: &Path, summary: &BacktestSummary, label: &str) -> Result<PathBuf> {
    let path = output_dir.join(labelled("summary", "json", label));
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(path)
}

pub fn write_range_summary(output_dir: &Path, range: &RangeSummary) -> Result<PathBuf> {
    let path = output_dir.join("range_summary.json");
    let json = serde_json::to_string_pretty(range)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(path)
}

pub fn write_equity_curve(
    output_dir: &Path,
    equity_curve: &[EquityPoint],
    label: &str,
) -> Result<PathBuf> {
    let path = output_dir.join(labelled("equity_curve", "csv", label));
    let file =
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "date,total_value,cash,open_positions_value")?;
    for point in equity_curve {
        writeln!(
            writer,
            "{},{},{},{}",
            point.date, point.total_value, point.cash, point.open_positions_value
        )?;
    }
    writer.flush()?;
    info!("Wrote {} ({} rows)", path.display(), equity_curve.len());
    Ok(path)
}

pub fn write_trades(output_dir: &Path, trades: &[ClosedTrade], label: &str) -> Result<PathBuf> {
    let path = output_dir.join(labelled("trades", "csv", label));
    let file =
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(
        writer,
        "symbol,entry_date,entry_price,exit_date,exit_price,qty,reason,return_pct,pnl_vnd,hold_days"
    )?;
    for trade in trades {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{}",
            trade.symbol,
            trade.entry_date,
            trade.entry_price,
            trade.exit_date,
            trade.exit_price,
            trade.qty,
            trade.reason.as_str(),
            trade.return_pct,
            trade.pnl_vnd,
            trade.hold_days
        )?;
    }
    writer.flush()?;
    info!("Wrote {} ({} trades)", path.display(), trades.len());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn point(d: u32, cash: i64, open_value: i64) -> EquityPoint {
        EquityPoint {
            date: day(d),
            cash,
            open_positions_value: open_value,
            total_value: cash + open_value,
        }
    }

    fn trade(pnl: i64, hold_days: i64) -> ClosedTrade {
        ClosedTrade {
            symbol: "AAA".into(),
            entry_date: day(2),
            entry_price: 100.0,
            exit_date: day(2 + hold_days as u32),
            exit_price: 110.0,
            qty: 100,
            reason: if pnl > 0 { ExitReason::Tp } else { ExitReason::Sl },
            return_pct: 10.0,
            pnl_vnd: pnl,
            hold_days,
        }
    }

    #[test]
    fn summary_on_an_empty_run_is_flat() {
        let summary = compute_summary(
            10_000_000,
            &[],
            &[],
            day(1),
            day(31),
            TieBreaker::Worst,
        );
        assert_eq!(summary.final_value, 10_000_000);
        assert_eq!(summary.total_return, 0.0);
        assert_eq!(summary.num_trades, 0);
        assert_eq!(summary.win_rate, 0.0);
        assert_eq!(summary.profit_factor, Some(0.0));
        assert_eq!(summary.max_drawdown, 0.0);
    }

    #[test]
    fn summary_metrics_match_hand_computation() {
        let curve = vec![
            point(2, 5_000_000, 5_000_000),
            point(3, 5_000_000, 6_000_000),
            point(6, 5_000_000, 4_500_000),
            point(7, 11_000_000, 0),
        ];
        let trades = vec![trade(600_000, 5), trade(-200_000, 3), trade(300_000, 4)];
        let summary = compute_summary(10_000_000, &curve, &trades, day(1), day(7), TieBreaker::Best);

        assert_eq!(summary.final_value, 11_000_000);
        assert!((summary.total_return - 0.1).abs() < 1e-9);
        // Peak 11M on day 3, trough 9.5M on day 6.
        assert!((summary.max_drawdown - round4(1_500_000.0 / 11_000_000.0)).abs() < 1e-9);
        assert!((summary.win_rate - round4(2.0 / 3.0)).abs() < 1e-9);
        assert!((summary.avg_hold_days - 4.0).abs() < 1e-9);
        assert_eq!(summary.profit_factor, Some(4.5));
        // Invested fractions: 0.5, 6/11, 4.5/9.5, 0.
        let expected = round4((0.5 + 6.0 / 11.0 + 4.5 / 9.5 + 0.0) / 4.0);
        assert!((summary.avg_invested_pct - expected).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_is_none_when_there_are_no_losses() {
        let trades = vec![trade(500_000, 2)];
        let summary =
            compute_summary(10_000_000, &[], &trades, day(1), day(7), TieBreaker::Worst);
        assert_eq!(summary.profit_factor, None);
    }

    #[test]
    fn cagr_annualizes_the_total_return() {
        // Exactly one year, +21%.
        let curve = vec![point(2, 12_100_000, 0)];
        let from = day(1);
        let to = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let summary = compute_summary(10_000_000, &curve, &[], from, to, TieBreaker::Worst);
        assert!((summary.cagr - 0.21).abs() < 0.001);
    }

    #[test]
    fn range_summary_diffs_every_metric() {
        let worst = compute_summary(
            10_000_000,
            &[point(2, 10_000_000, 0)],
            &[],
            day(1),
            day(7),
            TieBreaker::Worst,
        );
        let best = compute_summary(
            10_000_000,
            &[point(2, 10_180_000, 0)],
            &[],
            day(1),
            day(7),
            TieBreaker::Best,
        );
        let range = build_range_summary(worst, best);
        assert_eq!(range.best_minus_worst["final_value"], Some(180_000.0));
        assert!(range.best_minus_worst["cagr"].unwrap() > 0.0);
        assert_eq!(range.best_minus_worst["num_trades"], Some(0.0));
    }

    #[test]
    fn csv_files_carry_the_documented_headers() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("vnbacktest_reports_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let equity_path =
            write_equity_curve(&dir, &[point(2, 1_000, 500)], "worst").unwrap();
        let content = fs::read_to_string(&equity_path).unwrap();
        assert!(content.starts_with("date,total_value,cash,open_positions_value\n"));
        assert!(content.contains("2025-01-02,1500,1000,500"));

        let trades_path = write_trades(&dir, &[trade(100, 2)], "").unwrap();
        let content = fs::read_to_string(&trades_path).unwrap();
        assert!(content.starts_with(
            "symbol,entry_date,entry_price,exit_date,exit_price,qty,reason,return_pct,pnl_vnd,hold_days\n"
        ));
        assert!(content.contains("AAA,2025-01-02,100,2025-01-04,110,100,TP,10,100,2"));

        fs::remove_dir_all(&dir).ok();
    }
}
