use crate::config::{RiskConfig, StrategyParams};
use crate::indicators::{calculate_atr, calculate_rsi, calculate_sma, last_value, resample_weekly};
use crate::models::{Action, Candle, EntryType, ExitMode, PositionView, Recommendation, WeeklyPlan};
use crate::strategy::Strategy;
use crate::trading_rules::{allocation_pct, round_to_tick};
use crate::week_utils::next_monday;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use log::debug;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Trend + momentum + ATR-anchored entries on weekly bars.
///
/// Entry paths for unheld symbols:
/// - breakout: week-T close confirmed above week-(T-1)'s high on
///   above-average volume; entry sits a small buffer above that high and
///   may only fill from Monday of week T+1.
/// - pullback: uptrend without confirmation; entry is the midpoint of
///   [price - 1.0*ATR, price - 0.5*ATR].
///
/// Held symbols map trend state to HOLD / REDUCE / SELL, which is what makes
/// the manual exit modes work at all.
pub struct TrendMomentumAtrStrategy {
    params: StrategyParams,
}

impl TrendMomentumAtrStrategy {
    pub fn new(params: StrategyParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }
}

struct BuyCandidate {
    recommendation: Recommendation,
    rsi: f64,
    stop_distance_pct: f64,
}

impl Strategy for TrendMomentumAtrStrategy {
    fn id(&self) -> &str {
        "trend_momentum_atr"
    }

    fn version(&self) -> &str {
        "2.0.0"
    }

    fn generate_weekly_plan(
        &self,
        market_data: &HashMap<String, Vec<Candle>>,
        open_positions: &BTreeMap<String, PositionView>,
        risk: &RiskConfig,
        exit_mode: ExitMode,
        week_start: NaiveDate,
    ) -> WeeklyPlan {
        let p = &self.params;
        let mut buys: Vec<BuyCandidate> = Vec::new();
        let mut holds = Vec::new();
        let mut reduces = Vec::new();
        let mut sells = Vec::new();
        let mut watches = Vec::new();

        let mut symbols: Vec<&String> = market_data.keys().collect();
        symbols.sort();

        for symbol in symbols {
            let daily = &market_data[symbol];
            let weekly = resample_weekly(daily);
            if weekly.len() < p.ma_long {
                debug!(
                    "{}: skipped, only {} weekly bars (need {})",
                    symbol,
                    weekly.len(),
                    p.ma_long
                );
                continue;
            }

            let closes: Vec<f64> = weekly.iter().map(|c| c.close).collect();
            let volumes: Vec<f64> = weekly.iter().map(|c| c.volume).collect();

            let ma_short = last_value(&calculate_sma(&closes, p.ma_short));
            let ma_long = last_value(&calculate_sma(&closes, p.ma_long));
            let rsi = last_value(&calculate_rsi(&closes, p.rsi_period));
            let atr = last_value(&calculate_atr(&weekly, p.atr_period));
            let vol_avg = last_value(&calculate_sma(&volumes, p.breakout_volume_window));

            if !(ma_short.is_finite() && ma_long.is_finite() && rsi.is_finite() && atr.is_finite())
                || atr <= 0.0
            {
                debug!("{}: skipped, indicator not available yet", symbol);
                continue;
            }

            let price = *closes.last().expect("weekly closes are non-empty");
            let held = open_positions.contains_key(symbol.as_str());

            let trend_up = price > ma_short && ma_short > ma_long;
            let trend_weakening = ma_long < price && price <= ma_short;
            let trend_down = price <= ma_long;
            let rsi_overbought = rsi >= p.rsi_overbought;

            let trend_line = format!(
                "price {:.0} vs MA{}w {:.0} / MA{}w {:.0}",
                price, p.ma_short, ma_short, p.ma_long, ma_long
            );
            let rsi_line = format!("RSI({}): {:.1}", p.rsi_period, rsi);

            if held {
                let (action, note) = if trend_up {
                    (Action::Hold, "Trend UP: keep riding the position")
                } else if trend_weakening && exit_mode == ExitMode::FourAction {
                    (Action::Reduce, "Trend WEAKENING: take half off the table")
                } else if trend_weakening {
                    (Action::Hold, "Trend WEAKENING: hold, exit on trend break")
                } else if trend_down {
                    (Action::Sell, "Trend DOWN: exit the position")
                } else {
                    (Action::Hold, "Mixed trend state: hold")
                };

                let rec = flat_recommendation(
                    symbol,
                    action,
                    vec![note.to_string(), trend_line, rsi_line],
                );
                match action {
                    Action::Hold => holds.push(rec),
                    Action::Reduce => reduces.push(rec),
                    Action::Sell => sells.push(rec),
                    _ => unreachable!("held symbols never map to {:?}", action),
                }
                continue;
            }

            if !trend_up {
                continue;
            }
            if rsi_overbought {
                watches.push(flat_recommendation(
                    symbol,
                    Action::Watch,
                    vec![
                        "Trend UP but RSI overbought: wait for a cooler entry".to_string(),
                        trend_line,
                        rsi_line,
                    ],
                ));
                continue;
            }

            // Breakout confirmation against week T-1's high.
            let prev_week_high = weekly[weekly.len() - 2].high;
            let current_volume = *volumes.last().expect("weekly volumes are non-empty");
            let close_confirmed = price >= prev_week_high;
            let volume_confirmed = vol_avg.is_finite() && vol_avg > 0.0 && current_volume >= vol_avg;
            let rsi_confirmed = rsi >= p.rsi_breakout_min;
            let breakout_confirmed = close_confirmed && volume_confirmed && rsi_confirmed;

            let (entry_type, entry_price, buy_zone_low, buy_zone_high, earliest_fill_date) =
                if breakout_confirmed {
                    let entry = round_to_tick(prev_week_high * (1.0 + p.entry_buffer_pct));
                    let signal_week_end = weekly.last().expect("weekly is non-empty").date;
                    (
                        EntryType::Breakout,
                        entry,
                        entry,
                        round_to_tick(entry * 1.005),
                        Some(next_monday(signal_week_end)),
                    )
                } else {
                    let zone_low = round_to_tick(price - 1.0 * atr);
                    let zone_high = round_to_tick(price - 0.5 * atr);
                    let entry = round_to_tick((zone_low + zone_high) / 2.0);
                    (EntryType::Pullback, entry, zone_low, zone_high, None)
                };

            let stop_loss = round_to_tick(entry_price - p.atr_stop_mult * atr);
            let take_profit = round_to_tick(entry_price + p.atr_target_mult * atr);
            if !(entry_price > 0.0
                && stop_loss > 0.0
                && stop_loss < entry_price
                && entry_price <= buy_zone_high
                && take_profit > entry_price)
            {
                debug!(
                    "{}: skipped, degenerate entry geometry (entry {} sl {} tp {})",
                    symbol, entry_price, stop_loss, take_profit
                );
                continue;
            }

            let stop_distance_pct = (entry_price - stop_loss) / entry_price;
            let mut rationale = vec![trend_line, rsi_line, format!("ATR: {:.0}", atr)];
            if entry_type == EntryType::Breakout {
                let ratio = if vol_avg > 0.0 { current_volume / vol_avg } else { 0.0 };
                rationale.push(format!("Vol: {:.0} ({:.1}x avg)", current_volume, ratio));
                rationale.push(format!(
                    "Entry: breakout over prior-week high {:.0}, fills from next Monday",
                    prev_week_high
                ));
            } else {
                rationale.push("Entry: pullback into the ATR mid-zone".to_string());
            }

            buys.push(BuyCandidate {
                recommendation: Recommendation {
                    symbol: symbol.to_string(),
                    action: Action::Buy,
                    entry_type,
                    entry_price,
                    buy_zone_low,
                    buy_zone_high,
                    stop_loss,
                    take_profit,
                    position_target_pct: allocation_pct(risk, entry_price, stop_loss),
                    earliest_fill_date,
                    rationale,
                },
                rsi,
                stop_distance_pct,
            });
        }

        // Best momentum first; a tighter stop wins the tie.
        buys.sort_by(|a, b| {
            b.rsi
                .partial_cmp(&a.rsi)
                .unwrap_or(Ordering::Equal)
                .then(
                    a.stop_distance_pct
                        .partial_cmp(&b.stop_distance_pct)
                        .unwrap_or(Ordering::Equal),
                )
        });
        buys.truncate(p.max_buys_per_week);

        let mut recommendations: Vec<Recommendation> =
            buys.into_iter().map(|c| c.recommendation).collect();
        recommendations.extend(holds);
        recommendations.extend(reduces);
        recommendations.extend(sells);
        recommendations.extend(watches);

        WeeklyPlan {
            generated_at: Utc::now(),
            week_start,
            strategy_id: self.id().to_string(),
            strategy_version: self.version().to_string(),
            recommendations,
            notes: vec![
                format!(
                    "MA{}w/MA{}w trend + RSI({}) momentum",
                    p.ma_short, p.ma_long, p.rsi_period
                ),
                format!(
                    "ATR({}) stops: {}x stop, {}x target",
                    p.atr_period, p.atr_stop_mult, p.atr_target_mult
                ),
            ],
        }
    }
}

fn flat_recommendation(symbol: &str, action: Action, rationale: Vec<String>) -> Recommendation {
    Recommendation {
        symbol: symbol.to_string(),
        action,
        entry_type: EntryType::None,
        entry_price: 0.0,
        buy_zone_low: 0.0,
        buy_zone_high: 0.0,
        stop_loss: 0.0,
        take_profit: 0.0,
        position_target_pct: 0.0,
        earliest_fill_date: None,
        rationale,
    }
}
