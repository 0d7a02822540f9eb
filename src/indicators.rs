use crate::models::Candle;
use chrono::Datelike;
use std::collections::BTreeMap;

/// Aggregates daily bars into one bar per ISO (year, week).
///
/// open = first day's open, close/date = last day's, high = max, low = min,
/// volume = sum. Input must be date-ordered; output is week-ordered.
pub fn resample_weekly(daily: &[Candle]) -> Vec<Candle> {
    let mut weeks: BTreeMap<(i32, u32), Vec<&Candle>> = BTreeMap::new();
    for candle in daily {
        let iso = candle.date.iso_week();
        weeks
            .entry((iso.year(), iso.week()))
            .or_default()
            .push(candle);
    }

    weeks
        .into_values()
        .map(|group| {
            let first = group[0];
            let last = group[group.len() - 1];
            Candle {
                symbol: first.symbol.clone(),
                date: last.date,
                open: first.open,
                high: group.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max),
                low: group.iter().map(|c| c.low).fold(f64::INFINITY, f64::min),
                close: last.close,
                volume: group.iter().map(|c| c.volume).sum(),
            }
        })
        .collect()
}

/// Trailing simple moving average, NaN-padded until `period - 1`.
pub fn calculate_sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let mut window_sum: f64 = values[..period].iter().sum();
    out[period - 1] = window_sum / period as f64;
    for i in period..values.len() {
        window_sum += values[i] - values[i - period];
        out[i] = window_sum / period as f64;
    }
    out
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder-smoothed RSI, NaN-padded; first defined value is at index `period`.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return out;
    }

    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss -= delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    out[period] = rsi_from_avgs(avg_gain, avg_loss);

    for i in (period + 1)..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = rsi_from_avgs(avg_gain, avg_loss);
    }
    out
}

/// Wilder-smoothed ATR over true ranges, NaN-padded; first defined value is
/// at index `period`.
pub fn calculate_atr(bars: &[Candle], period: usize) -> Vec<f64> {
    let n = bars.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    let mut tr_sum = 0.0f64;
    let mut prev_close = bars[0].close;
    for i in 1..n {
        let c = &bars[i];
        let tr = (c.high - c.low)
            .max((c.high - prev_close).abs())
            .max((c.low - prev_close).abs());
        if i <= period {
            tr_sum += tr;
            if i == period {
                out[i] = tr_sum / period as f64;
            }
        } else {
            out[i] = (out[i - 1] * (period as f64 - 1.0) + tr) / period as f64;
        }
        prev_close = c.close;
    }
    out
}

/// Latest value of a NaN-padded series; NaN when the series is empty.
pub fn last_value(series: &[f64]) -> f64 {
    series.last().copied().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn candle(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            symbol: "AAA".into(),
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn sma_pads_warmup_with_nan() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = calculate_sma(&values, 3);
        assert!(sma[0].is_nan() && sma[1].is_nan());
        assert!((sma[2] - 2.0).abs() < 1e-12);
        assert!((sma[3] - 3.0).abs() < 1e-12);
        assert!((sma[4] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn sma_of_short_series_is_all_nan() {
        let sma = calculate_sma(&[1.0, 2.0], 3);
        assert!(sma.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn rsi_first_value_sits_at_period_index() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let rsi = calculate_rsi(&closes, 14);
        assert!(rsi[13].is_nan());
        // Monotone gains pin RSI at 100.
        assert!((rsi[14] - 100.0).abs() < 1e-9);
        assert!((rsi[19] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_of_flat_series_is_neutral() {
        let closes = vec![50.0; 20];
        let rsi = calculate_rsi(&closes, 14);
        assert!((rsi[14] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_of_alternating_gains_converges_on_ratio() {
        // +3 / -2 alternation has gain:loss = 3:2, RSI -> 60.
        let mut closes = vec![100.0];
        for i in 0..60 {
            let step = if i % 2 == 0 { 3.0 } else { -2.0 };
            closes.push(closes.last().unwrap() + step);
        }
        let rsi = calculate_rsi(&closes, 14);
        let last = *rsi.last().unwrap();
        assert!((last - 60.0).abs() < 2.0, "rsi was {}", last);
    }

    #[test]
    fn atr_uses_wilder_smoothing() {
        // Constant true range of 2.0: the smoothed value stays 2.0.
        let bars: Vec<Candle> = (0..20)
            .map(|i| {
                let d = day(2025, 1, 1) + chrono::Duration::days(i);
                candle(d, 100.0, 101.0, 99.0, 100.0, 1.0)
            })
            .collect();
        let atr = calculate_atr(&bars, 14);
        assert!(atr[13].is_nan());
        assert!((atr[14] - 2.0).abs() < 1e-9);
        assert!((atr[19] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn atr_true_range_includes_gaps() {
        let bars = vec![
            candle(day(2025, 1, 6), 100.0, 101.0, 99.0, 100.0, 1.0),
            // Gap up: TR = max(1, |111-100|, |110-100|) = 11
            candle(day(2025, 1, 7), 110.0, 111.0, 110.0, 110.5, 1.0),
        ];
        let atr = calculate_atr(&bars, 1);
        assert!((atr[1] - 11.0).abs() < 1e-9);
    }

    #[test]
    fn weekly_resample_groups_by_iso_week() {
        // Thu + Fri of one week, Mon of the next.
        let daily = vec![
            candle(day(2025, 3, 6), 10.0, 12.0, 9.0, 11.0, 100.0),
            candle(day(2025, 3, 7), 11.0, 14.0, 10.0, 13.0, 150.0),
            candle(day(2025, 3, 10), 13.0, 15.0, 12.0, 14.0, 80.0),
        ];
        let weekly = resample_weekly(&daily);
        assert_eq!(weekly.len(), 2);

        let first = &weekly[0];
        assert_eq!(first.date, day(2025, 3, 7));
        assert!((first.open - 10.0).abs() < 1e-12);
        assert!((first.close - 13.0).abs() < 1e-12);
        assert!((first.high - 14.0).abs() < 1e-12);
        assert!((first.low - 9.0).abs() < 1e-12);
        assert!((first.volume - 250.0).abs() < 1e-12);

        assert_eq!(weekly[1].date, day(2025, 3, 10));
    }

    #[test]
    fn weekly_resample_respects_iso_year_boundary() {
        // 2024-12-30 (Mon) and 2025-01-02 (Thu) share ISO week 2025-W01.
        let daily = vec![
            candle(day(2024, 12, 30), 10.0, 11.0, 9.0, 10.0, 10.0),
            candle(day(2025, 1, 2), 10.0, 12.0, 10.0, 11.0, 20.0),
        ];
        let weekly = resample_weekly(&daily);
        assert_eq!(weekly.len(), 1);
        assert!((weekly[0].volume - 30.0).abs() < 1e-12);
    }
}
