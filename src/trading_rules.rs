use crate::config::RiskConfig;

pub const PRICE_EPSILON: f64 = 1e-6;

/// HOSE tick size by price band.
pub fn vnd_tick_size(price: f64) -> f64 {
    if price < 10_000.0 {
        10.0
    } else if price < 50_000.0 {
        50.0
    } else {
        100.0
    }
}

/// Round a price to the exchange tick (round-half-up).
pub fn round_to_tick(price: f64) -> f64 {
    let step = vnd_tick_size(price);
    (price / step + 0.5).floor() * step
}

/// Risk-based allocation hint:
/// `clamp(risk_per_trade_pct / stop_distance_pct, min_alloc, max_alloc)`.
pub fn allocation_pct(risk: &RiskConfig, entry_price: f64, stop_loss: f64) -> f64 {
    let stop_distance = if entry_price > 0.0 {
        (entry_price - stop_loss) / entry_price
    } else {
        0.0
    };

    let raw = if stop_distance > PRICE_EPSILON && stop_distance.is_finite() {
        risk.risk_per_trade_pct / stop_distance
    } else {
        risk.max_alloc_pct
    };

    let clamped = raw.clamp(risk.min_alloc_pct, risk.max_alloc_pct);
    (clamped * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionAllocation {
    pub qty: i64,
    /// Projected entry cost in VND, entry-side fee included.
    pub cost: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PositionSizingOutcome {
    Sized(PositionAllocation),
    TooSmall,
    InsufficientCash { required: i64 },
}

pub struct PositionSizingParams {
    pub entry_price: f64,
    pub equity: i64,
    pub available_cash: i64,
    pub position_target_pct: f64,
    /// Fixed VND per trade; overrides the percentage sizing when set.
    pub fixed_order_size: Option<i64>,
    pub fee_per_trade: i64,
}

/// Convert an allocation into an integer share count and check it against
/// available cash. `qty = floor(trade_value / entry_price)`.
pub fn determine_position_size(params: PositionSizingParams) -> PositionSizingOutcome {
    let PositionSizingParams {
        entry_price,
        equity,
        available_cash,
        position_target_pct,
        fixed_order_size,
        fee_per_trade,
    } = params;

    if entry_price <= 0.0 || !entry_price.is_finite() {
        return PositionSizingOutcome::TooSmall;
    }

    let trade_value = match fixed_order_size {
        Some(size) if size > 0 => size as f64,
        _ => {
            if position_target_pct > 0.0 {
                equity.max(0) as f64 * position_target_pct
            } else {
                return PositionSizingOutcome::TooSmall;
            }
        }
    };

    let qty = (trade_value / entry_price).floor() as i64;
    if qty <= 0 {
        return PositionSizingOutcome::TooSmall;
    }

    let cost = (qty as f64 * entry_price).round() as i64 + fee_per_trade;
    if cost > available_cash {
        return PositionSizingOutcome::InsufficientCash { required: cost };
    }

    PositionSizingOutcome::Sized(PositionAllocation { qty, cost })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_size_follows_hose_bands() {
        assert_eq!(vnd_tick_size(9_990.0), 10.0);
        assert_eq!(vnd_tick_size(10_000.0), 50.0);
        assert_eq!(vnd_tick_size(49_950.0), 50.0);
        assert_eq!(vnd_tick_size(50_000.0), 100.0);
    }

    #[test]
    fn round_to_tick_rounds_half_up() {
        assert_eq!(round_to_tick(10_014.0), 10_000.0);
        assert_eq!(round_to_tick(10_025.0), 10_050.0);
        assert_eq!(round_to_tick(9_995.0), 10_000.0);
        assert_eq!(round_to_tick(52_049.0), 52_000.0);
        assert_eq!(round_to_tick(52_050.0), 52_100.0);
    }

    #[test]
    fn allocation_pct_clamps_to_the_configured_band() {
        let risk = RiskConfig::default();
        // 1% risk over a 10% stop distance -> 10% allocation.
        assert!((allocation_pct(&risk, 100.0, 90.0) - 0.10).abs() < 1e-9);
        // Tight stop (2%) would ask for 50%: clamped to max_alloc.
        assert!((allocation_pct(&risk, 100.0, 98.0) - risk.max_alloc_pct).abs() < 1e-9);
        // Wide stop (50%) would ask for 2%: clamped to min_alloc.
        assert!((allocation_pct(&risk, 100.0, 50.0) - risk.min_alloc_pct).abs() < 1e-9);
    }

    #[test]
    fn sizing_floors_to_integer_shares() {
        let outcome = determine_position_size(PositionSizingParams {
            entry_price: 100.0,
            equity: 10_000_000,
            available_cash: 10_000_000,
            position_target_pct: 0.10,
            fixed_order_size: None,
            fee_per_trade: 0,
        });
        assert_eq!(
            outcome,
            PositionSizingOutcome::Sized(PositionAllocation {
                qty: 10_000,
                cost: 1_000_000,
            })
        );
    }

    #[test]
    fn fixed_order_size_overrides_percentage() {
        let outcome = determine_position_size(PositionSizingParams {
            entry_price: 100.0,
            equity: 10_000_000,
            available_cash: 10_000_000,
            position_target_pct: 0.10,
            fixed_order_size: Some(1_500_000),
            fee_per_trade: 0,
        });
        assert_eq!(
            outcome,
            PositionSizingOutcome::Sized(PositionAllocation {
                qty: 15_000,
                cost: 1_500_000,
            })
        );
    }

    #[test]
    fn sizing_rejects_zero_quantity_and_thin_cash() {
        let too_small = determine_position_size(PositionSizingParams {
            entry_price: 100_000.0,
            equity: 1_000_000,
            available_cash: 1_000_000,
            position_target_pct: 0.03,
            fixed_order_size: None,
            fee_per_trade: 0,
        });
        assert_eq!(too_small, PositionSizingOutcome::TooSmall);

        let short_cash = determine_position_size(PositionSizingParams {
            entry_price: 100.0,
            equity: 10_000_000,
            available_cash: 500_000,
            position_target_pct: 0.10,
            fixed_order_size: None,
            fee_per_trade: 0,
        });
        assert_eq!(
            short_cash,
            PositionSizingOutcome::InsufficientCash { required: 1_000_000 }
        );
    }

    #[test]
    fn fee_counts_against_available_cash() {
        let outcome = determine_position_size(PositionSizingParams {
            entry_price: 100.0,
            equity: 1_000_000,
            available_cash: 100_000,
            position_target_pct: 0.10,
            fixed_order_size: None,
            fee_per_trade: 5_000,
        });
        assert_eq!(
            outcome,
            PositionSizingOutcome::InsufficientCash { required: 105_000 }
        );
    }
}
