use crate::models::{
    Candle, ClosedTrade, EntryType, EquityPoint, ExitMode, ExitReason, OpenTrade, PendingEntry,
    PositionView, TieBreaker,
};
use anyhow::{anyhow, ensure, Result};
use chrono::NaiveDate;
use log::debug;
use std::collections::BTreeMap;

/// Pullback entries require the bar's range to cover the entry price.
pub fn entry_touched(candle: &Candle, entry: f64) -> bool {
    candle.low <= entry && entry <= candle.high
}

/// Breakout entries can gap above the level and still fill.
pub fn breakout_entry_touched(candle: &Candle, entry: f64) -> bool {
    candle.high >= entry
}

pub fn sl_touched(candle: &Candle, stop_loss: f64) -> bool {
    candle.low <= stop_loss
}

pub fn tp_touched(candle: &Candle, take_profit: f64) -> bool {
    candle.high >= take_profit
}

/// Resolve a bar that touches both the stop and the target.
pub fn resolve_same_day(
    tie_breaker: TieBreaker,
    stop_loss: f64,
    take_profit: f64,
) -> (ExitReason, f64) {
    match tie_breaker {
        TieBreaker::Worst => (ExitReason::Sl, stop_loss),
        TieBreaker::Best => (ExitReason::Tp, take_profit),
    }
}

fn money(qty: i64, price: f64) -> i64 {
    (qty as f64 * price).round() as i64
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Portfolio simulator.
///
/// Owns all mutable state: cash, pending entries, open and closed trades and
/// the daily equity curve. Per-symbol collections are `BTreeMap`s so every
/// per-day phase walks symbols in lexicographic order.
///
/// Per-day ordering inside [`BacktestEngine::process_day`]:
/// 1. expire stale pending entries,
/// 2. fill pending entries on touch,
/// 3. evaluate mechanical exits (tpsl_only mode only),
/// 4. append the equity point.
pub struct BacktestEngine {
    initial_cash: i64,
    cash: i64,
    tie_breaker: TieBreaker,
    exit_mode: ExitMode,
    fee_per_trade: i64,
    pending_entries: BTreeMap<String, PendingEntry>,
    open_trades: BTreeMap<String, OpenTrade>,
    closed_trades: Vec<ClosedTrade>,
    equity_curve: Vec<EquityPoint>,
    last_close: BTreeMap<String, f64>,
}

impl BacktestEngine {
    pub fn new(
        initial_cash: i64,
        tie_breaker: TieBreaker,
        exit_mode: ExitMode,
        fee_per_trade: i64,
    ) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            tie_breaker,
            exit_mode,
            fee_per_trade,
            pending_entries: BTreeMap::new(),
            open_trades: BTreeMap::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
            last_close: BTreeMap::new(),
        }
    }

    pub fn initial_cash(&self) -> i64 {
        self.initial_cash
    }

    pub fn cash(&self) -> i64 {
        self.cash
    }

    pub fn exit_mode(&self) -> ExitMode {
        self.exit_mode
    }

    pub fn open_trades(&self) -> &BTreeMap<String, OpenTrade> {
        &self.open_trades
    }

    pub fn pending_entries(&self) -> &BTreeMap<String, PendingEntry> {
        &self.pending_entries
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed_trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Read-only snapshot of held positions for the signal generator.
    pub fn open_positions_view(&self) -> BTreeMap<String, PositionView> {
        self.open_trades
            .iter()
            .map(|(symbol, trade)| {
                (
                    symbol.clone(),
                    PositionView {
                        qty: trade.qty,
                        entry_price: trade.entry_price,
                    },
                )
            })
            .collect()
    }

    fn open_positions_value(&self) -> i64 {
        self.open_trades
            .values()
            .map(|trade| {
                let mark = self
                    .last_close
                    .get(&trade.symbol)
                    .copied()
                    .unwrap_or(trade.entry_price);
                money(trade.qty, mark)
            })
            .sum()
    }

    /// Cash plus open positions marked to the last seen close.
    pub fn current_equity(&self) -> i64 {
        self.cash + self.open_positions_value()
    }

    /// Register (or replace) the pending entry for a symbol.
    ///
    /// A pending entry for an already-held symbol is a programming error in
    /// the caller and aborts the run.
    pub fn register_pending(&mut self, pending: PendingEntry) -> Result<()> {
        ensure!(pending.target_qty > 0, "pending entry for {} has qty 0", pending.symbol);
        ensure!(
            pending.stop_loss < pending.entry_price && pending.entry_price < pending.take_profit,
            "pending entry for {} has invalid price geometry (sl {} entry {} tp {})",
            pending.symbol,
            pending.stop_loss,
            pending.entry_price,
            pending.take_profit
        );
        ensure!(
            !self.open_trades.contains_key(&pending.symbol),
            "pending entry registered for already-held symbol {}",
            pending.symbol
        );

        if self.pending_entries.contains_key(&pending.symbol) {
            debug!("{}: replacing existing pending entry", pending.symbol);
        }
        self.pending_entries.insert(pending.symbol.clone(), pending);
        Ok(())
    }

    pub fn clear_pending_entries(&mut self) {
        if !self.pending_entries.is_empty() {
            debug!("cancelling {} unfilled pending entries", self.pending_entries.len());
        }
        self.pending_entries.clear();
    }

    fn expire_pending_entries(&mut self, date: NaiveDate) {
        self.pending_entries.retain(|symbol, pending| {
            let keep = date < pending.expires_at;
            if !keep {
                debug!("{}: pending entry expired on {}", symbol, date);
            }
            keep
        });
    }

    /// Run one simulated day. `candles` holds this date's bar for every
    /// symbol that traded; symbols without a bar are skipped, not
    /// synthesized.
    pub fn process_day(&mut self, candles: &BTreeMap<String, Candle>, date: NaiveDate) -> Result<()> {
        if let Some(last) = self.equity_curve.last() {
            ensure!(
                last.date < date,
                "process_day called out of order ({} after {})",
                date,
                last.date
            );
        }

        for (symbol, candle) in candles {
            self.last_close.insert(symbol.clone(), candle.close);
        }

        self.expire_pending_entries(date);
        self.fill_pending_entries(candles, date)?;

        if self.exit_mode == ExitMode::TpslOnly {
            self.evaluate_mechanical_exits(candles, date)?;
        }

        let open_positions_value = self.open_positions_value();
        self.equity_curve.push(EquityPoint {
            date,
            cash: self.cash,
            open_positions_value,
            total_value: self.cash + open_positions_value,
        });
        Ok(())
    }

    fn fill_pending_entries(
        &mut self,
        candles: &BTreeMap<String, Candle>,
        date: NaiveDate,
    ) -> Result<()> {
        let symbols: Vec<String> = self.pending_entries.keys().cloned().collect();
        for symbol in symbols {
            let Some(candle) = candles.get(&symbol) else {
                continue;
            };
            let pending = self
                .pending_entries
                .get(&symbol)
                .expect("pending symbol vanished mid-loop")
                .clone();

            if let Some(earliest) = pending.earliest_fill_date {
                if candle.date < earliest {
                    continue;
                }
            }

            let touched = match pending.entry_type {
                EntryType::Breakout => breakout_entry_touched(candle, pending.entry_price),
                _ => entry_touched(candle, pending.entry_price),
            };
            if !touched {
                continue;
            }

            let cost = money(pending.target_qty, pending.entry_price) + self.fee_per_trade;
            if cost > self.cash {
                debug!(
                    "{}: fill rejected on {} (cost {} exceeds cash {})",
                    symbol, date, cost, self.cash
                );
                self.pending_entries.remove(&symbol);
                continue;
            }

            self.cash -= cost;
            ensure!(self.cash >= 0, "cash went negative filling {} on {}", symbol, date);

            let trade = OpenTrade {
                symbol: symbol.clone(),
                entry_date: candle.date,
                entry_price: pending.entry_price,
                qty: pending.target_qty,
                stop_loss: pending.stop_loss,
                take_profit: pending.take_profit,
                cost,
                entry_type: pending.entry_type,
            };
            let previous = self.open_trades.insert(symbol.clone(), trade);
            ensure!(
                previous.is_none(),
                "second concurrent position opened for {} on {}",
                symbol,
                date
            );
            self.pending_entries.remove(&symbol);
            debug!("{}: filled {} shares at {} on {}", symbol, pending.target_qty, pending.entry_price, date);
        }
        Ok(())
    }

    fn evaluate_mechanical_exits(
        &mut self,
        candles: &BTreeMap<String, Candle>,
        date: NaiveDate,
    ) -> Result<()> {
        let symbols: Vec<String> = self.open_trades.keys().cloned().collect();
        for symbol in symbols {
            let trade = self
                .open_trades
                .get(&symbol)
                .expect("open symbol vanished mid-loop");
            // No same-day entry+exit: a trade filled today waits for the
            // next bar.
            if trade.entry_date >= date {
                continue;
            }
            let Some(candle) = candles.get(&symbol) else {
                continue;
            };

            let hit_sl = sl_touched(candle, trade.stop_loss);
            let hit_tp = tp_touched(candle, trade.take_profit);
            let (reason, exit_price) = if hit_sl && hit_tp {
                resolve_same_day(self.tie_breaker, trade.stop_loss, trade.take_profit)
            } else if hit_tp {
                (ExitReason::Tp, trade.take_profit)
            } else if hit_sl {
                (ExitReason::Sl, trade.stop_loss)
            } else {
                continue;
            };

            self.close_full_position(&symbol, date, exit_price, reason)?;
        }
        Ok(())
    }

    fn close_full_position(
        &mut self,
        symbol: &str,
        date: NaiveDate,
        exit_price: f64,
        reason: ExitReason,
    ) -> Result<()> {
        let trade = self
            .open_trades
            .remove(symbol)
            .ok_or_else(|| anyhow!("no open position for {} to close", symbol))?;
        ensure!(
            date > trade.entry_date,
            "same-day exit attempted for {} on {}",
            symbol,
            date
        );

        let proceeds = money(trade.qty, exit_price) - self.fee_per_trade;
        self.cash += proceeds;
        let pnl = proceeds - trade.cost;

        self.closed_trades.push(Self::closed_trade(
            &trade, date, exit_price, reason, trade.qty, pnl,
        ));
        Ok(())
    }

    /// Close the whole position at a market price. Signals for non-held
    /// symbols are ignored.
    pub fn force_exit_at_market(
        &mut self,
        symbol: &str,
        date: NaiveDate,
        market_price: f64,
        reason: ExitReason,
    ) -> Result<bool> {
        if !self.open_trades.contains_key(symbol) {
            return Ok(false);
        }
        self.close_full_position(symbol, date, market_price, reason)?;
        Ok(true)
    }

    /// Sell half the position (keeping `floor(qty / 2)`), realizing PnL on
    /// the sold shares. A residual of zero coalesces into a single SELL.
    pub fn reduce_position(
        &mut self,
        symbol: &str,
        date: NaiveDate,
        market_price: f64,
    ) -> Result<bool> {
        let Some(trade) = self.open_trades.get(symbol) else {
            return Ok(false);
        };

        let residual_qty = trade.qty / 2;
        if residual_qty == 0 {
            return self.force_exit_at_market(symbol, date, market_price, ExitReason::Sell);
        }

        let trade = self
            .open_trades
            .get_mut(symbol)
            .expect("held symbol vanished mid-reduce");
        ensure!(
            date > trade.entry_date,
            "same-day reduce attempted for {} on {}",
            symbol,
            date
        );

        let qty_sold = trade.qty - residual_qty;
        let proceeds = money(qty_sold, market_price) - self.fee_per_trade;
        let cost_of_sold = trade.cost * qty_sold / trade.qty;
        trade.qty = residual_qty;
        trade.cost -= cost_of_sold;

        self.cash += proceeds;
        let pnl = proceeds - cost_of_sold;
        let record = Self::closed_trade(trade, date, market_price, ExitReason::Reduce, qty_sold, pnl);
        self.closed_trades.push(record);
        Ok(true)
    }

    fn closed_trade(
        trade: &OpenTrade,
        exit_date: NaiveDate,
        exit_price: f64,
        reason: ExitReason,
        qty: i64,
        pnl: i64,
    ) -> ClosedTrade {
        let return_pct = if trade.entry_price > 0.0 {
            round4((exit_price - trade.entry_price) / trade.entry_price * 100.0)
        } else {
            0.0
        };
        ClosedTrade {
            symbol: trade.symbol.clone(),
            entry_date: trade.entry_date,
            entry_price: trade.entry_price,
            exit_date,
            exit_price,
            qty,
            reason,
            return_pct,
            pnl_vnd: pnl,
            hold_days: (exit_date - trade.entry_date).num_days(),
        }
    }
}
