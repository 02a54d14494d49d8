use chrono::NaiveDate;
use uuid::Uuid;

use crate::data::symbols::{pip_size, pip_value};
use crate::execution::costs::{apply_costs, FillAction};
use crate::models::{Bar, ExitReason, Position, Side, Trade};
use crate::risk::{units_from_risk, RiskManager, RiskRules};
use crate::strategy::{Strategy, StrategyKind};

const ATR_PERIOD: usize = 14;
/// Bars retained per engine; enough for any strategy warmup plus vol lookback
const MAX_BARS: usize = 10_000;

/// Entry permission and sizing inputs resolved by the portfolio for one bar
#[derive(Debug, Clone)]
pub struct EntryContext {
    pub allowed: bool,
    pub equity_usd: f64,
    /// Per-trade risk fraction, already scaled by the symbol's parity weight
    pub risk_fraction: f64,
    pub min_units: u32,
}

/// What one bar did to this engine
#[derive(Debug, Clone, Default)]
pub struct BarOutcome {
    pub opened: Option<Position>,
    pub closed: Option<Trade>,
}

/// Drives one (symbol, strategy) pair: appends bars, applies the strategy,
/// manages the single open position, and records closed trades.
pub struct SymbolEngine {
    pub symbol: String,
    pub kind: StrategyKind,
    strategy: Box<dyn Strategy>,
    spread_pips: f64,
    pip: f64,
    bars: Vec<Bar>,
    position: Option<Position>,
    trades: Vec<Trade>,
    pub risk: RiskManager,
}

impl SymbolEngine {
    pub fn new(symbol: &str, kind: StrategyKind, rules: RiskRules, spread_pips: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind,
            strategy: kind.build(symbol),
            spread_pips,
            pip: pip_size(symbol),
            bars: Vec::new(),
            position: None,
            trades: Vec::new(),
            risk: RiskManager::new(rules),
        }
    }

    /// Warm up the strategy on historical bars without trading them
    pub fn prepare(&mut self, history: Vec<Bar>) {
        self.strategy.prepare(&history);
        self.bars = history;
        tracing::info!(
            symbol = %self.symbol,
            strategy = self.kind.as_str(),
            bars = self.bars.len(),
            "engine prepared"
        );
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn cum_r_today(&self, day: NaiveDate) -> f64 {
        self.risk.cum_r(day)
    }

    fn current_atr(&self) -> Option<f64> {
        crate::indicators::calculate_atr(&self.bars, ATR_PERIOD)
    }

    /// Advance one bar: exits first, then at most one new entry.
    pub fn process_bar(&mut self, bar: Bar, ctx: &EntryContext) -> BarOutcome {
        let mut outcome = BarOutcome::default();

        self.bars.push(bar.clone());
        if self.bars.len() > MAX_BARS {
            let excess = self.bars.len() - MAX_BARS;
            self.bars.drain(..excess);
        }

        if self.position.is_some() {
            outcome.closed = self.check_exits(&bar);
        }

        // Indicator state always advances, even when entries are blocked
        let signals = self.strategy.generate_signals(&self.bars);

        if self.position.is_none()
            && ctx.allowed
            && self.bars.len() >= self.strategy.min_bars_required()
            && self.risk.can_open(bar.timestamp.date_naive())
        {
            if let Some(signal) = signals.into_iter().next() {
                outcome.opened = self.open_position(&bar, signal, ctx);
            }
        }

        outcome
    }

    fn open_position(
        &mut self,
        bar: &Bar,
        signal: crate::models::Signal,
        ctx: &EntryContext,
    ) -> Option<Position> {
        let atr = self.current_atr();
        let fill = apply_costs(
            signal.price,
            signal.side,
            self.pip,
            FillAction::Open,
            self.spread_pips,
            atr,
        );

        let size = match units_from_risk(
            &self.symbol,
            fill,
            signal.stop_loss,
            ctx.equity_usd,
            ctx.risk_fraction,
        ) {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, error = %e, "sizing failed, entry skipped");
                return None;
            }
        };
        let units = size.units.max(ctx.min_units);
        if units > size.units || size.floor_applied {
            tracing::info!(
                symbol = %self.symbol,
                computed = size.units,
                used = units,
                "minimum-units floor applied"
            );
        }

        let position = Position {
            id: Uuid::new_v4(),
            symbol: self.symbol.clone(),
            strategy: self.kind.as_str().to_string(),
            side: signal.side,
            entry_price: fill,
            initial_stop: signal.stop_loss,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            units,
            entry_time: bar.timestamp,
            client_tag: None,
            notes: signal.notes,
        };

        self.risk.on_open(bar.timestamp.date_naive());
        tracing::info!(
            symbol = %self.symbol,
            strategy = self.kind.as_str(),
            side = position.side.as_str(),
            entry = fill,
            sl = position.stop_loss,
            tp = position.take_profit,
            units,
            "position opened"
        );

        self.position = Some(position.clone());
        Some(position)
    }

    /// SL/TP touch checks against the bar's high/low. Stop-loss wins when a
    /// single bar spans both levels.
    fn check_exits(&mut self, bar: &Bar) -> Option<Trade> {
        let position = self.position.as_ref()?;

        let (sl_hit, tp_hit) = match position.side {
            Side::Long => (
                bar.low <= position.stop_loss,
                bar.high >= position.take_profit,
            ),
            Side::Short => (
                bar.high >= position.stop_loss,
                bar.low <= position.take_profit,
            ),
        };

        let (level, reason) = if sl_hit {
            (position.stop_loss, ExitReason::StopLoss)
        } else if tp_hit {
            (position.take_profit, ExitReason::TakeProfit)
        } else {
            return None;
        };

        self.close_at(bar, level, reason)
    }

    /// Close the open position at a given mid price (window boundary, manual
    /// flatten). No-op when flat.
    pub fn force_close(&mut self, bar: &Bar, reason: ExitReason) -> Option<Trade> {
        self.close_at(bar, bar.close, reason)
    }

    fn close_at(&mut self, bar: &Bar, level: f64, reason: ExitReason) -> Option<Trade> {
        let position = self.position.take()?;

        let atr = self.current_atr();
        let fill = apply_costs(
            level,
            position.side,
            self.pip,
            FillAction::Close,
            self.spread_pips,
            atr,
        );

        let direction = match position.side {
            Side::Long => 1.0,
            Side::Short => -1.0,
        };
        let move_pips = (fill - position.entry_price) * direction / self.pip;
        let pnl = move_pips * pip_value(&self.symbol) * position.units as f64 / 100_000.0;

        let risk = (position.entry_price - position.initial_stop).abs();
        let r_multiple = if risk > 0.0 {
            (fill - position.entry_price) * direction / risk
        } else {
            0.0
        };

        let trade = Trade {
            id: position.id,
            symbol: position.symbol,
            strategy: position.strategy,
            side: position.side,
            entry_price: position.entry_price,
            exit_price: fill,
            units: position.units,
            entry_time: position.entry_time,
            exit_time: bar.timestamp,
            pnl,
            r_multiple,
            reason,
            notes: position.notes,
        };

        self.risk.on_close(bar.timestamp.date_naive(), r_multiple);
        tracing::info!(
            symbol = %self.symbol,
            strategy = %trade.strategy,
            reason = reason.as_str(),
            pnl = trade.pnl,
            r = trade.r_multiple,
            "position closed"
        );

        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Attach the broker idempotency tag after the mirror resolves it
    pub fn set_client_tag(&mut self, tag: String) {
        if let Some(position) = self.position.as_mut() {
            position.client_tag = Some(tag);
        }
    }
}
