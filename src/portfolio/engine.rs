use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::{BrokerAdapter, TradeMirror};
use crate::config::Settings;
use crate::data::symbols::{default_spread, pip_size};
use crate::execution::engine::{EntryContext, SymbolEngine};
use crate::journal::{event_kind, EngineTradeRow, JournalStore};
use crate::models::{Bar, ExitReason, Position, Trade};
use crate::news::NewsGuard;
use crate::notify::Notifier;
use crate::portfolio::scheduler::SessionWindow;
use crate::portfolio::status::{StatusSnapshot, StatusWriter};
use crate::risk::{compute_budgets, inv_vol_weights, DrawdownLock, PortfolioBudgets, RiskRules};

/// Aggregate results over all engines
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pnl: f64,
    pub total_r: f64,
    pub equity_usd: f64,
    pub peak_equity: f64,
}

/// Owns one engine per (symbol, strategy), drives them bar by bar, and holds
/// the shared gates: session window, news guard, budgets, global halt, and
/// the drawdown lock.
///
/// The internal ledger here is authoritative for PnL; the broker mirror is
/// best effort and its failures never interrupt bar processing.
pub struct PortfolioEngine {
    settings: Settings,
    session: SessionWindow,
    news: NewsGuard,
    budgets: PortfolioBudgets,
    dd_lock: DrawdownLock,
    /// Per-symbol parity weight; 1.0 when risk parity is disabled
    weights: HashMap<String, f64>,
    engines: Vec<SymbolEngine>,
    equity_usd: f64,
    halted_day: Option<NaiveDate>,
    journal: Arc<JournalStore>,
    mirror: Option<TradeMirror>,
    notifier: Arc<dyn Notifier>,
    status: StatusWriter,
}

impl PortfolioEngine {
    pub fn new(
        settings: Settings,
        journal: Arc<JournalStore>,
        broker: Option<Arc<dyn BrokerAdapter>>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let session = SessionWindow::new(&settings.session.start, &settings.session.end)?;

        let news = match &settings.news.calendar_path {
            Some(path) => NewsGuard::from_csv(
                std::path::Path::new(path),
                settings.news.pad_before_m,
                settings.news.pad_after_m,
            )?,
            None => NewsGuard::default(),
        };

        let budgets = compute_budgets(
            &settings.strategies,
            settings.equity_usd,
            settings.risk.daily_risk_fraction,
            settings.risk.per_trade_fraction,
        );

        let rules = RiskRules {
            max_trades_per_day: settings.risk.max_trades_per_day,
            daily_loss_stop_r: settings.risk.daily_loss_stop_r,
            daily_win_stop_r: settings.risk.daily_win_stop_r,
        };

        let mut engines = Vec::new();
        for symbol in &settings.symbols {
            for kind in &settings.strategies {
                engines.push(SymbolEngine::new(
                    symbol,
                    *kind,
                    rules.clone(),
                    default_spread(symbol),
                ));
            }
        }

        let weights = settings
            .symbols
            .iter()
            .map(|s| (s.clone(), 1.0))
            .collect();

        let dd_lock = DrawdownLock::new(settings.drawdown.clone(), settings.equity_usd);
        let mirror = broker.map(|b| TradeMirror::new(b, journal.clone()));
        let status = StatusWriter::new(settings.status_dir.clone());
        let equity_usd = settings.equity_usd;

        Ok(Self {
            settings,
            session,
            news,
            budgets,
            dd_lock,
            weights,
            engines,
            equity_usd,
            halted_day: None,
            journal,
            mirror,
            notifier,
            status,
        })
    }

    /// Warm up every engine and, when enabled, derive risk-parity weights
    /// from the same history.
    pub fn prepare(&mut self, history: &HashMap<String, Vec<Bar>>) {
        for engine in &mut self.engines {
            if let Some(bars) = history.get(&engine.symbol) {
                engine.prepare(bars.clone());
            }
        }

        if self.settings.parity.enabled {
            let pip_map: HashMap<String, f64> = self
                .settings
                .symbols
                .iter()
                .map(|s| (s.clone(), pip_size(s)))
                .collect();
            let (weights, vols) = inv_vol_weights(
                &self.settings.symbols,
                history,
                self.settings.parity.lookback_days,
                &pip_map,
                self.settings.parity.floor,
                self.settings.parity.cap,
            );
            for (symbol, weight) in &weights {
                tracing::info!(
                    symbol = %symbol,
                    weight,
                    vol_pips = vols.get(symbol).copied().unwrap_or(0.0),
                    "risk-parity weight"
                );
            }
            self.weights = weights;
        }
    }

    pub fn equity_usd(&self) -> f64 {
        self.equity_usd
    }

    pub fn is_halted(&self, day: NaiveDate) -> bool {
        self.halted_day == Some(day) || self.dd_lock.is_active()
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.engines.iter().filter_map(|e| e.position()).collect()
    }

    pub fn budgets(&self) -> &PortfolioBudgets {
        &self.budgets
    }

    /// Advance every engine trading this bar's symbol.
    pub async fn process_bar(&mut self, bar: Bar) -> Result<()> {
        let day = bar.timestamp.date_naive();
        let in_window = self.session.contains(bar.timestamp);
        let news_blocked = self.news.is_blocked(&bar.symbol, bar.timestamp);

        // Cooloff re-check runs on every bar, not only on closes
        self.update_drawdown_lock(bar.timestamp).await;

        let strategy_cum_r = self.strategy_cum_r(day);
        let mut open_count = self.open_positions().len();

        let indices: Vec<usize> = self
            .engines
            .iter()
            .enumerate()
            .filter(|(_, e)| e.symbol == bar.symbol)
            .map(|(i, _)| i)
            .collect();

        for idx in indices {
            let mut closed: Vec<Trade> = Vec::new();

            // Session boundary is a hard exit, not just an entry filter
            if !in_window {
                if let Some(trade) = self.engines[idx].force_close(&bar, ExitReason::TimeStop) {
                    open_count = open_count.saturating_sub(1);
                    closed.push(trade);
                }
            }

            let strategy = self.engines[idx].kind.as_str();
            let budget_exhausted = self
                .budgets
                .exhausted(strategy, strategy_cum_r.get(strategy).copied().unwrap_or(0.0));

            let allowed = in_window
                && self.halted_day != Some(day)
                && !self.dd_lock.is_active()
                && !news_blocked
                && !budget_exhausted
                && open_count < self.settings.max_open_positions as usize;

            let weight = self.weights.get(&bar.symbol).copied().unwrap_or(1.0);
            let ctx = EntryContext {
                allowed,
                equity_usd: self.equity_usd,
                risk_fraction: self.settings.risk.per_trade_fraction * weight,
                min_units: self.settings.risk.min_units,
            };

            let outcome = self.engines[idx].process_bar(bar.clone(), &ctx);
            if let Some(trade) = outcome.closed {
                open_count = open_count.saturating_sub(1);
                closed.push(trade);
            }

            if let Some(position) = outcome.opened {
                open_count += 1;
                self.handle_open(idx, position).await;
            }
            for trade in closed {
                self.handle_close(&bar, trade).await;
            }
        }

        Ok(())
    }

    async fn handle_open(&mut self, engine_idx: usize, position: Position) {
        let mut row = trade_row_open(&position);
        if let Err(e) = self.journal.upsert_engine_trade(&row).await {
            tracing::error!(error = %e, "failed to journal trade open");
        }

        if let Some(mirror) = &self.mirror {
            if let Some(tag) = mirror.on_open(&position).await {
                self.engines[engine_idx].set_client_tag(tag.clone());
                row.client_tag = Some(tag);
                if let Err(e) = self.journal.upsert_engine_trade(&row).await {
                    tracing::error!(error = %e, "failed to journal client tag");
                }
            }
        }

        self.notifier
            .notify(
                "open",
                &format!(
                    "{} {} {} @ {:.5} ({} units)",
                    position.strategy,
                    position.symbol,
                    position.side.as_str(),
                    position.entry_price,
                    position.units
                ),
            )
            .await;
    }

    async fn handle_close(&mut self, bar: &Bar, trade: Trade) {
        self.equity_usd += trade.pnl;

        let row = trade_row_closed(&trade);
        if let Err(e) = self.journal.upsert_engine_trade(&row).await {
            tracing::error!(error = %e, "failed to journal trade close");
        }

        if let Some(mirror) = &self.mirror {
            mirror.on_close(&trade).await;
        }

        self.notifier
            .notify(
                "close",
                &format!(
                    "{} {} {} pnl {:.2} ({:+.2}R)",
                    trade.strategy,
                    trade.symbol,
                    trade.reason.as_str(),
                    trade.pnl,
                    trade.r_multiple
                ),
            )
            .await;

        self.update_drawdown_lock(bar.timestamp).await;
        self.check_global_halt(bar.timestamp.date_naive()).await;
    }

    async fn update_drawdown_lock(&mut self, at: chrono::DateTime<chrono::Utc>) {
        let was_active = self.dd_lock.is_active();
        let changed = self.dd_lock.update(self.equity_usd, at);
        if !changed {
            return;
        }

        let active = self.dd_lock.is_active();
        let payload = serde_json::json!({
            "active": active,
            "equity": self.equity_usd,
            "peak_equity": self.dd_lock.peak_equity(),
            "cooloff_until": self.dd_lock.cooloff_until().map(|t| t.to_rfc3339()),
        });
        if let Err(e) = self
            .journal
            .log_event(
                if active { "WARN" } else { "INFO" },
                event_kind::DRAWDOWN_LOCK,
                &payload,
            )
            .await
        {
            tracing::error!(error = %e, "failed to journal drawdown-lock change");
        }

        if active && !was_active {
            self.notifier
                .notify(
                    "risk",
                    &format!(
                        "drawdown lock engaged at equity {:.0} (peak {:.0})",
                        self.equity_usd,
                        self.dd_lock.peak_equity()
                    ),
                )
                .await;
        }
    }

    async fn check_global_halt(&mut self, day: NaiveDate) {
        if self.halted_day == Some(day) {
            return;
        }
        let total_r: f64 = self.engines.iter().map(|e| e.cum_r_today(day)).sum();
        if total_r > self.settings.risk.global_daily_stop_r {
            return;
        }

        self.halted_day = Some(day);
        tracing::warn!(total_r, day = %day, "global daily stop hit, halting new entries");
        if let Err(e) = self
            .journal
            .log_event(
                "WARN",
                event_kind::GLOBAL_HALT,
                &serde_json::json!({"day": day.to_string(), "total_r": total_r}),
            )
            .await
        {
            tracing::error!(error = %e, "failed to journal global halt");
        }
        self.notifier
            .notify("risk", &format!("global halt: {total_r:.2}R on {day}"))
            .await;
    }

    fn strategy_cum_r(&self, day: NaiveDate) -> HashMap<String, f64> {
        let mut map: HashMap<String, f64> = HashMap::new();
        for engine in &self.engines {
            *map.entry(engine.kind.as_str().to_string()).or_default() +=
                engine.cum_r_today(day);
        }
        map
    }

    pub fn stats(&self) -> PortfolioStats {
        let trades: Vec<&Trade> = self.engines.iter().flat_map(|e| e.trades()).collect();
        let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
        PortfolioStats {
            trades: trades.len(),
            wins,
            losses: trades.len() - wins,
            total_pnl: trades.iter().map(|t| t.pnl).sum(),
            total_r: trades.iter().map(|t| t.r_multiple).sum(),
            equity_usd: self.equity_usd,
            peak_equity: self.dd_lock.peak_equity(),
        }
    }

    async fn write_status(&self, ts: chrono::DateTime<chrono::Utc>) {
        let stats = self.stats();
        let unmapped = self.journal.unmapped_count().await.unwrap_or(-1);
        let snapshot = StatusSnapshot {
            ts,
            equity_usd: stats.equity_usd,
            peak_equity: stats.peak_equity,
            open_positions: self.open_positions().len(),
            trades_closed: stats.trades,
            total_pnl: stats.total_pnl,
            total_r: stats.total_r,
            global_halt: self.halted_day == Some(ts.date_naive()),
            dd_lock_active: self.dd_lock.is_active(),
            unmapped_trades: unmapped,
        };
        if let Err(e) = self.status.write(&snapshot) {
            tracing::warn!(error = %e, "status write failed");
        }
    }

    /// Replay historical bars through the engines in timestamp order.
    ///
    /// Bars across symbols are merge-sorted by timestamp so shared state
    /// (equity, halt, drawdown lock) sees closes in the order they happened.
    pub async fn run_replay(&mut self, mut bars_by_symbol: HashMap<String, Vec<Bar>>) -> Result<PortfolioStats> {
        let mut merged: Vec<Bar> = Vec::new();
        for (_, bars) in bars_by_symbol.drain() {
            merged.extend(bars);
        }
        merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.symbol.cmp(&b.symbol)));

        tracing::info!(bars = merged.len(), "replay starting");
        let mut last_hour: Option<i64> = None;
        let mut last_ts = None;
        for bar in merged {
            let hour = bar.timestamp.timestamp() / 3600;
            last_ts = Some(bar.timestamp);
            self.process_bar(bar).await?;
            if last_hour != Some(hour) {
                if let Some(ts) = last_ts {
                    self.write_status(ts).await;
                }
                last_hour = Some(hour);
            }
        }
        if let Some(ts) = last_ts {
            self.write_status(ts).await;
        }

        let stats = self.stats();
        tracing::info!(
            trades = stats.trades,
            pnl = stats.total_pnl,
            r = stats.total_r,
            equity = stats.equity_usd,
            "replay complete"
        );
        Ok(stats)
    }
}

fn trade_row_open(position: &Position) -> EngineTradeRow {
    EngineTradeRow {
        trade_id: position.id.to_string(),
        symbol: position.symbol.clone(),
        strategy: position.strategy.clone(),
        side: position.side.as_str().to_string(),
        entry: position.entry_price,
        sl: Some(position.stop_loss),
        tp: Some(position.take_profit),
        r: None,
        pnl: None,
        opened_at: position.entry_time,
        closed_at: None,
        client_tag: position.client_tag.clone(),
    }
}

fn trade_row_closed(trade: &Trade) -> EngineTradeRow {
    EngineTradeRow {
        trade_id: trade.id.to_string(),
        symbol: trade.symbol.clone(),
        strategy: trade.strategy.clone(),
        side: trade.side.as_str().to_string(),
        entry: trade.entry_price,
        sl: None,
        tp: None,
        r: Some(trade.r_multiple),
        pnl: Some(trade.pnl),
        opened_at: trade.entry_time,
        closed_at: Some(trade.exit_time),
        client_tag: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use chrono::{TimeZone, Utc};

    fn settings() -> Settings {
        serde_json::from_value(serde_json::json!({
            "symbols": ["EURUSD"],
            "strategies": ["breakout"],
            "status_dir": std::env::temp_dir()
                .join(format!("fxport-ptest-{}", uuid::Uuid::new_v4()))
                .to_string_lossy(),
            "risk": {
                "daily_risk_fraction": 0.02,
                "per_trade_fraction": 0.005
            }
        }))
        .unwrap()
    }

    async fn engine_for(settings: Settings) -> PortfolioEngine {
        let journal = Arc::new(JournalStore::in_memory().await.unwrap());
        PortfolioEngine::new(settings, journal, None, Arc::new(NoopNotifier)).unwrap()
    }

    fn bar_at(hour: u32, minute: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            symbol: "EURUSD".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    async fn feed_opening_range(portfolio: &mut PortfolioEngine) {
        for i in 0..6u32 {
            portfolio
                .process_bar(bar_at(7, i * 5, 1.1000, 1.1010, 1.0990, 1.1000))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_breakout_entry_in_window() {
        let mut portfolio = engine_for(settings()).await;
        feed_opening_range(&mut portfolio).await;

        portfolio
            .process_bar(bar_at(7, 30, 1.1005, 1.1030, 1.1000, 1.1025))
            .await
            .unwrap();

        assert_eq!(portfolio.open_positions().len(), 1);
        let open_rows = portfolio.journal.open_engine_trades().await.unwrap();
        assert_eq!(open_rows.len(), 1);
        assert_eq!(open_rows[0].strategy, "breakout");
    }

    #[tokio::test]
    async fn test_no_entry_outside_window() {
        let mut portfolio = engine_for(settings()).await;
        feed_opening_range(&mut portfolio).await;

        // Same breakout bar but after the 16:00 session end
        portfolio
            .process_bar(bar_at(16, 30, 1.1005, 1.1030, 1.1000, 1.1025))
            .await
            .unwrap();
        assert!(portfolio.open_positions().is_empty());
    }

    #[tokio::test]
    async fn test_window_end_force_closes_time_stop() {
        let mut portfolio = engine_for(settings()).await;
        feed_opening_range(&mut portfolio).await;
        portfolio
            .process_bar(bar_at(7, 30, 1.1005, 1.1030, 1.1000, 1.1025))
            .await
            .unwrap();
        assert_eq!(portfolio.open_positions().len(), 1);

        // First bar past the window boundary closes the position
        portfolio
            .process_bar(bar_at(16, 0, 1.1020, 1.1022, 1.1018, 1.1021))
            .await
            .unwrap();
        assert!(portfolio.open_positions().is_empty());

        let stats = portfolio.stats();
        assert_eq!(stats.trades, 1);
        let rows = portfolio.journal.open_engine_trades().await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_drawdown_lock_blocks_entries() {
        let mut s = settings();
        s.drawdown.threshold_pct = 5.0;
        let mut portfolio = engine_for(s).await;

        // Simulate a 6% equity loss through the lock directly
        portfolio.equity_usd = 94_000.0;
        portfolio
            .update_drawdown_lock(Utc.with_ymd_and_hms(2025, 6, 2, 7, 0, 0).unwrap())
            .await;
        assert!(portfolio.dd_lock.is_active());

        feed_opening_range(&mut portfolio).await;
        portfolio
            .process_bar(bar_at(7, 30, 1.1005, 1.1030, 1.1000, 1.1025))
            .await
            .unwrap();
        assert!(portfolio.open_positions().is_empty());

        let events = portfolio
            .journal
            .events_of_kind("DRAWDOWN_LOCK")
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_news_blackout_blocks_entry() {
        let dir = std::env::temp_dir().join(format!("fxport-news-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("calendar.csv");
        std::fs::write(
            &path,
            "date,time_utc,currencies,impact,title\n2025-06-02,07:45,USD,high,Nonfarm Payrolls\n",
        )
        .unwrap();

        let mut s = settings();
        s.news.calendar_path = Some(path.to_string_lossy().to_string());
        s.news.pad_before_m = 30;
        s.news.pad_after_m = 30;
        let mut portfolio = engine_for(s).await;
        feed_opening_range(&mut portfolio).await;

        // Breakout bar lands inside the padded 07:15-08:15 blackout
        portfolio
            .process_bar(bar_at(7, 30, 1.1005, 1.1030, 1.1000, 1.1025))
            .await
            .unwrap();
        assert!(portfolio.open_positions().is_empty());
    }

    #[tokio::test]
    async fn test_max_open_positions_gate() {
        let mut s = settings();
        s.max_open_positions = 0;
        let mut portfolio = engine_for(s).await;
        feed_opening_range(&mut portfolio).await;

        portfolio
            .process_bar(bar_at(7, 30, 1.1005, 1.1030, 1.1000, 1.1025))
            .await
            .unwrap();
        assert!(portfolio.open_positions().is_empty());
    }
}
