//! The backtest run loop: bar-by-bar replay with cooperative pause/yield,
//! cost modelling, stop-loss enforcement and forced end-of-run liquidation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use apex_common::{MarketSnapshot, Side};

use crate::error::BacktestError;

use super::position::{BacktestPosition, BacktestTrade, ExitReason};
use super::stats::{compute_report, BacktestReport, DrawdownPoint, EquityPoint};
use super::{BacktestConfig, BacktestState, Strategy, StrategySignal};

/// Maximum tolerated fraction of invalid data points.
const MAX_INVALID_RATIO: f64 = 0.10;

/// Shared pause/stop flags, cloneable to whoever supervises the run.
#[derive(Debug, Clone, Default)]
pub struct BacktestControl {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl BacktestControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.paused.store(false, Ordering::Release);
        self.stopped.store(false, Ordering::Release);
    }
}

/// Progress snapshot, emitted at roughly 1 Hz while running.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestProgress {
    pub state: BacktestState,
    pub processed_bars: usize,
    pub total_bars: usize,
    pub pct: f64,
    pub equity: Decimal,
    pub simulated_time: Option<DateTime<Utc>>,
}

type ProgressCallback = Box<dyn Fn(&BacktestProgress) + Send>;

/// Deterministic historical replay engine.
pub struct BacktestEngine {
    config: Option<BacktestConfig>,
    state: BacktestState,
    balance: Decimal,
    position: Option<BacktestPosition>,
    trades: Vec<BacktestTrade>,
    equity_curve: Vec<EquityPoint>,
    drawdown_curve: Vec<DrawdownPoint>,
    peak_equity: Decimal,
    total_commission: Decimal,
    total_slippage: Decimal,
    processed_bars: usize,
    total_bars: usize,
    simulated_time: Option<DateTime<Utc>>,
    control: BacktestControl,
    progress_callback: Option<ProgressCallback>,
}

impl Default for BacktestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BacktestEngine {
    pub fn new() -> Self {
        Self {
            config: None,
            state: BacktestState::Uninitialized,
            balance: Decimal::ZERO,
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            drawdown_curve: Vec::new(),
            peak_equity: Decimal::ZERO,
            total_commission: Decimal::ZERO,
            total_slippage: Decimal::ZERO,
            processed_bars: 0,
            total_bars: 0,
            simulated_time: None,
            control: BacktestControl::default(),
            progress_callback: None,
        }
    }

    pub fn state(&self) -> BacktestState {
        self.state
    }

    /// Cloneable pause/stop handle for an external supervisor.
    pub fn control_handle(&self) -> BacktestControl {
        self.control.clone()
    }

    /// Register a progress observer.
    pub fn on_progress(&mut self, callback: impl Fn(&BacktestProgress) + Send + 'static) {
        self.progress_callback = Some(Box::new(callback));
    }

    /// Validate configuration and reset all simulation-local state.
    pub fn initialize(&mut self, config: BacktestConfig) -> Result<(), BacktestError> {
        if matches!(self.state, BacktestState::Running | BacktestState::Paused) {
            return Err(BacktestError::InvalidState {
                state: self.state.as_str(),
                operation: "initialize",
            });
        }
        config.validate()?;
        info!(id = %config.id, symbol = %config.symbol, "backtest initialized");

        self.balance = config.initial_capital;
        self.peak_equity = config.initial_capital;
        self.position = None;
        self.trades.clear();
        self.equity_curve.clear();
        self.drawdown_curve.clear();
        self.total_commission = Decimal::ZERO;
        self.total_slippage = Decimal::ZERO;
        self.processed_bars = 0;
        self.total_bars = 0;
        self.simulated_time = None;
        self.control.reset();
        self.config = Some(config);
        self.state = BacktestState::Initialized;
        Ok(())
    }

    /// Replay the data through the strategy.
    ///
    /// Fails fast on data-quality violations before any simulation state
    /// mutates. Per-bar strategy errors are contained and logged. The loop
    /// polls the pause flag between bars and yields to the host scheduler
    /// every `yield_every_bars` bars.
    pub async fn run(
        &mut self,
        strategy: &mut dyn Strategy,
        data: &[MarketSnapshot],
    ) -> Result<BacktestReport, BacktestError> {
        if self.state != BacktestState::Initialized {
            return Err(BacktestError::InvalidState {
                state: self.state.as_str(),
                operation: "run",
            });
        }
        let Some(config) = self.config.clone() else {
            return Err(BacktestError::InvalidState {
                state: self.state.as_str(),
                operation: "run",
            });
        };

        // Window filter and time sort.
        let mut bars: Vec<&MarketSnapshot> = data
            .iter()
            .filter(|b| {
                b.symbol == config.symbol && b.timestamp >= config.start && b.timestamp <= config.end
            })
            .collect();
        bars.sort_by_key(|b| b.timestamp);
        if bars.is_empty() {
            return Err(BacktestError::EmptyWindow);
        }

        if config.validate_data {
            let invalid = bars.iter().filter(|b| !b.is_valid()).count();
            let ratio = invalid as f64 / bars.len() as f64;
            if ratio > MAX_INVALID_RATIO {
                return Err(BacktestError::DataQuality {
                    invalid,
                    total: bars.len(),
                    ratio_pct: ratio * 100.0,
                });
            }
            bars.retain(|b| b.is_valid());
        }

        self.total_bars = bars.len();
        self.state = BacktestState::Running;
        info!(
            id = %config.id,
            strategy = strategy.name(),
            bars = bars.len(),
            "backtest running"
        );
        let mut last_progress = Instant::now();

        for (index, bar) in bars.iter().enumerate() {
            if self.control.is_stopped() {
                self.state = BacktestState::Stopped;
                break;
            }
            // Cooperative pause: poll between bars, never mid-bar.
            while self.control.is_paused() && !self.control.is_stopped() {
                self.state = BacktestState::Paused;
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            if self.control.is_stopped() {
                self.state = BacktestState::Stopped;
                break;
            }
            self.state = BacktestState::Running;
            self.simulated_time = Some(bar.timestamp);

            match strategy.on_bar(bar) {
                Ok(signals) => {
                    for signal in signals {
                        self.apply_signal(&config, signal, bar);
                    }
                }
                Err(error) => {
                    // Contained: a strategy fault skips the bar's signals.
                    warn!(bar = index, error = %error, "strategy error, bar skipped");
                }
            }

            self.mark_and_enforce_stop(&config, bar);
            self.snapshot_equity(bar.timestamp);
            self.processed_bars = index + 1;

            if last_progress.elapsed().as_secs() >= 1 {
                self.emit_progress();
                last_progress = Instant::now();
            }
            if config.yield_every_bars > 0 && (index + 1) % config.yield_every_bars == 0 {
                tokio::task::yield_now().await;
            }
        }

        // Forced liquidation of whatever is still open.
        if self.position.is_some() {
            let last = bars[self.processed_bars.saturating_sub(1).min(bars.len() - 1)];
            self.close_position(&config, last.price, last.timestamp, ExitReason::BacktestEnd);
            self.snapshot_equity(last.timestamp);
        }

        if self.state != BacktestState::Stopped {
            self.state = BacktestState::Completed;
        }
        self.emit_progress();

        let report = compute_report(
            &config,
            &self.trades,
            self.equity_curve.clone(),
            self.drawdown_curve.clone(),
            self.balance,
            self.total_commission,
            self.total_slippage,
        );
        info!(
            id = %config.id,
            trades = report.total_trades,
            final_balance = %report.final_balance,
            "backtest finished"
        );
        Ok(report)
    }

    /// Current progress snapshot.
    pub fn progress(&self) -> BacktestProgress {
        BacktestProgress {
            state: self.state,
            processed_bars: self.processed_bars,
            total_bars: self.total_bars,
            pct: if self.total_bars > 0 {
                self.processed_bars as f64 / self.total_bars as f64 * 100.0
            } else {
                0.0
            },
            equity: self.current_equity(),
            simulated_time: self.simulated_time,
        }
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    // === Simulation internals ===

    fn apply_signal(&mut self, config: &BacktestConfig, signal: StrategySignal, bar: &MarketSnapshot) {
        match signal {
            StrategySignal::EnterLong { quantity } => {
                self.open_position(config, Side::Buy, quantity, bar)
            }
            StrategySignal::EnterShort { quantity } => {
                self.open_position(config, Side::Sell, quantity, bar)
            }
            StrategySignal::Exit => {
                if self.position.is_some() {
                    self.close_position(config, bar.price, bar.timestamp, ExitReason::Signal);
                }
            }
        }
    }

    fn open_position(
        &mut self,
        config: &BacktestConfig,
        side: Side,
        quantity: Option<Decimal>,
        bar: &MarketSnapshot,
    ) {
        if self.position.is_some() {
            debug!(symbol = %bar.symbol, "entry signal ignored, position already open");
            return;
        }
        let quantity = match quantity {
            Some(q) if q > Decimal::ZERO => q,
            Some(_) => return,
            None => {
                // Fixed-fractional: risk a fraction of current balance
                // against the configured stop distance.
                let stop_distance = bar.price * config.stop_loss_pct;
                if stop_distance <= Decimal::ZERO {
                    return;
                }
                self.balance * config.risk_fraction / stop_distance
            }
        };

        let slip = bar.price * config.slippage_rate;
        let entry_price = match side {
            Side::Buy => bar.price + slip,
            Side::Sell => bar.price - slip,
        };
        let commission = entry_price * quantity * config.commission_rate;
        self.balance -= commission;
        self.total_commission += commission;
        self.total_slippage += slip * quantity;

        let position = BacktestPosition::open(
            bar.symbol.clone(),
            side,
            quantity,
            entry_price,
            bar.timestamp,
            config.stop_loss_pct,
        );
        debug!(
            symbol = %position.symbol,
            side = %side,
            quantity = %quantity,
            entry = %entry_price,
            "position opened"
        );
        self.position = Some(position);
    }

    fn close_position(
        &mut self,
        config: &BacktestConfig,
        market_price: Decimal,
        time: DateTime<Utc>,
        reason: ExitReason,
    ) {
        let Some(position) = self.position.take() else {
            return;
        };
        let slip = market_price * config.slippage_rate;
        let exit_price = match position.side {
            Side::Buy => market_price - slip,
            Side::Sell => market_price + slip,
        };
        let realized = position.pnl_at(exit_price);
        let commission = exit_price * position.quantity * config.commission_rate;
        self.balance += realized - commission;
        self.total_commission += commission;
        self.total_slippage += slip * position.quantity;

        debug!(
            symbol = %position.symbol,
            %reason,
            pnl = %realized,
            "position closed"
        );
        self.trades.push(BacktestTrade {
            id: position.id,
            symbol: position.symbol,
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time: time,
            realized_pnl: realized,
            commission,
            slippage_cost: slip * position.quantity,
            exit_reason: reason,
            max_favorable_excursion: position.max_favorable_excursion,
            max_adverse_excursion: position.max_adverse_excursion,
        });
    }

    /// Mark the open position and enforce its stop at the stop price.
    fn mark_and_enforce_stop(&mut self, config: &BacktestConfig, bar: &MarketSnapshot) {
        let stop_price = match &mut self.position {
            Some(position) => {
                position.update_mark(bar.price);
                if position.stop_hit(bar.price) {
                    Some(position.stop_price)
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some(stop_price) = stop_price {
            self.close_position(config, stop_price, bar.timestamp, ExitReason::StopLoss);
        }
    }

    fn current_equity(&self) -> Decimal {
        self.balance
            + self
                .position
                .as_ref()
                .map(|p| p.unrealized_pnl)
                .unwrap_or(Decimal::ZERO)
    }

    fn snapshot_equity(&mut self, timestamp: DateTime<Utc>) {
        let equity = self.current_equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        let drawdown = if self.peak_equity > Decimal::ZERO {
            (self.peak_equity - equity) / self.peak_equity
        } else {
            Decimal::ZERO
        };
        self.equity_curve.push(EquityPoint { timestamp, equity });
        self.drawdown_curve.push(DrawdownPoint { timestamp, drawdown });
    }

    fn emit_progress(&self) {
        if let Some(callback) = &self.progress_callback {
            callback(&self.progress());
        }
    }
}
