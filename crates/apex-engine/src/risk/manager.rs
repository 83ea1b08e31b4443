//! The risk manager: a continuously-invoked risk gate plus a request-time
//! position sizer.
//!
//! Invariant: trading is permitted iff `trading_allowed` and no emergency
//! stop and the risk circuit breaker is closed. Hard violations disable
//! trading and surface as typed errors; soft violations only ratchet the
//! position-size multiplier downward until the session resets.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use apex_common::MarketSnapshot;

use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use crate::config::RiskConfig;
use crate::error::RiskError;
use crate::order::{OrderRequest, PreTradePolicy};

use super::{AlertCategory, RiskAction, RiskAlert, RiskMetrics};

/// Outcome of a passing risk check.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    /// Current position-size scalar after any soft reductions.
    pub size_multiplier: Decimal,
    /// Volatility-adjusted stop-loss distance (fraction of entry price).
    pub stop_loss_pct: Decimal,
    /// Alerts raised by this check.
    pub alerts: Vec<RiskAlert>,
}

/// Snapshot for external surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub trading_allowed: bool,
    pub emergency_stopped: bool,
    pub breaker: BreakerSnapshot,
    pub size_multiplier: Decimal,
    pub stop_loss_pct: Decimal,
    pub metrics: RiskMetrics,
    pub alert_count: usize,
}

/// Continuous and pre-trade risk evaluation.
pub struct RiskManager {
    config: RiskConfig,
    trading_allowed: bool,
    emergency_stopped: bool,
    breaker: CircuitBreaker,
    size_multiplier: Decimal,
    dynamic_stop_pct: Decimal,
    price_history: VecDeque<Decimal>,
    volatility_history: VecDeque<Decimal>,
    volume_history: VecDeque<Decimal>,
    peak_equity: Decimal,
    alerts: VecDeque<RiskAlert>,
    metrics: RiskMetrics,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        let peak_equity = config.account_balance;
        let dynamic_stop_pct = config.base_stop_loss_pct;
        let breaker = CircuitBreaker::new(BreakerConfig::new(
            // The risk breaker trips explicitly, not by error count.
            u32::MAX,
            config.breaker_cooldown(),
        ));
        Self {
            config,
            trading_allowed: true,
            emergency_stopped: false,
            breaker,
            size_multiplier: Decimal::ONE,
            dynamic_stop_pct,
            price_history: VecDeque::new(),
            volatility_history: VecDeque::new(),
            volume_history: VecDeque::new(),
            peak_equity,
            alerts: VecDeque::new(),
            metrics: RiskMetrics::default(),
        }
    }

    /// Composite permission gate.
    pub fn is_trading_allowed(&self) -> bool {
        self.trading_allowed && !self.emergency_stopped && self.breaker.is_closed()
    }

    pub fn size_multiplier(&self) -> Decimal {
        self.size_multiplier
    }

    pub fn metrics(&self) -> &RiskMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    // === Continuous risk evaluation ===

    /// Evaluate the full risk battery against a market snapshot.
    ///
    /// Checks run in order: daily loss, position size, dynamic stop-loss,
    /// volatility spike, liquidity thinness, drawdown, consecutive losses.
    /// The first hard violation disables trading and returns the typed
    /// error; soft violations accumulate alerts and ratchet the size
    /// multiplier, which persists across calls until the session resets.
    pub fn check_risk(
        &mut self,
        snapshot: &MarketSnapshot,
        current_position: Decimal,
        daily_pnl: Decimal,
    ) -> Result<RiskAssessment, RiskError> {
        self.record_sample(snapshot);
        self.prune_alerts();

        if self.emergency_stopped {
            return Err(RiskError::TradingHalted {
                reason: "emergency stop active".to_string(),
            });
        }
        if !self.breaker.is_closed() {
            self.check_circuit_breaker();
            if !self.breaker.is_closed() {
                return Err(RiskError::TradingHalted {
                    reason: "risk circuit breaker active".to_string(),
                });
            }
        }

        // The caller's portfolio view is authoritative at check time.
        self.metrics.daily_pnl = daily_pnl;

        let mut raised = Vec::new();

        self.check_daily_loss(daily_pnl, &mut raised)?;
        self.check_position_size(current_position, snapshot.price, &mut raised)?;
        self.update_dynamic_stop(snapshot);
        self.check_volatility(snapshot, &mut raised)?;
        self.check_liquidity(snapshot, &mut raised);
        self.check_drawdown(daily_pnl, &mut raised)?;
        self.check_consecutive_losses(&mut raised)?;

        Ok(RiskAssessment {
            size_multiplier: self.size_multiplier,
            stop_loss_pct: self.dynamic_stop_pct,
            alerts: raised,
        })
    }

    fn record_sample(&mut self, snapshot: &MarketSnapshot) {
        push_bounded(&mut self.price_history, snapshot.price, self.config.history_window);
        push_bounded(
            &mut self.volatility_history,
            snapshot.volatility,
            self.config.history_window,
        );
        push_bounded(&mut self.volume_history, snapshot.volume, self.config.history_window);
    }

    fn check_daily_loss(
        &mut self,
        daily_pnl: Decimal,
        raised: &mut Vec<RiskAlert>,
    ) -> Result<(), RiskError> {
        let limit = self.config.max_daily_loss;
        if daily_pnl <= -limit {
            self.halt(
                RiskAlert::critical(
                    AlertCategory::DailyLoss,
                    format!("daily loss {} reached limit {}", daily_pnl, limit),
                    9,
                ),
                raised,
            );
            return Err(RiskError::DailyLossLimit {
                pnl: daily_pnl,
                limit,
            });
        }
        if daily_pnl <= -self.config.soft_daily_loss() {
            self.soften(
                RiskAlert::warning(
                    AlertCategory::DailyLoss,
                    format!(
                        "daily loss {} at {}% of limit {}",
                        daily_pnl,
                        self.config.soft_limit_ratio * Decimal::ONE_HUNDRED,
                        limit
                    ),
                    6,
                ),
                raised,
            );
        }
        Ok(())
    }

    fn check_position_size(
        &mut self,
        position: Decimal,
        price: Decimal,
        raised: &mut Vec<RiskAlert>,
    ) -> Result<(), RiskError> {
        let size = position.abs();
        if size > self.config.max_position_size {
            self.halt(
                RiskAlert::critical(
                    AlertCategory::PositionSize,
                    format!(
                        "position {} exceeds max size {}",
                        size, self.config.max_position_size
                    ),
                    8,
                ),
                raised,
            );
            return Err(RiskError::PositionLimit {
                position: size,
                max: self.config.max_position_size,
            });
        }
        let notional = size * price;
        let soft_notional = self.config.max_position_notional * Decimal::new(11, 1);
        if notional > soft_notional {
            self.soften(
                RiskAlert::warning(
                    AlertCategory::PositionSize,
                    format!(
                        "position notional {} above 110% of max {}",
                        notional, self.config.max_position_notional
                    ),
                    5,
                ),
                raised,
            );
        }
        Ok(())
    }

    /// Stop-loss distance scaled by the current/average volatility ratio,
    /// clamped to [0.5x, 2.0x] of the configured base.
    fn update_dynamic_stop(&mut self, snapshot: &MarketSnapshot) {
        let avg = mean(&self.volatility_history);
        if avg <= Decimal::ZERO {
            self.dynamic_stop_pct = self.config.base_stop_loss_pct;
            return;
        }
        let ratio = (snapshot.volatility / avg)
            .clamp(Decimal::new(5, 1), Decimal::TWO);
        self.dynamic_stop_pct = self.config.base_stop_loss_pct * ratio;
    }

    fn check_volatility(
        &mut self,
        snapshot: &MarketSnapshot,
        raised: &mut Vec<RiskAlert>,
    ) -> Result<(), RiskError> {
        // Too little history to call anything a spike.
        if self.volatility_history.len() < 10 {
            return Ok(());
        }
        let avg = mean(&self.volatility_history);
        if avg > Decimal::ZERO && snapshot.volatility > avg * self.config.volatility_spike_mult {
            let alert = RiskAlert::critical(
                AlertCategory::Volatility,
                format!(
                    "volatility {} above {}x trailing average {}",
                    snapshot.volatility, self.config.volatility_spike_mult, avg
                ),
                9,
            );
            raised.push(alert.clone());
            self.log_alert(alert);
            self.activate_circuit_breaker("volatility spike");
            return Err(RiskError::VolatilitySpike {
                current: snapshot.volatility,
                average: avg,
            });
        }
        let p95 = percentile(&self.volatility_history, 95);
        if snapshot.volatility > p95 {
            self.soften(
                RiskAlert::warning(
                    AlertCategory::Volatility,
                    format!("volatility {} above trailing p95 {}", snapshot.volatility, p95),
                    5,
                ),
                raised,
            );
        }
        Ok(())
    }

    fn check_liquidity(&mut self, snapshot: &MarketSnapshot, raised: &mut Vec<RiskAlert>) {
        if !snapshot.liquidity.is_thin() {
            return;
        }
        let avg_volume = mean(&self.volume_history);
        if avg_volume > Decimal::ZERO
            && snapshot.volume < avg_volume * self.config.thin_volume_ratio
        {
            self.soften(
                RiskAlert::warning(
                    AlertCategory::Liquidity,
                    format!(
                        "volume {} below {} of trailing average {} in thin market",
                        snapshot.volume, self.config.thin_volume_ratio, avg_volume
                    ),
                    4,
                ),
                raised,
            );
        }
    }

    fn check_drawdown(
        &mut self,
        daily_pnl: Decimal,
        raised: &mut Vec<RiskAlert>,
    ) -> Result<(), RiskError> {
        let equity = self.config.account_balance + daily_pnl;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity <= Decimal::ZERO {
            return Ok(());
        }
        let drawdown = (self.peak_equity - equity) / self.peak_equity;
        self.metrics.current_drawdown = drawdown;
        if drawdown > self.metrics.max_drawdown {
            self.metrics.max_drawdown = drawdown;
        }

        let max = self.config.max_drawdown_pct;
        if drawdown >= max {
            self.halt(
                RiskAlert::critical(
                    AlertCategory::Drawdown,
                    format!("drawdown {} reached max {}", drawdown, max),
                    10,
                ),
                raised,
            );
            return Err(RiskError::DrawdownLimit {
                drawdown_pct: drawdown * Decimal::ONE_HUNDRED,
                max_pct: max * Decimal::ONE_HUNDRED,
            });
        }
        if drawdown >= max * self.config.soft_limit_ratio {
            self.soften(
                RiskAlert::warning(
                    AlertCategory::Drawdown,
                    format!("drawdown {} at 80% of max {}", drawdown, max),
                    6,
                ),
                raised,
            );
        }
        Ok(())
    }

    fn check_consecutive_losses(&mut self, raised: &mut Vec<RiskAlert>) -> Result<(), RiskError> {
        let count = self.metrics.current_consecutive_losses;
        let max = self.config.max_consecutive_losses;
        if count >= max {
            self.halt(
                RiskAlert::critical(
                    AlertCategory::ConsecutiveLosses,
                    format!("{count} consecutive losses reached limit {max}"),
                    8,
                ),
                raised,
            );
            return Err(RiskError::ConsecutiveLosses { count, max });
        }
        Ok(())
    }

    // === Position sizing ===

    /// Risk-based position size: a fraction of the daily-loss budget
    /// divided by the per-unit risk distance, scaled by the current size
    /// multiplier and clamped to [1, max_position_size].
    pub fn calculate_position_size(
        &self,
        entry_price: Decimal,
        stop_loss: Decimal,
    ) -> Result<Decimal, RiskError> {
        if !self.is_trading_allowed() {
            return Err(RiskError::TradingHalted {
                reason: "trading disabled".to_string(),
            });
        }
        let risk_distance = (entry_price - stop_loss).abs();
        if risk_distance == Decimal::ZERO {
            return Err(RiskError::ZeroRiskDistance {
                entry: entry_price,
                stop: stop_loss,
            });
        }
        let budget = self.config.max_daily_loss * self.config.risk_per_trade;
        let base = budget / risk_distance;
        let scaled = base * self.size_multiplier;
        Ok(scaled.clamp(Decimal::ONE, self.config.max_position_size))
    }

    // === Pre-trade gate ===

    /// Daily-loss and position-size admission check for order submission.
    pub fn pre_trade_check(&self, request: &OrderRequest) -> Result<(), RiskError> {
        if !self.is_trading_allowed() {
            return Err(RiskError::TradingHalted {
                reason: "trading disabled".to_string(),
            });
        }
        if self.metrics.daily_pnl <= -self.config.max_daily_loss {
            return Err(RiskError::DailyLossLimit {
                pnl: self.metrics.daily_pnl,
                limit: self.config.max_daily_loss,
            });
        }
        if request.quantity > self.config.max_position_size {
            return Err(RiskError::PositionLimit {
                position: request.quantity,
                max: self.config.max_position_size,
            });
        }
        Ok(())
    }

    // === Circuit breaker ===

    /// Disable trading for the configured cooldown.
    pub fn activate_circuit_breaker(&mut self, reason: &str) {
        warn!(reason, "risk circuit breaker activated");
        self.breaker.trip();
        self.log_alert(
            RiskAlert::critical(
                AlertCategory::CircuitBreaker,
                format!("circuit breaker activated: {reason}"),
                9,
            )
            .with_action(RiskAction::StopTrading),
        );
    }

    /// Periodic check: auto-reset the breaker once its window elapsed.
    /// Returns true if a reset happened.
    pub fn check_circuit_breaker(&mut self) -> bool {
        if !self.breaker.is_closed() && self.breaker.window_elapsed() {
            info!("risk circuit breaker cooldown elapsed, re-enabling trading");
            self.breaker.reset();
            return true;
        }
        false
    }

    // === Trade outcomes ===

    /// Fold a realized trade result into the session metrics.
    pub fn update_trade_outcome(&mut self, pnl: Decimal, was_stop: bool) {
        self.metrics.total_trades += 1;
        self.metrics.daily_pnl += pnl;

        if pnl > Decimal::ZERO {
            self.metrics.winning_trades += 1;
            self.metrics.gross_profit += pnl;
            self.metrics.current_consecutive_losses = 0;
            self.metrics.consecutive_stops = 0;
            if pnl > self.metrics.largest_win {
                self.metrics.largest_win = pnl;
            }
            self.metrics.avg_win_size =
                self.metrics.gross_profit / Decimal::from(self.metrics.winning_trades);
        } else if pnl < Decimal::ZERO {
            let loss = pnl.abs();
            self.metrics.gross_loss += loss;
            self.metrics.current_consecutive_losses += 1;
            if self.metrics.current_consecutive_losses > self.metrics.max_consecutive_losses {
                self.metrics.max_consecutive_losses = self.metrics.current_consecutive_losses;
            }
            if was_stop {
                self.metrics.consecutive_stops += 1;
            }
            if loss > self.metrics.largest_loss {
                self.metrics.largest_loss = loss;
            }
            let losing = self.metrics.losing_trades();
            if losing > 0 {
                self.metrics.avg_loss_size = self.metrics.gross_loss / Decimal::from(losing);
            }
        }

        if self.metrics.total_trades > 0 {
            self.metrics.win_rate = Decimal::from(self.metrics.winning_trades)
                / Decimal::from(self.metrics.total_trades);
        }
        self.metrics.profit_factor = if self.metrics.gross_loss > Decimal::ZERO {
            self.metrics.gross_profit / self.metrics.gross_loss
        } else {
            Decimal::ZERO
        };
    }

    // === Session control ===

    /// Hard manual stop; only a session reset re-enables trading.
    pub fn emergency_stop(&mut self, reason: &str) {
        warn!(reason, "risk emergency stop");
        self.emergency_stopped = true;
        self.trading_allowed = false;
        self.log_alert(
            RiskAlert::critical(AlertCategory::Emergency, format!("emergency stop: {reason}"), 10)
                .with_action(RiskAction::EmergencyStop),
        );
    }

    /// Reinitialize all session-scoped state and re-enable trading.
    /// Called once per trading-day boundary by the host scheduler.
    pub fn reset_daily_metrics(&mut self) {
        info!("resetting daily risk metrics");
        self.metrics = RiskMetrics::default();
        self.size_multiplier = Decimal::ONE;
        self.dynamic_stop_pct = self.config.base_stop_loss_pct;
        self.peak_equity = self.config.account_balance;
        self.trading_allowed = true;
        self.emergency_stopped = false;
        self.breaker.reset();
    }

    /// Explicitly restore full position sizing without touching metrics.
    pub fn reset_size_multiplier(&mut self) {
        self.size_multiplier = Decimal::ONE;
    }

    // === Alerts ===

    /// Alerts raised within the given window, oldest first.
    pub fn recent_alerts(&self, within: chrono::Duration) -> Vec<RiskAlert> {
        let cutoff = Utc::now() - within;
        self.alerts
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn risk_status(&self) -> RiskStatus {
        RiskStatus {
            trading_allowed: self.is_trading_allowed(),
            emergency_stopped: self.emergency_stopped,
            breaker: self.breaker.snapshot(),
            size_multiplier: self.size_multiplier,
            stop_loss_pct: self.dynamic_stop_pct,
            metrics: self.metrics.clone(),
            alert_count: self.alerts.len(),
        }
    }

    fn prune_alerts(&mut self) {
        let cutoff = Utc::now() - self.config.alert_retention();
        while let Some(front) = self.alerts.front() {
            if front.timestamp < cutoff {
                self.alerts.pop_front();
            } else {
                break;
            }
        }
    }

    fn log_alert(&mut self, alert: RiskAlert) {
        self.alerts.push_back(alert);
    }

    /// Record a hard violation: alert, disable trading.
    fn halt(&mut self, alert: RiskAlert, raised: &mut Vec<RiskAlert>) {
        warn!(category = %alert.category, message = %alert.message, "hard risk violation");
        self.trading_allowed = false;
        raised.push(alert.clone());
        self.log_alert(alert);
    }

    /// Record a soft violation: alert, ratchet the size multiplier down.
    /// Reductions compound multiplicatively and persist until reset,
    /// floored at the configured minimum.
    fn soften(&mut self, alert: RiskAlert, raised: &mut Vec<RiskAlert>) {
        let next = (self.size_multiplier * self.config.soft_reduction)
            .max(self.config.multiplier_floor);
        self.size_multiplier = next;
        raised.push(alert.clone());
        self.log_alert(alert);
    }
}

/// Thread-shared risk manager handle.
pub type SharedRiskManager = Arc<RwLock<RiskManager>>;

/// Pre-trade policy adapter over a shared risk manager, plugged into the
/// order manager.
pub struct RiskGate {
    inner: SharedRiskManager,
}

impl RiskGate {
    pub fn new(inner: SharedRiskManager) -> Self {
        Self { inner }
    }
}

impl PreTradePolicy for RiskGate {
    fn pre_trade_check(&self, request: &OrderRequest) -> Result<(), RiskError> {
        self.inner.read().pre_trade_check(request)
    }
}

fn push_bounded(buffer: &mut VecDeque<Decimal>, value: Decimal, window: usize) {
    if buffer.len() == window {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

fn mean(buffer: &VecDeque<Decimal>) -> Decimal {
    if buffer.is_empty() {
        return Decimal::ZERO;
    }
    buffer.iter().copied().sum::<Decimal>() / Decimal::from(buffer.len() as u64)
}

/// Nearest-rank percentile over the buffer.
fn percentile(buffer: &VecDeque<Decimal>, pct: usize) -> Decimal {
    if buffer.is_empty() {
        return Decimal::ZERO;
    }
    let mut sorted: Vec<Decimal> = buffer.iter().copied().collect();
    sorted.sort();
    let rank = (pct * sorted.len()).div_ceil(100);
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_common::{LiquidityLevel, Side};
    use rust_decimal_macros::dec;

    fn config() -> RiskConfig {
        RiskConfig {
            max_daily_loss: dec!(500),
            account_balance: dec!(10000),
            max_position_size: dec!(100),
            max_position_notional: dec!(5000),
            max_consecutive_losses: 3,
            ..RiskConfig::default()
        }
    }

    fn snapshot(price: Decimal, volatility: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTC-USD".to_string(),
            price,
            volume: dec!(1000),
            volatility,
            bid: price - dec!(0.5),
            ask: price + dec!(0.5),
            liquidity: LiquidityLevel::Normal,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn soft_daily_loss_reduces_size_then_hard_stop() {
        let mut mgr = RiskManager::new(config());

        // 80% of the 500 limit: soft warning, size reduced.
        let assessment = mgr
            .check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(-400))
            .unwrap();
        assert!(assessment
            .alerts
            .iter()
            .any(|a| a.category == AlertCategory::DailyLoss));
        assert_eq!(assessment.size_multiplier, dec!(0.8));
        assert!(mgr.is_trading_allowed());

        // Full limit: hard stop.
        let err = mgr
            .check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(-500))
            .unwrap_err();
        assert_eq!(err.code(), "DAILY_LOSS_LIMIT");
        assert!(!mgr.is_trading_allowed());
    }

    #[test]
    fn trading_stays_disabled_until_reset() {
        let mut mgr = RiskManager::new(config());
        mgr.check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(-500))
            .unwrap_err();
        assert!(!mgr.is_trading_allowed());

        // Still disabled on a healthy follow-up check.
        let err = mgr.calculate_position_size(dec!(100), dec!(98)).unwrap_err();
        assert_eq!(err.code(), "TRADING_HALTED");

        mgr.reset_daily_metrics();
        assert!(mgr.is_trading_allowed());
        assert_eq!(mgr.size_multiplier(), Decimal::ONE);
    }

    #[test]
    fn position_size_hard_limit() {
        let mut mgr = RiskManager::new(config());
        let err = mgr
            .check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(150), dec!(0))
            .unwrap_err();
        assert_eq!(err.code(), "POSITION_LIMIT");
        assert!(!mgr.is_trading_allowed());
    }

    #[test]
    fn soft_reductions_compound_and_floor() {
        let mut mgr = RiskManager::new(config());
        for _ in 0..20 {
            let _ = mgr.check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(-400));
        }
        // 0.8^20 would be ~0.011; floored at 0.1.
        assert_eq!(mgr.size_multiplier(), dec!(0.1));
    }

    #[test]
    fn volatility_spike_trips_breaker() {
        let mut mgr = RiskManager::new(config());
        // Build a calm trailing history.
        for _ in 0..20 {
            mgr.check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(0))
                .unwrap();
        }
        // 5x the trailing average: hard trip.
        let err = mgr
            .check_risk(&snapshot(dec!(100), dec!(0.10)), dec!(0), dec!(0))
            .unwrap_err();
        assert_eq!(err.code(), "VOLATILITY_SPIKE");
        assert!(!mgr.is_trading_allowed());

        // Subsequent checks are halted by the breaker.
        let err = mgr
            .check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(0))
            .unwrap_err();
        assert_eq!(err.code(), "TRADING_HALTED");
    }

    #[test]
    fn mild_volatility_elevation_is_soft() {
        let mut mgr = RiskManager::new(config());
        for _ in 0..20 {
            mgr.check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(0))
                .unwrap();
        }
        // Above p95 but below the 2x hard multiplier.
        let assessment = mgr
            .check_risk(&snapshot(dec!(100), dec!(0.03)), dec!(0), dec!(0))
            .unwrap();
        assert!(assessment
            .alerts
            .iter()
            .any(|a| a.category == AlertCategory::Volatility));
        assert!(assessment.size_multiplier < Decimal::ONE);
        assert!(mgr.is_trading_allowed());
    }

    #[test]
    fn dynamic_stop_scales_with_volatility_and_clamps() {
        // Spike multiplier raised so the clamp is observable without the
        // hard volatility trip firing first.
        let mut mgr = RiskManager::new(RiskConfig {
            volatility_spike_mult: dec!(100),
            ..config()
        });
        for _ in 0..10 {
            mgr.check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(0))
                .unwrap();
        }
        let base = mgr.config().base_stop_loss_pct;

        // Enormous spike would scale far beyond 2x; clamp holds at 2x.
        let assessment = mgr
            .check_risk(&snapshot(dec!(100), dec!(0.2)), dec!(0), dec!(0))
            .unwrap();
        assert_eq!(assessment.stop_loss_pct, base * Decimal::TWO);

        // Collapsing volatility clamps at 0.5x.
        let mut calm = RiskManager::new(RiskConfig {
            volatility_spike_mult: dec!(100),
            ..config()
        });
        for _ in 0..10 {
            calm.check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(0))
                .unwrap();
        }
        let assessment = calm
            .check_risk(&snapshot(dec!(100), dec!(0.001)), dec!(0), dec!(0))
            .unwrap();
        assert_eq!(assessment.stop_loss_pct, base * dec!(0.5));
    }

    #[test]
    fn thin_liquidity_reduces_size() {
        let mut mgr = RiskManager::new(config());
        for _ in 0..10 {
            mgr.check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(0))
                .unwrap();
        }
        let mut thin = snapshot(dec!(100), dec!(0.02));
        thin.liquidity = LiquidityLevel::Low;
        thin.volume = dec!(100); // well under half of the ~1000 average
        let assessment = mgr.check_risk(&thin, dec!(0), dec!(0)).unwrap();
        assert!(assessment
            .alerts
            .iter()
            .any(|a| a.category == AlertCategory::Liquidity));
        assert!(assessment.size_multiplier < Decimal::ONE);
    }

    #[test]
    fn drawdown_hard_stop() {
        let mut mgr = RiskManager::new(RiskConfig {
            max_drawdown_pct: dec!(0.10),
            max_daily_loss: dec!(5000),
            account_balance: dec!(10000),
            ..RiskConfig::default()
        });
        // 15% below the starting balance.
        let err = mgr
            .check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(-1500))
            .unwrap_err();
        assert_eq!(err.code(), "DRAWDOWN_LIMIT");
        assert!(!mgr.is_trading_allowed());
    }

    #[test]
    fn consecutive_losses_hard_stop() {
        let mut mgr = RiskManager::new(config());
        for _ in 0..3 {
            mgr.update_trade_outcome(dec!(-10), false);
        }
        let err = mgr
            .check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(-30))
            .unwrap_err();
        assert_eq!(err.code(), "CONSECUTIVE_LOSSES");
    }

    #[test]
    fn winning_trade_resets_streaks() {
        let mut mgr = RiskManager::new(config());
        mgr.update_trade_outcome(dec!(-10), true);
        mgr.update_trade_outcome(dec!(-20), true);
        assert_eq!(mgr.metrics().current_consecutive_losses, 2);
        assert_eq!(mgr.metrics().consecutive_stops, 2);

        mgr.update_trade_outcome(dec!(50), false);
        assert_eq!(mgr.metrics().current_consecutive_losses, 0);
        assert_eq!(mgr.metrics().consecutive_stops, 0);
        assert_eq!(mgr.metrics().max_consecutive_losses, 2);
    }

    #[test]
    fn outcome_statistics() {
        let mut mgr = RiskManager::new(config());
        mgr.update_trade_outcome(dec!(100), false);
        mgr.update_trade_outcome(dec!(50), false);
        mgr.update_trade_outcome(dec!(-30), false);

        let m = mgr.metrics();
        assert_eq!(m.total_trades, 3);
        assert_eq!(m.winning_trades, 2);
        assert_eq!(m.avg_win_size, dec!(75));
        assert_eq!(m.avg_loss_size, dec!(30));
        assert_eq!(m.largest_win, dec!(100));
        assert_eq!(m.largest_loss, dec!(30));
        assert_eq!(m.win_rate.round_dp(4), dec!(0.6667));
        assert_eq!(m.profit_factor, dec!(5));
        assert_eq!(m.daily_pnl, dec!(120));
    }

    #[test]
    fn profit_factor_zero_guard() {
        let mut mgr = RiskManager::new(config());
        mgr.update_trade_outcome(dec!(100), false);
        // No losses yet: guarded to zero, not infinity.
        assert_eq!(mgr.metrics().profit_factor, Decimal::ZERO);
    }

    #[test]
    fn position_sizing_formula() {
        let mgr = RiskManager::new(config());
        // Budget = 500 * 0.02 = 10; distance = 2 => base 5; clamped to min 1.
        let size = mgr.calculate_position_size(dec!(100), dec!(98)).unwrap();
        assert_eq!(size, dec!(5));

        // Zero distance is an error.
        let err = mgr.calculate_position_size(dec!(100), dec!(100)).unwrap_err();
        assert_eq!(err.code(), "ZERO_RISK_DISTANCE");
    }

    #[test]
    fn position_sizing_respects_multiplier_and_clamp() {
        let mut mgr = RiskManager::new(config());
        // Ratchet the multiplier down via a soft daily-loss warning.
        mgr.check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(-400))
            .unwrap();
        // base 5 * 0.8 = 4.
        assert_eq!(mgr.calculate_position_size(dec!(100), dec!(98)).unwrap(), dec!(4));

        // Tiny distance blows past the cap; clamped to max_position_size.
        assert_eq!(
            mgr.calculate_position_size(dec!(100), dec!(99.99)).unwrap(),
            dec!(100)
        );
    }

    #[test]
    fn emergency_stop_blocks_until_reset() {
        let mut mgr = RiskManager::new(config());
        mgr.emergency_stop("manual");
        assert!(!mgr.is_trading_allowed());
        let err = mgr
            .check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(0))
            .unwrap_err();
        assert_eq!(err.code(), "TRADING_HALTED");

        mgr.reset_daily_metrics();
        assert!(mgr.is_trading_allowed());
    }

    #[test]
    fn pre_trade_gate_via_shared_handle() {
        let shared: SharedRiskManager = Arc::new(RwLock::new(RiskManager::new(config())));
        let gate = RiskGate::new(Arc::clone(&shared));

        let request = OrderRequest::limit("BTC-USD", Side::Buy, dec!(10), dec!(100));
        assert!(gate.pre_trade_check(&request).is_ok());

        // Oversized request is a policy violation.
        let request = OrderRequest::limit("BTC-USD", Side::Buy, dec!(500), dec!(100));
        let err = gate.pre_trade_check(&request).unwrap_err();
        assert_eq!(err.code(), "POSITION_LIMIT");

        shared.write().emergency_stop("halt");
        let request = OrderRequest::limit("BTC-USD", Side::Buy, dec!(10), dec!(100));
        let err = gate.pre_trade_check(&request).unwrap_err();
        assert_eq!(err.code(), "TRADING_HALTED");
    }

    #[test]
    fn alerts_are_age_pruned() {
        let mut mgr = RiskManager::new(RiskConfig {
            alert_retention_secs: 0,
            ..config()
        });
        mgr.check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(-400))
            .unwrap();
        assert_eq!(mgr.risk_status().alert_count, 1);

        // Next check prunes everything older than the zero-second window.
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.check_risk(&snapshot(dec!(100), dec!(0.02)), dec!(0), dec!(0))
            .unwrap();
        assert_eq!(mgr.recent_alerts(chrono::Duration::zero()).len(), 0);
    }

    #[test]
    fn percentile_nearest_rank() {
        let buffer: VecDeque<Decimal> =
            (1..=100).map(|i| Decimal::from(i as u64)).collect();
        assert_eq!(percentile(&buffer, 95), dec!(95));
        assert_eq!(percentile(&buffer, 100), dec!(100));
        let empty: VecDeque<Decimal> = VecDeque::new();
        assert_eq!(percentile(&empty, 95), Decimal::ZERO);
    }
}
