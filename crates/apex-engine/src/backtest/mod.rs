//! Deterministic historical replay through the same position and stop-loss
//! machinery as live trading, producing a performance report.

mod engine;
mod position;
mod stats;
pub mod strategies;

pub use engine::{BacktestControl, BacktestEngine, BacktestProgress};
pub use position::{BacktestPosition, BacktestTrade, ExitReason};
pub use stats::{BacktestReport, DrawdownPoint, EquityPoint};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use apex_common::MarketSnapshot;

use crate::error::BacktestError;

/// Lifecycle of a backtest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktestState {
    Uninitialized,
    Initialized,
    Running,
    Paused,
    Completed,
    Stopped,
}

impl BacktestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BacktestState::Uninitialized => "uninitialized",
            BacktestState::Initialized => "initialized",
            BacktestState::Running => "running",
            BacktestState::Paused => "paused",
            BacktestState::Completed => "completed",
            BacktestState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for BacktestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_capital: Decimal,
    /// Commission per leg, fraction of notional.
    pub commission_rate: Decimal,
    /// Adverse slippage per leg, fraction of price.
    pub slippage_rate: Decimal,
    /// Stop-loss distance, fraction of entry price.
    pub stop_loss_pct: Decimal,
    /// Annualized risk-free rate for the ratio denominators.
    pub risk_free_rate: f64,
    /// Fixed-fractional sizing: fraction of current balance risked per trade.
    pub risk_fraction: Decimal,
    /// Reject the run when too many data points fail validation.
    pub validate_data: bool,
    /// Cooperative yield cadence in bars.
    pub yield_every_bars: usize,
}

impl BacktestConfig {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        symbol: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        initial_capital: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            symbol: symbol.into(),
            start,
            end,
            initial_capital,
            commission_rate: Decimal::ZERO,
            slippage_rate: Decimal::ZERO,
            stop_loss_pct: Decimal::new(2, 2), // 0.02
            risk_free_rate: 0.0,
            risk_fraction: Decimal::new(2, 2), // 0.02
            validate_data: true,
            yield_every_bars: 256,
        }
    }

    pub fn with_costs(mut self, commission_rate: Decimal, slippage_rate: Decimal) -> Self {
        self.commission_rate = commission_rate;
        self.slippage_rate = slippage_rate;
        self
    }

    pub fn with_stop_loss(mut self, stop_loss_pct: Decimal) -> Self {
        self.stop_loss_pct = stop_loss_pct;
        self
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    /// Fail-fast validation, before any simulation state mutates.
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.id.is_empty() || self.name.is_empty() || self.symbol.is_empty() {
            return Err(BacktestError::Config {
                detail: "id, name and symbol are required".to_string(),
            });
        }
        if self.start >= self.end {
            return Err(BacktestError::Config {
                detail: format!("start {} must precede end {}", self.start, self.end),
            });
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(BacktestError::Config {
                detail: format!("initial capital must be positive, got {}", self.initial_capital),
            });
        }
        if self.commission_rate < Decimal::ZERO || self.slippage_rate < Decimal::ZERO {
            return Err(BacktestError::Config {
                detail: "commission and slippage rates must be non-negative".to_string(),
            });
        }
        if self.stop_loss_pct <= Decimal::ZERO {
            return Err(BacktestError::Config {
                detail: format!("stop loss pct must be positive, got {}", self.stop_loss_pct),
            });
        }
        Ok(())
    }
}

/// What the strategy wants the simulator to do after a bar.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategySignal {
    /// Open a long position; quantity defaults to fixed-fractional sizing.
    EnterLong { quantity: Option<Decimal> },
    /// Open a short position; quantity defaults to fixed-fractional sizing.
    EnterShort { quantity: Option<Decimal> },
    /// Close the open position.
    Exit,
}

impl StrategySignal {
    pub fn enter_long() -> Self {
        StrategySignal::EnterLong { quantity: None }
    }

    pub fn enter_short() -> Self {
        StrategySignal::EnterShort { quantity: None }
    }
}

/// Injected strategy callback. Signal generation is external to the core;
/// per-bar failures are contained and logged, never aborting the run.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn on_bar(&mut self, bar: &MarketSnapshot) -> anyhow::Result<Vec<StrategySignal>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn base_config() -> BacktestConfig {
        BacktestConfig::new(
            "bt-1",
            "test run",
            "BTC-USD",
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            dec!(10000),
        )
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn start_after_end_rejected() {
        let mut config = base_config();
        config.end = config.start;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn non_positive_capital_rejected() {
        let mut config = base_config();
        config.initial_capital = dec!(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_costs_rejected() {
        let config = base_config().with_costs(dec!(-0.001), dec!(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_identity_rejected() {
        let mut config = base_config();
        config.symbol = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn state_display() {
        assert_eq!(BacktestState::Running.to_string(), "running");
        assert_eq!(BacktestState::Uninitialized.to_string(), "uninitialized");
    }
}
