//! Engine configuration.
//!
//! Loads from a TOML file with environment variable overrides. Every
//! subsystem section validates itself; nonsense values fail at load time,
//! before any component is constructed.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Top-level configuration for the trading engine.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: LogLevel,

    /// Event processor parameters.
    pub events: EventProcessorConfig,

    /// Order manager parameters.
    pub orders: OrderManagerConfig,

    /// Risk manager parameters.
    pub risk: RiskConfig,
}

/// Logging level wrapper so the config file can say `log_level = "debug"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        Self("info".to_string())
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).context("Failed to parse TOML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("APEX_LOG_LEVEL") {
            self.log_level = LogLevel(level);
        }
        if let Ok(loss) = std::env::var("APEX_MAX_DAILY_LOSS") {
            if let Ok(value) = loss.parse::<Decimal>() {
                self.risk.max_daily_loss = value;
            }
        }
        if let Ok(value) = std::env::var("APEX_MAX_ORDER_VALUE") {
            if let Ok(value) = value.parse::<Decimal>() {
                self.orders.max_order_value = value;
            }
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.events.validate()?;
        self.orders.validate()?;
        self.risk.validate()?;
        Ok(())
    }
}

/// Event processor tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventProcessorConfig {
    /// Total queue capacity, split 10/30/50/10 across
    /// critical/high/normal/low.
    pub queue_capacity: usize,

    /// Maximum events popped from one priority queue per tick.
    pub batch_size: usize,

    /// Maximum number of registered handlers.
    pub max_handlers: usize,

    /// Whether events that fail every handler go to the dead-letter queue.
    pub dead_letter_enabled: bool,

    /// Dead-letter queue capacity (FIFO eviction beyond this).
    pub dead_letter_capacity: usize,

    /// Consecutive handler failures before its breaker opens.
    pub handler_error_threshold: u32,

    /// How long an open handler breaker blocks deliveries (ms).
    pub handler_recovery_ms: u64,
}

impl Default for EventProcessorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 2000,
            batch_size: 50,
            max_handlers: 64,
            dead_letter_enabled: true,
            dead_letter_capacity: 500,
            handler_error_threshold: 5,
            handler_recovery_ms: 30_000,
        }
    }
}

impl EventProcessorConfig {
    pub fn handler_recovery(&self) -> Duration {
        Duration::from_millis(self.handler_recovery_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity < 10 {
            bail!(
                "events.queue_capacity must be at least 10, got {}",
                self.queue_capacity
            );
        }
        if self.batch_size == 0 {
            bail!("events.batch_size must be positive");
        }
        if self.max_handlers == 0 {
            bail!("events.max_handlers must be positive");
        }
        if self.handler_error_threshold == 0 {
            bail!("events.handler_error_threshold must be positive");
        }
        Ok(())
    }
}

/// Order manager tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderManagerConfig {
    /// Minimum order quantity.
    pub min_quantity: Decimal,

    /// Maximum order notional (quantity x price).
    pub max_order_value: Decimal,

    /// Maximum simultaneously active orders.
    pub max_active_orders: usize,

    /// Whether risk policy runs before order admission.
    pub enable_pre_trade_checks: bool,

    /// Cancel orders that reach no terminal state within this window.
    pub auto_cancel_after_secs: Option<u64>,

    /// Retained terminal orders (FIFO eviction beyond this).
    pub history_capacity: usize,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            min_quantity: Decimal::ONE,
            max_order_value: Decimal::new(100_000, 0),
            max_active_orders: 200,
            enable_pre_trade_checks: true,
            auto_cancel_after_secs: Some(300),
            history_capacity: 1000,
        }
    }
}

impl OrderManagerConfig {
    fn validate(&self) -> Result<()> {
        if self.min_quantity <= Decimal::ZERO {
            bail!("orders.min_quantity must be positive, got {}", self.min_quantity);
        }
        if self.max_order_value <= Decimal::ZERO {
            bail!(
                "orders.max_order_value must be positive, got {}",
                self.max_order_value
            );
        }
        if self.max_active_orders == 0 {
            bail!("orders.max_active_orders must be positive");
        }
        if self.history_capacity == 0 {
            bail!("orders.history_capacity must be positive");
        }
        Ok(())
    }
}

/// Risk manager tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Session-opening account balance, the base for drawdown tracking.
    pub account_balance: Decimal,

    /// Hard daily loss limit (positive number of currency units).
    pub max_daily_loss: Decimal,

    /// Fraction of a hard limit at which soft warnings fire (0-1).
    pub soft_limit_ratio: Decimal,

    /// Multiplier applied to position sizing on each soft violation.
    pub soft_reduction: Decimal,

    /// Floor below which the size multiplier never drops.
    pub multiplier_floor: Decimal,

    /// Maximum absolute position size (units).
    pub max_position_size: Decimal,

    /// Maximum position notional before a soft warning (currency units).
    pub max_position_notional: Decimal,

    /// Base stop-loss distance as a fraction of entry price.
    pub base_stop_loss_pct: Decimal,

    /// Hard volatility circuit-breaker trip: current vs trailing mean.
    pub volatility_spike_mult: Decimal,

    /// Soft liquidity warning when volume falls below this fraction of the
    /// trailing average in a low-liquidity regime.
    pub thin_volume_ratio: Decimal,

    /// Hard stop when session drawdown exceeds this fraction of peak.
    pub max_drawdown_pct: Decimal,

    /// Hard stop after this many consecutive losing trades.
    pub max_consecutive_losses: u32,

    /// Fraction of the daily loss budget risked per trade when sizing.
    pub risk_per_trade: Decimal,

    /// How long the risk circuit breaker stays active once tripped.
    pub breaker_cooldown_secs: u64,

    /// How long risk alerts are retained before pruning (seconds).
    pub alert_retention_secs: u64,

    /// Rolling history window for price/volatility/volume samples.
    pub history_window: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            account_balance: Decimal::new(100_000, 0),
            max_daily_loss: Decimal::new(1000, 0),
            soft_limit_ratio: Decimal::new(8, 1),     // 0.8
            soft_reduction: Decimal::new(8, 1),       // 0.8
            multiplier_floor: Decimal::new(1, 1),     // 0.1
            max_position_size: Decimal::new(100, 0),
            max_position_notional: Decimal::new(50_000, 0),
            base_stop_loss_pct: Decimal::new(2, 2),   // 0.02
            volatility_spike_mult: Decimal::TWO,
            thin_volume_ratio: Decimal::new(5, 1),    // 0.5
            max_drawdown_pct: Decimal::new(15, 2),    // 0.15
            max_consecutive_losses: 5,
            risk_per_trade: Decimal::new(2, 2),       // 0.02
            breaker_cooldown_secs: 300,
            alert_retention_secs: 3600,
            history_window: 100,
        }
    }
}

impl RiskConfig {
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn alert_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.alert_retention_secs as i64)
    }

    /// Soft-warning threshold for the daily loss limit.
    pub fn soft_daily_loss(&self) -> Decimal {
        self.max_daily_loss * self.soft_limit_ratio
    }

    fn validate(&self) -> Result<()> {
        if self.account_balance <= Decimal::ZERO {
            bail!(
                "risk.account_balance must be positive, got {}",
                self.account_balance
            );
        }
        if self.max_daily_loss <= Decimal::ZERO {
            bail!("risk.max_daily_loss must be positive, got {}", self.max_daily_loss);
        }
        if self.soft_limit_ratio <= Decimal::ZERO || self.soft_limit_ratio >= Decimal::ONE {
            bail!(
                "risk.soft_limit_ratio must be in (0, 1), got {}",
                self.soft_limit_ratio
            );
        }
        if self.soft_reduction <= Decimal::ZERO || self.soft_reduction > Decimal::ONE {
            bail!(
                "risk.soft_reduction must be in (0, 1], got {}",
                self.soft_reduction
            );
        }
        if self.max_drawdown_pct <= Decimal::ZERO || self.max_drawdown_pct >= Decimal::ONE {
            bail!(
                "risk.max_drawdown_pct must be in (0, 1), got {}",
                self.max_drawdown_pct
            );
        }
        if self.base_stop_loss_pct <= Decimal::ZERO {
            bail!(
                "risk.base_stop_loss_pct must be positive, got {}",
                self.base_stop_loss_pct
            );
        }
        if self.history_window == 0 {
            bail!("risk.history_window must be positive");
        }
        Ok(())
    }
}
