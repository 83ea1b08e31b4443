//! Risk management: continuous market-risk evaluation, pre-trade gating,
//! dynamic position sizing, and trade-outcome statistics.

mod manager;

pub use manager::{RiskAssessment, RiskGate, RiskManager, RiskStatus, SharedRiskManager};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Alert severity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// Which risk check raised the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    DailyLoss,
    PositionSize,
    Volatility,
    Liquidity,
    Drawdown,
    ConsecutiveLosses,
    CircuitBreaker,
    Emergency,
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertCategory::DailyLoss => write!(f, "daily_loss"),
            AlertCategory::PositionSize => write!(f, "position_size"),
            AlertCategory::Volatility => write!(f, "volatility"),
            AlertCategory::Liquidity => write!(f, "liquidity"),
            AlertCategory::Drawdown => write!(f, "drawdown"),
            AlertCategory::ConsecutiveLosses => write!(f, "consecutive_losses"),
            AlertCategory::CircuitBreaker => write!(f, "circuit_breaker"),
            AlertCategory::Emergency => write!(f, "emergency"),
        }
    }
}

/// What the caller should do about an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    Monitor,
    ReduceSize,
    StopTrading,
    EmergencyStop,
}

/// One entry in the append-only alert log. Pruned by age, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    pub level: AlertLevel,
    pub category: AlertCategory,
    pub message: String,
    /// 1 (informational) to 10 (halt everything).
    pub severity: u8,
    pub action: RiskAction,
    pub timestamp: DateTime<Utc>,
}

impl RiskAlert {
    pub fn warning(category: AlertCategory, message: impl Into<String>, severity: u8) -> Self {
        Self {
            level: AlertLevel::Warning,
            category,
            message: message.into(),
            severity,
            action: RiskAction::ReduceSize,
            timestamp: Utc::now(),
        }
    }

    pub fn critical(category: AlertCategory, message: impl Into<String>, severity: u8) -> Self {
        Self {
            level: AlertLevel::Critical,
            category,
            message: message.into(),
            severity,
            action: RiskAction::StopTrading,
            timestamp: Utc::now(),
        }
    }

    pub fn with_action(mut self, action: RiskAction) -> Self {
        self.action = action;
        self
    }
}

/// Session-scoped running aggregate of trade outcomes.
///
/// Mutated only through [`RiskManager::update_trade_outcome`]; reset exactly
/// at the session boundary by [`RiskManager::reset_daily_metrics`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub daily_pnl: Decimal,
    /// Largest peak-to-trough equity decline seen this session (fraction).
    pub max_drawdown: Decimal,
    pub current_drawdown: Decimal,
    /// Stop-outs since the last winning trade.
    pub consecutive_stops: u32,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub avg_win_size: Decimal,
    pub avg_loss_size: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    /// Winning trades / total trades.
    pub win_rate: Decimal,
    /// Gross profit / gross loss; 0 while either side is empty.
    pub profit_factor: Decimal,
    pub max_consecutive_losses: u32,
    pub current_consecutive_losses: u32,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
}

impl RiskMetrics {
    pub fn losing_trades(&self) -> u64 {
        self.total_trades - self.winning_trades
    }
}
