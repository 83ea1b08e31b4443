//! Typed errors for the trading core.
//!
//! Every rejection carries the offending value alongside the limit that was
//! breached, so callers can explain the refusal without retrying blindly.
//! Each error exposes a short machine-readable `code()` for the API layer.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::order::OrderStatus;

/// Errors surfaced by the event processor.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("handler registry full: {count} handlers registered, max {max}")]
    HandlerLimitReached { count: usize, max: usize },

    #[error("handler '{id}' is already registered")]
    DuplicateHandler { id: String },

    #[error("unknown handler '{id}'")]
    UnknownHandler { id: String },
}

impl EventError {
    pub fn code(&self) -> &'static str {
        match self {
            EventError::HandlerLimitReached { .. } => "HANDLER_LIMIT",
            EventError::DuplicateHandler { .. } => "DUPLICATE_HANDLER",
            EventError::UnknownHandler { .. } => "UNKNOWN_HANDLER",
        }
    }
}

/// Errors surfaced by the order manager.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order manager is not active")]
    Inactive,

    #[error("validation failed: {detail}")]
    Validation { detail: String },

    #[error("order notional {notional} exceeds max order value {max}")]
    NotionalLimit { notional: Decimal, max: Decimal },

    #[error("active order limit reached: {count} of {max}")]
    ActiveOrderLimit { count: usize, max: usize },

    #[error("pre-trade risk check failed: {0}")]
    RiskRejected(#[from] RiskError),

    #[error("unknown order {id}")]
    UnknownOrder { id: Uuid },

    #[error("order {id} is {status}; {operation} is not allowed")]
    InvalidTransition {
        id: Uuid,
        status: OrderStatus,
        operation: &'static str,
    },

    #[error("venue error during {operation}: {message}")]
    Venue {
        operation: &'static str,
        message: String,
    },
}

impl OrderError {
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::Inactive => "INACTIVE",
            OrderError::Validation { .. } => "VALIDATION_ERROR",
            OrderError::NotionalLimit { .. } => "VALIDATION_ERROR",
            OrderError::ActiveOrderLimit { .. } => "POLICY_VIOLATION",
            OrderError::RiskRejected(e) => e.code(),
            OrderError::UnknownOrder { .. } => "UNKNOWN_ORDER",
            OrderError::InvalidTransition { .. } => "STATE_CONFLICT",
            OrderError::Venue { .. } => "VENUE_ERROR",
        }
    }
}

/// Errors surfaced by the risk manager. All are policy violations: the
/// caller asked for something the current risk posture forbids.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("trading halted: {reason}")]
    TradingHalted { reason: String },

    #[error("daily loss limit breached: {pnl} against limit {limit}")]
    DailyLossLimit { pnl: Decimal, limit: Decimal },

    #[error("position size {position} exceeds max {max}")]
    PositionLimit { position: Decimal, max: Decimal },

    #[error("volatility spike: current {current} vs trailing average {average}")]
    VolatilitySpike { current: Decimal, average: Decimal },

    #[error("drawdown {drawdown_pct}% breached max {max_pct}%")]
    DrawdownLimit {
        drawdown_pct: Decimal,
        max_pct: Decimal,
    },

    #[error("{count} consecutive losses reached limit {max}")]
    ConsecutiveLosses { count: u32, max: u32 },

    #[error("risk distance between entry {entry} and stop {stop} is zero")]
    ZeroRiskDistance { entry: Decimal, stop: Decimal },
}

impl RiskError {
    pub fn code(&self) -> &'static str {
        match self {
            RiskError::TradingHalted { .. } => "TRADING_HALTED",
            RiskError::DailyLossLimit { .. } => "DAILY_LOSS_LIMIT",
            RiskError::PositionLimit { .. } => "POSITION_LIMIT",
            RiskError::VolatilitySpike { .. } => "VOLATILITY_SPIKE",
            RiskError::DrawdownLimit { .. } => "DRAWDOWN_LIMIT",
            RiskError::ConsecutiveLosses { .. } => "CONSECUTIVE_LOSSES",
            RiskError::ZeroRiskDistance { .. } => "ZERO_RISK_DISTANCE",
        }
    }
}

/// Errors surfaced by the backtest engine. Configuration and data-quality
/// violations fail fast before any simulation state mutates.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("invalid config: {detail}")]
    Config { detail: String },

    #[error("engine is {state}; {operation} is not allowed")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    #[error("data quality gate failed: {invalid} of {total} points invalid ({ratio_pct:.1}% > 10%)")]
    DataQuality {
        invalid: usize,
        total: usize,
        ratio_pct: f64,
    },

    #[error("no data points inside the configured window")]
    EmptyWindow,
}

impl BacktestError {
    pub fn code(&self) -> &'static str {
        match self {
            BacktestError::Config { .. } => "VALIDATION_ERROR",
            BacktestError::InvalidState { .. } => "STATE_CONFLICT",
            BacktestError::DataQuality { .. } => "DATA_QUALITY",
            BacktestError::EmptyWindow => "EMPTY_WINDOW",
        }
    }
}
