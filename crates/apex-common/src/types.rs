//! Core market and execution types shared across the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Sign applied to P&L math: +1 for long exposure, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type accepted by the order manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    /// Whether this order type requires a limit price.
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }

    /// Whether this order type requires a stop trigger price.
    pub fn requires_stop_price(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopLimit)
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
            OrderType::Stop => write!(f, "stop"),
            OrderType::StopLimit => write!(f, "stop_limit"),
        }
    }
}

/// Time-in-force for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good 'til canceled.
    #[default]
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
    /// Good for the trading day.
    Day,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Fok => write!(f, "FOK"),
            TimeInForce::Day => write!(f, "DAY"),
        }
    }
}

/// Which side of the book a fill took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    /// Resting order that provided liquidity.
    Maker,
    /// Aggressive order that removed liquidity.
    Taker,
}

/// Coarse liquidity regime reported by the market-data feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityLevel {
    High,
    #[default]
    Normal,
    Low,
}

impl LiquidityLevel {
    pub fn is_thin(&self) -> bool {
        matches!(self, LiquidityLevel::Low)
    }
}

/// A single market-data snapshot pushed in by the feed collaborator.
///
/// The engine consumes these both as `market_data` events and as input to
/// continuous risk evaluation. Volatility is whatever measure the feed
/// computes (e.g. rolling stdev of returns); the risk manager only compares
/// it against its own trailing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub volatility: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub liquidity: LiquidityLevel,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Structural sanity check used by the backtest data-quality gate.
    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty()
            && self.price > Decimal::ZERO
            && self.volume >= Decimal::ZERO
            && self.bid <= self.ask
    }
}

/// One print from the time-and-sales tape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapeTrade {
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub aggressor: Side,
    pub timestamp: DateTime<Utc>,
}

/// Venue-reported status of an execution report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Order acknowledged by the venue, resting.
    Acknowledged,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl ExecutionStatus {
    /// Whether this report carries fill quantity/price to account for.
    pub fn is_fill(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::PartiallyFilled | ExecutionStatus::Filled
        )
    }
}

/// Inbound execution report from the venue adapter.
///
/// Decoded once at the adapter boundary; the core only ever sees this
/// strongly-typed form. Late or duplicate reports are expected and must
/// not crash processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Engine-side order id the report refers to.
    pub order_id: Uuid,
    /// Venue-assigned execution id (unique per fill).
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Quantity covered by this report (fill quantity for fill reports).
    pub quantity: Decimal,
    /// Execution price for fill reports.
    pub price: Decimal,
    pub commission: Decimal,
    pub liquidity: Liquidity,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionReport {
    /// Build a full-fill report.
    pub fn filled(order_id: Uuid, execution_id: impl Into<String>, quantity: Decimal, price: Decimal) -> Self {
        Self {
            order_id,
            execution_id: execution_id.into(),
            status: ExecutionStatus::Filled,
            quantity,
            price,
            commission: Decimal::ZERO,
            liquidity: Liquidity::Taker,
            timestamp: Utc::now(),
        }
    }

    /// Build a partial-fill report.
    pub fn partial(order_id: Uuid, execution_id: impl Into<String>, quantity: Decimal, price: Decimal) -> Self {
        Self {
            status: ExecutionStatus::PartiallyFilled,
            ..Self::filled(order_id, execution_id, quantity, price)
        }
    }

    pub fn with_commission(mut self, commission: Decimal) -> Self {
        self.commission = commission;
        self
    }

    pub fn with_liquidity(mut self, liquidity: Liquidity) -> Self {
        self.liquidity = liquidity;
        self
    }
}
