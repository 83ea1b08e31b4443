//! Simulation-local position and trade records.
//!
//! These mirror live order/fill semantics but carry the extra analytics a
//! replay wants: realized P&L, holding period, and maximum favorable /
//! adverse excursion. They never outlive a single backtest run.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use apex_common::Side;

/// Why a simulated position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Strategy emitted an exit signal.
    Signal,
    /// Per-position stop-loss enforcement.
    StopLoss,
    /// Forced liquidation at end of data.
    BacktestEnd,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Signal => write!(f, "SIGNAL"),
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::BacktestEnd => write!(f, "BACKTEST_END"),
        }
    }
}

/// An open simulated position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestPosition {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    /// Effective entry price, slippage included.
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub stop_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Best unrealized P&L seen while open.
    pub max_favorable_excursion: Decimal,
    /// Worst unrealized P&L seen while open.
    pub max_adverse_excursion: Decimal,
}

impl BacktestPosition {
    pub fn open(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
        entry_time: DateTime<Utc>,
        stop_loss_pct: Decimal,
    ) -> Self {
        let stop_price = match side {
            Side::Buy => entry_price * (Decimal::ONE - stop_loss_pct),
            Side::Sell => entry_price * (Decimal::ONE + stop_loss_pct),
        };
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            entry_time,
            stop_price,
            unrealized_pnl: Decimal::ZERO,
            max_favorable_excursion: Decimal::ZERO,
            max_adverse_excursion: Decimal::ZERO,
        }
    }

    /// Mark the position to a new price, updating unrealized P&L and the
    /// excursion extremes.
    pub fn update_mark(&mut self, price: Decimal) {
        self.unrealized_pnl = (price - self.entry_price) * self.quantity * self.side.sign();
        if self.unrealized_pnl > self.max_favorable_excursion {
            self.max_favorable_excursion = self.unrealized_pnl;
        }
        if self.unrealized_pnl < self.max_adverse_excursion {
            self.max_adverse_excursion = self.unrealized_pnl;
        }
    }

    /// Whether the bar price breaches the stop.
    pub fn stop_hit(&self, price: Decimal) -> bool {
        match self.side {
            Side::Buy => price <= self.stop_price,
            Side::Sell => price >= self.stop_price,
        }
    }

    /// Realized P&L if closed at the given effective exit price.
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        (exit_price - self.entry_price) * self.quantity * self.side.sign()
    }
}

/// A completed simulated round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub realized_pnl: Decimal,
    /// Entry plus exit commission.
    pub commission: Decimal,
    /// Cost of slippage across both legs.
    pub slippage_cost: Decimal,
    pub exit_reason: ExitReason,
    pub max_favorable_excursion: Decimal,
    pub max_adverse_excursion: Decimal,
}

impl BacktestTrade {
    pub fn holding_secs(&self) -> i64 {
        (self.exit_time - self.entry_time).num_seconds()
    }

    pub fn is_winner(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }
}
