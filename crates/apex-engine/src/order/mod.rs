//! Order model: the state machine, fills, and request types.
//!
//! Orders are exclusively owned by the [`OrderManager`]; everything here is
//! mutated only through its state-transition methods. A terminal status is
//! one-way: the first terminal transition observed wins and later attempts
//! are rejected.

mod manager;
mod venue;

pub use manager::{OrderManager, OrderMetricsSnapshot, PreTradePolicy};
pub use venue::{ExecutionVenue, SimulatedVenue, SimulatedVenueConfig, VenueAck, VenueError};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use apex_common::{Liquidity, OrderType, Side, TimeInForce};

use crate::error::OrderError;

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Constructed and admitted, not yet sent to the venue.
    Pending,
    /// Sent to the venue, awaiting acknowledgment.
    Submitted,
    /// Acknowledged and working at the venue.
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    /// Temporarily halted at the venue; may resume.
    Suspended,
}

impl OrderStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Legal transitions of the order state machine.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if self.is_terminal() {
            return false;
        }
        match self {
            Pending => matches!(next, Submitted | Rejected | Canceled),
            Submitted => matches!(next, Accepted | Rejected | Canceled | Expired),
            Accepted => matches!(
                next,
                PartiallyFilled | Filled | Canceled | Rejected | Expired | Suspended
            ),
            PartiallyFilled => {
                matches!(next, PartiallyFilled | Filled | Canceled | Expired | Suspended)
            }
            Suspended => matches!(next, Accepted | Canceled | Expired),
            Filled | Canceled | Rejected | Expired => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Submitted => write!(f, "submitted"),
            OrderStatus::Accepted => write!(f, "accepted"),
            OrderStatus::PartiallyFilled => write!(f, "partially_filled"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Canceled => write!(f, "canceled"),
            OrderStatus::Rejected => write!(f, "rejected"),
            OrderStatus::Expired => write!(f, "expired"),
            OrderStatus::Suspended => write!(f, "suspended"),
        }
    }
}

/// Why an order was canceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserRequested,
    Timeout,
    EmergencyStop,
    Other(String),
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::UserRequested => write!(f, "USER_REQUESTED"),
            CancelReason::Timeout => write!(f, "TIMEOUT"),
            CancelReason::EmergencyStop => write!(f, "EMERGENCY_STOP"),
            CancelReason::Other(reason) => write!(f, "{}", reason),
        }
    }
}

/// Immutable fill record. Appended, never mutated or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub id: Uuid,
    pub order_id: Uuid,
    pub execution_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
    pub commission: Decimal,
    pub liquidity: Liquidity,
}

/// What a caller wants to trade; the manager decides admission.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    /// Reference price for slippage accounting on market orders.
    pub reference_price: Option<Decimal>,
    pub client_order_id: Option<String>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::default(),
            quantity,
            price: None,
            stop_price: None,
            reference_price: None,
            client_order_id: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn limit(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn stop(symbol: impl Into<String>, side: Side, quantity: Decimal, stop_price: Decimal) -> Self {
        Self {
            order_type: OrderType::Stop,
            stop_price: Some(stop_price),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn stop_limit(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        stop_price: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::StopLimit,
            stop_price: Some(stop_price),
            price: Some(price),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    pub fn with_reference_price(mut self, price: Decimal) -> Self {
        self.reference_price = Some(price);
        self
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Price the notional check uses: the limit price, falling back to the
    /// reference price for market orders.
    pub fn pricing_basis(&self) -> Option<Decimal> {
        self.price.or(self.reference_price)
    }

    /// Notional value, when a pricing basis exists.
    pub fn notional(&self) -> Option<Decimal> {
        self.pricing_basis().map(|p| p * self.quantity)
    }
}

/// Requested changes to a working order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderChanges {
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

impl OrderChanges {
    pub fn quantity(quantity: Decimal) -> Self {
        Self {
            quantity: Some(quantity),
            ..Self::default()
        }
    }

    pub fn price(price: Decimal) -> Self {
        Self {
            price: Some(price),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.quantity.is_none() && self.price.is_none() && self.stop_price.is_none()
    }
}

/// A tracked order. Lives in the manager's arena; "active" and "history"
/// are index membership on top of it, never a move between collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    /// Volume-weighted average across fills; zero until the first fill.
    pub average_fill_price: Decimal,
    pub fills: Vec<OrderFill>,
    pub reference_price: Option<Decimal>,
    /// |avg fill - reference| / reference, market orders only.
    pub slippage: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Submit-to-terminal latency in milliseconds.
    pub latency_ms: Option<i64>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl Order {
    pub(crate) fn from_request(request: OrderRequest) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            client_order_id: request
                .client_order_id
                .unwrap_or_else(|| format!("apex-{}", id.simple())),
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            time_in_force: request.time_in_force,
            quantity: request.quantity,
            price: request.price,
            stop_price: request.stop_price,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            remaining_quantity: request.quantity,
            average_fill_price: Decimal::ZERO,
            fills: Vec::new(),
            reference_price: request.reference_price,
            slippage: None,
            created_at: Utc::now(),
            submitted_at: None,
            completed_at: None,
            latency_ms: None,
            tags: request.tags,
            metadata: request.metadata,
        }
    }

    /// Attempt a status transition, enforcing the state machine.
    pub(crate) fn transition(
        &mut self,
        next: OrderStatus,
        operation: &'static str,
    ) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                id: self.id,
                status: self.status,
                operation,
            });
        }
        self.status = next;
        if next.is_terminal() {
            let now = Utc::now();
            self.completed_at = Some(now);
            if let Some(submitted) = self.submitted_at {
                self.latency_ms = Some((now - submitted).num_milliseconds());
            }
        }
        Ok(())
    }

    /// Append a fill and recompute quantities, VWAP and slippage.
    pub(crate) fn apply_fill(&mut self, fill: OrderFill) {
        let prior_notional = self.average_fill_price * self.filled_quantity;
        self.filled_quantity += fill.quantity;
        self.remaining_quantity = (self.quantity - self.filled_quantity).max(Decimal::ZERO);
        if self.filled_quantity > Decimal::ZERO {
            self.average_fill_price =
                (prior_notional + fill.price * fill.quantity) / self.filled_quantity;
        }
        if self.order_type == OrderType::Market {
            if let Some(reference) = self.reference_price {
                if reference > Decimal::ZERO {
                    self.slippage =
                        Some((self.average_fill_price - reference).abs() / reference);
                }
            }
        }
        self.fills.push(fill);
    }

    pub fn is_fully_filled(&self) -> bool {
        self.remaining_quantity == Decimal::ZERO && self.filled_quantity == self.quantity
    }

    /// Total commission across fills.
    pub fn total_commission(&self) -> Decimal {
        self.fills.iter().map(|f| f.commission).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filled_fill(order: &Order, quantity: Decimal, price: Decimal) -> OrderFill {
        OrderFill {
            id: Uuid::new_v4(),
            order_id: order.id,
            execution_id: format!("ex-{}", order.fills.len() + 1),
            price,
            quantity,
            timestamp: Utc::now(),
            commission: Decimal::ZERO,
            liquidity: Liquidity::Taker,
        }
    }

    #[test]
    fn status_terminality() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(!OrderStatus::Suspended.is_terminal());
    }

    #[test]
    fn terminal_transitions_are_one_way() {
        let request = OrderRequest::market("BTC-USD", Side::Buy, dec!(10));
        let mut order = Order::from_request(request);
        order.status = OrderStatus::Filled;
        let err = order
            .transition(OrderStatus::Canceled, "cancel")
            .unwrap_err();
        assert_eq!(err.code(), "STATE_CONFLICT");
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn pending_to_accepted_path() {
        let mut order = Order::from_request(OrderRequest::market("BTC-USD", Side::Buy, dec!(10)));
        order.transition(OrderStatus::Submitted, "submit").unwrap();
        order.transition(OrderStatus::Accepted, "submit").unwrap();
        assert_eq!(order.status, OrderStatus::Accepted);
    }

    #[test]
    fn fill_accounting_vwap() {
        let mut order = Order::from_request(OrderRequest::limit(
            "BTC-USD",
            Side::Buy,
            dec!(10),
            dec!(100),
        ));
        let f1 = filled_fill(&order, dec!(4), dec!(100));
        order.apply_fill(f1);
        assert_eq!(order.filled_quantity, dec!(4));
        assert_eq!(order.remaining_quantity, dec!(6));
        assert_eq!(order.average_fill_price, dec!(100));

        let f2 = filled_fill(&order, dec!(6), dec!(101));
        order.apply_fill(f2);
        assert_eq!(order.filled_quantity, dec!(10));
        assert_eq!(order.remaining_quantity, dec!(0));
        // (4*100 + 6*101) / 10 = 100.6
        assert_eq!(order.average_fill_price, dec!(100.6));
        assert!(order.is_fully_filled());
        // Limit order: no slippage accounting.
        assert!(order.slippage.is_none());
    }

    #[test]
    fn invariant_filled_plus_remaining_equals_quantity() {
        let mut order = Order::from_request(OrderRequest::market("ETH-USD", Side::Sell, dec!(7)));
        for quantity in [dec!(2), dec!(1), dec!(4)] {
            let fill = filled_fill(&order, quantity, dec!(50));
            order.apply_fill(fill);
            assert_eq!(order.filled_quantity + order.remaining_quantity, order.quantity);
        }
    }

    #[test]
    fn market_order_slippage() {
        let mut order = Order::from_request(
            OrderRequest::market("BTC-USD", Side::Buy, dec!(10)).with_reference_price(dec!(10.00)),
        );
        let fill = filled_fill(&order, dec!(10), dec!(10.05));
        order.apply_fill(fill);
        assert_eq!(order.slippage, Some(dec!(0.005)));
    }

    #[test]
    fn request_notional() {
        let request = OrderRequest::limit("BTC-USD", Side::Buy, dec!(2000), dec!(10));
        assert_eq!(request.notional(), Some(dec!(20000)));

        let request = OrderRequest::market("BTC-USD", Side::Buy, dec!(5));
        assert_eq!(request.notional(), None);

        let request =
            OrderRequest::market("BTC-USD", Side::Buy, dec!(5)).with_reference_price(dec!(10));
        assert_eq!(request.notional(), Some(dec!(50)));
    }

    #[test]
    fn cancel_reason_display() {
        assert_eq!(CancelReason::Timeout.to_string(), "TIMEOUT");
        assert_eq!(CancelReason::EmergencyStop.to_string(), "EMERGENCY_STOP");
    }
}
