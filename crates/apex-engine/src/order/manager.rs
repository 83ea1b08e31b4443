//! Order lifecycle management.
//!
//! The manager owns the authoritative order arena. Every order ever
//! admitted lives in one map keyed by id; "active" and "history" are
//! secondary id indexes driven by status, so a terminal transition retags
//! the record instead of moving it between collections.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use apex_common::{ExecutionReport, ExecutionStatus};

use crate::config::OrderManagerConfig;
use crate::error::{OrderError, RiskError};
use crate::scheduler::{TaskId, TaskScheduler};

use super::{
    CancelReason, ExecutionVenue, Order, OrderChanges, OrderFill, OrderRequest, OrderStatus,
};

/// Pre-trade risk gate consulted before order admission.
///
/// Implemented by the risk manager; the order manager only knows the
/// contract, keeping the dependency one-directional at the call site.
pub trait PreTradePolicy: Send + Sync {
    fn pre_trade_check(&self, request: &OrderRequest) -> Result<(), RiskError>;
}

/// Point-in-time order manager metrics.
#[derive(Debug, Clone, Serialize)]
pub struct OrderMetricsSnapshot {
    pub submitted: u64,
    pub filled: u64,
    pub canceled: u64,
    pub rejected: u64,
    pub expired: u64,
    pub active_count: usize,
    /// Filled / submitted.
    pub fill_rate: f64,
    /// Average submit-to-terminal latency over filled orders (ms).
    pub avg_latency_ms: f64,
    /// Average slippage over market orders that reported one.
    pub avg_slippage: Option<Decimal>,
    pub total_commission: Decimal,
}

#[derive(Debug, Default)]
struct OrderCounters {
    submitted: u64,
    filled: u64,
    canceled: u64,
    rejected: u64,
    expired: u64,
    latency_total_ms: i64,
    latency_count: u64,
    slippage_total: Decimal,
    slippage_count: u64,
    total_commission: Decimal,
}

/// Owns order state and the exchange interaction contract.
pub struct OrderManager {
    config: OrderManagerConfig,
    venue: Arc<dyn ExecutionVenue>,
    policy: Option<Arc<dyn PreTradePolicy>>,
    /// Append-only arena of every tracked order, keyed by id.
    orders: HashMap<Uuid, Order>,
    /// Ids of orders in a non-terminal status.
    active: HashSet<Uuid>,
    /// Ids of terminal orders, oldest first, bounded by history_capacity.
    history: VecDeque<Uuid>,
    /// Pending auto-cancel deadlines; revoked on early terminal transition.
    timeouts: TaskScheduler<Uuid>,
    timeout_ids: HashMap<Uuid, TaskId>,
    counters: OrderCounters,
    active_flag: bool,
}

impl OrderManager {
    pub fn new(config: OrderManagerConfig, venue: Arc<dyn ExecutionVenue>) -> Self {
        Self {
            config,
            venue,
            policy: None,
            orders: HashMap::new(),
            active: HashSet::new(),
            history: VecDeque::new(),
            timeouts: TaskScheduler::new(),
            timeout_ids: HashMap::new(),
            counters: OrderCounters::default(),
            active_flag: true,
        }
    }

    /// Attach the pre-trade risk gate.
    pub fn with_policy(mut self, policy: Arc<dyn PreTradePolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn is_active(&self) -> bool {
        self.active_flag
    }

    // === Submission ===

    /// Validate, admit, and submit an order to the venue.
    ///
    /// On success the order has been acknowledged (`accepted`). Failures
    /// surface as typed errors and increment the rejection counter; a
    /// request is never silently dropped.
    pub async fn submit_order(&mut self, request: OrderRequest) -> Result<Order, OrderError> {
        if !self.active_flag {
            return Err(OrderError::Inactive);
        }
        if let Err(err) = self.validate(&request) {
            self.counters.rejected += 1;
            return Err(err);
        }
        if self.config.enable_pre_trade_checks {
            if let Some(policy) = &self.policy {
                if let Err(err) = policy.pre_trade_check(&request) {
                    self.counters.rejected += 1;
                    return Err(err.into());
                }
            }
        }

        let mut order = Order::from_request(request);
        self.counters.submitted += 1;

        match self.venue.submit(&order).await {
            Ok(ack) => {
                order.submitted_at = Some(Utc::now());
                order.transition(OrderStatus::Submitted, "submit")?;
                order.transition(OrderStatus::Accepted, "submit")?;
                order
                    .metadata
                    .insert("venue_order_id".to_string(), ack.venue_order_id);
            }
            Err(venue_err) => {
                order.transition(OrderStatus::Rejected, "submit")?;
                self.counters.rejected += 1;
                let id = order.id;
                self.orders.insert(id, order);
                self.retire(id);
                return Err(OrderError::Venue {
                    operation: "submit",
                    message: venue_err.to_string(),
                });
            }
        }

        let id = order.id;
        info!(order_id = %id, symbol = %order.symbol, side = %order.side, quantity = %order.quantity, "order accepted");
        self.orders.insert(id, order.clone());
        self.active.insert(id);

        if let Some(secs) = self.config.auto_cancel_after_secs {
            let task = self
                .timeouts
                .schedule_in(Duration::seconds(secs as i64), id);
            self.timeout_ids.insert(id, task);
        }
        Ok(order)
    }

    fn validate(&self, request: &OrderRequest) -> Result<(), OrderError> {
        if request.symbol.is_empty() {
            return Err(OrderError::Validation {
                detail: "symbol is required".to_string(),
            });
        }
        if request.quantity < self.config.min_quantity {
            return Err(OrderError::Validation {
                detail: format!(
                    "quantity {} below minimum {}",
                    request.quantity, self.config.min_quantity
                ),
            });
        }
        if request.order_type.requires_price() {
            match request.price {
                Some(price) if price > Decimal::ZERO => {}
                _ => {
                    return Err(OrderError::Validation {
                        detail: format!("{} orders require a positive price", request.order_type),
                    })
                }
            }
        }
        if request.order_type.requires_stop_price() {
            match request.stop_price {
                Some(stop) if stop > Decimal::ZERO => {}
                _ => {
                    return Err(OrderError::Validation {
                        detail: format!(
                            "{} orders require a positive stop price",
                            request.order_type
                        ),
                    })
                }
            }
        }
        if let Some(notional) = request.notional() {
            if notional > self.config.max_order_value {
                return Err(OrderError::NotionalLimit {
                    notional,
                    max: self.config.max_order_value,
                });
            }
        }
        if self.active.len() >= self.config.max_active_orders {
            return Err(OrderError::ActiveOrderLimit {
                count: self.active.len(),
                max: self.config.max_active_orders,
            });
        }
        Ok(())
    }

    // === Cancellation / modification ===

    /// Cancel a working order. Illegal once the order is terminal: the
    /// first terminal transition wins, so a cancel racing a fill is
    /// rejected with a state conflict.
    pub async fn cancel_order(
        &mut self,
        id: Uuid,
        reason: CancelReason,
    ) -> Result<Order, OrderError> {
        let order = self
            .orders
            .get(&id)
            .ok_or(OrderError::UnknownOrder { id })?;
        if !order.status.can_transition_to(OrderStatus::Canceled) {
            return Err(OrderError::InvalidTransition {
                id,
                status: order.status,
                operation: "cancel",
            });
        }

        self.venue
            .cancel(order, &reason)
            .await
            .map_err(|e| OrderError::Venue {
                operation: "cancel",
                message: e.to_string(),
            })?;

        let order = self.orders.get_mut(&id).expect("order present");
        order.transition(OrderStatus::Canceled, "cancel")?;
        order
            .metadata
            .insert("cancel_reason".to_string(), reason.to_string());
        self.counters.canceled += 1;
        info!(order_id = %id, %reason, "order canceled");
        self.retire(id);
        Ok(self.orders[&id].clone())
    }

    /// Modify a working order. Only legal in `accepted`/`partially_filled`.
    pub async fn modify_order(
        &mut self,
        id: Uuid,
        changes: OrderChanges,
    ) -> Result<Order, OrderError> {
        let order = self
            .orders
            .get(&id)
            .ok_or(OrderError::UnknownOrder { id })?;
        if !matches!(
            order.status,
            OrderStatus::Accepted | OrderStatus::PartiallyFilled
        ) {
            return Err(OrderError::InvalidTransition {
                id,
                status: order.status,
                operation: "modify",
            });
        }
        if let Some(quantity) = changes.quantity {
            if quantity < order.filled_quantity {
                return Err(OrderError::Validation {
                    detail: format!(
                        "cannot reduce quantity to {} below filled {}",
                        quantity, order.filled_quantity
                    ),
                });
            }
        }
        if let Some(price) = changes.price {
            if price <= Decimal::ZERO {
                return Err(OrderError::Validation {
                    detail: format!("price must be positive, got {}", price),
                });
            }
        }
        if let Some(stop) = changes.stop_price {
            if stop <= Decimal::ZERO {
                return Err(OrderError::Validation {
                    detail: format!("stop price must be positive, got {}", stop),
                });
            }
        }

        self.venue
            .modify(order, &changes)
            .await
            .map_err(|e| OrderError::Venue {
                operation: "modify",
                message: e.to_string(),
            })?;

        let order = self.orders.get_mut(&id).expect("order present");
        if let Some(quantity) = changes.quantity {
            order.quantity = quantity;
            order.remaining_quantity = quantity - order.filled_quantity;
        }
        if let Some(price) = changes.price {
            order.price = Some(price);
        }
        if let Some(stop) = changes.stop_price {
            order.stop_price = Some(stop);
        }
        Ok(order.clone())
    }

    // === Execution reports ===

    /// Reconcile an inbound execution report.
    ///
    /// Unknown ids and reports arriving after a terminal transition are
    /// logged and discarded; late or duplicate venue traffic must not
    /// crash processing.
    pub fn process_execution_report(&mut self, report: ExecutionReport) {
        let Some(order) = self.orders.get_mut(&report.order_id) else {
            warn!(order_id = %report.order_id, execution_id = %report.execution_id, "execution report for unknown order, discarding");
            return;
        };
        if order.status.is_terminal() {
            warn!(order_id = %order.id, status = %order.status, "late execution report for terminal order, discarding");
            return;
        }

        match report.status {
            ExecutionStatus::Acknowledged => {
                if order.status == OrderStatus::Submitted {
                    let _ = order.transition(OrderStatus::Accepted, "execution_report");
                }
            }
            ExecutionStatus::PartiallyFilled | ExecutionStatus::Filled => {
                let fill = OrderFill {
                    id: Uuid::new_v4(),
                    order_id: order.id,
                    execution_id: report.execution_id.clone(),
                    price: report.price,
                    quantity: report.quantity,
                    timestamp: report.timestamp,
                    commission: report.commission,
                    liquidity: report.liquidity,
                };
                order.apply_fill(fill);
                self.counters.total_commission += report.commission;

                let next = if order.is_fully_filled() {
                    OrderStatus::Filled
                } else {
                    OrderStatus::PartiallyFilled
                };
                if order.transition(next, "execution_report").is_err() {
                    warn!(order_id = %order.id, status = %order.status, "fill report ignored by state machine");
                    return;
                }
                if next == OrderStatus::Filled {
                    self.counters.filled += 1;
                    if let Some(latency) = order.latency_ms {
                        self.counters.latency_total_ms += latency;
                        self.counters.latency_count += 1;
                    }
                    if let Some(slippage) = order.slippage {
                        self.counters.slippage_total += slippage;
                        self.counters.slippage_count += 1;
                    }
                    let id = order.id;
                    info!(order_id = %id, avg_price = %self.orders[&id].average_fill_price, "order filled");
                    self.retire(id);
                }
            }
            ExecutionStatus::Canceled => {
                if order.transition(OrderStatus::Canceled, "execution_report").is_ok() {
                    self.counters.canceled += 1;
                    let id = order.id;
                    self.retire(id);
                }
            }
            ExecutionStatus::Rejected => {
                if order.transition(OrderStatus::Rejected, "execution_report").is_ok() {
                    self.counters.rejected += 1;
                    let id = order.id;
                    self.retire(id);
                }
            }
            ExecutionStatus::Expired => {
                if order.transition(OrderStatus::Expired, "execution_report").is_ok() {
                    self.counters.expired += 1;
                    let id = order.id;
                    self.retire(id);
                }
            }
        }
    }

    // === Timeouts ===

    /// Fire due auto-cancel timers. Returns ids of orders canceled with
    /// reason `TIMEOUT`. Orders that reached a terminal state already had
    /// their timers revoked, so stale deadlines never act.
    pub async fn poll_timeouts(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let due = self.timeouts.pop_due(now);
        let mut canceled = Vec::new();
        for (_, order_id) in due {
            self.timeout_ids.remove(&order_id);
            match self.cancel_order(order_id, CancelReason::Timeout).await {
                Ok(_) => canceled.push(order_id),
                Err(err) => {
                    warn!(order_id = %order_id, error = %err, "auto-cancel failed");
                }
            }
        }
        canceled
    }

    // === Emergency stop ===

    /// Deactivate the manager and best-effort cancel every active order.
    /// Individual failures are logged and do not block the rest.
    pub async fn emergency_stop(&mut self, reason: &str) -> usize {
        warn!(reason, "order manager emergency stop");
        self.active_flag = false;
        let ids: Vec<Uuid> = self.active.iter().copied().collect();
        let mut canceled = 0;
        for id in ids {
            match self
                .cancel_order(id, CancelReason::EmergencyStop)
                .await
            {
                Ok(_) => canceled += 1,
                Err(err) => {
                    warn!(order_id = %id, error = %err, "emergency cancel failed");
                }
            }
        }
        canceled
    }

    /// Re-enable admission after an emergency stop.
    pub fn reactivate(&mut self) {
        self.active_flag = true;
    }

    // === Queries ===

    pub fn get(&self, id: Uuid) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn active_orders(&self) -> impl Iterator<Item = &Order> {
        self.active.iter().filter_map(|id| self.orders.get(id))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_by_symbol(&self, symbol: &str) -> Vec<&Order> {
        self.active_orders()
            .filter(|o| o.symbol == symbol)
            .collect()
    }

    /// Terminal orders, most recent first, up to `limit`.
    pub fn order_history(&self, limit: usize) -> Vec<&Order> {
        self.history
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.orders.get(id))
            .collect()
    }

    pub fn metrics(&self) -> OrderMetricsSnapshot {
        let c = &self.counters;
        OrderMetricsSnapshot {
            submitted: c.submitted,
            filled: c.filled,
            canceled: c.canceled,
            rejected: c.rejected,
            expired: c.expired,
            active_count: self.active.len(),
            fill_rate: if c.submitted > 0 {
                c.filled as f64 / c.submitted as f64
            } else {
                0.0
            },
            avg_latency_ms: if c.latency_count > 0 {
                c.latency_total_ms as f64 / c.latency_count as f64
            } else {
                0.0
            },
            avg_slippage: if c.slippage_count > 0 {
                Some(c.slippage_total / Decimal::from(c.slippage_count))
            } else {
                None
            },
            total_commission: c.total_commission,
        }
    }

    // === Internals ===

    /// Retag a terminal order from the active index into history, revoke
    /// its timeout, and evict the oldest history entries past capacity.
    fn retire(&mut self, id: Uuid) {
        self.active.remove(&id);
        if let Some(task) = self.timeout_ids.remove(&id) {
            self.timeouts.cancel(task);
        }
        self.history.push_back(id);
        while self.history.len() > self.config.history_capacity {
            if let Some(evicted) = self.history.pop_front() {
                self.orders.remove(&evicted);
            }
        }
    }
}
