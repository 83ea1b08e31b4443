//! Execution venue contract and the simulated venue used by tests and
//! paper runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use apex_common::{ExecutionReport, OrderType, Side};

use super::{CancelReason, Order, OrderChanges};

/// Venue-side failure. Surfaced to callers as an external-dependency
/// error; retry policy is the caller's concern.
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    #[error("venue timed out after {0:?}")]
    Timeout(Duration),

    #[error("venue rejected the request: {0}")]
    Rejected(String),

    #[error("venue unavailable: {0}")]
    Unavailable(String),
}

/// Acknowledgment returned by a successful submit.
#[derive(Debug, Clone)]
pub struct VenueAck {
    pub venue_order_id: String,
}

/// Async contract with the execution venue adapter.
///
/// Implementations decode their own wire format; the core only ever sees
/// typed orders and [`ExecutionReport`]s.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    async fn submit(&self, order: &Order) -> Result<VenueAck, VenueError>;

    async fn cancel(&self, order: &Order, reason: &CancelReason) -> Result<(), VenueError>;

    async fn modify(&self, order: &Order, changes: &OrderChanges) -> Result<(), VenueError>;
}

/// Tuning for the simulated venue.
#[derive(Debug, Clone)]
pub struct SimulatedVenueConfig {
    /// Artificial acknowledgment latency.
    pub ack_latency: Duration,

    /// Reject every submit (failure-path testing).
    pub reject_submissions: bool,

    /// Fail every cancel (failure-path testing).
    pub fail_cancels: bool,

    /// Emit a full-fill execution report on submit.
    pub auto_fill: bool,

    /// Signed offset applied to the fill price of market orders,
    /// as a fraction of the reference price (adverse when positive).
    pub fill_price_offset: Decimal,

    /// Commission charged per fill, as a fraction of notional.
    pub commission_rate: Decimal,
}

impl Default for SimulatedVenueConfig {
    fn default() -> Self {
        Self {
            ack_latency: Duration::ZERO,
            reject_submissions: false,
            fail_cancels: false,
            auto_fill: false,
            fill_price_offset: Decimal::ZERO,
            commission_rate: Decimal::ZERO,
        }
    }
}

/// In-process venue that acknowledges immediately and can synthesize
/// fills. Execution reports accumulate until the driver drains them back
/// into the order manager.
pub struct SimulatedVenue {
    config: SimulatedVenueConfig,
    execution_seq: AtomicU64,
    reports: Mutex<VecDeque<ExecutionReport>>,
}

impl SimulatedVenue {
    pub fn new(config: SimulatedVenueConfig) -> Self {
        Self {
            config,
            execution_seq: AtomicU64::new(0),
            reports: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SimulatedVenueConfig::default())
    }

    /// Venue that fully fills every order on submit.
    pub fn auto_filling() -> Self {
        Self::new(SimulatedVenueConfig {
            auto_fill: true,
            ..SimulatedVenueConfig::default()
        })
    }

    /// Drain execution reports produced so far, oldest first.
    pub fn drain_reports(&self) -> Vec<ExecutionReport> {
        self.reports.lock().drain(..).collect()
    }

    /// Queue an externally-crafted report (test hook).
    pub fn inject_report(&self, report: ExecutionReport) {
        self.reports.lock().push_back(report);
    }

    fn next_execution_id(&self) -> String {
        let seq = self.execution_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("sim-{seq}")
    }

    fn fill_price(&self, order: &Order) -> Decimal {
        match order.order_type {
            OrderType::Market => {
                let base = order
                    .reference_price
                    .or(order.price)
                    .unwrap_or(Decimal::ONE);
                let offset = base * self.config.fill_price_offset;
                match order.side {
                    Side::Buy => base + offset,
                    Side::Sell => base - offset,
                }
            }
            _ => order.price.or(order.reference_price).unwrap_or(Decimal::ONE),
        }
    }
}

#[async_trait]
impl ExecutionVenue for SimulatedVenue {
    async fn submit(&self, order: &Order) -> Result<VenueAck, VenueError> {
        if !self.config.ack_latency.is_zero() {
            tokio::time::sleep(self.config.ack_latency).await;
        }
        if self.config.reject_submissions {
            return Err(VenueError::Rejected("simulated rejection".to_string()));
        }
        debug!(order_id = %order.id, symbol = %order.symbol, "simulated venue accepted order");

        if self.config.auto_fill {
            let price = self.fill_price(order);
            let commission = price * order.quantity * self.config.commission_rate;
            let report =
                ExecutionReport::filled(order.id, self.next_execution_id(), order.quantity, price)
                    .with_commission(commission);
            self.reports.lock().push_back(report);
        }
        Ok(VenueAck {
            venue_order_id: format!("venue-{}", order.id.simple()),
        })
    }

    async fn cancel(&self, order: &Order, reason: &CancelReason) -> Result<(), VenueError> {
        if self.config.fail_cancels {
            return Err(VenueError::Unavailable("simulated cancel failure".to_string()));
        }
        debug!(order_id = %order.id, %reason, "simulated venue canceled order");
        Ok(())
    }

    async fn modify(&self, order: &Order, changes: &OrderChanges) -> Result<(), VenueError> {
        if changes.is_empty() {
            return Err(VenueError::Rejected("empty modification".to_string()));
        }
        debug!(order_id = %order.id, ?changes, "simulated venue modified order");
        Ok(())
    }
}
