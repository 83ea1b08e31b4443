//! Apex trading core.
//!
//! Four tightly-coupled subsystems behind one crate:
//!
//! - `events`: priority-queued dispatch with per-handler circuit breakers
//!   and dead-lettering
//! - `order`: the order state machine, fills and slippage accounting, and
//!   the execution-venue contract
//! - `risk`: continuous and pre-trade risk evaluation, dynamic position
//!   sizing, and the risk circuit breaker
//! - `backtest`: deterministic historical replay producing performance
//!   statistics
//!
//! The HTTP/WebSocket surface, persistence, and concrete venue adapters
//! are external collaborators: the core consumes and produces the plain
//! data structures in `apex-common`.

pub mod backtest;
pub mod breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod order;
pub mod risk;
pub mod scheduler;

pub use backtest::{BacktestConfig, BacktestEngine, BacktestReport, BacktestState, Strategy};
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use config::{EngineConfig, EventProcessorConfig, OrderManagerConfig, RiskConfig};
pub use error::{BacktestError, EventError, OrderError, RiskError};
pub use events::{EventDraft, EventPayload, EventPriority, EventProcessor, EventType, Handler, TradingEvent};
pub use order::{
    CancelReason, ExecutionVenue, Order, OrderChanges, OrderFill, OrderManager, OrderRequest,
    OrderStatus, SimulatedVenue,
};
pub use risk::{RiskAlert, RiskGate, RiskManager, RiskMetrics};
pub use scheduler::TaskScheduler;
