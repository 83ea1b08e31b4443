//! Event types and handler registry for the dispatch engine.
//!
//! Subscription is an explicit table of `{event_types, priority, filter,
//! callback}` entries owned by the processor. Emission is a pure function
//! over that table plus per-handler circuit-breaker state.

mod processor;

pub use processor::{
    DeadLetter, EventMetricsSnapshot, EventProcessor, HandlerStats, QueueDepths,
};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use apex_common::{ExecutionReport, MarketSnapshot, TapeTrade};

/// Event priority, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl EventPriority {
    /// All priorities, highest first.
    pub const ALL: [EventPriority; 4] = [
        EventPriority::Critical,
        EventPriority::High,
        EventPriority::Normal,
        EventPriority::Low,
    ];

    /// Queue index for this priority.
    pub fn index(&self) -> usize {
        match self {
            EventPriority::Critical => 0,
            EventPriority::High => 1,
            EventPriority::Normal => 2,
            EventPriority::Low => 3,
        }
    }

    /// Share of the total queue capacity assigned to this priority,
    /// in percent. Split is 10/30/50/10.
    pub fn capacity_share(&self) -> usize {
        match self {
            EventPriority::Critical => 10,
            EventPriority::High => 30,
            EventPriority::Normal => 50,
            EventPriority::Low => 10,
        }
    }
}

impl std::fmt::Display for EventPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventPriority::Critical => write!(f, "critical"),
            EventPriority::High => write!(f, "high"),
            EventPriority::Normal => write!(f, "normal"),
            EventPriority::Low => write!(f, "low"),
        }
    }
}

/// What kind of event this is; handlers subscribe by type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MarketData,
    Tape,
    OrderLifecycle,
    Execution,
    RiskAlert,
    Signal,
    Timer,
    /// Application-defined event kind.
    Custom(String),
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::MarketData => write!(f, "market_data"),
            EventType::Tape => write!(f, "tape"),
            EventType::OrderLifecycle => write!(f, "order_lifecycle"),
            EventType::Execution => write!(f, "execution"),
            EventType::RiskAlert => write!(f, "risk_alert"),
            EventType::Signal => write!(f, "signal"),
            EventType::Timer => write!(f, "timer"),
            EventType::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// Typed event payload, decoded once at the adapter boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    MarketData(MarketSnapshot),
    Tape(TapeTrade),
    Execution(ExecutionReport),
    Custom(serde_json::Value),
    Empty,
}

/// An event flowing through the processor. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingEvent {
    pub id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Strictly increasing per process lifetime, assigned at ingestion.
    /// Gaps are allowed (dropped events) but never reused.
    pub sequence: u64,
    pub source: String,
    pub priority: EventPriority,
    pub payload: EventPayload,
    pub correlation_id: Option<Uuid>,
    pub parent_event_id: Option<Uuid>,
}

/// Event as submitted by a producer, before id/sequence assignment.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub priority: EventPriority,
    pub payload: EventPayload,
    pub correlation_id: Option<Uuid>,
    pub parent_event_id: Option<Uuid>,
}

impl EventDraft {
    pub fn new(event_type: EventType, source: impl Into<String>, priority: EventPriority) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            source: source.into(),
            priority,
            payload: EventPayload::Empty,
            correlation_id: None,
            parent_event_id: None,
        }
    }

    pub fn market_data(source: impl Into<String>, snapshot: MarketSnapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp,
            payload: EventPayload::MarketData(snapshot),
            ..Self::new(EventType::MarketData, source, EventPriority::High)
        }
    }

    pub fn execution(source: impl Into<String>, report: ExecutionReport) -> Self {
        Self {
            timestamp: report.timestamp,
            payload: EventPayload::Execution(report),
            ..Self::new(EventType::Execution, source, EventPriority::Critical)
        }
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_parent(mut self, parent_event_id: Uuid) -> Self {
        self.parent_event_id = Some(parent_event_id);
        self
    }

    /// Structural validation applied at ingestion.
    pub fn is_valid(&self) -> bool {
        !self.source.is_empty() && self.timestamp.timestamp() > 0
    }

    pub(crate) fn into_event(self, sequence: u64) -> TradingEvent {
        TradingEvent {
            id: Uuid::new_v4(),
            event_type: self.event_type,
            timestamp: self.timestamp,
            sequence,
            source: self.source,
            priority: self.priority,
            payload: self.payload,
            correlation_id: self.correlation_id,
            parent_event_id: self.parent_event_id,
        }
    }
}

/// Handler callback. A failure is isolated to this handler and feeds its
/// circuit breaker; it never aborts the dispatch loop.
pub type HandlerFn = Box<dyn Fn(&TradingEvent) -> anyhow::Result<()> + Send + Sync>;

/// Optional per-event predicate evaluated before the handler runs.
pub type FilterFn = Box<dyn Fn(&TradingEvent) -> bool + Send + Sync>;

/// Optional failure observer. Runs on handler error; does not suppress
/// breaker accounting.
pub type ErrorHandlerFn = Box<dyn Fn(&TradingEvent, &anyhow::Error) + Send + Sync>;

/// A registered handler: capability entry in the dispatcher's table.
pub struct Handler {
    pub id: String,
    pub event_types: HashSet<EventType>,
    /// Tie-break ordering among handlers for the same event; higher first.
    pub priority: u8,
    pub enabled: bool,
    pub filter: Option<FilterFn>,
    pub handler: HandlerFn,
    pub error_handler: Option<ErrorHandlerFn>,
}

impl Handler {
    pub fn new<I>(
        id: impl Into<String>,
        event_types: I,
        handler: impl Fn(&TradingEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = EventType>,
    {
        Self {
            id: id.into(),
            event_types: event_types.into_iter().collect(),
            priority: 0,
            enabled: true,
            filter: None,
            handler: Box::new(handler),
            error_handler: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_filter(
        mut self,
        filter: impl Fn(&TradingEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn with_error_handler(
        mut self,
        error_handler: impl Fn(&TradingEvent, &anyhow::Error) + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Box::new(error_handler));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether this handler subscribes to the given event type.
    pub fn handles(&self, event_type: &EventType) -> bool {
        self.event_types.contains(event_type)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("event_types", &self.event_types)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}
