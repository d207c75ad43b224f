//! Change notifications for persisted rows
//!
//! Every write through [`crate::db::Database`] publishes a [`ChangeEvent`].
//! Consumers subscribe with a [`ChangeFilter`] by table and operation;
//! dropping the [`Subscription`] unsubscribes.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Slips,
    SlipLineItems,
    SlipPayments,
    ActivityLog,
}

impl ChangeTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slips => "slips",
            Self::SlipLineItems => "slip_line_items",
            Self::SlipPayments => "slip_payments",
            Self::ActivityLog => "activity_log",
        }
    }
}

impl std::str::FromStr for ChangeTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slips" => Ok(Self::Slips),
            "slip_line_items" => Ok(Self::SlipLineItems),
            "slip_payments" => Ok(Self::SlipPayments),
            "activity_log" => Ok(Self::ActivityLog),
            _ => Err(format!("Unknown table: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::str::FromStr for ChangeOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("Unknown operation: {}", s)),
        }
    }
}

/// A committed row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: ChangeTable,
    pub op: ChangeOp,
    /// Row id in `table`
    pub id: i64,
    /// Owning slip, for child rows and activity
    pub slip_id: Option<i64>,
}

/// Which events a subscriber wants; empty means everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    pub tables: Vec<ChangeTable>,
    pub ops: Vec<ChangeOp>,
}

impl ChangeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn table(table: ChangeTable) -> Self {
        Self {
            tables: vec![table],
            ops: Vec::new(),
        }
    }

    pub fn with_ops(mut self, ops: &[ChangeOp]) -> Self {
        self.ops = ops.to_vec();
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        (self.tables.is_empty() || self.tables.contains(&event.table))
            && (self.ops.is_empty() || self.ops.contains(&event.op))
    }
}

/// Broadcast feed shared by every handle to the same database
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; a feed without subscribers drops it
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Filtered receiver; unsubscribes on drop
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    filter: ChangeFilter,
}

impl Subscription {
    /// Next matching event, or None once the feed is gone
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
