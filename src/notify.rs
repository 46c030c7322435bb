//! Observer channel, operator notifications, and the persistence seam

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::core::{Result, Seccode};
use crate::state::models::{Order, Portfolio, Position, Trade};
use crate::state::tool::Tool;
use crate::supervisor::ConnectionState;

/// State changes published to external observers (UI, persistence).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    OrderChanged(Order),
    TradeAdded(Trade),
    PositionChanged(Position),
    PortfolioChanged { equity: f64, init_req: f64 },
    ConnectionChanged(ConnectionState),
    ReadinessChanged { ready: bool, reason: String },
    BarsUpdated(Seccode),
    Notice { text: String, urgent: bool },
}

/// Fan-out of engine events. Subscribers that hang up are dropped.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<flume::Sender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> flume::Receiver<EngineEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: EngineEvent) {
        let mut subs = self.subscribers.lock();
        if subs.is_empty() {
            return;
        }
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Outbound operator notification (email, messenger...).
pub trait Notifier: Send + Sync {
    fn notify(&self, text: &str, urgent: bool);
}

/// Notifier that only writes to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, text: &str, urgent: bool) {
        if urgent {
            error!(target: "notify", "{}", text);
        } else {
            info!(target: "notify", "{}", text);
        }
    }
}

/// Plain value copies handed to the persistence collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub orders: Vec<Order>,
    pub trades: Vec<Trade>,
    pub positions: Vec<Position>,
    pub portfolio: Portfolio,
    pub tools: Vec<Tool>,
    pub equity_history: Vec<f64>,
}

pub trait Persistence: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
    fn load(&self) -> Result<Option<Snapshot>>;
    /// Move the previous day's artifacts aside.
    fn archive_day(&self, day: chrono::NaiveDate) -> Result<()>;
}

/// Persistence that keeps nothing.
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn save(&self, _snapshot: &Snapshot) -> Result<()> {
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>> {
        Ok(None)
    }

    fn archive_day(&self, day: chrono::NaiveDate) -> Result<()> {
        warn!(%day, "no persistence configured, nothing archived");
        Ok(())
    }
}
