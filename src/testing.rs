//! Shared fixtures for unit tests

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::core::config::{AccountConfig, ConnectionConfig, StrategyConfig, ToolConfig};
use crate::core::{Config, Error, OrderStatus, Price, Result, Seccode, Side, VenueTime, parse_venue_time};
use crate::engine::{Engine, Services};
use crate::execution::Ladders;
use crate::notify::EventBus;
use crate::protocol::{CommandTimeouts, ProtocolClient};
use crate::state::StateStore;
use crate::state::bars::{Bar, Bars};
use crate::state::models::{MARKET_FORTS, Order, Portfolio, Trade};
use crate::supervisor::ConnectionMonitor;
use crate::transport::{InboundHandler, Transport};

type SendHook = Box<dyn Fn(&str) + Send + Sync>;

/// Transport double: canned replies per command verb, optional delays,
/// failures and hooks, and a record of everything sent.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<String>>>,
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashSet<String>>,
    hooks: Mutex<HashMap<String, Arc<SendHook>>>,
    sent: Mutex<Vec<String>>,
    handler: RwLock<Option<InboundHandler>>,
    next_trid: AtomicI64,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_trid: AtomicI64::new(100),
            ..Default::default()
        })
    }

    /// Queue a reply for `verb`. The last queued reply repeats.
    pub fn reply_to(&self, verb: &str, reply: &str) {
        self.replies
            .lock()
            .entry(verb.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    pub fn delay(&self, verb: &str, delay: Duration) {
        self.delays.lock().insert(verb.to_string(), delay);
    }

    pub fn fail(&self, verb: &str) {
        self.failures.lock().insert(verb.to_string());
    }

    /// Run `hook` with the command text whenever `verb` is sent.
    pub fn on_send(&self, verb: &str, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.hooks.lock().insert(verb.to_string(), Arc::new(Box::new(hook)));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_verbs(&self) -> Vec<String> {
        self.sent().iter().map(|c| verb_of(c).to_string()).collect()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.sent().iter().filter(|c| verb_of(c) == verb).count()
    }

    /// Deliver an inbound blob through the registered callback.
    pub fn emit(&self, blob: &str) {
        if let Some(handler) = self.handler.read().as_ref() {
            handler(blob.to_string());
        }
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, command: &str) -> Result<String> {
        let verb = verb_of(command).to_string();
        self.sent.lock().push(command.to_string());

        let delay = self.delays.lock().get(&verb).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.failures.lock().contains(&verb) {
            return Err(Error::Transport(format!("{} failed", verb)));
        }
        let hook = self.hooks.lock().get(&verb).cloned();
        if let Some(hook) = hook {
            hook(command);
        }

        let mut replies = self.replies.lock();
        if let Some(queue) = replies.get_mut(&verb) {
            let reply = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
            if let Some(reply) = reply {
                return Ok(reply);
            }
        }
        drop(replies);

        if verb == "neworder" || verb == "newcondorder" {
            let trid = self.next_trid.fetch_add(1, Ordering::SeqCst);
            return Ok(format!(r#"<result success="true" transactionid="{}"/>"#, trid));
        }
        Ok(r#"<result success="true"/>"#.to_string())
    }

    fn register_inbound(&self, handler: InboundHandler) {
        *self.handler.write() = Some(handler);
    }
}

pub fn verb_of(command: &str) -> &str {
    command
        .split_once("id=\"")
        .and_then(|(_, rest)| rest.split_once('"'))
        .map(|(verb, _)| verb)
        .unwrap_or("")
}

pub fn fast_timeouts() -> CommandTimeouts {
    CommandTimeouts {
        not_ready_after: Duration::from_millis(50),
        waiting_time: Duration::from_millis(200),
        ceiling_multiple: 3,
    }
}

pub fn client_with(transport: Arc<ScriptedTransport>) -> (Arc<ProtocolClient>, Arc<ConnectionMonitor>) {
    let monitor = Arc::new(ConnectionMonitor::new(Arc::new(EventBus::new())));
    let client = Arc::new(ProtocolClient::new(transport, monitor.clone(), fast_timeouts()));
    (client, monitor)
}

pub fn connection_config() -> ConnectionConfig {
    ConnectionConfig {
        login: "demo".into(),
        password: "secret".into(),
        host: "primary.example.net".into(),
        port: 3900,
        backup_host: Some("backup.example.net".into()),
        backup_port: Some(3901),
        socket_path: String::new(),
        rqdelay_ms: 100,
        session_timeout_secs: 120,
        request_timeout_secs: 20,
        waiting_time_secs: 20,
        disconnect_timeout_secs: 1,
        lost_grace_secs: 60,
    }
}

pub fn store() -> Arc<StateStore> {
    Arc::new(StateStore::new(Arc::new(EventBus::new()), "RUB", &HashMap::new()))
}

pub fn t(raw: &str) -> VenueTime {
    parse_venue_time(raw).unwrap()
}

pub fn order(trid: i64, order_no: i64, status: OrderStatus) -> Order {
    Order {
        transaction_id: trid,
        order_no,
        seccode: Seccode::new("SiZ6"),
        board: "FUT".into(),
        client: "CL01".into(),
        union: String::new(),
        status,
        side: Side::Buy,
        price: Price::from_f64(100.0),
        quantity: 2,
        balance: 2,
        by_market: false,
        registered: None,
        withdrawn: None,
        condition: None,
        sender: String::new(),
        signal: String::new(),
        note: String::new(),
        result: String::new(),
        seen_session: 0,
    }
}

pub fn trade(trade_no: i64, order_no: i64, side: Side, quantity: i64) -> Trade {
    Trade {
        trade_no,
        order_no,
        seccode: Seccode::new("SiZ6"),
        board: "FUT".into(),
        client: "CL01".into(),
        union: String::new(),
        side,
        price: Price::from_f64(100.0),
        quantity,
        time: t("14.10.2026 11:00:00"),
        value: 0.0,
        commission: 0.0,
        sender: String::new(),
        signal: String::new(),
        note: String::new(),
    }
}

pub fn tool_config(name: &str, seccode: &str, strategies: &[&str]) -> ToolConfig {
    ToolConfig {
        name: name.into(),
        seccode: seccode.into(),
        board: "FUT".into(),
        market: 4,
        share_of_funds: 5.0,
        fixed_lots: None,
        min_lots: 0,
        max_lots: 10,
        balance_shift: 0,
        stop_trading: false,
        priority: 0,
        active: true,
        slippage_ticks: 2,
        reprice_ticks: 10,
        strategies: strategies
            .iter()
            .map(|s| StrategyConfig {
                name: s.to_string(),
                algorithm: "trend".into(),
                timeframe: 60,
                params: HashMap::new(),
            })
            .collect(),
    }
}

pub fn engine_config(tools: Vec<ToolConfig>) -> Config {
    Config {
        connection: connection_config(),
        account: AccountConfig {
            client: "CL01".into(),
            union: String::new(),
        },
        tools,
        ..Default::default()
    }
}

pub fn test_engine(config: Config, transport: Arc<ScriptedTransport>) -> Arc<Engine> {
    Engine::new(
        config,
        transport,
        Services {
            ladders: Ladders::default().scaled_down(50),
            timeouts: Some(fast_timeouts()),
            portfolio_wait: Duration::from_millis(500),
            ..Services::default()
        },
    )
    .unwrap()
}

/// Fresh FORTS quote at 90000, ten rising one-minute bars and a funded
/// portfolio: everything a tool needs to be ready.
pub fn prime_security(engine: &Engine, seccode: &str, deposit: f64) {
    let now = engine.clock().now();
    let store = engine.store();
    store.with_security_mut(&Seccode::new(seccode), |sec| {
        sec.board = "FUT".into();
        sec.market = MARKET_FORTS;
        sec.buy_deposit = deposit;
        sec.sell_deposit = deposit;
        sec.last_price = Some(Price::from_f64(90_000.0));
        sec.last_trade_time = Some(now);
        sec.bars = Bars::from_bars(
            1,
            (0..10i64).map(|i| {
                let close = 89_991.0 + i as f64;
                Bar {
                    time: now - chrono::Duration::minutes(10 - i),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 1.0,
                }
            }),
        );
        sec.recompute_requirements(1.0);
    });
    store.set_portfolio(Portfolio {
        equity: 1_000_000.0,
        ..Default::default()
    });
}
