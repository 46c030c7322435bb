//! Engine - wires the components together and runs the scheduled work

pub mod tool;

use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::core::clock::TradingHours;
use crate::core::{Config, Error, Result, SYSTEM_SENDER, Seccode, Side, VenueClock};
use crate::execution::{Ladders, OrderLifecycleManager, OrderRequest};
use crate::logging::{self, RollingLog};
use crate::notify::{EngineEvent, EventBus, LogNotifier, Notifier, NullPersistence, Persistence};
use crate::protocol::commands::Command;
use crate::protocol::dispatch::Dispatcher;
use crate::protocol::{CommandTimeouts, ProtocolClient};
use crate::risk::RiskEngine;
use crate::risk::derisk::{self, DeRiskActions, DeRiskOutcome, PortfolioView};
use crate::scheduler::{self, Jobs, Plan};
use crate::state::StateStore;
use crate::state::models::MARKET_FORTS;
use crate::state::tool::Tool;
use crate::strategies::{Strategy, StrategyParams, StrategyRegistry};
use crate::supervisor::{ConnectionMonitor, ReconnectionSupervisor};
use crate::transport::Transport;
use tool::InstrumentGuards;

/// Margin updates must be quiet this long before requirements are recomputed.
pub const MARGIN_DEBOUNCE: Duration = Duration::from_secs(1);
/// Bars asked for on each recalculation; the full history comes at session start.
const RECENT_BARS: u32 = 10;
/// Candle period the source series is kept in, seconds.
const SOURCE_PERIOD_SECS: u32 = 60;
const PORTFOLIO_POLL: Duration = Duration::from_millis(50);
/// De-risking waits longer than a recalculation for the instrument.
const DERISK_GUARD_WAIT: Duration = Duration::from_secs(5);

/// Collaborators and tunables supplied from outside.
pub struct Services {
    pub notifier: Arc<dyn Notifier>,
    pub persistence: Arc<dyn Persistence>,
    pub registry: StrategyRegistry,
    pub ladders: Ladders,
    /// Defaults to the tiers derived from `waiting_time_secs`
    pub timeouts: Option<CommandTimeouts>,
    pub log: Option<Arc<RollingLog>>,
    /// How long a de-risking step waits for a fresh portfolio
    pub portfolio_wait: Duration,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            notifier: Arc::new(LogNotifier),
            persistence: Arc::new(NullPersistence),
            registry: StrategyRegistry::builtin(),
            ladders: Ladders::default(),
            timeouts: None,
            log: None,
            portfolio_wait: Duration::from_secs(5),
        }
    }
}

pub struct Engine {
    config: Config,
    clock: VenueClock,
    hours: TradingHours,
    events: Arc<EventBus>,
    store: Arc<StateStore>,
    client: Arc<ProtocolClient>,
    monitor: Arc<ConnectionMonitor>,
    supervisor: ReconnectionSupervisor,
    orders: OrderLifecycleManager,
    risk: RiskEngine,
    /// (tool, slot) -> instance
    strategies: HashMap<(String, String), Box<dyn Strategy>>,
    guards: InstrumentGuards,
    notifier: Arc<dyn Notifier>,
    persistence: Arc<dyn Persistence>,
    log: Option<Arc<RollingLog>>,
    portfolio_wait: Duration,

    shutdown: Arc<AtomicBool>,
    stop: Mutex<Option<crossbeam::channel::Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    /// Session ids already bootstrapped / checked for lost orders
    bootstrapped: AtomicU64,
    lost_checked: AtomicU64,
}

impl Engine {
    pub fn new(config: Config, transport: Arc<dyn Transport>, services: Services) -> Result<Arc<Self>> {
        let registry = services.registry;
        config.validate(&registry.algorithms())?;
        let clock = VenueClock::new(config.app.utc_offset_hours);
        let hours = config.scheduler.trading_hours()?;

        let events = Arc::new(EventBus::new());
        let store = Arc::new(StateStore::new(events.clone(), &config.app.base_currency, &config.currency));
        let monitor = Arc::new(ConnectionMonitor::new(events.clone()));
        let timeouts = services
            .timeouts
            .unwrap_or_else(|| CommandTimeouts::new(Duration::from_secs(config.connection.waiting_time_secs)));
        let client = Arc::new(ProtocolClient::new(transport, monitor.clone(), timeouts));
        let supervisor = ReconnectionSupervisor::new(
            client.clone(),
            monitor.clone(),
            config.connection.clone(),
            services.notifier.clone(),
        );
        let orders = OrderLifecycleManager::new(
            client.clone(),
            store.clone(),
            config.account.clone(),
            services.ladders,
            services.notifier.clone(),
        );

        let mut strategies = HashMap::new();
        let mut tools = Vec::with_capacity(config.tools.len());
        for tc in &config.tools {
            for sc in &tc.strategies {
                let params = StrategyParams {
                    timeframe: sc.timeframe,
                    values: sc.params.clone(),
                };
                let strategy = registry.build(&sc.algorithm, &params)?;
                strategies.insert((tc.name.clone(), sc.name.clone()), strategy);
            }
            tools.push(Tool::from_config(tc));
        }
        restore(&store, &mut tools, services.persistence.as_ref());
        store.set_tools(tools);
        info!(tools = config.tools.len(), strategies = strategies.len(), "engine configured");

        Ok(Arc::new(Self {
            risk: RiskEngine::new(config.risk.clone()),
            config,
            clock,
            hours,
            events,
            store,
            client,
            monitor,
            supervisor,
            orders,
            strategies,
            guards: InstrumentGuards::new(),
            notifier: services.notifier,
            persistence: services.persistence,
            log: services.log,
            portfolio_wait: services.portfolio_wait,
            shutdown: Arc::new(AtomicBool::new(false)),
            stop: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
            bootstrapped: AtomicU64::new(0),
            lost_checked: AtomicU64::new(0),
        }))
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn clock(&self) -> VenueClock {
        self.clock
    }

    pub fn subscribe(&self) -> flume::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Start the inbound worker and the scheduler, then connect.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let dispatcher = Arc::new(Dispatcher::new(self.store.clone(), self.monitor.clone()));
        let inbound = self
            .client
            .spawn_inbound_worker(dispatcher, self.clock, self.hours, self.shutdown.clone())?;

        let (tx, rx) = crossbeam::channel::bounded(1);
        let plan = Plan::from_config(&self.config.scheduler)?;
        let jobs: Arc<dyn Jobs> = self.clone();
        let scheduler = scheduler::spawn(jobs, plan, self.clock, rx)?;
        *self.stop.lock() = Some(tx);
        self.threads.lock().extend([inbound, scheduler]);

        if let Err(e) = self.supervisor.connect() {
            warn!("initial connect failed: {}; retrying in the background", e);
        }
        Ok(())
    }

    /// Stop the loops, close the session and save state.
    pub fn shutdown(&self) {
        info!("shutting down");
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
        self.supervisor.set_suspended(true);
        if let Err(e) = self.supervisor.disconnect() {
            warn!("disconnect on shutdown: {}", e);
        }
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        self.persist();
    }

    /// Send a fire-and-forget request; failures are logged.
    fn request(&self, command: Command) -> bool {
        match self.client.send(&command) {
            Ok(reply) if reply.success => true,
            Ok(reply) => {
                warn!(verb = command.verb(), "request rejected: {}", reply.message);
                false
            }
            Err(e) => {
                warn!(verb = command.verb(), "request failed: {}", e);
                false
            }
        }
    }

    fn history_period(&self) -> u32 {
        self.store.candle_kind_for(SOURCE_PERIOD_SECS).unwrap_or(1)
    }

    fn request_portfolio(&self) -> bool {
        let account = &self.config.account;
        self.request(Command::GetFortsPositions {
            client: account.client.clone(),
        });
        self.request(Command::GetMcPortfolio {
            union: account.union.clone(),
            client: account.client.clone(),
        })
    }

    fn request_security_info(&self, tool: &Tool) {
        self.request(Command::GetSecuritiesInfo {
            market: tool.market,
            seccode: tool.seccode.clone(),
        });
        self.request(Command::GetClnSecPermissions {
            board: tool.board.clone(),
            seccode: tool.seccode.clone(),
            client: self.config.account.client.clone(),
            union: self.config.account.union.clone(),
        });
    }

    fn persist(&self) {
        if let Err(e) = self.persistence.save(&self.store.snapshot()) {
            warn!("saving state failed: {}", e);
        }
    }

    fn view(&self) -> PortfolioView {
        PortfolioView {
            portfolio: self.store.portfolio(),
            tools: self.store.tools(),
            positions: self.store.positions(),
        }
    }

    fn board_for(&self, seccode: &Seccode) -> Result<String> {
        let known = self
            .store
            .with_security(seccode, |s| (s.board.clone(), s.market))
            .or_else(|| {
                self.store
                    .positions()
                    .into_iter()
                    .find(|p| &p.seccode == seccode)
                    .map(|p| (String::new(), p.market))
            });
        match known {
            Some((board, _)) if !board.is_empty() => Ok(board),
            Some((_, MARKET_FORTS)) => Ok("FUT".to_string()),
            _ => Err(Error::InvalidState(format!("{}: board unknown", seccode))),
        }
    }

    /// Cancel the instrument's orders, then trade `delta` lots at market.
    fn flatten_toward(&self, seccode: &Seccode, delta: i64, signal: &str) -> Result<()> {
        let Some(side) = Side::for_delta(delta) else {
            return Ok(());
        };
        let board = self.board_for(seccode)?;
        self.guards
            .with_instrument(seccode, DERISK_GUARD_WAIT, || {
                self.orders.cancel_all(seccode)?;
                self.orders.place(OrderRequest {
                    seccode: seccode.clone(),
                    board,
                    side,
                    price: None,
                    quantity: delta.abs(),
                    sender: SYSTEM_SENDER.to_string(),
                    signal: signal.to_string(),
                    note: String::new(),
                    condition: None,
                })
            })
            .ok_or_else(|| Error::InvalidState(format!("{}: instrument busy", seccode)))??;
        Ok(())
    }
}

/// Carry strategy views and equity history over from the last run.
fn restore(store: &StateStore, tools: &mut [Tool], persistence: &dyn Persistence) {
    let snapshot = match persistence.load() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return,
        Err(e) => {
            warn!("loading saved state failed: {}", e);
            return;
        }
    };
    store.load_equity_history(&snapshot.equity_history);
    for mut order in snapshot.orders {
        order.seen_session = 0;
        store.insert_local_order(order);
    }
    for trade in snapshot.trades {
        store.add_trade(trade);
    }
    for tool in tools.iter_mut() {
        let Some(saved) = snapshot.tools.iter().find(|t| t.name == tool.name) else {
            continue;
        };
        for slot in &mut tool.strategies {
            if let Some(old) = saved.strategies.iter().find(|s| s.name == slot.name) {
                slot.orders = old.orders.clone();
                slot.trades = old.trades.clone();
                slot.last_signal = old.last_signal;
            }
        }
        tool.normalization_since = saved.normalization_since;
        tool.deviation_since = saved.deviation_since;
    }
    info!("restored saved state");
}

impl Jobs for Engine {
    fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    fn housekeeping(&self) {
        let recomputed = self.store.recompute_due_margins(MARGIN_DEBOUNCE);
        if recomputed > 0 {
            debug!(recomputed, "margin requirements updated");
        }

        let session = self.store.session();
        let grace = Duration::from_secs(self.config.connection.lost_grace_secs);
        if self.monitor.is_connected()
            && self.monitor.connected_for().is_some_and(|d| d >= grace)
            && self.lost_checked.load(Ordering::SeqCst) != session
        {
            self.lost_checked.store(session, Ordering::SeqCst);
            self.orders.mark_lost();
        }
    }

    fn link_due(&self) -> bool {
        self.supervisor.is_due(Instant::now())
    }

    fn supervise(&self) {
        self.supervisor.tick();
    }

    fn session_pending(&self) -> bool {
        self.monitor.is_connected() && self.bootstrapped.load(Ordering::SeqCst) != self.store.session()
    }

    /// Subscriptions and snapshots a fresh session needs.
    fn bootstrap(&self) {
        let session = self.store.session();
        if self.bootstrapped.swap(session, Ordering::SeqCst) == session {
            return;
        }
        info!(session, "bootstrapping session");
        let tools = self.store.tools();

        let mut feeds: Vec<(String, Seccode)> = tools.iter().map(|t| (t.board.clone(), t.seccode.clone())).collect();
        for seccode in self.config.currency.values().map(Seccode::new) {
            match self.store.with_security(&seccode, |s| s.board.clone()) {
                Some(board) if !board.is_empty() => feeds.push((board, seccode)),
                _ => debug!(%seccode, "currency source not listed yet"),
            }
        }
        feeds.sort();
        feeds.dedup();
        if !feeds.is_empty() {
            self.request(Command::SubscribeTrades(feeds));
        }

        let period = self.history_period();
        for tool in &tools {
            self.request_security_info(tool);
            self.request(Command::GetHistory {
                board: tool.board.clone(),
                seccode: tool.seccode.clone(),
                period,
                count: self.config.scheduler.history_count,
                reset: true,
            });
        }
        self.request_portfolio();
    }

    fn recalculate(&self) {
        let now = self.clock.now();
        if !self.hours.contains(&now) {
            debug!("outside trading hours, recalculation skipped");
            return;
        }
        if !self.monitor.is_connected() {
            return;
        }
        let active: Vec<Tool> = self.store.tools().into_iter().filter(|t| t.active).collect();
        let period = self.history_period();
        for tool in &active {
            self.request(Command::GetHistory {
                board: tool.board.clone(),
                seccode: tool.seccode.clone(),
                period,
                count: RECENT_BARS,
                reset: false,
            });
        }
        for tool in &active {
            match self.recalculate_tool(&tool.name) {
                Ok(outcome) => debug!(tool = %tool.name, ?outcome, "recalculated"),
                Err(e) => warn!(tool = %tool.name, "recalculation abandoned: {}", e),
            }
        }
        self.persist();
    }

    fn portfolio_check(&self) {
        if !self.monitor.is_connected() {
            return;
        }
        match derisk::run(self.risk.config(), self.view(), self) {
            Ok(DeRiskOutcome::WithinLimits) => debug!("portfolio within limits"),
            Ok(DeRiskOutcome::TransientSpike) => {}
            Ok(DeRiskOutcome::Resolved(steps)) => {
                self.notifier
                    .notify(&format!("portfolio back under its ceilings after {:?}", steps), true);
            }
            Ok(DeRiskOutcome::Exhausted(steps)) => {
                let text = format!("portfolio still over its ceilings after {:?}", steps);
                error!("{}", text);
                self.notifier.notify(&text, true);
            }
            Err(e) => warn!("de-risking interrupted: {}", e),
        }
        self.persist();
    }

    fn refresh_info(&self) {
        if !self.monitor.is_connected() {
            return;
        }
        self.request_portfolio();
        for tool in self.store.tools() {
            self.request_security_info(&tool);
        }
    }

    fn session_window(&self, connect: bool) {
        if connect {
            info!("scheduled session window: reconnecting");
            self.supervisor.set_suspended(false);
            if let Err(e) = self.supervisor.connect() {
                warn!("scheduled connect failed: {}", e);
            }
        } else {
            info!("scheduled session window: disconnecting");
            self.supervisor.set_suspended(true);
            if let Err(e) = self.supervisor.disconnect() {
                warn!("scheduled disconnect failed: {}", e);
            }
        }
    }

    fn daily_rollover(&self) {
        let now = self.clock.now();
        let today = now.date();
        let yesterday = today.pred_opt().unwrap_or(today);
        info!(%yesterday, "daily rollover");

        if let Some(log) = &self.log {
            logging::roll(log, yesterday, today);
        }
        self.store.record_equity_sample(self.store.portfolio().equity);

        let cutoff = now - ChronoDuration::days(self.config.app.log_retention_days as i64);
        self.store.purge_before(cutoff);
        self.store.purge_bars_before(cutoff);
        if let Err(e) = self.persistence.archive_day(yesterday) {
            warn!("archiving {} failed: {}", yesterday, e);
        }
        self.persist();
    }
}

impl DeRiskActions for Engine {
    fn refresh(&self) -> Result<PortfolioView> {
        let before = self.store.portfolio_generation();
        if !self.request_portfolio() {
            return Err(Error::Trading("portfolio request failed".into()));
        }
        let deadline = Instant::now() + self.portfolio_wait;
        while self.store.portfolio_generation() == before {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "no fresh portfolio within {:?}",
                    self.portfolio_wait
                )));
            }
            std::thread::sleep(PORTFOLIO_POLL);
        }
        Ok(self.view())
    }

    fn close_position(&self, seccode: &Seccode, saldo: i64) -> Result<()> {
        self.flatten_toward(seccode, -saldo, "Close")
    }

    fn shrink_tool(&self, tool: &Tool, target: i64) -> Result<()> {
        let saldo = self.store.saldo(&tool.seccode);
        self.flatten_toward(&tool.seccode, target - saldo, "Shrink")
    }

    fn deactivate_tool(&self, tool: &Tool, reason: &str) -> Result<()> {
        self.store.with_tool_mut(&tool.name, |t| {
            t.active = false;
            t.ready_to_trade = false;
        });
        if let Err(e) = self.orders.cancel_all(&tool.seccode) {
            warn!(tool = %tool.name, "cancelling on deactivation: {}", e);
        }
        let text = format!("tool {} deactivated: {}", tool.name, reason);
        warn!("{}", text);
        self.notifier.notify(&text, true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OrderStatus;
    use crate::notify::Snapshot;
    use crate::state::models::{Portfolio, Position, PositionKind};
    use crate::testing::{ScriptedTransport, engine_config, order, test_engine, tool_config, trade};
    use std::sync::atomic::AtomicUsize;

    fn go_online(engine: &Engine) {
        engine.store.begin_session();
        engine.monitor.on_server_status("true", false, "");
    }

    fn over_ceiling() -> Portfolio {
        Portfolio {
            equity: 1_000_000.0,
            init_req: 950_000.0,
            maint_req: 500_000.0,
            ..Default::default()
        }
    }

    fn position(seccode: &str, saldo: i64) -> Position {
        Position {
            seccode: Seccode::new(seccode),
            kind: PositionKind::Forts,
            market: MARKET_FORTS,
            client: "CL01".into(),
            union: String::new(),
            saldo_in: saldo,
            saldo,
            bought: 0,
            sold: 0,
            pnl: 0.0,
        }
    }

    struct SavedState(Snapshot);

    impl Persistence for SavedState {
        fn save(&self, _snapshot: &Snapshot) -> Result<()> {
            Ok(())
        }

        fn load(&self) -> Result<Option<Snapshot>> {
            Ok(Some(self.0.clone()))
        }

        fn archive_day(&self, _day: chrono::NaiveDate) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let mut tc = tool_config("Si", "SiZ6", &["s"]);
        tc.strategies[0].algorithm = "zigzag".into();
        let result = Engine::new(engine_config(vec![tc]), ScriptedTransport::new(), Services::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_bootstrap_runs_once_per_session() {
        let transport = ScriptedTransport::new();
        let engine = test_engine(engine_config(vec![tool_config("Si", "SiZ6", &["s"])]), transport.clone());
        assert!(!engine.session_pending());

        go_online(&engine);
        assert!(engine.session_pending());
        engine.bootstrap();
        engine.bootstrap();
        assert!(!engine.session_pending());

        assert_eq!(transport.count("subscribe"), 1);
        assert_eq!(transport.count("gethistorydata"), 1);
        assert_eq!(transport.count("get_securities_info"), 1);
        assert_eq!(transport.count("get_cln_sec_permissions"), 1);
        assert_eq!(transport.count("get_mc_portfolio"), 1);
        assert!(transport.sent().iter().any(|c| c.contains("<reset>true</reset>")));
    }

    #[test]
    fn test_orders_missing_after_reconnect_become_lost() {
        let transport = ScriptedTransport::new();
        let mut config = engine_config(vec![]);
        config.connection.lost_grace_secs = 0;
        let engine = test_engine(config, transport);
        engine.store.insert_local_order(order(1, 55, OrderStatus::Active));

        go_online(&engine);
        engine.housekeeping();
        assert_eq!(engine.store.order(1).unwrap().status, OrderStatus::Lost);
    }

    #[test]
    fn test_saved_state_is_restored() {
        let mut tool = Tool::from_config(&tool_config("Si", "SiZ6", &["s"]));
        let mut fill = trade(9, 55, Side::Buy, 3);
        fill.sender = "s".into();
        tool.strategies[0].trades.push(fill.clone());
        let saved = SavedState(Snapshot {
            trades: vec![fill],
            tools: vec![tool],
            equity_history: vec![900_000.0, 1_100_000.0],
            ..Default::default()
        });

        let engine = Engine::new(
            engine_config(vec![tool_config("Si", "SiZ6", &["s"])]),
            ScriptedTransport::new(),
            Services {
                persistence: Arc::new(saved),
                ..Services::default()
            },
        )
        .unwrap();
        assert_eq!(engine.store.tool("Si").unwrap().intended_position(), 3);
        assert_eq!(engine.store.trades().len(), 1);
        assert_eq!(engine.store.equity_average(), Some(1_000_000.0));
    }

    #[test]
    fn test_spike_that_clears_on_refresh_changes_nothing() {
        let transport = ScriptedTransport::new();
        let engine = test_engine(engine_config(vec![]), transport.clone());
        engine.store.set_portfolio(over_ceiling());
        engine.store.set_position(position("BRX6", 3));

        let store = engine.store.clone();
        transport.on_send("get_mc_portfolio", move |_| {
            store.set_portfolio(Portfolio {
                equity: 1_000_000.0,
                init_req: 100_000.0,
                ..Default::default()
            })
        });
        let outcome = derisk::run(engine.risk.config(), engine.view(), &*engine).unwrap();
        assert_eq!(outcome, DeRiskOutcome::TransientSpike);
        assert_eq!(transport.count("neworder"), 0);
    }

    #[test]
    fn test_independent_position_closed_at_market() {
        let transport = ScriptedTransport::new();
        let engine = test_engine(engine_config(vec![]), transport.clone());
        engine.store.set_portfolio(over_ceiling());
        engine.store.set_position(position("BRX6", 3));

        let store = engine.store.clone();
        let refreshes = Arc::new(AtomicUsize::new(0));
        transport.on_send("get_mc_portfolio", move |_| {
            let portfolio = if refreshes.fetch_add(1, Ordering::SeqCst) == 0 {
                over_ceiling()
            } else {
                Portfolio {
                    equity: 1_000_000.0,
                    init_req: 100_000.0,
                    ..Default::default()
                }
            };
            store.set_portfolio(portfolio);
        });

        let outcome = derisk::run(engine.risk.config(), engine.view(), &*engine).unwrap();
        assert!(matches!(outcome, DeRiskOutcome::Resolved(ref steps) if steps.len() == 1));

        let sent = transport.sent();
        let close = sent.iter().find(|c| c.contains("\"neworder\"")).unwrap();
        assert!(close.contains("<seccode>BRX6</seccode>"));
        assert!(close.contains("<buysell>S</buysell>"));
        assert!(close.contains("<bymarket/>"));
        let order = engine.store.order(100).unwrap();
        assert_eq!(order.sender, SYSTEM_SENDER);
        assert_eq!(order.quantity, 3);
    }

    #[test]
    fn test_deactivation_stops_recalculation() {
        let transport = ScriptedTransport::new();
        let engine = test_engine(engine_config(vec![tool_config("Si", "SiZ6", &["s"])]), transport.clone());
        let tool = engine.store.tool("Si").unwrap();
        engine.deactivate_tool(&tool, "test").unwrap();
        assert!(!engine.store.tool("Si").unwrap().active);
        assert_eq!(
            engine.recalculate_tool("Si").unwrap(),
            tool::ToolOutcome::Inactive
        );
    }
}
