//! State store - the authoritative picture of the account
//!
//! Owns the canonical orders, trades, positions, portfolio, securities and
//! tools. The inbound worker mutates it with venue-sourced truth; the
//! lifecycle manager and risk engine add optimistic records for commands
//! they issue. Readers get clones and must re-validate before acting.

pub mod bars;
pub mod models;
pub mod tool;

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::{Seccode, VenueTime};
use crate::notify::{EngineEvent, EventBus, Snapshot};
use bars::{Bars, MergeKind};
use models::*;
use tool::Tool;

/// Samples kept for the equity average.
const EQUITY_HISTORY_LEN: usize = 20;

/// Outcome of merging one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

pub struct StateStore {
    orders: RwLock<Vec<Order>>,
    trades: RwLock<Vec<Trade>>,
    positions: RwLock<Vec<Position>>,
    money: RwLock<Vec<MoneyPosition>>,
    united_limits: RwLock<Option<UnitedLimits>>,
    portfolio: RwLock<Portfolio>,
    equity_history: RwLock<VecDeque<f64>>,
    securities: RwLock<HashMap<Seccode, Security>>,
    tools: RwLock<Vec<Tool>>,
    clients: RwLock<Vec<ClientAccount>>,
    markets: RwLock<HashMap<u32, String>>,
    candle_kinds: RwLock<Vec<CandleKind>>,
    messages: RwLock<Vec<VenueMessage>>,
    session: AtomicU64,
    base_currency: String,
    currency_sources: HashMap<String, Seccode>,
    events: Arc<EventBus>,
}

impl StateStore {
    pub fn new(events: Arc<EventBus>, base_currency: &str, currency_sources: &HashMap<String, String>) -> Self {
        Self {
            orders: RwLock::new(Vec::new()),
            trades: RwLock::new(Vec::new()),
            positions: RwLock::new(Vec::new()),
            money: RwLock::new(Vec::new()),
            united_limits: RwLock::new(None),
            portfolio: RwLock::new(Portfolio::default()),
            equity_history: RwLock::new(VecDeque::with_capacity(EQUITY_HISTORY_LEN)),
            securities: RwLock::new(HashMap::new()),
            tools: RwLock::new(Vec::new()),
            clients: RwLock::new(Vec::new()),
            markets: RwLock::new(HashMap::new()),
            candle_kinds: RwLock::new(Vec::new()),
            messages: RwLock::new(Vec::new()),
            session: AtomicU64::new(0),
            base_currency: base_currency.to_string(),
            currency_sources: currency_sources
                .iter()
                .map(|(k, v)| (k.clone(), Seccode::new(v)))
                .collect(),
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    // ---- sessions ----

    /// Start a new connection session; returns its id.
    pub fn begin_session(&self) -> u64 {
        self.session.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    // ---- orders ----

    /// Merge a venue-reported order.
    ///
    /// A non-zero order number that matches an existing record wins: the
    /// incoming transaction id is reassigned onto that record and any
    /// placeholder holding the same transaction id is folded into it.
    /// Otherwise the record with the same transaction id is updated. A
    /// non-zero order number is never overwritten.
    pub fn upsert_order(&self, mut incoming: Order) -> (Upsert, Order) {
        incoming.seen_session = self.session();
        let mut orders = self.orders.write();

        let by_no = (incoming.order_no != 0)
            .then(|| orders.iter().position(|o| o.order_no == incoming.order_no))
            .flatten();
        let by_trid = orders.iter().position(|o| {
            o.transaction_id == incoming.transaction_id
                && incoming.transaction_id != 0
                && (o.order_no == 0 || o.order_no == incoming.order_no || incoming.order_no == 0)
        });

        let (outcome, merged) = match (by_no, by_trid) {
            (Some(i), placeholder) => {
                // Fold the placeholder's routing tags into the numbered record
                let mut tags = None;
                if let Some(j) = placeholder.filter(|j| *j != i) {
                    let removed = orders.remove(j);
                    tags = Some((removed.sender, removed.signal, removed.note));
                }
                let i = if matches!(placeholder, Some(j) if j < i) { i - 1 } else { i };
                let existing = &mut orders[i];
                let before = existing.clone();
                if let Some((sender, signal, note)) = tags {
                    adopt_tags(existing, &sender, &signal, &note);
                }
                if existing.transaction_id != incoming.transaction_id && incoming.transaction_id != 0 {
                    debug!(
                        order_no = existing.order_no,
                        old = existing.transaction_id,
                        new = incoming.transaction_id,
                        "transaction id reassigned onto existing order"
                    );
                    existing.transaction_id = incoming.transaction_id;
                }
                merge_fields(existing, &incoming);
                let outcome = if *existing == before { Upsert::Unchanged } else { Upsert::Updated };
                (outcome, existing.clone())
            }
            (None, Some(i)) => {
                let existing = &mut orders[i];
                let before = existing.clone();
                if existing.order_no == 0 && incoming.order_no != 0 {
                    existing.order_no = incoming.order_no;
                }
                merge_fields(existing, &incoming);
                let outcome = if *existing == before { Upsert::Unchanged } else { Upsert::Updated };
                (outcome, existing.clone())
            }
            (None, None) => {
                orders.push(incoming.clone());
                (Upsert::Inserted, incoming)
            }
        };
        drop(orders);

        if outcome != Upsert::Unchanged {
            self.events.publish(EngineEvent::OrderChanged(merged.clone()));
        }
        (outcome, merged)
    }

    /// Record an order this engine just submitted. If the venue already
    /// reported this transaction id in the current session, the submission's
    /// routing tags fill that record instead.
    pub fn insert_local_order(&self, order: Order) -> Order {
        let session = self.session();
        let mut orders = self.orders.write();
        let recorded = match orders
            .iter_mut()
            .find(|o| o.transaction_id == order.transaction_id && o.seen_session == session)
        {
            Some(existing) => {
                adopt_tags(existing, &order.sender, &order.signal, &order.note);
                existing.clone()
            }
            None => {
                orders.push(order.clone());
                order
            }
        };
        drop(orders);
        self.events.publish(EngineEvent::OrderChanged(recorded.clone()));
        recorded
    }

    /// Apply a local mutation to the order with this transaction id.
    pub fn update_order<F>(&self, trid: i64, f: F) -> Option<Order>
    where
        F: FnOnce(&mut Order),
    {
        self.update_order_where(|o| o.transaction_id == trid, f)
    }

    /// Same, keyed by venue order number. Transaction ids repeat across
    /// sessions; order numbers do not.
    pub fn update_order_by_no<F>(&self, order_no: i64, f: F) -> Option<Order>
    where
        F: FnOnce(&mut Order),
    {
        if order_no == 0 {
            return None;
        }
        self.update_order_where(|o| o.order_no == order_no, f)
    }

    /// Mutate the latest order matching `pred`.
    fn update_order_where<P, F>(&self, pred: P, f: F) -> Option<Order>
    where
        P: Fn(&Order) -> bool,
        F: FnOnce(&mut Order),
    {
        let mut orders = self.orders.write();
        let order = orders.iter_mut().rev().find(|o| pred(o))?;
        let before = order.clone();
        f(order);
        let after = order.clone();
        drop(orders);
        if after != before {
            self.events.publish(EngineEvent::OrderChanged(after.clone()));
        }
        Some(after)
    }

    pub fn order(&self, trid: i64) -> Option<Order> {
        self.orders.read().iter().rev().find(|o| o.transaction_id == trid).cloned()
    }

    pub fn order_by_no(&self, order_no: i64) -> Option<Order> {
        if order_no == 0 {
            return None;
        }
        self.orders.read().iter().find(|o| o.order_no == order_no).cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.read().clone()
    }

    pub fn live_orders_for(&self, seccode: &Seccode) -> Vec<Order> {
        self.orders
            .read()
            .iter()
            .filter(|o| &o.seccode == seccode && o.status.is_live())
            .cloned()
            .collect()
    }

    pub fn has_uncertain_orders(&self, seccode: &Seccode) -> bool {
        self.orders
            .read()
            .iter()
            .any(|o| &o.seccode == seccode && o.status.is_uncertain())
    }

    // ---- trades ----

    /// Add a trade; a trade number seen before is ignored.
    pub fn add_trade(&self, trade: Trade) -> bool {
        let mut trades = self.trades.write();
        if trades.iter().any(|t| t.trade_no == trade.trade_no) {
            return false;
        }
        trades.push(trade.clone());
        drop(trades);
        self.events.publish(EngineEvent::TradeAdded(trade));
        true
    }

    pub fn update_trade<F>(&self, trade_no: i64, f: F) -> Option<Trade>
    where
        F: FnOnce(&mut Trade),
    {
        let mut trades = self.trades.write();
        let trade = trades.iter_mut().find(|t| t.trade_no == trade_no)?;
        f(trade);
        Some(trade.clone())
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.trades.read().clone()
    }

    pub fn trades_for_order(&self, order_no: i64) -> Vec<Trade> {
        self.trades
            .read()
            .iter()
            .filter(|t| t.order_no == order_no)
            .cloned()
            .collect()
    }

    // ---- positions ----

    pub fn set_position(&self, position: Position) -> Upsert {
        let mut positions = self.positions.write();
        let slot = positions.iter_mut().find(|p| {
            p.seccode == position.seccode && p.kind == position.kind && p.client == position.client
        });
        let outcome = match slot {
            Some(existing) if *existing == position => Upsert::Unchanged,
            Some(existing) => {
                *existing = position.clone();
                Upsert::Updated
            }
            None => {
                positions.push(position.clone());
                Upsert::Inserted
            }
        };
        drop(positions);
        if outcome != Upsert::Unchanged {
            self.events.publish(EngineEvent::PositionChanged(position));
        }
        outcome
    }

    /// Venue-reported signed quantity; zero when nothing is held.
    pub fn saldo(&self, seccode: &Seccode) -> i64 {
        self.positions
            .read()
            .iter()
            .filter(|p| &p.seccode == seccode)
            .map(|p| p.saldo)
            .sum()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.read().clone()
    }

    pub fn set_money_position(&self, money: MoneyPosition) {
        let mut all = self.money.write();
        match all.iter_mut().find(|m| m.asset == money.asset && m.client == money.client) {
            Some(existing) => *existing = money,
            None => all.push(money),
        }
    }

    pub fn money_positions(&self) -> Vec<MoneyPosition> {
        self.money.read().clone()
    }

    pub fn set_united_limits(&self, limits: UnitedLimits) {
        *self.united_limits.write() = Some(limits);
    }

    pub fn united_limits(&self) -> Option<UnitedLimits> {
        self.united_limits.read().clone()
    }

    // ---- portfolio ----

    /// Replace the portfolio wholesale.
    pub fn set_portfolio(&self, mut portfolio: Portfolio) {
        let mut current = self.portfolio.write();
        portfolio.generation = current.generation + 1;
        let event = EngineEvent::PortfolioChanged {
            equity: portfolio.equity,
            init_req: portfolio.init_req,
        };
        *current = portfolio;
        drop(current);
        self.events.publish(event);
    }

    pub fn portfolio(&self) -> Portfolio {
        self.portfolio.read().clone()
    }

    pub fn portfolio_generation(&self) -> u64 {
        self.portfolio.read().generation
    }

    pub fn record_equity_sample(&self, equity: f64) {
        if equity <= 0.0 {
            return;
        }
        let mut history = self.equity_history.write();
        if history.len() == EQUITY_HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(equity);
    }

    pub fn equity_average(&self) -> Option<f64> {
        let history = self.equity_history.read();
        if history.is_empty() {
            return None;
        }
        Some(history.iter().sum::<f64>() / history.len() as f64)
    }

    pub fn load_equity_history(&self, samples: &[f64]) {
        let mut history = self.equity_history.write();
        history.clear();
        let skip = samples.len().saturating_sub(EQUITY_HISTORY_LEN);
        history.extend(samples.iter().skip(skip).copied());
    }

    // ---- securities ----

    /// Mutate a security, creating it on first mention.
    pub fn with_security_mut<R>(&self, seccode: &Seccode, f: impl FnOnce(&mut Security) -> R) -> R {
        let mut secs = self.securities.write();
        let sec = secs
            .entry(seccode.clone())
            .or_insert_with(|| Security::new(seccode.clone()));
        f(sec)
    }

    pub fn with_security<R>(&self, seccode: &Seccode, f: impl FnOnce(&Security) -> R) -> Option<R> {
        self.securities.read().get(seccode).map(f)
    }

    pub fn security(&self, seccode: &Seccode) -> Option<Security> {
        self.securities.read().get(seccode).cloned()
    }

    pub fn security_by_secid(&self, secid: i64) -> Option<Seccode> {
        self.securities
            .read()
            .values()
            .find(|s| s.secid == secid && secid != 0)
            .map(|s| s.seccode.clone())
    }

    pub fn security_codes(&self) -> Vec<Seccode> {
        self.securities.read().keys().cloned().collect()
    }

    /// Merge a historical bar batch into a security's source series.
    pub fn merge_bars(&self, seccode: &Seccode, batch: Bars) -> MergeKind {
        let kind = self.with_security_mut(seccode, |sec| sec.bars.merge(batch));
        if matches!(kind, MergeKind::Initial | MergeKind::Spliced | MergeKind::Replaced) {
            self.events.publish(EngineEvent::BarsUpdated(seccode.clone()));
        }
        kind
    }

    pub fn set_last_trade(&self, seccode: &Seccode, price: crate::core::Price, time: VenueTime) {
        self.with_security_mut(seccode, |sec| {
            if sec.last_trade_time.is_none_or(|t| t <= time) {
                sec.last_price = Some(price);
                sec.last_trade_time = Some(time);
            }
        });
    }

    /// Conversion rate into the base currency, if one is known.
    pub fn currency_rate(&self, currency: &str) -> Option<f64> {
        if currency.is_empty() || currency == self.base_currency || currency == "RUR" {
            return Some(1.0);
        }
        let source = self.currency_sources.get(currency)?;
        self.securities
            .read()
            .get(source)
            .and_then(|s| s.reference_price())
            .filter(|rate| *rate > 0.0)
    }

    /// Recompute requirements of securities whose margin data has been quiet
    /// for `debounce`. Returns how many were recomputed.
    pub fn recompute_due_margins(&self, debounce: Duration) -> usize {
        let due: Vec<(Seccode, String)> = self
            .securities
            .read()
            .values()
            .filter(|s| s.margin_dirty_since.is_some_and(|t| t.elapsed() >= debounce))
            .map(|s| (s.seccode.clone(), s.currency.clone()))
            .collect();
        let mut done = 0;
        for (seccode, currency) in due {
            let Some(rate) = self.currency_rate(&currency) else {
                warn!(%seccode, %currency, "no conversion rate, requirements left stale");
                continue;
            };
            self.with_security_mut(&seccode, |sec| sec.recompute_requirements(rate));
            done += 1;
        }
        done
    }

    /// Drop bars older than `cutoff` everywhere.
    pub fn purge_bars_before(&self, cutoff: VenueTime) {
        for sec in self.securities.write().values_mut() {
            sec.bars.purge_before(cutoff);
        }
    }

    // ---- tools ----

    pub fn set_tools(&self, tools: Vec<Tool>) {
        *self.tools.write() = tools;
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.tools.read().clone()
    }

    pub fn tool(&self, name: &str) -> Option<Tool> {
        self.tools.read().iter().find(|t| t.name == name).cloned()
    }

    pub fn with_tool_mut<R>(&self, name: &str, f: impl FnOnce(&mut Tool) -> R) -> Option<R> {
        self.tools.write().iter_mut().find(|t| t.name == name).map(f)
    }

    pub fn with_tools_mut<R>(&self, f: impl FnOnce(&mut Vec<Tool>) -> R) -> R {
        f(&mut self.tools.write())
    }

    /// Active tool trading this instrument, if any.
    pub fn active_tool_for(&self, seccode: &Seccode) -> Option<Tool> {
        self.tools
            .read()
            .iter()
            .find(|t| t.active && &t.seccode == seccode)
            .cloned()
    }

    // ---- reference data ----

    pub fn upsert_client(&self, client: ClientAccount, remove: bool) {
        let mut clients = self.clients.write();
        clients.retain(|c| c.id != client.id);
        if !remove {
            clients.push(client);
        }
    }

    pub fn clients(&self) -> Vec<ClientAccount> {
        self.clients.read().clone()
    }

    pub fn set_markets(&self, markets: HashMap<u32, String>) {
        *self.markets.write() = markets;
    }

    pub fn market_name(&self, id: u32) -> Option<String> {
        self.markets.read().get(&id).cloned()
    }

    pub fn set_candle_kinds(&self, kinds: Vec<CandleKind>) {
        *self.candle_kinds.write() = kinds;
    }

    /// Candle kind id whose period is `seconds`.
    pub fn candle_kind_for(&self, seconds: u32) -> Option<u32> {
        self.candle_kinds
            .read()
            .iter()
            .find(|k| k.period == seconds)
            .map(|k| k.id)
    }

    /// Seconds per candle of kind `id`.
    pub fn candle_kind_period(&self, id: u32) -> Option<u32> {
        self.candle_kinds.read().iter().find(|k| k.id == id).map(|k| k.period)
    }

    pub fn push_message(&self, message: VenueMessage) {
        self.messages.write().push(message);
    }

    pub fn messages(&self) -> Vec<VenueMessage> {
        self.messages.read().clone()
    }

    // ---- persistence ----

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            orders: self.orders(),
            trades: self.trades(),
            positions: self.positions(),
            portfolio: self.portfolio(),
            tools: self.tools(),
            equity_history: self.equity_history.read().iter().copied().collect(),
        }
    }

    /// Drop terminal orders and trades older than `cutoff`.
    pub fn purge_before(&self, cutoff: VenueTime) {
        self.orders.write().retain(|o| {
            o.status.is_live() || o.registered.is_none_or(|t| t >= cutoff)
        });
        self.trades.write().retain(|t| t.time >= cutoff);
        self.messages.write().retain(|m| m.date.is_none_or(|d| d >= cutoff));
    }
}

fn adopt_tags(order: &mut Order, sender: &str, signal: &str, note: &str) {
    if order.sender.is_empty() && !sender.is_empty() {
        order.sender = sender.to_string();
    }
    if order.signal.is_empty() && !signal.is_empty() {
        order.signal = signal.to_string();
    }
    if order.note.is_empty() && !note.is_empty() {
        order.note = note.to_string();
    }
}

/// Copy venue-sourced fields; routing tags only fill blanks.
fn merge_fields(existing: &mut Order, incoming: &Order) {
    existing.status = incoming.status;
    existing.balance = incoming.balance;
    if incoming.quantity != 0 {
        existing.quantity = incoming.quantity;
    }
    if !incoming.price.is_zero() {
        existing.price = incoming.price;
    }
    if !incoming.seccode.is_empty() {
        existing.seccode = incoming.seccode.clone();
    }
    if !incoming.board.is_empty() {
        existing.board = incoming.board.clone();
    }
    if !incoming.client.is_empty() {
        existing.client = incoming.client.clone();
    }
    if !incoming.union.is_empty() {
        existing.union = incoming.union.clone();
    }
    existing.side = incoming.side;
    if incoming.registered.is_some() {
        existing.registered = incoming.registered;
    }
    if incoming.withdrawn.is_some() {
        existing.withdrawn = incoming.withdrawn;
    }
    if incoming.condition.is_some() {
        existing.condition = incoming.condition.clone();
    }
    if !incoming.result.is_empty() {
        existing.result = incoming.result.clone();
    }
    existing.seen_session = incoming.seen_session;
    adopt_tags(existing, &incoming.sender, &incoming.signal, &incoming.note);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderStatus, Price, Side};

    pub(crate) fn store() -> StateStore {
        StateStore::new(Arc::new(EventBus::new()), "RUB", &HashMap::new())
    }

    fn order(trid: i64, order_no: i64, status: OrderStatus) -> Order {
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

    #[test]
    fn test_order_number_assigned_once() {
        let store = store();
        store.upsert_order(order(10, 0, OrderStatus::Forwarding));
        let (_, merged) = store.upsert_order(order(10, 555, OrderStatus::Active));
        assert_eq!(merged.order_no, 555);
        let (_, merged) = store.upsert_order(order(10, 0, OrderStatus::Active));
        assert_eq!(merged.order_no, 555);
        assert_eq!(store.orders().len(), 1);
    }

    #[test]
    fn test_new_trid_reassigned_onto_numbered_order() {
        let store = store();
        let mut local = order(7, 0, OrderStatus::Forwarding);
        local.sender = "trend".into();
        store.insert_local_order(local);
        store.upsert_order(order(3, 900, OrderStatus::Active));
        // venue reports number 900 under trid 7: the two records fold together
        let (_, merged) = store.upsert_order(order(7, 900, OrderStatus::Active));
        assert_eq!(store.orders().len(), 1);
        assert_eq!(merged.transaction_id, 7);
        assert_eq!(merged.sender, "trend");
    }

    #[test]
    fn test_identical_snapshot_is_idempotent() {
        let store = store();
        let snapshot = vec![order(1, 11, OrderStatus::Active), order(2, 12, OrderStatus::Matched)];
        for o in snapshot.clone() {
            store.upsert_order(o);
        }
        let before = store.orders();
        for o in snapshot {
            assert_eq!(store.upsert_order(o).0, Upsert::Unchanged);
        }
        assert_eq!(store.orders(), before);
    }

    #[test]
    fn test_order_numbers_stay_unique() {
        let store = store();
        store.upsert_order(order(1, 11, OrderStatus::Active));
        store.upsert_order(order(2, 11, OrderStatus::Active));
        store.upsert_order(order(2, 0, OrderStatus::Active));
        let numbered: Vec<i64> = store.orders().iter().map(|o| o.order_no).filter(|n| *n != 0).collect();
        assert_eq!(numbered, vec![11]);
    }

    #[test]
    fn test_duplicate_trade_ignored() {
        let store = store();
        let trade = Trade {
            trade_no: 42,
            order_no: 11,
            seccode: Seccode::new("SiZ6"),
            board: "FUT".into(),
            client: String::new(),
            union: String::new(),
            side: Side::Buy,
            price: Price::from_f64(100.0),
            quantity: 1,
            time: crate::core::parse_venue_time("14.10.2026 10:00:00").unwrap(),
            value: 0.0,
            commission: 0.0,
            sender: String::new(),
            signal: String::new(),
            note: String::new(),
        };
        assert!(store.add_trade(trade.clone()));
        assert!(!store.add_trade(trade));
        assert_eq!(store.trades().len(), 1);
    }

    #[test]
    fn test_portfolio_generation_advances() {
        let store = store();
        store.set_portfolio(Portfolio { equity: 10.0, ..Default::default() });
        store.set_portfolio(Portfolio { equity: 11.0, ..Default::default() });
        assert_eq!(store.portfolio_generation(), 2);
        assert_eq!(store.portfolio().equity, 11.0);
    }

    #[test]
    fn test_currency_rate_from_source_security() {
        let mut sources = HashMap::new();
        sources.insert("USD".to_string(), "USD000UTSTOM".to_string());
        let store = StateStore::new(Arc::new(EventBus::new()), "RUB", &sources);
        assert_eq!(store.currency_rate("RUB"), Some(1.0));
        assert_eq!(store.currency_rate("USD"), None);
        store.set_last_trade(
            &Seccode::new("USD000UTSTOM"),
            Price::from_f64(92.5),
            crate::core::parse_venue_time("14.10.2026 10:00:00").unwrap(),
        );
        assert_eq!(store.currency_rate("USD"), Some(92.5));
    }
}
