//! Execution layer - order lifecycle
//!
//! Submission, cancellation and replacement against the venue, plus the
//! bounded confirmation polls around them. Venue `orders` events remain the
//! only source of status transitions, except the forced cancel on an
//! "invalid parameter value" rejection and `Lost`.

pub mod attribution;

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::config::AccountConfig;
use crate::core::{Error, OrderStatus, Price, Result, Seccode, Side};
use crate::notify::Notifier;
use crate::protocol::ProtocolClient;
use crate::protocol::commands::{Command, NewOrder};
use crate::state::StateStore;
use crate::state::models::{Condition, Order};

/// Partial fill in progress
pub const NOTE_PART_EX: &str = "PartEx";
/// Corrective order from balance normalization
pub const NOTE_NORMALIZATION: &str = "NM";
/// Order placed on a strategy signal
pub const NOTE_SIGNAL: &str = "Signal";

/// Rejection text meaning the order is no longer live on the venue.
const INVALID_PARAMETER: &str = "invalid parameter value";

const fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Waits for `forwarding`/`inactive` orders to resolve.
pub const UNCERTAINTY_LADDER: [Duration; 3] = [ms(500), ms(1000), ms(1500)];
/// Status polls after the cancel half of a replace.
pub const REPLACE_LADDER: [Duration; 3] = [ms(150), ms(350), ms(2500)];
/// Retries of "cancel everything on this instrument".
pub const CANCEL_ALL_LADDER: [Duration; 4] = [ms(500), ms(1000), ms(1500), ms(2000)];

/// Confirmation poll intervals.
#[derive(Debug, Clone)]
pub struct Ladders {
    pub uncertainty: Vec<Duration>,
    pub replace: Vec<Duration>,
    pub cancel_all: Vec<Duration>,
}

impl Default for Ladders {
    fn default() -> Self {
        Self {
            uncertainty: UNCERTAINTY_LADDER.to_vec(),
            replace: REPLACE_LADDER.to_vec(),
            cancel_all: CANCEL_ALL_LADDER.to_vec(),
        }
    }
}

impl Ladders {
    /// Every interval divided by `divisor`.
    pub fn scaled_down(&self, divisor: u32) -> Self {
        let scale = |v: &Vec<Duration>| v.iter().map(|d| *d / divisor).collect();
        Self {
            uncertainty: scale(&self.uncertainty),
            replace: scale(&self.replace),
            cancel_all: scale(&self.cancel_all),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub seccode: Seccode,
    pub board: String,
    pub side: Side,
    /// `None` for a market order
    pub price: Option<Price>,
    pub quantity: i64,
    pub sender: String,
    pub signal: String,
    pub note: String,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Requested,
    /// Venue said the order is gone; marked cancelled locally
    ForcedCancelled,
    AlreadyFinal(OrderStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplaceOutcome {
    Replaced(Order),
    /// The original filled first; nothing new was sent
    Filled,
    /// Cancel never confirmed; the original may still be live
    Unconfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uncertainty {
    Clear,
    Resolved { polls: usize },
    Unresolved,
}

pub struct OrderLifecycleManager {
    client: Arc<ProtocolClient>,
    store: Arc<StateStore>,
    account: AccountConfig,
    ladders: Ladders,
    notifier: Arc<dyn Notifier>,
}

impl OrderLifecycleManager {
    pub fn new(
        client: Arc<ProtocolClient>,
        store: Arc<StateStore>,
        account: AccountConfig,
        ladders: Ladders,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            client,
            store,
            account,
            ladders,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Submit an order and record it as `forwarding` until the venue reports it.
    pub fn place(&self, req: OrderRequest) -> Result<Order> {
        if req.quantity <= 0 {
            return Err(Error::InvalidState(format!(
                "{}: refusing order for {} lots",
                req.seccode, req.quantity
            )));
        }
        let (tick, decimals) = self
            .store
            .with_security(&req.seccode, |s| (s.min_step, s.decimals))
            .unwrap_or_else(|| {
                let scale = req.price.map(|p| p.as_decimal().scale()).unwrap_or(0);
                (Decimal::ZERO, scale)
            });

        let command = Command::NewOrder(NewOrder {
            seccode: req.seccode.clone(),
            board: req.board.clone(),
            client: self.account.client.clone(),
            union: self.account.union.clone(),
            side: req.side,
            price: req.price,
            quantity: req.quantity,
            tick,
            decimals,
            condition: req.condition.clone(),
            brokerref: req.sender.clone(),
            use_credit: false,
        });
        let reply = self.client.send(&command)?.into_result(command.verb())?;
        let trid = reply
            .transaction_id
            .ok_or_else(|| Error::Protocol(format!("{} reply carried no transactionid", command.verb())))?;

        let order = Order {
            transaction_id: trid,
            order_no: 0,
            seccode: req.seccode,
            board: req.board,
            client: self.account.client.clone(),
            union: self.account.union.clone(),
            status: OrderStatus::Forwarding,
            side: req.side,
            price: req.price.unwrap_or(Price::ZERO),
            quantity: req.quantity,
            balance: req.quantity,
            by_market: req.price.is_none(),
            registered: None,
            withdrawn: None,
            condition: req.condition,
            sender: req.sender,
            signal: req.signal,
            note: req.note,
            result: String::new(),
            seen_session: self.store.session(),
        };
        info!(
            trid,
            seccode = %order.seccode,
            side = %order.side,
            qty = order.quantity,
            price = %order.price,
            sender = %order.sender,
            "order submitted"
        );
        let recorded = self.store.insert_local_order(order);
        attribution::sync_order_view(&self.store, &recorded);
        Ok(recorded)
    }

    pub fn cancel(&self, trid: i64) -> Result<CancelOutcome> {
        let order = self
            .store
            .order(trid)
            .ok_or_else(|| Error::InvalidState(format!("cancel: unknown transaction id {}", trid)))?;
        if !order.status.is_live() {
            return Ok(CancelOutcome::AlreadyFinal(order.status));
        }

        let reply = self.client.send(&Command::CancelOrder { transaction_id: trid })?;
        if reply.success {
            debug!(trid, "cancel requested");
            return Ok(CancelOutcome::Requested);
        }
        if reply.mentions(INVALID_PARAMETER) {
            warn!(trid, "cancel rejected as '{}'; order is no longer live", reply.message);
            if let Some(updated) = self.store.update_order(trid, |o| {
                o.status = OrderStatus::Cancelled;
                o.result = reply.message.clone();
            }) {
                attribution::sync_order_view(&self.store, &updated);
            }
            return Ok(CancelOutcome::ForcedCancelled);
        }
        Err(Error::Trading(format!("cancel {} rejected: {}", trid, reply.message)))
    }

    /// Cancel then re-place with new price/quantity on the same side.
    ///
    /// The new order is only sent once the original is seen in a final,
    /// unfilled state, so the two are never live together.
    pub fn replace(&self, trid: i64, price: Option<Price>, quantity: i64) -> Result<ReplaceOutcome> {
        let original = self
            .store
            .order(trid)
            .ok_or_else(|| Error::InvalidState(format!("replace: unknown transaction id {}", trid)))?;
        let filled_before = original.filled();

        if let CancelOutcome::AlreadyFinal(status) = self.cancel(trid)? {
            if status == OrderStatus::Matched {
                return Ok(ReplaceOutcome::Filled);
            }
        }

        let mut settled = None;
        for step in &self.ladders.replace {
            std::thread::sleep(*step);
            let Some(current) = self.store.order(trid) else {
                break;
            };
            match current.status {
                OrderStatus::Matched => {
                    info!(trid, "filled while being replaced; not re-placing");
                    return Ok(ReplaceOutcome::Filled);
                }
                OrderStatus::Lost => break,
                status if status.is_terminal() => {
                    settled = Some(current);
                    break;
                }
                _ => {}
            }
        }

        let Some(current) = settled else {
            warn!(trid, "cancel not confirmed; replacement withheld");
            return Ok(ReplaceOutcome::Unconfirmed);
        };

        let remaining = quantity - (current.filled() - filled_before).max(0);
        if remaining <= 0 {
            return Ok(ReplaceOutcome::Filled);
        }
        let replacement = self.place(OrderRequest {
            seccode: current.seccode.clone(),
            board: current.board.clone(),
            side: current.side,
            price,
            quantity: remaining,
            sender: current.sender.clone(),
            signal: current.signal.clone(),
            note: current
                .note
                .split_whitespace()
                .filter(|tag| *tag != NOTE_PART_EX)
                .collect::<Vec<_>>()
                .join(" "),
            condition: None,
        })?;
        Ok(ReplaceOutcome::Replaced(replacement))
    }

    /// Give uncertain orders on `seccode` a bounded chance to resolve.
    pub fn wait_uncertainty(&self, seccode: &Seccode) -> Uncertainty {
        if !self.store.has_uncertain_orders(seccode) {
            return Uncertainty::Clear;
        }
        for (i, step) in self.ladders.uncertainty.iter().enumerate() {
            std::thread::sleep(*step);
            if !self.store.has_uncertain_orders(seccode) {
                return Uncertainty::Resolved { polls: i + 1 };
            }
        }
        warn!(%seccode, "orders still uncertain after wait; proceeding");
        Uncertainty::Unresolved
    }

    /// Cancel every live order on `seccode`. An error tells the caller to
    /// abandon this cycle.
    pub fn cancel_all(&self, seccode: &Seccode) -> Result<()> {
        for step in &self.ladders.cancel_all {
            let live = self.store.live_orders_for(seccode);
            if live.is_empty() {
                return Ok(());
            }
            for order in &live {
                if let Err(e) = self.cancel(order.transaction_id) {
                    warn!(trid = order.transaction_id, "cancel failed: {}", e);
                }
            }
            std::thread::sleep(*step);
        }
        let left = self.store.live_orders_for(seccode).len();
        if left == 0 {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{}: {} orders still live after cancel retries",
                seccode, left
            )))
        }
    }

    /// Orders thought live but absent from the current session's snapshot.
    pub fn mark_lost(&self) -> Vec<Order> {
        let session = self.store.session();
        let stale: Vec<(i64, i64)> = self
            .store
            .orders()
            .iter()
            .filter(|o| o.status.is_live() && o.seen_session < session)
            .map(|o| (o.transaction_id, o.order_no))
            .collect();

        let mut lost = Vec::new();
        for (trid, order_no) in stale {
            let set_lost = |o: &mut Order| o.status = OrderStatus::Lost;
            let updated = if order_no != 0 {
                self.store.update_order_by_no(order_no, set_lost)
            } else {
                self.store.update_order(trid, set_lost)
            };
            if let Some(order) = updated {
                attribution::sync_order_view(&self.store, &order);
                lost.push(order);
            }
        }
        if !lost.is_empty() {
            let text = format!(
                "{} orders missing from the venue snapshot marked lost: {:?}",
                lost.len(),
                lost.iter().map(|o| o.transaction_id).collect::<Vec<_>>()
            );
            warn!("{}", text);
            self.notifier.notify(&text, true);
        }
        lost
    }
}
