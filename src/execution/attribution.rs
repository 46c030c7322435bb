//! Orphan attribution and strategy-view sync
//!
//! Venue records often arrive without the routing tags the engine set when
//! it placed the order. Tags are recovered from the strategies' own order
//! history, then the store record is copied into the owning strategy's view.

use chrono::Duration;
use tracing::{info, warn};

use super::NOTE_PART_EX;
use crate::core::SYSTEM_SENDER;
use crate::notify::EngineEvent;
use crate::state::StateStore;
use crate::state::models::{Order, Trade};

/// Fills landing this long after the order's registration are flagged.
pub const EXCEPTIONAL_FILL_GATE: Duration = Duration::hours(8);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tags {
    pub sender: String,
    pub signal: String,
    pub note: String,
}

impl Tags {
    fn of_order(order: &Order) -> Self {
        Self {
            sender: order.sender.clone(),
            signal: order.signal.clone(),
            note: order.note.clone(),
        }
    }
}

/// Tags held by the strategy view that placed this order, matched by
/// transaction id first, then order number.
pub fn owner_of_order(store: &StateStore, order: &Order) -> Option<Tags> {
    store.tools().iter().find_map(|tool| {
        tool.strategies.iter().find_map(|slot| {
            let held = slot
                .find_order_by_trid(order.transaction_id)
                .filter(|o| o.order_no == 0 || o.order_no == order.order_no)
                .or_else(|| slot.find_order_by_no(order.order_no))?;
            let mut tags = Tags::of_order(held);
            if tags.sender.is_empty() {
                tags.sender = slot.name.clone();
            }
            Some(tags)
        })
    })
}

/// Tags for a trade, by its order number, from the store or a strategy view.
pub fn owner_of_trade(store: &StateStore, trade: &Trade) -> Option<Tags> {
    if let Some(order) = store.order_by_no(trade.order_no).filter(|o| !o.sender.is_empty()) {
        return Some(Tags::of_order(&order));
    }
    store.tools().iter().find_map(|tool| {
        tool.strategies.iter().find_map(|slot| {
            let held = slot.find_order_by_no(trade.order_no)?;
            let mut tags = Tags::of_order(held);
            if tags.sender.is_empty() {
                tags.sender = slot.name.clone();
            }
            Some(tags)
        })
    })
}

/// Post-merge processing for a venue-reported order.
pub fn on_order(store: &StateStore, mut order: Order, inserted: bool) -> Order {
    let trid = order.transaction_id;

    if order.is_partially_filled() && !order.note_has(NOTE_PART_EX) {
        if let Some(updated) = store.update_order(trid, |o| o.add_note(NOTE_PART_EX)) {
            order = updated;
        }
    }

    if order.sender.is_empty() {
        match owner_of_order(store, &order) {
            Some(tags) => {
                info!(trid, order_no = order.order_no, sender = %tags.sender, "adopted orphan order");
                if let Some(updated) = store.update_order(trid, |o| {
                    o.sender = tags.sender.clone();
                    o.signal = tags.signal.clone();
                    o.note = tags.note.clone();
                }) {
                    order = updated;
                }
            }
            None if inserted && order.status.is_live() => {
                warn!(
                    trid,
                    order_no = order.order_no,
                    seccode = %order.seccode,
                    "live order with no owner; treated as independent risk"
                );
            }
            None => {}
        }
    }

    sync_order_view(store, &order);
    backfill_trades(store, &order);
    order
}

/// Copy a store order into the owning strategy's view.
pub fn sync_order_view(store: &StateStore, order: &Order) {
    if order.sender.is_empty() || order.sender == SYSTEM_SENDER {
        return;
    }
    store.with_tools_mut(|tools| {
        for tool in tools.iter_mut() {
            if let Some(slot) = tool.strategy_mut(&order.sender) {
                slot.sync_order(order);
                return;
            }
        }
    });
}

/// Trades that arrived before their order was attributed.
fn backfill_trades(store: &StateStore, order: &Order) {
    if order.sender.is_empty() || order.order_no == 0 {
        return;
    }
    for trade in store.trades_for_order(order.order_no) {
        if !trade.sender.is_empty() {
            continue;
        }
        if let Some(tagged) = store.update_trade(trade.trade_no, |t| {
            t.sender = order.sender.clone();
            t.signal = order.signal.clone();
            t.note = order.note.clone();
        }) {
            sync_trade_view(store, &tagged);
        }
    }
}

fn sync_trade_view(store: &StateStore, trade: &Trade) -> bool {
    if trade.sender.is_empty() || trade.sender == SYSTEM_SENDER {
        return false;
    }
    store.with_tools_mut(|tools| {
        tools
            .iter_mut()
            .find_map(|tool| tool.strategy_mut(&trade.sender))
            .map(|slot| slot.sync_trade(trade))
            .unwrap_or(false)
    })
}

/// Attribute and store a venue trade. `None` when the trade number was seen before.
pub fn on_trade(store: &StateStore, mut trade: Trade) -> Option<Trade> {
    if trade.sender.is_empty() {
        if let Some(tags) = owner_of_trade(store, &trade) {
            trade.sender = tags.sender;
            trade.signal = tags.signal;
            trade.note = tags.note;
        }
    }

    if let Some(registered) = store.order_by_no(trade.order_no).and_then(|o| o.registered) {
        if trade.time - registered > EXCEPTIONAL_FILL_GATE {
            let text = format!(
                "trade {} on order {} filled {} after registration",
                trade.trade_no,
                trade.order_no,
                trade.time - registered
            );
            warn!("{}", text);
            store.events().publish(EngineEvent::Notice { text, urgent: false });
        }
    }

    if !store.add_trade(trade.clone()) {
        return None;
    }

    if !sync_trade_view(store, &trade) && trade.sender.is_empty() {
        warn!(
            trade_no = trade.trade_no,
            order_no = trade.order_no,
            seccode = %trade.seccode,
            "trade with no owner; treated as independent risk"
        );
    }
    Some(trade)
}
