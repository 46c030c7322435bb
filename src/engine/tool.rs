//! One tool's recalculation cycle

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::Engine;
use crate::core::{Error, Price, Result, SYSTEM_SENDER, Seccode, Side};
use crate::execution::{NOTE_NORMALIZATION, NOTE_PART_EX, NOTE_SIGNAL, OrderRequest, ReplaceOutcome};
use crate::notify::EngineEvent;
use crate::risk::{Assessment, Normalization, RiskBreach, RiskInputs};
use crate::state::models::{Order, Security};
use crate::state::tool::{StrategySlot, Tool};

/// How long a recalculation waits for another one on the same instrument.
pub const GUARD_WAIT: Duration = Duration::from_millis(300);

/// Per-instrument mutual exclusion with a bounded acquire.
#[derive(Default)]
pub struct InstrumentGuards {
    locks: Mutex<HashMap<Seccode, Arc<Mutex<()>>>>,
}

impl InstrumentGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` holding the instrument's guard, or return `None` if it stays
    /// taken for `wait`.
    pub fn with_instrument<R>(&self, seccode: &Seccode, wait: Duration, f: impl FnOnce() -> R) -> Option<R> {
        let lock = self.locks.lock().entry(seccode.clone()).or_default().clone();
        let _held = lock.try_lock_for(wait)?;
        Some(f())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Actions {
    pub placed: usize,
    pub cancelled: usize,
    pub replaced: usize,
    pub normalization: Option<Normalization>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Inactive,
    /// Another recalculation holds the instrument
    Busy,
    NotReady(Vec<RiskBreach>),
    Done(Actions),
}

impl Engine {
    pub fn recalculate_tool(&self, name: &str) -> Result<ToolOutcome> {
        let tool = self
            .store
            .tool(name)
            .ok_or_else(|| Error::InvalidState(format!("unknown tool {}", name)))?;
        if !tool.active {
            return Ok(ToolOutcome::Inactive);
        }
        match self
            .guards
            .with_instrument(&tool.seccode, GUARD_WAIT, || self.recalculate_locked(name))
        {
            Some(outcome) => outcome,
            None => {
                debug!(tool = name, "instrument busy, cycle skipped");
                Ok(ToolOutcome::Busy)
            }
        }
    }

    fn recalculate_locked(&self, name: &str) -> Result<ToolOutcome> {
        let seccode = match self.store.tool(name) {
            Some(tool) => tool.seccode,
            None => return Ok(ToolOutcome::Inactive),
        };
        self.orders.wait_uncertainty(&seccode);

        let Some(tool) = self.store.tool(name).filter(|t| t.active) else {
            return Ok(ToolOutcome::Inactive);
        };
        let now = self.clock.now();
        let inputs = RiskInputs::gather(&self.store, &tool);
        let assessment = self.risk.assess(&tool, &inputs, now);
        let link_ready = self.monitor.is_link_ready();
        let ready = assessment.ready() && link_ready;

        let was_ready = self
            .store
            .with_tool_mut(name, |t| {
                t.long_volume = assessment.long_volume;
                t.short_volume = assessment.short_volume;
                t.deviation_since = assessment.deviation_since;
                std::mem::replace(&mut t.ready_to_trade, ready)
            })
            .unwrap_or(false);
        if was_ready != ready {
            self.readiness_changed(name, ready, &assessment, link_ready);
        }
        if !ready {
            return Ok(ToolOutcome::NotReady(assessment.blockers));
        }
        let Some(security) = inputs.security else {
            return Ok(ToolOutcome::NotReady(vec![RiskBreach::UnknownSecurity(seccode)]));
        };

        let mut actions = Actions::default();
        let targets = self.slot_targets(&tool, &security, &assessment);
        for (slot, target) in tool.strategies.iter().zip(targets) {
            let Some(target) = target else {
                continue;
            };
            self.drive_slot(&tool, slot, target, &security, &mut actions)?;
        }
        self.normalize(name, &security, &mut actions)?;
        Ok(ToolOutcome::Done(actions))
    }

    fn readiness_changed(&self, name: &str, ready: bool, assessment: &Assessment, link_ready: bool) {
        let reason = if ready {
            "conditions cleared".to_string()
        } else if !link_ready && assessment.ready() {
            "venue link not ready".to_string()
        } else {
            assessment
                .blockers
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        };
        let text = format!("{}: {} ({})", name, if ready { "ready to trade" } else { "not ready to trade" }, reason);
        if ready {
            info!("{}", text);
        } else {
            warn!("{}", text);
        }
        self.store.events().publish(EngineEvent::ReadinessChanged { ready, reason: text.clone() });
        self.notifier.notify(&text, !ready);
    }

    /// Signed target per slot; `None` leaves the slot alone this cycle.
    fn slot_targets(&self, tool: &Tool, security: &Security, assessment: &Assessment) -> Vec<Option<i64>> {
        let longs = tool.split_volume(assessment.long_volume);
        let shorts = tool.split_volume(assessment.short_volume);

        let mut targets = Vec::with_capacity(tool.strategies.len());
        for (i, slot) in tool.strategies.iter().enumerate() {
            let Some(strategy) = self.strategies.get(&(tool.name.clone(), slot.name.clone())) else {
                warn!(tool = %tool.name, slot = %slot.name, "no strategy instance");
                targets.push(None);
                continue;
            };
            let bars = security.bars.compress(slot.timeframe);
            let signal = if bars.len() < strategy.warmup() {
                debug!(slot = %slot.name, bars = bars.len(), need = strategy.warmup(), "not enough bars");
                None
            } else {
                match strategy.calculate(&bars) {
                    Ok(calc) => {
                        let trend = calc.last_trend();
                        self.store.with_tool_mut(&tool.name, |t| {
                            if let Some(s) = t.strategy_mut(&slot.name) {
                                s.last_signal = trend;
                                s.last_bar_time = calc.last_bar_time;
                            }
                        });
                        trend
                    }
                    Err(e) => {
                        warn!(slot = %slot.name, "calculation failed: {}", e);
                        targets.push(None);
                        continue;
                    }
                }
            };

            let target = match signal {
                _ if tool.stop_trading => 0,
                Some(true) => longs[i],
                Some(false) => -shorts[i],
                None => 0,
            };
            self.store.with_tool_mut(&tool.name, |t| {
                if let Some(s) = t.strategy_mut(&slot.name) {
                    s.target = target;
                }
            });
            targets.push(Some(target));
        }
        targets
    }

    /// Move one slot toward its target: cancel wrong-side orders, reprice
    /// drifted ones, or place a new limit order.
    ///
    /// Fills the venue has reported on this session's orders but whose trades
    /// have not been attributed yet count toward the slot's position.
    fn drive_slot(
        &self,
        tool: &Tool,
        slot: &StrategySlot,
        target: i64,
        security: &Security,
        actions: &mut Actions,
    ) -> Result<()> {
        let session = self.store.session();
        let owned: Vec<Order> = self
            .store
            .orders()
            .into_iter()
            .filter(|o| o.sender == slot.name && o.seccode == tool.seccode)
            .collect();
        let in_flight: i64 = owned
            .iter()
            .filter(|o| o.status.is_live() || o.seen_session == session)
            .map(|o| o.side.sign() * slot.unattributed_fill(o))
            .sum();
        let delta = target - (slot.position() + in_flight);
        let side = Side::for_delta(delta);
        let live: Vec<Order> = owned.into_iter().filter(|o| o.status.is_live()).collect();

        if let Some((working, extra)) = live.split_first() {
            for order in extra {
                self.orders.cancel(order.transaction_id)?;
                actions.cancelled += 1;
            }
            if working.status.is_uncertain() {
                debug!(trid = working.transaction_id, "order unconfirmed, waiting");
                return Ok(());
            }
            let Some(side) = side.filter(|s| *s == working.side) else {
                info!(trid = working.transaction_id, slot = %slot.name, target, "order no longer wanted");
                self.orders.cancel(working.transaction_id)?;
                actions.cancelled += 1;
                return Ok(());
            };
            let Some(price) = limit_price(security, side, tool.slippage_ticks) else {
                return Ok(());
            };
            let drifted = ticks_between(working.price, price, security.min_step) > tool.reprice_ticks;
            if !drifted && working.note_has(NOTE_PART_EX) && slot.unattributed_fill(working) > 0 {
                debug!(trid = working.transaction_id, "partial fill awaiting its trades");
                return Ok(());
            }
            if drifted || working.balance != delta.abs() {
                match self.orders.replace(working.transaction_id, Some(price), delta.abs())? {
                    ReplaceOutcome::Replaced(_) => actions.replaced += 1,
                    ReplaceOutcome::Filled => debug!(trid = working.transaction_id, "filled before replace"),
                    ReplaceOutcome::Unconfirmed => warn!(trid = working.transaction_id, "replace left unconfirmed"),
                }
            }
            return Ok(());
        }

        let Some(side) = side else {
            return Ok(());
        };
        let Some(price) = limit_price(security, side, tool.slippage_ticks) else {
            warn!(tool = %tool.name, "no price to place at");
            return Ok(());
        };
        self.orders.place(OrderRequest {
            seccode: tool.seccode.clone(),
            board: tool.board.clone(),
            side,
            price: Some(price),
            quantity: delta.abs(),
            sender: slot.name.clone(),
            signal: if side == Side::Buy { "Long" } else { "Short" }.to_string(),
            note: NOTE_SIGNAL.to_string(),
            condition: None,
        })?;
        actions.placed += 1;
        Ok(())
    }

    fn normalize(&self, name: &str, security: &Security, actions: &mut Actions) -> Result<()> {
        let Some(tool) = self.store.tool(name) else {
            return Ok(());
        };
        let saldo = self.store.saldo(&tool.seccode);
        let live = self.store.live_orders_for(&tool.seccode);
        let now = self.clock.now();
        let plan = self.risk.normalization(&tool, saldo, &live, now);

        match &plan {
            Normalization::InSync => {
                self.store.with_tool_mut(name, |t| t.normalization_since = None);
            }
            Normalization::Observed { gap } => {
                info!(tool = name, gap, saldo, "position gap observed");
                self.store.with_tool_mut(name, |t| t.normalization_since = Some(now));
            }
            Normalization::Waiting { gap } => {
                debug!(tool = name, gap, "gap pending, orders working");
            }
            Normalization::Correct {
                side,
                quantity,
                by_market,
            } => {
                let price = if *by_market {
                    None
                } else {
                    limit_price(security, *side, tool.slippage_ticks)
                };
                warn!(tool = name, %side, quantity, by_market, "normalizing position");
                self.orders.place(OrderRequest {
                    seccode: tool.seccode.clone(),
                    board: tool.board.clone(),
                    side: *side,
                    price,
                    quantity: *quantity,
                    sender: SYSTEM_SENDER.to_string(),
                    signal: String::new(),
                    note: NOTE_NORMALIZATION.to_string(),
                    condition: None,
                })?;
            }
        }
        actions.normalization = Some(plan);
        Ok(())
    }
}

/// Last price shifted `ticks` against us.
fn limit_price(security: &Security, side: Side, ticks: i64) -> Option<Price> {
    let last = security
        .last_price
        .filter(|p| !p.is_zero())
        .or_else(|| security.bars.last_close().map(Price::from_f64))?;
    Some(last.offset_ticks(security.min_step, side.sign() * ticks))
}

fn ticks_between(a: Price, b: Price, tick: Decimal) -> i64 {
    if tick <= Decimal::ZERO {
        return 0;
    }
    let ticks = ((a.as_decimal() - b.as_decimal()).abs() / tick).floor();
    i64::try_from(ticks).unwrap_or(i64::MAX)
}
