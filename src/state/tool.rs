//! Tools: one instrument bound to its strategies and risk settings

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::models::{Order, Trade};
use crate::core::config::{StrategyConfig, ToolConfig};
use crate::core::{Seccode, VenueTime};

/// Orders/trades owned by one strategy. A view onto store records, kept
/// convergent by attribution; never an independent source of truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategySlot {
    pub name: String,
    pub algorithm: String,
    pub timeframe: u32,
    pub params: HashMap<String, f64>,
    pub orders: Vec<Order>,
    pub trades: Vec<Trade>,
    /// Signed target the strategy last computed
    pub target: i64,
    pub last_signal: Option<bool>,
    pub last_bar_time: Option<VenueTime>,
}

impl StrategySlot {
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            name: config.name.clone(),
            algorithm: config.algorithm.clone(),
            timeframe: config.timeframe,
            params: config.params.clone(),
            ..Default::default()
        }
    }

    /// Virtual position: signed sum of attributed fills.
    pub fn position(&self) -> i64 {
        self.trades.iter().map(|t| t.signed_quantity()).sum()
    }

    /// Lots the venue reports filled on `order` that no attributed trade
    /// accounts for yet.
    pub fn unattributed_fill(&self, order: &Order) -> i64 {
        let attributed: i64 = if order.order_no == 0 {
            0
        } else {
            self.trades
                .iter()
                .filter(|t| t.order_no == order.order_no)
                .map(|t| t.quantity)
                .sum()
        };
        (order.filled() - attributed).max(0)
    }

    pub fn live_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.status.is_live())
    }

    pub fn find_order_by_trid(&self, trid: i64) -> Option<&Order> {
        self.orders.iter().find(|o| o.transaction_id == trid)
    }

    pub fn find_order_by_no(&self, order_no: i64) -> Option<&Order> {
        if order_no == 0 {
            return None;
        }
        self.orders.iter().find(|o| o.order_no == order_no)
    }

    /// Insert or refresh the copy of a store order.
    pub fn sync_order(&mut self, order: &Order) {
        let slot = self.orders.iter_mut().find(|o| {
            (order.order_no != 0 && o.order_no == order.order_no) || o.transaction_id == order.transaction_id
        });
        match slot {
            Some(existing) => *existing = order.clone(),
            None => self.orders.push(order.clone()),
        }
    }

    /// Returns `false` if the trade was already held.
    pub fn sync_trade(&mut self, trade: &Trade) -> bool {
        if self.trades.iter().any(|t| t.trade_no == trade.trade_no) {
            return false;
        }
        self.trades.push(trade.clone());
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub seccode: Seccode,
    pub board: String,
    pub market: u32,
    pub share_of_funds: f64,
    pub fixed_lots: Option<i64>,
    pub min_lots: i64,
    pub max_lots: i64,
    pub balance_shift: i64,
    pub stop_trading: bool,
    pub priority: i32,
    pub active: bool,
    pub slippage_ticks: i64,
    pub reprice_ticks: i64,
    pub strategies: Vec<StrategySlot>,

    /// Bounds from the last risk assessment
    pub long_volume: i64,
    pub short_volume: i64,
    pub ready_to_trade: bool,
    /// Position has exceeded its bound since
    pub deviation_since: Option<NaiveDateTime>,
    /// Position gap first observed at
    pub normalization_since: Option<NaiveDateTime>,
}

impl Tool {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            name: config.name.clone(),
            seccode: Seccode::new(&config.seccode),
            board: config.board.clone(),
            market: config.market,
            share_of_funds: config.share_of_funds,
            fixed_lots: config.fixed_lots,
            min_lots: config.min_lots,
            max_lots: config.max_lots,
            balance_shift: config.balance_shift,
            stop_trading: config.stop_trading,
            priority: config.priority,
            active: config.active,
            slippage_ticks: config.slippage_ticks,
            reprice_ticks: config.reprice_ticks,
            strategies: config.strategies.iter().map(StrategySlot::from_config).collect(),
            long_volume: 0,
            short_volume: 0,
            ready_to_trade: false,
            deviation_since: None,
            normalization_since: None,
        }
    }

    pub fn owns_sender(&self, sender: &str) -> bool {
        sender == self.name || self.strategies.iter().any(|s| s.name == sender)
    }

    pub fn strategy_mut(&mut self, name: &str) -> Option<&mut StrategySlot> {
        self.strategies.iter_mut().find(|s| s.name == name)
    }

    /// Position the strategies intend to hold, plus the manual shift.
    pub fn intended_position(&self) -> i64 {
        self.strategies.iter().map(|s| s.position()).sum::<i64>() + self.balance_shift
    }

    /// Split a signed volume between strategies; the first takes the remainder.
    pub fn split_volume(&self, volume: i64) -> Vec<i64> {
        let n = self.strategies.len().max(1) as i64;
        let each = volume / n;
        let mut shares = vec![each; n as usize];
        shares[0] += volume - each * n;
        shares
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_with(n: usize) -> Tool {
        let strategies = (0..n)
            .map(|i| StrategyConfig {
                name: format!("s{}", i),
                algorithm: "trend".into(),
                timeframe: 60,
                params: HashMap::new(),
            })
            .collect();
        Tool::from_config(&ToolConfig {
            name: "Si".into(),
            seccode: "SiZ6".into(),
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
            strategies,
        })
    }

    #[test]
    fn test_split_volume_gives_remainder_to_first() {
        assert_eq!(tool_with(2).split_volume(5), vec![3, 2]);
        assert_eq!(tool_with(2).split_volume(-5), vec![-3, -2]);
        assert_eq!(tool_with(1).split_volume(4), vec![4]);
    }

    #[test]
    fn test_owns_sender() {
        let tool = tool_with(2);
        assert!(tool.owns_sender("s1"));
        assert!(tool.owns_sender("Si"));
        assert!(!tool.owns_sender("System"));
    }

    #[test]
    fn test_unattributed_fill_shrinks_as_trades_arrive() {
        use crate::core::{OrderStatus, Side};
        use crate::testing::{order, trade};

        let mut slot = tool_with(1).strategies.remove(0);
        let mut working = order(7, 700, OrderStatus::Active);
        working.quantity = 3;
        working.balance = 1;
        assert_eq!(slot.unattributed_fill(&working), 2);

        slot.sync_trade(&trade(1, 700, Side::Buy, 1));
        slot.sync_trade(&trade(2, 800, Side::Buy, 5));
        assert_eq!(slot.unattributed_fill(&working), 1);

        slot.sync_trade(&trade(3, 700, Side::Buy, 1));
        assert_eq!(slot.unattributed_fill(&working), 0);
    }
}
