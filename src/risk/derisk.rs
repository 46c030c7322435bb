//! Portfolio-level de-risking escalation
//!
//! Each step is followed by a fresh portfolio snapshot, and escalation stops
//! as soon as the portfolio is back under its ceilings.

use tracing::{info, warn};

use crate::core::config::RiskConfig;
use crate::core::{Result, Seccode};
use crate::state::models::{Portfolio, Position};
use crate::state::tool::Tool;

/// Portfolio, tools and positions captured together.
#[derive(Debug, Clone, Default)]
pub struct PortfolioView {
    pub portfolio: Portfolio,
    pub tools: Vec<Tool>,
    pub positions: Vec<Position>,
}

impl PortfolioView {
    /// Which portfolio ceiling is broken, if any.
    pub fn breach(&self, config: &RiskConfig) -> Option<String> {
        let init = self.portfolio.share_init_reqs();
        let min = self.portfolio.share_min_reqs();
        if init > config.max_share_init_reqs_portfolio {
            Some(format!(
                "initial requirements {:.1}% over ceiling {:.1}%",
                init, config.max_share_init_reqs_portfolio
            ))
        } else if min > config.max_share_min_reqs_portfolio {
            Some(format!(
                "minimum requirements {:.1}% over ceiling {:.1}%",
                min, config.max_share_min_reqs_portfolio
            ))
        } else {
            None
        }
    }

    /// Open positions no active tool trades.
    pub fn independent_positions(&self) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| p.saldo != 0)
            .filter(|p| !self.tools.iter().any(|t| t.active && t.seccode == p.seccode))
            .cloned()
            .collect()
    }

    /// Initial requirement of a tool's position, % of equity.
    pub fn tool_share(&self, tool: &Tool) -> f64 {
        if self.portfolio.equity <= 0.0 {
            return 0.0;
        }
        let init_req: f64 = self
            .portfolio
            .securities
            .iter()
            .filter(|s| s.seccode == tool.seccode)
            .map(|s| s.init_req)
            .sum();
        init_req / self.portfolio.equity * 100.0
    }

    pub fn saldo(&self, seccode: &Seccode) -> i64 {
        self.positions
            .iter()
            .filter(|p| &p.seccode == seccode)
            .map(|p| p.saldo)
            .sum()
    }
}

/// Side effects the escalation may take.
pub trait DeRiskActions {
    /// Re-request the portfolio and return the new view.
    fn refresh(&self) -> Result<PortfolioView>;
    fn close_position(&self, seccode: &Seccode, saldo: i64) -> Result<()>;
    /// Trade a tool's position down to `target` signed lots.
    fn shrink_tool(&self, tool: &Tool, target: i64) -> Result<()>;
    fn deactivate_tool(&self, tool: &Tool, reason: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeRiskStep {
    Closed { seccode: Seccode, saldo: i64 },
    Shrunk { tool: String, from: i64, to: i64 },
    Deactivated { tool: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeRiskOutcome {
    WithinLimits,
    /// Over on the first look, fine after a refresh
    TransientSpike,
    Resolved(Vec<DeRiskStep>),
    /// Every step taken and still over
    Exhausted(Vec<DeRiskStep>),
}

/// Run the escalation against `view`.
pub fn run(config: &RiskConfig, view: PortfolioView, actions: &dyn DeRiskActions) -> Result<DeRiskOutcome> {
    if view.breach(config).is_none() {
        return Ok(DeRiskOutcome::WithinLimits);
    }

    let mut view = actions.refresh()?;
    let Some(reason) = view.breach(config) else {
        info!("portfolio ceiling breach cleared on recheck");
        return Ok(DeRiskOutcome::TransientSpike);
    };
    warn!("de-risking: {}", reason);

    let mut steps = Vec::new();

    for position in view.independent_positions() {
        warn!(seccode = %position.seccode, saldo = position.saldo, "closing independent position");
        actions.close_position(&position.seccode, position.saldo)?;
        steps.push(DeRiskStep::Closed {
            seccode: position.seccode.clone(),
            saldo: position.saldo,
        });
        view = actions.refresh()?;
        if view.breach(config).is_none() {
            return Ok(DeRiskOutcome::Resolved(steps));
        }
    }

    let oversized: Vec<(Tool, f64)> = view
        .tools
        .iter()
        .filter(|t| t.active)
        .map(|t| (t.clone(), view.tool_share(t)))
        .filter(|(_, share)| *share > config.max_share_init_reqs_tool)
        .collect();
    for (tool, share) in oversized {
        let from = view.saldo(&tool.seccode);
        let to = (from as f64 * config.max_share_init_reqs_tool / share).trunc() as i64;
        warn!(tool = %tool.name, share, from, to, "shrinking oversized tool");
        actions.shrink_tool(&tool, to)?;
        actions.deactivate_tool(&tool, "tool over its requirement ceiling")?;
        steps.push(DeRiskStep::Shrunk {
            tool: tool.name.clone(),
            from,
            to,
        });
        steps.push(DeRiskStep::Deactivated { tool: tool.name.clone() });
        view = actions.refresh()?;
        if view.breach(config).is_none() {
            return Ok(DeRiskOutcome::Resolved(steps));
        }
    }

    let mut remaining: Vec<Tool> = view.tools.iter().filter(|t| t.active).cloned().collect();
    remaining.sort_by_key(|t| t.priority);
    for tool in remaining {
        warn!(tool = %tool.name, priority = tool.priority, "deactivating tool to reduce portfolio risk");
        actions.deactivate_tool(&tool, "portfolio over its requirement ceiling")?;
        steps.push(DeRiskStep::Deactivated { tool: tool.name.clone() });
        view = actions.refresh()?;
        if view.breach(config).is_none() {
            return Ok(DeRiskOutcome::Resolved(steps));
        }
    }

    Ok(DeRiskOutcome::Exhausted(steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::{PortfolioSecurity, PositionKind};
    use crate::testing::tool_config;
    use parking_lot::Mutex;

    fn position(code: &str, saldo: i64) -> Position {
        Position {
            seccode: Seccode::new(code),
            kind: PositionKind::Forts,
            market: 4,
            client: "CL01".into(),
            union: String::new(),
            saldo_in: 0,
            saldo,
            bought: 0,
            sold: 0,
            pnl: 0.0,
        }
    }

    fn line(code: &str, balance: i64, init_req: f64) -> PortfolioSecurity {
        PortfolioSecurity {
            secid: 0,
            seccode: Seccode::new(code),
            market: 4,
            price: 0.0,
            open_balance: 0,
            balance,
            init_req,
            maint_req: init_req * 0.8,
            pl: 0.0,
        }
    }

    /// In-memory venue: closing or shrinking frees the requirement at once.
    struct FakeVenue {
        view: Mutex<PortfolioView>,
        log: Mutex<Vec<String>>,
    }

    impl FakeVenue {
        fn new(view: PortfolioView) -> Self {
            Self {
                view: Mutex::new(view),
                log: Mutex::new(Vec::new()),
            }
        }

        fn recompute(view: &mut PortfolioView) {
            view.portfolio.init_req = view.portfolio.securities.iter().map(|s| s.init_req).sum();
            view.portfolio.maint_req = view.portfolio.securities.iter().map(|s| s.maint_req).sum();
        }

        fn set_balance(&self, seccode: &Seccode, lots: i64) {
            let mut view = self.view.lock();
            for p in view.positions.iter_mut().filter(|p| &p.seccode == seccode) {
                p.saldo = lots;
            }
            for s in view.portfolio.securities.iter_mut().filter(|s| &s.seccode == seccode) {
                let per_lot = if s.balance != 0 { s.init_req / s.balance.abs() as f64 } else { 0.0 };
                s.balance = lots;
                s.init_req = per_lot * lots.abs() as f64;
                s.maint_req = s.init_req * 0.8;
            }
            Self::recompute(&mut view);
        }
    }

    impl DeRiskActions for FakeVenue {
        fn refresh(&self) -> Result<PortfolioView> {
            self.log.lock().push("refresh".into());
            Ok(self.view.lock().clone())
        }

        fn close_position(&self, seccode: &Seccode, _saldo: i64) -> Result<()> {
            self.log.lock().push(format!("close {}", seccode));
            self.set_balance(seccode, 0);
            Ok(())
        }

        fn shrink_tool(&self, tool: &Tool, target: i64) -> Result<()> {
            self.log.lock().push(format!("shrink {} {}", tool.name, target));
            self.set_balance(&tool.seccode, target);
            Ok(())
        }

        fn deactivate_tool(&self, tool: &Tool, _reason: &str) -> Result<()> {
            self.log.lock().push(format!("deactivate {}", tool.name));
            let mut view = self.view.lock();
            if let Some(t) = view.tools.iter_mut().find(|t| t.name == tool.name) {
                t.active = false;
            }
            Ok(())
        }
    }

    fn config() -> RiskConfig {
        RiskConfig {
            max_share_init_reqs_portfolio: 50.0,
            max_share_min_reqs_portfolio: 100.0,
            max_share_init_reqs_tool: 25.0,
            ..RiskConfig::default()
        }
    }

    /// Equity 1M; tool "si" holds 4 lots worth 300k; "BRX6" is held by nobody.
    fn view(independent_req: f64) -> PortfolioView {
        let tool = Tool::from_config(&tool_config("si", "SiZ6", &["s1"]));
        let mut view = PortfolioView {
            portfolio: Portfolio {
                equity: 1_000_000.0,
                securities: vec![line("SiZ6", 4, 300_000.0), line("BRX6", 2, independent_req)],
                ..Default::default()
            },
            tools: vec![tool],
            positions: vec![position("SiZ6", 4), position("BRX6", 2)],
        };
        FakeVenue::recompute(&mut view);
        view
    }

    #[test]
    fn test_within_limits_does_nothing() {
        let mut v = view(0.0);
        v.portfolio.securities[0].init_req = 100_000.0;
        FakeVenue::recompute(&mut v);
        let venue = FakeVenue::new(v.clone());
        assert_eq!(run(&config(), v, &venue).unwrap(), DeRiskOutcome::WithinLimits);
        assert!(venue.log.lock().is_empty());
    }

    #[test]
    fn test_spike_cleared_on_recheck() {
        let over = view(300_000.0);
        let mut fine = over.clone();
        fine.portfolio.init_req = 100_000.0;
        let venue = FakeVenue::new(fine);
        assert_eq!(run(&config(), over, &venue).unwrap(), DeRiskOutcome::TransientSpike);
        assert_eq!(*venue.log.lock(), vec!["refresh"]);
    }

    #[test]
    fn test_independent_position_closed_first() {
        // 300k + 300k = 60% > 50%; closing BRX6 alone brings it to 30%
        let v = view(300_000.0);
        let venue = FakeVenue::new(v.clone());
        let outcome = run(&config(), v, &venue).unwrap();
        assert_eq!(
            outcome,
            DeRiskOutcome::Resolved(vec![DeRiskStep::Closed {
                seccode: Seccode::new("BRX6"),
                saldo: 2
            }])
        );
        assert!(!venue.log.lock().iter().any(|l| l.starts_with("shrink")));
    }

    #[test]
    fn test_oversized_tool_shrunk_when_still_over() {
        // the tool alone stays over 50% once BRX6 is closed
        let mut v = view(100_000.0);
        v.portfolio.securities[0].init_req = 510_000.0;
        FakeVenue::recompute(&mut v);
        let venue = FakeVenue::new(v.clone());
        let outcome = run(&config(), v, &venue).unwrap();

        let log = venue.log.lock().clone();
        let close = log.iter().position(|l| l == "close BRX6").unwrap();
        let shrink = log.iter().position(|l| l.starts_with("shrink si")).unwrap();
        assert!(close < shrink);
        // 4 lots at 51% scaled to the 25% ceiling -> 1 lot
        assert_eq!(log[shrink], "shrink si 1");
        match outcome {
            DeRiskOutcome::Resolved(steps) => {
                assert!(steps.contains(&DeRiskStep::Deactivated { tool: "si".into() }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_deactivates_by_priority_until_clear() {
        let mut a = Tool::from_config(&tool_config("a", "AAA", &["s1"]));
        a.priority = 2;
        let mut b = Tool::from_config(&tool_config("b", "BBB", &["s1"]));
        b.priority = 1;
        // nothing sheds requirement in this venue, so every tool gets switched off
        let v = PortfolioView {
            portfolio: Portfolio {
                equity: 100.0,
                init_req: 90.0,
                ..Default::default()
            },
            tools: vec![a, b],
            positions: vec![],
        };
        let venue = FakeVenue::new(v.clone());
        let outcome = run(&config(), v, &venue).unwrap();
        assert_eq!(
            outcome,
            DeRiskOutcome::Exhausted(vec![
                DeRiskStep::Deactivated { tool: "b".into() },
                DeRiskStep::Deactivated { tool: "a".into() },
            ])
        );
    }
}
