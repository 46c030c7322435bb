//! Configuration - Type-safe, validated config
//!
//! Loaded from `config.toml`. Credentials may be left out of the file and
//! supplied through `TQ_LOGIN` / `TQ_PASSWORD` (a `.env` file is honoured).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::core::clock::{parse_hhmm, TradingHours};
use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,

    pub connection: ConnectionConfig,

    #[serde(default)]
    pub account: AccountConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub risk: RiskConfig,

    /// Currency code -> seccode whose last price is the conversion rate
    #[serde(default)]
    pub currency: HashMap<String, String>,

    #[serde(default)]
    pub tools: Vec<ToolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for the rotating log file
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Dated logs older than this are purged on rollover
    #[serde(default = "default_retention_days")]
    pub log_retention_days: u32,

    /// Venue timezone
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,

    /// Base currency of the portfolio
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_retention_days() -> u32 {
    30
}
fn default_utc_offset() -> i32 {
    3
}
fn default_base_currency() -> String {
    "RUB".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            log_retention_days: default_retention_days(),
            utc_offset_hours: default_utc_offset(),
            base_currency: default_base_currency(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,

    pub host: String,
    pub port: u16,

    /// Alternate endpoint used after a hard transport error
    pub backup_host: Option<String>,
    pub backup_port: Option<u16>,

    /// Unix socket of the external connector process
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    #[serde(default = "default_rqdelay")]
    pub rqdelay_ms: u64,

    /// `SessionTM`: longest a connect attempt may stay pending
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// `WaitingTime`: second tier of the command reply escalation
    #[serde(default = "default_waiting_time")]
    pub waiting_time_secs: u64,

    /// Deadline for a `disconnect` reply
    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_secs: u64,

    /// Orders not re-reported this long after a reconnect become `lost`
    #[serde(default = "default_lost_grace")]
    pub lost_grace_secs: u64,
}

fn default_socket_path() -> String {
    "/tmp/transaq-connector.sock".to_string()
}
fn default_rqdelay() -> u64 {
    100
}
fn default_session_timeout() -> u64 {
    120
}
fn default_request_timeout() -> u64 {
    20
}
fn default_waiting_time() -> u64 {
    20
}
fn default_disconnect_timeout() -> u64 {
    5
}
fn default_lost_grace() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Client code (FORTS / spot)
    #[serde(default)]
    pub client: String,
    /// `Union`: portfolio grouping id for multi-currency portfolio commands
    #[serde(default)]
    pub union: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_recalc_interval")]
    pub recalc_interval_secs: u64,

    #[serde(default = "default_portfolio_check")]
    pub portfolio_check_secs: u64,

    #[serde(default = "default_info_refresh")]
    pub info_refresh_secs: u64,

    /// Proactive session refresh windows
    #[serde(default)]
    pub session_windows: Vec<SessionWindow>,

    #[serde(default = "default_trading_start")]
    pub trading_start: String,
    #[serde(default = "default_trading_end")]
    pub trading_end: String,

    /// Bars requested per history refresh
    #[serde(default = "default_history_count")]
    pub history_count: u32,
}

fn default_recalc_interval() -> u64 {
    60
}
fn default_portfolio_check() -> u64 {
    330
}
fn default_info_refresh() -> u64 {
    3600
}
fn default_trading_start() -> String {
    "07:00".to_string()
}
fn default_trading_end() -> String {
    "23:50".to_string()
}
fn default_history_count() -> u32 {
    5000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recalc_interval_secs: default_recalc_interval(),
            portfolio_check_secs: default_portfolio_check(),
            info_refresh_secs: default_info_refresh(),
            session_windows: vec![],
            trading_start: default_trading_start(),
            trading_end: default_trading_end(),
            history_count: default_history_count(),
        }
    }
}

impl SchedulerConfig {
    pub fn trading_hours(&self) -> Result<TradingHours> {
        let start = parse_hhmm(&self.trading_start)
            .ok_or_else(|| Error::Config(format!("bad trading_start {}", self.trading_start)))?;
        let end = parse_hhmm(&self.trading_end)
            .ok_or_else(|| Error::Config(format!("bad trading_end {}", self.trading_end)))?;
        Ok(TradingHours { start, end })
    }
}

/// Disconnect at `disconnect_at`, reconnect at `connect_at` (both `HH:MM`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWindow {
    pub disconnect_at: String,
    pub connect_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// `maxShareInitReqsPosition`: ceiling for one position, % of equity
    #[serde(default = "default_position_ceiling")]
    pub max_share_init_reqs_position: f64,

    /// Ceiling for one tool before de-risking shrinks it, % of equity
    #[serde(default = "default_tool_ceiling")]
    pub max_share_init_reqs_tool: f64,

    /// Portfolio-wide ceilings, % of equity
    #[serde(default = "default_portfolio_min_ceiling")]
    pub max_share_min_reqs_portfolio: f64,
    #[serde(default = "default_portfolio_init_ceiling")]
    pub max_share_init_reqs_portfolio: f64,

    /// Allowed relative departure of equity from its recent average
    #[serde(default = "default_equity_tolerance")]
    pub equity_tolerance: f64,

    /// Position/bound ratio above which the position is a deviation
    #[serde(default = "default_deviation_multiple")]
    pub deviation_multiple: f64,

    /// Last trade older than this makes the price stale
    #[serde(default = "default_max_price_age")]
    pub max_price_age_secs: i64,

    /// Requirement per lot below this share of lot notional is implausible
    #[serde(default = "default_min_req_share")]
    pub min_req_share: f64,

    /// Corrective orders go to market once a gap persists this long
    #[serde(default = "default_normalization_market_after")]
    pub normalization_market_after_secs: i64,
}

fn default_position_ceiling() -> f64 {
    15.0
}
fn default_tool_ceiling() -> f64 {
    25.0
}
fn default_portfolio_min_ceiling() -> f64 {
    70.0
}
fn default_portfolio_init_ceiling() -> f64 {
    90.0
}
fn default_equity_tolerance() -> f64 {
    0.3
}
fn default_deviation_multiple() -> f64 {
    1.5
}
fn default_max_price_age() -> i64 {
    600
}
fn default_min_req_share() -> f64 {
    0.01
}
fn default_normalization_market_after() -> i64 {
    300
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_share_init_reqs_position: default_position_ceiling(),
            max_share_init_reqs_tool: default_tool_ceiling(),
            max_share_min_reqs_portfolio: default_portfolio_min_ceiling(),
            max_share_init_reqs_portfolio: default_portfolio_init_ceiling(),
            equity_tolerance: default_equity_tolerance(),
            deviation_multiple: default_deviation_multiple(),
            max_price_age_secs: default_max_price_age(),
            min_req_share: default_min_req_share(),
            normalization_market_after_secs: default_normalization_market_after(),
        }
    }
}

/// One traded instrument with its strategies and risk parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    pub seccode: String,
    pub board: String,
    /// Venue market id (4 = FORTS)
    #[serde(default = "default_market")]
    pub market: u32,

    /// Share of equity for sizing, %
    #[serde(default = "default_share_of_funds")]
    pub share_of_funds: f64,

    /// Size by a fixed lot count instead of share of funds
    #[serde(default)]
    pub fixed_lots: Option<i64>,

    #[serde(default)]
    pub min_lots: i64,
    #[serde(default = "default_max_lots")]
    pub max_lots: i64,

    /// Lots added to the intended position (manual holdings kept alongside)
    #[serde(default)]
    pub balance_shift: i64,

    #[serde(default)]
    pub stop_trading: bool,

    /// De-risking deactivates lower values first
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default = "default_slippage_ticks")]
    pub slippage_ticks: i64,
    #[serde(default = "default_reprice_ticks")]
    pub reprice_ticks: i64,

    pub strategies: Vec<StrategyConfig>,
}

fn default_market() -> u32 {
    4
}
fn default_share_of_funds() -> f64 {
    5.0
}
fn default_max_lots() -> i64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_slippage_ticks() -> i64 {
    2
}
fn default_reprice_ticks() -> i64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub algorithm: String,
    /// Bar timeframe in minutes
    #[serde(default = "default_timeframe")]
    pub timeframe: u32,
    #[serde(default)]
    pub params: HashMap<String, f64>,
}

fn default_timeframe() -> u32 {
    60
}

impl Config {
    /// Load from TOML file, filling credentials from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.fill_credentials_from_env();
        Ok(config)
    }

    fn fill_credentials_from_env(&mut self) {
        dotenv::dotenv().ok();
        if self.connection.login.is_empty() {
            if let Ok(login) = std::env::var("TQ_LOGIN") {
                self.connection.login = login;
            }
        }
        if self.connection.password.is_empty() {
            if let Ok(password) = std::env::var("TQ_PASSWORD") {
                self.connection.password = password;
            }
        }
    }

    /// Reject configurations the engine cannot run safely with.
    pub fn validate(&self, known_algorithms: &[&str]) -> Result<()> {
        if self.connection.login.is_empty() {
            return Err(Error::Config("connection.login is empty".into()));
        }
        if self.connection.waiting_time_secs < 3 {
            return Err(Error::Config("connection.waiting_time_secs must be >= 3".into()));
        }
        self.scheduler.trading_hours()?;
        for window in &self.scheduler.session_windows {
            if parse_hhmm(&window.disconnect_at).is_none() || parse_hhmm(&window.connect_at).is_none() {
                return Err(Error::Config(format!("bad session window {:?}", window)));
            }
        }

        let mut names = HashSet::new();
        for tool in &self.tools {
            if !names.insert(tool.name.as_str()) {
                return Err(Error::Config(format!("duplicate tool name {}", tool.name)));
            }
            if tool.min_lots > tool.max_lots {
                return Err(Error::Config(format!("{}: min_lots > max_lots", tool.name)));
            }
            if !(tool.share_of_funds > 0.0 && tool.share_of_funds <= 100.0) {
                return Err(Error::Config(format!("{}: share_of_funds out of (0, 100]", tool.name)));
            }
            if tool.strategies.is_empty() || tool.strategies.len() > 2 {
                return Err(Error::Config(format!("{}: a tool needs 1 or 2 strategies", tool.name)));
            }
            for s in &tool.strategies {
                if !known_algorithms.contains(&s.algorithm.as_str()) {
                    return Err(Error::Config(format!(
                        "{}: unknown strategy algorithm {}",
                        tool.name, s.algorithm
                    )));
                }
                if s.timeframe == 0 {
                    return Err(Error::Config(format!("{}: zero timeframe", s.name)));
                }
            }
        }
        Ok(())
    }

    pub fn tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [connection]
        login = "demo"
        password = "secret"
        host = "tr1.example.net"
        port = 3900

        [account]
        client = "CL01"
        union = "U01"

        [[tools]]
        name = "Si"
        seccode = "SiZ6"
        board = "FUT"
        share_of_funds = 5
        max_lots = 10

        [[tools.strategies]]
        name = "Si-trend"
        algorithm = "trend"
        timeframe = 60
        params = { rsi_period = 14.0 }
    "#;

    #[test]
    fn test_parse_and_validate() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.scheduler.portfolio_check_secs, 330);
        assert_eq!(config.tools[0].strategies[0].params["rsi_period"], 14.0);
        assert!(config.validate(&["trend"]).is_ok());
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert!(config.validate(&["ma_cross"]).is_err());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.tools[0].min_lots = 20;
        assert!(config.validate(&["trend"]).is_err());
    }
}
