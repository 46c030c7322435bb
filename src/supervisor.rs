//! Connection state and the reconnection supervisor

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::core::config::ConnectionConfig;
use crate::core::{Error, Result};
use crate::notify::{EngineEvent, EventBus, Notifier};
use crate::protocol::ProtocolClient;
use crate::protocol::commands::{Command, ConnectParams};

/// Reconnect backoff starts here and doubles per consecutive failure.
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Delay before retrying after the venue reported a hard error.
const HARD_ERROR_RETRY: Duration = Duration::from_secs(10);
/// Limits/position-equity push period requested at connect.
const PUSH_INTERVAL_SECS: u64 = 10;
/// Consecutive failures before the operator is told.
const ALERT_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// What a `server_status` report changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// A new session is up
    Connected,
    Disconnected,
    Failed(String),
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct LinkState {
    pub connection: ConnectionState,
    pub recovering: bool,
    pub use_backup: bool,
    pub connecting_since: Option<Instant>,
    pub connected_since: Option<Instant>,
    pub transport_available: bool,
    pub reconnect_requested: bool,
    pub reconnect_at: Option<Instant>,
    pub failures: u32,
    pub last_error: String,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            recovering: false,
            use_backup: false,
            connecting_since: None,
            connected_since: None,
            transport_available: true,
            reconnect_requested: false,
            reconnect_at: None,
            failures: 0,
            last_error: String::new(),
        }
    }
}

/// Shared connection flags. Written by the inbound worker and the protocol
/// client, read by every other component.
pub struct ConnectionMonitor {
    link: Mutex<LinkState>,
    link_ready: AtomicBool,
    events: Arc<EventBus>,
}

impl ConnectionMonitor {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            link: Mutex::new(LinkState::default()),
            link_ready: AtomicBool::new(true),
            events,
        }
    }

    pub fn snapshot(&self) -> LinkState {
        self.link.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.link.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn transition(&self, link: &mut LinkState, next: ConnectionState) {
        if link.connection == next {
            return;
        }
        debug!(from = ?link.connection, to = ?next, "connection state");
        link.connection = next;
        match next {
            ConnectionState::Connecting => link.connecting_since = Some(Instant::now()),
            ConnectionState::Connected => {
                link.connecting_since = None;
                link.connected_since = Some(Instant::now());
            }
            ConnectionState::Disconnected => {
                link.connecting_since = None;
                link.connected_since = None;
            }
            ConnectionState::Disconnecting => {}
        }
        self.events.publish(EngineEvent::ConnectionChanged(next));
    }

    /// Apply a `server_status` report.
    pub fn on_server_status(&self, connected: &str, recover: bool, text: &str) -> StatusChange {
        let mut link = self.link.lock();
        let change = match connected {
            "true" => {
                let was = link.connection;
                link.recovering = recover;
                link.transport_available = true;
                link.failures = 0;
                link.reconnect_at = None;
                self.transition(&mut link, ConnectionState::Connected);
                if was == ConnectionState::Connected {
                    StatusChange::Unchanged
                } else {
                    StatusChange::Connected
                }
            }
            "error" => {
                link.use_backup = !link.use_backup;
                link.last_error = text.to_string();
                link.failures += 1;
                link.reconnect_at = Some(Instant::now() + HARD_ERROR_RETRY);
                self.transition(&mut link, ConnectionState::Disconnected);
                StatusChange::Failed(text.to_string())
            }
            _ => {
                let was = link.connection;
                link.recovering = false;
                self.transition(&mut link, ConnectionState::Disconnected);
                if was == ConnectionState::Disconnected {
                    StatusChange::Unchanged
                } else {
                    StatusChange::Disconnected
                }
            }
        };
        let recovering = link.recovering;
        drop(link);

        if recovering {
            self.set_link_ready(false, "connection recovering");
        } else if change == StatusChange::Connected {
            self.set_link_ready(true, "connected");
        }
        change
    }

    pub fn begin_connecting(&self) {
        let mut link = self.link.lock();
        self.transition(&mut link, ConnectionState::Connecting);
    }

    pub fn begin_disconnecting(&self) {
        let mut link = self.link.lock();
        self.transition(&mut link, ConnectionState::Disconnecting);
    }

    pub fn set_disconnected(&self) {
        let mut link = self.link.lock();
        self.transition(&mut link, ConnectionState::Disconnected);
    }

    /// Record a failed connect attempt and schedule the next one.
    pub fn connect_failed(&self, reason: &str) -> Duration {
        let mut link = self.link.lock();
        link.failures += 1;
        link.last_error = reason.to_string();
        let delay = backoff_for(link.failures);
        link.reconnect_at = Some(Instant::now() + delay);
        self.transition(&mut link, ConnectionState::Disconnected);
        delay
    }

    /// The transport itself failed: try the other server next time.
    pub fn on_transport_error(&self, reason: &str) {
        let mut link = self.link.lock();
        link.use_backup = !link.use_backup;
        link.transport_available = false;
        link.reconnect_requested = true;
        link.last_error = reason.to_string();
    }

    /// A command outlived its deadline; the link is presumed dead.
    pub fn mark_transport_unavailable(&self, reason: &str) {
        let mut link = self.link.lock();
        link.transport_available = false;
        link.reconnect_requested = true;
        link.last_error = reason.to_string();
    }

    pub fn mark_transport_available(&self) {
        self.link.lock().transport_available = true;
    }

    pub fn is_transport_available(&self) -> bool {
        self.link.lock().transport_available
    }

    pub fn request_reconnect(&self) {
        self.link.lock().reconnect_requested = true;
    }

    pub fn reconnect_due(&self, now: Instant) -> bool {
        let link = self.link.lock();
        link.reconnect_requested || link.reconnect_at.is_some_and(|at| at <= now)
    }

    /// Consume a pending reconnect request or a due retry.
    pub fn take_reconnect_due(&self, now: Instant) -> bool {
        let mut link = self.link.lock();
        let due = link.reconnect_requested || link.reconnect_at.is_some_and(|at| at <= now);
        if due {
            link.reconnect_requested = false;
            link.reconnect_at = None;
        }
        due
    }

    pub fn use_backup(&self) -> bool {
        self.link.lock().use_backup
    }

    pub fn failures(&self) -> u32 {
        self.link.lock().failures
    }

    pub fn connected_for(&self) -> Option<Duration> {
        self.link.lock().connected_since.map(|t| t.elapsed())
    }

    pub fn connecting_for(&self) -> Option<Duration> {
        self.link.lock().connecting_since.map(|t| t.elapsed())
    }

    /// Link-level readiness; cleared while commands stall or the session recovers.
    pub fn set_link_ready(&self, ready: bool, reason: &str) {
        if self.link_ready.swap(ready, Ordering::SeqCst) != ready {
            if ready {
                info!("ready to trade: {}", reason);
            } else {
                warn!("not ready to trade: {}", reason);
            }
            self.events.publish(EngineEvent::ReadinessChanged {
                ready,
                reason: reason.to_string(),
            });
        }
    }

    pub fn is_link_ready(&self) -> bool {
        self.link_ready.load(Ordering::SeqCst)
    }
}

fn backoff_for(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    (INITIAL_BACKOFF * 2u32.pow(shift)).min(MAX_BACKOFF)
}

/// Owns the connect/disconnect sequence and restores the link after failures.
pub struct ReconnectionSupervisor {
    client: Arc<ProtocolClient>,
    monitor: Arc<ConnectionMonitor>,
    config: ConnectionConfig,
    notifier: Arc<dyn Notifier>,
    /// Inside a scheduled offline window
    suspended: AtomicBool,
    alerted: AtomicBool,
}

impl ReconnectionSupervisor {
    pub fn new(
        client: Arc<ProtocolClient>,
        monitor: Arc<ConnectionMonitor>,
        config: ConnectionConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            client,
            monitor,
            config,
            notifier,
            suspended: AtomicBool::new(false),
            alerted: AtomicBool::new(false),
        }
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    fn connect_params(&self) -> ConnectParams {
        let (host, port) = match (&self.config.backup_host, self.monitor.use_backup()) {
            (Some(host), true) => (host.clone(), self.config.backup_port.unwrap_or(self.config.port)),
            _ => (self.config.host.clone(), self.config.port),
        };
        ConnectParams {
            login: self.config.login.clone(),
            password: self.config.password.clone(),
            host,
            port,
            rqdelay_ms: self.config.rqdelay_ms,
            session_timeout_secs: self.config.session_timeout_secs,
            request_timeout_secs: self.config.request_timeout_secs,
            push_interval_secs: PUSH_INTERVAL_SECS,
        }
    }

    /// Start a connection. The session counts as up only once the venue
    /// reports `server_status connected="true"`.
    pub fn connect(&self) -> Result<()> {
        match self.monitor.state() {
            ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
            _ => {}
        }
        let params = self.connect_params();
        info!(host = %params.host, port = params.port, "connecting");
        self.monitor.begin_connecting();

        match self.client.send(&Command::Connect(params)) {
            Ok(reply) if reply.success => {
                self.monitor.mark_transport_available();
                Ok(())
            }
            Ok(reply) => {
                let delay = self.monitor.connect_failed(&reply.message);
                warn!("connect rejected: {} (retry in {:?})", reply.message, delay);
                self.alert_if_repeated();
                Err(Error::Transport(format!("connect rejected: {}", reply.message)))
            }
            Err(e) => {
                let delay = self.monitor.connect_failed(&e.to_string());
                warn!("connect failed: {} (retry in {:?})", e, delay);
                self.alert_if_repeated();
                Err(e)
            }
        }
    }

    /// Close the session. Already disconnected counts as success.
    pub fn disconnect(&self) -> Result<()> {
        if self.monitor.state() == ConnectionState::Disconnected {
            return Ok(());
        }
        self.monitor.begin_disconnecting();
        let limit = Duration::from_secs(self.config.disconnect_timeout_secs);
        let result = self.client.send_within(&Command::Disconnect, limit);
        self.monitor.set_disconnected();
        match result {
            Ok(reply) if reply.success || reply.mentions("not connected") => {
                info!("disconnected");
                Ok(())
            }
            Ok(reply) => {
                warn!("disconnect refused: {}", reply.message);
                Err(Error::Transport(reply.message))
            }
            Err(e) => {
                warn!("disconnect did not complete: {}", e);
                Err(e)
            }
        }
    }

    pub fn reconnect(&self) -> Result<()> {
        if let Err(e) = self.disconnect() {
            debug!("disconnect before reconnect: {}", e);
        }
        self.connect()
    }

    /// Suspend or resume automatic reconnection (scheduled offline windows).
    pub fn set_suspended(&self, suspended: bool) {
        if self.suspended.swap(suspended, Ordering::SeqCst) != suspended {
            info!(suspended, "automatic reconnection");
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    fn session_expired(&self, link: &LinkState, now: Instant) -> bool {
        let session_tm = Duration::from_secs(self.config.session_timeout_secs);
        link.connection == ConnectionState::Connecting
            && link
                .connecting_since
                .is_some_and(|t| now.saturating_duration_since(t) > session_tm)
    }

    /// Whether `tick_at(now)` has anything to do. Cheap; no commands sent.
    pub fn is_due(&self, now: Instant) -> bool {
        let link = self.monitor.snapshot();
        self.session_expired(&link, now)
            || (!self.is_suspended() && self.monitor.reconnect_due(now))
            || (link.connection == ConnectionState::Connected && self.alerted.load(Ordering::SeqCst))
    }

    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    /// Cycle a connect stuck past `SessionTM`, run due reconnects. May block
    /// on connect/disconnect round trips, so the scheduler runs it off its loop.
    pub fn tick_at(&self, now: Instant) {
        let link = self.monitor.snapshot();

        if self.session_expired(&link, now) {
            warn!(
                "connect did not complete within {}s, cycling",
                self.config.session_timeout_secs
            );
            if let Err(e) = self.disconnect() {
                debug!("disconnect after session timeout: {}", e);
            }
            let delay = self.monitor.connect_failed("session timeout");
            debug!("next connect attempt in {:?}", delay);
            self.alert_if_repeated();
            return;
        }

        if self.is_suspended() {
            return;
        }

        if self.monitor.take_reconnect_due(now) {
            let result = match link.connection {
                ConnectionState::Connected => self.reconnect(),
                ConnectionState::Disconnected => self.connect(),
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!("reconnect attempt failed: {}", e);
            }
        }

        if self.monitor.is_connected() && self.alerted.swap(false, Ordering::SeqCst) {
            self.notifier.notify("connection restored", false);
        }
    }

    fn alert_if_repeated(&self) {
        if self.monitor.failures() >= ALERT_AFTER_FAILURES && !self.alerted.swap(true, Ordering::SeqCst) {
            let text = format!(
                "connection failing: {} consecutive attempts, last error: {}",
                self.monitor.failures(),
                self.monitor.snapshot().last_error
            );
            error!("{}", text);
            self.notifier.notify(&text, true);
        }
    }
}
