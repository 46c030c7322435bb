//! Protocol client - commands out, data in
//!
//! Commands are synchronous round trips through the transport with a tiered
//! wait. Inbound blobs go onto a FIFO and are applied to the state store by a
//! single worker thread, in arrival order.

pub mod commands;
pub mod dispatch;
pub mod parser;
pub mod queue;

use flume::RecvTimeoutError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

use crate::core::clock::TradingHours;
use crate::core::{Error, Result, VenueClock};
use crate::supervisor::ConnectionMonitor;
use crate::transport::Transport;
use commands::{Command, Reply};
use dispatch::Dispatcher;
use queue::{BacklogProbe, InboundQueue};

/// Queue depth above which backlog diagnostics start.
pub const BACKLOG_THRESHOLD: usize = 24;
pub const BACKLOG_REPORT_INTERVAL: Duration = Duration::from_secs(15);
const INBOUND_POLL: Duration = Duration::from_millis(200);

/// Reply-wait tiers.
#[derive(Debug, Clone, Copy)]
pub struct CommandTimeouts {
    /// Past this the system is marked not ready to trade
    pub not_ready_after: Duration,
    /// Past this the transport is presumed dead and a reconnect requested
    pub waiting_time: Duration,
    /// `waiting_time` multiple after which the wait is logged and becomes unbounded
    pub ceiling_multiple: u32,
}

impl CommandTimeouts {
    pub fn new(waiting_time: Duration) -> Self {
        Self {
            not_ready_after: Duration::from_secs(2),
            waiting_time,
            ceiling_multiple: 15,
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.waiting_time * self.ceiling_multiple
    }
}

pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
    monitor: Arc<ConnectionMonitor>,
    timeouts: CommandTimeouts,
    queue: Arc<InboundQueue>,
}

impl ProtocolClient {
    /// Wire the client to a transport; inbound blobs start queueing immediately.
    pub fn new(transport: Arc<dyn Transport>, monitor: Arc<ConnectionMonitor>, timeouts: CommandTimeouts) -> Self {
        let queue = Arc::new(InboundQueue::new());
        let sink = queue.clone();
        transport.register_inbound(Box::new(move |blob| sink.push(blob)));
        Self {
            transport,
            monitor,
            timeouts,
            queue,
        }
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn queue(&self) -> &Arc<InboundQueue> {
        &self.queue
    }

    /// Send a command and wait for its reply through the escalation tiers.
    pub fn send(&self, command: &Command) -> Result<Reply> {
        let raw = self.round_trip(command, None)?;
        Reply::parse(&raw)
    }

    /// Send with a hard deadline instead of escalation.
    pub fn send_within(&self, command: &Command, limit: Duration) -> Result<Reply> {
        let raw = self.round_trip(command, Some(limit))?;
        Reply::parse(&raw)
    }

    fn round_trip(&self, command: &Command, limit: Option<Duration>) -> Result<String> {
        let verb = command.verb();
        trace!(verb, "-> {}", command.redacted());

        let (tx, rx) = flume::bounded(1);
        let transport = self.transport.clone();
        let text = command.encode();
        std::thread::Builder::new()
            .name(format!("cmd-{}", verb))
            .spawn(move || {
                let _ = tx.send(transport.send(&text));
            })?;

        let outcome = match limit {
            Some(limit) => rx
                .recv_timeout(limit)
                .map_err(|_| Error::Timeout(format!("{} got no reply within {:?}", verb, limit)))?,
            None => self.wait_escalating(verb, &rx)?,
        };

        match outcome {
            Ok(raw) => {
                trace!(verb, "<- {}", raw);
                Ok(raw)
            }
            Err(e) => {
                if e.is_transport() {
                    warn!(verb, "transport failure: {}", e);
                    self.monitor.on_transport_error(&e.to_string());
                }
                Err(e)
            }
        }
    }

    fn wait_escalating(
        &self,
        verb: &str,
        rx: &flume::Receiver<Result<String>>,
    ) -> Result<Result<String>> {
        let start = Instant::now();
        let t = self.timeouts;

        match rx.recv_timeout(t.not_ready_after) {
            Ok(outcome) => return Ok(outcome),
            Err(RecvTimeoutError::Disconnected) => return Err(worker_gone(verb)),
            Err(RecvTimeoutError::Timeout) => {}
        }
        self.monitor
            .set_link_ready(false, &format!("{} reply pending for {:?}", verb, t.not_ready_after));

        let mut presumed_dead = false;
        let outcome = loop {
            let waited = start.elapsed();
            if !presumed_dead && waited >= t.waiting_time {
                warn!(verb, "no reply after {:?}, requesting reconnect", waited);
                self.monitor
                    .mark_transport_unavailable(&format!("{} unanswered for {:?}", verb, waited));
                presumed_dead = true;
            }
            if waited >= t.ceiling() {
                error!(verb, "no reply after {:?}; waiting without limit", waited);
                break rx.recv().map_err(|_| worker_gone(verb))?;
            }
            let next_tier = if presumed_dead { t.ceiling() } else { t.waiting_time };
            match rx.recv_timeout(next_tier.saturating_sub(waited)) {
                Ok(outcome) => break outcome,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(worker_gone(verb)),
            }
        };

        debug!(verb, "late reply after {:?}", start.elapsed());
        if !self.monitor.snapshot().recovering {
            self.monitor.set_link_ready(true, "command reply received");
        }
        Ok(outcome)
    }

    /// Start the single inbound worker. Blobs are applied strictly in arrival order.
    pub fn spawn_inbound_worker(
        &self,
        dispatcher: Arc<Dispatcher>,
        clock: VenueClock,
        hours: TradingHours,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let queue = self.queue.clone();
        std::thread::Builder::new()
            .name("inbound".into())
            .spawn(move || {
                let mut probe = BacklogProbe::new(BACKLOG_THRESHOLD, BACKLOG_REPORT_INTERVAL);
                while !shutdown.load(Ordering::Relaxed) {
                    let Some(blob) = queue.pop_timeout(INBOUND_POLL) else {
                        continue;
                    };
                    dispatcher.dispatch(&blob);

                    let depth = queue.len();
                    if let Some(samples) = probe.observe(depth, hours.contains(&clock.now()), Instant::now()) {
                        warn!(
                            depth,
                            ?samples,
                            previews = ?queue.previews(3, 120),
                            "inbound backlog"
                        );
                    }
                }
                debug!("inbound worker stopped");
            })
    }
}

fn worker_gone(verb: &str) -> Error {
    Error::Transport(format!("{} command worker vanished", verb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{EngineEvent, EventBus};
    use crate::testing::ScriptedTransport;

    fn client(transport: Arc<ScriptedTransport>, timeouts: CommandTimeouts) -> (ProtocolClient, Arc<ConnectionMonitor>) {
        let (client, monitor, _) = client_with_events(transport, timeouts);
        (client, monitor)
    }

    fn client_with_events(
        transport: Arc<ScriptedTransport>,
        timeouts: CommandTimeouts,
    ) -> (ProtocolClient, Arc<ConnectionMonitor>, flume::Receiver<EngineEvent>) {
        let bus = Arc::new(EventBus::new());
        let events = bus.subscribe();
        let monitor = Arc::new(ConnectionMonitor::new(bus));
        (ProtocolClient::new(transport, monitor.clone(), timeouts), monitor, events)
    }

    fn fast() -> CommandTimeouts {
        CommandTimeouts {
            not_ready_after: Duration::from_millis(20),
            waiting_time: Duration::from_millis(60),
            ceiling_multiple: 3,
        }
    }

    #[test]
    fn test_prompt_reply_keeps_readiness() {
        let transport = ScriptedTransport::new();
        let (client, monitor) = client(transport, fast());
        let reply = client.send(&Command::ServerStatus).unwrap();
        assert!(reply.success);
        assert!(monitor.is_link_ready());
    }

    #[test]
    fn test_slow_reply_marks_not_ready_then_recovers() {
        let transport = ScriptedTransport::new();
        transport.delay("server_status", Duration::from_millis(40));
        let (client, monitor, events) = client_with_events(transport, fast());
        client.send(&Command::ServerStatus).unwrap();
        assert!(monitor.is_link_ready());
        assert!(monitor.is_transport_available());
        let flips: Vec<bool> = events
            .try_iter()
            .filter_map(|e| match e {
                EngineEvent::ReadinessChanged { ready, .. } => Some(ready),
                _ => None,
            })
            .collect();
        assert_eq!(flips, vec![false, true]);
    }

    #[test]
    fn test_stalled_reply_requests_reconnect() {
        let transport = ScriptedTransport::new();
        transport.delay("server_status", Duration::from_millis(100));
        let (client, monitor) = client(transport, fast());
        client.send(&Command::ServerStatus).unwrap();
        assert!(!monitor.is_transport_available());
        assert!(monitor.take_reconnect_due(Instant::now()));
    }

    #[test]
    fn test_deadline_send_times_out() {
        let transport = ScriptedTransport::new();
        transport.delay("disconnect", Duration::from_millis(200));
        let (client, _) = client(transport, fast());
        let err = client
            .send_within(&Command::Disconnect, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_transport_failure_flips_backup() {
        let transport = ScriptedTransport::new();
        transport.fail("server_status");
        let (client, monitor) = client(transport, fast());
        assert!(client.send(&Command::ServerStatus).is_err());
        assert!(monitor.use_backup());
        assert!(!monitor.is_transport_available());
    }

    #[test]
    fn test_inbound_blobs_are_queued_in_order() {
        let transport = ScriptedTransport::new();
        let (client, _) = client(transport.clone(), fast());
        transport.emit("<a/>");
        transport.emit("<b/>");
        assert_eq!(client.queue().len(), 2);
        assert_eq!(client.queue().pop_timeout(Duration::ZERO).as_deref(), Some("<a/>"));
    }
}
