//! Scheduler - one loop firing periodic work from wall-clock deadlines
//!
//! Heavy jobs run on their own threads so a slow handler never holds up the
//! deadline checks of the others. A job still running when it comes due
//! again is skipped for that round.

use chrono::{Duration as ChronoDuration, NaiveTime, Timelike};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::clock::{next_daily, parse_hhmm};
use crate::core::config::SchedulerConfig;
use crate::core::{Error, Result, VenueClock, VenueTime};

pub const CONNECTED_POLL: Duration = Duration::from_secs(1);
pub const IDLE_POLL: Duration = Duration::from_millis(10);

/// Recalculation stays out of the first 10 and last 5 seconds of a minute.
const QUIET_HEAD_SECS: u32 = 10;
const QUIET_TAIL_FROM: u32 = 55;
/// Spread, seconds, of a recalculation pushed out of a quiet span.
const JITTER_SPAN: u32 = 5;

/// The work the loop drives.
pub trait Jobs: Send + Sync {
    fn is_connected(&self) -> bool;
    /// Cheap checks run on every tick, on the loop thread.
    fn housekeeping(&self);
    /// Connection supervision has something to do (cheap check).
    fn link_due(&self) -> bool;
    /// Session timeouts and reconnects; may block on round trips.
    fn supervise(&self);
    /// A new session still needs its subscriptions and snapshots.
    fn session_pending(&self) -> bool;
    fn bootstrap(&self);
    fn recalculate(&self);
    fn portfolio_check(&self);
    fn refresh_info(&self);
    fn session_window(&self, connect: bool);
    fn daily_rollover(&self);
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub recalc_interval: ChronoDuration,
    pub portfolio_interval: ChronoDuration,
    pub info_interval: ChronoDuration,
    /// (disconnect at, connect at)
    pub windows: Vec<(NaiveTime, NaiveTime)>,
    pub rollover_at: NaiveTime,
    pub connected_poll: Duration,
    pub idle_poll: Duration,
}

impl Plan {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let hhmm = |raw: &str| parse_hhmm(raw).ok_or_else(|| Error::Config(format!("bad time of day '{}'", raw)));
        let windows = config
            .session_windows
            .iter()
            .map(|w| -> Result<(NaiveTime, NaiveTime)> { Ok((hhmm(&w.disconnect_at)?, hhmm(&w.connect_at)?)) })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            recalc_interval: seconds(config.recalc_interval_secs),
            portfolio_interval: seconds(config.portfolio_check_secs),
            info_interval: seconds(config.info_refresh_secs),
            windows,
            rollover_at: hhmm("01:00")?,
            connected_poll: CONNECTED_POLL,
            idle_poll: IDLE_POLL,
        })
    }
}

fn seconds(secs: u64) -> ChronoDuration {
    ChronoDuration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}

/// `interval` after `now`, moved out of the minute's quiet seconds.
pub fn recalc_deadline(now: VenueTime, interval: ChronoDuration, jitter: u32) -> VenueTime {
    let target = now + interval;
    let sec = target.second();
    if (QUIET_HEAD_SECS..QUIET_TAIL_FROM).contains(&sec) {
        return target;
    }
    let minute = target
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(target);
    let base = if sec < QUIET_HEAD_SECS {
        minute
    } else {
        minute + ChronoDuration::minutes(1)
    };
    base + ChronoDuration::seconds((QUIET_HEAD_SECS + jitter % JITTER_SPAN) as i64)
}

struct Window {
    disconnect_at: NaiveTime,
    connect_at: NaiveTime,
    next_disconnect: VenueTime,
    next_connect: VenueTime,
}

struct Deadlines {
    recalc: VenueTime,
    portfolio: VenueTime,
    info: VenueTime,
    rollover: VenueTime,
    windows: Vec<Window>,
}

impl Deadlines {
    fn new(plan: &Plan, now: VenueTime) -> Self {
        Self {
            recalc: recalc_deadline(now, plan.recalc_interval, rand::random::<u32>()),
            portfolio: now + plan.portfolio_interval,
            info: now + plan.info_interval,
            rollover: next_daily(&now, plan.rollover_at),
            windows: plan
                .windows
                .iter()
                .map(|(d, c)| Window {
                    disconnect_at: *d,
                    connect_at: *c,
                    next_disconnect: next_daily(&now, *d),
                    next_connect: next_daily(&now, *c),
                })
                .collect(),
        }
    }
}

/// Clears the in-flight flag even if the job panics.
struct Release(Arc<AtomicBool>);

impl Drop for Release {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Worker {
    name: &'static str,
    busy: Arc<AtomicBool>,
}

impl Worker {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start `run` on its own thread unless the previous run is still going.
    fn launch(&self, jobs: &Arc<dyn Jobs>, run: impl FnOnce(&dyn Jobs) + Send + 'static) -> bool {
        if self.busy.swap(true, Ordering::SeqCst) {
            debug!(job = self.name, "previous run still in progress, skipped");
            return false;
        }
        let release = Release(self.busy.clone());
        let jobs = jobs.clone();
        let spawned = std::thread::Builder::new().name(self.name.to_string()).spawn(move || {
            let _release = release;
            run(jobs.as_ref());
        });
        match spawned {
            Ok(_) => true,
            Err(e) => {
                warn!(job = self.name, "could not start: {}", e);
                false
            }
        }
    }
}

pub fn spawn(
    jobs: Arc<dyn Jobs>,
    plan: Plan,
    clock: VenueClock,
    stop: Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("scheduler".into())
        .spawn(move || run(jobs, plan, clock, stop))
}

/// Loop until `stop` fires or its sender is dropped.
pub fn run(jobs: Arc<dyn Jobs>, plan: Plan, clock: VenueClock, stop: Receiver<()>) {
    let mut next = Deadlines::new(&plan, clock.now());
    let bootstrap = Worker::new("bootstrap");
    let recalc = Worker::new("recalc");
    let portfolio = Worker::new("portfolio");
    let info_refresh = Worker::new("info");
    // Supervision and session windows share one worker so connects never overlap
    let link = Worker::new("link");
    let rollover = Worker::new("rollover");
    info!(next_recalc = %next.recalc, next_rollover = %next.rollover, "scheduler started");

    loop {
        let poll = if jobs.is_connected() {
            plan.connected_poll
        } else {
            plan.idle_poll
        };
        match stop.recv_timeout(poll) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }

        jobs.housekeeping();
        if jobs.link_due() {
            link.launch(&jobs, |j| j.supervise());
        }
        if jobs.session_pending() {
            bootstrap.launch(&jobs, |j| j.bootstrap());
        }

        let now = clock.now();
        if now >= next.recalc {
            recalc.launch(&jobs, |j| j.recalculate());
            next.recalc = recalc_deadline(now, plan.recalc_interval, rand::random::<u32>());
        }
        if now >= next.portfolio {
            portfolio.launch(&jobs, |j| j.portfolio_check());
            next.portfolio = now + plan.portfolio_interval;
        }
        if now >= next.info {
            info_refresh.launch(&jobs, |j| j.refresh_info());
            next.info = now + plan.info_interval;
        }
        // These must not be lost to a busy worker; retried next tick.
        if now >= next.rollover && rollover.launch(&jobs, |j| j.daily_rollover()) {
            next.rollover = next_daily(&now, plan.rollover_at);
        }
        for window in &mut next.windows {
            if now >= window.next_disconnect && link.launch(&jobs, |j| j.session_window(false)) {
                window.next_disconnect = next_daily(&now, window.disconnect_at);
            }
            if now >= window.next_connect && link.launch(&jobs, |j| j.session_window(true)) {
                window.next_connect = next_daily(&now, window.connect_at);
            }
        }
    }
    info!("scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SessionWindow;
    use crate::testing::t;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeJobs {
        ticks: AtomicUsize,
        pending: AtomicBool,
        bootstraps: AtomicUsize,
        checks: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        link_down: AtomicBool,
        supervise_runs: AtomicUsize,
        reconnect_time: Duration,
    }

    impl Jobs for FakeJobs {
        fn is_connected(&self) -> bool {
            false
        }

        fn housekeeping(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn link_due(&self) -> bool {
            self.link_down.load(Ordering::SeqCst)
        }

        fn supervise(&self) {
            self.supervise_runs.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.reconnect_time);
        }

        fn session_pending(&self) -> bool {
            self.pending.load(Ordering::SeqCst)
        }

        fn bootstrap(&self) {
            self.pending.store(false, Ordering::SeqCst);
            self.bootstraps.fetch_add(1, Ordering::SeqCst);
        }

        fn recalculate(&self) {}

        fn portfolio_check(&self) {
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now_running, Ordering::SeqCst);
            self.checks.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            self.running.fetch_sub(1, Ordering::SeqCst);
        }

        fn refresh_info(&self) {}

        fn session_window(&self, _connect: bool) {}

        fn daily_rollover(&self) {}
    }

    fn plan() -> Plan {
        Plan {
            recalc_interval: ChronoDuration::hours(1),
            portfolio_interval: ChronoDuration::zero(),
            info_interval: ChronoDuration::hours(1),
            windows: vec![],
            rollover_at: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
            connected_poll: Duration::from_millis(5),
            idle_poll: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_recalc_avoids_quiet_seconds() {
        let minute = ChronoDuration::seconds(60);
        assert_eq!(recalc_deadline(t("14.10.2026 10:00:20"), minute, 3), t("14.10.2026 10:01:20"));
        assert_eq!(recalc_deadline(t("14.10.2026 10:00:05"), minute, 3), t("14.10.2026 10:01:13"));
        assert_eq!(recalc_deadline(t("14.10.2026 10:00:57"), minute, 7), t("14.10.2026 10:02:12"));
        assert_eq!(recalc_deadline(t("14.10.2026 10:00:54"), minute, 0), t("14.10.2026 10:01:54"));
    }

    #[test]
    fn test_plan_rejects_bad_window() {
        let mut config = SchedulerConfig::default();
        config.session_windows.push(SessionWindow {
            disconnect_at: "05:50".into(),
            connect_at: "6h".into(),
        });
        assert!(matches!(Plan::from_config(&config), Err(Error::Config(_))));

        config.session_windows[0].connect_at = "06:10".into();
        let plan = Plan::from_config(&config).unwrap();
        assert_eq!(plan.windows.len(), 1);
        assert_eq!(plan.portfolio_interval, ChronoDuration::seconds(330));
    }

    #[test]
    fn test_loop_skips_overlapping_runs() {
        let fake = Arc::new(FakeJobs::default());
        fake.pending.store(true, Ordering::SeqCst);
        let (tx, rx) = crossbeam::channel::bounded(1);
        let jobs: Arc<dyn Jobs> = fake.clone();
        let handle = spawn(jobs, plan(), VenueClock::new(3), rx).unwrap();

        std::thread::sleep(Duration::from_millis(200));
        tx.send(()).unwrap();
        handle.join().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert!(fake.ticks.load(Ordering::SeqCst) >= 5);
        assert_eq!(fake.bootstraps.load(Ordering::SeqCst), 1);
        assert!(fake.checks.load(Ordering::SeqCst) >= 2);
        assert_eq!(fake.max_running.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slow_reconnect_runs_off_the_loop() {
        let fake = Arc::new(FakeJobs {
            link_down: AtomicBool::new(true),
            reconnect_time: Duration::from_millis(400),
            ..Default::default()
        });
        let (tx, rx) = crossbeam::channel::bounded(1);
        let jobs: Arc<dyn Jobs> = fake.clone();
        let handle = spawn(jobs, plan(), VenueClock::new(3), rx).unwrap();

        std::thread::sleep(Duration::from_millis(200));
        tx.send(()).unwrap();
        handle.join().unwrap();

        assert_eq!(fake.supervise_runs.load(Ordering::SeqCst), 1);
        assert!(fake.ticks.load(Ordering::SeqCst) >= 5);
        assert!(fake.checks.load(Ordering::SeqCst) >= 2);
    }
}
