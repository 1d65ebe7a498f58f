//! Controller session: discovery, connection and the poll/dispatch loop.
//!
//! The session is a statum state machine. An [`Idle`] session owns a driver
//! but no pool; [`ControllerSession::connect`] allocates a pool, connects what
//! it finds and moves to [`Connected`]. A connected session either runs
//! [`ControllerSession::poll_loop`] until stopped or is released directly.
//! Both paths clean up the pool and return an idle session.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::control::{LoopStatus, SessionControl};
use super::driver::{
    ControllerDriver, ControllerPool, DeviceHandle, DriverError, IndicatorPattern, SlotIndex,
    MAX_CONTROLLERS,
};

/// Timing and feedback settings of a controller session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Upper bound for the discovery phase of `connect`
    pub discovery_timeout_secs: u64,

    /// How long rumble stays on during the connect feedback sequence
    pub feedback_hold_ms: u64,

    /// Minimum time between the end of one drain pass and the next poll
    pub pacing_interval_ns: u64,

    /// Indicator lit on every connected controller
    pub indicator: IndicatorPattern,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: 5,
            feedback_hold_ms: 500,
            pacing_interval_ns: 100_000, // caps polling at roughly 10 kHz
            indicator: IndicatorPattern::Led1,
        }
    }
}

impl SessionSettings {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn feedback_hold(&self) -> Duration {
        Duration::from_millis(self.feedback_hold_ms)
    }

    pub fn pacing_interval(&self) -> Duration {
        Duration::from_nanos(self.pacing_interval_ns)
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionPhase {
    Idle,
    Connected,
}

#[machine]
pub struct ControllerSession<S: SessionPhase> {
    // Device driver, sole owner of the device state
    driver: Box<dyn ControllerDriver + Send>,

    // Pool token, present while connected
    pool: Option<ControllerPool>,

    settings: SessionSettings,

    // Shared with the threads that stop the loop or swap the callback
    control: SessionControl,
}

impl<S: SessionPhase> ControllerSession<S> {
    /// Handle for stopping the loop and registering the button callback.
    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }
}

impl ControllerSession<Idle> {
    pub fn create<D>(driver: D, settings: Option<SessionSettings>) -> Self
    where
        D: ControllerDriver + Send + 'static,
    {
        let settings = settings.unwrap_or_default();
        debug!("Creating controller session with settings: {:?}", settings);
        Self::new(Box::new(driver), None, settings, SessionControl::new())
    }

    /// Discovers and connects controllers, then plays the feedback sequence on
    /// every connected one.
    ///
    /// Returns the connected session together with the number of connected
    /// controllers. Zero means nothing was found or nothing could be
    /// connected; the pool stays allocated either way and is freed by
    /// [`ControllerSession::poll_loop`] or [`ControllerSession::release`].
    pub fn connect(mut self, max_wait: Duration) -> (ControllerSession<Connected>, usize) {
        info!("Searching for controllers for up to {:?}", max_wait);

        let pool = self.driver.allocate(MAX_CONTROLLERS);
        let capacity = pool.capacity().min(MAX_CONTROLLERS);

        let found = bounded("found", self.driver.find(&pool, max_wait), capacity);
        if found == 0 {
            warn!("No controllers found");
            self.pool = Some(pool);
            return (self.transition(), 0);
        }
        info!("Found {} controller(s)", found);

        let connected = bounded("connected", self.driver.connect_all(&pool, found), found);
        if connected < found {
            warn!("Connected {} of {} controllers", connected, found);
        }

        let primed = self.play_feedback(&pool);
        debug!("Feedback sequence completed on {} controller(s)", primed);

        self.control.reset();
        self.pool = Some(pool);

        info!("{} controller(s) connected", connected);
        (self.transition(), connected)
    }
}

impl ControllerSession<Connected> {
    /// Runs the poll/dispatch loop on the calling thread until
    /// [`SessionControl::request_stop`] is called.
    ///
    /// Each cycle drains every buffered driver event, dispatching button
    /// events to the registered callback, then sleeps until the pacing
    /// interval has passed since the drain ended. On exit the pool is cleaned
    /// up and [`LoopStatus::Stopped`] is published.
    pub fn poll_loop(mut self) -> ControllerSession<Idle> {
        let Some(pool) = self.pool.take() else {
            error!("Poll loop started without a controller pool");
            self.control.publish(LoopStatus::Stopped);
            return self.transition();
        };

        info!("Starting controller poll loop");
        self.control.publish(LoopStatus::Polling);

        let interval = self.settings.pacing_interval();
        let mut stats = LoopStats::new();

        while self.control.is_running() {
            let dispatched = self.drain(&pool);
            pace_until(Instant::now() + interval);
            stats.record(dispatched);
        }

        info!(
            "Controller poll loop stopped after {} cycles, {} button events",
            stats.total_cycles, stats.total_events
        );

        self.driver.cleanup(pool);
        self.control.publish(LoopStatus::Stopped);
        debug!("Controller pool released");

        self.transition()
    }

    /// Cleans up the pool without polling, e.g. after nothing was found.
    pub fn release(mut self) -> ControllerSession<Idle> {
        self.control.request_stop();
        if let Some(pool) = self.pool.take() {
            self.driver.cleanup(pool);
            info!("Controller pool released without polling");
        }
        self.control.publish(LoopStatus::Stopped);
        self.transition()
    }

    /// Polls until the driver has no more data. Returns the number of
    /// dispatched button events.
    fn drain(&mut self, pool: &ControllerPool) -> usize {
        let mut dispatched = 0;

        while self.control.is_running() && self.driver.poll_once(pool) {
            for slot in pool.slots() {
                let Some((id, buttons)) = self
                    .driver
                    .handle(slot)
                    .and_then(DeviceHandle::button_event)
                else {
                    continue;
                };

                debug!("Button event from {} ({}): {:?}", id, slot, buttons);
                self.control.dispatch(id, buttons);
                dispatched += 1;
            }
        }

        dispatched
    }
}

impl<S: SessionPhase> ControllerSession<S> {
    // Lights the indicator and pulses rumble on every connected slot.
    fn play_feedback(&mut self, pool: &ControllerPool) -> usize {
        let mut completed = 0;

        for slot in pool.slots() {
            if !self.driver.is_connected(slot) {
                continue;
            }

            if let Some(handle) = self.driver.handle(slot) {
                info!("Controller {} connected in {} ({})", handle.id, slot, handle.address);
            }

            match self.feedback_sequence(slot) {
                Ok(()) => completed += 1,
                Err(e) => warn!("Skipping feedback for {}: {}", slot, e),
            }
        }

        completed
    }

    fn feedback_sequence(&mut self, slot: SlotIndex) -> Result<(), DriverError> {
        match self.driver.set_indicator(slot, self.settings.indicator) {
            Err(DriverError::Unsupported(what)) => {
                debug!("Indicator unavailable on {}: {}", slot, what)
            }
            other => other?,
        }

        self.driver.set_rumble(slot, true)?;
        thread::sleep(self.settings.feedback_hold());
        self.driver.set_rumble(slot, false)
    }
}

// Clamps a count reported by the driver to its allowed maximum.
fn bounded(what: &str, reported: usize, max: usize) -> usize {
    if reported > max {
        warn!(
            "Driver reported {} {} controllers, limiting to {}",
            reported, what, max
        );
        max
    } else {
        reported
    }
}

// Blocks until `deadline` on the monotonic clock.
fn pace_until(deadline: Instant) {
    if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        thread::sleep(remaining);
    }
}

// Periodic loop statistics
struct LoopStats {
    cycles: u64,
    events: u64,
    total_cycles: u64,
    total_events: u64,
    window_start: Instant,
    window_started_at: DateTime<Local>,
}

impl LoopStats {
    const LOG_INTERVAL: Duration = Duration::from_secs(10);

    fn new() -> Self {
        Self {
            cycles: 0,
            events: 0,
            total_cycles: 0,
            total_events: 0,
            window_start: Instant::now(),
            window_started_at: Local::now(),
        }
    }

    fn record(&mut self, dispatched: usize) {
        self.cycles += 1;
        self.events += dispatched as u64;
        self.total_cycles += 1;
        self.total_events += dispatched as u64;

        let elapsed = self.window_start.elapsed();
        if elapsed > Self::LOG_INTERVAL {
            info!(
                "Poll loop stats since {}: {} cycles, {} button events in {:.1} seconds (avg {:.0} cycles/sec)",
                self.window_started_at.format("%H:%M:%S"),
                self.cycles,
                self.events,
                elapsed.as_secs_f64(),
                self.cycles as f64 / elapsed.as_secs_f64()
            );
            self.cycles = 0;
            self.events = 0;
            self.window_start = Instant::now();
            self.window_started_at = Local::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::driver::ControllerId;
    use crate::controller::mock::{MockDriver, Step};
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(ControllerId, u32)>>>;

    fn fast_settings() -> Option<SessionSettings> {
        Some(SessionSettings {
            feedback_hold_ms: 0,
            ..SessionSettings::default()
        })
    }

    fn recorder(control: &SessionControl) -> Seen {
        let seen = Seen::default();
        let sink = seen.clone();
        control.set_button_callback(move |id, mask| sink.lock().unwrap().push((id, mask.bits())));
        seen
    }

    fn stop_step(control: &SessionControl) -> Step {
        let control = control.clone();
        Step::run(move || control.request_stop())
    }

    #[test]
    fn connect_counts_only_connected_controllers() {
        let driver = MockDriver::new(3, 2);
        let log = driver.log();

        let session = ControllerSession::create(driver, fast_settings());
        let (session, connected) = session.connect(Duration::from_secs(5));

        assert_eq!(connected, 2);
        let log = log.lock().unwrap();
        assert_eq!(log.find_timeout, Some(Duration::from_secs(5)));
        assert_eq!(log.indicator, vec![SlotIndex(0), SlotIndex(1)]);
        assert_eq!(
            log.rumble,
            vec![
                (SlotIndex(0), true),
                (SlotIndex(0), false),
                (SlotIndex(1), true),
                (SlotIndex(1), false),
            ]
        );
        assert!(session.control().is_running());
    }

    #[test]
    fn connect_with_nothing_found_skips_feedback_and_keeps_pool() {
        let driver = MockDriver::new(0, 0);
        let log = driver.log();

        let (session, connected) =
            ControllerSession::create(driver, fast_settings()).connect(Duration::from_secs(5));

        assert_eq!(connected, 0);
        {
            let log = log.lock().unwrap();
            assert_eq!(log.connect_calls, 0);
            assert!(log.indicator.is_empty());
            assert!(log.rumble.is_empty());
            assert_eq!(log.allocated, Some(MAX_CONTROLLERS));
            assert!(!log.cleaned_up);
        }

        let _idle = session.release();
        assert!(log.lock().unwrap().cleaned_up);
    }

    #[test]
    fn feedback_failure_skips_only_that_controller() {
        let mut driver = MockDriver::new(3, 3);
        driver.fail_rumble(SlotIndex(1));
        let log = driver.log();

        let (_session, connected) =
            ControllerSession::create(driver, fast_settings()).connect(Duration::ZERO);

        assert_eq!(connected, 3);
        let log = log.lock().unwrap();
        assert_eq!(log.indicator, vec![SlotIndex(0), SlotIndex(1), SlotIndex(2)]);
        assert!(log.rumble.contains(&(SlotIndex(2), false)));
        assert!(!log.rumble.contains(&(SlotIndex(1), false)));
    }

    #[test]
    fn drain_dispatches_in_slot_order() {
        let driver = MockDriver::new(7, 7);
        let script = driver.script();
        let (session, _) =
            ControllerSession::create(driver, fast_settings()).connect(Duration::ZERO);
        let control = session.control();
        let seen = recorder(&control);

        {
            let mut script = script.lock().unwrap();
            script.push_back(Step::events(&[(5, 0x20), (2, 0x04)]));
            script.push_back(Step::events(&[(0, 0x01)]));
            script.push_back(stop_step(&control));
        }

        let _idle = session.poll_loop();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ControllerId(2), 0x04),
                (ControllerId(5), 0x20),
                (ControllerId(0), 0x01)
            ]
        );
    }

    #[test]
    fn non_button_events_are_ignored() {
        let driver = MockDriver::new(2, 2);
        let script = driver.script();
        let (session, _) =
            ControllerSession::create(driver, fast_settings()).connect(Duration::ZERO);
        let control = session.control();
        let seen = recorder(&control);

        {
            let mut script = script.lock().unwrap();
            script.push_back(Step::motion(1));
            script.push_back(Step::events(&[(0, 0x08)]));
            script.push_back(stop_step(&control));
        }

        let _idle = session.poll_loop();

        assert_eq!(*seen.lock().unwrap(), vec![(ControllerId(0), 0x08)]);
    }

    #[test]
    fn replaced_callback_takes_over_mid_loop() {
        let driver = MockDriver::new(1, 1);
        let script = driver.script();
        let (session, _) =
            ControllerSession::create(driver, fast_settings()).connect(Duration::ZERO);
        let control = session.control();
        let first = recorder(&control);
        let second = Seen::default();

        {
            let swapper = control.clone();
            let sink = second.clone();
            let mut script = script.lock().unwrap();
            script.push_back(Step::events(&[(0, 0x01)]));
            script.push_back(Step::run(move || {
                swapper.set_button_callback(move |id, mask| {
                    sink.lock().unwrap().push((id, mask.bits()))
                })
            }));
            script.push_back(Step::events(&[(0, 0x02)]));
            script.push_back(Step::events(&[(0, 0x04)]));
            script.push_back(stop_step(&control));
        }

        let _idle = session.poll_loop();

        assert_eq!(*first.lock().unwrap(), vec![(ControllerId(0), 0x01)]);
        assert_eq!(
            *second.lock().unwrap(),
            vec![(ControllerId(0), 0x02), (ControllerId(0), 0x04)]
        );
    }

    #[test]
    fn events_after_stop_are_not_dispatched() {
        let driver = MockDriver::new(1, 1);
        let script = driver.script();
        let (session, _) =
            ControllerSession::create(driver, fast_settings()).connect(Duration::ZERO);
        let control = session.control();
        let seen = recorder(&control);

        {
            let mut script = script.lock().unwrap();
            script.push_back(stop_step(&control));
            script.push_back(Step::events(&[(0, 0x01)]));
        }

        let _idle = session.poll_loop();

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_from_other_thread_releases_pool_and_acknowledges() {
        let driver = MockDriver::new(1, 1);
        let log = driver.log();
        let (session, _) =
            ControllerSession::create(driver, fast_settings()).connect(Duration::ZERO);
        let control = session.control();

        let worker = thread::spawn(move || session.poll_loop());

        while control.status() != LoopStatus::Polling {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!log.lock().unwrap().cleaned_up);

        control.request_stop();
        let _idle = worker.join().unwrap();

        assert!(control.is_stopped());
        assert!(log.lock().unwrap().cleaned_up);
    }

    #[tokio::test]
    async fn wait_stopped_resolves_after_cleanup() {
        let driver = MockDriver::new(2, 1);
        let log = driver.log();
        let (session, _) =
            ControllerSession::create(driver, fast_settings()).connect(Duration::ZERO);
        let control = session.control();

        let worker = tokio::task::spawn_blocking(move || session.poll_loop());
        control.request_stop();
        control.wait_stopped().await;

        assert!(log.lock().unwrap().cleaned_up);
        worker.await.unwrap();
    }

    #[test]
    fn zero_found_session_loop_exits_immediately() {
        let driver = MockDriver::new(0, 0);
        let log = driver.log();
        let (session, connected) =
            ControllerSession::create(driver, fast_settings()).connect(Duration::ZERO);
        assert_eq!(connected, 0);

        let _idle = session.poll_loop();
        let log = log.lock().unwrap();
        assert!(log.cleaned_up);
        assert_eq!(log.polls, 0);
    }

    #[test]
    fn idle_session_can_reconnect() {
        let driver = MockDriver::new(2, 2);
        let log = driver.log();
        let (session, _) =
            ControllerSession::create(driver, fast_settings()).connect(Duration::ZERO);
        let idle = session.release();
        assert!(!idle.control().is_running());

        let (session, connected) = idle.connect(Duration::ZERO);
        assert_eq!(connected, 2);
        assert!(session.control().is_running());
        assert_eq!(log.lock().unwrap().allocations, 2);
    }

    #[test]
    fn poll_loop_paces_every_pass() {
        const PASSES: u32 = 3;
        let interval = Duration::from_millis(20);

        let driver = MockDriver::new(1, 1);
        let script = driver.script();
        let log = driver.log();
        let settings = SessionSettings {
            feedback_hold_ms: 0,
            pacing_interval_ns: interval.as_nanos() as u64,
            ..SessionSettings::default()
        };
        let (session, _) =
            ControllerSession::create(driver, Some(settings)).connect(Duration::ZERO);
        let control = session.control();

        {
            let mut script = script.lock().unwrap();
            for _ in 0..PASSES {
                script.push_back(Step::run(|| {}));
            }
            script.push_back(stop_step(&control));
        }

        let start = Instant::now();
        let _idle = session.poll_loop();

        assert!(start.elapsed() >= interval * PASSES);
        assert_eq!(log.lock().unwrap().polls, PASSES as usize + 1);
    }

    #[test]
    fn loop_stats_window_resets_after_log_interval() {
        let mut stats = LoopStats::new();
        stats.record(2);
        stats.record(1);
        assert_eq!((stats.cycles, stats.events), (2, 3));

        stats.window_start = Instant::now()
            .checked_sub(LoopStats::LOG_INTERVAL + Duration::from_secs(1))
            .unwrap();
        stats.record(4);

        assert_eq!((stats.cycles, stats.events), (0, 0));
        assert_eq!((stats.total_cycles, stats.total_events), (3, 7));
        assert!(stats.window_start.elapsed() < LoopStats::LOG_INTERVAL);
    }

    #[test]
    fn pacing_waits_at_least_the_interval() {
        let start = Instant::now();
        pace_until(start + Duration::from_micros(100));
        assert!(start.elapsed() >= Duration::from_micros(100));

        // Deadline already passed
        pace_until(start);
    }

    proptest! {
        #[test]
        fn connect_count_never_exceeds_found_or_capacity(
            found in 0usize..12,
            connectable in 0usize..12,
            wait_secs in 0u64..30,
        ) {
            let driver = MockDriver::new(found, connectable);
            let log = driver.log();
            let (_session, connected) = ControllerSession::create(driver, fast_settings())
                .connect(Duration::from_secs(wait_secs));

            let effective_found = found.min(MAX_CONTROLLERS);
            prop_assert!(connected <= effective_found);
            prop_assert!(effective_found <= MAX_CONTROLLERS);
            if effective_found == 0 {
                prop_assert_eq!(connected, 0);
                prop_assert!(log.lock().unwrap().indicator.is_empty());
            }
        }
    }
}
