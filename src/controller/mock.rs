//! Scripted driver for session tests.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::buttons::ButtonMask;
use super::driver::{
    ConnectionStatus, ControllerDriver, ControllerId, ControllerPool, DeviceHandle, DriverError,
    EventKind, IndicatorPattern, SlotIndex, MAX_CONTROLLERS,
};

/// One scripted `poll_once` result.
pub enum Step {
    /// Button events as (slot, mask); the step reports new data.
    Events(Vec<(usize, u32)>),
    /// Motion data on one slot; the step reports new data.
    Motion(usize),
    /// Runs a closure and reports no new data, ending the drain pass.
    Run(Box<dyn FnOnce() + Send>),
}

impl Step {
    pub fn events(events: &[(usize, u32)]) -> Self {
        Step::Events(events.to_vec())
    }

    pub fn motion(slot: usize) -> Self {
        Step::Motion(slot)
    }

    pub fn run(f: impl FnOnce() + Send + 'static) -> Self {
        Step::Run(Box::new(f))
    }
}

/// Calls observed by the mock.
#[derive(Debug, Default)]
pub struct MockLog {
    pub allocated: Option<usize>,
    pub allocations: usize,
    pub find_timeout: Option<Duration>,
    pub connect_calls: usize,
    pub indicator: Vec<SlotIndex>,
    pub rumble: Vec<(SlotIndex, bool)>,
    pub polls: usize,
    pub cleaned_up: bool,
}

pub struct MockDriver {
    handles: Vec<DeviceHandle>,
    found: usize,
    connectable: usize,
    failing_rumble: HashSet<SlotIndex>,
    script: Arc<Mutex<VecDeque<Step>>>,
    log: Arc<Mutex<MockLog>>,
}

impl MockDriver {
    /// Driver that reports `found` discovered and `connectable` connected
    /// devices. Counts are returned unclamped.
    pub fn new(found: usize, connectable: usize) -> Self {
        Self {
            handles: Vec::new(),
            found,
            connectable,
            failing_rumble: HashSet::new(),
            script: Arc::default(),
            log: Arc::default(),
        }
    }

    pub fn log(&self) -> Arc<Mutex<MockLog>> {
        self.log.clone()
    }

    pub fn script(&self) -> Arc<Mutex<VecDeque<Step>>> {
        self.script.clone()
    }

    pub fn fail_rumble(&mut self, slot: SlotIndex) {
        self.failing_rumble.insert(slot);
    }

    fn clear_events(&mut self) {
        for handle in &mut self.handles {
            handle.event = EventKind::None;
        }
    }
}

impl ControllerDriver for MockDriver {
    fn allocate(&mut self, capacity: usize) -> ControllerPool {
        self.handles = (0..capacity)
            .map(|i| DeviceHandle {
                id: ControllerId(i as u32),
                address: format!("00:1F:32:00:00:{:02X}", i),
                ..DeviceHandle::default()
            })
            .collect();

        let mut log = self.log.lock().unwrap();
        log.allocated = Some(capacity);
        log.allocations += 1;
        log.cleaned_up = false;
        ControllerPool::new(capacity)
    }

    fn find(&mut self, _pool: &ControllerPool, max_wait: Duration) -> usize {
        self.log.lock().unwrap().find_timeout = Some(max_wait);
        self.found
    }

    fn connect_all(&mut self, pool: &ControllerPool, found: usize) -> usize {
        self.log.lock().unwrap().connect_calls += 1;
        let linked = self.connectable.min(found).min(pool.capacity());
        for handle in self.handles.iter_mut().take(linked) {
            handle.status = ConnectionStatus::Connected;
        }
        self.connectable
    }

    fn is_connected(&self, slot: SlotIndex) -> bool {
        self.handles
            .get(slot.0)
            .is_some_and(DeviceHandle::is_connected)
    }

    fn set_indicator(
        &mut self,
        slot: SlotIndex,
        _pattern: IndicatorPattern,
    ) -> Result<(), DriverError> {
        self.log.lock().unwrap().indicator.push(slot);
        Ok(())
    }

    fn set_rumble(&mut self, slot: SlotIndex, on: bool) -> Result<(), DriverError> {
        if self.failing_rumble.contains(&slot) {
            return Err(DriverError::Disconnected(slot));
        }
        self.log.lock().unwrap().rumble.push((slot, on));
        Ok(())
    }

    fn poll_once(&mut self, _pool: &ControllerPool) -> bool {
        self.log.lock().unwrap().polls += 1;
        self.clear_events();

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Events(events)) => {
                for (slot, bits) in events {
                    if let Some(handle) = self.handles.get_mut(slot) {
                        handle.event = EventKind::Button;
                        handle.buttons = ButtonMask::from_bits(bits);
                    }
                }
                true
            }
            Some(Step::Motion(slot)) => {
                if let Some(handle) = self.handles.get_mut(slot) {
                    handle.event = EventKind::Motion;
                    handle.buttons = ButtonMask::from_bits(0xFFFF);
                }
                true
            }
            Some(Step::Run(f)) => {
                f();
                false
            }
            None => false,
        }
    }

    fn handle(&self, slot: SlotIndex) -> Option<&DeviceHandle> {
        self.handles.get(slot.0)
    }

    fn cleanup(&mut self, pool: ControllerPool) {
        assert!(pool.capacity() <= MAX_CONTROLLERS);
        self.handles.clear();
        self.log.lock().unwrap().cleaned_up = true;
    }
}
