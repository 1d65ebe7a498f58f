//! [`ControllerDriver`] backed by gilrs.
//!
//! gilrs connects gamepads through the operating system, so discovery here
//! means waiting for gamepads to show up and "connecting" means adopting them
//! into pool slots. Rumble is mapped to gilrs force feedback. Indicator lights
//! have no gilrs equivalent and are reported as unsupported.

use gilrs::ff::{BaseEffect, BaseEffectType, Effect, EffectBuilder, Replay, Ticks};
use gilrs::{Button, Event, EventType, GamepadId, Gilrs};
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::buttons::{ButtonMask, ButtonType};
use super::driver::{
    ConnectionStatus, ControllerDriver, ControllerId, ControllerPool, DeviceHandle, DriverError,
    EventKind, IndicatorPattern, SlotIndex,
};

const RUMBLE_MAGNITUDE: u16 = 45_000;
// Upper bound for a single rumble pulse; `set_rumble(false)` normally ends it sooner.
const RUMBLE_MAX_MS: u32 = 5_000;
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_DISCOVERY_WAIT: Duration = Duration::from_secs(60 * 60);

pub struct GilrsDriver {
    gilrs: Gilrs,
    handles: Vec<DeviceHandle>,
    gamepads: Vec<Option<GamepadId>>,
    slot_by_gamepad: HashMap<GamepadId, SlotIndex>,
    effects: HashMap<SlotIndex, Effect>,
}

impl GilrsDriver {
    pub fn new() -> Result<Self, DriverError> {
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(DriverError::Backend(e.to_string()));
            }
        };

        Ok(Self {
            gilrs,
            handles: Vec::new(),
            gamepads: Vec::new(),
            slot_by_gamepad: HashMap::new(),
            effects: HashMap::new(),
        })
    }

    fn gamepad_in(&self, slot: SlotIndex) -> Result<GamepadId, DriverError> {
        self.gamepads
            .get(slot.0)
            .copied()
            .flatten()
            .ok_or(DriverError::Disconnected(slot))
    }

    // Applies one gilrs event to the handle of its gamepad.
    fn apply_event(&mut self, id: GamepadId, event: EventType) {
        let Some(slot) = self.slot_by_gamepad.get(&id).copied() else {
            debug!("Skipping event from gamepad outside the pool: {:?}", id);
            return;
        };
        let Some(handle) = self.handles.get_mut(slot.0) else {
            return;
        };

        handle.event = match event {
            EventType::ButtonPressed(button, _) => match map_button(button) {
                Some(button_type) => {
                    handle.buttons.press(button_type);
                    EventKind::Button
                }
                None => EventKind::Other,
            },
            EventType::ButtonReleased(button, _) => match map_button(button) {
                Some(button_type) => {
                    handle.buttons.release(button_type);
                    EventKind::Button
                }
                None => EventKind::Other,
            },
            EventType::AxisChanged(..) | EventType::ButtonChanged(..) => EventKind::Motion,
            EventType::Connected => {
                info!("Controller {} reconnected", handle.id);
                handle.status = ConnectionStatus::Connected;
                EventKind::Status
            }
            EventType::Disconnected => {
                warn!("Controller {} disconnected", handle.id);
                handle.status = ConnectionStatus::Disconnected;
                handle.buttons = ButtonMask::EMPTY;
                EventKind::Disconnect
            }
            _ => EventKind::Other,
        };
    }
}

impl ControllerDriver for GilrsDriver {
    fn allocate(&mut self, capacity: usize) -> ControllerPool {
        debug!("Allocating {} controller slots", capacity);
        self.handles = vec![DeviceHandle::default(); capacity];
        self.gamepads = vec![None; capacity];
        self.slot_by_gamepad.clear();
        self.effects.clear();
        ControllerPool::new(capacity)
    }

    fn find(&mut self, pool: &ControllerPool, max_wait: Duration) -> usize {
        if max_wait > MAX_DISCOVERY_WAIT {
            warn!(
                "Discovery wait of {:?} limited to {:?}",
                max_wait, MAX_DISCOVERY_WAIT
            );
        }
        let deadline = discovery_deadline(max_wait);

        loop {
            // Drain pending events so gilrs registers hot-plugged gamepads
            while self.gilrs.next_event().is_some() {}

            let found: Vec<GamepadId> = self
                .gilrs
                .gamepads()
                .filter(|(_, gamepad)| gamepad.is_connected())
                .map(|(id, _)| id)
                .take(pool.capacity())
                .collect();

            if found.len() == pool.capacity() || Instant::now() >= deadline {
                for (idx, id) in found.iter().enumerate() {
                    let gamepad = self.gilrs.gamepad(*id);
                    info!("  [{}] ID: {}, Name: {}", idx, id, gamepad.name());

                    self.gamepads[idx] = Some(*id);
                    self.handles[idx] = DeviceHandle {
                        id: ControllerId(usize::from(*id) as u32),
                        address: format!("{} [{}]", gamepad.name(), uuid_text(gamepad.uuid())),
                        ..DeviceHandle::default()
                    };
                }
                return found.len();
            }

            thread::sleep(DISCOVERY_POLL_INTERVAL);
        }
    }

    fn connect_all(&mut self, pool: &ControllerPool, found: usize) -> usize {
        let mut connected = 0;

        for slot in pool.slots().take(found) {
            let Some(id) = self.gamepads[slot.0] else {
                continue;
            };
            if !self.gilrs.gamepad(id).is_connected() {
                warn!("Gamepad {} vanished before it could be connected", id);
                continue;
            }

            self.handles[slot.0].status = ConnectionStatus::Connected;
            self.slot_by_gamepad.insert(id, slot);
            connected += 1;
        }

        connected
    }

    fn is_connected(&self, slot: SlotIndex) -> bool {
        self.handles
            .get(slot.0)
            .is_some_and(DeviceHandle::is_connected)
    }

    fn set_indicator(
        &mut self,
        _slot: SlotIndex,
        _pattern: IndicatorPattern,
    ) -> Result<(), DriverError> {
        Err(DriverError::Unsupported("indicator lights"))
    }

    fn set_rumble(&mut self, slot: SlotIndex, on: bool) -> Result<(), DriverError> {
        if !on {
            if let Some(effect) = self.effects.remove(&slot) {
                effect
                    .stop()
                    .map_err(|e| DriverError::Backend(e.to_string()))?;
            }
            return Ok(());
        }

        let id = self.gamepad_in(slot)?;
        if !self.gilrs.gamepad(id).is_ff_supported() {
            return Err(DriverError::Unsupported("force feedback"));
        }

        let effect = EffectBuilder::new()
            .add_effect(BaseEffect {
                kind: BaseEffectType::Strong {
                    magnitude: RUMBLE_MAGNITUDE,
                },
                scheduling: Replay {
                    play_for: Ticks::from_ms(RUMBLE_MAX_MS),
                    ..Default::default()
                },
                ..Default::default()
            })
            .gamepads(&[id])
            .finish(&mut self.gilrs)
            .map_err(|e| DriverError::Backend(e.to_string()))?;
        effect
            .play()
            .map_err(|e| DriverError::Backend(e.to_string()))?;

        self.effects.insert(slot, effect);
        Ok(())
    }

    fn poll_once(&mut self, _pool: &ControllerPool) -> bool {
        for handle in &mut self.handles {
            handle.event = EventKind::None;
        }

        match self.gilrs.next_event() {
            Some(Event { id, event, .. }) => {
                debug!("Processing gilrs event: {:?}", event);
                self.apply_event(id, event);
                true
            }
            None => false,
        }
    }

    fn handle(&self, slot: SlotIndex) -> Option<&DeviceHandle> {
        self.handles.get(slot.0)
    }

    fn cleanup(&mut self, pool: ControllerPool) {
        debug!("Cleaning up {} controller slots", pool.capacity());
        // Dropping an effect stops it
        self.effects.clear();
        self.slot_by_gamepad.clear();
        self.gamepads.clear();
        self.handles.clear();
    }
}

// Helper function to map gilrs Button to our ButtonType
fn map_button(button: Button) -> Option<ButtonType> {
    match button {
        Button::South => Some(ButtonType::A),
        Button::East => Some(ButtonType::B),
        Button::West => Some(ButtonType::Y),
        Button::North => Some(ButtonType::X),
        Button::Start => Some(ButtonType::Start),
        Button::Select => Some(ButtonType::Select),
        Button::LeftTrigger => Some(ButtonType::LeftBumper),
        Button::RightTrigger => Some(ButtonType::RightBumper),
        Button::LeftThumb => Some(ButtonType::LeftStick),
        Button::RightThumb => Some(ButtonType::RightStick),
        Button::DPadUp => Some(ButtonType::DPadUp),
        Button::DPadDown => Some(ButtonType::DPadDown),
        Button::DPadLeft => Some(ButtonType::DPadLeft),
        Button::DPadRight => Some(ButtonType::DPadRight),
        Button::Mode => Some(ButtonType::Guide),
        _ => None,
    }
}

fn discovery_deadline(max_wait: Duration) -> Instant {
    Instant::now() + max_wait.min(MAX_DISCOVERY_WAIT)
}

fn uuid_text(uuid: [u8; 16]) -> String {
    uuid.iter().map(|b| format!("{:02x}", b)).collect()
}
