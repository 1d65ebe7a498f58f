//! Cross-thread control surface of a controller session.
//!
//! The thread running [`ControllerSession::poll_loop`] and any number of
//! other threads share one [`SessionControl`]. It carries the running flag,
//! the button callback slot and the loop status used to acknowledge a stop.
//!
//! [`ControllerSession::poll_loop`]: super::session::ControllerSession::poll_loop

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use super::buttons::ButtonMask;
use super::driver::ControllerId;

/// Callback invoked for every dispatched button event.
pub type ButtonCallback = Arc<dyn Fn(ControllerId, ButtonMask) + Send + Sync>;

/// Lifecycle of the poll loop as observed from other threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopStatus {
    /// No loop has been started since the last connect.
    Idle,
    Polling,
    /// The loop exited and the pool has been cleaned up.
    Stopped,
}

struct Shared {
    running: AtomicBool,
    callback: watch::Sender<ButtonCallback>,
    status: watch::Sender<LoopStatus>,
}

/// Cloneable handle for stopping a session and swapping its callback.
#[derive(Clone)]
pub struct SessionControl {
    shared: Arc<Shared>,
}

impl SessionControl {
    pub fn new() -> Self {
        let noop: ButtonCallback = Arc::new(|_, _| {});
        let (callback, _) = watch::channel(noop);
        let (status, _) = watch::channel(LoopStatus::Idle);

        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                callback,
                status,
            }),
        }
    }

    /// Replaces the registered button callback.
    ///
    /// The poll loop reads the slot for every event it dispatches, so the new
    /// callback receives the next event and the old one receives none.
    pub fn set_button_callback<F>(&self, callback: F)
    where
        F: Fn(ControllerId, ButtonMask) + Send + Sync + 'static,
    {
        self.shared.callback.send_replace(Arc::new(callback));
        debug!("Button callback replaced");
    }

    /// Restores the default no-op callback.
    pub fn clear_button_callback(&self) {
        self.set_button_callback(|_, _| {});
    }

    /// Asks the poll loop to exit after its current cycle. Does not block.
    pub fn request_stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            info!("Stop requested for controller session");
        } else {
            debug!("Stop requested but session was not running");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> LoopStatus {
        *self.shared.status.borrow()
    }

    /// True once the poll loop has exited and released its pool.
    pub fn is_stopped(&self) -> bool {
        self.status() == LoopStatus::Stopped
    }

    /// Resolves when the poll loop has exited and released its pool.
    ///
    /// Only resolves for a session whose loop was actually started.
    pub async fn wait_stopped(&self) {
        let mut status = self.shared.status.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = status.wait_for(|s| *s == LoopStatus::Stopped).await;
    }

    pub(crate) fn reset(&self) {
        self.shared.running.store(true, Ordering::Release);
        self.shared.status.send_replace(LoopStatus::Idle);
    }

    pub(crate) fn publish(&self, status: LoopStatus) {
        self.shared.status.send_replace(status);
    }

    /// Invokes the callback currently in the slot.
    pub(crate) fn dispatch(&self, id: ControllerId, buttons: ButtonMask) {
        // Clone out of the slot so the callback runs without holding the borrow.
        let callback = self.shared.callback.borrow().clone();
        callback(id, buttons);
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionControl")
            .field("running", &self.is_running())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
