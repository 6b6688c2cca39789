//! Handshake types between a network manager and the hardware pump.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Wakeup primitive for the pump thread.
///
/// The pump parks on this between cycles; RX threads, the periodic tick,
/// and senders all poke it. Notifications are latched, so a notify that
/// lands while the pump is busy is picked up by the next wait.
pub struct PumpWakeup {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl PumpWakeup {
    /// Create an unsignaled wakeup.
    pub fn new() -> PumpWakeup {
        PumpWakeup {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Latch a wakeup and wake the pump if it is parked.
    pub fn notify(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        *signaled = true;
        self.condvar.notify_all();
    }

    /// Park until notified or until `timeout` elapses. Returns true when a
    /// notification was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        if !*signaled {
            let (guard, _) = self
                .condvar
                .wait_timeout(signaled, timeout)
                .unwrap_or_else(|e| e.into_inner());
            signaled = guard;
        }
        std::mem::replace(&mut *signaled, false)
    }
}

impl Default for PumpWakeup {
    fn default() -> Self {
        PumpWakeup::new()
    }
}

/// Handle the hardware pump installs on each attached network.
///
/// Lets the manager wake the pump when outbound frames are queued and
/// refuse sends once the interface has stopped.
#[derive(Clone)]
pub struct InterfaceLink {
    running: Arc<AtomicBool>,
    wakeup: Arc<PumpWakeup>,
}

impl InterfaceLink {
    /// Build a link from the pump's running flag and wakeup.
    pub fn new(running: Arc<AtomicBool>, wakeup: Arc<PumpWakeup>) -> InterfaceLink {
        InterfaceLink { running, wakeup }
    }

    /// Whether the pump is still servicing this network.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Wake the pump.
    pub fn notify(&self) {
        self.wakeup.notify();
    }
}
