//! In-process CAN bus simulator.
//!
//! A [`VirtualBus`] hosts any number of [`VirtualCanPlugin`] clients.
//! Every written frame is delivered to every *other* open client, like a
//! real bus without the arbitration. Used by the integration tests and
//! the demo; useful for application development without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use fieldbus_frame::Frame;

use crate::plugin::HardwarePlugin;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

struct ClientSlot {
    queue: Mutex<VecDeque<Frame>>,
    ready: Condvar,
    open: AtomicBool,
}

struct BusCore {
    clients: Mutex<Vec<Arc<ClientSlot>>>,
}

/// A shared in-process bus.
#[derive(Clone)]
pub struct VirtualBus {
    core: Arc<BusCore>,
}

impl VirtualBus {
    /// Create an empty bus.
    pub fn new() -> VirtualBus {
        VirtualBus {
            core: Arc::new(BusCore {
                clients: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Attach a new client. The plugin starts closed; the hardware
    /// interface opens it.
    pub fn plugin(&self) -> VirtualCanPlugin {
        let slot = Arc::new(ClientSlot {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            open: AtomicBool::new(false),
        });
        self.core
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&slot));
        VirtualCanPlugin {
            core: Arc::clone(&self.core),
            slot,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        VirtualBus::new()
    }
}

/// One client on a [`VirtualBus`].
pub struct VirtualCanPlugin {
    core: Arc<BusCore>,
    slot: Arc<ClientSlot>,
    read_timeout: Duration,
}

impl HardwarePlugin for VirtualCanPlugin {
    fn open(&self) -> bool {
        self.slot.open.store(true, Ordering::Release);
        true
    }

    fn close(&self) {
        self.slot.open.store(false, Ordering::Release);
        self.slot.ready.notify_all();
    }

    fn is_valid(&self) -> bool {
        self.slot.open.load(Ordering::Acquire)
    }

    fn read_frame(&self, frame: &mut Frame) -> bool {
        let deadline = Instant::now() + self.read_timeout;
        let mut queue = self.slot.queue.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(received) = queue.pop_front() {
                *frame = received;
                return true;
            }
            if !self.slot.open.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                return false;
            };
            let (guard, _) = self
                .slot
                .ready
                .wait_timeout(queue, remaining)
                .unwrap_or_else(|e| e.into_inner());
            queue = guard;
        }
    }

    fn write_frame(&self, frame: &Frame) -> bool {
        if !self.slot.open.load(Ordering::Acquire) {
            return false;
        }
        let clients = self
            .core
            .clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for client in clients {
            if Arc::ptr_eq(&client, &self.slot) || !client.open.load(Ordering::Acquire) {
                continue;
            }
            client
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(*frame);
            client.ready.notify_all();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn open_plugin(bus: &VirtualBus) -> VirtualCanPlugin {
        let plugin = bus.plugin();
        assert!(plugin.open());
        plugin
    }

    #[test]
    fn frames_reach_every_other_client() {
        let bus = VirtualBus::new();
        let a = open_plugin(&bus);
        let b = open_plugin(&bus);
        let c = open_plugin(&bus);

        let frame = Frame {
            identifier: 0x18EE_FF80,
            extended: true,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
            len: 8,
        };
        assert!(a.write_frame(&frame));

        let mut received = Frame::default();
        assert!(b.read_frame(&mut received));
        assert_eq!(received, frame);
        assert!(c.read_frame(&mut received));
        assert_eq!(received, frame);

        // The sender does not hear its own frame.
        assert!(!a.read_frame(&mut received));
    }

    #[test]
    fn read_blocks_until_a_frame_arrives() {
        let bus = VirtualBus::new();
        let reader = open_plugin(&bus);
        let writer = open_plugin(&bus);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let frame = Frame {
                identifier: 0x18EF_2010,
                extended: true,
                data: [0xAA; 8],
                len: 8,
            };
            writer.write_frame(&frame)
        });

        let mut received = Frame::default();
        assert!(reader.read_frame(&mut received));
        assert_eq!(received.identifier, 0x18EF_2010);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn closed_plugins_neither_send_nor_receive() {
        let bus = VirtualBus::new();
        let a = open_plugin(&bus);
        let b = open_plugin(&bus);

        b.close();
        assert!(!b.is_valid());

        let frame = Frame::default();
        assert!(a.write_frame(&frame));
        let mut received = Frame::default();
        assert!(!b.read_frame(&mut received));
        assert!(!b.write_frame(&frame));
    }
}
