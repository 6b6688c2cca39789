//! The threaded pump between hardware plugins and network managers.
//!
//! Three kinds of threads run while the interface is started:
//!
//! - one **RX thread per channel**, blocking in the plugin's `read_frame`
//!   and pushing frames onto the channel's inbound queue;
//! - one **update thread**, parked on a condition variable with a 1 s
//!   timeout, draining inbound queues into the network managers, running
//!   the periodic tick, and draining outbound queues into the plugins;
//! - one **tick thread**, latching a periodic update flag every
//!   `periodic_update_interval`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fieldbus::{InterfaceLink, NetworkManager, PumpWakeup};
use fieldbus_frame::Frame;

use crate::plugin::HardwarePlugin;

/// Default tick granularity of the pump.
pub const DEFAULT_PERIODIC_UPDATE_INTERVAL: Duration = Duration::from_millis(4);

/// Listener invoked from the pump thread for every frame that crossed the
/// wire. Never called under a lock.
pub type FrameListener = Box<dyn Fn(&Frame) + Send + Sync>;

struct Channel {
    network: Arc<NetworkManager>,
    plugin: Arc<dyn HardwarePlugin>,
    inbound: Mutex<VecDeque<Frame>>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
}

struct PumpShared {
    running: Arc<AtomicBool>,
    wakeup: Arc<PumpWakeup>,
    tick_pending: AtomicBool,
    update_interval: Duration,
    channels: Mutex<Vec<Arc<Channel>>>,
    frame_received: Mutex<Vec<FrameListener>>,
    frame_transmitted: Mutex<Vec<FrameListener>>,
}

impl PumpShared {
    fn notify_received(&self, frame: &Frame) {
        for listener in self
            .frame_received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            listener(frame);
        }
    }

    fn notify_transmitted(&self, frame: &Frame) {
        for listener in self
            .frame_transmitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            listener(frame);
        }
    }
}

/// The per-process hardware pump. Owns the update and tick threads and one
/// RX thread per assigned channel.
pub struct HardwareInterface {
    shared: Arc<PumpShared>,
    update_thread: Option<JoinHandle<()>>,
    tick_thread: Option<JoinHandle<()>>,
}

impl HardwareInterface {
    /// A pump with the default 4 ms tick.
    pub fn new() -> HardwareInterface {
        Self::with_update_interval(DEFAULT_PERIODIC_UPDATE_INTERVAL)
    }

    /// A pump with a custom tick granularity.
    pub fn with_update_interval(update_interval: Duration) -> HardwareInterface {
        HardwareInterface {
            shared: Arc::new(PumpShared {
                running: Arc::new(AtomicBool::new(false)),
                wakeup: Arc::new(PumpWakeup::new()),
                tick_pending: AtomicBool::new(false),
                update_interval,
                channels: Mutex::new(Vec::new()),
                frame_received: Mutex::new(Vec::new()),
                frame_transmitted: Mutex::new(Vec::new()),
            }),
            update_thread: None,
            tick_thread: None,
        }
    }

    /// Couple a network manager to a frame driver.
    ///
    /// Returns false when the network is already assigned. May be called
    /// before or after [`HardwareInterface::start`]; when the interface is
    /// already running the channel comes up immediately.
    pub fn assign_channel(
        &self,
        network: Arc<NetworkManager>,
        plugin: Box<dyn HardwarePlugin>,
    ) -> bool {
        let mut channels = self
            .shared
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if channels
            .iter()
            .any(|channel| Arc::ptr_eq(&channel.network, &network))
        {
            tracing::error!("network is already assigned to this interface");
            return false;
        }
        let channel = Arc::new(Channel {
            network,
            plugin: Arc::from(plugin),
            inbound: Mutex::new(VecDeque::new()),
            rx_thread: Mutex::new(None),
        });
        if self.shared.running.load(Ordering::Acquire) {
            self.bring_up_channel(&channel);
        }
        channels.push(channel);
        true
    }

    /// Spawn the pump threads and bring every assigned channel up.
    /// Returns false when the interface is already running.
    pub fn start(&mut self) -> bool {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            tracing::error!("cannot start the hardware interface more than once");
            return false;
        }

        let channels: Vec<Arc<Channel>> = self
            .shared
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for channel in &channels {
            self.bring_up_channel(channel);
        }

        let shared = Arc::clone(&self.shared);
        self.update_thread = Some(thread::spawn(move || update_thread_function(shared)));
        let shared = Arc::clone(&self.shared);
        self.tick_thread = Some(thread::spawn(move || tick_thread_function(shared)));
        true
    }

    /// Stop the pump: joins every thread, closes every plugin, detaches
    /// and clears every network. Returns false when not running.
    pub fn stop(&mut self) -> bool {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.shared.wakeup.notify();
        if let Some(handle) = self.update_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.tick_thread.take() {
            let _ = handle.join();
        }

        let channels: Vec<Arc<Channel>> = self
            .shared
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for channel in &channels {
            channel.plugin.close();
            let handle = channel
                .rx_thread
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
            channel.network.detach_interface();
            channel.network.clear_queues();
            channel
                .inbound
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
        }
        true
    }

    /// Whether the pump threads are running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Observe every frame delivered by any plugin.
    pub fn add_frame_received_listener(&self, listener: FrameListener) {
        self.shared
            .frame_received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Observe every frame successfully written to any plugin.
    pub fn add_frame_transmitted_listener(&self, listener: FrameListener) {
        self.shared
            .frame_transmitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    fn bring_up_channel(&self, channel: &Arc<Channel>) {
        if !channel.plugin.open() {
            tracing::error!("hardware plugin failed to open; RX thread will retry");
        }
        channel.network.attach_interface(InterfaceLink::new(
            Arc::clone(&self.shared.running),
            Arc::clone(&self.shared.wakeup),
        ));
        let shared = Arc::clone(&self.shared);
        let rx_channel = Arc::clone(channel);
        *channel
            .rx_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner()) =
            Some(thread::spawn(move || rx_thread_function(shared, rx_channel)));
    }
}

impl Default for HardwareInterface {
    fn default() -> Self {
        HardwareInterface::new()
    }
}

impl Drop for HardwareInterface {
    fn drop(&mut self) {
        self.stop();
    }
}

fn rx_thread_function(shared: Arc<PumpShared>, channel: Arc<Channel>) {
    while shared.running.load(Ordering::Acquire) {
        if !channel.plugin.is_valid() {
            // Re-opening is the owner's job; this thread only backs off
            // until the plugin becomes valid again.
            tracing::error!("hardware plugin is unassigned or invalid");
            thread::sleep(Duration::from_secs(1));
            continue;
        }
        let mut frame = Frame::default();
        if channel.plugin.read_frame(&mut frame) {
            channel
                .inbound
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(frame);
            shared.wakeup.notify();
        }
    }
}

fn update_thread_function(shared: Arc<PumpShared>) {
    while shared.running.load(Ordering::Acquire) {
        shared.wakeup.wait_timeout(Duration::from_secs(1));
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        let channels: Vec<Arc<Channel>> = shared
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        // Stage 1: inbound frames into the network managers, in delivery
        // order per channel.
        for channel in &channels {
            loop {
                let frame = channel
                    .inbound
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .pop_front();
                let Some(frame) = frame else {
                    break;
                };
                shared.notify_received(&frame);
                channel.network.process_receive_frame(&frame);
            }
        }

        // Stage 2: periodic tick.
        if shared.tick_pending.swap(false, Ordering::AcqRel) {
            for channel in &channels {
                channel.network.update();
            }
        }

        // Stage 3: outbound frames to the plugins.
        for channel in &channels {
            channel.network.flush_outbound(&mut |frame| {
                let written = channel.plugin.write_frame(frame);
                if written {
                    shared.notify_transmitted(frame);
                }
                written
            });
        }
    }
}

fn tick_thread_function(shared: Arc<PumpShared>) {
    while shared.running.load(Ordering::Acquire) {
        shared.tick_pending.store(true, Ordering::Release);
        shared.wakeup.notify();
        thread::sleep(shared.update_interval);
    }
}
