#![warn(missing_docs)]

//! Hardware integration for the `fieldbus` stack.
//!
//! This crate couples network managers to frame transports:
//!
//! - [`HardwarePlugin`] — the contract concrete CAN drivers implement.
//! - [`HardwareInterface`] — the threaded pump: one RX thread per
//!   attached network, one global update thread, and a periodic tick
//!   thread driving the network managers.
//! - [`VirtualBus`] / [`VirtualCanPlugin`] — an in-process bus for tests
//!   and demos; every plugin sees every other plugin's frames.
//! - [`SocketCanPlugin`] — a Linux SocketCAN adapter (present but inert on
//!   other platforms).
//!
//! # Quick start
//! ```rust
//! use fieldbus::{NetworkConfig, NetworkManager};
//! use fieldbus_hardware::{HardwareInterface, VirtualBus};
//!
//! let bus = VirtualBus::new();
//! let network = NetworkManager::new(NetworkConfig::default());
//! let mut interface = HardwareInterface::new();
//! interface.assign_channel(network.clone(), Box::new(bus.plugin()));
//! interface.start();
//! // ... create internal control functions, let them claim ...
//! interface.stop();
//! ```

mod interface;
mod plugin;
mod socketcan;
mod virtual_bus;

pub use crate::interface::{FrameListener, HardwareInterface, DEFAULT_PERIODIC_UPDATE_INTERVAL};
pub use crate::plugin::HardwarePlugin;
pub use crate::socketcan::SocketCanPlugin;
pub use crate::virtual_bus::{VirtualBus, VirtualCanPlugin};
