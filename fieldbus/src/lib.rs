#![warn(missing_docs)]

//! ISO 11783 / SAE J1939 network manager.
//!
//! This crate implements the bus-level semantics every higher application
//! protocol sits on: address claiming, NAME-to-address lookup tables,
//! PGN-based routing of 29-bit identifiers, and the per-bus message
//! pipelines. It plugs into a hardware pump (see the `fieldbus-hardware`
//! crate) through a narrow surface: one call per received frame, a
//! periodic tick, and an outbound drain.
//!
//! The main entry points:
//!
//! - [`NetworkManager`] — one per bus; owns the address table, the
//!   callback registries, the registered transport protocols and the
//!   busload estimator.
//! - [`ControlFunction`] — a logical peer: internal (ours, claims an
//!   address), external (observed), or partnered (declared by NAME
//!   filters).
//! - [`TransportProtocol`] — registration contract for TP/ETP-style
//!   protocols that carry payloads over 8 bytes.
//!
//! # Quick start
//! ```rust
//! use fieldbus::{NetworkConfig, NetworkManager};
//! use fieldbus_frame::Name;
//!
//! let network = NetworkManager::new(NetworkConfig::default());
//! let name = Name::builder()
//!     .identity_number(1)
//!     .manufacturer_code(69)
//!     .arbitrary_address_capable(true)
//!     .build();
//! let ecu = network.create_internal_control_function(name, 0x1C).unwrap();
//! assert!(!ecu.address_valid()); // claims once a hardware pump drives us
//! ```

mod address_claim;
mod busload;
mod config;
mod control_function;
mod error;
mod link;
mod message;
mod network;
mod protocol;
mod storage;

pub use crate::address_claim::ClaimState;
pub use crate::config::NetworkConfig;
pub use crate::control_function::{ControlFunction, ControlFunctionKind};
pub use crate::error::NetworkError;
pub use crate::link::{InterfaceLink, PumpWakeup};
pub use crate::message::{Message, ABSOLUTE_MAX_MESSAGE_LENGTH};
pub use crate::network::{NetworkManager, PgnCallback, TransmitCompleteCallback};
pub use crate::protocol::{TransmitRequest, TransportProtocol};
pub use crate::storage::StoragePlugin;

pub use fieldbus_frame as frame;
