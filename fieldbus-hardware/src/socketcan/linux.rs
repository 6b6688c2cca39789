use std::sync::RwLock;
use std::time::Duration;

use embedded_can::{Frame as EmbeddedFrame, Id};
use fieldbus::NetworkError;
use socketcan::{CanFrame, CanSocket, Socket, SocketOptions};

use fieldbus_frame::Frame;

use crate::plugin::HardwarePlugin;

/// How long a blocking read waits before giving the RX loop a chance to
/// observe shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Classic CAN SocketCAN driver for the hardware interface.
pub struct SocketCanPlugin {
    interface: String,
    socket: RwLock<Option<CanSocket>>,
}

impl SocketCanPlugin {
    /// Create a plugin bound to an interface name (e.g. `"can0"` or
    /// `"vcan0"`). The socket is opened by the hardware interface.
    pub fn new(interface: impl Into<String>) -> SocketCanPlugin {
        SocketCanPlugin {
            interface: interface.into(),
            socket: RwLock::new(None),
        }
    }

    fn open_socket(&self) -> Result<CanSocket, NetworkError> {
        let socket = CanSocket::open(&self.interface).map_err(|err| {
            tracing::error!(interface = %self.interface, "failed to open SocketCAN: {err}");
            NetworkError::PluginIoFailure
        })?;
        socket.set_read_timeout(READ_TIMEOUT).map_err(|err| {
            tracing::error!(interface = %self.interface, "failed to set read timeout: {err}");
            NetworkError::PluginIoFailure
        })?;
        Ok(socket)
    }
}

impl HardwarePlugin for SocketCanPlugin {
    fn open(&self) -> bool {
        match self.open_socket() {
            Ok(socket) => {
                *self.socket.write().unwrap_or_else(|e| e.into_inner()) = Some(socket);
                true
            }
            Err(_) => false,
        }
    }

    fn close(&self) {
        *self.socket.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn is_valid(&self) -> bool {
        self.socket
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn read_frame(&self, frame: &mut Frame) -> bool {
        let guard = self.socket.read().unwrap_or_else(|e| e.into_inner());
        let Some(socket) = guard.as_ref() else {
            return false;
        };
        let received = match socket.read_frame() {
            Ok(CanFrame::Data(data_frame)) => data_frame,
            // Remote and error frames have no payload to route.
            Ok(_) => return false,
            Err(_) => return false,
        };
        let data = received.data();
        if data.len() > frame.data.len() {
            return false;
        }
        let (identifier, extended) = match received.id() {
            Id::Extended(id) => (id.as_raw(), true),
            Id::Standard(id) => (u32::from(id.as_raw()), false),
        };
        frame.identifier = identifier;
        frame.extended = extended;
        frame.data = [0u8; 8];
        frame.data[..data.len()].copy_from_slice(data);
        frame.len = data.len() as u8;
        true
    }

    fn write_frame(&self, frame: &Frame) -> bool {
        let guard = self.socket.read().unwrap_or_else(|e| e.into_inner());
        let Some(socket) = guard.as_ref() else {
            return false;
        };
        let id = EmbeddedFrame::id(frame);
        let Some(can_frame) = <CanFrame as EmbeddedFrame>::new(id, frame.payload()) else {
            return false;
        };
        match socket.write_frame(&can_frame) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(interface = %self.interface, "SocketCAN write failed: {err}");
                false
            }
        }
    }
}
