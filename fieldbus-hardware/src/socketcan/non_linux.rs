use fieldbus_frame::Frame;

use crate::plugin::HardwarePlugin;

/// SocketCAN stand-in for platforms without it; never opens.
pub struct SocketCanPlugin {
    interface: String,
}

impl SocketCanPlugin {
    /// Create a plugin bound to an interface name. On this platform the
    /// plugin never becomes valid.
    pub fn new(interface: impl Into<String>) -> SocketCanPlugin {
        SocketCanPlugin {
            interface: interface.into(),
        }
    }
}

impl HardwarePlugin for SocketCanPlugin {
    fn open(&self) -> bool {
        tracing::error!(
            interface = %self.interface,
            "SocketCAN is only available on Linux"
        );
        false
    }

    fn close(&self) {}

    fn is_valid(&self) -> bool {
        false
    }

    fn read_frame(&self, _frame: &mut Frame) -> bool {
        false
    }

    fn write_frame(&self, _frame: &Frame) -> bool {
        false
    }
}
