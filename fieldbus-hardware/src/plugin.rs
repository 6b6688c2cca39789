//! The contract concrete CAN drivers implement.

use fieldbus_frame::Frame;

/// Abstract frame I/O over one CAN channel.
///
/// Implementations are shared between the RX thread (blocking in
/// [`HardwarePlugin::read_frame`]) and the pump thread (calling
/// [`HardwarePlugin::write_frame`]), so methods take `&self` and
/// implementations synchronize internally.
pub trait HardwarePlugin: Send + Sync {
    /// Open the channel. Returns false when the hardware is unavailable.
    /// Opening is the owner's responsibility; while a plugin reports
    /// invalid, the RX thread only polls `is_valid` with a 1 s back-off.
    fn open(&self) -> bool;

    /// Close the channel. Blocked readers return promptly.
    fn close(&self);

    /// Whether the channel is currently usable.
    fn is_valid(&self) -> bool;

    /// Blocking read of one frame. Returns false on timeout or once the
    /// channel is closed; the caller loops.
    fn read_frame(&self, frame: &mut Frame) -> bool;

    /// Write one frame. Returns false when the write failed; the pump
    /// retries the frame once on the next cycle.
    fn write_frame(&self, frame: &Frame) -> bool;
}
