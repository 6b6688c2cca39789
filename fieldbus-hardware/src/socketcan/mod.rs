//! Linux SocketCAN adapter.
//!
//! On Linux, [`SocketCanPlugin`] wraps a [`socketcan`] socket in the
//! [`HardwarePlugin`](crate::HardwarePlugin) contract. On other platforms
//! the type exists but never opens, so cross-platform code keeps
//! compiling.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::SocketCanPlugin;

#[cfg(not(target_os = "linux"))]
mod non_linux;

#[cfg(not(target_os = "linux"))]
pub use non_linux::SocketCanPlugin;
