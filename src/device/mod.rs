//! Device abstraction layer.
//!
//! Traits and implementations for the host serial subsystem, enabling
//! dependency injection and testing via mocks. The native backend wraps
//! tokio-serial; the mock backend simulates a link in memory.

pub mod mock;
pub mod native;
pub mod traits;

pub use mock::{MockDevice, MockHost, MockLink};
pub use native::{is_supported, DeviceChooser, NativeDevice, NativeHost, PortCandidate};
pub use traits::*;
