//! Serialhub session manager
//!
//! This library bridges a host serial subsystem to a consumer callback: a
//! small state machine wrapping a byte-stream device handle, responsible for
//! the connect/disconnect lifecycle, sequenced writes, a cancellable read
//! loop, and delivery of inbound chunks in arrival order. The surrounding
//! application (a notebook widget, a TUI, a bridge daemon) supplies connection
//! parameters, consumes chunks, and issues write and disconnect requests;
//! everything above the raw byte stream is its responsibility.
//!
//! # Modules
//!
//! - `device`: host/device abstraction with native (tokio-serial) and mock
//!   backends
//! - `session`: the [`PortSession`] lifecycle state machine
//! - `registry`: single-slot [`SessionRegistry`] evicting stale sessions
//! - `error`: unified [`SessionError`] taxonomy
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serialhub::{NativeHost, PortSession, SelectionFilter, TransmissionParams};
//!
//! # async fn example() -> Result<(), serialhub::SessionError> {
//! let session = Arc::new(PortSession::new(Arc::new(NativeHost::new())));
//!
//! let filter = SelectionFilter::vendor(0x2047);
//! let params = TransmissionParams {
//!     bit_rate: 115_200,
//!     ..Default::default()
//! };
//! session.connect(&filter, &params).await?;
//!
//! let reader = Arc::clone(&session);
//! let loop_task = tokio::spawn(async move {
//!     reader.read_loop(|chunk| println!("got {} bytes", chunk.len())).await
//! });
//!
//! session.write(vec![b"1".to_vec()])?;
//! session.disconnect().await?;
//! loop_task.await.expect("read loop panicked")?;
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod error;
pub mod registry;
pub mod session;

// Re-export commonly used types for convenience
pub use device::{
    DataBits, DeviceFilter, DeviceHost, DeviceInfo, FlowControl, InputSignals, MockDevice,
    MockHost, MockLink, NativeDevice, NativeHost, OutputSignals, Parity, PortCandidate,
    SelectionFilter, SerialDevice, StopBits, StreamReader, StreamWriter, TransmissionParams,
};
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{ConnectPolicy, PortSession, SessionEvent, SessionMetrics, SessionStatus};
