//! Core traits for the device abstraction layer.
//!
//! Models the host serial subsystem as three seams: a [`DeviceHost`] that
//! probes capability and mediates device selection, a [`SerialDevice`] wrapping
//! one open port, and the exclusive [`StreamReader`]/[`StreamWriter`] tokens
//! claimed from its duplex stream. Ownership of the tokens is the lock: only
//! the token holder may consume or produce bytes on that side, and `claim`
//! hands them out at most once per open.

use crate::error::SessionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;

/// Transmission parameters applied when opening a device.
///
/// All fields carry host defaults, so callers typically spell out only the
/// settings they care about and take `..Default::default()` for the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionParams {
    /// Bit rate in bits per second.
    pub bit_rate: u32,

    /// Number of data bits per character (7 or 8).
    pub data_bits: DataBits,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Size of the inbound chunk buffer in bytes.
    pub buffer_size: usize,

    /// Flow control mode.
    pub flow_control: FlowControl,
}

impl Default for TransmissionParams {
    fn default() -> Self {
        Self {
            bit_rate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            buffer_size: 255,
            flow_control: FlowControl::None,
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Seven,
    Eight,
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Hardware,
}

/// One entry of a device selection filter.
///
/// `product_id` is meaningful only together with `vendor_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    /// Filter matching any product of the given USB vendor.
    pub fn vendor(vendor_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: None,
        }
    }

    /// Filter matching one specific vendor/product pair.
    pub fn product(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: Some(product_id),
        }
    }
}

/// Device selection filter narrowing which physical devices may be picked.
///
/// An empty filter list matches every device the host can enumerate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionFilter {
    pub filters: Vec<DeviceFilter>,
}

impl SelectionFilter {
    /// Filter with no entries, offering every enumerable device.
    pub fn any() -> Self {
        Self::default()
    }

    /// Filter with a single vendor entry.
    pub fn vendor(vendor_id: u16) -> Self {
        Self {
            filters: vec![DeviceFilter::vendor(vendor_id)],
        }
    }

    /// Whether a device with the given USB identifiers passes this filter.
    ///
    /// Devices without USB metadata only pass an empty filter list.
    pub fn matches(&self, vendor_id: Option<u16>, product_id: Option<u16>) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        self.filters.iter().any(|f| {
            Some(f.vendor_id) == vendor_id
                && f.product_id.map_or(true, |pid| Some(pid) == product_id)
        })
    }
}

/// Read-only identity of an acquired device, surfaced for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub product: Option<String>,
}

/// Outbound modem control signals. `None` fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSignals {
    /// Data Terminal Ready.
    pub dtr: Option<bool>,
    /// Request To Send.
    pub rts: Option<bool>,
    /// Break condition.
    pub brk: Option<bool>,
}

/// Inbound modem status signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSignals {
    /// Data Carrier Detect.
    pub dcd: bool,
    /// Clear To Send.
    pub cts: bool,
    /// Ring Indicator.
    pub ri: bool,
    /// Data Set Ready.
    pub dsr: bool,
}

/// Entry point to the host's serial subsystem.
///
/// `is_supported` is the capability probe: a pure query that must report
/// `false` on hosts without a serial subsystem rather than erroring.
/// `request_device` is the user-mediated acquisition step; implementations may
/// block indefinitely while a human picks a device.
#[async_trait]
pub trait DeviceHost: Send + Sync {
    /// Whether this host exposes a serial capability at all. Never fails.
    fn is_supported(&self) -> bool;

    /// Acquire an exclusive handle to one physical device matching `filter`.
    async fn request_device(
        &self,
        filter: &SelectionFilter,
    ) -> Result<Box<dyn SerialDevice>, SessionError>;
}

/// Exclusive handle to one physical serial device.
#[async_trait]
pub trait SerialDevice: Send {
    /// Open the device with the given transmission parameters.
    async fn open(&mut self, params: &TransmissionParams) -> io::Result<()>;

    /// Claim the exclusive stream tokens for both directions of the duplex
    /// stream.
    ///
    /// Returns `None` when the device is not open or the tokens were already
    /// handed out; there can never be two live tokens for the same side.
    fn claim(&mut self) -> Option<(Box<dyn StreamReader>, Box<dyn StreamWriter>)>;

    /// Close the device handle. Both stream tokens must have been released
    /// (dropped) first.
    async fn close(&mut self) -> io::Result<()>;

    /// Identity of the underlying device.
    fn info(&self) -> DeviceInfo;

    /// Assert or clear outbound modem control signals.
    fn set_signals(&mut self, signals: OutputSignals) -> io::Result<()>;

    /// Sample the inbound modem status signals.
    fn get_signals(&mut self) -> io::Result<InputSignals>;
}

impl std::fmt::Debug for dyn SerialDevice + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDevice")
            .field("info", &self.info())
            .finish()
    }
}

/// Exclusive token for the inbound side of a device's duplex stream.
///
/// Dropping the token releases the stream lock.
#[async_trait]
pub trait StreamReader: Send {
    /// Wait for the next inbound chunk. `Ok(None)` signals end of stream.
    async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Exclusive token for the outbound side of a device's duplex stream.
#[async_trait]
pub trait StreamWriter: Send {
    /// Submit one buffer for transmission.
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush and close the outbound side.
    async fn shutdown(&mut self) -> io::Result<()>;
}
