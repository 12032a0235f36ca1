//! Native device backend using tokio-serial.
//!
//! [`NativeHost`] enumerates the system's serial ports via the `serialport`
//! crate and hands out [`NativeDevice`] handles backed by
//! `tokio_serial::SerialStream`. Device selection is user-mediated in spirit:
//! a chooser callback picks from the filtered candidate list, standing in for
//! the browser-style device picker. The default chooser takes the first match.

use super::traits::{
    DataBits, DeviceHost, DeviceInfo, FlowControl, InputSignals, OutputSignals, Parity,
    SelectionFilter, SerialDevice, StopBits, StreamReader, StreamWriter, TransmissionParams,
};
use crate::error::SessionError;
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_serial::SerialStream;
use tracing::debug;

/// Whether this host can enumerate serial ports at all.
///
/// Environments without a serial subsystem report `false`; the probe never
/// fails.
pub fn is_supported() -> bool {
    serialport::available_ports().is_ok()
}

/// One enumerated device offered to the chooser.
#[derive(Debug, Clone)]
pub struct PortCandidate {
    /// System path of the port (e.g. `/dev/ttyUSB0` or `COM3`).
    pub port_name: String,
    /// USB identity, where the host exposes it.
    pub info: DeviceInfo,
}

/// Callback picking one candidate by index; `None` cancels the request.
pub type DeviceChooser = dyn Fn(&[PortCandidate]) -> Option<usize> + Send + Sync;

/// Host backed by the operating system's serial subsystem.
pub struct NativeHost {
    chooser: Option<Box<DeviceChooser>>,
}

impl NativeHost {
    /// Host whose chooser picks the first matching device.
    pub fn new() -> Self {
        Self { chooser: None }
    }

    /// Host with a custom chooser mediating device selection.
    pub fn with_chooser(
        chooser: impl Fn(&[PortCandidate]) -> Option<usize> + Send + Sync + 'static,
    ) -> Self {
        Self {
            chooser: Some(Box::new(chooser)),
        }
    }
}

impl Default for NativeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NativeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHost")
            .field("chooser", &self.chooser.is_some())
            .finish()
    }
}

#[async_trait]
impl DeviceHost for NativeHost {
    fn is_supported(&self) -> bool {
        is_supported()
    }

    async fn request_device(
        &self,
        filter: &SelectionFilter,
    ) -> Result<Box<dyn SerialDevice>, SessionError> {
        let ports = serialport::available_ports()
            .map_err(|e| SessionError::request_failed(e.to_string()))?;

        let candidates: Vec<PortCandidate> = ports
            .into_iter()
            .filter_map(|p| {
                let info = match p.port_type {
                    serialport::SerialPortType::UsbPort(usb) => DeviceInfo {
                        serial_number: usb.serial_number,
                        manufacturer: usb.manufacturer,
                        vendor_id: Some(usb.vid),
                        product_id: Some(usb.pid),
                        product: usb.product,
                    },
                    _ => DeviceInfo::default(),
                };
                filter
                    .matches(info.vendor_id, info.product_id)
                    .then_some(PortCandidate {
                        port_name: p.port_name,
                        info,
                    })
            })
            .collect();

        if candidates.is_empty() {
            return Err(SessionError::request_failed(
                "no serial device matched the selection filter",
            ));
        }
        debug!(count = candidates.len(), "offering device candidates");

        let picked = match &self.chooser {
            Some(choose) => choose(&candidates),
            None => Some(0),
        };
        let index = picked.ok_or(SessionError::DeviceRequestCancelled)?;
        let candidate = candidates.into_iter().nth(index).ok_or_else(|| {
            SessionError::request_failed(format!("chooser picked out-of-range index {index}"))
        })?;

        debug!(port = %candidate.port_name, "device request granted");
        Ok(Box::new(NativeDevice::new(
            candidate.port_name,
            candidate.info,
        )))
    }
}

/// Device handle backed by a `tokio_serial::SerialStream`.
///
/// The stream lives in the handle between `open` and `claim`; claiming splits
/// it into the two half-owning tokens, after which the file descriptor is
/// owned by the tokens and released when the last of them drops.
pub struct NativeDevice {
    port_name: String,
    info: DeviceInfo,
    stream: Option<SerialStream>,
    buffer_size: usize,
}

impl NativeDevice {
    pub(crate) fn new(port_name: String, info: DeviceInfo) -> Self {
        Self {
            port_name,
            info,
            stream: None,
            buffer_size: TransmissionParams::default().buffer_size,
        }
    }

    /// System path of the underlying port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl SerialDevice for NativeDevice {
    async fn open(&mut self, params: &TransmissionParams) -> io::Result<()> {
        if self.stream.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "device is already open",
            ));
        }
        let builder = tokio_serial::new(&self.port_name, params.bit_rate)
            .data_bits(convert_data_bits(params.data_bits))
            .parity(convert_parity(params.parity))
            .stop_bits(convert_stop_bits(params.stop_bits))
            .flow_control(convert_flow_control(params.flow_control));

        let stream = SerialStream::open(&builder).map_err(|e| match e.kind {
            tokio_serial::ErrorKind::NoDevice => {
                io::Error::new(io::ErrorKind::NotFound, e.to_string())
            }
            tokio_serial::ErrorKind::InvalidInput => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            _ => io::Error::other(e.to_string()),
        })?;

        self.buffer_size = params.buffer_size.max(1);
        self.stream = Some(stream);
        debug!(port = %self.port_name, bit_rate = params.bit_rate, "opened device");
        Ok(())
    }

    fn claim(&mut self) -> Option<(Box<dyn StreamReader>, Box<dyn StreamWriter>)> {
        let stream = self.stream.take()?;
        let (read_half, write_half) = tokio::io::split(stream);
        Some((
            Box::new(NativeReader {
                half: read_half,
                capacity: self.buffer_size,
            }),
            Box::new(NativeWriter { half: write_half }),
        ))
    }

    async fn close(&mut self) -> io::Result<()> {
        // When the tokens were claimed, they own the descriptor and have
        // already released it by the time teardown reaches this step; only an
        // unclaimed stream is still ours to drop.
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!(port = %self.port_name, "closed unclaimed device stream");
        }
        Ok(())
    }

    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn set_signals(&mut self, signals: OutputSignals) -> io::Result<()> {
        use serialport::SerialPort;
        let stream = self.stream.as_mut().ok_or_else(claimed_or_closed)?;
        if let Some(dtr) = signals.dtr {
            stream
                .write_data_terminal_ready(dtr)
                .map_err(serial_to_io)?;
        }
        if let Some(rts) = signals.rts {
            stream.write_request_to_send(rts).map_err(serial_to_io)?;
        }
        if let Some(brk) = signals.brk {
            if brk {
                stream.set_break().map_err(serial_to_io)?;
            } else {
                stream.clear_break().map_err(serial_to_io)?;
            }
        }
        Ok(())
    }

    fn get_signals(&mut self) -> io::Result<InputSignals> {
        use serialport::SerialPort;
        let stream = self.stream.as_mut().ok_or_else(claimed_or_closed)?;
        Ok(InputSignals {
            dcd: stream.read_carrier_detect().map_err(serial_to_io)?,
            cts: stream.read_clear_to_send().map_err(serial_to_io)?,
            ri: stream.read_ring_indicator().map_err(serial_to_io)?,
            dsr: stream.read_data_set_ready().map_err(serial_to_io)?,
        })
    }
}

impl std::fmt::Debug for NativeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeDevice")
            .field("port_name", &self.port_name)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

fn claimed_or_closed() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "modem signals are unavailable while the stream tokens are claimed or the device is closed",
    )
}

fn serial_to_io(e: serialport::Error) -> io::Error {
    io::Error::other(e.to_string())
}

/// Exclusive read token over the inbound half of the stream.
struct NativeReader {
    half: ReadHalf<SerialStream>,
    capacity: usize,
}

#[async_trait]
impl StreamReader for NativeReader {
    async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.capacity];
        match self.half.read(&mut buf).await {
            Ok(0) => Ok(None),
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) => Err(e),
        }
    }
}

/// Exclusive write token over the outbound half of the stream.
struct NativeWriter {
    half: WriteHalf<SerialStream>,
}

#[async_trait]
impl StreamWriter for NativeWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.half.write_all(data).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.half.shutdown().await
    }
}

// Helper conversion functions for tokio-serial types

fn convert_data_bits(bits: DataBits) -> tokio_serial::DataBits {
    match bits {
        DataBits::Seven => tokio_serial::DataBits::Seven,
        DataBits::Eight => tokio_serial::DataBits::Eight,
    }
}

fn convert_parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

fn convert_stop_bits(stop_bits: StopBits) -> tokio_serial::StopBits {
    match stop_bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    }
}

fn convert_flow_control(flow: FlowControl) -> tokio_serial::FlowControl {
    match flow {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    }
}
