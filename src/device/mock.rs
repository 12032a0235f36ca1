//! Mock device backend for testing.
//!
//! Provides an in-memory [`MockHost`] and [`MockDevice`] that simulate a
//! serial link without hardware. The far end of each mock device is a
//! [`MockLink`]: tests push inbound chunks through it, inspect what was
//! written, and arm simulated failures for the open/write/close steps.
//!
//! # Example
//! ```
//! use serialhub::device::{
//!     DeviceHost, MockHost, SelectionFilter, SerialDevice, StreamWriter, TransmissionParams,
//! };
//!
//! # tokio_test::block_on(async {
//! let host = MockHost::new();
//! let link = host.add_device();
//!
//! let mut device = host
//!     .request_device(&SelectionFilter::any())
//!     .await
//!     .expect("grant");
//! device.open(&TransmissionParams::default()).await.expect("open");
//!
//! let (_reader, mut writer) = device.claim().expect("claim tokens");
//! writer.write_chunk(b"hello").await.expect("write");
//! assert_eq!(link.written(), vec![b"hello".to_vec()]);
//! # });
//! ```

use super::traits::{
    DeviceHost, DeviceInfo, InputSignals, OutputSignals, SelectionFilter, SerialDevice,
    StreamReader, StreamWriter, TransmissionParams,
};
use crate::error::SessionError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared state of one mock serial link, seen from both ends.
#[derive(Debug, Default)]
struct WireState {
    /// Log of all buffers written by the device side.
    written: Vec<Vec<u8>>,
    /// Parameters from the most recent successful open.
    open_params: Option<TransmissionParams>,
    /// Last applied outbound signals, merged field-wise.
    out_signals: OutputSignals,
    /// Signals reported back by `get_signals`.
    in_signals: InputSignals,
    /// Whether the device handle has been closed.
    closed: bool,
    /// Whether the writer token was shut down.
    writer_closed: bool,
    /// One-shot failure switches.
    fail_open: bool,
    fail_write: bool,
    /// Persistent close-failure switch (close may be retried).
    fail_close: bool,
}

#[derive(Debug)]
struct LinkInner {
    wire: Mutex<WireState>,
    /// Sender feeding the device's inbound stream; dropped on `finish`.
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

/// Test-side handle to the far end of a mock device.
#[derive(Debug, Clone)]
pub struct MockLink {
    inner: Arc<LinkInner>,
}

impl MockLink {
    /// Deliver one inbound chunk to the device. Dropped silently once the
    /// stream has been finished.
    pub fn push_chunk(&self, data: &[u8]) {
        if let Some(tx) = &*self.inner.tx.lock() {
            let _ = tx.send(data.to_vec());
        }
    }

    /// Signal end-of-stream on the inbound side. A pending read observes it
    /// once all queued chunks have been consumed.
    pub fn finish(&self) {
        self.inner.tx.lock().take();
    }

    /// Every buffer written by the device side, in submission order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner.wire.lock().written.clone()
    }

    /// Parameters the device was opened with, if it was opened.
    pub fn open_params(&self) -> Option<TransmissionParams> {
        self.inner.wire.lock().open_params.clone()
    }

    /// Whether the device handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.wire.lock().closed
    }

    /// Whether the writer token was shut down.
    pub fn writer_closed(&self) -> bool {
        self.inner.wire.lock().writer_closed
    }

    /// Last outbound signal values applied by the device side.
    pub fn output_signals(&self) -> OutputSignals {
        self.inner.wire.lock().out_signals
    }

    /// Set the inbound signals the device will report.
    pub fn set_input_signals(&self, signals: InputSignals) {
        self.inner.wire.lock().in_signals = signals;
    }

    /// Make the next `open` fail.
    pub fn fail_next_open(&self) {
        self.inner.wire.lock().fail_open = true;
    }

    /// Make the next `write_chunk` fail; subsequent writes succeed again.
    pub fn fail_next_write(&self) {
        self.inner.wire.lock().fail_write = true;
    }

    /// Make every `close` fail until cleared.
    pub fn set_fail_close(&self, fail: bool) {
        self.inner.wire.lock().fail_close = fail;
    }
}

/// Mock serial device. Created paired with its [`MockLink`].
#[derive(Debug)]
pub struct MockDevice {
    inner: Arc<LinkInner>,
    info: DeviceInfo,
    opened: bool,
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MockDevice {
    /// Create a device with empty identity metadata.
    pub fn new() -> (Self, MockLink) {
        Self::with_info(DeviceInfo::default())
    }

    /// Create a device reporting the given identity.
    pub fn with_info(info: DeviceInfo) -> (Self, MockLink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(LinkInner {
            wire: Mutex::new(WireState::default()),
            tx: Mutex::new(Some(tx)),
        });
        let link = MockLink {
            inner: Arc::clone(&inner),
        };
        (
            Self {
                inner,
                info,
                opened: false,
                rx: Some(rx),
            },
            link,
        )
    }
}

#[async_trait]
impl SerialDevice for MockDevice {
    async fn open(&mut self, params: &TransmissionParams) -> io::Result<()> {
        let mut wire = self.inner.wire.lock();
        if wire.fail_open {
            wire.fail_open = false;
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "simulated open failure",
            ));
        }
        wire.open_params = Some(params.clone());
        self.opened = true;
        Ok(())
    }

    fn claim(&mut self) -> Option<(Box<dyn StreamReader>, Box<dyn StreamWriter>)> {
        if !self.opened {
            return None;
        }
        let rx = self.rx.take()?;
        Some((
            Box::new(MockReader { rx }),
            Box::new(MockWriter {
                inner: Arc::clone(&self.inner),
            }),
        ))
    }

    async fn close(&mut self) -> io::Result<()> {
        let mut wire = self.inner.wire.lock();
        wire.closed = true;
        self.opened = false;
        if wire.fail_close {
            return Err(io::Error::other("simulated close failure"));
        }
        Ok(())
    }

    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn set_signals(&mut self, signals: OutputSignals) -> io::Result<()> {
        let mut wire = self.inner.wire.lock();
        if let Some(dtr) = signals.dtr {
            wire.out_signals.dtr = Some(dtr);
        }
        if let Some(rts) = signals.rts {
            wire.out_signals.rts = Some(rts);
        }
        if let Some(brk) = signals.brk {
            wire.out_signals.brk = Some(brk);
        }
        Ok(())
    }

    fn get_signals(&mut self) -> io::Result<InputSignals> {
        Ok(self.inner.wire.lock().in_signals)
    }
}

struct MockReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl StreamReader for MockReader {
    async fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        // recv drains queued chunks before observing the dropped sender
        Ok(self.rx.recv().await)
    }
}

struct MockWriter {
    inner: Arc<LinkInner>,
}

#[async_trait]
impl StreamWriter for MockWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        let mut wire = self.inner.wire.lock();
        if wire.fail_write {
            wire.fail_write = false;
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated write failure",
            ));
        }
        wire.written.push(data.to_vec());
        Ok(())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.wire.lock().writer_closed = true;
        Ok(())
    }
}

#[derive(Debug)]
struct HostState {
    supported: bool,
    devices: VecDeque<MockDevice>,
    cancel_next: bool,
    requests: Vec<SelectionFilter>,
}

/// Mock host handing out queued [`MockDevice`]s.
#[derive(Debug, Clone)]
pub struct MockHost {
    state: Arc<Mutex<HostState>>,
}

impl MockHost {
    /// Host that reports serial capability.
    pub fn new() -> Self {
        Self::with_support(true)
    }

    /// Host that reports no serial capability at all.
    pub fn unsupported() -> Self {
        Self::with_support(false)
    }

    fn with_support(supported: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                supported,
                devices: VecDeque::new(),
                cancel_next: false,
                requests: Vec::new(),
            })),
        }
    }

    /// Queue a device for the next request and return its far-end link.
    pub fn add_device(&self) -> MockLink {
        self.add_device_with_info(DeviceInfo::default())
    }

    /// Queue a device with identity metadata and return its far-end link.
    pub fn add_device_with_info(&self, info: DeviceInfo) -> MockLink {
        let (device, link) = MockDevice::with_info(info);
        self.state.lock().devices.push_back(device);
        link
    }

    /// Dismiss the next device request as user-cancelled.
    pub fn cancel_next_request(&self) {
        self.state.lock().cancel_next = true;
    }

    /// Selection filters received so far, in request order.
    pub fn requested_filters(&self) -> Vec<SelectionFilter> {
        self.state.lock().requests.clone()
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceHost for MockHost {
    fn is_supported(&self) -> bool {
        self.state.lock().supported
    }

    async fn request_device(
        &self,
        filter: &SelectionFilter,
    ) -> Result<Box<dyn SerialDevice>, SessionError> {
        let mut state = self.state.lock();
        state.requests.push(filter.clone());
        if state.cancel_next {
            state.cancel_next = false;
            return Err(SessionError::DeviceRequestCancelled);
        }
        let device = state
            .devices
            .pop_front()
            .ok_or_else(|| SessionError::request_failed("no mock device queued"))?;
        Ok(Box::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DataBits;

    #[tokio::test]
    async fn test_push_and_read_chunks() {
        let (mut device, link) = MockDevice::new();
        device.open(&TransmissionParams::default()).await.unwrap();
        let (mut reader, _writer) = device.claim().expect("claim");

        link.push_chunk(b"one");
        link.push_chunk(b"two");
        link.finish();

        assert_eq!(reader.next_chunk().await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(reader.next_chunk().await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(reader.next_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_logging() {
        let (mut device, link) = MockDevice::new();
        device.open(&TransmissionParams::default()).await.unwrap();
        let (_reader, mut writer) = device.claim().expect("claim");

        writer.write_chunk(b"a").await.unwrap();
        writer.write_chunk(b"bb").await.unwrap();
        assert_eq!(link.written(), vec![b"a".to_vec(), b"bb".to_vec()]);

        writer.shutdown().await.unwrap();
        assert!(link.writer_closed());
    }

    #[tokio::test]
    async fn test_claim_is_single_shot() {
        let (mut device, _link) = MockDevice::new();
        assert!(device.claim().is_none(), "claim before open must fail");

        device.open(&TransmissionParams::default()).await.unwrap();
        assert!(device.claim().is_some());
        assert!(device.claim().is_none(), "second claim must fail");
    }

    #[tokio::test]
    async fn test_open_records_params() {
        let (mut device, link) = MockDevice::new();
        let params = TransmissionParams {
            bit_rate: 9600,
            data_bits: DataBits::Seven,
            ..Default::default()
        };
        device.open(&params).await.unwrap();
        assert_eq!(link.open_params(), Some(params));
    }

    #[tokio::test]
    async fn test_simulated_failures() {
        let (mut device, link) = MockDevice::new();

        link.fail_next_open();
        assert!(device.open(&TransmissionParams::default()).await.is_err());
        // one-shot: the retry succeeds
        assert!(device.open(&TransmissionParams::default()).await.is_ok());

        link.set_fail_close(true);
        assert!(device.close().await.is_err());
        assert!(link.is_closed(), "close failure still marks the wire closed");
        link.set_fail_close(false);
        assert!(device.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_host_queue_and_cancel() {
        let host = MockHost::new();
        assert!(host.is_supported());

        let _link = host.add_device();
        host.cancel_next_request();
        let err = host
            .request_device(&SelectionFilter::any())
            .await
            .expect_err("cancelled");
        assert!(matches!(err, SessionError::DeviceRequestCancelled));

        // the queued device is still there for the next request
        assert!(host.request_device(&SelectionFilter::any()).await.is_ok());
        let err = host
            .request_device(&SelectionFilter::any())
            .await
            .expect_err("queue empty");
        assert!(matches!(err, SessionError::DeviceRequestFailed(_)));
    }

    #[test]
    fn test_unsupported_host_never_errors() {
        let host = MockHost::unsupported();
        assert!(!host.is_supported());
    }

    #[tokio::test]
    async fn test_signals_round_trip() {
        let (mut device, link) = MockDevice::new();
        device.open(&TransmissionParams::default()).await.unwrap();

        device
            .set_signals(OutputSignals {
                dtr: Some(true),
                rts: Some(false),
                brk: None,
            })
            .unwrap();
        let out = link.output_signals();
        assert_eq!(out.dtr, Some(true));
        assert_eq!(out.rts, Some(false));
        assert_eq!(out.brk, None);

        link.set_input_signals(InputSignals {
            cts: true,
            ..Default::default()
        });
        let input = device.get_signals().unwrap();
        assert!(input.cts);
        assert!(!input.dcd);
    }
}
