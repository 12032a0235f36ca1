//! Port session state machine.
//!
//! A [`PortSession`] owns the lifecycle of one serial connection: acquisition
//! through a [`DeviceHost`], opening with transmission parameters, a sequenced
//! writer actor, a cancellable read loop, and ordered best-effort teardown.
//!
//! # Concurrency model
//!
//! Session state sits behind a short-lived `parking_lot` mutex that is never
//! held across an await. The read loop takes ownership of the read token and
//! watches a cancellation channel, so `disconnect` can retire it without ever
//! touching the token itself. Outbound writes flow through a single actor task
//! draining one queue, which makes write ordering a structural guarantee
//! rather than a scheduling accident.
//!
//! # Teardown order
//!
//! `disconnect` releases the reader, then the writer, then the device handle.
//! Reader and writer release errors are logged and swallowed (the stream may
//! already be half-dead after a device removal); only a device-close failure
//! is reported, as [`SessionError::Teardown`]. Whatever happens, the session
//! observably ends fully disconnected.

use crate::device::{
    DeviceHost, DeviceInfo, InputSignals, OutputSignals, SelectionFilter, SerialDevice,
    StreamReader, StreamWriter, TransmissionParams,
};
use crate::error::SessionError;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Policy applied when `connect` finds the session already live.
///
/// The source history of this design wavered between the two; the default is
/// `Replace`, matching the latest revision's auto-recovery behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectPolicy {
    /// Tear down the existing connection first, swallowing teardown errors.
    #[default]
    Replace,
    /// Refuse with [`SessionError::AlreadyConnected`].
    Strict,
}

/// Lifecycle and error notifications delivered to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A connection was established; carries the device identity.
    Connected(DeviceInfo),
    /// The session finished tearing down.
    Disconnected,
    /// A queued write buffer was rejected by the device. Reported here
    /// instead of from `write`, which only confirms submission.
    WriteFailed(String),
}

/// Coarse consumer-facing status, suitable for a UI badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unsupported,
    Disconnected,
    Connected,
}

/// Transfer counters for one session, cumulative across connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionMetrics {
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub chunks_written: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Default)]
struct Counters {
    chunks_received: AtomicU64,
    bytes_received: AtomicU64,
    chunks_written: AtomicU64,
    bytes_written: AtomicU64,
}

/// State shared with the writer actor and read loop.
struct Shared {
    events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    counters: Counters,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &*self.events.lock() {
            // a dropped receiver just means nobody is listening
            let _ = tx.send(event);
        }
    }
}

/// Handle to the writer actor: the submission queue plus the task itself.
struct WriterHandle {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SessionState {
    device: Option<Box<dyn SerialDevice>>,
    writer: Option<WriterHandle>,
    reader: Option<Box<dyn StreamReader>>,
    cancel: Option<watch::Sender<bool>>,
}

/// One logical connect-to-disconnect span of serial communication.
///
/// All methods take `&self`; wrap the session in an [`Arc`] to drive the read
/// loop and `disconnect` from different tasks.
pub struct PortSession {
    host: Arc<dyn DeviceHost>,
    policy: ConnectPolicy,
    state: Mutex<SessionState>,
    shared: Arc<Shared>,
}

impl PortSession {
    /// Session with the default [`ConnectPolicy::Replace`] policy.
    pub fn new(host: Arc<dyn DeviceHost>) -> Self {
        Self::with_policy(host, ConnectPolicy::default())
    }

    /// Session with an explicit connect policy.
    pub fn with_policy(host: Arc<dyn DeviceHost>, policy: ConnectPolicy) -> Self {
        Self {
            host,
            policy,
            state: Mutex::new(SessionState::default()),
            shared: Arc::new(Shared {
                events: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    /// Capability probe: whether the host exposes a serial subsystem at all.
    pub fn is_supported(&self) -> bool {
        self.host.is_supported()
    }

    /// Whether a device handle is currently held.
    pub fn is_connected(&self) -> bool {
        self.state.lock().device.is_some()
    }

    /// Coarse status for the consumer.
    pub fn status(&self) -> SessionStatus {
        if !self.host.is_supported() {
            SessionStatus::Unsupported
        } else if self.is_connected() {
            SessionStatus::Connected
        } else {
            SessionStatus::Disconnected
        }
    }

    /// Identity of the connected device, for diagnostics.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.state.lock().device.as_ref().map(|d| d.info())
    }

    /// Snapshot of the transfer counters.
    pub fn metrics(&self) -> SessionMetrics {
        let c = &self.shared.counters;
        SessionMetrics {
            chunks_received: c.chunks_received.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            chunks_written: c.chunks_written.load(Ordering::Relaxed),
            bytes_written: c.bytes_written.load(Ordering::Relaxed),
        }
    }

    /// Subscribe to lifecycle and write-failure events.
    ///
    /// Replaces any previous subscription; the old receiver starts reporting
    /// the channel as closed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.events.lock() = Some(tx);
        rx
    }

    /// Establish a connection: capability check, user-mediated device
    /// request, open, then claim of the exclusive stream tokens.
    ///
    /// On a live session the configured [`ConnectPolicy`] decides between
    /// tearing the old connection down and refusing outright. A failure at
    /// any step leaves the session disconnected.
    pub async fn connect(
        &self,
        filter: &SelectionFilter,
        params: &TransmissionParams,
    ) -> Result<(), SessionError> {
        if self.is_connected() {
            match self.policy {
                ConnectPolicy::Strict => return Err(SessionError::AlreadyConnected),
                ConnectPolicy::Replace => {
                    debug!("connect on a live session, tearing down the previous connection");
                    if let Err(e) = self.disconnect().await {
                        warn!(error = %e, "ignoring teardown failure while replacing session");
                    }
                }
            }
        }

        if !self.host.is_supported() {
            return Err(SessionError::UnsupportedEnvironment);
        }

        let mut device = self.host.request_device(filter).await?;
        device
            .open(params)
            .await
            .map_err(|e| SessionError::open_failed(e.to_string()))?;

        let Some((reader, writer)) = device.claim() else {
            // open succeeded but the stream endpoints are unavailable; back out
            if let Err(e) = device.close().await {
                warn!(error = %e, "ignoring close failure while backing out of connect");
            }
            return Err(SessionError::open_failed(
                "stream endpoints are already locked",
            ));
        };

        let info = device.info();
        let (cancel_tx, _) = watch::channel(false);
        let writer_handle = self.spawn_writer(writer);

        {
            let mut st = self.state.lock();
            if st.device.is_some() {
                // lost a connect race; dropping the fresh handles releases the device
                return Err(SessionError::AlreadyConnected);
            }
            st.device = Some(device);
            st.writer = Some(writer_handle);
            st.reader = Some(reader);
            st.cancel = Some(cancel_tx);
        }

        debug!(?info, "session connected");
        self.shared.emit(SessionEvent::Connected(info));
        Ok(())
    }

    /// Tear the session down: reader, then writer, then device handle.
    ///
    /// Safe to call at any point, including when already disconnected (no-op)
    /// or mid-connect. Only a device-close failure is reported; by the time
    /// this returns, the session state is fully disconnected regardless.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (reader, writer, device, cancel) = {
            let mut st = self.state.lock();
            (
                st.reader.take(),
                st.writer.take(),
                st.device.take(),
                st.cancel.take(),
            )
        };
        if reader.is_none() && writer.is_none() && device.is_none() {
            return Ok(());
        }

        // 1) Read side. Waking the cancellation channel makes a running read
        //    loop observe end-of-stream; a token still in its slot means no
        //    loop ever claimed it, and dropping it releases the lock.
        if let Some(cancel) = cancel {
            let _ = cancel.send(true);
        }
        if let Some(reader) = reader {
            drop(reader);
            debug!("released read token without an active read loop");
        }

        // 2) Write side. Closing the queue lets the actor drain pending
        //    buffers and shut the writer down; its errors are logged there
        //    and never propagate.
        if let Some(WriterHandle { tx, task }) = writer {
            drop(tx);
            if let Err(e) = task.await {
                debug!(error = %e, "writer actor ended abnormally");
            }
        }

        // 3) Device handle. The one teardown step whose failure is reported,
        //    since it can indicate the hardware is in an inconsistent state.
        let result = match device {
            Some(mut device) => device
                .close()
                .await
                .map_err(|e| SessionError::teardown(e.to_string())),
            None => Ok(()),
        };

        debug!("session disconnected");
        self.shared.emit(SessionEvent::Disconnected);
        result
    }

    /// Submit buffers for transmission in the given order.
    ///
    /// Returns the total byte length of the accepted buffers without waiting
    /// for physical transmission; per-buffer transmit failures surface as
    /// [`SessionEvent::WriteFailed`] rather than errors here.
    pub fn write(&self, chunks: Vec<Vec<u8>>) -> Result<usize, SessionError> {
        let st = self.state.lock();
        let Some(writer) = st.writer.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        let mut total = 0usize;
        for buf in chunks {
            let len = buf.len();
            if writer.tx.send(buf).is_err() {
                // the actor is gone mid-teardown; report it like any late
                // write failure instead of erroring the caller
                self.shared
                    .emit(SessionEvent::WriteFailed("write queue is closed".into()));
                break;
            }
            total += len;
        }
        Ok(total)
    }

    /// Consume inbound chunks until the stream ends or the session is
    /// disconnected, invoking `on_chunk` for each non-empty chunk in arrival
    /// order.
    ///
    /// The loop takes ownership of the read token, so it is not restartable:
    /// a fresh `connect` is required for a new session. If `disconnect` has
    /// already retired the token, the loop returns before attempting a read.
    pub async fn read_loop<F>(&self, mut on_chunk: F) -> Result<(), SessionError>
    where
        F: FnMut(Vec<u8>) + Send,
    {
        let (mut reader, mut cancel_rx) = {
            let mut st = self.state.lock();
            let Some(reader) = st.reader.take() else {
                // disconnected concurrently, or a previous loop owns the token
                return Ok(());
            };
            let Some(cancel) = st.cancel.as_ref() else {
                return Ok(());
            };
            (reader, cancel.subscribe())
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel_rx.changed() => {
                    // triggered or dropped by disconnect, either way we are done
                    debug!("read loop cancelled by disconnect");
                    break;
                }
                chunk = reader.next_chunk() => match chunk {
                    Ok(Some(data)) => {
                        if !data.is_empty() {
                            let c = &self.shared.counters;
                            c.chunks_received.fetch_add(1, Ordering::Relaxed);
                            c.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);
                            on_chunk(data);
                        }
                    }
                    Ok(None) => {
                        debug!("read loop reached end of stream");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "read loop terminated by stream error");
                        break;
                    }
                }
            }
        }

        // dropping the token releases the read lock before we return
        drop(reader);
        Ok(())
    }

    /// Assert or clear outbound modem control signals on the device.
    pub fn set_signals(&self, signals: OutputSignals) -> Result<(), SessionError> {
        let mut st = self.state.lock();
        match st.device.as_mut() {
            Some(device) => Ok(device.set_signals(signals)?),
            None => Err(SessionError::NotConnected),
        }
    }

    /// Sample the inbound modem status signals from the device.
    pub fn get_signals(&self) -> Result<InputSignals, SessionError> {
        let mut st = self.state.lock();
        match st.device.as_mut() {
            Some(device) => Ok(device.get_signals()?),
            None => Err(SessionError::NotConnected),
        }
    }

    /// Spawn the actor that owns the write token and drains the submission
    /// queue one buffer at a time.
    fn spawn_writer(&self, mut writer: Box<dyn StreamWriter>) -> WriterHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            while let Some(buf) = rx.recv().await {
                match writer.write_chunk(&buf).await {
                    Ok(()) => {
                        shared.counters.chunks_written.fetch_add(1, Ordering::Relaxed);
                        shared
                            .counters
                            .bytes_written
                            .fetch_add(buf.len() as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        // isolate the failure to this buffer and keep draining
                        warn!(error = %e, len = buf.len(), "write buffer rejected by device");
                        shared.emit(SessionEvent::WriteFailed(e.to_string()));
                    }
                }
            }
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "ignoring writer shutdown failure");
            }
        });
        WriterHandle { tx, task }
    }
}

impl std::fmt::Debug for PortSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSession")
            .field("policy", &self.policy)
            .field("connected", &self.is_connected())
            .finish()
    }
}
