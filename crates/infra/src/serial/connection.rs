//! Self-healing serial connection
//!
//! One dedicated thread runs a single-threaded tokio runtime that owns all
//! wire I/O. While running it cycles through:
//!
//! 1. open the port
//! 2. stream lines to the consumer while writing a heartbeat every interval
//! 3. on open failure, read error, end of stream or heartbeat write failure,
//!    drop the port, wait the reconnect backoff and go back to 1
//!
//! The heartbeat is re-armed only after a successful write, so a pulled
//! cable is noticed on the write side as quickly as on the read side.

use crate::serial::codec::DeviceLineCodec;
use crate::serial::transport::{PortOpener, SerialIo};
use futures::StreamExt;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use volware_core::domain::config::VolwareConfig;
use volware_core::domain::dispatch::LineConsumer;

/// Default pause before reopening after a failed open or a lost connection
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(1000);

/// Default pause between heartbeat writes
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Errors starting the serial worker
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to build serial runtime: {0}")]
    Runtime(io::Error),

    #[error("Failed to spawn serial worker: {0}")]
    Spawn(io::Error),
}

/// Link state as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Everything the worker needs to know about the link
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub heartbeat_payload: String,
    pub heartbeat_interval: Duration,
    pub reconnect_backoff: Duration,
}

impl SerialSettings {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            heartbeat_payload: "s".to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }

    pub fn from_config(config: &VolwareConfig) -> Self {
        Self {
            port: config.com_port.clone(),
            baud_rate: config.baud_rate,
            heartbeat_payload: config.heartbeat_payload.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            reconnect_backoff: config.reconnect_backoff(),
        }
    }

    pub fn with_heartbeat_payload(mut self, payload: impl Into<String>) -> Self {
        self.heartbeat_payload = payload.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

/// Why a streaming session ended
#[derive(Debug)]
enum Disconnect {
    Cancelled,
    EndOfStream,
    Read(io::Error),
    Heartbeat(io::Error),
}

/// State owned by the worker thread
struct Worker {
    settings: SerialSettings,
    opener: Arc<dyn PortOpener>,
    consumer: Arc<dyn LineConsumer>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Worker {
    async fn run(self, cancel: CancellationToken) {
        debug!(port = %self.settings.port, "Serial worker started");

        while !cancel.is_cancelled() {
            match self
                .opener
                .open(&self.settings.port, self.settings.baud_rate)
            {
                Ok(port) => {
                    info!(port = %self.settings.port, baud_rate = self.settings.baud_rate, "Serial port connected");
                    self.state.send_replace(ConnectionState::Connected);

                    let reason = self.stream(port, &cancel).await;
                    self.state.send_replace(ConnectionState::Disconnected);

                    match reason {
                        Disconnect::Cancelled => break,
                        Disconnect::EndOfStream => {
                            warn!(port = %self.settings.port, "Serial port closed by device")
                        }
                        Disconnect::Read(e) => {
                            warn!(port = %self.settings.port, error = %e, "Error reading from serial port")
                        }
                        Disconnect::Heartbeat(e) => {
                            warn!(port = %self.settings.port, error = %e, "Failed to send heartbeat")
                        }
                    }
                }
                Err(e) => {
                    warn!(port = %self.settings.port, error = %e, "Error opening serial port");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.settings.reconnect_backoff) => {}
            }
        }

        debug!(port = %self.settings.port, "Serial worker stopped");
    }

    async fn stream(&self, port: Box<dyn SerialIo>, cancel: &CancellationToken) -> Disconnect {
        let (reader, mut writer) = tokio::io::split(port);
        let mut lines = FramedRead::new(reader, DeviceLineCodec::new());

        let heartbeat = sleep(self.settings.heartbeat_interval);
        tokio::pin!(heartbeat);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Disconnect::Cancelled,

                // Ahead of reads: a device with a steady backlog must not
                // starve the heartbeat.
                () = &mut heartbeat => {
                    if let Err(e) = send(&mut writer, &self.settings.heartbeat_payload).await {
                        return Disconnect::Heartbeat(e);
                    }
                    heartbeat
                        .as_mut()
                        .reset(Instant::now() + self.settings.heartbeat_interval);
                }

                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        trace!(line = %line, "Line read");
                        self.consumer.on_line(&line);
                    }
                    Some(Err(e)) => return Disconnect::Read(e),
                    None => return Disconnect::EndOfStream,
                },
            }
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, payload: &str) -> io::Result<()> {
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await
}

struct WorkerHandle {
    cancel: CancellationToken,
    thread: JoinHandle<()>,
}

/// Owns the serial worker and its lifecycle
pub struct ConnectionManager {
    settings: SerialSettings,
    opener: Arc<dyn PortOpener>,
    consumer: Arc<dyn LineConsumer>,
    state: Arc<watch::Sender<ConnectionState>>,
    worker: Option<WorkerHandle>,
}

impl ConnectionManager {
    pub fn new(
        settings: SerialSettings,
        opener: Arc<dyn PortOpener>,
        consumer: Arc<dyn LineConsumer>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            settings,
            opener,
            consumer,
            state: Arc::new(state),
            worker: None,
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Spawn the worker if it is not already running.
    ///
    /// Returns once the worker exists; the port is opened in the background.
    pub fn start(&mut self) -> Result<(), ConnectionError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ConnectionError::Runtime)?;

        let cancel = CancellationToken::new();
        let worker = Worker {
            settings: self.settings.clone(),
            opener: Arc::clone(&self.opener),
            consumer: Arc::clone(&self.consumer),
            state: Arc::clone(&self.state),
        };

        let token = cancel.clone();
        let thread = std::thread::Builder::new()
            .name("volware-serial".to_string())
            .spawn(move || runtime.block_on(worker.run(token)))
            .map_err(ConnectionError::Spawn)?;

        info!(port = %self.settings.port, "Serial connection manager started");
        self.worker = Some(WorkerHandle { cancel, thread });
        Ok(())
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Pending reads, the heartbeat timer and any backoff sleep are
    /// cancelled and the port is closed. No line is delivered to the
    /// consumer after this returns.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.cancel.cancel();
        if worker.thread.join().is_err() {
            error!("Serial worker panicked");
        }
        self.state.send_replace(ConnectionState::Disconnected);
        info!(port = %self.settings.port, "Serial connection manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}
