// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Connection lifecycle for a single dispenser.
//!
//! A [`Session`] owns the physical link, the writer half and the background
//! reader loop. Everything it observes is published on one ordered
//! [`SessionEvent`] channel; the session is the only producer.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::ack::{AckSlot, PendingAck};
use super::framer::LineFramer;
use super::link::{Connector, DeviceHandle, Link, LinkReader, LinkWriter};
use super::liveness::{self, LivenessConfig};
use super::protocol::Command;
use crate::error::{ConnectCause, LinkError};
use crate::events::SessionEvent;

const READ_BUFFER_SIZE: usize = 1024;

/// Upper bound on flushing the output stream during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// State of the session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// A connection attempt is in flight. At most one at a time.
    Connecting,
    Connected,
}

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Physical connect attempts, each on a fresh connection object.
    pub connect_attempts: u32,
    /// Wait between physical connect attempts.
    pub connect_backoff: Duration,
    /// Deadline for a single physical connect attempt.
    pub connect_timeout: Duration,
    /// Attempts to obtain the byte streams once connected.
    pub stream_attempts: u32,
    pub stream_retry: Duration,
    /// Send `HELLO` after connecting.
    pub handshake: bool,
    pub liveness: LivenessConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            connect_backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            stream_attempts: 3,
            stream_retry: Duration::from_millis(200),
            handshake: true,
            liveness: LivenessConfig::default(),
        }
    }
}

/// Handle to the dispenser connection. Cheap to clone; all clones share
/// one connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<ConnectionState>,
    /// Bumped for every connect attempt and by disconnect-while-connecting.
    /// Watched by the attempt in flight so a disconnect interrupts it.
    attempt: watch::Sender<u64>,
    device: RwLock<Option<DeviceHandle>>,
    writer: tokio::sync::Mutex<Option<LinkWriter>>,
    link: Mutex<Option<Box<dyn Link>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    last_activity: Mutex<Instant>,
    sync_active: AtomicBool,
    acks: Arc<AckSlot>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Create a disconnected session.
    ///
    /// Returns the receiver for session events; drain it on the task that
    /// owns the UI.
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();

        let inner = Inner {
            config,
            connector,
            state: Mutex::new(ConnectionState::Disconnected),
            attempt: watch::Sender::new(0),
            device: RwLock::new(None),
            writer: tokio::sync::Mutex::new(None),
            link: Mutex::new(None),
            shutdown: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            sync_active: AtomicBool::new(false),
            acks: AckSlot::new(),
            events,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            event_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The connected peer, if any.
    pub fn device(&self) -> Option<DeviceHandle> {
        self.inner.device.read().clone()
    }

    /// Connect to a device, replacing any existing connection.
    pub async fn connect(&self, device: DeviceHandle) -> Result<(), LinkError> {
        let (attempt, was_connected) = {
            let mut state = self.inner.state.lock();
            if *state == ConnectionState::Connecting {
                warn!("Connect to {} rejected: attempt already in flight", device.name);
                return Err(LinkError::AlreadyConnecting);
            }
            let was_connected = *state == ConnectionState::Connected;
            *state = ConnectionState::Connecting;
            (self.next_attempt(), was_connected)
        };

        if was_connected {
            info!("Closing previous connection before connecting");
            self.close_resources().await;
            self.emit(SessionEvent::Disconnected);
        }

        info!("Connecting to {} ({})", device.name, device.address);

        let (link, reader, writer) = match self.establish(&device, attempt).await {
            Ok(parts) => parts,
            Err(cause) => {
                {
                    // A cancelled attempt no longer owns the state.
                    let mut state = self.inner.state.lock();
                    if !self.is_cancelled(attempt) {
                        *state = ConnectionState::Disconnected;
                    }
                }
                let err = LinkError::ConnectFailed(cause);
                error!("{}", err);
                self.emit(SessionEvent::Error(err.to_string()));
                return Err(err);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Sends that see Connected queue on the writer lock until the writer
        // is in place.
        let mut writer_slot = self.inner.writer.lock().await;
        let committed = {
            let mut state = self.inner.state.lock();
            if self.is_cancelled(attempt) {
                false
            } else {
                *state = ConnectionState::Connected;
                *self.inner.link.lock() = Some(link);
                *self.inner.shutdown.lock() = Some(shutdown_tx);
                *self.inner.device.write() = Some(device.clone());
                self.touch();
                // Emitted under the lock so it always precedes the matching
                // Disconnected.
                self.emit(SessionEvent::Connected {
                    device_name: device.name.clone(),
                });
                true
            }
        };

        if committed {
            *writer_slot = Some(writer);
            drop(writer_slot);
        } else {
            drop(writer_slot);
            close_writer(writer).await;
            let err = LinkError::ConnectFailed(ConnectCause::Cancelled);
            warn!("{}", err);
            self.emit(SessionEvent::Error(err.to_string()));
            return Err(err);
        }

        info!("Connected to {}", device.name);

        tokio::spawn(read_loop(self.clone(), reader, shutdown_rx.clone()));

        let liveness = &self.inner.config.liveness;
        if liveness.enabled {
            tokio::spawn(liveness::run(self.clone(), liveness.interval, shutdown_rx));
        }

        if self.inner.config.handshake {
            if let Err(e) = self.send_command(&Command::Hello).await {
                warn!("Handshake failed: {}", e);
            }
        }

        Ok(())
    }

    /// Physical connect with retries, then stream acquisition with retries.
    async fn establish(
        &self,
        device: &DeviceHandle,
        attempt: u64,
    ) -> Result<(Box<dyn Link>, LinkReader, LinkWriter), ConnectCause> {
        let config = &self.inner.config;
        let mut last_cause = ConnectCause::Other("no connection attempts configured".to_string());
        let mut established = None;

        for n in 1..=config.connect_attempts {
            if self.is_cancelled(attempt) {
                return Err(ConnectCause::Cancelled);
            }

            debug!(
                "Connection attempt {}/{} to {}",
                n, config.connect_attempts, device.address
            );

            let connecting = self.inner.connector.connect(device);
            let outcome = self
                .unless_cancelled(attempt, tokio::time::timeout(config.connect_timeout, connecting))
                .await?;
            match outcome {
                Ok(Ok(link)) => {
                    established = Some(link);
                    break;
                }
                Ok(Err(e)) => {
                    warn!("Connection attempt {} failed: {}", n, e);
                    last_cause = ConnectCause::from_io(&e);
                }
                Err(_) => {
                    warn!("Connection attempt {} timed out", n);
                    last_cause = ConnectCause::TimedOut;
                }
            }

            if n < config.connect_attempts {
                self.unless_cancelled(attempt, tokio::time::sleep(config.connect_backoff))
                    .await?;
            }
        }

        let mut link = match established {
            Some(link) => link,
            None => return Err(last_cause),
        };

        for n in 1..=config.stream_attempts {
            if self.is_cancelled(attempt) {
                return Err(ConnectCause::Cancelled);
            }

            match link.open_streams() {
                Ok((reader, writer)) => return Ok((link, reader, writer)),
                Err(e) => {
                    warn!("Streams not ready (attempt {}): {}", n, e);
                    last_cause = ConnectCause::from_io(&e);
                }
            }

            if n < config.stream_attempts {
                self.unless_cancelled(attempt, tokio::time::sleep(config.stream_retry))
                    .await?;
            }
        }

        Err(last_cause)
    }

    fn next_attempt(&self) -> u64 {
        self.inner.attempt.send_modify(|n| *n += 1);
        *self.inner.attempt.borrow()
    }

    fn is_cancelled(&self, attempt: u64) -> bool {
        *self.inner.attempt.borrow() != attempt
    }

    /// Run one step of a connection attempt, abandoning it as soon as the
    /// attempt is cancelled.
    async fn unless_cancelled<F: Future>(
        &self,
        attempt: u64,
        step: F,
    ) -> Result<F::Output, ConnectCause> {
        let mut current = self.inner.attempt.subscribe();
        tokio::select! {
            _ = current.wait_for(|n| *n != attempt) => Err(ConnectCause::Cancelled),
            output = step => Ok(output),
        }
    }

    /// Close the connection. Idempotent: only the call that actually tears
    /// a connection down emits `Disconnected`.
    ///
    /// While connecting, this abandons the attempt: the state returns to
    /// Disconnected at once and the attempt fails with `Cancelled`.
    pub async fn disconnect(&self) {
        let connected = {
            let mut state = self.inner.state.lock();
            match *state {
                ConnectionState::Connected => {
                    *state = ConnectionState::Disconnected;
                    true
                }
                ConnectionState::Connecting => {
                    info!("Cancelling connection attempt");
                    *state = ConnectionState::Disconnected;
                    self.next_attempt();
                    false
                }
                ConnectionState::Disconnected => false,
            }
        };

        if connected {
            info!("Disconnecting");
            self.close_resources().await;
            self.emit(SessionEvent::Disconnected);
        } else {
            debug!("Disconnect requested with no open connection");
        }
    }

    /// Tear down after an I/O failure. Emits the error and `Disconnected`
    /// once, no matter how many tasks hit the failure.
    async fn fail(&self, error: LinkError) {
        let connected = {
            let mut state = self.inner.state.lock();
            let connected = *state == ConnectionState::Connected;
            if connected {
                *state = ConnectionState::Disconnected;
            }
            connected
        };

        if !connected {
            debug!("Ignoring failure after teardown: {}", error);
            return;
        }

        error!("{}", error);
        self.close_resources().await;
        self.emit(SessionEvent::Error(error.to_string()));
        self.emit(SessionEvent::Disconnected);
    }

    /// Stop background tasks, then close the output stream and the link.
    /// Close errors are logged and dropped.
    async fn close_resources(&self) {
        self.inner.acks.abort();

        if let Some(shutdown) = self.inner.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }

        // A blocked send gives the lock up once it sees the shutdown signal.
        let writer = self.inner.writer.lock().await.take();
        if let Some(writer) = writer {
            close_writer(writer).await;
        }

        if self.inner.link.lock().take().is_some() {
            debug!("Link closed");
        }

        *self.inner.device.write() = None;
    }

    /// Send one line. Sends are serialized; a write failure disconnects.
    ///
    /// A disconnect interrupts a write that is stuck on a full output
    /// buffer; the send then fails with `NotConnected`.
    pub async fn send(&self, message: &str) -> Result<(), LinkError> {
        self.write(message, false).await.map(|_| ())
    }

    /// Send a keep-alive unless a sync holds the session. The check is made
    /// with the writer locked, so a keep-alive never follows a sync command.
    /// Returns `false` if it was skipped.
    pub(crate) async fn send_keep_alive(&self) -> Result<bool, LinkError> {
        self.write(&Command::Ping.encode(), true).await
    }

    async fn write(&self, message: &str, skip_during_sync: bool) -> Result<bool, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let mut stop = match self.inner.shutdown.lock().as_ref() {
            Some(shutdown) => shutdown.subscribe(),
            None => return Err(LinkError::NotConnected),
        };

        let mut line = message.trim_end_matches(['\r', '\n']).to_string();
        line.push('\n');

        let result = {
            let mut writer = self.inner.writer.lock().await;
            if skip_during_sync && self.is_sync_active() {
                return Ok(false);
            }
            let Some(writer) = writer.as_mut() else {
                return Err(LinkError::NotConnected);
            };
            tokio::select! {
                _ = stop.wait_for(|stop| *stop) => {
                    debug!("Send interrupted by disconnect");
                    return Err(LinkError::NotConnected);
                }
                written = write_line(writer, line.as_bytes()) => written,
            }
        };

        match result {
            Ok(()) => {
                self.touch();
                debug!("Sent: {}", line.trim_end());
                Ok(true)
            }
            Err(e) => {
                let err = LinkError::WriteFailed(e.to_string());
                self.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    pub async fn send_command(&self, command: &Command) -> Result<(), LinkError> {
        self.send(&command.encode()).await
    }

    /// Register interest in the next inbound message containing `token`.
    /// Register before sending the command it acknowledges.
    pub fn expect_ack(&self, token: &'static str) -> PendingAck {
        self.inner.acks.expect(token)
    }

    /// Claim the session for an alarm sync. `None` if one is already running.
    pub fn begin_sync(&self) -> Option<SyncGuard> {
        self.inner
            .sync_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SyncGuard {
                inner: Arc::clone(&self.inner),
            })
    }

    pub fn is_sync_active(&self) -> bool {
        self.inner.sync_active.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.inner.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    pub(crate) fn last_activity(&self) -> Instant {
        *self.inner.last_activity.lock()
    }

    fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    fn deliver(&self, message: String) {
        debug!("Received: {}", message);
        self.touch();
        self.inner.acks.observe(&message);
        self.emit(SessionEvent::DataReceived(message));
    }
}

/// Held for the duration of an alarm sync.
pub struct SyncGuard {
    inner: Arc<Inner>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.inner.sync_active.store(false, Ordering::SeqCst);
    }
}

/// Flush and close the output stream, bounded by `CLOSE_TIMEOUT`. Errors are
/// logged and dropped.
async fn close_writer(mut writer: LinkWriter) {
    match tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Error closing output stream: {}", e),
        Err(_) => debug!("Timed out closing output stream"),
    }
}

async fn write_line(writer: &mut LinkWriter, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

async fn read_loop(session: Session, mut reader: LinkReader, mut shutdown: watch::Receiver<bool>) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    debug!("Reader loop started");

    loop {
        tokio::select! {
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                debug!("Reader loop stopped");
                break;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!("Connection closed by remote");
                    session
                        .fail(LinkError::ReadFailed("connection closed by device".to_string()))
                        .await;
                    break;
                }
                Ok(n) => {
                    for message in framer.feed(&buf[..n]) {
                        session.deliver(message);
                    }
                }
                Err(e) => {
                    session.fail(LinkError::ReadFailed(e.to_string())).await;
                    break;
                }
            }
        }
    }
}
