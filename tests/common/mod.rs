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

//! Shared fakes for the session tests: a scripted connector and a
//! dispenser that acknowledges the sync protocol.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

use smartmed_link::bluetooth::{Connector, Link, LivenessConfig, StreamLink};
use smartmed_link::{DeviceHandle, Session, SessionConfig, SessionEvent};

/// What the next connect attempt does.
pub enum Outcome {
    Refuse,
    Accept(DuplexStream),
    /// Never completes; only the per-attempt timeout ends it.
    Hang,
}

pub struct FakeConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new(outcomes: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(&'a self, _device: &'a DeviceHandle) -> BoxFuture<'a, io::Result<Box<dyn Link>>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().pop_front();

        Box::pin(async move {
            match outcome {
                Some(Outcome::Accept(stream)) => Ok(Box::new(StreamLink::new(stream)) as Box<dyn Link>),
                Some(Outcome::Hang) => std::future::pending::<io::Result<Box<dyn Link>>>().await,
                Some(Outcome::Refuse) | None => Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )),
            }
        })
    }
}

pub fn device() -> DeviceHandle {
    DeviceHandle::new("00:11:22:33:44:55", "D1")
}

/// No handshake and no keep-alives, so the wire carries only what a test sends.
pub fn quiet_config() -> SessionConfig {
    SessionConfig {
        handshake: false,
        liveness: LivenessConfig {
            enabled: false,
            interval: Duration::from_secs(5),
        },
        ..SessionConfig::default()
    }
}

/// Connect over an in-memory pipe. Returns the device end of the pipe and
/// consumes the `Connected` event.
pub async fn connected(
    config: SessionConfig,
) -> (Session, mpsc::UnboundedReceiver<SessionEvent>, DuplexStream) {
    let (client, server) = tokio::io::duplex(4096);
    let connector = FakeConnector::new([Outcome::Accept(client)]);
    let (session, mut events) = Session::new(config, connector);

    session.connect(device()).await.unwrap();
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::Connected {
            device_name: "D1".to_string()
        })
    );

    (session, events, server)
}

/// Everything queued on a channel right now.
pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

/// Run a fake dispenser on `stream`. Every line it receives is forwarded on
/// the returned channel. Sync commands are acknowledged unless they start
/// with `silent_prefix`.
pub fn spawn_dispenser(
    stream: DuplexStream,
    silent_prefix: Option<&'static str>,
) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let reply = match silent_prefix {
                Some(prefix) if line.starts_with(prefix) => None,
                _ => ack_for(&line),
            };
            let _ = tx.send(line);

            if let Some(reply) = reply {
                if writer.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    });

    rx
}

fn ack_for(line: &str) -> Option<&'static str> {
    let command = line.split(':').next().unwrap_or_default();
    match command {
        "SYNC_START" => Some("SYNC_STARTED"),
        "EXPECT_ALARMS" => Some("EXPECTING_ALARMS"),
        "CLEAR_ALARMS" => Some("ALARMS_CLEARED"),
        "SET_ALARM" => Some("ALARM_SET"),
        "SYNC_END" => Some("SYNC_COMPLETE"),
        _ => None,
    }
}
