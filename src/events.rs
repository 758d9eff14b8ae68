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

//! Session events and their consumer.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::bluetooth::Reply;
use crate::state::AppState;
use crate::storage::DispenseLog;

/// Events emitted by a session, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection established.
    Connected { device_name: String },
    /// Connection closed, explicitly or after a failure.
    Disconnected,
    /// A framed message from the dispenser.
    DataReceived(String),
    /// Human-readable failure description.
    Error(String),
    /// One more alarm acknowledged during a sync.
    SyncProgress { sent: usize, total: usize },
    /// Sync finished; `count` alarms were acknowledged.
    SyncComplete { count: usize },
}

/// Applies session events to application state.
pub struct EventProcessor {
    state: Arc<AppState>,
    log: Option<DispenseLog>,
}

impl EventProcessor {
    /// Create a new event processor.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state, log: None }
    }

    /// Also record dispense history replies.
    pub fn with_log(state: Arc<AppState>, log: DispenseLog) -> Self {
        Self {
            state,
            log: Some(log),
        }
    }

    /// Process a single event.
    pub fn process_event(&mut self, event: &SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Connected { device_name } => {
                info!("Dispenser connected: {}", device_name);
                self.state.set_connected(device_name.clone());
            }
            SessionEvent::Disconnected => {
                info!("Dispenser disconnected");
                self.state.set_disconnected();
            }
            SessionEvent::Error(e) => {
                error!("Link error: {}", e);
                self.state.set_error(e.clone());
            }
            SessionEvent::DataReceived(message) => {
                self.state.set_last_message(message.clone());
                self.handle_reply(Reply::parse(message))?;
            }
            SessionEvent::SyncProgress { sent, total } => {
                debug!("Sync progress {}/{}", sent, total);
                self.state.set_sync_progress(Some((*sent, *total)));
            }
            SessionEvent::SyncComplete { count } => {
                info!("Alarms synchronized: {}", count);
                self.state.set_sync_progress(None);
                self.state.set_last_sync_count(*count);
            }
        }
        Ok(())
    }

    fn handle_reply(&mut self, reply: Reply) -> Result<()> {
        match reply {
            Reply::Status { name, quantity } => {
                info!("Medicine status: {} - {} pills left", name, quantity);
                self.state.set_stock(name, quantity);
            }
            Reply::History { name, time, date } => {
                info!("Medicine taken: {} at {} on {}", name, time, date);
                if let Some(log) = &self.log {
                    log.add(&name, &time, &date)?;
                }
            }
            Reply::AlarmSet => debug!("Alarm set on device"),
            Reply::SyncComplete => debug!("Device reported sync complete"),
            Reply::Other(message) => debug!("Device response: {}", message),
        }
        Ok(())
    }
}
