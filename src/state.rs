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

//! Application state management.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Connection status as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Error => "Error",
        }
    }
}

/// Shared application state, updated from session events.
#[derive(Debug)]
pub struct AppState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Connected device name.
    pub connected_device: RwLock<Option<String>>,

    /// Most recent error description.
    pub last_error: RwLock<Option<String>>,

    /// Last message received from the dispenser.
    pub last_message: RwLock<Option<String>>,

    /// Remaining quantities reported by `STATUS` replies.
    pub stock: RwLock<BTreeMap<String, u32>>,

    /// `(sent, total)` while a sync is running.
    pub sync_progress: RwLock<Option<(usize, usize)>>,

    /// Alarm count of the last successful sync.
    pub last_sync_count: RwLock<Option<usize>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            connected_device: RwLock::new(None),
            last_error: RwLock::new(None),
            last_message: RwLock::new(None),
            stock: RwLock::new(BTreeMap::new()),
            sync_progress: RwLock::new(None),
            last_sync_count: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, device_name: String) {
        *self.connection_status.write() = ConnectionStatus::Connected;
        *self.connected_device.write() = Some(device_name);
        *self.last_error.write() = None;
    }

    pub fn set_disconnected(&self) {
        let mut status = self.connection_status.write();
        // Keep an error visible until the next successful connect.
        if *status != ConnectionStatus::Error {
            *status = ConnectionStatus::Disconnected;
        }
        *self.connected_device.write() = None;
        *self.sync_progress.write() = None;
    }

    pub fn set_error(&self, description: String) {
        if *self.connection_status.read() != ConnectionStatus::Connected {
            *self.connection_status.write() = ConnectionStatus::Error;
        }
        *self.last_error.write() = Some(description);
        // Every error ends the sync in progress, if any.
        *self.sync_progress.write() = None;
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn get_device_name(&self) -> Option<String> {
        self.connected_device.read().clone()
    }

    pub fn get_last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn set_last_message(&self, message: String) {
        *self.last_message.write() = Some(message);
    }

    pub fn get_last_message(&self) -> Option<String> {
        self.last_message.read().clone()
    }

    pub fn set_stock(&self, medicine: String, quantity: u32) {
        self.stock.write().insert(medicine, quantity);
    }

    pub fn get_stock(&self, medicine: &str) -> Option<u32> {
        self.stock.read().get(medicine).copied()
    }

    pub fn set_sync_progress(&self, progress: Option<(usize, usize)>) {
        *self.sync_progress.write() = progress;
    }

    pub fn get_sync_progress(&self) -> Option<(usize, usize)> {
        *self.sync_progress.read()
    }

    pub fn set_last_sync_count(&self, count: usize) {
        *self.last_sync_count.write() = Some(count);
    }

    pub fn get_last_sync_count(&self) -> Option<usize> {
        *self.last_sync_count.read()
    }
}
