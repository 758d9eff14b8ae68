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

//! Error types for the dispenser link.
//!
//! Every variant renders a message that can be shown to the user as-is and
//! that distinguishes "not connected", "timed out" and "device did not
//! acknowledge".

use std::fmt;
use std::io;

use thiserror::Error;

use crate::sync::SyncPhase;

/// Errors reported by the session, the sync engine and the command facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Operation attempted while no dispenser is connected.
    #[error("Not connected to a dispenser")]
    NotConnected,

    /// A connection attempt is already in flight.
    #[error("Already attempting to connect. Please wait.")]
    AlreadyConnecting,

    /// Another alarm sync is running on this session.
    #[error("An alarm sync is already in progress. Try again when it finishes.")]
    SyncAlreadyInProgress,

    /// All connection attempts were exhausted.
    #[error("Connection failed: {0}")]
    ConnectFailed(ConnectCause),

    /// I/O error while writing a command. Always tears the connection down.
    #[error("Error sending command: {0}")]
    WriteFailed(String),

    /// I/O error in the reader loop. Always tears the connection down.
    #[error("Connection lost: {0}")]
    ReadFailed(String),

    /// The device did not acknowledge a sync command before its deadline.
    #[error("Timed out while {step}: device did not acknowledge `{command}`")]
    AckTimeout { step: SyncPhase, command: String },

    /// The connection dropped while waiting for an acknowledgment.
    #[error("Connection lost while {step}")]
    Disconnected { step: SyncPhase },

    /// Alarm time not in 24-hour `HH:MM` form.
    #[error("Invalid alarm time `{0}`, expected HH:MM")]
    InvalidAlarmTime(String),

    /// A command argument would corrupt the line protocol.
    #[error("Invalid command argument: {0}")]
    InvalidCommand(String),
}

/// Why a connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectCause {
    /// The device refused or never answered the RFCOMM connect.
    NotResponding(String),
    /// The per-attempt connect timeout elapsed.
    TimedOut,
    /// The attempt was abandoned by a disconnect.
    Cancelled,
    Other(String),
}

impl ConnectCause {
    /// Classify an I/O error from the connect or stream-acquisition step.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::HostUnreachable => Self::NotResponding(err.to_string()),
            _ => Self::Other(err.to_string()),
        }
    }
}

impl fmt::Display for ConnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotResponding(detail) => {
                write!(f, "device not responding ({}). Is it powered on and in range?", detail)
            }
            Self::TimedOut => write!(f, "timed out waiting for the device"),
            Self::Cancelled => write!(f, "cancelled by disconnect"),
            Self::Other(detail) => write!(f, "{}", detail),
        }
    }
}
