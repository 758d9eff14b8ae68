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

//! SmartMedicine dispenser link.
//!
//! Keeps a Bluetooth serial session with the pill dispenser and pushes the
//! medication alarm schedule to it.

pub mod bluetooth;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod medicine;
pub mod state;
pub mod storage;
pub mod sync;

pub use bluetooth::{ConnectionState, DeviceHandle, Session, SessionConfig};
pub use commands::Commands;
pub use error::{ConnectCause, LinkError};
pub use events::SessionEvent;
pub use medicine::{AlarmTime, Medicine};
pub use sync::{SyncConfig, SyncEngine, SyncPhase};
