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

//! Bluetooth communication module.
//!
//! Handles the RFCOMM client link to the pill dispenser.

pub mod ack;
pub mod framer;
pub mod link;
mod liveness;
pub mod protocol;
mod session;

pub use ack::{AckWaitError, PendingAck};
pub use framer::LineFramer;
pub use link::{
    Connector, DeviceHandle, Link, LinkReader, LinkWriter, RfcommConnector, StreamLink,
    DEFAULT_RFCOMM_CHANNEL, SPP_UUID,
};
pub use liveness::LivenessConfig;
pub use protocol::{tokens, Command, Reply};
pub use session::{ConnectionState, Session, SessionConfig, SyncGuard};
