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

//! Typed one-shot commands.
//!
//! Each helper formats a single line and sends it. Replies arrive later as
//! `DataReceived` events; nothing here waits for them or retries.

use tracing::info;

use crate::bluetooth::{Command, Session};
use crate::error::LinkError;
use crate::medicine::AlarmTime;

/// Command helpers over a session.
#[derive(Clone)]
pub struct Commands {
    session: Session,
}

impl Commands {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Ask for remaining quantities (`STATUS:<name>:<qty>` replies).
    pub async fn request_status(&self) -> Result<(), LinkError> {
        self.send(Command::GetStatus).await
    }

    /// Ask for dispense history (`HISTORY:<name>:<time>:<date>` replies).
    pub async fn request_history(&self) -> Result<(), LinkError> {
        self.send(Command::GetHistory).await
    }

    /// Add a single alarm without a full sync.
    pub async fn set_alarm(&self, name: &str, time: AlarmTime, quantity: u32) -> Result<(), LinkError> {
        self.send(Command::set_alarm(name, time, quantity)?).await
    }

    pub async fn clear_alarm(&self, name: &str, time: AlarmTime) -> Result<(), LinkError> {
        self.send(Command::clear_alarm(name, time)?).await
    }

    /// Trigger a manual dispense.
    pub async fn dispense(&self, name: &str, quantity: u32) -> Result<(), LinkError> {
        info!("Dispensing {} x {}", quantity, name);
        self.send(Command::dispense(name, quantity)?).await
    }

    pub async fn check_availability(&self, name: &str) -> Result<(), LinkError> {
        self.send(Command::check(name)?).await
    }

    pub async fn ping(&self) -> Result<(), LinkError> {
        self.send(Command::Ping).await
    }

    async fn send(&self, command: Command) -> Result<(), LinkError> {
        self.session.send_command(&command).await
    }
}
