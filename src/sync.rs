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

//! Alarm schedule synchronization.
//!
//! Pushes the full alarm schedule to the dispenser as a strictly sequential
//! request/acknowledge exchange:
//!
//! ```text
//! SYNC_START        -> SYNC_STARTED
//! EXPECT_ALARMS:<n> -> EXPECTING_ALARMS
//! CLEAR_ALARMS      -> ALARMS_CLEARED
//! SET_ALARM:...     -> ALARM_SET        (once per alarm)
//! SYNC_END          -> SYNC_COMPLETE
//! ```
//!
//! Any missing acknowledgment aborts the whole run. Nothing is retried: the
//! device schedule would no longer match what the app believes was sent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::bluetooth::{tokens, AckWaitError, Command, Session};
use crate::error::LinkError;
use crate::events::SessionEvent;
use crate::medicine::{total_alarms, Medicine};

/// Phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Starting,
    ExpectingCount,
    Clearing,
    SendingAlarms,
    Ending,
    Complete,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Starting => "starting sync",
            Self::ExpectingCount => "announcing the alarm count",
            Self::Clearing => "clearing alarms",
            Self::SendingAlarms => "sending alarms",
            Self::Ending => "finishing sync",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Acknowledgment deadlines.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Deadline for the start, count and clear acknowledgments.
    pub ack_timeout: Duration,
    /// Deadline for each `ALARM_SET`.
    pub alarm_ack_timeout: Duration,
    /// Deadline for the final `SYNC_COMPLETE`.
    pub complete_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(3),
            alarm_ack_timeout: Duration::from_secs(5),
            complete_timeout: Duration::from_secs(10),
        }
    }
}

/// State of the sync run in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSession {
    pub total: usize,
    pub sent: usize,
    pub phase: SyncPhase,
    pub last_ack: Option<String>,
}

/// Drives alarm syncs over a [`Session`].
#[derive(Clone)]
pub struct SyncEngine {
    session: Session,
    config: SyncConfig,
    current: Arc<Mutex<Option<SyncSession>>>,
}

impl SyncEngine {
    pub fn new(session: Session, config: SyncConfig) -> Self {
        Self {
            session,
            config,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Snapshot of the run in progress, if any.
    pub fn current(&self) -> Option<SyncSession> {
        self.current.lock().clone()
    }

    /// Replace the dispenser's schedule with every alarm of `medicines`.
    ///
    /// Medicines are sent in the given order, alarm times in their stored
    /// order. Returns the number of alarms the device acknowledged. Progress
    /// and completion are also published as session events.
    pub async fn sync_all_alarms(&self, medicines: &[Medicine]) -> Result<usize, LinkError> {
        if !self.session.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let Some(_guard) = self.session.begin_sync() else {
            return Err(LinkError::SyncAlreadyInProgress);
        };

        let total = total_alarms(medicines);
        info!("Syncing {} alarms for {} medicines", total, medicines.len());

        *self.current.lock() = Some(SyncSession {
            total,
            sent: 0,
            phase: SyncPhase::Starting,
            last_ack: None,
        });

        let result = match alarm_commands(medicines) {
            Ok(alarms) => self.run(alarms, total).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(count) => {
                info!("Alarm sync complete: {} alarms", count);
                self.session.emit(SessionEvent::SyncComplete { count: *count });
            }
            Err(e) => {
                self.update(|s| s.phase = SyncPhase::Failed);
                error!("Alarm sync failed: {}", e);
                self.session
                    .emit(SessionEvent::Error(format!("Alarm sync failed: {}", e)));
            }
        }

        *self.current.lock() = None;
        result
    }

    async fn run(&self, alarms: Vec<Command>, total: usize) -> Result<usize, LinkError> {
        let ack_timeout = self.config.ack_timeout;

        self.exchange(SyncPhase::Starting, Command::SyncStart, tokens::SYNC_STARTED, ack_timeout)
            .await?;
        self.exchange(
            SyncPhase::ExpectingCount,
            Command::ExpectAlarms(total),
            tokens::EXPECTING_ALARMS,
            ack_timeout,
        )
        .await?;
        self.exchange(SyncPhase::Clearing, Command::ClearAlarms, tokens::ALARMS_CLEARED, ack_timeout)
            .await?;

        let mut sent = 0;
        for command in alarms {
            self.exchange(
                SyncPhase::SendingAlarms,
                command,
                tokens::ALARM_SET,
                self.config.alarm_ack_timeout,
            )
            .await?;

            sent += 1;
            self.update(|s| s.sent = sent);
            self.session.emit(SessionEvent::SyncProgress { sent, total });
        }

        self.exchange(
            SyncPhase::Ending,
            Command::SyncEnd,
            tokens::SYNC_COMPLETE,
            self.config.complete_timeout,
        )
        .await?;
        self.update(|s| s.phase = SyncPhase::Complete);

        Ok(sent)
    }

    /// Send one command and wait for its acknowledgment.
    async fn exchange(
        &self,
        phase: SyncPhase,
        command: Command,
        token: &'static str,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        self.update(|s| s.phase = phase);

        let line = command.encode();
        let pending = self.session.expect_ack(token);
        self.session.send(&line).await?;

        match pending.wait(timeout).await {
            Ok(reply) => {
                debug!("{} acknowledged by {}", line, reply);
                self.update(|s| s.last_ack = Some(reply));
                Ok(())
            }
            Err(AckWaitError::TimedOut) => Err(LinkError::AckTimeout {
                step: phase,
                command: line,
            }),
            Err(AckWaitError::Aborted) => Err(LinkError::Disconnected { step: phase }),
        }
    }

    fn update(&self, f: impl FnOnce(&mut SyncSession)) {
        if let Some(session) = self.current.lock().as_mut() {
            f(session);
        }
    }
}

/// Every `SET_ALARM` of the run, medicines in order and times in stored
/// order. Built before anything is sent so a bad name cannot leave the
/// device cleared.
fn alarm_commands(medicines: &[Medicine]) -> Result<Vec<Command>, LinkError> {
    medicines
        .iter()
        .flat_map(|medicine| {
            medicine
                .alarm_times()
                .iter()
                .map(move |&time| Command::set_alarm(medicine.name(), time, medicine.dose()))
        })
        .collect()
}
