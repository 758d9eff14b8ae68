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

//! Acknowledgment matching.
//!
//! The firmware has no request IDs. A wait is satisfied by the first inbound
//! message after registration that contains the expected token. All of that
//! policy lives here so the sync engine only sees `expect` and `wait`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AckState {
    Idle,
    Waiting { token: &'static str },
    Matched(String),
    Aborted,
}

/// Why an acknowledgment wait ended without a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckWaitError {
    TimedOut,
    /// The connection was torn down while waiting.
    Aborted,
}

/// Single-slot registry for the acknowledgment currently awaited.
#[derive(Debug)]
pub struct AckSlot {
    state: watch::Sender<AckState>,
}

impl AckSlot {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(AckState::Idle);
        Arc::new(Self { state })
    }

    /// Register an expectation. Must be called before the command is sent so
    /// a fast reply cannot slip past.
    pub fn expect(self: &Arc<Self>, token: &'static str) -> PendingAck {
        self.state.send_replace(AckState::Waiting { token });
        PendingAck {
            slot: Arc::clone(self),
            rx: self.state.subscribe(),
        }
    }

    /// Offer an inbound message. Called by the reader loop for every message.
    pub fn observe(&self, message: &str) {
        self.state.send_if_modified(|state| match state {
            AckState::Waiting { token } if message.contains(*token) => {
                debug!("Acknowledgment {} matched by {:?}", token, message);
                *state = AckState::Matched(message.to_string());
                true
            }
            _ => false,
        });
    }

    /// Fail any in-flight wait immediately.
    pub fn abort(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, AckState::Waiting { .. }) {
                *state = AckState::Aborted;
                true
            } else {
                false
            }
        });
    }

    /// True while a wait is registered and unresolved.
    pub fn is_waiting(&self) -> bool {
        matches!(*self.state.borrow(), AckState::Waiting { .. })
    }

    fn clear(&self) {
        self.state.send_if_modified(|state| {
            if *state == AckState::Idle {
                false
            } else {
                *state = AckState::Idle;
                true
            }
        });
    }
}

/// A registered expectation. Dropping it clears the slot.
pub struct PendingAck {
    slot: Arc<AckSlot>,
    rx: watch::Receiver<AckState>,
}

impl PendingAck {
    /// Wait for the matching message, returning it.
    pub async fn wait(mut self, timeout: Duration) -> Result<String, AckWaitError> {
        let resolved = tokio::time::timeout(
            timeout,
            self.rx
                .wait_for(|state| !matches!(state, AckState::Waiting { .. })),
        )
        .await;

        match resolved {
            Err(_) => Err(AckWaitError::TimedOut),
            Ok(Err(_)) => Err(AckWaitError::Aborted),
            Ok(Ok(state)) => match &*state {
                AckState::Matched(message) => Ok(message.clone()),
                _ => Err(AckWaitError::Aborted),
            },
        }
    }
}

impl Drop for PendingAck {
    fn drop(&mut self) {
        self.slot.clear();
    }
}
