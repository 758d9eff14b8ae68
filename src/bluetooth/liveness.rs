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

//! Keep-alive traffic for idle links.
//!
//! Serial modules drop an RFCOMM channel that stays silent for too long.
//! While connected, a background task sends `PING` whenever nothing has been
//! sent or received for a full interval.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::session::Session;

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub enabled: bool,
    /// Idle time after which a keep-alive is sent.
    pub interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5),
        }
    }
}

/// Runs until `shutdown` flips to true or a keep-alive cannot be written.
pub(crate) async fn run(session: Session, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    debug!("Liveness monitor started ({:?} interval)", interval);

    let mut not_before = Instant::now();

    loop {
        let deadline = (session.last_activity() + interval).max(not_before);

        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let idle = Instant::now().saturating_duration_since(session.last_activity());
        if idle < interval {
            continue;
        }

        // Keep-alives must not land between a sync command and its ack.
        if session.is_sync_active() {
            debug!("Sync in progress, skipping keep-alive");
            not_before = Instant::now() + interval;
            continue;
        }

        debug!("Link idle for {:?}, sending keep-alive", idle);
        match session.send_keep_alive().await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Sync started, keep-alive dropped");
                not_before = Instant::now() + interval;
            }
            Err(e) => {
                // A write failure has already torn the session down.
                warn!("Keep-alive failed: {}", e);
                break;
            }
        }
    }

    debug!("Liveness monitor stopped");
}
