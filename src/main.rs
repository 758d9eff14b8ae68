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

//! SmartMedicine dispenser link command-line tool.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smartmed_link::bluetooth::RfcommConnector;
use smartmed_link::config::Config;
use smartmed_link::events::EventProcessor;
use smartmed_link::medicine::{self, AlarmTime};
use smartmed_link::state::AppState;
use smartmed_link::storage::DispenseLog;
use smartmed_link::{Commands, Session, SyncEngine};

/// How long to keep listening for replies to one-shot requests.
const REPLY_WINDOW: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "smartmed-link", version, about = "Talk to a SmartMedicine pill dispenser")]
struct Cli {
    /// Dispenser Bluetooth address; overrides the config file.
    #[arg(long)]
    device: Option<String>,

    /// Config file to use instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Replace the dispenser's alarms with the configured schedule.
    Sync,
    /// Ask the dispenser for remaining quantities.
    Status,
    /// Fetch dispense history and record it locally.
    History,
    /// Dispense a medicine now.
    Dispense { name: String, quantity: u32 },
    /// Add one alarm without a full sync.
    SetAlarm {
        name: String,
        time: AlarmTime,
        #[arg(default_value_t = 1)]
        quantity: u32,
    },
    /// Remove one alarm.
    ClearAlarm { name: String, time: AlarmTime },
    /// Stay connected and log everything the dispenser sends until Ctrl-C.
    Monitor,
    /// Show the next scheduled dose. Does not connect.
    Next,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("smartmed_link=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting SmartMedicine link v{}...", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.data_dir = path
                .parent()
                .map(|dir| dir.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            config
        }
        None => Config::load()?,
    };
    info!("Configuration loaded");

    if let Some(address) = cli.device {
        config.bluetooth.device_address = address;
    }

    if let Action::Next = cli.action {
        show_next_dose(&config);
        return Ok(());
    }

    let device = config.device().ok_or_else(|| {
        anyhow!("No dispenser configured. Set bluetooth.device_address or pass --device.")
    })?;

    let log = DispenseLog::new(&config.data_dir)?;
    let state = AppState::new();
    let mut processor = EventProcessor::with_log(state.clone(), log);

    let connector = Arc::new(RfcommConnector::new(config.bluetooth.rfcomm_channel));
    let (session, mut events) = Session::new(config.session_config(), connector);

    // All session events are handled here, in order.
    let consumer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = processor.process_event(&event) {
                error!("Error processing event: {}", e);
            }
        }
    });

    session.connect(device).await?;

    let outcome = run_action(cli.action, &session, &config).await;

    session.disconnect().await;
    drop(session);
    let _ = consumer.await;

    if let Some(error) = state.get_last_error() {
        info!("Last reported error: {}", error);
    }

    info!("SmartMedicine link stopped");
    outcome
}

async fn run_action(action: Action, session: &Session, config: &Config) -> Result<()> {
    let commands = Commands::new(session.clone());

    match action {
        Action::Sync => {
            let engine = SyncEngine::new(session.clone(), config.sync_config());
            let count = engine.sync_all_alarms(&config.medicines).await?;
            info!("Synchronized {} alarms", count);
        }
        Action::Status => {
            commands.request_status().await?;
            tokio::time::sleep(REPLY_WINDOW).await;
        }
        Action::History => {
            commands.request_history().await?;
            tokio::time::sleep(REPLY_WINDOW).await;
        }
        Action::Dispense { name, quantity } => {
            commands.dispense(&name, quantity).await?;
            tokio::time::sleep(REPLY_WINDOW).await;
        }
        Action::SetAlarm {
            name,
            time,
            quantity,
        } => {
            commands.set_alarm(&name, time, quantity).await?;
            tokio::time::sleep(REPLY_WINDOW).await;
        }
        Action::ClearAlarm { name, time } => {
            commands.clear_alarm(&name, time).await?;
            tokio::time::sleep(REPLY_WINDOW).await;
        }
        Action::Monitor => {
            info!("Monitoring dispenser. Press Ctrl-C to stop.");
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
        }
        Action::Next => {}
    }

    Ok(())
}

fn show_next_dose(config: &Config) {
    let now = chrono::Local::now().time();
    match medicine::next_dose(&config.medicines, now) {
        Some(next) => info!(
            "Next dose: {} at {} (in {}h {:02}m)",
            next.medicine.name(),
            next.time,
            next.minutes_until / 60,
            next.minutes_until % 60
        ),
        None => info!("No upcoming doses"),
    }

    for medicine in config.medicines.iter().filter(|m| m.is_out_of_stock()) {
        info!("Out of stock: {}", medicine.name());
    }
}
