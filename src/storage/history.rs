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

//! Dispense history reported by the device, stored in SQLite.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, TimeZone};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// One dispense reported by a `HISTORY` reply.
#[derive(Debug, Clone)]
pub struct DispenseEntry {
    pub id: i64,
    pub medicine: String,
    /// Time of day as reported by the device.
    pub taken_time: String,
    /// Date as reported by the device.
    pub taken_date: String,
    /// When the app received the report.
    pub recorded_at: DateTime<Local>,
}

/// Dispense log database.
#[derive(Clone)]
pub struct DispenseLog {
    conn: Arc<Mutex<Connection>>,
    max_entries: u32,
}

impl DispenseLog {
    /// Create or open the log database.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("dispense_log.db");
        info!("Opening dispense log: {:?}", db_path);

        let conn = Connection::open(&db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS dispense_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                medicine TEXT NOT NULL,
                taken_time TEXT NOT NULL,
                taken_date TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                UNIQUE (medicine, taken_time, taken_date)
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_entries: 10000,
        })
    }

    /// Set maximum number of entries to keep.
    pub fn set_max_entries(&mut self, max: u32) {
        self.max_entries = max;
    }

    /// Record a dispense. The device repeats its whole history on every
    /// `GET_HISTORY`, so an entry already present is ignored.
    pub fn add(&self, medicine: &str, taken_time: &str, taken_date: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let recorded_at = Local::now().timestamp();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO dispense_log (medicine, taken_time, taken_date, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![medicine, taken_time, taken_date, recorded_at],
        )?;

        self.cleanup_old_entries(&conn)?;

        Ok(inserted > 0)
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: u32) -> Result<Vec<DispenseEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, medicine, taken_time, taken_date, recorded_at
             FROM dispense_log
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map([limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, medicine, taken_time, taken_date, recorded_secs)| {
                let recorded_at = Local
                    .timestamp_opt(recorded_secs, 0)
                    .single()
                    .ok_or_else(|| anyhow!("invalid timestamp {} in dispense log", recorded_secs))?;
                Ok(DispenseEntry {
                    id,
                    medicine,
                    taken_time,
                    taken_date,
                    recorded_at,
                })
            })
            .collect()
    }

    /// Clear the log.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM dispense_log", [])?;
        info!("Dispense log cleared");
        Ok(())
    }

    /// Get total entry count.
    pub fn count(&self) -> Result<u32> {
        let conn = self.conn.lock();
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM dispense_log", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Remove old entries beyond max_entries.
    fn cleanup_old_entries(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "DELETE FROM dispense_log WHERE id NOT IN (
                SELECT id FROM dispense_log ORDER BY id DESC LIMIT ?1
            )",
            [self.max_entries],
        )?;
        Ok(())
    }
}
