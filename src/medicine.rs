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

//! Medicine schedule model.
//!
//! Medicines are owned by the application layer; the sync engine only reads
//! them to build the alarm payload.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::LinkError;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// A daily alarm time in 24-hour `HH:MM` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AlarmTime(NaiveTime);

impl AlarmTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    fn minutes_since_midnight(&self) -> u32 {
        self.hour() * 60 + self.minute()
    }
}

impl FromStr for AlarmTime {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|_| LinkError::InvalidAlarmTime(s.to_string()))
    }
}

impl TryFrom<String> for AlarmTime {
    type Error = LinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AlarmTime> for String {
    fn from(time: AlarmTime) -> Self {
        time.to_string()
    }
}

impl fmt::Display for AlarmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// A medicine with its remaining stock and daily alarm times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "MedicineRecord")]
pub struct Medicine {
    name: String,
    quantity: u32,
    dose: u32,
    alarm_times: Vec<AlarmTime>,
}

/// On-disk shape; duplicates in `alarm_times` are dropped on load.
#[derive(Deserialize)]
struct MedicineRecord {
    name: String,
    quantity: u32,
    #[serde(default)]
    dose: Option<u32>,
    #[serde(default)]
    alarm_times: Vec<AlarmTime>,
}

impl From<MedicineRecord> for Medicine {
    fn from(record: MedicineRecord) -> Self {
        let mut medicine = Medicine::new(record.name, record.quantity);
        if let Some(dose) = record.dose {
            medicine.dose = dose;
        }
        for time in record.alarm_times {
            medicine.add_alarm_time(time);
        }
        medicine
    }
}

impl Medicine {
    /// Create a medicine with no alarms and a dose of one unit.
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        Self {
            name: name.into(),
            quantity,
            dose: 1,
            alarm_times: Vec::new(),
        }
    }

    /// Builder-style helper that adds each time in order.
    pub fn with_alarm_times(mut self, times: impl IntoIterator<Item = AlarmTime>) -> Self {
        for time in times {
            self.add_alarm_time(time);
        }
        self
    }

    pub fn with_dose(mut self, dose: u32) -> Self {
        self.dose = dose;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Units left in the dispenser.
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity;
    }

    /// Units released per alarm.
    pub fn dose(&self) -> u32 {
        self.dose
    }

    /// Alarm times in the order they were added.
    pub fn alarm_times(&self) -> &[AlarmTime] {
        &self.alarm_times
    }

    /// Add an alarm time. Returns `false` if it was already present.
    pub fn add_alarm_time(&mut self, time: AlarmTime) -> bool {
        if self.alarm_times.contains(&time) {
            return false;
        }
        self.alarm_times.push(time);
        true
    }

    /// Remove an alarm time. Returns `false` if it was not present.
    pub fn remove_alarm_time(&mut self, time: AlarmTime) -> bool {
        let before = self.alarm_times.len();
        self.alarm_times.retain(|t| *t != time);
        self.alarm_times.len() != before
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.quantity == 0
    }

    pub fn is_low_stock(&self, threshold: u32) -> bool {
        self.quantity <= threshold
    }
}

/// Total number of alarms across all medicines.
pub fn total_alarms(medicines: &[Medicine]) -> usize {
    medicines.iter().map(|m| m.alarm_times().len()).sum()
}

/// Every distinct alarm time, sorted.
pub fn all_alarm_times(medicines: &[Medicine]) -> Vec<AlarmTime> {
    let mut times: Vec<AlarmTime> = medicines
        .iter()
        .flat_map(|m| m.alarm_times().iter().copied())
        .collect();
    times.sort();
    times.dedup();
    times
}

/// The next alarm to fire after a given time of day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextDose<'a> {
    pub medicine: &'a Medicine,
    pub time: AlarmTime,
    /// Minutes from `now` until the alarm, wrapping past midnight.
    pub minutes_until: u32,
}

/// Find the next dose after `now`. Out-of-stock medicines are skipped and an
/// alarm at or before `now` counts as tomorrow's.
pub fn next_dose(medicines: &[Medicine], now: NaiveTime) -> Option<NextDose<'_>> {
    let now_minutes = now.hour() * 60 + now.minute();
    let mut best: Option<NextDose<'_>> = None;

    for medicine in medicines.iter().filter(|m| !m.is_out_of_stock()) {
        for &time in medicine.alarm_times() {
            let at = time.minutes_since_midnight();
            let minutes_until = if at > now_minutes {
                at - now_minutes
            } else {
                at + MINUTES_PER_DAY - now_minutes
            };

            if best.as_ref().map_or(true, |b| minutes_until < b.minutes_until) {
                best = Some(NextDose {
                    medicine,
                    time,
                    minutes_until,
                });
            }
        }
    }

    best
}
