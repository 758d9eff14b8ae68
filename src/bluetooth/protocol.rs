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

//! Plaintext line protocol spoken by the dispenser firmware.

use std::fmt;

use crate::error::LinkError;
use crate::medicine::AlarmTime;

/// Acknowledgment tokens sent back by the dispenser.
///
/// A reply acknowledges a command when it contains the token anywhere in
/// the line.
pub mod tokens {
    pub const SYNC_STARTED: &str = "SYNC_STARTED";
    pub const EXPECTING_ALARMS: &str = "EXPECTING_ALARMS";
    pub const ALARMS_CLEARED: &str = "ALARMS_CLEARED";
    pub const ALARM_SET: &str = "ALARM_SET";
    pub const SYNC_COMPLETE: &str = "SYNC_COMPLETE";
}

/// Commands sent to the dispenser, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Probe sent right after connecting.
    Hello,
    /// Keep-alive.
    Ping,
    SyncStart,
    ExpectAlarms(usize),
    ClearAlarms,
    SetAlarm {
        name: String,
        time: AlarmTime,
        quantity: u32,
    },
    ClearAlarm {
        name: String,
        time: AlarmTime,
    },
    SyncEnd,
    GetStatus,
    GetHistory,
    Check(String),
    Dispense {
        name: String,
        quantity: u32,
    },
}

impl Command {
    /// Build a `SET_ALARM` command, rejecting names that would break framing.
    pub fn set_alarm(name: &str, time: AlarmTime, quantity: u32) -> Result<Self, LinkError> {
        Ok(Self::SetAlarm {
            name: validate_name(name)?,
            time,
            quantity,
        })
    }

    pub fn clear_alarm(name: &str, time: AlarmTime) -> Result<Self, LinkError> {
        Ok(Self::ClearAlarm {
            name: validate_name(name)?,
            time,
        })
    }

    pub fn check(name: &str) -> Result<Self, LinkError> {
        Ok(Self::Check(validate_name(name)?))
    }

    pub fn dispense(name: &str, quantity: u32) -> Result<Self, LinkError> {
        if quantity == 0 {
            return Err(LinkError::InvalidCommand(
                "dispense quantity must be at least 1".to_string(),
            ));
        }
        Ok(Self::Dispense {
            name: validate_name(name)?,
            quantity,
        })
    }

    /// Encode as a wire line, without the trailing delimiter.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hello => write!(f, "HELLO"),
            Self::Ping => write!(f, "PING"),
            Self::SyncStart => write!(f, "SYNC_START"),
            Self::ExpectAlarms(count) => write!(f, "EXPECT_ALARMS:{}", count),
            Self::ClearAlarms => write!(f, "CLEAR_ALARMS"),
            Self::SetAlarm {
                name,
                time,
                quantity,
            } => write!(
                f,
                "SET_ALARM:{}:{:02}:{:02}({})",
                name,
                time.hour(),
                time.minute(),
                quantity
            ),
            Self::ClearAlarm { name, time } => write!(
                f,
                "CLEAR_ALARM:{}:{:02}:{:02}",
                name,
                time.hour(),
                time.minute()
            ),
            Self::SyncEnd => write!(f, "SYNC_END"),
            Self::GetStatus => write!(f, "GET_STATUS"),
            Self::GetHistory => write!(f, "GET_HISTORY"),
            Self::Check(name) => write!(f, "CHECK:{}", name),
            Self::Dispense { name, quantity } => write!(f, "DISPENSE:{}:{}", name, quantity),
        }
    }
}

fn validate_name(name: &str) -> Result<String, LinkError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LinkError::InvalidCommand(
            "medicine name is empty".to_string(),
        ));
    }
    if name.contains(':') || name.contains(['\n', '\r']) {
        return Err(LinkError::InvalidCommand(format!(
            "medicine name `{}` may not contain ':' or line breaks",
            name.escape_debug()
        )));
    }
    Ok(name.to_string())
}

/// Replies recognised from the dispenser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `STATUS:<name>:<qty>`
    Status { name: String, quantity: u32 },
    /// `HISTORY:<name>:<time>:<date>`
    History {
        name: String,
        time: String,
        date: String,
    },
    AlarmSet,
    SyncComplete,
    Other(String),
}

impl Reply {
    /// Parse a framed message. Anything unrecognised or malformed is `Other`.
    pub fn parse(message: &str) -> Self {
        if let Some(rest) = message.strip_prefix("STATUS:") {
            if let Some((name, quantity)) = rest.rsplit_once(':') {
                if let Ok(quantity) = quantity.trim().parse() {
                    return Self::Status {
                        name: name.to_string(),
                        quantity,
                    };
                }
            }
        } else if let Some(rest) = message.strip_prefix("HISTORY:") {
            // The time field itself contains a colon: HISTORY:name:HH:MM:date
            let parts: Vec<&str> = rest.split(':').collect();
            match parts.as_slice() {
                [name, hour, minute, date] => {
                    return Self::History {
                        name: name.to_string(),
                        time: format!("{}:{}", hour, minute),
                        date: date.to_string(),
                    };
                }
                [name, time, date] => {
                    return Self::History {
                        name: name.to_string(),
                        time: time.to_string(),
                        date: date.to_string(),
                    };
                }
                _ => {}
            }
        } else if message == tokens::SYNC_COMPLETE {
            return Self::SyncComplete;
        } else if message == tokens::ALARM_SET {
            return Self::AlarmSet;
        }

        Self::Other(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encoding() {
        let time: AlarmTime = "08:05".parse().unwrap();
        assert_eq!(Command::SyncStart.encode(), "SYNC_START");
        assert_eq!(Command::ExpectAlarms(5).encode(), "EXPECT_ALARMS:5");
        assert_eq!(
            Command::set_alarm("Aspirin", time, 2).unwrap().encode(),
            "SET_ALARM:Aspirin:08:05(2)"
        );
        assert_eq!(
            Command::clear_alarm("Aspirin", time).unwrap().encode(),
            "CLEAR_ALARM:Aspirin:08:05"
        );
        assert_eq!(
            Command::dispense("Vitamin D", 1).unwrap().encode(),
            "DISPENSE:Vitamin D:1"
        );
        assert_eq!(Command::check("Aspirin").unwrap().encode(), "CHECK:Aspirin");
        assert_eq!(Command::GetStatus.encode(), "GET_STATUS");
        assert_eq!(Command::GetHistory.encode(), "GET_HISTORY");
        assert_eq!(Command::Ping.encode(), "PING");
    }

    #[test]
    fn test_names_that_break_framing_rejected() {
        let time: AlarmTime = "08:00".parse().unwrap();
        assert!(Command::set_alarm("a:b", time, 1).is_err());
        assert!(Command::set_alarm("line\nbreak", time, 1).is_err());
        assert!(Command::set_alarm("   ", time, 1).is_err());
        assert!(Command::dispense("Aspirin", 0).is_err());
    }

    #[test]
    fn test_reply_parsing() {
        assert_eq!(
            Reply::parse("STATUS:Aspirin:12"),
            Reply::Status {
                name: "Aspirin".to_string(),
                quantity: 12
            }
        );
        assert_eq!(
            Reply::parse("HISTORY:Aspirin:08:00:2026-03-01"),
            Reply::History {
                name: "Aspirin".to_string(),
                time: "08:00".to_string(),
                date: "2026-03-01".to_string(),
            }
        );
        assert_eq!(
            Reply::parse("HISTORY:Aspirin:0800:2026-03-01"),
            Reply::History {
                name: "Aspirin".to_string(),
                time: "0800".to_string(),
                date: "2026-03-01".to_string(),
            }
        );
        assert_eq!(Reply::parse("SYNC_COMPLETE"), Reply::SyncComplete);
        assert_eq!(Reply::parse("ALARM_SET"), Reply::AlarmSet);
        assert_eq!(
            Reply::parse("STATUS:broken"),
            Reply::Other("STATUS:broken".to_string())
        );
        assert_eq!(Reply::parse("HELLO_ACK"), Reply::Other("HELLO_ACK".to_string()));
    }
}
