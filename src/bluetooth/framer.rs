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

//! Newline framing for the serial byte stream.

use tracing::{debug, warn};

/// Line delimiter used in both directions.
pub const DELIMITER: u8 = b'\n';

/// Splits a raw byte stream into trimmed, newline-terminated messages.
///
/// Reads from the radio link arrive in arbitrary chunks: a single read may
/// hold half a message or several. The framer keeps at most one undelimited
/// tail between calls.
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Create a new line framer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Append a chunk and return every message it completes, in order.
    ///
    /// Empty lines are dropped. Bytes that are not valid UTF-8 are removed
    /// from the message they belong to; the rest of the line is kept.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut messages = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == DELIMITER) {
            let end = start + offset;
            if let Some(message) = decode_line(&self.buffer[start..end]) {
                messages.push(message);
            }
            start = end + 1;
        }

        self.buffer.drain(..start);

        if !self.buffer.is_empty() {
            debug!("Holding {} bytes of partial message", self.buffer.len());
        }

        messages
    }

    /// Discard any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes waiting for a delimiter.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let mut text = String::with_capacity(bytes.len());
    let mut dropped = 0;

    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
        dropped += chunk.invalid().len();
    }

    if dropped > 0 {
        warn!("Dropped {} undecodable bytes from message", dropped);
    }

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_messages_in_one_read() {
        let mut framer = LineFramer::new();
        let messages = framer.feed(b"SYNC_STARTED\nEXPECTING_ALARMS\n");
        assert_eq!(messages, vec!["SYNC_STARTED", "EXPECTING_ALARMS"]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_partial_message_across_reads() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"STATUS:Asp").is_empty());
        assert_eq!(framer.pending_len(), 10);

        let messages = framer.feed(b"irin:12\r\nHIS");
        assert_eq!(messages, vec!["STATUS:Aspirin:12"]);
        assert_eq!(framer.pending_len(), 3);
    }

    #[test]
    fn test_blank_lines_dropped_and_trimmed() {
        let mut framer = LineFramer::new();
        let messages = framer.feed(b"\n  \r\n  ALARM_SET  \n\n");
        assert_eq!(messages, vec!["ALARM_SET"]);
    }

    #[test]
    fn test_invalid_utf8_dropped_from_single_message() {
        let mut framer = LineFramer::new();
        let messages = framer.feed(b"ALARM\xff_SET\n\xfe\xfd\nSYNC_COMPLETE\n");
        assert_eq!(messages, vec!["ALARM_SET", "SYNC_COMPLETE"]);
    }

    #[test]
    fn test_split_invariance() {
        let stream: &[u8] =
            b"SYNC_STARTED\r\n\nEXPECTING_ALARMS\nSTATUS:Vitamin D:4\n  \nHISTORY:A:08:00:2026-01-02\ntail";

        let mut whole = LineFramer::new();
        let expected = whole.feed(stream);
        assert_eq!(expected.len(), 4);

        for chunk_size in 1..=stream.len() {
            let mut framer = LineFramer::new();
            let mut got = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                got.extend(framer.feed(chunk));
            }
            assert_eq!(got, expected, "chunk size {}", chunk_size);
            assert_eq!(framer.pending_len(), whole.pending_len());
        }
    }

    #[test]
    fn test_reset_discards_tail() {
        let mut framer = LineFramer::new();
        framer.feed(b"HALF");
        framer.reset();
        assert_eq!(framer.feed(b"LINE\n"), vec!["LINE"]);
    }
}
