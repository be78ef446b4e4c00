//! Newline-delimited JSON framing for the streaming body.

use serde_json::Value;

use crate::{HealthCheck, TradingUpdate};

/// One decoded stream line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord {
    Health(HealthCheck),
    Trade(TradingUpdate),
}

/// Reassembles lines from arbitrarily split chunks.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=position).collect();
            if let Some(text) = normalize(&line) {
                lines.push(text);
            }
        }
        lines
    }

    /// Flush a trailing line left without a terminator when the body ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        normalize(&rest)
    }
}

fn normalize(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Objects carrying a `status` field are health checks; everything else is a trading update.
pub fn decode_record(line: &str) -> Result<StreamRecord, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("status").is_some() {
        Ok(StreamRecord::Health(serde_json::from_value(value)?))
    } else {
        Ok(StreamRecord::Trade(serde_json::from_value(value)?))
    }
}
