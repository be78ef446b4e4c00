use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

pub fn render(value: &Value, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{payload}");
    Ok(())
}

/// Writes one JSON document per line and flushes after each.
pub struct NdjsonWriter<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn emit<T: Serialize>(&mut self, record: &T) -> Result<(), CliError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl NdjsonWriter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}
