//! JSONL command log: the graph command stream written to disk and read back.
//!
//! Line 1 is a header (`"format": "procsound-commands"`), then one
//! [`CommandRecord`] per line. Impulse responses are logged as their
//! [`BufferSummary`](crate::types::BufferSummary) rather than raw samples.

use crate::types::{CommandRecord, GraphCommand};
use crossbeam_channel::Receiver;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

pub const LOG_FORMAT: &str = "procsound-commands";

/// First line of a command log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogHeader {
    pub format: String,
    pub version: String,
    pub sample_rate: u32,
    pub seed: u64,
    pub muted: bool,
}

impl LogHeader {
    pub fn new(sample_rate: u32, seed: u64, muted: bool) -> Self {
        Self {
            format: LOG_FORMAT.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            sample_rate,
            seed,
            muted,
        }
    }
}

/// Drains a graph command channel into a JSONL file until every sender is gone.
pub struct CommandLogger<W: Write> {
    rx: Receiver<GraphCommand>,
    writer: W,
    header: LogHeader,
}

impl CommandLogger<BufWriter<File>> {
    pub fn create(rx: Receiver<GraphCommand>, path: &Path, header: LogHeader) -> io::Result<Self> {
        let file = File::create(path)?;
        info!("Command log → {:?}", path);
        Ok(Self::new(rx, BufWriter::new(file), header))
    }
}

impl<W: Write> CommandLogger<W> {
    pub fn new(rx: Receiver<GraphCommand>, writer: W, header: LogHeader) -> Self {
        Self { rx, writer, header }
    }

    /// Blocks until the channel disconnects. Returns the number of commands written.
    pub fn run(mut self) -> io::Result<u64> {
        write_json_line(&mut self.writer, &self.header)?;

        let mut count: u64 = 0;
        for cmd in self.rx.iter() {
            write_json_line(&mut self.writer, &CommandRecord::from(&cmd))?;
            count += 1;
            if count % 10_000 == 0 {
                self.writer.flush()?;
                debug!("Logged {} commands", count);
            }
        }
        self.writer.flush()?;
        info!("Command log closed: {} commands", count);
        Ok(count)
    }
}

impl<W: Write + Send + 'static> CommandLogger<W> {
    /// Run on a named `command-log` thread.
    pub fn spawn(self) -> io::Result<JoinHandle<io::Result<u64>>> {
        thread::Builder::new()
            .name("command-log".into())
            .spawn(move || self.run())
    }
}

fn write_json_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writer.write_all(b"\n")
}

/// Line-by-line reader for command logs.
pub struct CommandLogReader<R: BufRead> {
    reader: R,
    pub header: LogHeader,
    line_buf: String,
}

impl CommandLogReader<io::BufReader<File>> {
    pub fn open_path(path: &Path) -> Result<Self, String> {
        let file = File::open(path).map_err(|e| format!("open {:?}: {}", path, e))?;
        Self::open(io::BufReader::new(file))
    }
}

impl<R: BufRead> CommandLogReader<R> {
    /// Read and validate the header line.
    pub fn open(mut reader: R) -> Result<Self, String> {
        let mut first_line = String::new();
        reader
            .read_line(&mut first_line)
            .map_err(|e| format!("read header: {}", e))?;

        let first_line = first_line.trim();
        if first_line.is_empty() {
            return Err("empty file".into());
        }

        let raw: serde_json::Value =
            serde_json::from_str(first_line).map_err(|e| format!("parse header: {}", e))?;
        let format = raw["format"].as_str().ok_or("missing \"format\" field")?;
        if format != LOG_FORMAT {
            return Err(format!("unknown format: {}", format));
        }
        let header: LogHeader = serde_json::from_value(raw).map_err(|e| format!("parse header: {}", e))?;

        Ok(Self {
            reader,
            header,
            line_buf: String::new(),
        })
    }

    /// Next record; `None` at EOF, `Err` for an unreadable or unparseable line.
    pub fn next_record(&mut self) -> Option<Result<CommandRecord, String>> {
        loop {
            self.line_buf.clear();
            match self.reader.read_line(&mut self.line_buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let trimmed = self.line_buf.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(
                        serde_json::from_str::<CommandRecord>(trimmed)
                            .map_err(|e| format!("parse record: {}", e)),
                    );
                }
                Err(e) => return Some(Err(format!("read line: {}", e))),
            }
        }
    }

    /// All remaining records, skipping malformed lines.
    pub fn read_all(mut self) -> Vec<CommandRecord> {
        let mut records = Vec::new();
        while let Some(result) = self.next_record() {
            if let Ok(record) = result {
                records.push(record);
            }
        }
        records
    }
}

/// Aggregate view of a command log, as printed by `procsound inspect`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSummary {
    pub total: usize,
    pub by_op: BTreeMap<&'static str, usize>,
    /// Earliest and latest scheduled time
    pub span: Option<(f64, f64)>,
    /// Distinct oscillator frequencies, rounded to 0.01 Hz
    pub distinct_pitches: usize,
}

impl LogSummary {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a CommandRecord>,
    {
        let mut summary = LogSummary::default();
        let mut hz: Vec<i64> = Vec::new();
        for record in records {
            summary.total += 1;
            *summary.by_op.entry(record.op()).or_insert(0) += 1;
            if let Some(at) = record.at() {
                summary.span = Some(match summary.span {
                    Some((lo, hi)) => (lo.min(at), hi.max(at)),
                    None => (at, at),
                });
            }
            if let CommandRecord::Osc { hz: f, .. } = record {
                hz.push((f * 100.0).round() as i64);
            }
        }
        hz.sort_unstable();
        hz.dedup();
        summary.distinct_pitches = hz.len();
        summary
    }

    pub fn count(&self, op: &str) -> usize {
        self.by_op.get(op).copied().unwrap_or(0)
    }
}
