pub mod line_reader;
pub mod split;
pub mod write;

use crate::warnings::{WarningBus, WarningKind};
use line_reader::LineReader;
use std::io::Read;

/// Rule set mapping between a line of bytes and a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Split on the literal delimiter, no escape handling.
    #[default]
    Simple,
    /// RFC-4180-ish CSV with `"` quoting and `""` escapes.
    Quoted,
    /// Runs of spaces separate fields; leading/trailing runs are discarded.
    Whitespace,
    /// The whole line is one field.
    Monocolumn,
}

impl std::str::FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(Policy::Simple),
            "quoted" => Ok(Policy::Quoted),
            "whitespace" => Ok(Policy::Whitespace),
            "monocolumn" => Ok(Policy::Monocolumn),
            _ => Err(format!(
                "Unknown policy: {}. Valid options: simple, quoted, whitespace, monocolumn",
                s
            )),
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Policy::Simple => write!(f, "simple"),
            Policy::Quoted => write!(f, "quoted"),
            Policy::Whitespace => write!(f, "whitespace"),
            Policy::Monocolumn => write!(f, "monocolumn"),
        }
    }
}

/// Character encoding of the byte streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            _ => Err(format!(
                "Unknown encoding: {}. Valid options: utf-8, latin-1",
                s
            )),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "utf-8"),
            Encoding::Latin1 => write!(f, "latin-1"),
        }
    }
}

/// Pulls records off a byte stream: line reading, decoding, field splitting
/// and the per-stream defect warning kind.
pub struct RecordSource<R: Read> {
    reader: LineReader<R>,
    delim: char,
    policy: Policy,
    defect_kind: WarningKind,
    bom_reported: bool,
}

impl<R: Read> RecordSource<R> {
    pub fn new(
        reader: LineReader<R>,
        delim: char,
        policy: Policy,
        defect_kind: WarningKind,
    ) -> Self {
        Self {
            reader,
            delim,
            policy,
            defect_kind,
            bom_reported: false,
        }
    }

    /// Next record, or `None` at end of stream.
    pub fn read_record(&mut self, bus: &mut WarningBus) -> anyhow::Result<Option<Vec<String>>> {
        let line = match self.reader.read_line()? {
            Some(line) => line,
            None => return Ok(None),
        };
        if self.reader.bom_stripped() && !self.bom_reported {
            self.bom_reported = true;
            bus.report(WarningKind::Utf8BomRemoved);
        }

        let fields = match self.policy {
            Policy::Monocolumn => vec![line],
            Policy::Simple => line.split(self.delim).map(str::to_string).collect(),
            Policy::Whitespace => split::split_whitespace_separated(&line, false),
            Policy::Quoted => {
                let (fields, defective) = split::split_quoted(&line, self.delim, false);
                if defective {
                    bus.report_sample(self.defect_kind, Some(line));
                }
                fields
            }
        };
        Ok(Some(fields))
    }
}
