//! The output side of the pipeline: a chain of record sinks.
//!
//! Records flow SortSink → UniqSink/UniqCountSink → TopSink → OutputSink.
//! `push` returns `false` when the sink cannot accept more records (TOP
//! reached), which lets streaming queries stop reading input early.

use crate::expr::value::{compare_keys, Value};
use crate::record::{write, Encoding, Policy};
use crate::warnings::WarningBus;
use ahash::{AHashMap, AHashSet};
use std::io::Write as IoWrite;

/// One projected output record on its way to the output stream.
#[derive(Debug, Clone)]
pub struct OutRecord {
    pub fields: Vec<String>,
    /// At most one UNFOLD column: its position and the expanded items.
    pub unfold: Option<UnfoldColumn>,
    /// ORDER BY key tuple; empty for unsorted queries.
    pub sort_key: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct UnfoldColumn {
    pub pos: usize,
    pub items: Vec<String>,
}

impl OutRecord {
    pub fn plain(fields: Vec<String>) -> Self {
        Self {
            fields,
            unfold: None,
            sort_key: Vec::new(),
        }
    }
}

pub trait RecordSink {
    /// Accept one record; `Ok(false)` means the producer should stop.
    fn push(&mut self, rec: OutRecord, bus: &mut WarningBus) -> anyhow::Result<bool>;
    /// Flush buffered records down the chain.
    fn finish(&mut self, bus: &mut WarningBus) -> anyhow::Result<()>;
}

/// Terminal sink: UNFOLD expansion, field joining, encoding.
pub struct OutputSink<'w, W: IoWrite> {
    dst: &'w mut W,
    delim: char,
    policy: Policy,
    encoding: Encoding,
}

impl<'w, W: IoWrite> OutputSink<'w, W> {
    pub fn new(dst: &'w mut W, delim: char, policy: Policy, encoding: Encoding) -> Self {
        Self {
            dst,
            delim,
            policy,
            encoding,
        }
    }

    fn write_fields(&mut self, fields: &[String], bus: &mut WarningBus) -> anyhow::Result<()> {
        let line = if fields.is_empty() {
            // every output record carries at least one field
            write::join_record(&[String::new()], self.delim, self.policy, bus)
        } else {
            write::join_record(fields, self.delim, self.policy, bus)
        };
        write::write_line(self.dst, &line, self.encoding)
    }
}

impl<W: IoWrite> RecordSink for OutputSink<'_, W> {
    fn push(&mut self, rec: OutRecord, bus: &mut WarningBus) -> anyhow::Result<bool> {
        match rec.unfold {
            None => self.write_fields(&rec.fields, bus)?,
            Some(unfold) => {
                let mut fields = rec.fields;
                for item in unfold.items {
                    fields[unfold.pos] = item;
                    self.write_fields(&fields, bus)?;
                }
            }
        }
        Ok(true)
    }

    fn finish(&mut self, _bus: &mut WarningBus) -> anyhow::Result<()> {
        self.dst.flush()?;
        Ok(())
    }
}

/// Caps the record count; refuses records once the limit is reached.
pub struct TopSink<'s> {
    inner: Box<dyn RecordSink + 's>,
    limit: u64,
    written: u64,
}

impl<'s> TopSink<'s> {
    pub fn new(inner: Box<dyn RecordSink + 's>, limit: u64) -> Self {
        Self {
            inner,
            limit,
            written: 0,
        }
    }
}

impl RecordSink for TopSink<'_> {
    fn push(&mut self, rec: OutRecord, bus: &mut WarningBus) -> anyhow::Result<bool> {
        if self.written >= self.limit {
            return Ok(false);
        }
        self.written += 1;
        self.inner.push(rec, bus)?;
        Ok(self.written < self.limit)
    }

    fn finish(&mut self, bus: &mut WarningBus) -> anyhow::Result<()> {
        self.inner.finish(bus)
    }
}

/// Streaming DISTINCT: passes the first occurrence of each field tuple.
pub struct UniqSink<'s> {
    inner: Box<dyn RecordSink + 's>,
    seen: AHashSet<Vec<String>>,
}

impl<'s> UniqSink<'s> {
    pub fn new(inner: Box<dyn RecordSink + 's>) -> Self {
        Self {
            inner,
            seen: AHashSet::new(),
        }
    }
}

impl RecordSink for UniqSink<'_> {
    fn push(&mut self, rec: OutRecord, bus: &mut WarningBus) -> anyhow::Result<bool> {
        if !self.seen.insert(rec.fields.clone()) {
            return Ok(true);
        }
        self.inner.push(rec, bus)
    }

    fn finish(&mut self, bus: &mut WarningBus) -> anyhow::Result<()> {
        self.inner.finish(bus)
    }
}

/// DISTINCT COUNT: buffers unique tuples with their occurrence counts, then
/// emits count-first rows ordered by count descending (ties keep first-seen
/// order).
pub struct UniqCountSink<'s> {
    inner: Box<dyn RecordSink + 's>,
    index: AHashMap<Vec<String>, usize>,
    entries: Vec<(OutRecord, u64)>,
}

impl<'s> UniqCountSink<'s> {
    pub fn new(inner: Box<dyn RecordSink + 's>) -> Self {
        Self {
            inner,
            index: AHashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl RecordSink for UniqCountSink<'_> {
    fn push(&mut self, rec: OutRecord, _bus: &mut WarningBus) -> anyhow::Result<bool> {
        match self.index.get(&rec.fields) {
            Some(&slot) => self.entries[slot].1 += 1,
            None => {
                self.index.insert(rec.fields.clone(), self.entries.len());
                self.entries.push((rec, 1));
            }
        }
        Ok(true)
    }

    fn finish(&mut self, bus: &mut WarningBus) -> anyhow::Result<()> {
        let mut entries = std::mem::take(&mut self.entries);
        // stable: equal counts keep first-seen order
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        for (mut rec, count) in entries {
            rec.fields.insert(0, count.to_string());
            if let Some(unfold) = &mut rec.unfold {
                unfold.pos += 1;
            }
            if !self.inner.push(rec, bus)? {
                break;
            }
        }
        self.inner.finish(bus)
    }
}

/// ORDER BY: buffers everything, stable-sorts by the key tuple. DESC flips
/// the comparator only, so equal keys keep their input order either way.
pub struct SortSink<'s> {
    inner: Box<dyn RecordSink + 's>,
    reverse: bool,
    buffer: Vec<OutRecord>,
}

impl<'s> SortSink<'s> {
    pub fn new(inner: Box<dyn RecordSink + 's>, reverse: bool) -> Self {
        Self {
            inner,
            reverse,
            buffer: Vec::new(),
        }
    }
}

impl RecordSink for SortSink<'_> {
    fn push(&mut self, rec: OutRecord, _bus: &mut WarningBus) -> anyhow::Result<bool> {
        self.buffer.push(rec);
        Ok(true)
    }

    fn finish(&mut self, bus: &mut WarningBus) -> anyhow::Result<()> {
        let mut buffer = std::mem::take(&mut self.buffer);
        if self.reverse {
            buffer.sort_by(|a, b| compare_keys(&b.sort_key, &a.sort_key));
        } else {
            buffer.sort_by(|a, b| compare_keys(&a.sort_key, &b.sort_key));
        }
        for rec in buffer {
            if !self.inner.push(rec, bus)? {
                break;
            }
        }
        self.inner.finish(bus)
    }
}
