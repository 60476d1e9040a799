//! Right-table loading and the hash-join index.

use crate::index::TableIndex;
use crate::query::JoinSpec;
use crate::record::line_reader::LineReader;
use crate::record::{Encoding, Policy, RecordSource};
use crate::warnings::{WarningBus, WarningKind};
use ahash::AHashMap;
use anyhow::{bail, Context};
use std::fs::File;
use std::path::Path;

/// Input format of one table stream.
#[derive(Debug, Clone, Copy)]
pub struct TableFormat {
    pub delim: char,
    pub policy: Policy,
    pub encoding: Encoding,
}

/// The fully-loaded right side of a JOIN: records padded to the table width,
/// plus a key → record-numbers index.
#[derive(Debug)]
pub struct RightTable {
    records: Vec<Vec<String>>,
    index: AHashMap<String, Vec<usize>>,
    width: usize,
}

impl RightTable {
    pub fn width(&self) -> usize {
        self.width
    }

    /// Record numbers matching `key`, in table insertion order.
    pub fn matches(&self, key: &str) -> &[usize] {
        self.index.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record(&self, slot: usize) -> &[String] {
        &self.records[slot]
    }
}

/// Resolve the join locator and load the table.
///
/// The recent-tables index may override the table's delimiter/policy/encoding
/// (tables are often saved in a different format than the primary stream);
/// without an index entry the primary stream's format is used.
pub fn load_right_table(
    spec: &JoinSpec,
    defaults: TableFormat,
    index_file: Option<&Path>,
    chunk_size: usize,
    bus: &mut WarningBus,
) -> anyhow::Result<RightTable> {
    let mut format = defaults;
    let mut table_path = spec.locator.clone();

    if let Some(index_path) = index_file {
        if let Some(entry) = TableIndex::new(index_path).lookup(&spec.locator)? {
            table_path = entry.table_path.clone();
            if let Some(delim) = entry.delim_char() {
                format.delim = delim;
            }
            if let Ok(policy) = entry.policy.parse() {
                format.policy = policy;
            }
            if !entry.encoding.is_empty() {
                if let Ok(encoding) = entry.encoding.parse() {
                    format.encoding = encoding;
                }
            }
        }
    }

    if !Path::new(&table_path).exists() {
        bail!("Unable to find join table \"{}\"", spec.locator);
    }
    let file = File::open(&table_path)
        .with_context(|| format!("Unable to open join table \"{}\"", table_path))?;
    let reader = LineReader::new(file, chunk_size, format.encoding);
    let mut source = RecordSource::new(
        reader,
        format.delim,
        format.policy,
        WarningKind::DefectiveCsvLineInJoin,
    );

    let mut records: Vec<Vec<String>> = Vec::new();
    let mut index: AHashMap<String, Vec<usize>> = AHashMap::new();
    let mut width = 0;
    while let Some(fields) = source.read_record(bus)? {
        let key = fields
            .get(spec.right_col - 1)
            .cloned()
            .unwrap_or_default();
        width = width.max(fields.len());
        index.entry(key).or_default().push(records.len());
        records.push(fields);
    }
    // short records are implicitly padded when referenced as bN
    for record in &mut records {
        record.resize(width, String::new());
    }

    Ok(RightTable {
        records,
        index,
        width,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::JoinMode;
    use std::io::Write;

    fn spec(locator: &str) -> JoinSpec {
        JoinSpec {
            mode: JoinMode::Inner,
            locator: locator.to_string(),
            left_col: 2,
            right_col: 1,
        }
    }

    fn format() -> TableFormat {
        TableFormat {
            delim: '\t',
            policy: Policy::Simple,
            encoding: Encoding::Utf8,
        }
    }

    #[test]
    fn test_load_pads_to_table_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rhs.tsv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "car\tgas").unwrap();
        writeln!(f, "plane").unwrap();
        writeln!(f, "plane\tair").unwrap();
        drop(f);

        let mut bus = WarningBus::new();
        let table = load_right_table(
            &spec(path.to_str().unwrap()),
            format(),
            None,
            1024,
            &mut bus,
        )
        .unwrap();

        assert_eq!(table.width(), 2);
        assert_eq!(table.matches("plane").len(), 2);
        assert_eq!(table.record(1), &["plane".to_string(), String::new()]);
        assert!(table.matches("rocket").is_empty());
    }

    #[test]
    fn test_missing_table_is_fatal() {
        let mut bus = WarningBus::new();
        let err = load_right_table(&spec("/no/such/table.tsv"), format(), None, 1024, &mut bus)
            .unwrap_err();
        assert!(err.to_string().contains("Unable to find join table"));
    }
}
