//! The recent-tables index: a small tab-separated file remembering the
//! delimiter, policy and encoding each table was last used with. The engine
//! reads it to resolve join tables; the CLI pushes the tables it touches.

use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Default cap on the number of remembered tables.
pub const DEFAULT_INDEX_MAX_SIZE: usize = 100;

/// One index record: `[path, delim, policy, encoding_or_empty]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub table_path: String,
    /// Delimiter as written in the file; tab is spelled `TAB` so the index
    /// itself stays a well-formed TSV.
    pub delim: String,
    pub policy: String,
    pub encoding: String,
}

impl IndexEntry {
    /// The delimiter as a character, if the entry carries one.
    pub fn delim_char(&self) -> Option<char> {
        if self.delim == "TAB" {
            return Some('\t');
        }
        let mut chars = self.delim.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    }
}

/// Handle to an index file; the file may not exist yet.
pub struct TableIndex {
    path: PathBuf,
}

impl TableIndex {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// The conventional per-user index location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tabql_index"))
    }

    /// All records; a missing index reads as empty.
    pub fn read(&self) -> anyhow::Result<Vec<IndexEntry>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Unable to read table index {}", self.path.display())
                })
            }
        };
        let mut entries = Vec::new();
        for line in data.lines() {
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split('\t');
            let table_path = parts.next().unwrap_or("").to_string();
            let delim = parts.next().unwrap_or("").to_string();
            let policy = parts.next().unwrap_or("").to_string();
            let encoding = parts.next().unwrap_or("").to_string();
            entries.push(IndexEntry {
                table_path,
                delim,
                policy,
                encoding,
            });
        }
        Ok(entries)
    }

    /// Find the record for `locator` (matched against the path column).
    pub fn lookup(&self, locator: &str) -> anyhow::Result<Option<IndexEntry>> {
        Ok(self
            .read()?
            .into_iter()
            .find(|entry| entry.table_path == locator))
    }

    /// Upsert `entry`: any record with the same path is replaced, the new
    /// record goes to the tail, and the oldest records are trimmed beyond
    /// `max_size`.
    pub fn update(&self, entry: IndexEntry, max_size: usize) -> anyhow::Result<()> {
        let mut entries = self.read()?;
        entries.retain(|e| e.table_path != entry.table_path);
        entries.push(entry);
        while entries.len() > max_size {
            entries.remove(0);
        }
        self.write(&entries)
    }

    fn write(&self, entries: &[IndexEntry]) -> anyhow::Result<()> {
        let mut data = String::new();
        for entry in entries {
            data.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                entry.table_path, entry.delim, entry.policy, entry.encoding
            ));
        }
        fs::write(&self.path, data)
            .with_context(|| format!("Unable to write table index {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Spell a delimiter for the index file.
pub fn delim_to_index_form(delim: char) -> String {
    if delim == '\t' {
        "TAB".to_string()
    } else {
        delim.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, delim: &str) -> IndexEntry {
        IndexEntry {
            table_path: path.to_string(),
            delim: delim.to_string(),
            policy: "simple".to_string(),
            encoding: String::new(),
        }
    }

    #[test]
    fn test_missing_index_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = TableIndex::new(dir.path().join("index"));
        assert!(index.read().unwrap().is_empty());
        assert!(index.lookup("/tmp/t.tsv").unwrap().is_none());
    }

    #[test]
    fn test_update_replaces_and_moves_to_tail() {
        let dir = tempfile::tempdir().unwrap();
        let index = TableIndex::new(dir.path().join("index"));

        index.update(entry("/a.tsv", ";"), 100).unwrap();
        index.update(entry("/b.tsv", ","), 100).unwrap();
        index.update(entry("/a.tsv", "TAB"), 100).unwrap();

        let entries = index.read().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].table_path, "/b.tsv");
        assert_eq!(entries[1].table_path, "/a.tsv");
        assert_eq!(entries[1].delim_char(), Some('\t'));
    }

    #[test]
    fn test_oldest_trimmed_beyond_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let index = TableIndex::new(dir.path().join("index"));

        for i in 0..5 {
            index
                .update(entry(&format!("/t{}.tsv", i), ","), 3)
                .unwrap();
        }
        let entries = index.read().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].table_path, "/t2.tsv");
        assert_eq!(entries[2].table_path, "/t4.tsv");
    }
}
