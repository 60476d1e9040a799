//! Warning bus for recoverable query anomalies.
//!
//! Warnings never stop execution; they accumulate during a run and are
//! returned alongside the output so the caller can decide how to render them.

/// Recoverable anomalies with stable external names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// Input records have inconsistent field counts, or a query referenced
    /// a field a record does not have.
    InputFieldsInfo,
    /// A nil value produced by a user expression was written as an empty field.
    NullValueInOutput,
    /// A field written under the `simple` policy contained the delimiter.
    DelimInSimpleOutput,
    /// Monocolumn output received a multi-field record and fell back to CSV.
    OutputSwitchToCsv,
    /// A UTF-8 byte order mark was stripped from the first line of a table.
    Utf8BomRemoved,
    /// A quoted line in the primary stream had unbalanced quotes.
    DefectiveCsvLineInInput,
    /// A quoted line in the join table had unbalanced quotes.
    DefectiveCsvLineInJoin,
}

impl WarningKind {
    /// The stable external name used in JSON reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::InputFieldsInfo => "input_fields_info",
            WarningKind::NullValueInOutput => "null_value_in_output",
            WarningKind::DelimInSimpleOutput => "delim_in_simple_output",
            WarningKind::OutputSwitchToCsv => "output_switch_to_csv",
            WarningKind::Utf8BomRemoved => "utf8_bom_removed",
            WarningKind::DefectiveCsvLineInInput => "defective_csv_line_in_input",
            WarningKind::DefectiveCsvLineInJoin => "defective_csv_line_in_join",
        }
    }
}

impl std::fmt::Display for WarningKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarningKind::InputFieldsInfo => {
                write!(f, "input records have different numbers of fields")
            }
            WarningKind::NullValueInOutput => {
                write!(f, "nil values in output were replaced by empty strings")
            }
            WarningKind::DelimInSimpleOutput => {
                write!(f, "some output fields contain the output delimiter")
            }
            WarningKind::OutputSwitchToCsv => {
                write!(f, "monocolumn output switched to quoted CSV")
            }
            WarningKind::Utf8BomRemoved => write!(f, "UTF-8 BOM removed from the first line"),
            WarningKind::DefectiveCsvLineInInput => {
                write!(f, "defective quoting in input table lines")
            }
            WarningKind::DefectiveCsvLineInJoin => {
                write!(f, "defective quoting in join table lines")
            }
        }
    }
}

/// One accumulated warning: kind, occurrence count and a first sample.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub count: u64,
    pub sample: Option<String>,
}

/// Append-only collector; duplicate kinds collapse into one entry.
#[derive(Debug, Default)]
pub struct WarningBus {
    entries: Vec<Warning>,
}

impl WarningBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of `kind`.
    pub fn report(&mut self, kind: WarningKind) {
        self.report_sample(kind, None);
    }

    /// Record one occurrence of `kind`, keeping `sample` if it is the first.
    pub fn report_sample(&mut self, kind: WarningKind, sample: Option<String>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.kind == kind) {
            entry.count += 1;
            return;
        }
        self.entries.push(Warning {
            kind,
            count: 1,
            sample,
        });
    }

    pub fn has_warnings(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Warning] {
        &self.entries
    }

    /// External names of all reported kinds, in first-reported order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.kind.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_collapse() {
        let mut bus = WarningBus::new();
        bus.report(WarningKind::NullValueInOutput);
        bus.report(WarningKind::NullValueInOutput);
        bus.report(WarningKind::InputFieldsInfo);

        assert_eq!(bus.kinds(), vec!["null_value_in_output", "input_fields_info"]);
        assert_eq!(bus.entries()[0].count, 2);
    }

    #[test]
    fn test_first_sample_kept() {
        let mut bus = WarningBus::new();
        bus.report_sample(WarningKind::DefectiveCsvLineInInput, Some("line 3".into()));
        bus.report_sample(WarningKind::DefectiveCsvLineInInput, Some("line 9".into()));

        assert_eq!(bus.entries()[0].sample.as_deref(), Some("line 3"));
        assert_eq!(bus.entries()[0].count, 2);
    }
}
