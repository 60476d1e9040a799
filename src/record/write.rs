//! Field joiners: the inverse of the splitters, one per output policy.

use super::{Encoding, Policy};
use crate::warnings::{WarningBus, WarningKind};
use anyhow::bail;
use std::io::Write;

/// Quote a field for CSV output when it contains the delimiter, a quote or a
/// line terminator; interior quotes are doubled.
fn quote_field(field: &str, delim: char) -> String {
    if field.contains('"') || field.contains(delim) || field.contains('\r') || field.contains('\n')
    {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Join one record into an output line according to `policy`.
///
/// Recoverable anomalies (delimiter collision under `simple`, multi-field
/// records under `monocolumn`) are reported on `bus`; the line is still
/// produced.
pub fn join_record(fields: &[String], delim: char, policy: Policy, bus: &mut WarningBus) -> String {
    match policy {
        Policy::Quoted => fields
            .iter()
            .map(|f| quote_field(f, delim))
            .collect::<Vec<_>>()
            .join(&delim.to_string()),
        Policy::Simple | Policy::Whitespace => {
            let delim = if policy == Policy::Whitespace { ' ' } else { delim };
            if fields.iter().any(|f| f.contains(delim)) {
                bus.report(WarningKind::DelimInSimpleOutput);
            }
            fields.join(&delim.to_string())
        }
        Policy::Monocolumn => {
            if fields.len() == 1 {
                fields[0].clone()
            } else {
                // fail over to quoted CSV rather than silently merging fields
                bus.report(WarningKind::OutputSwitchToCsv);
                fields
                    .iter()
                    .map(|f| quote_field(f, ','))
                    .collect::<Vec<_>>()
                    .join(",")
            }
        }
    }
}

/// Encode `line` plus a trailing newline and write it to `dst`.
pub fn write_line<W: Write>(dst: &mut W, line: &str, encoding: Encoding) -> anyhow::Result<()> {
    match encoding {
        Encoding::Utf8 => {
            dst.write_all(line.as_bytes())?;
        }
        Encoding::Latin1 => {
            let mut bytes = Vec::with_capacity(line.len());
            for ch in line.chars() {
                let code = ch as u32;
                if code > 0xFF {
                    bail!("Unable to encode character {:?} as latin-1", ch);
                }
                bytes.push(code as u8);
            }
            dst.write_all(&bytes)?;
        }
    }
    dst.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_quoted_join() {
        let mut bus = WarningBus::new();
        let line = join_record(&fields(&["a,b", "plain", "say \"hi\""]), ',', Policy::Quoted, &mut bus);
        assert_eq!(line, r#""a,b",plain,"say ""hi""""#);
        assert!(!bus.has_warnings());
    }

    #[test]
    fn test_simple_join_warns_on_delim_collision() {
        let mut bus = WarningBus::new();
        let line = join_record(&fields(&["a,b", "c"]), ',', Policy::Simple, &mut bus);
        assert_eq!(line, "a,b,c");
        assert_eq!(bus.kinds(), vec!["delim_in_simple_output"]);
    }

    #[test]
    fn test_monocolumn_failover() {
        let mut bus = WarningBus::new();
        let line = join_record(&fields(&["a,bc", "a,bc2"]), ' ', Policy::Monocolumn, &mut bus);
        assert_eq!(line, r#""a,bc","a,bc2""#);
        assert_eq!(bus.kinds(), vec!["output_switch_to_csv"]);

        let mut bus = WarningBus::new();
        let line = join_record(&fields(&["single"]), ' ', Policy::Monocolumn, &mut bus);
        assert_eq!(line, "single");
        assert!(!bus.has_warnings());
    }

    #[test]
    fn test_latin1_encoding_rejects_wide_chars() {
        let mut out = Vec::new();
        write_line(&mut out, "né", Encoding::Latin1).unwrap();
        assert_eq!(out, vec![b'n', 0xE9, b'\n']);

        let mut out = Vec::new();
        assert!(write_line(&mut out, "€", Encoding::Latin1).is_err());
    }
}
