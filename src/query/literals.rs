//! String-literal extraction and re-substitution.
//!
//! Clause separation scans the query for keywords, so string literals must be
//! taken out of the way first. Each literal (quotes included) is replaced by
//! a positional `%%str_literal_<i>%%` placeholder and restored verbatim into
//! the rewritten clause texts.

use anyhow::bail;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"%%str_literal_(\d+)%%").unwrap());

/// Replace every single- or double-quoted literal with a placeholder,
/// honoring backslash escapes. Returns the skeleton and the literals in
/// order of occurrence (duplicates keep separate slots).
pub fn separate_string_literals(query: &str) -> anyhow::Result<(String, Vec<String>)> {
    let bytes = query.as_bytes();
    let mut skeleton = Vec::with_capacity(bytes.len());
    let mut literals = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'"' || b == b'\'' {
            let mut j = i + 1;
            while j < bytes.len() {
                if bytes[j] == b'\\' {
                    j += 2;
                    continue;
                }
                if bytes[j] == b {
                    break;
                }
                j += 1;
            }
            if j >= bytes.len() {
                bail!("Unterminated string literal in query");
            }
            skeleton.extend_from_slice(format!("%%str_literal_{}%%", literals.len()).as_bytes());
            literals.push(query[i..=j].to_string());
            i = j + 1;
        } else {
            skeleton.push(b);
            i += 1;
        }
    }
    // only ASCII bytes were replaced, the rest was copied verbatim
    Ok((String::from_utf8(skeleton).unwrap(), literals))
}

/// Restore the literals into a rewritten clause text.
pub fn combine_string_literals(text: &str, literals: &[String]) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let index: usize = caps[1].parse().unwrap();
            literals
                .get(index)
                .map(String::as_str)
                .unwrap_or_else(|| caps.get(0).unwrap().as_str())
                .to_string()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(query: &str) -> Vec<String> {
        let (skeleton, literals) = separate_string_literals(query).unwrap();
        assert_eq!(combine_string_literals(&skeleton, &literals), query);
        literals
    }

    #[test]
    fn test_no_literals() {
        assert!(roundtrip("Select 100 order by a1").is_empty());
    }

    #[test]
    fn test_single_and_double_quotes() {
        assert_eq!(roundtrip(r#"Select "hello" order by a1"#), vec![r#""hello""#]);
        assert_eq!(
            roundtrip(r#"Select 'hello', 100 order by a1 desc"#),
            vec!["'hello'"]
        );
    }

    #[test]
    fn test_duplicates_keep_slots() {
        assert_eq!(
            roundtrip(r#"Select "hello", *, "world" 100 order by a1 desc"#),
            vec![r#""hello""#, r#""world""#]
        );
    }

    #[test]
    fn test_escaped_quotes() {
        let literals = roundtrip(
            r#"Select "hello", "world", "hello \" world", "hello \\\" world", "hello \\\\\\\" world" order by "world""#,
        );
        assert_eq!(
            literals,
            vec![
                r#""hello""#,
                r#""world""#,
                r#""hello \" world""#,
                r#""hello \\\" world""#,
                r#""hello \\\\\\\" world""#,
                r#""world""#,
            ]
        );
    }

    #[test]
    fn test_unterminated_literal() {
        assert!(separate_string_literals(r#"select "oops"#).is_err());
    }
}
