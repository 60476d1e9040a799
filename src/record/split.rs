//! Field splitters for the `quoted` and `whitespace` policies.
//!
//! Each splitter comes in two modes: the plain mode returns cleaned field
//! values, the *preserved* mode returns substrings that reproduce the
//! original line exactly when re-joined (with the delimiter for `quoted`,
//! by plain concatenation for `whitespace`).

use once_cell::sync::Lazy;
use regex::Regex;

static QUOTED_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^ *"((?:[^"]*"")*[^"]*)" *$"#).unwrap());

/// Strip the outer quotes (and surrounding spaces) from a preserved quoted
/// field and collapse `""` escapes. Fields that are not quoted are returned
/// unchanged.
pub fn unquote_field(field: &str) -> String {
    match QUOTED_FIELD_RE.captures(field) {
        Some(caps) => caps[1].replace("\"\"", "\""),
        None => field.to_string(),
    }
}

/// Split an RFC-4180-ish line on `delim`.
///
/// Returns the fields and a defect flag. A field that cannot be scanned as
/// quoted (stray quote, unterminated quote) sets the flag; the offending
/// piece is kept verbatim up to the next delimiter and scanning continues,
/// so no bytes are ever dropped.
pub fn split_quoted(src: &str, delim: char, preserve: bool) -> (Vec<String>, bool) {
    debug_assert!(delim != '"');
    if !src.contains('"') {
        return (src.split(delim).map(str::to_string).collect(), false);
    }

    let len = src.len();
    let delim_len = delim.len_utf8();
    let mut fields = Vec::new();
    let mut defective = false;
    let mut cidx = 0;

    while cidx < len {
        let mut pidx = cidx;
        while src[pidx..].starts_with(' ') {
            pidx += 1;
        }
        if src[pidx..].starts_with('"') {
            match scan_quoted_field(src, pidx, delim) {
                Some(end) => {
                    if preserve {
                        fields.push(src[cidx..end].to_string());
                    } else {
                        fields.push(unquote_field(&src[cidx..end]));
                    }
                    cidx = end + delim_len;
                }
                None => {
                    defective = true;
                    let uidx = src[cidx..].find(delim).map(|i| cidx + i).unwrap_or(len);
                    fields.push(src[cidx..uidx].to_string());
                    cidx = uidx + delim_len;
                }
            }
        } else {
            let uidx = src[cidx..].find(delim).map(|i| cidx + i).unwrap_or(len);
            let field = &src[cidx..uidx];
            if field.contains('"') {
                defective = true;
            }
            fields.push(field.to_string());
            cidx = uidx + delim_len;
        }
    }
    if src.ends_with(delim) {
        fields.push(String::new());
    }
    (fields, defective)
}

/// Scan a quoted field starting at the opening quote `start`.
///
/// Returns the end position (exclusive, including trailing spaces) such that
/// `src[end..]` starts with `delim` or is empty, or `None` when the field is
/// not well-formed.
fn scan_quoted_field(src: &str, start: usize, delim: char) -> Option<usize> {
    let len = src.len();
    let mut i = start + 1;
    loop {
        i = match src[i..].find('"') {
            Some(off) => i + off + 1,
            None => return None,
        };
        if i == len || src[i..].starts_with(delim) {
            return Some(i);
        }
        if src[i..].starts_with('"') {
            // "" escape, keep scanning
            i += 1;
            continue;
        }
        if src[i..].starts_with(' ') {
            let mut j = i;
            while src[j..].starts_with(' ') {
                j += 1;
            }
            if j == len || src[j..].starts_with(delim) {
                return Some(j);
            }
            return None;
        }
        return None;
    }
}

/// Split on runs of spaces. In preserved mode each separator run is attached
/// to the preceding field (the leading run to the first field), so plain
/// concatenation reproduces the line. Blank lines yield zero fields.
pub fn split_whitespace_separated(src: &str, preserve: bool) -> Vec<String> {
    let bytes = src.as_bytes();
    let len = bytes.len();
    let mut fields = Vec::new();

    let mut i = 0;
    while i < len && bytes[i] == b' ' {
        i += 1;
    }
    if i == len {
        return fields;
    }

    let mut field_start = 0;
    loop {
        let mut word_end = i;
        while word_end < len && bytes[word_end] != b' ' {
            word_end += 1;
        }
        let mut run_end = word_end;
        while run_end < len && bytes[run_end] == b' ' {
            run_end += 1;
        }
        if preserve {
            fields.push(src[field_start..run_end].to_string());
        } else {
            fields.push(src[i..word_end].to_string());
        }
        if run_end == len {
            return fields;
        }
        field_start = run_end;
        i = run_end;
    }
}
