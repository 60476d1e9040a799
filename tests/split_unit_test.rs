use tabql::record::split::{split_quoted, split_whitespace_separated, unquote_field};

fn unquote_all(fields: &[String]) -> Vec<String> {
    fields.iter().map(|f| unquote_field(f)).collect()
}

#[test]
fn test_quoted_split_well_formed() {
    let cases: &[(&str, &[&str])] = &[
        ("hello,world", &["hello", "world"]),
        ("hello,\"world\"", &["hello", "world"]),
        ("\"abc\"", &["abc"]),
        ("abc", &["abc"]),
        ("", &[""]),
        (",", &["", ""]),
        (",,,", &["", "", "", ""]),
        (",\"\",,,", &["", "", "", "", ""]),
        ("\"\",\"\",,,\"\"", &["", "", "", "", ""]),
        ("\"aaa,bbb\",", &["aaa,bbb", ""]),
        ("\"aaa,bbb\",ccc", &["aaa,bbb", "ccc"]),
        ("\"aaa,bbb\",\"ccc\"", &["aaa,bbb", "ccc"]),
        ("\"aaa,bbb\",\"ccc,ddd\"", &["aaa,bbb", "ccc,ddd"]),
        (" \"aaa,bbb\" ,  \"ccc,ddd\" ", &["aaa,bbb", "ccc,ddd"]),
        ("\"aaa,bbb\",ccc,ddd", &["aaa,bbb", "ccc", "ddd"]),
    ];
    for (src, expected) in cases {
        let (fields, defective) = split_quoted(src, ',', false);
        assert!(!defective, "unexpected defect for {:?}", src);
        assert_eq!(fields, *expected, "src: {:?}", src);
    }
}

#[test]
fn test_quoted_split_defective_lines() {
    let cases: &[(&str, &[&str])] = &[
        (
            "\"a\"aa\" a,bbb\",ccc,ddd",
            &["\"a\"aa\" a", "bbb\"", "ccc", "ddd"],
        ),
        ("\"aa, bb, cc\",ccc\",ddd", &["aa, bb, cc", "ccc\"", "ddd"]),
        ("hello,world,\"", &["hello", "world", "\""]),
    ];
    for (src, expected) in cases {
        let (fields, defective) = split_quoted(src, ',', false);
        assert!(defective, "expected a defect for {:?}", src);
        assert_eq!(fields, *expected, "src: {:?}", src);
    }
}

#[test]
fn test_preserved_split_reproduces_line() {
    let cases = [
        "hello,world",
        "hello,\"world\"",
        " \"aaa,bbb\" ,  \"ccc,ddd\" ",
        "\"\",\"\",,,\"\"",
        ",\"\",,,",
        "\"aaa,bbb\",",
        "\"a\"aa\" a,bbb\",ccc,ddd",
        "\"aa, bb, cc\",ccc\",ddd",
        "hello,world,\"",
        "\"unterminated, here",
    ];
    for src in cases {
        let (preserved, defective) = split_quoted(src, ',', true);
        // no bytes are ever dropped, defective or not
        assert_eq!(preserved.join(","), src, "src: {:?}", src);

        let (unquoted, defective2) = split_quoted(src, ',', false);
        assert_eq!(defective, defective2);
        if !defective {
            assert_eq!(unquote_all(&preserved), unquoted, "src: {:?}", src);
        }
    }
}

#[test]
fn test_unquote_field_with_outer_whitespace() {
    assert_eq!(
        unquote_field("  \"hello, \"\"world\"\" aa\"\"  \" "),
        "hello, \"world\" aa\"  "
    );
}

#[test]
fn test_quoted_split_other_delimiters() {
    let (fields, defective) = split_quoted("\"a;b\";c; \"d\" ", ';', false);
    assert!(!defective);
    assert_eq!(fields, vec!["a;b", "c", "d"]);
}

#[test]
fn test_escape_roundtrip_many_field_shapes() {
    // build lines from fields over the csv-hostile alphabet and check both
    // split modes against the source fields
    let alphabet = [",", "\"", "a", "b", "\"\"", "a\"b", ""];
    for &x in &alphabet {
        for &y in &alphabet {
            for &z in &alphabet {
                let fields = [x.to_string(), y.to_string(), z.to_string()];
                let line = fields
                    .iter()
                    .map(|f| {
                        if f.contains('"') || f.contains(',') {
                            format!("\"{}\"", f.replace('"', "\"\""))
                        } else {
                            f.clone()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",");

                let (unquoted, defective) = split_quoted(&line, ',', false);
                assert!(!defective, "line: {:?}", line);
                assert_eq!(unquoted, fields, "line: {:?}", line);

                let (preserved, _) = split_quoted(&line, ',', true);
                assert_eq!(preserved.join(","), line);
                assert_eq!(unquote_all(&preserved), fields, "line: {:?}", line);
            }
        }
    }
}

#[test]
fn test_whitespace_modes_agree_on_field_count() {
    let cases = ["hello world", "  a  b   c ", "x", "  x  ", ""];
    for src in cases {
        let stripped = split_whitespace_separated(src, false);
        let preserved = split_whitespace_separated(src, true);
        assert_eq!(stripped.len(), preserved.len(), "src: {:?}", src);
        for (s, p) in stripped.iter().zip(preserved.iter()) {
            assert_eq!(p.trim_start().trim_end_matches(' '), s, "src: {:?}", src);
        }
    }
}
