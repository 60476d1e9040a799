//! Clause separation: scan the literal-free query skeleton for top-level
//! keywords and cut it into clause texts.

use super::{Action, DistinctMode, JoinMode};
use anyhow::bail;
use once_cell::sync::Lazy;
use regex::Regex;

static TOP_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^top\s+(\d+)(?:\s+|$)").unwrap());
static DISTINCT_COUNT_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^distinct\s+count(?:\s+|$)").unwrap());
static DISTINCT_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^distinct(?:\s+|$)").unwrap());
static SET_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^set(?:\s+|$)").unwrap());
static ORDER_DIR_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|\s)(asc|desc)\s*$").unwrap());

/// The query cut into raw clause texts (still containing placeholders).
#[derive(Debug, Clone, PartialEq)]
pub struct RawClauses {
    pub action: Action,
    /// SELECT list or UPDATE assignments, with TOP/DISTINCT/SET stripped.
    pub action_text: String,
    pub top: Option<u64>,
    pub distinct: DistinctMode,
    pub join: Option<(JoinMode, String)>,
    pub where_text: Option<String>,
    pub group_text: Option<String>,
    /// ORDER BY expression list and the DESC flag.
    pub order_text: Option<(String, bool)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Select,
    Update,
    StrictLeftJoin,
    LeftJoin,
    InnerJoin,
    Join,
    Where,
    GroupBy,
    OrderBy,
    Limit,
}

impl Keyword {
    fn display(&self) -> &'static str {
        match self {
            Keyword::Select => "SELECT",
            Keyword::Update => "UPDATE",
            Keyword::StrictLeftJoin => "STRICT LEFT JOIN",
            Keyword::LeftJoin => "LEFT JOIN",
            Keyword::InnerJoin => "INNER JOIN",
            Keyword::Join => "JOIN",
            Keyword::Where => "WHERE",
            Keyword::GroupBy => "GROUP BY",
            Keyword::OrderBy => "ORDER BY",
            Keyword::Limit => "LIMIT",
        }
    }
}

// longest patterns first so STRICT LEFT JOIN wins over LEFT JOIN over JOIN
const PATTERNS: &[(&[&str], Keyword)] = &[
    (&["strict", "left", "join"], Keyword::StrictLeftJoin),
    (&["left", "join"], Keyword::LeftJoin),
    (&["inner", "join"], Keyword::InnerJoin),
    (&["group", "by"], Keyword::GroupBy),
    (&["order", "by"], Keyword::OrderBy),
    (&["join"], Keyword::Join),
    (&["select"], Keyword::Select),
    (&["update"], Keyword::Update),
    (&["where"], Keyword::Where),
    (&["limit"], Keyword::Limit),
];

#[derive(Debug, Clone, Copy)]
struct WordSpan<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

fn word_spans(src: &str) -> Vec<WordSpan<'_>> {
    let mut words = Vec::new();
    let mut start = None;
    for (i, c) in src.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                words.push(WordSpan {
                    text: &src[s..i],
                    start: s,
                    end: i,
                });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        words.push(WordSpan {
            text: &src[s..],
            start: s,
            end: src.len(),
        });
    }
    words
}

/// Split the skeleton into clause texts. Exactly one of SELECT/UPDATE must
/// open the query; duplicate clauses are fatal.
pub fn separate_clauses(skeleton: &str) -> anyhow::Result<RawClauses> {
    let words = word_spans(skeleton);
    if words.is_empty() {
        bail!("Empty query");
    }

    // collect keyword hits with the skeleton spans they cover
    let mut hits: Vec<(Keyword, usize, usize)> = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let mut matched = false;
        for (pattern, keyword) in PATTERNS {
            if i + pattern.len() <= words.len()
                && pattern
                    .iter()
                    .zip(&words[i..i + pattern.len()])
                    .all(|(p, w)| w.text.eq_ignore_ascii_case(p))
            {
                hits.push((*keyword, words[i].start, words[i + pattern.len() - 1].end));
                i += pattern.len();
                matched = true;
                break;
            }
        }
        if !matched {
            i += 1;
        }
    }

    let first = hits.first().copied();
    let action = match first {
        Some((Keyword::Select, start, _)) if skeleton[..start].trim().is_empty() => Action::Select,
        Some((Keyword::Update, start, _)) if skeleton[..start].trim().is_empty() => Action::Update,
        _ => bail!("Query must start with SELECT or UPDATE"),
    };

    let mut clauses = RawClauses {
        action,
        action_text: String::new(),
        top: None,
        distinct: DistinctMode::None,
        join: None,
        where_text: None,
        group_text: None,
        order_text: None,
    };
    let mut limit: Option<u64> = None;

    for (k, &(keyword, _, text_start)) in hits.iter().enumerate() {
        let text_end = hits.get(k + 1).map(|h| h.1).unwrap_or(skeleton.len());
        let text = skeleton[text_start..text_end].trim().to_string();
        match keyword {
            Keyword::Select | Keyword::Update => {
                if k != 0 {
                    bail!("More than one \"{}\" clause found", keyword.display());
                }
                clauses.action_text = text;
            }
            Keyword::StrictLeftJoin | Keyword::LeftJoin | Keyword::InnerJoin | Keyword::Join => {
                if clauses.join.is_some() {
                    bail!("More than one \"JOIN\" clause found");
                }
                let mode = match keyword {
                    Keyword::StrictLeftJoin => JoinMode::StrictLeft,
                    Keyword::LeftJoin => JoinMode::Left,
                    _ => JoinMode::Inner,
                };
                clauses.join = Some((mode, text));
            }
            Keyword::Where => {
                if clauses.where_text.is_some() {
                    bail!("More than one \"WHERE\" clause found");
                }
                clauses.where_text = Some(text);
            }
            Keyword::GroupBy => {
                if clauses.group_text.is_some() {
                    bail!("More than one \"GROUP BY\" clause found");
                }
                clauses.group_text = Some(text);
            }
            Keyword::OrderBy => {
                if clauses.order_text.is_some() {
                    bail!("More than one \"ORDER BY\" clause found");
                }
                clauses.order_text = Some((text, false));
            }
            Keyword::Limit => {
                if limit.is_some() {
                    bail!("More than one \"LIMIT\" clause found");
                }
                match text.parse::<u64>() {
                    Ok(n) => limit = Some(n),
                    Err(_) => bail!("Invalid LIMIT expression: \"{}\"", text),
                }
            }
        }
    }

    // TOP N and DISTINCT [COUNT] prefixes of the SELECT list
    if clauses.action == Action::Select {
        if let Some(caps) = TOP_PREFIX_RE.captures(&clauses.action_text) {
            clauses.top = Some(caps[1].parse()?);
            clauses.action_text = clauses.action_text[caps.get(0).unwrap().end()..].to_string();
        }
        if let Some(m) = DISTINCT_COUNT_PREFIX_RE.find(&clauses.action_text) {
            clauses.distinct = DistinctMode::DistinctCount;
            clauses.action_text = clauses.action_text[m.end()..].to_string();
        } else if let Some(m) = DISTINCT_PREFIX_RE.find(&clauses.action_text) {
            clauses.distinct = DistinctMode::Distinct;
            clauses.action_text = clauses.action_text[m.end()..].to_string();
        }
    } else if let Some(m) = SET_PREFIX_RE.find(&clauses.action_text) {
        clauses.action_text = clauses.action_text[m.end()..].to_string();
    }

    if let Some(n) = limit {
        if clauses.top.is_some() {
            bail!("TOP and LIMIT cannot be used together");
        }
        clauses.top = Some(n);
    }

    // trailing ASC/DESC of the ORDER BY expression
    if let Some((text, _)) = clauses.order_text.take() {
        match ORDER_DIR_SUFFIX_RE.captures(&text) {
            Some(caps) => {
                let reverse = caps[1].eq_ignore_ascii_case("desc");
                let stripped = text[..caps.get(1).unwrap().start()].trim().to_string();
                clauses.order_text = Some((stripped, reverse));
            }
            None => clauses.order_text = Some((text, false)),
        }
    }

    Ok(clauses)
}
