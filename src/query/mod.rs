pub mod clauses;
pub mod literals;

use crate::expr::{
    aggregate_kind, contains_aggregate, references_b_column, AggKind, Expr, UNFOLD_NAME,
};
use anyhow::bail;
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Select,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistinctMode {
    #[default]
    None,
    Distinct,
    /// DISTINCT COUNT: the per-tuple occurrence count is prepended.
    DistinctCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    Inner,
    Left,
    StrictLeft,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub mode: JoinMode,
    /// Path of the right table, or a key resolved via the recent-tables index.
    pub locator: String,
    /// 1-based key column in the primary stream.
    pub left_col: usize,
    /// 1-based key column in the right table.
    pub right_col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`: splice the primary fields (minus the EXCEPT set) and, for joined
    /// queries, the right-side fields.
    Star,
    Expr(Expr),
    /// An aggregate call forming the whole item; `args[0]` is the value
    /// expression (or `StarArg`), FOLD may carry a lambda in `args[1]`.
    Aggregate { kind: AggKind, args: Vec<Expr> },
    Unfold(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub keys: Vec<Expr>,
    pub reverse: bool,
}

/// Immutable execution plan produced by [`parse`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub action: Action,
    pub top: Option<u64>,
    pub distinct: DistinctMode,
    pub select_items: Vec<SelectItem>,
    /// 0-based columns removed from the primary slice of `*`.
    pub except: Option<Vec<usize>>,
    /// 1-based target column and value expression, applied in order.
    pub update_assignments: Vec<(usize, Expr)>,
    pub where_expr: Option<Expr>,
    pub join: Option<JoinSpec>,
    pub group_by: Option<Vec<Expr>>,
    pub order_by: Option<OrderSpec>,
}

impl QueryPlan {
    /// Aggregating queries buffer per-group state instead of streaming.
    pub fn is_aggregate(&self) -> bool {
        self.group_by.is_some()
            || self
                .select_items
                .iter()
                .any(|item| matches!(item, SelectItem::Aggregate { .. }))
    }

    pub fn has_unfold(&self) -> bool {
        self.select_items
            .iter()
            .any(|item| matches!(item, SelectItem::Unfold(_)))
    }
}

static STAR_EXCEPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\*\s+except\s+(.+)$").unwrap());
static EXCEPT_COLUMN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^a([0-9]+)$").unwrap());
static JOIN_ON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(\S+)\s+on\s+(.+)$").unwrap());
static JOIN_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([ab])([0-9]+)\s*==\s*([ab])([0-9]+)\s*$").unwrap());
static UPDATE_TARGET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*a([0-9]+)\s*=").unwrap());

/// Compile a query string into an execution plan.
pub fn parse(query: &str) -> anyhow::Result<QueryPlan> {
    let (skeleton, string_literals) = literals::separate_string_literals(query)?;
    let raw = clauses::separate_clauses(&skeleton)?;
    let restore = |text: &str| literals::combine_string_literals(text, &string_literals);

    if let Some(where_text) = &raw.where_text {
        check_where_has_no_assignment(where_text)?;
    }

    let mut plan = QueryPlan {
        action: raw.action,
        top: raw.top,
        distinct: raw.distinct,
        select_items: Vec::new(),
        except: None,
        update_assignments: Vec::new(),
        where_expr: None,
        join: None,
        group_by: None,
        order_by: None,
    };

    if let Some((mode, join_text)) = &raw.join {
        plan.join = Some(parse_join_expression(*mode, join_text)?);
    }
    if let Some(where_text) = &raw.where_text {
        let expr = parse_clause_expr(&restore(where_text), "WHERE")?;
        plan.where_expr = Some(expr);
    }
    if let Some(group_text) = &raw.group_text {
        let mut keys = Vec::new();
        for part in split_top_level_commas(group_text) {
            keys.push(parse_clause_expr(&restore(part), "GROUP BY")?);
        }
        plan.group_by = Some(keys);
    }
    if let Some((order_text, reverse)) = &raw.order_text {
        let mut keys = Vec::new();
        for part in split_top_level_commas(order_text) {
            keys.push(parse_clause_expr(&restore(part), "ORDER BY")?);
        }
        plan.order_by = Some(OrderSpec {
            keys,
            reverse: *reverse,
        });
    }

    match raw.action {
        Action::Select => {
            let (items, except) = parse_select_items(&raw.action_text, &restore)?;
            plan.select_items = items;
            plan.except = except;
        }
        Action::Update => {
            if plan.top.is_some() {
                bail!("TOP/LIMIT is not supported in UPDATE queries");
            }
            if plan.distinct != DistinctMode::None {
                bail!("DISTINCT is not supported in UPDATE queries");
            }
            if plan.group_by.is_some() {
                bail!("GROUP BY is not supported in UPDATE queries");
            }
            if plan.order_by.is_some() {
                bail!("ORDER BY is not supported in UPDATE queries");
            }
            plan.update_assignments = parse_update_assignments(&raw.action_text, &restore)?;
        }
    }

    validate_plan(&plan)?;
    Ok(plan)
}

/// A bare `=` in WHERE is always a mistake; catch it before expression
/// parsing so the message is specific.
fn check_where_has_no_assignment(where_text: &str) -> anyhow::Result<()> {
    let bytes = where_text.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'=' {
            continue;
        }
        let prev = i.checked_sub(1).map(|p| bytes[p]);
        let next = bytes.get(i + 1).copied();
        let part_of_operator = matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) || next == Some(b'=');
        if !part_of_operator {
            bail!(
                "Assignments \"=\" are not allowed in \"WHERE\" expressions. \
                 For equality test use \"==\""
            );
        }
    }
    Ok(())
}

/// Split on commas outside (), [] and {} nesting. String literals are already
/// placeholders at this point, so quoting needs no handling.
pub fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn parse_clause_expr(text: &str, clause: &str) -> anyhow::Result<Expr> {
    let expr = crate::expr::parser::parse_expression(text)?;
    if contains_aggregate(&expr) {
        bail!("Aggregate functions are not allowed in {} expressions", clause);
    }
    Ok(expr)
}

fn parse_select_items(
    select_text: &str,
    restore: &dyn Fn(&str) -> String,
) -> anyhow::Result<(Vec<SelectItem>, Option<Vec<usize>>)> {
    if select_text.trim().is_empty() {
        bail!("Empty SELECT expression");
    }

    if let Some(caps) = STAR_EXCEPT_RE.captures(select_text) {
        let except = parse_except_list(&caps[1])?;
        return Ok((vec![SelectItem::Star], Some(except)));
    }

    let mut items = Vec::new();
    let mut unfold_seen = false;
    for part in split_top_level_commas(select_text) {
        if part.trim() == "*" {
            items.push(SelectItem::Star);
            continue;
        }
        let expr = crate::expr::parser::parse_expression(&restore(part))?;
        items.push(classify_select_item(expr, &mut unfold_seen)?);
    }
    Ok((items, None))
}

fn classify_select_item(expr: Expr, unfold_seen: &mut bool) -> anyhow::Result<SelectItem> {
    if let Expr::Call { name, args } = &expr {
        if name == UNFOLD_NAME {
            if *unfold_seen {
                bail!("UNFOLD can only be used once per query");
            }
            *unfold_seen = true;
            let arg = match args.as_slice() {
                [arg] => arg.clone(),
                _ => bail!("UNFOLD() expects exactly one argument"),
            };
            if contains_aggregate(&arg) {
                bail!("Aggregate functions cannot be nested inside UNFOLD");
            }
            return Ok(SelectItem::Unfold(arg));
        }
        if let Some(kind) = aggregate_kind(name) {
            validate_aggregate_args(kind, args)?;
            return Ok(SelectItem::Aggregate {
                kind,
                args: args.clone(),
            });
        }
    }
    if contains_aggregate(&expr) {
        bail!("Aggregate functions cannot be nested inside other expressions");
    }
    Ok(SelectItem::Expr(expr))
}

fn validate_aggregate_args(kind: AggKind, args: &[Expr]) -> anyhow::Result<()> {
    let name = format!("{:?}", kind).to_uppercase();
    match kind {
        AggKind::Fold => match args {
            [value] | [value, Expr::Lambda { .. }] => {
                if contains_aggregate(value) {
                    bail!("Aggregate functions cannot be nested inside FOLD");
                }
                Ok(())
            }
            [_, _] => bail!("The second argument of FOLD must be a lambda"),
            _ => bail!("FOLD() expects one value expression and an optional lambda"),
        },
        AggKind::Count => match args {
            [Expr::StarArg] => Ok(()),
            [value] => {
                if contains_aggregate(value) {
                    bail!("Aggregate functions cannot be nested inside COUNT");
                }
                Ok(())
            }
            _ => bail!("COUNT() expects exactly one argument"),
        },
        _ => match args {
            [Expr::StarArg] => bail!("\"*\" is only valid as the argument of COUNT"),
            [value] => {
                if contains_aggregate(value) {
                    bail!("Aggregate functions cannot be nested inside {}", name);
                }
                Ok(())
            }
            _ => bail!("{}() expects exactly one argument", name),
        },
    }
}

fn parse_except_list(list_text: &str) -> anyhow::Result<Vec<usize>> {
    let mut indices = Vec::new();
    for part in list_text.split(',') {
        let part = part.trim();
        let caps = EXCEPT_COLUMN_RE
            .captures(part)
            .ok_or_else(|| anyhow::anyhow!("Invalid EXCEPT column: \"{}\"", part))?;
        let index: usize = caps[1].parse()?;
        if index == 0 {
            bail!("Invalid EXCEPT column: \"{}\"", part);
        }
        indices.push(index - 1);
    }
    Ok(indices)
}

fn parse_join_expression(mode: JoinMode, join_text: &str) -> anyhow::Result<JoinSpec> {
    let caps = JOIN_ON_RE
        .captures(join_text.trim())
        .ok_or_else(|| anyhow::anyhow!("Invalid join syntax: \"{}\"", join_text.trim()))?;
    let locator = caps[1].to_string();
    let key_text = &caps[2];
    let keys = JOIN_KEY_RE
        .captures(key_text)
        .ok_or_else(|| anyhow::anyhow!("Invalid join syntax: \"{}\"", join_text.trim()))?;

    let first = (&keys[1], keys[2].parse::<usize>()?);
    let second = (&keys[3], keys[4].parse::<usize>()?);
    let (left_col, right_col) = match (first.0, second.0) {
        ("a", "b") => (first.1, second.1),
        ("b", "a") => (second.1, first.1),
        _ => bail!("Invalid join syntax: \"{}\"", join_text.trim()),
    };
    if left_col == 0 || right_col == 0 {
        bail!("Invalid join syntax: \"{}\"", join_text.trim());
    }
    Ok(JoinSpec {
        mode,
        locator,
        left_col,
        right_col,
    })
}

fn parse_update_assignments(
    update_text: &str,
    restore: &dyn Fn(&str) -> String,
) -> anyhow::Result<Vec<(usize, Expr)>> {
    if update_text.trim().is_empty() {
        bail!("Empty UPDATE expression");
    }
    let mut assignments = Vec::new();
    for part in split_top_level_commas(update_text) {
        let caps = UPDATE_TARGET_RE
            .captures(part)
            .ok_or_else(|| anyhow::anyhow!("Unable to parse UPDATE expression: \"{}\"", part.trim()))?;
        let rest = &part[caps.get(0).unwrap().end()..];
        if rest.starts_with('=') {
            // "==" is a comparison, not an assignment
            bail!("Unable to parse UPDATE expression: \"{}\"", part.trim());
        }
        let index: usize = caps[1].parse()?;
        if index == 0 {
            bail!("Unable to parse UPDATE expression: \"{}\"", part.trim());
        }
        let expr = crate::expr::parser::parse_expression(&restore(rest))?;
        if contains_aggregate(&expr) {
            bail!("Aggregate functions are not allowed in UPDATE expressions");
        }
        assignments.push((index, expr));
    }
    Ok(assignments)
}

fn validate_plan(plan: &QueryPlan) -> anyhow::Result<()> {
    if plan.join.is_none() {
        let mut uses_b = plan
            .where_expr
            .as_ref()
            .is_some_and(references_b_column);
        uses_b |= plan
            .update_assignments
            .iter()
            .any(|(_, e)| references_b_column(e));
        for item in &plan.select_items {
            match item {
                SelectItem::Expr(e) | SelectItem::Unfold(e) => uses_b |= references_b_column(e),
                SelectItem::Aggregate { args, .. } => {
                    uses_b |= args.iter().any(references_b_column)
                }
                SelectItem::Star => {}
            }
        }
        if let Some(keys) = &plan.group_by {
            uses_b |= keys.iter().any(references_b_column);
        }
        if let Some(order) = &plan.order_by {
            uses_b |= order.keys.iter().any(references_b_column);
        }
        if uses_b {
            bail!("Query uses b-column references but has no JOIN clause");
        }
    }
    if plan.is_aggregate() && plan.has_unfold() {
        bail!("UNFOLD cannot be used in aggregate queries");
    }
    Ok(())
}
