//! Expression evaluation against a record context.

use super::value::Value;
use super::{BinOp, CmpOp, Counter, Expr, Side, UnOp};
use crate::warnings::{WarningBus, WarningKind};
use ahash::AHashMap;
use anyhow::bail;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

/// Everything a record-level expression can see.
#[derive(Debug, Clone, Copy)]
pub struct RecordContext<'a> {
    pub a_fields: &'a [String],
    /// `Some` when a join pair matched, `None` on the unmatched side of a
    /// LEFT JOIN (all `bN` resolve to nil then).
    pub b_fields: Option<&'a [String]>,
    pub nr: i64,
    pub nf: i64,
    pub nu: i64,
}

impl<'a> RecordContext<'a> {
    pub fn new(a_fields: &'a [String], nr: i64, nu: i64) -> Self {
        Self {
            a_fields,
            b_fields: None,
            nr,
            nf: a_fields.len() as i64,
            nu,
        }
    }

    pub fn with_b(mut self, b_fields: Option<&'a [String]>) -> Self {
        self.b_fields = b_fields;
        self
    }
}

/// A function defined by the init source: `name(arg, …) = expression`.
#[derive(Debug, Clone)]
pub struct UserFunction {
    pub params: Vec<String>,
    pub body: Expr,
}

const BUILTIN_NAMES: &[&str] = &[
    "int", "float", "str", "len", "abs", "parseInt", "parseFloat",
];

static INIT_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*=\s*(.+)$").unwrap());

/// Parse an init source: one `name(arg, …) = expression` definition per line;
/// blank lines and `#` comments are skipped.
pub fn parse_init_source(src: &str) -> anyhow::Result<AHashMap<String, UserFunction>> {
    let mut fns = AHashMap::new();
    for (line_no, raw) in src.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let caps = match INIT_LINE_RE.captures(line) {
            Some(caps) => caps,
            None => bail!(
                "Invalid init source line {}: expected name(arg, ...) = expression",
                line_no + 1
            ),
        };
        let name = caps[1].to_string();
        if BUILTIN_NAMES.contains(&name.as_str()) || super::aggregate_kind(&name).is_some() {
            bail!("Init source redefines the built-in function \"{}\"", name);
        }
        let mut params = Vec::new();
        for part in caps[2].split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            params.push(part.to_string());
        }
        let body = super::parser::parse_expression(&caps[3])?;
        fns.insert(name, UserFunction { params, body });
    }
    Ok(fns)
}

/// Evaluates expressions; owns the regex cache, the user functions and the
/// lambda/function local bindings.
pub struct Evaluator {
    user_fns: AHashMap<String, UserFunction>,
    regex_cache: AHashMap<String, Regex>,
    locals: Vec<(String, Value)>,
    depth: usize,
}

const MAX_CALL_DEPTH: usize = 64;

impl Evaluator {
    pub fn new(user_fns: AHashMap<String, UserFunction>) -> Self {
        Self {
            user_fns,
            regex_cache: AHashMap::new(),
            locals: Vec::new(),
            depth: 0,
        }
    }

    /// Apply a lambda to one argument.
    pub fn apply_lambda(
        &mut self,
        lambda: &Expr,
        arg: Value,
        ctx: &RecordContext<'_>,
        bus: &mut WarningBus,
    ) -> anyhow::Result<Value> {
        match lambda {
            Expr::Lambda { param, body } => {
                self.locals.push((param.clone(), arg));
                let result = self.eval(body, ctx, bus);
                self.locals.pop();
                result
            }
            _ => bail!("Expected a lambda expression"),
        }
    }

    pub fn eval(
        &mut self,
        expr: &Expr,
        ctx: &RecordContext<'_>,
        bus: &mut WarningBus,
    ) -> anyhow::Result<Value> {
        match expr {
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::NoneLit => Ok(Value::Nil),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Column(Side::A, index) => {
                if *index <= ctx.a_fields.len() {
                    Ok(Value::Str(ctx.a_fields[*index - 1].clone()))
                } else {
                    bus.report_sample(
                        WarningKind::InputFieldsInfo,
                        Some(format!("record {} has no field a{}", ctx.nr, index)),
                    );
                    Ok(Value::Nil)
                }
            }
            Expr::Column(Side::B, index) => match ctx.b_fields {
                Some(b_fields) if *index <= b_fields.len() => {
                    Ok(Value::Str(b_fields[*index - 1].clone()))
                }
                _ => Ok(Value::Nil),
            },
            Expr::Counter(Counter::Nr) => Ok(Value::Int(ctx.nr)),
            Expr::Counter(Counter::Nf) => Ok(Value::Int(ctx.nf)),
            Expr::Counter(Counter::Nu) => Ok(Value::Int(ctx.nu)),
            Expr::Ident(name) => {
                for (local, value) in self.locals.iter().rev() {
                    if local == name {
                        return Ok(value.clone());
                    }
                }
                bail!("Unknown identifier \"{}\"", name)
            }
            Expr::StarArg => bail!("\"*\" is only valid as the argument of COUNT"),
            Expr::Unary(UnOp::Neg, inner) => match self.eval(inner, ctx, bus)? {
                Value::Int(n) => Ok(Value::Int(-n)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => bail!("Unable to negate a {} value", other.type_name()),
            },
            Expr::Unary(UnOp::Not, inner) => {
                let v = self.eval(inner, ctx, bus)?;
                Ok(Value::Bool(!v.truthy()))
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs, ctx, bus)?;
                let r = self.eval(rhs, ctx, bus)?;
                eval_binary(*op, l, r)
            }
            Expr::Compare(op, lhs, rhs) => {
                let l = self.eval(lhs, ctx, bus)?;
                let r = self.eval(rhs, ctx, bus)?;
                eval_compare(*op, &l, &r)
            }
            Expr::And(lhs, rhs) => {
                let l = self.eval(lhs, ctx, bus)?;
                if !l.truthy() {
                    return Ok(l);
                }
                self.eval(rhs, ctx, bus)
            }
            Expr::Or(lhs, rhs) => {
                let l = self.eval(lhs, ctx, bus)?;
                if l.truthy() {
                    return Ok(l);
                }
                self.eval(rhs, ctx, bus)
            }
            Expr::IsNone { negated, expr } => {
                let v = self.eval(expr, ctx, bus)?;
                Ok(Value::Bool(v.is_nil() != *negated))
            }
            Expr::Cond {
                then,
                pred,
                otherwise,
            } => {
                if self.eval(pred, ctx, bus)?.truthy() {
                    self.eval(then, ctx, bus)
                } else {
                    self.eval(otherwise, ctx, bus)
                }
            }
            Expr::Call { name, args } => self.eval_call(name, args, ctx, bus),
            Expr::Method { recv, name, args } => self.eval_method(recv, name, args, ctx, bus),
            Expr::Lambda { .. } => {
                bail!("Lambda expressions are only valid as the second argument of FOLD")
            }
        }
    }

    fn eval_call(
        &mut self,
        name: &str,
        args: &[Expr],
        ctx: &RecordContext<'_>,
        bus: &mut WarningBus,
    ) -> anyhow::Result<Value> {
        if super::aggregate_kind(name).is_some() || name == super::UNFOLD_NAME {
            bail!(
                "{} can only be used as a whole item of a SELECT expression",
                name
            );
        }
        match name {
            "int" | "parseInt" => {
                let v = self.eval_single_arg(name, args, ctx, bus)?;
                coerce_int(&v)
            }
            "float" | "parseFloat" => {
                let v = self.eval_single_arg(name, args, ctx, bus)?;
                coerce_float(&v)
            }
            "str" => {
                let v = self.eval_single_arg(name, args, ctx, bus)?;
                Ok(Value::Str(v.to_display()))
            }
            "len" => {
                let v = self.eval_single_arg(name, args, ctx, bus)?;
                match v {
                    Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                    Value::List(items) => Ok(Value::Int(items.len() as i64)),
                    other => bail!("len() is not defined for {} values", other.type_name()),
                }
            }
            "abs" => {
                let v = self.eval_single_arg(name, args, ctx, bus)?;
                match v {
                    Value::Int(n) => Ok(Value::Int(n.abs())),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => bail!("abs() is not defined for {} values", other.type_name()),
                }
            }
            _ => {
                let func = match self.user_fns.get(name) {
                    Some(func) => func.clone(),
                    None => bail!("Unknown function \"{}\"", name),
                };
                if func.params.len() != args.len() {
                    bail!(
                        "Function \"{}\" expects {} argument(s), got {}",
                        name,
                        func.params.len(),
                        args.len()
                    );
                }
                if self.depth >= MAX_CALL_DEPTH {
                    bail!("User function call depth limit exceeded");
                }
                let mut bound = Vec::with_capacity(args.len());
                for (param, arg) in func.params.iter().zip(args.iter()) {
                    bound.push((param.clone(), self.eval(arg, ctx, bus)?));
                }
                let base = self.locals.len();
                self.locals.extend(bound);
                self.depth += 1;
                let result = self.eval(&func.body, ctx, bus);
                self.depth -= 1;
                self.locals.truncate(base);
                result
            }
        }
    }

    fn eval_single_arg(
        &mut self,
        name: &str,
        args: &[Expr],
        ctx: &RecordContext<'_>,
        bus: &mut WarningBus,
    ) -> anyhow::Result<Value> {
        if args.len() != 1 {
            bail!("{}() expects exactly one argument", name);
        }
        self.eval(&args[0], ctx, bus)
    }

    fn eval_method(
        &mut self,
        recv: &Expr,
        name: &str,
        args: &Option<Vec<Expr>>,
        ctx: &RecordContext<'_>,
        bus: &mut WarningBus,
    ) -> anyhow::Result<Value> {
        // module-style calls: math.sqrt(x), Math.floor(x), re.search(p, s)
        if let Expr::Ident(module) = recv {
            match (module.as_str(), name) {
                ("math" | "Math", "sqrt") => {
                    let v = self.eval_module_arg(name, args, ctx, bus)?;
                    let x = require_number(&v, "sqrt")?;
                    if x < 0.0 {
                        bail!("math domain error in sqrt");
                    }
                    return Ok(Value::Float(x.sqrt()));
                }
                ("math" | "Math", "floor") => {
                    let v = self.eval_module_arg(name, args, ctx, bus)?;
                    let x = require_number(&v, "floor")?;
                    return Ok(Value::Int(x.floor() as i64));
                }
                ("re", "search") => {
                    let args = match args {
                        Some(args) if args.len() == 2 => args,
                        _ => bail!("re.search() expects a pattern and a string"),
                    };
                    let pattern = match self.eval(&args[0], ctx, bus)? {
                        Value::Str(p) => p,
                        other => bail!(
                            "re.search() pattern must be a string, got {}",
                            other.type_name()
                        ),
                    };
                    let subject = match self.eval(&args[1], ctx, bus)? {
                        Value::Str(s) => s,
                        other => bail!(
                            "re.search() subject must be a string, got {}",
                            other.type_name()
                        ),
                    };
                    let regex = self.compiled(&pattern)?;
                    return Ok(match regex.find(&subject) {
                        Some(m) => Value::Str(m.as_str().to_string()),
                        None => Value::Nil,
                    });
                }
                _ => {}
            }
        }

        let value = self.eval(recv, ctx, bus)?;
        match (name, args) {
            ("length", None) => match &value {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                other => bail!(".length is not defined for {} values", other.type_name()),
            },
            ("split", Some(args)) if args.len() == 1 => {
                let sep = match self.eval(&args[0], ctx, bus)? {
                    Value::Str(sep) if !sep.is_empty() => sep,
                    _ => bail!(".split() expects a non-empty string separator"),
                };
                match &value {
                    Value::Str(s) => Ok(Value::List(
                        s.split(&sep).map(|p| Value::Str(p.to_string())).collect(),
                    )),
                    other => bail!(".split() is not defined for {} values", other.type_name()),
                }
            }
            ("lower", Some(args)) if args.is_empty() => match &value {
                Value::Str(s) => Ok(Value::Str(s.to_lowercase())),
                other => bail!(".lower() is not defined for {} values", other.type_name()),
            },
            ("upper", Some(args)) if args.is_empty() => match &value {
                Value::Str(s) => Ok(Value::Str(s.to_uppercase())),
                other => bail!(".upper() is not defined for {} values", other.type_name()),
            },
            ("strip", Some(args)) if args.is_empty() => match &value {
                Value::Str(s) => Ok(Value::Str(s.trim().to_string())),
                other => bail!(".strip() is not defined for {} values", other.type_name()),
            },
            _ => bail!("Unknown method or property \".{}\"", name),
        }
    }

    fn eval_module_arg(
        &mut self,
        name: &str,
        args: &Option<Vec<Expr>>,
        ctx: &RecordContext<'_>,
        bus: &mut WarningBus,
    ) -> anyhow::Result<Value> {
        match args {
            Some(args) if args.len() == 1 => self.eval(&args[0], ctx, bus),
            _ => bail!("{}() expects exactly one argument", name),
        }
    }

    fn compiled(&mut self, pattern: &str) -> anyhow::Result<&Regex> {
        if !self.regex_cache.contains_key(pattern) {
            let regex = Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("Invalid regex {:?}: {}", pattern, e))?;
            self.regex_cache.insert(pattern.to_string(), regex);
        }
        Ok(&self.regex_cache[pattern])
    }
}

fn require_number(v: &Value, func: &str) -> anyhow::Result<f64> {
    v.as_f64()
        .ok_or_else(|| anyhow::anyhow!("{}() expects a number, got {}", func, v.type_name()))
}

/// `int()` coercion: floats truncate toward zero, strings must parse fully.
pub fn coerce_int(v: &Value) -> anyhow::Result<Value> {
    match v {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
        Value::Str(s) => match s.trim().parse::<i64>() {
            Ok(n) => Ok(Value::Int(n)),
            Err(_) => bail!("Unable to convert \"{}\" to int", s),
        },
        other => bail!("Unable to convert a {} value to int", other.type_name()),
    }
}

pub fn coerce_float(v: &Value) -> anyhow::Result<Value> {
    match v {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Str(s) => match s.trim().parse::<f64>() {
            Ok(f) => Ok(Value::Float(f)),
            Err(_) => bail!("Unable to convert \"{}\" to float", s),
        },
        other => bail!("Unable to convert a {} value to float", other.type_name()),
    }
}

fn eval_binary(op: BinOp, l: Value, r: Value) -> anyhow::Result<Value> {
    if op == BinOp::Add {
        if let (Value::Str(a), Value::Str(b)) = (&l, &r) {
            return Ok(Value::Str(format!("{}{}", a, b)));
        }
    }
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinOp::Add => Ok(Value::Int(a.wrapping_add(b))),
                BinOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
                BinOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
                BinOp::Div => {
                    if b == 0 {
                        bail!("Division by zero");
                    }
                    Ok(Value::Float(a as f64 / b as f64))
                }
                BinOp::Mod => {
                    if b == 0 {
                        bail!("Modulo by zero");
                    }
                    // remainder takes the divisor's sign
                    Ok(Value::Int(((a % b) + b) % b))
                }
            }
        }
        _ => {
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => bail!(
                    "Unsupported operand types for {:?}: {} and {}",
                    op,
                    l.type_name(),
                    r.type_name()
                ),
            };
            match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                BinOp::Div => {
                    if b == 0.0 {
                        bail!("Division by zero");
                    }
                    Ok(Value::Float(a / b))
                }
                BinOp::Mod => {
                    if b == 0.0 {
                        bail!("Modulo by zero");
                    }
                    Ok(Value::Float(a - b * (a / b).floor()))
                }
            }
        }
    }
}

/// Structural equality; numbers compare across int/float, other mixed kinds
/// are simply unequal (nil == nil holds).
pub fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn eval_compare(op: CmpOp, l: &Value, r: &Value) -> anyhow::Result<Value> {
    match op {
        CmpOp::Eq => return Ok(Value::Bool(values_equal(l, r))),
        CmpOp::Ne => return Ok(Value::Bool(!values_equal(l, r))),
        _ => {}
    }
    // ordering comparisons: nil never orders, mixed kinds are an error
    let ordering: Option<Ordering> = match (l, r) {
        (Value::Nil, _) | (_, Value::Nil) => None,
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => bail!(
                "Unable to compare {} and {} values",
                l.type_name(),
                r.type_name()
            ),
        },
    };
    let result = match ordering {
        None => false,
        Some(ord) => match op {
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
            CmpOp::Eq | CmpOp::Ne => unreachable!(),
        },
    };
    Ok(Value::Bool(result))
}

/// Render a value as an output field, reporting nil replacement.
pub fn value_to_output(v: &Value, bus: &mut WarningBus) -> String {
    if v.is_nil() {
        bus.report(WarningKind::NullValueInOutput);
    }
    v.to_display()
}
