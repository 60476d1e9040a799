pub mod aggregate;
pub mod join;
pub mod writers;

use crate::expr::eval::{parse_init_source, value_to_output, Evaluator, RecordContext};
use crate::expr::value::Value;
use crate::expr::{AggKind, Expr};
use crate::query::{self, Action, DistinctMode, JoinMode, QueryPlan, SelectItem};
use crate::record::line_reader::{LineReader, DEFAULT_CHUNK_SIZE};
use crate::record::{Encoding, Policy, RecordSource};
use crate::warnings::{WarningBus, WarningKind};
use aggregate::{AggState, NumSum};
use ahash::AHashMap;
use anyhow::bail;
use join::{RightTable, TableFormat};
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use writers::{
    OutRecord, OutputSink, RecordSink, SortSink, TopSink, UnfoldColumn, UniqCountSink, UniqSink,
};

const OUTPUT_BUFFER_SIZE: usize = 64 * 1024;

/// The query engine: compile a query, pull records from the input stream,
/// push transformed records to the output stream.
///
/// Configuration follows the builder style; the engine itself is reusable
/// across runs.
pub struct Engine {
    input_delim: char,
    input_policy: Policy,
    output_delim: char,
    output_policy: Policy,
    encoding: Encoding,
    init_source: Option<String>,
    index_file: Option<PathBuf>,
    chunk_size: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl Engine {
    pub fn new(input_delim: char, input_policy: Policy) -> Self {
        Self {
            input_delim,
            input_policy,
            output_delim: input_delim,
            output_policy: input_policy,
            encoding: Encoding::default(),
            init_source: None,
            index_file: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel: None,
        }
    }

    pub fn with_output_format(mut self, delim: char, policy: Policy) -> Self {
        self.output_delim = delim;
        self.output_policy = policy;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// User function definitions, loaded once per run.
    pub fn with_init_source(mut self, source: String) -> Self {
        self.init_source = Some(source);
        self
    }

    /// Recent-tables index used to resolve join-table formats.
    pub fn with_index_file(mut self, path: PathBuf) -> Self {
        self.index_file = Some(path);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Cooperative cancellation, checked between records.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run `query` over `input`, writing result records to `output`.
    /// Returns the accumulated warnings.
    pub fn run<R: Read, W: Write>(
        &self,
        query_text: &str,
        input: R,
        output: &mut W,
    ) -> anyhow::Result<WarningBus> {
        let plan = query::parse(query_text)?;
        let mut bus = WarningBus::new();

        let user_fns = match &self.init_source {
            Some(source) => parse_init_source(source)?,
            None => AHashMap::new(),
        };

        let right = match &plan.join {
            Some(spec) => Some(join::load_right_table(
                spec,
                TableFormat {
                    delim: self.input_delim,
                    policy: self.input_policy,
                    encoding: self.encoding,
                },
                self.index_file.as_deref(),
                self.chunk_size,
                &mut bus,
            )?),
            None => None,
        };

        let mut buffered = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, output);
        let mut sink: Box<dyn RecordSink + '_> = Box::new(OutputSink::new(
            &mut buffered,
            self.output_delim,
            self.output_policy,
            self.encoding,
        ));
        if let Some(limit) = plan.top {
            sink = Box::new(TopSink::new(sink, limit));
        }
        match plan.distinct {
            DistinctMode::Distinct => sink = Box::new(UniqSink::new(sink)),
            DistinctMode::DistinctCount => sink = Box::new(UniqCountSink::new(sink)),
            DistinctMode::None => {}
        }
        if let Some(order) = &plan.order_by {
            sink = Box::new(SortSink::new(sink, order.reverse));
        }

        let mut source = RecordSource::new(
            LineReader::new(input, self.chunk_size, self.encoding),
            self.input_delim,
            self.input_policy,
            WarningKind::DefectiveCsvLineInInput,
        );

        let mut executor = Executor {
            plan: &plan,
            right: right.as_ref(),
            evaluator: Evaluator::new(user_fns),
            cancel: self.cancel.clone(),
            nr: 0,
            nu: 0,
            expected_nf: None,
        };
        executor.pump(&mut source, &mut *sink, &mut bus)?;
        sink.finish(&mut bus)?;
        Ok(bus)
    }
}

struct Executor<'p> {
    plan: &'p QueryPlan,
    right: Option<&'p RightTable>,
    evaluator: Evaluator,
    cancel: Option<Arc<AtomicBool>>,
    nr: i64,
    nu: i64,
    expected_nf: Option<usize>,
}

impl<'p> Executor<'p> {
    fn pump<R: Read, S: RecordSink + ?Sized>(
        &mut self,
        source: &mut RecordSource<R>,
        sink: &mut S,
        bus: &mut WarningBus,
    ) -> anyhow::Result<()> {
        match self.plan.action {
            Action::Update => self.pump_update(source, sink, bus),
            Action::Select if self.plan.is_aggregate() => self.pump_aggregate(source, sink, bus),
            Action::Select => self.pump_select(source, sink, bus),
        }
    }

    /// Read the next primary record, maintaining NR and the field-count check.
    fn next_record<R: Read>(
        &mut self,
        source: &mut RecordSource<R>,
        bus: &mut WarningBus,
    ) -> anyhow::Result<Option<Vec<String>>> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                bail!("Query cancelled");
            }
        }
        let fields = match source.read_record(bus)? {
            Some(fields) => fields,
            None => return Ok(None),
        };
        self.nr += 1;
        match self.expected_nf {
            None => self.expected_nf = Some(fields.len()),
            Some(expected) if expected != fields.len() => bus.report_sample(
                WarningKind::InputFieldsInfo,
                Some(format!(
                    "record {} has {} fields instead of {}",
                    self.nr,
                    fields.len(),
                    expected
                )),
            ),
            _ => {}
        }
        Ok(Some(fields))
    }

    /// Right-side counterparts of one primary record, per join mode.
    fn join_pairs(&self, a_fields: &[String]) -> anyhow::Result<Vec<Option<&'p [String]>>> {
        let (table, spec) = match (self.right, &self.plan.join) {
            (Some(table), Some(spec)) => (table, spec),
            _ => return Ok(vec![None]),
        };
        let key = a_fields
            .get(spec.left_col - 1)
            .map(String::as_str)
            .unwrap_or("");
        let slots = table.matches(key);
        match spec.mode {
            JoinMode::Inner => Ok(slots.iter().map(|&s| Some(table.record(s))).collect()),
            JoinMode::Left => {
                if slots.is_empty() {
                    Ok(vec![None])
                } else {
                    Ok(slots.iter().map(|&s| Some(table.record(s))).collect())
                }
            }
            JoinMode::StrictLeft => {
                if slots.len() != 1 {
                    bail!(
                        "In \"STRICT LEFT JOIN\" each key in A must have exactly one match in B. \
                         Key \"{}\" has {} matches",
                        key,
                        slots.len()
                    );
                }
                Ok(vec![Some(table.record(slots[0]))])
            }
        }
    }

    fn pump_select<R: Read, S: RecordSink + ?Sized>(
        &mut self,
        source: &mut RecordSource<R>,
        sink: &mut S,
        bus: &mut WarningBus,
    ) -> anyhow::Result<()> {
        let plan = self.plan;
        'records: while let Some(a_fields) = self.next_record(source, bus)? {
            let pairs = self.join_pairs(&a_fields)?;
            for b_fields in pairs {
                let mut ctx = RecordContext::new(&a_fields, self.nr, self.nu).with_b(b_fields);
                if let Some(where_expr) = &plan.where_expr {
                    if !self.evaluator.eval(where_expr, &ctx, bus)?.truthy() {
                        continue;
                    }
                }
                self.nu += 1;
                ctx.nu = self.nu;
                let rec = self.project(&ctx, bus)?;
                if !sink.push(rec, bus)? {
                    break 'records;
                }
            }
        }
        Ok(())
    }

    /// Evaluate the SELECT list against one record pair.
    fn project(&mut self, ctx: &RecordContext<'_>, bus: &mut WarningBus) -> anyhow::Result<OutRecord> {
        let plan = self.plan;
        let mut fields = Vec::new();
        let mut unfold = None;
        for item in &plan.select_items {
            match item {
                SelectItem::Star => self.splice_star(ctx, &mut fields, Some(&mut *bus)),
                SelectItem::Expr(expr) => {
                    let v = self.evaluator.eval(expr, ctx, bus)?;
                    fields.push(value_to_output(&v, bus));
                }
                SelectItem::Unfold(expr) => {
                    let v = self.evaluator.eval(expr, ctx, bus)?;
                    let items = match v {
                        Value::List(items) => {
                            items.iter().map(|x| value_to_output(x, bus)).collect()
                        }
                        other => bail!("UNFOLD expects a list, got a {} value", other.type_name()),
                    };
                    unfold = Some(UnfoldColumn {
                        pos: fields.len(),
                        items,
                    });
                    fields.push(String::new());
                }
                SelectItem::Aggregate { .. } => {
                    bail!("Aggregate items require the aggregation pipeline")
                }
            }
        }
        let sort_key = self.sort_key(ctx, bus)?;
        Ok(OutRecord {
            fields,
            unfold,
            sort_key,
        })
    }

    /// Expand `*`: the primary fields minus the EXCEPT set, then the right
    /// side when the query joins. `bus` is absent when the splice is being
    /// buffered rather than emitted.
    fn splice_star(
        &self,
        ctx: &RecordContext<'_>,
        fields: &mut Vec<String>,
        bus: Option<&mut WarningBus>,
    ) {
        match &self.plan.except {
            Some(except) => {
                for (i, field) in ctx.a_fields.iter().enumerate() {
                    if !except.contains(&i) {
                        fields.push(field.clone());
                    }
                }
            }
            None => fields.extend(ctx.a_fields.iter().cloned()),
        }
        if let Some(table) = self.right {
            match ctx.b_fields {
                Some(b_fields) => fields.extend(b_fields.iter().cloned()),
                None => {
                    if let Some(bus) = bus {
                        for _ in 0..table.width() {
                            bus.report(WarningKind::NullValueInOutput);
                        }
                    }
                    fields.extend(std::iter::repeat(String::new()).take(table.width()));
                }
            }
        }
    }

    fn sort_key(
        &mut self,
        ctx: &RecordContext<'_>,
        bus: &mut WarningBus,
    ) -> anyhow::Result<Vec<Value>> {
        let plan = self.plan;
        match &plan.order_by {
            Some(order) => order
                .keys
                .iter()
                .map(|key| self.evaluator.eval(key, ctx, bus))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    fn pump_update<R: Read, S: RecordSink + ?Sized>(
        &mut self,
        source: &mut RecordSource<R>,
        sink: &mut S,
        bus: &mut WarningBus,
    ) -> anyhow::Result<()> {
        let plan = self.plan;
        while let Some(a_fields) = self.next_record(source, bus)? {
            let b_fields = match (self.right, &plan.join) {
                (Some(table), Some(spec)) => {
                    let key = a_fields
                        .get(spec.left_col - 1)
                        .map(String::as_str)
                        .unwrap_or("");
                    let slots = table.matches(key);
                    if spec.mode == JoinMode::StrictLeft && slots.len() != 1 {
                        bail!(
                            "In \"STRICT LEFT JOIN\" each key in A must have exactly one match \
                             in B. Key \"{}\" has {} matches",
                            key,
                            slots.len()
                        );
                    }
                    slots.first().map(|&s| table.record(s))
                }
                _ => None,
            };
            // INNER JOIN without a match passes the record through unmodified
            let joinable = b_fields.is_some()
                || !matches!(plan.join.as_ref().map(|j| j.mode), Some(JoinMode::Inner));

            let mut out_fields = a_fields.clone();
            if joinable {
                let mut ctx = RecordContext::new(&a_fields, self.nr, self.nu).with_b(b_fields);
                let selected = match &plan.where_expr {
                    Some(where_expr) => self.evaluator.eval(where_expr, &ctx, bus)?.truthy(),
                    None => true,
                };
                if selected {
                    self.nu += 1;
                    ctx.nu = self.nu;
                    // assignments read the original record, write the copy
                    for (index, expr) in &plan.update_assignments {
                        let v = self.evaluator.eval(expr, &ctx, bus)?;
                        let rendered = value_to_output(&v, bus);
                        if *index > out_fields.len() {
                            out_fields.resize(*index, String::new());
                        }
                        out_fields[*index - 1] = rendered;
                    }
                }
            }
            if !sink.push(OutRecord::plain(out_fields), bus)? {
                break;
            }
        }
        Ok(())
    }

    fn pump_aggregate<R: Read, S: RecordSink + ?Sized>(
        &mut self,
        source: &mut RecordSource<R>,
        sink: &mut S,
        bus: &mut WarningBus,
    ) -> anyhow::Result<()> {
        let plan = self.plan;
        let mut group_index: AHashMap<Vec<String>, usize> = AHashMap::new();
        let mut groups: Vec<(Vec<String>, Vec<AggState>, Vec<Value>)> = Vec::new();

        while let Some(a_fields) = self.next_record(source, bus)? {
            let pairs = self.join_pairs(&a_fields)?;
            for b_fields in pairs {
                let mut ctx = RecordContext::new(&a_fields, self.nr, self.nu).with_b(b_fields);
                if let Some(where_expr) = &plan.where_expr {
                    if !self.evaluator.eval(where_expr, &ctx, bus)?.truthy() {
                        continue;
                    }
                }
                self.nu += 1;
                ctx.nu = self.nu;

                let key = match &plan.group_by {
                    Some(keys) => {
                        let mut key = Vec::with_capacity(keys.len());
                        for expr in keys {
                            key.push(self.evaluator.eval(expr, &ctx, bus)?.to_display());
                        }
                        key
                    }
                    None => Vec::new(),
                };
                let slot = match group_index.get(&key) {
                    Some(&slot) => slot,
                    None => {
                        let slot = groups.len();
                        group_index.insert(key.clone(), slot);
                        groups.push((key, init_states(plan), Vec::new()));
                        slot
                    }
                };

                for (item, state) in plan.select_items.iter().zip(groups[slot].1.iter_mut()) {
                    match item {
                        SelectItem::Star => {
                            let mut splice = Vec::new();
                            self.splice_star(&ctx, &mut splice, None);
                            *state = AggState::Star(splice);
                        }
                        SelectItem::Expr(expr) => {
                            let v = self.evaluator.eval(expr, &ctx, bus)?;
                            state.update_last(v);
                        }
                        SelectItem::Aggregate { kind, args } => {
                            self.update_aggregate(*kind, args, state, &ctx, bus)?;
                        }
                        SelectItem::Unfold(_) => {
                            bail!("UNFOLD cannot be used in aggregate queries")
                        }
                    }
                }
                if let Some(order) = &plan.order_by {
                    let mut key = Vec::with_capacity(order.keys.len());
                    for expr in &order.keys {
                        key.push(self.evaluator.eval(expr, &ctx, bus)?);
                    }
                    groups[slot].2 = key;
                }
            }
        }

        // emission is ordered by the stringified group key
        let mut emit_order: Vec<usize> = (0..groups.len()).collect();
        emit_order.sort_by(|&x, &y| groups[x].0.cmp(&groups[y].0));

        for slot in emit_order {
            let (_, states, sort_key) = &groups[slot];
            let mut fields = Vec::new();
            for (item, state) in plan.select_items.iter().zip(states.iter()) {
                match (item, state) {
                    (_, AggState::Star(splice)) => fields.extend(splice.iter().cloned()),
                    (SelectItem::Aggregate { kind: AggKind::Fold, args }, AggState::Fold(values)) => {
                        let collected = Value::List(values.clone());
                        let result = match args.get(1) {
                            Some(lambda) => {
                                let ctx = RecordContext::new(&[], self.nr, self.nu);
                                self.evaluator.apply_lambda(lambda, collected, &ctx, bus)?
                            }
                            None => collected,
                        };
                        fields.push(value_to_output(&result, bus));
                    }
                    (_, state) => {
                        let v = state.finalize_value();
                        fields.push(value_to_output(&v, bus));
                    }
                }
            }
            let rec = OutRecord {
                fields,
                unfold: None,
                sort_key: sort_key.clone(),
            };
            if !sink.push(rec, bus)? {
                break;
            }
        }
        Ok(())
    }

    fn update_aggregate(
        &mut self,
        kind: AggKind,
        args: &[Expr],
        state: &mut AggState,
        ctx: &RecordContext<'_>,
        bus: &mut WarningBus,
    ) -> anyhow::Result<()> {
        match kind {
            AggKind::Count => {
                if matches!(args[0], Expr::StarArg) {
                    state.update_count();
                } else if !self.evaluator.eval(&args[0], ctx, bus)?.is_nil() {
                    state.update_count();
                }
            }
            AggKind::Min => {
                let v = self.evaluator.eval(&args[0], ctx, bus)?;
                state.update_min(v);
            }
            AggKind::Max => {
                let v = self.evaluator.eval(&args[0], ctx, bus)?;
                state.update_max(v);
            }
            AggKind::Sum | AggKind::Avg | AggKind::Variance | AggKind::Median => {
                let v = self.evaluator.eval(&args[0], ctx, bus)?;
                state.update_numeric(&v);
            }
            AggKind::Fold => {
                let v = self.evaluator.eval(&args[0], ctx, bus)?;
                state.update_fold(v);
            }
        }
        Ok(())
    }
}

fn init_states(plan: &QueryPlan) -> Vec<AggState> {
    plan.select_items
        .iter()
        .map(|item| match item {
            SelectItem::Star => AggState::Star(Vec::new()),
            SelectItem::Expr(_) | SelectItem::Unfold(_) => AggState::Last(Value::Nil),
            SelectItem::Aggregate { kind, .. } => match kind {
                AggKind::Min => AggState::Min(None),
                AggKind::Max => AggState::Max(None),
                AggKind::Count => AggState::Count(0),
                AggKind::Sum => AggState::Sum(NumSum::new()),
                AggKind::Avg => AggState::Avg(NumSum::new()),
                AggKind::Variance => AggState::Variance(NumSum::new()),
                AggKind::Median => AggState::Median(Vec::new()),
                AggKind::Fold => AggState::Fold(Vec::new()),
            },
        })
        .collect()
}
