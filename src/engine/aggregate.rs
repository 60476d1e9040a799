//! Per-group accumulators and the group table.

use crate::expr::value::{compare_values, Value};
use std::cmp::Ordering;

/// A numeric sample: integer samples stay exact so sums do not drift.
#[derive(Debug, Clone, Copy)]
pub enum NumVal {
    I(i64),
    F(f64),
}

impl NumVal {
    fn as_f64(&self) -> f64 {
        match self {
            NumVal::I(n) => *n as f64,
            NumVal::F(f) => *f,
        }
    }

    fn into_value(self) -> Value {
        match self {
            NumVal::I(n) => Value::Int(n),
            NumVal::F(f) => Value::Float(f),
        }
    }
}

/// Coerce a field value to a number; unparsable values become `None` and are
/// skipped by the numeric aggregators.
pub fn coerce_numeric(v: &Value) -> Option<NumVal> {
    match v {
        Value::Int(n) => Some(NumVal::I(*n)),
        Value::Float(f) => Some(NumVal::F(*f)),
        Value::Str(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                Some(NumVal::I(n))
            } else {
                s.parse::<f64>().ok().map(NumVal::F)
            }
        }
        _ => None,
    }
}

/// Running numeric sums; `all_int` tracks whether the exact integer path is
/// still valid.
#[derive(Debug, Clone, Default)]
pub struct NumSum {
    pub count: u64,
    all_int: bool,
    sum_i: i128,
    sumsq_i: i128,
    sum_f: f64,
    sumsq_f: f64,
}

impl NumSum {
    pub fn new() -> Self {
        Self {
            all_int: true,
            ..Self::default()
        }
    }

    fn add(&mut self, v: NumVal) {
        self.count += 1;
        match v {
            NumVal::I(n) => {
                self.sum_i += n as i128;
                self.sumsq_i += (n as i128) * (n as i128);
            }
            NumVal::F(_) => self.all_int = false,
        }
        let f = v.as_f64();
        self.sum_f += f;
        self.sumsq_f += f * f;
    }

    fn sum_value(&self) -> Value {
        if self.count == 0 {
            Value::Nil
        } else if self.all_int {
            Value::Int(self.sum_i as i64)
        } else {
            Value::Float(self.sum_f)
        }
    }

    fn avg_value(&self) -> Value {
        if self.count == 0 {
            return Value::Nil;
        }
        let n = self.count as f64;
        if self.all_int {
            Value::Float(self.sum_i as f64 / n)
        } else {
            Value::Float(self.sum_f / n)
        }
    }

    fn variance_value(&self) -> Value {
        if self.count == 0 {
            return Value::Nil;
        }
        let n = self.count as i128;
        if self.all_int {
            // population variance, computed exactly: (n·Σx² − (Σx)²) / n²
            let numerator = self.sumsq_i * n - self.sum_i * self.sum_i;
            Value::Float(numerator as f64 / (n * n) as f64)
        } else {
            let n = self.count as f64;
            let mean = self.sum_f / n;
            Value::Float(self.sumsq_f / n - mean * mean)
        }
    }
}

/// Per-select-item accumulation state inside one group.
#[derive(Debug, Clone)]
pub enum AggState {
    /// Plain expression: keep the last value seen in the group.
    Last(Value),
    /// `*` splice: keep the last expansion.
    Star(Vec<String>),
    Min(Option<Value>),
    Max(Option<Value>),
    Count(u64),
    Sum(NumSum),
    Avg(NumSum),
    Variance(NumSum),
    Median(Vec<NumVal>),
    Fold(Vec<Value>),
}

impl AggState {
    pub fn update_last(&mut self, v: Value) {
        *self = AggState::Last(v);
    }

    pub fn update_min(&mut self, v: Value) {
        if v.is_nil() {
            return;
        }
        if let AggState::Min(best) = self {
            let replace = match best {
                None => true,
                Some(current) => compare_values(&v, current) == Ordering::Less,
            };
            if replace {
                *best = Some(v);
            }
        }
    }

    pub fn update_max(&mut self, v: Value) {
        if v.is_nil() {
            return;
        }
        if let AggState::Max(best) = self {
            let replace = match best {
                None => true,
                Some(current) => compare_values(&v, current) == Ordering::Greater,
            };
            if replace {
                *best = Some(v);
            }
        }
    }

    pub fn update_count(&mut self) {
        if let AggState::Count(n) = self {
            *n += 1;
        }
    }

    pub fn update_numeric(&mut self, v: &Value) {
        let num = match coerce_numeric(v) {
            Some(num) => num,
            None => return,
        };
        match self {
            AggState::Sum(sum) | AggState::Avg(sum) | AggState::Variance(sum) => sum.add(num),
            AggState::Median(values) => values.push(num),
            _ => {}
        }
    }

    pub fn update_fold(&mut self, v: Value) {
        if let AggState::Fold(values) = self {
            values.push(v);
        }
    }

    /// Final value of the simple states. `Star` and `Fold` are finalized by
    /// the executor (they need the star splice / the lambda evaluator).
    pub fn finalize_value(&self) -> Value {
        match self {
            AggState::Last(v) => v.clone(),
            AggState::Min(best) | AggState::Max(best) => {
                best.clone().unwrap_or(Value::Nil)
            }
            AggState::Count(n) => Value::Int(*n as i64),
            AggState::Sum(sum) => sum.sum_value(),
            AggState::Avg(sum) => sum.avg_value(),
            AggState::Variance(sum) => sum.variance_value(),
            AggState::Median(values) => {
                if values.is_empty() {
                    return Value::Nil;
                }
                let mut sorted = values.clone();
                sorted.sort_by(|a, b| {
                    a.as_f64()
                        .partial_cmp(&b.as_f64())
                        .unwrap_or(Ordering::Equal)
                });
                // lower middle for even counts
                sorted[(sorted.len() - 1) / 2].into_value()
            }
            AggState::Star(_) | AggState::Fold(_) => Value::Nil,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    #[test]
    fn test_avg_prints_like_a_scripting_host() {
        let mut avg = AggState::Avg(NumSum::new());
        for v in ["1", "2", "4", "7", "8"] {
            avg.update_numeric(&s(v));
        }
        assert_eq!(avg.finalize_value().to_display(), "4.4");

        let mut avg = AggState::Avg(NumSum::new());
        avg.update_numeric(&s("3"));
        assert_eq!(avg.finalize_value().to_display(), "3.0");
    }

    #[test]
    fn test_variance_is_population_variance() {
        let mut var = AggState::Variance(NumSum::new());
        for v in ["1", "2", "4", "7", "8"] {
            var.update_numeric(&s(v));
        }
        assert_eq!(var.finalize_value().to_display(), "7.44");

        let mut var = AggState::Variance(NumSum::new());
        var.update_numeric(&s("5"));
        var.update_numeric(&s("6"));
        assert_eq!(var.finalize_value().to_display(), "0.25");

        let mut var = AggState::Variance(NumSum::new());
        var.update_numeric(&s("3"));
        assert_eq!(var.finalize_value().to_display(), "0.0");
    }

    #[test]
    fn test_median_takes_lower_middle() {
        let mut med = AggState::Median(Vec::new());
        for v in ["1", "1", "2", "100", "100"] {
            med.update_numeric(&s(v));
        }
        assert_eq!(med.finalize_value(), Value::Int(2));

        let mut med = AggState::Median(Vec::new());
        for v in ["4", "1", "3", "2"] {
            med.update_numeric(&s(v));
        }
        assert_eq!(med.finalize_value(), Value::Int(2));
    }

    #[test]
    fn test_min_max_use_natural_order() {
        let mut min = AggState::Min(None);
        let mut max = AggState::Max(None);
        for v in [Value::Int(10), Value::Int(80), Value::Int(20)] {
            min.update_min(v.clone());
            max.update_max(v);
        }
        assert_eq!(min.finalize_value(), Value::Int(10));
        assert_eq!(max.finalize_value(), Value::Int(80));

        // strings compare lexicographically
        let mut max = AggState::Max(None);
        for v in ["1", "3", "8", "2"] {
            max.update_max(s(v));
        }
        assert_eq!(max.finalize_value(), s("8"));
    }

    #[test]
    fn test_sum_stays_integer() {
        let mut sum = AggState::Sum(NumSum::new());
        for _ in 0..8 {
            sum.update_numeric(&s("100"));
        }
        assert_eq!(sum.finalize_value(), Value::Int(800));

        let mut sum = AggState::Sum(NumSum::new());
        sum.update_numeric(&s("1.5"));
        sum.update_numeric(&s("1"));
        assert_eq!(sum.finalize_value(), Value::Float(2.5));
    }

    #[test]
    fn test_unparsable_values_are_skipped() {
        let mut sum = AggState::Sum(NumSum::new());
        sum.update_numeric(&s("haha"));
        sum.update_numeric(&s("5"));
        assert_eq!(sum.finalize_value(), Value::Int(5));
    }
}
