//! Numeric reductions and scalar math.

use std::sync::Arc;

use cellflow_common::{EngineError, ErrorKind, LiteralValue};
use cellflow_macros::sheet_fn;

use super::try_val;
use crate::eval::{EvalResult, Extent, SequenceSpill};
use crate::function_registry::register_function;
use crate::traits::FnCtx;

fn error(kind: ErrorKind) -> EvalResult {
    EvalResult::Value(LiteralValue::Error(EngineError::new(kind)))
}

/// Fold every numeric value of every argument.
///
/// Direct scalar arguments coerce aggressively (booleans, numeric text);
/// values arriving through ranges/spills contribute only if they are
/// already numeric — text and booleans inside a range are ignored, the way
/// grid reductions behave. `Empty` never contributes. Errors win
/// immediately.
fn fold_numeric<F: FnMut(f64)>(inv: &mut FnCtx, mut f: F) -> Option<LiteralValue> {
    for i in 0..inv.arg_count() {
        let result = inv.eval(i);
        let from_range = result.is_spilled();
        let values = match inv.flatten_result(result) {
            Ok(v) => v,
            Err(e) => return Some(e),
        };
        for v in values {
            match v {
                LiteralValue::Error(e) => return Some(LiteralValue::Error(e)),
                LiteralValue::Number(n) => f(n),
                LiteralValue::Infinity { negative } => {
                    f(if negative { f64::NEG_INFINITY } else { f64::INFINITY })
                }
                LiteralValue::Boolean(b) if !from_range => f(if b { 1.0 } else { 0.0 }),
                LiteralValue::Text(s) if !from_range => match s.trim().parse::<f64>() {
                    Ok(n) => f(n),
                    Err(_) => {
                        return Some(LiteralValue::Error(
                            EngineError::new(ErrorKind::Value)
                                .with_message(format!("cannot convert '{s}' to a number")),
                        ))
                    }
                },
                _ => {}
            }
        }
    }
    None
}

#[sheet_fn(name = "SUM", min = 1, variadic, arg_types = "any")]
pub fn sum_fn(inv: &mut FnCtx) -> EvalResult {
    let mut acc = 0.0;
    if let Some(e) = fold_numeric(inv, |n| acc += n) {
        return EvalResult::Value(e);
    }
    EvalResult::Value(LiteralValue::from_f64(acc))
}

#[sheet_fn(name = "AVERAGE", min = 1, variadic, arg_types = "any")]
pub fn average_fn(inv: &mut FnCtx) -> EvalResult {
    let mut acc = 0.0;
    let mut count = 0u64;
    if let Some(e) = fold_numeric(inv, |n| {
        acc += n;
        count += 1;
    }) {
        return EvalResult::Value(e);
    }
    if count == 0 {
        return error(ErrorKind::Div0);
    }
    EvalResult::Value(LiteralValue::from_f64(acc / count as f64))
}

#[sheet_fn(name = "COUNT", min = 1, variadic, arg_types = "any")]
pub fn count_fn(inv: &mut FnCtx) -> EvalResult {
    let mut count = 0u64;
    if let Some(e) = fold_numeric(inv, |_| count += 1) {
        return EvalResult::Value(e);
    }
    EvalResult::Value(LiteralValue::Number(count as f64))
}

#[sheet_fn(name = "MIN", min = 1, variadic, arg_types = "any")]
pub fn min_fn(inv: &mut FnCtx) -> EvalResult {
    let mut best: Option<f64> = None;
    if let Some(e) = fold_numeric(inv, |n| {
        best = Some(best.map_or(n, |b: f64| b.min(n)));
    }) {
        return EvalResult::Value(e);
    }
    EvalResult::Value(LiteralValue::from_f64(best.unwrap_or(0.0)))
}

#[sheet_fn(name = "MAX", min = 1, variadic, arg_types = "any")]
pub fn max_fn(inv: &mut FnCtx) -> EvalResult {
    let mut best: Option<f64> = None;
    if let Some(e) = fold_numeric(inv, |n| {
        best = Some(best.map_or(n, |b: f64| b.max(n)));
    }) {
        return EvalResult::Value(e);
    }
    EvalResult::Value(LiteralValue::from_f64(best.unwrap_or(0.0)))
}

/* ───────────── criteria matching (COUNTIF / SUMIF) ───────────── */

enum Criteria {
    Compare(String, f64),
    CompareText(String, String),
    EqualNumber(f64),
    EqualText(String),
    EqualBlank,
}

impl Criteria {
    fn parse(v: &LiteralValue) -> Criteria {
        match v {
            LiteralValue::Number(n) => Criteria::EqualNumber(*n),
            LiteralValue::Boolean(b) => Criteria::EqualNumber(if *b { 1.0 } else { 0.0 }),
            LiteralValue::Empty => Criteria::EqualBlank,
            LiteralValue::Text(s) => {
                let s = s.trim();
                for op in ["<>", "<=", ">=", "<", ">", "="] {
                    if let Some(rest) = s.strip_prefix(op) {
                        let rest = rest.trim();
                        return match rest.parse::<f64>() {
                            Ok(n) => Criteria::Compare(op.to_string(), n),
                            Err(_) => Criteria::CompareText(op.to_string(), rest.to_lowercase()),
                        };
                    }
                }
                match s.parse::<f64>() {
                    Ok(n) => Criteria::EqualNumber(n),
                    Err(_) => Criteria::EqualText(s.to_lowercase()),
                }
            }
            other => Criteria::EqualText(other.to_string().to_lowercase()),
        }
    }

    fn matches(&self, v: &LiteralValue) -> bool {
        match self {
            Criteria::EqualBlank => v.is_blank(),
            Criteria::EqualNumber(n) => v.as_f64().filter(|_| !v.is_blank()) == Some(*n),
            Criteria::EqualText(t) => match v {
                LiteralValue::Text(s) => s.to_lowercase() == *t,
                _ => false,
            },
            Criteria::Compare(op, n) => {
                let x = match v {
                    LiteralValue::Number(x) => *x,
                    LiteralValue::Infinity { negative } => {
                        if *negative {
                            f64::NEG_INFINITY
                        } else {
                            f64::INFINITY
                        }
                    }
                    _ => return op == "<>",
                };
                apply_cmp(op, x.partial_cmp(n))
            }
            Criteria::CompareText(op, t) => {
                let s = match v {
                    LiteralValue::Text(s) => s.to_lowercase(),
                    _ => return op == "<>",
                };
                apply_cmp(op, Some(s.cmp(t)))
            }
        }
    }
}

fn apply_cmp(op: &str, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    let o = match ordering {
        Some(o) => o,
        None => return false,
    };
    match op {
        "=" => o == Equal,
        "<>" => o != Equal,
        "<" => o == Less,
        "<=" => o != Greater,
        ">" => o == Greater,
        ">=" => o != Less,
        _ => false,
    }
}

#[sheet_fn(name = "COUNTIF", min = 2, arg_types = "range,any")]
pub fn countif_fn(inv: &mut FnCtx) -> EvalResult {
    let values = try_val!(inv.flatten(0));
    let criteria = Criteria::parse(&inv.value(1));
    let count = values.iter().filter(|v| criteria.matches(v)).count();
    EvalResult::Value(LiteralValue::Number(count as f64))
}

#[sheet_fn(name = "SUMIF", min = 2, arg_types = "range,any,range")]
pub fn sumif_fn(inv: &mut FnCtx) -> EvalResult {
    let values = try_val!(inv.flatten(0));
    let criteria = Criteria::parse(&inv.value(1));
    let sums = if inv.arg_count() > 2 {
        try_val!(inv.flatten(2))
    } else {
        values.clone()
    };

    let mut acc = 0.0;
    for (i, v) in values.iter().enumerate() {
        if criteria.matches(v) {
            match sums.get(i) {
                Some(LiteralValue::Error(e)) => {
                    return EvalResult::Value(LiteralValue::Error(e.clone()))
                }
                Some(s) => acc += s.as_f64().unwrap_or(0.0),
                None => {}
            }
        }
    }
    EvalResult::Value(LiteralValue::from_f64(acc))
}

/* ───────────── scalar math ───────────── */

#[sheet_fn(name = "POWER", min = 2, arg_types = "number,number")]
pub fn power_fn(inv: &mut FnCtx) -> EvalResult {
    let base = try_val!(inv.number(0));
    let exp = try_val!(inv.number(1));
    if base < 0.0 && exp.fract() != 0.0 {
        return error(ErrorKind::Num);
    }
    let out = base.powf(exp);
    if out.is_nan() {
        return error(ErrorKind::Num);
    }
    EvalResult::Value(LiteralValue::from_f64(out))
}

#[sheet_fn(name = "ABS", min = 1, arg_types = "number")]
pub fn abs_fn(inv: &mut FnCtx) -> EvalResult {
    let n = try_val!(inv.number(0));
    EvalResult::Value(LiteralValue::from_f64(n.abs()))
}

fn round_with(n: f64, digits: f64, mode: fn(f64) -> f64) -> f64 {
    let factor = 10f64.powi(digits.trunc() as i32);
    mode(n * factor) / factor
}

#[sheet_fn(name = "ROUND", min = 1, arg_types = "number,number")]
pub fn round_fn(inv: &mut FnCtx) -> EvalResult {
    let n = try_val!(inv.number(0));
    let digits = try_val!(inv.number_or(1, 0.0));
    EvalResult::Value(LiteralValue::from_f64(round_with(n, digits, f64::round)))
}

#[sheet_fn(name = "ROUNDUP", min = 1, arg_types = "number,number")]
pub fn roundup_fn(inv: &mut FnCtx) -> EvalResult {
    let n = try_val!(inv.number(0));
    let digits = try_val!(inv.number_or(1, 0.0));
    // away from zero
    let away = |x: f64| if x >= 0.0 { x.ceil() } else { x.floor() };
    EvalResult::Value(LiteralValue::from_f64(round_with(n, digits, away)))
}

#[sheet_fn(name = "ROUNDDOWN", min = 1, arg_types = "number,number")]
pub fn rounddown_fn(inv: &mut FnCtx) -> EvalResult {
    let n = try_val!(inv.number(0));
    let digits = try_val!(inv.number_or(1, 0.0));
    EvalResult::Value(LiteralValue::from_f64(round_with(n, digits, f64::trunc)))
}

#[sheet_fn(name = "MOD", min = 2, arg_types = "number,number")]
pub fn mod_fn(inv: &mut FnCtx) -> EvalResult {
    let n = try_val!(inv.number(0));
    let d = try_val!(inv.number(1));
    if d == 0.0 {
        return error(ErrorKind::Div0);
    }
    // sign follows the divisor
    EvalResult::Value(LiteralValue::from_f64(n - d * (n / d).floor()))
}

/* ───────────── SEQUENCE ───────────── */

#[sheet_fn(name = "SEQUENCE", min = 1, arg_types = "number,number,number,number")]
pub fn sequence_fn(inv: &mut FnCtx) -> EvalResult {
    // spilled arguments collapse to their origin value
    let rows = match inv.value(0) {
        LiteralValue::Error(e) => return EvalResult::Value(LiteralValue::Error(e)),
        LiteralValue::Infinity { negative: false } => Extent::Infinite,
        v => {
            let n = match v.as_f64() {
                Some(n) if n >= 1.0 => n,
                _ => return error(ErrorKind::Value),
            };
            Extent::Finite(n.trunc() as u32)
        }
    };
    let cols = {
        let n = try_val!(inv.number_or(1, 1.0));
        if n < 1.0 {
            return error(ErrorKind::Value);
        }
        n.trunc() as u32
    };
    let start = try_val!(inv.number_or(2, 1.0));
    let step = try_val!(inv.number_or(3, 1.0));

    EvalResult::Spilled(SequenceSpill::value(rows, cols, start, step))
}

pub fn register_builtins() {
    register_function(Arc::new(__FnSUM));
    register_function(Arc::new(__FnAVERAGE));
    register_function(Arc::new(__FnCOUNT));
    register_function(Arc::new(__FnMIN));
    register_function(Arc::new(__FnMAX));
    register_function(Arc::new(__FnCOUNTIF));
    register_function(Arc::new(__FnSUMIF));
    register_function(Arc::new(__FnPOWER));
    register_function(Arc::new(__FnABS));
    register_function(Arc::new(__FnROUND));
    register_function(Arc::new(__FnROUNDUP));
    register_function(Arc::new(__FnROUNDDOWN));
    register_function(Arc::new(__FnMOD));
    register_function(Arc::new(__FnSEQUENCE));
}
