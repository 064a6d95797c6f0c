//! Logical functions.

use std::sync::Arc;

use cellflow_common::{EngineError, ErrorKind, LiteralValue};
use cellflow_macros::sheet_fn;

use crate::eval::{CondSpill, EvalResult};
use crate::function_registry::register_function;
use crate::traits::FnCtx;

#[sheet_fn(name = "TRUE", min = 0)]
pub fn true_fn(_inv: &mut FnCtx) -> EvalResult {
    EvalResult::Value(LiteralValue::Boolean(true))
}

#[sheet_fn(name = "FALSE", min = 0)]
pub fn false_fn(_inv: &mut FnCtx) -> EvalResult {
    EvalResult::Value(LiteralValue::Boolean(false))
}

#[sheet_fn(name = "NOT", min = 1, arg_types = "logical")]
pub fn not_fn(inv: &mut FnCtx) -> EvalResult {
    match inv.value(0) {
        LiteralValue::Error(e) => EvalResult::Value(LiteralValue::Error(e)),
        v => EvalResult::Value(LiteralValue::Boolean(!v.is_truthy())),
    }
}

/// Shared AND/OR body: fold truthiness over every value of every argument.
/// Blank cells inside ranges are ignored; a direct blank argument counts as
/// FALSE. Text is `#VALUE!` (it has no truth value here).
fn fold_logical(inv: &mut FnCtx, fold_or: bool) -> EvalResult {
    let mut acc = !fold_or; // AND starts true, OR starts false
    let mut saw_value = false;
    for i in 0..inv.arg_count() {
        let result = inv.eval(i);
        let from_range = result.is_spilled();
        let values = match inv.flatten_result(result) {
            Ok(v) => v,
            Err(e) => return EvalResult::Value(e),
        };
        for v in values {
            let truth = match v {
                LiteralValue::Error(e) => return EvalResult::Value(LiteralValue::Error(e)),
                LiteralValue::Boolean(b) => b,
                LiteralValue::Number(n) => n != 0.0,
                LiteralValue::Infinity { .. } => true,
                LiteralValue::Empty => {
                    if from_range {
                        continue;
                    }
                    false
                }
                LiteralValue::Text(_) => {
                    if from_range {
                        continue;
                    }
                    return EvalResult::Value(LiteralValue::Error(EngineError::new(
                        ErrorKind::Value,
                    )));
                }
            };
            saw_value = true;
            if fold_or {
                acc = acc || truth;
            } else {
                acc = acc && truth;
            }
        }
    }
    if !saw_value {
        return EvalResult::Value(LiteralValue::Error(EngineError::new(ErrorKind::Value)));
    }
    EvalResult::Value(LiteralValue::Boolean(acc))
}

#[sheet_fn(name = "AND", min = 1, variadic, arg_types = "any")]
pub fn and_fn(inv: &mut FnCtx) -> EvalResult {
    fold_logical(inv, false)
}

#[sheet_fn(name = "OR", min = 1, variadic, arg_types = "any")]
pub fn or_fn(inv: &mut FnCtx) -> EvalResult {
    fold_logical(inv, true)
}

/// `IF(test, thenV, elseV?=FALSE)`.
///
/// A scalar test evaluates only the taken arm (which keeps
/// `IF(FALSE, A1, …)` from creating an edge to `A1`); a spilled test
/// broadcasts arm selection per offset over the union of areas.
#[sheet_fn(name = "IF", min = 2, arg_types = "any,any,any")]
pub fn if_fn(inv: &mut FnCtx) -> EvalResult {
    let test = inv.eval(0);
    match test {
        EvalResult::Value(LiteralValue::Error(e)) => EvalResult::Value(LiteralValue::Error(e)),
        EvalResult::Value(v) => {
            if v.is_truthy() {
                inv.eval(1)
            } else if inv.arg_count() > 2 {
                inv.eval(2)
            } else {
                EvalResult::Value(LiteralValue::Boolean(false))
            }
        }
        spilled => {
            let then_v = inv.eval(1);
            let else_v = if inv.arg_count() > 2 {
                inv.eval(2)
            } else {
                EvalResult::Value(LiteralValue::Boolean(false))
            };
            EvalResult::Spilled(CondSpill::value(spilled, then_v, else_v))
        }
    }
}

/// `IFERROR(value, fallback)` — traps error values instead of propagating.
#[sheet_fn(name = "IFERROR", min = 2, arg_types = "any,any")]
pub fn iferror_fn(inv: &mut FnCtx) -> EvalResult {
    match inv.eval(0) {
        EvalResult::Value(LiteralValue::Error(_)) => inv.eval(1),
        other => other,
    }
}

pub fn register_builtins() {
    register_function(Arc::new(__FnTRUE));
    register_function(Arc::new(__FnFALSE));
    register_function(Arc::new(__FnNOT));
    register_function(Arc::new(__FnAND));
    register_function(Arc::new(__FnOR));
    register_function(Arc::new(__FnIF));
    register_function(Arc::new(__FnIFERROR));
}
