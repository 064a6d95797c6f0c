//! Text functions. `CONCATENATE` is also the implementation behind `&`'s
//! semantics (both go through the same text coercion).

use std::sync::Arc;

use cellflow_common::LiteralValue;
use cellflow_macros::sheet_fn;

use super::try_val;
use crate::eval::EvalResult;
use crate::function_registry::register_function;
use crate::traits::{coerce_text, FnCtx};

#[sheet_fn(name = "CONCATENATE", min = 1, variadic, arg_types = "any")]
pub fn concatenate_fn(inv: &mut FnCtx) -> EvalResult {
    let mut out = String::new();
    for i in 0..inv.arg_count() {
        match inv.value(i) {
            LiteralValue::Error(e) => return EvalResult::Value(LiteralValue::Error(e)),
            v => out.push_str(&coerce_text(&v)),
        }
    }
    EvalResult::Value(LiteralValue::Text(out))
}

#[sheet_fn(name = "LEN", min = 1, arg_types = "text")]
pub fn len_fn(inv: &mut FnCtx) -> EvalResult {
    let s = try_val!(inv.text(0));
    EvalResult::Value(LiteralValue::Number(s.chars().count() as f64))
}

#[sheet_fn(name = "UPPER", min = 1, arg_types = "text")]
pub fn upper_fn(inv: &mut FnCtx) -> EvalResult {
    let s = try_val!(inv.text(0));
    EvalResult::Value(LiteralValue::Text(s.to_uppercase()))
}

#[sheet_fn(name = "LOWER", min = 1, arg_types = "text")]
pub fn lower_fn(inv: &mut FnCtx) -> EvalResult {
    let s = try_val!(inv.text(0));
    EvalResult::Value(LiteralValue::Text(s.to_lowercase()))
}

pub fn register_builtins() {
    register_function(Arc::new(__FnCONCATENATE));
    register_function(Arc::new(__FnLEN));
    register_function(Arc::new(__FnUPPER));
    register_function(Arc::new(__FnLOWER));
}
