//! Type-inspection functions. These look at error values instead of
//! propagating them.

use std::sync::Arc;

use cellflow_common::{EngineError, ErrorKind, LiteralValue};
use cellflow_macros::sheet_fn;

use super::try_val;
use crate::eval::EvalResult;
use crate::function_registry::register_function;
use crate::traits::FnCtx;

#[sheet_fn(name = "ISBLANK", min = 1)]
pub fn isblank_fn(inv: &mut FnCtx) -> EvalResult {
    let v = inv.value(0);
    EvalResult::Value(LiteralValue::Boolean(v.is_blank()))
}

#[sheet_fn(name = "ISERROR", min = 1)]
pub fn iserror_fn(inv: &mut FnCtx) -> EvalResult {
    let v = inv.value(0);
    EvalResult::Value(LiteralValue::Boolean(v.is_error()))
}

#[sheet_fn(name = "ISNA", min = 1)]
pub fn isna_fn(inv: &mut FnCtx) -> EvalResult {
    let v = inv.value(0);
    EvalResult::Value(LiteralValue::Boolean(matches!(
        v,
        LiteralValue::Error(e) if e.kind == ErrorKind::Na
    )))
}

#[sheet_fn(name = "ISNUMBER", min = 1)]
pub fn isnumber_fn(inv: &mut FnCtx) -> EvalResult {
    let v = inv.value(0);
    EvalResult::Value(LiteralValue::Boolean(matches!(
        v,
        LiteralValue::Number(_) | LiteralValue::Infinity { .. }
    )))
}

#[sheet_fn(name = "ISTEXT", min = 1)]
pub fn istext_fn(inv: &mut FnCtx) -> EvalResult {
    let v = inv.value(0);
    EvalResult::Value(LiteralValue::Boolean(matches!(v, LiteralValue::Text(_))))
}

#[sheet_fn(name = "ISLOGICAL", min = 1)]
pub fn islogical_fn(inv: &mut FnCtx) -> EvalResult {
    let v = inv.value(0);
    EvalResult::Value(LiteralValue::Boolean(matches!(
        v,
        LiteralValue::Boolean(_)
    )))
}

#[sheet_fn(name = "ISEVEN", min = 1, arg_types = "number")]
pub fn iseven_fn(inv: &mut FnCtx) -> EvalResult {
    let n = try_val!(inv.number(0));
    EvalResult::Value(LiteralValue::Boolean(n.trunc() as i64 % 2 == 0))
}

#[sheet_fn(name = "ISODD", min = 1, arg_types = "number")]
pub fn isodd_fn(inv: &mut FnCtx) -> EvalResult {
    let n = try_val!(inv.number(0));
    EvalResult::Value(LiteralValue::Boolean(n.trunc() as i64 % 2 != 0))
}

#[sheet_fn(name = "NA", min = 0)]
pub fn na_fn(_inv: &mut FnCtx) -> EvalResult {
    EvalResult::Value(LiteralValue::Error(EngineError::new(ErrorKind::Na)))
}

pub fn register_builtins() {
    register_function(Arc::new(__FnISBLANK));
    register_function(Arc::new(__FnISERROR));
    register_function(Arc::new(__FnISNA));
    register_function(Arc::new(__FnISNUMBER));
    register_function(Arc::new(__FnISTEXT));
    register_function(Arc::new(__FnISLOGICAL));
    register_function(Arc::new(__FnISEVEN));
    register_function(Arc::new(__FnISODD));
    register_function(Arc::new(__FnNA));
}
