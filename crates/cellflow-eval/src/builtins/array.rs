//! Dynamic-array functions: each returns a spilled grid the driver
//! materializes at the origin.

use std::cmp::Ordering;
use std::sync::Arc;

use cellflow_common::{EngineError, ErrorKind, LiteralValue};
use cellflow_macros::sheet_fn;

use super::try_val;
use crate::eval::{EvalResult, GridSpill};
use crate::function_registry::register_function;
use crate::traits::FnCtx;

fn error(kind: ErrorKind) -> EvalResult {
    EvalResult::Value(LiteralValue::Error(EngineError::new(kind)))
}

/// Sort ordering across mixed types: numbers < text < booleans, empties
/// last; same-type values compare naturally.
fn sort_cmp(a: &LiteralValue, b: &LiteralValue) -> Ordering {
    fn rank(v: &LiteralValue) -> u8 {
        match v {
            LiteralValue::Number(_) | LiteralValue::Infinity { .. } => 0,
            LiteralValue::Text(_) => 1,
            LiteralValue::Boolean(_) => 2,
            LiteralValue::Error(_) => 3,
            LiteralValue::Empty => 4,
        }
    }
    match (a, b) {
        (LiteralValue::Text(x), LiteralValue::Text(y)) => {
            x.to_lowercase().cmp(&y.to_lowercase())
        }
        (LiteralValue::Boolean(x), LiteralValue::Boolean(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) if rank(a) == 0 && rank(b) == 0 => {
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

/// `FILTER(range, include, if_empty?)` — keeps the rows (or columns) whose
/// mask entry is truthy.
#[sheet_fn(name = "FILTER", min = 2, arg_types = "range,range,any")]
pub fn filter_fn(inv: &mut FnCtx) -> EvalResult {
    let grid = try_val!(inv.grid(0));
    let mask = try_val!(inv.flatten(1));
    for m in &mask {
        if let LiteralValue::Error(e) = m {
            return EvalResult::Value(LiteralValue::Error(e.clone()));
        }
    }

    let rows = grid.len();
    let cols = grid.first().map(|r| r.len()).unwrap_or(0);

    let filtered: Vec<Vec<LiteralValue>> = if mask.len() == rows {
        grid.into_iter()
            .zip(mask.iter())
            .filter(|(_, m)| m.is_truthy())
            .map(|(row, _)| row)
            .collect()
    } else if mask.len() == cols {
        grid.into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(mask.iter())
                    .filter(|(_, m)| m.is_truthy())
                    .map(|(v, _)| v)
                    .collect::<Vec<_>>()
            })
            .filter(|row: &Vec<LiteralValue>| !row.is_empty())
            .collect()
    } else {
        return error(ErrorKind::Value);
    };

    if filtered.is_empty() || filtered.first().map(|r| r.is_empty()).unwrap_or(true) {
        if inv.arg_count() > 2 {
            return inv.eval(2);
        }
        return EvalResult::Value(LiteralValue::Error(
            EngineError::new(ErrorKind::Na).with_message("FILTER returned no rows"),
        ));
    }
    EvalResult::Spilled(GridSpill::value(filtered))
}

/// `SORT(range, sort_index?=1, sort_order?=1)` — stable row sort by one
/// column; order 1 ascending, -1 descending.
#[sheet_fn(name = "SORT", min = 1, arg_types = "range,number,number")]
pub fn sort_fn(inv: &mut FnCtx) -> EvalResult {
    let mut grid = try_val!(inv.grid(0));
    let index = try_val!(inv.number_or(1, 1.0));
    let order = try_val!(inv.number_or(2, 1.0));

    let cols = grid.first().map(|r| r.len()).unwrap_or(0);
    if index < 1.0 || (index as usize) > cols {
        return error(ErrorKind::Value);
    }
    if order != 1.0 && order != -1.0 {
        return error(ErrorKind::Value);
    }
    let col = index as usize - 1;

    grid.sort_by(|a, b| {
        let ord = sort_cmp(&a[col], &b[col]);
        if order < 0.0 {
            ord.reverse()
        } else {
            ord
        }
    });
    EvalResult::Spilled(GridSpill::value(grid))
}

/// `UNIQUE(range)` — distinct rows, first occurrence wins.
#[sheet_fn(name = "UNIQUE", min = 1, arg_types = "range")]
pub fn unique_fn(inv: &mut FnCtx) -> EvalResult {
    let grid = try_val!(inv.grid(0));
    let mut seen: Vec<&Vec<LiteralValue>> = Vec::new();
    let mut out: Vec<Vec<LiteralValue>> = Vec::new();
    for row in &grid {
        if !seen.iter().any(|s| *s == row) {
            seen.push(row);
            out.push(row.clone());
        }
    }
    EvalResult::Spilled(GridSpill::value(out))
}

/// `ARRAY_CONSTRAIN(range, rows, cols)` — clips a result to the given
/// dimensions.
#[sheet_fn(name = "ARRAY_CONSTRAIN", min = 3, arg_types = "range,number,number")]
pub fn array_constrain_fn(inv: &mut FnCtx) -> EvalResult {
    let grid = try_val!(inv.grid(0));
    let rows = try_val!(inv.number(1));
    let cols = try_val!(inv.number(2));
    if rows < 1.0 || cols < 1.0 {
        return error(ErrorKind::Value);
    }

    let clipped: Vec<Vec<LiteralValue>> = grid
        .into_iter()
        .take(rows as usize)
        .map(|row| row.into_iter().take(cols as usize).collect())
        .collect();
    EvalResult::Spilled(GridSpill::value(clipped))
}

pub fn register_builtins() {
    register_function(Arc::new(__FnFILTER));
    register_function(Arc::new(__FnSORT));
    register_function(Arc::new(__FnUNIQUE));
    register_function(Arc::new(__FnARRAY_CONSTRAIN));
}
