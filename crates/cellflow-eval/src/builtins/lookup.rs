//! Lookup and reference functions.

use std::cmp::Ordering;
use std::sync::Arc;

use cellflow_common::{CellKey, EngineError, ErrorKind, LiteralValue, RangeAddr};
use cellflow_macros::sheet_fn;
use cellflow_parse::parser::{AstKind, ReferenceType};

use super::try_val;
use crate::engine::graph::DependencyNode;
use crate::eval::{EvalResult, WindowSpill};
use crate::function_registry::register_function;
use crate::interpreter::normalize_range;
use crate::traits::FnCtx;

fn error(kind: ErrorKind) -> EvalResult {
    EvalResult::Value(LiteralValue::Error(EngineError::new(kind)))
}

/// Compare two cell values for lookup purposes: numbers numerically, text
/// case-insensitively, booleans as 0/1; mixed types do not compare.
fn lookup_cmp(a: &LiteralValue, b: &LiteralValue) -> Option<Ordering> {
    match (a, b) {
        (LiteralValue::Text(x), LiteralValue::Text(y)) => {
            Some(x.to_lowercase().cmp(&y.to_lowercase()))
        }
        (LiteralValue::Text(_), _) | (_, LiteralValue::Text(_)) => None,
        _ => {
            let x = a.as_f64()?;
            let y = b.as_f64()?;
            x.partial_cmp(&y)
        }
    }
}

#[sheet_fn(name = "INDEX", min = 2, arg_types = "range,number,number")]
pub fn index_fn(inv: &mut FnCtx) -> EvalResult {
    let grid = try_val!(inv.grid(0));
    let row = try_val!(inv.number(1));
    let col = try_val!(inv.number_or(2, 1.0));
    if row < 1.0 || col < 1.0 {
        return error(ErrorKind::Value);
    }
    match grid
        .get(row as usize - 1)
        .and_then(|r| r.get(col as usize - 1))
    {
        Some(v) => EvalResult::Value(v.clone()),
        None => error(ErrorKind::Ref),
    }
}

#[sheet_fn(name = "MATCH", min = 2, arg_types = "any,range,number")]
pub fn match_fn(inv: &mut FnCtx) -> EvalResult {
    let needle = inv.value(0);
    if needle.is_error() {
        return EvalResult::Value(needle);
    }
    let haystack = try_val!(inv.flatten(1));
    let match_type = try_val!(inv.number_or(2, 1.0));

    if match_type == 0.0 {
        for (i, v) in haystack.iter().enumerate() {
            if lookup_cmp(v, &needle) == Some(Ordering::Equal) {
                return EvalResult::Value(LiteralValue::Number(i as f64 + 1.0));
            }
        }
        return error(ErrorKind::Na);
    }

    // 1: largest value ≤ needle (ascending); -1: smallest value ≥ needle
    let mut best: Option<usize> = None;
    for (i, v) in haystack.iter().enumerate() {
        let ord = match lookup_cmp(v, &needle) {
            Some(o) => o,
            None => continue,
        };
        let keep = if match_type > 0.0 {
            ord != Ordering::Greater
        } else {
            ord != Ordering::Less
        };
        if keep {
            best = Some(i);
        } else if match_type > 0.0 {
            break;
        }
    }
    match best {
        Some(i) => EvalResult::Value(LiteralValue::Number(i as f64 + 1.0)),
        None => error(ErrorKind::Na),
    }
}

#[sheet_fn(name = "VLOOKUP", min = 3, arg_types = "any,range,number,logical")]
pub fn vlookup_fn(inv: &mut FnCtx) -> EvalResult {
    let needle = inv.value(0);
    if needle.is_error() {
        return EvalResult::Value(needle);
    }
    let grid = try_val!(inv.grid(1));
    let col = try_val!(inv.number(2));
    if col < 1.0 {
        return error(ErrorKind::Value);
    }
    let col = col as usize - 1;
    if grid.first().map(|r| r.len()).unwrap_or(0) <= col {
        return error(ErrorKind::Ref);
    }
    let approximate = match inv.value(3) {
        LiteralValue::Empty => true,
        LiteralValue::Error(e) => return EvalResult::Value(LiteralValue::Error(e)),
        v => v.is_truthy(),
    };

    if !approximate {
        for row in &grid {
            if lookup_cmp(&row[0], &needle) == Some(Ordering::Equal) {
                return EvalResult::Value(row[col].clone());
            }
        }
        return error(ErrorKind::Na);
    }

    // approximate: last row whose first column is ≤ needle (ascending data)
    let mut best: Option<&Vec<LiteralValue>> = None;
    for row in &grid {
        match lookup_cmp(&row[0], &needle) {
            Some(Ordering::Greater) => break,
            Some(_) => best = Some(row),
            None => continue,
        }
    }
    match best {
        Some(row) => EvalResult::Value(row[col].clone()),
        None => error(ErrorKind::Na),
    }
}

/// Resolve a reference argument to its (workbook, sheet, range) without
/// evaluating it — `OFFSET` works on the reference itself.
fn reference_window(
    inv: &mut FnCtx,
    index: usize,
) -> Result<(String, String, RangeAddr), EvalResult> {
    let reference = match inv.ast(index).map(|n| &n.kind) {
        Some(AstKind::Reference(r)) => r.clone(),
        _ => return Err(error(ErrorKind::Ref)),
    };
    let (workbook, sheet, range) = match reference {
        ReferenceType::Cell {
            workbook,
            sheet,
            addr,
        } => (workbook, sheet, RangeAddr::single(addr.addr)),
        ReferenceType::Range {
            workbook,
            sheet,
            start,
            end,
        } => (workbook, sheet, normalize_range(start.addr, &end)),
        _ => return Err(error(ErrorKind::Ref)),
    };
    let wb = workbook.as_deref().unwrap_or(&inv.ctx.current.workbook);
    let s = sheet.as_deref().unwrap_or(&inv.ctx.current.sheet);
    match inv.ev.store.canonical_sheet(wb, s) {
        Some(canon) => Ok((canon.workbook, canon.sheet, range)),
        None => Err(error(ErrorKind::Ref)),
    }
}

/// `OFFSET(reference, rows, cols, height?, width?)` — a shifted window over
/// the sheet; the dependency tracks the *shifted* range.
#[sheet_fn(name = "OFFSET", min = 3, arg_types = "range,number,number,number,number")]
pub fn offset_fn(inv: &mut FnCtx) -> EvalResult {
    let (workbook, sheet, base) = match reference_window(inv, 0) {
        Ok(w) => w,
        Err(e) => return e,
    };
    let rows = try_val!(inv.number(1));
    let cols = try_val!(inv.number(2));

    let start = match base.start.offset(rows.trunc() as i64, cols.trunc() as i64) {
        Some(addr) => addr,
        None => return error(ErrorKind::Ref),
    };

    let height = match inv.value(3) {
        LiteralValue::Empty => match base.height() {
            Some(h) => h,
            None => return error(ErrorKind::Ref),
        },
        LiteralValue::Error(e) => return EvalResult::Value(LiteralValue::Error(e)),
        v => match v.as_f64() {
            Some(h) if h >= 1.0 => h.trunc() as u32,
            _ => return error(ErrorKind::Ref),
        },
    };
    let width = match inv.value(4) {
        LiteralValue::Empty => match base.width() {
            Some(w) => w,
            None => return error(ErrorKind::Ref),
        },
        LiteralValue::Error(e) => return EvalResult::Value(LiteralValue::Error(e)),
        v => match v.as_f64() {
            Some(w) if w >= 1.0 => w.trunc() as u32,
            _ => return error(ErrorKind::Ref),
        },
    };

    let range = RangeAddr::new(
        start,
        Some(start.row + height - 1),
        Some(start.col + width - 1),
    );
    inv.ctx.deps.push(DependencyNode::Range {
        workbook: workbook.clone(),
        sheet: sheet.clone(),
        range,
    });

    if range.cell_count() == Some(1) {
        let key = CellKey::new(workbook, sheet, range.start);
        let v = inv.ev.read_cell_value(&key, inv.ctx);
        return EvalResult::Value(v);
    }
    EvalResult::Spilled(WindowSpill::value(workbook, sheet, range))
}

pub fn register_builtins() {
    register_function(Arc::new(__FnINDEX));
    register_function(Arc::new(__FnMATCH));
    register_function(Arc::new(__FnVLOOKUP));
    register_function(Arc::new(__FnOFFSET));
}
