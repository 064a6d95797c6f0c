//! Evaluation results and the spilled-value protocol.
//!
//! A formula evaluates to either a scalar [`LiteralValue`] (errors included —
//! they are values here) or a [`SpilledValue`]: a lazily-evaluated rectangle
//! whose area is projected from whatever origin it lands on. Spilled values
//! carry behavior, not data — a small trait object produces per-offset
//! values on demand, so a `SEQUENCE(1000000)` costs nothing until someone
//! reads from it.

use std::fmt;
use std::rc::Rc;

use cellflow_common::{CellAddr, EngineError, ErrorKind, LiteralValue, RangeAddr};

use crate::interpreter::{scalar_binary, scalar_unary, EvalContext, Evaluator};

/// One axis of a spill area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extent {
    Finite(u32),
    Infinite,
}

impl Extent {
    pub fn as_finite(self) -> Option<u32> {
        match self {
            Extent::Finite(n) => Some(n),
            Extent::Infinite => None,
        }
    }

    pub fn max(self, other: Extent) -> Extent {
        match (self, other) {
            (Extent::Finite(a), Extent::Finite(b)) => Extent::Finite(a.max(b)),
            _ => Extent::Infinite,
        }
    }

    /// Offset-in-bounds check.
    pub fn contains(self, index: u32) -> bool {
        match self {
            Extent::Finite(n) => index < n,
            Extent::Infinite => true,
        }
    }
}

/// Per-offset evaluation behavior of a spilled value.
///
/// Implementations read through the evaluator lazily; nothing is
/// materialized until a consumer (or the spill-commit step) asks.
pub trait SpillEval {
    fn eval_at(
        &self,
        ev: &mut Evaluator<'_>,
        ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> EvalResult;

    /// For window-like spills with an unbounded axis: the bounds of actual
    /// content, used to clip reductions over `A:A`-style ranges. `None`
    /// means the spill cannot be clipped.
    fn content_bounds(&self, _ev: &Evaluator<'_>) -> Option<(u32, u32)> {
        None
    }
}

/// A lazily-evaluated rectangular result.
#[derive(Clone)]
pub struct SpilledValue {
    rows: Extent,
    cols: Extent,
    source: &'static str,
    eval: Rc<dyn SpillEval>,
}

impl fmt::Debug for SpilledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpilledValue")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("source", &self.source)
            .finish()
    }
}

impl SpilledValue {
    pub fn new(rows: Extent, cols: Extent, source: &'static str, eval: Rc<dyn SpillEval>) -> Self {
        SpilledValue {
            rows,
            cols,
            source,
            eval,
        }
    }

    pub fn rows(&self) -> Extent {
        self.rows
    }

    pub fn cols(&self) -> Extent {
        self.cols
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    pub fn is_finite(&self) -> bool {
        matches!(self.rows, Extent::Finite(_)) && matches!(self.cols, Extent::Finite(_))
    }

    /// Project the spill area onto an origin cell. Unbounded axes stay
    /// unbounded in the resulting range.
    pub fn spill_area(&self, origin: CellAddr) -> RangeAddr {
        RangeAddr::new(
            origin,
            self.rows.as_finite().map(|r| origin.row + r - 1),
            self.cols.as_finite().map(|c| origin.col + c - 1),
        )
    }

    pub fn in_area(&self, row: u32, col: u32) -> bool {
        self.rows.contains(row) && self.cols.contains(col)
    }

    pub fn eval_at(
        &self,
        ev: &mut Evaluator<'_>,
        ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> EvalResult {
        self.eval.eval_at(ev, ctx, row, col)
    }

    /// Scalar at an offset, collapsing any nested spill to its own origin.
    pub fn scalar_at(
        &self,
        ev: &mut Evaluator<'_>,
        ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> LiteralValue {
        if !self.in_area(row, col) {
            return LiteralValue::Error(EngineError::new(ErrorKind::Ref));
        }
        match self.eval.eval_at(ev, ctx, row, col) {
            EvalResult::Value(v) => v,
            EvalResult::Spilled(inner) => inner.scalar_at(ev, ctx, 0, 0),
        }
    }

    /// The value shown at the origin cell.
    pub fn origin_value(&self, ev: &mut Evaluator<'_>, ctx: &mut EvalContext) -> LiteralValue {
        self.scalar_at(ev, ctx, 0, 0)
    }

    pub fn content_bounds(&self, ev: &Evaluator<'_>) -> Option<(u32, u32)> {
        self.eval.content_bounds(ev)
    }

    /// Dimensions usable for iteration: finite axes as-is, unbounded axes
    /// clipped to actual content when the spill supports it.
    pub fn iter_dims(&self, ev: &Evaluator<'_>) -> Option<(u32, u32)> {
        match (self.rows.as_finite(), self.cols.as_finite()) {
            (Some(r), Some(c)) => Some((r, c)),
            (fr, fc) => {
                let (br, bc) = self.content_bounds(ev)?;
                Some((fr.unwrap_or(br), fc.unwrap_or(bc)))
            }
        }
    }
}

/// What a formula evaluates to.
#[derive(Debug, Clone)]
pub enum EvalResult {
    Value(LiteralValue),
    Spilled(SpilledValue),
}

impl EvalResult {
    pub fn error(kind: ErrorKind) -> Self {
        EvalResult::Value(LiteralValue::Error(EngineError::new(kind)))
    }

    pub fn error_msg(kind: ErrorKind, msg: impl Into<String>) -> Self {
        EvalResult::Value(LiteralValue::Error(
            EngineError::new(kind).with_message(msg),
        ))
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self, EvalResult::Spilled(_))
    }

    /// Collapse to a scalar: spilled results yield their origin value.
    pub fn into_scalar(self, ev: &mut Evaluator<'_>, ctx: &mut EvalContext) -> LiteralValue {
        match self {
            EvalResult::Value(v) => v,
            EvalResult::Spilled(s) => s.origin_value(ev, ctx),
        }
    }

    /// Scalar at an offset under broadcast pairing: plain values repeat
    /// everywhere; spilled operands answer inside their own area and yield
    /// `#REF!` outside it.
    pub fn broadcast_at(
        &self,
        ev: &mut Evaluator<'_>,
        ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> LiteralValue {
        match self {
            EvalResult::Value(v) => v.clone(),
            EvalResult::Spilled(s) => s.scalar_at(ev, ctx, row, col),
        }
    }
}

impl From<LiteralValue> for EvalResult {
    fn from(v: LiteralValue) -> Self {
        EvalResult::Value(v)
    }
}

/* ───────────────────── provided spill sources ───────────────────── */

/// Fully materialized grid (array literals, FILTER/SORT/UNIQUE results).
pub struct GridSpill {
    data: Vec<Vec<LiteralValue>>,
}

impl GridSpill {
    pub fn value(data: Vec<Vec<LiteralValue>>) -> SpilledValue {
        let rows = data.len() as u32;
        let cols = data.first().map(|r| r.len()).unwrap_or(0) as u32;
        SpilledValue::new(
            Extent::Finite(rows.max(1)),
            Extent::Finite(cols.max(1)),
            "grid",
            Rc::new(GridSpill { data }),
        )
    }
}

impl SpillEval for GridSpill {
    fn eval_at(
        &self,
        _ev: &mut Evaluator<'_>,
        _ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> EvalResult {
        EvalResult::Value(
            self.data
                .get(row as usize)
                .and_then(|r| r.get(col as usize))
                .cloned()
                .unwrap_or(LiteralValue::Empty),
        )
    }
}

/// Projection of a sheet window (range references).
pub struct WindowSpill {
    pub workbook: String,
    pub sheet: String,
    pub range: RangeAddr,
}

impl WindowSpill {
    pub fn value(workbook: String, sheet: String, range: RangeAddr) -> SpilledValue {
        let rows = match range.height() {
            Some(h) => Extent::Finite(h),
            None => Extent::Infinite,
        };
        let cols = match range.width() {
            Some(w) => Extent::Finite(w),
            None => Extent::Infinite,
        };
        SpilledValue::new(
            rows,
            cols,
            "window",
            Rc::new(WindowSpill {
                workbook,
                sheet,
                range,
            }),
        )
    }
}

impl SpillEval for WindowSpill {
    fn eval_at(
        &self,
        ev: &mut Evaluator<'_>,
        ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> EvalResult {
        let addr = match self.range.start.offset(row as i64, col as i64) {
            Some(addr) if self.range.contains(addr) => addr,
            _ => return EvalResult::error(ErrorKind::Ref),
        };
        let key = cellflow_common::CellKey::new(self.workbook.clone(), self.sheet.clone(), addr);
        EvalResult::Value(ev.read_cell_value(&key, ctx))
    }

    fn content_bounds(&self, ev: &Evaluator<'_>) -> Option<(u32, u32)> {
        let (max_row, max_col) = ev.sheet_dense_extent(&self.workbook, &self.sheet)?;
        let rows = match self.range.end_row {
            Some(er) => er.saturating_sub(self.range.start.row) + 1,
            None => {
                if max_row < self.range.start.row {
                    0
                } else {
                    max_row - self.range.start.row + 1
                }
            }
        };
        let cols = match self.range.end_col {
            Some(ec) => ec.saturating_sub(self.range.start.col) + 1,
            None => {
                if max_col < self.range.start.col {
                    0
                } else {
                    max_col - self.range.start.col + 1
                }
            }
        };
        Some((rows, cols))
    }
}

/// The same window repeated across a span of sheets, stacked vertically.
pub struct SheetStackSpill {
    pub workbook: String,
    pub sheets: Vec<String>,
    pub range: RangeAddr,
    pub layer_rows: u32,
}

impl SheetStackSpill {
    pub fn value(workbook: String, sheets: Vec<String>, range: RangeAddr) -> SpilledValue {
        let rows = match range.height() {
            Some(h) => Extent::Finite(h * sheets.len().max(1) as u32),
            None => Extent::Infinite,
        };
        let cols = match range.width() {
            Some(w) => Extent::Finite(w),
            None => Extent::Infinite,
        };
        let layer_rows = range.height().unwrap_or(0);
        SpilledValue::new(
            rows,
            cols,
            "multi-sheet",
            Rc::new(SheetStackSpill {
                workbook,
                sheets,
                range,
                layer_rows,
            }),
        )
    }
}

impl SpillEval for SheetStackSpill {
    fn eval_at(
        &self,
        ev: &mut Evaluator<'_>,
        ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> EvalResult {
        if self.layer_rows == 0 {
            return EvalResult::error(ErrorKind::Ref);
        }
        let layer = (row / self.layer_rows) as usize;
        let within = row % self.layer_rows;
        let sheet = match self.sheets.get(layer) {
            Some(s) => s.clone(),
            None => return EvalResult::error(ErrorKind::Ref),
        };
        let addr = match self.range.start.offset(within as i64, col as i64) {
            Some(addr) if self.range.contains(addr) => addr,
            _ => return EvalResult::error(ErrorKind::Ref),
        };
        let key = cellflow_common::CellKey::new(self.workbook.clone(), sheet, addr);
        EvalResult::Value(ev.read_cell_value(&key, ctx))
    }
}

/// Arithmetic generator behind `SEQUENCE`.
pub struct SequenceSpill {
    pub cols_count: u32,
    pub start: f64,
    pub step: f64,
}

impl SequenceSpill {
    pub fn value(rows: Extent, cols: u32, start: f64, step: f64) -> SpilledValue {
        SpilledValue::new(
            rows,
            Extent::Finite(cols),
            "sequence",
            Rc::new(SequenceSpill {
                cols_count: cols,
                start,
                step,
            }),
        )
    }
}

impl SpillEval for SequenceSpill {
    fn eval_at(
        &self,
        _ev: &mut Evaluator<'_>,
        _ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> EvalResult {
        let index = row as f64 * self.cols_count as f64 + col as f64;
        EvalResult::Value(LiteralValue::from_f64(self.start + index * self.step))
    }
}

/// Pointwise binary operator over the union of two operand areas.
pub struct ZipSpill {
    pub op: String,
    pub left: EvalResult,
    pub right: EvalResult,
}

impl ZipSpill {
    pub fn value(op: &str, left: EvalResult, right: EvalResult) -> SpilledValue {
        let (rows, cols) = union_dims(&[&left, &right]);
        SpilledValue::new(
            rows,
            cols,
            "broadcast",
            Rc::new(ZipSpill {
                op: op.to_string(),
                left,
                right,
            }),
        )
    }
}

impl SpillEval for ZipSpill {
    fn eval_at(
        &self,
        ev: &mut Evaluator<'_>,
        ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> EvalResult {
        let l = self.left.broadcast_at(ev, ctx, row, col);
        let r = self.right.broadcast_at(ev, ctx, row, col);
        EvalResult::Value(scalar_binary(&self.op, &l, &r))
    }
}

/// Pointwise unary operator over a spilled operand.
pub struct MapSpill {
    pub op: String,
    pub inner: SpilledValue,
}

impl MapSpill {
    pub fn value(op: &str, inner: SpilledValue) -> SpilledValue {
        let (rows, cols) = (inner.rows(), inner.cols());
        SpilledValue::new(
            rows,
            cols,
            "broadcast",
            Rc::new(MapSpill {
                op: op.to_string(),
                inner,
            }),
        )
    }
}

impl SpillEval for MapSpill {
    fn eval_at(
        &self,
        ev: &mut Evaluator<'_>,
        ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> EvalResult {
        let v = self.inner.scalar_at(ev, ctx, row, col);
        EvalResult::Value(scalar_unary(&self.op, &v))
    }
}

/// Per-offset arm selection for `IF` over spilled operands.
pub struct CondSpill {
    pub test: EvalResult,
    pub then_v: EvalResult,
    pub else_v: EvalResult,
}

impl CondSpill {
    pub fn value(test: EvalResult, then_v: EvalResult, else_v: EvalResult) -> SpilledValue {
        let (rows, cols) = union_dims(&[&test, &then_v, &else_v]);
        SpilledValue::new(
            rows,
            cols,
            "conditional",
            Rc::new(CondSpill {
                test,
                then_v,
                else_v,
            }),
        )
    }
}

impl SpillEval for CondSpill {
    fn eval_at(
        &self,
        ev: &mut Evaluator<'_>,
        ctx: &mut EvalContext,
        row: u32,
        col: u32,
    ) -> EvalResult {
        let t = self.test.broadcast_at(ev, ctx, row, col);
        if let LiteralValue::Error(_) = t {
            return EvalResult::Value(t);
        }
        let arm = if t.is_truthy() {
            &self.then_v
        } else {
            &self.else_v
        };
        EvalResult::Value(arm.broadcast_at(ev, ctx, row, col))
    }
}

/// Union of operand areas: the broadcast result covers every offset either
/// operand covers; scalar operands contribute a 1×1 area.
pub fn union_dims(operands: &[&EvalResult]) -> (Extent, Extent) {
    let mut rows = Extent::Finite(1);
    let mut cols = Extent::Finite(1);
    for op in operands {
        if let EvalResult::Spilled(s) = op {
            rows = rows.max(s.rows());
            cols = cols.max(s.cols());
        }
    }
    (rows, cols)
}
