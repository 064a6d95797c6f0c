//! The evaluator: AST dispatch, scalar operators with broadcasting, lazy
//! cell reads with cycle detection, and spill materialization.
//!
//! Single-threaded and cooperative. Formula errors are values; the only
//! backstop is the recursion budget, which turns runaway nesting into
//! `#ERROR!` instead of a stack overflow.

use cellflow_common::{CellAddr, CellKey, EngineError, ErrorKind, LiteralValue, RangeAddr};
use cellflow_parse::parser::{
    AstKind, AstNode, RangeEnd, ReferenceType, TableSpecifier,
};
use rustc_hash::FxHashSet;

use crate::engine::graph::{DependencyGraph, DependencyNode, NameScope, SheetSelector, TableArea};
use crate::engine::spill::{SpillRecord, SpillRegistry};
use crate::engine::store::StateStore;
use crate::engine::EngineConfig;
use crate::eval::{EvalResult, GridSpill, MapSpill, SheetStackSpill, WindowSpill, ZipSpill};
use crate::traits::{coerce_number, coerce_text, FnCtx, FunctionProvider};

/* ───────────────────── evaluation context ───────────────────── */

/// Per-invocation state threaded through one top-level evaluation.
pub struct EvalContext {
    /// The cell whose formula is being evaluated.
    pub current: CellKey,
    /// Node keys currently being evaluated; re-entry means a cycle.
    pub stack: Vec<String>,
    /// Dependency accumulator for `current`.
    pub deps: Vec<DependencyNode>,
    /// Expression-nesting depth, bounded by the recursion budget.
    pub depth: usize,
}

impl EvalContext {
    pub fn new(current: CellKey) -> Self {
        EvalContext {
            current,
            stack: Vec::new(),
            deps: Vec::new(),
            depth: 0,
        }
    }
}

/* ───────────────────── the evaluator ───────────────────── */

pub struct Evaluator<'e> {
    pub store: &'e mut StateStore,
    pub graph: &'e mut DependencyGraph,
    pub spills: &'e mut SpillRegistry,
    pub funcs: &'e dyn FunctionProvider,
    pub config: &'e EngineConfig,
    /// Cells whose computed (or spilled) value was set during this
    /// operation. The engine diffs against pre-operation values for events.
    changed: Vec<CellKey>,
    changed_set: FxHashSet<CellKey>,
}

fn err_value(kind: ErrorKind) -> LiteralValue {
    LiteralValue::Error(EngineError::new(kind))
}

impl<'e> Evaluator<'e> {
    pub fn new(
        store: &'e mut StateStore,
        graph: &'e mut DependencyGraph,
        spills: &'e mut SpillRegistry,
        funcs: &'e dyn FunctionProvider,
        config: &'e EngineConfig,
    ) -> Self {
        Evaluator {
            store,
            graph,
            spills,
            funcs,
            config,
            changed: Vec::new(),
            changed_set: FxHashSet::default(),
        }
    }

    pub fn take_changed(&mut self) -> Vec<CellKey> {
        self.changed_set.clear();
        std::mem::take(&mut self.changed)
    }

    /// Position marker into the changed-cell log; pair with
    /// [`changed_since`](Self::changed_since) to see what one evaluation
    /// touched.
    pub fn change_mark(&self) -> usize {
        self.changed.len()
    }

    pub fn changed_since(&self, mark: usize) -> &[CellKey] {
        &self.changed[mark..]
    }

    fn note_changed(&mut self, key: CellKey) {
        if self.changed_set.insert(key.clone()) {
            self.changed.push(key);
        }
    }

    /// Dense extent of a sheet including cells occupied by live spills;
    /// bounds reductions over open-ended ranges.
    pub fn sheet_dense_extent(&self, workbook: &str, sheet: &str) -> Option<(u32, u32)> {
        let mut max = self.store.dense_extent(workbook, sheet);
        for origin in self.spills.live_origins() {
            if origin.workbook.eq_ignore_ascii_case(workbook)
                && origin.sheet.eq_ignore_ascii_case(sheet)
            {
                if let Some(record) = self.spills.record(origin) {
                    if let (Some(er), Some(ec)) = (record.range.end_row, record.range.end_col) {
                        max = Some(match max {
                            None => (er, ec),
                            Some((r, c)) => (r.max(er), c.max(ec)),
                        });
                    }
                }
            }
        }
        max
    }

    /* ───────────── cell reads ───────────── */

    /// The computed value of a cell, evaluating lazily if cold. `key` must
    /// be canonical. Absent cells read `Empty` unless a live spill covers
    /// them.
    pub fn read_cell_value(&mut self, key: &CellKey, ctx: &mut EvalContext) -> LiteralValue {
        if let Some(v) = self.store.cell(key).and_then(|c| c.computed.clone()) {
            return v;
        }
        if self.store.cell(key).is_some() {
            return self.evaluate_cell(key, ctx);
        }
        if let Some(v) = self.spills.value_at(key) {
            return v;
        }
        LiteralValue::Empty
    }

    /// Evaluate a cell from its serialized content, committing edges, the
    /// computed cache, and any spill. `key` must be canonical and present.
    pub fn evaluate_cell(&mut self, key: &CellKey, ctx: &mut EvalContext) -> LiteralValue {
        let node = DependencyNode::cell(key);
        let node_key = node.encode();
        if ctx.stack.iter().any(|k| k == &node_key) {
            return err_value(ErrorKind::Cycle);
        }
        if ctx.stack.len() >= self.config.recursion_budget {
            return err_value(ErrorKind::Error);
        }

        let (is_formula, literal) = match self.store.cell(key) {
            Some(cell) => (cell.content.is_formula(), cell.content.literal()),
            None => return LiteralValue::Empty,
        };

        if !is_formula {
            let value = literal.unwrap_or(LiteralValue::Empty);
            if let Some(cell) = self.store.cell_mut(key) {
                cell.computed = Some(value.clone());
            }
            self.note_changed(key.clone());
            return value;
        }

        let ast = match self.store.cell_mut(key) {
            Some(cell) => cell.ensure_ast(),
            None => return LiteralValue::Empty,
        };

        ctx.stack.push(node_key.clone());
        let saved_current = std::mem::replace(&mut ctx.current, key.clone());
        let saved_deps = std::mem::take(&mut ctx.deps);
        let saved_depth = std::mem::replace(&mut ctx.depth, 0);

        let result = self.eval_ast(&ast, ctx);

        // commit the traced dependency set
        let deps = std::mem::take(&mut ctx.deps);
        self.graph.clear_precedents(&node_key);
        for dep in &deps {
            self.graph.add_edge(&node, dep);
        }

        let value = match result {
            EvalResult::Value(v) => {
                self.retract_spill(key);
                self.spills.clear_blocked(key);
                v
            }
            EvalResult::Spilled(spilled) => self.commit_spill(key, spilled, ctx),
        };

        ctx.current = saved_current;
        ctx.deps = saved_deps;
        ctx.depth = saved_depth;
        ctx.stack.pop();

        if let Some(cell) = self.store.cell_mut(key) {
            cell.computed = Some(value.clone());
        }
        self.note_changed(key.clone());
        value
    }

    fn retract_spill(&mut self, origin: &CellKey) {
        for cell in self.spills.retract(origin) {
            if cell != *origin {
                self.note_changed(cell);
            }
        }
    }

    /* ───────────── spill materialization ───────────── */

    /// Materialize a top-level spilled result at its origin.
    fn commit_spill(
        &mut self,
        origin: &CellKey,
        spilled: crate::eval::SpilledValue,
        ctx: &mut EvalContext,
    ) -> LiteralValue {
        // Unbounded results never materialize: the origin shows the origin
        // value and the area is left to windowed consumers.
        if !spilled.is_finite() {
            self.retract_spill(origin);
            self.spills.clear_blocked(origin);
            return spilled.origin_value(self, ctx);
        }

        let rows = spilled.rows().as_finite().unwrap_or(1).max(1);
        let cols = spilled.cols().as_finite().unwrap_or(1).max(1);

        if rows as u64 * cols as u64 > self.config.max_spill_cells {
            self.retract_spill(origin);
            self.spills.clear_blocked(origin);
            return LiteralValue::Error(
                EngineError::new(ErrorKind::Spill).with_message("result exceeds the spill limit"),
            );
        }

        if rows == 1 && cols == 1 {
            self.retract_spill(origin);
            self.spills.clear_blocked(origin);
            return spilled.origin_value(self, ctx);
        }

        let area = spilled.spill_area(origin.addr);

        // obstruction scan: any non-origin cell with user content, or a
        // cell claimed by a different live spill
        let mut obstructed = false;
        if let Ok(iter) = area.iter_finite() {
            for addr in iter {
                if addr == origin.addr {
                    continue;
                }
                let cell_key = CellKey::new(origin.workbook.clone(), origin.sheet.clone(), addr);
                if self.store.cell(&cell_key).is_some() {
                    obstructed = true;
                    break;
                }
                if let Some(other) = self.spills.origin_of(&cell_key) {
                    if other != origin {
                        obstructed = true;
                        break;
                    }
                }
            }
        }

        if obstructed {
            for cell in self.spills.retract(origin) {
                if cell != *origin {
                    self.note_changed(cell);
                }
            }
            self.spills.mark_blocked(origin.clone(), area);
            return LiteralValue::Error(
                EngineError::new(ErrorKind::Spill).with_message("spill area is obstructed"),
            );
        }

        let mut values = Vec::with_capacity(rows as usize);
        for r in 0..rows {
            let mut row = Vec::with_capacity(cols as usize);
            for c in 0..cols {
                row.push(spilled.scalar_at(self, ctx, r, c));
            }
            values.push(row);
        }
        let origin_value = values[0][0].clone();

        let old_cells: FxHashSet<CellKey> = self
            .spills
            .record(origin)
            .map(|r| r.cells().into_iter().collect())
            .unwrap_or_default();

        let record = SpillRecord {
            origin: origin.clone(),
            range: area,
            values,
        };
        let new_cells = self.spills.commit(record);
        for cell in old_cells {
            if !new_cells.contains(&cell) && cell != *origin {
                self.note_changed(cell);
            }
        }
        for cell in new_cells {
            if cell != *origin {
                self.note_changed(cell);
            }
        }

        origin_value
    }

    /* ───────────── AST dispatch ───────────── */

    pub fn eval_ast(&mut self, node: &AstNode, ctx: &mut EvalContext) -> EvalResult {
        if ctx.depth >= self.config.recursion_budget {
            return EvalResult::error_msg(ErrorKind::Error, "recursion budget exceeded");
        }
        ctx.depth += 1;
        let result = match &node.kind {
            AstKind::Literal(v) => EvalResult::Value(v.clone()),
            AstKind::Invalid { .. } => EvalResult::error(ErrorKind::Error),
            AstKind::Reference(reference) => self.eval_reference(reference, ctx),
            AstKind::UnaryOp { op, expr } => {
                let operand = self.eval_ast(expr, ctx);
                self.evaluate_scalar_unary(op, operand)
            }
            AstKind::BinaryOp { op, left, right } => {
                let l = self.eval_ast(left, ctx);
                let r = self.eval_ast(right, ctx);
                self.evaluate_scalar_operator(op, l, r)
            }
            AstKind::Function { name, args } => self.eval_function(name, args, ctx),
            AstKind::Array(rows) => self.eval_array_literal(rows, ctx),
        };
        ctx.depth -= 1;
        result
    }

    /// Broadcasting for binary operators: (V,V) stays scalar; any spilled
    /// operand lifts the operation over the union of areas, pairing offsets
    /// and yielding `#REF!` where one side has no cell.
    pub fn evaluate_scalar_operator(&mut self, op: &str, left: EvalResult, right: EvalResult) -> EvalResult {
        if let EvalResult::Value(v @ LiteralValue::Error(_)) = &left {
            return EvalResult::Value(v.clone());
        }
        if let EvalResult::Value(v @ LiteralValue::Error(_)) = &right {
            return EvalResult::Value(v.clone());
        }
        match (left, right) {
            (EvalResult::Value(l), EvalResult::Value(r)) => {
                EvalResult::Value(scalar_binary(op, &l, &r))
            }
            (left, right) => EvalResult::Spilled(ZipSpill::value(op, left, right)),
        }
    }

    pub fn evaluate_scalar_unary(&mut self, op: &str, operand: EvalResult) -> EvalResult {
        match operand {
            EvalResult::Value(v) => EvalResult::Value(scalar_unary(op, &v)),
            EvalResult::Spilled(s) => EvalResult::Spilled(MapSpill::value(op, s)),
        }
    }

    fn eval_array_literal(&mut self, rows: &[Vec<AstNode>], ctx: &mut EvalContext) -> EvalResult {
        let mut data = Vec::with_capacity(rows.len());
        for row in rows {
            let mut out = Vec::with_capacity(row.len());
            for item in row {
                let v = self.eval_ast(item, ctx).into_scalar(self, ctx);
                out.push(v);
            }
            data.push(out);
        }
        EvalResult::Spilled(GridSpill::value(data))
    }

    fn eval_function(&mut self, name: &str, args: &[AstNode], ctx: &mut EvalContext) -> EvalResult {
        let function = match self.funcs.get_function(name) {
            Some(f) => f,
            None => {
                return EvalResult::Value(LiteralValue::Error(
                    EngineError::new(ErrorKind::Name)
                        .with_message(format!("unknown function {name}")),
                ))
            }
        };
        if args.len() < function.min_args() {
            return EvalResult::Value(LiteralValue::Error(
                EngineError::new(ErrorKind::Value)
                    .with_message(format!("{name} expects at least {} arguments", function.min_args())),
            ));
        }
        let mut inv = FnCtx {
            args,
            ev: self,
            ctx,
        };
        function.eval(&mut inv)
    }

    /* ───────────── references ───────────── */

    fn resolve_sheet_context(
        &self,
        workbook: &Option<String>,
        sheet: &Option<String>,
        ctx: &EvalContext,
    ) -> Option<cellflow_common::SheetKey> {
        let wb = workbook.as_deref().unwrap_or(&ctx.current.workbook);
        let sheet = sheet.as_deref().unwrap_or(&ctx.current.sheet);
        self.store.canonical_sheet(wb, sheet)
    }

    fn eval_reference(&mut self, reference: &ReferenceType, ctx: &mut EvalContext) -> EvalResult {
        match reference {
            ReferenceType::Cell {
                workbook,
                sheet,
                addr,
            } => {
                let canon = match self.resolve_sheet_context(workbook, sheet, ctx) {
                    Some(c) => c,
                    None => return EvalResult::error(ErrorKind::Ref),
                };
                let key = CellKey::new(canon.workbook, canon.sheet, addr.addr);
                ctx.deps.push(DependencyNode::cell(&key));
                EvalResult::Value(self.read_cell_value(&key, ctx))
            }
            ReferenceType::Range {
                workbook,
                sheet,
                start,
                end,
            } => {
                let canon = match self.resolve_sheet_context(workbook, sheet, ctx) {
                    Some(c) => c,
                    None => return EvalResult::error(ErrorKind::Ref),
                };
                let range = normalize_range(start.addr, end);
                ctx.deps.push(DependencyNode::Range {
                    workbook: canon.workbook.clone(),
                    sheet: canon.sheet.clone(),
                    range,
                });
                EvalResult::Spilled(WindowSpill::value(canon.workbook, canon.sheet, range))
            }
            ReferenceType::MultiSheetRange {
                workbook,
                sheet_start,
                sheet_end,
                start,
                end,
            } => {
                let wb = workbook.as_deref().unwrap_or(&ctx.current.workbook);
                let wb = match self.store.canonical_workbook(wb) {
                    Some(wb) => wb,
                    None => return EvalResult::error(ErrorKind::Ref),
                };
                let sheets = match self.store.sheet_span(&wb, sheet_start, sheet_end) {
                    Some(s) => s,
                    None => return EvalResult::error(ErrorKind::Ref),
                };
                let range = normalize_range(start.addr, end);
                let first = sheets.first().cloned().unwrap_or_default();
                let last = sheets.last().cloned().unwrap_or_default();
                ctx.deps.push(DependencyNode::MultiSheetRange {
                    workbook: wb.clone(),
                    selector: SheetSelector::Span(first, last),
                    range,
                });
                EvalResult::Spilled(SheetStackSpill::value(wb, sheets, range))
            }
            ReferenceType::Named {
                workbook,
                qualifier,
                name,
            } => self.eval_named(workbook.as_deref(), qualifier.as_deref(), name, ctx),
            ReferenceType::Table(table_ref) => {
                self.eval_structured(&table_ref.name, table_ref.specifier.as_ref(), ctx)
            }
        }
    }

    /// Named-expression resolution: the four-scenario search, each scenario
    /// falling back up the scope chain.
    fn eval_named(
        &mut self,
        workbook: Option<&str>,
        qualifier: Option<&str>,
        name: &str,
        ctx: &mut EvalContext,
    ) -> EvalResult {
        let resolved: Option<(NameScope, String)> = match (workbook, qualifier) {
            (None, None) => self
                .store
                .names
                .resolve_from(&ctx.current.workbook, &ctx.current.sheet, name)
                .map(|(scope, n)| (scope, n.name.clone())),
            (None, Some(q)) => {
                if let Some(wb) = self.store.canonical_workbook(q) {
                    self.resolve_in_workbook_chain(&wb, name)
                } else if let Some(canon) = self.store.canonical_sheet(&ctx.current.workbook, q) {
                    self.store
                        .names
                        .resolve_from(&canon.workbook, &canon.sheet, name)
                        .map(|(scope, n)| (scope, n.name.clone()))
                } else {
                    None
                }
            }
            (Some(wb), Some(q)) => match self.store.canonical_sheet(wb, q) {
                Some(canon) => self
                    .store
                    .names
                    .resolve_from(&canon.workbook, &canon.sheet, name)
                    .map(|(scope, n)| (scope, n.name.clone())),
                None => None,
            },
            (Some(wb), None) => match self.store.canonical_workbook(wb) {
                Some(wb) => self.resolve_in_workbook_chain(&wb, name),
                None => None,
            },
        };

        let (scope, canonical_name) = match resolved {
            Some(r) => r,
            None => {
                return EvalResult::Value(LiteralValue::Error(
                    EngineError::new(ErrorKind::Name)
                        .with_message(format!("unknown name {name}")),
                ))
            }
        };

        let dep = DependencyNode::Named {
            scope: scope.clone(),
            name: canonical_name.clone(),
        };
        let named_key = dep.encode();
        ctx.deps.push(dep);

        if ctx.stack.iter().any(|k| k == &named_key) {
            return EvalResult::error(ErrorKind::Cycle);
        }

        let ast = match self.store.names.get_mut(&scope, &canonical_name) {
            Some(expr) => expr.ensure_ast(),
            None => return EvalResult::error(ErrorKind::Name),
        };

        // The named expression's precedents become edges from the
        // referencing cell: same deps accumulator, same current cell.
        ctx.stack.push(named_key);
        let result = self.eval_ast(&ast, ctx);
        ctx.stack.pop();
        result
    }

    fn resolve_in_workbook_chain(&self, workbook: &str, name: &str) -> Option<(NameScope, String)> {
        let wb_scope = NameScope::Workbook(workbook.to_string());
        if let Some(n) = self.store.names.get(&wb_scope, name) {
            return Some((wb_scope, n.name.clone()));
        }
        self.store
            .names
            .get(&NameScope::Global, name)
            .map(|n| (NameScope::Global, n.name.clone()))
    }

    /// Structured references resolve against the named table's current
    /// bounding box, with `[@col]` narrowing to the referencing row.
    fn eval_structured(
        &mut self,
        table_name: &str,
        specifier: Option<&TableSpecifier>,
        ctx: &mut EvalContext,
    ) -> EvalResult {
        let table = match self.store.tables.get(table_name) {
            Some(t) => t.clone(),
            None => return EvalResult::error(ErrorKind::Ref),
        };

        let current_row = ctx.current.addr.row;
        let (area, wants_current_row) = match structured_area(specifier, current_row) {
            Ok(pair) => pair,
            Err(kind) => return EvalResult::error(kind),
        };

        let range = match table.resolve_area(&area) {
            Some(range) => range,
            None => {
                // missing column → #REF!; current row outside the data
                // region → #VALUE!
                let kind = if wants_current_row {
                    ErrorKind::Value
                } else {
                    ErrorKind::Ref
                };
                return EvalResult::error(kind);
            }
        };

        ctx.deps.push(DependencyNode::Table {
            workbook: table.workbook.clone(),
            sheet: table.sheet.clone(),
            table: table.name.clone(),
            area,
        });

        if range.cell_count() == Some(1) {
            let key = CellKey::new(table.workbook, table.sheet, range.start);
            return EvalResult::Value(self.read_cell_value(&key, ctx));
        }
        EvalResult::Spilled(WindowSpill::value(table.workbook, table.sheet, range))
    }
}

/// Map a parsed table specifier onto a dependency area. The bool reports
/// whether the specifier narrows to the current row (affects the error kind
/// when resolution fails).
fn structured_area(
    specifier: Option<&TableSpecifier>,
    current_row: u32,
) -> Result<(TableArea, bool), ErrorKind> {
    let area = match specifier {
        None => TableArea::AllData,
        Some(TableSpecifier::All) => TableArea::All,
        Some(TableSpecifier::Data) => TableArea::AllData,
        Some(TableSpecifier::Headers) => TableArea::Headers,
        Some(TableSpecifier::Column(c)) => TableArea::Data {
            cols: vec![c.clone()],
            current_row: None,
        },
        Some(TableSpecifier::ColumnRange(a, b)) => TableArea::Data {
            cols: vec![a.clone(), b.clone()],
            current_row: None,
        },
        Some(TableSpecifier::CurrentRow) => {
            return Ok((
                TableArea::Data {
                    cols: Vec::new(),
                    current_row: Some(current_row),
                },
                true,
            ))
        }
        Some(TableSpecifier::CurrentRowColumn(c)) => {
            return Ok((
                TableArea::Data {
                    cols: vec![c.clone()],
                    current_row: Some(current_row),
                },
                true,
            ))
        }
        Some(TableSpecifier::Combination(parts)) => {
            let mut headers = false;
            let mut all = false;
            let mut this_row = false;
            let mut cols: Vec<String> = Vec::new();
            for part in parts {
                match part {
                    TableSpecifier::Headers => headers = true,
                    TableSpecifier::All => all = true,
                    TableSpecifier::Data => {}
                    TableSpecifier::CurrentRow => this_row = true,
                    TableSpecifier::Column(c) => cols.push(c.clone()),
                    TableSpecifier::ColumnRange(a, b) => {
                        cols.push(a.clone());
                        cols.push(b.clone());
                    }
                    TableSpecifier::CurrentRowColumn(c) => {
                        this_row = true;
                        cols.push(c.clone());
                    }
                    TableSpecifier::Combination(_) => return Err(ErrorKind::Ref),
                }
            }
            if all {
                // column narrowing over #All is not supported
                return Ok((TableArea::All, false));
            }
            if headers {
                if cols.is_empty() {
                    return Ok((TableArea::Headers, false));
                }
                // [[#Headers],[col]] — the header cells of those columns;
                // the Headers area is the dependency surface
                return Ok((TableArea::Headers, false));
            }
            return Ok((
                TableArea::Data {
                    cols,
                    current_row: if this_row { Some(current_row) } else { None },
                },
                this_row,
            ));
        }
    };
    Ok((area, false))
}

/// Normalize a parsed range into engine form: anchors dropped, finite axes
/// ordered start ≤ end.
pub fn normalize_range(start: CellAddr, end: &RangeEnd) -> RangeAddr {
    let mut start_row = start.row;
    let mut start_col = start.col;
    let end_row = end.row.map(|(r, _)| r);
    let end_col = end.col.map(|(c, _)| c);
    let end_row = match end_row {
        Some(er) => {
            if er < start_row {
                let tmp = start_row;
                start_row = er;
                Some(tmp)
            } else {
                Some(er)
            }
        }
        None => None,
    };
    let end_col = match end_col {
        Some(ec) => {
            if ec < start_col {
                let tmp = start_col;
                start_col = ec;
                Some(tmp)
            } else {
                Some(ec)
            }
        }
        None => None,
    };
    RangeAddr::new(CellAddr::new(start_row, start_col), end_row, end_col)
}

/* ───────────────────── scalar operator core ───────────────────── */

/// The pure scalar heart every operator (and its `FE.*` registry wrapper)
/// routes through. Errors propagate left-first.
pub fn scalar_binary(op: &str, left: &LiteralValue, right: &LiteralValue) -> LiteralValue {
    if let LiteralValue::Error(_) = left {
        return left.clone();
    }
    if let LiteralValue::Error(_) = right {
        return right.clone();
    }

    match op {
        "+" | "-" | "*" => numeric_binary(op, left, right),
        "/" => {
            let denom = match coerce_number(right) {
                Ok(n) => n,
                Err(e) => return LiteralValue::Error(e),
            };
            if denom == 0.0 {
                return err_value(ErrorKind::Div0);
            }
            let num = match coerce_number(left) {
                Ok(n) => n,
                Err(e) => return LiteralValue::Error(e),
            };
            LiteralValue::from_f64(num / denom)
        }
        "^" => {
            let (a, b) = match (coerce_number(left), coerce_number(right)) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return LiteralValue::Error(e),
            };
            if a < 0.0 && b.fract() != 0.0 {
                return err_value(ErrorKind::Num);
            }
            let out = a.powf(b);
            if out.is_nan() {
                return err_value(ErrorKind::Num);
            }
            LiteralValue::from_f64(out)
        }
        "&" => LiteralValue::Text(format!("{}{}", coerce_text(left), coerce_text(right))),
        "=" | "<>" | "<" | "<=" | ">" | ">=" => compare(op, left, right),
        other => LiteralValue::Error(
            EngineError::new(ErrorKind::Error).with_message(format!("unknown operator '{other}'")),
        ),
    }
}

fn numeric_binary(op: &str, left: &LiteralValue, right: &LiteralValue) -> LiteralValue {
    let (a, b) = match (coerce_number(left), coerce_number(right)) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => return LiteralValue::Error(e),
    };
    let out = match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        _ => unreachable!("numeric_binary only sees + - *"),
    };
    LiteralValue::from_f64(out)
}

pub fn scalar_unary(op: &str, v: &LiteralValue) -> LiteralValue {
    if let LiteralValue::Error(_) = v {
        return v.clone();
    }
    let n = match coerce_number(v) {
        Ok(n) => n,
        Err(e) => return LiteralValue::Error(e),
    };
    match op {
        "+" => LiteralValue::from_f64(n),
        "-" => LiteralValue::from_f64(-n),
        "%" => LiteralValue::from_f64(n / 100.0),
        other => LiteralValue::Error(
            EngineError::new(ErrorKind::Error).with_message(format!("unknown operator '{other}'")),
        ),
    }
}

/// Comparisons: numeric when both sides coerce, case-insensitive text
/// otherwise; booleans compare as 0/1.
fn compare(op: &str, left: &LiteralValue, right: &LiteralValue) -> LiteralValue {
    use std::cmp::Ordering;

    let ordering = match (coerce_number(left), coerce_number(right)) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b),
        _ => {
            let a = coerce_text(left).to_lowercase();
            let b = coerce_text(right).to_lowercase();
            Some(a.cmp(&b))
        }
    };

    let ordering = match ordering {
        Some(o) => o,
        None => return err_value(ErrorKind::Num),
    };

    let result = match op {
        "=" => ordering == Ordering::Equal,
        "<>" => ordering != Ordering::Equal,
        "<" => ordering == Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        ">" => ordering == Ordering::Greater,
        ">=" => ordering != Ordering::Less,
        _ => unreachable!("compare only sees comparison operators"),
    };
    LiteralValue::Boolean(result)
}
