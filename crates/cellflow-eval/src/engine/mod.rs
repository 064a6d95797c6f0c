//! The engine facade: CRUD surface, the incremental update driver, and the
//! event fabric wiring.
//!
//! Every top-level operation runs to completion atomically from the
//! caller's perspective: state updates first, then the cascade, then one
//! batched `cells-updated` event per affected sheet.

pub mod events;
pub mod graph;
pub mod names;
pub mod snapshot;
pub mod spill;
pub mod store;
pub mod tables;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use cellflow_common::{CellAddr, CellKey, LiteralValue, SheetKey};
use cellflow_parse::parser::ReferenceType;
use cellflow_parse::rewrite;

use crate::interpreter::{EvalContext, Evaluator};
use crate::traits::RegistryProvider;
use events::{CellUpdate, EngineEvent, EventHub, Subscription};
use graph::{DependencyGraph, DependencyNode, NameScope};
use spill::SpillRegistry;
use store::{semantically_equal, CellContent, CellInput, StateStore};
use tables::Table;

/// Host-level API errors: bad names, unknown entities, invalid snapshots.
/// Formula-level problems are never `Err` — they are error *values*.
#[derive(Debug, Error)]
pub enum EngineApiError {
    #[error("workbook '{0}' already exists")]
    DuplicateWorkbook(String),
    #[error("unknown workbook '{0}'")]
    UnknownWorkbook(String),
    #[error("sheet '{0}' already exists")]
    DuplicateSheet(String),
    #[error("unknown sheet '{0}'")]
    UnknownSheet(String),
    #[error("invalid name '{0}'")]
    InvalidName(String),
    #[error("unknown named expression '{0}'")]
    UnknownName(String),
    #[error("table '{0}' already exists")]
    DuplicateTable(String),
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("invalid cell address '{0}'")]
    InvalidAddress(String),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Evaluation frames before a formula degrades to `#ERROR!`.
    pub recursion_budget: usize,
    /// Hard cap on cells a single spill may materialize.
    pub max_spill_cells: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recursion_budget: 512,
            max_spill_cells: 100_000,
        }
    }
}

/// The formula engine: one owned object, explicit lifetime, no globals
/// (the function registry is process-wide but read-only after startup).
pub struct Engine {
    store: StateStore,
    graph: DependencyGraph,
    spills: SpillRegistry,
    hub: EventHub,
    config: EngineConfig,
    funcs: RegistryProvider,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An empty engine with the builtin function set loaded.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        crate::builtins::ensure_loaded();
        Engine {
            store: StateStore::default(),
            graph: DependencyGraph::default(),
            spills: SpillRegistry::default(),
            hub: EventHub::new(),
            config,
            funcs: RegistryProvider,
        }
    }

    /* ───────────── workbook / sheet CRUD ───────────── */

    pub fn add_workbook(&mut self, name: &str) -> Result<(), EngineApiError> {
        self.store.add_workbook(name)?;
        // formulas that referenced the missing workbook can now resolve
        let dirty = self.cells_mentioning(|r| reference_mentions_workbook(r, name));
        self.recalculate(dirty);
        Ok(())
    }

    pub fn remove_workbook(&mut self, name: &str) -> Result<(), EngineApiError> {
        let canon = self
            .store
            .canonical_workbook(name)
            .ok_or_else(|| EngineApiError::UnknownWorkbook(name.to_string()))?;

        let dirty = self.external_dependents_of(|node| node_targets_workbook(node, &canon));

        self.store.remove_workbook(&canon)?;
        self.store.names.remove_workbook_scope(&canon);
        let had_tables = self.store.tables.iter().any(|t| t.workbook.eq_ignore_ascii_case(&canon));
        self.store.tables.remove_for_workbook(&canon);
        self.spills
            .retain_sheets(|key| !key.workbook.eq_ignore_ascii_case(&canon));
        self.graph
            .retain_nodes(|node| !node_targets_workbook(node, &canon));

        if had_tables {
            self.hub.emit(&EngineEvent::TablesUpdated);
        }
        self.recalculate(dirty);
        Ok(())
    }

    pub fn rename_workbook(&mut self, old: &str, new: &str) -> Result<(), EngineApiError> {
        let canon = self
            .store
            .canonical_workbook(old)
            .ok_or_else(|| EngineApiError::UnknownWorkbook(old.to_string()))?;
        if new.is_empty() {
            return Err(EngineApiError::InvalidName(new.to_string()));
        }
        if !canon.eq_ignore_ascii_case(new) && self.store.canonical_workbook(new).is_some() {
            return Err(EngineApiError::DuplicateWorkbook(new.to_string()));
        }

        if let Some(wb) = self.store.workbook_mut(&canon) {
            wb.name = new.to_string();
        }
        self.store.names.rename_workbook_scope(&canon, new);
        self.store.tables.rename_workbook(&canon, new);
        self.spills.rename_workbook(&canon, new);

        let mut dirty =
            self.rewrite_formulas(|_, f| rewrite::rename_workbook(f, &canon, new));
        for cell_key in self.store.formula_cells() {
            if cell_key.workbook.eq_ignore_ascii_case(new) {
                dirty.push(cell_key);
            }
        }
        self.graph
            .retain_nodes(|node| !node_targets_workbook(node, &canon));
        self.recalculate(dirty);
        Ok(())
    }

    pub fn add_sheet(&mut self, key: &SheetKey) -> Result<(), EngineApiError> {
        let canon = self.store.add_sheet(key)?;
        self.hub.emit(&EngineEvent::SheetAdded {
            workbook: canon.workbook.clone(),
            sheet: canon.sheet.clone(),
        });
        let dirty = self.cells_mentioning(|r| reference_mentions_sheet(r, &canon.sheet));
        self.recalculate(dirty);
        Ok(())
    }

    pub fn remove_sheet(&mut self, key: &SheetKey) -> Result<(), EngineApiError> {
        let canon = self
            .store
            .canonical_sheet(&key.workbook, &key.sheet)
            .ok_or_else(|| EngineApiError::UnknownSheet(key.sheet.clone()))?;

        let dirty = self.external_dependents_of(|node| {
            node_targets_sheet(node, &canon.workbook, &canon.sheet)
        });
        let dirty: Vec<CellKey> = dirty
            .into_iter()
            .filter(|c| !c.on_sheet(&canon))
            .collect();

        self.store.remove_sheet(&canon)?;
        self.store
            .names
            .remove_sheet_scope(&canon.workbook, &canon.sheet);
        let had_tables = self
            .store
            .tables
            .iter()
            .any(|t| t.workbook.eq_ignore_ascii_case(&canon.workbook) && t.sheet.eq_ignore_ascii_case(&canon.sheet));
        self.store
            .tables
            .remove_for_sheet(&canon.workbook, &canon.sheet);
        self.spills.retain_sheets(|origin| !origin.on_sheet(&canon));
        self.graph
            .retain_nodes(|node| !node_targets_sheet(node, &canon.workbook, &canon.sheet));

        self.hub.emit(&EngineEvent::SheetRemoved {
            workbook: canon.workbook.clone(),
            sheet: canon.sheet.clone(),
        });
        if had_tables {
            self.hub.emit(&EngineEvent::TablesUpdated);
        }
        self.recalculate(dirty);
        Ok(())
    }

    pub fn rename_sheet(&mut self, key: &SheetKey, new_name: &str) -> Result<(), EngineApiError> {
        let canon = self
            .store
            .canonical_sheet(&key.workbook, &key.sheet)
            .ok_or_else(|| EngineApiError::UnknownSheet(key.sheet.clone()))?;
        if new_name.is_empty() {
            return Err(EngineApiError::InvalidName(new_name.to_string()));
        }
        if !canon.sheet.eq_ignore_ascii_case(new_name)
            && self
                .store
                .canonical_sheet(&canon.workbook, new_name)
                .is_some()
        {
            return Err(EngineApiError::DuplicateSheet(new_name.to_string()));
        }

        let old = canon.sheet.clone();

        // 1 · the sheet itself
        if let Some(sheet) = self.store.sheet_mut(&canon) {
            sheet.name = new_name.to_string();
        }
        // 2 · scoped state follows the rename in place
        self.store
            .names
            .rename_sheet_scope(&canon.workbook, &old, new_name);
        self.store
            .tables
            .rename_sheet(&canon.workbook, &old, new_name);
        self.spills.rename_sheet(&canon.workbook, &old, new_name);

        // 3 · rewrite every formula that mentions the sheet (in this
        //     workbook; same-named sheets elsewhere are untouched)
        let target_wb = canon.workbook.clone();
        let rewritten = self.rewrite_formulas(|cell, formula| {
            rewrite::rename_sheet_scoped(formula, &cell.workbook, &target_wb, &old, new_name)
        });

        // 4 · rebuild edges: rewritten cells plus everything on the renamed
        //     sheet re-traces against the new canonical keys
        let mut dirty = rewritten;
        let new_key = SheetKey::new(canon.workbook.clone(), new_name.to_string());
        for cell_key in self.store.formula_cells() {
            if cell_key.on_sheet(&new_key) {
                dirty.push(cell_key);
            }
        }
        self.graph.retain_nodes(|node| {
            !node_targets_sheet(node, &canon.workbook, &old)
        });

        self.hub.emit(&EngineEvent::SheetRenamed {
            workbook: canon.workbook.clone(),
            old: old.clone(),
            new: new_name.to_string(),
        });
        self.recalculate(dirty);
        Ok(())
    }

    /* ───────────── cell content ───────────── */

    /// Convenience key builder: `engine.cell("Book1", "Sheet1", "A1")`.
    pub fn cell(
        &self,
        workbook: &str,
        sheet: &str,
        a1: &str,
    ) -> Result<CellKey, EngineApiError> {
        let canon = self
            .store
            .canonical_sheet(workbook, sheet)
            .ok_or_else(|| EngineApiError::UnknownSheet(sheet.to_string()))?;
        let addr: CellAddr = a1
            .parse()
            .map_err(|_| EngineApiError::InvalidAddress(a1.to_string()))?;
        Ok(CellKey::new(canon.workbook, canon.sheet, addr))
    }

    pub fn set_cell_content(
        &mut self,
        key: &CellKey,
        content: impl Into<CellInput>,
    ) -> Result<(), EngineApiError> {
        let canon = self
            .store
            .canonical_sheet(&key.workbook, &key.sheet)
            .ok_or_else(|| EngineApiError::UnknownSheet(key.sheet.clone()))?;
        let key = CellKey::new(canon.workbook, canon.sheet, key.addr);

        let new_content = CellContent::from_input(content.into());
        if semantically_equal(self.store.serialized(&key), new_content.as_ref()) {
            return Ok(()); // no-op suppression: zero events
        }

        let mut pre = FxHashMap::default();
        self.capture_visible(&key, &mut pre);
        let mut seeds = vec![key.clone()];
        seeds.extend(self.apply_content(&key, new_content));
        self.recalculate_with(seeds, pre);
        Ok(())
    }

    /// Record the currently-visible values of a cell and of any spill area
    /// it anchors, before a mutation destroys them. Feeds the event diff.
    fn capture_visible(
        &self,
        key: &CellKey,
        pre: &mut FxHashMap<CellKey, Option<LiteralValue>>,
    ) {
        if !pre.contains_key(key) {
            pre.insert(key.clone(), self.visible_value(key));
        }
        if let Some(record) = self.spills.record(key) {
            for cell in record.cells() {
                if !pre.contains_key(&cell) {
                    pre.insert(cell.clone(), self.visible_value(&cell));
                }
            }
        }
    }

    /// Replace a sheet's whole content map; omitted cells are cleared. The
    /// symmetric difference (after semantic-equality filtering) seeds one
    /// cascade.
    pub fn set_sheet_content(
        &mut self,
        sheet: &SheetKey,
        content: FxHashMap<String, CellInput>,
    ) -> Result<(), EngineApiError> {
        let canon = self
            .store
            .canonical_sheet(&sheet.workbook, &sheet.sheet)
            .ok_or_else(|| EngineApiError::UnknownSheet(sheet.sheet.clone()))?;

        let mut incoming: FxHashMap<CellAddr, CellContent> = FxHashMap::default();
        for (a1, input) in content {
            let addr: CellAddr = a1
                .parse()
                .map_err(|_| EngineApiError::InvalidAddress(a1.clone()))?;
            if let Some(c) = CellContent::from_input(input) {
                incoming.insert(addr, c);
            }
        }

        let existing: Vec<CellAddr> = self
            .store
            .sheet(&canon)
            .map(|s| s.cells.keys().copied().collect())
            .unwrap_or_default();

        let mut seeds = Vec::new();
        let mut pre = FxHashMap::default();
        // implicit clears
        for addr in existing {
            if !incoming.contains_key(&addr) {
                let key = CellKey::new(canon.workbook.clone(), canon.sheet.clone(), addr);
                self.capture_visible(&key, &mut pre);
                let freed = self.apply_content(&key, None);
                seeds.push(key);
                seeds.extend(freed);
            }
        }
        // explicit writes, semantically filtered
        for (addr, content) in incoming {
            let key = CellKey::new(canon.workbook.clone(), canon.sheet.clone(), addr);
            if semantically_equal(self.store.serialized(&key), Some(&content)) {
                continue;
            }
            self.capture_visible(&key, &mut pre);
            let freed = self.apply_content(&key, Some(content));
            seeds.push(key);
            seeds.extend(freed);
        }

        if !seeds.is_empty() {
            self.recalculate_with(seeds, pre);
        }
        Ok(())
    }

    /// Install new serialized content. Returns the cells of any spill the
    /// cell anchored — they changed too and must seed the cascade.
    fn apply_content(&mut self, key: &CellKey, content: Option<CellContent>) -> Vec<CellKey> {
        let node_key = DependencyNode::cell(key).encode();
        self.graph.clear_precedents(&node_key);
        let freed = self.spills.retract(key);
        self.spills.clear_blocked(key);
        self.store.set_serialized(key, content);
        freed.into_iter().filter(|c| c != key).collect()
    }

    /* ───────────── reads ───────────── */

    /// The computed value, evaluating lazily when cold. `None` for an
    /// absent cell that no spill covers.
    pub fn get_cell_value(&mut self, key: &CellKey) -> Option<LiteralValue> {
        let canon = self.store.canonical_sheet(&key.workbook, &key.sheet)?;
        let key = CellKey::new(canon.workbook, canon.sheet, key.addr);

        if let Some(cached) = self.store.cell(&key).and_then(|c| c.computed.clone()) {
            return Some(cached);
        }
        if self.store.cell(&key).is_some() {
            let mut ev = Evaluator::new(
                &mut self.store,
                &mut self.graph,
                &mut self.spills,
                &self.funcs,
                &self.config,
            );
            let mut ctx = EvalContext::new(key.clone());
            let value = ev.evaluate_cell(&key, &mut ctx);
            let _ = ev.take_changed();
            return Some(value);
        }
        self.spills.value_at(&key)
    }

    pub fn get_cell_serialized(&self, key: &CellKey) -> Option<CellContent> {
        let canon = self.store.canonical_sheet(&key.workbook, &key.sheet)?;
        let key = CellKey::new(canon.workbook, canon.sheet, key.addr);
        self.store.serialized(&key).cloned()
    }

    /// The sheet's sparse content map, keyed by A1 address.
    pub fn get_sheet_serialized(&self, sheet: &SheetKey) -> FxHashMap<String, CellContent> {
        let mut out = FxHashMap::default();
        if let Some(canon) = self.store.canonical_sheet(&sheet.workbook, &sheet.sheet) {
            if let Some(s) = self.store.sheet(&canon) {
                for (addr, cell) in &s.cells {
                    out.insert(addr.to_string(), cell.content.clone());
                }
            }
        }
        out
    }

    /* ───────────── named expressions ───────────── */

    pub fn add_named_expression(
        &mut self,
        name: &str,
        expression: &str,
        scope: NameScope,
    ) -> Result<(), EngineApiError> {
        let scope = self.canonicalize_scope(scope)?;
        self.store.names.upsert(scope, name, expression)?;
        self.hub.emit(&EngineEvent::GlobalNamedExpressionsUpdated);
        let dirty = self.cells_mentioning(|r| reference_mentions_name(r, name));
        self.recalculate(dirty);
        Ok(())
    }

    pub fn remove_named_expression(
        &mut self,
        name: &str,
        scope: NameScope,
    ) -> Result<(), EngineApiError> {
        let scope = self.canonicalize_scope(scope)?;
        self.store.names.remove(&scope, name)?;
        self.hub.emit(&EngineEvent::GlobalNamedExpressionsUpdated);
        let dirty = self.cells_mentioning(|r| reference_mentions_name(r, name));
        self.recalculate(dirty);
        Ok(())
    }

    pub fn rename_named_expression(
        &mut self,
        name: &str,
        new_name: &str,
        scope: NameScope,
    ) -> Result<(), EngineApiError> {
        let scope = self.canonicalize_scope(scope)?;
        self.store.names.rename(&scope, name, new_name)?;
        let rewritten =
            self.rewrite_formulas(|_, f| rewrite::rename_named_expression(f, name, new_name));
        self.hub.emit(&EngineEvent::GlobalNamedExpressionsUpdated);
        self.recalculate(rewritten);
        Ok(())
    }

    fn canonicalize_scope(&self, scope: NameScope) -> Result<NameScope, EngineApiError> {
        Ok(match scope {
            NameScope::Global => NameScope::Global,
            NameScope::Workbook(wb) => NameScope::Workbook(
                self.store
                    .canonical_workbook(&wb)
                    .ok_or(EngineApiError::UnknownWorkbook(wb))?,
            ),
            NameScope::Sheet(wb, sheet) => {
                let canon = self
                    .store
                    .canonical_sheet(&wb, &sheet)
                    .ok_or(EngineApiError::UnknownSheet(sheet))?;
                NameScope::Sheet(canon.workbook, canon.sheet)
            }
        })
    }

    /* ───────────── tables ───────────── */

    /// Register a table whose header row starts at `start`. `num_rows`
    /// counts the header row plus the data rows; headers are read from the
    /// current cell contents (missing headers become `Column1`, …).
    pub fn add_table(
        &mut self,
        name: &str,
        sheet: &SheetKey,
        start: CellAddr,
        num_rows: u32,
        num_cols: u32,
    ) -> Result<(), EngineApiError> {
        let canon = self
            .store
            .canonical_sheet(&sheet.workbook, &sheet.sheet)
            .ok_or_else(|| EngineApiError::UnknownSheet(sheet.sheet.clone()))?;
        if num_rows == 0 || num_cols == 0 {
            return Err(EngineApiError::InvalidName(format!(
                "table '{name}' must have at least one row and column"
            )));
        }

        let mut headers = Vec::with_capacity(num_cols as usize);
        for j in 0..num_cols {
            let key = CellKey::new(
                canon.workbook.clone(),
                canon.sheet.clone(),
                CellAddr::new(start.row, start.col + j),
            );
            let header = self
                .store
                .serialized(&key)
                .and_then(|c| c.literal())
                .map(|v| v.to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("Column{}", j + 1));
            headers.push(header);
        }

        self.store.tables.add(Table {
            name: name.to_string(),
            workbook: canon.workbook,
            sheet: canon.sheet,
            start,
            headers,
            end_row: Some(start.row + num_rows - 1),
        })?;

        self.hub.emit(&EngineEvent::TablesUpdated);
        let dirty = self.cells_mentioning(|r| reference_mentions_table(r, name));
        self.recalculate(dirty);
        Ok(())
    }

    pub fn remove_table(&mut self, name: &str) -> Result<(), EngineApiError> {
        let table = self.store.tables.remove(name)?;
        self.hub.emit(&EngineEvent::TablesUpdated);
        let dirty = self.cells_mentioning(|r| reference_mentions_table(r, &table.name));
        self.recalculate(dirty);
        Ok(())
    }

    /// Re-shape a table: move its anchor and resize. Headers are re-read
    /// from the sheet at the new position.
    pub fn update_table(
        &mut self,
        name: &str,
        start: CellAddr,
        num_rows: u32,
        num_cols: u32,
    ) -> Result<(), EngineApiError> {
        let (workbook, sheet, canonical_name) = {
            let table = self
                .store
                .tables
                .get(name)
                .ok_or_else(|| EngineApiError::UnknownTable(name.to_string()))?;
            (
                table.workbook.clone(),
                table.sheet.clone(),
                table.name.clone(),
            )
        };
        self.store.tables.remove(&canonical_name)?;
        self.add_table(
            &canonical_name,
            &SheetKey::new(workbook, sheet),
            start,
            num_rows,
            num_cols,
        )
    }

    pub fn rename_table(&mut self, name: &str, new_name: &str) -> Result<(), EngineApiError> {
        self.store.tables.rename(name, new_name)?;
        let rewritten = self.rewrite_formulas(|_, f| rewrite::rename_table(f, name, new_name));
        self.hub.emit(&EngineEvent::TablesUpdated);
        self.recalculate(rewritten);
        Ok(())
    }

    /* ───────────── events ───────────── */

    /// Batched cell updates for one sheet. Dropping the handle
    /// unsubscribes.
    pub fn on_cells_update<F: FnMut(&EngineEvent) + 'static>(
        &self,
        sheet: &SheetKey,
        listener: F,
    ) -> Subscription {
        self.hub.subscribe_cells(sheet.clone(), listener)
    }

    /// Every engine event, including each batched cells-updated.
    pub fn on_update<F: FnMut(&EngineEvent) + 'static>(&self, listener: F) -> Subscription {
        self.hub.subscribe_all(listener)
    }

    /* ───────────── the cascade ───────────── */

    /// Visible value of a cell: computed cache, else live spill projection.
    fn visible_value(&self, key: &CellKey) -> Option<LiteralValue> {
        if let Some(cell) = self.store.cell(key) {
            if let Some(v) = &cell.computed {
                return Some(v.clone());
            }
            return None;
        }
        self.spills.value_at(key)
    }

    /// Re-evaluate the seeds and their transitive dependents in topological
    /// order, loop until spill side effects settle, then emit one batched
    /// event per affected sheet.
    fn recalculate(&mut self, seeds: Vec<CellKey>) {
        self.recalculate_with(seeds, FxHashMap::default());
    }

    /// As [`recalculate`](Self::recalculate), seeded with pre-captured
    /// visible values for cells whose state was destroyed before the
    /// cascade (cleared spill areas).
    fn recalculate_with(
        &mut self,
        seeds: Vec<CellKey>,
        pre: FxHashMap<CellKey, Option<LiteralValue>>,
    ) {
        if seeds.is_empty() {
            return;
        }

        let mut old_values: FxHashMap<CellKey, Option<LiteralValue>> = pre;
        let mut touched: Vec<CellKey> = Vec::new();
        let mut touched_set: FxHashSet<CellKey> = FxHashSet::default();
        for cell in old_values.keys() {
            if touched_set.insert(cell.clone()) {
                touched.push(cell.clone());
            }
        }
        let mut frontier = seeds;
        let mut evaluate_frontier = true; // seeds are evaluated; later frontiers are spill projections

        for round in 0.. {
            let ctx_cell = match frontier.first() {
                Some(cell) if round <= 16 => cell.clone(),
                _ => break,
            };

            // spill origins whose live or intended area the frontier touches
            let mut expanded = frontier.clone();
            for cell in &frontier {
                for origin in self.spills.origins_touching(cell) {
                    if !expanded.contains(&origin) {
                        expanded.push(origin);
                    }
                }
            }

            let dirty = self.graph.transitive_dependents(&expanded, &self.store);

            // work set: (frontier if evaluable) ∪ expanded origins ∪ dirty.
            // `forced` cells re-evaluate unconditionally (their content or
            // spill state changed); the rest are short-circuit candidates.
            let mut work: FxHashMap<String, CellKey> = FxHashMap::default();
            let mut forced: FxHashSet<String> = FxHashSet::default();
            let direct: &[CellKey] = if evaluate_frontier {
                &expanded
            } else {
                &expanded[frontier.len()..]
            };
            for cell in direct {
                let key = DependencyNode::cell(cell).encode();
                forced.insert(key.clone());
                work.insert(key, cell.clone());
            }
            for (key, cell) in &dirty {
                work.insert(key.clone(), cell.clone());
            }

            // cells whose value is known to have changed this round; later
            // frontiers are spill projections that changed by construction
            let mut value_changed: FxHashMap<String, CellKey> = FxHashMap::default();
            if !evaluate_frontier {
                for cell in &frontier {
                    value_changed.insert(DependencyNode::cell(cell).encode(), cell.clone());
                }
            }

            // snapshot old visible values (first sighting wins): the work
            // cells plus the areas of any spill they own or intend
            let mut snapshot_cells: Vec<CellKey> = work.values().cloned().collect();
            snapshot_cells.extend(frontier.iter().cloned());
            for cell in work.values() {
                if let Some(record) = self.spills.record(cell) {
                    snapshot_cells.extend(record.cells());
                }
            }
            for cell in snapshot_cells {
                if !old_values.contains_key(&cell) {
                    old_values.insert(cell.clone(), self.visible_value(&cell));
                }
                if touched_set.insert(cell.clone()) {
                    touched.push(cell);
                }
            }

            // cold-start the work set
            for cell in work.values() {
                if let Some(c) = self.store.cell_mut(cell) {
                    c.computed = None;
                }
            }

            let (ordered, cyclic) = self.graph.topo_order(&work, &self.store);

            let mut ev = Evaluator::new(
                &mut self.store,
                &mut self.graph,
                &mut self.spills,
                &self.funcs,
                &self.config,
            );
            let mut ctx = EvalContext::new(ctx_cell);

            // Topological pass with the short-circuit: a cell whose
            // precedents all recomputed to their previous values is not
            // re-evaluated — its prior value is restored and its own
            // dependents stay quiet. Cells in the cyclic remainder always
            // re-evaluate so stack-based detection can mark them.
            for cell in &ordered {
                let key = DependencyNode::cell(cell).encode();
                if !forced.contains(&key)
                    && !depends_on_changed(ev.graph, ev.store, &key, &value_changed)
                {
                    let prior = old_values.get(cell).cloned().flatten();
                    if let (Some(c), Some(prior)) = (ev.store.cell_mut(cell), prior) {
                        c.computed = Some(prior);
                    }
                    continue;
                }
                evaluate_one(&mut ev, &mut ctx, cell, &key, &old_values, &mut value_changed);
            }
            for cell in &cyclic {
                let key = DependencyNode::cell(cell).encode();
                evaluate_one(&mut ev, &mut ctx, cell, &key, &old_values, &mut value_changed);
            }
            let changed = ev.take_changed();

            // spill side effects may have touched cells outside the work
            // set; their dependents recalc next round
            let mut next = Vec::new();
            for cell in changed {
                if !old_values.contains_key(&cell) {
                    old_values.insert(cell.clone(), None);
                }
                if touched_set.insert(cell.clone()) {
                    touched.push(cell.clone());
                }
                let key = DependencyNode::cell(&cell).encode();
                if !work.contains_key(&key) && !frontier.contains(&cell) {
                    next.push(cell);
                }
            }
            frontier = next;
            evaluate_frontier = false;
        }

        // one batched event per affected sheet
        let mut per_sheet: FxHashMap<(String, String), Vec<CellUpdate>> = FxHashMap::default();
        for cell in &touched {
            let new = self.visible_value(cell);
            let old = old_values.get(cell).cloned().flatten();
            if new != old {
                per_sheet
                    .entry((cell.workbook.clone(), cell.sheet.clone()))
                    .or_default()
                    .push(CellUpdate {
                        addr: cell.addr,
                        value: new,
                    });
            }
        }
        let mut sheets: Vec<_> = per_sheet.into_iter().collect();
        sheets.sort_by(|a, b| a.0.cmp(&b.0));
        for ((workbook, sheet), mut cells) in sheets {
            cells.sort_by_key(|u| u.addr);
            self.hub.emit(&EngineEvent::CellsUpdated {
                workbook,
                sheet,
                cells,
            });
        }
    }

    /* ───────────── helpers ───────────── */

    /// Formula cells whose AST contains a reference matching the predicate.
    /// Used when an entity appears or vanishes and no graph edge exists yet
    /// (the graph never points at missing entities).
    fn cells_mentioning<F: Fn(&ReferenceType) -> bool>(&mut self, pred: F) -> Vec<CellKey> {
        let mut out = Vec::new();
        for key in self.store.formula_cells() {
            let ast = match self.store.cell_mut(&key) {
                Some(cell) => cell.ensure_ast(),
                None => continue,
            };
            let mut hit = false;
            ast.visit_refs(|r| {
                if pred(r) {
                    hit = true;
                }
            });
            if hit {
                out.push(key);
            }
        }
        out
    }

    /// External cells depending on any graph node matching the predicate.
    fn external_dependents_of<F: Fn(&DependencyNode) -> bool>(&self, pred: F) -> Vec<CellKey> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        for key in self.graph.node_keys_matching(&pred) {
            for cell in self.graph.dependents_of_node(&key) {
                if seen.insert(cell.clone()) {
                    out.push(cell);
                }
            }
        }
        out
    }

    /// Apply a textual rewriter to every stored formula; returns the cells
    /// whose text actually changed (their ASTs are dropped for re-parsing).
    fn rewrite_formulas<F: Fn(&CellKey, &str) -> String>(&mut self, rewriter: F) -> Vec<CellKey> {
        let mut changed = Vec::new();
        for key in self.store.formula_cells() {
            let formula = match self.store.serialized(&key) {
                Some(CellContent::Formula(f)) => f.clone(),
                _ => continue,
            };
            let rewritten = rewriter(&key, &formula);
            if rewritten != formula {
                if let Some(cell) = self.store.cell_mut(&key) {
                    cell.content = CellContent::Formula(rewritten);
                    cell.ast = None;
                    // value is semantically unchanged; the cascade re-traces
                    // edges and short-circuits the event
                }
                changed.push(key);
            }
        }
        changed
    }

    /* ───────────── serialization ───────────── */

    pub fn serialize_engine(&self) -> String {
        snapshot::serialize(self)
    }

    pub fn reset_to_serialized_engine(&mut self, data: &str) -> Result<(), EngineApiError> {
        snapshot::restore(self, data)
    }

    pub(crate) fn store(&self) -> &StateStore {
        &self.store
    }

    pub(crate) fn reset_state(&mut self, store: StateStore) {
        self.store = store;
        self.graph = DependencyGraph::default();
        self.spills = SpillRegistry::default();
        // recompute everything so caches, edges, and spills are live
        let seeds = self.store.formula_cells();
        self.recalculate(seeds);
    }
}

/* ───────────── cascade helpers ───────────── */

/// Does a dependent read any cell whose value changed this round, either
/// directly or through a range / table / multi-sheet precedent covering it?
fn depends_on_changed(
    graph: &DependencyGraph,
    store: &StateStore,
    dep_key: &str,
    changed: &FxHashMap<String, CellKey>,
) -> bool {
    if changed.is_empty() {
        return false;
    }
    let precs = match graph.precedents_of(dep_key) {
        Some(p) => p,
        None => return false,
    };
    for prec in precs {
        if changed.contains_key(prec) {
            return true;
        }
        if let Some(node) = graph.node(prec) {
            if !matches!(node, DependencyNode::Cell { .. })
                && changed.values().any(|cell| node.covers(cell, store))
            {
                return true;
            }
        }
    }
    false
}

/// Re-evaluate one cell of the cascade and record whether its visible value
/// moved (or its spill footprint did) so downstream cells know to run.
fn evaluate_one(
    ev: &mut Evaluator<'_>,
    ctx: &mut EvalContext,
    cell: &CellKey,
    key: &str,
    old_values: &FxHashMap<CellKey, Option<LiteralValue>>,
    value_changed: &mut FxHashMap<String, CellKey>,
) {
    let prior = old_values.get(cell).cloned().flatten();
    let mark = ev.change_mark();

    if let Some(c) = ev.store.cell_mut(cell) {
        c.computed = None;
    }

    if ev.store.cell(cell).is_some() {
        let after = ev.read_cell_value(cell, ctx);
        // a spill that grew, shrank, or moved changes cells beyond the
        // origin even when the origin value itself is stable
        let spill_moved = ev.changed_since(mark).iter().any(|c| c != cell);
        if Some(after) != prior || spill_moved {
            value_changed.insert(key.to_string(), cell.clone());
        }
    } else {
        // cleared cells and freed spill slots have no content to evaluate;
        // their visible value may still have moved
        let after = ev.spills.value_at(cell);
        if after != prior {
            value_changed.insert(key.to_string(), cell.clone());
        }
    }
}

/* ───────────── node / reference predicates ───────────── */

fn node_targets_workbook(node: &DependencyNode, workbook: &str) -> bool {
    match node {
        DependencyNode::Cell { workbook: wb, .. }
        | DependencyNode::Range { workbook: wb, .. }
        | DependencyNode::MultiSheetRange { workbook: wb, .. }
        | DependencyNode::Table { workbook: wb, .. } => wb.eq_ignore_ascii_case(workbook),
        DependencyNode::Named { scope, .. } => match scope {
            NameScope::Workbook(wb) | NameScope::Sheet(wb, _) => {
                wb.eq_ignore_ascii_case(workbook)
            }
            NameScope::Global => false,
        },
    }
}

fn node_targets_sheet(node: &DependencyNode, workbook: &str, sheet: &str) -> bool {
    match node {
        DependencyNode::Cell {
            workbook: wb,
            sheet: s,
            ..
        }
        | DependencyNode::Range {
            workbook: wb,
            sheet: s,
            ..
        }
        | DependencyNode::Table {
            workbook: wb,
            sheet: s,
            ..
        } => wb.eq_ignore_ascii_case(workbook) && s.eq_ignore_ascii_case(sheet),
        DependencyNode::MultiSheetRange {
            workbook: wb,
            selector,
            ..
        } => {
            wb.eq_ignore_ascii_case(workbook)
                && match selector {
                    graph::SheetSelector::List(sheets) => {
                        sheets.iter().any(|s| s.eq_ignore_ascii_case(sheet))
                    }
                    graph::SheetSelector::Span(a, b) => {
                        a.eq_ignore_ascii_case(sheet) || b.eq_ignore_ascii_case(sheet)
                    }
                }
        }
        DependencyNode::Named { scope, .. } => match scope {
            NameScope::Sheet(wb, s) => {
                wb.eq_ignore_ascii_case(workbook) && s.eq_ignore_ascii_case(sheet)
            }
            _ => false,
        },
    }
}

fn reference_mentions_sheet(reference: &ReferenceType, sheet: &str) -> bool {
    match reference {
        ReferenceType::Cell { sheet: s, .. } | ReferenceType::Range { sheet: s, .. } => s
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case(sheet))
            .unwrap_or(false),
        ReferenceType::MultiSheetRange {
            sheet_start,
            sheet_end,
            ..
        } => sheet_start.eq_ignore_ascii_case(sheet) || sheet_end.eq_ignore_ascii_case(sheet),
        ReferenceType::Named { qualifier, .. } => qualifier
            .as_deref()
            .map(|q| q.eq_ignore_ascii_case(sheet))
            .unwrap_or(false),
        ReferenceType::Table(_) => false,
    }
}

fn reference_mentions_workbook(reference: &ReferenceType, workbook: &str) -> bool {
    match reference {
        ReferenceType::Cell { workbook: wb, .. }
        | ReferenceType::Range { workbook: wb, .. }
        | ReferenceType::MultiSheetRange { workbook: wb, .. }
        | ReferenceType::Named { workbook: wb, .. } => wb
            .as_deref()
            .map(|w| w.eq_ignore_ascii_case(workbook))
            .unwrap_or(false),
        ReferenceType::Table(_) => false,
    }
}

fn reference_mentions_name(reference: &ReferenceType, name: &str) -> bool {
    matches!(
        reference,
        ReferenceType::Named { name: n, .. } if n.eq_ignore_ascii_case(name)
    )
}

fn reference_mentions_table(reference: &ReferenceType, table: &str) -> bool {
    matches!(
        reference,
        ReferenceType::Table(t) if t.name.eq_ignore_ascii_case(table)
    )
}
