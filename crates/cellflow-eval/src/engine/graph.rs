//! The dependency graph: directed edges *dependent → precedent* between
//! dependency nodes, keyed by a total, injective string encoding.
//!
//! Edges are inserted only by the evaluator as it traces a formula and
//! removed only when a cell is re-parsed or cleared. The graph never holds
//! an edge to an entity that does not exist — references to missing
//! entities evaluate to `#REF!` / `#NAME?` instead (ghost *cells* are fine:
//! a key stays indexable while dependents refer to it).

use std::collections::VecDeque;

use cellflow_common::{col_to_letters, letters_to_col, CellAddr, CellKey, RangeAddr};
use rustc_hash::{FxHashMap, FxHashSet};

use super::store::StateStore;

pub use super::names::NameScope;

/// Which sheets a multi-sheet range selects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SheetSelector {
    List(Vec<String>),
    Span(String, String),
}

/// Which part of a table a structured reference addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableArea {
    Headers,
    All,
    AllData,
    Data {
        cols: Vec<String>,
        current_row: Option<u32>,
    },
}

/// Anything that can participate as a precedent (or dependent).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyNode {
    Cell {
        workbook: String,
        sheet: String,
        addr: CellAddr,
    },
    Range {
        workbook: String,
        sheet: String,
        range: RangeAddr,
    },
    MultiSheetRange {
        workbook: String,
        selector: SheetSelector,
        range: RangeAddr,
    },
    Named {
        scope: NameScope,
        name: String,
    },
    Table {
        workbook: String,
        sheet: String,
        table: String,
        area: TableArea,
    },
}

/* ───────────────────── key codec ───────────────────── */

/// Escape a name component so `:` `,` `@` `%` stay unambiguous inside keys.
fn esc(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            ',' => out.push_str("%2C"),
            '@' => out.push_str("%40"),
            c => out.push(c),
        }
    }
    out
}

fn unesc(s: &str) -> String {
    s.replace("%3A", ":")
        .replace("%2C", ",")
        .replace("%40", "@")
        .replace("%25", "%")
}

fn encode_range_end(range: &RangeAddr) -> String {
    match (range.end_row, range.end_col) {
        (Some(row), Some(col)) => format!("{}{}", col_to_letters(col), row + 1),
        (None, Some(col)) => col_to_letters(col),
        (Some(row), None) => format!("{}", row + 1),
        (None, None) => "INFINITY".to_string(),
    }
}

fn decode_range(start: &str, end: &str) -> Option<RangeAddr> {
    let start_addr: CellAddr = start.parse().ok()?;
    if end == "INFINITY" {
        return Some(RangeAddr::new(start_addr, None, None));
    }
    if let Ok(addr) = end.parse::<CellAddr>() {
        return Some(RangeAddr::new(start_addr, Some(addr.row), Some(addr.col)));
    }
    if end.bytes().all(|b| b.is_ascii_uppercase()) {
        let col = letters_to_col(end)?;
        return Some(RangeAddr::new(start_addr, None, Some(col)));
    }
    if end.bytes().all(|b| b.is_ascii_digit()) {
        let row: u32 = end.parse().ok()?;
        if row == 0 {
            return None;
        }
        return Some(RangeAddr::new(start_addr, Some(row - 1), None));
    }
    None
}

fn encode_area(area: &TableArea) -> String {
    match area {
        TableArea::Headers => "headers".to_string(),
        TableArea::All => "all".to_string(),
        TableArea::AllData => "alldata".to_string(),
        TableArea::Data { cols, current_row } => {
            let cols: Vec<String> = cols.iter().map(|c| esc(c)).collect();
            match current_row {
                Some(row) => format!("data:{}@{}", cols.join(","), row),
                None => format!("data:{}", cols.join(",")),
            }
        }
    }
}

fn decode_area(parts: &[&str]) -> Option<TableArea> {
    match parts {
        ["headers"] => Some(TableArea::Headers),
        ["all"] => Some(TableArea::All),
        ["alldata"] => Some(TableArea::AllData),
        ["data", spec] => {
            let (cols_text, current_row) = match spec.split_once('@') {
                Some((cols, row)) => (cols, Some(row.parse::<u32>().ok()?)),
                None => (*spec, None),
            };
            let cols: Vec<String> = if cols_text.is_empty() {
                Vec::new()
            } else {
                cols_text.split(',').map(unesc).collect()
            };
            Some(TableArea::Data { cols, current_row })
        }
        _ => None,
    }
}

impl DependencyNode {
    pub fn cell(key: &CellKey) -> Self {
        DependencyNode::Cell {
            workbook: key.workbook.clone(),
            sheet: key.sheet.clone(),
            addr: key.addr,
        }
    }

    /// Total, injective canonical key.
    pub fn encode(&self) -> String {
        match self {
            DependencyNode::Cell {
                workbook,
                sheet,
                addr,
            } => format!("cell:{}:{}:{}", esc(workbook), esc(sheet), addr),
            DependencyNode::Range {
                workbook,
                sheet,
                range,
            } => format!(
                "range:{}:{}:{}:{}",
                esc(workbook),
                esc(sheet),
                range.start,
                encode_range_end(range)
            ),
            DependencyNode::MultiSheetRange {
                workbook,
                selector,
                range,
            } => match selector {
                SheetSelector::List(sheets) => {
                    let sheets: Vec<String> = sheets.iter().map(|s| esc(s)).collect();
                    format!(
                        "multi-range:list:{}:{}:{}:{}",
                        esc(workbook),
                        sheets.join(","),
                        range.start,
                        encode_range_end(range)
                    )
                }
                SheetSelector::Span(first, second) => format!(
                    "multi-range:span:{}:{}:{}:{}:{}",
                    esc(workbook),
                    esc(first),
                    esc(second),
                    range.start,
                    encode_range_end(range)
                ),
            },
            DependencyNode::Named { scope, name } => match scope {
                NameScope::Global => format!("named:global:{}", esc(name)),
                NameScope::Workbook(wb) => format!("named:workbook:{}:{}", esc(wb), esc(name)),
                NameScope::Sheet(wb, sheet) => {
                    format!("named:sheet:{}:{}:{}", esc(wb), esc(sheet), esc(name))
                }
            },
            DependencyNode::Table {
                workbook,
                sheet,
                table,
                area,
            } => format!(
                "table:{}:{}:{}:{}",
                esc(workbook),
                esc(sheet),
                esc(table),
                encode_area(area)
            ),
        }
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split(':').collect();
        match parts.as_slice() {
            ["cell", wb, sheet, a1] => Some(DependencyNode::Cell {
                workbook: unesc(wb),
                sheet: unesc(sheet),
                addr: a1.parse().ok()?,
            }),
            ["range", wb, sheet, start, end] => Some(DependencyNode::Range {
                workbook: unesc(wb),
                sheet: unesc(sheet),
                range: decode_range(start, end)?,
            }),
            ["multi-range", "list", wb, sheets, start, end] => Some(DependencyNode::MultiSheetRange {
                workbook: unesc(wb),
                selector: SheetSelector::List(sheets.split(',').map(unesc).collect()),
                range: decode_range(start, end)?,
            }),
            ["multi-range", "span", wb, first, second, start, end] => {
                Some(DependencyNode::MultiSheetRange {
                    workbook: unesc(wb),
                    selector: SheetSelector::Span(unesc(first), unesc(second)),
                    range: decode_range(start, end)?,
                })
            }
            ["named", "global", name] => Some(DependencyNode::Named {
                scope: NameScope::Global,
                name: unesc(name),
            }),
            ["named", "workbook", wb, name] => Some(DependencyNode::Named {
                scope: NameScope::Workbook(unesc(wb)),
                name: unesc(name),
            }),
            ["named", "sheet", wb, sheet, name] => Some(DependencyNode::Named {
                scope: NameScope::Sheet(unesc(wb), unesc(sheet)),
                name: unesc(name),
            }),
            ["table", wb, sheet, table, rest @ ..] => Some(DependencyNode::Table {
                workbook: unesc(wb),
                sheet: unesc(sheet),
                table: unesc(table),
                area: decode_area(rest)?,
            }),
            _ => None,
        }
    }

    /// Does this (non-cell) node cover the given cell address right now?
    /// Table areas resolve through the live table store; sheet spans through
    /// the live sheet order.
    pub fn covers(&self, cell: &CellKey, store: &StateStore) -> bool {
        match self {
            DependencyNode::Cell { .. } => false,
            DependencyNode::Range {
                workbook,
                sheet,
                range,
            } => {
                workbook.eq_ignore_ascii_case(&cell.workbook)
                    && sheet.eq_ignore_ascii_case(&cell.sheet)
                    && range.contains(cell.addr)
            }
            DependencyNode::MultiSheetRange {
                workbook,
                selector,
                range,
            } => {
                if !workbook.eq_ignore_ascii_case(&cell.workbook) {
                    return false;
                }
                let on_selected_sheet = match selector {
                    SheetSelector::List(sheets) => sheets
                        .iter()
                        .any(|s| s.eq_ignore_ascii_case(&cell.sheet)),
                    SheetSelector::Span(first, second) => store
                        .sheet_span(workbook, first, second)
                        .map(|sheets| {
                            sheets.iter().any(|s| s.eq_ignore_ascii_case(&cell.sheet))
                        })
                        .unwrap_or(false),
                };
                on_selected_sheet && range.contains(cell.addr)
            }
            DependencyNode::Named { .. } => false,
            DependencyNode::Table { table, area, .. } => match store.tables.get(table) {
                Some(t) => {
                    t.workbook.eq_ignore_ascii_case(&cell.workbook)
                        && t.sheet.eq_ignore_ascii_case(&cell.sheet)
                        && t.resolve_area(area)
                            .map(|r| r.contains(cell.addr))
                            .unwrap_or(false)
                }
                None => false,
            },
        }
    }
}

/* ───────────────────── the graph ───────────────────── */

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// dependent key → precedent keys (what I read).
    precedents: FxHashMap<String, FxHashSet<String>>,
    /// precedent key → dependent keys (who reads me).
    dependents: FxHashMap<String, FxHashSet<String>>,
    /// Decoded form of every key currently present in an edge.
    nodes: FxHashMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn add_edge(&mut self, dependent: &DependencyNode, precedent: &DependencyNode) {
        let dep_key = dependent.encode();
        let prec_key = precedent.encode();
        self.nodes.entry(dep_key.clone()).or_insert_with(|| dependent.clone());
        self.nodes
            .entry(prec_key.clone())
            .or_insert_with(|| precedent.clone());
        self.precedents
            .entry(dep_key.clone())
            .or_default()
            .insert(prec_key.clone());
        self.dependents.entry(prec_key).or_default().insert(dep_key);
    }

    /// Remove every outgoing edge of a dependent (its whole precedent set).
    pub fn clear_precedents(&mut self, dep_key: &str) {
        if let Some(precs) = self.precedents.remove(dep_key) {
            for prec in precs {
                if let Some(deps) = self.dependents.get_mut(&prec) {
                    deps.remove(dep_key);
                    if deps.is_empty() {
                        self.dependents.remove(&prec);
                    }
                }
                self.gc_node(&prec);
            }
        }
        self.gc_node(dep_key);
    }

    fn gc_node(&mut self, key: &str) {
        if !self.precedents.contains_key(key) && !self.dependents.contains_key(key) {
            self.nodes.remove(key);
        }
    }

    pub fn precedents_of(&self, key: &str) -> Option<&FxHashSet<String>> {
        self.precedents.get(key)
    }

    pub fn dependents_of(&self, key: &str) -> Option<&FxHashSet<String>> {
        self.dependents.get(key)
    }

    pub fn node(&self, key: &str) -> Option<&DependencyNode> {
        self.nodes.get(key)
    }

    /// Non-cell precedent nodes whose live area covers the given cell.
    pub fn covering_nodes(&self, cell: &CellKey, store: &StateStore) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(key, node)| {
                self.dependents.contains_key(*key) && node.covers(cell, store)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Every formula cell transitively reading any of the seed cells,
    /// through direct edges and through covering range / table / multi-sheet
    /// nodes.
    pub fn transitive_dependents(
        &self,
        seeds: &[CellKey],
        store: &StateStore,
    ) -> FxHashMap<String, CellKey> {
        let mut dirty: FxHashMap<String, CellKey> = FxHashMap::default();
        let mut queue: VecDeque<CellKey> = seeds.iter().cloned().collect();
        let mut visited: FxHashSet<String> = FxHashSet::default();

        while let Some(cell) = queue.pop_front() {
            let cell_node = DependencyNode::cell(&cell);
            let cell_key = cell_node.encode();
            if !visited.insert(cell_key.clone()) {
                continue;
            }

            let mut reader_keys: Vec<String> = Vec::new();
            if let Some(deps) = self.dependents.get(&cell_key) {
                reader_keys.extend(deps.iter().cloned());
            }
            for covering in self.covering_nodes(&cell, store) {
                if let Some(deps) = self.dependents.get(&covering) {
                    reader_keys.extend(deps.iter().cloned());
                }
            }

            for reader in reader_keys {
                if let Some(DependencyNode::Cell {
                    workbook,
                    sheet,
                    addr,
                }) = self.nodes.get(&reader)
                {
                    let reader_cell = CellKey::new(workbook.clone(), sheet.clone(), *addr);
                    if !dirty.contains_key(&reader) {
                        dirty.insert(reader.clone(), reader_cell.clone());
                        queue.push_back(reader_cell);
                    }
                }
            }
        }

        dirty
    }

    /// Dependents of a named-expression or table node (by key).
    pub fn dependents_of_node(&self, key: &str) -> Vec<CellKey> {
        let mut out = Vec::new();
        if let Some(deps) = self.dependents.get(key) {
            for dep in deps {
                if let Some(DependencyNode::Cell {
                    workbook,
                    sheet,
                    addr,
                }) = self.nodes.get(dep)
                {
                    out.push(CellKey::new(workbook.clone(), sheet.clone(), *addr));
                }
            }
        }
        out
    }

    /// Kahn's algorithm over the sub-DAG induced by `cells`. Returns the
    /// evaluable order plus the cyclic remainder (for `#CYCLE!` marking).
    ///
    /// Edges between subset members are derived from direct cell edges and
    /// from range / table / multi-sheet precedents that cover a member.
    pub fn topo_order(
        &self,
        cells: &FxHashMap<String, CellKey>,
        store: &StateStore,
    ) -> (Vec<CellKey>, Vec<CellKey>) {
        // effective precedents within the subset
        let mut edges_out: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
        for key in cells.keys() {
            in_degree.insert(key.as_str(), 0);
        }

        for dep_key in cells.keys() {
            if let Some(precs) = self.precedents.get(dep_key) {
                for prec in precs {
                    if cells.contains_key(prec) {
                        edges_out
                            .entry(prec.as_str())
                            .or_default()
                            .push(dep_key.as_str());
                        if let Some(d) = in_degree.get_mut(dep_key.as_str()) {
                            *d += 1;
                        }
                    } else if let Some(node) = self.nodes.get(prec) {
                        // a range-like precedent may cover subset members
                        if !matches!(node, DependencyNode::Cell { .. }) {
                            for (other_key, other_cell) in cells {
                                if other_key != dep_key && node.covers(other_cell, store) {
                                    edges_out
                                        .entry(other_key.as_str())
                                        .or_default()
                                        .push(dep_key.as_str());
                                    if let Some(d) = in_degree.get_mut(dep_key.as_str()) {
                                        *d += 1;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();
        ready.sort_unstable();
        let mut queue: VecDeque<&str> = ready.into_iter().collect();

        let mut ordered = Vec::with_capacity(cells.len());
        let mut done: FxHashSet<&str> = FxHashSet::default();

        while let Some(key) = queue.pop_front() {
            if !done.insert(key) {
                continue;
            }
            ordered.push(cells[key].clone());
            let nexts: Vec<&str> = edges_out
                .get(key)
                .map(|v| v.clone())
                .unwrap_or_default();
            for next in nexts {
                if let Some(d) = in_degree.get_mut(next) {
                    *d = d.saturating_sub(1);
                    if *d == 0 && !done.contains(next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        let mut cyclic: Vec<CellKey> = cells
            .iter()
            .filter(|(k, _)| !done.contains(k.as_str()))
            .map(|(_, c)| c.clone())
            .collect();
        cyclic.sort_by_key(|c| c.to_string());

        (ordered, cyclic)
    }

    /// Keys of every node matching a predicate.
    pub fn node_keys_matching<F: Fn(&DependencyNode) -> bool>(&self, pred: &F) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| pred(node))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop every edge touching keys that match a predicate. Used when a
    /// sheet or workbook disappears.
    pub fn retain_nodes<F: Fn(&DependencyNode) -> bool>(&mut self, keep: F) {
        let doomed: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| !keep(node))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.clear_precedents(&key);
            if let Some(deps) = self.dependents.remove(&key) {
                for dep in deps {
                    if let Some(precs) = self.precedents.get_mut(&dep) {
                        precs.remove(&key);
                    }
                }
            }
            self.nodes.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell_node(wb: &str, sheet: &str, a1: &str) -> DependencyNode {
        DependencyNode::Cell {
            workbook: wb.into(),
            sheet: sheet.into(),
            addr: a1.parse().unwrap(),
        }
    }

    #[test]
    fn key_roundtrip() {
        let nodes = vec![
            cell_node("Book1", "Sheet1", "A1"),
            DependencyNode::Range {
                workbook: "Book1".into(),
                sheet: "Sheet1".into(),
                range: RangeAddr::finite(CellAddr::new(0, 0), CellAddr::new(9, 1)),
            },
            DependencyNode::Range {
                workbook: "B".into(),
                sheet: "S".into(),
                range: RangeAddr::new(CellAddr::new(4, 0), None, Some(0)),
            },
            DependencyNode::Range {
                workbook: "B".into(),
                sheet: "S".into(),
                range: RangeAddr::new(CellAddr::new(4, 0), Some(9), None),
            },
            DependencyNode::Range {
                workbook: "B".into(),
                sheet: "S".into(),
                range: RangeAddr::new(CellAddr::new(0, 0), None, None),
            },
            DependencyNode::MultiSheetRange {
                workbook: "B".into(),
                selector: SheetSelector::Span("S1".into(), "S3".into()),
                range: RangeAddr::finite(CellAddr::new(0, 0), CellAddr::new(1, 1)),
            },
            DependencyNode::MultiSheetRange {
                workbook: "B".into(),
                selector: SheetSelector::List(vec!["S1".into(), "S, 2".into()]),
                range: RangeAddr::finite(CellAddr::new(0, 0), CellAddr::new(0, 0)),
            },
            DependencyNode::Named {
                scope: NameScope::Global,
                name: "RATE".into(),
            },
            DependencyNode::Named {
                scope: NameScope::Workbook("W:1".into()),
                name: "RATE".into(),
            },
            DependencyNode::Named {
                scope: NameScope::Sheet("W".into(), "S".into()),
                name: "RATE".into(),
            },
            DependencyNode::Table {
                workbook: "B".into(),
                sheet: "S".into(),
                table: "Sales".into(),
                area: TableArea::Headers,
            },
            DependencyNode::Table {
                workbook: "B".into(),
                sheet: "S".into(),
                table: "Sales".into(),
                area: TableArea::Data {
                    cols: vec!["Price".into(), "Qty".into()],
                    current_row: Some(4),
                },
            },
        ];
        for node in nodes {
            let key = node.encode();
            assert_eq!(
                DependencyNode::decode(&key),
                Some(node.clone()),
                "key {key}"
            );
        }
    }

    #[test]
    fn edges_and_clear() {
        let mut g = DependencyGraph::default();
        let a1 = cell_node("B", "S", "A1");
        let b1 = cell_node("B", "S", "B1");
        g.add_edge(&b1, &a1);
        assert!(g
            .dependents_of(&a1.encode())
            .unwrap()
            .contains(&b1.encode()));
        g.clear_precedents(&b1.encode());
        assert!(g.dependents_of(&a1.encode()).is_none());
        assert!(g.node(&a1.encode()).is_none());
    }

    #[test]
    fn transitive_closure_through_ranges() {
        let mut g = DependencyGraph::default();
        let store = StateStore::default();
        let a1 = CellKey::new("B", "S", CellAddr::new(0, 0));
        let sum_cell = cell_node("B", "S", "C1");
        let range = DependencyNode::Range {
            workbook: "B".into(),
            sheet: "S".into(),
            range: RangeAddr::new(CellAddr::new(0, 0), None, Some(0)), // A:A
        };
        g.add_edge(&sum_cell, &range);

        let dirty = g.transitive_dependents(&[a1], &store);
        assert_eq!(dirty.len(), 1);
        assert!(dirty.contains_key(&sum_cell.encode()));
    }

    #[test]
    fn topo_detects_cycles() {
        let mut g = DependencyGraph::default();
        let store = StateStore::default();
        let a1 = cell_node("B", "S", "A1");
        let b1 = cell_node("B", "S", "B1");
        let c1 = cell_node("B", "S", "C1");
        g.add_edge(&a1, &b1);
        g.add_edge(&b1, &a1);
        g.add_edge(&c1, &a1);

        let mut subset = FxHashMap::default();
        for (node, key) in [(&a1, "A1"), (&b1, "B1"), (&c1, "C1")] {
            subset.insert(
                node.encode(),
                CellKey::new("B", "S", key.parse().unwrap()),
            );
        }
        let (ordered, cyclic) = g.topo_order(&subset, &store);
        // C1 depends on cyclic A1 and never becomes ready
        assert!(ordered.is_empty());
        assert_eq!(cyclic.len(), 3);
    }

    #[test]
    fn topo_orders_chain() {
        let mut g = DependencyGraph::default();
        let store = StateStore::default();
        let a1 = cell_node("B", "S", "A1");
        let b1 = cell_node("B", "S", "B1");
        let c1 = cell_node("B", "S", "C1");
        // C1 = B1 + 1; B1 = A1 + 1
        g.add_edge(&c1, &b1);
        g.add_edge(&b1, &a1);

        let mut subset = FxHashMap::default();
        subset.insert(b1.encode(), CellKey::new("B", "S", CellAddr::new(0, 1)));
        subset.insert(c1.encode(), CellKey::new("B", "S", CellAddr::new(0, 2)));
        let (ordered, cyclic) = g.topo_order(&subset, &store);
        assert!(cyclic.is_empty());
        assert_eq!(ordered[0].addr, CellAddr::new(0, 1));
        assert_eq!(ordered[1].addr, CellAddr::new(0, 2));
    }
}
