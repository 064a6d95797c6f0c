//! The spill registry: which cells are occupied by live spilled arrays, and
//! which origins are currently suppressed by an obstruction.
//!
//! A cell is "spilled-into" iff it appears in the registry with an origin
//! other than itself. Spilled-into cells hold no serialized content
//! (invariant: user content in the area suppresses the spill and turns the
//! origin into `#SPILL!`). Suppressed origins are remembered with their
//! intended area so that clearing the obstruction restores the spill
//! without needing a graph edge.

use cellflow_common::{CellKey, LiteralValue, RangeAddr};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct SpillRecord {
    pub origin: CellKey,
    pub range: RangeAddr,
    /// Row-major values for the whole area; `values[0][0]` is the origin.
    pub values: Vec<Vec<LiteralValue>>,
}

impl SpillRecord {
    pub fn value_at(&self, cell: &CellKey) -> Option<&LiteralValue> {
        if !cell.on_sheet(&self.origin.sheet_key()) {
            return None;
        }
        let row = cell.addr.row.checked_sub(self.origin.addr.row)? as usize;
        let col = cell.addr.col.checked_sub(self.origin.addr.col)? as usize;
        self.values.get(row)?.get(col)
    }

    /// Every cell the record occupies.
    pub fn cells(&self) -> Vec<CellKey> {
        let mut out = Vec::new();
        if let Ok(iter) = self.range.iter_finite() {
            for addr in iter {
                out.push(CellKey::new(
                    self.origin.workbook.clone(),
                    self.origin.sheet.clone(),
                    addr,
                ));
            }
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct SpillRegistry {
    records: FxHashMap<CellKey, SpillRecord>,
    /// cell → origin, for every occupied cell (origin included).
    occupied: FxHashMap<CellKey, CellKey>,
    /// Suppressed spills: origin → intended area.
    blocked: FxHashMap<CellKey, RangeAddr>,
}

impl SpillRegistry {
    pub fn record(&self, origin: &CellKey) -> Option<&SpillRecord> {
        self.records.get(origin)
    }

    /// Origins of every live spill.
    pub fn live_origins(&self) -> impl Iterator<Item = &CellKey> {
        self.records.keys()
    }

    /// The origin occupying a cell, if any.
    pub fn origin_of(&self, cell: &CellKey) -> Option<&CellKey> {
        self.occupied.get(cell)
    }

    pub fn is_spilled_into(&self, cell: &CellKey) -> bool {
        match self.occupied.get(cell) {
            Some(origin) => origin != cell,
            None => false,
        }
    }

    /// The per-offset value a spilled-into (or origin) cell shows.
    pub fn value_at(&self, cell: &CellKey) -> Option<LiteralValue> {
        let origin = self.occupied.get(cell)?;
        self.records.get(origin)?.value_at(cell).cloned()
    }

    /// Install a live spill. The caller has already verified the area is
    /// unobstructed. Returns the cells now occupied.
    pub fn commit(&mut self, record: SpillRecord) -> Vec<CellKey> {
        let origin = record.origin.clone();
        self.retract(&origin);
        self.blocked.remove(&origin);
        let cells = record.cells();
        for cell in &cells {
            self.occupied.insert(cell.clone(), origin.clone());
        }
        self.records.insert(origin, record);
        cells
    }

    /// Remove a live spill. Returns the cells it occupied.
    pub fn retract(&mut self, origin: &CellKey) -> Vec<CellKey> {
        match self.records.remove(origin) {
            Some(record) => {
                let cells = record.cells();
                for cell in &cells {
                    self.occupied.remove(cell);
                }
                cells
            }
            None => Vec::new(),
        }
    }

    /// Remember a suppressed spill so obstruction removal can restore it.
    pub fn mark_blocked(&mut self, origin: CellKey, intended: RangeAddr) {
        self.retract(&origin);
        self.blocked.insert(origin, intended);
    }

    pub fn clear_blocked(&mut self, origin: &CellKey) {
        self.blocked.remove(origin);
    }

    /// Origins whose live or intended area covers the given cell (excluding
    /// the cell being that origin itself).
    pub fn origins_touching(&self, cell: &CellKey) -> Vec<CellKey> {
        let mut out = Vec::new();
        if let Some(origin) = self.occupied.get(cell) {
            if origin != cell {
                out.push(origin.clone());
            }
        }
        for (origin, intended) in &self.blocked {
            if origin != cell
                && cell.on_sheet(&origin.sheet_key())
                && intended.contains(cell.addr)
            {
                out.push(origin.clone());
            }
        }
        out
    }

    /// Drop every record touching a sheet predicate. Used on sheet or
    /// workbook removal.
    pub fn retain_sheets<F: Fn(&CellKey) -> bool>(&mut self, keep: F) {
        let doomed: Vec<CellKey> = self
            .records
            .keys()
            .filter(|origin| !keep(origin))
            .cloned()
            .collect();
        for origin in doomed {
            self.retract(&origin);
        }
        self.blocked.retain(|origin, _| keep(origin));
    }

    fn rekey<F: Fn(&CellKey) -> CellKey>(&mut self, fix: F) {
        let records = std::mem::take(&mut self.records);
        self.records = records
            .into_iter()
            .map(|(origin, mut record)| {
                record.origin = fix(&record.origin);
                (fix(&origin), record)
            })
            .collect();
        let occupied = std::mem::take(&mut self.occupied);
        self.occupied = occupied
            .into_iter()
            .map(|(cell, origin)| (fix(&cell), fix(&origin)))
            .collect();
        let blocked = std::mem::take(&mut self.blocked);
        self.blocked = blocked
            .into_iter()
            .map(|(origin, range)| (fix(&origin), range))
            .collect();
    }

    /// Rewrite sheet names in-place after a rename.
    pub fn rename_sheet(&mut self, workbook: &str, old: &str, new: &str) {
        let workbook = workbook.to_string();
        let old = old.to_string();
        let new = new.to_string();
        self.rekey(move |key| {
            if key.workbook.eq_ignore_ascii_case(&workbook) && key.sheet.eq_ignore_ascii_case(&old)
            {
                CellKey::new(key.workbook.clone(), new.clone(), key.addr)
            } else {
                key.clone()
            }
        });
    }

    pub fn rename_workbook(&mut self, old: &str, new: &str) {
        let old = old.to_string();
        let new = new.to_string();
        self.rekey(move |key| {
            if key.workbook.eq_ignore_ascii_case(&old) {
                CellKey::new(new.clone(), key.sheet.clone(), key.addr)
            } else {
                key.clone()
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellflow_common::CellAddr;

    fn key(a1: &str) -> CellKey {
        CellKey::new("B", "S", a1.parse().unwrap())
    }

    fn record() -> SpillRecord {
        SpillRecord {
            origin: key("A1"),
            range: RangeAddr::finite(CellAddr::new(0, 0), CellAddr::new(2, 0)),
            values: vec![
                vec![LiteralValue::Number(1.0)],
                vec![LiteralValue::Number(2.0)],
                vec![LiteralValue::Number(3.0)],
            ],
        }
    }

    #[test]
    fn commit_and_lookup() {
        let mut reg = SpillRegistry::default();
        let cells = reg.commit(record());
        assert_eq!(cells.len(), 3);
        assert!(reg.is_spilled_into(&key("A2")));
        assert!(!reg.is_spilled_into(&key("A1")));
        assert_eq!(reg.value_at(&key("A3")), Some(LiteralValue::Number(3.0)));
        assert_eq!(reg.origin_of(&key("A2")), Some(&key("A1")));
    }

    #[test]
    fn retract_clears_occupancy() {
        let mut reg = SpillRegistry::default();
        reg.commit(record());
        let cells = reg.retract(&key("A1"));
        assert_eq!(cells.len(), 3);
        assert!(reg.value_at(&key("A2")).is_none());
    }

    #[test]
    fn blocked_origins_are_touched_by_area_edits() {
        let mut reg = SpillRegistry::default();
        reg.mark_blocked(
            key("A1"),
            RangeAddr::finite(CellAddr::new(0, 0), CellAddr::new(4, 0)),
        );
        assert_eq!(reg.origins_touching(&key("A3")), vec![key("A1")]);
        assert!(reg.origins_touching(&key("B3")).is_empty());
    }
}
