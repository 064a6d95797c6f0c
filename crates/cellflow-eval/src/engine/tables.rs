//! Tables: named rectangular data regions with header-addressable columns.
//!
//! Table names are unique engine-wide and matched case-insensitively. A
//! table owns its geometry only; cell content stays in the sheet, and
//! structured references resolve against the table's *current* bounding box.

use cellflow_common::{CellAddr, RangeAddr};
use cellflow_parse::parser::is_valid_name;

use super::graph::TableArea;
use super::EngineApiError;

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    /// Canonical owning workbook / sheet names.
    pub workbook: String,
    pub sheet: String,
    /// Top-left cell of the header row.
    pub start: CellAddr,
    /// Ordered headers; column j lives at `start.col + j`.
    pub headers: Vec<String>,
    /// Inclusive last data row; `None` = unbounded.
    pub end_row: Option<u32>,
}

impl Table {
    pub fn header_row(&self) -> u32 {
        self.start.row
    }

    pub fn data_start_row(&self) -> u32 {
        self.start.row + 1
    }

    pub fn last_col(&self) -> u32 {
        self.start.col + self.headers.len().saturating_sub(1) as u32
    }

    /// Position of a header, matched case-insensitively.
    pub fn header_index(&self, header: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(header))
    }

    /// Absolute column of a header.
    pub fn header_col(&self, header: &str) -> Option<u32> {
        self.header_index(header)
            .map(|i| self.start.col + i as u32)
    }

    /// Resolve a table area to the range it currently covers. `None` when a
    /// named column does not exist or a current-row narrowing falls outside
    /// the data region.
    pub fn resolve_area(&self, area: &TableArea) -> Option<RangeAddr> {
        match area {
            TableArea::Headers => Some(RangeAddr::new(
                self.start,
                Some(self.header_row()),
                Some(self.last_col()),
            )),
            TableArea::All => Some(RangeAddr::new(
                self.start,
                self.end_row,
                Some(self.last_col()),
            )),
            TableArea::AllData => Some(RangeAddr::new(
                CellAddr::new(self.data_start_row(), self.start.col),
                self.end_row,
                Some(self.last_col()),
            )),
            TableArea::Data { cols, current_row } => {
                let mut col_lo = u32::MAX;
                let mut col_hi = 0u32;
                for name in cols {
                    let col = self.header_col(name)?;
                    col_lo = col_lo.min(col);
                    col_hi = col_hi.max(col);
                }
                if cols.is_empty() {
                    col_lo = self.start.col;
                    col_hi = self.last_col();
                }
                match current_row {
                    Some(row) => {
                        if *row < self.data_start_row()
                            || self.end_row.map(|er| *row > er).unwrap_or(false)
                        {
                            return None;
                        }
                        Some(RangeAddr::new(
                            CellAddr::new(*row, col_lo),
                            Some(*row),
                            Some(col_hi),
                        ))
                    }
                    None => Some(RangeAddr::new(
                        CellAddr::new(self.data_start_row(), col_lo),
                        self.end_row,
                        Some(col_hi),
                    )),
                }
            }
        }
    }
}

/// Engine-global table registry.
#[derive(Debug, Default)]
pub struct TableStore {
    tables: Vec<Table>,
}

impl TableStore {
    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Names are unique across the whole engine.
    pub fn add(&mut self, table: Table) -> Result<(), EngineApiError> {
        if !is_valid_name(&table.name) {
            return Err(EngineApiError::InvalidName(table.name));
        }
        if self.get(&table.name).is_some() {
            return Err(EngineApiError::DuplicateTable(table.name));
        }
        self.tables.push(table);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Table, EngineApiError> {
        let pos = self
            .tables
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| EngineApiError::UnknownTable(name.to_string()))?;
        Ok(self.tables.remove(pos))
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), EngineApiError> {
        if !is_valid_name(new) {
            return Err(EngineApiError::InvalidName(new.to_string()));
        }
        if !old.eq_ignore_ascii_case(new) && self.get(new).is_some() {
            return Err(EngineApiError::DuplicateTable(new.to_string()));
        }
        let table = self
            .get_mut(old)
            .ok_or_else(|| EngineApiError::UnknownTable(old.to_string()))?;
        table.name = new.to_string();
        Ok(())
    }

    /// Sheet renames update owned tables in place.
    pub fn rename_sheet(&mut self, workbook: &str, old: &str, new: &str) {
        for table in &mut self.tables {
            if table.workbook.eq_ignore_ascii_case(workbook)
                && table.sheet.eq_ignore_ascii_case(old)
            {
                table.sheet = new.to_string();
            }
        }
    }

    pub fn rename_workbook(&mut self, old: &str, new: &str) {
        for table in &mut self.tables {
            if table.workbook.eq_ignore_ascii_case(old) {
                table.workbook = new.to_string();
            }
        }
    }

    /// Sheet/workbook removal drops owned tables.
    pub fn remove_for_sheet(&mut self, workbook: &str, sheet: &str) {
        self.tables.retain(|t| {
            !(t.workbook.eq_ignore_ascii_case(workbook) && t.sheet.eq_ignore_ascii_case(sheet))
        });
    }

    pub fn remove_for_workbook(&mut self, workbook: &str) {
        self.tables
            .retain(|t| !t.workbook.eq_ignore_ascii_case(workbook));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table {
            name: "Sales".into(),
            workbook: "Book1".into(),
            sheet: "Sheet1".into(),
            start: CellAddr::new(0, 0),
            headers: vec!["Price".into(), "Qty".into()],
            end_row: Some(3),
        }
    }

    #[test]
    fn area_resolution() {
        let t = table();
        assert_eq!(
            t.resolve_area(&TableArea::Headers).unwrap(),
            RangeAddr::finite(CellAddr::new(0, 0), CellAddr::new(0, 1))
        );
        assert_eq!(
            t.resolve_area(&TableArea::All).unwrap(),
            RangeAddr::finite(CellAddr::new(0, 0), CellAddr::new(3, 1))
        );
        assert_eq!(
            t.resolve_area(&TableArea::AllData).unwrap(),
            RangeAddr::finite(CellAddr::new(1, 0), CellAddr::new(3, 1))
        );
        assert_eq!(
            t.resolve_area(&TableArea::Data {
                cols: vec!["Qty".into()],
                current_row: None
            })
            .unwrap(),
            RangeAddr::finite(CellAddr::new(1, 1), CellAddr::new(3, 1))
        );
        assert_eq!(
            t.resolve_area(&TableArea::Data {
                cols: vec!["qty".into()],
                current_row: Some(2)
            })
            .unwrap(),
            RangeAddr::single(CellAddr::new(2, 1))
        );
        assert!(t
            .resolve_area(&TableArea::Data {
                cols: vec!["Missing".into()],
                current_row: None
            })
            .is_none());
        // current row outside the data region
        assert!(t
            .resolve_area(&TableArea::Data {
                cols: vec!["Qty".into()],
                current_row: Some(0)
            })
            .is_none());
    }

    #[test]
    fn unbounded_table_area() {
        let mut t = table();
        t.end_row = None;
        let area = t.resolve_area(&TableArea::AllData).unwrap();
        assert_eq!(area.end_row, None);
        assert_eq!(area.end_col, Some(1));
    }

    #[test]
    fn names_unique_engine_wide() {
        let mut store = TableStore::default();
        store.add(table()).unwrap();
        let mut other = table();
        other.name = "SALES".into();
        other.sheet = "Sheet2".into();
        assert!(matches!(
            store.add(other),
            Err(EngineApiError::DuplicateTable(_))
        ));
        store.rename("sales", "Orders").unwrap();
        assert!(store.get("Sales").is_none());
        assert!(store.get("orders").is_some());
    }
}
