//! Workbook-scoped addresses.
//!
//! The engine is multi-workbook: a cell is identified by
//! `(workbook, sheet, row, col)`. Workbook and sheet names are stored with
//! their original casing and matched case-insensitively; the structs here
//! always carry the *canonical* (stored) names, so equality and hashing stay
//! byte-wise.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::coord::CellAddr;

/// Identifies one sheet of one workbook.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SheetKey {
    pub workbook: String,
    pub sheet: String,
}

impl SheetKey {
    pub fn new(workbook: impl Into<String>, sheet: impl Into<String>) -> Self {
        SheetKey {
            workbook: workbook.into(),
            sheet: sheet.into(),
        }
    }
}

impl fmt::Display for SheetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.workbook, self.sheet)
    }
}

/// Global cell identity.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CellKey {
    pub workbook: String,
    pub sheet: String,
    pub addr: CellAddr,
}

impl CellKey {
    pub fn new(workbook: impl Into<String>, sheet: impl Into<String>, addr: CellAddr) -> Self {
        CellKey {
            workbook: workbook.into(),
            sheet: sheet.into(),
            addr,
        }
    }

    pub fn sheet_key(&self) -> SheetKey {
        SheetKey::new(self.workbook.clone(), self.sheet.clone())
    }

    /// True when this cell lives on the given sheet.
    pub fn on_sheet(&self, sheet: &SheetKey) -> bool {
        self.workbook == sheet.workbook && self.sheet == sheet.sheet
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}!{}", self.workbook, self.sheet, self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let key = CellKey::new("Book1", "Sheet1", CellAddr::new(0, 1));
        assert_eq!(key.to_string(), "[Book1]Sheet1!B1");
        assert_eq!(key.sheet_key().to_string(), "[Book1]Sheet1");
    }
}
