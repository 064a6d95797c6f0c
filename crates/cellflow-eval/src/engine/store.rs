//! Workbook / sheet / cell state.
//!
//! Sheets keep creation order; workbook and sheet names are stored with
//! their original casing and matched case-insensitively. Stored content is
//! user input, never the computed value — the computed cache lives beside
//! the content and is dropped whenever content changes.

use std::rc::Rc;

use cellflow_common::{CellAddr, CellKey, LiteralValue, SheetKey};
use cellflow_parse::parser::{parse_formula_body, AstNode};
use rustc_hash::FxHashMap;

use super::names::NamedExpressionStore;
use super::tables::TableStore;
use super::EngineApiError;

/* ───────────────────── serialized content ───────────────────── */

/// What a caller hands to `set_cell_content`. `Text` beginning with `=` is
/// stored as a formula; `Empty` clears the cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellInput {
    Number(f64),
    Boolean(bool),
    Text(String),
    Empty,
}

impl From<f64> for CellInput {
    fn from(n: f64) -> Self {
        CellInput::Number(n)
    }
}
impl From<i64> for CellInput {
    fn from(n: i64) -> Self {
        CellInput::Number(n as f64)
    }
}
impl From<i32> for CellInput {
    fn from(n: i32) -> Self {
        CellInput::Number(n as f64)
    }
}
impl From<bool> for CellInput {
    fn from(b: bool) -> Self {
        CellInput::Boolean(b)
    }
}
impl From<&str> for CellInput {
    fn from(s: &str) -> Self {
        CellInput::Text(s.to_string())
    }
}
impl From<String> for CellInput {
    fn from(s: String) -> Self {
        CellInput::Text(s)
    }
}

/// What a cell stores: exactly one of a number, a boolean, a non-formula
/// text, or a formula string (with its leading `=`).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CellContent {
    Number(f64),
    Boolean(bool),
    Text(String),
    Formula(String),
}

impl CellContent {
    /// Classify raw input the way a grid does: `=`-prefixed strings are
    /// formulas, numeric-looking and TRUE/FALSE strings become typed
    /// values, empty input clears.
    pub fn from_input(input: CellInput) -> Option<Self> {
        match input {
            CellInput::Number(n) => Some(CellContent::Number(n)),
            CellInput::Boolean(b) => Some(CellContent::Boolean(b)),
            CellInput::Text(s) => {
                if s.is_empty() {
                    None
                } else if s.starts_with('=') {
                    Some(CellContent::Formula(s))
                } else if let Ok(n) = s.trim().parse::<f64>() {
                    if n.is_finite() && s.trim().starts_with(|c: char| {
                        c.is_ascii_digit() || c == '-' || c == '+' || c == '.'
                    }) {
                        Some(CellContent::Number(n))
                    } else {
                        Some(CellContent::Text(s))
                    }
                } else if s.trim() == "TRUE" {
                    Some(CellContent::Boolean(true))
                } else if s.trim() == "FALSE" {
                    Some(CellContent::Boolean(false))
                } else {
                    Some(CellContent::Text(s))
                }
            }
            CellInput::Empty => None,
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellContent::Formula(_))
    }

    /// The formula body (text after `=`), if this is a formula.
    pub fn formula_body(&self) -> Option<&str> {
        match self {
            CellContent::Formula(f) => Some(&f[1..]),
            _ => None,
        }
    }

    /// The literal value of non-formula content.
    pub fn literal(&self) -> Option<LiteralValue> {
        match self {
            CellContent::Number(n) => Some(LiteralValue::Number(*n)),
            CellContent::Boolean(b) => Some(LiteralValue::Boolean(*b)),
            CellContent::Text(s) => Some(LiteralValue::Text(s.clone())),
            CellContent::Formula(_) => None,
        }
    }
}

/// Semantic equality over serialized content: trimmed-text equality,
/// numeric-looking strings equal the number they parse to, and absent ≡
/// empty string. Drives no-op suppression.
pub fn semantically_equal(a: Option<&CellContent>, b: Option<&CellContent>) -> bool {
    use CellContent::*;
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => match (a, b) {
            (Number(x), Number(y)) => x == y,
            (Boolean(x), Boolean(y)) => x == y,
            (Formula(x), Formula(y)) => x.trim() == y.trim(),
            (Text(x), Text(y)) => x.trim() == y.trim(),
            (Number(x), Text(s)) | (Text(s), Number(x)) => {
                s.trim().parse::<f64>().map(|v| v == *x).unwrap_or(false)
            }
            _ => false,
        },
        _ => false,
    }
}

/* ───────────────────── cells and sheets ───────────────────── */

#[derive(Debug, Clone)]
pub struct Cell {
    pub content: CellContent,
    /// Parsed lazily for formulas; `None` until first evaluation.
    pub ast: Option<Rc<AstNode>>,
    /// Computed-value cache; cleared on content change.
    pub computed: Option<LiteralValue>,
}

impl Cell {
    pub fn new(content: CellContent) -> Self {
        Cell {
            content,
            ast: None,
            computed: None,
        }
    }

    /// Parse-on-demand. The parser is total; malformed formulas produce the
    /// reserved error AST.
    pub fn ensure_ast(&mut self) -> Rc<AstNode> {
        if let Some(ast) = &self.ast {
            return Rc::clone(ast);
        }
        let body = self.content.formula_body().unwrap_or("");
        let ast = Rc::new(parse_formula_body(body));
        self.ast = Some(Rc::clone(&ast));
        ast
    }
}

#[derive(Debug, Default)]
pub struct Sheet {
    pub name: String,
    pub cells: FxHashMap<CellAddr, Cell>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Sheet {
            name: name.into(),
            cells: FxHashMap::default(),
        }
    }

    /// Maximum occupied (row, col), `None` when the sheet is empty. Bounds
    /// reductions over open-ended ranges like `A:A`.
    pub fn dense_extent(&self) -> Option<(u32, u32)> {
        let mut max: Option<(u32, u32)> = None;
        for addr in self.cells.keys() {
            max = Some(match max {
                None => (addr.row, addr.col),
                Some((r, c)) => (r.max(addr.row), c.max(addr.col)),
            });
        }
        max
    }
}

#[derive(Debug, Default)]
pub struct Workbook {
    pub name: String,
    /// Creation order preserved; renames keep position.
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn sheet_position(&self, name: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/* ───────────────────── the store ───────────────────── */

#[derive(Debug, Default)]
pub struct StateStore {
    pub workbooks: Vec<Workbook>,
    pub names: NamedExpressionStore,
    pub tables: TableStore,
}

impl StateStore {
    pub fn workbook(&self, name: &str) -> Option<&Workbook> {
        self.workbooks
            .iter()
            .find(|w| w.name.eq_ignore_ascii_case(name))
    }

    pub fn workbook_mut(&mut self, name: &str) -> Option<&mut Workbook> {
        self.workbooks
            .iter_mut()
            .find(|w| w.name.eq_ignore_ascii_case(name))
    }

    pub fn add_workbook(&mut self, name: &str) -> Result<(), EngineApiError> {
        if name.is_empty() {
            return Err(EngineApiError::InvalidName(name.to_string()));
        }
        if self.workbook(name).is_some() {
            return Err(EngineApiError::DuplicateWorkbook(name.to_string()));
        }
        self.workbooks.push(Workbook {
            name: name.to_string(),
            sheets: Vec::new(),
        });
        Ok(())
    }

    pub fn remove_workbook(&mut self, name: &str) -> Result<Workbook, EngineApiError> {
        let pos = self
            .workbooks
            .iter()
            .position(|w| w.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| EngineApiError::UnknownWorkbook(name.to_string()))?;
        Ok(self.workbooks.remove(pos))
    }

    pub fn add_sheet(&mut self, key: &SheetKey) -> Result<SheetKey, EngineApiError> {
        if key.sheet.is_empty() {
            return Err(EngineApiError::InvalidName(key.sheet.clone()));
        }
        let wb = self
            .workbook_mut(&key.workbook)
            .ok_or_else(|| EngineApiError::UnknownWorkbook(key.workbook.clone()))?;
        if wb.sheet(&key.sheet).is_some() {
            return Err(EngineApiError::DuplicateSheet(key.sheet.clone()));
        }
        wb.sheets.push(Sheet::new(key.sheet.clone()));
        Ok(SheetKey::new(wb.name.clone(), key.sheet.clone()))
    }

    pub fn remove_sheet(&mut self, key: &SheetKey) -> Result<Sheet, EngineApiError> {
        let wb = self
            .workbook_mut(&key.workbook)
            .ok_or_else(|| EngineApiError::UnknownWorkbook(key.workbook.clone()))?;
        let pos = wb
            .sheet_position(&key.sheet)
            .ok_or_else(|| EngineApiError::UnknownSheet(key.sheet.clone()))?;
        Ok(wb.sheets.remove(pos))
    }

    /// Resolve a possibly differently-cased workbook name to its stored
    /// form.
    pub fn canonical_workbook(&self, name: &str) -> Option<String> {
        self.workbook(name).map(|w| w.name.clone())
    }

    /// Resolve a `(workbook, sheet)` pair to canonical casing.
    pub fn canonical_sheet(&self, workbook: &str, sheet: &str) -> Option<SheetKey> {
        let wb = self.workbook(workbook)?;
        let s = wb.sheet(sheet)?;
        Some(SheetKey::new(wb.name.clone(), s.name.clone()))
    }

    pub fn sheet(&self, key: &SheetKey) -> Option<&Sheet> {
        self.workbook(&key.workbook)?.sheet(&key.sheet)
    }

    pub fn sheet_mut(&mut self, key: &SheetKey) -> Option<&mut Sheet> {
        self.workbook_mut(&key.workbook)?.sheet_mut(&key.sheet)
    }

    /// The ordered sheet names between two endpoints (inclusive), in
    /// creation order. Endpoints may arrive in either order.
    pub fn sheet_span(&self, workbook: &str, first: &str, second: &str) -> Option<Vec<String>> {
        let wb = self.workbook(workbook)?;
        let a = wb.sheet_position(first)?;
        let b = wb.sheet_position(second)?;
        let (lo, hi) = (a.min(b), a.max(b));
        Some(wb.sheets[lo..=hi].iter().map(|s| s.name.clone()).collect())
    }

    pub fn cell(&self, key: &CellKey) -> Option<&Cell> {
        self.workbook(&key.workbook)?
            .sheet(&key.sheet)?
            .cells
            .get(&key.addr)
    }

    pub fn cell_mut(&mut self, key: &CellKey) -> Option<&mut Cell> {
        self.workbook_mut(&key.workbook)?
            .sheet_mut(&key.sheet)?
            .cells
            .get_mut(&key.addr)
    }

    pub fn serialized(&self, key: &CellKey) -> Option<&CellContent> {
        self.cell(key).map(|c| &c.content)
    }

    /// Replace (or clear, with `None`) a cell's serialized content. Returns
    /// the previous content. The computed cache and parsed AST drop with the
    /// old content.
    pub fn set_serialized(
        &mut self,
        key: &CellKey,
        content: Option<CellContent>,
    ) -> Option<CellContent> {
        let sheet = self
            .workbook_mut(&key.workbook)
            .and_then(|w| w.sheet_mut(&key.sheet));
        let sheet = match sheet {
            Some(s) => s,
            None => return None,
        };
        match content {
            Some(content) => sheet
                .cells
                .insert(key.addr, Cell::new(content))
                .map(|c| c.content),
            None => sheet.cells.remove(&key.addr).map(|c| c.content),
        }
    }

    pub fn dense_extent(&self, workbook: &str, sheet: &str) -> Option<(u32, u32)> {
        self.workbook(workbook)?.sheet(sheet)?.dense_extent()
    }

    /// Every formula cell in the engine, as canonical keys.
    pub fn formula_cells(&self) -> Vec<CellKey> {
        let mut out = Vec::new();
        for wb in &self.workbooks {
            for sheet in &wb.sheets {
                for (addr, cell) in &sheet.cells {
                    if cell.content.is_formula() {
                        out.push(CellKey::new(wb.name.clone(), sheet.name.clone(), *addr));
                    }
                }
            }
        }
        out
    }
}
