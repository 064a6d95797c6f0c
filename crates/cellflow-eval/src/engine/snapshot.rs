//! Engine-owned snapshot format.
//!
//! Only *serialized* state is persisted: cell content, named expressions,
//! and table geometry. Computed values, the dependency graph, and the spill
//! registry are rebuilt by replay on restore — the snapshot can never
//! disagree with the evaluator.

use cellflow_common::CellAddr;
use serde::{Deserialize, Serialize};

use super::names::NameScope;
use super::store::{CellContent, Sheet, StateStore, Workbook};
use super::tables::Table;
use super::{Engine, EngineApiError};

#[derive(Serialize, Deserialize)]
struct SheetSnap {
    name: String,
    cells: Vec<(String, CellContent)>,
}

#[derive(Serialize, Deserialize)]
struct WorkbookSnap {
    name: String,
    sheets: Vec<SheetSnap>,
}

#[derive(Serialize, Deserialize)]
struct NamedSnap {
    scope: NameScope,
    name: String,
    expression: String,
}

#[derive(Serialize, Deserialize)]
struct TableSnap {
    name: String,
    workbook: String,
    sheet: String,
    start_row: u32,
    start_col: u32,
    headers: Vec<String>,
    end_row: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct EngineSnapshot {
    version: u32,
    workbooks: Vec<WorkbookSnap>,
    named_expressions: Vec<NamedSnap>,
    tables: Vec<TableSnap>,
}

const SNAPSHOT_VERSION: u32 = 1;

pub fn serialize(engine: &Engine) -> String {
    let store = engine.store();

    let workbooks = store
        .workbooks
        .iter()
        .map(|wb| WorkbookSnap {
            name: wb.name.clone(),
            sheets: wb
                .sheets
                .iter()
                .map(|sheet| {
                    let mut cells: Vec<(String, CellContent)> = sheet
                        .cells
                        .iter()
                        .map(|(addr, cell)| (addr.to_string(), cell.content.clone()))
                        .collect();
                    cells.sort_by(|a, b| a.0.cmp(&b.0));
                    SheetSnap {
                        name: sheet.name.clone(),
                        cells,
                    }
                })
                .collect(),
        })
        .collect();

    let mut named_expressions: Vec<NamedSnap> = store
        .names
        .iter_all()
        .map(|(scope, expr)| NamedSnap {
            scope,
            name: expr.name.clone(),
            expression: expr.expression.clone(),
        })
        .collect();
    named_expressions.sort_by(|a, b| a.name.cmp(&b.name));

    let mut tables: Vec<TableSnap> = store
        .tables
        .iter()
        .map(|t| TableSnap {
            name: t.name.clone(),
            workbook: t.workbook.clone(),
            sheet: t.sheet.clone(),
            start_row: t.start.row,
            start_col: t.start.col,
            headers: t.headers.clone(),
            end_row: t.end_row,
        })
        .collect();
    tables.sort_by(|a, b| a.name.cmp(&b.name));

    let snapshot = EngineSnapshot {
        version: SNAPSHOT_VERSION,
        workbooks,
        named_expressions,
        tables,
    };
    serde_json::to_string(&snapshot).expect("snapshot serialization is infallible")
}

pub fn restore(engine: &mut Engine, data: &str) -> Result<(), EngineApiError> {
    let snapshot: EngineSnapshot = serde_json::from_str(data)
        .map_err(|e| EngineApiError::InvalidSnapshot(e.to_string()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(EngineApiError::InvalidSnapshot(format!(
            "unsupported snapshot version {}",
            snapshot.version
        )));
    }

    let mut store = StateStore::default();
    for wb_snap in snapshot.workbooks {
        let mut workbook = Workbook {
            name: wb_snap.name,
            sheets: Vec::new(),
        };
        for sheet_snap in wb_snap.sheets {
            let mut sheet = Sheet::new(sheet_snap.name);
            for (a1, content) in sheet_snap.cells {
                let addr: CellAddr = a1
                    .parse()
                    .map_err(|_| EngineApiError::InvalidSnapshot(format!("bad address {a1}")))?;
                sheet
                    .cells
                    .insert(addr, super::store::Cell::new(content));
            }
            workbook.sheets.push(sheet);
        }
        store.workbooks.push(workbook);
    }

    for named in snapshot.named_expressions {
        store
            .names
            .upsert(named.scope, &named.name, &named.expression)?;
    }

    for t in snapshot.tables {
        store.tables.add(Table {
            name: t.name,
            workbook: t.workbook,
            sheet: t.sheet,
            start: CellAddr::new(t.start_row, t.start_col),
            headers: t.headers,
            end_row: t.end_row,
        })?;
    }

    engine.reset_state(store);
    Ok(())
}
