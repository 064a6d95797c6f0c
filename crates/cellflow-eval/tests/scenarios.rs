//! End-to-end engine scenarios: cascades, cycles, cross-sheet reads,
//! spills, renames, and scoped name resolution.

use std::cell::RefCell;
use std::rc::Rc;

use cellflow_eval::{
    CellContent, Engine, EngineEvent, ErrorKind, LiteralValue, NameScope, SheetKey,
};

fn engine_with(workbook: &str, sheets: &[&str]) -> Engine {
    let mut engine = Engine::new();
    engine.add_workbook(workbook).unwrap();
    for sheet in sheets {
        engine
            .add_sheet(&SheetKey::new(workbook, *sheet))
            .unwrap();
    }
    engine
}

fn set(engine: &mut Engine, sheet: &str, a1: &str, input: &str) {
    let key = engine.cell("Book1", sheet, a1).unwrap();
    engine.set_cell_content(&key, input).unwrap();
}

fn set_num(engine: &mut Engine, sheet: &str, a1: &str, n: f64) {
    let key = engine.cell("Book1", sheet, a1).unwrap();
    engine.set_cell_content(&key, n).unwrap();
}

fn value(engine: &mut Engine, sheet: &str, a1: &str) -> Option<LiteralValue> {
    let key = engine.cell("Book1", sheet, a1).unwrap();
    engine.get_cell_value(&key)
}

fn num(engine: &mut Engine, sheet: &str, a1: &str) -> f64 {
    match value(engine, sheet, a1) {
        Some(LiteralValue::Number(n)) => n,
        other => panic!("expected a number, got {other:?}"),
    }
}

fn error_kind(engine: &mut Engine, sheet: &str, a1: &str) -> ErrorKind {
    match value(engine, sheet, a1) {
        Some(LiteralValue::Error(e)) => e.kind,
        other => panic!("expected an error, got {other:?}"),
    }
}

/* ───────────── S1: arithmetic cascade ───────────── */

#[test]
fn arithmetic_cascade() {
    let mut engine = engine_with("Book1", &["Sheet1"]);

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let _sub = engine.on_cells_update(&SheetKey::new("Book1", "Sheet1"), move |event| {
        if let EngineEvent::CellsUpdated { cells, .. } = event {
            sink.borrow_mut().push(cells.len());
        }
    });

    set_num(&mut engine, "Sheet1", "A1", 10.0);
    set(&mut engine, "Sheet1", "B1", "=A1*2");
    set(&mut engine, "Sheet1", "C1", "=B1+5");
    assert_eq!(num(&mut engine, "Sheet1", "C1"), 25.0);

    let before = events.borrow().len();
    set_num(&mut engine, "Sheet1", "A1", 20.0);
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 40.0);
    assert_eq!(num(&mut engine, "Sheet1", "C1"), 45.0);

    // exactly one cells-updated per setCellContent
    assert_eq!(events.borrow().len(), before + 1);
}

/* ───────────── S2: cycle ───────────── */

#[test]
fn two_cell_cycle_marks_both() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "=B1");
    set(&mut engine, "Sheet1", "B1", "=A1");
    assert_eq!(error_kind(&mut engine, "Sheet1", "A1"), ErrorKind::Cycle);
    assert_eq!(error_kind(&mut engine, "Sheet1", "B1"), ErrorKind::Cycle);
}

#[test]
fn self_reference_cycles() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "=A1+1");
    assert_eq!(error_kind(&mut engine, "Sheet1", "A1"), ErrorKind::Cycle);
}

#[test]
fn breaking_a_cycle_recovers() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "=B1");
    set(&mut engine, "Sheet1", "B1", "=A1");
    set_num(&mut engine, "Sheet1", "A1", 7.0);
    assert_eq!(num(&mut engine, "Sheet1", "A1"), 7.0);
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 7.0);
}

#[test]
fn conditionally_unreached_reference_is_not_a_cycle() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "B1", "=IF(FALSE,A1,7)");
    set(&mut engine, "Sheet1", "A1", "=B1");
    assert_eq!(num(&mut engine, "Sheet1", "A1"), 7.0);
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 7.0);
}

/* ───────────── S3: cross-sheet ───────────── */

#[test]
fn cross_sheet_average() {
    let mut engine = engine_with("Book1", &["Sheet1", "Sheet2"]);
    set_num(&mut engine, "Sheet2", "B1", 50.0);
    set_num(&mut engine, "Sheet2", "B2", 100.0);
    set(&mut engine, "Sheet1", "A1", "=AVERAGE(Sheet2!B1:B2)");
    assert_eq!(num(&mut engine, "Sheet1", "A1"), 75.0);

    // cross-sheet edit propagates
    set_num(&mut engine, "Sheet2", "B1", 100.0);
    assert_eq!(num(&mut engine, "Sheet1", "A1"), 100.0);
}

#[test]
fn multi_sheet_range_sums_the_span() {
    let mut engine = engine_with("Book1", &["S1", "S2", "S3"]);
    for sheet in ["S1", "S2", "S3"] {
        set_num(&mut engine, sheet, "A1", 10.0);
    }
    set(&mut engine, "S1", "C1", "=SUM(S1:S3!A1:A1)");
    assert_eq!(num(&mut engine, "S1", "C1"), 30.0);

    set_num(&mut engine, "S2", "A1", 40.0);
    assert_eq!(num(&mut engine, "S1", "C1"), 60.0);
}

/* ───────────── S4: spill + obstruction ───────────── */

#[test]
fn sequence_spills_and_reacts_to_obstruction() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "=SEQUENCE(5)");
    for (a1, expected) in [("A1", 1.0), ("A2", 2.0), ("A3", 3.0), ("A4", 4.0), ("A5", 5.0)] {
        assert_eq!(num(&mut engine, "Sheet1", a1), expected, "{a1}");
    }
    // spilled-into cells hold no serialized content
    let a3 = engine.cell("Book1", "Sheet1", "A3").unwrap();
    assert_eq!(engine.get_cell_serialized(&a3), None);

    set(&mut engine, "Sheet1", "A3", "X");
    assert_eq!(error_kind(&mut engine, "Sheet1", "A1"), ErrorKind::Spill);
    assert_eq!(value(&mut engine, "Sheet1", "A2"), None);
    assert_eq!(value(&mut engine, "Sheet1", "A4"), None);
    assert_eq!(value(&mut engine, "Sheet1", "A5"), None);
    assert_eq!(
        value(&mut engine, "Sheet1", "A3"),
        Some(LiteralValue::Text("X".into()))
    );

    // clearing the obstruction restores the original spilled values
    engine.set_cell_content(&a3, "").unwrap();
    for (a1, expected) in [("A1", 1.0), ("A2", 2.0), ("A3", 3.0), ("A4", 4.0), ("A5", 5.0)] {
        assert_eq!(num(&mut engine, "Sheet1", a1), expected, "{a1} after clear");
    }
}

#[test]
fn formulas_read_spilled_cells() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "=SEQUENCE(4)");
    set(&mut engine, "Sheet1", "C1", "=SUM(A1:A4)");
    assert_eq!(num(&mut engine, "Sheet1", "C1"), 10.0);

    set(&mut engine, "Sheet1", "A1", "=SEQUENCE(4,1,10)");
    assert_eq!(num(&mut engine, "Sheet1", "C1"), 46.0);
}

#[test]
fn open_ended_sum_sees_spilled_cells() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "=SEQUENCE(3)");
    set(&mut engine, "Sheet1", "B1", "=SUM(A:A)");
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 6.0);
}

#[test]
fn shrinking_spill_clears_stale_cells() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "=SEQUENCE(5)");
    set(&mut engine, "Sheet1", "A1", "=SEQUENCE(2)");
    assert_eq!(num(&mut engine, "Sheet1", "A2"), 2.0);
    assert_eq!(value(&mut engine, "Sheet1", "A3"), None);
    assert_eq!(value(&mut engine, "Sheet1", "A5"), None);
}

#[test]
fn infinite_sequence_shows_origin_value_only() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "=SEQUENCE(INFINITY)");
    assert_eq!(num(&mut engine, "Sheet1", "A1"), 1.0);
    assert_eq!(value(&mut engine, "Sheet1", "A2"), None);
}

/* ───────────── S5: table rename propagation ───────────── */

#[test]
fn table_rename_rewrites_formulas_and_keeps_values() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "Price");
    set_num(&mut engine, "Sheet1", "A2", 10.0);
    set_num(&mut engine, "Sheet1", "A3", 20.0);
    set_num(&mut engine, "Sheet1", "A4", 30.0);
    engine
        .add_table(
            "T",
            &SheetKey::new("Book1", "Sheet1"),
            "A1".parse().unwrap(),
            4,
            1,
        )
        .unwrap();

    set(&mut engine, "Sheet1", "B1", "=SUM(T[Price])");
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 60.0);

    engine.rename_table("T", "Sales").unwrap();
    let b1 = engine.cell("Book1", "Sheet1", "B1").unwrap();
    assert_eq!(
        engine.get_cell_serialized(&b1),
        Some(CellContent::Formula("=SUM(Sales[Price])".into()))
    );
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 60.0);
}

#[test]
fn table_edits_propagate_to_structured_readers() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "Price");
    set_num(&mut engine, "Sheet1", "A2", 1.0);
    set_num(&mut engine, "Sheet1", "A3", 2.0);
    engine
        .add_table(
            "Sales",
            &SheetKey::new("Book1", "Sheet1"),
            "A1".parse().unwrap(),
            3,
            1,
        )
        .unwrap();
    set(&mut engine, "Sheet1", "C1", "=SUM(Sales[Price])");
    assert_eq!(num(&mut engine, "Sheet1", "C1"), 3.0);

    set_num(&mut engine, "Sheet1", "A2", 100.0);
    assert_eq!(num(&mut engine, "Sheet1", "C1"), 102.0);

    engine.remove_table("Sales").unwrap();
    assert_eq!(error_kind(&mut engine, "Sheet1", "C1"), ErrorKind::Ref);
}

#[test]
fn current_row_structured_reference() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "Price");
    set(&mut engine, "Sheet1", "B1", "Qty");
    set_num(&mut engine, "Sheet1", "A2", 5.0);
    set_num(&mut engine, "Sheet1", "B2", 3.0);
    set_num(&mut engine, "Sheet1", "A3", 7.0);
    set_num(&mut engine, "Sheet1", "B3", 2.0);
    engine
        .add_table(
            "Orders",
            &SheetKey::new("Book1", "Sheet1"),
            "A1".parse().unwrap(),
            3,
            2,
        )
        .unwrap();

    set(&mut engine, "Sheet1", "D2", "=Orders[@Price]*Orders[@Qty]");
    set(&mut engine, "Sheet1", "D3", "=Orders[@Price]*Orders[@Qty]");
    assert_eq!(num(&mut engine, "Sheet1", "D2"), 15.0);
    assert_eq!(num(&mut engine, "Sheet1", "D3"), 14.0);
}

/* ───────────── S6: named-expression scoping ───────────── */

#[test]
fn named_expression_scope_resolution() {
    let mut engine = Engine::new();
    engine.add_workbook("W1").unwrap();
    engine.add_workbook("W2").unwrap();
    engine.add_sheet(&SheetKey::new("W1", "Sheet1")).unwrap();
    engine.add_sheet(&SheetKey::new("W2", "Sheet1")).unwrap();

    engine
        .add_named_expression("RATE", "0.1", NameScope::Global)
        .unwrap();
    engine
        .add_named_expression("RATE", "0.2", NameScope::Workbook("W1".into()))
        .unwrap();

    let w1 = engine.cell("W1", "Sheet1", "A1").unwrap();
    let w2 = engine.cell("W2", "Sheet1", "A1").unwrap();
    engine.set_cell_content(&w1, "=RATE*100").unwrap();
    engine.set_cell_content(&w2, "=RATE*100").unwrap();

    assert_eq!(
        engine.get_cell_value(&w1),
        Some(LiteralValue::Number(20.0))
    );
    assert_eq!(
        engine.get_cell_value(&w2),
        Some(LiteralValue::Number(10.0))
    );
}

#[test]
fn named_expression_updates_re_evaluate_readers() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    engine
        .add_named_expression("TAX", "0.2", NameScope::Global)
        .unwrap();
    set(&mut engine, "Sheet1", "A1", "=TAX*100");
    assert_eq!(num(&mut engine, "Sheet1", "A1"), 20.0);

    engine
        .add_named_expression("TAX", "0.5", NameScope::Global)
        .unwrap();
    assert_eq!(num(&mut engine, "Sheet1", "A1"), 50.0);

    engine
        .remove_named_expression("TAX", NameScope::Global)
        .unwrap();
    assert_eq!(error_kind(&mut engine, "Sheet1", "A1"), ErrorKind::Name);
}

#[test]
fn named_expression_with_references_tracks_precedents() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set_num(&mut engine, "Sheet1", "A1", 3.0);
    engine
        .add_named_expression("DOUBLED", "=A1*2", NameScope::Global)
        .unwrap();
    set(&mut engine, "Sheet1", "B1", "=DOUBLED+1");
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 7.0);

    // the named expression's precedents are edges from the referencing cell
    set_num(&mut engine, "Sheet1", "A1", 10.0);
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 21.0);
}

#[test]
fn rename_named_expression_rewrites_formulas() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    engine
        .add_named_expression("RATE", "0.5", NameScope::Global)
        .unwrap();
    set(&mut engine, "Sheet1", "A1", "=RATE*10");
    assert_eq!(num(&mut engine, "Sheet1", "A1"), 5.0);

    engine
        .rename_named_expression("RATE", "FACTOR", NameScope::Global)
        .unwrap();
    let a1 = engine.cell("Book1", "Sheet1", "A1").unwrap();
    assert_eq!(
        engine.get_cell_serialized(&a1),
        Some(CellContent::Formula("=FACTOR*10".into()))
    );
    assert_eq!(num(&mut engine, "Sheet1", "A1"), 5.0);
}

/* ───────────── sheet lifecycle ───────────── */

#[test]
fn sheet_rename_rewrites_and_preserves_values() {
    let mut engine = engine_with("Book1", &["Sheet1", "Sheet2"]);
    set_num(&mut engine, "Sheet2", "A1", 42.0);
    set(&mut engine, "Sheet1", "B1", "=Sheet2!A1+1");
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 43.0);

    engine
        .rename_sheet(&SheetKey::new("Book1", "Sheet2"), "Data")
        .unwrap();
    let b1 = engine.cell("Book1", "Sheet1", "B1").unwrap();
    assert_eq!(
        engine.get_cell_serialized(&b1),
        Some(CellContent::Formula("=Data!A1+1".into()))
    );
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 43.0);

    // edits under the new name still propagate
    let a1 = engine.cell("Book1", "Data", "A1").unwrap();
    engine.set_cell_content(&a1, 10.0).unwrap();
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 11.0);
}

#[test]
fn sheet_removal_breaks_references() {
    let mut engine = engine_with("Book1", &["Sheet1", "Sheet2"]);
    set_num(&mut engine, "Sheet2", "A1", 5.0);
    set(&mut engine, "Sheet1", "B1", "=Sheet2!A1");
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 5.0);

    engine
        .remove_sheet(&SheetKey::new("Book1", "Sheet2"))
        .unwrap();
    assert_eq!(error_kind(&mut engine, "Sheet1", "B1"), ErrorKind::Ref);

    // re-adding the sheet resolves again (empty cell reads Empty)
    engine.add_sheet(&SheetKey::new("Book1", "Sheet2")).unwrap();
    assert_eq!(
        value(&mut engine, "Sheet1", "B1"),
        Some(LiteralValue::Empty)
    );
    let a1 = engine.cell("Book1", "Sheet2", "A1").unwrap();
    engine.set_cell_content(&a1, 9.0).unwrap();
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 9.0);
}

/* ───────────── workbooks ───────────── */

#[test]
fn cross_workbook_references() {
    let mut engine = Engine::new();
    engine.add_workbook("Source").unwrap();
    engine.add_workbook("Report").unwrap();
    engine.add_sheet(&SheetKey::new("Source", "Data")).unwrap();
    engine
        .add_sheet(&SheetKey::new("Report", "Summary"))
        .unwrap();

    let data = engine.cell("Source", "Data", "A1").unwrap();
    engine.set_cell_content(&data, 123.0).unwrap();

    let summary = engine.cell("Report", "Summary", "A1").unwrap();
    engine
        .set_cell_content(&summary, "=[Source]Data!A1*2")
        .unwrap();
    assert_eq!(
        engine.get_cell_value(&summary),
        Some(LiteralValue::Number(246.0))
    );

    // cross-workbook edits cascade
    engine.set_cell_content(&data, 200.0).unwrap();
    assert_eq!(
        engine.get_cell_value(&summary),
        Some(LiteralValue::Number(400.0))
    );
}

#[test]
fn workbook_rename_rewrites_qualifiers() {
    let mut engine = Engine::new();
    engine.add_workbook("Source").unwrap();
    engine.add_workbook("Report").unwrap();
    engine.add_sheet(&SheetKey::new("Source", "Data")).unwrap();
    engine
        .add_sheet(&SheetKey::new("Report", "Summary"))
        .unwrap();

    let data = engine.cell("Source", "Data", "A1").unwrap();
    engine.set_cell_content(&data, 7.0).unwrap();
    let summary = engine.cell("Report", "Summary", "A1").unwrap();
    engine
        .set_cell_content(&summary, "=[Source]Data!A1")
        .unwrap();

    engine.rename_workbook("Source", "Ledger").unwrap();
    assert_eq!(
        engine.get_cell_serialized(&summary),
        Some(CellContent::Formula("=[Ledger]Data!A1".into()))
    );
    assert_eq!(
        engine.get_cell_value(&summary),
        Some(LiteralValue::Number(7.0))
    );

    let moved = engine.cell("Ledger", "Data", "A1").unwrap();
    engine.set_cell_content(&moved, 9.0).unwrap();
    assert_eq!(
        engine.get_cell_value(&summary),
        Some(LiteralValue::Number(9.0))
    );
}

#[test]
fn workbook_removal_breaks_references() {
    let mut engine = Engine::new();
    engine.add_workbook("Source").unwrap();
    engine.add_workbook("Report").unwrap();
    engine.add_sheet(&SheetKey::new("Source", "Data")).unwrap();
    engine
        .add_sheet(&SheetKey::new("Report", "Summary"))
        .unwrap();

    let data = engine.cell("Source", "Data", "A1").unwrap();
    engine.set_cell_content(&data, 5.0).unwrap();
    let summary = engine.cell("Report", "Summary", "A1").unwrap();
    engine
        .set_cell_content(&summary, "=[Source]Data!A1")
        .unwrap();

    engine.remove_workbook("Source").unwrap();
    assert!(matches!(
        engine.get_cell_value(&summary),
        Some(LiteralValue::Error(e)) if e.kind == ErrorKind::Ref
    ));
}

/* ───────────── events & suppression ───────────── */

#[test]
fn no_op_writes_emit_nothing() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set_num(&mut engine, "Sheet1", "A1", 42.0);

    let count = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&count);
    let _sub = engine.on_update(move |_| {
        *sink.borrow_mut() += 1;
    });

    set_num(&mut engine, "Sheet1", "A1", 42.0);
    // numeric-looking text equals the number
    set(&mut engine, "Sheet1", "A1", "42");
    set(&mut engine, "Sheet1", "A1", " 42 ");
    assert_eq!(*count.borrow(), 0);
}

#[test]
fn equal_recomputation_short_circuits_downstream() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set_num(&mut engine, "Sheet1", "A1", 5.0);
    set(&mut engine, "Sheet1", "B1", "=MIN(A1,3)");
    set(&mut engine, "Sheet1", "C1", "=B1*2");
    assert_eq!(num(&mut engine, "Sheet1", "C1"), 6.0);

    let updates = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&updates);
    let _sub = engine.on_cells_update(&SheetKey::new("Book1", "Sheet1"), move |event| {
        if let EngineEvent::CellsUpdated { cells, .. } = event {
            for cell in cells {
                sink.borrow_mut().push(cell.addr.to_string());
            }
        }
    });

    // B1 recomputes to the same 3, so the cascade stops there: C1 keeps
    // its value and neither cell appears in the update batch
    set_num(&mut engine, "Sheet1", "A1", 4.0);
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 3.0);
    assert_eq!(num(&mut engine, "Sheet1", "C1"), 6.0);
    assert_eq!(updates.borrow().clone(), vec!["A1".to_string()]);
}

#[test]
fn unrelated_cells_do_not_cascade() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set_num(&mut engine, "Sheet1", "A1", 1.0);
    set(&mut engine, "Sheet1", "B1", "=A1+1");
    set_num(&mut engine, "Sheet1", "D1", 100.0);

    let updates = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&updates);
    let _sub = engine.on_cells_update(&SheetKey::new("Book1", "Sheet1"), move |event| {
        if let EngineEvent::CellsUpdated { cells, .. } = event {
            for cell in cells {
                sink.borrow_mut().push(cell.addr.to_string());
            }
        }
    });

    set_num(&mut engine, "Sheet1", "A1", 2.0);
    let seen = updates.borrow().clone();
    assert!(seen.contains(&"A1".to_string()));
    assert!(seen.contains(&"B1".to_string()));
    assert!(!seen.contains(&"D1".to_string()));
}

#[test]
fn set_sheet_content_replaces_and_clears() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set_num(&mut engine, "Sheet1", "A1", 1.0);
    set_num(&mut engine, "Sheet1", "A2", 2.0);
    set(&mut engine, "Sheet1", "B1", "=SUM(A1:A2)");
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 3.0);

    let mut content = rustc_hash::FxHashMap::default();
    content.insert("A1".to_string(), cellflow_eval::CellInput::Number(10.0));
    content.insert(
        "B1".to_string(),
        cellflow_eval::CellInput::Text("=SUM(A1:A2)".into()),
    );
    engine
        .set_sheet_content(&SheetKey::new("Book1", "Sheet1"), content)
        .unwrap();

    // A2 was omitted and is cleared
    assert_eq!(value(&mut engine, "Sheet1", "A2"), None);
    assert_eq!(num(&mut engine, "Sheet1", "B1"), 10.0);
}

/* ───────────── errors ───────────── */

#[test]
fn error_taxonomy_through_formulas() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "=1/0");
    assert_eq!(error_kind(&mut engine, "Sheet1", "A1"), ErrorKind::Div0);

    set(&mut engine, "Sheet1", "A2", "=NOSUCHFN(1)");
    assert_eq!(error_kind(&mut engine, "Sheet1", "A2"), ErrorKind::Name);

    set(&mut engine, "Sheet1", "A3", "=SUM(");
    assert_eq!(error_kind(&mut engine, "Sheet1", "A3"), ErrorKind::Error);

    set(&mut engine, "Sheet1", "A4", "=MissingSheet!B2");
    assert_eq!(error_kind(&mut engine, "Sheet1", "A4"), ErrorKind::Ref);

    // errors propagate through operators…
    set(&mut engine, "Sheet1", "B1", "=A1+1");
    assert_eq!(error_kind(&mut engine, "Sheet1", "B1"), ErrorKind::Div0);

    // …unless trapped
    set(&mut engine, "Sheet1", "B2", "=IFERROR(A1,99)");
    assert_eq!(num(&mut engine, "Sheet1", "B2"), 99.0);
    set(&mut engine, "Sheet1", "B3", "=ISERROR(A1)");
    assert_eq!(
        value(&mut engine, "Sheet1", "B3"),
        Some(LiteralValue::Boolean(true))
    );
}

#[test]
fn error_literals_evaluate_to_themselves() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set(&mut engine, "Sheet1", "A1", "=#N/A");
    assert_eq!(error_kind(&mut engine, "Sheet1", "A1"), ErrorKind::Na);
    set(&mut engine, "Sheet1", "A2", "=ISNA(A1)");
    assert_eq!(
        value(&mut engine, "Sheet1", "A2"),
        Some(LiteralValue::Boolean(true))
    );
}

/* ───────────── serialization ───────────── */

#[test]
fn snapshot_roundtrip_restores_values() {
    let mut engine = engine_with("Book1", &["Sheet1"]);
    set_num(&mut engine, "Sheet1", "A1", 10.0);
    set(&mut engine, "Sheet1", "B1", "=A1*2");
    set(&mut engine, "Sheet1", "C1", "=SEQUENCE(3)");
    engine
        .add_named_expression("RATE", "0.1", NameScope::Global)
        .unwrap();

    let data = engine.serialize_engine();

    let mut restored = Engine::new();
    restored.reset_to_serialized_engine(&data).unwrap();

    let b1 = restored.cell("Book1", "Sheet1", "B1").unwrap();
    assert_eq!(
        restored.get_cell_value(&b1),
        Some(LiteralValue::Number(20.0))
    );
    let c2 = restored.cell("Book1", "Sheet1", "C2").unwrap();
    assert_eq!(
        restored.get_cell_value(&c2),
        Some(LiteralValue::Number(2.0))
    );
    assert_eq!(
        restored.get_cell_serialized(&b1),
        Some(CellContent::Formula("=A1*2".into()))
    );

    // restored engines keep cascading
    let a1 = restored.cell("Book1", "Sheet1", "A1").unwrap();
    restored.set_cell_content(&a1, 50.0).unwrap();
    assert_eq!(
        restored.get_cell_value(&b1),
        Some(LiteralValue::Number(100.0))
    );
}
