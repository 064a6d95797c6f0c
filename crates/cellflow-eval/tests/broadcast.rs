//! Broadcast correctness for scalar operators over spilled operands:
//! (V,S), (S,V), and (S,S) with union-of-areas pairing.

use cellflow_eval::{Engine, ErrorKind, LiteralValue, SheetKey};

fn engine() -> Engine {
    let mut engine = Engine::new();
    engine.add_workbook("Book1").unwrap();
    engine.add_sheet(&SheetKey::new("Book1", "Sheet1")).unwrap();
    engine
}

fn set(engine: &mut Engine, a1: &str, input: &str) {
    let key = engine.cell("Book1", "Sheet1", a1).unwrap();
    engine.set_cell_content(&key, input).unwrap();
}

fn num(engine: &mut Engine, a1: &str) -> f64 {
    let key = engine.cell("Book1", "Sheet1", a1).unwrap();
    match engine.get_cell_value(&key) {
        Some(LiteralValue::Number(n)) => n,
        other => panic!("expected number at {a1}, got {other:?}"),
    }
}

fn kind(engine: &mut Engine, a1: &str) -> ErrorKind {
    let key = engine.cell("Book1", "Sheet1", a1).unwrap();
    match engine.get_cell_value(&key) {
        Some(LiteralValue::Error(e)) => e.kind,
        other => panic!("expected error at {a1}, got {other:?}"),
    }
}

#[test]
fn value_times_spill_broadcasts_pointwise() {
    let mut engine = engine();
    set(&mut engine, "A1", "=SEQUENCE(3)*10");
    assert_eq!(num(&mut engine, "A1"), 10.0);
    assert_eq!(num(&mut engine, "A2"), 20.0);
    assert_eq!(num(&mut engine, "A3"), 30.0);
}

#[test]
fn spill_plus_value_in_either_order() {
    let mut engine = engine();
    set(&mut engine, "A1", "=100+SEQUENCE(2)");
    assert_eq!(num(&mut engine, "A1"), 101.0);
    assert_eq!(num(&mut engine, "A2"), 102.0);

    set(&mut engine, "C1", "=SEQUENCE(2)-1");
    assert_eq!(num(&mut engine, "C1"), 0.0);
    assert_eq!(num(&mut engine, "C2"), 1.0);
}

#[test]
fn spill_pairs_with_spill_over_union() {
    let mut engine = engine();
    set(&mut engine, "A1", "=SEQUENCE(3)+SEQUENCE(2)");
    assert_eq!(num(&mut engine, "A1"), 2.0);
    assert_eq!(num(&mut engine, "A2"), 4.0);
    // the shorter operand has no cell at offset 2
    assert_eq!(kind(&mut engine, "A3"), ErrorKind::Ref);
}

#[test]
fn range_reference_arithmetic_spills() {
    let mut engine = engine();
    set(&mut engine, "A1", "1");
    set(&mut engine, "A2", "2");
    set(&mut engine, "A3", "3");
    set(&mut engine, "C1", "=A1:A3*2");
    assert_eq!(num(&mut engine, "C1"), 2.0);
    assert_eq!(num(&mut engine, "C2"), 4.0);
    assert_eq!(num(&mut engine, "C3"), 6.0);

    // edits inside the source range re-project
    set(&mut engine, "A2", "10");
    assert_eq!(num(&mut engine, "C2"), 20.0);
}

#[test]
fn unary_operators_map_over_spills() {
    let mut engine = engine();
    set(&mut engine, "A1", "=-SEQUENCE(2)");
    assert_eq!(num(&mut engine, "A1"), -1.0);
    assert_eq!(num(&mut engine, "A2"), -2.0);

    set(&mut engine, "C1", "=SEQUENCE(2)%");
    assert_eq!(num(&mut engine, "C1"), 0.01);
    assert_eq!(num(&mut engine, "C2"), 0.02);
}

#[test]
fn comparison_broadcasts() {
    let mut engine = engine();
    set(&mut engine, "A1", "=SEQUENCE(3)>2");
    let key = engine.cell("Book1", "Sheet1", "A1").unwrap();
    assert_eq!(
        engine.get_cell_value(&key),
        Some(LiteralValue::Boolean(false))
    );
    let key = engine.cell("Book1", "Sheet1", "A3").unwrap();
    assert_eq!(
        engine.get_cell_value(&key),
        Some(LiteralValue::Boolean(true))
    );
}

#[test]
fn errors_propagate_per_offset() {
    let mut engine = engine();
    set(&mut engine, "A1", "1");
    set(&mut engine, "A2", "x");
    set(&mut engine, "A3", "3");
    set(&mut engine, "C1", "=A1:A3+1");
    assert_eq!(num(&mut engine, "C1"), 2.0);
    assert_eq!(kind(&mut engine, "C2"), ErrorKind::Value);
    assert_eq!(num(&mut engine, "C3"), 4.0);
}

#[test]
fn scalar_error_operand_wins_immediately() {
    let mut engine = engine();
    set(&mut engine, "A1", "=#DIV/0!+SEQUENCE(2)");
    assert_eq!(kind(&mut engine, "A1"), ErrorKind::Div0);
}

#[test]
fn if_broadcasts_over_spilled_test() {
    let mut engine = engine();
    set(&mut engine, "A1", "=IF(SEQUENCE(3)>1,\"big\",\"small\")");
    let get = |engine: &mut Engine, a1: &str| {
        let key = engine.cell("Book1", "Sheet1", a1).unwrap();
        engine.get_cell_value(&key)
    };
    assert_eq!(get(&mut engine, "A1"), Some(LiteralValue::Text("small".into())));
    assert_eq!(get(&mut engine, "A2"), Some(LiteralValue::Text("big".into())));
    assert_eq!(get(&mut engine, "A3"), Some(LiteralValue::Text("big".into())));
}
