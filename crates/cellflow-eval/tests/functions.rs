//! Builtin function semantics, exercised through stored formulas.

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

fn get(engine: &mut Engine, a1: &str) -> Option<LiteralValue> {
    let key = engine.cell("Book1", "Sheet1", a1).unwrap();
    engine.get_cell_value(&key)
}

fn num(engine: &mut Engine, a1: &str) -> f64 {
    match get(engine, a1) {
        Some(LiteralValue::Number(n)) => n,
        other => panic!("expected number at {a1}, got {other:?}"),
    }
}

fn boolean(engine: &mut Engine, a1: &str) -> bool {
    match get(engine, a1) {
        Some(LiteralValue::Boolean(b)) => b,
        other => panic!("expected boolean at {a1}, got {other:?}"),
    }
}

fn text(engine: &mut Engine, a1: &str) -> String {
    match get(engine, a1) {
        Some(LiteralValue::Text(s)) => s,
        other => panic!("expected text at {a1}, got {other:?}"),
    }
}

fn kind(engine: &mut Engine, a1: &str) -> ErrorKind {
    match get(engine, a1) {
        Some(LiteralValue::Error(e)) => e.kind,
        other => panic!("expected error at {a1}, got {other:?}"),
    }
}

fn seed_column(engine: &mut Engine) {
    for (a1, v) in [("A1", "10"), ("A2", "20"), ("A3", "30"), ("A4", "text")] {
        set(engine, a1, v);
    }
}

#[test]
fn reductions_over_ranges() {
    let mut e = engine();
    seed_column(&mut e);

    set(&mut e, "C1", "=SUM(A1:A4)");
    assert_eq!(num(&mut e, "C1"), 60.0); // text in range is ignored

    set(&mut e, "C2", "=AVERAGE(A1:A4)");
    assert_eq!(num(&mut e, "C2"), 20.0);

    set(&mut e, "C3", "=COUNT(A1:A4)");
    assert_eq!(num(&mut e, "C3"), 3.0);

    set(&mut e, "C4", "=MIN(A1:A4)");
    assert_eq!(num(&mut e, "C4"), 10.0);
    set(&mut e, "C5", "=MAX(A1:A4)");
    assert_eq!(num(&mut e, "C5"), 30.0);

    // direct text arguments coerce (and fail loudly when non-numeric)
    set(&mut e, "C6", "=SUM(\"5\",TRUE)");
    assert_eq!(num(&mut e, "C6"), 6.0);
    set(&mut e, "C7", "=SUM(\"abc\")");
    assert_eq!(kind(&mut e, "C7"), ErrorKind::Value);

    set(&mut e, "C8", "=AVERAGE(D1:D9)");
    assert_eq!(kind(&mut e, "C8"), ErrorKind::Div0); // nothing to average
}

#[test]
fn criteria_aggregates() {
    let mut e = engine();
    seed_column(&mut e);

    set(&mut e, "C1", "=COUNTIF(A1:A4,\">=20\")");
    assert_eq!(num(&mut e, "C1"), 2.0);

    set(&mut e, "C2", "=COUNTIF(A1:A4,20)");
    assert_eq!(num(&mut e, "C2"), 1.0);

    set(&mut e, "C3", "=COUNTIF(A1:A4,\"text\")");
    assert_eq!(num(&mut e, "C3"), 1.0);

    set(&mut e, "C4", "=SUMIF(A1:A4,\">10\")");
    assert_eq!(num(&mut e, "C4"), 50.0);

    // separate sum range, aligned by offset
    set(&mut e, "B1", "1");
    set(&mut e, "B2", "2");
    set(&mut e, "B3", "3");
    set(&mut e, "C5", "=SUMIF(A1:A3,\">=20\",B1:B3)");
    assert_eq!(num(&mut e, "C5"), 5.0);
}

#[test]
fn scalar_math() {
    let mut e = engine();
    set(&mut e, "A1", "=POWER(2,10)");
    assert_eq!(num(&mut e, "A1"), 1024.0);
    set(&mut e, "A2", "=ABS(-3.5)");
    assert_eq!(num(&mut e, "A2"), 3.5);
    set(&mut e, "A3", "=ROUND(2.675,2)");
    assert!((num(&mut e, "A3") - 2.68).abs() < 1e-9 || (num(&mut e, "A3") - 2.67).abs() < 1e-9);
    set(&mut e, "A4", "=ROUNDUP(1.21,1)");
    assert!((num(&mut e, "A4") - 1.3).abs() < 1e-9);
    set(&mut e, "A5", "=ROUNDDOWN(1.29,1)");
    assert!((num(&mut e, "A5") - 1.2).abs() < 1e-9);
    set(&mut e, "A6", "=MOD(-3,2)");
    assert_eq!(num(&mut e, "A6"), 1.0); // sign follows the divisor
    set(&mut e, "A7", "=MOD(3,0)");
    assert_eq!(kind(&mut e, "A7"), ErrorKind::Div0);
}

#[test]
fn logical_functions() {
    let mut e = engine();
    set(&mut e, "A1", "=IF(1>0,\"yes\",\"no\")");
    assert_eq!(text(&mut e, "A1"), "yes");
    set(&mut e, "A2", "=IF(FALSE,\"yes\")");
    assert!(!boolean(&mut e, "A2")); // missing else defaults to FALSE
    set(&mut e, "A3", "=AND(TRUE,1,2>1)");
    assert!(boolean(&mut e, "A3"));
    set(&mut e, "A4", "=AND(TRUE,0)");
    assert!(!boolean(&mut e, "A4"));
    set(&mut e, "A5", "=OR(FALSE,0,1)");
    assert!(boolean(&mut e, "A5"));
    set(&mut e, "A6", "=NOT(0)");
    assert!(boolean(&mut e, "A6"));
}

#[test]
fn info_functions() {
    let mut e = engine();
    set(&mut e, "A1", "5");
    set(&mut e, "A2", "hello");
    set(&mut e, "A3", "=TRUE");

    set(&mut e, "C1", "=ISNUMBER(A1)");
    assert!(boolean(&mut e, "C1"));
    set(&mut e, "C2", "=ISTEXT(A2)");
    assert!(boolean(&mut e, "C2"));
    set(&mut e, "C3", "=ISLOGICAL(A3)");
    assert!(boolean(&mut e, "C3"));
    set(&mut e, "C4", "=ISBLANK(Z99)");
    assert!(boolean(&mut e, "C4"));
    set(&mut e, "C5", "=ISEVEN(4)");
    assert!(boolean(&mut e, "C5"));
    set(&mut e, "C6", "=ISODD(4)");
    assert!(!boolean(&mut e, "C6"));
    set(&mut e, "C7", "=NA()");
    assert_eq!(kind(&mut e, "C7"), ErrorKind::Na);
}

#[test]
fn text_functions() {
    let mut e = engine();
    set(&mut e, "A1", "=CONCATENATE(\"a\",1,TRUE)");
    assert_eq!(text(&mut e, "A1"), "a1TRUE");
    set(&mut e, "A2", "=\"x\"&\"y\"&1");
    assert_eq!(text(&mut e, "A2"), "xy1");
    set(&mut e, "A3", "=LEN(\"héllo\")");
    assert_eq!(num(&mut e, "A3"), 5.0);
    set(&mut e, "A4", "=UPPER(\"abc\")");
    assert_eq!(text(&mut e, "A4"), "ABC");
    set(&mut e, "A5", "=LOWER(\"AbC\")");
    assert_eq!(text(&mut e, "A5"), "abc");
}

#[test]
fn lookup_functions() {
    let mut e = engine();
    for (a1, v) in [
        ("A1", "apple"),
        ("B1", "1"),
        ("A2", "banana"),
        ("B2", "2"),
        ("A3", "cherry"),
        ("B3", "3"),
    ] {
        set(&mut e, a1, v);
    }

    set(&mut e, "D1", "=INDEX(A1:B3,2,1)");
    assert_eq!(text(&mut e, "D1"), "banana");
    set(&mut e, "D2", "=INDEX(A1:B3,9,1)");
    assert_eq!(kind(&mut e, "D2"), ErrorKind::Ref);

    set(&mut e, "D3", "=MATCH(\"Cherry\",A1:A3,0)");
    assert_eq!(num(&mut e, "D3"), 3.0);
    set(&mut e, "D4", "=MATCH(\"missing\",A1:A3,0)");
    assert_eq!(kind(&mut e, "D4"), ErrorKind::Na);

    set(&mut e, "D5", "=VLOOKUP(\"banana\",A1:B3,2,FALSE)");
    assert_eq!(num(&mut e, "D5"), 2.0);
    set(&mut e, "D6", "=VLOOKUP(\"zzz\",A1:B3,2,FALSE)");
    assert_eq!(kind(&mut e, "D6"), ErrorKind::Na);

    set(&mut e, "D7", "=OFFSET(A1,1,1)");
    assert_eq!(num(&mut e, "D7"), 2.0);
    set(&mut e, "D8", "=SUM(OFFSET(A1,0,1,3,1))");
    assert_eq!(num(&mut e, "D8"), 6.0);

    // OFFSET tracks the shifted range: edits there re-evaluate the reader
    set(&mut e, "B2", "20");
    assert_eq!(num(&mut e, "D8"), 24.0);
}

#[test]
fn approximate_lookup() {
    let mut e = engine();
    for (a1, v) in [("A1", "10"), ("A2", "20"), ("A3", "30")] {
        set(&mut e, a1, v);
    }
    set(&mut e, "C1", "=MATCH(25,A1:A3)");
    assert_eq!(num(&mut e, "C1"), 2.0); // largest ≤ 25
    set(&mut e, "C2", "=MATCH(5,A1:A3,1)");
    assert_eq!(kind(&mut e, "C2"), ErrorKind::Na);
}

#[test]
fn array_functions() {
    let mut e = engine();
    for (a1, v) in [
        ("A1", "3"),
        ("A2", "1"),
        ("A3", "2"),
        ("A4", "1"),
    ] {
        set(&mut e, a1, v);
    }

    set(&mut e, "C1", "=SORT(A1:A4)");
    assert_eq!(num(&mut e, "C1"), 1.0);
    assert_eq!(num(&mut e, "C2"), 1.0);
    assert_eq!(num(&mut e, "C3"), 2.0);
    assert_eq!(num(&mut e, "C4"), 3.0);

    set(&mut e, "D1", "=SORT(A1:A4,1,-1)");
    assert_eq!(num(&mut e, "D1"), 3.0);

    set(&mut e, "E1", "=UNIQUE(A1:A4)");
    assert_eq!(num(&mut e, "E1"), 3.0);
    assert_eq!(num(&mut e, "E2"), 1.0);
    assert_eq!(num(&mut e, "E3"), 2.0);
    let e4 = e.cell("Book1", "Sheet1", "E4").unwrap();
    assert_eq!(e.get_cell_value(&e4), None);

    set(&mut e, "F1", "=FILTER(A1:A4,A1:A4>1)");
    assert_eq!(num(&mut e, "F1"), 3.0);
    assert_eq!(num(&mut e, "F2"), 2.0);

    set(&mut e, "G1", "=FILTER(A1:A4,A1:A4>99,\"none\")");
    assert_eq!(text(&mut e, "G1"), "none");

    set(&mut e, "H1", "=ARRAY_CONSTRAIN(SEQUENCE(10),3,1)");
    assert_eq!(num(&mut e, "H1"), 1.0);
    assert_eq!(num(&mut e, "H3"), 3.0);
    let h4 = e.cell("Book1", "Sheet1", "H4").unwrap();
    assert_eq!(e.get_cell_value(&h4), None);
}

#[test]
fn fe_operator_functions_match_operators() {
    let mut e = engine();
    set(&mut e, "A1", "=FE.ADD(2,3)");
    assert_eq!(num(&mut e, "A1"), 5.0);
    set(&mut e, "A2", "=FE.DIVIDE(1,0)");
    assert_eq!(kind(&mut e, "A2"), ErrorKind::Div0);
    set(&mut e, "A3", "=FE.EQ(\"a\",\"A\")");
    assert!(boolean(&mut e, "A3"));
    set(&mut e, "A4", "=FE.UMINUS(7)");
    assert_eq!(num(&mut e, "A4"), -7.0);
    set(&mut e, "A5", "=FE.POW(2,3)=2^3");
    assert!(boolean(&mut e, "A5"));
}

#[test]
fn sequence_with_dimensions() {
    let mut e = engine();
    set(&mut e, "A1", "=SEQUENCE(2,3,10,5)");
    // row-major: 10,15,20 / 25,30,35
    assert_eq!(num(&mut e, "A1"), 10.0);
    assert_eq!(num(&mut e, "C1"), 20.0);
    assert_eq!(num(&mut e, "A2"), 25.0);
    assert_eq!(num(&mut e, "C2"), 35.0);
}
