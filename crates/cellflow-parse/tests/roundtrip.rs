//! Property: `parse ∘ print` is the identity over well-formed ASTs, and
//! printing is idempotent.

use cellflow_parse::parser::{parse_formula_body, AstKind};
use proptest::prelude::*;

/// Generate well-formed formula bodies compositionally. Everything this
/// strategy produces must tokenize and parse.
fn formula_strategy() -> impl Strategy<Value = String> {
    let number = prop_oneof![
        (0u32..100000).prop_map(|n| n.to_string()),
        (0u32..1000, 1u32..1000).prop_map(|(a, b)| format!("{a}.{b}")),
        (1u32..100, 1u32..30).prop_map(|(m, e)| format!("{m}e{e}")),
    ];
    let string = proptest::string::string_regex("[a-zA-Z0-9 _!?.]{0,10}")
        .unwrap()
        .prop_map(|s| format!("\"{s}\""));
    let boolean = prop_oneof![Just("TRUE".to_string()), Just("FALSE".to_string())];
    let error = prop_oneof![
        Just("#DIV/0!".to_string()),
        Just("#N/A".to_string()),
        Just("#REF!".to_string()),
        Just("#CYCLE!".to_string()),
    ];
    let cell = ("[A-Z]{1,2}", 1u32..1000, any::<bool>(), any::<bool>()).prop_map(
        |(col, row, col_abs, row_abs)| {
            format!(
                "{}{col}{}{row}",
                if col_abs { "$" } else { "" },
                if row_abs { "$" } else { "" }
            )
        },
    );
    let range = ("[A-Z]{1,2}", 1u32..500, 1u32..500).prop_map(|(col, r1, r2)| {
        format!("{col}{}:{col}{}", r1.min(r2), r1.max(r2))
    });
    let open_range = "[A-Z]{1,2}".prop_map(|col| format!("{col}:{col}"));
    let sheet_cell = ("[A-Z][a-z]{1,6}", "[A-Z]{1,2}", 1u32..1000)
        .prop_map(|(sheet, col, row)| format!("{sheet}!{col}{row}"));
    let quoted_sheet_cell = ("[A-Z][a-z]{1,4} [a-z]{1,4}", "[A-Z]{1,2}", 1u32..1000)
        .prop_map(|(sheet, col, row)| format!("'{sheet}'!{col}{row}"));
    let named = "[A-Z][A-Z_]{2,8}".prop_map(|s| s);
    let table = ("[A-Z][a-z]{1,6}", "[A-Z][a-z]{1,6}")
        .prop_map(|(t, c)| format!("{t}[{c}]"));

    let leaf = prop_oneof![
        number,
        string,
        boolean,
        error,
        cell,
        range,
        open_range,
        sheet_cell,
        quoted_sheet_cell,
        named,
        table,
        Just("INFINITY".to_string()),
    ];

    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            // binary operators across the precedence spectrum
            (
                inner.clone(),
                prop_oneof![
                    Just("+"),
                    Just("-"),
                    Just("*"),
                    Just("/"),
                    Just("^"),
                    Just("&"),
                    Just("="),
                    Just("<>"),
                    Just("<="),
                    Just(">"),
                ],
                inner.clone()
            )
                .prop_map(|(l, op, r)| format!("({l}){op}({r})")),
            inner.clone().prop_map(|e| format!("-({e})")),
            inner.clone().prop_map(|e| format!("({e})%")),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| format!("SUM({a},{b})")),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(a, b, c)| format!("IF({a},{b},{c})")),
            (inner.clone(), inner.clone(), inner.clone(), inner)
                .prop_map(|(a, b, c, d)| format!("{{{a},{b};{c},{d}}}")),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn parse_print_parse_is_identity(body in formula_strategy()) {
        let first = parse_formula_body(&body);
        prop_assume!(!matches!(first.kind, AstKind::Invalid { .. }));

        let printed = first.to_string();
        let second = parse_formula_body(&printed);
        prop_assert_eq!(&first, &second, "printed form: {}", printed);

        // printing is idempotent
        prop_assert_eq!(second.to_string(), printed);
    }
}
