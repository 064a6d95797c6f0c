//! AST rewriters used by rename operations.
//!
//! Renames are rewriting operations: the engine walks every stored formula,
//! substitutes the matching identifier nodes, and reserializes. All three
//! renamers operate on full formula strings (`=...`) and return the input
//! unchanged when it does not parse — a formula that is broken stays broken
//! in exactly the shape the user typed it.

use crate::parser::{try_parse_formula_body, AstKind, AstNode, ReferenceType};

/// Rebuild an AST bottom-up, applying `f` to every node after its children
/// have been transformed.
pub fn transform<F>(node: AstNode, f: &mut F) -> AstNode
where
    F: FnMut(AstNode) -> AstNode,
{
    let kind = match node.kind {
        AstKind::UnaryOp { op, expr } => AstKind::UnaryOp {
            op,
            expr: Box::new(transform(*expr, f)),
        },
        AstKind::BinaryOp { op, left, right } => AstKind::BinaryOp {
            op,
            left: Box::new(transform(*left, f)),
            right: Box::new(transform(*right, f)),
        },
        AstKind::Function { name, args } => AstKind::Function {
            name,
            args: args.into_iter().map(|a| transform(a, f)).collect(),
        },
        AstKind::Array(rows) => AstKind::Array(
            rows.into_iter()
                .map(|row| row.into_iter().map(|item| transform(item, f)).collect())
                .collect(),
        ),
        other => other,
    };
    f(AstNode::new(kind))
}

fn rewrite_formula<F>(formula: &str, mut f: F) -> String
where
    F: FnMut(AstNode) -> AstNode,
{
    let body = match formula.strip_prefix('=') {
        Some(body) => body,
        None => return formula.to_string(),
    };
    match try_parse_formula_body(body) {
        Ok(ast) => transform(ast, &mut f).to_formula(),
        Err(_) => formula.to_string(),
    }
}

fn rename_opt(slot: &mut Option<String>, old: &str, new: &str) {
    if let Some(name) = slot {
        if name.eq_ignore_ascii_case(old) {
            *name = new.to_string();
        }
    }
}

/// Replace every reference to sheet `old` with `new`. Sheet names match
/// case-insensitively; named-expression qualifiers that match are renamed
/// too, since a sheet-scoped `Sheet!NAME` tracks its sheet.
pub fn rename_sheet(formula: &str, old: &str, new: &str) -> String {
    rewrite_formula(formula, |mut node| {
        if let AstKind::Reference(reference) = &mut node.kind {
            match reference {
                ReferenceType::Cell { sheet, .. } | ReferenceType::Range { sheet, .. } => {
                    rename_opt(sheet, old, new);
                }
                ReferenceType::MultiSheetRange {
                    sheet_start,
                    sheet_end,
                    ..
                } => {
                    if sheet_start.eq_ignore_ascii_case(old) {
                        *sheet_start = new.to_string();
                    }
                    if sheet_end.eq_ignore_ascii_case(old) {
                        *sheet_end = new.to_string();
                    }
                }
                ReferenceType::Named { qualifier, .. } => {
                    rename_opt(qualifier, old, new);
                }
                ReferenceType::Table(_) => {}
            }
        }
        node
    })
}

/// Workbook-aware variant of [`rename_sheet`]: only references whose
/// effective workbook (explicit `[Book]` qualifier, else the workbook the
/// formula lives in) matches `target_workbook` are rewritten. Keeps a
/// rename in one workbook from touching same-named sheets elsewhere.
pub fn rename_sheet_scoped(
    formula: &str,
    cell_workbook: &str,
    target_workbook: &str,
    old: &str,
    new: &str,
) -> String {
    rewrite_formula(formula, |mut node| {
        if let AstKind::Reference(reference) = &mut node.kind {
            let effective = |wb: &Option<String>| -> bool {
                wb.as_deref()
                    .unwrap_or(cell_workbook)
                    .eq_ignore_ascii_case(target_workbook)
            };
            match reference {
                ReferenceType::Cell {
                    workbook, sheet, ..
                }
                | ReferenceType::Range {
                    workbook, sheet, ..
                } => {
                    if effective(workbook) {
                        rename_opt(sheet, old, new);
                    }
                }
                ReferenceType::MultiSheetRange {
                    workbook,
                    sheet_start,
                    sheet_end,
                    ..
                } => {
                    if effective(workbook) {
                        if sheet_start.eq_ignore_ascii_case(old) {
                            *sheet_start = new.to_string();
                        }
                        if sheet_end.eq_ignore_ascii_case(old) {
                            *sheet_end = new.to_string();
                        }
                    }
                }
                ReferenceType::Named {
                    workbook,
                    qualifier,
                    ..
                } => {
                    if effective(workbook) {
                        rename_opt(qualifier, old, new);
                    }
                }
                ReferenceType::Table(_) => {}
            }
        }
        node
    })
}

/// Replace every `[Book]` workbook qualifier matching `old` with `new`.
pub fn rename_workbook(formula: &str, old: &str, new: &str) -> String {
    rewrite_formula(formula, |mut node| {
        if let AstKind::Reference(reference) = &mut node.kind {
            match reference {
                ReferenceType::Cell { workbook, .. }
                | ReferenceType::Range { workbook, .. }
                | ReferenceType::MultiSheetRange { workbook, .. }
                | ReferenceType::Named { workbook, .. } => rename_opt(workbook, old, new),
                ReferenceType::Table(_) => {}
            }
        }
        node
    })
}

/// Replace every reference to named expression `old` with `new`.
pub fn rename_named_expression(formula: &str, old: &str, new: &str) -> String {
    rewrite_formula(formula, |mut node| {
        if let AstKind::Reference(ReferenceType::Named { name, .. }) = &mut node.kind {
            if name.eq_ignore_ascii_case(old) {
                *name = new.to_string();
            }
        }
        node
    })
}

/// Replace every structured reference to table `old` with `new`.
pub fn rename_table(formula: &str, old: &str, new: &str) -> String {
    rewrite_formula(formula, |mut node| {
        if let AstKind::Reference(ReferenceType::Table(table_ref)) = &mut node.kind {
            if table_ref.name.eq_ignore_ascii_case(old) {
                table_ref.name = new.to_string();
            }
        }
        node
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_rename_rewrites_all_reference_forms() {
        assert_eq!(
            rename_sheet("=Sheet1!A1+Sheet2!B2", "Sheet1", "Data"),
            "=Data!A1+Sheet2!B2"
        );
        assert_eq!(
            rename_sheet("=SUM(sheet1!A1:B2)", "Sheet1", "Data"),
            "=SUM(Data!A1:B2)"
        );
        assert_eq!(
            rename_sheet("=SUM(Sheet1:Sheet3!A1)", "Sheet3", "End"),
            "=SUM(Sheet1:End!A1)"
        );
        // renaming onto a name that needs quoting requotes
        assert_eq!(
            rename_sheet("=Sheet1!A1", "Sheet1", "Q1 Data"),
            "='Q1 Data'!A1"
        );
    }

    #[test]
    fn named_expression_rename() {
        assert_eq!(
            rename_named_expression("=RATE*100", "RATE", "TAX"),
            "=TAX*100"
        );
        assert_eq!(
            rename_named_expression("=Book1!RATE+1", "rate", "TAX"),
            "=Book1!TAX+1"
        );
        // functions named like the expression are untouched
        assert_eq!(
            rename_named_expression("=RATE(1,2)", "RATE", "TAX"),
            "=RATE(1,2)"
        );
    }

    #[test]
    fn table_rename() {
        assert_eq!(rename_table("=SUM(T[Price])", "T", "Sales"), "=SUM(Sales[Price])");
        assert_eq!(
            rename_table("=T[[#Headers],[Price]]", "T", "Sales"),
            "=Sales[[#Headers],[Price]]"
        );
    }

    #[test]
    fn malformed_and_non_formula_input_pass_through() {
        assert_eq!(rename_sheet("=SUM(", "A", "B"), "=SUM(");
        assert_eq!(rename_sheet("plain text", "A", "B"), "plain text");
        assert_eq!(rename_table("=)", "T", "S"), "=)");
    }

    #[test]
    fn transform_is_bottom_up() {
        let ast = try_parse_formula_body("1+2").unwrap();
        let mut seen = Vec::new();
        transform(ast, &mut |node| {
            seen.push(format!("{node}"));
            node
        });
        assert_eq!(seen, vec!["1", "2", "1+2"]);
    }
}
