use crate::tokenizer::{Associativity, Token, TokenSubType, TokenType, Tokenizer, TokenizerError};
use cellflow_common::coord::{col_to_letters, letters_to_col, RelAddr};
use cellflow_common::{EngineError, ErrorKind, LiteralValue};

use std::error::Error;
use std::fmt::{self, Display};

/// A custom error type for the parser.
#[derive(Debug)]
pub struct ParserError {
    pub message: String,
    pub position: Option<usize>,
}

impl Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = self.position {
            write!(f, "ParserError at position {}: {}", pos, self.message)
        } else {
            write!(f, "ParserError: {}", self.message)
        }
    }
}

impl Error for ParserError {}

impl From<TokenizerError> for ParserError {
    fn from(err: TokenizerError) -> Self {
        ParserError {
            message: err.message,
            position: Some(err.pos),
        }
    }
}

fn err(message: impl Into<String>) -> ParserError {
    ParserError {
        message: message.into(),
        position: None,
    }
}

/* ───────────────────────── references ───────────────────────── */

/// A structured table reference specifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableSpecifier {
    /// `[#All]` — headers plus data.
    All,
    /// `[#Data]` — the data area only.
    Data,
    /// `[#Headers]` — the headers row.
    Headers,
    /// `[@]` — the whole current row.
    CurrentRow,
    /// `[col]` — one data column.
    Column(String),
    /// `[[a]:[b]]` — a contiguous span of columns.
    ColumnRange(String, String),
    /// `[@col]` — one column narrowed to the current row.
    CurrentRowColumn(String),
    /// `[[#Headers],[col]]` — several modifiers combined.
    Combination(Vec<TableSpecifier>),
}

/// A reference to a table, with an optional specifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableReference {
    pub name: String,
    pub specifier: Option<TableSpecifier>,
}

/// End corner of a range; each axis is `(index, absolute)` or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeEnd {
    pub row: Option<(u32, bool)>,
    pub col: Option<(u32, bool)>,
}

/// A reference to something outside the formula's own cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    Cell {
        workbook: Option<String>,
        sheet: Option<String>,
        addr: RelAddr,
    },
    Range {
        workbook: Option<String>,
        sheet: Option<String>,
        start: RelAddr,
        end: RangeEnd,
    },
    /// `Sheet1:Sheet3!A1:B2` — the same range across a span of sheets.
    MultiSheetRange {
        workbook: Option<String>,
        sheet_start: String,
        sheet_end: String,
        start: RelAddr,
        end: RangeEnd,
    },
    Table(TableReference),
    /// A named expression, optionally scope-qualified (`Book!NAME`,
    /// `Sheet!NAME`, `[Book]Sheet!NAME`). The qualifier is resolved against
    /// workbooks first, then sheets, at evaluation time.
    Named {
        workbook: Option<String>,
        qualifier: Option<String>,
        name: String,
    },
}

/// Check whether a sheet name must be quoted when printed.
fn sheet_name_needs_quoting(name: &str) -> bool {
    if name.is_empty() {
        return true;
    }
    let bytes = name.as_bytes();
    if bytes[0].is_ascii_digit() {
        return true;
    }
    for &byte in bytes {
        let ok = byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'.' || !byte.is_ascii();
        if !ok {
            return true;
        }
    }
    matches!(name.to_ascii_uppercase().as_str(), "TRUE" | "FALSE")
}

fn print_sheet_name(name: &str) -> String {
    if sheet_name_needs_quoting(name) {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_string()
    }
}

/// Validity check for named-expression identifiers: leading letter or `_`,
/// then letters, digits, `.`, `_`; must not look like a cell address.
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    if !chars.all(|c| c.is_alphanumeric() || c == '.' || c == '_') {
        return false;
    }
    name.parse::<RelAddr>().is_err()
}

/// One side of a `:`-separated range text.
enum RangePart {
    Cell(RelAddr),
    ColOnly(u32, bool),
    RowOnly(u32, bool),
    Infinity,
}

impl ReferenceType {
    /// Parse a reference string: `A1`, `$B$2`, `Sheet1!A1`, `'My S'!A1:B2`,
    /// `[Book]Sheet!A1`, `A:A`, `A5:10`, `Sheet1:Sheet3!A1:B2`,
    /// `Table1[Price]`, `RATE`, `Book!RATE`.
    pub fn from_string(reference: &str) -> Result<Self, ParserError> {
        // Workbook qualifier: leading [Book]
        let (workbook, rest) = if let Some(stripped) = reference.strip_prefix('[') {
            match stripped.find(']') {
                Some(close) => (
                    Some(stripped[..close].to_string()),
                    &stripped[close + 1..],
                ),
                None => return Err(err(format!("unclosed workbook qualifier: {reference}"))),
            }
        } else {
            (None, reference)
        };

        // Structured references carry their own bracket syntax.
        if workbook.is_none() && rest.contains('[') {
            return Self::parse_table_reference(rest);
        }

        let (sheet_part, ref_part) = Self::extract_sheet_name(rest)?;

        if let Some(sheet_text) = sheet_part {
            // A `:` between two sheet names selects a span of sheets.
            if let Some((first, second)) = split_sheet_span(&sheet_text) {
                let (start, end) = Self::parse_range_text(&ref_part)?;
                return Ok(ReferenceType::MultiSheetRange {
                    workbook,
                    sheet_start: first,
                    sheet_end: second,
                    start,
                    end,
                });
            }

            let sheet = Some(unquote_sheet(&sheet_text));
            return Self::parse_unqualified(&ref_part, workbook, sheet);
        }

        Self::parse_unqualified(&ref_part, workbook, None)
    }

    fn parse_unqualified(
        ref_part: &str,
        workbook: Option<String>,
        sheet: Option<String>,
    ) -> Result<Self, ParserError> {
        if ref_part.contains(':') {
            let (start, end) = Self::parse_range_text(ref_part)?;
            return Ok(ReferenceType::Range {
                workbook,
                sheet,
                start,
                end,
            });
        }

        match ref_part.parse::<RelAddr>() {
            Ok(addr) => Ok(ReferenceType::Cell {
                workbook,
                sheet,
                addr,
            }),
            Err(_) => {
                if is_valid_name(ref_part) {
                    // `Sheet!NAME` arrives here with the qualifier already
                    // split off into `sheet`.
                    Ok(ReferenceType::Named {
                        workbook,
                        qualifier: sheet,
                        name: ref_part.to_string(),
                    })
                } else {
                    Err(err(format!("invalid reference: {ref_part}")))
                }
            }
        }
    }

    /// Split a `start:end` range text into (start address, end bounds).
    fn parse_range_text(text: &str) -> Result<(RelAddr, RangeEnd), ParserError> {
        let (start_text, end_text) = text
            .split_once(':')
            .ok_or_else(|| err(format!("invalid range: {text}")))?;

        let start_part = Self::parse_range_part(start_text)?;
        let end_part = Self::parse_range_part(end_text)?;

        let start = match (&start_part, &end_part) {
            (RangePart::Cell(addr), _) => *addr,
            (RangePart::ColOnly(col, abs), RangePart::ColOnly(..))
            | (RangePart::ColOnly(col, abs), RangePart::Infinity) => {
                RelAddr::new(0, *col, false, *abs)
            }
            (RangePart::RowOnly(row, abs), RangePart::RowOnly(..))
            | (RangePart::RowOnly(row, abs), RangePart::Infinity) => {
                RelAddr::new(*row, 0, *abs, false)
            }
            _ => return Err(err(format!("invalid range start: {text}"))),
        };

        let end = match end_part {
            RangePart::Cell(addr) => RangeEnd {
                row: Some((addr.row(), addr.row_abs)),
                col: Some((addr.col(), addr.col_abs)),
            },
            RangePart::ColOnly(col, abs) => RangeEnd {
                row: None,
                col: Some((col, abs)),
            },
            RangePart::RowOnly(row, abs) => RangeEnd {
                row: Some((row, abs)),
                col: None,
            },
            RangePart::Infinity => RangeEnd {
                row: None,
                col: None,
            },
        };

        Ok((start, end))
    }

    fn parse_range_part(part: &str) -> Result<RangePart, ParserError> {
        if part == "INFINITY" {
            return Ok(RangePart::Infinity);
        }
        if let Ok(addr) = part.parse::<RelAddr>() {
            return Ok(RangePart::Cell(addr));
        }

        let (abs, body) = match part.strip_prefix('$') {
            Some(rest) => (true, rest),
            None => (false, part),
        };
        if body.is_empty() {
            return Err(err(format!("invalid range part: {part}")));
        }

        if body.bytes().all(|b| b.is_ascii_uppercase()) {
            let col = letters_to_col(body).ok_or_else(|| err(format!("invalid column: {body}")))?;
            return Ok(RangePart::ColOnly(col, abs));
        }
        if body.bytes().all(|b| b.is_ascii_digit()) {
            let row: u32 = body
                .parse()
                .map_err(|_| err(format!("invalid row: {body}")))?;
            if row == 0 {
                return Err(err(format!("invalid row: {body}")));
            }
            return Ok(RangePart::RowOnly(row - 1, abs));
        }

        Err(err(format!("invalid range part: {part}")))
    }

    /// Extract an optional sheet qualifier (possibly quoted, possibly a
    /// `Sheet1:Sheet3` span) in front of `!`.
    fn extract_sheet_name(reference: &str) -> Result<(Option<String>, String), ParserError> {
        let bytes = reference.as_bytes();
        let mut i = 0;
        let mut in_quotes = false;

        while i < bytes.len() {
            match bytes[i] {
                b'\'' => {
                    if in_quotes && i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                        i += 2;
                        continue;
                    }
                    in_quotes = !in_quotes;
                    i += 1;
                }
                b'!' if !in_quotes => {
                    if i == 0 {
                        return Err(err(format!("empty sheet qualifier: {reference}")));
                    }
                    return Ok((
                        Some(reference[..i].to_string()),
                        reference[i + 1..].to_string(),
                    ));
                }
                _ => i += 1,
            }
        }
        if in_quotes {
            return Err(err(format!("unterminated quote in reference: {reference}")));
        }

        Ok((None, reference.to_string()))
    }

    /* ─────────────── structured references ─────────────── */

    fn parse_table_reference(reference: &str) -> Result<Self, ParserError> {
        let bracket_pos = reference
            .find('[')
            .ok_or_else(|| err(format!("invalid table reference: {reference}")))?;
        let table_name = reference[..bracket_pos].trim();
        if table_name.is_empty() || !reference.ends_with(']') {
            return Err(err(format!("invalid table reference: {reference}")));
        }

        let content = &reference[bracket_pos + 1..reference.len() - 1];
        let specifier = Self::parse_table_specifier(content)?;

        Ok(ReferenceType::Table(TableReference {
            name: table_name.to_string(),
            specifier,
        }))
    }

    /// Parse the content between the outermost table brackets.
    fn parse_table_specifier(content: &str) -> Result<Option<TableSpecifier>, ParserError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        if let Some(col) = content.strip_prefix('@') {
            return Ok(Some(if col.is_empty() {
                TableSpecifier::CurrentRow
            } else {
                TableSpecifier::CurrentRowColumn(col.trim().to_string())
            }));
        }

        if content.starts_with('#') {
            return Self::parse_special_item(content).map(Some);
        }

        if !content.contains('[') {
            return Ok(Some(TableSpecifier::Column(content.to_string())));
        }

        // Bracketed item list: `[#Headers],[Price]` or `[a]:[b]`.
        let items = split_bracket_items(content)?;
        if items.len() == 1 {
            if let BracketItem::Span(a, b) = &items[0] {
                return Ok(Some(TableSpecifier::ColumnRange(a.clone(), b.clone())));
            }
        }

        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            match item {
                BracketItem::Single(text) => {
                    let text = text.trim();
                    parts.push(if let Some(col) = text.strip_prefix('@') {
                        if col.is_empty() {
                            TableSpecifier::CurrentRow
                        } else {
                            TableSpecifier::CurrentRowColumn(col.trim().to_string())
                        }
                    } else if text.starts_with('#') {
                        Self::parse_special_item(text)?
                    } else {
                        TableSpecifier::Column(text.to_string())
                    });
                }
                BracketItem::Span(a, b) => parts.push(TableSpecifier::ColumnRange(a, b)),
            }
        }

        if parts.len() == 1 {
            Ok(parts.pop())
        } else {
            Ok(Some(TableSpecifier::Combination(parts)))
        }
    }

    fn parse_special_item(content: &str) -> Result<TableSpecifier, ParserError> {
        match content {
            "#All" => Ok(TableSpecifier::All),
            "#Headers" => Ok(TableSpecifier::Headers),
            "#Data" => Ok(TableSpecifier::Data),
            _ => Err(err(format!("unknown special item: {content}"))),
        }
    }
}

enum BracketItem {
    Single(String),
    Span(String, String),
}

/// Split `[a],[b]:[c],[#Headers]` into top-level items, pairing `:`-joined
/// brackets into spans.
fn split_bracket_items(content: &str) -> Result<Vec<BracketItem>, ParserError> {
    let bytes = content.as_bytes();
    let mut items = Vec::new();
    let mut i = 0;
    let mut pending: Option<String> = None;

    while i < bytes.len() {
        match bytes[i] {
            b'[' => {
                let start = i + 1;
                let mut depth = 1;
                i += 1;
                while i < bytes.len() && depth > 0 {
                    match bytes[i] {
                        b'[' => depth += 1,
                        b']' => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                }
                if depth != 0 {
                    return Err(err(format!("unbalanced table specifier: {content}")));
                }
                let inner = content[start..i - 1].to_string();
                if let Some(first) = pending.take() {
                    items.push(BracketItem::Span(first, inner));
                } else if bytes.get(i) == Some(&b':') {
                    pending = Some(inner);
                    i += 1;
                } else {
                    items.push(BracketItem::Single(inner));
                }
            }
            b',' | b' ' => i += 1,
            _ => return Err(err(format!("invalid table specifier: {content}"))),
        }
    }
    if pending.is_some() {
        return Err(err(format!("dangling column span in: {content}")));
    }
    Ok(items)
}

/// Split `Sheet1:Sheet3` into its two (unquoted) sheet names; `None` when
/// the text holds no top-level `:`.
fn split_sheet_span(text: &str) -> Option<(String, String)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut in_quotes = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                if in_quotes && i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                    i += 2;
                    continue;
                }
                in_quotes = !in_quotes;
                i += 1;
            }
            b':' if !in_quotes => {
                let first = unquote_sheet(&text[..i]);
                let second = unquote_sheet(&text[i + 1..]);
                return Some((first, second));
            }
            _ => i += 1,
        }
    }
    None
}

fn unquote_sheet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        trimmed[1..trimmed.len() - 1].replace("''", "'")
    } else {
        trimmed.to_string()
    }
}

/* ───────────────────── reference printing ───────────────────── */

fn print_qualifiers(
    f: &mut fmt::Formatter<'_>,
    workbook: &Option<String>,
    sheet: &Option<String>,
) -> fmt::Result {
    if let Some(wb) = workbook {
        write!(f, "[{wb}]")?;
    }
    if let Some(s) = sheet {
        write!(f, "{}!", print_sheet_name(s))?;
    }
    Ok(())
}

fn print_range_body(f: &mut fmt::Formatter<'_>, start: &RelAddr, end: &RangeEnd) -> fmt::Result {
    // Whole-column / whole-row starts collapse to their one-sided form.
    match (end.row, end.col) {
        (None, Some(_)) if start.row() == 0 && !start.row_abs => {
            if start.col_abs {
                write!(f, "$")?;
            }
            write!(f, "{}", col_to_letters(start.col()))?;
        }
        (Some(_), None) if start.col() == 0 && !start.col_abs => {
            if start.row_abs {
                write!(f, "$")?;
            }
            write!(f, "{}", start.row() + 1)?;
        }
        _ => write!(f, "{start}")?,
    }
    write!(f, ":")?;
    match (end.row, end.col) {
        (Some((row, row_abs)), Some((col, col_abs))) => {
            if col_abs {
                write!(f, "$")?;
            }
            write!(f, "{}", col_to_letters(col))?;
            if row_abs {
                write!(f, "$")?;
            }
            write!(f, "{}", row + 1)
        }
        (None, Some((col, col_abs))) => {
            if col_abs {
                write!(f, "$")?;
            }
            write!(f, "{}", col_to_letters(col))
        }
        (Some((row, row_abs)), None) => {
            if row_abs {
                write!(f, "$")?;
            }
            write!(f, "{}", row + 1)
        }
        (None, None) => write!(f, "INFINITY"),
    }
}

impl Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceType::Cell {
                workbook,
                sheet,
                addr,
            } => {
                print_qualifiers(f, workbook, sheet)?;
                write!(f, "{addr}")
            }
            ReferenceType::Range {
                workbook,
                sheet,
                start,
                end,
            } => {
                print_qualifiers(f, workbook, sheet)?;
                print_range_body(f, start, end)
            }
            ReferenceType::MultiSheetRange {
                workbook,
                sheet_start,
                sheet_end,
                start,
                end,
            } => {
                if let Some(wb) = workbook {
                    write!(f, "[{wb}]")?;
                }
                write!(
                    f,
                    "{}:{}!",
                    print_sheet_name(sheet_start),
                    print_sheet_name(sheet_end)
                )?;
                print_range_body(f, start, end)
            }
            ReferenceType::Table(table_ref) => {
                write!(f, "{}", table_ref.name)?;
                match &table_ref.specifier {
                    None => write!(f, "[]"),
                    Some(spec) => write!(f, "[{spec}]"),
                }
            }
            ReferenceType::Named {
                workbook,
                qualifier,
                name,
            } => {
                if let Some(wb) = workbook {
                    write!(f, "[{wb}]")?;
                }
                if let Some(q) = qualifier {
                    write!(f, "{}!", print_sheet_name(q))?;
                }
                write!(f, "{name}")
            }
        }
    }
}

impl Display for TableSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableSpecifier::All => write!(f, "#All"),
            TableSpecifier::Data => write!(f, "#Data"),
            TableSpecifier::Headers => write!(f, "#Headers"),
            TableSpecifier::CurrentRow => write!(f, "@"),
            TableSpecifier::Column(col) => write!(f, "{col}"),
            TableSpecifier::ColumnRange(a, b) => write!(f, "[{a}]:[{b}]"),
            TableSpecifier::CurrentRowColumn(col) => write!(f, "@{col}"),
            TableSpecifier::Combination(parts) => {
                // Canonical nested form: Table[[#Headers],[Price]]
                let mut first = true;
                for part in parts {
                    if !first {
                        write!(f, ",")?;
                    }
                    first = false;
                    match part {
                        TableSpecifier::ColumnRange(a, b) => write!(f, "[{a}]:[{b}]")?,
                        other => write!(f, "[{other}]")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/* ───────────────────────── the AST ───────────────────────── */

/// The different kinds of AST node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AstKind {
    Literal(LiteralValue),
    Reference(ReferenceType),
    UnaryOp {
        op: String,
        expr: Box<AstNode>,
    },
    BinaryOp {
        op: String,
        left: Box<AstNode>,
        right: Box<AstNode>,
    },
    Function {
        name: String,
        args: Vec<AstNode>,
    },
    Array(Vec<Vec<AstNode>>),
    /// Reserved node for malformed input: evaluates to `#ERROR!`, prints its
    /// original source verbatim. The parser never fails out of the engine.
    Invalid {
        source: String,
    },
}

/// A parsed formula element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AstNode {
    pub kind: AstKind,
}

impl AstNode {
    pub fn new(kind: AstKind) -> Self {
        AstNode { kind }
    }

    /// Canonical formula text with the leading `=`.
    pub fn to_formula(&self) -> String {
        format!("={self}")
    }

    /// Visit every reference in this AST, depth-first.
    pub fn visit_refs<V: FnMut(&ReferenceType)>(&self, mut visitor: V) {
        let mut stack: smallvec::SmallVec<[&AstNode; 8]> = smallvec::smallvec![self];
        while let Some(node) = stack.pop() {
            match &node.kind {
                AstKind::Reference(reference) => visitor(reference),
                AstKind::UnaryOp { expr, .. } => stack.push(expr),
                AstKind::BinaryOp { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                AstKind::Function { args, .. } => {
                    for a in args.iter().rev() {
                        stack.push(a);
                    }
                }
                AstKind::Array(rows) => {
                    for r in rows.iter().rev() {
                        for item in r.iter().rev() {
                            stack.push(item);
                        }
                    }
                }
                AstKind::Literal(_) | AstKind::Invalid { .. } => {}
            }
        }
    }
}

/// Map an operator token to the registry name of its implementation.
pub fn operator_function_name(op: &str, unary: bool) -> Option<&'static str> {
    Some(match (op, unary) {
        ("+", false) => "FE.ADD",
        ("-", false) => "FE.MINUS",
        ("*", false) => "FE.MULTIPLY",
        ("/", false) => "FE.DIVIDE",
        ("^", false) => "FE.POW",
        ("+", true) => "FE.UPLUS",
        ("-", true) => "FE.UMINUS",
        ("%", true) => "FE.UNARY_PERCENT",
        ("=", false) => "FE.EQ",
        ("<>", false) => "FE.NE",
        ("<", false) => "FE.LT",
        ("<=", false) => "FE.LTE",
        (">", false) => "FE.GT",
        (">=", false) => "FE.GTE",
        _ => return None,
    })
}

fn binary_precedence(op: &str) -> u8 {
    match op {
        "^" => 5,
        "*" | "/" => 4,
        "+" | "-" => 3,
        "&" => 2,
        _ => 1, // comparisons
    }
}

fn escape_text(s: &str) -> String {
    s.replace('"', "\"\"")
}

impl Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AstKind::Literal(LiteralValue::Text(s)) => write!(f, "\"{}\"", escape_text(s)),
            AstKind::Literal(LiteralValue::Empty) => Ok(()),
            AstKind::Literal(v) => write!(f, "{v}"),
            AstKind::Reference(r) => write!(f, "{r}"),
            AstKind::UnaryOp { op, expr } => {
                let needs_parens = matches!(
                    &expr.kind,
                    AstKind::BinaryOp { op: child_op, .. } if binary_precedence(child_op) < 6
                );
                if op == "%" {
                    if needs_parens {
                        write!(f, "({expr})%")
                    } else {
                        write!(f, "{expr}%")
                    }
                } else if needs_parens {
                    write!(f, "{op}({expr})")
                } else {
                    write!(f, "{op}{expr}")
                }
            }
            AstKind::BinaryOp { op, left, right } => {
                let prec = binary_precedence(op);
                let left_parens = matches!(
                    &left.kind,
                    AstKind::BinaryOp { op: child_op, .. } if binary_precedence(child_op) < prec
                );
                let right_parens = matches!(
                    &right.kind,
                    AstKind::BinaryOp { op: child_op, .. } if binary_precedence(child_op) <= prec
                );
                if left_parens {
                    write!(f, "({left})")?;
                } else {
                    write!(f, "{left}")?;
                }
                write!(f, "{op}")?;
                if right_parens {
                    write!(f, "({right})")
                } else {
                    write!(f, "{right}")
                }
            }
            AstKind::Function { name, args } => {
                write!(f, "{name}(")?;
                let mut first = true;
                for arg in args {
                    if !first {
                        write!(f, ",")?;
                    }
                    first = false;
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            AstKind::Array(rows) => {
                write!(f, "{{")?;
                let mut first_row = true;
                for row in rows {
                    if !first_row {
                        write!(f, ";")?;
                    }
                    first_row = false;
                    let mut first = true;
                    for item in row {
                        if !first {
                            write!(f, ",")?;
                        }
                        first = false;
                        write!(f, "{item}")?;
                    }
                }
                write!(f, "}}")
            }
            AstKind::Invalid { source } => write!(f, "{source}"),
        }
    }
}

/* ───────────────────────── the parser ───────────────────────── */

/// A parser converting tokens into an AST.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let filtered_tokens = tokens
            .into_iter()
            .filter(|t| t.token_type != TokenType::Whitespace)
            .collect();
        Parser {
            tokens: filtered_tokens,
            position: 0,
        }
    }

    pub fn parse(&mut self) -> Result<AstNode, ParserError> {
        if self.tokens.is_empty() {
            return Err(err("no tokens to parse"));
        }

        let ast = self.parse_expression()?;
        if self.position < self.tokens.len() {
            return Err(ParserError {
                message: format!(
                    "unexpected token at position {}: {:?}",
                    self.position, self.tokens[self.position]
                ),
                position: Some(self.position),
            });
        }
        Ok(ast)
    }

    fn parse_expression(&mut self) -> Result<AstNode, ParserError> {
        self.parse_binary_op(0)
    }

    fn parse_binary_op(&mut self, min_precedence: u8) -> Result<AstNode, ParserError> {
        let mut left = self.parse_unary_op()?;

        while self.position < self.tokens.len() {
            let token = &self.tokens[self.position];
            if token.token_type != TokenType::OpInfix {
                break;
            }

            let (precedence, associativity) =
                token.get_precedence().unwrap_or((0, Associativity::Left));
            if precedence < min_precedence {
                break;
            }

            let op = self.tokens[self.position].value.clone();
            self.position += 1;

            let next_min_precedence = if associativity == Associativity::Left {
                precedence + 1
            } else {
                precedence
            };

            let right = self.parse_binary_op(next_min_precedence)?;
            left = AstNode::new(AstKind::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        Ok(left)
    }

    fn parse_unary_op(&mut self) -> Result<AstNode, ParserError> {
        if self.position < self.tokens.len()
            && self.tokens[self.position].token_type == TokenType::OpPrefix
        {
            let op = self.tokens[self.position].value.clone();
            self.position += 1;
            let expr = self.parse_unary_op()?;
            return Ok(AstNode::new(AstKind::UnaryOp {
                op,
                expr: Box::new(expr),
            }));
        }
        self.parse_postfix_op()
    }

    fn parse_postfix_op(&mut self) -> Result<AstNode, ParserError> {
        let mut expr = self.parse_primary()?;

        while self.position < self.tokens.len()
            && self.tokens[self.position].token_type == TokenType::OpPostfix
        {
            let op = self.tokens[self.position].value.clone();
            self.position += 1;
            expr = AstNode::new(AstKind::UnaryOp {
                op,
                expr: Box::new(expr),
            });
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<AstNode, ParserError> {
        if self.position >= self.tokens.len() {
            return Err(ParserError {
                message: "unexpected end of tokens".to_string(),
                position: Some(self.position),
            });
        }

        let token = &self.tokens[self.position];
        match token.token_type {
            TokenType::Operand => {
                let operand_token = self.tokens[self.position].clone();
                self.position += 1;
                self.parse_operand(operand_token)
            }
            TokenType::Func => {
                let func_token = self.tokens[self.position].clone();
                self.position += 1;
                self.parse_function(func_token)
            }
            TokenType::Paren if token.subtype == TokenSubType::Open => {
                self.position += 1;
                let expr = self.parse_expression()?;
                if self.position >= self.tokens.len()
                    || self.tokens[self.position].token_type != TokenType::Paren
                    || self.tokens[self.position].subtype != TokenSubType::Close
                {
                    return Err(ParserError {
                        message: "expected closing parenthesis".to_string(),
                        position: Some(self.position),
                    });
                }
                self.position += 1;
                Ok(expr)
            }
            TokenType::Array if token.subtype == TokenSubType::Open => {
                self.position += 1;
                self.parse_array()
            }
            _ => Err(ParserError {
                message: format!("unexpected token: {token:?}"),
                position: Some(self.position),
            }),
        }
    }

    fn parse_operand(&mut self, token: Token) -> Result<AstNode, ParserError> {
        match token.subtype {
            TokenSubType::Number => {
                let value = token.value.parse::<f64>().map_err(|_| ParserError {
                    message: format!("invalid number: {}", token.value),
                    position: Some(self.position),
                })?;
                Ok(AstNode::new(AstKind::Literal(LiteralValue::Number(value))))
            }
            TokenSubType::Text => {
                let mut text = token.value.clone();
                if text.starts_with('"') && text.ends_with('"') && text.len() >= 2 {
                    text = text[1..text.len() - 1].replace("\"\"", "\"");
                }
                Ok(AstNode::new(AstKind::Literal(LiteralValue::Text(text))))
            }
            TokenSubType::Logical => {
                let value = token.value == "TRUE";
                Ok(AstNode::new(AstKind::Literal(LiteralValue::Boolean(value))))
            }
            TokenSubType::Error => {
                let kind = ErrorKind::parse(&token.value).ok_or_else(|| ParserError {
                    message: format!("unknown error literal: {}", token.value),
                    position: Some(self.position),
                })?;
                Ok(AstNode::new(AstKind::Literal(LiteralValue::Error(
                    EngineError::new(kind),
                ))))
            }
            TokenSubType::Range => {
                if token.value == "INFINITY" {
                    return Ok(AstNode::new(AstKind::Literal(LiteralValue::Infinity {
                        negative: false,
                    })));
                }
                let reference = ReferenceType::from_string(&token.value)?;
                Ok(AstNode::new(AstKind::Reference(reference)))
            }
            _ => Err(ParserError {
                message: format!("unexpected operand subtype: {:?}", token.subtype),
                position: Some(self.position),
            }),
        }
    }

    fn parse_function(&mut self, func_token: Token) -> Result<AstNode, ParserError> {
        // Identifiers are uppercased on recognition; resolution happens at
        // evaluation time (`#NAME?` on miss).
        let name = func_token.value[..func_token.value.len() - 1].to_uppercase();
        let args = self.parse_function_arguments()?;
        Ok(AstNode::new(AstKind::Function { name, args }))
    }

    fn parse_function_arguments(&mut self) -> Result<Vec<AstNode>, ParserError> {
        let mut args = Vec::new();

        if self.position < self.tokens.len()
            && self.tokens[self.position].token_type == TokenType::Func
            && self.tokens[self.position].subtype == TokenSubType::Close
        {
            self.position += 1;
            return Ok(args);
        }

        // Omitted arguments are Empty literals.
        if self.position < self.tokens.len()
            && self.tokens[self.position].token_type == TokenType::Sep
            && self.tokens[self.position].subtype == TokenSubType::Arg
        {
            args.push(AstNode::new(AstKind::Literal(LiteralValue::Empty)));
            self.position += 1;
        } else {
            args.push(self.parse_expression()?);
        }

        while self.position < self.tokens.len() {
            let token = &self.tokens[self.position];

            if token.token_type == TokenType::Sep && token.subtype == TokenSubType::Arg {
                self.position += 1;
                if self.position < self.tokens.len() {
                    let next_token = &self.tokens[self.position];
                    if next_token.token_type == TokenType::Sep
                        && next_token.subtype == TokenSubType::Arg
                    {
                        args.push(AstNode::new(AstKind::Literal(LiteralValue::Empty)));
                    } else if next_token.token_type == TokenType::Func
                        && next_token.subtype == TokenSubType::Close
                    {
                        args.push(AstNode::new(AstKind::Literal(LiteralValue::Empty)));
                        self.position += 1;
                        break;
                    } else {
                        args.push(self.parse_expression()?);
                    }
                } else {
                    args.push(AstNode::new(AstKind::Literal(LiteralValue::Empty)));
                }
            } else if token.token_type == TokenType::Func && token.subtype == TokenSubType::Close {
                self.position += 1;
                break;
            } else {
                return Err(ParserError {
                    message: format!("expected ',' or ')' in function arguments, got {token:?}"),
                    position: Some(self.position),
                });
            }
        }

        Ok(args)
    }

    fn parse_array(&mut self) -> Result<AstNode, ParserError> {
        let mut rows = Vec::new();
        let mut current_row = Vec::new();

        if self.position < self.tokens.len()
            && self.tokens[self.position].token_type == TokenType::Array
            && self.tokens[self.position].subtype == TokenSubType::Close
        {
            self.position += 1;
            return Ok(AstNode::new(AstKind::Array(rows)));
        }

        current_row.push(self.parse_expression()?);

        while self.position < self.tokens.len() {
            let token = &self.tokens[self.position];

            if token.token_type == TokenType::Sep {
                if token.subtype == TokenSubType::Arg {
                    self.position += 1;
                    current_row.push(self.parse_expression()?);
                } else {
                    self.position += 1;
                    rows.push(current_row);
                    current_row = vec![self.parse_expression()?];
                }
            } else if token.token_type == TokenType::Array && token.subtype == TokenSubType::Close {
                self.position += 1;
                rows.push(current_row);
                break;
            } else {
                return Err(ParserError {
                    message: format!("unexpected token in array: {token:?}"),
                    position: Some(self.position),
                });
            }
        }

        Ok(AstNode::new(AstKind::Array(rows)))
    }
}

/* ───────────────────── entry points ───────────────────── */

/// Parse a formula body (the text after the leading `=`).
///
/// Total: malformed input yields the reserved `Invalid` node, which prints
/// its source verbatim and evaluates to `#ERROR!`.
pub fn parse_formula_body(body: &str) -> AstNode {
    match try_parse_formula_body(body) {
        Ok(ast) => ast,
        Err(_) => AstNode::new(AstKind::Invalid {
            source: body.to_string(),
        }),
    }
}

/// Fallible variant used by tests and the rewriters.
pub fn try_parse_formula_body(body: &str) -> Result<AstNode, ParserError> {
    let tokenizer = Tokenizer::new(body)?;
    let mut parser = Parser::new(tokenizer.items);
    parser.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> AstNode {
        let ast = parse_formula_body(body);
        assert!(
            !matches!(ast.kind, AstKind::Invalid { .. }),
            "parse failed for {body:?}"
        );
        ast
    }

    fn roundtrip(body: &str) -> String {
        parse(body).to_string()
    }

    #[test]
    fn precedence_shapes() {
        let ast = parse("1+2*3");
        match &ast.kind {
            AstKind::BinaryOp { op, right, .. } => {
                assert_eq!(op, "+");
                assert!(matches!(&right.kind, AstKind::BinaryOp { op, .. } if op == "*"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        // comparison binds loosest
        let ast = parse("1+2=3");
        assert!(matches!(&ast.kind, AstKind::BinaryOp { op, .. } if op == "="));

        // & sits between comparison and additive
        let ast = parse("\"a\"&1+2");
        assert!(matches!(&ast.kind, AstKind::BinaryOp { op, .. } if op == "&"));
    }

    #[test]
    fn unary_binds_tighter_than_power() {
        // -2^2 parses as (-2)^2
        let ast = parse("-2^2");
        assert!(matches!(&ast.kind, AstKind::BinaryOp { op, .. } if op == "^"));
    }

    #[test]
    fn percent_postfix() {
        let ast = parse("50%");
        assert!(matches!(&ast.kind, AstKind::UnaryOp { op, .. } if op == "%"));
        assert_eq!(roundtrip("50%"), "50%");
        assert_eq!(roundtrip("(1+2)%"), "(1+2)%");
    }

    #[test]
    fn print_preserves_grouping() {
        assert_eq!(roundtrip("(1+2)*3"), "(1+2)*3");
        assert_eq!(roundtrip("1+2*3"), "1+2*3");
        assert_eq!(roundtrip("1-(2-3)"), "1-(2-3)");
        assert_eq!(roundtrip("-(1+2)"), "-(1+2)");
    }

    #[test]
    fn references_roundtrip() {
        for body in [
            "A1",
            "$A$1",
            "B$7",
            "Sheet1!A1",
            "'My Sheet'!A1:B2",
            "[Book1]Sheet1!A1",
            "A:A",
            "$A:$A",
            "1:1",
            "A5:A",
            "A5:10",
            "A5:INFINITY",
            "Sheet1:Sheet3!A1:B2",
            "RATE",
            "Book1!RATE",
            "[Book1]Sheet1!RATE",
        ] {
            assert_eq!(roundtrip(body), body, "roundtrip {body:?}");
        }
    }

    #[test]
    fn one_sided_ranges_canonicalize() {
        // A1:A and A:A denote the same cells and the same AST
        assert_eq!(roundtrip("A1:A"), "A:A");
        assert_eq!(parse("A1:A"), parse("A:A"));
        assert_eq!(roundtrip("A5:B"), "A5:B");
    }

    #[test]
    fn structured_references() {
        for body in [
            "Sales[Price]",
            "Sales[@Price]",
            "Sales[#Headers]",
            "Sales[#All]",
            "Sales[#Data]",
            "Sales[[#Headers],[Price]]",
            "Sales[[Price]:[Qty]]",
        ] {
            assert_eq!(roundtrip(body), body, "roundtrip {body:?}");
        }

        let ast = parse("Sales[[#Headers],[Price]]");
        match &ast.kind {
            AstKind::Reference(ReferenceType::Table(t)) => {
                assert_eq!(t.name, "Sales");
                assert_eq!(
                    t.specifier,
                    Some(TableSpecifier::Combination(vec![
                        TableSpecifier::Headers,
                        TableSpecifier::Column("Price".into()),
                    ]))
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn literals() {
        assert_eq!(
            parse("1.5e3").kind,
            AstKind::Literal(LiteralValue::Number(1500.0))
        );
        assert_eq!(
            parse("TRUE").kind,
            AstKind::Literal(LiteralValue::Boolean(true))
        );
        assert_eq!(
            parse("INFINITY").kind,
            AstKind::Literal(LiteralValue::Infinity { negative: false })
        );
        assert_eq!(
            parse("#REF!").kind,
            AstKind::Literal(LiteralValue::Error(EngineError::new(ErrorKind::Ref)))
        );
        assert_eq!(
            parse("\"he said \"\"hi\"\"\"").kind,
            AstKind::Literal(LiteralValue::Text("he said \"hi\"".into()))
        );
        assert_eq!(roundtrip("\"he said \"\"hi\"\"\""), "\"he said \"\"hi\"\"\"");
    }

    #[test]
    fn function_names_uppercased() {
        let ast = parse("sum(A1,2)");
        assert!(matches!(&ast.kind, AstKind::Function { name, .. } if name == "SUM"));
    }

    #[test]
    fn omitted_arguments_are_empty() {
        let ast = parse("IF(A1,,2)");
        match &ast.kind {
            AstKind::Function { args, .. } => {
                assert_eq!(args.len(), 3);
                assert_eq!(args[1].kind, AstKind::Literal(LiteralValue::Empty));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(roundtrip("IF(A1,,2)"), "IF(A1,,2)");
    }

    #[test]
    fn array_literals() {
        let ast = parse("{1,2;3,4}");
        match &ast.kind {
            AstKind::Array(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].len(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(roundtrip("{1,2;3,4}"), "{1,2;3,4}");
    }

    #[test]
    fn malformed_becomes_invalid() {
        for body in ["SUM(", "1+", "#WAT!", ")", "A1 B2"] {
            let ast = parse_formula_body(body);
            assert!(
                matches!(&ast.kind, AstKind::Invalid { source } if source == body),
                "{body:?}"
            );
            assert_eq!(ast.to_string(), body);
        }
    }

    #[test]
    fn operator_name_mapping() {
        assert_eq!(operator_function_name("+", false), Some("FE.ADD"));
        assert_eq!(operator_function_name("-", true), Some("FE.UMINUS"));
        assert_eq!(operator_function_name("<=", false), Some("FE.LTE"));
        assert_eq!(operator_function_name("&", false), None);
    }

    #[test]
    fn print_parse_idempotent() {
        for body in [
            "SUM(A1:B2)*2+1",
            "IF(A1>0,\"pos\",-A1)",
            "'Q1 Data'!B2:B10",
            "{1,2;3,4}",
            "SUM(Sales[[#Headers],[Price]])",
            "-2^2%",
        ] {
            let once = parse(body);
            let twice = parse(&once.to_string());
            assert_eq!(once, twice, "{body:?}");
            assert_eq!(once.to_string(), twice.to_string());
        }
    }
}
