pub mod parser;
pub mod rewrite;
pub mod tokenizer;

pub use cellflow_common::{EngineError, ErrorKind, LiteralValue};
pub use parser::{
    parse_formula_body, AstKind, AstNode, ParserError, ReferenceType, TableReference,
    TableSpecifier,
};
pub use rewrite::{
    rename_named_expression, rename_sheet, rename_sheet_scoped, rename_table, rename_workbook,
    transform,
};
pub use tokenizer::{Token, TokenSubType, TokenType, Tokenizer, TokenizerError};
