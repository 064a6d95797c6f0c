//! Single-pass tokenizer for formula bodies.
//!
//! The tokenizer works on the text *after* the leading `=`. It never panics
//! on user input: anything structurally broken surfaces as a
//! [`TokenizerError`] which the parser folds into the reserved error AST.
//!
//! Reference text is greedy: sheet qualifiers (`'My Sheet'!`), workbook
//! brackets (`[Book]`), structured-reference brackets (`Table[col]`), and
//! the `:` range operator all accumulate into a single operand token, which
//! the parser then takes apart.

use std::error::Error;
use std::fmt::{self, Display};

static ERROR_CODES: &[&str] = &[
    "#DIV/0!",
    "#VALUE!",
    "#REF!",
    "#NAME?",
    "#NUM!",
    "#N/A",
    "#CYCLE!",
    "#ERROR!",
    "#SPILL!",
];

/// Operator associativity.
#[derive(Debug, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

#[derive(Debug)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenizerError: {}", self.message)
    }
}

impl Error for TokenizerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Operand,
    Func,
    Array,
    Paren,
    Sep,
    OpPrefix,
    OpInfix,
    OpPostfix,
    Whitespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSubType {
    None,
    Text,
    Number,
    Logical,
    Error,
    Range,
    Open,
    Close,
    Arg,
    Row,
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub struct Token {
    pub value: String,
    pub token_type: TokenType,
    pub subtype: TokenSubType,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{:?} subtype: {:?} value: {}>",
            self.token_type, self.subtype, self.value
        )
    }
}

impl Token {
    pub fn new(value: String, token_type: TokenType, subtype: TokenSubType) -> Self {
        Token {
            value,
            token_type,
            subtype,
        }
    }

    /// Precedence table (low → high): comparison, `&`, `+ -`, `* /`, `^`,
    /// `%`, unary sign. `u` is the internal key for prefix operators.
    pub fn get_precedence(&self) -> Option<(u8, Associativity)> {
        let op = if self.token_type == TokenType::OpPrefix {
            "u"
        } else {
            self.value.as_str()
        };

        match op {
            "u" => Some((7, Associativity::Right)),
            "%" => Some((6, Associativity::Left)),
            "^" => Some((5, Associativity::Left)),
            "*" | "/" => Some((4, Associativity::Left)),
            "+" | "-" => Some((3, Associativity::Left)),
            "&" => Some((2, Associativity::Left)),
            "=" | "<" | ">" | "<=" | ">=" | "<>" => Some((1, Associativity::Left)),
            _ => None,
        }
    }

    /// Classify an accumulated slice into an operand token.
    ///
    /// A slice is a Number only when it parses to a *finite* f64 and starts
    /// numerically — `f64::from_str` also accepts `inf`/`NaN` spellings, and
    /// the `INFINITY` literal must stay a Range-subtype operand so the
    /// parser can recognise it.
    pub fn make_operand(value: String) -> Self {
        let subtype = if value.starts_with('"') {
            TokenSubType::Text
        } else if value.starts_with('#') {
            TokenSubType::Error
        } else if value == "TRUE" || value == "FALSE" {
            TokenSubType::Logical
        } else if looks_numeric(&value) && value.parse::<f64>().map(f64::is_finite) == Ok(true) {
            TokenSubType::Number
        } else {
            TokenSubType::Range
        };
        Token::new(value, TokenType::Operand, subtype)
    }
}

fn looks_numeric(value: &str) -> bool {
    matches!(value.as_bytes().first(), Some(b) if b.is_ascii_digit() || *b == b'.')
}

/// What an open `(` / `{` was, so the matching closer can be checked.
#[derive(Clone, Copy, PartialEq)]
enum Opener {
    Paren,
    Call,
    Brace,
}

/// A tokenizer for one formula body.
pub struct Tokenizer {
    pub items: Vec<Token>,
}

impl Tokenizer {
    /// Tokenize the formula body (text after the leading `=`).
    pub fn new(formula: &str) -> Result<Self, TokenizerError> {
        let scanner = Scanner {
            src: formula,
            pos: 0,
            pending: None,
            opens: Vec::new(),
            out: Vec::with_capacity(formula.len() / 2),
        };
        Ok(Tokenizer {
            items: scanner.run()?,
        })
    }

    /// Reconstruct the tokenized text.
    pub fn render(&self) -> String {
        self.items.iter().map(|t| t.value.as_str()).collect()
    }
}

impl TryFrom<&str> for Tokenizer {
    type Error = TokenizerError;

    fn try_from(value: &str) -> Result<Self, TokenizerError> {
        Tokenizer::new(value)
    }
}

/// Cursor state for one scan. `pending` is the start of an operand slice
/// still being accumulated; it is flushed whenever a byte that cannot
/// belong to a reference or literal comes up.
struct Scanner<'s> {
    src: &'s str,
    pos: usize,
    pending: Option<usize>,
    opens: Vec<Opener>,
    out: Vec<Token>,
}

impl<'s> Scanner<'s> {
    fn run(mut self) -> Result<Vec<Token>, TokenizerError> {
        while let Some(b) = self.peek() {
            match b {
                b'"' => {
                    self.flush();
                    self.scan_string()?;
                }
                b'\'' => self.scan_quoted_sheet()?,
                b'[' => self.scan_bracketed()?,
                b'#' => {
                    self.flush();
                    self.scan_error_literal()?;
                }
                b' ' | b'\n' => {
                    self.flush();
                    self.scan_whitespace();
                }
                b'{' => {
                    self.flush();
                    self.push_open(Opener::Brace, "{");
                }
                b'(' => self.scan_open_paren(),
                b')' | b'}' => {
                    self.flush();
                    self.scan_closer(b)?;
                }
                b',' => {
                    self.flush();
                    self.push_simple(",", TokenType::Sep, TokenSubType::Arg);
                }
                b';' => {
                    self.flush();
                    self.push_simple(";", TokenType::Sep, TokenSubType::Row);
                }
                b'+' | b'-' => self.scan_sign(b),
                b'*' | b'/' | b'^' | b'&' | b'%' | b'=' | b'<' | b'>' => {
                    self.flush();
                    self.scan_operator(b);
                }
                _ => self.extend_pending(),
            }
        }
        self.flush();

        if self.opens.is_empty() {
            Ok(self.out)
        } else {
            Err(self.fail("unclosed parenthesis or brace"))
        }
    }

    /* ── cursor primitives ── */

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    #[inline]
    fn peek_next(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos + 1).copied()
    }

    fn fail(&self, message: &str) -> TokenizerError {
        TokenizerError {
            message: message.to_string(),
            pos: self.pos,
        }
    }

    /// Fold the current byte into the pending operand slice.
    fn extend_pending(&mut self) {
        if self.pending.is_none() {
            self.pending = Some(self.pos);
        }
        self.pos += 1;
    }

    /// Emit the pending operand slice, if any.
    fn flush(&mut self) {
        if let Some(start) = self.pending.take() {
            if self.pos > start {
                self.out
                    .push(Token::make_operand(self.src[start..self.pos].to_string()));
            }
        }
    }

    fn pending_last_byte(&self) -> Option<u8> {
        let start = self.pending?;
        if self.pos > start {
            Some(self.src.as_bytes()[self.pos - 1])
        } else {
            None
        }
    }

    fn push_simple(&mut self, value: &str, token_type: TokenType, subtype: TokenSubType) {
        self.out
            .push(Token::new(value.to_string(), token_type, subtype));
        self.pos += value.len();
    }

    /* ── strings and quoted names ── */

    /// Double-quoted text literal with `""` escapes. Emits a Text operand.
    fn scan_string(&mut self) -> Result<(), TokenizerError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek() {
                None => return Err(self.fail("unterminated string literal")),
                Some(b'"') => {
                    self.pos += 1;
                    if self.peek() == Some(b'"') {
                        self.pos += 1; // escaped quote, keep scanning
                    } else {
                        self.out
                            .push(Token::make_operand(self.src[start..self.pos].to_string()));
                        return Ok(());
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Single-quoted sheet name with `''` escapes. Folds into the pending
    /// operand so `'My Sheet'!A1` stays one reference; a quote directly
    /// after `:` or `]` continues a reference already underway
    /// (`Sheet1:'Other'!A1`, `[Book]'My Sheet'!A1`).
    fn scan_quoted_sheet(&mut self) -> Result<(), TokenizerError> {
        let continues = matches!(self.pending_last_byte(), Some(b':') | Some(b']'));
        if !continues {
            self.flush();
        }
        if self.pending.is_none() {
            self.pending = Some(self.pos);
        }
        self.pos += 1;
        loop {
            match self.peek() {
                None => return Err(self.fail("unterminated sheet-name quote")),
                Some(b'\'') => {
                    self.pos += 1;
                    if self.peek() == Some(b'\'') {
                        self.pos += 1; // escaped quote, keep scanning
                    } else {
                        return Ok(()); // the reference continues after the quote
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// A balanced `[...]` group folds into the pending operand. Covers both
    /// the `[Book]Sheet!A1` workbook qualifier and `Table[...]` structured
    /// references (which may nest brackets).
    fn scan_bracketed(&mut self) -> Result<(), TokenizerError> {
        if self.pending.is_none() {
            self.pending = Some(self.pos);
        }
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(self.fail("unterminated '['"))
    }

    /// `#`-led error literal; must match one of the nine known codes.
    fn scan_error_literal(&mut self) -> Result<(), TokenizerError> {
        let rest = &self.src[self.pos..];
        for code in ERROR_CODES {
            if rest.starts_with(code) {
                self.out.push(Token::make_operand(code.to_string()));
                self.pos += code.len();
                return Ok(());
            }
        }
        Err(self.fail("unrecognized error literal"))
    }

    fn scan_whitespace(&mut self) {
        let start = self.pos;
        while matches!(self.peek(), Some(b' ') | Some(b'\n')) {
            self.pos += 1;
        }
        self.out.push(Token::new(
            self.src[start..self.pos].to_string(),
            TokenType::Whitespace,
            TokenSubType::None,
        ));
    }

    /* ── grouping ── */

    fn push_open(&mut self, opener: Opener, value: &str) {
        let token_type = match opener {
            Opener::Paren => TokenType::Paren,
            Opener::Call => TokenType::Func,
            Opener::Brace => TokenType::Array,
        };
        self.opens.push(opener);
        self.out.push(Token::new(
            value.to_string(),
            token_type,
            TokenSubType::Open,
        ));
        self.pos += 1;
    }

    /// `(` right after an identifier turns the identifier into a call
    /// token; otherwise it is plain grouping.
    fn scan_open_paren(&mut self) {
        match self.pending.take() {
            Some(start) if self.pos > start => {
                let value = format!("{}(", &self.src[start..self.pos]);
                self.opens.push(Opener::Call);
                self.out
                    .push(Token::new(value, TokenType::Func, TokenSubType::Open));
                self.pos += 1;
            }
            _ => self.push_open(Opener::Paren, "("),
        }
    }

    fn scan_closer(&mut self, b: u8) -> Result<(), TokenizerError> {
        let opener = match self.opens.pop() {
            Some(o) => o,
            None => return Err(self.fail("closer with no matching opener")),
        };
        let (expected, token_type) = match opener {
            Opener::Paren => (b')', TokenType::Paren),
            Opener::Call => (b')', TokenType::Func),
            Opener::Brace => (b'}', TokenType::Array),
        };
        if b != expected {
            return Err(self.fail("mismatched ( and { pair"));
        }
        self.out.push(Token::new(
            (b as char).to_string(),
            token_type,
            TokenSubType::Close,
        ));
        self.pos += 1;
        Ok(())
    }

    /* ── operators ── */

    /// `+` and `-` are three-way: part of a scientific-notation exponent,
    /// a prefix sign, or an infix operator.
    fn scan_sign(&mut self, b: u8) {
        if self.pending_is_exponent_base() {
            self.pos += 1; // the sign stays inside the number
            return;
        }
        self.flush();
        let token_type = if self.last_token_ends_expression() {
            TokenType::OpInfix
        } else {
            TokenType::OpPrefix
        };
        self.out.push(Token::new(
            (b as char).to_string(),
            token_type,
            TokenSubType::None,
        ));
        self.pos += 1;
    }

    /// Does the pending slice read as the mantissa-plus-`e` of a number
    /// (`1.5e`, `9E`)? Then a following sign belongs to the exponent.
    fn pending_is_exponent_base(&self) -> bool {
        let Some(start) = self.pending else {
            return false;
        };
        let bytes = &self.src.as_bytes()[start..self.pos];
        if bytes.len() < 2 || !matches!(bytes[bytes.len() - 1], b'e' | b'E') {
            return false;
        }
        if !bytes[0].is_ascii_digit() && bytes[0] != b'.' {
            return false;
        }
        let mut seen_dot = bytes[0] == b'.';
        for b in &bytes[1..bytes.len() - 1] {
            match b {
                b'0'..=b'9' => {}
                b'.' if !seen_dot => seen_dot = true,
                _ => return false,
            }
        }
        true
    }

    /// A sign is infix when the previous substantive token can end an
    /// expression: an operand, a postfix operator, or any closer.
    fn last_token_ends_expression(&self) -> bool {
        self.out
            .iter()
            .rev()
            .find(|t| t.token_type != TokenType::Whitespace)
            .is_some_and(|t| {
                t.subtype == TokenSubType::Close
                    || matches!(t.token_type, TokenType::Operand | TokenType::OpPostfix)
            })
    }

    fn scan_operator(&mut self, b: u8) {
        let two = match (b, self.peek_next()) {
            (b'<', Some(b'=')) => Some("<="),
            (b'>', Some(b'=')) => Some(">="),
            (b'<', Some(b'>')) => Some("<>"),
            _ => None,
        };
        if let Some(op) = two {
            self.push_simple(op, TokenType::OpInfix, TokenSubType::None);
            return;
        }
        let token_type = if b == b'%' {
            TokenType::OpPostfix
        } else {
            TokenType::OpInfix
        };
        self.out.push(Token::new(
            (b as char).to_string(),
            token_type,
            TokenSubType::None,
        ));
        self.pos += 1;
    }
}
