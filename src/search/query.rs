//! Search query compiler.
//!
//! Turns a user-typed query string into an SQLite FTS5 `MATCH` expression.
//!
//! # Supported syntax
//!
//! - `term1 term2`: implicit AND
//! - `"exact phrase"`: quoted phrase; `""` inside a phrase is a literal quote
//! - `-term` / `-"phrase"`: NOT (exclude)
//! - `from:alice`, `to:bob`, `subject:invoice`, `body:"due date"`: restrict
//!   a term to one indexed column (prefix is case-insensitive)
//!
//! Every literal is emitted as an FTS5 string (`"..."` with embedded quotes
//! doubled), so nothing the user types can reach the FTS5 parser as an
//! operator, column filter, prefix marker or parenthesis.

use std::fmt;

use crate::error::QueryError;

/// Which indexed column a term is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    From,
    To,
    Subject,
    Body,
}

impl Field {
    /// Column name in the `emails_fts` table.
    pub fn column(self) -> &'static str {
        match self {
            Self::From => "from_addr",
            Self::To => "to_addr",
            Self::Subject => "subject",
            Self::Body => "body",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "from" => Some(Self::From),
            "to" => Some(Self::To),
            "subject" => Some(Self::Subject),
            "body" => Some(Self::Body),
            _ => None,
        }
    }
}

/// Whether a matching document must or must not contain the term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    Required,
    Excluded,
}

/// A single classified term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    /// The literal text, unescaped.
    pub text: String,
    pub kind: TermKind,
    /// Whether the user wrote it as a quoted phrase.
    pub phrase: bool,
    /// Column restriction, if any.
    pub field: Option<Field>,
}

impl QueryTerm {
    /// FTS5 rendering: an optional column filter followed by a quoted string.
    fn render(&self) -> String {
        let literal = quote_literal(&self.text);
        match self.field {
            Some(field) => format!("{} : {literal}", field.column()),
            None => literal,
        }
    }
}

/// An FTS5 expression ready to be bound to `MATCH ?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    expression: String,
    terms: Vec<QueryTerm>,
}

impl CompiledQuery {
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    pub fn required(&self) -> impl Iterator<Item = &QueryTerm> {
        self.terms.iter().filter(|t| t.kind == TermKind::Required)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &QueryTerm> {
        self.terms.iter().filter(|t| t.kind == TermKind::Excluded)
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Compile a query string into an FTS5 expression.
///
/// Fails with [`QueryError`] on an unterminated quote, when nothing
/// searchable is left, or when every term is an exclusion.
pub fn compile(input: &str) -> Result<CompiledQuery, QueryError> {
    let terms: Vec<QueryTerm> = tokenize(input)?
        .into_iter()
        .filter(|t| is_queryable(&t.text))
        .collect();

    if terms.is_empty() {
        return Err(QueryError::NoTerms);
    }

    let required: Vec<String> = terms
        .iter()
        .filter(|t| t.kind == TermKind::Required)
        .map(QueryTerm::render)
        .collect();
    if required.is_empty() {
        return Err(QueryError::OnlyExclusions);
    }

    let mut expression = required.join(" AND ");
    let mut excluded = terms
        .iter()
        .filter(|t| t.kind == TermKind::Excluded)
        .peekable();

    if excluded.peek().is_some() {
        if required.len() > 1 {
            expression = format!("({expression})");
        }
        for term in excluded {
            expression.push_str(" NOT ");
            expression.push_str(&term.render());
        }
    }

    Ok(CompiledQuery { expression, terms })
}

/// Wrap a literal in FTS5 string quotes, doubling embedded quotes.
pub fn quote_literal(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// The FTS5 tokenizer only indexes alphanumeric runs; anything else would
/// compile to an empty phrase.
///
/// `char::is_alphanumeric` also accepts combining marks that carry the
/// Alphabetic property (U+0903, for one). unicode61 does not index those,
/// so a term made only of such marks is kept and simply matches nothing.
fn is_queryable(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

/// Whitespace and control characters end a bare term. FTS5 reads its
/// expression as a C string, so a NUL must never reach it.
fn is_separator(c: char) -> bool {
    c.is_whitespace() || c.is_control()
}

/// Split input into classified terms, respecting quoted phrases.
///
/// A `"` opens a phrase only at the start of a term (after any `-` and
/// field prefix); elsewhere it is an ordinary character.
fn tokenize(input: &str) -> Result<Vec<QueryTerm>, QueryError> {
    let chars: Vec<char> = input.chars().collect();
    let mut terms = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if is_separator(chars[i]) {
            i += 1;
            continue;
        }

        let mut kind = TermKind::Required;
        if chars[i] == '-' && chars.get(i + 1).is_some_and(|c| !is_separator(*c)) {
            kind = TermKind::Excluded;
            i += 1;
        }

        let mut field = None;
        if let Some((f, len)) = field_prefix(&chars[i..]) {
            field = Some(f);
            i += len;
        }

        if chars[i] == '"' {
            let (text, next) = read_phrase(&chars, i)?;
            terms.push(QueryTerm {
                text,
                kind,
                phrase: true,
                field,
            });
            i = next;
        } else {
            let start = i;
            while i < chars.len() && !is_separator(chars[i]) {
                i += 1;
            }
            terms.push(QueryTerm {
                text: chars[start..i].iter().collect(),
                kind,
                phrase: false,
                field,
            });
        }
    }

    Ok(terms)
}

/// Recognize `name:` when `name` is a known field and a value follows.
///
/// Returns the field and the number of chars the prefix occupies.
fn field_prefix(chars: &[char]) -> Option<(Field, usize)> {
    let colon = chars
        .iter()
        .take_while(|c| c.is_ascii_alphabetic() || **c == ':')
        .position(|c| *c == ':')?;
    let name: String = chars[..colon].iter().collect();
    let field = Field::from_prefix(&name)?;
    let value_starts = chars.get(colon + 1).is_some_and(|c| !is_separator(*c));
    value_starts.then_some((field, colon + 1))
}

/// Read a quoted phrase starting at `open` (which must be a `"`).
///
/// Returns the unescaped text and the index just past the closing quote.
/// Control characters inside the phrase become spaces.
fn read_phrase(chars: &[char], open: usize) -> Result<(String, usize), QueryError> {
    let mut text = String::new();
    let mut i = open + 1;

    loop {
        match chars.get(i) {
            None => return Err(QueryError::UnterminatedQuote { position: open }),
            Some('"') if chars.get(i + 1) == Some(&'"') => {
                text.push('"');
                i += 2;
            }
            Some('"') => return Ok((text, i + 1)),
            Some(&c) if c.is_control() => {
                text.push(' ');
                i += 1;
            }
            Some(&c) => {
                text.push(c);
                i += 1;
            }
        }
    }
}
