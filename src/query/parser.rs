//! Query parser for converting query strings to [`Query`] trees.

use std::sync::Arc;

use crate::analysis::Tokenizer;
use crate::error::{Result, StrataError};
use crate::query::Query;

/// A simple query parser that supports basic query syntax.
/// Schema-less: no field validation, accepts any field name.
#[derive(Debug, Clone)]
pub struct QueryParser {
    /// Default field to search in when no field is specified.
    default_field: Option<String>,
    /// Lowercase term, prefix and range tokens.
    lowercase: bool,
    /// Splits term values the way indexed text was split.
    tokenizer: Option<Arc<dyn Tokenizer>>,
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryParser {
    /// Create a new query parser (schema-less).
    pub fn new() -> Self {
        QueryParser {
            default_field: None,
            lowercase: true,
            tokenizer: None,
        }
    }

    /// Set the default field to search in when no field is specified.
    pub fn with_default_field<S: Into<String>>(mut self, field: S) -> Self {
        self.default_field = Some(field.into());
        self
    }

    /// Whether tokens are lowercased like the word tokenizer does.
    pub fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    /// Run bare and quoted term values through `tokenizer`.
    ///
    /// A value yielding one token becomes a term, several tokens become an
    /// `And` of terms and no token at all becomes [`Query::Empty`]. Prefix,
    /// range and regex values are left alone.
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Parse a query string into a [`Query`].
    ///
    /// Supported syntax:
    /// - Simple terms: `hello`
    /// - Field-specific terms: `title:hello`
    /// - Quoted tokens: `title:"AND"`
    /// - Ranges: `year:[2000 TO 2010]`
    /// - Prefixes: `title:hel*`
    /// - Regular expressions over whole tokens: `title:/h.*o/`
    /// - Modifiers: `+required -forbidden`
    /// - Parentheses: `(title:hello OR body:world)`
    /// - AND/OR/NOT operators; adjacent clauses are ANDed
    pub fn parse(&self, query_str: &str) -> Result<Query> {
        let trimmed = query_str.trim();
        if trimmed.is_empty() {
            return Ok(Query::Empty);
        }

        let mut parser = QueryStringParser::new(trimmed, self.default_field.as_deref(), self);
        parser.parse()
    }

    /// Parse a query string with `field` as the default field.
    pub fn parse_field(&self, field: &str, query_str: &str) -> Result<Query> {
        let trimmed = query_str.trim();
        if trimmed.is_empty() {
            return Ok(Query::Empty);
        }

        let mut parser = QueryStringParser::new(trimmed, Some(field), self);
        parser.parse()
    }

    /// Get the default field.
    pub fn default_field(&self) -> Option<&str> {
        self.default_field.as_deref()
    }
}

/// Internal parser for parsing query strings.
struct QueryStringParser<'a> {
    chars: Vec<char>,
    pos: usize,
    default_field: Option<&'a str>,
    lowercase: bool,
    tokenizer: Option<&'a dyn Tokenizer>,
}

impl<'a> QueryStringParser<'a> {
    fn new(query_str: &str, default_field: Option<&'a str>, options: &'a QueryParser) -> Self {
        QueryStringParser {
            chars: query_str.chars().collect(),
            pos: 0,
            default_field,
            lowercase: options.lowercase,
            tokenizer: options.tokenizer.as_deref(),
        }
    }

    fn parse(&mut self) -> Result<Query> {
        let query = self.parse_or_expression()?;
        self.skip_whitespace();
        match self.peek() {
            None => Ok(query),
            Some(ch) => Err(StrataError::parse(format!(
                "unexpected '{ch}' at position {}",
                self.pos
            ))),
        }
    }

    fn parse_or_expression(&mut self) -> Result<Query> {
        let mut clauses = vec![self.parse_and_expression()?];

        while self.peek_keyword("OR") {
            self.consume_keyword("OR");
            clauses.push(self.parse_and_expression()?);
        }

        Ok(collapse(clauses, Query::Or))
    }

    fn parse_and_expression(&mut self) -> Result<Query> {
        let mut clauses = vec![self.parse_unary()?];

        loop {
            if self.peek_keyword("AND") {
                self.consume_keyword("AND");
            } else if !self.should_continue_and() {
                break;
            }
            clauses.push(self.parse_unary()?);
        }

        Ok(collapse(clauses, Query::And))
    }

    fn parse_unary(&mut self) -> Result<Query> {
        self.skip_whitespace();

        if self.peek_keyword("NOT") {
            self.consume_keyword("NOT");
            return Ok(Query::not(self.parse_unary()?));
        }

        match self.peek() {
            Some('+') => {
                self.pos += 1;
                self.parse_primary()
            }
            Some('-') => {
                self.pos += 1;
                Ok(Query::not(self.parse_primary()?))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Query> {
        self.skip_whitespace();

        match self.peek() {
            None => Err(StrataError::parse("expected a term but found end of input")),
            Some('(') => {
                self.pos += 1;
                self.skip_whitespace();
                // `()` is the empty query.
                if self.peek() == Some(')') {
                    self.pos += 1;
                    return Ok(Query::Empty);
                }
                let inner = self.parse_or_expression()?;
                self.skip_whitespace();
                if self.peek() != Some(')') {
                    return Err(StrataError::parse("missing closing parenthesis"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(')') => Err(StrataError::parse(format!(
                "unexpected ')' at position {}",
                self.pos
            ))),
            Some(_) => self.parse_clause(),
        }
    }

    /// `[field:]value`
    fn parse_clause(&mut self) -> Result<Query> {
        let start = self.pos;
        let starts_value = matches!(self.peek(), Some('[' | '/' | '"'));
        let name = self.consume_while(|ch| !is_delimiter(ch) && ch != ':');
        if !starts_value && !name.is_empty() && self.peek() == Some(':') {
            self.pos += 1;
            return self.parse_value(&name);
        }

        // Not a field prefix; reparse as a value of the default field.
        self.pos = start;
        match self.default_field {
            Some(field) => self.parse_value(field),
            None => Err(StrataError::parse(
                "No default field specified and no field prefix found",
            )),
        }
    }

    fn parse_value(&mut self, field: &str) -> Result<Query> {
        match self.peek() {
            Some('[') => self.parse_range(field),
            Some('/') => self.parse_regex(field),
            Some('"') => {
                let token = self.consume_quoted()?;
                Ok(self.term(field, token))
            }
            _ => {
                let word = self.consume_while(|ch| !is_delimiter(ch));
                if word.is_empty() {
                    return Err(StrataError::parse(format!(
                        "expected a value for field '{field}'"
                    )));
                }
                match word.strip_suffix('*') {
                    Some(prefix) => Ok(Query::prefix(field, self.normalize(prefix.to_string()))),
                    None => Ok(self.term(field, word)),
                }
            }
        }
    }

    /// `[low TO high]`
    fn parse_range(&mut self, field: &str) -> Result<Query> {
        self.pos += 1;
        self.skip_whitespace();
        let low = self.consume_while(|ch| !ch.is_whitespace() && ch != ']');
        self.skip_whitespace();
        if !self.peek_keyword("TO") {
            return Err(StrataError::parse("expected 'TO' in range"));
        }
        self.consume_keyword("TO");
        let high = self.consume_while(|ch| !ch.is_whitespace() && ch != ']');
        self.skip_whitespace();
        if self.peek() != Some(']') {
            return Err(StrataError::parse("missing closing ']' in range"));
        }
        self.pos += 1;
        if low.is_empty() || high.is_empty() {
            return Err(StrataError::parse("range bounds must not be empty"));
        }
        Ok(Query::range(field, self.normalize(low), self.normalize(high)))
    }

    /// `/pattern/`, with `\/` for a literal slash.
    fn parse_regex(&mut self, field: &str) -> Result<Query> {
        self.pos += 1;
        let mut pattern = String::new();
        loop {
            match self.next() {
                None => return Err(StrataError::parse("missing closing '/' in regex")),
                Some('/') => break,
                Some('\\') if self.peek() == Some('/') => {
                    self.pos += 1;
                    pattern.push('/');
                }
                Some(ch) => pattern.push(ch),
            }
        }
        Ok(Query::regex(field, pattern))
    }

    fn consume_quoted(&mut self) -> Result<String> {
        self.pos += 1;
        let mut token = String::new();
        loop {
            match self.next() {
                None => return Err(StrataError::parse("missing closing quote")),
                Some('"') => return Ok(token),
                Some(ch) => token.push(ch),
            }
        }
    }

    fn term(&self, field: &str, value: String) -> Query {
        let Some(tokenizer) = self.tokenizer else {
            return Query::term(field, self.normalize(value));
        };
        let mut tokens = tokenizer.tokenize(&value);
        match tokens.len() {
            0 => Query::Empty,
            1 => Query::term(field, tokens.remove(0)),
            _ => Query::and(tokens.into_iter().map(|token| Query::term(field, token)).collect()),
        }
    }

    fn normalize(&self, token: String) -> String {
        if self.lowercase {
            token.to_lowercase()
        } else {
            token
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn consume_while<F: Fn(char) -> bool>(&mut self, accept: F) -> String {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !accept(ch) {
                break;
            }
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn consume_keyword(&mut self, keyword: &str) {
        self.pos += keyword.chars().count();
        self.skip_whitespace();
    }

    /// Whether the input continues with `keyword` as a standalone word.
    fn peek_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();

        let len = keyword.chars().count();
        let matches = self
            .chars
            .get(self.pos..self.pos + len)
            .is_some_and(|window| window.iter().copied().eq(keyword.chars()));
        matches
            && self
                .chars
                .get(self.pos + len)
                .is_none_or(|&ch| ch.is_whitespace() || ch == '(')
    }

    fn should_continue_and(&mut self) -> bool {
        self.skip_whitespace();

        // More content that could be part of an AND expression
        match self.peek() {
            Some(ch) => ch != ')' && !self.peek_keyword("OR"),
            None => false,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }
}

fn is_delimiter(ch: char) -> bool {
    ch.is_whitespace() || ch == '(' || ch == ')'
}

fn collapse(mut clauses: Vec<Query>, combine: fn(Vec<Query>) -> Query) -> Query {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        combine(clauses)
    }
}

/// Builder for creating query parsers.
#[derive(Debug, Default)]
pub struct QueryParserBuilder {
    default_field: Option<String>,
    keep_case: bool,
}

impl QueryParserBuilder {
    /// Create a new query parser builder (schema-less).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default field.
    pub fn default_field<S: Into<String>>(mut self, field: S) -> Self {
        self.default_field = Some(field.into());
        self
    }

    /// Keep tokens as written instead of lowercasing them.
    pub fn keep_case(mut self) -> Self {
        self.keep_case = true;
        self
    }

    /// Build the query parser.
    pub fn build(self) -> QueryParser {
        QueryParser {
            default_field: self.default_field,
            lowercase: !self.keep_case,
            tokenizer: None,
        }
    }
}
