//! Strict parser for the list-of-strings answers the model produces.
//!
//! The model answers in Python list-literal syntax (`['Paris', "London"]`).
//! Only that shape is accepted: a bracketed, comma separated sequence of
//! quoted string literals. Nothing in the input is ever evaluated.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::ParseError;

/// Parse a generated answer into the phrases it lists.
pub fn parse_entity_list(input: &str) -> Result<Vec<String>, ParseError> {
    let trimmed = input.trim();

    // Well-formed JSON is the common case.
    if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
        return Ok(list);
    }

    let offset = input.len() - input.trim_start().len();
    ListParser::new(trimmed, offset).parse()
}

struct ListParser<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    offset: usize,
}

impl<'a> ListParser<'a> {
    fn new(src: &'a str, offset: usize) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
            offset,
        }
    }

    fn pos(&mut self) -> usize {
        self.offset + self.chars.peek().map(|(i, _)| *i).unwrap_or(self.src.len())
    }

    fn error<T>(&mut self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError::new(self.pos(), message))
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn parse(mut self) -> Result<Vec<String>, ParseError> {
        self.skip_whitespace();
        match self.chars.next() {
            Some((_, '[')) => {}
            Some(_) => return Err(ParseError::new(self.offset, "expected '['")),
            None => return self.error("empty input"),
        }

        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.chars.peek().map(|(_, c)| *c) {
                Some(']') => {
                    self.chars.next();
                    break;
                }
                Some('\'') | Some('"') => {
                    items.push(self.parse_string()?);
                    self.skip_whitespace();
                    match self.chars.peek().map(|(_, c)| *c) {
                        Some(',') => {
                            self.chars.next();
                        }
                        Some(']') => {
                            self.chars.next();
                            break;
                        }
                        Some(c) => return self.error(format!("expected ',' or ']', found {:?}", c)),
                        None => return self.error("unterminated list"),
                    }
                }
                Some(c) => return self.error(format!("expected string literal, found {:?}", c)),
                None => return self.error("unterminated list"),
            }
        }

        self.skip_whitespace();
        if self.chars.peek().is_some() {
            return self.error("trailing characters after list");
        }
        Ok(items)
    }

    fn parse_string(&mut self) -> Result<String, ParseError> {
        let quote = match self.chars.next() {
            Some((_, c)) => c,
            None => return self.error("expected string literal"),
        };

        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => return Ok(out),
                Some((_, '\n')) => return self.error("newline in string literal"),
                Some((_, '\\')) => self.parse_escape(&mut out)?,
                Some((_, c)) => out.push(c),
                None => return self.error("unterminated string literal"),
            }
        }
    }

    fn parse_escape(&mut self, out: &mut String) -> Result<(), ParseError> {
        let c = match self.chars.next() {
            Some((_, c)) => c,
            None => return self.error("unterminated escape"),
        };
        match c {
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\n' => {}
            '0'..='7' => out.push(self.parse_octal(c)),
            'x' => out.push(self.parse_hex(2)?),
            'u' => out.push(self.parse_hex(4)?),
            'U' => out.push(self.parse_hex(8)?),
            // Unknown escapes keep their backslash.
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    /// Up to three octal digits, the first already consumed.
    fn parse_octal(&mut self, first: char) -> char {
        let mut value = first.to_digit(8).unwrap_or(0);
        for _ in 0..2 {
            match self.chars.peek().and_then(|(_, c)| c.to_digit(8)) {
                Some(d) => {
                    value = value * 8 + d;
                    self.chars.next();
                }
                None => break,
            }
        }
        // at most 0o777, always a valid scalar value
        char::from_u32(value).unwrap_or('\u{FFFD}')
    }

    fn parse_hex(&mut self, digits: usize) -> Result<char, ParseError> {
        let mut value = 0u32;
        for _ in 0..digits {
            match self.chars.peek().and_then(|(_, c)| c.to_digit(16)) {
                Some(d) => {
                    value = value * 16 + d;
                    self.chars.next();
                }
                None => return self.error("truncated hex escape"),
            }
        }
        match char::from_u32(value) {
            Some(c) => Ok(c),
            None => self.error(format!("invalid code point {:#x}", value)),
        }
    }
}
