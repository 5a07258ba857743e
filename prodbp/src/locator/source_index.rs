//! Function spans of a Rust source file
//!
//! A light scanner, not a parser: it tracks comments, string/char literals
//! and brace depth, and records the line span of every `fn` item that has a
//! body. That is all region resolution needs.

/// Line span of one `fn` item (1-based, inclusive)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpan {
    pub name: String,
    /// Line of the `fn` keyword
    pub start_line: u32,
    /// Line of the closing brace
    pub end_line: u32,
}

impl UnitSpan {
    #[must_use]
    pub fn encloses(&self, start_line: u32, end_line: u32) -> bool {
        self.start_line <= start_line && end_line <= self.end_line
    }

    /// Number of lines covered
    #[must_use]
    pub fn line_span(&self) -> u32 {
        self.end_line - self.start_line + 1
    }
}

/// Scanned view of one source file
#[derive(Debug, Clone)]
pub struct SourceIndex {
    line_count: u32,
    units: Vec<UnitSpan>,
}

impl SourceIndex {
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let line_count = u32::try_from(source.lines().count()).unwrap_or(u32::MAX);
        Self { line_count, units: Scanner::new(source).run() }
    }

    #[must_use]
    pub fn line_count(&self) -> u32 {
        self.line_count
    }

    #[must_use]
    pub fn units(&self) -> &[UnitSpan] {
        &self.units
    }

    /// Smallest `fn` span containing the whole range
    #[must_use]
    pub fn enclosing(&self, start_line: u32, end_line: u32) -> Option<&UnitSpan> {
        self.enclosing_spans(start_line, end_line).into_iter().next()
    }

    /// Every `fn` span containing the whole range, innermost first
    #[must_use]
    pub fn enclosing_spans(&self, start_line: u32, end_line: u32) -> Vec<&UnitSpan> {
        let mut spans: Vec<_> =
            self.units.iter().filter(|span| span.encloses(start_line, end_line)).collect();
        spans.sort_by_key(|span| span.line_span());
        spans
    }

    /// First span for a function called `name`
    #[must_use]
    pub fn unit_named(&self, name: &str) -> Option<&UnitSpan> {
        self.units.iter().find(|span| span.name == name)
    }
}

/// Open brace on the scanner's stack
enum Frame {
    Block,
    FnBody { name: String, start_line: u32 },
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    stack: Vec<Frame>,
    /// Open `(` and `[` count, so `[u8; 4]` in a signature is not a `;`
    delims: usize,
    /// `fn name` seen, body brace not reached yet: (name, line, delims)
    pending: Option<(String, u32, usize)>,
    units: Vec<UnitSpan>,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            stack: Vec::new(),
            delims: 0,
            pending: None,
            units: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn run(mut self) -> Vec<UnitSpan> {
        while let Some(c) = self.peek(0) {
            match c {
                '/' if self.peek(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek(1) == Some('*') => self.skip_block_comment(),
                '"' => {
                    self.bump();
                    self.skip_string();
                }
                'r' if self.starts_raw_string() => self.skip_raw_string(),
                '\'' => self.skip_char_or_lifetime(),
                '{' => {
                    self.bump();
                    let frame = match self.pending.take() {
                        Some((name, start_line, _)) => Frame::FnBody { name, start_line },
                        None => Frame::Block,
                    };
                    self.stack.push(frame);
                }
                '}' => {
                    self.bump();
                    if let Some(Frame::FnBody { name, start_line }) = self.stack.pop() {
                        self.units.push(UnitSpan { name, start_line, end_line: self.line });
                    }
                }
                '(' | '[' => {
                    self.bump();
                    self.delims += 1;
                }
                ')' | ']' => {
                    self.bump();
                    self.delims = self.delims.saturating_sub(1);
                }
                ';' => {
                    // `fn f();` in traits and extern blocks has no body
                    self.bump();
                    if self.pending.as_ref().is_some_and(|(_, _, delims)| *delims == self.delims) {
                        self.pending = None;
                    }
                }
                c if is_ident_start(c) => self.scan_word(),
                _ => {
                    self.bump();
                }
            }
        }
        self.units
    }

    fn scan_word(&mut self) {
        let line = self.line;
        let word = self.take_ident();
        if word != "fn" {
            return;
        }
        self.skip_whitespace();
        if self.peek(0).is_some_and(is_ident_start) {
            let name = self.take_ident();
            let name = name.strip_prefix("r#").map(str::to_string).unwrap_or(name);
            self.pending = Some((name, line, self.delims));
        }
    }

    fn take_ident(&mut self) -> String {
        let mut word = String::new();
        if self.peek(0) == Some('r') && self.peek(1) == Some('#') {
            word.push_str("r#");
            self.pos += 2;
        }
        while let Some(c) = self.peek(0) {
            if !is_ident_continue(c) {
                break;
            }
            word.push(c);
            self.bump();
        }
        word
    }

    fn skip_whitespace(&mut self) {
        while self.peek(0).is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        let mut depth = 1;
        while depth > 0 {
            match (self.peek(0), self.peek(1)) {
                (Some('/'), Some('*')) => {
                    self.pos += 2;
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.pos += 2;
                    depth -= 1;
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => return,
            }
        }
    }

    /// Consume up to and including the closing quote (opening already eaten)
    fn skip_string(&mut self) {
        while let Some(c) = self.bump() {
            match c {
                '\\' => {
                    self.bump();
                }
                '"' => return,
                _ => {}
            }
        }
    }

    fn starts_raw_string(&self) -> bool {
        let mut offset = 1;
        while self.peek(offset) == Some('#') {
            offset += 1;
        }
        self.peek(offset) == Some('"')
    }

    fn skip_raw_string(&mut self) {
        self.bump();
        let mut hashes = 0;
        while self.peek(0) == Some('#') {
            self.bump();
            hashes += 1;
        }
        self.bump();
        while let Some(c) = self.bump() {
            if c == '"' && (0..hashes).all(|i| self.peek(i) == Some('#')) {
                self.pos += hashes;
                return;
            }
        }
    }

    fn skip_char_or_lifetime(&mut self) {
        self.bump();
        match (self.peek(0), self.peek(1)) {
            (Some('\\'), _) => {
                while let Some(c) = self.bump() {
                    if c == '\'' {
                        break;
                    }
                }
            }
            (Some(_), Some('\'')) => {
                self.bump();
                self.bump();
            }
            // Lifetime or label: nothing more to skip
            _ => {}
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"use std::fmt;

pub struct Cart;

impl Cart {
    pub fn total(&self) -> u32 {
        let base = 10;
        let tax = 2;
        base + tax
    }

    fn label(&self) -> &'static str {
        "{ not a brace }"
    }
}

trait Priced {
    fn price(&self) -> u32;
}

fn outer() -> u32 {
    fn inner() -> u32 {
        // } stray brace in a comment
        let c = '}';
        1
    }
    /* { block
       comment } */
    inner() + 1
}
"#;

    #[test]
    fn test_finds_method_spans() {
        let index = SourceIndex::parse(SOURCE);
        let total = index.unit_named("total").unwrap();
        assert_eq!((total.start_line, total.end_line), (6, 10));
        let label = index.unit_named("label").unwrap();
        assert_eq!((label.start_line, label.end_line), (12, 14));
    }

    #[test]
    fn test_bodyless_declarations_are_skipped() {
        let index = SourceIndex::parse(SOURCE);
        assert!(index.unit_named("price").is_none());
    }

    #[test]
    fn test_smallest_enclosing_span_wins() {
        let index = SourceIndex::parse(SOURCE);
        assert_eq!(index.enclosing(23, 25).unwrap().name, "inner");
        assert_eq!(index.enclosing(29, 29).unwrap().name, "outer");
        assert_eq!(index.enclosing(7, 9).unwrap().name, "total");

        let names: Vec<_> = index.enclosing_spans(24, 24).iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["inner", "outer"]);
    }

    #[test]
    fn test_range_outside_any_fn() {
        let index = SourceIndex::parse(SOURCE);
        assert!(index.enclosing(1, 3).is_none());
        // Straddles two methods
        assert!(index.enclosing(9, 13).is_none());
    }

    #[test]
    fn test_raw_strings_and_lifetimes() {
        let source = "fn a<'x>(s: &'x str) -> &'x str {\n    let _r = r#\"}\"#;\n    s\n}\nfn b() {}\n";
        let index = SourceIndex::parse(source);
        let a = index.unit_named("a").unwrap();
        assert_eq!((a.start_line, a.end_line), (1, 4));
        let b = index.unit_named("b").unwrap();
        assert_eq!((b.start_line, b.end_line), (5, 5));
        assert_eq!(index.line_count(), 5);
    }

    #[test]
    fn test_array_types_in_signature() {
        let source = "fn digest(input: &[u8]) -> [u8; 4] {\n    [input[0]; 4]\n}\n";
        let index = SourceIndex::parse(source);
        let digest = index.unit_named("digest").unwrap();
        assert_eq!((digest.start_line, digest.end_line), (1, 3));
    }

    #[test]
    fn test_fn_pointer_types_do_not_open_units() {
        let source = "struct S {\n    f: fn(u32) -> u32,\n}\nfn real() {\n}\n";
        let index = SourceIndex::parse(source);
        assert_eq!(index.units().len(), 1);
        assert_eq!(index.units()[0].name, "real");
    }
}
