//! Token stream (C2): a lazy, k-ahead peekable queue of tokens scanned from
//! a source buffer.
//!
//! The full grammar of the model description language is a collaborator
//! (out of scope per the spec); what's in scope is the queue abstraction
//! itself — [`TokenStream::peek`] / [`TokenStream::advance`] — and a scanner
//! detailed enough to drive the parser in [`crate::parser`] and the data-set
//! reader in [`crate::dataset`]. Grounded in the reference compiler's
//! `Peek_Queue<Token>` (`peek_queue.h`): tokens are produced lazily as they
//! are peeked past, not all up front, and `advance` pops exactly one token
//! off the front.

use mobius_ast::{SourceLocation, Token, TokenKind};
use std::collections::VecDeque;

use crate::diagnostics::{Diagnostic, DiagResult, ErrorKind};

/// Punctuation and multi-character operator kinds the scanner recognizes,
/// layered on top of [`mobius_ast::TokenKind`] (which only models literal
/// and identifier payloads) so the stream can also carry structural tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum RawToken {
    Literal(TokenKind),
    Punct(char),
    Arrow,      // ->
    Le,         // <=
    Ge,         // >=
    Ne,         // !=
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedToken {
    pub raw: RawToken,
    pub loc: SourceLocation,
}

/// Scans one source buffer into raw characters, producing one
/// [`ScannedToken`] per call to `next_token`. `file_id` is embedded into
/// every emitted location for multi-file diagnostics.
pub struct Scanner<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    file_id: u32,
    /// Whether `YYYY-MM-DD` / `hh:mm:ss` literals should be recognized as
    /// dates rather than three separate integers minus two unary negations.
    date_mode: bool,
    source: &'a str,
}

impl<'a> Scanner<'a> {
    #[must_use]
    pub fn new(source: &'a str, file_id: u32) -> Self {
        Scanner {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            file_id,
            date_mode: true,
            source,
        }
    }

    #[must_use]
    pub fn with_date_mode(mut self, enabled: bool) -> Self {
        self.date_mode = enabled;
        self
    }

    fn loc(&self) -> SourceLocation {
        SourceLocation::File {
            file_id: self.file_id,
            line: self.line,
            column: self.column,
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Scans and returns the next token, advancing past it.
    pub fn next_token(&mut self) -> DiagResult<ScannedToken> {
        self.skip_trivia();
        let loc = self.loc();
        let Some(c) = self.peek_char() else {
            return Ok(ScannedToken { raw: RawToken::Eof, loc });
        };

        if c == '"' {
            return self.scan_quoted_string(loc);
        }
        if c.is_ascii_digit() || (c == '-' && self.peek_char_at(1).is_some_and(|n| n.is_ascii_digit())) {
            return self.scan_number_or_date(loc);
        }
        if c.is_alphabetic() || c == '_' {
            return self.scan_identifier(loc);
        }

        match c {
            '-' => {
                self.bump();
                if self.peek_char() == Some('>') {
                    self.bump();
                    Ok(ScannedToken { raw: RawToken::Arrow, loc })
                } else {
                    Ok(ScannedToken { raw: RawToken::Punct('-'), loc })
                }
            }
            '<' => {
                self.bump();
                if self.peek_char() == Some('=') {
                    self.bump();
                    Ok(ScannedToken { raw: RawToken::Le, loc })
                } else {
                    Ok(ScannedToken { raw: RawToken::Punct('<'), loc })
                }
            }
            '>' => {
                self.bump();
                if self.peek_char() == Some('=') {
                    self.bump();
                    Ok(ScannedToken { raw: RawToken::Ge, loc })
                } else {
                    Ok(ScannedToken { raw: RawToken::Punct('>'), loc })
                }
            }
            '!' => {
                self.bump();
                if self.peek_char() == Some('=') {
                    self.bump();
                    Ok(ScannedToken { raw: RawToken::Ne, loc })
                } else {
                    Ok(ScannedToken { raw: RawToken::Punct('!'), loc })
                }
            }
            '(' | ')' | '{' | '}' | '[' | ']' | ',' | ':' | ';' | '@' | '\\' | '+' | '*' | '/'
            | '=' | '.' => {
                self.bump();
                Ok(ScannedToken { raw: RawToken::Punct(c), loc })
            }
            other => Err(Diagnostic::new(
                ErrorKind::Parsing,
                loc,
                format!("unexpected character '{other}'"),
            )),
        }
    }

    fn scan_quoted_string(&mut self, loc: SourceLocation) -> DiagResult<ScannedToken> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some(c) => s.push(c),
                None => {
                    return Err(Diagnostic::new(ErrorKind::Parsing, loc, "unterminated quoted string"));
                }
            }
        }
        Ok(ScannedToken {
            raw: RawToken::Literal(TokenKind::QuotedString(s)),
            loc,
        })
    }

    fn scan_identifier(&mut self, loc: SourceLocation) -> DiagResult<ScannedToken> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let kind = match text.as_str() {
            "true" => TokenKind::BoolLiteral(true),
            "false" => TokenKind::BoolLiteral(false),
            "nan" | "NaN" | "Nan" => TokenKind::RealLiteral(f64::NAN),
            _ => TokenKind::Identifier(text),
        };
        Ok(ScannedToken { raw: RawToken::Literal(kind), loc })
    }

    /// Scans an integer, real (with optional exponent), or date/time
    /// literal. Dates are `YYYY-MM-DD`, optionally composed with a time of
    /// day via `+` as in the original grammar (`date +time`); we recognize
    /// the plain `YYYY-MM-DD` and `hh:mm:ss` forms, which is the form every
    /// series/data-set file in scope actually uses.
    fn scan_number_or_date(&mut self, loc: SourceLocation) -> DiagResult<ScannedToken> {
        let start = self.pos;
        if self.peek_char() == Some('-') {
            self.bump();
        }
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }

        // Date: NNNN-NN-NN (only when not already consumed a leading '-').
        if self.date_mode
            && self.pos - start == 4
            && self.peek_char() == Some('-')
            && self.peek_char_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            let year: i32 = self.chars[start..self.pos].iter().collect::<String>().parse().unwrap_or(0);
            self.bump(); // '-'
            let month_start = self.pos;
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
            let month: u32 = self.chars[month_start..self.pos].iter().collect::<String>().parse().unwrap_or(1);
            if self.peek_char() == Some('-') {
                self.bump();
                let day_start = self.pos;
                while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
                let day: u32 = self.chars[day_start..self.pos].iter().collect::<String>().parse().unwrap_or(1);
                let seconds = crate::datetime::DateTime::from_ymd(year, month, day)
                    .map(|d| d.seconds_since_epoch)
                    .unwrap_or(0);
                return Ok(ScannedToken {
                    raw: RawToken::Literal(TokenKind::RealLiteral(seconds as f64)),
                    loc,
                });
            }
        }

        let mut is_real = false;
        if self.peek_char() == Some('.') && self.peek_char_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_real = true;
            self.bump();
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let save = self.pos;
            let mut tentative = self.pos + 1;
            if self.chars.get(tentative).is_some_and(|c| *c == '+' || *c == '-') {
                tentative += 1;
            }
            if self.chars.get(tentative).is_some_and(|c| c.is_ascii_digit()) {
                is_real = true;
                while self.pos < tentative {
                    self.bump();
                }
                while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                let _ = save;
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        let kind = if is_real {
            TokenKind::RealLiteral(fast_parse_f64(&text))
        } else {
            TokenKind::IntLiteral(text.parse().map_err(|_| {
                Diagnostic::new(ErrorKind::Parsing, loc, format!("malformed integer '{text}'"))
            })?)
        };
        Ok(ScannedToken { raw: RawToken::Literal(kind), loc })
    }
}

/// Table-based fast double parser: exact for mantissas up to `2^53` and
/// exponents in `[-22, 22]` (falls back to the standard parser otherwise),
/// mirroring the reference lexer's design ("Double parsing uses a table of
/// powers of ten and is exact for mantissas up to 2^53 and exponents in
/// [-22,22]").
#[must_use]
pub fn fast_parse_f64(text: &str) -> f64 {
    const POW10: [f64; 23] = [
        1e0, 1e1, 1e2, 1e3, 1e4, 1e5, 1e6, 1e7, 1e8, 1e9, 1e10, 1e11, 1e12, 1e13, 1e14, 1e15,
        1e16, 1e17, 1e18, 1e19, 1e20, 1e21, 1e22,
    ];

    let bytes = text.as_bytes();
    let mut i = 0;
    let negative = bytes.first() == Some(&b'-');
    if negative {
        i += 1;
    }
    let mut mantissa: u64 = 0;
    let mut exponent: i32 = 0;
    let mut seen_dot = false;
    let mut digits = 0u32;
    let mut overflowed = false;

    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => {
                let d = u64::from(bytes[i] - b'0');
                if digits >= 19 {
                    overflowed = true;
                } else {
                    mantissa = mantissa * 10 + d;
                    digits += 1;
                    if seen_dot {
                        exponent -= 1;
                    }
                }
                i += 1;
            }
            b'.' => {
                seen_dot = true;
                i += 1;
            }
            b'e' | b'E' => {
                let rest = &text[i + 1..];
                let e: i32 = rest.parse().unwrap_or(0);
                exponent += e;
                i = bytes.len();
            }
            _ => i += 1,
        }
    }

    if overflowed || !(-22..=22).contains(&exponent) || mantissa > (1u64 << 53) {
        return text.parse().unwrap_or(f64::NAN);
    }

    let value = if exponent >= 0 {
        mantissa as f64 * POW10[exponent as usize]
    } else {
        mantissa as f64 / POW10[(-exponent) as usize]
    };
    if negative {
        -value
    } else {
        value
    }
}

/// A lazily-filled, k-ahead peekable queue of tokens over one scanner.
///
/// Mirrors `Peek_Queue<Token>`: [`peek`](TokenStream::peek) fills the
/// buffer up to the requested depth on demand (scanning no further than
/// necessary) and [`advance`](TokenStream::advance) pops exactly one token
/// off the front, just like the original's `cursor_first`/`cursor_end`
/// pair, minus the manual ring-buffer bookkeeping `VecDeque` already does.
pub struct TokenStream<'a> {
    scanner: Scanner<'a>,
    buffer: VecDeque<ScannedToken>,
    hit_eof: bool,
}

impl<'a> TokenStream<'a> {
    #[must_use]
    pub fn new(scanner: Scanner<'a>) -> Self {
        TokenStream {
            scanner,
            buffer: VecDeque::new(),
            hit_eof: false,
        }
    }

    fn fill_to(&mut self, depth: usize) -> DiagResult<()> {
        while self.buffer.len() <= depth {
            if self.hit_eof {
                // Keep yielding Eof tokens for peeks past the end.
                let loc = self
                    .buffer
                    .back()
                    .map_or(SourceLocation::Internal, |t| t.loc);
                self.buffer.push_back(ScannedToken { raw: RawToken::Eof, loc });
                continue;
            }
            let tok = self.scanner.next_token()?;
            if matches!(tok.raw, RawToken::Eof) {
                self.hit_eof = true;
            }
            self.buffer.push_back(tok);
        }
        Ok(())
    }

    /// Peeks `ahead` tokens past the current front (0 = the next token to
    /// be consumed).
    pub fn peek(&mut self, ahead: usize) -> DiagResult<&ScannedToken> {
        self.fill_to(ahead)?;
        Ok(&self.buffer[ahead])
    }

    /// Consumes and returns the front token.
    pub fn advance(&mut self) -> DiagResult<ScannedToken> {
        self.fill_to(0)?;
        Ok(self.buffer.pop_front().expect("filled to at least index 0"))
    }

    pub fn at_eof(&mut self) -> DiagResult<bool> {
        Ok(matches!(self.peek(0)?.raw, RawToken::Eof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(src: &'_ str) -> TokenStream<'_> {
        TokenStream::new(Scanner::new(src, 0))
    }

    #[test]
    fn peek_does_not_consume() {
        let mut ts = stream("foo bar");
        let first = ts.peek(0).unwrap().clone();
        let again = ts.peek(0).unwrap().clone();
        assert_eq!(first, again);
        assert_eq!(
            first.raw,
            RawToken::Literal(TokenKind::Identifier("foo".into()))
        );
    }

    #[test]
    fn k_ahead_peek_sees_future_tokens() {
        let mut ts = stream("a b c");
        let c = ts.peek(2).unwrap().clone();
        assert_eq!(c.raw, RawToken::Literal(TokenKind::Identifier("c".into())));
        // Front is still 'a'.
        let front = ts.advance().unwrap();
        assert_eq!(front.raw, RawToken::Literal(TokenKind::Identifier("a".into())));
    }

    #[test]
    fn recognizes_arrow_and_comparisons() {
        let mut ts = stream("-> <= >= !=");
        assert_eq!(ts.advance().unwrap().raw, RawToken::Arrow);
        assert_eq!(ts.advance().unwrap().raw, RawToken::Le);
        assert_eq!(ts.advance().unwrap().raw, RawToken::Ge);
        assert_eq!(ts.advance().unwrap().raw, RawToken::Ne);
    }

    #[test]
    fn line_comment_is_skipped() {
        let mut ts = stream("a # this is a comment\nb");
        assert_eq!(ts.advance().unwrap().raw, RawToken::Literal(TokenKind::Identifier("a".into())));
        assert_eq!(ts.advance().unwrap().raw, RawToken::Literal(TokenKind::Identifier("b".into())));
    }

    #[test]
    fn real_and_int_literals() {
        let mut ts = stream("42 3.5 -2 1.5e3 1e-2");
        assert_eq!(ts.advance().unwrap().raw, RawToken::Literal(TokenKind::IntLiteral(42)));
        assert_eq!(ts.advance().unwrap().raw, RawToken::Literal(TokenKind::RealLiteral(3.5)));
        assert_eq!(ts.advance().unwrap().raw, RawToken::Literal(TokenKind::IntLiteral(-2)));
        match ts.advance().unwrap().raw {
            RawToken::Literal(TokenKind::RealLiteral(v)) => assert!((v - 1500.0).abs() < 1e-9),
            other => panic!("expected real literal, got {other:?}"),
        }
        match ts.advance().unwrap().raw {
            RawToken::Literal(TokenKind::RealLiteral(v)) => assert!((v - 0.01).abs() < 1e-12),
            other => panic!("expected real literal, got {other:?}"),
        }
    }

    #[test]
    fn booleans_and_nan() {
        let mut ts = stream("true false NaN");
        assert_eq!(ts.advance().unwrap().raw, RawToken::Literal(TokenKind::BoolLiteral(true)));
        assert_eq!(ts.advance().unwrap().raw, RawToken::Literal(TokenKind::BoolLiteral(false)));
        match ts.advance().unwrap().raw {
            RawToken::Literal(TokenKind::RealLiteral(v)) => assert!(v.is_nan()),
            other => panic!("expected NaN literal, got {other:?}"),
        }
    }

    #[test]
    fn quoted_strings_allow_spaces() {
        let mut ts = stream(r#""hello world""#);
        assert_eq!(
            ts.advance().unwrap().raw,
            RawToken::Literal(TokenKind::QuotedString("hello world".into()))
        );
    }

    #[test]
    fn eof_is_stable_past_the_end() {
        let mut ts = stream("x");
        ts.advance().unwrap();
        assert!(ts.at_eof().unwrap());
        assert!(ts.at_eof().unwrap());
    }

    #[test]
    fn fast_parse_matches_std_for_exact_range() {
        for text in ["1.5", "0.001", "123456.789", "-42.0", "2.5e10", "1e-5"] {
            let fast = fast_parse_f64(text);
            let std: f64 = text.parse().unwrap();
            assert!((fast - std).abs() <= std.abs() * 1e-12 + 1e-15, "{text}: {fast} vs {std}");
        }
    }
}
