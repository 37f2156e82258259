//! Two-mode template lexer.
//!
//! In data mode everything up to the next `{{` is one [`TokenKind::Data`]
//! token. `{{` switches to code mode, which tokenizes until the matching
//! `}}`. A `{{ literal }}` tag switches to literal mode instead, where text is
//! passed through untouched until a standalone `{{ /literal }}`.

use crate::error::LexError;
use crate::token::{Pos, Token, TokenKind};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

const SYMBOLS2: [&str; 9] = ["==", "!=", ">=", "<=", "&&", "||", "??", "++", "--"];
const SYMBOLS1: &str = "+-*/%=!<>|&?.:,;@#[]()";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Data,
    Code,
    /// Inside `{{ literal }}`; remembers where the region opened.
    Literal(Pos),
}

/// Streams [`Token`]s out of template source.
#[derive(Debug)]
pub struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: u32,
    column: u32,
    mode: Mode,
    failed: bool,
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

impl Lexer {
    /// Lex `source` from the start, in data mode.
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
            mode: Mode::Data,
            failed: false,
        }
    }

    /// Current position.
    pub fn pos(&self) -> Pos {
        Pos::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        let mut i = self.index;
        for c in s.chars() {
            if self.chars.get(i) != Some(&c) {
                return false;
            }
            i += 1;
        }
        true
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn advance_by(&mut self, n: usize, out: &mut String) {
        for _ in 0..n {
            match self.advance() {
                Some(c) => out.push(c),
                None => break,
            }
        }
    }

    /// Step the cursor back one character.
    fn back(&mut self) {
        if self.index == 0 {
            return;
        }
        self.index -= 1;
        if self.chars[self.index] == '\n' {
            self.line -= 1;
            let line_start = self.chars[..self.index]
                .iter()
                .rposition(|&c| c == '\n')
                .map_or(0, |i| i + 1);
            self.column = (self.index - line_start) as u32 + 1;
        } else {
            self.column -= 1;
        }
    }

    fn rewind_to(&mut self, index: usize) {
        while self.index > index {
            self.back();
        }
    }

    fn skip_spaces(&mut self, out: &mut String) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            out.push(c);
            self.advance();
        }
    }

    /// Match `keyword }}` (surrounding whitespace allowed) right after an
    /// opening `{{`. On failure the cursor is left where it started.
    fn standalone_tag(&mut self, keyword: &str, out: &mut String) -> bool {
        let start = self.index;
        let restore = out.len();
        self.skip_spaces(out);
        let bounded = self.starts_with(keyword)
            && !self.peek_at(keyword.chars().count()).is_some_and(is_word);
        if bounded {
            self.advance_by(keyword.chars().count(), out);
            self.skip_spaces(out);
            if self.starts_with(CLOSE) {
                self.advance_by(2, out);
                return true;
            }
        }
        self.rewind_to(start);
        out.truncate(restore);
        false
    }

    fn token(&self, kind: TokenKind, value: String, at: Pos) -> Token {
        Token {
            kind,
            value,
            line: at.line,
            column: at.column,
        }
    }

    fn lex_data(&mut self) -> Option<Result<Token, LexError>> {
        let at = self.pos();
        self.peek()?;
        let mut value = String::new();
        if self.starts_with(OPEN) {
            self.advance_by(2, &mut value);
            if self.standalone_tag("literal", &mut value) {
                self.mode = Mode::Literal(at);
                return Some(Ok(self.token(TokenKind::LiteralStart, value, at)));
            }
            self.mode = Mode::Code;
            return Some(Ok(self.token(TokenKind::BlockStart, value, at)));
        }
        while self.peek().is_some() && !self.starts_with(OPEN) {
            self.advance_by(1, &mut value);
        }
        Some(Ok(self.token(TokenKind::Data, value, at)))
    }

    fn lex_literal(&mut self, opened: Pos) -> Option<Result<Token, LexError>> {
        let at = self.pos();
        if self.peek().is_none() {
            return Some(Err(LexError::new(opened, "unterminated `literal` region")));
        }
        let mut value = String::new();
        if self.starts_with(OPEN) {
            let start = self.index;
            self.advance_by(2, &mut value);
            if self.standalone_tag("/literal", &mut value) {
                self.mode = Mode::Data;
                return Some(Ok(self.token(TokenKind::LiteralEnd, value, at)));
            }
            self.rewind_to(start);
            value.clear();
            // An embedded `{{` that does not close the region is text.
            self.advance_by(2, &mut value);
        }
        while self.peek().is_some() && !self.starts_with(OPEN) {
            self.advance_by(1, &mut value);
        }
        Some(Ok(self.token(TokenKind::Literal, value, at)))
    }

    fn lex_code(&mut self) -> Option<Result<Token, LexError>> {
        let at = self.pos();
        let c = self.peek()?;
        let mut value = String::new();

        if c.is_whitespace() {
            self.skip_spaces(&mut value);
            return Some(Ok(self.token(TokenKind::Whitespace, value, at)));
        }
        if self.starts_with(CLOSE) {
            self.advance_by(2, &mut value);
            self.mode = Mode::Data;
            return Some(Ok(self.token(TokenKind::BlockEnd, value, at)));
        }
        if c == '"' || c == '\'' {
            return Some(self.lex_string(c, at));
        }
        if self.starts_with("//") {
            while self.peek().is_some_and(|c| c != '\n') && !self.starts_with(CLOSE) {
                self.advance_by(1, &mut value);
            }
            return Some(Ok(self.token(TokenKind::Comment, value, at)));
        }
        if self.starts_with("/*") {
            self.advance_by(2, &mut value);
            loop {
                if self.starts_with("*/") {
                    self.advance_by(2, &mut value);
                    return Some(Ok(self.token(TokenKind::Comment, value, at)));
                }
                if self.advance().map(|c| value.push(c)).is_none() {
                    return Some(Err(LexError::new(at, "unterminated block comment")));
                }
            }
        }
        if c.is_ascii_digit() {
            while let Some(d) = self.peek().filter(char::is_ascii_digit) {
                value.push(d);
                self.advance();
            }
            return Some(Ok(self.token(TokenKind::Integer, value, at)));
        }
        if is_ident_start(c) {
            while let Some(w) = self.peek().filter(|&c| is_word(c)) {
                value.push(w);
                self.advance();
            }
            let kind = if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false")
            {
                value.make_ascii_lowercase();
                TokenKind::Boolean
            } else {
                TokenKind::Identifier
            };
            return Some(Ok(self.token(kind, value, at)));
        }
        if SYMBOLS2.iter().any(|s| self.starts_with(s)) {
            self.advance_by(2, &mut value);
            return Some(Ok(self.token(TokenKind::Symbol, value, at)));
        }
        if SYMBOLS1.contains(c) {
            self.advance_by(1, &mut value);
            return Some(Ok(self.token(TokenKind::Symbol, value, at)));
        }
        Some(Err(LexError::new(
            at,
            format!("illegal character {c:?} inside a tag"),
        )))
    }

    fn lex_string(&mut self, quote: char, at: Pos) -> Result<Token, LexError> {
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => return Err(LexError::new(at, "unterminated string")),
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    None => return Err(LexError::new(at, "unterminated string")),
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(other) => value.push(other),
                },
                Some(c) => value.push(c),
            }
        }
        Ok(self.token(TokenKind::String, value, at))
    }
}

impl Iterator for Lexer {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = match self.mode {
            Mode::Data => self.lex_data(),
            Mode::Code => self.lex_code(),
            Mode::Literal(opened) => self.lex_literal(opened),
        };
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        Lexer::new(src)
            .map(|t| t.map(|t| (t.kind, t.value)))
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn switches_modes_at_delimiters() {
        use TokenKind::*;
        assert_eq!(
            kinds("Hi {{ name }}!"),
            vec![
                (Data, "Hi ".into()),
                (BlockStart, "{{".into()),
                (Whitespace, " ".into()),
                (Identifier, "name".into()),
                (Whitespace, " ".into()),
                (BlockEnd, "}}".into()),
                (Data, "!".into()),
            ]
        );
    }

    #[test]
    fn symbols_prefer_two_characters() {
        let toks: Vec<_> = kinds("{{a??b>=1%2#c}}")
            .into_iter()
            .filter(|(k, _)| *k == TokenKind::Symbol)
            .map(|(_, v)| v)
            .collect();
        assert_eq!(toks, ["??", ">=", "%", "#"]);
    }

    #[test]
    fn booleans_are_whole_words() {
        let toks = kinds("{{ TRUE trueish False }}");
        assert!(toks.contains(&(TokenKind::Boolean, "true".into())));
        assert!(toks.contains(&(TokenKind::Identifier, "trueish".into())));
        assert!(toks.contains(&(TokenKind::Boolean, "false".into())));
    }

    #[test]
    fn string_escapes() {
        let toks = kinds(r#"{{ "a\"b\n" 'c' }}"#);
        assert!(toks.contains(&(TokenKind::String, "a\"b\n".into())));
        assert!(toks.contains(&(TokenKind::String, "c".into())));
    }

    #[test]
    fn block_comment_may_contain_close_delimiter() {
        let toks = kinds("{{ /* }} */ x }}tail");
        assert_eq!(toks[2], (TokenKind::Comment, "/* }} */".into()));
        assert_eq!(toks.last().unwrap(), &(TokenKind::Data, "tail".into()));
    }

    #[test]
    fn line_comment_stops_before_close() {
        let toks = kinds("{{ x // note }}y");
        assert_eq!(toks[4], (TokenKind::Comment, "// note ".into()));
        assert_eq!(toks[5].0, TokenKind::BlockEnd);
    }

    #[test]
    fn literal_region_is_verbatim() {
        use TokenKind::*;
        let toks = kinds("{{ literal }}a {{ b }} {{ /literally }}{{ /literal }}c");
        assert_eq!(toks[0].0, LiteralStart);
        let text: std::string::String = toks
            .iter()
            .filter(|(k, _)| *k == Literal)
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(text, "a {{ b }} {{ /literally }}");
        assert_eq!(toks[toks.len() - 2].0, LiteralEnd);
        assert_eq!(toks.last().unwrap(), &(Data, "c".into()));
    }

    #[test]
    fn unterminated_literal_points_at_opening_tag() {
        let err = Lexer::new("x\n  {{ literal }} abc")
            .collect::<Result<Vec<_>, _>>()
            .unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new("{{ 'abc }}")
            .collect::<Result<Vec<_>, _>>()
            .unwrap_err();
        assert_eq!((err.line, err.column), (1, 4));
    }

    #[test]
    fn illegal_character() {
        let err = Lexer::new("{{\n  a ~ b }}")
            .collect::<Result<Vec<_>, _>>()
            .unwrap_err();
        assert_eq!((err.line, err.column), (2, 5));
        assert!(err.message.contains('~'));
    }

    #[test]
    fn positions_survive_moving_back_over_newlines() {
        let mut lx = Lexer::new("ab\ncd\nef");
        for _ in 0..7 {
            lx.advance();
        }
        assert_eq!(lx.pos(), Pos::new(3, 2));
        lx.rewind_to(2);
        assert_eq!(lx.pos(), Pos::new(1, 3));
        lx.back();
        assert_eq!(lx.pos(), Pos::new(1, 2));
        for _ in 0..4 {
            lx.advance();
        }
        assert_eq!(lx.pos(), Pos::new(2, 3));
    }

    #[test]
    fn token_positions_are_one_based() {
        let toks: Vec<Token> = Lexer::new("a\n{{ if }}")
            .collect::<Result<_, _>>()
            .unwrap();
        let kw = toks.iter().find(|t| t.is_ident("if")).unwrap();
        assert_eq!(kw.pos(), Pos::new(2, 4));
    }
}
