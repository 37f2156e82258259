use core::fmt;

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    /// Line, starting at 1.
    pub line: u32,
    /// Column, starting at 1.
    pub column: u32,
}

impl Pos {
    /// Position at `line`:`column`.
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token kinds produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Template text outside of tags.
    Data,
    /// A run of whitespace inside a tag.
    Whitespace,
    /// `// ...` or `/* ... */` inside a tag.
    Comment,
    /// A quoted string, with escapes resolved.
    String,
    /// A run of ASCII digits.
    Integer,
    /// A name.
    Identifier,
    /// `true` or `false`.
    Boolean,
    /// Punctuation or an operator.
    Symbol,
    /// `{{ literal }}`
    LiteralStart,
    /// Verbatim text inside a literal region.
    Literal,
    /// `{{ /literal }}`
    LiteralEnd,
    /// `{{`
    BlockStart,
    /// `}}`
    BlockEnd,
}

/// One lexeme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// What kind of lexeme this is.
    pub kind: TokenKind,
    /// Source text, or the unescaped contents of a string.
    pub value: String,
    /// Line of the first character.
    pub line: u32,
    /// Column of the first character.
    pub column: u32,
}

impl Token {
    /// Position of the first character.
    pub fn pos(&self) -> Pos {
        Pos::new(self.line, self.column)
    }

    /// Whether this is the symbol `s`.
    pub fn is_symbol(&self, s: &str) -> bool {
        self.kind == TokenKind::Symbol && self.value == s
    }

    /// Whether this is the identifier `s`.
    pub fn is_ident(&self, s: &str) -> bool {
        self.kind == TokenKind::Identifier && self.value == s
    }

    /// Whitespace and comments carry no meaning inside a tag.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::String => write!(f, "string {:?}", self.value),
            TokenKind::Data | TokenKind::Literal => f.write_str("text"),
            TokenKind::Whitespace => f.write_str("whitespace"),
            TokenKind::Comment => f.write_str("comment"),
            _ => write!(f, "`{}`", self.value),
        }
    }
}
