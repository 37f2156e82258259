//! Table-driven template parser.
//!
//! Statements inside a tag are either a tag keyword, dispatched through a
//! [`TagTable`], or an expression to print. Nested constructs parse their
//! bodies with [`Parser::parse_until`], which stops at the first matching
//! [`Breakpoint`].

mod tags;

use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

use crate::ast::{Binary, BinaryOp, Filter, Method, Node, Print, Property, Root, Ternary, Unary, UnaryOp};
use crate::error::{ParseError, SyntaxError};
use crate::lexer::Lexer;
use crate::token::{Pos, Token, TokenKind};

/// A tag handler: receives the keyword token (already consumed) and the
/// parser, and returns the node for the whole construct.
pub type TagHandler = fn(Token, &mut Parser<'_>) -> Result<Node, SyntaxError>;

/// Keyword to handler mapping.
#[derive(Clone)]
pub struct TagTable {
    handlers: HashMap<&'static str, TagHandler>,
}

impl TagTable {
    /// A table without any tags.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The built-in tags.
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register("if", tags::parse_if);
        table.register("for", tags::parse_for);
        table.register("set", tags::parse_set);
        table.register("block", tags::parse_block);
        table.register("layout", tags::parse_reference);
        table.register("include", tags::parse_reference);
        table.register("require", tags::parse_reference);
        table.register("break", tags::parse_loop_control);
        table.register("continue", tags::parse_loop_control);
        table.register("else", tags::parse_stray);
        table.register("elif", tags::parse_stray);
        table
    }

    /// Add or replace the handler for `keyword`.
    pub fn register(&mut self, keyword: &'static str, handler: TagHandler) {
        self.handlers.insert(keyword, handler);
    }

    /// Look up a keyword.
    pub fn get(&self, keyword: &str) -> Option<TagHandler> {
        self.handlers.get(keyword).copied()
    }
}

impl core::fmt::Debug for TagTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("TagTable").field("tags", &keys).finish()
    }
}

static BUILTIN_TAGS: LazyLock<TagTable> = LazyLock::new(TagTable::builtin);

/// A token sequence that ends a nested body, such as `elif` or `/ if`.
#[derive(Debug, Clone, Copy)]
pub struct Breakpoint {
    /// Token values to match, trivia allowed in between.
    pub parts: &'static [&'static str],
    /// Leave the matched tokens for the caller instead of consuming them.
    pub keep: bool,
}

impl Breakpoint {
    /// Stop before `parts`.
    pub const fn keep(parts: &'static [&'static str]) -> Self {
        Self { parts, keep: true }
    }

    /// Stop after `parts`.
    pub const fn consume(parts: &'static [&'static str]) -> Self {
        Self { parts, keep: false }
    }
}

/// Template parser.
#[derive(Debug)]
pub struct Parser<'t> {
    lexer: Lexer,
    lookahead: VecDeque<Token>,
    tags: &'t TagTable,
    file: String,
    in_code: bool,
    /// Where the currently open `{{` is.
    open_tag: Pos,
    last_pos: Pos,
    loop_depth: u32,
    nesting: u32,
}

/// Parse `source`, the template at canonical path `file`, with the built-in
/// tags.
pub fn parse(source: &str, file: &str) -> Result<Root, SyntaxError> {
    Parser::new(source, file, &BUILTIN_TAGS).parse()
}

impl<'t> Parser<'t> {
    /// A parser over `source` using `tags`.
    pub fn new(source: &str, file: &str, tags: &'t TagTable) -> Self {
        Self {
            lexer: Lexer::new(source),
            lookahead: VecDeque::new(),
            tags,
            file: file.to_owned(),
            in_code: false,
            open_tag: Pos::new(1, 1),
            last_pos: Pos::new(1, 1),
            loop_depth: 0,
            nesting: 0,
        }
    }

    /// Canonical path of the template being parsed.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Parse the whole template.
    pub fn parse(mut self) -> Result<Root, SyntaxError> {
        let (nodes, _) = self.parse_until(&[])?;
        let mut root = Root::new(self.file);
        for node in nodes {
            root.append(node)?;
        }
        tracing::trace!(
            file = %root.file,
            blocks = root.blocks.len(),
            nodes = root.body.len(),
            "parsed template"
        );
        Ok(root)
    }

    // ---- token stream ----

    fn fill(&mut self) -> Result<bool, SyntaxError> {
        if self.lookahead.is_empty() {
            match self.lexer.next() {
                Some(tok) => self.lookahead.push_back(tok?),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// The next raw token, including trivia.
    pub fn peek(&mut self) -> Result<Option<&Token>, SyntaxError> {
        self.fill()?;
        Ok(self.lookahead.front())
    }

    /// Consume the next raw token.
    pub fn next_token(&mut self) -> Result<Option<Token>, SyntaxError> {
        self.fill()?;
        let tok = self.lookahead.pop_front();
        if let Some(t) = &tok {
            self.last_pos = t.pos();
        }
        Ok(tok)
    }

    fn unread(&mut self, tokens: Vec<Token>) {
        for tok in tokens.into_iter().rev() {
            self.lookahead.push_front(tok);
        }
    }

    /// Skip whitespace and comments.
    pub fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        while self.peek()?.is_some_and(Token::is_trivia) {
            self.next_token()?;
        }
        Ok(())
    }

    /// The next token that is not trivia.
    pub fn peek_significant(&mut self) -> Result<Option<&Token>, SyntaxError> {
        self.skip_trivia()?;
        self.peek()
    }

    /// Consume the symbol `sym` if it comes next.
    pub fn eat_symbol(&mut self, sym: &str) -> Result<Option<Token>, SyntaxError> {
        if self.peek_significant()?.is_some_and(|t| t.is_symbol(sym)) {
            return self.next_token();
        }
        Ok(None)
    }

    /// An error at `pos`.
    pub fn error(&self, pos: Pos, message: impl Into<String>) -> SyntaxError {
        SyntaxError::Parse(ParseError::new(pos, message))
    }

    /// An error about the next significant token.
    pub fn unexpected(&mut self, expected: &str) -> SyntaxError {
        let found = match self.peek_significant() {
            Ok(found) => found.map(|tok| (tok.pos(), tok.to_string())),
            Err(e) => return e,
        };
        let (in_code, open_tag, last_pos) = (self.in_code, self.open_tag, self.last_pos);
        match found {
            Some((pos, found)) => self.error(pos, format!("expected {expected}, found {found}")),
            None if in_code => self.error(open_tag, "tag is never closed with `}}`"),
            None => self.error(last_pos, format!("expected {expected}, found end of input")),
        }
    }

    /// Consume the symbol `sym` or fail.
    pub fn expect_symbol(&mut self, sym: &str) -> Result<Token, SyntaxError> {
        match self.eat_symbol(sym)? {
            Some(tok) => Ok(tok),
            None => Err(self.unexpected(&format!("`{sym}`"))),
        }
    }

    /// Consume an identifier or fail.
    pub fn expect_ident(&mut self, what: &str) -> Result<Token, SyntaxError> {
        if self
            .peek_significant()?
            .is_some_and(|t| t.kind == TokenKind::Identifier)
        {
            if let Some(tok) = self.next_token()? {
                return Ok(tok);
            }
        }
        Err(self.unexpected(what))
    }

    /// Consume a string literal or fail.
    pub fn expect_string(&mut self, what: &str) -> Result<Token, SyntaxError> {
        if self
            .peek_significant()?
            .is_some_and(|t| t.kind == TokenKind::String)
        {
            if let Some(tok) = self.next_token()? {
                return Ok(tok);
            }
        }
        Err(self.unexpected(what))
    }

    fn at_boundary(&mut self) -> Result<bool, SyntaxError> {
        Ok(self
            .peek_significant()?
            .is_some_and(|t| t.kind == TokenKind::BlockEnd || t.is_symbol(";")))
    }

    /// Require that the statement ends here, with `;` or `}}`. The boundary
    /// itself is left for the statement loop.
    pub fn expect_boundary(&mut self) -> Result<(), SyntaxError> {
        if self.at_boundary()? {
            Ok(())
        } else {
            Err(self.unexpected("end of tag"))
        }
    }

    fn eat_boundary(&mut self) -> Result<bool, SyntaxError> {
        if !self.at_boundary()? {
            return Ok(false);
        }
        if let Some(tok) = self.next_token()? {
            if tok.kind == TokenKind::BlockEnd {
                self.in_code = false;
            }
        }
        Ok(true)
    }

    // ---- statements ----

    /// Parse statements until one of `breaks` matches, returning the nodes
    /// and the index of the breakpoint. `None` means end of input.
    pub fn parse_until(
        &mut self,
        breaks: &[Breakpoint],
    ) -> Result<(Vec<Node>, Option<usize>), SyntaxError> {
        let mut nodes = Vec::new();
        loop {
            if !self.in_code {
                let Some(tok) = self.next_token()? else {
                    return Ok((nodes, None));
                };
                match tok.kind {
                    TokenKind::BlockStart => {
                        self.in_code = true;
                        self.open_tag = tok.pos();
                    }
                    TokenKind::Data => {
                        if let Some(node) = data_node(tok) {
                            nodes.push(node);
                        }
                        continue;
                    }
                    TokenKind::LiteralStart => {
                        nodes.push(self.parse_literal(tok)?);
                        continue;
                    }
                    _ => {
                        return Err(self.error(tok.pos(), format!("unexpected {tok}")));
                    }
                }
            }

            self.skip_trivia()?;
            if let Some(index) = self.match_breakpoint(breaks)? {
                return Ok((nodes, Some(index)));
            }
            if self.peek()?.is_none() {
                return Err(self.error(self.open_tag, "tag is never closed with `}}`"));
            }
            if self.eat_boundary()? {
                continue;
            }
            let node = self.parse_statement()?;
            nodes.push(node);
        }
    }

    fn match_breakpoint(&mut self, breaks: &[Breakpoint]) -> Result<Option<usize>, SyntaxError> {
        'next: for (index, bp) in breaks.iter().enumerate() {
            let mut taken = Vec::new();
            for (i, part) in bp.parts.iter().enumerate() {
                if i > 0 {
                    while self.peek()?.is_some_and(Token::is_trivia) {
                        taken.extend(self.next_token()?);
                    }
                }
                let matched = self.peek()?.is_some_and(|t| {
                    matches!(t.kind, TokenKind::Symbol | TokenKind::Identifier) && t.value == *part
                });
                if !matched {
                    self.unread(taken);
                    continue 'next;
                }
                taken.extend(self.next_token()?);
            }
            if bp.keep {
                self.unread(taken);
            }
            return Ok(Some(index));
        }
        Ok(None)
    }

    fn parse_literal(&mut self, start: Token) -> Result<Node, SyntaxError> {
        let mut text = String::new();
        loop {
            match self.next_token()? {
                Some(tok) if tok.kind == TokenKind::Literal => text.push_str(&tok.value),
                Some(tok) if tok.kind == TokenKind::LiteralEnd => break,
                _ => return Err(self.error(start.pos(), "unterminated `literal` region")),
            }
        }
        Ok(Node::Print(Print {
            value: Box::new(Node::Data(text, start.pos())),
            escape: false,
            filters: Vec::new(),
            pos: start.pos(),
        }))
    }

    fn parse_statement(&mut self) -> Result<Node, SyntaxError> {
        let Some(tok) = self.peek_significant()?.cloned() else {
            return Err(self.unexpected("a statement"));
        };

        if tok.is_symbol("#") {
            self.next_token()?;
            return tags::parse_block_call(tok, self);
        }
        if tok.is_symbol("/") {
            self.next_token()?;
            let name = self
                .peek_significant()?
                .map(|t| t.value.clone())
                .unwrap_or_default();
            return Err(self.error(tok.pos(), format!("unexpected closing tag `/{name}`")));
        }
        if tok.kind == TokenKind::Identifier {
            if let Some(handler) = self.tags.get(&tok.value) {
                self.next_token()?;
                return handler(tok, self);
            }
        }

        let escape = self.eat_symbol("!")?.is_none();
        let value = self.parse_expression()?;
        let filters = self.parse_filters()?;
        self.expect_boundary()?;
        Ok(Node::Print(Print {
            value: Box::new(value),
            escape,
            filters,
            pos: tok.pos(),
        }))
    }

    fn parse_filters(&mut self) -> Result<Vec<Filter>, SyntaxError> {
        let mut filters = Vec::new();
        while let Some(bar) = self.eat_symbol("|")? {
            let name = self.expect_ident("a filter name")?;
            let args = if self.eat_symbol("(")?.is_some() {
                self.parse_arguments(")")?
            } else if self.eat_symbol("=")?.is_some() {
                if self.eat_symbol("(")?.is_some() {
                    self.parse_arguments(")")?
                } else {
                    vec![self.parse_expression()?]
                }
            } else {
                Vec::new()
            };
            filters.push(Filter {
                name: name.value,
                args,
                pos: bar.pos(),
            });
        }
        Ok(filters)
    }

    /// Parse a comma-separated list up to and including `close`.
    pub fn parse_arguments(&mut self, close: &str) -> Result<Vec<Node>, SyntaxError> {
        let mut args = Vec::new();
        if self.eat_symbol(close)?.is_some() {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.eat_symbol(close)?.is_some() {
                return Ok(args);
            }
            if self.eat_symbol(",")?.is_none() {
                return Err(self.unexpected(&format!("`,` or `{close}`")));
            }
        }
    }

    // ---- expressions ----

    /// Parse a full expression.
    pub fn parse_expression(&mut self) -> Result<Node, SyntaxError> {
        let condition = self.parse_logical()?;
        let Some(question) = self.eat_symbol("?")? else {
            return Ok(condition);
        };
        let then = self.parse_expression()?;
        self.expect_symbol(":")?;
        let otherwise = self.parse_expression()?;
        Ok(Node::Ternary(Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
            pos: question.pos(),
        }))
    }

    fn parse_binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Self) -> Result<Node, SyntaxError>,
    ) -> Result<Node, SyntaxError> {
        let mut left = next(self)?;
        loop {
            let op = match self.peek_significant()? {
                Some(t) if t.kind == TokenKind::Symbol && ops.contains(&t.value.as_str()) => {
                    BinaryOp::from_symbol(&t.value)
                }
                _ => None,
            };
            let Some(op) = op else {
                return Ok(left);
            };
            let Some(tok) = self.next_token()? else {
                return Ok(left);
            };
            let right = next(self)?;
            left = Node::Binary(Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                pos: tok.pos(),
            });
        }
    }

    fn parse_logical(&mut self) -> Result<Node, SyntaxError> {
        self.parse_binary_level(&["??", "||", "&&"], Self::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Result<Node, SyntaxError> {
        self.parse_binary_level(&["==", "!=", "<", ">", "<=", ">="], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> Result<Node, SyntaxError> {
        self.parse_binary_level(&["+", "-"], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, SyntaxError> {
        self.parse_binary_level(&["*", "/", "%"], Self::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Node, SyntaxError> {
        let op = match self.peek_significant()? {
            Some(t) if t.is_symbol("-") => UnaryOp::Neg,
            Some(t) if t.is_symbol("+") => UnaryOp::Pos,
            _ => return self.parse_postfix(),
        };
        let Some(tok) = self.next_token()? else {
            return self.parse_postfix();
        };
        let operand = self.parse_unary()?;
        Ok(Node::Unary(Unary {
            op,
            operand: Box::new(operand),
            pos: tok.pos(),
        }))
    }

    fn parse_postfix(&mut self) -> Result<Node, SyntaxError> {
        let mut node = self.parse_primary()?;
        loop {
            if let Some(dot) = self.eat_symbol(".")? {
                let name = self.expect_ident("a member name")?;
                let at = name.pos();
                node = Node::Property(Property {
                    receiver: Box::new(node),
                    args: vec![Node::String(name.value, at)],
                    pos: dot.pos(),
                });
            } else if let Some(open) = self.eat_symbol("[")? {
                let args = self.parse_arguments("]")?;
                if args.is_empty() {
                    return Err(self.error(open.pos(), "empty index"));
                }
                node = Node::Property(Property {
                    receiver: Box::new(node),
                    args,
                    pos: open.pos(),
                });
            } else if let Some(open) = self.eat_symbol("(")? {
                let args = self.parse_arguments(")")?;
                node = Node::Method(Method {
                    callee: Box::new(node),
                    args,
                    pos: open.pos(),
                });
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Node, SyntaxError> {
        let Some(tok) = self.peek_significant()?.cloned() else {
            return Err(self.unexpected("an expression"));
        };
        let pos = tok.pos();
        match tok.kind {
            TokenKind::Integer => {
                self.next_token()?;
                self.parse_number(tok)
            }
            TokenKind::String => {
                self.next_token()?;
                Ok(Node::String(tok.value, pos))
            }
            TokenKind::Boolean => {
                self.next_token()?;
                Ok(Node::Boolean(tok.value == "true", pos))
            }
            TokenKind::Identifier => {
                self.next_token()?;
                if tok.value.eq_ignore_ascii_case("null") {
                    Ok(Node::Null(pos))
                } else {
                    Ok(Node::Identifier(tok.value, pos))
                }
            }
            TokenKind::Symbol if tok.value == "(" => {
                self.next_token()?;
                let inner = self.parse_expression()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// `INT` or `INT . INT`, with no trivia in between.
    fn parse_number(&mut self, int: Token) -> Result<Node, SyntaxError> {
        let pos = int.pos();
        if self.peek()?.is_some_and(|t| t.is_symbol(".")) {
            let dot = self.next_token()?;
            if self.peek()?.is_some_and(|t| t.kind == TokenKind::Integer) {
                if let Some(frac) = self.next_token()? {
                    let text = format!("{}.{}", int.value, frac.value);
                    return text
                        .parse::<f64>()
                        .map(|f| Node::Float(f, pos))
                        .map_err(|_| self.error(pos, format!("invalid number `{text}`")));
                }
            }
            self.unread(dot.into_iter().collect());
        }
        int.value
            .parse::<i64>()
            .map(|n| Node::Integer(n, pos))
            .map_err(|_| self.error(pos, format!("integer `{}` is out of range", int.value)))
    }
}

/// Text runs made only of whitespace spanning a line break are layout
/// between tags, not output.
fn data_node(tok: Token) -> Option<Node> {
    if tok.value.trim().is_empty() && tok.value.contains('\n') {
        return None;
    }
    let pos = tok.pos();
    Some(Node::Print(Print {
        value: Box::new(Node::Data(tok.value, pos)),
        escape: false,
        filters: Vec::new(),
        pos,
    }))
}

#[cfg(test)]
mod tests;
