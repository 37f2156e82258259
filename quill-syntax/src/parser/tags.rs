//! Built-in tag handlers.

use quill_il::ReferenceKind;

use super::{Breakpoint, Parser};
use crate::ast::{Block, BlockCall, Branch, For, If, LoopControl, Node, Reference, Set};
use crate::error::SyntaxError;
use crate::path;
use crate::token::{Token, TokenKind};

const IF_BREAKS: &[Breakpoint] = &[
    Breakpoint::keep(&["elif"]),
    Breakpoint::keep(&["else"]),
    Breakpoint::consume(&["/", "if"]),
];
const IF_END: &[Breakpoint] = &[Breakpoint::consume(&["/", "if"])];
const FOR_BREAKS: &[Breakpoint] = &[
    Breakpoint::keep(&["else"]),
    Breakpoint::consume(&["/", "for"]),
];
const FOR_END: &[Breakpoint] = &[Breakpoint::consume(&["/", "for"])];
const BLOCK_END: &[Breakpoint] = &[Breakpoint::consume(&["/", "block"])];

impl Parser<'_> {
    /// Parse a nested body; bodies of `if`, `for` and `block` may not
    /// contain block definitions.
    fn parse_body(
        &mut self,
        tag: &Token,
        breaks: &[Breakpoint],
    ) -> Result<(Vec<Node>, usize), SyntaxError> {
        self.nesting += 1;
        let parsed = self.parse_until(breaks);
        self.nesting -= 1;
        match parsed? {
            (nodes, Some(index)) => Ok((nodes, index)),
            (_, None) => Err(self.error(tag.pos(), format!("`{}` is never closed", tag.value))),
        }
    }

    fn next_keyword(&mut self) -> Result<Token, SyntaxError> {
        match self.next_token()? {
            Some(tok) => Ok(tok),
            None => Err(self.unexpected("a keyword")),
        }
    }
}

pub(super) fn parse_if(tag: Token, p: &mut Parser<'_>) -> Result<Node, SyntaxError> {
    let mut branches = Vec::new();
    let mut keyword = tag.clone();
    let otherwise = loop {
        let condition = condition_header(p).map_err(|e| e.in_tag(&keyword))?;
        let (body, index) = p.parse_body(&tag, IF_BREAKS)?;
        branches.push(Branch {
            condition,
            body,
            pos: keyword.pos(),
        });
        match index {
            0 => keyword = p.next_keyword()?,
            1 => {
                p.next_keyword()?;
                let (body, _) = p.parse_body(&tag, IF_END)?;
                break Some(body);
            }
            _ => break None,
        }
    };
    Ok(Node::If(If {
        branches,
        otherwise,
        pos: tag.pos(),
    }))
}

fn condition_header(p: &mut Parser<'_>) -> Result<Node, SyntaxError> {
    let condition = p.parse_expression()?;
    p.expect_boundary()?;
    Ok(condition)
}

pub(super) fn parse_for(tag: Token, p: &mut Parser<'_>) -> Result<Node, SyntaxError> {
    let (key, value, iterable) = for_header(p).map_err(|e| e.in_tag(&tag))?;

    p.loop_depth += 1;
    let body = p.parse_body(&tag, FOR_BREAKS);
    p.loop_depth -= 1;
    let (body, index) = body?;

    let otherwise = if index == 0 {
        p.next_keyword()?;
        let (body, _) = p.parse_body(&tag, FOR_END)?;
        Some(body)
    } else {
        None
    };
    Ok(Node::For(For {
        key,
        value,
        iterable: Box::new(iterable),
        body,
        otherwise,
        pos: tag.pos(),
    }))
}

/// `[key,] value : iterable`
fn for_header(p: &mut Parser<'_>) -> Result<(Option<String>, String, Node), SyntaxError> {
    let first = p.expect_ident("a loop variable")?;
    let (key, value) = if p.eat_symbol(",")?.is_some() {
        let second = p.expect_ident("a loop variable")?;
        (Some(first.value), second.value)
    } else {
        (None, first.value)
    };
    p.expect_symbol(":")?;
    let iterable = p.parse_expression()?;
    p.expect_boundary()?;
    Ok((key, value, iterable))
}

fn set_header(p: &mut Parser<'_>) -> Result<(String, Node), SyntaxError> {
    let name = p.expect_ident("a variable name")?;
    p.expect_symbol("=")?;
    let value = p.parse_expression()?;
    p.expect_boundary()?;
    Ok((name.value, value))
}

pub(super) fn parse_set(tag: Token, p: &mut Parser<'_>) -> Result<Node, SyntaxError> {
    let (name, value) = set_header(p).map_err(|e| e.in_tag(&tag))?;
    Ok(Node::Set(Set {
        name,
        value: Box::new(value),
        pos: tag.pos(),
    }))
}

pub(super) fn parse_block(tag: Token, p: &mut Parser<'_>) -> Result<Node, SyntaxError> {
    if p.nesting > 0 {
        return Err(p.error(tag.pos(), "blocks can only be defined at the top level"));
    }
    let id = p.expect_ident("a block name")?;
    p.expect_boundary()?;
    let (body, _) = p.parse_body(&tag, BLOCK_END)?;
    Ok(Node::Block(Block {
        id: id.value,
        body,
        pos: tag.pos(),
    }))
}

/// `#name k=v, ...`; `hash` is the `#` token.
pub(super) fn parse_block_call(hash: Token, p: &mut Parser<'_>) -> Result<Node, SyntaxError> {
    let id = p.expect_ident("a block name")?;
    let mut params = Vec::new();
    loop {
        p.eat_symbol(",")?;
        let next_is_name = p
            .peek_significant()?
            .is_some_and(|t| t.kind == TokenKind::Identifier);
        if !next_is_name {
            break;
        }
        let name = p.expect_ident("a parameter name")?;
        p.expect_symbol("=")?;
        let value = p.parse_expression()?;
        let pos = name.pos();
        params.push(Set {
            name: name.value,
            value: Box::new(value),
            pos,
        });
    }
    p.expect_boundary()?;
    Ok(Node::BlockCall(BlockCall {
        id: id.value,
        params,
        pos: hash.pos(),
    }))
}

pub(super) fn parse_reference(tag: Token, p: &mut Parser<'_>) -> Result<Node, SyntaxError> {
    let kind = match tag.value.as_str() {
        "layout" => ReferenceKind::Layout,
        "require" => ReferenceKind::Require,
        _ => ReferenceKind::Include,
    };
    if kind == ReferenceKind::Layout && p.nesting > 0 {
        return Err(p.error(tag.pos(), "`layout` can only be used at the top level"));
    }
    let src = p.expect_string("a template path")?;
    p.expect_boundary()?;
    Ok(Node::Reference(Reference {
        kind,
        src: path::resolve(p.file(), &src.value),
        pos: tag.pos(),
    }))
}

pub(super) fn parse_loop_control(tag: Token, p: &mut Parser<'_>) -> Result<Node, SyntaxError> {
    let kind = if tag.value == "break" {
        LoopControl::Break
    } else {
        LoopControl::Continue
    };
    if p.loop_depth == 0 {
        return Err(p.error(tag.pos(), format!("`{}` outside of a loop", tag.value)));
    }
    p.expect_boundary()?;
    Ok(Node::Break(kind, tag.pos()))
}

/// `else` / `elif` reached outside of the construct they belong to.
pub(super) fn parse_stray(tag: Token, p: &mut Parser<'_>) -> Result<Node, SyntaxError> {
    Err(p.error(tag.pos(), format!("unexpected `{}`", tag.value)))
}
