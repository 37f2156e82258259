//! Template AST.
//!
//! Expressions and statements share one [`Node`] type; every node knows how
//! to lower itself into instructions (see `compile.rs`).

use core::fmt;

use quill_il::ReferenceKind;

use crate::error::ParseError;
use crate::token::Pos;

/// Binary operators, including the short-circuit forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `??`
    Coalesce,
}

impl BinaryOp {
    /// Map an operator symbol.
    pub fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Mod,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "<" => Self::Lt,
            "<=" => Self::Le,
            "&&" => Self::And,
            "||" => Self::Or,
            "??" => Self::Coalesce,
            _ => return None,
        })
    }

    /// The operator symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Coalesce => "??",
        }
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Pos,
}

/// Which way a loop-control statement jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopControl {
    /// Leave the loop.
    Break,
    /// Skip to the next element.
    Continue,
}

impl LoopControl {
    /// The keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Break => "break",
            Self::Continue => "continue",
        }
    }
}

/// `{{ expr | filter ... }}`
#[derive(Debug, Clone, PartialEq)]
pub struct Print {
    /// What to print.
    pub value: Box<Node>,
    /// HTML-escape the output.
    pub escape: bool,
    /// Applied left to right.
    pub filters: Vec<Filter>,
    /// Source position.
    pub pos: Pos,
}

/// `| name(args)`: a call with the filtered value as first argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Function name.
    pub name: String,
    /// Extra arguments.
    pub args: Vec<Node>,
    /// Source position.
    pub pos: Pos,
}

/// `left op right`
#[derive(Debug, Clone, PartialEq)]
pub struct Binary {
    /// Operator.
    pub op: BinaryOp,
    /// Left operand.
    pub left: Box<Node>,
    /// Right operand.
    pub right: Box<Node>,
    /// Position of the operator.
    pub pos: Pos,
}

/// `op operand`
#[derive(Debug, Clone, PartialEq)]
pub struct Unary {
    /// Operator.
    pub op: UnaryOp,
    /// Operand.
    pub operand: Box<Node>,
    /// Position of the operator.
    pub pos: Pos,
}

/// `condition ? then : otherwise`
#[derive(Debug, Clone, PartialEq)]
pub struct Ternary {
    /// Tested for truthiness.
    pub condition: Box<Node>,
    /// Value when truthy.
    pub then: Box<Node>,
    /// Value when falsy.
    pub otherwise: Box<Node>,
    /// Position of the `?`.
    pub pos: Pos,
}

/// `receiver.name` or `receiver[args]`
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Value being indexed.
    pub receiver: Box<Node>,
    /// Index arguments; a `.name` access is one string argument.
    pub args: Vec<Node>,
    /// Source position.
    pub pos: Pos,
}

/// `callee(args)`
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    /// A function name or a member to call on its receiver.
    pub callee: Box<Node>,
    /// Call arguments.
    pub args: Vec<Node>,
    /// Source position.
    pub pos: Pos,
}

/// `set name = value`, also used for block-call parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Set {
    /// Variable name.
    pub name: String,
    /// Assigned value.
    pub value: Box<Node>,
    /// Source position.
    pub pos: Pos,
}

/// `{{ block id }}...{{ /block }}`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Block name.
    pub id: String,
    /// Block body.
    pub body: Vec<Node>,
    /// Source position.
    pub pos: Pos,
}

/// `{{ #id key=value ... }}`
#[derive(Debug, Clone, PartialEq)]
pub struct BlockCall {
    /// Block name, or `body` for the layout child.
    pub id: String,
    /// Parameters bound in a fresh scope for the call.
    pub params: Vec<Set>,
    /// Source position.
    pub pos: Pos,
}

/// `{{ include "src" }}`, `{{ layout "src" }}` or `{{ require "src" }}`
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// What to do with the other template.
    pub kind: ReferenceKind,
    /// Canonical path of the other template.
    pub src: String,
    /// Source position.
    pub pos: Pos,
}

/// One `if`/`elif` arm.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// Tested for truthiness.
    pub condition: Node,
    /// Runs when the condition holds.
    pub body: Vec<Node>,
    /// Position of the `if` or `elif` keyword.
    pub pos: Pos,
}

/// `if` / `elif` / `else` chain.
#[derive(Debug, Clone, PartialEq)]
pub struct If {
    /// The `if` arm followed by every `elif` arm.
    pub branches: Vec<Branch>,
    /// The `else` body.
    pub otherwise: Option<Vec<Node>>,
    /// Position of the `if` keyword.
    pub pos: Pos,
}

/// `for [key,] value : iterable`
#[derive(Debug, Clone, PartialEq)]
pub struct For {
    /// Binds the index or map key.
    pub key: Option<String>,
    /// Binds the element.
    pub value: String,
    /// What to iterate.
    pub iterable: Box<Node>,
    /// Loop body.
    pub body: Vec<Node>,
    /// Runs instead of the body when there is nothing to iterate.
    pub otherwise: Option<Vec<Node>>,
    /// Position of the `for` keyword.
    pub pos: Pos,
}

/// An AST node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Integer literal.
    Integer(i64, Pos),
    /// Float literal.
    Float(f64, Pos),
    /// String literal.
    String(String, Pos),
    /// `true` / `false`
    Boolean(bool, Pos),
    /// `null`
    Null(Pos),
    /// Variable reference.
    Identifier(String, Pos),
    /// Template text.
    Data(String, Pos),
    /// Print statement.
    Print(Print),
    /// Binary operation.
    Binary(Binary),
    /// Unary operation.
    Unary(Unary),
    /// Conditional expression.
    Ternary(Ternary),
    /// Member access.
    Property(Property),
    /// Call.
    Method(Method),
    /// Assignment.
    Set(Set),
    /// Block definition.
    Block(Block),
    /// Block invocation.
    BlockCall(BlockCall),
    /// Cross-template reference.
    Reference(Reference),
    /// Conditional chain.
    If(If),
    /// Loop.
    For(For),
    /// `break` / `continue`
    Break(LoopControl, Pos),
}

impl Node {
    /// Where the node starts.
    pub fn pos(&self) -> Pos {
        match self {
            Node::Integer(_, pos)
            | Node::Float(_, pos)
            | Node::String(_, pos)
            | Node::Boolean(_, pos)
            | Node::Null(pos)
            | Node::Identifier(_, pos)
            | Node::Data(_, pos)
            | Node::Break(_, pos) => *pos,
            Node::Print(n) => n.pos,
            Node::Binary(n) => n.pos,
            Node::Unary(n) => n.pos,
            Node::Ternary(n) => n.pos,
            Node::Property(n) => n.pos,
            Node::Method(n) => n.pos,
            Node::Set(n) => n.pos,
            Node::Block(n) => n.pos,
            Node::BlockCall(n) => n.pos,
            Node::Reference(n) => n.pos,
            Node::If(n) => n.pos,
            Node::For(n) => n.pos,
        }
    }
}

/// A whole template: hoisted block definitions, at most one layout, and the
/// body.
#[derive(Debug, Clone, PartialEq)]
pub struct Root {
    /// Canonical path of the template.
    pub file: String,
    /// Top-level block definitions, in source order.
    pub blocks: Vec<Block>,
    /// The layout this template extends.
    pub layout: Option<Reference>,
    /// Everything else.
    pub body: Vec<Node>,
}

impl Root {
    /// An empty template at `file`.
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            blocks: Vec::new(),
            layout: None,
            body: Vec::new(),
        }
    }

    /// Add a top-level node, hoisting blocks and the layout directive.
    pub fn append(&mut self, node: Node) -> Result<(), ParseError> {
        match node {
            Node::Block(block) => {
                if self.blocks.iter().any(|b| b.id == block.id) {
                    return Err(ParseError::new(
                        block.pos,
                        format!("block `{}` is declared twice", block.id),
                    ));
                }
                self.blocks.push(block);
            }
            Node::Reference(reference) if reference.kind == ReferenceKind::Layout => {
                if let Some(first) = &self.layout {
                    return Err(ParseError::new(
                        reference.pos,
                        format!("a template can only have one layout (first declared at {})", first.pos),
                    ));
                }
                self.layout = Some(reference);
            }
            other => self.body.push(other),
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Integer(n, _) => write!(f, "{n}"),
            Node::Float(n, _) => write!(f, "{n:?}"),
            Node::String(s, _) => write!(f, "{s:?}"),
            Node::Boolean(b, _) => write!(f, "{b}"),
            Node::Null(_) => f.write_str("null"),
            Node::Identifier(name, _) => f.write_str(name),
            Node::Data(text, _) => write!(f, "{text:?}"),
            Node::Binary(b) => write!(f, "({} {} {})", b.left, b.op.symbol(), b.right),
            Node::Unary(u) => {
                let sym = match u.op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Pos => "+",
                };
                write!(f, "({sym}{})", u.operand)
            }
            Node::Ternary(t) => write!(f, "({} ? {} : {})", t.condition, t.then, t.otherwise),
            Node::Property(p) => {
                write!(f, "{}[", p.receiver)?;
                write_list(f, &p.args)?;
                f.write_str("]")
            }
            Node::Method(m) => {
                write!(f, "{}(", m.callee)?;
                write_list(f, &m.args)?;
                f.write_str(")")
            }
            Node::Print(p) => {
                write!(f, "{{{{ {}{}", if p.escape { "" } else { "!" }, p.value)?;
                for filter in &p.filters {
                    write!(f, " | {}(", filter.name)?;
                    write_list(f, &filter.args)?;
                    f.write_str(")")?;
                }
                f.write_str(" }}")
            }
            Node::Set(s) => write!(f, "set {} = {}", s.name, s.value),
            Node::Block(b) => write!(f, "block {}", b.id),
            Node::BlockCall(b) => write!(f, "#{}", b.id),
            Node::Reference(r) => write!(f, "{} {:?}", r.kind, r.src),
            Node::If(_) => f.write_str("if"),
            Node::For(l) => write!(f, "for {} : {}", l.value, l.iterable),
            Node::Break(kind, _) => f.write_str(kind.keyword()),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, nodes: &[Node]) -> fmt::Result {
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{node}")?;
    }
    Ok(())
}
