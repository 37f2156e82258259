//! Lowering of the AST into IL.
//!
//! Every node appends its instructions to an [`Emitter`]. Jump targets are
//! [`Label`]s until the assembler numbers the unit, so nodes never deal with
//! addresses.

use quill_il::{
    Assembler, Condition, Constant, Instruction, Label, MAX_ARITY, Opcode, Operator,
    ReferenceKind, ScopeAction,
};

use crate::ast::{BinaryOp, Block, For, If, LoopControl, Method, Node, Print, Root, UnaryOp};
use crate::error::CompileError;
use crate::token::Pos;

/// Where `continue` and `break` jump to, and how many scopes were open when
/// the loop body started.
#[derive(Debug, Clone, Copy)]
pub struct LoopTargets {
    /// Marker before the iterator advances.
    pub start: Label,
    /// Marker after the loop.
    pub end: Label,
    /// Scope depth inside the loop scope.
    pub depth: u32,
}

/// Instruction sink for one compiled unit.
#[derive(Debug)]
pub struct Emitter {
    asm: Assembler,
    /// Template name, so temporaries of different templates sharing a scope
    /// never collide.
    file: String,
    temps: u32,
    depth: u32,
}

impl Emitter {
    /// A fresh unit for the template `file`.
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            asm: Assembler::new(),
            file: file.into(),
            temps: 0,
            depth: 0,
        }
    }

    /// Append one instruction.
    pub fn emit(&mut self, pos: Pos, op: Opcode<Label>) {
        self.asm.emit(pos.line, op);
    }

    /// Allocate a jump target.
    pub fn label(&mut self) -> Label {
        self.asm.label()
    }

    /// Place `label` at the current end of the unit.
    pub fn place(&mut self, pos: Pos, label: Label) -> Result<(), CompileError> {
        Ok(self.asm.place(pos.line, label)?)
    }

    /// A variable name no template can spell.
    pub fn temp(&mut self) -> String {
        let name = format!("${}:{}", self.file, self.temps);
        self.temps += 1;
        name
    }

    fn jump(&mut self, pos: Pos, condition: Condition, target: Label) {
        self.emit(pos, Opcode::Jump { condition, target });
    }

    fn constant(&mut self, pos: Pos, value: Constant) {
        self.emit(pos, Opcode::LoadConst(value));
    }

    fn load(&mut self, pos: Pos, name: &str) {
        self.emit(pos, Opcode::LoadVariable(name.to_owned()));
    }

    fn store(&mut self, pos: Pos, name: &str) {
        self.emit(pos, Opcode::SetVariable(name.to_owned()));
    }

    fn push_scope(&mut self, pos: Pos) {
        self.depth += 1;
        self.emit(pos, Opcode::Scope(ScopeAction::Push));
    }

    fn pop_scope(&mut self, pos: Pos) {
        self.depth = self.depth.saturating_sub(1);
        self.emit(pos, Opcode::Scope(ScopeAction::Pop));
    }

    /// `receiver.member` for a constant member name.
    fn member(&mut self, pos: Pos, receiver: &str, member: &str) {
        self.constant(pos, Constant::String(member.to_owned()));
        self.load(pos, receiver);
        self.emit(pos, Opcode::LoadMember { arity: 1 });
    }

    /// Call the method stored in `method` on `receiver`, without arguments.
    fn call_method(&mut self, pos: Pos, receiver: &str, method: &str) {
        self.load(pos, receiver);
        self.load(pos, method);
        self.emit(
            pos,
            Opcode::Call {
                arity: 0,
                receiver: true,
            },
        );
    }

    fn compile_all(&mut self, nodes: &[Node], targets: Option<LoopTargets>) -> Result<(), CompileError> {
        for node in nodes {
            node.compile(self, targets)?;
        }
        Ok(())
    }

    /// Run `nodes` inside their own variable scope.
    fn scoped(
        &mut self,
        pos: Pos,
        nodes: &[Node],
        targets: Option<LoopTargets>,
    ) -> Result<(), CompileError> {
        self.push_scope(pos);
        self.compile_all(nodes, targets)?;
        self.pop_scope(pos);
        Ok(())
    }

    /// Number the unit.
    pub fn finish(self) -> Result<Vec<Instruction>, CompileError> {
        Ok(self.asm.finish()?)
    }
}

fn arity(what: &'static str, count: usize, pos: Pos) -> Result<u8, CompileError> {
    u8::try_from(count)
        .ok()
        .filter(|n| *n <= MAX_ARITY)
        .ok_or(CompileError::Arity { what, count, pos })
}

fn operator(op: BinaryOp) -> Option<Operator> {
    Some(match op {
        BinaryOp::Add => Operator::Add,
        BinaryOp::Sub => Operator::Sub,
        BinaryOp::Mul => Operator::Mul,
        BinaryOp::Div => Operator::Div,
        BinaryOp::Mod => Operator::Mod,
        BinaryOp::Eq => Operator::Eq,
        BinaryOp::Ne => Operator::Ne,
        BinaryOp::Gt => Operator::Gt,
        BinaryOp::Ge => Operator::Ge,
        BinaryOp::Lt => Operator::Lt,
        BinaryOp::Le => Operator::Le,
        BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => return None,
    })
}

impl Root {
    /// Compile the template: the document header, every block declaration,
    /// then the body starting at the header-end marker.
    pub fn compile(&self, mtime: i64) -> Result<Vec<Instruction>, CompileError> {
        let mut e = Emitter::new(&self.file);
        let start = Pos::new(1, 1);
        let body = e.label();
        e.emit(
            start,
            Opcode::Document {
                header_end: body,
                mtime,
                source: self.file.clone(),
            },
        );
        for block in &self.blocks {
            block.compile(&mut e)?;
        }

        e.place(start, body)?;
        if let Some(layout) = &self.layout {
            e.emit(
                layout.pos,
                Opcode::Reference {
                    kind: layout.kind,
                    src: layout.src.clone(),
                },
            );
        }
        e.compile_all(&self.body, None)?;
        let end = self.body.last().map_or(start, Node::pos);
        e.emit(end, Opcode::Exit);

        let code = e.finish()?;
        tracing::debug!(file = %self.file, instructions = code.len(), "compiled template");
        Ok(code)
    }
}

impl Block {
    fn compile(&self, e: &mut Emitter) -> Result<(), CompileError> {
        e.emit(self.pos, Opcode::Block { id: self.id.clone() });
        e.depth = 0;
        e.compile_all(&self.body, None)?;
        let end = self.body.last().map_or(self.pos, Node::pos);
        e.emit(end, Opcode::Exit);
        Ok(())
    }
}

impl Node {
    /// Append this node's instructions. `targets` is the innermost loop, if
    /// any.
    pub fn compile(&self, e: &mut Emitter, targets: Option<LoopTargets>) -> Result<(), CompileError> {
        let pos = self.pos();
        match self {
            Node::Integer(n, _) => e.constant(pos, Constant::integer(*n)),
            Node::Float(n, _) => e.constant(pos, Constant::Float(*n)),
            Node::String(s, _) | Node::Data(s, _) => e.constant(pos, Constant::String(s.clone())),
            Node::Boolean(b, _) => e.constant(pos, Constant::Bool(*b)),
            Node::Null(_) => e.constant(pos, Constant::Null),
            Node::Identifier(name, _) => e.load(pos, name),
            Node::Print(print) => print.compile(e)?,
            Node::Binary(b) => match operator(b.op) {
                Some(op) => {
                    b.left.compile(e, None)?;
                    b.right.compile(e, None)?;
                    e.emit(pos, Opcode::Operation(op));
                }
                None => short_circuit(e, b.op, &b.left, &b.right, pos)?,
            },
            Node::Unary(u) => {
                u.operand.compile(e, None)?;
                let op = match u.op {
                    UnaryOp::Neg => Operator::Neg,
                    UnaryOp::Pos => Operator::Pos,
                };
                e.emit(pos, Opcode::Operation(op));
            }
            Node::Ternary(t) => {
                let otherwise = e.label();
                let end = e.label();
                t.condition.compile(e, None)?;
                e.jump(pos, Condition::IfFalse, otherwise);
                t.then.compile(e, None)?;
                e.jump(pos, Condition::Always, end);
                e.place(pos, otherwise)?;
                t.otherwise.compile(e, None)?;
                e.place(pos, end)?;
            }
            Node::Property(p) => {
                let arity = arity("member access", p.args.len(), pos)?;
                e.compile_all(&p.args, None)?;
                p.receiver.compile(e, None)?;
                e.emit(pos, Opcode::LoadMember { arity });
            }
            Node::Method(m) => m.compile(e)?,
            Node::Set(s) => {
                s.value.compile(e, None)?;
                e.store(pos, &s.name);
            }
            Node::Block(b) => {
                return Err(CompileError::NestedBlock {
                    id: b.id.clone(),
                    pos,
                });
            }
            Node::BlockCall(call) => {
                let count = arity("block call", call.params.len(), pos)?;
                let wrap = count > 0 && call.id != "body";
                if wrap {
                    e.push_scope(pos);
                }
                for param in &call.params {
                    param.value.compile(e, None)?;
                    e.store(param.pos, &param.name);
                }
                e.emit(
                    pos,
                    Opcode::BlockCall {
                        id: call.id.clone(),
                        arity: count,
                    },
                );
                if wrap {
                    e.pop_scope(pos);
                }
            }
            Node::Reference(r) => {
                if r.kind == ReferenceKind::Layout {
                    tracing::debug!(src = %r.src, "layout reference inside the body");
                }
                e.emit(
                    pos,
                    Opcode::Reference {
                        kind: r.kind,
                        src: r.src.clone(),
                    },
                );
            }
            Node::If(chain) => chain.compile(e, targets)?,
            Node::For(l) => l.compile(e)?,
            Node::Break(kind, _) => {
                let Some(t) = targets else {
                    return Err(CompileError::LoopControl {
                        keyword: kind.keyword(),
                        pos,
                    });
                };
                for _ in t.depth..e.depth {
                    e.emit(pos, Opcode::Scope(ScopeAction::Pop));
                }
                let target = match kind {
                    LoopControl::Break => t.end,
                    LoopControl::Continue => t.start,
                };
                e.jump(pos, Condition::Always, target);
            }
        }
        Ok(())
    }
}

/// `&&`, `||` and `??`: the left operand is evaluated once into a temporary
/// and decides whether the right one runs at all.
fn short_circuit(
    e: &mut Emitter,
    op: BinaryOp,
    left: &Node,
    right: &Node,
    pos: Pos,
) -> Result<(), CompileError> {
    let tmp = e.temp();
    let keep = e.label();
    let end = e.label();
    left.compile(e, None)?;
    e.store(pos, &tmp);
    e.load(pos, &tmp);
    match op {
        BinaryOp::And => e.jump(pos, Condition::IfFalse, keep),
        BinaryOp::Or => e.jump(pos, Condition::IfTrue, keep),
        _ => {
            e.constant(pos, Constant::Null);
            e.emit(pos, Opcode::Operation(Operator::Eq));
            e.jump(pos, Condition::IfFalse, keep);
        }
    }
    right.compile(e, None)?;
    e.jump(pos, Condition::Always, end);
    e.place(pos, keep)?;
    e.load(pos, &tmp);
    e.place(pos, end)?;
    Ok(())
}

impl Print {
    fn compile(&self, e: &mut Emitter) -> Result<(), CompileError> {
        self.value.compile(e, None)?;
        for filter in &self.filters {
            let arity = arity("filter", filter.args.len() + 1, filter.pos)?;
            e.compile_all(&filter.args, None)?;
            e.constant(filter.pos, Constant::String(filter.name.clone()));
            e.emit(
                filter.pos,
                Opcode::Call {
                    arity,
                    receiver: false,
                },
            );
        }
        e.emit(self.pos, Opcode::Print { escape: self.escape });
        Ok(())
    }
}

impl Method {
    fn compile(&self, e: &mut Emitter) -> Result<(), CompileError> {
        let pos = self.pos;
        let count = arity("call", self.args.len(), pos)?;
        e.compile_all(&self.args, None)?;
        match &*self.callee {
            Node::Identifier(name, _) => {
                e.constant(pos, Constant::String(name.clone()));
                e.emit(
                    pos,
                    Opcode::Call {
                        arity: count,
                        receiver: false,
                    },
                );
            }
            Node::Property(member) => {
                let member_arity = arity("member access", member.args.len(), pos)?;
                let receiver = e.temp();
                member.receiver.compile(e, None)?;
                e.store(pos, &receiver);
                e.load(pos, &receiver);
                e.compile_all(&member.args, None)?;
                e.load(pos, &receiver);
                e.emit(pos, Opcode::LoadMember { arity: member_arity });
                e.emit(
                    pos,
                    Opcode::Call {
                        arity: count,
                        receiver: true,
                    },
                );
            }
            callee => {
                callee.compile(e, None)?;
                e.emit(
                    pos,
                    Opcode::Call {
                        arity: count,
                        receiver: false,
                    },
                );
            }
        }
        Ok(())
    }
}

impl If {
    fn compile(&self, e: &mut Emitter, targets: Option<LoopTargets>) -> Result<(), CompileError> {
        let end = e.label();
        for branch in &self.branches {
            let next = e.label();
            branch.condition.compile(e, None)?;
            e.jump(branch.pos, Condition::IfFalse, next);
            e.scoped(branch.pos, &branch.body, targets)?;
            e.jump(branch.pos, Condition::Always, end);
            e.place(branch.pos, next)?;
        }
        if let Some(otherwise) = &self.otherwise {
            e.scoped(self.pos, otherwise, targets)?;
        }
        e.place(self.pos, end)?;
        Ok(())
    }
}

impl For {
    /// ```text
    ///     scope push
    ///     it = iterator(iterable); has = it.hasNext; next = it.next
    ///     [else only: jump otherwise unless it.has()]
    /// top:
    ///     jump end unless it.has()
    ///     key = it.key; value = it.value
    ///     body
    /// cont:
    ///     jump top if it.next()
    ///     [else only: jump end; otherwise: else body]
    /// end:
    ///     scope pop
    /// ```
    fn compile(&self, e: &mut Emitter) -> Result<(), CompileError> {
        let pos = self.pos;
        let top = e.label();
        let cont = e.label();
        let end = e.label();
        let iter = e.temp();
        let has = e.temp();
        let next = e.temp();

        e.push_scope(pos);
        self.iterable.compile(e, None)?;
        e.emit(pos, Opcode::CastToIterator);
        e.store(pos, &iter);
        e.member(pos, &iter, "hasNext");
        e.store(pos, &has);
        e.member(pos, &iter, "next");
        e.store(pos, &next);

        let otherwise = match &self.otherwise {
            Some(_) => {
                let label = e.label();
                e.call_method(pos, &iter, &has);
                e.jump(pos, Condition::IfFalse, label);
                Some(label)
            }
            None => None,
        };

        e.place(pos, top)?;
        e.call_method(pos, &iter, &has);
        e.jump(pos, Condition::IfFalse, end);
        if let Some(key) = &self.key {
            e.member(pos, &iter, "key");
            e.store(pos, key);
        }
        e.member(pos, &iter, "value");
        e.store(pos, &self.value);

        let targets = LoopTargets {
            start: cont,
            end,
            depth: e.depth,
        };
        e.compile_all(&self.body, Some(targets))?;

        e.place(pos, cont)?;
        e.call_method(pos, &iter, &next);
        e.jump(pos, Condition::IfTrue, top);
        if let (Some(label), Some(body)) = (otherwise, &self.otherwise) {
            e.jump(pos, Condition::Always, end);
            e.place(pos, label)?;
            e.compile_all(body, None)?;
        }
        e.place(pos, end)?;
        e.pop_scope(pos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use quill_il::Address;

    use super::*;
    use crate::parser::parse;

    fn compile(src: &str) -> Vec<Instruction> {
        let root = parse(src, "/t.html").unwrap();
        root.compile(0).unwrap()
    }

    fn listing(code: &[Instruction]) -> Vec<String> {
        code.iter().map(|i| i.op.to_string()).collect()
    }

    /// Everything after the header-end marker.
    fn body(code: &[Instruction]) -> &[Instruction] {
        let Opcode::Document { header_end, .. } = &code[0].op else {
            panic!("missing document");
        };
        &code[header_end.get() as usize..]
    }

    #[test]
    fn addresses_start_at_one_and_targets_are_markers() {
        quill_testhelpers::setup();
        let code = compile(
            "{{ block b }}{{ x && y }}{{ /block }}\
             {{ for i : xs }}{{ if i }}{{ continue }}{{ else }}{{ break }}{{ /if }}{{ else }}-{{ /for }}",
        );
        for (index, ins) in code.iter().enumerate() {
            assert_eq!(ins.address.get(), index as u32 + 1);
            if let Some(target) = ins.op.target() {
                let marker = &code[target.get() as usize - 1];
                assert_eq!(marker.op, Opcode::Nop, "{ins} points at {marker}");
                assert!(*target > Address::FIRST);
            }
        }
    }

    #[test]
    fn blocks_come_before_the_header_end() {
        quill_testhelpers::setup();
        let code = compile("a{{ block one }}1{{ /block }}{{ block two }}2{{ /block }}");
        let Opcode::Document { header_end, .. } = &code[0].op else {
            panic!("missing document");
        };
        let ids: Vec<_> = code[..header_end.get() as usize]
            .iter()
            .filter_map(|i| match &i.op {
                Opcode::Block { id } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, ["one", "two"]);
        assert_eq!(code[header_end.get() as usize - 1].op, Opcode::Nop);
        assert_eq!(code.last().map(|i| &i.op), Some(&Opcode::Exit));
    }

    #[test]
    fn coalesce_tests_against_null_only() {
        quill_testhelpers::setup();
        let code = compile("{{ a ?? 1 }}");
        assert_eq!(
            listing(body(&code)),
            [
                "ldv a",
                "stv $/t.html:0",
                "ldv $/t.html:0",
                "ldc null",
                "op eq",
                "jmp.false @11",
                "ldc 1",
                "jmp.always @13",
                "nop",
                "ldv $/t.html:0",
                "nop",
                "print escape",
                "jmp.exit",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
        );
    }

    #[test]
    fn method_calls_capture_the_receiver_once() {
        quill_testhelpers::setup();
        let code = compile("{{ user.greet(1) }}");
        let ops: Vec<_> = body(&code).iter().map(|i| i.op.clone()).collect();
        assert_eq!(
            ops[..7],
            [
                Opcode::LoadConst(Constant::Integer(1)),
                Opcode::LoadVariable("user".into()),
                Opcode::SetVariable("$/t.html:0".into()),
                Opcode::LoadVariable("$/t.html:0".into()),
                Opcode::LoadConst(Constant::String("greet".into())),
                Opcode::LoadVariable("$/t.html:0".into()),
                Opcode::LoadMember { arity: 1 },
            ]
        );
        assert_eq!(
            ops[7],
            Opcode::Call {
                arity: 1,
                receiver: true
            }
        );
    }

    #[test]
    fn break_pops_the_scopes_it_leaves() {
        quill_testhelpers::setup();
        let code = compile("{{ for x : xs }}{{ if x }}{{ if x }}{{ break }}{{ /if }}{{ /if }}{{ /for }}");
        let ops: Vec<_> = code.iter().map(|i| &i.op).collect();
        let jump = ops
            .iter()
            .position(|op| matches!(op, Opcode::Jump { condition: Condition::Always, .. }))
            .unwrap();
        assert_eq!(*ops[jump - 1], Opcode::Scope(ScopeAction::Pop));
        assert_eq!(*ops[jump - 2], Opcode::Scope(ScopeAction::Pop));
        assert_ne!(*ops[jump - 3], Opcode::Scope(ScopeAction::Pop));
    }

    #[test]
    fn block_call_parameters_get_their_own_scope() {
        quill_testhelpers::setup();
        let code = compile("{{ #card title=1 }}{{ #body x=2 }}{{ #plain }}");
        let ops: Vec<_> = body(&code).iter().map(|i| i.op.clone()).collect();
        assert_eq!(
            ops,
            [
                Opcode::Scope(ScopeAction::Push),
                Opcode::LoadConst(Constant::Integer(1)),
                Opcode::SetVariable("title".into()),
                Opcode::BlockCall {
                    id: "card".into(),
                    arity: 1
                },
                Opcode::Scope(ScopeAction::Pop),
                Opcode::LoadConst(Constant::Integer(2)),
                Opcode::SetVariable("x".into()),
                Opcode::BlockCall {
                    id: "body".into(),
                    arity: 1
                },
                Opcode::BlockCall {
                    id: "plain".into(),
                    arity: 0
                },
                Opcode::Exit,
            ]
        );
    }

    #[test]
    fn large_integers_become_longs() {
        quill_testhelpers::setup();
        let code = compile("{{ 2147483647 }}{{ 2147483648 }}");
        let consts: Vec<_> = code
            .iter()
            .filter_map(|i| match &i.op {
                Opcode::LoadConst(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(consts, [Constant::Integer(i32::MAX), Constant::Long(1 << 31)]);
    }

    #[test]
    fn loop_control_needs_a_loop() {
        quill_testhelpers::setup();
        let node = Node::Break(LoopControl::Continue, Pos::new(3, 7));
        let err = node.compile(&mut Emitter::new("/t"), None).unwrap_err();
        assert!(matches!(
            err,
            CompileError::LoopControl {
                keyword: "continue",
                ..
            }
        ));
    }

    #[test]
    fn nested_blocks_are_rejected() {
        quill_testhelpers::setup();
        let pos = Pos::new(2, 4);
        let node = Node::Block(Block {
            id: "inner".into(),
            body: vec![Node::Data("x".into(), pos)],
            pos,
        });
        let err = node.compile(&mut Emitter::new("/t"), None).unwrap_err();
        assert!(matches!(
            err,
            CompileError::NestedBlock { ref id, pos: at } if id == "inner" && at == pos
        ));
    }

    #[test]
    fn temporaries_are_named_after_the_template() {
        quill_testhelpers::setup();
        let page = parse("{{ for x : xs }}{{ x }}{{ /for }}", "/page").unwrap();
        let part = parse("{{ a ?? 1 }}", "/part").unwrap();
        let temps = |code: Vec<Instruction>| -> Vec<String> {
            code.into_iter()
                .filter_map(|i| match i.op {
                    Opcode::SetVariable(name) if name.starts_with('$') => Some(name),
                    _ => None,
                })
                .collect()
        };
        assert_eq!(temps(page.compile(0).unwrap()), ["$/page:0", "$/page:1", "$/page:2"]);
        assert_eq!(temps(part.compile(0).unwrap()), ["$/part:0"]);
    }

    #[test]
    fn too_many_arguments() {
        quill_testhelpers::setup();
        let args = vec!["1"; 128].join(", ");
        let root = parse(&format!("{{{{ f({args}) }}}}"), "/t").unwrap();
        assert!(matches!(
            root.compile(0),
            Err(CompileError::Arity { count: 128, .. })
        ));
    }
}
