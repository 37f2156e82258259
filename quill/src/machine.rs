//! The stack VM.
//!
//! [`Machine::step`] runs one instruction. Cross-template references do not
//! load anything themselves: they return [`Step::Suspend`], the driver loads
//! the artifact however it likes, and [`Machine::resume`] splices it in.

use std::sync::Arc;

use quill_il::{Address, Condition, FormatError, Instruction, Opcode, ReferenceKind, ScopeAction};

use crate::value::{Iter, html_escape};
use crate::{Context, Env, Error, Loader, Value, functions, ops};

/// Deepest allowed nesting of includes and block calls.
pub const MAX_FRAMES: usize = 64;

/// Longest allowed chain of layouts.
pub const MAX_LAYOUTS: u32 = 64;

/// A template the VM needs before it can continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// What to do with it once loaded.
    pub kind: ReferenceKind,
    /// Canonical template name.
    pub src: String,
}

/// Outcome of one [`Machine::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Execution continues at this address.
    Continue(Address),
    /// Load the requested template, then call [`Machine::resume`].
    Suspend(LoadRequest),
    /// The render is complete.
    Done,
}

#[derive(Debug)]
struct Frame {
    /// Where instructions come from.
    loader: Arc<Loader>,
    /// Whose block table `#name` calls consult.
    blocks: Arc<Loader>,
    pc: Address,
    /// Scope depth to restore when the frame exits.
    depth: usize,
}

/// One render's call stack.
#[derive(Debug)]
pub struct Machine {
    env: Arc<Env>,
    frames: Vec<Frame>,
    layouts: u32,
}

impl Machine {
    /// Start at the body of `loader`.
    pub fn new(env: Arc<Env>, loader: Arc<Loader>, ctx: &Context) -> Self {
        let frame = Frame {
            pc: loader.header_end(),
            blocks: loader.clone(),
            loader,
            depth: ctx.scope_depth(),
        };
        Self {
            env,
            frames: vec![frame],
            layouts: 0,
        }
    }

    /// Number of active frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Execute the instruction at the current address.
    pub fn step(&mut self, ctx: &mut Context) -> Result<Step, Error> {
        let Some(frame) = self.frames.last() else {
            return Ok(Step::Done);
        };
        let loader = frame.loader.clone();
        let ins = loader.load(frame.pc)?;
        tracing::trace!(template = %loader.source(), "{ins}");
        self.execute(&ins, ctx)
            .map_err(|e| e.located(loader.source(), ins.line))
    }

    fn frame(&mut self) -> Result<&mut Frame, Error> {
        self.frames
            .last_mut()
            .ok_or_else(|| Error::runtime("no active frame"))
    }

    /// Move the current frame to `pc`.
    fn goto(&mut self, pc: Address) -> Result<Step, Error> {
        self.frame()?.pc = pc;
        Ok(Step::Continue(pc))
    }

    fn advance(&mut self, ins: &Instruction) -> Result<Step, Error> {
        let next = ins.address.next().ok_or(FormatError::AddressOutOfRange {
            address: ins.address.get(),
        })?;
        self.goto(next)
    }

    fn push_frame(
        &mut self,
        loader: Arc<Loader>,
        blocks: Arc<Loader>,
        pc: Address,
        ctx: &Context,
    ) -> Result<(), Error> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(Error::runtime(format!(
                "templates nest deeper than {MAX_FRAMES} frames"
            )));
        }
        self.frames.push(Frame {
            loader,
            blocks,
            pc,
            depth: ctx.scope_depth(),
        });
        Ok(())
    }

    fn execute(&mut self, ins: &Instruction, ctx: &mut Context) -> Result<Step, Error> {
        match &ins.op {
            Opcode::Document { .. } | Opcode::Nop | Opcode::Block { .. } => {}
            Opcode::LoadConst(c) => ctx.push(Value::from(c.clone())),
            Opcode::LoadVariable(name) => {
                let v = ctx.get(name)?;
                ctx.push(v);
            }
            Opcode::SetVariable(name) => {
                let v = ctx.pop()?;
                ctx.set(name, v);
            }
            Opcode::Call { arity, receiver } => {
                let callee = ctx.pop()?;
                let receiver = if *receiver { Some(ctx.pop()?) } else { None };
                let args = ctx.pop_n(usize::from(*arity))?;
                let result = match (callee, receiver) {
                    (Value::String(name), None) => functions::call(&self.env, &name, &args)?,
                    (Value::Method(method), receiver) => method.call(receiver.as_ref(), &args)?,
                    _ => Value::Null,
                };
                ctx.push(result);
            }
            Opcode::Print { escape } => {
                let text = ctx.pop()?.render_to_string();
                if *escape {
                    ctx.write(&html_escape(&text));
                } else {
                    ctx.write(&text);
                }
            }
            Opcode::Operation(op) => {
                let result = if op.is_unary() {
                    ops::unary(*op, &ctx.pop()?)
                } else {
                    let b = ctx.pop()?;
                    let a = ctx.pop()?;
                    ops::binary(*op, &a, &b)
                };
                ctx.push(result);
            }
            Opcode::Jump { condition, target } => {
                let taken = match condition {
                    Condition::Always => true,
                    Condition::IfTrue => ctx.pop()?.is_truthy(),
                    Condition::IfFalse => !ctx.pop()?.is_truthy(),
                };
                if taken {
                    return self.goto(*target);
                }
            }
            Opcode::Exit => {
                let Some(frame) = self.frames.pop() else {
                    return Ok(Step::Done);
                };
                ctx.truncate_scopes(frame.depth);
                return Ok(match self.frames.last() {
                    Some(parent) => Step::Continue(parent.pc),
                    None => Step::Done,
                });
            }
            Opcode::LoadMember { arity } => {
                let receiver = ctx.pop()?;
                let args = ctx.pop_n(usize::from(*arity))?;
                ctx.push(receiver.member(&args)?);
            }
            Opcode::Scope(ScopeAction::Push) => ctx.push_scope(),
            Opcode::Scope(ScopeAction::Pop) => ctx.pop_scope()?,
            Opcode::BlockCall { id, .. } => {
                let step = self.advance(ins)?;
                self.call_block(id, ctx)?;
                return Ok(match self.frames.last() {
                    Some(frame) => Step::Continue(frame.pc),
                    None => step,
                });
            }
            Opcode::Reference { kind, src } => {
                self.advance(ins)?;
                return Ok(Step::Suspend(LoadRequest {
                    kind: *kind,
                    src: src.clone(),
                }));
            }
            Opcode::CastToIterator => {
                let v = ctx.pop()?;
                ctx.push(Value::Iterator(Iter::over(&v)));
            }
        }
        self.advance(ins)
    }

    fn call_block(&mut self, id: &str, ctx: &Context) -> Result<(), Error> {
        let (loader, table) = {
            let frame = self.frame()?;
            (frame.loader.clone(), frame.blocks.clone())
        };
        if id == "body" {
            let Some((child, at)) = loader.body() else {
                tracing::warn!(template = %loader.source(), "`#body` called without a child template");
                return Ok(());
            };
            return self.push_frame(child.clone(), child, at, ctx);
        }
        let Some((owner, at)) = table.block(id) else {
            tracing::warn!(template = %loader.source(), id, "call to undefined block");
            return Ok(());
        };
        let start = at.next().ok_or(FormatError::AddressOutOfRange { address: at.get() })?;
        self.push_frame(owner, table, start, ctx)
    }

    /// Continue after `request` was answered with `loader`.
    pub fn resume(
        &mut self,
        request: &LoadRequest,
        loader: Arc<Loader>,
        ctx: &mut Context,
    ) -> Result<(), Error> {
        match request.kind {
            ReferenceKind::Include => {
                let start = loader.header_end();
                self.push_frame(loader.clone(), loader, start, ctx)
            }
            ReferenceKind::Require => {
                self.frame()?.blocks.require(&loader);
                Ok(())
            }
            ReferenceKind::Layout => {
                self.layouts += 1;
                if self.layouts > MAX_LAYOUTS {
                    return Err(Error::runtime(format!(
                        "layout chain is longer than {MAX_LAYOUTS} templates"
                    )));
                }
                let frame = self.frame()?;
                loader.set_body(&frame.loader, frame.pc);
                tracing::debug!(
                    child = %frame.loader.source(),
                    layout = %loader.source(),
                    "handing off to layout"
                );
                frame.pc = loader.header_end();
                frame.blocks = loader.clone();
                frame.loader = loader;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use quill_il::encode;
    use quill_testhelpers::setup;

    use super::*;

    fn artifact(src: &str, name: &str) -> Arc<Loader> {
        let code = quill_syntax::compile(src, name, 0).unwrap();
        Arc::new(Loader::open(encode(&code).unwrap()).unwrap())
    }

    fn run_to_end(machine: &mut Machine, ctx: &mut Context) -> Result<Option<LoadRequest>, Error> {
        loop {
            match machine.step(ctx)? {
                Step::Continue(_) => {}
                Step::Suspend(req) => return Ok(Some(req)),
                Step::Done => return Ok(None),
            }
        }
    }

    #[test]
    fn runs_a_template() {
        setup();
        let env = Arc::new(Env::default());
        let mut ctx = Context::new(Value::map([("name", "<b>")]), false);
        let loader = artifact("Hi {{ name }}{{ !name }}!", "/t");
        let mut machine = Machine::new(env, loader, &ctx);
        assert_eq!(run_to_end(&mut machine, &mut ctx).unwrap(), None);
        assert_eq!(ctx.output(), "Hi &lt;b&gt;<b>!");
        assert_eq!(machine.depth(), 0);
        assert_eq!(ctx.stack_len(), 0);
    }

    #[test]
    fn references_suspend() {
        setup();
        let env = Arc::new(Env::default());
        let mut ctx = Context::new(Value::Null, false);
        let page = artifact("a{{ include \"part\" }}c", "/page");
        let part = artifact("b", "/part");
        let mut machine = Machine::new(env, page, &ctx);

        let req = run_to_end(&mut machine, &mut ctx).unwrap().unwrap();
        assert_eq!(
            req,
            LoadRequest {
                kind: ReferenceKind::Include,
                src: "/part".into()
            }
        );
        assert_eq!(ctx.output(), "a");
        machine.resume(&req, part, &mut ctx).unwrap();
        assert_eq!(machine.depth(), 2);
        assert_eq!(run_to_end(&mut machine, &mut ctx).unwrap(), None);
        assert_eq!(ctx.output(), "abc");
    }

    #[test]
    fn errors_carry_their_location() {
        setup();
        let env = Arc::new(Env::default());
        let mut ctx = Context::new(Value::Null, false);
        let loader = artifact("line one\n{{ nope() }}", "/broken");
        let mut machine = Machine::new(env, loader, &ctx);
        let err = run_to_end(&mut machine, &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "unknown function `nope` (at /broken:2)");
    }

    #[test]
    fn recursion_is_bounded() {
        setup();
        let env = Arc::new(Env::default());
        let mut ctx = Context::new(Value::Null, false);
        let loader = artifact("{{ block r }}{{ #r }}{{ /block }}{{ #r }}", "/loop");
        let mut machine = Machine::new(env, loader, &ctx);
        let err = run_to_end(&mut machine, &mut ctx).unwrap_err();
        assert!(err.to_string().contains("deeper than 64 frames"), "{err}");
    }
}
