use std::sync::Arc;

use crate::compiler::{self, Compiled};
use crate::machine::{Machine, Step};
use crate::{Context, Env, Error, Loader, Value};

/// Compiles and renders templates for one [`Env`].
///
/// Cheap to clone; every render gets its own [`Context`], so renders can run
/// concurrently.
#[derive(Debug, Clone)]
pub struct Engine {
    env: Arc<Env>,
}

impl Engine {
    /// Check `env` and build an engine on it.
    pub fn new(env: Env) -> Result<Self, Error> {
        env.validate()?;
        Ok(Self { env: Arc::new(env) })
    }

    /// The configuration this engine runs with.
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Make sure `name` has a current artifact.
    pub async fn compile(&self, name: &str) -> Result<Compiled, Error> {
        let (compiled, _) = compiler::compile(&self.env, name).await?;
        Ok(compiled)
    }

    /// Render `name` with `data` as the outermost scope.
    pub async fn render(&self, name: &str, data: impl Into<Value>) -> Result<String, Error> {
        let mut ctx = Context::new(data.into(), self.env.strict_mode());
        let loader = self.load(&mut ctx, name).await?;
        let mut machine = Machine::new(self.env.clone(), loader, &ctx);
        loop {
            match machine.step(&mut ctx)? {
                Step::Continue(_) => {}
                Step::Suspend(request) => {
                    let loader = self.load(&mut ctx, &request.src).await?;
                    machine.resume(&request, loader, &mut ctx)?;
                }
                Step::Done => break,
            }
        }
        Ok(ctx.into_output())
    }

    /// The loader for `name`, compiling it first if needed. Each template
    /// is opened at most once per render.
    async fn load(&self, ctx: &mut Context, name: &str) -> Result<Arc<Loader>, Error> {
        let key = self.env.normalize(name);
        if let Some(loader) = ctx.loader(&key) {
            return Ok(loader);
        }
        let (compiled, bytes) = compiler::compile(&self.env, &key).await?;
        let loader = Arc::new(Loader::open(bytes)?);
        tracing::trace!(name = %compiled.name, path = %compiled.path, "loaded template");
        ctx.cache_loader(key, loader.clone());
        Ok(loader)
    }
}
