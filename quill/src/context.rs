//! Per-render state.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::{Error, Loader, Value};

/// Name under which the whole seed data is visible.
const VIEWDATA: &str = "viewdata";

/// Everything one render mutates: the operand stack, the variable scopes,
/// the output, and the loaders opened so far.
///
/// Variable names are case-insensitive.
#[derive(Debug)]
pub struct Context {
    stack: Vec<Value>,
    scopes: Vec<HashMap<String, Value>>,
    output: String,
    loaders: HashMap<String, Arc<Loader>>,
    seed: Value,
    strict: bool,
}

impl Context {
    /// A context whose outermost scope holds the top-level entries of
    /// `seed`.
    pub fn new(seed: Value, strict: bool) -> Self {
        let mut globals = HashMap::new();
        let seed = match seed {
            Value::Map(map) => {
                for (k, v) in &map {
                    globals.insert(k.to_ascii_lowercase(), v.clone());
                }
                Value::Map(map)
            }
            Value::Null => Value::Map(IndexMap::new()),
            other => other,
        };
        Self {
            stack: Vec::new(),
            scopes: vec![globals],
            output: String::new(),
            loaders: HashMap::new(),
            seed,
            strict,
        }
    }

    /// Push onto the operand stack.
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop the operand stack.
    pub fn pop(&mut self) -> Result<Value, Error> {
        self.stack
            .pop()
            .ok_or_else(|| Error::runtime("operand stack underflow"))
    }

    /// Pop `n` values, returned in push order.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Error> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| Error::runtime("operand stack underflow"))?;
        Ok(self.stack.split_off(at))
    }

    /// Current operand stack height.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Read a variable.
    pub fn get(&self, name: &str) -> Result<Value, Error> {
        let name = name.to_ascii_lowercase();
        if let Some(v) = self.scopes.last().and_then(|s| s.get(&name)) {
            return Ok(v.clone());
        }
        if name == VIEWDATA {
            return Ok(self.seed.clone());
        }
        if self.strict {
            return Err(Error::runtime(format!("variable `{name}` is not defined")));
        }
        Ok(Value::Null)
    }

    /// Bind a variable in the innermost scope.
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_ascii_lowercase(), value);
        }
    }

    /// Enter a scope that starts as a copy of the current one.
    pub fn push_scope(&mut self) {
        let copy = self.scopes.last().cloned().unwrap_or_default();
        self.scopes.push(copy);
    }

    /// Leave the innermost scope. The outermost scope is never popped.
    pub fn pop_scope(&mut self) -> Result<(), Error> {
        if self.scopes.len() <= 1 {
            return Err(Error::runtime("scope pop without a matching push"));
        }
        self.scopes.pop();
        Ok(())
    }

    /// Number of scopes, including the outermost one.
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Drop scopes until only `depth` remain.
    pub fn truncate_scopes(&mut self, depth: usize) {
        self.scopes.truncate(depth.max(1));
    }

    /// Append rendered text.
    pub fn write(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Output produced so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// A loader already opened in this render.
    pub fn loader(&self, name: &str) -> Option<Arc<Loader>> {
        self.loaders.get(name).cloned()
    }

    /// Remember a loader for the rest of this render.
    pub fn cache_loader(&mut self, name: impl Into<String>, loader: Arc<Loader>) {
        self.loaders.insert(name.into(), loader);
    }

    /// Finish the render and take the output.
    pub fn into_output(mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        for loader in self.loaders.values() {
            loader.close();
        }
        if !self.loaders.is_empty() {
            tracing::trace!(loaders = self.loaders.len(), "closed render loaders");
        }
    }
}
