//! Runtime values.

use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;
use quill_il::Constant;

use crate::Error;

/// A host object exposed to templates.
///
/// Everything has a default, so an implementation only overrides what it
/// supports.
pub trait Object: fmt::Debug + Send + Sync {
    /// `obj.name` and `obj["name"]`.
    fn member(&self, name: &str) -> Value {
        let _ = name;
        Value::Null
    }

    /// `obj[a, b, ...]` with more than one argument, or with a single
    /// argument that is not a string.
    fn get(&self, args: &[Value]) -> Result<Value, Error> {
        let _ = args;
        Err(Error::runtime("object does not support indexed access"))
    }

    /// Native iteration as `(key, value)` pairs. `None` iterates nothing.
    fn iterate(&self) -> Option<Vec<(Value, Value)>> {
        None
    }

    /// Whether `obj.name` is a method. Accessing one yields a bound
    /// [`Method`] instead of calling [`member`](Self::member).
    fn has_method(&self, name: &str) -> bool {
        let _ = name;
        false
    }

    /// `obj.name(args...)`.
    fn call(&self, name: &str, args: &[Value]) -> Result<Value, Error> {
        let _ = (name, args);
        Ok(Value::Null)
    }
}

/// A value on the operand stack or bound to a variable.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent or explicitly null.
    #[default]
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integers; 32-bit constants widen on load.
    Int(i64),
    /// Doubles.
    Float(f64),
    /// Text.
    String(String),
    /// An ordered sequence.
    List(Vec<Value>),
    /// Keyed data. Keeps insertion order; iterates sorted by key.
    Map(IndexMap<String, Value>),
    /// A host object.
    Object(Arc<dyn Object>),
    /// The cursor produced by `CastToIterator`.
    Iterator(Iter),
    /// A method taken off a receiver, waiting to be called.
    Method(Method),
}

impl Value {
    /// Build a map from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Wrap a host object.
    pub fn object(object: impl Object + 'static) -> Self {
        Value::Object(Arc::new(object))
    }

    /// Template truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Object(_) | Value::Iterator(_) | Value::Method(_) => true,
        }
    }

    /// Whether this is `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Iterator(_) => "iterator",
            Value::Method(_) => "method",
        }
    }

    /// The text a print of this value produces, before escaping.
    pub fn render_to_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::List(l) => l
                .iter()
                .map(Value::render_to_string)
                .collect::<Vec<_>>()
                .join(","),
            Value::Map(_) | Value::Object(_) => "[object]".to_owned(),
            Value::Iterator(_) => "[iterator]".to_owned(),
            Value::Method(m) => format!("[method {}]", m.name()),
        }
    }

    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Look up a member: `self[args...]`.
    ///
    /// Misses are `null`. More than one argument needs an [`Object`].
    pub fn member(&self, args: &[Value]) -> Result<Value, Error> {
        let key = match (self, args) {
            (Value::Object(obj), [Value::String(name)]) if obj.has_method(name) => {
                return Ok(Value::Method(Method::Bound {
                    object: obj.clone(),
                    name: name.clone(),
                }));
            }
            (Value::Object(obj), [Value::String(name)]) => return Ok(obj.member(name)),
            (Value::Object(obj), _) => return obj.get(args),
            (_, [key]) => key,
            (_, _) => {
                return Err(Error::runtime(format!(
                    "a {} cannot be indexed with {} arguments",
                    self.type_name(),
                    args.len()
                )));
            }
        };
        Ok(match (self, key) {
            (Value::Map(map), Value::String(name)) => map.get(name).cloned().unwrap_or_default(),
            (Value::Map(map), other) => map
                .get(&other.render_to_string())
                .cloned()
                .unwrap_or_default(),
            (Value::List(items), Value::Int(i)) => index(items.len(), *i)
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or_default(),
            (Value::List(items), Value::String(name)) if name == "length" => {
                Value::Int(items.len() as i64)
            }
            (Value::String(s), Value::Int(i)) => {
                let count = s.chars().count();
                index(count, *i)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or_default()
            }
            (Value::String(s), Value::String(name)) if name == "length" => {
                Value::Int(s.chars().count() as i64)
            }
            (Value::Iterator(it), Value::String(name)) => it.member(name),
            _ => Value::Null,
        })
    }

    /// The `(key, value)` pairs a `for` loop walks.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        match self {
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i as i64), v.clone()))
                .collect(),
            Value::Map(map) => {
                let mut pairs: Vec<_> = map.iter().collect();
                pairs.sort_by(|a, b| a.0.cmp(b.0));
                pairs
                    .into_iter()
                    .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                    .collect()
            }
            Value::String(s) => s
                .chars()
                .enumerate()
                .map(|(i, c)| (Value::Int(i as i64), Value::String(c.to_string())))
                .collect(),
            Value::Object(obj) => obj.iterate().unwrap_or_default(),
            Value::Iterator(it) => it.remaining(),
            _ => Vec::new(),
        }
    }
}

/// Resolve a possibly negative index against `len`.
fn index(len: usize, i: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let i = if i < 0 { len + i } else { i };
    (0..len).contains(&i).then(|| i as usize)
}

/// Escape text for HTML element content and attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Value::Method(a), Value::Method(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_to_string())
    }
}

impl From<Constant> for Value {
    fn from(c: Constant) -> Self {
        match c {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(b),
            Constant::Integer(i) => Value::Int(i64::from(i)),
            Constant::Long(i) => Value::Int(i),
            Constant::Float(f) => Value::Float(f),
            Constant::String(s) => Value::String(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(i: $ty) -> Self {
                    Value::Int(i64::from(i))
                }
            }
        )*
    };
}

from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float(f64::from(f))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map_or(Value::Null, Value::Float),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// A stateful cursor over a snapshot of `(key, value)` pairs.
///
/// Clones share the cursor, so the copy bound to a loop temporary and the
/// receiver of `hasNext`/`next` always agree.
#[derive(Debug, Clone)]
pub struct Iter(Arc<IterState>);

#[derive(Debug)]
struct IterState {
    items: Vec<(Value, Value)>,
    cursor: AtomicUsize,
}

impl Iter {
    /// Iterate `value`; an iterator yields itself.
    pub fn over(value: &Value) -> Self {
        if let Value::Iterator(it) = value {
            return it.clone();
        }
        Self(Arc::new(IterState {
            items: value.entries(),
            cursor: AtomicUsize::new(0),
        }))
    }

    fn current(&self) -> Option<&(Value, Value)> {
        self.0.items.get(self.0.cursor.load(Ordering::Relaxed))
    }

    /// Whether the cursor is on an element.
    pub fn has_next(&self) -> bool {
        self.current().is_some()
    }

    /// Move to the next element; returns whether there is one.
    pub fn advance(&self) -> bool {
        let len = self.0.items.len();
        let next = self
            .0
            .cursor
            .load(Ordering::Relaxed)
            .saturating_add(1)
            .min(len);
        self.0.cursor.store(next, Ordering::Relaxed);
        next < len
    }

    /// Key of the current element.
    pub fn key(&self) -> Value {
        self.current().map(|(k, _)| k.clone()).unwrap_or_default()
    }

    /// Value of the current element.
    pub fn value(&self) -> Value {
        self.current().map(|(_, v)| v.clone()).unwrap_or_default()
    }

    fn remaining(&self) -> Vec<(Value, Value)> {
        let at = self.0.cursor.load(Ordering::Relaxed);
        self.0.items.get(at..).map(<[_]>::to_vec).unwrap_or_default()
    }

    fn member(&self, name: &str) -> Value {
        match name {
            "hasNext" => Value::Method(Method::Iter(IterMethod::HasNext)),
            "next" => Value::Method(Method::Iter(IterMethod::Next)),
            "key" => self.key(),
            "value" => self.value(),
            _ => Value::Null,
        }
    }
}

/// Callable members of an [`Iter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterMethod {
    /// Whether the cursor is on an element.
    HasNext,
    /// Advance, then report whether the cursor is on an element.
    Next,
}

impl IterMethod {
    fn name(self) -> &'static str {
        match self {
            IterMethod::HasNext => "hasNext",
            IterMethod::Next => "next",
        }
    }

    /// Run against `it`.
    pub fn call(self, it: &Iter) -> Value {
        Value::Bool(match self {
            IterMethod::HasNext => it.has_next(),
            IterMethod::Next => it.advance(),
        })
    }
}

/// A callable member.
#[derive(Debug, Clone)]
pub enum Method {
    /// An iterator accessor; runs against the receiver of the call.
    Iter(IterMethod),
    /// A host object method, bound to its object when it was looked up.
    Bound {
        /// The object the method was read from.
        object: Arc<dyn Object>,
        /// Method name passed to [`Object::call`].
        name: String,
    },
}

impl Method {
    /// Name the method was looked up by.
    pub fn name(&self) -> &str {
        match self {
            Method::Iter(m) => m.name(),
            Method::Bound { name, .. } => name,
        }
    }

    /// Invoke with the receiver captured at the call site, if any.
    pub fn call(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value, Error> {
        match (self, receiver) {
            (Method::Iter(m), Some(Value::Iterator(it))) => Ok(m.call(it)),
            (Method::Iter(_), _) => Ok(Value::Null),
            (Method::Bound { object, name }, _) => object.call(name, args),
        }
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Method::Iter(a), Method::Iter(b)) => a == b,
            (
                Method::Bound { object: a, name: x },
                Method::Bound { object: b, name: y },
            ) => Arc::ptr_eq(a, b) && x == y,
            _ => false,
        }
    }
}
