//! The `Operation` instruction.

use std::cmp::Ordering;

use quill_il::Operator;

use crate::Value;

/// Apply a unary operator.
pub fn unary(op: Operator, v: &Value) -> Value {
    match (op, v) {
        (Operator::Neg, Value::Int(i)) => i
            .checked_neg()
            .map_or_else(|| Value::Float(-(*i as f64)), Value::Int),
        (Operator::Neg, Value::Float(f)) => Value::Float(-f),
        (Operator::Pos, Value::Int(_) | Value::Float(_)) => v.clone(),
        _ => Value::Null,
    }
}

/// Apply a binary operator.
pub fn binary(op: Operator, a: &Value, b: &Value) -> Value {
    match op {
        Operator::Add => add(a, b),
        Operator::Sub => arith(a, b, i64::checked_sub, |x, y| x - y),
        Operator::Mul => arith(a, b, i64::checked_mul, |x, y| x * y),
        Operator::Div => divide(a, b),
        Operator::Mod => modulo(a, b),
        Operator::Eq => Value::Bool(a == b),
        Operator::Ne => Value::Bool(a != b),
        Operator::Gt => Value::Bool(compare(a, b) == Some(Ordering::Greater)),
        Operator::Ge => Value::Bool(matches!(
            compare(a, b),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        Operator::Lt => Value::Bool(compare(a, b) == Some(Ordering::Less)),
        Operator::Le => Value::Bool(matches!(
            compare(a, b),
            Some(Ordering::Less | Ordering::Equal)
        )),
        Operator::And => Value::Bool(a.is_truthy() && b.is_truthy()),
        Operator::Or => Value::Bool(a.is_truthy() || b.is_truthy()),
        Operator::Neg | Operator::Pos => unary(op, a),
    }
}

fn add(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::String(_), _) | (_, Value::String(_)) => {
            Value::String(a.render_to_string() + &b.render_to_string())
        }
        (Value::List(x), Value::List(y)) => Value::List(x.iter().chain(y).cloned().collect()),
        _ => arith(a, b, i64::checked_add, |x, y| x + y),
    }
}

/// Integer arithmetic that falls back to floats on overflow or mixed
/// operands.
fn arith(
    a: &Value,
    b: &Value,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> Value {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        if let Some(n) = int(*x, *y) {
            return Value::Int(n);
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Value::Float(float(x, y)),
        _ => Value::Null,
    }
}

fn divide(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => Value::Null,
        (Value::Int(x), Value::Int(y)) if x.checked_rem(*y) == Some(0) => {
            x.checked_div(*y).map_or(Value::Null, Value::Int)
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(_), Some(y)) if y == 0.0 => Value::Null,
            (Some(x), Some(y)) => Value::Float(x / y),
            _ => Value::Null,
        },
    }
}

fn modulo(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => Value::Null,
        (Value::Int(x), Value::Int(y)) => x.checked_rem(*y).map_or(Value::Int(0), Value::Int),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(_), Some(y)) if y == 0.0 => Value::Null,
            (Some(x), Some(y)) => Value::Float(x % y),
            _ => Value::Null,
        },
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}
