//! Built-in functions, and lookup of functions by name.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::{Env, Error, Value};

/// Call `name` with `args`. User functions registered on the [`Env`] take
/// precedence over built-ins.
pub fn call(env: &Env, name: &str, args: &[Value]) -> Result<Value, Error> {
    if let Some(f) = env.function(name) {
        return f(args);
    }
    match name {
        "str" => Ok(concat(args)),
        "len" => Ok(len(args)),
        "range" => range(args),
        "time" => time(args),
        _ => Err(Error::runtime(format!("unknown function `{name}`"))),
    }
}

/// Concatenate the rendered arguments, skipping falsy ones.
fn concat(args: &[Value]) -> Value {
    Value::String(
        args.iter()
            .filter(|v| v.is_truthy())
            .map(Value::render_to_string)
            .collect(),
    )
}

fn len(args: &[Value]) -> Value {
    let n = match args.first() {
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::List(l)) => l.len(),
        Some(Value::Map(m)) => m.len(),
        _ => 0,
    };
    Value::Int(n as i64)
}

fn int_arg(args: &[Value], i: usize, what: &str) -> Result<i64, Error> {
    match args.get(i) {
        Some(Value::Int(n)) => Ok(*n),
        Some(Value::Float(f)) if f.fract() == 0.0 => Ok(*f as i64),
        Some(other) => Err(Error::runtime(format!(
            "{what} must be an integer, got {}",
            other.type_name()
        ))),
        None => Err(Error::runtime(format!("{what} is required"))),
    }
}

/// `range(stop)` or `range(start, stop[, step])`.
fn range(args: &[Value]) -> Result<Value, Error> {
    let (start, stop, step) = match args.len() {
        1 => (0, int_arg(args, 0, "range stop")?, 1),
        2 | 3 => (
            int_arg(args, 0, "range start")?,
            int_arg(args, 1, "range stop")?,
            if args.len() == 3 {
                int_arg(args, 2, "range step")?
            } else {
                1
            },
        ),
        n => {
            return Err(Error::runtime(format!(
                "range takes 1 to 3 arguments, got {n}"
            )));
        }
    };
    if step == 0 {
        return Err(Error::runtime("range step cannot be zero"));
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(Value::Int(i));
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(Value::List(out))
}

const DEFAULT_TIME_FORMAT: &str = "yyyy-MM-dd hh:mm:ss";

/// `time(ts_millis[, format])`, formatted in UTC.
fn time(args: &[Value]) -> Result<Value, Error> {
    let millis = int_arg(args, 0, "time stamp")?;
    let format = match args.get(1) {
        None | Some(Value::Null) => DEFAULT_TIME_FORMAT.to_owned(),
        Some(v) => v.render_to_string(),
    };
    let at = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::runtime(format!("time stamp {millis} is out of range")))?;
    Ok(Value::String(format_time(&at, &format)))
}

/// Replace runs of pattern letters. A run longer than one letter is
/// zero-padded to at least two digits; years keep the last `n` digits of
/// the full year.
fn format_time(at: &DateTime<Utc>, format: &str) -> String {
    let mut out = String::with_capacity(format.len());
    let chars: Vec<char> = format.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        let field = match c {
            'y' => {
                let year = at.year().to_string();
                let keep = year.len().saturating_sub(run.max(2).min(year.len()));
                Some(year[keep..].to_owned())
            }
            'M' => Some(pad(at.month(), run)),
            'd' => Some(pad(at.day(), run)),
            'h' => Some(pad(at.hour(), run)),
            'm' => Some(pad(at.minute(), run)),
            's' => Some(pad(at.second(), run)),
            'q' => Some(pad(at.month0() / 3 + 1, run)),
            'S' => Some(format!("{:0width$}", at.timestamp_subsec_millis(), width = run.min(3))),
            _ => None,
        };
        match field {
            Some(text) => out.push_str(&text),
            None => out.extend(&chars[i..i + run]),
        }
        i += run;
    }
    out
}

fn pad(n: u32, run: usize) -> String {
    if run > 1 {
        format!("{n:02}")
    } else {
        n.to_string()
    }
}
