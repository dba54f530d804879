//! Python literal encoder
//!
//! Turns JSON values into Python source literals that evaluate back to an
//! equal value. Output is always pure ASCII.

use serde_json::{Number, Value};
use std::fmt::Write;
use thiserror::Error;

/// Deepest nesting accepted (CPython's parser gives up around 200)
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum LiteralError {
    #[error("value nests deeper than 64 levels")]
    TooDeep,
    #[error("number {0} has no Python literal form")]
    UnsupportedNumber(String),
}

/// Encode a value as a Python literal
pub fn encode(value: &Value) -> Result<String, LiteralError> {
    let mut out = String::new();
    encode_into(value, &mut out, 0)?;
    Ok(out)
}

/// Encode a positional argument list (always a Python list)
pub fn encode_args(args: &[Value]) -> Result<String, LiteralError> {
    let mut out = String::from("[");
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        encode_into(arg, &mut out, 1)?;
    }
    out.push(']');
    Ok(out)
}

fn encode_into(value: &Value, out: &mut String, depth: usize) -> Result<(), LiteralError> {
    if depth > MAX_DEPTH {
        return Err(LiteralError::TooDeep);
    }

    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => push_number(n, out)?,
        Value::String(s) => push_str_literal(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                encode_into(item, out, depth + 1)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                push_str_literal(key, out);
                out.push_str(": ");
                encode_into(item, out, depth + 1)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn push_number(n: &Number, out: &mut String) -> Result<(), LiteralError> {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{}", i);
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        let _ = write!(out, "{}", u);
        return Ok(());
    }
    match n.as_f64() {
        Some(f) if f.is_finite() => {
            // Debug is the shortest representation that parses back to the same f64
            let repr = format!("{:?}", f);
            out.push_str(&repr);
            if !repr.contains(['.', 'e', 'E']) {
                out.push_str(".0");
            }
            Ok(())
        }
        _ => Err(LiteralError::UnsupportedNumber(n.to_string())),
    }
}

fn push_str_literal(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c if c.is_ascii() => out.push(c),
            c if (c as u32) <= 0xffff => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => {
                let _ = write!(out, "\\U{:08x}", c as u32);
            }
        }
    }
    out.push('"');
}
