// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_args_range, ensure_numeric, ensure_string};
use crate::builtins::{BuiltinCtx, BuiltinFcn};
use crate::lexer::Span;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::{bail, Result};

pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("$lower", (lower, 1));
    m.insert("$upper", (upper, 1));
    m.insert("$trim", (trim, 1));
    m.insert("$len", (len, 1));
    m.insert("$substr", (substr, 2));
    m.insert("$replace", (replace, 3));
    m.insert("$split", (split, 2));
    m.insert("$join", (join, 2));
    m.insert("$startsWith", (starts_with, 2));
    m.insert("$endsWith", (ends_with, 2));
    m.insert("$contains", (contains, 2));
    m.insert("$padStart", (pad_start, 2));
    m.insert("$padEnd", (pad_end, 2));
}

fn lower(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$lower", args, 1)?;
    let s = ensure_string("$lower", span, &args[0])?;
    Ok(Value::String(s.to_lowercase().into()))
}

fn upper(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$upper", args, 1)?;
    let s = ensure_string("$upper", span, &args[0])?;
    Ok(Value::String(s.to_uppercase().into()))
}

fn trim(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$trim", args, 1)?;
    let s = ensure_string("$trim", span, &args[0])?;
    Ok(Value::String(s.trim().into()))
}

fn len(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$len", args, 1)?;
    match &args[0] {
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(a) => Ok(Value::from(a.len())),
        v => bail!(span.error(&format!("`$len` expects string or array. Got `{v}`"))),
    }
}

// Character based, like the rest of the string builtins.
fn substr(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_range(span, "$substr", args, 2, 3)?;
    let s = ensure_string("$substr", span, &args[0])?;
    let start = match ensure_numeric("$substr", span, &args[1])?.as_u64() {
        Some(n) => n as usize,
        _ => bail!(span.error("`$substr` expects a non-negative start")),
    };
    let chars: Vec<char> = s.chars().collect();
    if start >= chars.len() {
        return Ok(Value::String("".into()));
    }
    let end = if args.len() == 3 {
        let n = match ensure_numeric("$substr", span, &args[2])?.as_u64() {
            Some(n) => n as usize,
            _ => bail!(span.error("`$substr` expects a non-negative length")),
        };
        (start + n).min(chars.len())
    } else {
        chars.len()
    };
    Ok(Value::String(chars[start..end].iter().collect::<String>().into()))
}

fn replace(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$replace", args, 3)?;
    let s = ensure_string("$replace", span, &args[0])?;
    let find = ensure_string("$replace", span, &args[1])?;
    let repl = ensure_string("$replace", span, &args[2])?;
    Ok(Value::String(s.replace(find.as_ref(), &repl).into()))
}

fn split(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$split", args, 2)?;
    let s = ensure_string("$split", span, &args[0])?;
    let sep = ensure_string("$split", span, &args[1])?;
    let parts: Vec<Value> = s
        .split(sep.as_ref())
        .map(|p| Value::String(p.into()))
        .collect();
    Ok(Value::from(parts))
}

fn join(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$join", args, 2)?;
    let arr = match &args[0] {
        Value::Array(a) => a.clone(),
        v => bail!(span.error(&format!("`$join` expects array argument. Got `{v}`"))),
    };
    let sep = ensure_string("$join", span, &args[1])?;
    let parts: Vec<String> = arr.iter().map(Value::to_display_string).collect();
    Ok(Value::String(parts.join(&sep).into()))
}

fn starts_with(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$startsWith", args, 2)?;
    let s = ensure_string("$startsWith", span, &args[0])?;
    let prefix = ensure_string("$startsWith", span, &args[1])?;
    Ok(Value::Bool(s.starts_with(prefix.as_ref())))
}

fn ends_with(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$endsWith", args, 2)?;
    let s = ensure_string("$endsWith", span, &args[0])?;
    let suffix = ensure_string("$endsWith", span, &args[1])?;
    Ok(Value::Bool(s.ends_with(suffix.as_ref())))
}

fn contains(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$contains", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::String(s), Value::String(needle)) => {
            Ok(Value::Bool(s.contains(needle.as_ref())))
        }
        (Value::Array(a), needle) => Ok(Value::Bool(a.iter().any(|v| v == needle))),
        (v, _) => bail!(span.error(&format!("`$contains` expects string or array. Got `{v}`"))),
    }
}

fn pad(
    fcn: &'static str,
    span: &Span,
    args: &[Value],
    at_start: bool,
) -> Result<Value> {
    ensure_args_range(span, fcn, args, 2, 3)?;
    let s = ensure_string(fcn, span, &args[0])?;
    let width = match ensure_numeric(fcn, span, &args[1])?.as_u64() {
        Some(n) => n as usize,
        _ => bail!(span.error(&format!("`{fcn}` expects a non-negative width"))),
    };
    let fill = if args.len() == 3 {
        let f = ensure_string(fcn, span, &args[2])?;
        match f.chars().next() {
            Some(c) => c,
            _ => ' ',
        }
    } else {
        ' '
    };

    let len = s.chars().count();
    if len >= width {
        return Ok(Value::String(s));
    }
    let padding: String = std::iter::repeat(fill).take(width - len).collect();
    let out = if at_start {
        format!("{padding}{s}")
    } else {
        format!("{s}{padding}")
    };
    Ok(Value::String(out.into()))
}

fn pad_start(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    pad("$padStart", span, args, true)
}

fn pad_end(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    pad("$padEnd", span, args, false)
}
