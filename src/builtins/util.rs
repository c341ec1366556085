// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::ensure_args_count;
use crate::builtins::{BuiltinCtx, BuiltinFcn};
use crate::lexer::Span;
use crate::number::Number;
use crate::value::Value;

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::Result;

pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("$if", (cond, 3));
    m.insert("$default", (default, 2));
    m.insert("$coalesce", (coalesce, 1));
    m.insert("$type", (type_of, 1));
    m.insert("$isNull", (is_null, 1));
    m.insert("$isNumber", (is_number, 1));
    m.insert("$isString", (is_string, 1));
    m.insert("$isBool", (is_bool, 1));
    m.insert("$isArray", (is_array, 1));
    m.insert("$toNumber", (to_number, 1));
    m.insert("$toString", (to_string, 1));
    m.insert("$toBool", (to_bool, 1));
}

fn cond(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$if", args, 3)?;
    if args[0].is_truthy() {
        Ok(args[1].clone())
    } else {
        Ok(args[2].clone())
    }
}

fn default(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$default", args, 2)?;
    if args[0].is_null() || args[0].is_undefined() {
        Ok(args[1].clone())
    } else {
        Ok(args[0].clone())
    }
}

/// First argument that is neither null nor undefined.
fn coalesce(_span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    for arg in args {
        if !arg.is_null() && !arg.is_undefined() {
            return Ok(arg.clone());
        }
    }
    Ok(Value::Null)
}

fn type_of(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$type", args, 1)?;
    Ok(Value::String(args[0].type_name().into()))
}

fn is_null(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$isNull", args, 1)?;
    Ok(Value::Bool(args[0].is_null() || args[0].is_undefined()))
}

fn is_number(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$isNumber", args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Number(_))))
}

fn is_string(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$isString", args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::String(_))))
}

fn is_bool(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$isBool", args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Bool(_))))
}

fn is_array(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$isArray", args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Array(_))))
}

fn to_number(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$toNumber", args, 1)?;
    Ok(match &args[0] {
        Value::Number(n) => Value::Number(n.clone()),
        Value::Bool(b) => Value::from(u64::from(*b)),
        Value::Quantity(q) => Value::Number(q.magnitude.clone()),
        Value::String(s) => match Number::from_str(s.trim()) {
            Ok(n) => Value::Number(n),
            _ => Value::Undefined,
        },
        _ => Value::Undefined,
    })
}

fn to_string(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$toString", args, 1)?;
    Ok(Value::String(args[0].to_display_string().into()))
}

fn to_bool(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$toBool", args, 1)?;
    Ok(Value::Bool(args[0].is_truthy()))
}
