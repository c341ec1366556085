// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_args_range, ensure_numeric};
use crate::builtins::{BuiltinCtx, BuiltinFcn};
use crate::lexer::Span;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::{bail, Result};
use rand::{thread_rng, Rng};

pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("$sqrt", (sqrt, 1));
    m.insert("$abs", (abs, 1));
    m.insert("$round", (round, 1));
    m.insert("$floor", (floor, 1));
    m.insert("$ceil", (ceil, 1));
    m.insert("$pow", (pow, 2));
    m.insert("$log", (log, 1));
    m.insert("$log10", (log10, 1));
    m.insert("$sin", (sin, 1));
    m.insert("$cos", (cos, 1));
    m.insert("$tan", (tan, 1));
    m.insert("$pi", (pi, 0));
    m.insert("$e", (e, 0));
    m.insert("$random", (random, 0));
}

fn float_arg(fcn: &'static str, span: &Span, v: &Value) -> Result<f64> {
    match ensure_numeric(fcn, span, v)?.as_f64() {
        Some(f) => Ok(f),
        _ => bail!(span.error(&format!("`{fcn}` argument out of range"))),
    }
}

fn sqrt(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$sqrt", args, 1)?;
    let x = float_arg("$sqrt", span, &args[0])?;
    if x < 0.0 {
        bail!(span.error("`$sqrt` expects a non-negative argument"));
    }
    Ok(Value::from(x.sqrt()))
}

fn abs(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$abs", args, 1)?;
    Ok(Value::from(ensure_numeric("$abs", span, &args[0])?.abs()))
}

// Banker's rounding; the optional second argument selects a number of
// decimal places.
fn round(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_range(span, "$round", args, 1, 2)?;
    let n = ensure_numeric("$round", span, &args[0])?;
    if args.len() == 1 {
        return Ok(Value::from(n.round()));
    }
    let dp = match ensure_numeric("$round", span, &args[1])?.as_u64() {
        Some(dp) if dp <= 20 => dp as u32,
        _ => bail!(span.error("`$round` expects 0..=20 decimal places")),
    };
    Ok(Value::from(n.round_dp(dp)?))
}

fn floor(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$floor", args, 1)?;
    Ok(Value::from(ensure_numeric("$floor", span, &args[0])?.floor()))
}

fn ceil(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$ceil", args, 1)?;
    Ok(Value::from(ensure_numeric("$ceil", span, &args[0])?.ceil()))
}

fn pow(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$pow", args, 2)?;
    let x = ensure_numeric("$pow", span, &args[0])?;
    let y = ensure_numeric("$pow", span, &args[1])?;
    Ok(Value::from(x.pow(&y)?))
}

fn log(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$log", args, 1)?;
    let x = float_arg("$log", span, &args[0])?;
    if x <= 0.0 {
        bail!(span.error("`$log` expects a positive argument"));
    }
    Ok(Value::from(x.ln()))
}

fn log10(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$log10", args, 1)?;
    let x = float_arg("$log10", span, &args[0])?;
    if x <= 0.0 {
        bail!(span.error("`$log10` expects a positive argument"));
    }
    Ok(Value::from(x.log10()))
}

fn sin(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$sin", args, 1)?;
    Ok(Value::from(float_arg("$sin", span, &args[0])?.sin()))
}

fn cos(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$cos", args, 1)?;
    Ok(Value::from(float_arg("$cos", span, &args[0])?.cos()))
}

fn tan(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$tan", args, 1)?;
    Ok(Value::from(float_arg("$tan", span, &args[0])?.tan()))
}

fn pi(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$pi", args, 0)?;
    Ok(Value::from(std::f64::consts::PI))
}

fn e(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$e", args, 0)?;
    Ok(Value::from(std::f64::consts::E))
}

// Breaks signature determinism by construction; documents that sign
// their results should not call it.
fn random(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$random", args, 0)?;
    let mut rng = thread_rng();
    let v: f64 = rng.gen_range(0.0..1.0);
    Ok(Value::from(v))
}
