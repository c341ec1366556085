// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_args_range, ensure_array, ensure_numeric};
use crate::builtins::{BuiltinCtx, BuiltinFcn};
use crate::lexer::Span;
use crate::number::Number;
use crate::units::Quantity;
use crate::value::Value;

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{bail, Result};

pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("$first", (first, 1));
    m.insert("$last", (last, 1));
    m.insert("$at", (at, 2));
    m.insert("$slice", (slice, 2));
    m.insert("$reverse", (reverse, 1));
    m.insert("$sort", (sort, 1));
    m.insert("$unique", (unique, 1));
    m.insert("$flatten", (flatten, 1));
    m.insert("$count", (count, 1));
    m.insert("$sum", (sum, 1));
    m.insert("$avg", (avg, 1));
    m.insert("$min", (min, 1));
    m.insert("$max", (max, 1));
}

fn first(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$first", args, 1)?;
    let a = ensure_array("$first", span, &args[0])?;
    Ok(a.first().cloned().unwrap_or(Value::Undefined))
}

fn last(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$last", args, 1)?;
    let a = ensure_array("$last", span, &args[0])?;
    Ok(a.last().cloned().unwrap_or(Value::Undefined))
}

fn at(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$at", args, 2)?;
    let a = ensure_array("$at", span, &args[0])?;
    match ensure_numeric("$at", span, &args[1])?.as_u64() {
        Some(i) if (i as usize) < a.len() => Ok(a[i as usize].clone()),
        _ => Ok(Value::Undefined),
    }
}

fn slice(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_range(span, "$slice", args, 2, 3)?;
    let a = ensure_array("$slice", span, &args[0])?;
    let start = match ensure_numeric("$slice", span, &args[1])?.as_u64() {
        Some(n) => (n as usize).min(a.len()),
        _ => bail!(span.error("`$slice` expects a non-negative start")),
    };
    let end = if args.len() == 3 {
        match ensure_numeric("$slice", span, &args[2])?.as_u64() {
            Some(n) => (n as usize).clamp(start, a.len()),
            _ => bail!(span.error("`$slice` expects a non-negative end")),
        }
    } else {
        a.len()
    };
    Ok(Value::from(a[start..end].to_vec()))
}

fn reverse(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$reverse", args, 1)?;
    let a = ensure_array("$reverse", span, &args[0])?;
    let mut out = a.as_ref().clone();
    out.reverse();
    Ok(Value::from(out))
}

fn sort(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$sort", args, 1)?;
    let a = ensure_array("$sort", span, &args[0])?;
    let mut out = a.as_ref().clone();
    out.sort();
    Ok(Value::from(out))
}

// Preserves first occurrence order.
fn unique(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$unique", args, 1)?;
    let a = ensure_array("$unique", span, &args[0])?;
    let mut seen = std::collections::BTreeSet::new();
    let mut out = vec![];
    for v in a.iter() {
        if seen.insert(v.clone()) {
            out.push(v.clone());
        }
    }
    Ok(Value::from(out))
}

// One level deep.
fn flatten(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$flatten", args, 1)?;
    let a = ensure_array("$flatten", span, &args[0])?;
    let mut out = vec![];
    for v in a.iter() {
        match v {
            Value::Array(inner) => out.extend(inner.iter().cloned()),
            _ => out.push(v.clone()),
        }
    }
    Ok(Value::from(out))
}

fn count(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$count", args, 1)?;
    let a = ensure_array("$count", span, &args[0])?;
    Ok(Value::from(a.len()))
}

enum Folded {
    Num(Number),
    Quant(Quantity),
}

/// Numeric view of an aggregate element. Numeric strings coerce so
/// that values read back from triples can be aggregated.
fn fold_operand(v: &Value) -> Option<Folded> {
    match v {
        Value::Number(n) => Some(Folded::Num(n.clone())),
        Value::Quantity(q) => Some(Folded::Quant(q.as_ref().clone())),
        Value::String(s) => Number::from_str(s.trim()).ok().map(Folded::Num),
        _ => None,
    }
}

fn numeric_elements(fcn: &str, span: &Span, v: &Value) -> Result<Vec<Folded>> {
    let a = match v {
        Value::Array(a) => a.clone(),
        _ => bail!(span.error(&format!("`{fcn}` expects array argument. Got `{v}`"))),
    };
    let mut out = vec![];
    for item in a.iter() {
        if item.is_null() || item.is_undefined() {
            continue;
        }
        match fold_operand(item) {
            Some(f) => out.push(f),
            _ => bail!(span.error(&format!("`{fcn}` expects numeric elements. Got `{item}`"))),
        }
    }
    Ok(out)
}

fn fold_sum(fcn: &str, span: &Span, items: Vec<Folded>) -> Result<Value> {
    let mut iter = items.into_iter();
    let mut acc = match iter.next() {
        Some(f) => f,
        _ => return Ok(Value::from(0u64)),
    };
    for item in iter {
        acc = match (acc, item) {
            (Folded::Num(a), Folded::Num(b)) => Folded::Num(a.add(&b)?),
            (Folded::Quant(a), Folded::Quant(b)) => Folded::Quant(a.add(&b)?),
            _ => bail!(span.error(&format!("`{fcn}` cannot mix quantities with numbers"))),
        };
    }
    Ok(match acc {
        Folded::Num(n) => Value::Number(n),
        Folded::Quant(q) => Value::from(q),
    })
}

fn sum(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$sum", args, 1)?;
    let items = numeric_elements("$sum", span, &args[0])?;
    fold_sum("$sum", span, items)
}

fn avg(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$avg", args, 1)?;
    let items = numeric_elements("$avg", span, &args[0])?;
    let n = items.len();
    if n == 0 {
        return Ok(Value::Undefined);
    }
    let total = fold_sum("$avg", span, items)?;
    let divisor = Number::from(n);
    Ok(match total {
        Value::Number(t) => Value::Number(t.divide(&divisor)?),
        Value::Quantity(q) => Value::from(q.scale_div(&divisor)?),
        v => v,
    })
}

fn extreme(fcn: &'static str, span: &Span, args: &[Value], want_max: bool) -> Result<Value> {
    ensure_args_count(span, fcn, args, 1)?;
    let a = ensure_array(fcn, span, &args[0])?;
    let mut best: Option<Value> = None;
    for v in a.iter() {
        if v.is_null() || v.is_undefined() {
            continue;
        }
        best = Some(match best {
            None => v.clone(),
            Some(b) => {
                let take = if want_max { v > &b } else { v < &b };
                if take {
                    v.clone()
                } else {
                    b
                }
            }
        });
    }
    Ok(best.unwrap_or(Value::Undefined))
}

fn min(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    extreme("$min", span, args, false)
}

fn max(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    extreme("$max", span, args, true)
}
