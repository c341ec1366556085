// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_range, ensure_numeric, ensure_string};
use crate::builtins::{BuiltinCtx, BuiltinFcn};
use crate::lexer::Span;
use crate::number::Number;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::{bail, Result};

// Formatting is fixed to `en`-style separators regardless of the
// locale argument so that output stays deterministic across hosts.
pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("$currency", (currency, 1));
    m.insert("$number", (number, 1));
    m.insert("$percent", (percent, 1));
    m.insert("$compact", (compact, 1));
}

/// Exactly `dp` fraction digits, rounded half-to-even.
pub fn fixed_dp(span: &Span, n: &Number, dp: u32) -> Result<String> {
    let pow10 = match 10i128.checked_pow(dp) {
        Some(p) => p,
        _ => bail!(span.error("too many decimal places")),
    };
    let scaled = n.mul(&Number::from(pow10))?.round();
    let i = match scaled.as_i128() {
        Some(i) => i,
        _ => return Ok(n.to_canonical_string()),
    };
    let sign = if i < 0 { "-" } else { "" };
    let mag = i.unsigned_abs();
    if dp == 0 {
        return Ok(format!("{sign}{mag}"));
    }
    let (q, r) = (mag / pow10.unsigned_abs(), mag % pow10.unsigned_abs());
    Ok(format!("{sign}{q}.{r:0width$}", width = dp as usize))
}

fn group_thousands(digits: &str) -> String {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(d) => ("-", d),
        _ => ("", digits),
    };
    let mut out = String::new();
    let len = digits.len();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    format!("{sign}{out}")
}

fn grouped_fixed(span: &Span, n: &Number, dp: u32) -> Result<String> {
    let fixed = fixed_dp(span, n, dp)?;
    match fixed.split_once('.') {
        Some((int_part, frac)) => Ok(format!("{}.{frac}", group_thousands(int_part))),
        _ => Ok(group_thousands(&fixed)),
    }
}

fn numeric_arg(fcn: &'static str, span: &Span, v: &Value) -> Result<(Number, Option<String>)> {
    match v {
        Value::Quantity(q) if q.unit.is_currency() => {
            Ok((q.magnitude.clone(), Some(q.unit.name.to_string())))
        }
        Value::Quantity(q) => Ok((q.magnitude.clone(), None)),
        _ => Ok((ensure_numeric(fcn, span, v)?, None)),
    }
}

fn currency_symbol(code: &str) -> Option<&'static str> {
    match code {
        "USD" | "CAD" | "AUD" => Some("$"),
        "EUR" => Some("\u{20AC}"),
        "GBP" => Some("\u{A3}"),
        "JPY" => Some("\u{A5}"),
        _ => None,
    }
}

fn currency(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_range(span, "$currency", args, 1, 3)?;
    let (n, quantity_code) = numeric_arg("$currency", span, &args[0])?;
    let code = if args.len() >= 2 {
        ensure_string("$currency", span, &args[1])?.to_string()
    } else {
        quantity_code.unwrap_or_else(|| "USD".to_string())
    };
    let dp = if code == "JPY" { 0 } else { 2 };

    let negative = n < Number::zero();
    let body = grouped_fixed(span, &n.abs(), dp)?;
    let sign = if negative { "-" } else { "" };
    Ok(Value::String(match currency_symbol(&code) {
        Some(sym) => format!("{sign}{sym}{body}").into(),
        _ => format!("{sign}{code} {body}").into(),
    }))
}

fn number(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_range(span, "$number", args, 1, 3)?;
    let (n, _) = numeric_arg("$number", span, &args[0])?;
    if args.len() >= 2 {
        let dp = match ensure_numeric("$number", span, &args[1])?.as_u64() {
            Some(dp) if dp <= 20 => dp as u32,
            _ => bail!(span.error("`$number` expects 0..=20 decimal places")),
        };
        return Ok(Value::String(grouped_fixed(span, &n, dp)?.into()));
    }
    let canonical = n.to_canonical_string();
    Ok(Value::String(
        match canonical.split_once('.') {
            Some((int_part, frac)) => format!("{}.{frac}", group_thousands(int_part)),
            _ => group_thousands(&canonical),
        }
        .into(),
    ))
}

// `$percent(0.15)` renders `15%`.
fn percent(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_range(span, "$percent", args, 1, 3)?;
    let (n, _) = numeric_arg("$percent", span, &args[0])?;
    let dp = if args.len() >= 2 {
        match ensure_numeric("$percent", span, &args[1])?.as_u64() {
            Some(dp) if dp <= 20 => dp as u32,
            _ => bail!(span.error("`$percent` expects 0..=20 decimal places")),
        }
    } else {
        0
    };
    let scaled = n.mul(&Number::from(100i64))?;
    Ok(Value::String(format!("{}%", fixed_dp(span, &scaled, dp)?).into()))
}

fn compact(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_range(span, "$compact", args, 1, 2)?;
    let (n, _) = numeric_arg("$compact", span, &args[0])?;
    let abs = match n.abs().as_f64() {
        Some(f) => f,
        _ => bail!(span.error("`$compact` argument out of range")),
    };

    let (divisor, suffix) = if abs >= 1e12 {
        (1_000_000_000_000i64, "T")
    } else if abs >= 1e9 {
        (1_000_000_000, "B")
    } else if abs >= 1e6 {
        (1_000_000, "M")
    } else if abs >= 1e3 {
        (1_000, "K")
    } else {
        return Ok(Value::String(n.to_canonical_string().into()));
    };

    let scaled = n.divide(&Number::from(divisor))?;
    let mut body = fixed_dp(span, &scaled, 1)?;
    if let Some(trimmed) = body.strip_suffix(".0") {
        body = trimmed.to_string();
    }
    Ok(Value::String(format!("{body}{suffix}").into()))
}
