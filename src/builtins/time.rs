// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_args_range, ensure_numeric, ensure_string, ensure_timestamp};
use crate::builtins::{BuiltinCtx, BuiltinFcn};
use crate::lexer::Span;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::{bail, Result};
use chrono::{Datelike, Days, Months, Timelike};

pub fn register(m: &mut HashMap<&'static str, BuiltinFcn>) {
    m.insert("$now", (now, 0));
    m.insert("$today", (today, 0));
    m.insert("$year", (year, 1));
    m.insert("$month", (month, 1));
    m.insert("$day", (day, 1));
    m.insert("$hour", (hour, 1));
    m.insert("$minute", (minute, 1));
    m.insert("$dayOfWeek", (day_of_week, 1));
    m.insert("$timestamp", (timestamp, 0));
    m.insert("$formatDate", (format_date, 1));
    m.insert("$daysBetween", (days_between, 2));
    m.insert("$addDays", (add_days, 2));
    m.insert("$addMonths", (add_months, 2));
}

fn now(span: &Span, args: &[Value], ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$now", args, 0)?;
    Ok(Value::Timestamp(ctx.now))
}

fn today(span: &Span, args: &[Value], ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$today", args, 0)?;
    match ctx.now.with_hour(0).and_then(|t| t.with_minute(0)).and_then(|t| t.with_second(0)).and_then(|t| t.with_nanosecond(0)) {
        Some(t) => Ok(Value::Timestamp(t)),
        _ => Ok(Value::Timestamp(ctx.now)),
    }
}

fn year(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$year", args, 1)?;
    let t = ensure_timestamp("$year", span, &args[0])?;
    Ok(Value::from(t.year() as i64))
}

// 1-indexed.
fn month(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$month", args, 1)?;
    let t = ensure_timestamp("$month", span, &args[0])?;
    Ok(Value::from(t.month() as u64))
}

fn day(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$day", args, 1)?;
    let t = ensure_timestamp("$day", span, &args[0])?;
    Ok(Value::from(t.day() as u64))
}

fn hour(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$hour", args, 1)?;
    let t = ensure_timestamp("$hour", span, &args[0])?;
    Ok(Value::from(t.hour() as u64))
}

fn minute(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$minute", args, 1)?;
    let t = ensure_timestamp("$minute", span, &args[0])?;
    Ok(Value::from(t.minute() as u64))
}

// 0 = Sunday.
fn day_of_week(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$dayOfWeek", args, 1)?;
    let t = ensure_timestamp("$dayOfWeek", span, &args[0])?;
    Ok(Value::from(t.weekday().num_days_from_sunday() as u64))
}

/// Epoch milliseconds of the argument, or of the evaluation clock.
fn timestamp(span: &Span, args: &[Value], ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_range(span, "$timestamp", args, 0, 1)?;
    let t = if args.is_empty() {
        ctx.now
    } else {
        ensure_timestamp("$timestamp", span, &args[0])?
    };
    Ok(Value::from(t.timestamp_millis()))
}

fn format_date(span: &Span, args: &[Value], ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_range(span, "$formatDate", args, 1, 3)?;
    let t = ensure_timestamp("$formatDate", span, &args[0])?;
    let fmt = if args.len() >= 2 {
        ensure_string("$formatDate", span, &args[1])?.to_string()
    } else {
        "default".to_string()
    };

    let out = match fmt.as_str() {
        "default" => t.format("%Y-%m-%d").to_string(),
        "iso" => t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "short" => t.format("%m/%d/%y").to_string(),
        "medium" => t.format("%b %-d, %Y").to_string(),
        "long" => t.format("%B %-d, %Y").to_string(),
        "full" => t.format("%A, %B %-d, %Y").to_string(),
        "time" => t.format("%H:%M:%S").to_string(),
        "relative" => {
            let days = (t.date_naive() - ctx.now.date_naive()).num_days();
            match days {
                0 => "today".to_string(),
                1 => "tomorrow".to_string(),
                -1 => "yesterday".to_string(),
                d if d > 0 => format!("in {d} days"),
                d => format!("{} days ago", -d),
            }
        }
        other => bail!(span.error(&format!("`$formatDate` unknown format `{other}`"))),
    };
    Ok(Value::String(out.into()))
}

fn days_between(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$daysBetween", args, 2)?;
    let a = ensure_timestamp("$daysBetween", span, &args[0])?;
    let b = ensure_timestamp("$daysBetween", span, &args[1])?;
    Ok(Value::from((b.date_naive() - a.date_naive()).num_days()))
}

fn add_days(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$addDays", args, 2)?;
    let t = ensure_timestamp("$addDays", span, &args[0])?;
    let n = match ensure_numeric("$addDays", span, &args[1])?.as_i64() {
        Some(n) => n,
        _ => bail!(span.error("`$addDays` expects an integral day count")),
    };
    let rhs = Days::new(n.unsigned_abs());
    let shifted = if n >= 0 {
        t.checked_add_days(rhs)
    } else {
        t.checked_sub_days(rhs)
    };
    match shifted {
        Some(t) => Ok(Value::Timestamp(t)),
        _ => Ok(Value::Undefined),
    }
}

fn add_months(span: &Span, args: &[Value], _ctx: &BuiltinCtx) -> Result<Value> {
    ensure_args_count(span, "$addMonths", args, 2)?;
    let t = ensure_timestamp("$addMonths", span, &args[0])?;
    let n = match ensure_numeric("$addMonths", span, &args[1])?.as_i64() {
        Some(n) => n,
        _ => bail!(span.error("`$addMonths` expects an integral month count")),
    };
    let months = match u32::try_from(n.unsigned_abs()) {
        Ok(m) => Months::new(m),
        _ => return Ok(Value::Undefined),
    };
    let shifted = if n >= 0 {
        t.checked_add_months(months)
    } else {
        t.checked_sub_months(months)
    };
    match shifted {
        Some(t) => Ok(Value::Timestamp(t)),
        _ => Ok(Value::Undefined),
    }
}
