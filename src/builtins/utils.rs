// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::Span;
use crate::number::Number;
use crate::value::Value;

use std::rc::Rc;

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

pub fn ensure_args_count(
    span: &Span,
    fcn: &'static str,
    args: &[Value],
    expected: usize,
) -> Result<()> {
    if args.len() != expected {
        if expected == 1 {
            bail!(span.error(&format!("`{fcn}` expects 1 argument")))
        }
        bail!(span.error(&format!("`{fcn}` expects {expected} arguments")))
    }
    Ok(())
}

pub fn ensure_args_range(
    span: &Span,
    fcn: &'static str,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<()> {
    if args.len() < min || args.len() > max {
        bail!(span.error(&format!(
            "`{fcn}` expects between {min} and {max} arguments"
        )))
    }
    Ok(())
}

pub fn ensure_numeric(fcn: &str, span: &Span, v: &Value) -> Result<Number> {
    match v {
        Value::Number(n) => Ok(n.clone()),
        _ => bail!(span.error(&format!(
            "`{fcn}` expects numeric argument. Got `{v}` instead"
        ))),
    }
}

pub fn ensure_string(fcn: &str, span: &Span, v: &Value) -> Result<Rc<str>> {
    match v {
        Value::String(s) => Ok(s.clone()),
        _ => bail!(span.error(&format!(
            "`{fcn}` expects string argument. Got `{v}` instead"
        ))),
    }
}

pub fn ensure_array(fcn: &str, span: &Span, v: &Value) -> Result<Rc<Vec<Value>>> {
    match v {
        Value::Array(a) => Ok(a.clone()),
        _ => bail!(span.error(&format!(
            "`{fcn}` expects array argument. Got `{v}` instead"
        ))),
    }
}

/// Timestamps arrive as timestamp values, ISO 8601 strings, date-only
/// strings, or epoch milliseconds.
pub fn ensure_timestamp(fcn: &str, span: &Span, v: &Value) -> Result<DateTime<Utc>> {
    match v {
        Value::Timestamp(t) => Ok(*t),
        Value::String(s) => {
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Ok(t.with_timezone(&Utc));
            }
            if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                    return Ok(Utc.from_utc_datetime(&dt));
                }
            }
            bail!(span.error(&format!("`{fcn}` could not parse `{s}` as a date")))
        }
        Value::Number(n) => match n.as_i64() {
            Some(ms) => match Utc.timestamp_millis_opt(ms).single() {
                Some(t) => Ok(t),
                _ => bail!(span.error(&format!("`{fcn}` epoch out of range"))),
            },
            _ => bail!(span.error(&format!("`{fcn}` expects integral epoch milliseconds"))),
        },
        _ => bail!(span.error(&format!(
            "`{fcn}` expects a date argument. Got `{v}` instead"
        ))),
    }
}
