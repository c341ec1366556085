// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod arrays;
mod convert;
mod format;
mod math;
mod strings;
mod time;
mod util;
pub mod utils;

use crate::lexer::Span;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;

/// Evaluation-local context visible to builtins. `now` is the host
/// supplied clock so `$now()` stays reproducible.
#[derive(Debug, Clone)]
pub struct BuiltinCtx {
    pub now: DateTime<Utc>,
}

pub type BuiltinFcn = (fn(&Span, &[Value], &BuiltinCtx) -> Result<Value>, u8);

#[rustfmt::skip]
lazy_static! {
    pub static ref BUILTINS: HashMap<&'static str, BuiltinFcn> = {
	let mut m: HashMap<&'static str, BuiltinFcn> = HashMap::new();

	math::register(&mut m);
	strings::register(&mut m);
	format::register(&mut m);
	convert::register(&mut m);
	time::register(&mut m);
	util::register(&mut m);
	arrays::register(&mut m);
	m
    };
}
