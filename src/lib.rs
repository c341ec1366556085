// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Unsafe code should not be used.
// Hard to reason about correctness, and maintainability.
#![forbid(unsafe_code)]
// Ensure that all lint names are valid.
#![deny(unknown_lints)]
#![deny(
    clippy::panic,
    clippy::unreachable,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,
    clippy::expect_used,
    deprecated,
    future_incompatible,
    keyword_idents,
    nonstandard_style,
    noop_method_call,
    unreachable_code,
    unused_extern_crates,
    unused_import_braces
)]
#![warn(clippy::match_like_matches_macro, clippy::needless_continue)]
// Use README.md as crate documentation.
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

mod ast;
mod builtins;
mod canon;
mod compose;
mod diagnostics;
mod document;
mod evaluator;
mod indexer;
mod interpreter;
mod lexer;
mod number;
mod parser;
mod query;
mod scheduler;
mod sign;
mod store;
mod units;
mod value;

pub use ast::{BinOp, Expr, UnaryOp};
pub use compose::LoaderFn;
pub use diagnostics::{codes, Diagnostic, Severity};
pub use document::{ContextMap, Document};
pub use evaluator::{EvalOptions, EvalResult, Evaluator, ProvenanceOp};
pub use interpreter::Interpreter;
pub use lexer::{Lexer, Source, Span, Token, TokenKind};
pub use number::Number;
pub use parser::{parse_expression, Parser};
pub use query::{QueryAst, QueryOutcome};
pub use sign::{Signer, SKEW_WINDOW_MS};
pub use store::{Triple, TripleStore};
pub use units::{Quantity, Unit, UnitRegistry};
pub use value::{FuncValue, Value};
