// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::rc::Rc;

use serde::Serialize;

/// Closed set of diagnostic codes.
pub mod codes {
    pub const EXPR_ERR: &str = "LDC_EXPR_ERR";
    pub const CONSTRAINT_FAILED: &str = "LDC_CONSTRAINT_FAILED";
    pub const QUERY_ERR: &str = "LDC_QUERY_ERR";
    pub const BAD_REF: &str = "LDC_BAD_REF";
    pub const BAD_ROLLUP: &str = "LDC_BAD_ROLLUP";
    pub const UNIT_MISMATCH: &str = "LDC_UNIT_MISMATCH";
    pub const DIV_BY_ZERO: &str = "LDC_DIV_BY_ZERO";
    pub const FIXPOINT_LIMIT: &str = "LDC_FIXPOINT_LIMIT";
    pub const TIMEOUT: &str = "timeout";
    pub const SCHEMA_ERROR: &str = "schema_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A document-local failure. Evaluation always proceeds past these;
/// the offending property is simply absent from the output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Rc<str>>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Diagnostic {
    pub fn error(code: &'static str, path: Option<Rc<str>>, message: Option<String>) -> Diagnostic {
        Diagnostic {
            code,
            path,
            severity: Severity::Error,
            message,
        }
    }

    pub fn warning(
        code: &'static str,
        path: Option<Rc<str>>,
        message: Option<String>,
    ) -> Diagnostic {
        Diagnostic {
            code,
            path,
            severity: Severity::Warning,
            message,
        }
    }
}
