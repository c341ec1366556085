// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Expr;
use crate::diagnostics::{codes, Diagnostic};
use crate::document::Document;
use crate::parser;
use crate::query::{QueryAst, RDF_TYPE};
use crate::store::Triple;
use crate::value::Value;

use std::collections::BTreeSet;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Expr,
    View,
    Constraint,
    Query,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Expr(Rc<Expr>),
    Query(Rc<QueryAst>),
}

/// One computation property of the document.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub iri: Rc<str>,
    pub plain_key: Rc<str>,
    pub kind: NodeKind,
    pub reads: BTreeSet<Rc<str>>,
    pub payload: Payload,
    pub stable: bool,
}

/// Indexing result: computation nodes, inert property values, seeded
/// triples and any classification diagnostics.
#[derive(Debug, Default)]
pub struct IndexOutput {
    pub nodes: Vec<DagNode>,
    pub initial: Vec<(Rc<str>, Rc<str>, Value)>,
    pub seeds: Vec<Triple>,
    pub diagnostics: Vec<Diagnostic>,
}

// Directive keys in precedence order. When a property carries more
// than one, the first wins and the ambiguity is surfaced.
const DIRECTIVE_KEYS: [&str; 4] = ["@expr", "@view", "@constraint", "@query"];

pub fn index_document(doc: &Document, working: &Value, seed_root_scalars: bool) -> IndexOutput {
    let mut out = IndexOutput::default();

    let raw = match doc.raw.as_object() {
        Some(m) => m,
        _ => return out,
    };
    let working_map = match working.as_object() {
        Ok(m) => m.clone(),
        _ => Default::default(),
    };

    seed_types(doc, raw, &mut out);

    // Walk in document order; serde_json preserves it.
    for key in raw.keys() {
        if key.starts_with('@') {
            continue;
        }
        let key_rc: Rc<str> = key.as_str().into();
        let iri = doc.context.expand(key);
        // The working copy carries composer materializations; fall back
        // to the raw document for everything else.
        let value = match working_map.get(key_rc.as_ref()) {
            Some(v) => v.clone(),
            _ => Value::from(&doc.raw[key.as_str()]),
        };

        match classify(&value, &iri, &mut out.diagnostics) {
            Classified::Directive(kind) => {
                build_node(doc, &key_rc, &iri, kind, &value, &mut out);
            }
            Classified::Inert => {
                out.initial.push((key_rc.clone(), iri.clone(), value.clone()));
                seed_inert(doc, &key_rc, &iri, &value, seed_root_scalars, &mut out.seeds);
            }
            Classified::Skip => (),
        }
    }

    // Queries run over the full derived store, so they read every name
    // the other nodes write.
    let writes: BTreeSet<Rc<str>> = out
        .nodes
        .iter()
        .filter(|n| n.kind != NodeKind::Query)
        .map(|n| n.plain_key.clone())
        .collect();
    for node in &mut out.nodes {
        if node.kind == NodeKind::Query {
            node.reads = writes.clone();
        }
    }

    out
}

enum Classified {
    Directive(NodeKind),
    Inert,
    // A cross-document directive the composer could not materialize;
    // it already carries a diagnostic.
    Skip,
}

fn classify(value: &Value, iri: &Rc<str>, diagnostics: &mut Vec<Diagnostic>) -> Classified {
    let map = match value {
        Value::Object(m) => m,
        _ => return Classified::Inert,
    };
    if map.contains_key("@ref") || map.contains_key("@rollup") {
        return Classified::Skip;
    }

    let present: Vec<&str> = DIRECTIVE_KEYS
        .iter()
        .copied()
        .filter(|k| map.contains_key(*k))
        .collect();
    if present.len() > 1 {
        diagnostics.push(Diagnostic::warning(
            codes::SCHEMA_ERROR,
            Some(iri.clone()),
            Some(format!(
                "property carries multiple directives ({}); `{}` wins",
                present.join(", "),
                present[0]
            )),
        ));
    }

    match present.first() {
        Some(&"@expr") => Classified::Directive(NodeKind::Expr),
        Some(&"@view") => Classified::Directive(NodeKind::View),
        Some(&"@constraint") => Classified::Directive(NodeKind::Constraint),
        Some(&"@query") => Classified::Directive(NodeKind::Query),
        _ => Classified::Inert,
    }
}

fn build_node(
    doc: &Document,
    plain_key: &Rc<str>,
    iri: &Rc<str>,
    kind: NodeKind,
    value: &Value,
    out: &mut IndexOutput,
) {
    let map = match value.as_object() {
        Ok(m) => m,
        _ => return,
    };

    let (payload, stable) = match kind {
        NodeKind::Expr | NodeKind::Constraint => {
            let key = if kind == NodeKind::Expr {
                "@expr"
            } else {
                "@constraint"
            };
            let text = match map.get(key) {
                Some(Value::String(s)) => s.clone(),
                _ => {
                    out.diagnostics.push(Diagnostic::error(
                        codes::SCHEMA_ERROR,
                        Some(iri.clone()),
                        Some(format!("`{key}` must be a string")),
                    ));
                    return;
                }
            };
            match parser::parse_expression(plain_key, &text) {
                Ok(ast) => (Payload::Expr(Rc::new(ast)), false),
                Err(e) => {
                    out.diagnostics.push(Diagnostic::error(
                        codes::EXPR_ERR,
                        Some(iri.clone()),
                        Some(e.to_string()),
                    ));
                    return;
                }
            }
        }
        NodeKind::View => {
            let view = match map.get("@view") {
                Some(Value::Object(v)) => v.clone(),
                _ => {
                    out.diagnostics.push(Diagnostic::error(
                        codes::SCHEMA_ERROR,
                        Some(iri.clone()),
                        Some("`@view` must be an object".to_string()),
                    ));
                    return;
                }
            };
            let text = match view.get("@expr") {
                Some(Value::String(s)) => s.clone(),
                _ => {
                    out.diagnostics.push(Diagnostic::error(
                        codes::SCHEMA_ERROR,
                        Some(iri.clone()),
                        Some("`@view` requires an `@expr` string".to_string()),
                    ));
                    return;
                }
            };
            let stable = matches!(view.get("@stable"), Some(Value::Bool(true)));
            match parser::parse_expression(plain_key, &text) {
                Ok(ast) => (Payload::Expr(Rc::new(ast)), stable),
                Err(e) => {
                    out.diagnostics.push(Diagnostic::error(
                        codes::EXPR_ERR,
                        Some(iri.clone()),
                        Some(e.to_string()),
                    ));
                    return;
                }
            }
        }
        NodeKind::Query => {
            let query = match map.get("@query") {
                Some(q) => q.clone(),
                _ => return,
            };
            match QueryAst::from_value(&query, &doc.context) {
                Ok(ast) => (Payload::Query(Rc::new(ast)), false),
                Err(e) => {
                    out.diagnostics.push(Diagnostic::error(
                        codes::QUERY_ERR,
                        Some(iri.clone()),
                        Some(e.to_string()),
                    ));
                    return;
                }
            }
        }
    };

    let reads = match &payload {
        Payload::Expr(ast) => ast.free_vars(),
        Payload::Query(_) => BTreeSet::new(),
    };

    out.nodes.push(DagNode {
        iri: iri.clone(),
        plain_key: plain_key.clone(),
        kind,
        reads,
        payload,
        stable,
    });
}

fn seed_types(doc: &Document, raw: &serde_json::Map<String, serde_json::Value>, out: &mut IndexOutput) {
    let mut add = |name: &str| {
        out.seeds.push(Triple::new(
            doc.subject.clone(),
            RDF_TYPE.into(),
            doc.context.expand(name),
        ));
    };
    match raw.get("@type") {
        Some(serde_json::Value::String(t)) => add(t),
        Some(serde_json::Value::Array(ts)) => {
            for t in ts {
                if let serde_json::Value::String(t) = t {
                    add(t);
                }
            }
        }
        _ => (),
    }
}

// Root scalars are withheld by default to keep output stable; scalars
// inside inline sub-objects get synthetic subjects.
fn seed_inert(
    doc: &Document,
    key: &Rc<str>,
    iri: &Rc<str>,
    value: &Value,
    seed_root_scalars: bool,
    seeds: &mut Vec<Triple>,
) {
    match value {
        Value::Object(_) => {
            let subject = doc.synthetic_subject(&[key.as_ref()]);
            seed_object(doc, &subject, value, seeds);
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if let Value::Object(_) = item {
                    let idx = i.to_string();
                    let subject = doc.synthetic_subject(&[key.as_ref(), idx.as_str()]);
                    seed_object(doc, &subject, item, seeds);
                }
            }
        }
        _ if seed_root_scalars => {
            if let Some(text) = value.to_triple_text() {
                seeds.push(Triple::new(doc.subject.clone(), iri.clone(), text.into()));
            }
        }
        _ => (),
    }
}

fn seed_object(doc: &Document, subject: &Rc<str>, value: &Value, seeds: &mut Vec<Triple>) {
    let map = match value.as_object() {
        Ok(m) => m,
        _ => return,
    };
    for (prop, v) in map {
        if prop.starts_with('@') {
            continue;
        }
        // Nested directives resolve lazily through property reads, not
        // through seeding.
        if let Value::Object(inner) = v {
            if DIRECTIVE_KEYS.iter().any(|k| inner.contains_key(*k)) {
                continue;
            }
        }
        match v {
            Value::Object(_) => {
                let nested: Rc<str> = format!("{subject}/{prop}").into();
                seed_object(doc, &nested, v, seeds);
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if let Value::Object(_) = item {
                        let nested: Rc<str> = format!("{subject}/{prop}/{i}").into();
                        seed_object(doc, &nested, item, seeds);
                    }
                }
            }
            _ => {
                if let Some(text) = v.to_triple_text() {
                    seeds.push(Triple::new(
                        subject.clone(),
                        doc.context.expand(prop),
                        text.into(),
                    ));
                }
            }
        }
    }
}
