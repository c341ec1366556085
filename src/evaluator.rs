// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::canon::{canonical_json, canonical_json_of};
use crate::compose::{compose, LoaderFn};
use crate::diagnostics::{codes, Diagnostic, Severity};
use crate::document::Document;
use crate::indexer::{index_document, DagNode, NodeKind, Payload};
use crate::interpreter::Interpreter;
use crate::scheduler::{layer_nodes, Layering};
use crate::sign::Signer;
use crate::store::{Triple, TripleStore};
use crate::units::UnitRegistry;
use crate::value::Value;

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Error;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

/// Evaluation-local configuration. There is no process-global state;
/// every option lives on the evaluation that uses it.
#[derive(Debug, Clone, Serialize)]
pub struct EvalOptions {
    pub max_fixpoint_iters: u32,
    /// Excluded from the signable payload.
    pub timeout_ms: Option<u64>,
    pub seed_root_scalars: bool,
    pub key_id: String,
}

impl Default for EvalOptions {
    fn default() -> Self {
        EvalOptions {
            max_fixpoint_iters: 10,
            timeout_ms: None,
            seed_root_scalars: false,
            key_id: "default".to_string(),
        }
    }
}

impl EvalOptions {
    fn signable(&self) -> serde_json::Value {
        serde_json::json!({
            "max_fixpoint_iters": self.max_fixpoint_iters,
            "seed_root_scalars": self.seed_root_scalars,
            "key_id": self.key_id,
        })
    }
}

/// One step of the adapter pipeline that produced the result.
#[derive(Debug, Clone, Serialize)]
pub struct ProvenanceOp {
    pub op: &'static str,
    pub target: String,
}

#[derive(Debug, Default)]
pub struct EvalResult {
    pub triples: Vec<Triple>,
    pub diagnostics: Vec<Diagnostic>,
    pub value: Value,
    pub provenance: Vec<ProvenanceOp>,
    pub signature: Option<String>,
    /// Canonical signable payload, available whenever signing ran.
    pub payload: Option<String>,
}

/// Deterministic per-document state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvalState {
    Indexing,
    Scheduled,
    Layering(usize),
    Fixpoint(u32),
    Signing,
    Done,
    Aborted,
}

/// The evaluator façade. Hosts configure it once and evaluate many
/// documents; each evaluation owns its store, state and diagnostics.
pub struct Evaluator {
    units: Rc<UnitRegistry>,
    caps: Vec<String>,
    now: Option<DateTime<Utc>>,
    loader: Option<LoaderFn>,
    relations: BTreeMap<String, Value>,
    secret: Option<Vec<u8>>,
    options: EvalOptions,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Evaluator {
        Evaluator {
            units: Rc::new(UnitRegistry::default()),
            caps: vec![],
            now: None,
            loader: None,
            relations: BTreeMap::new(),
            secret: None,
            options: EvalOptions::default(),
            cancel: None,
        }
    }

    pub fn set_units(&mut self, units: UnitRegistry) {
        self.units = Rc::new(units);
    }

    pub fn set_caps(&mut self, caps: Vec<String>) {
        self.caps = caps;
    }

    /// Fix the evaluation clock for reproducible `$now()`.
    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.now = Some(now);
    }

    pub fn set_loader(&mut self, loader: LoaderFn) {
        self.loader = Some(loader);
    }

    /// Preload a sibling document under a relation alias.
    pub fn add_relation(&mut self, alias: impl Into<String>, doc: Value) {
        self.relations.insert(alias.into(), doc);
    }

    /// Enable signing. The signer key id comes from the options.
    pub fn set_secret(&mut self, secret: impl Into<Vec<u8>>) {
        self.secret = Some(secret.into());
    }

    pub fn set_options(&mut self, options: EvalOptions) {
        self.options = options;
    }

    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |f| f.load(Ordering::Relaxed))
    }

    pub fn eval_json_str(&self, json: &str) -> EvalResult {
        match Document::from_json_str(json) {
            Ok(doc) => self.eval_document(&doc),
            Err(e) => schema_failure(e),
        }
    }

    pub fn eval_json(&self, raw: serde_json::Value) -> EvalResult {
        match Document::from_json(raw) {
            Ok(doc) => self.eval_document(&doc),
            Err(e) => schema_failure(e),
        }
    }

    pub fn eval_file(&self, path: &str) -> EvalResult {
        match std::fs::read_to_string(path) {
            Ok(contents) => self.eval_json_str(&contents),
            Err(e) => schema_failure(Error::msg(format!("failed to read {path}: {e}"))),
        }
    }

    pub fn eval_document(&self, doc: &Document) -> EvalResult {
        self.eval_document_into(doc, TripleStore::new())
    }

    /// Evaluate into a host-supplied store. Derived triples are added
    /// to whatever the store already holds.
    pub fn eval_document_into(&self, doc: &Document, store: TripleStore) -> EvalResult {
        let mut state = EvalState::Indexing;
        debug!("evaluating {} (state {:?})", doc.subject, state);

        let now = self.now.unwrap_or_else(Utc::now);
        let mut interp = Interpreter::new(self.units.clone(), now);
        let mut result = EvalResult::default();
        let mut store = store;
        let mut value_map: BTreeMap<Rc<str>, Value> = BTreeMap::new();

        // Cross-document composition before anything else.
        let composed = compose(doc, self.loader.as_ref(), &self.relations, &mut interp);
        result.diagnostics.extend(composed.diagnostics);
        // Provenance order must not depend on document key order.
        let mut fetched = composed.fetched.clone();
        fetched.sort();
        for alias in fetched {
            result.provenance.push(ProvenanceOp {
                op: "fetch",
                target: alias,
            });
        }
        let mut working = doc.body.clone();
        if let Ok(map) = working.as_object_mut() {
            for (key, value) in &composed.materialized {
                map.insert(key.clone(), value.clone());
            }
        }

        // Classification and triple seeding.
        let indexed = index_document(doc, &working, self.options.seed_root_scalars);
        result.diagnostics.extend(indexed.diagnostics);
        for seed in indexed.seeds {
            store.add(seed);
        }

        let mut inert_names: BTreeSet<Rc<str>> = BTreeSet::new();
        for (plain, iri, value) in &indexed.initial {
            inert_names.insert(plain.clone());
            inert_names.insert(iri.clone());
            interp.set_global(plain.clone(), value.clone());
            value_map.insert(plain.clone(), value.clone());
        }

        state = EvalState::Scheduled;
        let layering = layer_nodes(&indexed.nodes, &inert_names);
        debug!(
            "{} nodes in {} layers, {} in fixpoint (state {:?})",
            indexed.nodes.len(),
            layering.layers.len(),
            layering.fixpoint.len(),
            state
        );

        // Acyclic layers, in order. Cancellation is polled between
        // layers; no in-flight expression is interrupted.
        for (layer_idx, layer) in layering.layers.iter().enumerate() {
            if self.cancelled() {
                return self.aborted(result, store, value_map);
            }
            state = EvalState::Layering(layer_idx);
            debug!("state {state:?}: {} nodes", layer.len());
            let mut computed = vec![];
            for &node_idx in layer {
                let node = &indexed.nodes[node_idx];
                self.eval_node(
                    doc,
                    node,
                    &mut interp,
                    &mut store,
                    &mut value_map,
                    &mut result,
                    true,
                );
                computed.push(node.plain_key.to_string());
            }
            if !computed.is_empty() {
                computed.sort();
                result.provenance.push(ProvenanceOp {
                    op: "compute",
                    target: computed.join(","),
                });
            }
        }

        // Bounded fixpoint over the cyclic remainder. Triples and
        // diagnostics are withheld until the layer stabilizes.
        if !self.run_fixpoint(doc, &indexed.nodes, &layering, &mut interp, &mut store, &mut value_map, &mut result, &mut state) {
            return self.aborted(result, store, value_map);
        }

        state = EvalState::Signing;
        debug!("state {state:?}");
        result.value = Value::from(value_map);
        result.triples = store.into_triples();
        self.sign_result(doc, &mut result);

        state = EvalState::Done;
        info!(
            "evaluated {}: {} triples, {} diagnostics (state {:?})",
            doc.subject,
            result.triples.len(),
            result.diagnostics.len(),
            state
        );
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_fixpoint(
        &self,
        doc: &Document,
        nodes: &[DagNode],
        layering: &Layering,
        interp: &mut Interpreter,
        store: &mut TripleStore,
        value_map: &mut BTreeMap<Rc<str>, Value>,
        result: &mut EvalResult,
        state: &mut EvalState,
    ) -> bool {
        if layering.fixpoint.is_empty() {
            return true;
        }

        let mut previous: BTreeMap<usize, String> = BTreeMap::new();
        let mut converged = false;
        for iter in 0..self.options.max_fixpoint_iters {
            if self.cancelled() {
                return false;
            }
            *state = EvalState::Fixpoint(iter);
            debug!("state {:?}", *state);

            let mut changed = false;
            for &node_idx in &layering.fixpoint {
                let node = &nodes[node_idx];
                // Diagnostics and triples are deferred to the final pass.
                let mut scratch = EvalResult::default();
                self.eval_node(doc, node, interp, store, value_map, &mut scratch, false);
                // Absent counts as changed, so error or undefined nodes
                // keep the layer iterating until the limit.
                match value_map.get(&node.plain_key).map(canonical_json) {
                    Some(snapshot) => {
                        if previous.get(&node_idx) != Some(&snapshot) {
                            changed = true;
                            previous.insert(node_idx, snapshot);
                        }
                    }
                    _ => changed = true,
                }
            }
            if !changed {
                converged = true;
                break;
            }
        }

        if converged {
            // One more pass with emission enabled; values are stable.
            let mut computed = vec![];
            for &node_idx in &layering.fixpoint {
                let node = &nodes[node_idx];
                self.eval_node(doc, node, interp, store, value_map, result, true);
                computed.push(node.plain_key.to_string());
            }
            computed.sort();
            result.provenance.push(ProvenanceOp {
                op: "compute",
                target: computed.join(","),
            });
        } else {
            let keys: Vec<String> = layering
                .fixpoint
                .iter()
                .map(|&i| nodes[i].plain_key.to_string())
                .collect();
            result.diagnostics.push(Diagnostic::error(
                codes::FIXPOINT_LIMIT,
                None,
                Some(format!(
                    "no fixpoint after {} iterations: {}",
                    self.options.max_fixpoint_iters,
                    keys.join(", ")
                )),
            ));
            // Withhold non-converged values entirely.
            for &node_idx in &layering.fixpoint {
                let node = &nodes[node_idx];
                value_map.remove(&node.plain_key);
                interp.set_global(node.plain_key.clone(), Value::Undefined);
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_node(
        &self,
        doc: &Document,
        node: &DagNode,
        interp: &mut Interpreter,
        store: &mut TripleStore,
        value_map: &mut BTreeMap<Rc<str>, Value>,
        result: &mut EvalResult,
        emit: bool,
    ) {
        if node.stable {
            // `@stable` is a cache hint for hosts; no semantic effect.
            debug!("{} is marked @stable", node.plain_key);
        }
        match (&node.payload, node.kind) {
            (Payload::Expr(ast), NodeKind::Constraint) => match interp.eval(ast) {
                Ok(v) => {
                    if emit && !v.is_truthy() {
                        result.diagnostics.push(Diagnostic::error(
                            codes::CONSTRAINT_FAILED,
                            Some(node.iri.clone()),
                            None,
                        ));
                    }
                }
                Err(e) => {
                    if emit {
                        result.diagnostics.push(expr_diagnostic(&node.iri, &e));
                    }
                }
            },
            (Payload::Expr(ast), _) => match interp.eval(ast) {
                Ok(Value::Undefined) => (),
                Ok(v) => {
                    interp.set_global(node.plain_key.clone(), v.clone());
                    value_map.insert(node.plain_key.clone(), v.clone());
                    if emit {
                        if let Some(text) = v.to_triple_text() {
                            store.add(Triple::new(
                                doc.subject.clone(),
                                node.iri.clone(),
                                text.into(),
                            ));
                        }
                    }
                }
                Err(e) => {
                    if emit {
                        result.diagnostics.push(expr_diagnostic(&node.iri, &e));
                    }
                }
            },
            (Payload::Query(ast), _) => match ast.execute(store, interp) {
                Ok(outcome) => {
                    if emit {
                        if outcome.used_filter {
                            result.provenance.push(ProvenanceOp {
                                op: "filter",
                                target: node.plain_key.to_string(),
                            });
                        }
                        if outcome.used_sort {
                            result.provenance.push(ProvenanceOp {
                                op: "sort",
                                target: node.plain_key.to_string(),
                            });
                        }
                        if outcome.used_paginate {
                            result.provenance.push(ProvenanceOp {
                                op: "paginate",
                                target: node.plain_key.to_string(),
                            });
                        }
                    }
                    let v = outcome.scalar();
                    if !v.is_undefined() {
                        interp.set_global(node.plain_key.clone(), v.clone());
                        value_map.insert(node.plain_key.clone(), v.clone());
                        if emit {
                            if let Some(text) = v.to_triple_text() {
                                store.add(Triple::new(
                                    doc.subject.clone(),
                                    node.iri.clone(),
                                    text.into(),
                                ));
                            }
                        }
                    }
                }
                Err(e) => {
                    if emit {
                        result.diagnostics.push(Diagnostic::error(
                            codes::QUERY_ERR,
                            Some(node.iri.clone()),
                            Some(e.to_string()),
                        ));
                    }
                }
            },
        }
    }

    fn aborted(
        &self,
        mut result: EvalResult,
        store: TripleStore,
        value_map: BTreeMap<Rc<str>, Value>,
    ) -> EvalResult {
        let state = EvalState::Aborted;
        debug!("state {state:?}");
        result.diagnostics.push(Diagnostic::error(
            codes::TIMEOUT,
            None,
            Some("evaluation cancelled before completion".to_string()),
        ));
        result.value = Value::from(value_map);
        result.triples = store.into_triples();
        result
    }

    // The signable payload covers the supplied document, effective
    // options (minus timeout), capabilities, computed value and
    // provenance. Wall time, durations and request identifiers never
    // appear in it.
    fn sign_result(&self, doc: &Document, result: &mut EvalResult) {
        let caps = serde_json::json!(self.caps);
        let provenance = match serde_json::to_value(&result.provenance) {
            Ok(p) => p,
            _ => serde_json::Value::Null,
        };
        let payload = format!(
            "{{\"caps\":{},\"document\":{},\"options\":{},\"provenance\":{},\"value\":{}}}",
            canonical_json_of(&caps),
            canonical_json_of(&doc.raw),
            canonical_json_of(&self.options.signable()),
            canonical_json_of(&provenance),
            canonical_json(&result.value),
        );
        if let Some(secret) = &self.secret {
            let signer = Signer::new(secret.clone(), self.options.key_id.clone());
            if let Ok(signature) = signer.sign(&payload) {
                result.signature = Some(signature);
            }
        }
        result.payload = Some(payload);
    }
}

fn schema_failure(e: Error) -> EvalResult {
    EvalResult {
        diagnostics: vec![Diagnostic::error(
            codes::SCHEMA_ERROR,
            None,
            Some(e.to_string()),
        )],
        ..Default::default()
    }
}

/// Map an expression failure onto the closed diagnostic code set.
fn expr_diagnostic(iri: &Rc<str>, e: &Error) -> Diagnostic {
    let msg = e.to_string();
    if msg.contains("div.by_zero") {
        return Diagnostic::error(codes::DIV_BY_ZERO, Some(iri.clone()), Some(msg));
    }
    if msg.contains("unit mismatch") {
        return Diagnostic::error(codes::UNIT_MISMATCH, Some(iri.clone()), Some(msg));
    }
    if msg.contains("convert.unknown_pair") {
        // Unknown conversion pairs degrade to a warning.
        return Diagnostic {
            code: codes::EXPR_ERR,
            path: Some(iri.clone()),
            severity: Severity::Warning,
            message: Some(msg),
        };
    }
    Diagnostic::error(codes::EXPR_ERR, Some(iri.clone()), Some(msg))
}
