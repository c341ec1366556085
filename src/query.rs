// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Expr;
use crate::document::ContextMap;
use crate::interpreter::Interpreter;
use crate::number::Number;
use crate::parser;
use crate::store::TripleStore;
use crate::value::{Scope, Value};

use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

#[derive(Debug, Clone)]
pub enum Term {
    Var(Rc<str>),
    Iri(Rc<str>),
    Lit(Rc<str>),
}

#[derive(Debug, Clone)]
pub struct TriplePattern {
    pub s: Term,
    pub p: Term,
    pub o: Term,
}

#[derive(Debug, Clone)]
pub enum PatternItem {
    Triple(TriplePattern),
    Optional {
        patterns: Vec<TriplePattern>,
        filters: Vec<Rc<Expr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

impl AggOp {
    fn parse(s: &str) -> Option<AggOp> {
        Some(match s {
            "sum" => AggOp::Sum,
            "count" => AggOp::Count,
            "min" => AggOp::Min,
            "max" => AggOp::Max,
            "avg" => AggOp::Avg,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum SelectItem {
    Var(Rc<str>),
    Agg {
        op: AggOp,
        expr: Option<Rc<Expr>>,
        alias: Option<Rc<str>>,
    },
}

impl SelectItem {
    fn output_name(&self) -> Rc<str> {
        match self {
            SelectItem::Var(v) => plain_name(v),
            SelectItem::Agg {
                alias: Some(a), ..
            } => a.clone(),
            SelectItem::Agg { op, .. } => match op {
                AggOp::Sum => "sum".into(),
                AggOp::Count => "count".into(),
                AggOp::Min => "min".into(),
                AggOp::Max => "max".into(),
                AggOp::Avg => "avg".into(),
            },
        }
    }

    fn is_agg(&self) -> bool {
        matches!(self, SelectItem::Agg { .. })
    }
}

#[derive(Debug, Clone)]
pub struct QueryAst {
    pub patterns: Vec<PatternItem>,
    pub filters: Vec<Rc<Expr>>,
    pub select: Vec<SelectItem>,
    pub group_by: Vec<Rc<str>>,
    pub having: Vec<Rc<Expr>>,
    pub order_by: Vec<(bool, Rc<str>)>,
    pub limit: Option<usize>,
}

/// An executed query: projected rows in select order, plus which
/// pipeline stages ran (surfaced as provenance by the evaluator).
#[derive(Debug, Default)]
pub struct QueryOutcome {
    pub rows: Vec<Vec<(Rc<str>, Value)>>,
    pub used_filter: bool,
    pub used_sort: bool,
    pub used_paginate: bool,
}

fn plain_name(var: &str) -> Rc<str> {
    var.trim_start_matches('?').into()
}

fn parse_filter_list(v: Option<&Value>) -> Result<Vec<Rc<Expr>>> {
    let mut out = vec![];
    if let Some(Value::Array(items)) = v {
        for item in items.iter() {
            let text = item
                .as_string()
                .map_err(|_| anyhow!("query filters must be strings"))?;
            out.push(Rc::new(parser::parse_expression("filter", text)?));
        }
    }
    Ok(out)
}

impl QueryAst {
    /// Build a query from an `@query` directive object.
    ///
    /// Triple patterns are three-element arrays; optional groups are
    /// objects `{ "optional": [patterns], "filters"?: [...] }`. Terms
    /// starting with `?` are variables; subject and predicate terms
    /// expand through the context, object terms only when they carry a
    /// prefix. The reserved predicate `a` is rdf:type.
    pub fn from_value(directive: &Value, ctx: &ContextMap) -> Result<QueryAst> {
        let map = match directive {
            Value::Object(m) => m,
            _ => bail!("`@query` must be an object"),
        };

        let mut patterns = vec![];
        match map.get("patterns") {
            Some(Value::Array(items)) => {
                for item in items.iter() {
                    patterns.push(Self::parse_pattern_item(item, ctx)?);
                }
            }
            _ => bail!("`@query` requires a `patterns` array"),
        }

        let select = match map.get("select") {
            Some(Value::Array(items)) => {
                let mut out = vec![];
                for item in items.iter() {
                    out.push(Self::parse_select_item(item)?);
                }
                if out.is_empty() {
                    bail!("`@query` requires a non-empty `select`");
                }
                out
            }
            _ => bail!("`@query` requires a `select` array"),
        };

        let group_by = match map.get("groupBy") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(anyhow!("`groupBy` entries must be variables")),
                })
                .collect::<Result<Vec<_>>>()?,
            _ => vec![],
        };

        let order_by = match map.get("orderBy") {
            Some(Value::Array(items)) => {
                let mut out = vec![];
                for item in items.iter() {
                    let text = item
                        .as_string()
                        .map_err(|_| anyhow!("`orderBy` entries must be strings"))?;
                    let (asc, var) = match text.split_once(' ') {
                        Some(("asc", v)) => (true, v),
                        Some(("desc", v)) => (false, v),
                        Some(_) => bail!("`orderBy` entries are `[asc|desc ]var`"),
                        _ => (true, text.as_ref()),
                    };
                    out.push((asc, plain_name(var.trim())));
                }
                out
            }
            _ => vec![],
        };

        let limit = match map.get("limit") {
            Some(Value::Number(n)) => match n.as_u64() {
                Some(n) => Some(n as usize),
                _ => bail!("`limit` must be a non-negative integer"),
            },
            Some(_) => bail!("`limit` must be a number"),
            _ => None,
        };

        Ok(QueryAst {
            patterns,
            filters: parse_filter_list(map.get("filters"))?,
            select,
            group_by,
            having: parse_filter_list(map.get("having"))?,
            order_by,
            limit,
        })
    }

    fn parse_pattern_item(item: &Value, ctx: &ContextMap) -> Result<PatternItem> {
        match item {
            Value::Array(_) => Ok(PatternItem::Triple(Self::parse_triple(item, ctx)?)),
            Value::Object(map) => {
                let inner = match map.get("optional") {
                    Some(Value::Array(ps)) => ps
                        .iter()
                        .map(|p| Self::parse_triple(p, ctx))
                        .collect::<Result<Vec<_>>>()?,
                    _ => bail!("optional group requires an `optional` pattern array"),
                };
                Ok(PatternItem::Optional {
                    patterns: inner,
                    filters: parse_filter_list(map.get("filters"))?,
                })
            }
            _ => bail!("query pattern must be a triple array or optional group"),
        }
    }

    fn parse_triple(item: &Value, ctx: &ContextMap) -> Result<TriplePattern> {
        let parts = item.as_array()?;
        if parts.len() != 3 {
            bail!("triple pattern must have exactly three terms");
        }
        Ok(TriplePattern {
            s: Self::parse_term(&parts[0], ctx, TermPos::Subject)?,
            p: Self::parse_term(&parts[1], ctx, TermPos::Predicate)?,
            o: Self::parse_term(&parts[2], ctx, TermPos::Object)?,
        })
    }

    fn parse_term(v: &Value, ctx: &ContextMap, pos: TermPos) -> Result<Term> {
        Ok(match v {
            Value::String(s) if s.starts_with('?') => Term::Var(s.clone()),
            Value::String(s) => match pos {
                TermPos::Predicate if s.as_ref() == "a" => Term::Iri(RDF_TYPE.into()),
                TermPos::Subject | TermPos::Predicate => Term::Iri(ctx.expand(s)),
                TermPos::Object => {
                    if s.contains(':') {
                        Term::Iri(ctx.expand(s))
                    } else {
                        Term::Lit(s.clone())
                    }
                }
            },
            other => match other.to_triple_text() {
                Some(text) => Term::Lit(text.into()),
                _ => bail!("invalid term in triple pattern"),
            },
        })
    }

    fn parse_select_item(v: &Value) -> Result<SelectItem> {
        match v {
            Value::String(s) if s.starts_with('?') => Ok(SelectItem::Var(s.clone())),
            Value::Object(map) => {
                let op = match map.get("agg") {
                    Some(Value::String(s)) => match AggOp::parse(s) {
                        Some(op) => op,
                        _ => bail!("unknown aggregate `{s}`"),
                    },
                    _ => bail!("aggregate select requires an `agg` field"),
                };
                let expr = match map.get("expr") {
                    Some(Value::String(s)) => {
                        Some(Rc::new(parser::parse_expression("select", s)?))
                    }
                    Some(_) => bail!("aggregate `expr` must be a string"),
                    _ => None,
                };
                let alias = match map.get("as") {
                    Some(Value::String(s)) => Some(s.clone()),
                    _ => None,
                };
                Ok(SelectItem::Agg { op, expr, alias })
            }
            _ => bail!("select entries are `?var` or aggregate objects"),
        }
    }
}

#[derive(Clone, Copy)]
enum TermPos {
    Subject,
    Predicate,
    Object,
}

type Row = BTreeMap<Rc<str>, Value>;

fn row_scope(row: &Row) -> Scope {
    let mut scope = Scope::new();
    for (var, value) in row {
        scope.insert(var.clone(), value.clone());
        scope.insert(plain_name(var), value.clone());
    }
    scope
}

fn ground<'a>(term: &'a Term, row: &'a Row) -> Option<String> {
    match term {
        Term::Iri(s) | Term::Lit(s) => Some(s.to_string()),
        Term::Var(v) => row.get(v).map(|val| match val {
            Value::String(s) => s.to_string(),
            other => other.to_display_string(),
        }),
    }
}

fn bind_if_var(term: &Term, text: &Rc<str>, row: &mut Row) {
    if let Term::Var(v) = term {
        row.entry(v.clone())
            .or_insert_with(|| Value::String(text.clone()));
    }
}

fn extend_rows(rows: Vec<Row>, tp: &TriplePattern, store: &TripleStore) -> Vec<Row> {
    let mut out = vec![];
    for row in rows {
        let s = ground(&tp.s, &row);
        let p = ground(&tp.p, &row);
        let o = ground(&tp.o, &row);
        for triple in store.match_pattern(s.as_deref(), p.as_deref(), o.as_deref()) {
            let mut extended = row.clone();
            bind_if_var(&tp.s, &triple.s, &mut extended);
            bind_if_var(&tp.p, &triple.p, &mut extended);
            bind_if_var(&tp.o, &triple.o, &mut extended);
            out.push(extended);
        }
    }
    out
}

fn pattern_vars(patterns: &[TriplePattern]) -> Vec<Rc<str>> {
    let mut vars = vec![];
    for tp in patterns {
        for term in [&tp.s, &tp.p, &tp.o] {
            if let Term::Var(v) = term {
                if !vars.contains(v) {
                    vars.push(v.clone());
                }
            }
        }
    }
    vars
}

fn apply_filters(rows: Vec<Row>, filters: &[Rc<Expr>], interp: &mut Interpreter) -> Result<Vec<Row>> {
    let mut out = vec![];
    for row in rows {
        interp.push_scope(row_scope(&row));
        let keep = filters.iter().try_fold(true, |acc, f| {
            if !acc {
                return Ok(false);
            }
            interp.eval(f).map(|v| v.is_truthy())
        });
        interp.pop_scope();
        if keep? {
            out.push(row);
        }
    }
    Ok(out)
}

fn numeric_view(v: &Value) -> Option<Number> {
    match v {
        Value::Number(n) => Some(n.clone()),
        Value::Quantity(q) => Some(q.magnitude.clone()),
        Value::String(s) => Number::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn fold_aggregate(op: AggOp, values: &[Value]) -> Value {
    match op {
        AggOp::Count => Value::from(values.len()),
        AggOp::Sum | AggOp::Avg => {
            let mut total = Number::zero();
            let mut n = 0usize;
            for v in values {
                if let Some(x) = numeric_view(v) {
                    total = match total.add(&x) {
                        Ok(t) => t,
                        _ => return Value::Undefined,
                    };
                    n += 1;
                }
            }
            if op == AggOp::Sum {
                Value::Number(total)
            } else if n == 0 {
                Value::Undefined
            } else {
                match total.divide(&Number::from(n)) {
                    Ok(a) => Value::Number(a),
                    _ => Value::Undefined,
                }
            }
        }
        AggOp::Min | AggOp::Max => {
            let mut best: Option<Value> = None;
            for v in values {
                if v.is_null() || v.is_undefined() {
                    continue;
                }
                let candidate = match (numeric_view(v), &best) {
                    // Order numerically when both sides allow it.
                    (Some(x), Some(b)) => match numeric_view(b) {
                        Some(bx) => {
                            let take = if op == AggOp::Min { x < bx } else { x > bx };
                            if take {
                                Some(v.clone())
                            } else {
                                None
                            }
                        }
                        _ => None,
                    },
                    (_, Some(b)) => {
                        let take = if op == AggOp::Min { v < b } else { v > b };
                        if take {
                            Some(v.clone())
                        } else {
                            None
                        }
                    }
                    (_, None) => Some(v.clone()),
                };
                if let Some(c) = candidate {
                    best = Some(c);
                }
            }
            best.unwrap_or(Value::Undefined)
        }
    }
}

impl QueryAst {
    pub fn execute(
        &self,
        store: &TripleStore,
        interp: &mut Interpreter,
    ) -> Result<QueryOutcome> {
        let mut outcome = QueryOutcome::default();

        // 1. Pattern matching over the store, unifying shared variables.
        let mut rows: Vec<Row> = vec![Row::new()];
        for item in &self.patterns {
            match item {
                PatternItem::Triple(tp) => {
                    rows = extend_rows(rows, tp, store);
                }
                PatternItem::Optional { patterns, filters } => {
                    // Left join: rows with no match keep their bindings
                    // and null-fill the group's variables.
                    let mut joined = vec![];
                    for row in rows {
                        let mut sub = vec![row.clone()];
                        for tp in patterns {
                            sub = extend_rows(sub, tp, store);
                        }
                        if !filters.is_empty() {
                            sub = apply_filters(sub, filters, interp)?;
                        }
                        if sub.is_empty() {
                            let mut filled = row;
                            for var in pattern_vars(patterns) {
                                filled.entry(var).or_insert(Value::Null);
                            }
                            joined.push(filled);
                        } else {
                            joined.extend(sub);
                        }
                    }
                    rows = joined;
                }
            }
        }

        // 2. Filters.
        if !self.filters.is_empty() {
            outcome.used_filter = true;
            rows = apply_filters(rows, &self.filters, interp)?;
        }

        // 3. Grouping and aggregation.
        let has_agg = self.select.iter().any(SelectItem::is_agg);
        let mut projected: Vec<Vec<(Rc<str>, Value)>> = if !self.group_by.is_empty() || has_agg {
            let mut groups: BTreeMap<Vec<Value>, Vec<Row>> = BTreeMap::new();
            for row in rows {
                let key: Vec<Value> = self
                    .group_by
                    .iter()
                    .map(|v| row.get(v).cloned().unwrap_or(Value::Null))
                    .collect();
                groups.entry(key).or_default().push(row);
            }
            // Without groupBy, aggregates fold everything into one row.
            if groups.is_empty() && self.group_by.is_empty() {
                groups.insert(vec![], vec![]);
            }

            let mut out = vec![];
            for (_, group_rows) in groups {
                let mut projected_row = vec![];
                for item in &self.select {
                    let name = item.output_name();
                    let value = match item {
                        SelectItem::Var(v) => group_rows
                            .first()
                            .and_then(|r| r.get(v).cloned())
                            .unwrap_or(Value::Null),
                        SelectItem::Agg { op, expr, .. } => {
                            let mut values = vec![];
                            for row in &group_rows {
                                match expr {
                                    Some(e) => {
                                        interp.push_scope(row_scope(row));
                                        let v = interp.eval(e);
                                        interp.pop_scope();
                                        values.push(v?);
                                    }
                                    _ => values.push(Value::Bool(true)),
                                }
                            }
                            fold_aggregate(*op, &values)
                        }
                    };
                    projected_row.push((name, value));
                }
                out.push(projected_row);
            }
            out
        } else {
            rows.iter()
                .map(|row| {
                    self.select
                        .iter()
                        .map(|item| {
                            let name = item.output_name();
                            let value = match item {
                                SelectItem::Var(v) => {
                                    row.get(v).cloned().unwrap_or(Value::Null)
                                }
                                SelectItem::Agg { .. } => Value::Undefined,
                            };
                            (name, value)
                        })
                        .collect()
                })
                .collect()
        };

        // 4. Having.
        if !self.having.is_empty() {
            let mut kept = vec![];
            for row in projected {
                let mut scope = Scope::new();
                for (name, value) in &row {
                    scope.insert(name.clone(), value.clone());
                    scope.insert(format!("?{name}").into(), value.clone());
                }
                interp.push_scope(scope);
                let keep = self.having.iter().try_fold(true, |acc, f| {
                    if !acc {
                        return Ok(false);
                    }
                    interp.eval(f).map(|v| v.is_truthy())
                });
                interp.pop_scope();
                if keep? {
                    kept.push(row);
                }
            }
            projected = kept;
        }

        // 5. Stable sorts applied from the last key to the first.
        if !self.order_by.is_empty() {
            outcome.used_sort = true;
            for (asc, var) in self.order_by.iter().rev() {
                projected.sort_by(|a, b| {
                    let av = row_value(a, var);
                    let bv = row_value(b, var);
                    let ord = match (
                        av.as_ref().and_then(numeric_view),
                        bv.as_ref().and_then(numeric_view),
                    ) {
                        (Some(x), Some(y)) => x.cmp(&y),
                        _ => av.cmp(&bv),
                    };
                    if *asc {
                        ord
                    } else {
                        ord.reverse()
                    }
                });
            }
        }

        // 6. Limit.
        if let Some(limit) = self.limit {
            if projected.len() > limit {
                outcome.used_paginate = true;
                projected.truncate(limit);
            }
        }

        outcome.rows = projected;
        Ok(outcome)
    }
}

fn row_value(row: &[(Rc<str>, Value)], name: &str) -> Option<Value> {
    row.iter()
        .find(|(n, _)| n.as_ref() == name)
        .map(|(_, v)| v.clone())
}

impl QueryOutcome {
    /// Document-level `@query` value: first column of the first row.
    pub fn scalar(&self) -> Value {
        self.rows
            .first()
            .and_then(|row| row.first())
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Undefined)
    }

    /// Full result as an array of row objects.
    pub fn to_value(&self) -> Value {
        let rows: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                let mut map = BTreeMap::new();
                for (name, value) in row {
                    map.insert(name.clone(), value.clone());
                }
                Value::from(map)
            })
            .collect();
        Value::from(rows)
    }
}
