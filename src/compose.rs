// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::diagnostics::{codes, Diagnostic};
use crate::document::Document;
use crate::interpreter::Interpreter;
use crate::number::Number;
use crate::parser;
use crate::units::Quantity;
use crate::value::Value;

use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};

/// Host callback resolving a relation alias and path to a document.
pub type LoaderFn = Box<dyn Fn(&str, &str) -> Result<Value>>;

/// Cross-document resolution output. `materialized` values merge into
/// the working copy as inert values before indexing.
#[derive(Debug, Default)]
pub struct ComposeOutput {
    pub materialized: Vec<(Rc<str>, Value)>,
    pub diagnostics: Vec<Diagnostic>,
    pub fetched: Vec<String>,
}

pub fn compose(
    doc: &Document,
    loader: Option<&LoaderFn>,
    preloaded: &BTreeMap<String, Value>,
    interp: &mut Interpreter,
) -> ComposeOutput {
    let mut out = ComposeOutput::default();

    let raw = match doc.raw.as_object() {
        Some(m) => m,
        _ => return out,
    };

    // `@relations`: alias -> path, loaded into a read-only name table.
    let mut relations: BTreeMap<Rc<str>, Value> = BTreeMap::new();
    for (alias, value) in preloaded {
        relations.insert(alias.as_str().into(), value.clone());
    }
    if let Some(serde_json::Value::Object(decls)) = raw.get("@relations") {
        for (alias, path) in decls {
            if relations.contains_key(alias.as_str()) {
                out.fetched.push(alias.clone());
                continue;
            }
            let path = match path.as_str() {
                Some(p) => p,
                _ => {
                    out.diagnostics.push(Diagnostic::error(
                        codes::SCHEMA_ERROR,
                        None,
                        Some(format!("`@relations` path for `{alias}` must be a string")),
                    ));
                    continue;
                }
            };
            match loader {
                Some(load) => match load(alias, path) {
                    Ok(v) => {
                        relations.insert(alias.as_str().into(), v);
                        out.fetched.push(alias.clone());
                    }
                    Err(e) => out.diagnostics.push(Diagnostic::error(
                        codes::BAD_REF,
                        None,
                        Some(format!("failed to load relation `{alias}`: {e}")),
                    )),
                },
                _ => out.diagnostics.push(Diagnostic::error(
                    codes::BAD_REF,
                    None,
                    Some(format!("no loader available for relation `{alias}`")),
                )),
            }
        }
    }

    for (key, value) in raw {
        if key.starts_with('@') {
            continue;
        }
        let json_map = match value.as_object() {
            Some(m) => m,
            _ => continue,
        };
        if !json_map.contains_key("@ref") && !json_map.contains_key("@rollup") {
            continue;
        }
        let iri = doc.context.expand(key);
        let directive = Value::from(value);
        let map = match directive.as_object() {
            Ok(m) => m,
            _ => continue,
        };

        if let Some(refspec) = map.get("@ref") {
            match refspec {
                Value::String(path) => match resolve_ref(path, &relations) {
                    Ok(Value::Undefined) => (),
                    Ok(v) => out.materialized.push((key.as_str().into(), v)),
                    Err(e) => out.diagnostics.push(Diagnostic::error(
                        codes::BAD_REF,
                        Some(iri.clone()),
                        Some(e.to_string()),
                    )),
                },
                _ => out.diagnostics.push(Diagnostic::error(
                    codes::BAD_REF,
                    Some(iri.clone()),
                    Some("`@ref` must be a string path".to_string()),
                )),
            }
            continue;
        }

        match resolve_rollup(map, &relations, interp) {
            Ok(Value::Undefined) => (),
            Ok(v) => out.materialized.push((key.as_str().into(), v)),
            Err(e) => out.diagnostics.push(Diagnostic::error(
                codes::BAD_ROLLUP,
                Some(iri.clone()),
                Some(e.to_string()),
            )),
        }
    }

    out
}

enum PathSeg {
    Key(String),
    Index(usize),
}

// `a.b[0].c` — dotted segments with optional `[n]` indexing.
fn parse_path(path: &str) -> Result<Vec<PathSeg>> {
    let mut segs = vec![];
    for part in path.split('.') {
        let (name, indexes) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            _ => (part, ""),
        };
        if name.is_empty() {
            bail!("empty path segment in `{path}`");
        }
        segs.push(PathSeg::Key(name.to_string()));
        let mut rest = indexes;
        while let Some(stripped) = rest.strip_prefix('[') {
            let end = stripped
                .find(']')
                .ok_or_else(|| anyhow!("unclosed `[` in `{path}`"))?;
            let idx: usize = stripped[..end]
                .parse()
                .map_err(|_| anyhow!("invalid index in `{path}`"))?;
            segs.push(PathSeg::Index(idx));
            rest = &stripped[end + 1..];
        }
    }
    Ok(segs)
}

fn walk_path(mut current: Value, segs: &[PathSeg]) -> Value {
    for seg in segs {
        current = match (seg, &current) {
            (PathSeg::Key(k), Value::Object(map)) => {
                map.get(k.as_str()).cloned().unwrap_or(Value::Undefined)
            }
            (PathSeg::Index(i), Value::Array(items)) => {
                items.get(*i).cloned().unwrap_or(Value::Undefined)
            }
            // Missing segments yield undefined, not an error.
            _ => Value::Undefined,
        };
    }
    current
}

/// Resolve an `@ref` path against the relation table. The first
/// segment names the relation; an unknown relation is an error, while
/// missing inner segments resolve to undefined.
fn resolve_ref(path: &str, relations: &BTreeMap<Rc<str>, Value>) -> Result<Value> {
    let segs = parse_path(path)?;
    let (first, rest) = match segs.split_first() {
        Some(s) => s,
        _ => bail!("empty `@ref` path"),
    };
    let alias = match first {
        PathSeg::Key(k) => k,
        _ => bail!("`@ref` path must start with a relation alias"),
    };
    let root = relations
        .get(alias.as_str())
        .ok_or_else(|| anyhow!("unknown relation `{alias}`"))?;
    Ok(walk_path(root.clone(), rest))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RollupAgg {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    First,
    Last,
    Concat,
    Unique,
    All,
}

impl RollupAgg {
    fn parse(s: &str) -> Result<RollupAgg> {
        Ok(match s {
            "sum" => RollupAgg::Sum,
            "avg" => RollupAgg::Avg,
            "count" => RollupAgg::Count,
            "min" => RollupAgg::Min,
            "max" => RollupAgg::Max,
            "first" => RollupAgg::First,
            "last" => RollupAgg::Last,
            "concat" => RollupAgg::Concat,
            "unique" => RollupAgg::Unique,
            "all" => RollupAgg::All,
            _ => bail!("unknown rollup aggregate `{s}`"),
        })
    }
}

struct RollupSpec {
    relation: String,
    property: String,
    select: Option<String>,
    filter: Option<String>,
    aggregate: RollupAgg,
}

// Shorthand `"relation.property.select:aggregate"`, or the object form
// `{ relation, property, filter?, select?, aggregate }`. Sibling keys
// of a shorthand `@rollup` override its parts.
fn parse_rollup_spec(map: &BTreeMap<Rc<str>, Value>) -> Result<RollupSpec> {
    let mut spec = match map.get("@rollup") {
        Some(Value::String(shorthand)) => {
            let (path, agg) = shorthand
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("rollup shorthand is `relation.property.select:aggregate`"))?;
            let parts: Vec<&str> = path.split('.').collect();
            if parts.len() < 3 {
                bail!("rollup shorthand is `relation.property.select:aggregate`");
            }
            RollupSpec {
                relation: parts[0].to_string(),
                property: parts[1..parts.len() - 1].join("."),
                select: Some(parts[parts.len() - 1].to_string()),
                filter: None,
                aggregate: RollupAgg::parse(agg)?,
            }
        }
        Some(Value::Object(obj)) => {
            let relation = match obj.get("relation") {
                Some(Value::String(s)) => s.to_string(),
                _ => bail!("rollup requires a `relation`"),
            };
            let property = match obj.get("property") {
                Some(Value::String(s)) => s.to_string(),
                _ => bail!("rollup requires a `property`"),
            };
            let select = match obj.get("select") {
                Some(Value::String(s)) => Some(s.to_string()),
                _ => None,
            };
            let filter = match obj.get("filter") {
                Some(Value::String(s)) => Some(s.to_string()),
                _ => None,
            };
            let aggregate = match obj.get("aggregate") {
                Some(Value::String(s)) => RollupAgg::parse(s)?,
                _ => bail!("rollup requires an `aggregate`"),
            };
            RollupSpec {
                relation,
                property,
                select,
                filter,
                aggregate,
            }
        }
        _ => bail!("`@rollup` must be a string or object"),
    };

    if let Some(Value::String(f)) = map.get("filter") {
        spec.filter = Some(f.to_string());
    }
    if let Some(Value::String(s)) = map.get("select") {
        spec.select = Some(s.to_string());
    }
    if let Some(Value::String(a)) = map.get("aggregate") {
        spec.aggregate = RollupAgg::parse(a)?;
    }

    Ok(spec)
}

fn resolve_rollup(
    map: &BTreeMap<Rc<str>, Value>,
    relations: &BTreeMap<Rc<str>, Value>,
    interp: &mut Interpreter,
) -> Result<Value> {
    let spec = parse_rollup_spec(map)?;

    let root = relations
        .get(spec.relation.as_str())
        .ok_or_else(|| anyhow!("unknown relation `{}`", spec.relation))?;
    let items = match walk_path(root.clone(), &parse_path(&spec.property)?) {
        Value::Array(items) => items.as_ref().clone(),
        Value::Undefined => vec![],
        other => vec![other],
    };

    // The filter is an ordinary boolean expression evaluated against
    // each item, which subsumes the single-comparison form.
    let kept: Vec<Value> = match &spec.filter {
        Some(filter) => {
            let ast = parser::parse_expression("filter", filter)?;
            let mut kept = vec![];
            for item in items {
                // Item fields shadow document-level names inside the filter.
                match item.as_object() {
                    Ok(fields) => interp.push_scope(
                        fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    ),
                    _ => interp.push_scope(Default::default()),
                }
                let keep = interp.eval_with_this(&ast, item.clone());
                interp.pop_scope();
                if keep?.is_truthy() {
                    kept.push(item);
                }
            }
            kept
        }
        _ => items,
    };

    let selected: Vec<Value> = match &spec.select {
        Some(field) => kept
            .iter()
            .map(|item| walk_path(item.clone(), &parse_path(field).unwrap_or_default()))
            .filter(|v| !v.is_undefined())
            .collect(),
        _ => kept,
    };

    aggregate_rollup(spec.aggregate, selected)
}

fn aggregate_rollup(agg: RollupAgg, values: Vec<Value>) -> Result<Value> {
    enum Acc {
        Num(Number),
        Quant(Quantity),
    }

    let numeric = |v: &Value| -> Option<Acc> {
        match v {
            Value::Number(n) => Some(Acc::Num(n.clone())),
            Value::Quantity(q) => Some(Acc::Quant(q.as_ref().clone())),
            Value::String(s) => Number::from_str(s.trim()).ok().map(Acc::Num),
            _ => None,
        }
    };

    let fold_sum = |values: &[Value]| -> Result<Option<Acc>> {
        let mut acc: Option<Acc> = None;
        for v in values {
            let x = match numeric(v) {
                Some(x) => x,
                _ => continue,
            };
            acc = Some(match (acc, x) {
                (None, x) => x,
                (Some(Acc::Num(a)), Acc::Num(b)) => Acc::Num(a.add(&b)?),
                (Some(Acc::Quant(a)), Acc::Quant(b)) => Acc::Quant(a.add(&b)?),
                _ => bail!("rollup cannot mix quantities with numbers"),
            });
        }
        Ok(acc)
    };

    Ok(match agg {
        RollupAgg::Count => Value::from(values.len()),
        RollupAgg::Sum => match fold_sum(&values)? {
            Some(Acc::Num(n)) => Value::Number(n),
            Some(Acc::Quant(q)) => Value::from(q),
            _ => Value::from(0u64),
        },
        RollupAgg::Avg => {
            let n = values.iter().filter(|v| numeric(v).is_some()).count();
            if n == 0 {
                return Ok(Value::Undefined);
            }
            let divisor = Number::from(n);
            match fold_sum(&values)? {
                Some(Acc::Num(t)) => Value::Number(t.divide(&divisor)?),
                Some(Acc::Quant(q)) => Value::from(q.scale_div(&divisor)?),
                _ => Value::Undefined,
            }
        }
        RollupAgg::Min | RollupAgg::Max => {
            let mut best: Option<Value> = None;
            for v in &values {
                if v.is_null() || v.is_undefined() {
                    continue;
                }
                best = Some(match best {
                    None => v.clone(),
                    Some(b) => {
                        let take = if agg == RollupAgg::Min { v < &b } else { v > &b };
                        if take {
                            v.clone()
                        } else {
                            b
                        }
                    }
                });
            }
            best.unwrap_or(Value::Undefined)
        }
        RollupAgg::First => values.first().cloned().unwrap_or(Value::Undefined),
        RollupAgg::Last => values.last().cloned().unwrap_or(Value::Undefined),
        RollupAgg::Concat => Value::String(
            values
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(", ")
                .into(),
        ),
        RollupAgg::Unique => {
            let mut seen = std::collections::BTreeSet::new();
            let mut out = vec![];
            for v in values {
                if seen.insert(v.clone()) {
                    out.push(v);
                }
            }
            Value::from(out)
        }
        RollupAgg::All => Value::from(values),
    })
}
