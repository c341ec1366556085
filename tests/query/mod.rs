// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::rc::Rc;

use anyhow::Result;
use chrono::Utc;
use ldcalc::{ContextMap, Interpreter, QueryAst, Triple, TripleStore, UnitRegistry, Value};

fn context() -> ContextMap {
    let json: serde_json::Value = match serde_json::from_str(r#"{"ex": "https://ex/"}"#) {
        Ok(v) => v,
        Err(_) => serde_json::Value::Null,
    };
    ContextMap::from_json(&json)
}

fn interpreter() -> Interpreter {
    Interpreter::new(Rc::new(UnitRegistry::default()), Utc::now())
}

fn store() -> TripleStore {
    let mut store = TripleStore::new();
    let mut add = |s: &str, p: &str, o: &str| {
        store.add(Triple::new(s.into(), p.into(), o.into()));
    };
    add("https://ex/p1", "https://ex/budget", "100");
    add("https://ex/p1", "https://ex/status", "active");
    add("https://ex/p1", "https://ex/owner", "ann");
    add("https://ex/p2", "https://ex/budget", "50");
    add("https://ex/p2", "https://ex/status", "archived");
    add("https://ex/p3", "https://ex/budget", "70");
    add("https://ex/p3", "https://ex/status", "active");
    store
}

fn query(json: &str) -> Result<QueryAst> {
    QueryAst::from_value(&Value::from_json_str(json)?, &context())
}

#[test]
fn pattern_matching_unifies_variables() -> Result<()> {
    let q = query(
        r#"{
            "patterns": [["?p", "ex:status", "active"], ["?p", "ex:budget", "?b"]],
            "select": ["?p", "?b"]
        }"#,
    )?;
    let out = q.execute(&store(), &mut interpreter())?;
    assert_eq!(out.rows.len(), 2);
    assert!(!out.used_filter);
    Ok(())
}

#[test]
fn filters_see_plain_and_prefixed_names() -> Result<()> {
    let q = query(
        r#"{
            "patterns": [["?p", "ex:budget", "?b"]],
            "filters": ["b > 60"],
            "select": ["?p", "?b"]
        }"#,
    )?;
    let out = q.execute(&store(), &mut interpreter())?;
    assert_eq!(out.rows.len(), 2);
    assert!(out.used_filter);
    Ok(())
}

#[test]
fn aggregation_without_group_by_folds_to_one_row() -> Result<()> {
    let q = query(
        r#"{
            "patterns": [["?p", "ex:budget", "?b"]],
            "select": [{"agg": "sum", "expr": "b", "as": "total"}]
        }"#,
    )?;
    let out = q.execute(&store(), &mut interpreter())?;
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.scalar().to_triple_text().as_deref(), Some("220"));
    Ok(())
}

#[test]
fn group_by_with_having() -> Result<()> {
    let q = query(
        r#"{
            "patterns": [["?p", "ex:status", "?s"], ["?p", "ex:budget", "?b"]],
            "groupBy": ["?s"],
            "select": ["?s", {"agg": "sum", "expr": "b", "as": "total"}],
            "having": ["total > 60"]
        }"#,
    )?;
    let out = q.execute(&store(), &mut interpreter())?;
    assert_eq!(out.rows.len(), 1);
    let row = &out.rows[0];
    assert_eq!(row[0].1.to_triple_text().as_deref(), Some("active"));
    assert_eq!(row[1].1.to_triple_text().as_deref(), Some("170"));
    Ok(())
}

#[test]
fn order_by_and_limit() -> Result<()> {
    let q = query(
        r#"{
            "patterns": [["?p", "ex:budget", "?b"]],
            "orderBy": ["desc b"],
            "limit": 2,
            "select": ["?b"]
        }"#,
    )?;
    let out = q.execute(&store(), &mut interpreter())?;
    assert!(out.used_sort);
    assert!(out.used_paginate);
    let values: Vec<String> = out
        .rows
        .iter()
        .filter_map(|r| r[0].1.to_triple_text())
        .collect();
    assert_eq!(values, vec!["100", "70"]);
    Ok(())
}

#[test]
fn optional_groups_left_join() -> Result<()> {
    let q = query(
        r#"{
            "patterns": [
                ["?p", "ex:budget", "?b"],
                {"optional": [["?p", "ex:owner", "?o"]]}
            ],
            "select": ["?p", "?o"]
        }"#,
    )?;
    let out = q.execute(&store(), &mut interpreter())?;
    assert_eq!(out.rows.len(), 3);
    let with_owner = out
        .rows
        .iter()
        .filter(|r| !matches!(r[1].1, Value::Null))
        .count();
    assert_eq!(with_owner, 1);
    Ok(())
}

#[test]
fn count_over_empty_matches_is_zero() -> Result<()> {
    let q = query(
        r#"{
            "patterns": [["?p", "ex:missing", "?x"]],
            "select": [{"agg": "count"}]
        }"#,
    )?;
    let out = q.execute(&store(), &mut interpreter())?;
    assert_eq!(out.scalar().to_triple_text().as_deref(), Some("0"));
    Ok(())
}

#[test]
fn malformed_queries_are_errors() {
    assert!(query(r#"{"select": ["?x"]}"#).is_err());
    assert!(query(r#"{"patterns": [["?a", "?b"]], "select": ["?a"]}"#).is_err());
    assert!(query(r#"{"patterns": [], "select": [{"agg": "median"}]}"#).is_err());
}
