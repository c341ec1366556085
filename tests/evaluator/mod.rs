// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use ldcalc::{codes, EvalResult, Evaluator, Severity, Value};

fn errors(result: &EvalResult) -> Vec<&'static str> {
    result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.code)
        .collect()
}

fn triple_object<'a>(result: &'a EvalResult, predicate: &str) -> Option<&'a str> {
    result
        .triples
        .iter()
        .find(|t| t.p.as_ref() == predicate)
        .map(|t| t.o.as_ref())
}

#[test]
fn arithmetic_directive() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:a",
            "revenue": 100000,
            "growth": 0.15,
            "next": {"@expr": "revenue*(1+growth)"}
        }"#,
    );
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert_eq!(
        result.value["next"].to_triple_text().as_deref(),
        Some("115000")
    );
    let t = result
        .triples
        .iter()
        .find(|t| t.p.as_ref() == "https://ex/next");
    match t {
        Some(t) => {
            assert_eq!(t.s.as_ref(), "https://ex/a");
            assert_eq!(t.o.as_ref(), "115000");
        }
        None => panic!("expected a derived triple for `next`"),
    }
}

#[test]
fn failed_constraint_emits_a_diagnostic_and_no_triple() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:b",
            "x": -1,
            "c": {"@constraint": "x>=0"}
        }"#,
    );
    assert_eq!(errors(&result), vec![codes::CONSTRAINT_FAILED]);
    let diag = &result.diagnostics[0];
    assert_eq!(diag.path.as_deref(), Some("https://ex/c"));
    assert!(triple_object(&result, "https://ex/c").is_none());
}

#[test]
fn rollup_with_filter() -> Result<()> {
    let mut evaluator = Evaluator::new();
    evaluator.add_relation(
        "projects",
        Value::from_json_str(
            r#"{"items": [
                {"budget": 100, "status": "active"},
                {"budget": 50, "status": "archived"}
            ]}"#,
        )?,
    );
    let result = evaluator.eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:main",
            "totalActive": {
                "@rollup": "projects.items.budget:sum",
                "filter": "status == 'active'"
            }
        }"#,
    );
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    assert_eq!(
        result.value["totalActive"].to_triple_text().as_deref(),
        Some("100")
    );
    Ok(())
}

#[test]
fn ref_resolves_paths_and_missing_segments_are_undefined() -> Result<()> {
    let mut evaluator = Evaluator::new();
    evaluator.add_relation(
        "org",
        Value::from_json_str(r#"{"teams": [{"name": "core"}, {"name": "infra"}]}"#)?,
    );
    let result = evaluator.eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:main",
            "lead": {"@ref": "org.teams[1].name"},
            "nothing": {"@ref": "org.teams[5].name"},
            "broken": {"@ref": "unknown.x"}
        }"#,
    );
    assert_eq!(
        result.value["lead"].to_triple_text().as_deref(),
        Some("infra")
    );
    assert!(result.value["nothing"].is_undefined());
    assert_eq!(errors(&result), vec![codes::BAD_REF]);
    Ok(())
}

#[test]
fn currency_addition_truncates_to_five_decimals() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:m",
            "a": "100 USD",
            "b": "50 USD",
            "sum": {"@expr": "a+b"}
        }"#,
    );
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert_eq!(
        triple_object(&result, "https://ex/sum"),
        Some("150.00000 USD")
    );
}

#[test]
fn mixed_currencies_are_a_unit_mismatch() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:m",
            "a": "100 USD",
            "b": "50 EUR",
            "sum": {"@expr": "a+b"}
        }"#,
    );
    assert_eq!(errors(&result), vec![codes::UNIT_MISMATCH]);
    assert!(triple_object(&result, "https://ex/sum").is_none());
}

#[test]
fn divergent_cycle_hits_the_fixpoint_limit() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:f",
            "a": {"@expr": "b+1"},
            "b": {"@expr": "a-1"},
            "other": {"@expr": "2+2"}
        }"#,
    );
    assert_eq!(errors(&result), vec![codes::FIXPOINT_LIMIT]);
    assert!(triple_object(&result, "https://ex/a").is_none());
    assert!(triple_object(&result, "https://ex/b").is_none());

    // Other properties are unaffected.
    assert_eq!(triple_object(&result, "https://ex/other"), Some("4"));
}

#[test]
fn convergent_cycle_stabilizes() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:f",
            "a": {"@expr": "$min([b, 10])"},
            "b": {"@expr": "a ?? 0"}
        }"#,
    );
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert_eq!(triple_object(&result, "https://ex/a"), Some("10"));
    assert_eq!(triple_object(&result, "https://ex/b"), Some("10"));
}

#[test]
fn signature_is_stable_across_evaluations_and_key_order() -> Result<()> {
    let doc_a = r#"{
        "@context": {"ex": "https://ex/"},
        "@id": "ex:s",
        "revenue": 100000,
        "growth": 0.15,
        "next": {"@expr": "revenue*(1+growth)"}
    }"#;
    // Same document, different key order.
    let doc_b = r#"{
        "growth": 0.15,
        "next": {"@expr": "revenue*(1+growth)"},
        "revenue": 100000,
        "@id": "ex:s",
        "@context": {"ex": "https://ex/"}
    }"#;

    let make = || {
        let mut e = Evaluator::new();
        e.set_secret(b"shared-secret".to_vec());
        e
    };

    let ra = make().eval_json_str(doc_a);
    let rb = make().eval_json_str(doc_b);
    let rc = make().eval_json_str(doc_a);

    assert!(ra.signature.is_some());
    assert_eq!(ra.signature, rc.signature);
    assert_eq!(ra.payload, rb.payload);
    assert_eq!(ra.signature, rb.signature);
    Ok(())
}

#[test]
fn document_query_over_seeded_triples() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:q",
            "items": [
                {"budget": 100, "status": "active"},
                {"budget": 50, "status": "archived"},
                {"budget": 70, "status": "active"}
            ],
            "activeTotal": {
                "@query": {
                    "patterns": [
                        ["?i", "ex:status", "active"],
                        ["?i", "ex:budget", "?b"]
                    ],
                    "select": [{"agg": "sum", "expr": "b", "as": "total"}]
                }
            }
        }"#,
    );
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert_eq!(
        result.value["activeTotal"].to_triple_text().as_deref(),
        Some("170")
    );
    assert_eq!(triple_object(&result, "https://ex/activeTotal"), Some("170"));
}

#[test]
fn view_directives_behave_like_expressions() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:v",
            "v": {"@view": {"@expr": "2*3", "@stable": true}}
        }"#,
    );
    assert!(errors(&result).is_empty());
    assert_eq!(triple_object(&result, "https://ex/v"), Some("6"));
}

#[test]
fn multiple_directives_surface_a_warning_and_first_wins() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:w",
            "x": {"@expr": "1+1", "@constraint": "false"}
        }"#,
    );
    let warnings: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, codes::SCHEMA_ERROR);
    assert_eq!(triple_object(&result, "https://ex/x"), Some("2"));
}

#[test]
fn expression_failures_do_not_stop_evaluation() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:e",
            "bad": {"@expr": "1/0"},
            "good": {"@expr": "21*2"}
        }"#,
    );
    assert_eq!(errors(&result), vec![codes::DIV_BY_ZERO]);
    assert_eq!(triple_object(&result, "https://ex/good"), Some("42"));
    assert!(triple_object(&result, "https://ex/bad").is_none());
}

#[test]
fn parse_failures_omit_the_node() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:p",
            "broken": {"@expr": "1 +"},
            "ok": {"@expr": "1"}
        }"#,
    );
    assert_eq!(errors(&result), vec![codes::EXPR_ERR]);
    assert_eq!(triple_object(&result, "https://ex/ok"), Some("1"));
}

#[test]
fn non_object_documents_are_schema_errors() {
    let result = Evaluator::new().eval_json_str("[1, 2, 3]");
    assert_eq!(errors(&result), vec![codes::SCHEMA_ERROR]);
    assert!(result.triples.is_empty());
}

#[test]
fn cancellation_reports_timeout() {
    let flag = Arc::new(AtomicBool::new(true));
    let mut evaluator = Evaluator::new();
    evaluator.set_cancel_flag(flag);
    let result = evaluator.eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:t",
            "x": {"@expr": "1+1"}
        }"#,
    );
    assert_eq!(errors(&result), vec![codes::TIMEOUT]);
    assert!(triple_object(&result, "https://ex/x").is_none());
}

#[test]
fn chained_dependencies_evaluate_in_order() {
    let result = Evaluator::new().eval_json_str(
        r#"{
            "@context": {"ex": "https://ex/"},
            "@id": "ex:chain",
            "base": 10,
            "doubled": {"@expr": "base * 2"},
            "final": {"@expr": "doubled + 1"}
        }"#,
    );
    assert!(errors(&result).is_empty(), "{:?}", result.diagnostics);
    assert_eq!(triple_object(&result, "https://ex/doubled"), Some("20"));
    assert_eq!(triple_object(&result, "https://ex/final"), Some("21"));
}
