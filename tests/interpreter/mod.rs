// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::rc::Rc;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use ldcalc::{parse_expression, Interpreter, UnitRegistry, Value};

fn interpreter() -> Interpreter {
    let now = Utc
        .with_ymd_and_hms(2024, 3, 15, 12, 0, 0)
        .single()
        .unwrap_or_default();
    Interpreter::new(Rc::new(UnitRegistry::default()), now)
}

fn eval(interp: &mut Interpreter, expr: &str) -> Result<Value> {
    let ast = parse_expression("test", expr)?;
    interp.eval(&ast)
}

fn eval_text(interp: &mut Interpreter, expr: &str) -> Result<String> {
    Ok(eval(interp, expr)?
        .to_triple_text()
        .unwrap_or_else(|| "<none>".to_string()))
}

#[test]
fn exact_decimal_arithmetic() -> Result<()> {
    let mut interp = interpreter();
    interp.set_global("revenue".into(), Value::from(100_000u64));
    interp.set_global("growth".into(), Value::from_json_str("0.15")?);
    assert_eq!(eval_text(&mut interp, "revenue*(1+growth)")?, "115000");
    Ok(())
}

#[test]
fn string_concatenation_wins_when_either_side_is_a_string() -> Result<()> {
    let mut interp = interpreter();
    assert_eq!(eval_text(&mut interp, "'a' + 'b'")?, "ab");
    assert_eq!(eval_text(&mut interp, "'n=' + 42")?, "n=42");
    assert_eq!(eval_text(&mut interp, "1 + '2'")?, "12");
    Ok(())
}

#[test]
fn quantity_strings_materialize_before_concatenation() -> Result<()> {
    let mut interp = interpreter();
    assert_eq!(eval_text(&mut interp, "'100 USD' + '50 USD'")?, "150.00000 USD");
    assert_eq!(eval_text(&mut interp, "'2 m' * '3 m'")?, "6 m*m");
    assert_eq!(eval_text(&mut interp, "'100 USD' * 2")?, "200.00000 USD");
    Ok(())
}

#[test]
fn incompatible_units_fail() {
    let mut interp = interpreter();
    let err = match eval(&mut interp, "'100 USD' + '50 EUR'") {
        Err(e) => e.to_string(),
        Ok(v) => panic!("expected unit mismatch, got {v}"),
    };
    assert!(err.contains("unit mismatch"), "{err}");
}

#[test]
fn division_by_zero_fails() {
    let mut interp = interpreter();
    let err = match eval(&mut interp, "1 / 0") {
        Err(e) => e.to_string(),
        Ok(v) => panic!("expected div error, got {v}"),
    };
    assert!(err.contains("div.by_zero"), "{err}");
}

#[test]
fn nullish_coalescing_and_short_circuit() -> Result<()> {
    let mut interp = interpreter();
    interp.set_global("present".into(), Value::from(7u64));
    assert_eq!(eval_text(&mut interp, "missing ?? 5")?, "5");
    assert_eq!(eval_text(&mut interp, "present ?? 5")?, "7");

    // `&&`/`||` return the deciding operand, not a coerced boolean.
    assert_eq!(eval_text(&mut interp, "0 && present")?, "0");
    assert_eq!(eval_text(&mut interp, "present && 3")?, "3");
    assert_eq!(eval_text(&mut interp, "'' || 'fallback'")?, "fallback");
    Ok(())
}

#[test]
fn lambdas_capture_their_scope() -> Result<()> {
    let mut interp = interpreter();
    interp.set_global("rate".into(), Value::from(2u64));
    assert_eq!(eval_text(&mut interp, "((x, y) => x + y)(2, 3)")?, "5");
    assert_eq!(eval_text(&mut interp, "(x => x * rate)(21)")?, "42");
    Ok(())
}

#[test]
fn builtins_and_aggregate_aliases() -> Result<()> {
    let mut interp = interpreter();
    assert_eq!(eval_text(&mut interp, "$round(2.5)")?, "2");
    assert_eq!(eval_text(&mut interp, "$round(1.2345, 2)")?, "1.23");
    assert_eq!(eval_text(&mut interp, "$upper('abc')")?, "ABC");
    assert_eq!(eval_text(&mut interp, "$sum([1, 2, 3])")?, "6");
    assert_eq!(eval_text(&mut interp, "sum([1, 2, 3])")?, "6");
    assert_eq!(eval_text(&mut interp, "avg([2, 4])")?, "3");
    assert_eq!(eval_text(&mut interp, "$join($split('a,b,c', ','), '-')")?, "a-b-c");
    assert_eq!(eval_text(&mut interp, "$if(1 > 2, 'yes', 'no')")?, "no");
    assert_eq!(eval_text(&mut interp, "$convert(1, 'km', 'm')")?, "1000");
    Ok(())
}

#[test]
fn date_builtins_use_the_evaluation_clock() -> Result<()> {
    let mut interp = interpreter();
    assert_eq!(eval_text(&mut interp, "$year($now())")?, "2024");
    assert_eq!(eval_text(&mut interp, "$month($now())")?, "3");
    assert_eq!(eval_text(&mut interp, "$formatDate($now())")?, "2024-03-15");
    assert_eq!(
        eval_text(&mut interp, "$daysBetween('2024-03-15', '2024-03-20')")?,
        "5"
    );
    Ok(())
}

#[test]
fn sibling_directives_resolve_through_auto_memoization() -> Result<()> {
    let mut interp = interpreter();
    let obj = Value::from_json_str(
        r#"{
            "price": 10,
            "total": {"@expr": "price * 2"},
            "padded": {"@expr": "total + 1"}
        }"#,
    )?;
    interp.set_global("o".into(), obj);
    assert_eq!(eval_text(&mut interp, "o.padded")?, "21");
    assert_eq!(eval_text(&mut interp, "o.total")?, "20");
    Ok(())
}

#[test]
fn cyclic_sibling_directives_fail() -> Result<()> {
    let mut interp = interpreter();
    let obj = Value::from_json_str(
        r#"{"a": {"@expr": "b"}, "b": {"@expr": "a"}}"#,
    )?;
    interp.set_global("o".into(), obj);
    let err = match eval(&mut interp, "o.a") {
        Err(e) => e.to_string(),
        Ok(v) => panic!("expected cycle error, got {v}"),
    };
    assert!(err.contains("cyclic"), "{err}");
    Ok(())
}

#[test]
fn missing_members_are_undefined() -> Result<()> {
    let mut interp = interpreter();
    interp.set_global("o".into(), Value::from_json_str(r#"{"x": 1}"#)?);
    assert!(eval(&mut interp, "o.missing")?.is_undefined());
    assert!(eval(&mut interp, "o.missing.deeper")?.is_undefined());
    Ok(())
}

#[test]
fn numeric_strings_compare_numerically() -> Result<()> {
    let mut interp = interpreter();
    assert_eq!(eval(&mut interp, "'10' > 5")?, Value::Bool(true));
    assert_eq!(eval(&mut interp, "'abc' == 'abc'")?, Value::Bool(true));
    Ok(())
}
