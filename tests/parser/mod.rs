// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use ldcalc::{parse_expression, BinOp, Expr};

#[test]
fn multiplication_binds_tighter_than_addition() -> Result<()> {
    let ast = parse_expression("t", "1 + 2 * 3")?;
    match ast {
        Expr::Binary { op, rhs, .. } => {
            assert_eq!(op, BinOp::Add);
            assert!(matches!(
                *rhs,
                Expr::Binary {
                    op: BinOp::Mul,
                    ..
                }
            ));
        }
        other => panic!("expected binary add, got {other:?}"),
    }
    Ok(())
}

#[test]
fn power_is_right_associative() -> Result<()> {
    let ast = parse_expression("t", "2 ** 3 ** 2")?;
    match ast {
        Expr::Binary { op, lhs, rhs, .. } => {
            assert_eq!(op, BinOp::Pow);
            assert!(matches!(*lhs, Expr::Number(..)));
            assert!(matches!(
                *rhs,
                Expr::Binary {
                    op: BinOp::Pow,
                    ..
                }
            ));
        }
        other => panic!("expected pow, got {other:?}"),
    }
    Ok(())
}

#[test]
fn comparison_binds_tighter_than_logic() -> Result<()> {
    let ast = parse_expression("t", "a > 1 and b < 2")?;
    match ast {
        Expr::Binary { op, lhs, rhs, .. } => {
            assert_eq!(op, BinOp::And);
            assert!(matches!(*lhs, Expr::Binary { op: BinOp::Gt, .. }));
            assert!(matches!(*rhs, Expr::Binary { op: BinOp::Lt, .. }));
        }
        other => panic!("expected and, got {other:?}"),
    }
    Ok(())
}

#[test]
fn parenthesized_lambda_heads() -> Result<()> {
    match parse_expression("t", "(x, y) => x + y")? {
        Expr::Lambda { params, .. } => {
            assert_eq!(params.len(), 2);
            assert_eq!(params[0].as_ref(), "x");
            assert_eq!(params[1].as_ref(), "y");
        }
        other => panic!("expected lambda, got {other:?}"),
    }

    match parse_expression("t", "x => x * 2")? {
        Expr::Lambda { params, .. } => assert_eq!(params.len(), 1),
        other => panic!("expected lambda, got {other:?}"),
    }

    // A parenthesized expression is not a lambda head.
    assert!(matches!(
        parse_expression("t", "(x)")?,
        Expr::Ident(..)
    ));
    Ok(())
}

#[test]
fn postfix_chains() -> Result<()> {
    let ast = parse_expression("t", "items[0].budget")?;
    match ast {
        Expr::Member { recv, field, .. } => {
            assert_eq!(field.as_ref(), "budget");
            assert!(matches!(*recv, Expr::IndexAccess { .. }));
        }
        other => panic!("expected member access, got {other:?}"),
    }
    Ok(())
}

#[test]
fn array_and_object_literals() -> Result<()> {
    assert!(matches!(
        parse_expression("t", "[1, 2, 3]")?,
        Expr::Array { .. }
    ));
    match parse_expression("t", "{a: 1, \"b c\": 2}")? {
        Expr::Object { fields, .. } => {
            assert_eq!(fields.len(), 2);
            assert_eq!(fields[0].0.as_ref(), "a");
            assert_eq!(fields[1].0.as_ref(), "b c");
        }
        other => panic!("expected object literal, got {other:?}"),
    }
    Ok(())
}

#[test]
fn ternary_nests_to_the_right() -> Result<()> {
    let ast = parse_expression("t", "a ? 1 : b ? 2 : 3")?;
    match ast {
        Expr::Ternary { els, .. } => assert!(matches!(*els, Expr::Ternary { .. })),
        other => panic!("expected ternary, got {other:?}"),
    }
    Ok(())
}

#[test]
fn free_variables_exclude_lambda_params_and_builtins() -> Result<()> {
    let ast = parse_expression("t", "$sum(items) + (x => x * rate)(base)")?;
    let vars = ast.free_vars();
    let names: Vec<&str> = vars.iter().map(|v| v.as_ref()).collect();
    assert_eq!(names, vec!["base", "items", "rate"]);
    Ok(())
}

#[test]
fn trailing_tokens_fail() {
    assert!(parse_expression("t", "1 + 2 extra").is_err());
    assert!(parse_expression("t", "a +").is_err());
    assert!(parse_expression("t", "(a").is_err());
}
