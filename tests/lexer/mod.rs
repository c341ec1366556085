// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use ldcalc::{Lexer, Source, Token, TokenKind};

fn get_tokens(source: &Source) -> Result<Vec<Token>> {
    let mut tokens = vec![];
    let mut lex = Lexer::new(source);
    loop {
        let tok = lex.next_token()?;
        tokens.push(tok.clone());
        if tok.0 == TokenKind::Eof {
            break;
        }
    }
    Ok(tokens)
}

fn texts(expr: &str) -> Result<Vec<String>> {
    let source = Source::from_contents("<test>".to_string(), expr.to_string())?;
    Ok(get_tokens(&source)?
        .iter()
        .map(|t| t.1.text().to_string())
        .collect())
}

#[test]
fn operators_and_identifiers() -> Result<()> {
    let toks = texts("a ** b ?? c && d || e => f == g != h <= i >= j")?;
    assert_eq!(
        toks,
        vec![
            "a", "**", "b", "??", "c", "&&", "d", "||", "e", "=>", "f", "==", "g", "!=", "h",
            "<=", "i", ">=", "j", ""
        ]
    );
    Ok(())
}

#[test]
fn builtin_and_query_identifiers() -> Result<()> {
    let toks = texts("$sum(?x) + _private")?;
    assert_eq!(toks, vec!["$sum", "(", "?x", ")", "+", "_private", ""]);
    Ok(())
}

#[test]
fn ternary_question_mark_is_a_symbol() -> Result<()> {
    // `? ` with a space is the ternary operator; `?x` is a variable.
    let toks = texts("a ? b : c")?;
    assert_eq!(toks, vec!["a", "?", "b", ":", "c", ""]);
    Ok(())
}

#[test]
fn comments_run_to_end_of_line() -> Result<()> {
    let toks = texts("a + 1 // the rest is ignored\n+ 2")?;
    assert_eq!(toks, vec!["a", "+", "1", "+", "2", ""]);
    Ok(())
}

#[test]
fn single_and_double_quoted_strings() -> Result<()> {
    let source = Source::from_contents(
        "<test>".to_string(),
        r#""double" 'single' "esc\"aped""#.to_string(),
    )?;
    let toks = get_tokens(&source)?;
    assert_eq!(toks.len(), 4);
    assert_eq!(toks[0].0, TokenKind::String);
    assert_eq!(toks[0].1.text(), "double");
    assert_eq!(toks[1].1.text(), "single");
    assert_eq!(toks[2].1.text(), r#"esc\"aped"#);
    Ok(())
}

#[test]
fn numbers() -> Result<()> {
    let toks = texts("0 42 3.14 1e5 2.5e-3")?;
    assert_eq!(toks, vec!["0", "42", "3.14", "1e5", "2.5e-3", ""]);
    Ok(())
}

#[test]
fn unterminated_string_is_an_error() -> Result<()> {
    let source = Source::from_contents("<test>".to_string(), "'oops".to_string())?;
    let mut lex = Lexer::new(&source);
    assert!(lex.next_token().is_err());
    Ok(())
}

#[test]
fn invalid_character_is_an_error() -> Result<()> {
    let source = Source::from_contents("<test>".to_string(), "a # b".to_string())?;
    let mut lex = Lexer::new(&source);
    assert!(lex.next_token().is_ok());
    assert!(lex.next_token().is_err());
    Ok(())
}
