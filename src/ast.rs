// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::Span;
use crate::number::Number;

use std::collections::BTreeSet;
use std::rc::Rc;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinOp {
    Or,
    And,
    NullCoalesce,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Null(Span),
    Bool(Span, bool),
    Number(Span, Number),
    String(Span, Rc<str>),
    Ident(Span, Rc<str>),

    Array {
        span: Span,
        items: Vec<Expr>,
    },

    Object {
        span: Span,
        fields: Vec<(Rc<str>, Expr)>,
    },

    Unary {
        span: Span,
        op: UnaryOp,
        expr: Box<Expr>,
    },

    Binary {
        span: Span,
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Ternary {
        span: Span,
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },

    Member {
        span: Span,
        recv: Box<Expr>,
        field: Rc<str>,
    },

    IndexAccess {
        span: Span,
        recv: Box<Expr>,
        index: Box<Expr>,
    },

    Call {
        span: Span,
        callee: Box<Expr>,
        args: Vec<Expr>,
    },

    Lambda {
        span: Span,
        params: Vec<Rc<str>>,
        body: Rc<Expr>,
    },
}

impl Expr {
    pub fn span(&self) -> &Span {
        use Expr::*;
        match self {
            Null(s) | Bool(s, _) | Number(s, _) | String(s, _) | Ident(s, _) => s,
            Array { span, .. }
            | Object { span, .. }
            | Unary { span, .. }
            | Binary { span, .. }
            | Ternary { span, .. }
            | Member { span, .. }
            | IndexAccess { span, .. }
            | Call { span, .. }
            | Lambda { span, .. } => span,
        }
    }

    /// Free plain identifiers of the expression: everything resolved
    /// through the enclosing document rather than lambda parameters,
    /// `$` builtins or `?` query variables.
    pub fn free_vars(&self) -> BTreeSet<Rc<str>> {
        let mut out = BTreeSet::new();
        let mut bound = BTreeSet::new();
        self.collect_free_vars(&mut bound, &mut out);
        out
    }

    fn collect_free_vars(&self, bound: &mut BTreeSet<Rc<str>>, out: &mut BTreeSet<Rc<str>>) {
        use Expr::*;
        match self {
            Null(_) | Bool(..) | Number(..) | String(..) => (),
            Ident(_, name) => {
                if !name.starts_with('$')
                    && !name.starts_with('?')
                    && !bound.contains(name)
                    && !matches!(name.as_ref(), "true" | "false" | "null")
                {
                    out.insert(name.clone());
                }
            }
            Array { items, .. } => {
                for item in items {
                    item.collect_free_vars(bound, out);
                }
            }
            Object { fields, .. } => {
                for (_, value) in fields {
                    value.collect_free_vars(bound, out);
                }
            }
            Unary { expr, .. } => expr.collect_free_vars(bound, out),
            Binary { lhs, rhs, .. } => {
                lhs.collect_free_vars(bound, out);
                rhs.collect_free_vars(bound, out);
            }
            Ternary { cond, then, els, .. } => {
                cond.collect_free_vars(bound, out);
                then.collect_free_vars(bound, out);
                els.collect_free_vars(bound, out);
            }
            // `a.b` reads `a`; the field name is not an identifier.
            Member { recv, .. } => recv.collect_free_vars(bound, out),
            IndexAccess { recv, index, .. } => {
                recv.collect_free_vars(bound, out);
                index.collect_free_vars(bound, out);
            }
            Call { callee, args, .. } => {
                callee.collect_free_vars(bound, out);
                for arg in args {
                    arg.collect_free_vars(bound, out);
                }
            }
            Lambda { params, body, .. } => {
                let added: Vec<Rc<str>> = params
                    .iter()
                    .filter(|p| bound.insert((*p).clone()))
                    .cloned()
                    .collect();
                body.collect_free_vars(bound, out);
                for p in added {
                    bound.remove(&p);
                }
            }
        }
    }
}
