// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::builtins::{self, BuiltinCtx};
use crate::lexer::Span;
use crate::number::Number;
use crate::parser;
use crate::units::{Quantity, Unit, UnitRegistry};
use crate::value::{FuncValue, Scope, Value};

use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

/// Key of the evaluation-owned directive cache: object identity plus
/// property name. The input document is never mutated.
type MemoKey = (usize, Rc<str>);

pub struct Interpreter {
    scopes: Vec<Scope>,
    this_stack: Vec<Value>,
    units: Rc<UnitRegistry>,
    ctx: BuiltinCtx,
    memo: std::collections::BTreeMap<MemoKey, Value>,
    in_progress: BTreeSet<MemoKey>,
}

impl Interpreter {
    pub fn new(units: Rc<UnitRegistry>, now: DateTime<Utc>) -> Interpreter {
        Interpreter {
            scopes: vec![Scope::new()],
            this_stack: vec![],
            units,
            ctx: BuiltinCtx { now },
            memo: std::collections::BTreeMap::new(),
            in_progress: BTreeSet::new(),
        }
    }

    pub fn units(&self) -> &UnitRegistry {
        &self.units
    }

    /// Bind a name in the outermost (document) scope.
    pub fn set_global(&mut self, name: Rc<str>, value: Value) {
        if let Some(scope) = self.scopes.first_mut() {
            scope.insert(name, value);
        }
    }

    pub fn push_scope(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.eval_expr(expr)
    }

    pub fn eval_with_this(&mut self, expr: &Expr, this: Value) -> Result<Value> {
        self.this_stack.push(this);
        let r = self.eval_expr(expr);
        self.this_stack.pop();
        r
    }

    /// Name resolution: scope chain, then properties of the hidden
    /// `$this` binding, then aggregate names, then the `$` builtins.
    fn lookup_var(&mut self, span: &Span, name: &Rc<str>) -> Result<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Ok(v.clone());
            }
        }

        if name.as_ref() == "$this" {
            return Ok(self.this_stack.last().cloned().unwrap_or(Value::Undefined));
        }

        if let Some(this) = self.this_stack.last().cloned() {
            let v = self.get_member(span, &this, name)?;
            if !v.is_undefined() {
                return Ok(v);
            }
        }

        let builtin_name: Option<&str> = match name.as_ref() {
            "sum" => Some("$sum"),
            "avg" => Some("$avg"),
            "min" => Some("$min"),
            "max" => Some("$max"),
            "count" => Some("$count"),
            n if n.starts_with('$') => Some(n),
            _ => None,
        };
        if let Some(n) = builtin_name {
            if let Some((key, _)) = builtins::BUILTINS.get_key_value(n) {
                return Ok(Value::Func(Rc::new(FuncValue::Builtin(key))));
            }
        }

        Ok(Value::Undefined)
    }

    /// Property read with auto-memoization: a property whose raw value
    /// is an `@expr`/`@view` directive is lazily evaluated with the
    /// enclosing object as `$this`, and the result is cached for the
    /// remainder of the evaluation.
    pub fn get_member(&mut self, span: &Span, recv: &Value, field: &str) -> Result<Value> {
        let map = match recv {
            Value::Object(map) => map,
            _ => return Ok(Value::Undefined),
        };

        let raw = match map.get(field) {
            Some(v) => v.clone(),
            _ => return Ok(Value::Undefined),
        };

        let expr_text = match directive_expr_text(&raw) {
            Some(t) => t,
            _ => return Ok(raw),
        };

        let key: MemoKey = (Rc::as_ptr(map) as usize, field.into());
        if let Some(v) = self.memo.get(&key) {
            return Ok(v.clone());
        }
        if !self.in_progress.insert(key.clone()) {
            bail!(span.error(&format!("cyclic property reference `{field}`")));
        }

        let result = (|| {
            let ast = parser::parse_expression(field, &expr_text)?;
            self.this_stack.push(recv.clone());
            let v = self.eval_expr(&ast);
            self.this_stack.pop();
            v
        })();

        self.in_progress.remove(&key);
        let v = result?;
        self.memo.insert(key, v.clone());
        Ok(v)
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Null(_) => Ok(Value::Null),
            Expr::Bool(_, b) => Ok(Value::Bool(*b)),
            Expr::Number(_, n) => Ok(Value::Number(n.clone())),
            Expr::String(_, s) => Ok(Value::String(s.clone())),
            Expr::Ident(span, name) => self.lookup_var(span, name),

            Expr::Array { items, .. } => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_expr(item)?);
                }
                Ok(Value::from(out))
            }

            Expr::Object { fields, .. } => {
                let mut map = std::collections::BTreeMap::new();
                for (key, value) in fields {
                    map.insert(key.clone(), self.eval_expr(value)?);
                }
                Ok(Value::from(map))
            }

            Expr::Unary { span, op, expr } => {
                let v = self.eval_expr(expr)?;
                self.eval_unary(span, *op, v)
            }

            Expr::Binary { span, op, lhs, rhs } => match op {
                BinOp::And => {
                    let l = self.eval_expr(lhs)?;
                    if !l.is_truthy() {
                        return Ok(l);
                    }
                    self.eval_expr(rhs)
                }
                BinOp::Or => {
                    let l = self.eval_expr(lhs)?;
                    if l.is_truthy() {
                        return Ok(l);
                    }
                    self.eval_expr(rhs)
                }
                BinOp::NullCoalesce => {
                    let l = self.eval_expr(lhs)?;
                    if l.is_undefined() || l.is_null() {
                        return Ok(self.eval_expr(rhs)?);
                    }
                    Ok(l)
                }
                _ => {
                    let l = self.eval_expr(lhs)?;
                    let r = self.eval_expr(rhs)?;
                    self.eval_binary(span, *op, l, r)
                }
            },

            Expr::Ternary {
                cond, then, els, ..
            } => {
                if self.eval_expr(cond)?.is_truthy() {
                    self.eval_expr(then)
                } else {
                    self.eval_expr(els)
                }
            }

            Expr::Member { span, recv, field } => {
                let recv_v = self.eval_expr(recv)?;
                self.get_member(span, &recv_v, field)
            }

            Expr::IndexAccess { span, recv, index } => {
                let recv_v = self.eval_expr(recv)?;
                let index_v = self.eval_expr(index)?;
                self.eval_index(span, &recv_v, &index_v)
            }

            Expr::Call { span, callee, args } => {
                // When the callee is a member expression, the member's
                // receiver becomes the call's `this`.
                let (fval, this) = match callee.as_ref() {
                    Expr::Member {
                        span: mspan,
                        recv,
                        field,
                    } => {
                        let recv_v = self.eval_expr(recv)?;
                        let f = self.get_member(mspan, &recv_v, field)?;
                        (f, Some(recv_v))
                    }
                    _ => (self.eval_expr(callee)?, None),
                };
                let mut argv = Vec::with_capacity(args.len());
                for arg in args {
                    argv.push(self.eval_expr(arg)?);
                }
                self.call_function(span, &fval, this, argv)
            }

            Expr::Lambda { params, body, .. } => Ok(Value::Func(Rc::new(FuncValue::Closure {
                params: params.clone(),
                body: body.clone(),
                captured: self.scopes.clone(),
            }))),
        }
    }

    pub fn call_function(
        &mut self,
        span: &Span,
        fval: &Value,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let func = match fval {
            Value::Func(f) => f.clone(),
            _ => bail!(span.error(&format!("`{}` is not callable", fval.type_name()))),
        };
        match func.as_ref() {
            // Builtins ignore the receiver.
            FuncValue::Builtin(name) => match builtins::BUILTINS.get(name) {
                Some((f, _)) => f(span, &args, &self.ctx),
                _ => bail!(span.error(&format!("unknown builtin `{name}`"))),
            },
            FuncValue::Closure {
                params,
                body,
                captured,
            } => {
                let saved = std::mem::take(&mut self.scopes);
                self.scopes = captured.clone();
                let mut args_scope = Scope::new();
                for (i, p) in params.iter().enumerate() {
                    args_scope.insert(p.clone(), args.get(i).cloned().unwrap_or(Value::Undefined));
                }
                self.scopes.push(args_scope);
                let pushed_this = match this {
                    Some(t) => {
                        self.this_stack.push(t);
                        true
                    }
                    _ => false,
                };
                let r = self.eval_expr(body);
                if pushed_this {
                    self.this_stack.pop();
                }
                self.scopes = saved;
                r
            }
        }
    }

    fn eval_unary(&mut self, span: &Span, op: UnaryOp, v: Value) -> Result<Value> {
        match op {
            UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
            UnaryOp::Plus => match &v {
                Value::Number(_) | Value::Quantity(_) => Ok(v),
                _ => bail!(span.error("unary `+` expects a numeric operand")),
            },
            UnaryOp::Minus => match &v {
                Value::Number(n) => Ok(Value::Number(n.neg())),
                Value::Quantity(q) => {
                    Ok(Value::from(q.scale(&Number::from(-1i64))?))
                }
                _ => bail!(span.error("unary `-` expects a numeric operand")),
            },
        }
    }

    fn eval_index(&mut self, span: &Span, recv: &Value, index: &Value) -> Result<Value> {
        match (recv, index) {
            (Value::Array(a), Value::Number(n)) => match n.as_u64() {
                Some(i) if (i as usize) < a.len() => Ok(a[i as usize].clone()),
                _ => Ok(Value::Undefined),
            },
            (Value::Object(_), Value::String(key)) => self.get_member(span, recv, key),
            (Value::Null | Value::Undefined, _) => Ok(Value::Undefined),
            _ => bail!(span.error("invalid index expression")),
        }
    }

    // `+` concatenates when either operand is a string, unless both
    // sides materialize as quantities (`"100 USD" + "50 USD"`).
    fn eval_binary(&mut self, span: &Span, op: BinOp, l: Value, r: Value) -> Result<Value> {
        match op {
            BinOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
            BinOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ord = self.compare(span, &l, &r)?;
                Ok(Value::Bool(match op {
                    BinOp::Lt => ord == std::cmp::Ordering::Less,
                    BinOp::Le => ord != std::cmp::Ordering::Greater,
                    BinOp::Gt => ord == std::cmp::Ordering::Greater,
                    _ => ord != std::cmp::Ordering::Less,
                }))
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                self.eval_arith(span, op, l, r)
            }
            _ => bail!(span.error("internal error: unexpected operator")),
        }
    }

    fn numericish(&self, v: &Value) -> Option<NumOperand> {
        match v {
            Value::Number(n) => Some(NumOperand::Num(n.clone())),
            Value::Quantity(q) => Some(NumOperand::Quant(q.as_ref().clone())),
            Value::String(s) => self.units.parse_quantity(s).map(NumOperand::Quant),
            _ => None,
        }
    }

    // Unlike arithmetic, comparison also materializes plain numeric
    // strings, so that values read back from triples order correctly.
    fn comparable(&self, v: &Value) -> Option<NumOperand> {
        if let Value::String(s) = v {
            if let Ok(n) = std::str::FromStr::from_str(s.trim()) {
                return Some(NumOperand::Num(n));
            }
        }
        self.numericish(v)
    }

    fn eval_arith(&mut self, span: &Span, op: BinOp, l: Value, r: Value) -> Result<Value> {
        use NumOperand::*;

        let operands = match (self.numericish(&l), self.numericish(&r)) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        };

        if let Some((a, b)) = operands {
            let result = match (op, a, b) {
                (BinOp::Add, Num(a), Num(b)) => Value::Number(a.add(&b)?),
                (BinOp::Sub, Num(a), Num(b)) => Value::Number(a.sub(&b)?),
                (BinOp::Mul, Num(a), Num(b)) => Value::Number(a.mul(&b)?),
                (BinOp::Div, Num(a), Num(b)) => Value::Number(a.divide(&b)?),
                (BinOp::Mod, Num(a), Num(b)) => Value::Number(a.modulo(&b)?),
                (BinOp::Pow, Num(a), Num(b)) => Value::Number(a.pow(&b)?),

                (BinOp::Add, Quant(a), Quant(b)) => quantity_value(a.add(&b)?),
                (BinOp::Sub, Quant(a), Quant(b)) => quantity_value(a.sub(&b)?),
                (BinOp::Mul, Quant(a), Quant(b)) => quantity_value(a.mul(&b)?),
                (BinOp::Div, Quant(a), Quant(b)) => quantity_value(a.div(&b)?),

                // Scalars scale quantities and preserve the unit.
                (BinOp::Mul, Quant(a), Num(k)) | (BinOp::Mul, Num(k), Quant(a)) => {
                    quantity_value(a.scale(&k)?)
                }
                (BinOp::Div, Quant(a), Num(k)) => quantity_value(a.scale_div(&k)?),
                (BinOp::Div, Num(k), Quant(a)) => {
                    quantity_value(Quantity::new(k, Unit::base()).div(&a)?)
                }

                (BinOp::Add | BinOp::Sub, Quant(a), Num(_))
                | (BinOp::Add | BinOp::Sub, Num(_), Quant(a)) => {
                    bail!(span.error(&format!(
                        "unit mismatch: cannot combine `{}` with a bare number",
                        a.unit.name
                    )))
                }
                (BinOp::Mod | BinOp::Pow, _, _) => {
                    bail!(span.error("operator expects plain numeric operands"))
                }
                _ => bail!(span.error("invalid arithmetic operands")),
            };
            return Ok(result);
        }

        if op == BinOp::Add
            && (matches!(l, Value::String(_)) || matches!(r, Value::String(_)))
        {
            return Ok(Value::String(
                format!("{}{}", l.to_display_string(), r.to_display_string()).into(),
            ));
        }

        bail!(span.error(&format!(
            "invalid operands for arithmetic: `{}` and `{}`",
            l.type_name(),
            r.type_name()
        )))
    }

    fn compare(&self, span: &Span, l: &Value, r: &Value) -> Result<std::cmp::Ordering> {
        match (l, r) {
            (Value::Number(a), Value::Number(b)) => Ok(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Ok(a.cmp(b)),
            (Value::Quantity(a), Value::Quantity(b)) if a.unit.dim == b.unit.dim => Ok(a
                .unit
                .to_base(&a.magnitude)
                .cmp(&b.unit.to_base(&b.magnitude))),
            _ => {
                // A numeric string compares against a number or quantity
                // after materialization.
                if let (Some(a), Some(b)) = (self.comparable(l), self.comparable(r)) {
                    return match (a, b) {
                        (NumOperand::Num(a), NumOperand::Num(b)) => Ok(a.cmp(&b)),
                        (NumOperand::Quant(a), NumOperand::Quant(b))
                            if a.unit.dim == b.unit.dim =>
                        {
                            Ok(a.unit
                                .to_base(&a.magnitude)
                                .cmp(&b.unit.to_base(&b.magnitude)))
                        }
                        _ => bail!(span.error("cannot compare values of different dimensions")),
                    };
                }
                bail!(span.error(&format!(
                    "cannot compare `{}` with `{}`",
                    l.type_name(),
                    r.type_name()
                )))
            }
        }
    }
}

enum NumOperand {
    Num(Number),
    Quant(Quantity),
}

fn quantity_value(q: Quantity) -> Value {
    if q.unit.is_dimensionless() {
        Value::Number(q.magnitude)
    } else {
        Value::from(q)
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Quantity(a), Value::Quantity(b)) if a.unit.dim == b.unit.dim => {
            a.unit.to_base(&a.magnitude) == b.unit.to_base(&b.magnitude)
        }
        _ => l == r,
    }
}

/// Text of the expression carried by an `@expr` or `@view` directive.
pub fn directive_expr_text(v: &Value) -> Option<Rc<str>> {
    let map = match v {
        Value::Object(m) => m,
        _ => return None,
    };
    if let Some(Value::String(s)) = map.get("@expr") {
        return Some(s.clone());
    }
    if let Some(Value::Object(view)) = map.get("@view") {
        if let Some(Value::String(s)) = view.get("@expr") {
            return Some(s.clone());
        }
    }
    None
}
