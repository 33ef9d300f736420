//! Expression evaluation against an [`EvaluationContext`].

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::ast::{BinaryOp, Expr, UnaryOp, Value};
use crate::eval::EvaluationContext;
use crate::error::{ScriptError, ScriptResult};
use crate::parser::parse_expression;

/// Evaluate an expression to a value.
pub fn evaluate(expr: &Expr, ctx: &EvaluationContext) -> ScriptResult<Value> {
    Evaluator::new(ctx).evaluate(expr)
}

/// Evaluate an expression for its truthiness.
pub fn evaluate_bool(expr: &Expr, ctx: &EvaluationContext) -> ScriptResult<bool> {
    Evaluator::new(ctx).evaluate_bool(expr)
}

/// Parse and evaluate in one step. Compiled templates never take this path.
pub fn eval_str(expression: &str, ctx: &EvaluationContext) -> ScriptResult<Value> {
    let expr = parse_expression(expression)?;
    evaluate(&expr, ctx)
}

pub struct Evaluator<'a> {
    ctx: &'a EvaluationContext,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a EvaluationContext) -> Self {
        Self { ctx }
    }

    pub fn evaluate(&self, expr: &Expr) -> ScriptResult<Value> {
        self.eval(expr).map(Cow::into_owned)
    }

    pub fn evaluate_bool(&self, expr: &Expr) -> ScriptResult<bool> {
        self.eval(expr).map(|v| v.is_truthy())
    }

    fn eval(&self, expr: &Expr) -> ScriptResult<Cow<'a, Value>> {
        match expr {
            Expr::Literal(v) => Ok(Cow::Owned(v.clone())),
            Expr::Ident(name) => Ok(Cow::Borrowed(self.ctx.lookup(name)?)),
            Expr::Variable(name) => self
                .ctx
                .binding(name)
                .map(Cow::Borrowed)
                .ok_or_else(|| self.ctx.unresolved(format!("#{}", name)).into()),
            Expr::Property { target, name } => {
                let base = self.eval(target)?;
                self.property(expr, base, name)
            }
            Expr::Index { target, index } => {
                let base = self.eval(target)?;
                let key = self.eval(index)?;
                let found = navigate(base, |v| v.index(&key));
                found.ok_or_else(|| self.ctx.unresolved(expr.to_string()).into())
            }
            Expr::Call {
                target,
                method,
                args,
            } => {
                let base = self.eval(target)?;
                if base.is_null() {
                    return Err(self.ctx.unresolved(expr.to_string()).into());
                }
                let args = args
                    .iter()
                    .map(|a| self.eval(a).map(Cow::into_owned))
                    .collect::<ScriptResult<Vec<_>>>()?;
                call_method(&base, method, &args).map(Cow::Owned)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Cow::Owned(Value::Bool(!value.is_truthy()))),
                    UnaryOp::Neg => match value.as_ref() {
                        Value::Int(n) => n
                            .checked_neg()
                            .map(|n| Cow::Owned(Value::Int(n)))
                            .ok_or_else(|| ScriptError::evaluation("integer overflow in '-'")),
                        Value::Float(n) => Ok(Cow::Owned(Value::Float(-n))),
                        other => Err(ScriptError::evaluation(format!(
                            "cannot negate {} value '{}'",
                            other.type_name(),
                            other
                        ))),
                    },
                }
            }
            Expr::Binary { left, op, right } => self.binary(left, *op, right).map(Cow::Owned),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item).map(Cow::into_owned))
                .collect::<ScriptResult<Vec<_>>>()
                .map(|items| Cow::Owned(Value::List(items))),
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let key = match self.eval(key)?.into_owned() {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    map.insert(key, self.eval(value)?.into_owned());
                }
                Ok(Cow::Owned(Value::Map(map)))
            }
        }
    }

    fn property(&self, expr: &Expr, base: Cow<'a, Value>, name: &str) -> ScriptResult<Cow<'a, Value>> {
        let size = match base.as_ref() {
            Value::List(items) if is_size(name) => Some(items.len()),
            Value::Map(entries) if is_size(name) && !entries.contains_key(name) => {
                Some(entries.len())
            }
            Value::String(s) if is_size(name) => Some(s.chars().count()),
            _ => None,
        };
        if let Some(size) = size {
            return Ok(Cow::Owned(Value::from(size)));
        }
        navigate(base, |v| v.property(name)).ok_or_else(|| self.ctx.unresolved(expr.to_string()).into())
    }

    fn binary(&self, left: &Expr, op: BinaryOp, right: &Expr) -> ScriptResult<Value> {
        match op {
            BinaryOp::And => {
                let result = self.eval(left)?.is_truthy() && self.eval(right)?.is_truthy();
                return Ok(Value::Bool(result));
            }
            BinaryOp::Or => {
                let result = self.eval(left)?.is_truthy() || self.eval(right)?.is_truthy();
                return Ok(Value::Bool(result));
            }
            _ => {}
        }

        let l = self.eval(left)?;
        let r = self.eval(right)?;
        let (l, r) = (l.as_ref(), r.as_ref());
        match op {
            BinaryOp::Eq => Ok(Value::Bool(values_equal(l, r))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(l, r))),
            BinaryOp::Lt => compare(l, r).map(|o| Value::Bool(o == Ordering::Less)),
            BinaryOp::Le => compare(l, r).map(|o| Value::Bool(o != Ordering::Greater)),
            BinaryOp::Gt => compare(l, r).map(|o| Value::Bool(o == Ordering::Greater)),
            BinaryOp::Ge => compare(l, r).map(|o| Value::Bool(o != Ordering::Less)),
            BinaryOp::In => contains(r, l).map(Value::Bool),
            BinaryOp::NotIn => contains(r, l).map(|found| Value::Bool(!found)),
            BinaryOp::Add if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", l, r)))
            }
            _ => arithmetic(l, op, r),
        }
    }
}

fn is_size(name: &str) -> bool {
    name == "size" || name == "length"
}

/// Apply a borrowing accessor to a possibly-owned value.
fn navigate<'a, F>(base: Cow<'a, Value>, f: F) -> Option<Cow<'a, Value>>
where
    F: for<'v> Fn(&'v Value) -> Option<&'v Value>,
{
    match base {
        Cow::Borrowed(v) => f(v).map(Cow::Borrowed),
        Cow::Owned(v) => f(&v).cloned().map(Cow::Owned),
    }
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Int(_) | Value::Float(_) => v.as_f64(),
        _ => None,
    }
}

fn numeric_string(v: &Value) -> Option<f64> {
    v.as_str().and_then(|s| s.trim().parse().ok())
}

/// Equality with numeric coercion across integers, floats and numeric strings.
pub fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => number(l) == number(r),
        (Value::Int(_) | Value::Float(_), Value::String(_)) => {
            numeric_string(r).is_some_and(|n| number(l) == Some(n))
        }
        (Value::String(_), Value::Int(_) | Value::Float(_)) => {
            numeric_string(l).is_some_and(|n| number(r) == Some(n))
        }
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> ScriptResult<Ordering> {
    let ordering = match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => {
            let a = number(l).or_else(|| numeric_string(l).filter(|_| number(r).is_some()));
            let b = number(r).or_else(|| numeric_string(r).filter(|_| number(l).is_some()));
            match (a, b) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            }
        }
    };
    ordering.ok_or_else(|| {
        ScriptError::evaluation(format!(
            "cannot compare {} '{}' with {} '{}'",
            l.type_name(),
            l,
            r.type_name(),
            r
        ))
    })
}

fn contains(collection: &Value, item: &Value) -> ScriptResult<bool> {
    match collection {
        Value::List(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Map(entries) => Ok(match item {
            Value::String(key) => entries.contains_key(key),
            other => entries.contains_key(&other.to_string()),
        }),
        Value::String(s) => match item {
            Value::String(needle) => Ok(s.contains(needle.as_str())),
            other => Ok(s.contains(&other.to_string())),
        },
        other => Err(ScriptError::evaluation(format!(
            "'in' needs a collection, found {} '{}'",
            other.type_name(),
            other
        ))),
    }
}

fn arithmetic(l: &Value, op: BinaryOp, r: &Value) -> ScriptResult<Value> {
    let type_error = || {
        ScriptError::evaluation(format!(
            "cannot apply '{}' to {} '{}' and {} '{}'",
            op,
            l.type_name(),
            l,
            r.type_name(),
            r
        ))
    };

    let int_operand = |v: &Value| match v {
        Value::Int(n) => Some(*n),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    if let (Some(a), Some(b)) = (int_operand(l), int_operand(r)) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                return Err(ScriptError::evaluation("division by zero"));
            }
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Rem => a.checked_rem(b),
            _ => return Err(type_error()),
        };
        return result
            .map(Value::Int)
            .ok_or_else(|| ScriptError::evaluation(format!("integer overflow in '{}'", op)));
    }

    let a = number(l).or_else(|| numeric_string(l)).ok_or_else(type_error)?;
    let b = number(r).or_else(|| numeric_string(r)).ok_or_else(type_error)?;
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
            return Err(ScriptError::evaluation("division by zero"));
        }
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return Err(type_error()),
    };
    Ok(Value::Float(result))
}

fn call_method(target: &Value, method: &str, args: &[Value]) -> ScriptResult<Value> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(ScriptError::evaluation(format!(
                "{}() takes {} argument(s), {} given",
                method,
                n,
                args.len()
            )))
        }
    };
    let unsupported = || {
        ScriptError::evaluation(format!(
            "method {}() is not available on {} '{}'",
            method,
            target.type_name(),
            target
        ))
    };

    match method {
        "size" | "length" => {
            arity(0)?;
            match target {
                Value::List(items) => Ok(Value::from(items.len())),
                Value::Map(entries) => Ok(Value::from(entries.len())),
                Value::String(s) => Ok(Value::from(s.chars().count())),
                _ => Err(unsupported()),
            }
        }
        "isEmpty" => {
            arity(0)?;
            match target {
                Value::List(items) => Ok(Value::Bool(items.is_empty())),
                Value::Map(entries) => Ok(Value::Bool(entries.is_empty())),
                Value::String(s) => Ok(Value::Bool(s.is_empty())),
                _ => Err(unsupported()),
            }
        }
        "toString" => {
            arity(0)?;
            Ok(Value::String(target.to_string()))
        }
        "trim" | "toUpperCase" | "toLowerCase" => {
            arity(0)?;
            let s = target.as_str().ok_or_else(unsupported)?;
            Ok(Value::String(match method {
                "trim" => s.trim().to_string(),
                "toUpperCase" => s.to_uppercase(),
                _ => s.to_lowercase(),
            }))
        }
        "startsWith" | "endsWith" => {
            arity(1)?;
            let s = target.as_str().ok_or_else(unsupported)?;
            let affix = args[0].to_string();
            Ok(Value::Bool(if method == "startsWith" {
                s.starts_with(&affix)
            } else {
                s.ends_with(&affix)
            }))
        }
        "contains" => {
            arity(1)?;
            match target {
                Value::List(_) | Value::String(_) => contains(target, &args[0]).map(Value::Bool),
                _ => Err(unsupported()),
            }
        }
        "containsKey" => {
            arity(1)?;
            match target {
                Value::Map(_) => contains(target, &args[0]).map(Value::Bool),
                _ => Err(unsupported()),
            }
        }
        "equals" => {
            arity(1)?;
            Ok(Value::Bool(values_equal(target, &args[0])))
        }
        _ => Err(ScriptError::evaluation(format!("unknown method {}()", method))),
    }
}
