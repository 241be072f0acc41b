//! Synchronous interpreter for lambda bodies.
//!
//! Bodies are scalar expressions over the lambda parameters. Operator calls
//! and nested lambdas are not values and are rejected here; sequences are
//! handled by the evaluator in `rewrite::evaluate`.
use crate::error::{QueryError, Result};

use super::node::{BinaryOp, Constant, Expr, Lambda, Member, Param, ScalarMethod, UnaryOp};
use super::types::TypeToken;
use super::value::{Pending, Value};

/// Invokes `lambda` with positional arguments.
pub fn invoke(lambda: &Lambda, args: &[Value]) -> Result<Value> {
    if lambda.params().len() != args.len() {
        return Err(QueryError::evaluation(format!(
            "lambda expects {} arguments, got {}",
            lambda.params().len(),
            args.len()
        )));
    }
    let scope: Vec<(&Param, &Value)> = lambda.params().iter().zip(args).collect();
    eval(lambda.body(), &scope)
}

/// Evaluates `expr` with the given parameter bindings (innermost last).
pub fn eval(expr: &Expr, scope: &[(&Param, &Value)]) -> Result<Value> {
    match expr {
        Expr::Constant(Constant::Value { value, .. }) => Ok(value.clone()),
        Expr::Constant(other) => Err(QueryError::evaluation(format!(
            "constant of type {} is not a scalar",
            other.ty()
        ))),
        Expr::Parameter(p) => scope
            .iter()
            .rev()
            .find(|(param, _)| *param == p)
            .map(|(_, value)| (*value).clone())
            .ok_or_else(|| QueryError::evaluation(format!("unbound parameter '{}'", p.name()))),
        Expr::Lambda(_) => Err(QueryError::evaluation("nested lambdas are not supported")),
        Expr::Call(call) => Err(QueryError::evaluation(format!(
            "operator {} cannot be evaluated inside a lambda body",
            call.operator()
        ))),
        Expr::Unary { op, operand, .. } => {
            let value = eval(operand, scope)?;
            unary(op, value)
        }
        Expr::Binary {
            op, left, right, ..
        } => match op {
            BinaryOp::And => {
                if !eval(left, scope)?.as_bool()? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(eval(right, scope)?.as_bool()?))
            }
            BinaryOp::Or => {
                if eval(left, scope)?.as_bool()? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(eval(right, scope)?.as_bool()?))
            }
            _ => binary(*op, eval(left, scope)?, eval(right, scope)?),
        },
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            if eval(test, scope)?.as_bool()? {
                eval(if_true, scope)
            } else {
                eval(if_false, scope)
            }
        }
        Expr::Member { target, member, .. } => {
            let value = eval(target, scope)?;
            match (member, &value) {
                (Member::Key, Value::Grouping(group)) => Ok(group.key.clone()),
                (Member::Item(i), Value::Tuple(items)) => items
                    .get(*i)
                    .cloned()
                    .ok_or_else(|| QueryError::evaluation(format!("tuple has no item {}", i))),
                _ => Err(QueryError::evaluation(format!(
                    "member {:?} does not exist on {}",
                    member, value
                ))),
            }
        }
        Expr::Method { method, args, .. } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>>>()?;
            scalar_method(*method, values)
        }
        Expr::Tuple(items) => Ok(Value::tuple(
            items
                .iter()
                .map(|item| eval(item, scope))
                .collect::<Result<Vec<_>>>()?,
        )),
    }
}

fn unary(op: &UnaryOp, value: Value) -> Result<Value> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.as_bool()?)),
        (UnaryOp::Negate, Value::Int32(v)) => v
            .checked_neg()
            .map(Value::Int32)
            .ok_or(QueryError::Overflow("negate")),
        (UnaryOp::Negate, Value::Int64(v)) => v
            .checked_neg()
            .map(Value::Int64)
            .ok_or(QueryError::Overflow("negate")),
        (UnaryOp::Negate, Value::Float32(v)) => Ok(Value::Float32(-v)),
        (UnaryOp::Negate, Value::Float64(v)) => Ok(Value::Float64(-v)),
        (UnaryOp::Convert(target), v) => convert(v, target),
        (op, v) => Err(QueryError::evaluation(format!(
            "cannot apply {:?} to {}",
            op, v
        ))),
    }
}

/// Converts a value to the target type, checking integer range.
pub fn convert(value: Value, target: &TypeToken) -> Result<Value> {
    if value.is_null() {
        return if target.admits_null() {
            Ok(Value::Null)
        } else {
            Err(QueryError::evaluation(format!(
                "null cannot be converted to {}",
                target
            )))
        };
    }
    match target.underlying() {
        TypeToken::String => Ok(Value::from(plain_string(&value))),
        TypeToken::Int32 => match value {
            Value::Int32(v) => Ok(Value::Int32(v)),
            Value::Int64(v) => i32::try_from(v)
                .map(Value::Int32)
                .map_err(|_| QueryError::Overflow("convert")),
            other => {
                let v = other.as_f64()?.trunc();
                if v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX) {
                    Ok(Value::Int32(v as i32))
                } else {
                    Err(QueryError::Overflow("convert"))
                }
            }
        },
        TypeToken::Int64 => match value {
            Value::Int32(v) => Ok(Value::Int64(i64::from(v))),
            Value::Int64(v) => Ok(Value::Int64(v)),
            other => {
                let v = other.as_f64()?.trunc();
                if v >= i64::MIN as f64 && v < i64::MAX as f64 {
                    Ok(Value::Int64(v as i64))
                } else {
                    Err(QueryError::Overflow("convert"))
                }
            }
        },
        TypeToken::Float32 => Ok(Value::Float32(value.as_f64()? as f32)),
        TypeToken::Float64 => Ok(Value::Float64(value.as_f64()?)),
        _ if value.conforms_to(target) => Ok(value),
        _ => Err(QueryError::evaluation(format!(
            "{} cannot be converted to {}",
            value, target
        ))),
    }
}

/// Textual form used by `ToString`.
pub fn plain_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Str(s) => s.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Float32(v) => v.to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    if op.is_comparison() {
        let result = match op {
            BinaryOp::Equal => left == right,
            BinaryOp::NotEqual => left != right,
            _ if left.is_null() || right.is_null() => false,
            BinaryOp::LessThan => left < right,
            BinaryOp::LessThanOrEqual => left <= right,
            BinaryOp::GreaterThan => left > right,
            _ => left >= right,
        };
        return Ok(Value::Bool(result));
    }
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let name = op.symbol();
    match (left, right) {
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => {
            Ok(Value::from(format!("{}{}", a, b)))
        }
        (Value::Int32(a), Value::Int32(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide | BinaryOp::Modulo if b == 0 => {
                    return Err(QueryError::evaluation("division by zero"))
                }
                BinaryOp::Divide => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result.map(Value::Int32).ok_or(QueryError::Overflow("arithmetic"))
        }
        (Value::Int64(a), Value::Int64(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide | BinaryOp::Modulo if b == 0 => {
                    return Err(QueryError::evaluation("division by zero"))
                }
                BinaryOp::Divide => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result.map(Value::Int64).ok_or(QueryError::Overflow("arithmetic"))
        }
        (Value::Float32(a), Value::Float32(b)) => Ok(Value::Float32(float_op(op, a, b))),
        (Value::Float64(a), Value::Float64(b)) => Ok(Value::Float64(float_op(op, a, b))),
        (a, b) => Err(QueryError::evaluation(format!(
            "cannot apply {} to {} and {}",
            name, a, b
        ))),
    }
}

fn float_op<F>(op: BinaryOp, a: F, b: F) -> F
where
    F: std::ops::Add<Output = F>
        + std::ops::Sub<Output = F>
        + std::ops::Mul<Output = F>
        + std::ops::Div<Output = F>
        + std::ops::Rem<Output = F>,
{
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        _ => a % b,
    }
}

fn scalar_method(method: ScalarMethod, mut args: Vec<Value>) -> Result<Value> {
    let first = match args.first() {
        Some(v) => v.clone(),
        None => {
            return Err(QueryError::evaluation(format!(
                "{} expects an argument",
                method.name()
            )))
        }
    };
    match method {
        ScalarMethod::ToString => Ok(Value::from(plain_string(&first))),
        ScalarMethod::Length => match first {
            Value::Null => Err(QueryError::evaluation("Length of null string")),
            v => Ok(Value::Int32(v.as_str()?.chars().count() as i32)),
        },
        ScalarMethod::ToUpper => Ok(Value::from(first.as_str()?.to_uppercase())),
        ScalarMethod::ToLower => Ok(Value::from(first.as_str()?.to_lowercase())),
        ScalarMethod::Abs => match first {
            Value::Int32(v) => v
                .checked_abs()
                .map(Value::Int32)
                .ok_or(QueryError::Overflow("Abs")),
            Value::Int64(v) => v
                .checked_abs()
                .map(Value::Int64)
                .ok_or(QueryError::Overflow("Abs")),
            Value::Float32(v) => Ok(Value::Float32(v.abs())),
            Value::Float64(v) => Ok(Value::Float64(v.abs())),
            other => Ok(other),
        },
        ScalarMethod::FromResult => Ok(Value::Pending(Pending::Ready(Box::new(first)))),
        ScalarMethod::Delay => {
            let millis = args.pop().map(|v| v.as_i64()).transpose()?.unwrap_or(0);
            Ok(Value::Pending(Pending::Delayed {
                value: Box::new(first),
                millis: millis.max(0) as u64,
            }))
        }
    }
}
