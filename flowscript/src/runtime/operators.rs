// Arithmetic, comparison and boolean operators over runtime values

use std::cmp::Ordering;

use crate::ast::{BinaryOp, UnaryOp};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::Value;

pub fn expect_bool(operand: &str, value: Value) -> RuntimeResult<bool> {
    match value {
        Value::Boolean(b) => Ok(b),
        other => Err(RuntimeError::type_mismatch(operand, "boolean", &other)),
    }
}

pub fn apply_unary(op: UnaryOp, operand: Value) -> RuntimeResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Boolean(!expect_bool("operand of `!`", value)?)),
        (UnaryOp::Neg, Value::Integer(i)) => i
            .checked_neg()
            .map(Value::Integer)
            .ok_or_else(|| overflow("-")),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, other) => Err(RuntimeError::type_mismatch("operand of `-`", "number", &other)),
    }
}

/// Applies a binary operator to two evaluated operands. `&&`/`||` land here
/// only when both sides were already evaluated.
pub fn apply_binary(op: BinaryOp, left: Value, right: Value) -> RuntimeResult<Value> {
    use BinaryOp::*;
    match (op, left, right) {
        (Eq, l, r) => Ok(Value::Boolean(l == r)),
        (NotEq, l, r) => Ok(Value::Boolean(l != r)),
        (And, l, r) => Ok(Value::Boolean(
            expect_bool("operand of `&&`", l)? && expect_bool("operand of `&&`", r)?,
        )),
        (Or, l, r) => Ok(Value::Boolean(
            expect_bool("operand of `||`", l)? || expect_bool("operand of `||`", r)?,
        )),
        (Add, Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Add, Value::String(_), other) | (Add, other, Value::String(_)) => Err(
            RuntimeError::type_mismatch("operand of `+`", "string", &other),
        ),
        (Add | Sub | Mul | Div | Rem, Value::Integer(a), Value::Integer(b)) => {
            integer_arithmetic(op, a, b)
        }
        (Add | Sub | Mul | Div | Rem, l, r) => {
            let a = number(op, &l)?;
            let b = number(op, &r)?;
            float_arithmetic(op, a, b)
        }
        (Lt | LtEq | Gt | GtEq, Value::String(a), Value::String(b)) => {
            Ok(Value::Boolean(ordering_holds(op, a.cmp(&b))))
        }
        (Lt | LtEq | Gt | GtEq, Value::Integer(a), Value::Integer(b)) => {
            Ok(Value::Boolean(ordering_holds(op, a.cmp(&b))))
        }
        (Lt | LtEq | Gt | GtEq, l, r) => {
            let a = number(op, &l)?;
            let b = number(op, &r)?;
            Ok(Value::Boolean(
                a.partial_cmp(&b)
                    .map(|ord| ordering_holds(op, ord))
                    .unwrap_or(false),
            ))
        }
    }
}

fn number(op: BinaryOp, value: &Value) -> RuntimeResult<f64> {
    match value {
        Value::Integer(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(RuntimeError::type_mismatch(
            format!("operand of `{}`", op.symbol()),
            "number",
            other,
        )),
    }
}

fn overflow(symbol: &str) -> RuntimeError {
    RuntimeError::TypeMismatch {
        operand: format!("result of `{}`", symbol),
        expected: "value within 64-bit integer range".to_string(),
        actual: "overflow".to_string(),
    }
}

fn integer_arithmetic(op: BinaryOp, a: i64, b: i64) -> RuntimeResult<Value> {
    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
        return Err(RuntimeError::DivisionByZero);
    }
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Rem => a.checked_rem(b),
        _ => None,
    };
    result
        .map(Value::Integer)
        .ok_or_else(|| overflow(op.symbol()))
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> RuntimeResult<Value> {
    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
        return Err(RuntimeError::DivisionByZero);
    }
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return Err(RuntimeError::Internal(format!("`{}` is not arithmetic", op.symbol()))),
    };
    Ok(Value::Float(result))
}

fn ordering_holds(op: BinaryOp, ord: Ordering) -> bool {
    match op {
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::LtEq => ord != Ordering::Greater,
        BinaryOp::Gt => ord == Ordering::Greater,
        BinaryOp::GtEq => ord != Ordering::Less,
        _ => false,
    }
}
