//! Runtime values exchanged with endpoints and manipulated by the VM.

use std::fmt;

use serde::Serialize;

use super::vm::Fault;
use crate::sema::types::{PrimitiveType, Type};
use crate::syntax::ast::{BinaryOp, UnaryOp};

macro_rules! int_op {
    ($variant:ident, $op:expr, $a:expr, $b:expr) => {{
        let (a, b) = ($a, $b);
        Ok(match $op {
            BinaryOp::Add => Value::$variant(a.wrapping_add(b)),
            BinaryOp::Sub => Value::$variant(a.wrapping_sub(b)),
            BinaryOp::Mul => Value::$variant(a.wrapping_mul(b)),
            BinaryOp::Div => {
                if b == 0 {
                    return Err(Fault::DivideByZero);
                }
                Value::$variant(a.wrapping_div(b))
            }
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(Fault::DivideByZero);
                }
                Value::$variant(a.wrapping_rem(b))
            }
            BinaryOp::BitAnd => Value::$variant(a & b),
            BinaryOp::BitOr => Value::$variant(a | b),
            BinaryOp::BitXor => Value::$variant(a ^ b),
            BinaryOp::Shl => Value::$variant(a.wrapping_shl(b as u32)),
            BinaryOp::Shr => Value::$variant(a.wrapping_shr(b as u32)),
            BinaryOp::Eq => Value::Bool(a == b),
            BinaryOp::Ne => Value::Bool(a != b),
            BinaryOp::Lt => Value::Bool(a < b),
            BinaryOp::Le => Value::Bool(a <= b),
            BinaryOp::Gt => Value::Bool(a > b),
            BinaryOp::Ge => Value::Bool(a >= b),
            BinaryOp::And | BinaryOp::Or => {
                return Err(Fault::Internal("logical operator on integers".into()))
            }
        })
    }};
}

macro_rules! float_op {
    ($variant:ident, $op:expr, $a:expr, $b:expr) => {{
        let (a, b) = ($a, $b);
        Ok(match $op {
            BinaryOp::Add => Value::$variant(a + b),
            BinaryOp::Sub => Value::$variant(a - b),
            BinaryOp::Mul => Value::$variant(a * b),
            BinaryOp::Div => Value::$variant(a / b),
            BinaryOp::Mod => Value::$variant(a % b),
            BinaryOp::Eq => Value::Bool(a == b),
            BinaryOp::Ne => Value::Bool(a != b),
            BinaryOp::Lt => Value::Bool(a < b),
            BinaryOp::Le => Value::Bool(a <= b),
            BinaryOp::Gt => Value::Bool(a > b),
            BinaryOp::Ge => Value::Bool(a >= b),
            op => return Err(Fault::Internal(format!("operator '{op}' on floats"))),
        })
    }};
}

/// A dynamically tagged value. The type checker guarantees that operands
/// reaching [`Value::binary`] share a representation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Void,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Vector(Vec<Value>),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::Float32(v) => Some(*v as i64),
            Value::Float64(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Int32(_) | Value::Int64(_) | Value::Float32(_) | Value::Float64(_)
        )
    }

    fn is_scalar(&self) -> bool {
        self.is_number() || matches!(self, Value::Bool(_))
    }

    /// The elements of a vector or array.
    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Value::Vector(items) | Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Flatten a scalar or vector frame into per-channel samples.
    pub fn channels(&self) -> Vec<f64> {
        match self {
            Value::Vector(items) | Value::Array(items) => {
                items.iter().flat_map(Value::channels).collect()
            }
            other => other.as_f64().into_iter().collect(),
        }
    }

    /// Explicit conversion, as performed by `float32(x)` style casts.
    pub fn cast(&self, ty: &Type) -> Option<Value> {
        match ty {
            Type::Primitive(p) => self.cast_primitive(*p),
            Type::Vector(p, n) => match self {
                Value::Vector(items) | Value::Array(items) if items.len() == *n as usize => items
                    .iter()
                    .map(|v| v.cast_primitive(*p))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Vector),
                scalar if scalar.is_scalar() => {
                    let v = scalar.cast_primitive(*p)?;
                    Some(Value::Vector(vec![v; *n as usize]))
                }
                _ => None,
            },
            Type::Array(elem, n) => match self {
                Value::Array(items) | Value::Vector(items) if items.len() == *n as usize => items
                    .iter()
                    .map(|v| v.cast(elem))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Array),
                _ => None,
            },
        }
    }

    fn cast_primitive(&self, p: PrimitiveType) -> Option<Value> {
        if !self.is_scalar() {
            return match (self, p) {
                (Value::String(_), PrimitiveType::String) => Some(self.clone()),
                _ => None,
            };
        }
        let v = match p {
            PrimitiveType::Bool => Value::Bool(self.as_f64()? != 0.0),
            PrimitiveType::Int32 => Value::Int32(self.as_i64()? as i32),
            PrimitiveType::Int64 => Value::Int64(self.as_i64()?),
            PrimitiveType::Float32 => Value::Float32(self.as_f64()? as f32),
            PrimitiveType::Float64 => Value::Float64(self.as_f64()?),
            PrimitiveType::Void | PrimitiveType::String => return None,
        };
        Some(v)
    }

    /// Conversion applied to values supplied through the public API: numbers
    /// convert between numeric types, everything else must match in shape.
    pub fn coerce(&self, ty: &Type) -> Option<Value> {
        match (self, ty) {
            (Value::Bool(_), Type::Primitive(PrimitiveType::Bool))
            | (Value::String(_), Type::Primitive(PrimitiveType::String)) => Some(self.clone()),
            (v, Type::Primitive(p)) if v.is_number() && Type::Primitive(*p).is_numeric() => {
                v.cast_primitive(*p)
            }
            (Value::Vector(items) | Value::Array(items), Type::Vector(p, n))
                if items.len() == *n as usize =>
            {
                let elem = Type::Primitive(*p);
                items
                    .iter()
                    .map(|v| v.coerce(&elem))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Vector)
            }
            (v, Type::Vector(p, n)) if v.is_scalar() => {
                let item = v.coerce(&Type::Primitive(*p))?;
                Some(Value::Vector(vec![item; *n as usize]))
            }
            (Value::Array(items) | Value::Vector(items), Type::Array(elem, n))
                if items.len() == *n as usize =>
            {
                items
                    .iter()
                    .map(|v| v.coerce(elem))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Array)
            }
            _ => None,
        }
    }

    /// Element `index` of a vector or array; indices wrap.
    pub fn index(&self, index: i64) -> Result<Value, Fault> {
        let items = self
            .elements()
            .ok_or_else(|| Fault::Internal("cannot index a scalar".into()))?;
        Ok(items[wrap_index(index, items.len())].clone())
    }

    /// Borrow the element reached through `indices` without copying the
    /// containers around it.
    pub fn get_at(&self, indices: &[i64]) -> Result<&Value, Fault> {
        indices.iter().try_fold(self, |value, &i| {
            let items = value
                .elements()
                .ok_or_else(|| Fault::Internal("cannot index a scalar".into()))?;
            Ok(&items[wrap_index(i, items.len())])
        })
    }

    /// Replace the element reached through `indices`.
    pub fn set_at(&mut self, indices: &[i64], value: Value) -> Result<(), Fault> {
        let Some((&first, rest)) = indices.split_first() else {
            *self = value;
            return Ok(());
        };
        match self {
            Value::Vector(items) | Value::Array(items) => {
                let i = wrap_index(first, items.len());
                items[i].set_at(rest, value)
            }
            _ => Err(Fault::Internal("cannot index a scalar".into())),
        }
    }

    /// Add `other` into this value, as stream writes do.
    pub fn accumulate(&mut self, other: &Value) -> Result<(), Fault> {
        *self = Value::binary(BinaryOp::Add, self, other)?;
        Ok(())
    }

    pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, Fault> {
        let v = match (op, operand) {
            (_, Value::Vector(items)) => Value::Vector(
                items
                    .iter()
                    .map(|v| Value::unary(op, v))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            (UnaryOp::Negate, Value::Int32(v)) => Value::Int32(v.wrapping_neg()),
            (UnaryOp::Negate, Value::Int64(v)) => Value::Int64(v.wrapping_neg()),
            (UnaryOp::Negate, Value::Float32(v)) => Value::Float32(-v),
            (UnaryOp::Negate, Value::Float64(v)) => Value::Float64(-v),
            (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
            (UnaryOp::BitNot, Value::Int32(v)) => Value::Int32(!v),
            (UnaryOp::BitNot, Value::Int64(v)) => Value::Int64(!v),
            (op, v) => {
                return Err(Fault::Internal(format!(
                    "operator '{op}' cannot be applied to {v}"
                )))
            }
        };
        Ok(v)
    }

    pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Fault> {
        match (lhs, rhs) {
            (Value::Vector(a), Value::Vector(b)) if a.len() == b.len() => {
                if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
                    let equal = a == b;
                    return Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }));
                }
                a.iter()
                    .zip(b)
                    .map(|(x, y)| Value::binary(op, x, y))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Vector)
            }
            (Value::Vector(a), s) if s.is_scalar() => a
                .iter()
                .map(|x| Value::binary(op, x, s))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Vector),
            (s, Value::Vector(b)) if s.is_scalar() => b
                .iter()
                .map(|y| Value::binary(op, s, y))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Vector),
            (Value::Int32(a), Value::Int32(b)) => int_op!(Int32, op, *a, *b),
            (Value::Int64(a), Value::Int64(b)) => int_op!(Int64, op, *a, *b),
            (Value::Float32(a), Value::Float32(b)) => float_op!(Float32, op, *a, *b),
            (Value::Float64(a), Value::Float64(b)) => float_op!(Float64, op, *a, *b),
            (Value::Bool(a), Value::Bool(b)) => {
                let v = match op {
                    BinaryOp::Eq => a == b,
                    BinaryOp::Ne => a != b,
                    BinaryOp::And | BinaryOp::BitAnd => *a && *b,
                    BinaryOp::Or | BinaryOp::BitOr => *a || *b,
                    BinaryOp::BitXor => a != b,
                    _ => return Err(mismatch(op, lhs, rhs)),
                };
                Ok(Value::Bool(v))
            }
            (Value::String(a), Value::String(b))
                if matches!(op, BinaryOp::Eq | BinaryOp::Ne) =>
            {
                Ok(Value::Bool((a == b) == (op == BinaryOp::Eq)))
            }
            (Value::Array(a), Value::Array(b)) if matches!(op, BinaryOp::Eq | BinaryOp::Ne) => {
                Ok(Value::Bool((a == b) == (op == BinaryOp::Eq)))
            }
            _ => Err(mismatch(op, lhs, rhs)),
        }
    }
}

fn mismatch(op: BinaryOp, lhs: &Value, rhs: &Value) -> Fault {
    Fault::Internal(format!("operator '{op}' cannot be applied to {lhs} and {rhs}"))
}

fn wrap_index(index: i64, len: usize) -> usize {
    index.rem_euclid(len as i64) as usize
}


impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Vector(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
            Value::Array(items) => {
                write!(f, "[")?;
                write_list(f, items)?;
                write!(f, "]")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
