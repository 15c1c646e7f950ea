//! Bytecode executed by the VM, plus the built-in intrinsic functions.

use std::fmt;

use super::value::Value;
use super::vm::Fault;
use crate::sema::types::Type;
use crate::syntax::ast::{BinaryOp, UnaryOp};

/// Index into a compiled module's function table.
pub type FunctionId = usize;

/// One VM instruction. Operands are taken from the top of the value stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Const(Value),
    LoadLocal(usize),
    StoreLocal(usize),
    /// Pops `depth` indices (innermost last) and pushes the element they
    /// reach, leaving the variable in place.
    LoadLocalElement { slot: usize, depth: usize },
    /// Pops `depth` indices (innermost last) and then the value.
    StoreLocalElement { slot: usize, depth: usize },
    LoadState(usize),
    StoreState(usize),
    LoadStateElement { slot: usize, depth: usize },
    StoreStateElement { slot: usize, depth: usize },
    LoadExternal(usize),
    ReadInput(usize),
    WriteStream(usize),
    WriteValue(usize),
    WriteEvent(usize),
    WriteConsole,
    Property(ProcessorProperty),
    Index,
    Unary(UnaryOp),
    Binary(BinaryOp),
    Cast(Type),
    Construct { ty: Type, count: usize },
    Intrinsic { intrinsic: Intrinsic, argc: usize },
    Call(FunctionId),
    Jump(usize),
    JumpIfFalse(usize),
    Pop,
    Dup,
    /// Suspend the running fiber until the next frame.
    Advance,
    Return,
}

/// A function lowered to bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub name: String,
    pub code: Vec<Op>,
    pub num_params: usize,
    /// Parameters plus every local slot.
    pub num_locals: usize,
    /// Parameter slots passed by reference; their final values are returned
    /// to the caller after the return value.
    pub ref_params: Vec<usize>,
    pub returns_value: bool,
    /// Deepest the operand stack can grow above the locals.
    pub max_depth: usize,
}

/// `processor.frequency` and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorProperty {
    Frequency,
    Period,
    Id,
    Session,
}

impl ProcessorProperty {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "frequency" => Some(Self::Frequency),
            "period" => Some(Self::Period),
            "id" => Some(Self::Id),
            "session" => Some(Self::Session),
            _ => None,
        }
    }

    pub fn ty(self) -> Type {
        match self {
            Self::Frequency | Self::Period => Type::FLOAT64,
            Self::Id | Self::Session => Type::INT32,
        }
    }
}

/// Built-in maths functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Sin,
    Cos,
    Tan,
    Sqrt,
    Exp,
    Log,
    Log10,
    Floor,
    Ceil,
    Round,
    Abs,
    Pow,
    Fmod,
    Min,
    Max,
    Clamp,
}

impl Intrinsic {
    pub fn from_name(name: &str) -> Option<Self> {
        let i = match name {
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "sqrt" => Self::Sqrt,
            "exp" => Self::Exp,
            "log" => Self::Log,
            "log10" => Self::Log10,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "round" => Self::Round,
            "abs" => Self::Abs,
            "pow" => Self::Pow,
            "fmod" => Self::Fmod,
            "min" => Self::Min,
            "max" => Self::Max,
            "clamp" => Self::Clamp,
            _ => return None,
        };
        Some(i)
    }

    pub fn arity(self) -> usize {
        match self {
            Self::Pow | Self::Fmod | Self::Min | Self::Max => 2,
            Self::Clamp => 3,
            _ => 1,
        }
    }

    /// Functions that only make sense on floating point arguments.
    pub fn is_float_only(self) -> bool {
        !matches!(self, Self::Abs | Self::Min | Self::Max | Self::Clamp)
    }

    pub fn evaluate(self, args: &[Value]) -> Result<Value, Fault> {
        let arg = |i: usize| arg_at(args, i, self);
        match self {
            Self::Sin => map_float(arg(0)?, f64::sin),
            Self::Cos => map_float(arg(0)?, f64::cos),
            Self::Tan => map_float(arg(0)?, f64::tan),
            Self::Sqrt => map_float(arg(0)?, f64::sqrt),
            Self::Exp => map_float(arg(0)?, f64::exp),
            Self::Log => map_float(arg(0)?, f64::ln),
            Self::Log10 => map_float(arg(0)?, f64::log10),
            Self::Floor => map_float(arg(0)?, f64::floor),
            Self::Ceil => map_float(arg(0)?, f64::ceil),
            Self::Round => map_float(arg(0)?, f64::round),
            Self::Abs => abs(arg(0)?),
            Self::Pow => zip_float(arg(0)?, arg(1)?, f64::powf),
            Self::Fmod => zip_float(arg(0)?, arg(1)?, |a, b| a % b),
            Self::Min => pick(arg(0)?, arg(1)?, BinaryOp::Lt),
            Self::Max => pick(arg(0)?, arg(1)?, BinaryOp::Gt),
            Self::Clamp => {
                let low = pick(arg(0)?, arg(1)?, BinaryOp::Gt)?;
                pick(&low, arg(2)?, BinaryOp::Lt)
            }
        }
    }
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Log10 => "log10",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Round => "round",
            Self::Abs => "abs",
            Self::Pow => "pow",
            Self::Fmod => "fmod",
            Self::Min => "min",
            Self::Max => "max",
            Self::Clamp => "clamp",
        };
        f.write_str(name)
    }
}

fn arg_at(args: &[Value], i: usize, intrinsic: Intrinsic) -> Result<&Value, Fault> {
    args.get(i).ok_or_else(|| {
        Fault::Internal(format!(
            "{intrinsic} expects {} arguments",
            intrinsic.arity()
        ))
    })
}

fn map_float(v: &Value, f: impl Fn(f64) -> f64 + Copy) -> Result<Value, Fault> {
    match v {
        Value::Float32(x) => Ok(Value::Float32(f(f64::from(*x)) as f32)),
        Value::Float64(x) => Ok(Value::Float64(f(*x))),
        Value::Vector(items) => items
            .iter()
            .map(|item| map_float(item, f))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Vector),
        other => Err(Fault::Internal(format!("expected a float, got {other}"))),
    }
}

fn zip_float(a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64 + Copy) -> Result<Value, Fault> {
    match (a, b) {
        (Value::Float32(x), Value::Float32(y)) => {
            Ok(Value::Float32(f(f64::from(*x), f64::from(*y)) as f32))
        }
        (Value::Float64(x), Value::Float64(y)) => Ok(Value::Float64(f(*x, *y))),
        (Value::Vector(xs), Value::Vector(ys)) => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| zip_float(x, y, f))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Vector),
        (x, y) => Err(Fault::Internal(format!("expected floats, got {x} and {y}"))),
    }
}

fn abs(v: &Value) -> Result<Value, Fault> {
    match v {
        Value::Int32(x) => Ok(Value::Int32(x.wrapping_abs())),
        Value::Int64(x) => Ok(Value::Int64(x.wrapping_abs())),
        Value::Float32(x) => Ok(Value::Float32(x.abs())),
        Value::Float64(x) => Ok(Value::Float64(x.abs())),
        Value::Vector(items) => items
            .iter()
            .map(abs)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Vector),
        other => Err(Fault::Internal(format!("expected a number, got {other}"))),
    }
}

/// `a` if `a <op> b` holds, otherwise `b`; elementwise for vectors.
fn pick(a: &Value, b: &Value, op: BinaryOp) -> Result<Value, Fault> {
    match (a, b) {
        (Value::Vector(xs), Value::Vector(ys)) => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| pick(x, y, op))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Vector),
        _ => {
            let keep_a = Value::binary(op, a, b)?.as_bool().unwrap_or(false);
            Ok(if keep_a { a.clone() } else { b.clone() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn float(v: Value) -> f64 {
        v.as_f64().unwrap()
    }

    #[test]
    fn sin_preserves_precision_of_argument() {
        let v = Intrinsic::Sin.evaluate(&[Value::Float32(0.5)]).unwrap();
        assert!(matches!(v, Value::Float32(_)));
        assert_approx_eq!(float(v), 0.5f64.sin(), 1e-6);
    }

    #[test]
    fn clamp_limits_both_ends() {
        let c = |x: i32| {
            Intrinsic::Clamp
                .evaluate(&[Value::Int32(x), Value::Int32(0), Value::Int32(10)])
                .unwrap()
        };
        assert_eq!(c(-5), Value::Int32(0));
        assert_eq!(c(5), Value::Int32(5));
        assert_eq!(c(50), Value::Int32(10));
    }

    #[test]
    fn min_max_on_vectors() {
        let a = Value::Vector(vec![Value::Float32(1.0), Value::Float32(5.0)]);
        let b = Value::Vector(vec![Value::Float32(3.0), Value::Float32(2.0)]);
        assert_eq!(
            Intrinsic::Max.evaluate(&[a.clone(), b.clone()]).unwrap(),
            Value::Vector(vec![Value::Float32(3.0), Value::Float32(5.0)])
        );
        assert_eq!(
            Intrinsic::Min.evaluate(&[a, b]).unwrap(),
            Value::Vector(vec![Value::Float32(1.0), Value::Float32(2.0)])
        );
    }

    #[test]
    fn fmod_and_pow() {
        assert_approx_eq!(
            float(Intrinsic::Fmod.evaluate(&[Value::Float64(7.5), Value::Float64(2.0)]).unwrap()),
            1.5
        );
        assert_approx_eq!(
            float(Intrinsic::Pow.evaluate(&[Value::Float64(2.0), Value::Float64(10.0)]).unwrap()),
            1024.0
        );
    }

    #[test]
    fn names_round_trip() {
        for name in ["sin", "log10", "clamp", "fmod"] {
            assert_eq!(Intrinsic::from_name(name).unwrap().to_string(), name);
        }
        assert!(Intrinsic::from_name("sinh").is_none());
    }
}
