//! Resolved types and the implicit conversion rules.

use std::fmt;

use serde::{Serialize, Serializer};

pub use crate::syntax::ast::PrimitiveType;
use crate::diagnostic::Diagnostic;
use crate::runtime::value::Value;
use crate::syntax::ast::TypeExpr;

/// A fully resolved data type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(PrimitiveType),
    /// `float32<4>`
    Vector(PrimitiveType, u32),
    /// `int32[8]`; the element may itself be an array or vector.
    Array(Box<Type>, u32),
}

impl Type {
    pub const VOID: Type = Type::Primitive(PrimitiveType::Void);
    pub const BOOL: Type = Type::Primitive(PrimitiveType::Bool);
    pub const INT32: Type = Type::Primitive(PrimitiveType::Int32);
    pub const INT64: Type = Type::Primitive(PrimitiveType::Int64);
    pub const FLOAT32: Type = Type::Primitive(PrimitiveType::Float32);
    pub const FLOAT64: Type = Type::Primitive(PrimitiveType::Float64);
    pub const STRING: Type = Type::Primitive(PrimitiveType::String);

    /// Resolve a written type. Reference and const qualifiers are handled by the caller.
    pub fn from_expr(expr: &TypeExpr) -> Result<Type, Diagnostic> {
        let mut ty = match expr.vector_size {
            Some(size) => {
                if !matches!(
                    expr.primitive,
                    PrimitiveType::Bool
                        | PrimitiveType::Int32
                        | PrimitiveType::Int64
                        | PrimitiveType::Float32
                        | PrimitiveType::Float64
                ) {
                    return Err(Diagnostic::semantic(
                        format!("Illegal vector element type '{}'", expr.primitive),
                        expr.location.clone(),
                    ));
                }
                Type::Vector(expr.primitive, size)
            }
            None => Type::Primitive(expr.primitive),
        };

        if !expr.array_sizes.is_empty() && ty.is_void() {
            return Err(Diagnostic::semantic(
                "Arrays of void are not allowed",
                expr.location.clone(),
            ));
        }
        for &size in expr.array_sizes.iter().rev() {
            ty = Type::Array(Box::new(ty), size);
        }
        Ok(ty)
    }

    pub fn is_void(&self) -> bool {
        *self == Type::VOID
    }

    pub fn is_bool(&self) -> bool {
        *self == Type::BOOL
    }

    pub fn is_string(&self) -> bool {
        *self == Type::STRING
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::Primitive(PrimitiveType::Int32 | PrimitiveType::Int64)
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Type::Primitive(PrimitiveType::Float32 | PrimitiveType::Float64)
        )
    }

    /// Numeric scalar.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Type::Vector(..))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(..))
    }

    /// The primitive of a scalar, or the element primitive of a vector.
    pub fn scalar_primitive(&self) -> Option<PrimitiveType> {
        match self {
            Type::Primitive(p) | Type::Vector(p, _) => Some(*p),
            Type::Array(..) => None,
        }
    }

    /// Scalars and vectors whose elements are numbers.
    pub fn is_numeric_or_vector(&self) -> bool {
        self.scalar_primitive()
            .is_some_and(|p| Type::Primitive(p).is_numeric())
    }

    /// Legal element types for a stream endpoint.
    pub fn is_stream_type(&self) -> bool {
        self.is_numeric_or_vector()
    }

    /// Element type of an array or vector.
    pub fn element_type(&self) -> Option<Type> {
        match self {
            Type::Vector(p, _) => Some(Type::Primitive(*p)),
            Type::Array(elem, _) => Some((**elem).clone()),
            Type::Primitive(_) => None,
        }
    }

    pub fn size(&self) -> Option<u32> {
        match self {
            Type::Vector(_, n) | Type::Array(_, n) => Some(*n),
            Type::Primitive(_) => None,
        }
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            Type::Primitive(p) => primitive_size(*p),
            Type::Vector(p, n) => primitive_size(*p) * *n as usize,
            Type::Array(elem, n) => elem.size_in_bytes() * *n as usize,
        }
    }

    /// The zero value of this type.
    pub fn default_value(&self) -> Value {
        match self {
            Type::Primitive(p) => match p {
                PrimitiveType::Void => Value::Void,
                PrimitiveType::Bool => Value::Bool(false),
                PrimitiveType::Int32 => Value::Int32(0),
                PrimitiveType::Int64 => Value::Int64(0),
                PrimitiveType::Float32 => Value::Float32(0.0),
                PrimitiveType::Float64 => Value::Float64(0.0),
                PrimitiveType::String => Value::String(String::new()),
            },
            Type::Vector(p, n) => {
                Value::Vector(vec![Type::Primitive(*p).default_value(); *n as usize])
            }
            Type::Array(elem, n) => Value::Array(vec![elem.default_value(); *n as usize]),
        }
    }

    /// Whether a value of `self` may be used where `target` is expected without a cast.
    /// Literal constants convert more freely than variables.
    pub fn converts_to(&self, target: &Type, is_literal: bool) -> bool {
        if self == target {
            return true;
        }
        match (self, target) {
            (Type::Primitive(from), Type::Primitive(to)) => {
                primitive_converts(*from, *to, is_literal)
            }
            (Type::Primitive(from), Type::Vector(to, _)) => {
                primitive_converts(*from, *to, is_literal)
            }
            _ => false,
        }
    }

    /// The type both operands of an arithmetic or comparison operator are converted to.
    pub fn common_type(
        lhs: &Type,
        rhs: &Type,
        lhs_literal: bool,
        rhs_literal: bool,
    ) -> Option<Type> {
        if lhs == rhs {
            return Some(lhs.clone());
        }
        if rhs.converts_to(lhs, rhs_literal) {
            return Some(lhs.clone());
        }
        if lhs.converts_to(rhs, lhs_literal) {
            return Some(rhs.clone());
        }
        if lhs.is_numeric()
            && rhs.is_numeric()
            && lhs.converts_to(&Type::FLOAT64, lhs_literal)
            && rhs.converts_to(&Type::FLOAT64, rhs_literal)
        {
            return Some(Type::FLOAT64);
        }
        None
    }

    /// Whether an explicit cast from `self` to `target` is allowed.
    pub fn casts_to(&self, target: &Type) -> bool {
        match (self, target) {
            (a, b) if a == b => true,
            (Type::Primitive(from), Type::Primitive(to)) => {
                primitive_castable(*from) && primitive_castable(*to)
            }
            (Type::Primitive(from), Type::Vector(to, _)) => {
                primitive_castable(*from) && primitive_castable(*to)
            }
            (Type::Vector(from, n), Type::Vector(to, m)) => {
                n == m && primitive_castable(*from) && primitive_castable(*to)
            }
            (Type::Array(a, n), Type::Array(b, m)) => n == m && a.casts_to(b),
            _ => false,
        }
    }
}

fn primitive_size(p: PrimitiveType) -> usize {
    match p {
        PrimitiveType::Void => 0,
        PrimitiveType::Bool => 1,
        PrimitiveType::Int32 | PrimitiveType::Float32 => 4,
        PrimitiveType::Int64 | PrimitiveType::Float64 | PrimitiveType::String => 8,
    }
}

fn primitive_castable(p: PrimitiveType) -> bool {
    !matches!(p, PrimitiveType::Void | PrimitiveType::String)
}

fn primitive_converts(from: PrimitiveType, to: PrimitiveType, is_literal: bool) -> bool {
    use PrimitiveType::*;
    if from == to {
        return true;
    }
    match (from, to) {
        (Int32, Int64 | Float32 | Float64) => true,
        (Int64, Float64) => true,
        (Float32, Float64) => true,
        (Int32 | Int64, Int32 | Int64 | Float32) if is_literal => true,
        (Float32 | Float64, Float32 | Float64) if is_literal => true,
        _ => false,
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{p}"),
            Type::Vector(p, n) => write!(f, "{p}<{n}>"),
            Type::Array(..) => {
                let mut sizes = Vec::new();
                let mut inner = self;
                while let Type::Array(elem, n) = inner {
                    sizes.push(*n);
                    inner = elem;
                }
                write!(f, "{inner}")?;
                for n in sizes {
                    write!(f, "[{n}]")?;
                }
                Ok(())
            }
        }
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
