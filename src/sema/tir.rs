//! Typed intermediate tree produced by the checker and consumed by codegen.
//!
//! Every expression carries its resolved [`Type`], implicit conversions are
//! explicit [`ExprKind::Cast`] nodes, and names are resolved to slots.

use crate::diagnostic::SourceLocation;
use crate::runtime::ops::{Intrinsic, ProcessorProperty};
use crate::runtime::value::Value;
use crate::sema::types::Type;
use crate::syntax::ast::{BinaryOp, Direction, EndpointKind, UnaryOp};

pub type FunctionId = usize;
pub type ProcessorId = usize;
pub type GraphId = usize;

/// A processor or graph, the two things a node or the main entry can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorRef {
    Processor(ProcessorId),
    Graph(GraphId),
}

/// The fully checked program.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub processors: Vec<Processor>,
    pub graphs: Vec<Graph>,
    pub main: Option<ProcessorRef>,
}

impl Module {
    pub fn name_of(&self, r: ProcessorRef) -> &str {
        match r {
            ProcessorRef::Processor(id) => &self.processors[id].name,
            ProcessorRef::Graph(id) => &self.graphs[id].name,
        }
    }

    pub fn inputs_of(&self, r: ProcessorRef) -> &[Endpoint] {
        match r {
            ProcessorRef::Processor(id) => &self.processors[id].inputs,
            ProcessorRef::Graph(id) => &self.graphs[id].inputs,
        }
    }

    pub fn outputs_of(&self, r: ProcessorRef) -> &[Endpoint] {
        match r {
            ProcessorRef::Processor(id) => &self.processors[id].outputs,
            ProcessorRef::Graph(id) => &self.graphs[id].outputs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub name: String,
    pub direction: Direction,
    pub kind: EndpointKind,
    pub ty: Type,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateVar {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct External {
    pub name: String,
    pub ty: Type,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Processor {
    /// Fully qualified, e.g. `audio::Gain`.
    pub name: String,
    pub location: SourceLocation,
    pub inputs: Vec<Endpoint>,
    pub outputs: Vec<Endpoint>,
    pub state: Vec<StateVar>,
    pub externals: Vec<External>,
    /// Runs once per instance to initialise state.
    pub init: FunctionId,
    pub main: FunctionId,
    /// Handler for each input, `None` for non-event inputs and unhandled events.
    pub handlers: Vec<Option<FunctionId>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub name: String,
    pub location: SourceLocation,
    pub inputs: Vec<Endpoint>,
    pub outputs: Vec<Endpoint>,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub target: ProcessorRef,
    pub location: SourceLocation,
}

/// One side of a graph connection. As a source `Graph(i)` is graph input `i`
/// and `Node` names a node output; as a destination `Graph(i)` is graph
/// output `i` and `Node` names a node input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRef {
    Graph(usize),
    Node { node: usize, endpoint: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub source: PortRef,
    pub dest: PortRef,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub is_ref: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub owner: Option<ProcessorId>,
    pub params: Vec<Param>,
    pub return_type: Type,
    /// Types of every local slot; parameters occupy the first slots.
    pub locals: Vec<Type>,
    pub body: Vec<Stmt>,
    /// Functions called directly from the body.
    pub calls: Vec<FunctionId>,
    pub writes_console: bool,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Local(usize),
    State(usize),
}

/// An assignable location: a variable and a path of indices into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub root: Root,
    pub root_ty: Type,
    pub indices: Vec<Expr>,
    /// Type of the element the indices reach.
    pub ty: Type,
}

impl Place {
    /// The expression reading the current value of this place.
    pub fn to_expr(&self) -> Expr {
        let mut expr = Expr {
            kind: match self.root {
                Root::Local(slot) => ExprKind::Local(slot),
                Root::State(slot) => ExprKind::State(slot),
            },
            ty: self.root_ty.clone(),
        };
        for index in &self.indices {
            let ty = expr.ty.element_type().unwrap_or(Type::VOID);
            expr = Expr {
                kind: ExprKind::Index {
                    object: Box::new(expr),
                    index: Box::new(index.clone()),
                },
                ty,
            };
        }
        expr
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Evaluate and discard.
    Eval(Expr),
    Assign {
        target: Place,
        value: Expr,
    },
    Write {
        endpoint: usize,
        kind: EndpointKind,
        value: Expr,
    },
    WriteConsole(Expr),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    /// `while`, `for` and `loop`. `continue` runs `step` before re-testing.
    Loop {
        cond: Option<Expr>,
        body: Vec<Stmt>,
        step: Vec<Stmt>,
    },
    /// `loop (n)`, counting down in local slot `counter`.
    Repeat {
        counter: usize,
        count: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Advance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(Value),
    Local(usize),
    State(usize),
    External(usize),
    Input(usize),
    Property(ProcessorProperty),
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        function: FunctionId,
        args: Vec<Expr>,
        /// Where each reference argument's final value is stored.
        writeback: Vec<Option<Place>>,
    },
    Intrinsic {
        intrinsic: Intrinsic,
        args: Vec<Expr>,
    },
    /// Build a vector or array of `ty` from its elements.
    Construct(Vec<Expr>),
    /// Convert the operand to `ty`.
    Cast(Box<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `++x` / `x--`; `delta` is `1` or `-1`.
    Update {
        target: Place,
        delta: i8,
        prefix: bool,
    },
}

impl Expr {
    pub fn constant(value: Value, ty: Type) -> Self {
        Self {
            kind: ExprKind::Constant(value),
            ty,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_))
    }

    /// Wrap in a conversion to `ty`, converting constants immediately.
    pub fn cast(self, ty: Type) -> Self {
        if self.ty == ty {
            return self;
        }
        if let ExprKind::Constant(v) = &self.kind {
            if let Some(converted) = v.cast(&ty) {
                return Expr::constant(converted, ty);
            }
        }
        Expr {
            kind: ExprKind::Cast(Box::new(self)),
            ty,
        }
    }

    /// Evaluate at compile time when every leaf is a constant. Expressions
    /// that would fault, like integer division by zero, are left alone.
    pub fn fold(&self) -> Option<Value> {
        match &self.kind {
            ExprKind::Constant(v) => Some(v.clone()),
            ExprKind::Cast(inner) => inner.fold()?.cast(&self.ty),
            ExprKind::Unary { op, operand } => Value::unary(*op, &operand.fold()?).ok(),
            ExprKind::Binary { op, lhs, rhs } => {
                Value::binary(*op, &lhs.fold()?, &rhs.fold()?).ok()
            }
            ExprKind::And(lhs, rhs) => {
                if !lhs.fold()?.as_bool()? {
                    return Some(Value::Bool(false));
                }
                Some(Value::Bool(rhs.fold()?.as_bool()?))
            }
            ExprKind::Or(lhs, rhs) => {
                if lhs.fold()?.as_bool()? {
                    return Some(Value::Bool(true));
                }
                Some(Value::Bool(rhs.fold()?.as_bool()?))
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if cond.fold()?.as_bool()? {
                    then.fold()
                } else {
                    otherwise.fold()
                }
            }
            ExprKind::Construct(args) => {
                let items = args.iter().map(Expr::fold).collect::<Option<Vec<_>>>()?;
                Some(if self.ty.is_vector() {
                    Value::Vector(items)
                } else {
                    Value::Array(items)
                })
            }
            ExprKind::Index { object, index } => {
                object.fold()?.index(index.fold()?.as_i64()?).ok()
            }
            ExprKind::Intrinsic { intrinsic, args } => {
                let values = args.iter().map(Expr::fold).collect::<Option<Vec<_>>>()?;
                intrinsic.evaluate(&values).ok()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i32) -> Expr {
        Expr::constant(Value::Int32(v), Type::INT32)
    }

    #[test]
    fn cast_of_constant_is_folded_immediately() {
        let e = int(3).cast(Type::FLOAT32);
        assert_eq!(e.kind, ExprKind::Constant(Value::Float32(3.0)));
    }

    #[test]
    fn fold_arithmetic() {
        let e = Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::Mul,
                lhs: Box::new(int(6)),
                rhs: Box::new(int(7)),
            },
            ty: Type::INT32,
        };
        assert_eq!(e.fold(), Some(Value::Int32(42)));
    }

    #[test]
    fn fold_leaves_division_by_zero() {
        let e = Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::Div,
                lhs: Box::new(int(1)),
                rhs: Box::new(int(0)),
            },
            ty: Type::INT32,
        };
        assert_eq!(e.fold(), None);
    }

    #[test]
    fn fold_stops_at_variables() {
        let e = Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(int(1)),
                rhs: Box::new(Expr {
                    kind: ExprKind::Local(0),
                    ty: Type::INT32,
                }),
            },
            ty: Type::INT32,
        };
        assert_eq!(e.fold(), None);
    }
}
