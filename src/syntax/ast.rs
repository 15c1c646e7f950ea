//! Untyped syntax tree produced by the parser.
//!
//! One [`SourceUnit`] is produced per parsed fragment. Names are unresolved
//! and types are written exactly as they appear in source; resolution and
//! type checking happen in [`crate::sema`].

use std::fmt;

use serde::Serialize;

use crate::diagnostic::SourceLocation;

/// Everything declared in one source fragment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceUnit {
    pub items: Vec<Item>,
}

/// A declaration that can appear inside a namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Namespace(NamespaceDecl),
    Processor(ProcessorDecl),
    Graph(GraphDecl),
    Function(FunctionDecl),
    Constant(VarDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceDecl {
    pub name: String,
    pub items: Vec<Item>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorDecl {
    pub name: String,
    pub is_main: bool,
    pub endpoints: Vec<EndpointDecl>,
    pub state: Vec<VarDecl>,
    pub externals: Vec<ExternalDecl>,
    pub functions: Vec<FunctionDecl>,
    pub handlers: Vec<HandlerDecl>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphDecl {
    pub name: String,
    pub is_main: bool,
    pub endpoints: Vec<EndpointDecl>,
    pub nodes: Vec<NodeDecl>,
    pub connections: Vec<ConnectionDecl>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// The three kinds of endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Stream,
    Event,
    Value,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Stream => write!(f, "stream"),
            EndpointKind::Event => write!(f, "event"),
            EndpointKind::Value => write!(f, "value"),
        }
    }
}

/// One endpoint. `input stream float a, b;` yields two declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDecl {
    pub direction: Direction,
    pub kind: EndpointKind,
    pub ty: TypeExpr,
    pub name: String,
    pub location: SourceLocation,
}

/// A state variable, local variable or namespace constant.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub init: Option<Expr>,
    pub is_const: bool,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub return_type: TypeExpr,
    pub params: Vec<Param>,
    pub body: Block,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub location: SourceLocation,
}

/// `event name(type v) { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerDecl {
    pub endpoint: String,
    pub param: Param,
    pub body: Block,
    pub location: SourceLocation,
}

/// `node name = qualified::Processor;`
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDecl {
    pub name: String,
    pub target: Vec<String>,
    pub location: SourceLocation,
}

/// `in -> gain -> out;` stored as the full chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDecl {
    pub chain: Vec<EndpointRef>,
    pub location: SourceLocation,
}

/// `node.endpoint`, or a bare name for one of the graph's own endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointRef {
    pub node: Option<String>,
    pub endpoint: String,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PrimitiveType {
    Void,
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::Void => "void",
            PrimitiveType::Bool => "bool",
            PrimitiveType::Int32 => "int32",
            PrimitiveType::Int64 => "int64",
            PrimitiveType::Float32 => "float32",
            PrimitiveType::Float64 => "float64",
            PrimitiveType::String => "string",
        };
        f.write_str(name)
    }
}

/// A type as written: `float32<2>[4]&`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub primitive: PrimitiveType,
    pub vector_size: Option<u32>,
    /// Outermost dimension first, as written left to right.
    pub array_sizes: Vec<u32>,
    pub is_ref: bool,
    pub is_const: bool,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(Block),
    Local(VarDecl),
    Expr(Expr),
    Assign {
        target: Expr,
        op: Option<BinaryOp>,
        value: Expr,
        location: SourceLocation,
    },
    /// `target <- a <- b;`
    Write {
        target: Expr,
        values: Vec<Expr>,
        location: SourceLocation,
    },
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
        location: SourceLocation,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
        location: SourceLocation,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Box<Stmt>,
        location: SourceLocation,
    },
    /// `loop { }` or `loop (n) { }`
    Loop {
        count: Option<Expr>,
        body: Box<Stmt>,
        location: SourceLocation,
    },
    Break(SourceLocation),
    Continue(SourceLocation),
    Return(Option<Expr>, SourceLocation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Bool(bool),
    Int { value: i64, wide: bool },
    Float { value: f64, single: bool },
    Str(String),
    /// A possibly qualified name, `x` or `ns::x`.
    Name(Vec<String>),
    /// `processor.frequency` and friends.
    ProcessorProperty(String),
    Member {
        object: Box<Expr>,
        member: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Vec<String>,
        args: Vec<Expr>,
    },
    /// `float32(x)`, `float<2>(a, b)`, `int[3](1, 2, 3)`
    Construct {
        ty: TypeExpr,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `++x`, `x--`
    Update {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, location: SourceLocation) -> Self {
        Self { kind, location }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Not,
    BitNot,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Negate => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::BitNot => write!(f, "~"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(s)
    }
}
