//! Recursive-descent parser producing a [`SourceUnit`].
//!
//! Parsing stops at the first error; the returned diagnostic carries the
//! location of the offending token.

use std::sync::Arc;

use super::ast::*;
use super::token::{Token, TokenKind};
use crate::diagnostic::{Diagnostic, SourceLocation};

/// Deepest nesting of namespaces, statements and expressions accepted.
/// Every later pass recurses over the tree, so this also bounds their stack use.
const MAX_NESTING_DEPTH: usize = 128;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: Option<Arc<str>>,
    /// Inside `target <- a <- b`, where `<-` separates values.
    in_write: bool,
    /// Set when `a <- b` was split into `a < -b` and the minus is still owed.
    negate_next: bool,
    /// Current nesting. Each binary or postfix operator also counts one level,
    /// since it adds a level to the tree above its left operand.
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            file: None,
            in_write: false,
            negate_next: false,
            depth: 0,
        }
    }

    pub fn with_file(mut self, file: Option<Arc<str>>) -> Self {
        self.file = file;
        self
    }

    pub fn parse(&mut self) -> Result<SourceUnit, Diagnostic> {
        let mut items = Vec::new();

        while !self.is_at_end() {
            match &self.peek().kind {
                TokenKind::Namespace => {
                    items.push(Item::Namespace(self.nested("Namespace", Self::parse_namespace)?))
                }
                TokenKind::Processor => items.push(Item::Processor(self.parse_processor()?)),
                TokenKind::Graph => items.push(Item::Graph(self.parse_graph()?)),
                TokenKind::Let | TokenKind::Var => {
                    return Err(self.error_here("Variables cannot be declared at global scope"));
                }
                kind if kind.is_type_keyword() || *kind == TokenKind::Const => {
                    let start = self.location();
                    self.parse_type()?;
                    self.expect_ident()?;
                    let message = if self.check(&TokenKind::LParen) {
                        "Functions cannot be declared at global scope"
                    } else {
                        "Variables cannot be declared at global scope"
                    };
                    return Err(Diagnostic::syntax(message, start));
                }
                _ => {
                    return Err(self.error_here("Expected a namespace, processor or graph declaration"));
                }
            }
        }

        Ok(SourceUnit { items })
    }

    // ---- declarations ----------------------------------------------------

    fn parse_namespace(&mut self) -> Result<NamespaceDecl, Diagnostic> {
        let location = self.location();
        self.expect(TokenKind::Namespace)?;
        let mut names = vec![self.expect_ident()?];
        while self.match_kind(&TokenKind::ColonColon) {
            self.descend("Namespace")?;
            names.push(self.expect_ident()?);
        }
        self.expect(TokenKind::LBrace)?;

        let mut items = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            items.push(self.parse_namespace_item()?);
        }
        self.expect(TokenKind::RBrace)?;

        // `namespace a::b { }` nests b inside a
        let innermost = names.pop().unwrap_or_default();
        let mut decl = NamespaceDecl {
            name: innermost,
            items,
            location: location.clone(),
        };
        while let Some(outer) = names.pop() {
            decl = NamespaceDecl {
                name: outer,
                items: vec![Item::Namespace(decl)],
                location: location.clone(),
            };
        }
        Ok(decl)
    }

    fn parse_namespace_item(&mut self) -> Result<Item, Diagnostic> {
        match &self.peek().kind {
            TokenKind::Namespace => Ok(Item::Namespace(self.nested("Namespace", Self::parse_namespace)?)),
            TokenKind::Processor => Ok(Item::Processor(self.parse_processor()?)),
            TokenKind::Graph => Ok(Item::Graph(self.parse_graph()?)),
            TokenKind::Let | TokenKind::Const => {
                let decl = self.parse_var_decl()?;
                self.expect(TokenKind::Semicolon)?;
                if decl.init.is_none() {
                    return Err(Diagnostic::syntax(
                        format!("Constant '{}' must be given a value", decl.name),
                        decl.location,
                    ));
                }
                Ok(Item::Constant(decl))
            }
            TokenKind::Var => Err(self.error_here("Namespace variables must be declared 'let' or 'const'")),
            kind if kind.is_type_keyword() => {
                let ty = self.parse_type()?;
                let name_location = self.location();
                let name = self.expect_ident()?;
                if self.check(&TokenKind::LParen) {
                    Ok(Item::Function(self.parse_function_rest(ty, name, name_location)?))
                } else {
                    Err(Diagnostic::syntax(
                        "Namespace variables must be declared 'let' or 'const'",
                        name_location,
                    ))
                }
            }
            _ => Err(self.error_here("Expected a declaration")),
        }
    }

    fn parse_annotation(&mut self) -> Result<bool, Diagnostic> {
        if !(self.check(&TokenKind::LBracket) && self.check_next(&TokenKind::LBracket)) {
            return Ok(false);
        }
        self.advance();
        self.advance();
        let mut is_main = false;
        loop {
            let key = self.expect_ident()?;
            if key == "main" {
                is_main = true;
            }
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        self.expect(TokenKind::RBracket)?;
        Ok(is_main)
    }

    fn parse_processor(&mut self) -> Result<ProcessorDecl, Diagnostic> {
        self.expect(TokenKind::Processor)?;
        let location = self.location();
        let name = self.expect_ident()?;
        let is_main = self.parse_annotation()?;
        self.expect(TokenKind::LBrace)?;

        let mut decl = ProcessorDecl {
            name,
            is_main,
            endpoints: Vec::new(),
            state: Vec::new(),
            externals: Vec::new(),
            functions: Vec::new(),
            handlers: Vec::new(),
            location,
        };

        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            match &self.peek().kind {
                TokenKind::Input | TokenKind::Output => {
                    decl.endpoints.extend(self.parse_endpoints()?);
                }
                TokenKind::External => {
                    self.advance();
                    let ty = self.parse_type()?;
                    let location = self.location();
                    let name = self.expect_ident()?;
                    self.expect(TokenKind::Semicolon)?;
                    decl.externals.push(ExternalDecl { name, ty, location });
                }
                TokenKind::Event => decl.handlers.push(self.parse_handler()?),
                TokenKind::Let | TokenKind::Var | TokenKind::Const => {
                    decl.state.push(self.parse_var_decl()?);
                    self.expect(TokenKind::Semicolon)?;
                }
                kind if kind.is_type_keyword() => {
                    let ty = self.parse_type()?;
                    let name_location = self.location();
                    let name = self.expect_ident()?;
                    if self.check(&TokenKind::LParen) {
                        decl.functions
                            .push(self.parse_function_rest(ty, name, name_location)?);
                    } else {
                        let init = if self.match_kind(&TokenKind::Assign) {
                            Some(self.parse_expression()?)
                        } else {
                            None
                        };
                        self.expect(TokenKind::Semicolon)?;
                        decl.state.push(VarDecl {
                            name,
                            is_const: ty.is_const,
                            ty: Some(ty),
                            init,
                            location: name_location,
                        });
                    }
                }
                _ => return Err(self.error_here("Expected a processor member declaration")),
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(decl)
    }

    fn parse_graph(&mut self) -> Result<GraphDecl, Diagnostic> {
        self.expect(TokenKind::Graph)?;
        let location = self.location();
        let name = self.expect_ident()?;
        let is_main = self.parse_annotation()?;
        self.expect(TokenKind::LBrace)?;

        let mut decl = GraphDecl {
            name,
            is_main,
            endpoints: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            location,
        };

        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            match &self.peek().kind {
                TokenKind::Input | TokenKind::Output => {
                    decl.endpoints.extend(self.parse_endpoints()?);
                }
                TokenKind::Node => {
                    self.advance();
                    let location = self.location();
                    let name = self.expect_ident()?;
                    self.expect(TokenKind::Assign)?;
                    let mut target = vec![self.expect_ident()?];
                    while self.match_kind(&TokenKind::ColonColon) {
                        target.push(self.expect_ident()?);
                    }
                    self.expect(TokenKind::Semicolon)?;
                    decl.nodes.push(NodeDecl {
                        name,
                        target,
                        location,
                    });
                }
                TokenKind::Connection => {
                    self.advance();
                    if self.match_kind(&TokenKind::LBrace) {
                        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
                            decl.connections.push(self.parse_connection()?);
                        }
                        self.expect(TokenKind::RBrace)?;
                    } else {
                        decl.connections.push(self.parse_connection()?);
                    }
                }
                _ => return Err(self.error_here("Expected a graph member declaration")),
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(decl)
    }

    fn parse_endpoints(&mut self) -> Result<Vec<EndpointDecl>, Diagnostic> {
        let direction = if self.match_kind(&TokenKind::Input) {
            Direction::Input
        } else {
            self.expect(TokenKind::Output)?;
            Direction::Output
        };
        let kind = match &self.peek().kind {
            TokenKind::Stream => EndpointKind::Stream,
            TokenKind::Event => EndpointKind::Event,
            TokenKind::Value => EndpointKind::Value,
            _ => return Err(self.error_here("Expected 'stream', 'event' or 'value'")),
        };
        self.advance();
        let ty = self.parse_type()?;

        let mut endpoints = Vec::new();
        loop {
            let location = self.location();
            let name = self.expect_ident()?;
            endpoints.push(EndpointDecl {
                direction,
                kind,
                ty: ty.clone(),
                name,
                location,
            });
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(endpoints)
    }

    fn parse_connection(&mut self) -> Result<ConnectionDecl, Diagnostic> {
        let location = self.location();
        let mut chain = vec![self.parse_endpoint_ref()?];
        while self.match_kind(&TokenKind::RightArrow) {
            chain.push(self.parse_endpoint_ref()?);
        }
        if chain.len() < 2 {
            return Err(self.error_here("Expected '->'"));
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(ConnectionDecl { chain, location })
    }

    fn parse_endpoint_ref(&mut self) -> Result<EndpointRef, Diagnostic> {
        let location = self.location();
        let first = self.expect_ident()?;
        if self.match_kind(&TokenKind::Dot) {
            let endpoint = self.expect_ident()?;
            Ok(EndpointRef {
                node: Some(first),
                endpoint,
                location,
            })
        } else {
            Ok(EndpointRef {
                node: None,
                endpoint: first,
                location,
            })
        }
    }

    fn parse_handler(&mut self) -> Result<HandlerDecl, Diagnostic> {
        let location = self.location();
        self.expect(TokenKind::Event)?;
        let endpoint = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let param = self.parse_param()?;
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(HandlerDecl {
            endpoint,
            param,
            body,
            location,
        })
    }

    fn parse_function_rest(
        &mut self,
        return_type: TypeExpr,
        name: String,
        location: SourceLocation,
    ) -> Result<FunctionDecl, Diagnostic> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(FunctionDecl {
            name,
            return_type,
            params,
            body,
            location,
        })
    }

    fn parse_param(&mut self) -> Result<Param, Diagnostic> {
        let ty = self.parse_type()?;
        let location = self.location();
        let name = self.expect_ident()?;
        Ok(Param { name, ty, location })
    }

    /// `let x = e`, `var x = e`, `const T x = e`, `T x`, `T x = e` (no trailing `;`).
    fn parse_var_decl(&mut self) -> Result<VarDecl, Diagnostic> {
        match &self.peek().kind {
            TokenKind::Let | TokenKind::Var => {
                let is_const = self.check(&TokenKind::Let);
                self.advance();
                let location = self.location();
                let name = self.expect_ident()?;
                if !self.check(&TokenKind::Assign) {
                    return Err(self.error_here(format!(
                        "Variable '{name}' must be given an initial value"
                    )));
                }
                self.advance();
                let init = self.parse_expression()?;
                Ok(VarDecl {
                    name,
                    ty: None,
                    init: Some(init),
                    is_const,
                    location,
                })
            }
            _ => {
                let ty = self.parse_type()?;
                let location = self.location();
                let name = self.expect_ident()?;
                let init = if self.match_kind(&TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                Ok(VarDecl {
                    name,
                    is_const: ty.is_const,
                    ty: Some(ty),
                    init,
                    location,
                })
            }
        }
    }

    fn parse_type(&mut self) -> Result<TypeExpr, Diagnostic> {
        let location = self.location();
        let is_const = self.match_kind(&TokenKind::Const);

        let primitive = match &self.peek().kind {
            TokenKind::Void => PrimitiveType::Void,
            TokenKind::Bool => PrimitiveType::Bool,
            TokenKind::Int32 => PrimitiveType::Int32,
            TokenKind::Int64 => PrimitiveType::Int64,
            TokenKind::Float32 => PrimitiveType::Float32,
            TokenKind::Float64 => PrimitiveType::Float64,
            TokenKind::StringType => PrimitiveType::String,
            _ => return Err(self.error_here("Expected a type")),
        };
        self.advance();

        let vector_size = if self.match_kind(&TokenKind::Lt) {
            let size = self.expect_size()?;
            self.expect(TokenKind::Gt)?;
            Some(size)
        } else {
            None
        };

        let mut is_ref = self.match_kind(&TokenKind::Amp);
        let mut array_sizes = Vec::new();
        while self.check(&TokenKind::LBracket) && !self.check_next(&TokenKind::LBracket) {
            if is_ref {
                return Err(self.error_here("Array elements cannot be references"));
            }
            self.advance();
            array_sizes.push(self.expect_size()?);
            self.expect(TokenKind::RBracket)?;
        }
        if !is_ref {
            is_ref = self.match_kind(&TokenKind::Amp);
        }

        Ok(TypeExpr {
            primitive,
            vector_size,
            array_sizes,
            is_ref,
            is_const,
            location,
        })
    }

    fn expect_size(&mut self) -> Result<u32, Diagnostic> {
        match self.peek().kind {
            TokenKind::Int { value, .. } if value > 0 && value <= i64::from(u32::MAX) => {
                self.advance();
                Ok(value as u32)
            }
            _ => Err(self.error_here("Expected a positive integer size")),
        }
    }

    // ---- statements ------------------------------------------------------

    fn parse_block(&mut self) -> Result<Block, Diagnostic> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Block { stmts })
    }

    fn parse_statement(&mut self) -> Result<Stmt, Diagnostic> {
        self.nested("Statement", Self::parse_statement_kind)
    }

    fn parse_statement_kind(&mut self) -> Result<Stmt, Diagnostic> {
        let location = self.location();
        match &self.peek().kind {
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::Block(Block::default()))
            }
            TokenKind::If => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                let then = Box::new(self.parse_statement()?);
                let otherwise = if self.match_kind(&TokenKind::Else) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                    location,
                })
            }
            TokenKind::While => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While {
                    cond,
                    body,
                    location,
                })
            }
            TokenKind::For => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let init = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(Box::new(self.parse_simple_statement()?))
                };
                self.expect(TokenKind::Semicolon)?;
                let cond = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(TokenKind::Semicolon)?;
                let step = if self.check(&TokenKind::RParen) {
                    None
                } else {
                    Some(Box::new(self.parse_simple_statement()?))
                };
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::For {
                    init,
                    cond,
                    step,
                    body,
                    location,
                })
            }
            TokenKind::Loop => {
                self.advance();
                let count = if self.match_kind(&TokenKind::LParen) {
                    let count = self.parse_expression()?;
                    self.expect(TokenKind::RParen)?;
                    Some(count)
                } else {
                    None
                };
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::Loop {
                    count,
                    body,
                    location,
                })
            }
            TokenKind::Break => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Break(location))
            }
            TokenKind::Continue => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Continue(location))
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Return(value, location))
            }
            _ => {
                let stmt = self.parse_simple_statement()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(stmt)
            }
        }
    }

    /// Declarations, assignments, writes and expression statements, without the `;`.
    fn parse_simple_statement(&mut self) -> Result<Stmt, Diagnostic> {
        let location = self.location();
        let kind = self.peek().kind.clone();

        if matches!(kind, TokenKind::Let | TokenKind::Var | TokenKind::Const) {
            return Ok(Stmt::Local(self.parse_var_decl()?));
        }

        if kind.is_type_keyword() {
            let start = self.pos;
            let is_decl = self.parse_type().is_ok() && matches!(self.peek().kind, TokenKind::Ident(_));
            self.pos = start;
            if is_decl {
                return Ok(Stmt::Local(self.parse_var_decl()?));
            }
        }

        // `target <- value`
        let start = self.pos;
        let depth = self.depth;
        if let Ok(target) = self.parse_postfix() {
            if self.check(&TokenKind::LeftArrow) {
                let mut values = Vec::new();
                let outer = std::mem::replace(&mut self.in_write, true);
                while self.match_kind(&TokenKind::LeftArrow) {
                    values.push(self.parse_expression()?);
                }
                self.in_write = outer;
                return Ok(Stmt::Write {
                    target,
                    values,
                    location,
                });
            }
        }
        self.pos = start;
        self.depth = depth;
        self.negate_next = false;

        let expr = self.parse_expression()?;
        let op = match &self.peek().kind {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinaryOp::Add),
            TokenKind::MinusAssign => Some(BinaryOp::Sub),
            TokenKind::StarAssign => Some(BinaryOp::Mul),
            TokenKind::SlashAssign => Some(BinaryOp::Div),
            TokenKind::PercentAssign => Some(BinaryOp::Mod),
            TokenKind::AmpAssign => Some(BinaryOp::BitAnd),
            TokenKind::PipeAssign => Some(BinaryOp::BitOr),
            TokenKind::CaretAssign => Some(BinaryOp::BitXor),
            _ => return Ok(Stmt::Expr(expr)),
        };
        let location = self.location();
        self.advance();
        let value = self.parse_expression()?;
        Ok(Stmt::Assign {
            target: expr,
            op,
            value,
            location,
        })
    }

    // ---- expressions -----------------------------------------------------

    pub fn parse_expression(&mut self) -> Result<Expr, Diagnostic> {
        self.nested("Expression", Self::parse_ternary)
    }

    fn parse_ternary(&mut self) -> Result<Expr, Diagnostic> {
        let cond = self.parse_binary(0)?;
        if self.check(&TokenKind::Question) {
            let location = self.location();
            self.advance();
            let then = self.parse_expression()?;
            self.expect(TokenKind::Colon)?;
            let otherwise = self.nested("Expression", Self::parse_ternary)?;
            return Ok(Expr::new(
                ExprKind::Ternary {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                },
                location,
            ));
        }
        Ok(cond)
    }

    /// Precedence climbing: operators at `min_level` or tighter are folded
    /// into the left operand, tighter ones bind first.
    fn parse_binary(&mut self, min_level: usize) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_unary()?;
        while let Some((level, op)) = self.binary_operator() {
            if level < min_level {
                break;
            }
            let location = self.location();
            if self.check(&TokenKind::LeftArrow) {
                self.negate_next = true;
            }
            self.advance();
            self.descend("Expression")?;
            let rhs = self.parse_binary(level + 1)?;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                location,
            );
        }
        Ok(lhs)
    }

    /// The binary operator at the current token and its level, lowest first.
    fn binary_operator(&self) -> Option<(usize, BinaryOp)> {
        let operator = match &self.peek().kind {
            TokenKind::OrOr => (0, BinaryOp::Or),
            TokenKind::AndAnd => (1, BinaryOp::And),
            TokenKind::Pipe => (2, BinaryOp::BitOr),
            TokenKind::Caret => (3, BinaryOp::BitXor),
            TokenKind::Amp => (4, BinaryOp::BitAnd),
            TokenKind::EqEq => (5, BinaryOp::Eq),
            TokenKind::NotEq => (5, BinaryOp::Ne),
            TokenKind::Lt => (6, BinaryOp::Lt),
            TokenKind::LtEq => (6, BinaryOp::Le),
            TokenKind::Gt => (6, BinaryOp::Gt),
            TokenKind::GtEq => (6, BinaryOp::Ge),
            // `a <-1` outside a write is `a < -1`
            TokenKind::LeftArrow if !self.in_write => (6, BinaryOp::Lt),
            TokenKind::Shl => (7, BinaryOp::Shl),
            TokenKind::Shr => (7, BinaryOp::Shr),
            TokenKind::Plus => (8, BinaryOp::Add),
            TokenKind::Minus => (8, BinaryOp::Sub),
            TokenKind::Star => (9, BinaryOp::Mul),
            TokenKind::Slash => (9, BinaryOp::Div),
            TokenKind::Percent => (9, BinaryOp::Mod),
            _ => return None,
        };
        Some(operator)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        let location = self.location();
        if std::mem::take(&mut self.negate_next) {
            let operand = self.nested("Expression", Self::parse_unary)?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Negate,
                    operand: Box::new(operand),
                },
                location,
            ));
        }

        let op = match &self.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Negate),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let increment = self.check(&TokenKind::PlusPlus);
                self.advance();
                let target = self.nested("Expression", Self::parse_unary)?;
                return Ok(Expr::new(
                    ExprKind::Update {
                        target: Box::new(target),
                        increment,
                        prefix: true,
                    },
                    location,
                ));
            }
            TokenKind::Plus => {
                self.advance();
                return self.nested("Expression", Self::parse_unary);
            }
            _ => None,
        };

        match op {
            Some(op) => {
                self.advance();
                let operand = self.nested("Expression", Self::parse_unary)?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    location,
                ))
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        loop {
            let location = self.location();
            match &self.peek().kind {
                TokenKind::LBracket => {
                    self.advance();
                    self.descend("Expression")?;
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        location,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    self.descend("Expression")?;
                    let member = self.expect_ident()?;
                    expr = Expr::new(
                        ExprKind::Member {
                            object: Box::new(expr),
                            member,
                        },
                        location,
                    );
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let increment = self.check(&TokenKind::PlusPlus);
                    self.advance();
                    self.descend("Expression")?;
                    expr = Expr::new(
                        ExprKind::Update {
                            target: Box::new(expr),
                            increment,
                            prefix: false,
                        },
                        location,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let location = self.location();
        let kind = self.peek().kind.clone();

        let expr = match kind {
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Int { value, wide } => {
                self.advance();
                ExprKind::Int { value, wide }
            }
            TokenKind::Float { value, single } => {
                self.advance();
                ExprKind::Float { value, single }
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::LParen => {
                self.advance();
                let outer = std::mem::replace(&mut self.in_write, false);
                let inner = self.parse_expression();
                self.in_write = outer;
                let inner = inner?;
                self.expect(TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::Processor => {
                self.advance();
                self.expect(TokenKind::Dot)?;
                ExprKind::ProcessorProperty(self.expect_ident()?)
            }
            TokenKind::Ident(_) => {
                let mut path = vec![self.expect_ident()?];
                while self.match_kind(&TokenKind::ColonColon) {
                    path.push(self.expect_ident()?);
                }
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_arguments()?;
                    ExprKind::Call { callee: path, args }
                } else {
                    ExprKind::Name(path)
                }
            }
            ref k if k.is_type_keyword() || *k == TokenKind::Const => {
                let ty = self.parse_type()?;
                if !self.check(&TokenKind::LParen) {
                    return Err(self.error_here("Expected '('"));
                }
                let args = self.parse_arguments()?;
                ExprKind::Construct { ty, args }
            }
            _ => {
                return Err(self.error_here(format!("Unexpected '{}'", self.peek().kind)));
            }
        };

        Ok(Expr::new(expr, location))
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, Diagnostic> {
        self.expect(TokenKind::LParen)?;
        let outer = std::mem::replace(&mut self.in_write, false);
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                match self.parse_expression() {
                    Ok(arg) => args.push(arg),
                    Err(e) => {
                        self.in_write = outer;
                        return Err(e);
                    }
                }
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.in_write = outer;
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    // ---- helpers ---------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn check_next(&self, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.pos + 1)
            .is_some_and(|t| std::mem::discriminant(&t.kind) == std::mem::discriminant(kind))
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn location(&self) -> SourceLocation {
        let t = self.peek();
        SourceLocation::new(t.line, t.col).in_file(self.file.clone())
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::syntax(message, self.location())
    }

    /// Count one more level of nesting, failing once the limit is reached.
    fn descend(&mut self, what: &str) -> Result<(), Diagnostic> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error_here(format!("{what} is too deeply nested")));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `parse` one level deeper, restoring the depth afterwards.
    fn nested<T>(
        &mut self,
        what: &str,
        parse: impl FnOnce(&mut Self) -> Result<T, Diagnostic>,
    ) -> Result<T, Diagnostic> {
        let outer = self.depth;
        self.descend(what)?;
        let result = parse(self);
        self.depth = outer;
        result
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), Diagnostic> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_here(format!("Expected '{kind}'")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, Diagnostic> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_here("Expected an identifier")),
        }
    }
}
