//! Token types for the cadenza lexer.

use std::fmt;

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

/// The kind of token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    Namespace,
    Processor,
    Graph,
    Node,
    Connection,
    Input,
    Output,
    Stream,
    Event,
    Value,
    External,
    Let,
    Var,
    Const,
    If,
    Else,
    While,
    For,
    Loop,
    Break,
    Continue,
    Return,
    True,
    False,
    Void,
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    StringType,

    // Literals
    Ident(String),
    Int { value: i64, wide: bool },
    Float { value: f64, single: bool },
    Str(String),

    // Delimiters
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
    ColonColon,
    Question,
    Colon,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Tilde,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    PlusPlus,
    MinusMinus,
    LeftArrow,  // <-
    RightArrow, // ->

    Eof,
}

impl TokenKind {
    /// Map an identifier to its keyword, if it is one.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "namespace" => TokenKind::Namespace,
            "processor" => TokenKind::Processor,
            "graph" => TokenKind::Graph,
            "node" => TokenKind::Node,
            "connection" => TokenKind::Connection,
            "input" => TokenKind::Input,
            "output" => TokenKind::Output,
            "stream" => TokenKind::Stream,
            "event" => TokenKind::Event,
            "value" => TokenKind::Value,
            "external" => TokenKind::External,
            "let" => TokenKind::Let,
            "var" => TokenKind::Var,
            "const" => TokenKind::Const,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "loop" => TokenKind::Loop,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "void" => TokenKind::Void,
            "bool" => TokenKind::Bool,
            "int" | "int32" => TokenKind::Int32,
            "int64" => TokenKind::Int64,
            "float" | "float32" => TokenKind::Float32,
            "float64" => TokenKind::Float64,
            "string" => TokenKind::StringType,
            _ => return None,
        };
        Some(kind)
    }

    /// True for the keywords that start a type.
    pub fn is_type_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Void
                | TokenKind::Bool
                | TokenKind::Int32
                | TokenKind::Int64
                | TokenKind::Float32
                | TokenKind::Float64
                | TokenKind::StringType
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Namespace => "namespace",
            TokenKind::Processor => "processor",
            TokenKind::Graph => "graph",
            TokenKind::Node => "node",
            TokenKind::Connection => "connection",
            TokenKind::Input => "input",
            TokenKind::Output => "output",
            TokenKind::Stream => "stream",
            TokenKind::Event => "event",
            TokenKind::Value => "value",
            TokenKind::External => "external",
            TokenKind::Let => "let",
            TokenKind::Var => "var",
            TokenKind::Const => "const",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::Loop => "loop",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Return => "return",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Void => "void",
            TokenKind::Bool => "bool",
            TokenKind::Int32 => "int32",
            TokenKind::Int64 => "int64",
            TokenKind::Float32 => "float32",
            TokenKind::Float64 => "float64",
            TokenKind::StringType => "string",
            TokenKind::Ident(name) => return write!(f, "{name}"),
            TokenKind::Int { value, .. } => return write!(f, "{value}"),
            TokenKind::Float { value, .. } => return write!(f, "{value}"),
            TokenKind::Str(_) => "string literal",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Semicolon => ";",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::ColonColon => "::",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Bang => "!",
            TokenKind::Tilde => "~",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::Assign => "=",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::StarAssign => "*=",
            TokenKind::SlashAssign => "/=",
            TokenKind::PercentAssign => "%=",
            TokenKind::AmpAssign => "&=",
            TokenKind::PipeAssign => "|=",
            TokenKind::CaretAssign => "^=",
            TokenKind::PlusPlus => "++",
            TokenKind::MinusMinus => "--",
            TokenKind::LeftArrow => "<-",
            TokenKind::RightArrow => "->",
            TokenKind::Eof => "end of input",
        };
        f.write_str(text)
    }
}
