//! Semantic analysis: resolves names, checks types and lowers the syntax
//! tree to the typed tree in [`tir`].

pub mod check;
pub mod scope;
pub mod tir;
pub mod types;

pub use check::check as analyse;
pub use types::Type;
