//! Cadenza: a compiler and block-based performer for a small signal
//! processing language.
//!
//! Source text is parsed into a [`Program`], bound to build settings by an
//! [`Engine`], linked, and rendered block by block by a [`Performer`].

pub mod diagnostic;
pub mod engine;
pub mod harness;
pub mod program;
pub mod runtime;
pub mod sema;
pub mod syntax;

pub use diagnostic::{Category, Diagnostic, DiagnosticList, Severity, SourceLocation};
pub use engine::{Backend, BuildSettings, EndpointDetails, EndpointHandle, Engine, EngineOptions};
pub use program::Program;
pub use runtime::{OutputEvent, Performer, Value};
