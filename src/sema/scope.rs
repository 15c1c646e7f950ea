//! Symbol tables: program-wide namespaces, processor members and block scopes.

use std::collections::HashMap;

use super::tir::{Expr, FunctionId, ProcessorRef};
use super::types::Type;

/// What a fully qualified global name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    Namespace,
    Processor,
    Function,
    Constant,
}

/// Program-wide names, keyed by their `::`-joined qualified path.
#[derive(Debug, Default)]
pub struct GlobalScope {
    kinds: HashMap<String, GlobalKind>,
    pub processors: HashMap<String, ProcessorRef>,
    pub functions: HashMap<String, Vec<FunctionId>>,
    pub constants: HashMap<String, Expr>,
}

impl GlobalScope {
    pub fn qualify(namespace: &[String], name: &str) -> String {
        if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}::{name}", namespace.join("::"))
        }
    }

    /// Reserve `qualified` for `kind`. Namespaces may be reopened and
    /// functions overloaded; any other reuse fails.
    pub fn reserve(&mut self, qualified: &str, kind: GlobalKind) -> bool {
        match self.kinds.get(qualified) {
            None => {
                self.kinds.insert(qualified.to_string(), kind);
                true
            }
            Some(existing) => {
                *existing == kind && matches!(kind, GlobalKind::Namespace | GlobalKind::Function)
            }
        }
    }

    /// Look `path` up from inside `namespace`, trying the innermost enclosing
    /// namespace first and working outwards.
    pub fn resolve<'a, T>(
        map: &'a HashMap<String, T>,
        namespace: &[String],
        path: &[String],
    ) -> Option<&'a T> {
        let relative = path.join("::");
        (0..=namespace.len())
            .rev()
            .find_map(|depth| map.get(&Self::qualify(&namespace[..depth], &relative)))
    }
}

/// A member of a processor body.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Input(usize),
    Output(usize),
    State { slot: usize, is_const: bool },
    External(usize),
    Functions(Vec<FunctionId>),
}

#[derive(Debug, Default)]
pub struct ProcessorScope {
    pub members: HashMap<String, Member>,
}

impl ProcessorScope {
    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// Add a non-function member, failing if the name is taken.
    pub fn declare(&mut self, name: &str, member: Member) -> bool {
        if self.members.contains_key(name) {
            return false;
        }
        self.members.insert(name.to_string(), member);
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalVar {
    pub slot: usize,
    pub ty: Type,
    pub is_const: bool,
}

/// Nested block scopes inside one function body.
#[derive(Debug, Default)]
pub struct LocalScopes {
    scopes: Vec<HashMap<String, LocalVar>>,
}

impl LocalScopes {
    pub fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    /// Declare in the innermost scope. Shadowing an outer scope is allowed.
    pub fn declare(&mut self, name: &str, var: LocalVar) -> bool {
        let Some(scope) = self.scopes.last_mut() else {
            return false;
        };
        if scope.contains_key(name) {
            return false;
        }
        scope.insert(name.to_string(), var);
        true
    }

    pub fn lookup(&self, name: &str) -> Option<&LocalVar> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }
}
