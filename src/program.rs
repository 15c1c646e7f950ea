//! A program: an ordered list of parsed source fragments and the module
//! checked from all of them together.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::diagnostic::DiagnosticList;
use crate::sema::tir::Module;
use crate::sema::{self, Type};
use crate::syntax::ast::{FunctionDecl, Item, PrimitiveType, SourceUnit, TypeExpr};
use crate::syntax::parse_unit;

#[derive(Debug, Clone, Default)]
pub struct Program {
    units: Vec<SourceUnit>,
    module: Module,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source` and add it to the program. Declarations from earlier
    /// fragments are visible to it. On failure the fragment is discarded and
    /// the program is unchanged.
    pub fn parse(&mut self, source: &str) -> Result<Duration, DiagnosticList> {
        self.parse_fragment(source, None)
    }

    /// As [`Program::parse`], with `name` used as the file in diagnostics.
    pub fn parse_named(&mut self, source: &str, name: &str) -> Result<Duration, DiagnosticList> {
        self.parse_fragment(source, Some(Arc::from(name)))
    }

    fn parse_fragment(&mut self, source: &str, file: Option<Arc<str>>) -> Result<Duration, DiagnosticList> {
        let start = Instant::now();
        let _span = tracing::debug_span!("parse", fragment = self.units.len()).entered();

        let unit = parse_unit(source, file)?;
        self.units.push(unit);
        match sema::analyse(&self.units) {
            Ok(module) => {
                self.module = module;
                Ok(start.elapsed())
            }
            Err(diagnostic) => {
                self.units.pop();
                Err(diagnostic.into())
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// The checked module built from every fragment parsed so far.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Declarations of the namespace with the given qualified name, merged
    /// across fragments. `None` if no fragment declares it.
    pub fn syntax_tree(&self, namespace: &str) -> Option<NamespaceNode> {
        let mut node: Option<NamespaceNode> = None;
        for unit in &self.units {
            collect_namespace(&unit.items, "", namespace, &mut node);
        }
        node
    }
}

fn collect_namespace(items: &[Item], prefix: &str, wanted: &str, node: &mut Option<NamespaceNode>) {
    for item in items {
        let Item::Namespace(ns) = item else { continue };
        let qualified = if prefix.is_empty() {
            ns.name.clone()
        } else {
            format!("{prefix}::{}", ns.name)
        };
        if qualified == wanted {
            let entry = node.get_or_insert_with(|| NamespaceNode {
                name: qualified.clone(),
                functions: Vec::new(),
                processors: Vec::new(),
            });
            for item in &ns.items {
                match item {
                    Item::Function(f) => entry.functions.push(FunctionNode::from_decl(f)),
                    Item::Processor(p) => entry.processors.push(p.name.clone()),
                    Item::Graph(g) => entry.processors.push(g.name.clone()),
                    _ => {}
                }
            }
        }
        collect_namespace(&ns.items, &qualified, wanted, node);
    }
}

/// One namespace as seen by tooling that inspects a program without running it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceNode {
    pub name: String,
    pub functions: Vec<FunctionNode>,
    /// Processors and graphs declared directly inside.
    pub processors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionNode {
    pub name: String,
    pub return_type: TypeDescription,
    pub parameters: Vec<ParameterNode>,
}

impl FunctionNode {
    fn from_decl(f: &FunctionDecl) -> Self {
        Self {
            name: f.name.clone(),
            return_type: TypeDescription::of(&f.return_type),
            parameters: f
                .params
                .iter()
                .map(|p| ParameterNode {
                    name: p.name.clone(),
                    ty: TypeDescription::of(&p.ty),
                    is_reference: p.ty.is_ref,
                })
                .collect(),
        }
    }

    /// `bool f()`: the shape of a self-checking test function.
    pub fn is_boolean_test(&self) -> bool {
        self.parameters.is_empty() && self.return_type.is_primitive("boolean")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterNode {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeDescription,
    pub is_reference: bool,
}

/// `{ OBJECT: "PrimitiveType", type: "boolean" }` and similar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeDescription {
    #[serde(rename = "OBJECT")]
    pub object: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl TypeDescription {
    fn of(expr: &TypeExpr) -> Self {
        let object = if !expr.array_sizes.is_empty() {
            "ArrayType"
        } else if expr.vector_size.is_some() {
            "VectorType"
        } else {
            "PrimitiveType"
        };
        let ty = match (object, expr.primitive) {
            ("PrimitiveType", PrimitiveType::Bool) => "boolean".to_string(),
            _ => Type::from_expr(expr)
                .map(|t| t.to_string())
                .unwrap_or_else(|_| expr.primitive.to_string()),
        };
        Self {
            object: object.into(),
            ty,
        }
    }

    pub fn is_primitive(&self, name: &str) -> bool {
        self.object == "PrimitiveType" && self.ty == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_cumulative() {
        let mut program = Program::new();
        program
            .parse("namespace lib { int twice(int x) { return x * 2; } }")
            .unwrap();
        program
            .parse("processor P { output stream int out; void main() { loop { out <- lib::twice(3); advance(); } } }")
            .unwrap();
        assert_eq!(program.module().processors.len(), 1);
    }

    #[test]
    fn failed_fragment_is_discarded() {
        let mut program = Program::new();
        program.parse("namespace a { int f() { return 1; } }").unwrap();
        let err = program.parse("namespace b { int g() { return missing; } }").unwrap_err();
        assert_eq!(err.full_description(), "1:32: error: Cannot find symbol 'missing'");
        assert!(program.syntax_tree("b").is_none());
        program.parse("namespace b { int g() { return a::f(); } }").unwrap();
        assert!(program.syntax_tree("b").is_some());
    }

    #[test]
    fn syntax_tree_lists_functions() {
        let mut program = Program::new();
        program
            .parse(
                "namespace tests {
                    bool passes() { return true; }
                    bool takesArg(int x) { return x > 0; }
                    float<2> pair() { return float<2>(1.0f, 2.0f); }
                }
                namespace tests { bool later() { return true; } }",
            )
            .unwrap();
        let tree = program.syntax_tree("tests").unwrap();
        let names: Vec<&str> = tree.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["passes", "takesArg", "pair", "later"]);

        let tests: Vec<&str> = tree
            .functions
            .iter()
            .filter(|f| f.is_boolean_test())
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(tests, vec!["passes", "later"]);
        assert_eq!(tree.functions[2].return_type.object, "VectorType");
        assert_eq!(tree.functions[2].return_type.ty, "float32<2>");
    }

    #[test]
    fn nested_namespaces_use_qualified_names() {
        let mut program = Program::new();
        program
            .parse("namespace a::b { bool f() { return true; } }")
            .unwrap();
        assert!(program.syntax_tree("b").is_none());
        assert_eq!(program.syntax_tree("a::b").unwrap().functions.len(), 1);
    }

    #[test]
    fn type_description_serialises_like_the_script_api() {
        let mut program = Program::new();
        program.parse("namespace t { bool f() { return true; } }").unwrap();
        let tree = program.syntax_tree("t").unwrap();
        let yaml = serde_yaml::to_string(&tree.functions[0]).unwrap();
        assert!(yaml.contains("OBJECT: PrimitiveType"));
        assert!(yaml.contains("type: boolean"));
        assert!(yaml.contains("returnType:"));
    }
}
