//! Linking: fixes external values and the per-frame execution order of a
//! loaded program.

use std::collections::VecDeque;
use std::sync::Arc;

use super::build::LoadedProgram;
use super::settings::Backend;
use crate::diagnostic::{Diagnostic, DiagnosticList};
use crate::runtime::value::Value;

/// A loaded program ready to be performed.
#[derive(Debug)]
pub struct LinkedProgram {
    pub program: Arc<LoadedProgram>,
    /// Values for every external, indexed like `LoadedProgram::externals`.
    pub externals: Vec<Value>,
    /// Instance indices in the order they run each frame.
    pub order: Vec<usize>,
    pub instruction_budget: u64,
}

pub fn link(
    program: Arc<LoadedProgram>,
    externals: &[Option<Value>],
    backend: Backend,
    instruction_budget: u64,
) -> Result<LinkedProgram, DiagnosticList> {
    let mut errors = DiagnosticList::new();
    let mut values = Vec::with_capacity(program.externals.len());
    for (variable, value) in program.externals.iter().zip(externals) {
        match value {
            Some(v) => values.push(v.clone()),
            None => errors.push(Diagnostic::link(format!(
                "External variable '{}' has not been given a value",
                variable.name
            ))),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let order = execution_order(&program)?;

    if backend == Backend::Wasm {
        return Err(Diagnostic::unsupported("wasm performer").into());
    }

    Ok(LinkedProgram {
        program,
        externals: values,
        order,
        instruction_budget,
    })
}

/// Topological sort of the instances. Ties keep declaration order.
fn execution_order(program: &LoadedProgram) -> Result<Vec<usize>, Diagnostic> {
    let count = program.instances.len();
    let mut in_degree = vec![0usize; count];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; count];

    for &(from, to) in &program.dependencies {
        adj[from].push(to);
        in_degree[to] += 1;
    }

    let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &next in &adj[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() == count {
        return Ok(order);
    }
    let cycle: Vec<&str> = (0..count)
        .filter(|&i| in_degree[i] > 0)
        .map(|i| program.instances[i].name.as_str())
        .collect();
    Err(Diagnostic::link(format!(
        "Feedback cycle detected between graph nodes: {}",
        cycle.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::build::build;
    use crate::engine::settings::BuildSettings;
    use crate::sema;
    use crate::syntax::parse_unit;

    fn load(src: &str) -> Arc<LoadedProgram> {
        let module = sema::analyse(&[parse_unit(src, None).unwrap()]).unwrap();
        let settings = BuildSettings::default().with_ignore_warnings(true);
        Arc::new(build(&module, &settings).unwrap())
    }

    const PASS: &str = "
        processor Pass { input stream float in; output stream float out;
            void main() { loop { out <- in; advance(); } } }
    ";

    #[test]
    fn downstream_nodes_run_after_upstream() {
        let src = format!(
            "{PASS}
            graph G {{ input stream float in; output stream float out;
                node b = Pass; node a = Pass;
                connection in -> a.in; connection a.out -> b.in; connection b.out -> out; }}"
        );
        let linked = link(load(&src), &[], Backend::Vm, 1000).unwrap();
        assert_eq!(linked.order, vec![1, 0]);
    }

    #[test]
    fn feedback_cycles_are_rejected() {
        let src = format!(
            "{PASS}
            graph G {{ input stream float in; output stream float out;
                node a = Pass; node b = Pass;
                connection in -> a.in; connection a.out -> b.in; connection b.out -> a.in;
                connection b.out -> out; }}"
        );
        let err = link(load(&src), &[], Backend::Vm, 1000).unwrap_err();
        assert_eq!(
            err.full_description(),
            "error: Feedback cycle detected between graph nodes: a, b"
        );
    }

    #[test]
    fn unset_externals_are_reported_together() {
        let src = "processor P { output stream float out; external float gain; external int n;
            void main() { loop { out <- gain; advance(); } } }";
        let program = load(src);
        let err = link(program.clone(), &[None, None], Backend::Vm, 1000).unwrap_err();
        assert_eq!(err.len(), 2);
        assert_eq!(
            err.first().unwrap().message,
            "External variable 'P::gain' has not been given a value"
        );

        let ok = link(
            program,
            &[Some(Value::Float32(0.5)), Some(Value::Int32(3))],
            Backend::Vm,
            1000,
        )
        .unwrap();
        assert_eq!(ok.externals, vec![Value::Float32(0.5), Value::Int32(3)]);
    }

    #[test]
    fn wasm_backend_is_unsupported() {
        let err = link(load(PASS), &[], Backend::Wasm, 1000).unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(
            err.full_description(),
            "error: Language feature not yet implemented: wasm performer!"
        );
    }
}
