//! Load-time binding of a checked module to a set of build settings:
//! graph flattening, code generation, resource limits and endpoint handles.

use std::collections::HashMap;

use super::codegen::compile_module;
use super::endpoint::{EndpointDetails, EndpointHandle, ExternalVariable};
use super::instance::{flatten, Route};
use super::settings::BuildSettings;
use crate::diagnostic::{Category, Diagnostic, DiagnosticList};
use crate::runtime::ops::{CompiledFunction, FunctionId};
use crate::sema::tir::{Endpoint, Module, ProcessorId};
use crate::sema::types::Type;
use crate::syntax::ast::{Direction, EndpointKind};

/// Name of the implicit event output fed by `console <-` writes.
pub const CONSOLE_ENDPOINT: &str = "console";

/// Bytes assumed per operand stack slot.
const STACK_SLOT_BYTES: u64 = 8;

/// The code and endpoint shape of one flattened processor instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceCode {
    pub name: String,
    pub path: String,
    pub processor: ProcessorId,
    pub init: FunctionId,
    pub main: FunctionId,
    pub handlers: Vec<Option<FunctionId>>,
    pub inputs: Vec<(EndpointKind, Type)>,
    pub outputs: Vec<(EndpointKind, Type)>,
    pub state: Vec<Type>,
    /// Index into `LoadedProgram::externals` for each of the processor's externals.
    pub externals: Vec<usize>,
}

/// A program bound to build settings, shared by every performer linked from it.
#[derive(Debug, Clone)]
pub struct LoadedProgram {
    pub settings: BuildSettings,
    pub functions: Vec<CompiledFunction>,
    pub instances: Vec<InstanceCode>,
    pub routes: Vec<Route>,
    pub dependencies: Vec<(usize, usize)>,
    pub inputs: Vec<EndpointDetails>,
    pub outputs: Vec<EndpointDetails>,
    pub externals: Vec<ExternalVariable>,
    /// Index into `outputs` of the implicit console endpoint.
    pub console: Option<usize>,
    /// Warnings tolerated because `ignore_warnings` was set.
    pub warnings: DiagnosticList,
}

impl LoadedProgram {
    pub fn endpoint(&self, handle: EndpointHandle) -> Option<&EndpointDetails> {
        let index = handle.0 as usize;
        match index.checked_sub(self.inputs.len()) {
            None => self.inputs.get(index),
            Some(output) => self.outputs.get(output),
        }
    }

    pub fn find_endpoint(&self, id: &str) -> Option<&EndpointDetails> {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .find(|e| e.id == id)
    }
}

pub fn build(module: &Module, settings: &BuildSettings) -> Result<LoadedProgram, DiagnosticList> {
    settings.validate().map_err(Diagnostic::build)?;

    let main = module
        .main
        .ok_or_else(|| Diagnostic::build("No main processor or graph found"))?;

    let flat = flatten(module, main);
    let functions = compile_module(module, settings.optimisation_level);

    let mut externals = Vec::new();
    let mut external_slots: HashMap<ProcessorId, Vec<usize>> = HashMap::new();
    let mut instances = Vec::with_capacity(flat.instances.len());
    for instance in &flat.instances {
        let p = &module.processors[instance.processor];
        let slots = external_slots
            .entry(instance.processor)
            .or_insert_with(|| {
                p.externals
                    .iter()
                    .map(|e| {
                        externals.push(ExternalVariable {
                            name: format!("{}::{}", p.name, e.name),
                            ty: e.ty.clone(),
                        });
                        externals.len() - 1
                    })
                    .collect()
            })
            .clone();
        instances.push(InstanceCode {
            name: instance.name.clone(),
            path: instance.path.clone(),
            processor: instance.processor,
            init: p.init,
            main: p.main,
            handlers: p.handlers.clone(),
            inputs: p.inputs.iter().map(|e| (e.kind, e.ty.clone())).collect(),
            outputs: p.outputs.iter().map(|e| (e.kind, e.ty.clone())).collect(),
            state: p.state.iter().map(|s| s.ty.clone()).collect(),
            externals: slots,
        });
    }

    check_state_size(&instances, settings)?;
    check_stack_size(module, &functions, &instances, settings)?;

    let warnings = unhandled_event_warnings(module, &instances);
    if !warnings.is_empty() && !settings.ignore_warnings {
        return Err(warnings);
    }
    for warning in &warnings {
        tracing::warn!("{}", warning.full_description());
    }

    let top_inputs = module.inputs_of(main);
    let top_outputs = module.outputs_of(main);
    let mut handle = 0u32;
    let mut describe = |endpoint: &Endpoint| {
        let details = EndpointDetails {
            id: endpoint.name.clone(),
            endpoint_type: endpoint.kind,
            data_type: endpoint.ty.clone(),
            direction: endpoint.direction,
            handle: EndpointHandle(handle),
        };
        handle += 1;
        details
    };
    let inputs: Vec<EndpointDetails> = top_inputs.iter().map(&mut describe).collect();
    let mut outputs: Vec<EndpointDetails> = top_outputs.iter().map(&mut describe).collect();

    let mut console = None;
    let clashes = outputs.iter().any(|e| e.id == CONSOLE_ENDPOINT);
    if !clashes && writes_console(module, &instances) {
        console = Some(outputs.len());
        outputs.push(EndpointDetails {
            id: CONSOLE_ENDPOINT.into(),
            endpoint_type: EndpointKind::Event,
            data_type: Type::STRING,
            direction: Direction::Output,
            handle: EndpointHandle(handle),
        });
    }

    Ok(LoadedProgram {
        settings: settings.clone(),
        functions,
        instances,
        dependencies: flat.dependencies(),
        routes: flat.routes,
        inputs,
        outputs,
        externals,
        console,
        warnings,
    })
}

fn check_state_size(instances: &[InstanceCode], settings: &BuildSettings) -> Result<(), Diagnostic> {
    let total: u64 = instances
        .iter()
        .flat_map(|i| &i.state)
        .map(|ty| ty.size_in_bytes() as u64)
        .sum();
    if total > settings.max_state_size {
        return Err(Diagnostic::build(format!(
            "Processor state size {total} exceeds the maximum allowed {}",
            settings.max_state_size
        )));
    }
    Ok(())
}

fn check_stack_size(
    module: &Module,
    functions: &[CompiledFunction],
    instances: &[InstanceCode],
    settings: &BuildSettings,
) -> Result<(), Diagnostic> {
    let mut memo = vec![None; functions.len()];
    let mut deepest = 0;
    for instance in instances {
        let entries = [instance.init, instance.main]
            .into_iter()
            .chain(instance.handlers.iter().flatten().copied());
        for entry in entries {
            deepest = deepest.max(stack_bytes(module, functions, entry, &mut memo));
        }
    }
    if deepest > settings.max_stack_size {
        return Err(Diagnostic::build(format!(
            "Stack size {deepest} exceeds the maximum allowed {}",
            settings.max_stack_size
        )));
    }
    Ok(())
}

/// Worst-case stack use of `id` and everything it calls. Recursion has
/// already been rejected, so the call graph is acyclic.
fn stack_bytes(
    module: &Module,
    functions: &[CompiledFunction],
    id: FunctionId,
    memo: &mut [Option<u64>],
) -> u64 {
    if let Some(bytes) = memo[id] {
        return bytes;
    }
    let f = &module.functions[id];
    let locals: u64 = f.locals.iter().map(|ty| ty.size_in_bytes() as u64).sum();
    let frame = locals + functions[id].max_depth as u64 * STACK_SLOT_BYTES;
    let callees = f
        .calls
        .iter()
        .map(|&callee| stack_bytes(module, functions, callee, memo))
        .max()
        .unwrap_or(0);
    let total = frame + callees;
    memo[id] = Some(total);
    total
}

fn unhandled_event_warnings(module: &Module, instances: &[InstanceCode]) -> DiagnosticList {
    let mut warnings = DiagnosticList::new();
    let mut seen = Vec::new();
    for instance in instances {
        if seen.contains(&instance.processor) {
            continue;
        }
        seen.push(instance.processor);
        let p = &module.processors[instance.processor];
        for (endpoint, handler) in p.inputs.iter().zip(&p.handlers) {
            if endpoint.kind == EndpointKind::Event && handler.is_none() {
                warnings.push(
                    Diagnostic::warning(
                        Category::Build,
                        format!("Event input '{}' has no handler", endpoint.name),
                    )
                    .at(endpoint.location.clone()),
                );
            }
        }
    }
    warnings
}

/// Whether any function an instance can run writes to the console.
fn writes_console(module: &Module, instances: &[InstanceCode]) -> bool {
    let mut visited = vec![false; module.functions.len()];
    let mut pending: Vec<FunctionId> = instances
        .iter()
        .flat_map(|i| {
            [i.init, i.main]
                .into_iter()
                .chain(i.handlers.iter().flatten().copied())
        })
        .collect();
    while let Some(id) = pending.pop() {
        if std::mem::replace(&mut visited[id], true) {
            continue;
        }
        let f = &module.functions[id];
        if f.writes_console {
            return true;
        }
        pending.extend(f.calls.iter().copied());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema;
    use crate::syntax::parse_unit;

    fn module(src: &str) -> Module {
        sema::analyse(&[parse_unit(src, None).unwrap()]).unwrap()
    }

    fn settings() -> BuildSettings {
        BuildSettings::default()
    }

    #[test]
    fn handles_are_dense_inputs_first() {
        let m = module(
            "processor P { input stream float a; input value int b; output stream float out;
                void main() { loop { out <- a; advance(); } } }",
        );
        let loaded = build(&m, &settings()).unwrap();
        let handles: Vec<u32> = loaded
            .inputs
            .iter()
            .chain(&loaded.outputs)
            .map(|e| e.handle.0)
            .collect();
        assert_eq!(handles, vec![0, 1, 2]);
        assert_eq!(loaded.endpoint(EndpointHandle(2)).unwrap().id, "out");
        assert_eq!(loaded.find_endpoint("b").unwrap().handle, EndpointHandle(1));
        assert!(loaded.endpoint(EndpointHandle(3)).is_none());
    }

    #[test]
    fn missing_main_is_a_build_error() {
        let m = sema::analyse(&[parse_unit("namespace n { bool f() { return true; } }", None).unwrap()])
            .unwrap();
        let err = build(&m, &settings()).unwrap_err();
        assert_eq!(err.full_description(), "error: No main processor or graph found");
    }

    #[test]
    fn invalid_settings_fail_the_build() {
        let m = module("processor P { output stream float out; void main() { advance(); } }");
        let err = build(&m, &settings().with_max_block_size(0)).unwrap_err();
        assert_eq!(err.full_description(), "error: Illegal block size 0");
    }

    #[test]
    fn state_size_is_limited() {
        let m = module(
            "processor P { output stream float out; float[1000] buffer;
                void main() { advance(); } }",
        );
        let err = build(&m, &settings().with_max_state_size(100)).unwrap_err();
        assert_eq!(
            err.full_description(),
            "error: Processor state size 4000 exceeds the maximum allowed 100"
        );
    }

    #[test]
    fn stack_size_is_limited() {
        let m = module(
            "processor P { output stream float out;
                void main() { float[64] scratch; advance(); } }",
        );
        let err = build(&m, &settings().with_max_stack_size(16)).unwrap_err();
        assert!(err
            .full_description()
            .starts_with("error: Stack size "));
    }

    #[test]
    fn unhandled_event_inputs_warn() {
        let m = module(
            "processor P { input event float e; output stream float out;
                void main() { advance(); } }",
        );
        let err = build(&m, &settings()).unwrap_err();
        assert_eq!(
            err.full_description(),
            "1:33: warning: Event input 'e' has no handler"
        );

        let loaded = build(&m, &settings().with_ignore_warnings(true)).unwrap();
        assert!(loaded.warnings.has_warnings());
    }

    #[test]
    fn console_writes_add_an_event_output() {
        let m = module(
            "processor P { output stream float out;
                void main() { console <- \"hi\"; advance(); } }",
        );
        let loaded = build(&m, &settings()).unwrap();
        assert_eq!(loaded.console, Some(1));
        let console = loaded.find_endpoint(CONSOLE_ENDPOINT).unwrap();
        assert!(console.is_event());
        assert_eq!(console.handle, EndpointHandle(1));
    }

    #[test]
    fn externals_are_named_after_their_processor() {
        let m = module(
            "namespace audio { processor Gain { input stream float in; output stream float out;
                external float level;
                void main() { loop { out <- in * level; advance(); } } } }
            graph G { input stream float in; output stream float out;
                node a = audio::Gain; node b = audio::Gain;
                connection in -> a -> b -> out; }",
        );
        let loaded = build(&m, &settings()).unwrap();
        assert_eq!(loaded.externals.len(), 1);
        assert_eq!(loaded.externals[0].name, "audio::Gain::level");
        assert_eq!(loaded.instances[0].externals, vec![0]);
        assert_eq!(loaded.instances[1].externals, vec![0]);
    }
}
