//! Engine: binds a program to build settings, links it and creates performers.
//!
//! The lifecycle is `load` → `link` → `create_performer`. `unload` returns the
//! engine to its pre-load state while keeping its settings, so the same
//! engine can load the same or another program again.

pub mod build;
pub mod codegen;
pub mod endpoint;
pub mod instance;
pub mod link;
pub mod settings;

use std::sync::Arc;
use std::time::{Duration, Instant};

pub use build::{LoadedProgram, CONSOLE_ENDPOINT};
pub use endpoint::{EndpointDetails, EndpointHandle, ExternalVariable};
pub use link::LinkedProgram;
pub use settings::{Backend, BuildOverrides, BuildSettings, EngineOptions};

use crate::diagnostic::{Diagnostic, DiagnosticList};
use crate::program::Program;
use crate::runtime::performer::Performer;
use crate::runtime::value::Value;

pub struct Engine {
    options: EngineOptions,
    settings: BuildSettings,
    loaded: Option<Arc<LoadedProgram>>,
    external_values: Vec<Option<Value>>,
    linked: Option<Arc<LinkedProgram>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let settings = options.initial_settings();
        tracing::debug!(backend = ?options.backend, session = settings.session_id, "engine created");
        Self {
            options,
            settings,
            loaded: None,
            external_values: Vec::new(),
            linked: None,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn build_settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Replace the build settings. Only allowed while nothing is loaded.
    pub fn set_build_settings(&mut self, settings: BuildSettings) -> Result<(), Diagnostic> {
        if self.loaded.is_some() {
            return Err(Diagnostic::precondition(
                "Build settings cannot be changed while a program is loaded",
            ));
        }
        self.settings = settings;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn is_linked(&self) -> bool {
        self.linked.is_some()
    }

    /// Bind `program` to the current build settings.
    pub fn load(&mut self, program: &Program) -> Result<Duration, DiagnosticList> {
        if self.loaded.is_some() {
            return Err(Diagnostic::precondition("A program is already loaded").into());
        }
        let start = Instant::now();
        let _span = tracing::info_span!("load").entered();

        let loaded = build::build(program.module(), &self.settings).map_err(|errors| {
            tracing::debug!(errors = errors.len(), "load failed");
            errors
        })?;
        tracing::info!(
            instances = loaded.instances.len(),
            inputs = loaded.inputs.len(),
            outputs = loaded.outputs.len(),
            "program loaded"
        );

        self.external_values = vec![None; loaded.externals.len()];
        self.loaded = Some(Arc::new(loaded));
        self.linked = None;
        Ok(start.elapsed())
    }

    /// Discard the loaded program, keeping the build settings.
    pub fn unload(&mut self) {
        if self.loaded.take().is_some() {
            tracing::debug!("program unloaded");
        }
        self.linked = None;
        self.external_values.clear();
    }

    fn loaded(&self) -> Result<&Arc<LoadedProgram>, Diagnostic> {
        self.loaded
            .as_ref()
            .ok_or_else(|| Diagnostic::precondition("No program has been loaded"))
    }

    pub fn input_endpoints(&self) -> &[EndpointDetails] {
        match &self.loaded {
            Some(p) => &p.inputs,
            None => &[],
        }
    }

    pub fn output_endpoints(&self) -> &[EndpointDetails] {
        match &self.loaded {
            Some(p) => &p.outputs,
            None => &[],
        }
    }

    pub fn endpoint_handle(&self, id: &str) -> Result<EndpointHandle, Diagnostic> {
        self.loaded()?
            .find_endpoint(id)
            .map(|e| e.handle)
            .ok_or_else(|| Diagnostic::not_found(format!("Cannot find endpoint '{id}'")))
    }

    pub fn external_variables(&self) -> &[ExternalVariable] {
        match &self.loaded {
            Some(p) => &p.externals,
            None => &[],
        }
    }

    /// Supply the value of an external. Numbers convert to the declared
    /// type; other values must match its shape.
    pub fn set_external_variable(&mut self, name: &str, value: &Value) -> Result<(), Diagnostic> {
        let loaded = self.loaded()?.clone();
        let index = loaded
            .externals
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| Diagnostic::not_found(format!("Cannot find external variable '{name}'")))?;
        let ty = &loaded.externals[index].ty;
        let converted = value.coerce(ty).ok_or_else(|| {
            Diagnostic::type_mismatch(format!(
                "Cannot convert {value} to '{ty}' for external variable '{name}'"
            ))
        })?;
        self.external_values[index] = Some(converted);
        Ok(())
    }

    /// Resolve externals and execution order for the loaded program.
    pub fn link(&mut self) -> Result<Duration, DiagnosticList> {
        let loaded = self.loaded()?.clone();
        let start = Instant::now();
        let _span = tracing::info_span!("link").entered();

        let linked = link::link(
            loaded,
            &self.external_values,
            self.options.backend,
            self.options.instruction_budget,
        )?;
        tracing::info!(order = ?linked.order, "program linked");
        self.linked = Some(Arc::new(linked));
        Ok(start.elapsed())
    }

    /// A new performer sharing this engine's linked program.
    pub fn create_performer(&self) -> Result<Performer, Diagnostic> {
        let linked = self
            .linked
            .clone()
            .ok_or_else(|| Diagnostic::precondition("The engine must be linked before creating a performer"))?;
        tracing::debug!("performer created");
        Performer::new(linked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Category;

    fn program(src: &str) -> Program {
        let mut program = Program::new();
        program.parse(src).unwrap();
        program
    }

    fn engine() -> Engine {
        Engine::new(EngineOptions {
            seed: Some(1),
            ..EngineOptions::default()
        })
    }

    const GAIN: &str = "processor Gain { input stream float in; output stream float out;
        external float level;
        void main() { loop { out <- in * level; advance(); } } }";

    #[test]
    fn lifecycle_order_is_enforced() {
        let mut e = engine();
        assert_eq!(e.link().unwrap_err().first().unwrap().category, Category::Precondition);
        assert!(e.create_performer().is_err());
        assert!(e.endpoint_handle("in").is_err());
        assert!(e.input_endpoints().is_empty());
    }

    #[test]
    fn settings_are_frozen_while_loaded() {
        let mut e = engine();
        e.load(&program(GAIN)).unwrap();
        assert!(e.set_build_settings(BuildSettings::default()).is_err());
        e.unload();
        assert!(e.set_build_settings(BuildSettings::default()).is_ok());
    }

    #[test]
    fn externals_must_be_set_before_linking() {
        let mut e = engine();
        e.load(&program(GAIN)).unwrap();
        assert_eq!(e.external_variables()[0].name, "Gain::level");

        let err = e.link().unwrap_err();
        assert_eq!(
            err.full_description(),
            "error: External variable 'Gain::level' has not been given a value"
        );

        e.set_external_variable("Gain::level", &Value::Float64(0.5)).unwrap();
        e.link().unwrap();

        let mut performer = e.create_performer().unwrap();
        let input = e.endpoint_handle("in").unwrap();
        let output = e.endpoint_handle("out").unwrap();
        performer.set_block_size(2).unwrap();
        performer
            .set_input_frames(input, &[Value::Float32(2.0), Value::Float32(4.0)])
            .unwrap();
        performer.advance().unwrap();
        assert_eq!(
            performer.get_output_frames(output).unwrap(),
            &[Value::Float32(1.0), Value::Float32(2.0)]
        );
    }

    #[test]
    fn set_external_variable_checks_name_and_shape() {
        let mut e = engine();
        e.load(&program(GAIN)).unwrap();
        let err = e.set_external_variable("Gain::missing", &Value::Float32(1.0)).unwrap_err();
        assert_eq!(err.category, Category::NotFound);
        let err = e
            .set_external_variable("Gain::level", &Value::String("loud".into()))
            .unwrap_err();
        assert_eq!(err.category, Category::Type);
    }

    #[test]
    fn unknown_endpoint_is_not_found() {
        let mut e = engine();
        e.load(&program(GAIN)).unwrap();
        let err = e.endpoint_handle("nope").unwrap_err();
        assert_eq!(err.category, Category::NotFound);
        assert_eq!(err.message, "Cannot find endpoint 'nope'");
    }

    #[test]
    fn second_load_requires_unload() {
        let p = program(GAIN);
        let mut e = engine();
        e.load(&p).unwrap();
        assert!(e.load(&p).is_err());
        e.unload();
        assert!(!e.is_loaded());
        e.load(&p).unwrap();
    }

    #[test]
    fn performers_are_independent() {
        let mut e = engine();
        e.load(&program(
            "processor Counter { output stream int out; int n;
                void main() { loop { out <- n; ++n; advance(); } } }",
        ))
        .unwrap();
        e.link().unwrap();
        let mut a = e.create_performer().unwrap();
        let mut b = e.create_performer().unwrap();
        a.set_block_size(4).unwrap();
        a.advance().unwrap();
        b.set_block_size(1).unwrap();
        b.advance().unwrap();
        assert_eq!(b.get_output_frames(EndpointHandle(0)).unwrap(), &[Value::Int32(0)]);
    }
}
