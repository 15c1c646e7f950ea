//! The performer: runs a linked program block by block, frame by frame.
//!
//! Each frame, instances run in topological order. An instance first
//! receives the values and events routed to its inputs (event handlers run
//! immediately), then its `main` fiber resumes until the next `advance()`.
//! Downstream instances therefore see upstream output from the same frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::inputs::{EventQueue, ValueRamp};
use super::ops::CompiledFunction;
use super::value::Value;
use super::vm::{Context, Fault, Fiber, Properties, Status};
use crate::diagnostic::Diagnostic;
use crate::engine::build::{InstanceCode, LoadedProgram};
use crate::engine::endpoint::{EndpointDetails, EndpointHandle};
use crate::engine::instance::Port;
use crate::engine::link::LinkedProgram;
use crate::sema::types::Type;
use crate::syntax::ast::EndpointKind;

/// An event produced during the last block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEvent {
    /// Zero-based frame within the block.
    pub frame_offset: u32,
    pub event: Value,
}

#[derive(Debug, Default)]
struct InstanceState {
    state: Vec<Value>,
    externals: Vec<Value>,
    inputs: Vec<Value>,
    outputs: Vec<Value>,
    events: Vec<(usize, Value)>,
    console: Vec<Value>,
    fiber: Fiber,
    handler: Fiber,
    finished: bool,
    /// Events routed to each input this frame.
    pending: Vec<Vec<Value>>,
}

/// Per top-level input staging.
enum Staged {
    Stream(Vec<Value>),
    Value(ValueRamp),
    Event(EventQueue),
}

pub struct Performer {
    linked: Arc<LinkedProgram>,
    block_size: u32,
    instances: Vec<InstanceState>,
    /// For each instance: (source, input endpoint) pairs feeding it.
    incoming: Vec<Vec<(Port, usize)>>,
    /// For each top-level output: the ports feeding it.
    feeds: Vec<Vec<Port>>,
    staged: Vec<Staged>,
    top_values: Vec<Value>,
    top_events: Vec<Vec<Value>>,
    frames: Vec<Vec<Value>>,
    events: Vec<Vec<OutputEvent>>,
    values: Vec<Value>,
    xruns: u64,
    fault: Option<Diagnostic>,
}

impl Performer {
    /// Create a performer and run every instance's state initialisation.
    pub fn new(linked: Arc<LinkedProgram>) -> Result<Self, Diagnostic> {
        let program = &linked.program;
        let settings = &program.settings;

        let mut incoming = vec![Vec::new(); program.instances.len()];
        let mut feeds = vec![Vec::new(); program.outputs.len()];
        for route in &program.routes {
            match route.dest {
                Port::Input { instance, endpoint } => incoming[instance].push((route.source, endpoint)),
                Port::TopOutput(o) => feeds[o].push(route.source),
                _ => {}
            }
        }

        let staged = program
            .inputs
            .iter()
            .map(|e| match e.endpoint_type {
                EndpointKind::Stream => Staged::Stream(Vec::new()),
                EndpointKind::Value => Staged::Value(ValueRamp::new(e.data_type.clone())),
                EndpointKind::Event => {
                    Staged::Event(EventQueue::new(settings.event_buffer_size as usize))
                }
            })
            .collect();

        let mut performer = Self {
            block_size: settings.max_block_size,
            instances: Vec::with_capacity(program.instances.len()),
            incoming,
            feeds,
            staged,
            top_values: program.inputs.iter().map(|e| e.data_type.default_value()).collect(),
            top_events: vec![Vec::new(); program.inputs.len()],
            frames: vec![Vec::new(); program.outputs.len()],
            events: vec![Vec::new(); program.outputs.len()],
            values: program.outputs.iter().map(|e| e.data_type.default_value()).collect(),
            xruns: 0,
            fault: None,
            linked: linked.clone(),
        };

        for (index, code) in program.instances.iter().enumerate() {
            let state = performer
                .initialise(index, code)
                .map_err(|fault| Diagnostic::runtime(fault.to_string()))?;
            performer.instances.push(state);
        }
        Ok(performer)
    }

    fn initialise(&self, index: usize, code: &InstanceCode) -> Result<InstanceState, Fault> {
        let functions = &self.linked.program.functions;
        let mut instance = InstanceState {
            state: code.state.iter().map(Type::default_value).collect(),
            externals: code
                .externals
                .iter()
                .map(|&e| self.linked.externals[e].clone())
                .collect(),
            inputs: code.inputs.iter().map(|(_, ty)| ty.default_value()).collect(),
            outputs: code.outputs.iter().map(|(_, ty)| ty.default_value()).collect(),
            pending: vec![Vec::new(); code.inputs.len()],
            fiber: Fiber::new(functions, code.main, Vec::new()),
            ..InstanceState::default()
        };
        let properties = self.properties(index);
        instance.handler.restart(functions, code.init, Vec::new());
        instance.run_handler(functions, properties, self.linked.instruction_budget)?;
        Ok(instance)
    }

    fn properties(&self, index: usize) -> Properties {
        let settings = &self.linked.program.settings;
        Properties {
            frequency: settings.frequency,
            id: index as i32,
            session: settings.session_id,
        }
    }

    fn program(&self) -> &LoadedProgram {
        &self.linked.program
    }

    // ---- block configuration and staged input ----

    /// Frames rendered by the next `advance`, between 1 and the build's
    /// maximum block size.
    pub fn set_block_size(&mut self, frames: u32) -> Result<(), Diagnostic> {
        let max = self.program().settings.max_block_size;
        if frames == 0 || frames > max {
            return Err(Diagnostic::precondition(format!(
                "Block size {frames} is outside the allowed range 1 to {max}"
            )));
        }
        self.block_size = frames;
        Ok(())
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Stage stream frames for the next block, replacing any staged earlier.
    /// Missing trailing frames are silent; frames beyond the block size are
    /// dropped and counted as xruns.
    pub fn set_input_frames(&mut self, handle: EndpointHandle, frames: &[Value]) -> Result<(), Diagnostic> {
        let (index, ty) = self.input(handle, EndpointKind::Stream)?;
        let mut converted = Vec::with_capacity(frames.len());
        for frame in frames {
            converted.push(frame.coerce(&ty).ok_or_else(|| mismatch(frame, &ty))?);
        }
        let limit = self.block_size as usize;
        if converted.len() > limit {
            let dropped = converted.len() - limit;
            self.record_xruns(dropped as u64, "stream input overflow");
            converted.truncate(limit);
        }
        if let Staged::Stream(staged) = &mut self.staged[index] {
            *staged = converted;
        }
        Ok(())
    }

    /// Move a value input to `value` over `frames` frames.
    pub fn set_input_value(
        &mut self,
        handle: EndpointHandle,
        value: &Value,
        frames: u32,
    ) -> Result<(), Diagnostic> {
        let (index, ty) = self.input(handle, EndpointKind::Value)?;
        let value = value.coerce(&ty).ok_or_else(|| mismatch(value, &ty))?;
        if let Staged::Value(ramp) = &mut self.staged[index] {
            ramp.set_target(value, frames);
        }
        Ok(())
    }

    /// Queue an event for delivery at the start of the next block.
    pub fn add_input_event(&mut self, handle: EndpointHandle, event: &Value) -> Result<(), Diagnostic> {
        let (index, ty) = self.input(handle, EndpointKind::Event)?;
        let event = event.coerce(&ty).ok_or_else(|| mismatch(event, &ty))?;
        let accepted = match &mut self.staged[index] {
            Staged::Event(queue) => queue.push(event),
            _ => true,
        };
        if !accepted {
            self.record_xruns(1, "event queue full");
        }
        Ok(())
    }

    fn input(&self, handle: EndpointHandle, kind: EndpointKind) -> Result<(usize, Type), Diagnostic> {
        let index = handle.0 as usize;
        let details = self
            .program()
            .inputs
            .get(index)
            .ok_or_else(|| unknown_handle(handle))?;
        expect_kind(details, kind)?;
        Ok((index, details.data_type.clone()))
    }

    fn output(&self, handle: EndpointHandle, kind: EndpointKind) -> Result<usize, Diagnostic> {
        let program = self.program();
        let index = (handle.0 as usize)
            .checked_sub(program.inputs.len())
            .filter(|&o| o < program.outputs.len())
            .ok_or_else(|| unknown_handle(handle))?;
        expect_kind(&program.outputs[index], kind)?;
        Ok(index)
    }

    // ---- rendering ----

    /// Render one block of `block_size` frames.
    pub fn advance(&mut self) -> Result<(), Diagnostic> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        for frames in &mut self.frames {
            frames.clear();
        }
        for events in &mut self.events {
            events.clear();
        }

        let linked = self.linked.clone();
        let result = (0..self.block_size).try_for_each(|frame| self.render_frame(&linked, frame));

        for staged in &mut self.staged {
            if let Staged::Stream(frames) = staged {
                frames.clear();
            }
        }

        if let Err(fault) = result {
            for frames in &mut self.frames {
                frames.clear();
            }
            for events in &mut self.events {
                events.clear();
            }
            let diagnostic = Diagnostic::runtime(fault.to_string());
            tracing::error!(error = %fault, "performer faulted");
            self.fault = Some(diagnostic.clone());
            return Err(diagnostic);
        }
        Ok(())
    }

    fn render_frame(&mut self, linked: &LinkedProgram, frame: u32) -> Result<(), Fault> {
        let program = &linked.program;
        self.stage_top_inputs(frame);

        for &index in &linked.order {
            let mut instance = std::mem::take(&mut self.instances[index]);
            let result = self.gather(index, &program.instances[index], &mut instance).and_then(|()| {
                instance.run_frame(
                    &program.instances[index],
                    &program.functions,
                    self.properties(index),
                    linked.instruction_budget,
                )
            });
            self.instances[index] = instance;
            result?;
        }

        self.collect_outputs(program, frame);
        Ok(())
    }

    fn stage_top_inputs(&mut self, frame: u32) {
        for (i, staged) in self.staged.iter_mut().enumerate() {
            let events = &mut self.top_events[i];
            events.clear();
            match staged {
                Staged::Stream(frames) => {
                    self.top_values[i] = match frames.get(frame as usize) {
                        Some(v) => v.clone(),
                        None => self.linked.program.inputs[i].data_type.default_value(),
                    };
                }
                Staged::Value(ramp) => self.top_values[i] = ramp.next_frame().clone(),
                Staged::Event(queue) => {
                    if frame == 0 {
                        queue.drain_into(events);
                    }
                }
            }
        }
    }

    /// Fill `instance`'s inputs from whatever is routed to them this frame.
    fn gather(&self, index: usize, code: &InstanceCode, instance: &mut InstanceState) -> Result<(), Fault> {
        for (e, (kind, ty)) in code.inputs.iter().enumerate() {
            match kind {
                EndpointKind::Stream => instance.inputs[e] = ty.default_value(),
                EndpointKind::Event => instance.pending[e].clear(),
                EndpointKind::Value => {}
            }
        }

        for &(source, e) in &self.incoming[index] {
            let (kind, ty) = &code.inputs[e];
            match kind {
                EndpointKind::Stream => {
                    if let Some(v) = self.port_value(source).and_then(|v| v.coerce(ty)) {
                        instance.inputs[e].accumulate(&v)?;
                    }
                }
                EndpointKind::Value => {
                    if let Some(v) = self.port_value(source).and_then(|v| v.coerce(ty)) {
                        instance.inputs[e] = v;
                    }
                }
                EndpointKind::Event => {
                    let pending = &mut instance.pending[e];
                    self.port_events(source, |v| {
                        if let Some(v) = v.coerce(ty) {
                            pending.push(v);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    fn port_value(&self, port: Port) -> Option<&Value> {
        match port {
            Port::TopInput(i) => self.top_values.get(i),
            Port::Output { instance, endpoint } => self.instances.get(instance)?.outputs.get(endpoint),
            _ => None,
        }
    }

    fn port_events(&self, port: Port, mut sink: impl FnMut(&Value)) {
        match port {
            Port::TopInput(i) => self.top_events[i].iter().for_each(sink),
            Port::Output { instance, endpoint } => {
                for (e, v) in &self.instances[instance].events {
                    if *e == endpoint {
                        sink(v);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_outputs(&mut self, program: &LoadedProgram, frame: u32) {
        let limit = program.settings.event_buffer_size as usize;
        let mut dropped = 0u64;
        for (o, details) in program.outputs.iter().enumerate() {
            if Some(o) == program.console {
                continue;
            }
            let ty = &details.data_type;
            match details.endpoint_type {
                EndpointKind::Stream => {
                    let mut sum = ty.default_value();
                    for &port in &self.feeds[o] {
                        if let Some(v) = self.port_value(port).and_then(|v| v.coerce(ty)) {
                            // types match once checked, so this cannot fail
                            let _ = sum.accumulate(&v);
                        }
                    }
                    self.frames[o].push(sum);
                }
                EndpointKind::Value => {
                    for &port in &self.feeds[o] {
                        if let Some(v) = self.port_value(port).and_then(|v| v.coerce(ty)) {
                            self.values[o] = v;
                        }
                    }
                }
                EndpointKind::Event => {
                    let mut produced = Vec::new();
                    for &port in &self.feeds[o] {
                        self.port_events(port, |v| produced.push(v.clone()));
                    }
                    let events = &mut self.events[o];
                    for event in produced {
                        if events.len() < limit {
                            events.push(OutputEvent {
                                frame_offset: frame,
                                event,
                            });
                        } else {
                            dropped += 1;
                        }
                    }
                }
            }
        }

        for instance in &mut self.instances {
            for message in instance.console.drain(..) {
                if let Some(console) = program.console {
                    self.events[console].push(OutputEvent {
                        frame_offset: frame,
                        event: message,
                    });
                }
            }
        }

        if dropped > 0 {
            self.record_xruns(dropped, "output event buffer overflow");
        }
    }

    fn record_xruns(&mut self, count: u64, reason: &str) {
        self.xruns += count;
        tracing::debug!(count, reason, total = self.xruns, "xrun");
    }

    // ---- results ----

    /// Frames produced on a stream output by the last block.
    pub fn get_output_frames(&self, handle: EndpointHandle) -> Result<&[Value], Diagnostic> {
        let index = self.output(handle, EndpointKind::Stream)?;
        Ok(&self.frames[index])
    }

    /// Events produced on an event output by the last block, in order.
    pub fn get_output_events(&self, handle: EndpointHandle) -> Result<&[OutputEvent], Diagnostic> {
        let index = self.output(handle, EndpointKind::Event)?;
        Ok(&self.events[index])
    }

    /// A value output as it stood at the end of the last block.
    pub fn get_output_value(&self, handle: EndpointHandle) -> Result<&Value, Diagnostic> {
        let index = self.output(handle, EndpointKind::Value)?;
        Ok(&self.values[index])
    }

    pub fn get_xruns(&self) -> u64 {
        self.xruns
    }

    /// Time a dry run of `total_frames` frames on a fresh performer, feeding
    /// it this performer's staged stream input on every block.
    pub fn calculate_render_performance(
        &self,
        block_size: u32,
        total_frames: u64,
    ) -> Result<Duration, Diagnostic> {
        let mut dry = Performer::new(self.linked.clone())?;
        dry.set_block_size(block_size)?;
        let streams: Vec<(EndpointHandle, Vec<Value>)> = self
            .staged
            .iter()
            .zip(&self.program().inputs)
            .filter_map(|(staged, details)| match staged {
                Staged::Stream(frames) => Some((details.handle, frames.clone())),
                _ => None,
            })
            .collect();

        let start = Instant::now();
        let mut remaining = total_frames;
        while remaining > 0 {
            let frames = remaining.min(u64::from(block_size)) as u32;
            dry.set_block_size(frames)?;
            for (handle, data) in &streams {
                let end = data.len().min(frames as usize);
                dry.set_input_frames(*handle, &data[..end])?;
            }
            dry.advance()?;
            remaining -= u64::from(frames);
        }
        Ok(start.elapsed())
    }
}

impl InstanceState {
    fn context(&mut self, properties: Properties) -> Context<'_> {
        Context {
            state: &mut self.state,
            externals: &self.externals,
            inputs: &self.inputs,
            outputs: &mut self.outputs,
            events: &mut self.events,
            console: &mut self.console,
            properties,
        }
    }

    fn run_handler(
        &mut self,
        functions: &[CompiledFunction],
        properties: Properties,
        budget: u64,
    ) -> Result<(), Fault> {
        let mut handler = std::mem::take(&mut self.handler);
        let result = handler.run_to_completion(functions, &mut self.context(properties), budget);
        self.handler = handler;
        result
    }

    fn run_frame(
        &mut self,
        code: &InstanceCode,
        functions: &[CompiledFunction],
        properties: Properties,
        budget: u64,
    ) -> Result<(), Fault> {
        self.events.clear();
        for (output, (kind, ty)) in self.outputs.iter_mut().zip(&code.outputs) {
            if *kind == EndpointKind::Stream {
                *output = ty.default_value();
            }
        }

        for e in 0..self.pending.len() {
            let Some(handler) = code.handlers.get(e).copied().flatten() else {
                continue;
            };
            for event in std::mem::take(&mut self.pending[e]) {
                self.handler.restart(functions, handler, vec![event]);
                self.run_handler(functions, properties, budget)?;
            }
        }

        if self.finished {
            return Ok(());
        }
        let mut fiber = std::mem::take(&mut self.fiber);
        let status = fiber.resume(functions, &mut self.context(properties), budget);
        self.fiber = fiber;
        if status? == Status::Finished {
            self.finished = true;
        }
        Ok(())
    }
}

fn expect_kind(details: &EndpointDetails, kind: EndpointKind) -> Result<(), Diagnostic> {
    if details.endpoint_type != kind {
        return Err(Diagnostic::precondition(format!(
            "Endpoint '{}' is a {} endpoint, not {} {kind} endpoint",
            details.id,
            details.endpoint_type,
            if kind == EndpointKind::Event { "an" } else { "a" },
        )));
    }
    Ok(())
}

fn unknown_handle(handle: EndpointHandle) -> Diagnostic {
    Diagnostic::not_found(format!("Unknown endpoint handle {handle}"))
}

fn mismatch(value: &Value, ty: &Type) -> Diagnostic {
    Diagnostic::type_mismatch(format!("Cannot convert {value} to '{ty}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::build::build;
    use crate::engine::link::link;
    use crate::engine::settings::{Backend, BuildSettings};
    use crate::sema;
    use crate::syntax::parse_unit;

    fn performer_with(src: &str, settings: BuildSettings, externals: &[Option<Value>]) -> Performer {
        let module = sema::analyse(&[parse_unit(src, None).unwrap()]).unwrap();
        let loaded = Arc::new(build(&module, &settings.with_ignore_warnings(true)).unwrap());
        let linked = link(loaded, externals, Backend::Vm, 100_000).unwrap();
        Performer::new(Arc::new(linked)).unwrap()
    }

    fn performer(src: &str) -> Performer {
        performer_with(src, BuildSettings::default(), &[])
    }

    #[test]
    fn constant_stream_output() {
        let mut p = performer(
            "processor P { output stream float out; void main() { loop { out <- 1.0f; advance(); } } }",
        );
        p.set_block_size(100).unwrap();
        p.advance().unwrap();
        let frames = p.get_output_frames(EndpointHandle(0)).unwrap();
        assert_eq!(frames.len(), 100);
        assert!(frames.iter().all(|f| *f == Value::Float32(1.0)));
        assert_eq!(p.get_xruns(), 0);
    }

    #[test]
    fn stream_writes_accumulate_within_a_frame() {
        let mut p = performer(
            "processor P { output stream int out;
                void main() { loop { out <- 2; out <- 3; advance(); } } }",
        );
        p.set_block_size(2).unwrap();
        p.advance().unwrap();
        assert_eq!(
            p.get_output_frames(EndpointHandle(0)).unwrap(),
            &[Value::Int32(5), Value::Int32(5)]
        );
    }

    #[test]
    fn state_persists_between_blocks() {
        let mut p = performer(
            "processor Counter { output stream int out; int n;
                void main() { loop { out <- n; ++n; advance(); } } }",
        );
        p.set_block_size(3).unwrap();
        p.advance().unwrap();
        p.advance().unwrap();
        assert_eq!(
            p.get_output_frames(EndpointHandle(0)).unwrap(),
            &[Value::Int32(3), Value::Int32(4), Value::Int32(5)]
        );
    }

    #[test]
    fn stream_input_is_padded_with_silence() {
        let mut p = performer(
            "processor Double { input stream float in; output stream float out;
                void main() { loop { out <- in * 2.0f; advance(); } } }",
        );
        p.set_block_size(3).unwrap();
        p.set_input_frames(EndpointHandle(0), &[Value::Float32(1.0)]).unwrap();
        p.advance().unwrap();
        assert_eq!(
            p.get_output_frames(EndpointHandle(1)).unwrap(),
            &[Value::Float32(2.0), Value::Float32(0.0), Value::Float32(0.0)]
        );
    }

    #[test]
    fn events_reach_handlers_at_block_start() {
        let mut p = performer(
            "processor Echo { input event int in; output event int out;
                event in(int v) { out <- v * 10; }
                void main() { loop { advance(); } } }",
        );
        p.set_block_size(8).unwrap();
        p.add_input_event(EndpointHandle(0), &Value::Int32(4)).unwrap();
        p.add_input_event(EndpointHandle(0), &Value::Int32(5)).unwrap();
        p.advance().unwrap();
        let events = p.get_output_events(EndpointHandle(1)).unwrap();
        assert_eq!(
            events,
            &[
                OutputEvent { frame_offset: 0, event: Value::Int32(40) },
                OutputEvent { frame_offset: 0, event: Value::Int32(50) },
            ]
        );

        p.advance().unwrap();
        assert!(p.get_output_events(EndpointHandle(1)).unwrap().is_empty());
    }

    #[test]
    fn value_inputs_ramp() {
        let mut p = performer(
            "processor V { input value float level; output stream float out;
                void main() { loop { out <- level; advance(); } } }",
        );
        p.set_block_size(4).unwrap();
        p.set_input_value(EndpointHandle(0), &Value::Float64(1.0), 2).unwrap();
        p.advance().unwrap();
        assert_eq!(
            p.get_output_frames(EndpointHandle(1)).unwrap(),
            &[
                Value::Float32(0.5),
                Value::Float32(1.0),
                Value::Float32(1.0),
                Value::Float32(1.0)
            ]
        );
    }

    #[test]
    fn value_output_reports_last_write() {
        let mut p = performer(
            "processor V { output value int result;
                void main() { loop { result <- 1; advance(); result <- 2; advance(); } } }",
        );
        p.set_block_size(3).unwrap();
        p.advance().unwrap();
        assert_eq!(p.get_output_value(EndpointHandle(0)).unwrap(), &Value::Int32(1));
    }

    #[test]
    fn graph_nodes_see_upstream_output_in_the_same_frame() {
        let mut p = performer(
            "processor Gen { output stream int out; int n;
                void main() { loop { ++n; out <- n; advance(); } } }
            processor Twice { input stream int in; output stream int out;
                void main() { loop { out <- in * 2; advance(); } } }
            graph G { output stream int out;
                node t = Twice; node g = Gen;
                connection g -> t -> out; }",
        );
        p.set_block_size(3).unwrap();
        p.advance().unwrap();
        assert_eq!(
            p.get_output_frames(EndpointHandle(0)).unwrap(),
            &[Value::Int32(2), Value::Int32(4), Value::Int32(6)]
        );
    }

    #[test]
    fn block_size_is_bounded() {
        let mut p = performer_with(
            "processor P { output stream float out; void main() { loop { advance(); } } }",
            BuildSettings::default().with_max_block_size(64),
            &[],
        );
        assert!(p.set_block_size(0).is_err());
        let err = p.set_block_size(65).unwrap_err();
        assert_eq!(err.category, crate::diagnostic::Category::Precondition);
        assert_eq!(p.block_size(), 64);
    }

    #[test]
    fn full_event_queue_counts_xruns() {
        let mut p = performer_with(
            "processor E { input event int in; output stream int out;
                event in(int v) {}
                void main() { loop { advance(); } } }",
            BuildSettings::default().with_event_buffer_size(2),
            &[],
        );
        for i in 0..5 {
            p.add_input_event(EndpointHandle(0), &Value::Int32(i)).unwrap();
        }
        assert_eq!(p.get_xruns(), 3);
    }

    #[test]
    fn output_event_overflow_counts_xruns() {
        let mut p = performer_with(
            "processor E { output event int out;
                void main() { loop { out <- 1; out <- 2; out <- 3; advance(); } } }",
            BuildSettings::default().with_event_buffer_size(2),
            &[],
        );
        p.set_block_size(1).unwrap();
        p.advance().unwrap();
        assert_eq!(p.get_output_events(EndpointHandle(0)).unwrap().len(), 2);
        assert_eq!(p.get_xruns(), 1);
    }

    #[test]
    fn extra_input_frames_count_xruns() {
        let mut p = performer(
            "processor P { input stream float in; output stream float out;
                void main() { loop { out <- in; advance(); } } }",
        );
        p.set_block_size(2).unwrap();
        let frames = vec![Value::Float32(1.0); 5];
        p.set_input_frames(EndpointHandle(0), &frames).unwrap();
        assert_eq!(p.get_xruns(), 3);
    }

    #[test]
    fn faults_persist() {
        let mut p = performer(
            "processor P { output stream int out; int zero;
                void main() { loop { out <- 1 / zero; advance(); } } }",
        );
        p.set_block_size(4).unwrap();
        let err = p.advance().unwrap_err();
        assert_eq!(err.full_description(), "error: Integer division by zero");
        assert!(p.get_output_frames(EndpointHandle(0)).unwrap().is_empty());
        assert_eq!(p.advance().unwrap_err(), err);
    }

    #[test]
    fn main_without_advance_exhausts_the_budget() {
        let mut p = performer(
            "processor P { output stream int out; void main() { loop { out <- 1; } } }",
        );
        p.set_block_size(1).unwrap();
        let err = p.advance().unwrap_err();
        assert_eq!(
            err.message,
            "Instruction limit exceeded before reaching advance()"
        );
    }

    #[test]
    fn finished_main_goes_silent() {
        let mut p = performer(
            "processor P { output stream int out; void main() { out <- 7; advance(); } }",
        );
        p.set_block_size(3).unwrap();
        p.advance().unwrap();
        assert_eq!(
            p.get_output_frames(EndpointHandle(0)).unwrap(),
            &[Value::Int32(7), Value::Int32(0), Value::Int32(0)]
        );
    }

    #[test]
    fn console_messages_become_events() {
        let mut p = performer(
            "processor P { output stream float out;
                void main() { console <- \"hello\"; advance(); console <- 42; advance(); } }",
        );
        p.set_block_size(4).unwrap();
        p.advance().unwrap();
        let console = p.get_output_events(EndpointHandle(1)).unwrap();
        assert_eq!(
            console,
            &[
                OutputEvent { frame_offset: 0, event: Value::String("hello".into()) },
                OutputEvent { frame_offset: 1, event: Value::Int32(42) },
            ]
        );
    }

    #[test]
    fn externals_are_visible_to_code() {
        let mut p = performer_with(
            "processor P { output stream float out; external float gain;
                void main() { loop { out <- gain; advance(); } } }",
            BuildSettings::default(),
            &[Some(Value::Float32(0.25))],
        );
        p.set_block_size(1).unwrap();
        p.advance().unwrap();
        assert_eq!(p.get_output_frames(EndpointHandle(0)).unwrap(), &[Value::Float32(0.25)]);
    }

    #[test]
    fn handles_of_the_wrong_kind_are_rejected() {
        let mut p = performer(
            "processor P { input stream float in; output stream float out;
                void main() { loop { out <- in; advance(); } } }",
        );
        assert!(p.add_input_event(EndpointHandle(0), &Value::Float32(1.0)).is_err());
        assert!(p.get_output_value(EndpointHandle(1)).is_err());
        assert_eq!(
            p.get_output_frames(EndpointHandle(9)).unwrap_err().category,
            crate::diagnostic::Category::NotFound
        );
    }

    #[test]
    fn render_performance_uses_a_fresh_performer() {
        let mut p = performer(
            "processor Counter { output stream int out; int n;
                void main() { loop { out <- n; ++n; advance(); } } }",
        );
        p.calculate_render_performance(16, 1000).unwrap();
        p.set_block_size(2).unwrap();
        p.advance().unwrap();
        assert_eq!(
            p.get_output_frames(EndpointHandle(0)).unwrap(),
            &[Value::Int32(0), Value::Int32(1)]
        );
    }
}
