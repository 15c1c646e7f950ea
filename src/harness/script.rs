//! Scripted rendering: drive a performer with timed stream, value and event
//! input, record every output and compare it with expected data.
//!
//! Blocks are split at every frame where an input value or event is due, so
//! each one is applied at the start of a block.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::compare::{event_data_comparison, stream_data_comparison, StreamData, TimedValue};
use super::{create_engine, failed, link_failed, report, Step, TestOptions, TestOutcome, TestReport, TestSection};
use crate::engine::{BuildOverrides, EndpointDetails, EngineOptions};
use crate::runtime::value::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOptions {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    #[serde(default = "default_samples_to_render")]
    pub samples_to_render: u64,
    #[serde(default = "default_max_diff_db")]
    pub max_diff_db: f64,
    #[serde(default)]
    pub expected_overruns: u64,
    #[serde(default)]
    pub engine: Option<EngineOptions>,
    #[serde(flatten)]
    pub overrides: BuildOverrides,
}

fn default_sample_rate() -> f64 {
    44100.0
}

fn default_block_size() -> u32 {
    32
}

fn default_samples_to_render() -> u64 {
    1000
}

fn default_max_diff_db() -> f64 {
    -100.0
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            samples_to_render: default_samples_to_render(),
            max_diff_db: default_max_diff_db(),
            expected_overruns: 0,
            engine: None,
            overrides: BuildOverrides::default(),
        }
    }
}

/// A value input change: move to `value` over `frames_to_reach_value`
/// frames, starting at `frame_offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub frame_offset: u64,
    pub value: Value,
    pub frames_to_reach_value: u32,
}

/// Inputs and expected outputs for one script run, keyed by endpoint id
/// (externals by qualified name).
#[derive(Debug, Clone, Default)]
pub struct ScriptData {
    pub externals: BTreeMap<String, Value>,
    pub streams: BTreeMap<String, StreamData>,
    pub values: BTreeMap<String, Vec<ValueChange>>,
    pub events: BTreeMap<String, Vec<TimedValue>>,
    pub expected_streams: BTreeMap<String, StreamData>,
    /// Expected events, or for value outputs the value at each block start.
    pub expected_events: BTreeMap<String, Vec<TimedValue>>,
}

/// Everything the performer produced, with absolute frame offsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScriptOutputs {
    pub streams: BTreeMap<String, StreamData>,
    pub values: BTreeMap<String, Vec<TimedValue>>,
    pub events: BTreeMap<String, Vec<TimedValue>>,
    pub xruns: u64,
}

enum Feed<'a> {
    Stream(&'a StreamData),
    Values { changes: &'a [ValueChange], next: usize },
    Events { events: &'a [TimedValue], next: usize },
}

struct Input<'a> {
    details: EndpointDetails,
    feed: Feed<'a>,
}

impl Input<'_> {
    /// Offset of the next pending change, if any.
    fn next_due(&self) -> Option<u64> {
        match &self.feed {
            Feed::Stream(_) => None,
            Feed::Values { changes, next } => changes.get(*next).map(|c| c.frame_offset),
            Feed::Events { events, next } => events.get(*next).map(|e| e.frame_offset),
        }
    }
}

fn stream_frame(frame: &[f64], channels: usize) -> Value {
    if channels == 1 {
        Value::Float64(frame.first().copied().unwrap_or(0.0))
    } else {
        Value::Vector(frame.iter().map(|&s| Value::Float64(s)).collect())
    }
}

/// Render `options.samples_to_render` frames of the section with the given
/// inputs. The report fails on an unexpected xrun count or on any output
/// that differs from its expected data; outputs without expected data are
/// logged and returned for inspection.
pub fn run_script(section: &TestSection, options: &ScriptOptions, data: &ScriptData) -> (TestReport, ScriptOutputs) {
    let _span = tracing::info_span!("run_script").entered();
    let mut log = Vec::new();
    let mut outputs = ScriptOutputs::default();
    let result = render(section, options, data, &mut outputs)
        .and_then(|()| check_outputs(options, data, &outputs, &mut log));
    (report(log, result), outputs)
}

fn render(
    section: &TestSection,
    options: &ScriptOptions,
    data: &ScriptData,
    outputs: &mut ScriptOutputs,
) -> Step<()> {
    let program = super::parse(&section.combined())?;
    let test_options = TestOptions {
        engine: options.engine.clone(),
        overrides: options.overrides.clone(),
        do_not_wrap_in_test_namespace: false,
    };
    let mut engine = create_engine(&test_options, options.sample_rate, options.block_size, false)?;
    engine
        .load(&program)
        .map_err(|e| failed(e.full_description()))?;

    let externals: Vec<String> = engine.external_variables().iter().map(|e| e.name.clone()).collect();
    for name in externals {
        let value = data
            .externals
            .get(&name)
            .ok_or_else(|| failed(format!("Failed to find external for {name}")))?;
        engine.set_external_variable(&name, value).map_err(failed)?;
    }

    let mut inputs = Vec::new();
    for details in engine.input_endpoints() {
        let id = &details.id;
        let feed = if details.is_stream() {
            Feed::Stream(
                data.streams
                    .get(id)
                    .ok_or_else(|| failed(format!("Failed to read input stream {id}")))?,
            )
        } else if details.is_value() {
            let changes = data
                .values
                .get(id)
                .ok_or_else(|| failed(format!("Failed to read input value data {id}")))?;
            Feed::Values { changes, next: 0 }
        } else {
            let events = data
                .events
                .get(id)
                .ok_or_else(|| failed(format!("Failed to read input event data {id}")))?;
            Feed::Events { events, next: 0 }
        };
        inputs.push(Input {
            details: details.clone(),
            feed,
        });
    }
    let output_details = engine.output_endpoints().to_vec();
    engine.link().map_err(link_failed)?;

    let mut performer = engine.create_performer().map_err(failed)?;
    let mut outstanding = options.samples_to_render;
    let mut rendered: u64 = 0;

    while outstanding > 0 {
        let mut frames = outstanding.min(u64::from(options.block_size));
        let mut events_to_apply = Vec::new();

        for input in &mut inputs {
            let handle = input.details.handle;
            match &mut input.feed {
                Feed::Stream(_) => {}
                Feed::Values { changes, next } => {
                    let changes: &[ValueChange] = *changes;
                    while let Some(change) = changes.get(*next).filter(|c| c.frame_offset <= rendered) {
                        performer
                            .set_input_value(handle, &change.value, change.frames_to_reach_value)
                            .map_err(failed)?;
                        *next += 1;
                    }
                }
                Feed::Events { events, next } => {
                    let events: &[TimedValue] = *events;
                    while let Some(event) = events.get(*next).filter(|e| e.frame_offset <= rendered) {
                        events_to_apply.push((handle, &event.value));
                        *next += 1;
                    }
                }
            }
            if let Some(due) = input.next_due() {
                frames = frames.min(due - rendered);
            }
        }

        performer.set_block_size(frames as u32).map_err(failed)?;
        for (handle, event) in events_to_apply {
            performer.add_input_event(handle, event).map_err(failed)?;
        }
        for input in &inputs {
            if let Feed::Stream(stream) = input.feed {
                let start = (rendered as usize).min(stream.frames.len());
                let end = (start + frames as usize).min(stream.frames.len());
                let channels = input.details.channels();
                let block: Vec<Value> = stream.frames[start..end]
                    .iter()
                    .map(|f| stream_frame(f, channels))
                    .collect();
                performer.set_input_frames(input.details.handle, &block).map_err(failed)?;
            }
        }

        performer.advance().map_err(failed)?;

        for details in &output_details {
            let id = details.id.clone();
            if details.is_stream() {
                let stream = outputs
                    .streams
                    .entry(id)
                    .or_insert_with(|| StreamData::new(options.sample_rate));
                let produced = performer.get_output_frames(details.handle).map_err(failed)?;
                stream.frames.extend(produced.iter().map(Value::channels));
            } else if details.is_value() {
                let value = performer.get_output_value(details.handle).map_err(failed)?;
                outputs
                    .values
                    .entry(id)
                    .or_default()
                    .push(TimedValue::new(rendered, value.clone()));
            } else {
                let produced = performer.get_output_events(details.handle).map_err(failed)?;
                outputs.events.entry(id).or_default().extend(
                    produced
                        .iter()
                        .map(|e| TimedValue::new(rendered + u64::from(e.frame_offset), e.event.clone())),
                );
            }
        }

        outstanding -= frames;
        rendered += frames;
    }

    outputs.xruns = performer.get_xruns();
    tracing::info!(frames = rendered, xruns = outputs.xruns, "script rendered");
    Ok(())
}

fn check_outputs(
    options: &ScriptOptions,
    data: &ScriptData,
    outputs: &ScriptOutputs,
    log: &mut Vec<String>,
) -> Step<TestOutcome> {
    if outputs.xruns != options.expected_overruns {
        return Ok(failed(format!(
            "Expected {} overruns, got {}",
            options.expected_overruns, outputs.xruns
        )));
    }

    for (id, stream) in &outputs.streams {
        match data.expected_streams.get(id) {
            Some(expected) => {
                if let Some(mismatch) = stream_data_comparison(stream, expected, options.max_diff_db) {
                    return Ok(failed(format!("{id}: Comparison failed: {mismatch}")));
                }
            }
            None => log.push(format!("No expected output for {id}")),
        }
    }

    for (id, sequence) in outputs.values.iter().chain(&outputs.events) {
        match data.expected_events.get(id) {
            Some(expected) => {
                if let Some(mismatch) = event_data_comparison(sequence, expected) {
                    return Ok(failed(format!("{id}: Comparison failed: {mismatch}")));
                }
            }
            None => log.push(format!("No expected output for {id}")),
        }
    }
    Ok(TestOutcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(block_size: u32, samples: u64) -> ScriptOptions {
        ScriptOptions {
            block_size,
            samples_to_render: samples,
            engine: Some(EngineOptions {
                seed: Some(5),
                ..EngineOptions::default()
            }),
            ..ScriptOptions::default()
        }
    }

    const COUNTER: &str = "processor Counter { input event int reset; output stream int out; output event int seen; int n;
        event reset (int v) { n = v; seen <- v; }
        void main() { loop { out <- n; ++n; advance(); } } }";

    #[test]
    fn events_split_blocks_at_their_frame() {
        let data = ScriptData {
            events: BTreeMap::from([(
                "reset".to_string(),
                vec![TimedValue::new(5, Value::Int32(100))],
            )]),
            ..ScriptData::default()
        };
        let (report, outputs) = run_script(&TestSection::new(COUNTER), &options(8, 10), &data);
        assert_eq!(report.outcome, TestOutcome::Success);

        let out: Vec<f64> = outputs.streams["out"].frames.iter().map(|f| f[0]).collect();
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0, 4.0, 100.0, 101.0, 102.0, 103.0, 104.0]);
        assert_eq!(outputs.events["seen"], vec![TimedValue::new(5, Value::Int32(100))]);
        assert!(report.log.contains(&"No expected output for out".to_string()));
    }

    #[test]
    fn expected_streams_are_compared() {
        let expected: Vec<f64> = (0..4).map(f64::from).collect();
        let mut data = ScriptData {
            events: BTreeMap::from([("reset".to_string(), Vec::new())]),
            expected_streams: BTreeMap::from([(
                "out".to_string(),
                StreamData::mono(44100.0, &expected),
            )]),
            expected_events: BTreeMap::from([("seen".to_string(), Vec::new())]),
            ..ScriptData::default()
        };
        let section = TestSection::new(COUNTER);
        let (report, _) = run_script(&section, &options(2, 4), &data);
        assert!(report.is_success());
        assert!(report.log.is_empty());

        data.expected_streams
            .insert("out".into(), StreamData::mono(44100.0, &[0.0, 1.0, 2.0, 4.0]));
        let (report, _) = run_script(&section, &options(2, 4), &data);
        match report.outcome {
            TestOutcome::Failure(reason) => {
                assert!(reason.starts_with("out: Comparison failed: Max db diff exceeded"));
                assert!(reason.contains("diffFrame:3"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn value_inputs_ramp_and_values_are_sampled_per_block() {
        let section = TestSection::new(
            "processor P { input value float level; output value float last; output stream float out;
                void main() { loop { out <- level; last <- level; advance(); } } }",
        );
        let data = ScriptData {
            values: BTreeMap::from([(
                "level".to_string(),
                vec![
                    ValueChange { frame_offset: 0, value: Value::Float64(1.0), frames_to_reach_value: 0 },
                    ValueChange { frame_offset: 4, value: Value::Float64(0.0), frames_to_reach_value: 0 },
                ],
            )]),
            ..ScriptData::default()
        };
        let (report, outputs) = run_script(&section, &options(16, 8), &data);
        assert!(report.is_success());
        let out: Vec<f64> = outputs.streams["out"].frames.iter().map(|f| f[0]).collect();
        assert_eq!(out, vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(
            outputs.values["last"],
            vec![
                TimedValue::new(0, Value::Float32(1.0)),
                TimedValue::new(4, Value::Float32(0.0)),
            ]
        );
    }

    #[test]
    fn stream_inputs_are_passed_through() {
        let section = TestSection::new(
            "processor P { input stream float<2> in; output stream float<2> out;
                void main() { loop { out <- in; advance(); } } }",
        );
        let input = StreamData {
            sample_rate: 44100.0,
            frames: (0..6).map(|i| vec![f64::from(i), -f64::from(i)]).collect(),
        };
        let data = ScriptData {
            streams: BTreeMap::from([("in".to_string(), input.clone())]),
            expected_streams: BTreeMap::from([("out".to_string(), input)]),
            ..ScriptData::default()
        };
        let (report, _) = run_script(&section, &options(4, 6), &data);
        assert_eq!(report.outcome, TestOutcome::Success);
    }

    #[test]
    fn missing_inputs_and_externals_fail() {
        let (report, _) = run_script(&TestSection::new(COUNTER), &options(8, 8), &ScriptData::default());
        assert_eq!(
            report.outcome,
            TestOutcome::Failure("Failed to read input event data reset".into())
        );

        let section = TestSection::new(
            "processor P { output stream float out; external float gain;
                void main() { loop { out <- gain; advance(); } } }",
        );
        let (report, _) = run_script(&section, &options(8, 8), &ScriptData::default());
        assert_eq!(
            report.outcome,
            TestOutcome::Failure("Failed to find external for P::gain".into())
        );
    }

    #[test]
    fn overrun_count_is_checked() {
        let section = TestSection::new(
            "processor P { input event int e; output event int o;
                event e (int v) { o <- v; }
                void main() { loop advance(); } }",
        );
        let burst: Vec<TimedValue> = (0..40).map(|i| TimedValue::new(0, Value::Int32(i))).collect();
        let data = ScriptData {
            events: BTreeMap::from([("e".to_string(), burst)]),
            ..ScriptData::default()
        };
        let (report, outputs) = run_script(&section, &options(8, 8), &data);
        assert!(outputs.xruns > 0);
        assert_eq!(
            report.outcome,
            TestOutcome::Failure(format!("Expected 0 overruns, got {}", outputs.xruns))
        );
    }
}
