//! Test harness: self-checking processors and functions, golden error
//! text, console capture, performance timing and scripted rendering.
//!
//! Every test returns a [`TestReport`]: an outcome plus the log lines a
//! runner would print alongside it.

pub mod compare;
pub mod script;

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

pub use compare::{event_data_comparison, stream_data_comparison, StreamData, TimedValue};
pub use script::{run_script, ScriptData, ScriptOptions, ScriptOutputs, ValueChange};

use crate::diagnostic::DiagnosticList;
use crate::engine::{Backend, BuildOverrides, Engine, EngineOptions, CONSOLE_ENDPOINT};
use crate::program::Program;
use crate::runtime::value::Value;

/// Source under test, plus source shared by every test in the same file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestSection {
    pub source: String,
    pub global_source: String,
}

impl TestSection {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            global_source: String::new(),
        }
    }

    pub fn with_global_source(mut self, source: impl Into<String>) -> Self {
        self.global_source = source.into();
        self
    }

    fn combined(&self) -> String {
        format!("{}\n{}", self.source, self.global_source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Success,
    Failure(String),
    /// The feature under test is unavailable on the configured backend.
    Unsupported(String),
}

impl TestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TestOutcome::Success)
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Success => write!(f, "success"),
            TestOutcome::Failure(reason) => write!(f, "failed: {reason}"),
            TestOutcome::Unsupported(reason) => write!(f, "unsupported: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub outcome: TestOutcome,
    pub log: Vec<String>,
}

impl TestReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Per-test options, spelled the way test files write them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOptions {
    /// Engine options; the user's config file (or defaults) when absent.
    #[serde(default)]
    pub engine: Option<EngineOptions>,
    #[serde(flatten)]
    pub overrides: BuildOverrides,
    #[serde(default)]
    pub do_not_wrap_in_test_namespace: bool,
}

type Step<T> = Result<T, TestOutcome>;

fn failed(reason: impl fmt::Display) -> TestOutcome {
    TestOutcome::Failure(reason.to_string())
}

fn link_failed(errors: DiagnosticList) -> TestOutcome {
    if errors.is_unsupported() {
        TestOutcome::Unsupported(errors.full_description())
    } else {
        TestOutcome::Failure(errors.full_description())
    }
}

fn report(log: Vec<String>, result: Step<TestOutcome>) -> TestReport {
    let outcome = result.unwrap_or_else(|outcome| outcome);
    tracing::debug!(%outcome, "test finished");
    TestReport { outcome, log }
}

fn engine_options(engine: &Option<EngineOptions>) -> EngineOptions {
    engine
        .clone()
        .unwrap_or_else(|| EngineOptions::load().unwrap_or_default())
}

fn create_engine(
    options: &TestOptions,
    frequency: f64,
    max_block_size: u32,
    ignore_warnings: bool,
) -> Step<Engine> {
    let mut engine = Engine::new(engine_options(&options.engine));
    let settings = engine
        .build_settings()
        .clone()
        .with_frequency(frequency)
        .with_max_block_size(max_block_size)
        .with_ignore_warnings(ignore_warnings)
        .with_overrides(&options.overrides);
    engine.set_build_settings(settings).map_err(failed)?;
    Ok(engine)
}

fn parse(source: &str) -> Step<Program> {
    let mut program = Program::new();
    program
        .parse(source)
        .map_err(|e| failed(e.full_description()))?;
    Ok(program)
}

// ---- processor tests ----

/// Render one 100-frame block and read the first output as a sequence of
/// numbers: a negative value ends the test, positive passes and zero fails.
/// With `expect_failure` the verdict is inverted.
pub fn test_processor(section: &TestSection, expect_failure: bool, options: &TestOptions) -> TestReport {
    let _span = tracing::info_span!("test_processor").entered();
    report(Vec::new(), run_processor_test(section, expect_failure, options))
}

fn run_processor_test(section: &TestSection, expect_failure: bool, options: &TestOptions) -> Step<TestOutcome> {
    const BLOCK: u32 = 100;

    let program = parse(&section.combined())?;
    let mut engine = create_engine(options, 44100.0, BLOCK, true)?;
    engine
        .load(&program)
        .map_err(|e| failed(e.full_description()))?;

    let output = engine
        .output_endpoints()
        .first()
        .cloned()
        .ok_or_else(|| failed("No output endpoints found"))?;
    engine.link().map_err(link_failed)?;

    let mut performer = engine.create_performer().map_err(failed)?;
    performer.set_block_size(BLOCK).map_err(failed)?;
    performer.advance().map_err(failed)?;

    let results: Vec<Value> = if output.is_event() {
        let events = performer.get_output_events(output.handle).map_err(failed)?;
        events.iter().map(|e| e.event.clone()).collect()
    } else if output.is_stream() {
        performer.get_output_frames(output.handle).map_err(failed)?.to_vec()
    } else {
        return Err(failed(format!(
            "Unsupported output endpoint type {}",
            output.endpoint_type
        )));
    };

    let mut succeeded = false;
    for value in &results {
        let n = value.as_f64().unwrap_or(0.0);
        if n < 0.0 {
            break;
        }
        if n > 0.0 {
            succeeded = true;
        } else {
            succeeded = false;
            break;
        }
    }

    Ok(match (succeeded, expect_failure) {
        (true, false) | (false, true) => TestOutcome::Success,
        (false, false) => failed("Processor test failed"),
        (true, true) => failed("Processor test succeeded but we were expecting it to fail"),
    })
}

// ---- expected errors ----

const ERROR_TEST_PROCESSOR: &str =
    "processor TestProcessor { output stream float32 out; void main() { advance(); } }\n";

/// Compile the section (wrapped in `namespace tests` unless disabled) and
/// compare the resulting error text with `expected`. An empty `expected`
/// accepts any error and logs the text that was produced.
pub fn expect_error(section: &TestSection, expected: &str, options: &TestOptions) -> TestReport {
    let _span = tracing::info_span!("expect_error").entered();
    let mut log = Vec::new();
    let result = run_expect_error(section, expected, options, &mut log);
    report(log, result)
}

fn run_expect_error(
    section: &TestSection,
    expected: &str,
    options: &TestOptions,
    log: &mut Vec<String>,
) -> Step<TestOutcome> {
    let source = if options.do_not_wrap_in_test_namespace {
        format!("{}\n{}", section.source, section.global_source)
    } else {
        format!(
            "namespace tests {{ {} }}\n{ERROR_TEST_PROCESSOR}{}",
            section.source, section.global_source
        )
    };

    let errors = compile_errors(&source, options)?;
    if errors.is_empty() {
        return Ok(failed("Failed to fail"));
    }
    if expected.is_empty() {
        log.push(format!("Updating error text to '{errors}'"));
        return Ok(TestOutcome::Success);
    }
    if errors == expected {
        return Ok(TestOutcome::Success);
    }
    log.push(format!("Expecting {expected}"));
    log.push(format!("Got       {errors}"));
    Ok(failed("error mismatch"))
}

/// Error text from parsing, loading and linking `source`; empty if all succeed.
fn compile_errors(source: &str, options: &TestOptions) -> Step<String> {
    let mut program = Program::new();
    if let Err(errors) = program.parse(source) {
        return Ok(errors.full_description());
    }
    let mut engine = create_engine(options, 44100.0, 1024, false)?;
    if let Err(errors) = engine.load(&program) {
        return Ok(errors.full_description());
    }
    if let Err(errors) = engine.link() {
        return Ok(errors.full_description());
    }
    Ok(String::new())
}

// ---- test functions ----

/// Run every `bool f()` in the section's `tests` namespace, one per frame,
/// and report those that return false.
pub fn test_function(section: &TestSection, options: &TestOptions) -> TestReport {
    let _span = tracing::info_span!("test_function").entered();
    let mut log = Vec::new();
    let result = run_function_test(section, options, &mut log);
    report(log, result)
}

fn function_tester_source(functions: &[String]) -> String {
    let mut source = String::from(
        "processor FunctionTester [[main]]\n{\n    output value int result;\n\n    void main()\n    {\n",
    );
    for name in functions {
        source.push_str(&format!(
            "        result <- (tests::{name}() ? 1 : 0); advance();\n"
        ));
    }
    source.push_str("        result <- -1; advance();\n    }\n}\n");
    source
}

fn run_function_test(section: &TestSection, options: &TestOptions, log: &mut Vec<String>) -> Step<TestOutcome> {
    let mut program = parse(&format!(
        "namespace tests {{ {} }}\n{}",
        section.source, section.global_source
    ))?;

    let functions: Vec<String> = program
        .syntax_tree("tests")
        .map(|tree| {
            tree.functions
                .into_iter()
                .filter(|f| f.is_boolean_test())
                .map(|f| f.name)
                .collect()
        })
        .unwrap_or_default();
    if functions.is_empty() {
        return Ok(failed("No test functions found"));
    }
    log.push(format!("Running {} test functions", functions.len()));

    program
        .parse(&function_tester_source(&functions))
        .map_err(|e| failed(e.full_description()))?;

    let mut engine = create_engine(options, 44100.0, 1, true)?;
    engine
        .load(&program)
        .map_err(|e| failed(e.full_description()))?;
    let handle = engine.endpoint_handle("result").map_err(failed)?;
    engine.link().map_err(link_failed)?;

    let mut performer = engine.create_performer().map_err(failed)?;
    performer.set_block_size(1).map_err(failed)?;

    let mut failing = Vec::new();
    for name in &functions {
        performer.advance().map_err(failed)?;
        match performer.get_output_value(handle).map_err(failed)? {
            Value::Int32(0) | Value::Int64(0) => failing.push(name.as_str()),
            Value::Int32(_) | Value::Int64(_) => {}
            other => return Ok(failed(other)),
        }
    }
    performer.advance().map_err(failed)?;

    if failing.is_empty() {
        Ok(TestOutcome::Success)
    } else {
        Ok(failed(format!(
            "{} functions failed: {}",
            failing.len(),
            failing.join(", ")
        )))
    }
}

// ---- compile only ----

/// Load (and optionally link) the section, unload, then load and link again.
pub fn test_compile(section: &TestSection, link: bool, options: &TestOptions) -> TestReport {
    let _span = tracing::info_span!("test_compile").entered();
    report(Vec::new(), run_compile_test(section, link, options))
}

fn run_compile_test(section: &TestSection, link: bool, options: &TestOptions) -> Step<TestOutcome> {
    let program = parse(&section.combined())?;
    let mut engine = create_engine(options, 44100.0, 1024, true)?;

    engine
        .load(&program)
        .map_err(|e| failed(e.full_description()))?;
    if link {
        engine.link().map_err(link_failed)?;
    }
    engine.unload();

    engine
        .load(&program)
        .map_err(|e| failed(e.full_description()))?;
    if link {
        engine.link().map_err(link_failed)?;
    }
    Ok(TestOutcome::Success)
}

// ---- console output ----

/// Render 1024 frames in 64-frame blocks and compare everything written to
/// the console with `expected`. An empty `expected` accepts any output.
pub fn test_console(section: &TestSection, expected: &str, options: &TestOptions) -> TestReport {
    let _span = tracing::info_span!("test_console").entered();
    let mut log = Vec::new();
    let result = run_console_test(section, expected, options, &mut log);
    report(log, result)
}

fn run_console_test(
    section: &TestSection,
    expected: &str,
    options: &TestOptions,
    log: &mut Vec<String>,
) -> Step<TestOutcome> {
    const TOTAL_FRAMES: u32 = 1024;
    const BLOCK: u32 = 64;

    let program = parse(&section.combined())?;
    let mut engine = create_engine(options, 44100.0, TOTAL_FRAMES, true)?;
    engine
        .load(&program)
        .map_err(|e| failed(e.full_description()))?;

    if !engine.output_endpoints().iter().any(|e| e.id == CONSOLE_ENDPOINT) {
        return Ok(failed("no console output stream found"));
    }
    let handle = engine.endpoint_handle(CONSOLE_ENDPOINT).map_err(failed)?;
    engine.link().map_err(link_failed)?;

    let mut performer = engine.create_performer().map_err(failed)?;
    performer.set_block_size(BLOCK).map_err(failed)?;

    let mut output = String::new();
    for _ in 0..TOTAL_FRAMES / BLOCK {
        performer.advance().map_err(failed)?;
        for event in performer.get_output_events(handle).map_err(failed)? {
            output.push_str(&event.event.to_string());
        }
    }

    if expected.is_empty() {
        log.push(format!("Updating console text to '{output}'"));
        return Ok(TestOutcome::Success);
    }
    if output == expected {
        return Ok(TestOutcome::Success);
    }
    log.push(format!("Expecting {expected}"));
    log.push(format!("Got       {output}"));
    Ok(failed("console mismatch"))
}

// ---- performance ----

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceOptions {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_min_block")]
    pub min_block_size: u32,
    #[serde(default = "default_max_block")]
    pub max_block_size: u32,
    #[serde(default = "default_samples_to_render")]
    pub samples_to_render: u64,
    #[serde(default)]
    pub engine: Option<EngineOptions>,
    #[serde(flatten)]
    pub overrides: BuildOverrides,
}

fn default_sample_rate() -> f64 {
    44100.0
}

fn default_min_block() -> u32 {
    32
}

fn default_max_block() -> u32 {
    1024
}

fn default_samples_to_render() -> u64 {
    44100 * 10
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            min_block_size: default_min_block(),
            max_block_size: default_max_block(),
            samples_to_render: default_samples_to_render(),
            engine: None,
            overrides: BuildOverrides::default(),
        }
    }
}

/// Time rendering at each block size from the minimum, doubling up to the
/// maximum, and log throughput and real-time utilisation.
pub fn performance_test(section: &TestSection, options: &PerformanceOptions) -> TestReport {
    let _span = tracing::info_span!("performance_test").entered();
    let mut log = Vec::new();
    let result = run_performance_test(section, options, &mut log);
    report(log, result)
}

fn millis(d: Duration) -> String {
    format!("{:.3} ms", d.as_secs_f64() * 1000.0)
}

fn run_performance_test(
    section: &TestSection,
    options: &PerformanceOptions,
    log: &mut Vec<String>,
) -> Step<TestOutcome> {
    let engine_options = engine_options(&options.engine);
    if engine_options.backend == Backend::Wasm {
        return Ok(TestOutcome::Unsupported("engine type wasm not supported".into()));
    }
    if options.min_block_size == 0 || options.min_block_size > options.max_block_size {
        return Ok(failed(format!(
            "Illegal block size range {} to {}",
            options.min_block_size, options.max_block_size
        )));
    }

    let mut program = Program::new();
    let parse_time = program
        .parse(&section.combined())
        .map_err(|e| failed(e.full_description()))?;

    let test_options = TestOptions {
        engine: Some(engine_options),
        overrides: options.overrides.clone(),
        do_not_wrap_in_test_namespace: false,
    };
    let mut engine = create_engine(&test_options, options.sample_rate, options.max_block_size, true)?;
    if engine.build_settings().optimisation_level == 0 {
        return Ok(TestOutcome::Unsupported(
            "Test disabled for --O0 as it will take too long".into(),
        ));
    }

    let load_time = engine
        .load(&program)
        .map_err(|e| failed(e.full_description()))?;
    let inputs = engine.input_endpoints().to_vec();
    let link_time = engine.link().map_err(link_failed)?;
    log.push(format!(
        "Parse time: {}, load time: {}, link time: {}",
        millis(parse_time),
        millis(load_time),
        millis(link_time)
    ));

    let mut performer = engine.create_performer().map_err(failed)?;
    let max = options.max_block_size;
    let ramp: Vec<Value> = (0..max)
        .map(|i| Value::Float64(f64::from(i) / f64::from(max)))
        .collect();

    let mut block_size = options.min_block_size;
    while block_size <= max {
        performer.set_block_size(block_size).map_err(failed)?;
        for input in inputs.iter().filter(|e| e.is_stream()) {
            performer
                .set_input_frames(input.handle, &ramp[..block_size as usize])
                .map_err(failed)?;
        }
        let runtime = performer
            .calculate_render_performance(block_size, options.samples_to_render)
            .map_err(failed)?;

        let seconds = runtime.as_secs_f64().max(f64::EPSILON);
        let frames_per_second = options.samples_to_render as f64 / seconds;
        let utilisation = 100.0 * options.sample_rate / frames_per_second;
        log.push(format!(
            "Block size {block_size}, runtime {seconds:.4}s, frames/sec = {frames_per_second:.0}, utilisation = {utilisation:.2}%"
        ));
        tracing::info!(block_size, frames_per_second, utilisation, "render performance");

        block_size = match block_size.checked_mul(2) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(TestOutcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> TestOptions {
        TestOptions {
            engine: Some(EngineOptions {
                seed: Some(3),
                ..EngineOptions::default()
            }),
            ..TestOptions::default()
        }
    }

    #[test]
    fn processor_test_passes_on_positive_stream() {
        let section = TestSection::new(
            "processor P { output stream int out; void main() { loop { out <- 1; advance(); } } }",
        );
        let report = test_processor(&section, false, &options());
        assert_eq!(report.outcome, TestOutcome::Success);
    }

    #[test]
    fn processor_test_stops_at_negative_value() {
        let section = TestSection::new(
            "processor P { output event int out;
                void main() { out <- 1; out <- -1; out <- 0; advance(); loop advance(); } }",
        );
        assert!(test_processor(&section, false, &options()).is_success());
    }

    #[test]
    fn processor_test_zero_fails_unless_expected() {
        let section = TestSection::new(
            "processor P { output stream int out; void main() { loop { out <- 0; advance(); } } }",
        );
        assert_eq!(
            test_processor(&section, false, &options()).outcome,
            TestOutcome::Failure("Processor test failed".into())
        );
        assert!(test_processor(&section, true, &options()).is_success());

        let passing = TestSection::new(
            "processor P { output stream int out; void main() { loop { out <- 1; advance(); } } }",
        );
        assert_eq!(
            test_processor(&passing, true, &options()).outcome,
            TestOutcome::Failure("Processor test succeeded but we were expecting it to fail".into())
        );
    }

    #[test]
    fn processor_test_rejects_value_output() {
        let section = TestSection::new(
            "processor P { output value int out; void main() { loop { out <- 1; advance(); } } }",
        );
        assert_eq!(
            test_processor(&section, false, &options()).outcome,
            TestOutcome::Failure("Unsupported output endpoint type value".into())
        );
    }

    #[test]
    fn expect_error_matches_golden_text() {
        let section = TestSection::new("int f() { return missing; }");
        let golden = "1:36: error: Cannot find symbol 'missing'";
        assert!(expect_error(&section, golden, &options()).is_success());

        let report = expect_error(&section, "1:1: error: something else", &options());
        assert_eq!(report.outcome, TestOutcome::Failure("error mismatch".into()));
        assert_eq!(report.log[1], format!("Got       {golden}"));
    }

    #[test]
    fn expect_error_without_golden_text_records_it() {
        let section = TestSection::new("int f() { return missing; }");
        let report = expect_error(&section, "", &options());
        assert!(report.is_success());
        assert!(report.log[0].starts_with("Updating error text to '1:36: error:"));
    }

    #[test]
    fn expect_error_requires_an_error() {
        let section = TestSection::new("int f() { return 1; }");
        assert_eq!(
            expect_error(&section, "anything", &options()).outcome,
            TestOutcome::Failure("Failed to fail".into())
        );
    }

    #[test]
    fn expect_error_can_skip_namespace_wrapping() {
        let section = TestSection::new("processor P { output stream int out; void main() { x = 1; } }");
        let opts = TestOptions {
            do_not_wrap_in_test_namespace: true,
            ..options()
        };
        let report = expect_error(&section, "", &opts);
        assert!(report.log[0].contains("1:52: error: Cannot find symbol 'x'"));
    }

    #[test]
    fn function_tests_name_each_failure() {
        let section = TestSection::new(
            "bool good() { return 1 + 1 == 2; }
             bool bad() { return 2 > 3; }
             int helper() { return 1; }
             bool alsoBad() { return false; }",
        );
        assert_eq!(
            test_function(&section, &options()).outcome,
            TestOutcome::Failure("2 functions failed: bad, alsoBad".into())
        );
    }

    #[test]
    fn function_tests_pass_and_use_global_source() {
        let section = TestSection::new("bool usesLib() { return lib::three() == 3; }")
            .with_global_source("namespace lib { int three() { return 3; } }");
        let report = test_function(&section, &options());
        assert_eq!(report.outcome, TestOutcome::Success);
        assert_eq!(report.log, vec!["Running 1 test functions".to_string()]);
    }

    #[test]
    fn function_test_without_functions_fails() {
        let section = TestSection::new("int notATest() { return 1; }");
        assert_eq!(
            test_function(&section, &options()).outcome,
            TestOutcome::Failure("No test functions found".into())
        );
    }

    #[test]
    fn compile_test_reloads() {
        let section = TestSection::new(
            "processor P { output stream float out; void main() { loop advance(); } }",
        );
        assert!(test_compile(&section, true, &options()).is_success());
        assert!(test_compile(&section, false, &options()).is_success());
    }

    #[test]
    fn compile_test_without_link_accepts_unset_externals() {
        let section = TestSection::new(
            "processor P { output stream float out; external float g;
                void main() { loop { out <- g; advance(); } } }",
        );
        assert_eq!(test_compile(&section, false, &options()).outcome, TestOutcome::Success);
        assert_eq!(
            test_compile(&section, true, &options()).outcome,
            TestOutcome::Failure("error: External variable 'P::g' has not been given a value".into())
        );
    }

    #[test]
    fn console_output_is_captured() {
        let section = TestSection::new(
            "processor P { output stream float out;
                void main() { console <- \"hello \" <- 42; loop advance(); } }",
        );
        assert!(test_console(&section, "hello 42", &options()).is_success());
        let report = test_console(&section, "bye", &options());
        assert_eq!(report.outcome, TestOutcome::Failure("console mismatch".into()));
    }

    #[test]
    fn console_test_needs_console_writes() {
        let section = TestSection::new(
            "processor P { output stream float out; void main() { loop advance(); } }",
        );
        assert_eq!(
            test_console(&section, "x", &options()).outcome,
            TestOutcome::Failure("no console output stream found".into())
        );
    }

    #[test]
    fn performance_test_is_unsupported_on_wasm() {
        let section = TestSection::new(
            "processor P { output stream float out; void main() { loop advance(); } }",
        );
        let options = PerformanceOptions {
            engine: Some(EngineOptions {
                backend: Backend::Wasm,
                ..EngineOptions::default()
            }),
            ..PerformanceOptions::default()
        };
        assert!(matches!(
            performance_test(&section, &options).outcome,
            TestOutcome::Unsupported(_)
        ));
    }

    #[test]
    fn performance_test_logs_each_block_size() {
        let section = TestSection::new(
            "processor P { input stream float in; output stream float out;
                void main() { loop { out <- in * 0.5f; advance(); } } }",
        );
        let options = PerformanceOptions {
            min_block_size: 16,
            max_block_size: 64,
            samples_to_render: 256,
            engine: Some(EngineOptions::default()),
            ..PerformanceOptions::default()
        };
        let report = performance_test(&section, &options);
        assert!(report.is_success());
        let sizes: Vec<&String> = report.log.iter().filter(|l| l.starts_with("Block size")).collect();
        assert_eq!(sizes.len(), 3);
    }

    #[test]
    fn options_parse_from_yaml() {
        let options: TestOptions =
            serde_yaml::from_str("doNotWrapInTestNamespace: true\nsampleRate: 48000\n").unwrap();
        assert!(options.do_not_wrap_in_test_namespace);
        assert_eq!(options.overrides.sample_rate, Some(48000.0));
    }
}
