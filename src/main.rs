//! cadenza: compile, inspect, render and test programs from the command line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use cadenza::harness::{self, ScriptData, ScriptOptions, StreamData, TestOptions, TestOutcome, TestReport, TestSection};
use cadenza::{DiagnosticList, Engine, EngineOptions, Program, Value};

#[derive(Debug, Parser)]
#[command(name = "cadenza", version)]
#[command(about = "Compile and run cadenza signal processing programs")]
struct Cli {
    /// Engine options file; defaults to ~/.cadenza/engine.yaml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse, load and link the given files, reporting any diagnostics.
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List the top-level endpoints and external variables.
    Endpoints {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Render frames with silent inputs and print every output as YAML.
    Render {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value_t = 1024)]
        frames: u64,
        #[arg(long, default_value_t = 256)]
        block_size: u32,
        #[arg(long, default_value_t = 44100.0)]
        sample_rate: f64,
        /// External values as `Processor::name=value`.
        #[arg(long = "external", value_name = "NAME=VALUE")]
        externals: Vec<String>,
    },
    /// Run one harness test over the concatenated files.
    Test {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, value_enum, default_value_t = TestKind::Function)]
        kind: TestKind,
        /// Golden text for `error` and `console` tests.
        #[arg(long, default_value = "")]
        expected: String,
        /// Invert the verdict of a `processor` test.
        #[arg(long)]
        expect_failure: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TestKind {
    Processor,
    Function,
    Error,
    Compile,
    Console,
    Performance,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let options = match engine_options(cli.config.as_deref()) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Check { files } => check(&files, options),
        Command::Endpoints { files } => endpoints(&files, options),
        Command::Render {
            files,
            frames,
            block_size,
            sample_rate,
            externals,
        } => render(&files, options, frames, block_size, sample_rate, &externals),
        Command::Test {
            files,
            kind,
            expected,
            expect_failure,
        } => test(&files, options, kind, &expected, expect_failure),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<ExitCode, Box<dyn std::error::Error>>;

fn engine_options(config: Option<&Path>) -> Result<EngineOptions, Box<dyn std::error::Error>> {
    match config {
        Some(path) => Ok(EngineOptions::load_from(path)?),
        None => Ok(EngineOptions::load().unwrap_or_default()),
    }
}

fn read_sources(files: &[PathBuf]) -> Result<Vec<(String, String)>, Box<dyn std::error::Error>> {
    files
        .iter()
        .map(|path| {
            let source = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            Ok((path.display().to_string(), source))
        })
        .collect()
}

fn parse_program(files: &[PathBuf]) -> Result<Program, Box<dyn std::error::Error>> {
    let mut program = Program::new();
    for (name, source) in read_sources(files)? {
        program.parse_named(&source, &name)?;
    }
    Ok(program)
}

fn report_diagnostics(errors: &DiagnosticList) -> ExitCode {
    for diagnostic in errors {
        eprintln!("{diagnostic}");
    }
    ExitCode::FAILURE
}

fn check(files: &[PathBuf], options: EngineOptions) -> CliResult {
    let program = match parse_program(files) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    let mut engine = Engine::new(options);
    if let Err(errors) = engine.load(&program) {
        return Ok(report_diagnostics(&errors));
    }
    // unset externals are reported by link; they are expected here
    if !engine.external_variables().is_empty() {
        println!("ok (link skipped: program has external variables)");
        return Ok(ExitCode::SUCCESS);
    }
    if let Err(errors) = engine.link() {
        return Ok(report_diagnostics(&errors));
    }
    println!("ok");
    Ok(ExitCode::SUCCESS)
}

fn endpoints(files: &[PathBuf], options: EngineOptions) -> CliResult {
    let program = parse_program(files)?;
    let mut engine = Engine::new(options);
    if let Err(errors) = engine.load(&program) {
        return Ok(report_diagnostics(&errors));
    }
    #[derive(serde::Serialize)]
    struct Listing<'a> {
        inputs: &'a [cadenza::EndpointDetails],
        outputs: &'a [cadenza::EndpointDetails],
        externals: &'a [cadenza::engine::ExternalVariable],
    }
    let listing = Listing {
        inputs: engine.input_endpoints(),
        outputs: engine.output_endpoints(),
        externals: engine.external_variables(),
    };
    print!("{}", serde_yaml::to_string(&listing)?);
    Ok(ExitCode::SUCCESS)
}

fn parse_external(arg: &str) -> Result<(String, Value), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{arg}'"))?;
    let value = match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        v => match v.parse::<f64>() {
            Ok(n) => Value::Float64(n),
            Err(_) => Value::String(v.to_string()),
        },
    };
    Ok((name.to_string(), value))
}

fn render(
    files: &[PathBuf],
    options: EngineOptions,
    frames: u64,
    block_size: u32,
    sample_rate: f64,
    externals: &[String],
) -> CliResult {
    let sources = read_sources(files)?;
    let section = TestSection::new(
        sources
            .into_iter()
            .map(|(_, source)| source)
            .collect::<Vec<_>>()
            .join("\n"),
    );

    // every input gets silence or an empty event list
    let program = parse_program(files)?;
    let mut engine = Engine::new(options.clone());
    if let Err(errors) = engine.load(&program) {
        return Ok(report_diagnostics(&errors));
    }
    let mut data = ScriptData::default();
    for input in engine.input_endpoints() {
        if input.is_stream() {
            let silence = StreamData {
                sample_rate,
                frames: vec![vec![0.0; input.channels()]; frames as usize],
            };
            data.streams.insert(input.id.clone(), silence);
        } else if input.is_value() {
            data.values.insert(input.id.clone(), Vec::new());
        } else {
            data.events.insert(input.id.clone(), Vec::new());
        }
    }
    data.externals = externals
        .iter()
        .map(|arg| parse_external(arg))
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    let script = ScriptOptions {
        sample_rate,
        block_size,
        samples_to_render: frames,
        engine: Some(options),
        ..ScriptOptions::default()
    };
    let (report, outputs) = harness::run_script(&section, &script, &data);
    if let TestOutcome::Failure(reason) = &report.outcome {
        eprintln!("{reason}");
        return Ok(ExitCode::FAILURE);
    }
    print!("{}", serde_yaml::to_string(&outputs)?);
    Ok(ExitCode::SUCCESS)
}

fn test(
    files: &[PathBuf],
    options: EngineOptions,
    kind: TestKind,
    expected: &str,
    expect_failure: bool,
) -> CliResult {
    let mut sources = read_sources(files)?.into_iter().map(|(_, source)| source);
    let section = TestSection::new(sources.next().unwrap_or_default())
        .with_global_source(sources.collect::<Vec<_>>().join("\n"));
    let test_options = TestOptions {
        engine: Some(options.clone()),
        ..TestOptions::default()
    };

    let report = match kind {
        TestKind::Processor => harness::test_processor(&section, expect_failure, &test_options),
        TestKind::Function => harness::test_function(&section, &test_options),
        TestKind::Error => harness::expect_error(&section, expected, &test_options),
        TestKind::Compile => harness::test_compile(&section, true, &test_options),
        TestKind::Console => harness::test_console(&section, expected, &test_options),
        TestKind::Performance => harness::performance_test(
            &section,
            &harness::PerformanceOptions {
                engine: Some(options),
                ..harness::PerformanceOptions::default()
            },
        ),
    };
    Ok(print_report(&report))
}

fn print_report(report: &TestReport) -> ExitCode {
    for line in &report.log {
        println!("{line}");
    }
    println!("{}", report.outcome);
    match report.outcome {
        TestOutcome::Failure(_) => ExitCode::FAILURE,
        TestOutcome::Success | TestOutcome::Unsupported(_) => ExitCode::SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_render_arguments() {
        let cli = Cli::parse_from([
            "cadenza",
            "render",
            "gain.cdz",
            "--frames",
            "64",
            "--external",
            "Gain::level=0.5",
        ]);
        match cli.command {
            Command::Render { files, frames, externals, .. } => {
                assert_eq!(files, vec![PathBuf::from("gain.cdz")]);
                assert_eq!(frames, 64);
                assert_eq!(externals, vec!["Gain::level=0.5".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cli_parses_test_kind() {
        let cli = Cli::parse_from(["cadenza", "test", "t.cdz", "--kind", "console", "--expected", "hi"]);
        match cli.command {
            Command::Test { kind, expected, .. } => {
                assert_eq!(kind, TestKind::Console);
                assert_eq!(expected, "hi");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn external_values_are_typed() {
        assert_eq!(parse_external("P::g=0.25").unwrap(), ("P::g".into(), Value::Float64(0.25)));
        assert_eq!(parse_external("P::on=true").unwrap().1, Value::Bool(true));
        assert_eq!(parse_external("P::name=abc").unwrap().1, Value::String("abc".into()));
        assert!(parse_external("missing").is_err());
    }
}
