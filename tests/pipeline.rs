//! End-to-end tests: source text → Program → Engine → Performer → rendered blocks.

use assert_approx_eq::assert_approx_eq;

use cadenza::{BuildSettings, Category, Engine, EngineOptions, Performer, Program, Value};

const SAMPLE_RATE: f64 = 44100.0;
const SEED: u64 = 7;

const CONSTANT: &str = "processor Constant { output stream float out;
    void main() { loop { out <- 1.0f; advance(); } } }";

fn engine(max_block_size: u32) -> Engine {
    let mut engine = Engine::new(EngineOptions {
        seed: Some(SEED),
        ..EngineOptions::default()
    });
    let settings = engine
        .build_settings()
        .clone()
        .with_frequency(SAMPLE_RATE)
        .with_max_block_size(max_block_size);
    engine.set_build_settings(settings).expect("settings");
    engine
}

fn performer_for(src: &str, max_block_size: u32) -> (Engine, Performer) {
    let mut program = Program::new();
    program.parse(src).expect("parse failed");
    let mut engine = engine(max_block_size);
    engine.load(&program).expect("load failed");
    engine.link().expect("link failed");
    let performer = engine.create_performer().expect("performer");
    (engine, performer)
}

/// Render `blocks` blocks and return every frame of the named stream output.
fn render_stream(engine: &Engine, performer: &mut Performer, output: &str, block: u32, blocks: usize) -> Vec<f64> {
    let handle = engine.endpoint_handle(output).expect("output");
    performer.set_block_size(block).expect("block size");
    let mut samples = Vec::new();
    for _ in 0..blocks {
        performer.advance().expect("advance");
        let frames = performer.get_output_frames(handle).expect("frames");
        samples.extend(frames.iter().flat_map(Value::channels));
    }
    samples
}

// =============================================================================
// Rendering
// =============================================================================

#[test]
fn one_second_of_constant_output() {
    let (engine, mut performer) = performer_for(CONSTANT, 100);
    let samples = render_stream(&engine, &mut performer, "out", 100, 441);

    assert_eq!(samples.len(), 44100);
    assert!(samples.iter().all(|&s| s == 1.0));
    assert_eq!(performer.get_xruns(), 0);
}

#[test]
fn sine_oscillator_stays_in_range() {
    let src = "processor Sine { output stream float out; float phase;
        void main() {
            let step = float32(440.0 * 2.0 * 3.141592653589793 / processor.frequency);
            loop { out <- sin(phase); phase += step; advance(); }
        } }";
    let (engine, mut performer) = performer_for(src, 512);
    let samples = render_stream(&engine, &mut performer, "out", 512, 4);

    assert_eq!(samples.len(), 2048);
    assert!(samples.iter().all(|s| s.abs() <= 1.0));
    assert_approx_eq!(samples[0], 0.0, 1e-6);
    let step = 440.0 * std::f64::consts::TAU / SAMPLE_RATE;
    assert_approx_eq!(samples[1], step.sin(), 1e-4);
}

#[test]
fn graph_chain_processes_input() {
    let src = "processor Gain { input stream float in; output stream float out;
            void main() { loop { out <- in * 0.5f; advance(); } } }
        graph Chain [[main]] { input stream float in; output stream float out;
            node first = Gain; node second = Gain;
            connection in -> first -> second -> out; }";
    let (engine, mut performer) = performer_for(src, 64);
    let input = engine.endpoint_handle("in").unwrap();
    let output = engine.endpoint_handle("out").unwrap();

    performer.set_block_size(4).unwrap();
    let frames: Vec<Value> = [4.0, 8.0, -4.0, 0.0].into_iter().map(Value::Float32).collect();
    performer.set_input_frames(input, &frames).unwrap();
    performer.advance().unwrap();

    let out: Vec<f64> = performer
        .get_output_frames(output)
        .unwrap()
        .iter()
        .flat_map(Value::channels)
        .collect();
    assert_eq!(out, vec![1.0, 2.0, -1.0, 0.0]);
}

#[test]
fn events_arrive_at_block_start_and_are_echoed() {
    let src = "processor Echo { input event float in; output event float out;
        event in (float v) { out <- v * 2.0f; }
        void main() { loop advance(); } }";
    let (engine, mut performer) = performer_for(src, 64);
    let input = engine.endpoint_handle("in").unwrap();
    let output = engine.endpoint_handle("out").unwrap();

    performer.set_block_size(16).unwrap();
    performer.add_input_event(input, &Value::Float64(1.5)).unwrap();
    performer.add_input_event(input, &Value::Float64(2.0)).unwrap();
    performer.advance().unwrap();

    let events = performer.get_output_events(output).unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.frame_offset == 0));
    assert_eq!(events[0].event, Value::Float32(3.0));
    assert_eq!(events[1].event, Value::Float32(4.0));

    performer.advance().unwrap();
    assert!(performer.get_output_events(output).unwrap().is_empty());
}

// =============================================================================
// Lifecycle and limits
// =============================================================================

#[test]
fn block_size_above_maximum_is_rejected() {
    let (_engine, mut performer) = performer_for(CONSTANT, 256);
    let err = performer.set_block_size(257).unwrap_err();
    assert_eq!(err.category, Category::Precondition);
    assert!(performer.set_block_size(256).is_ok());
}

#[test]
fn load_unload_load_gives_same_endpoints() {
    let mut program = Program::new();
    program.parse(CONSTANT).unwrap();
    let mut engine = engine(128);

    engine.load(&program).unwrap();
    engine.link().unwrap();
    let first = engine.output_endpoints().to_vec();

    engine.unload();
    assert!(!engine.is_loaded());
    assert!(!engine.is_linked());

    engine.load(&program).unwrap();
    engine.link().unwrap();
    assert_eq!(engine.output_endpoints(), first.as_slice());
}

#[test]
fn fresh_engines_render_identically() {
    let src = "processor Ramp { output stream float out; float level;
        void main() { loop { out <- level; level += 0.001f; advance(); } } }";
    let render = || {
        let (engine, mut performer) = performer_for(src, 256);
        render_stream(&engine, &mut performer, "out", 200, 5)
    };
    assert_eq!(render(), render());
}

#[test]
fn long_delay_line_renders_within_real_time() {
    let src = "processor Delay { output stream float out; float[48000] buf; int pos;
        void main() {
            loop {
                out <- buf[pos];
                buf[pos] = float32(pos % 7);
                pos = (pos + 1) % 48000;
                advance();
            }
        } }";
    let (engine, mut performer) = performer_for(src, 512);
    let start = std::time::Instant::now();
    let samples = render_stream(&engine, &mut performer, "out", 512, 4);

    assert_eq!(samples.len(), 2048);
    assert!(samples.iter().all(|&s| s == 0.0));
    // 2048 frames is ~46 ms of audio; reads must not scale with the buffer
    assert!(start.elapsed() < std::time::Duration::from_secs(1), "{:?}", start.elapsed());
}

#[test]
fn settings_limits_reject_oversized_state() {
    let mut program = Program::new();
    program
        .parse("processor Big { output stream float out; float[4096] table;
            void main() { loop { out <- table[0]; advance(); } } }")
        .unwrap();
    let mut engine = engine(64);
    let settings: BuildSettings = engine.build_settings().clone().with_max_state_size(1024);
    engine.set_build_settings(settings).unwrap();
    let err = engine.load(&program).unwrap_err();
    assert_eq!(err.first().unwrap().category, Category::Build);
}
