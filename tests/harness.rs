//! Harness integration tests: golden errors, test functions, self-checking
//! processors and scripted renders compared against expected streams.

use std::collections::BTreeMap;

use cadenza::harness::{
    expect_error, run_script, stream_data_comparison, test_function, test_processor, ScriptData,
    ScriptOptions, StreamData, TestOptions, TestOutcome, TestSection,
};
use cadenza::EngineOptions;

fn options() -> TestOptions {
    TestOptions {
        engine: Some(EngineOptions {
            seed: Some(11),
            ..EngineOptions::default()
        }),
        ..TestOptions::default()
    }
}

// =============================================================================
// Golden error text
// =============================================================================

#[test]
fn golden_errors() {
    let cases = [
        (
            "void f() { float64 a = 1.0; float32 b = a; }",
            "1:59: error: Cannot implicitly convert 'float64' to 'float32'",
        ),
        (
            "void f() { int a = 1; int a = 2; }",
            "1:45: error: The name 'a' is already in use",
        ),
        (
            "processor P {\n output stream float out;\n void f() { advance(); }\n void main() { advance(); } }",
            "3:13: error: advance() can only be called from a processor's main() function",
        ),
    ];
    for (source, golden) in cases {
        let report = expect_error(&TestSection::new(source), golden, &options());
        assert_eq!(report.outcome, TestOutcome::Success, "{source}: {:?}", report.log);
    }
}

#[test]
fn link_errors_count_as_expected_errors() {
    let section = TestSection::new("").with_global_source(
        "processor Needs [[main]] { output stream float out; external float k;
            void main() { loop { out <- k; advance(); } } }",
    );
    let report = expect_error(
        &section,
        "error: External variable 'Needs::k' has not been given a value",
        &options(),
    );
    assert_eq!(report.outcome, TestOutcome::Success, "{:?}", report.log);
}

// =============================================================================
// Test functions and processors
// =============================================================================

#[test]
fn failing_test_functions_are_named_in_order() {
    let section = TestSection::new(
        "bool addition() { return 2 + 2 == 4; }
         bool wrapping() { int x = 2147483647; return x + 1 < 0; }
         bool wrongSum() { return 2 + 2 == 5; }
         bool vectors() { let v = float<2>(1.0f, 2.0f); return v[1] == 2.0f; }
         bool wrongIndex() { int[3] a = int[3](1, 2, 3); return a[3] == 3; }",
    );
    assert_eq!(
        test_function(&section, &options()).outcome,
        TestOutcome::Failure("2 functions failed: wrongSum, wrongIndex".into())
    );
}

#[test]
fn one_passing_one_failing_function() {
    let section = TestSection::new("bool passes() { return true; } bool fails() { return false; }");
    assert_eq!(
        test_function(&section, &options()).outcome,
        TestOutcome::Failure("1 functions failed: fails".into())
    );
}

#[test]
fn self_checking_processor() {
    let section = TestSection::new(
        "processor Check { output event int result;
            void main() {
                int total = 0;
                loop (10) { total += 1; advance(); }
                result <- (total == 10 ? 1 : 0);
                result <- -1;
                loop advance();
            } }",
    );
    assert!(test_processor(&section, false, &options()).is_success());
}

// =============================================================================
// Scripted rendering
// =============================================================================

#[test]
fn scripted_render_matches_expected_stream() {
    let section = TestSection::new(
        "processor Decay { output stream float out; float level = 1.0f;
            void main() { loop { out <- level; level *= 0.5f; advance(); } } }",
    );
    let expected: Vec<f64> = (0..16).map(|i| 0.5f64.powi(i)).collect();
    let data = ScriptData {
        expected_streams: BTreeMap::from([(
            "out".to_string(),
            StreamData::mono(44100.0, &expected),
        )]),
        ..ScriptData::default()
    };
    let options = ScriptOptions {
        block_size: 5,
        samples_to_render: 16,
        engine: Some(EngineOptions::default()),
        ..ScriptOptions::default()
    };
    let (report, outputs) = run_script(&section, &options, &data);
    assert_eq!(report.outcome, TestOutcome::Success);
    assert_eq!(outputs.streams["out"].frame_count(), 16);
    assert_eq!(outputs.xruns, 0);
}

#[test]
fn comparison_reports_the_offending_sample() {
    let expected = StreamData::mono(48000.0, &[0.5, 0.25, 0.125, 0.0625]);
    let mut rendered = expected.clone();
    rendered.frames[2][0] = 0.2;
    let report = stream_data_comparison(&rendered, &expected, -100.0).unwrap();
    assert!(report.contains("diffFrame:2"), "{report}");
    assert!(report.contains("diffChannel:0"), "{report}");
    assert!(report.contains("maxValue:0.5"), "{report}");
}
