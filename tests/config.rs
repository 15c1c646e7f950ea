//! Engine options loaded from YAML files.

use std::io::Write;

use cadenza::engine::settings::SettingsError;
use cadenza::{Backend, Engine, EngineOptions, Program};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn options_file_overrides_build_settings() {
    let file = write_config("seed: 99\noverrides:\n  sampleRate: 48000\n  blockSize: 128\n");
    let options = EngineOptions::load_from(file.path()).unwrap();
    assert_eq!(options.backend, Backend::Vm);
    assert_eq!(options.seed, Some(99));

    let engine = Engine::new(options.clone());
    assert_eq!(engine.build_settings().frequency, 48000.0);
    assert_eq!(engine.build_settings().max_block_size, 128);
    assert_eq!(
        engine.build_settings().session_id,
        Engine::new(options).build_settings().session_id
    );
}

#[test]
fn wasm_backend_from_config_is_unsupported_at_link() {
    let file = write_config("backend: wasm\n");
    let mut engine = Engine::new(EngineOptions::load_from(file.path()).unwrap());
    let mut program = Program::new();
    program
        .parse("processor P { output stream float out; void main() { loop advance(); } }")
        .unwrap();
    engine.load(&program).unwrap();
    let err = engine.link().unwrap_err();
    assert!(err.is_unsupported());
}

#[test]
fn malformed_config_is_an_error() {
    let file = write_config("backend: [not, a, backend]\n");
    assert!(matches!(
        EngineOptions::load_from(file.path()),
        Err(SettingsError::Yaml(_))
    ));
}

#[test]
fn missing_config_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineOptions::load_from(&dir.path().join("engine.yaml")).unwrap_err();
    assert!(matches!(err, SettingsError::Io { .. }));
    assert!(err.to_string().starts_with("failed to read"));
}
