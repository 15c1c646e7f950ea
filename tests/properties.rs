use cadenza::{Engine, EngineOptions, EndpointHandle, Performer, Program, Value};
use proptest::prelude::*;

fn performer(src: &str) -> (Engine, Performer) {
    let mut program = Program::new();
    program.parse(src).unwrap();
    let mut engine = Engine::new(EngineOptions {
        seed: Some(1),
        ..EngineOptions::default()
    });
    engine.load(&program).unwrap();
    engine.link().unwrap();
    let performer = engine.create_performer().unwrap();
    (engine, performer)
}

const TOKENS: &[&str] = &[
    "processor", "graph", "namespace", "node", "connection", "input", "output", "stream",
    "event", "value", "float", "int", "bool", "void", "main", "advance", "loop", "if", "else",
    "return", "let", "{", "}", "(", ")", "[", "]", "[[", "]]", ";", ",", ".", "::", "<-", "->",
    "+", "-", "*", "/", "=", "==", "<", ">", "?", ":", "x", "P", "1", "2.5f", "\"s\"",
];

proptest! {
    #[test]
    fn parser_never_panics_on_arbitrary_text(source in "\\PC{0,200}") {
        let mut program = Program::new();
        let _ = program.parse(&source);
    }

    #[test]
    fn parser_never_panics_on_token_soup(
        picks in proptest::collection::vec(0..TOKENS.len(), 0..60),
    ) {
        let source: Vec<&str> = picks.iter().map(|&i| TOKENS[i]).collect();
        let mut program = Program::new();
        if program.parse(&source.join(" ")).is_err() {
            prop_assert!(program.is_empty());
        }
    }

    #[test]
    fn deep_nesting_is_reported_not_fatal(depth in 0usize..3000, shape in 0usize..3) {
        let open = ["(", "-(", "x + ("][shape];
        let body = format!("{}1{}", open.repeat(depth), ")".repeat(depth));
        let source = format!(
            "namespace n {{ int f(int x) {{ return {body}; }} }}
             processor P {{ output stream int out; void main() {{ loop {{ out <- n::f(2); advance(); }} }} }}"
        );
        let mut program = Program::new();
        match program.parse(&source) {
            Ok(_) => {
                let mut engine = Engine::new(EngineOptions::default());
                prop_assert!(engine.load(&program).is_ok());
            }
            Err(errors) => {
                let text = errors.full_description();
                prop_assert!(text.contains("is too deeply nested"), "{}", text);
            }
        }
    }

    #[test]
    fn output_event_offsets_are_ordered_within_the_block(
        every in 1i32..12,
        block in 1u32..300,
    ) {
        let src = format!(
            "processor P {{ output event int out; int n;
                void main() {{ loop {{ if (n % {every} == 0) out <- n; ++n; advance(); }} }} }}"
        );
        let (_engine, mut p) = performer(&src);
        p.set_block_size(block).unwrap();
        for _ in 0..3 {
            p.advance().unwrap();
            let events = p.get_output_events(EndpointHandle(0)).unwrap();
            prop_assert!(events.len() <= 32);
            prop_assert!(events.windows(2).all(|w| w[0].frame_offset <= w[1].frame_offset));
            prop_assert!(events.iter().all(|e| e.frame_offset < block));
        }
    }

    #[test]
    fn block_partitioning_does_not_change_the_stream(
        a in 1u32..64,
        b in 1u32..64,
    ) {
        const SRC: &str = "processor Saw { output stream float out; float phase;
            void main() { loop { out <- phase; phase = fmod(phase + 0.01f, 1.0f); advance(); } } }";
        let render = |block: u32| {
            let (_engine, mut p) = performer(SRC);
            let mut frames: Vec<Value> = Vec::new();
            let mut remaining = 256u32;
            while remaining > 0 {
                let n = remaining.min(block);
                p.set_block_size(n).unwrap();
                p.advance().unwrap();
                frames.extend_from_slice(p.get_output_frames(EndpointHandle(0)).unwrap());
                remaining -= n;
            }
            frames
        };
        prop_assert_eq!(render(a), render(b));
    }
}
