//! End-to-end generation tests against the scripted engine.

use std::io::Write;

use tempfile::NamedTempFile;

use tg_engine::scripted::{ScriptedEngine, EOS};
use tg_session::{
    discard, CancelToken, GenerateParams, Model, ModelParams, SamplingParams, SessionConfig,
    SessionError, StopReason,
};

fn model_file() -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(b"weights").unwrap();
    f
}

/// Vocabulary for the "2+2=" scenario: ids 3.. are "2", "+", "=", "4".
fn math_engine() -> ScriptedEngine {
    ScriptedEngine::new(&["2", "+", "=", "4"], &[6])
}

fn greedy_config() -> SessionConfig {
    SessionConfig::default()
        .with_sampling(SamplingParams::greedy())
        .with_context_length(128)
}

#[test]
fn test_scenario_two_plus_two() {
    let file = model_file();
    let mut model = Model::load(math_engine(), file.path(), &ModelParams::default()).unwrap();
    let mut session = model.start_session(greedy_config()).unwrap();

    let mut fragments: Vec<String> = Vec::new();
    let mut sink = |fragment: &str| fragments.push(fragment.to_string());
    let out = session
        .generate("2+2=", &GenerateParams::new(5), &mut sink)
        .unwrap();

    assert_eq!(out.text, "4");
    assert!(matches!(out.stop, StopReason::Eos));
    assert!(out.tokens_generated <= 5);
    assert_eq!(fragments.concat(), out.text);
}

#[test]
fn test_empty_prompt_makes_no_engine_calls() {
    let engine = math_engine();
    let evals = engine.eval_counter();
    let file = model_file();
    let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();
    let mut session = model.start_session(greedy_config()).unwrap();

    let out = session
        .generate("", &GenerateParams::new(5), &mut discard())
        .unwrap();

    assert_eq!(out.text, "");
    assert_eq!(out.tokens_generated, 0);
    assert!(matches!(out.stop, StopReason::EmptyPrompt));
    assert_eq!(evals.count(), 0);
}

#[test]
fn test_greedy_runs_are_identical() {
    let file = model_file();
    let engine = ScriptedEngine::new(&["2", "+", "=", "4"], &[6, 3, 6]);
    let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let mut session = model.start_session(greedy_config()).unwrap();
        let out = session
            .generate("2+2=", &GenerateParams::new(8), &mut discard())
            .unwrap();
        session.end();
        outputs.push(out.text);
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], "424");
}

#[test]
fn test_seeded_sampling_is_reproducible() {
    let file = model_file();
    let config = SessionConfig::default()
        .with_sampling(SamplingParams {
            seed: Some(7),
            ..SamplingParams::default()
        })
        .with_context_length(128);

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let engine = ScriptedEngine::new(&["2", "+", "=", "4"], &[6, 3, 6]);
        let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();
        let mut session = model.start_session(config.clone()).unwrap();
        let out = session
            .generate("2+2=", &GenerateParams::new(8), &mut discard())
            .unwrap();
        outputs.push(out.text);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_max_tokens_bounds_fragments() {
    let file = model_file();
    // Script keeps emitting "2" far past the budget.
    let engine = ScriptedEngine::new(&["2", "+", "=", "4"], &[3; 16]);
    let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();
    let mut session = model.start_session(greedy_config()).unwrap();

    let mut count = 0usize;
    let mut sink = |_: &str| count += 1;
    let out = session
        .generate("2+2=", &GenerateParams::new(4), &mut sink)
        .unwrap();

    assert!(matches!(out.stop, StopReason::MaxTokens));
    assert_eq!(out.tokens_generated, 4);
    assert_eq!(out.text, "2222");
    assert!(count <= 4);
}

#[test]
fn test_explicit_eos_in_script_stops_early() {
    let file = model_file();
    let engine = ScriptedEngine::new(&["2", "+", "=", "4"], &[6, EOS, 3, 3]);
    let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();
    let mut session = model.start_session(greedy_config()).unwrap();

    let out = session
        .generate("2+2=", &GenerateParams::new(10), &mut discard())
        .unwrap();

    assert!(matches!(out.stop, StopReason::Eos));
    assert_eq!(out.tokens_generated, 2);
    assert_eq!(out.text, "4");
}

#[test]
fn test_decode_failure_preserves_partial_output() {
    let file = model_file();
    // Prompt evaluation plus one decode step succeed, the next decode fails.
    let engine = ScriptedEngine::new(&["2", "+", "=", "4"], &[6, 6, 6]).with_fail_after(2);
    let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();
    let mut session = model.start_session(greedy_config()).unwrap();

    let mut fragments: Vec<String> = Vec::new();
    let mut sink = |fragment: &str| fragments.push(fragment.to_string());
    let out = session
        .generate("2+2=", &GenerateParams::new(10), &mut sink)
        .unwrap();

    assert!(out.stop.is_error());
    assert_eq!(out.text, "44");
    assert_eq!(fragments.concat(), "44");
}

#[test]
fn test_prompt_overflowing_context_is_rejected() {
    let file = model_file();
    let mut model = Model::load(math_engine(), file.path(), &ModelParams::default()).unwrap();
    let mut session = model
        .start_session(greedy_config().with_context_length(3))
        .unwrap();

    // "2+2=" encodes to five tokens, more than the context holds.
    let out = session
        .generate("2+2=", &GenerateParams::new(5), &mut discard())
        .unwrap();

    assert!(matches!(out.stop, StopReason::Decode(_)));
    assert_eq!(out.text, "");
}

#[test]
fn test_prompt_longer_than_batch_is_chunked() {
    let file = model_file();
    let engine = math_engine();
    let evals = engine.eval_counter();
    let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();
    let mut config = greedy_config();
    config.batch_capacity = 2;
    let mut session = model.start_session(config).unwrap();

    let out = session
        .generate("2+2=", &GenerateParams::new(5), &mut discard())
        .unwrap();

    assert_eq!(out.text, "4");
    assert!(matches!(out.stop, StopReason::Eos));
    // Five prompt tokens in capacity-2 chunks: three prompt evaluations.
    assert!(evals.count() >= 3);
}

#[test]
fn test_cancellation_from_sink() {
    let file = model_file();
    let engine = ScriptedEngine::new(&["2", "+", "=", "4"], &[3; 16]);
    let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();
    let mut session = model.start_session(greedy_config()).unwrap();

    let cancel = CancelToken::new();
    let seen = cancel.clone();
    let mut fragments: Vec<String> = Vec::new();
    let mut sink = |fragment: &str| {
        fragments.push(fragment.to_string());
        seen.cancel();
    };
    let out = session
        .generate(
            "2+2=",
            &GenerateParams::new(16).with_cancel(cancel),
            &mut sink,
        )
        .unwrap();

    assert!(matches!(out.stop, StopReason::Cancelled));
    assert_eq!(out.tokens_generated, 1);
    assert_eq!(fragments.len(), 1);
    assert_eq!(out.text, "2");
}

#[test]
fn test_eos_fragment_delivery_is_configurable() {
    let file = model_file();

    let engine = ScriptedEngine::new(&["2", "+", "=", "4"], &[6]).with_eos_text("<END>");
    let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();
    let mut session = model.start_session(greedy_config()).unwrap();
    let out = session
        .generate("2+2=", &GenerateParams::new(5), &mut discard())
        .unwrap();
    // Reference behavior: the end-of-sequence fragment is delivered.
    assert_eq!(out.text, "4<END>");
    session.end();

    let mut config = greedy_config();
    config.emit_eos_text = false;
    let mut session = model.start_session(config).unwrap();
    let out = session
        .generate("2+2=", &GenerateParams::new(5), &mut discard())
        .unwrap();
    assert_eq!(out.text, "4");
}

#[test]
fn test_grammar_masks_candidates() {
    let file = model_file();
    // The script wants "a", but the grammar only admits digits.
    let engine = ScriptedEngine::new(&["a", "1", "2"], &[3]);
    let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();
    let mut session = model.start_session(greedy_config()).unwrap();

    let params = GenerateParams::new(5).with_grammar("root ::= [0-9]+").unwrap();
    let out = session.generate("a", &params, &mut discard()).unwrap();

    assert!(matches!(out.stop, StopReason::Eos));
    assert!(out.text.chars().all(|c| c.is_ascii_digit()));
    assert!(!out.text.is_empty());
}

#[test]
fn test_grammar_defers_eos_until_complete() {
    let file = model_file();
    // Script is empty, so the engine pushes for end-of-sequence
    // immediately; the grammar demands two digits first.
    let engine = ScriptedEngine::new(&["4"], &[]);
    let mut model = Model::load(engine, file.path(), &ModelParams::default()).unwrap();
    let mut session = model.start_session(greedy_config()).unwrap();

    let params = GenerateParams::new(5).with_grammar(r#"root ::= "44""#).unwrap();
    let out = session.generate("4", &params, &mut discard()).unwrap();

    assert_eq!(out.text, "44");
    assert!(matches!(out.stop, StopReason::Eos));
}

#[test]
fn test_round_trip_through_tokenizer() {
    let file = model_file();
    let mut model = Model::load(math_engine(), file.path(), &ModelParams::default()).unwrap();

    // Five tokens: begin-of-sequence plus four pieces.
    assert_eq!(model.count_tokens("2+2="), 5);

    let mut session = model.start_session(greedy_config()).unwrap();
    let out = session
        .generate("2+2=", &GenerateParams::new(5), &mut discard())
        .unwrap();
    drop(out);
    session.end();

    assert!(model.system_info().contains("scripted"));
}

#[test]
fn test_sessions_can_be_restarted() {
    let file = model_file();
    let mut model = Model::load(math_engine(), file.path(), &ModelParams::default()).unwrap();

    let session = model.start_session(greedy_config()).unwrap();
    session.end();

    let mut session = model.start_session(greedy_config()).unwrap();
    let out = session
        .generate("2+2=", &GenerateParams::new(5), &mut discard())
        .unwrap();
    assert_eq!(out.text, "4");
}

#[test]
fn test_invalid_session_config_is_rejected() {
    let file = model_file();
    let mut model = Model::load(math_engine(), file.path(), &ModelParams::default()).unwrap();

    let err = model
        .start_session(greedy_config().with_context_length(0))
        .unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));

    let mut config = greedy_config();
    config.batch_capacity = 0;
    let err = model.start_session(config).unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));
}

#[test]
fn test_missing_model_path_fails_load() {
    let err = Model::load(
        math_engine(),
        "/nonexistent/model.gguf",
        &ModelParams::default(),
    )
    .unwrap_err();
    assert!(matches!(err, SessionError::Engine(_)));
}
