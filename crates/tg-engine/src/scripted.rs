//! Deterministic in-memory engine for tests and examples.
//!
//! The engine carries a small piece vocabulary and a fixed reply script.
//! Every evaluation that requests logits yields a sharply peaked
//! distribution over the next scripted token, so greedy sampling
//! reproduces the script exactly. Once the script is exhausted the engine
//! yields end-of-sequence.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::batch::Batch;
use crate::engine::{ContextParams, InferenceEngine, ModelParams};
use crate::error::{EngineError, Result};
use crate::TokenId;

/// Reserved control token: unknown input.
pub const UNK: TokenId = 0;
/// Reserved control token: begin-of-sequence.
pub const BOS: TokenId = 1;
/// Reserved control token: end-of-sequence.
pub const EOS: TokenId = 2;

/// Shared counter of `evaluate` calls, cloneable before the engine is
/// handed off to a session.
#[derive(Debug, Clone, Default)]
pub struct EvalCounter(Arc<AtomicUsize>);

impl EvalCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted engine: vocabulary plus a canned reply.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    vocab: Vec<String>,
    script: Vec<TokenId>,
    fail_after_evals: Option<usize>,
    evals: EvalCounter,
}

impl ScriptedEngine {
    /// Build an engine whose vocabulary is the three control tokens
    /// followed by `pieces` (ids 3, 4, ...), and whose reply is `script`.
    ///
    /// Control tokens decode to empty text by default.
    pub fn new(pieces: &[&str], script: &[TokenId]) -> Self {
        let mut vocab = vec![String::new(), String::new(), String::new()];
        vocab.extend(pieces.iter().map(|p| p.to_string()));
        Self {
            vocab,
            script: script.to_vec(),
            fail_after_evals: None,
            evals: EvalCounter::default(),
        }
    }

    /// Give the end-of-sequence token visible text.
    pub fn with_eos_text(mut self, text: &str) -> Self {
        self.vocab[EOS as usize] = text.to_string();
        self
    }

    /// Make every `evaluate` after the first `n` fail with a decode error.
    pub fn with_fail_after(mut self, n: usize) -> Self {
        self.fail_after_evals = Some(n);
        self
    }

    /// Handle onto the evaluate-call counter; clone before loading a model.
    pub fn eval_counter(&self) -> EvalCounter {
        self.evals.clone()
    }
}

/// Weights stand-in: a copy of the engine's vocabulary and script.
#[derive(Debug)]
pub struct ScriptedModel {
    vocab: Vec<String>,
    script: Vec<TokenId>,
}

/// Per-session state: position counter and script cursor.
#[derive(Debug)]
pub struct ScriptedContext {
    context_length: usize,
    n_past: usize,
    evals: usize,
    cursor: usize,
    /// Batch index of the position logits were produced for, plus the
    /// token those logits select.
    ready: Option<(usize, TokenId)>,
}

impl InferenceEngine for ScriptedEngine {
    type Model = ScriptedModel;
    type Context = ScriptedContext;

    fn load_model(&self, path: &Path, _params: &ModelParams) -> Result<Self::Model> {
        if !path.exists() {
            return Err(EngineError::ModelLoad {
                path: path.to_path_buf(),
                reason: "no such file".to_string(),
            });
        }
        Ok(ScriptedModel {
            vocab: self.vocab.clone(),
            script: self.script.clone(),
        })
    }

    fn create_context(&self, _model: &Self::Model, params: &ContextParams) -> Result<Self::Context> {
        if params.context_length == 0 {
            return Err(EngineError::ContextInit(
                "context length must be positive".to_string(),
            ));
        }
        Ok(ScriptedContext {
            context_length: params.context_length,
            n_past: 0,
            evals: 0,
            cursor: 0,
            ready: None,
        })
    }

    fn evaluate(&self, model: &Self::Model, context: &mut Self::Context, batch: &Batch)
        -> Result<()> {
        self.evals.increment();
        if let Some(limit) = self.fail_after_evals {
            if context.evals >= limit {
                return Err(EngineError::Decode("scripted evaluation failure".to_string()));
            }
        }
        if batch.is_empty() {
            return Err(EngineError::Decode("empty batch".to_string()));
        }
        for (i, entry) in batch.entries().iter().enumerate() {
            if entry.pos as usize != context.n_past + i {
                return Err(EngineError::Decode(format!(
                    "position {} not contiguous with cache at {}",
                    entry.pos, context.n_past
                )));
            }
        }
        if context.n_past + batch.len() > context.context_length {
            return Err(EngineError::Decode(format!(
                "batch of {} exceeds context length {}",
                batch.len(),
                context.context_length
            )));
        }

        context.n_past += batch.len();
        context.evals += 1;
        context.ready = batch.last_logits_index().map(|idx| {
            let next = model.script.get(context.cursor).copied().unwrap_or(EOS);
            context.cursor += 1;
            (idx, next)
        });
        Ok(())
    }

    fn logits(&self, model: &Self::Model, context: &Self::Context, position: usize)
        -> Result<Vec<f32>> {
        match context.ready {
            Some((idx, next)) if idx == position => {
                let mut logits = vec![-10.0; model.vocab.len()];
                logits[next as usize] = 10.0;
                Ok(logits)
            }
            _ => Err(EngineError::Decode(format!(
                "no logits available at position {position}"
            ))),
        }
    }

    fn encode(&self, model: &Self::Model, text: &str, add_bos: bool) -> Vec<TokenId> {
        let mut tokens = Vec::new();
        if add_bos && !text.is_empty() {
            tokens.push(BOS);
        }
        let mut rest = text;
        while !rest.is_empty() {
            // Greedy longest match over non-empty vocabulary pieces.
            let best = model
                .vocab
                .iter()
                .enumerate()
                .filter(|(_, piece)| !piece.is_empty() && rest.starts_with(piece.as_str()))
                .max_by_key(|(_, piece)| piece.len());
            match best {
                Some((id, piece)) => {
                    tokens.push(id as TokenId);
                    rest = &rest[piece.len()..];
                }
                None => {
                    tokens.push(UNK);
                    let skip = rest.chars().next().map_or(0, char::len_utf8);
                    rest = &rest[skip..];
                }
            }
        }
        tokens
    }

    fn token_text(&self, model: &Self::Model, token: TokenId) -> Result<String> {
        model
            .vocab
            .get(token as usize)
            .cloned()
            .ok_or(EngineError::InvalidToken {
                id: token,
                vocab_size: model.vocab.len(),
            })
    }

    fn eos_token(&self, _model: &Self::Model) -> TokenId {
        EOS
    }

    fn vocab_size(&self, model: &Self::Model) -> usize {
        model.vocab.len()
    }

    fn system_info(&self) -> String {
        format!(
            "scripted engine | vocab = {} | script = {} tokens",
            self.vocab.len(),
            self.script.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn model_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"weights").unwrap();
        f
    }

    fn engine() -> ScriptedEngine {
        ScriptedEngine::new(&["2", "+", "=", "4"], &[6])
    }

    #[test]
    fn test_load_missing_path() {
        let err = engine()
            .load_model(Path::new("/nonexistent/model.bin"), &ModelParams::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelLoad { .. }));
    }

    #[test]
    fn test_encode_longest_match() {
        let eng = ScriptedEngine::new(&["a", "ab", "b"], &[]);
        let file = model_file();
        let model = eng.load_model(file.path(), &ModelParams::default()).unwrap();
        // "ab" must win over "a" then "b".
        assert_eq!(eng.encode(&model, "ab", false), vec![4]);
        assert_eq!(eng.encode(&model, "aba", false), vec![4, 3]);
    }

    #[test]
    fn test_encode_adds_bos_and_maps_unknown() {
        let eng = engine();
        let file = model_file();
        let model = eng.load_model(file.path(), &ModelParams::default()).unwrap();
        let tokens = eng.encode(&model, "2+?", true);
        assert_eq!(tokens[0], BOS);
        assert_eq!(tokens[1], 3); // "2"
        assert_eq!(tokens[2], 4); // "+"
        assert_eq!(tokens[3], UNK);
    }

    #[test]
    fn test_empty_text_encodes_empty() {
        let eng = engine();
        let file = model_file();
        let model = eng.load_model(file.path(), &ModelParams::default()).unwrap();
        assert!(eng.encode(&model, "", true).is_empty());
    }

    #[test]
    fn test_token_text_bounds() {
        let eng = engine();
        let file = model_file();
        let model = eng.load_model(file.path(), &ModelParams::default()).unwrap();
        assert_eq!(eng.token_text(&model, 6).unwrap(), "4");
        assert_eq!(eng.token_text(&model, BOS).unwrap(), "");
        let err = eng.token_text(&model, 99).unwrap_err();
        assert!(matches!(err, EngineError::InvalidToken { id: 99, .. }));
    }

    #[test]
    fn test_evaluate_enforces_context_length() {
        let eng = engine();
        let file = model_file();
        let model = eng.load_model(file.path(), &ModelParams::default()).unwrap();
        let mut ctx = eng
            .create_context(
                &model,
                &ContextParams {
                    context_length: 2,
                    ..ContextParams::default()
                },
            )
            .unwrap();
        let mut batch = Batch::with_capacity(8);
        for i in 0..3 {
            batch.push(3, i, 0, false).unwrap();
        }
        batch.mark_last_for_logits();
        let err = eng.evaluate(&model, &mut ctx, &batch).unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)));
    }

    #[test]
    fn test_script_then_eos() {
        let eng = engine();
        let file = model_file();
        let model = eng.load_model(file.path(), &ModelParams::default()).unwrap();
        let mut ctx = eng.create_context(&model, &ContextParams::default()).unwrap();

        let mut batch = Batch::with_capacity(8);
        batch.push(BOS, 0, 0, false).unwrap();
        batch.mark_last_for_logits();
        eng.evaluate(&model, &mut ctx, &batch).unwrap();

        let logits = eng.logits(&model, &ctx, 0).unwrap();
        let argmax = logits
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i as TokenId)
            .unwrap();
        assert_eq!(argmax, 6); // scripted "4"

        // Script exhausted: next logits select EOS.
        batch.clear();
        batch.push(argmax, 1, 0, true).unwrap();
        eng.evaluate(&model, &mut ctx, &batch).unwrap();
        let logits = eng.logits(&model, &ctx, 0).unwrap();
        let argmax = logits
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i as TokenId)
            .unwrap();
        assert_eq!(argmax, EOS);
    }

    #[test]
    fn test_eval_counter_shared() {
        let eng = engine();
        let counter = eng.eval_counter();
        let file = model_file();
        let model = eng.load_model(file.path(), &ModelParams::default()).unwrap();
        let mut ctx = eng.create_context(&model, &ContextParams::default()).unwrap();
        let mut batch = Batch::with_capacity(4);
        batch.push(BOS, 0, 0, true).unwrap();
        eng.evaluate(&model, &mut ctx, &batch).unwrap();
        assert_eq!(counter.count(), 1);
    }
}
