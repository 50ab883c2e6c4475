use crate::error::{EngineError, Result};
use crate::TokenId;

/// One staged token for an evaluation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: TokenId,
    /// Absolute position in the sequence.
    pub pos: u32,
    pub seq_id: u32,
    /// Whether the engine should produce logits at this position.
    pub emit_logits: bool,
}

/// Fixed-capacity staging buffer for one evaluation call.
///
/// The buffer is cleared and refilled between generation steps; clearing
/// retains the allocation. Staging past capacity is rejected rather than
/// silently overwriting.
#[derive(Debug)]
pub struct Batch {
    capacity: usize,
    entries: Vec<BatchEntry>,
}

impl Batch {
    /// Create an empty batch that holds at most `capacity` tokens.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Stage one token.
    pub fn push(&mut self, token: TokenId, pos: u32, seq_id: u32, emit_logits: bool) -> Result<()> {
        if self.entries.len() >= self.capacity {
            return Err(EngineError::BatchFull {
                capacity: self.capacity,
            });
        }
        self.entries.push(BatchEntry {
            token,
            pos,
            seq_id,
            emit_logits,
        });
        Ok(())
    }

    /// Flip the emit-logits flag on the final staged entry.
    ///
    /// A prompt fill stages every token without logits and then marks the
    /// last position, so exactly one position produces output.
    pub fn mark_last_for_logits(&mut self) {
        if let Some(last) = self.entries.last_mut() {
            last.emit_logits = true;
        }
    }

    /// Drop all staged entries, keeping the allocation and capacity.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// Index of the last entry flagged for logits, if any.
    pub fn last_logits_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.emit_logits)
    }
}
