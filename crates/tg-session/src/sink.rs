/// Consumer of incrementally generated text.
///
/// Fragments arrive strictly in generation order, one at a time; the
/// generation loop does not proceed until `on_fragment` returns.
pub trait StreamSink {
    fn on_fragment(&mut self, fragment: &str);
}

impl<F: FnMut(&str)> StreamSink for F {
    fn on_fragment(&mut self, fragment: &str) {
        self(fragment)
    }
}

/// A sink that drops every fragment, for callers that only want the
/// final accumulated text.
pub fn discard() -> impl FnMut(&str) {
    |_| {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_sink() {
        let mut collected = Vec::new();
        {
            let mut sink = |fragment: &str| collected.push(fragment.to_string());
            StreamSink::on_fragment(&mut sink, "a");
            StreamSink::on_fragment(&mut sink, "b");
        }
        assert_eq!(collected, vec!["a", "b"]);
    }

    #[test]
    fn test_discard_accepts_fragments() {
        let mut sink = discard();
        sink.on_fragment("ignored");
    }
}
