use crate::frame::Delta;

/// Appends one fragment to the accumulated text.
pub fn accumulate(mut text: String, content: &str) -> String {
    text.push_str(content);
    text
}

/// Folds fragments in delivery order.
pub fn fold<'a>(fragments: impl IntoIterator<Item = &'a str>) -> String {
    fragments.into_iter().fold(String::new(), accumulate)
}

/// Running text for one in-flight response.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    text: String,
    applied: u64,
    finish_reason: Option<String>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a delta and returns its sequence number.
    pub fn push(&mut self, delta: &Delta) -> u64 {
        let seq = self.applied;
        self.text = accumulate(std::mem::take(&mut self.text), &delta.content);
        if delta.finish_reason.is_some() {
            self.finish_reason.clone_from(&delta.finish_reason);
        }
        self.applied = self.applied.saturating_add(1);
        seq
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of deltas applied so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_concatenates_in_order() {
        assert_eq!(fold(["Hi", "", " there"]), "Hi there");
        assert_eq!(fold(Vec::<&str>::new()), "");
    }

    #[test]
    fn push_tracks_sequence_and_finish_reason() {
        let mut acc = DeltaAccumulator::new();
        assert_eq!(
            acc.push(&Delta {
                content: "a".into(),
                finish_reason: None
            }),
            0
        );
        assert_eq!(
            acc.push(&Delta {
                content: "b".into(),
                finish_reason: Some("stop".into())
            }),
            1
        );
        assert_eq!(acc.text(), "ab");
        assert_eq!(acc.applied(), 2);
        assert_eq!(acc.finish_reason(), Some("stop"));
    }
}
