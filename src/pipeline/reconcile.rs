//! Reconciliation of incremental recognition results into one transcript.
//!
//! [`TranscriptState`] keeps two strings with very different rules:
//!
//! * `finalized` is **append-only**.  Each finalized segment is concatenated
//!   space-joined (empty segments skipped) and never touched again.
//! * `volatile` is the in-flight hypothesis and is **replaced wholesale** on
//!   every non-final result — never appended.
//!
//! The display transcript is derived, not stored:
//! `trim(finalized + (" " + volatile if non-empty))`.

use crate::stt::RecognitionResult;

// ---------------------------------------------------------------------------
// TranscriptState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TranscriptState {
    finalized: String,
    volatile: String,
}

impl TranscriptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one engine result into the transcript.
    pub fn apply(&mut self, result: &RecognitionResult) {
        if result.is_final {
            let text = result.text.trim();
            if !text.is_empty() {
                if !self.finalized.is_empty() {
                    self.finalized.push(' ');
                }
                self.finalized.push_str(text);
            }
            self.volatile.clear();
        } else {
            self.volatile = result.text.clone();
        }
    }

    /// Confirmed transcript so far.
    pub fn finalized_text(&self) -> &str {
        &self.finalized
    }

    /// Current in-flight hypothesis ("" when none).
    pub fn volatile_text(&self) -> &str {
        &self.volatile
    }

    /// Finalized plus hypothesis, joined for display.
    pub fn display_text(&self) -> String {
        if self.volatile.is_empty() {
            self.finalized.trim().to_string()
        } else {
            format!("{} {}", self.finalized, self.volatile)
                .trim()
                .to_string()
        }
    }

    /// Finalized text with whitespace runs collapsed and ends trimmed —
    /// what `stop()` hands back to the caller.
    pub fn final_normalized(&self) -> String {
        normalize_whitespace(&self.finalized)
    }

    /// Reset to empty (session start / reset / cancel).
    pub fn clear(&mut self) {
        self.finalized.clear();
        self.volatile.clear();
    }
}

/// Collapse runs of whitespace (including newlines) to single spaces and
/// trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalized_segments_are_space_joined() {
        let mut state = TranscriptState::new();
        state.apply(&RecognitionResult::finalized("hello"));
        state.apply(&RecognitionResult::finalized("world"));
        assert_eq!(state.finalized_text(), "hello world");
    }

    #[test]
    fn empty_finalized_segments_are_skipped() {
        let mut state = TranscriptState::new();
        state.apply(&RecognitionResult::finalized("hello"));
        state.apply(&RecognitionResult::finalized(""));
        state.apply(&RecognitionResult::finalized("   "));
        state.apply(&RecognitionResult::finalized("world"));
        assert_eq!(state.finalized_text(), "hello world");
    }

    #[test]
    fn volatile_is_replaced_wholesale_not_appended() {
        let mut state = TranscriptState::new();
        state.apply(&RecognitionResult::volatile("wor"));
        state.apply(&RecognitionResult::volatile("world"));
        // Only the latest hypothesis survives, never both.
        assert_eq!(state.display_text(), "world");
    }

    #[test]
    fn finalizing_clears_the_volatile_text() {
        let mut state = TranscriptState::new();
        state.apply(&RecognitionResult::volatile("hel"));
        state.apply(&RecognitionResult::finalized("hello"));
        assert_eq!(state.volatile_text(), "");
        assert_eq!(state.display_text(), "hello");
    }

    #[test]
    fn display_text_combines_finalized_and_volatile() {
        let mut state = TranscriptState::new();
        state.apply(&RecognitionResult::finalized("hello"));
        state.apply(&RecognitionResult::volatile("wor"));
        assert_eq!(state.display_text(), "hello wor");
    }

    /// The derivation law holds for an arbitrary update history.
    #[test]
    fn display_text_law() {
        let updates = [
            RecognitionResult::volatile("a"),
            RecognitionResult::finalized("alpha"),
            RecognitionResult::volatile("b"),
            RecognitionResult::volatile("be"),
            RecognitionResult::finalized("beta"),
            RecognitionResult::volatile("g"),
        ];

        let mut state = TranscriptState::new();
        for update in &updates {
            state.apply(update);

            let expected = if state.volatile_text().is_empty() {
                state.finalized_text().trim().to_string()
            } else {
                format!("{} {}", state.finalized_text(), state.volatile_text())
                    .trim()
                    .to_string()
            };
            assert_eq!(state.display_text(), expected);
        }
    }

    /// Finalized text length never decreases until clear().
    #[test]
    fn finalized_length_is_monotonic() {
        let updates = [
            RecognitionResult::volatile("x"),
            RecognitionResult::finalized("one"),
            RecognitionResult::volatile("y"),
            RecognitionResult::finalized(""),
            RecognitionResult::finalized("two"),
            RecognitionResult::volatile("z"),
        ];

        let mut state = TranscriptState::new();
        let mut last_len = 0;
        for update in &updates {
            state.apply(update);
            let len = state.finalized_text().len();
            assert!(len >= last_len, "finalized shrank: {len} < {last_len}");
            last_len = len;
        }

        state.clear();
        assert_eq!(state.finalized_text().len(), 0);
    }

    #[test]
    fn normalization_collapses_runs_and_trims() {
        let mut state = TranscriptState::new();
        state.apply(&RecognitionResult::finalized("  multiple   spaces\n\n"));
        state.apply(&RecognitionResult::finalized("then\ttabs "));
        assert_eq!(state.final_normalized(), "multiple spaces then tabs");
    }

    #[test]
    fn clear_discards_everything() {
        let mut state = TranscriptState::new();
        state.apply(&RecognitionResult::finalized("hello"));
        state.apply(&RecognitionResult::volatile("wor"));
        state.clear();
        assert_eq!(state.display_text(), "");
        assert_eq!(state.final_normalized(), "");
    }
}
