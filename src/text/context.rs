//! Prompt-context cache and builder for the batch engine.
//!
//! Successive short utterances decode better when the recognizer sees the
//! user's recent accepted output as decoder context. The cache is a
//! time-windowed recency buffer of accepted texts; the builder turns it
//! into a token-budgeted, chronologically ordered context.

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One accepted utterance.
#[derive(Debug, Clone)]
struct CacheEntry {
    text: String,
    accepted_at: Instant,
}

/// Time-windowed recency buffer of accepted output texts.
///
/// Entries are appended once per completed utterance (rewrite-failure
/// fallbacks cache the raw text). Entries older than the window are purged
/// lazily, on the next read — never eagerly.
pub struct PromptContextCache {
    entries: Vec<CacheEntry>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl PromptContextCache {
    /// Creates a cache with the default 120s window and system clock.
    pub fn new() -> Self {
        Self::with_window(defaults::CONTEXT_WINDOW)
    }

    /// Creates a cache with a custom recency window.
    pub fn with_window(window: Duration) -> Self {
        Self {
            entries: Vec::new(),
            window,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock (for deterministic testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Appends an accepted text. Empty texts are not cached.
    pub fn push(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        self.entries.push(CacheEntry {
            text: trimmed.to_string(),
            accepted_at: self.clock.now(),
        });
    }

    /// Returns texts inside the recency window, newest first.
    ///
    /// Purges expired entries as a side effect; a purged entry is gone for
    /// good and cannot resurface on a later read.
    pub fn recent_texts_newest_first(&mut self) -> Vec<String> {
        let now = self.clock.now();
        let window = self.window;
        self.entries
            .retain(|e| now.saturating_duration_since(e.accepted_at) <= window);
        self.entries.iter().rev().map(|e| e.text.clone()).collect()
    }

    /// Number of entries currently held (including not-yet-purged ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for PromptContextCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Tokenizer access the context builder needs from a recognizer.
pub trait ContextTokenizer {
    /// Tokenizes text with the model's vocabulary.
    fn tokenize(&self, text: &str) -> Result<Vec<i32>>;

    /// Whether a token is a model special token (never fed as context).
    fn is_special_token(&self, token: i32) -> bool;
}

/// Builds decoder context from cached texts.
///
/// Walks `texts` newest-first, tokenizing each with a leading space and
/// dropping special tokens. Whole texts are accepted greedily while the
/// running token count stays within `budget`; the first text that would
/// exceed it stops the walk — partial-text context is worse than none, so
/// texts are never truncated mid-way. The accepted set is returned in
/// chronological order. If the newest text alone exceeds the budget, the
/// context is empty, not partially filled.
pub fn build_prompt_context(
    texts_newest_first: &[String],
    tokenizer: &dyn ContextTokenizer,
    budget: usize,
) -> Vec<String> {
    let mut accepted: Vec<String> = Vec::new();
    let mut used = 0usize;

    for text in texts_newest_first {
        let tokens = match tokenizer.tokenize(&format!(" {}", text)) {
            Ok(tokens) => tokens,
            // A text the vocabulary cannot encode is useless as context;
            // it also ends the walk so ordering stays contiguous.
            Err(_) => break,
        };
        let count = tokens
            .iter()
            .filter(|t| !tokenizer.is_special_token(**t))
            .count();
        if used + count > budget {
            break;
        }
        used += count;
        accepted.push(text.clone());
    }

    accepted.reverse();
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::error::SottoError;

    /// One token per whitespace-separated word; ids below 0 are special.
    struct WordTokenizer {
        fail: bool,
    }

    impl WordTokenizer {
        fn new() -> Self {
            Self { fail: false }
        }
    }

    impl ContextTokenizer for WordTokenizer {
        fn tokenize(&self, text: &str) -> Result<Vec<i32>> {
            if self.fail {
                return Err(SottoError::RecognitionFailed {
                    message: "tokenizer failure".to_string(),
                });
            }
            Ok(text.split_whitespace().map(|_| 1).collect())
        }

        fn is_special_token(&self, token: i32) -> bool {
            token < 0
        }
    }

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    // ── Cache ────────────────────────────────────────────────────────────

    #[test]
    fn cache_returns_newest_first() {
        let mut cache = PromptContextCache::new();
        cache.push("first");
        cache.push("second");
        cache.push("third");
        assert_eq!(
            cache.recent_texts_newest_first(),
            vec!["third", "second", "first"]
        );
    }

    #[test]
    fn cache_excludes_entries_older_than_window() {
        let clock = Arc::new(MockClock::new());
        let mut cache =
            PromptContextCache::with_window(Duration::from_secs(120)).with_clock(clock.clone());

        cache.push("old"); // t=0
        clock.advance(Duration::from_secs(130));
        cache.push("fresh"); // t=130

        assert_eq!(cache.recent_texts_newest_first(), vec!["fresh"]);
    }

    #[test]
    fn purged_entries_never_resurface() {
        let clock = Arc::new(MockClock::new());
        let mut cache =
            PromptContextCache::with_window(Duration::from_secs(120)).with_clock(clock.clone());

        cache.push("old");
        clock.advance(Duration::from_secs(130));
        assert!(cache.recent_texts_newest_first().is_empty());
        assert_eq!(cache.len(), 0, "purge removes the entry for good");
        assert!(cache.recent_texts_newest_first().is_empty());
    }

    #[test]
    fn purge_is_lazy_not_eager() {
        let clock = Arc::new(MockClock::new());
        let mut cache =
            PromptContextCache::with_window(Duration::from_secs(120)).with_clock(clock.clone());

        cache.push("old");
        clock.advance(Duration::from_secs(130));
        cache.push("fresh");
        // No read happened yet: the expired entry is still held.
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.recent_texts_newest_first(), vec!["fresh"]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_ignores_empty_text() {
        let mut cache = PromptContextCache::new();
        cache.push("");
        cache.push("   ");
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_entry_exactly_at_window_edge_is_kept() {
        let clock = Arc::new(MockClock::new());
        let mut cache =
            PromptContextCache::with_window(Duration::from_secs(120)).with_clock(clock.clone());
        cache.push("edge");
        clock.advance(Duration::from_secs(120));
        assert_eq!(cache.recent_texts_newest_first(), vec!["edge"]);
    }

    // ── Builder ──────────────────────────────────────────────────────────

    #[test]
    fn builder_accepts_whole_texts_within_budget() {
        let tokenizer = WordTokenizer::new();
        // Newest first: "c" (3 words), "b" (4 words), "a" (5 words).
        let texts = vec![words(3), words(4), words(5)];
        let context = build_prompt_context(&texts, &tokenizer, 12);
        // All fit (3+4+5=12), returned oldest first.
        assert_eq!(context, vec![words(5), words(4), words(3)]);
    }

    #[test]
    fn builder_stops_at_first_text_exceeding_budget() {
        let tokenizer = WordTokenizer::new();
        let texts = vec![words(3), words(10), words(2)];
        let context = build_prompt_context(&texts, &tokenizer, 8);
        // 3 fits; 3+10 would exceed; the walk stops — the 2-word text is
        // older than the rejected one and must not be considered.
        assert_eq!(context, vec![words(3)]);
    }

    #[test]
    fn builder_never_truncates_a_text() {
        let tokenizer = WordTokenizer::new();
        let texts = vec![words(5), words(6)];
        let context = build_prompt_context(&texts, &tokenizer, 8);
        assert_eq!(context, vec![words(5)]);
    }

    #[test]
    fn oversized_newest_text_yields_empty_context() {
        let tokenizer = WordTokenizer::new();
        let texts = vec![words(200), words(2)];
        let context = build_prompt_context(&texts, &tokenizer, 111);
        assert!(context.is_empty(), "empty, not partially filled");
    }

    #[test]
    fn builder_with_no_texts() {
        let tokenizer = WordTokenizer::new();
        assert!(build_prompt_context(&[], &tokenizer, 111).is_empty());
    }

    #[test]
    fn tokenizer_failure_ends_the_walk() {
        let tokenizer = WordTokenizer { fail: true };
        let texts = vec![words(2)];
        assert!(build_prompt_context(&texts, &tokenizer, 111).is_empty());
    }

    #[test]
    fn special_tokens_do_not_count_against_budget() {
        struct SpecialHeavyTokenizer;
        impl ContextTokenizer for SpecialHeavyTokenizer {
            fn tokenize(&self, text: &str) -> Result<Vec<i32>> {
                // One real token per word plus a special marker each.
                let mut tokens = Vec::new();
                for _ in text.split_whitespace() {
                    tokens.push(1);
                    tokens.push(-1);
                }
                Ok(tokens)
            }
            fn is_special_token(&self, token: i32) -> bool {
                token < 0
            }
        }

        let texts = vec![words(4)];
        let context = build_prompt_context(&texts, &SpecialHeavyTokenizer, 4);
        assert_eq!(context, vec![words(4)]);
    }
}
