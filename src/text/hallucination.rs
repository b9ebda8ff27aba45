//! Hallucination detection and confidence-based suffix trimming.
//!
//! Speech models emit training-data boilerplate ("thanks for watching",
//! subtitle credits) when fed silence or noise. This module classifies and
//! strips those phrases deterministically: a segment-level pass driven by
//! per-segment confidence, then a text-level pass over the joined result.

use crate::defaults;

/// Phrases that are hallucinations regardless of confidence.
///
/// Matched whole-text (strict normalization) and as a trailing suffix
/// (loose normalization).
pub const DEFAULT_HALLUCINATION_PHRASES: &[&str] = &[
    "thank you for watching",
    "thanks for watching",
    "thank you for watching!",
    "please subscribe",
    "don't forget to like and subscribe",
    "subtitles by the amara.org community",
    "subscribe to my channel",
    "see you in the next video",
    "ご視聴ありがとうございました",
    "ご視聴ありがとうございます",
    "最後までご視聴ありがとうございました",
    "チャンネル登録お願いします",
    "チャンネル登録よろしくお願いします",
    "字幕作成者",
];

/// Phrases that are authentic mid-sentence but common hallucinations when
/// they appear alone as a trailing low-confidence segment.
pub const DEFAULT_SUSPICIOUS_PHRASES: &[&str] = &[
    "thank you",
    "thank you.",
    "thanks",
    "bye",
    "bye.",
    "you",
    "okay",
    "yeah",
    "はい",
    "うん",
    "ありがとうございました",
];

/// One recognized segment with the confidence signals the filter needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentStats {
    pub text: String,
    /// Probability that the segment contains no speech.
    pub no_speech_prob: f32,
    /// Mean log-probability of the segment's tokens.
    pub avg_logprob: f32,
}

impl SegmentStats {
    pub fn new(text: impl Into<String>, no_speech_prob: f32, avg_logprob: f32) -> Self {
        Self {
            text: text.into(),
            no_speech_prob,
            avg_logprob,
        }
    }
}

/// Strict normalization: lowercase plus trimmed edges.
fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Loose normalization for suffix matching: lowercase, keep only
/// alphanumeric characters. Punctuation, brackets, and whitespace
/// differences never block a match.
fn normalize_loose(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Hallucination and suspicious-phrase classifier.
#[derive(Debug, Clone)]
pub struct HallucinationFilter {
    /// Strict-normalized hallucination phrases.
    phrases: Vec<String>,
    /// Loose-normalized hallucination phrases, parallel to `phrases`.
    phrases_loose: Vec<String>,
    /// Strict-normalized suspicious phrases.
    suspicious: Vec<String>,
}

impl Default for HallucinationFilter {
    fn default() -> Self {
        Self::new(
            DEFAULT_HALLUCINATION_PHRASES.iter().map(|s| s.to_string()),
            DEFAULT_SUSPICIOUS_PHRASES.iter().map(|s| s.to_string()),
        )
    }
}

impl HallucinationFilter {
    /// Creates a filter from explicit phrase lists (normalized on entry so
    /// runtime comparison is a plain equality check).
    pub fn new<I, J>(phrases: I, suspicious: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        let phrases: Vec<String> = phrases.into_iter().map(|p| normalize(&p)).collect();
        let phrases_loose = phrases.iter().map(|p| normalize_loose(p)).collect();
        Self {
            phrases,
            phrases_loose,
            suspicious: suspicious.into_iter().map(|p| normalize(&p)).collect(),
        }
    }

    /// Extends both lists with user-configured phrases.
    pub fn with_extra_phrases(mut self, phrases: &[String], suspicious: &[String]) -> Self {
        for p in phrases {
            self.phrases.push(normalize(p));
            self.phrases_loose.push(normalize_loose(p));
        }
        for p in suspicious {
            self.suspicious.push(normalize(p));
        }
        self
    }

    /// Whether the whole text is a known hallucination phrase.
    pub fn is_hallucination(&self, text: &str) -> bool {
        let norm = normalize(text);
        if self.phrases.iter().any(|p| *p == norm) {
            return true;
        }
        // Punctuation-only differences should not save a hallucination.
        let loose = normalize_loose(text);
        !loose.is_empty() && self.phrases_loose.iter().any(|p| *p == loose)
    }

    /// Whether the text matches the lower-confidence suspicious list.
    pub fn is_suspicious(&self, text: &str) -> bool {
        let norm = normalize(text);
        let loose = normalize_loose(text);
        self.suspicious
            .iter()
            .any(|p| *p == norm || (!loose.is_empty() && normalize_loose(p) == loose))
    }

    /// Segment-level filter. A segment is discarded when:
    /// - its no-speech probability exceeds the hard threshold, or
    /// - its text is a known hallucination phrase, or
    /// - it is the *last* segment, matches the suspicious list, and its
    ///   confidence signals are weak (suspicious phrases are common
    ///   authentic speech mid-utterance, common hallucinations only when
    ///   spoken alone at low confidence).
    pub fn keep_segment(&self, segment: &SegmentStats, is_last: bool) -> bool {
        if segment.no_speech_prob > defaults::NO_SPEECH_HARD_THRESHOLD {
            return false;
        }
        if self.is_hallucination(&segment.text) {
            return false;
        }
        if is_last
            && self.is_suspicious(&segment.text)
            && (segment.no_speech_prob > defaults::NO_SPEECH_SOFT_THRESHOLD
                || segment.avg_logprob < defaults::AVG_LOGPROB_SUSPECT_THRESHOLD)
        {
            return false;
        }
        true
    }

    /// Two-phase cleanup over a recognizer's raw segment output: drop
    /// low-confidence/hallucinated segments, join the survivors with a
    /// single space, then apply the text-level filter.
    pub fn clean_segments(&self, segments: &[SegmentStats]) -> String {
        let last = segments.len().saturating_sub(1);
        let kept: Vec<&str> = segments
            .iter()
            .enumerate()
            .filter(|(i, seg)| self.keep_segment(seg, *i == last))
            .map(|(_, seg)| seg.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        self.filter_text(kept.join(" ").trim())
    }

    /// Text-level filter: whole-text hallucination match yields the empty
    /// string; a trailing hallucination phrase is stripped, preserving the
    /// leading text verbatim. Identity on non-matching input.
    pub fn filter_text(&self, text: &str) -> String {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        if self.is_hallucination(trimmed) {
            return String::new();
        }
        if let Some(stripped) = self.strip_trailing_phrase(trimmed) {
            return stripped;
        }
        trimmed.to_string()
    }

    /// Attempts to strip one trailing hallucination phrase under loose
    /// normalization. Returns the surviving prefix (re-trimmed) or None
    /// when no phrase matches.
    fn strip_trailing_phrase(&self, text: &str) -> Option<String> {
        let chars: Vec<char> = text.chars().collect();
        for phrase in &self.phrases_loose {
            if phrase.is_empty() {
                continue;
            }
            if let Some(cut) = match_suffix_loose(&chars, phrase) {
                let prefix: String = chars[..cut].iter().collect();
                return Some(prefix.trim().to_string());
            }
        }
        None
    }
}

/// Matches `phrase` (loose-normalized, alphanumeric-only) against the tail
/// of `chars`, skipping punctuation and whitespace in the original text.
/// Returns the index where the matched trailing span begins, or None.
///
/// A match must start at a word boundary for ASCII text so that "watching"
/// never matches inside "overwatching"; CJK text carries no spaces, so the
/// boundary check only applies to ASCII alphanumerics.
fn match_suffix_loose(chars: &[char], phrase: &str) -> Option<usize> {
    let target: Vec<char> = phrase.chars().collect();
    let mut t = target.len();
    let mut i = chars.len();

    while i > 0 {
        let c = chars[i - 1];
        if c.is_alphanumeric() {
            if t == 0 {
                break;
            }
            let lowered = c.to_lowercase().next().unwrap_or(c);
            if lowered != target[t - 1] {
                return None;
            }
            t -= 1;
            i -= 1;
        } else {
            // Trailing or interior punctuation/whitespace: part of the
            // removed span while the match is still open.
            i -= 1;
        }
        if t == 0 {
            // Consume punctuation directly attached to the phrase start?
            // No: the span begins at the first matched character.
            break;
        }
    }

    if t != 0 {
        return None;
    }

    // `i` points at the first matched alphanumeric character.
    if i > 0 {
        let prev = chars[i - 1];
        if prev.is_ascii_alphanumeric() && chars[i].is_ascii_alphanumeric() {
            return None;
        }
    }
    // The entire text matching the phrase is a whole-text case, not a
    // suffix strip; let the caller's whole-text check handle it first.
    Some(i)
}
