//! Deterministic text transforms applied to recognizer output.

pub mod context;
pub mod hallucination;

pub use context::{ContextTokenizer, PromptContextCache, build_prompt_context};
pub use hallucination::{HallucinationFilter, SegmentStats};
