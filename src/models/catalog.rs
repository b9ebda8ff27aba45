//! Whisper model catalog.

/// Metadata for one model variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    /// Variant identifier ("tiny.en", "base", "large").
    pub name: &'static str,
    /// Approximate download size in megabytes.
    pub size_mb: u32,
    /// SHA-256 checksum; `None` skips verification after download.
    pub sha256: Option<&'static str>,
    /// Download URL (whisper.cpp ggml builds on HuggingFace).
    pub url: &'static str,
    /// English-only variant.
    pub english_only: bool,
    /// Whether the variant decodes stably when primed with prompt context.
    /// Larger variants drift when primed, so only the small ones opt in.
    pub context_stable: bool,
}

pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "tiny.en",
        size_mb: 75,
        sha256: None,
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-tiny.en.bin",
        english_only: true,
        context_stable: true,
    },
    ModelInfo {
        name: "tiny",
        size_mb: 75,
        sha256: None,
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-tiny.bin",
        english_only: false,
        context_stable: true,
    },
    ModelInfo {
        name: "base.en",
        size_mb: 142,
        sha256: None,
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.en.bin",
        english_only: true,
        context_stable: true,
    },
    ModelInfo {
        name: "base",
        size_mb: 142,
        sha256: None,
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.bin",
        english_only: false,
        context_stable: true,
    },
    ModelInfo {
        name: "small.en",
        size_mb: 466,
        sha256: None,
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-small.en.bin",
        english_only: true,
        context_stable: true,
    },
    ModelInfo {
        name: "small",
        size_mb: 466,
        sha256: None,
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-small.bin",
        english_only: false,
        context_stable: true,
    },
    ModelInfo {
        name: "medium.en",
        size_mb: 1533,
        sha256: None,
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-medium.en.bin",
        english_only: true,
        context_stable: false,
    },
    ModelInfo {
        name: "medium",
        size_mb: 1533,
        sha256: None,
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-medium.bin",
        english_only: false,
        context_stable: false,
    },
    ModelInfo {
        name: "large",
        size_mb: 3094,
        sha256: None,
        url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-large-v3.bin",
        english_only: false,
        context_stable: false,
    },
];

/// Normalizes user-provided names: accepts "ggml-base.bin", "base.bin", or
/// "base" interchangeably.
pub fn resolve_name(name: &str) -> &str {
    name.trim_start_matches("ggml-")
        .trim_end_matches(".bin")
        .trim_start_matches("ggml-")
}

pub fn get_model(name: &str) -> Option<&'static ModelInfo> {
    let resolved = resolve_name(name);
    MODELS.iter().find(|m| m.name == resolved)
}

pub fn list_models() -> &'static [ModelInfo] {
    MODELS
}

/// Default variant: multilingual `base`, small enough to decode on a
/// laptop CPU while keeping prompt context stable.
pub fn default_model() -> &'static ModelInfo {
    MODELS
        .iter()
        .find(|m| m.name == crate::defaults::DEFAULT_MODEL)
        .unwrap_or(&MODELS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_variants() {
        let model = get_model("tiny.en").unwrap();
        assert_eq!(model.name, "tiny.en");
        assert!(model.english_only);
        assert!(model.context_stable);
        assert!(get_model("nonexistent").is_none());
    }

    #[test]
    fn lookup_accepts_file_style_names() {
        assert_eq!(get_model("ggml-base.bin").unwrap().name, "base");
        assert_eq!(get_model("small.en.bin").unwrap().name, "small.en");
    }

    #[test]
    fn only_small_variants_are_context_stable() {
        for model in MODELS {
            let expected = matches!(
                model.name,
                "tiny" | "tiny.en" | "base" | "base.en" | "small" | "small.en"
            );
            assert_eq!(model.context_stable, expected, "variant {}", model.name);
        }
    }

    #[test]
    fn default_model_exists_in_catalog() {
        let default = default_model();
        assert!(get_model(default.name).is_some());
    }

    #[test]
    fn catalog_names_are_unique() {
        let mut names: Vec<_> = MODELS.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MODELS.len());
    }
}
