//! Heuristic detection of image generation tools.
//!
//! There is no reliable tool taxonomy at the host boundary, so classification
//! is substring matching over names and descriptions. False negatives let an
//! image tool escape budgeting, false positives throttle an unrelated tool.

use dashmap::DashSet;

use crate::tool::ToolDefinition;

const IMAGE_GENERATION_PHRASE: &str = "image generation";
const IMAGE_TOKEN: &str = "image";
const ACTION_TOKENS: [&str; 3] = ["generate", "generation", "create"];
const COMPACT_TOKENS: [&str; 3] = ["generate_image", "image_generate", "imagegen"];
const NORMALIZED_FORM: &str = "generateimage";

/// Tool names confirmed to be image tools, built up as tools are observed.
#[derive(Debug, Default)]
pub struct ImageToolRegistry {
    names: DashSet<String>,
}

impl ImageToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the name was not known before.
    pub fn insert(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.names.insert(name.to_string())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name.trim())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ImageToolClassifier {
    registry: ImageToolRegistry,
}

impl ImageToolClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a tool name, display name or description denotes an
    /// image tool. Rules are checked in order and the first match wins.
    pub fn is_image_tool(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        if self.registry.contains(text) {
            return true;
        }
        looks_like_image_tool(text)
    }

    pub fn is_image_tool_definition(&self, def: &ToolDefinition) -> bool {
        if self.registry.contains(&def.name) {
            return true;
        }
        let haystack = [
            Some(def.name.as_str()),
            def.display_name.as_deref(),
            Some(def.description.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        looks_like_image_tool(&haystack)
    }

    /// Record a confirmed image tool name.
    pub fn remember(&self, name: &str) -> bool {
        self.registry.insert(name)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn known_tools(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn registry(&self) -> &ImageToolRegistry {
        &self.registry
    }
}

/// Registry-free part of the heuristic.
pub fn looks_like_image_tool(text: &str) -> bool {
    let text = text.to_lowercase();
    if text.is_empty() {
        return false;
    }

    if text.contains(IMAGE_GENERATION_PHRASE) {
        return true;
    }

    if text.contains(IMAGE_TOKEN) && ACTION_TOKENS.iter().any(|token| text.contains(token)) {
        return true;
    }

    if COMPACT_TOKENS.iter().any(|token| text.contains(token)) {
        return true;
    }

    let normalized: String = text.chars().filter(|c| c.is_alphanumeric()).collect();
    normalized == NORMALIZED_FORM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_generation_phrase_matches_in_any_case() {
        let classifier = ImageToolClassifier::new();
        for text in [
            "image generation",
            "Image Generation",
            "Runs IMAGE GENERATION through the backend",
            "stable-diffusion image generation v2",
        ] {
            assert!(classifier.is_image_tool(text), "{text}");
        }
    }

    #[test]
    fn image_with_action_token_matches() {
        let classifier = ImageToolClassifier::new();
        assert!(classifier.is_image_tool("imageCreate"));
        assert!(classifier.is_image_tool("GenerateImage"));
        assert!(classifier.is_image_tool("create an image from a prompt"));
        assert!(classifier.is_image_tool("sd_image_generation"));
    }

    #[test]
    fn compact_tokens_match() {
        let classifier = ImageToolClassifier::new();
        assert!(classifier.is_image_tool("generate_image"));
        assert!(classifier.is_image_tool("comfy_imagegen"));
        assert!(classifier.is_image_tool("IMAGE_GENERATE"));
        assert!(looks_like_image_tool("Generate-Image"));
    }

    #[test]
    fn near_misses_do_not_match() {
        let classifier = ImageToolClassifier::new();
        assert!(!classifier.is_image_tool("imagine"));
        assert!(!classifier.is_image_tool("describe_image"));
        assert!(!classifier.is_image_tool("generate_text"));
        assert!(!classifier.is_image_tool(""));
        assert!(!classifier.is_image_tool("   "));
    }

    #[test]
    fn known_registry_names_match_exactly() {
        let classifier = ImageToolClassifier::new();
        assert!(!classifier.is_image_tool("Painter"));

        assert!(classifier.remember("Painter"));
        assert!(!classifier.remember("Painter"));

        assert!(classifier.is_image_tool("Painter"));
        assert!(!classifier.is_image_tool("painter"));
        assert_eq!(classifier.known_tools(), vec!["Painter".to_string()]);
    }

    #[test]
    fn registry_ignores_blank_names() {
        let registry = ImageToolRegistry::new();
        assert!(!registry.insert("  "));
        assert!(registry.is_empty());
    }
}
