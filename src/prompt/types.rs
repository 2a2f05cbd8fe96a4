use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Structured prompt returned by the backend for downstream image generators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPrompt {
    pub prompt: String,
    pub negative_prompt: String,
    pub style_tags: Vec<String>,
    pub camera: String,
    pub lighting: String,
    pub color_palette: String,
    pub composition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

/// The style-only projection of a [`GeneratedPrompt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleProfile {
    pub style_tags: Vec<String>,
    pub camera: String,
    pub lighting: String,
    pub color_palette: String,
    pub composition: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    PromptText,
    StyleJson,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown export '{0}' (expected prompt or style)")]
pub struct UnknownExport(pub String);

impl FromStr for ExportKind {
    type Err = UnknownExport;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "prompt" | "text" => Ok(ExportKind::PromptText),
            "style" | "json" => Ok(ExportKind::StyleJson),
            _ => Err(UnknownExport(value.trim().to_string())),
        }
    }
}

impl GeneratedPrompt {
    pub fn style(&self) -> StyleProfile {
        StyleProfile {
            style_tags: self.style_tags.clone(),
            camera: self.camera.clone(),
            lighting: self.lighting.clone(),
            color_palette: self.color_palette.clone(),
            composition: self.composition.clone(),
        }
    }

    pub fn export(&self, kind: ExportKind) -> String {
        match kind {
            ExportKind::PromptText => self.prompt.clone(),
            ExportKind::StyleJson => self.style().to_pretty_json(),
        }
    }
}

impl StyleProfile {
    pub fn to_pretty_json(&self) -> String {
        // Plain strings and a string list always serialize.
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
pub(crate) fn sample_prompt(prompt: &str) -> GeneratedPrompt {
    GeneratedPrompt {
        prompt: prompt.to_string(),
        negative_prompt: "blurry, low quality, text".to_string(),
        style_tags: vec!["photorealistic".to_string(), "golden hour".to_string()],
        camera: "50mm lens, eye-level shot".to_string(),
        lighting: "soft natural sunlight".to_string(),
        color_palette: "warm oranges and teal shadows".to_string(),
        composition: "rule of thirds".to_string(),
        seed: Some(42),
    }
}
