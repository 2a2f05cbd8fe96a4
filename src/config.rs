use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub gemini_api_key: String,
    pub gemini_api_base: String,
    pub gemini_model: String,
    pub gemini_temperature: f32,
    pub gemini_top_k: i32,
    pub gemini_top_p: f32,
    pub gemini_max_output_tokens: i32,
    pub gemini_safety_settings: String,
    pub gemini_timeout_seconds: u64,
}

pub static CONFIG: Lazy<Config> = Lazy::new(Config::load);

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn normalize_gemini_safety_settings(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "permissive".to_string();
    }

    match trimmed.to_lowercase().as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to permissive.",
                value
            );
            "permissive".to_string()
        }
    }
}

fn normalize_api_base(value: String) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "https://generativelanguage.googleapis.com".to_string();
    }
    trimmed.to_string()
}

impl Config {
    pub fn load() -> Self {
        Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            log_dir: PathBuf::from(env_string("LOG_DIR", "logs")),
            gemini_api_key: env_string("GEMINI_API_KEY", "").trim().to_string(),
            gemini_api_base: normalize_api_base(env_string(
                "GEMINI_API_BASE",
                "https://generativelanguage.googleapis.com",
            )),
            gemini_model: env_string("GEMINI_MODEL", "gemini-2.5-flash"),
            gemini_temperature: env_f32("GEMINI_TEMPERATURE", 0.7),
            gemini_top_k: env_i32("GEMINI_TOP_K", 40),
            gemini_top_p: env_f32("GEMINI_TOP_P", 0.95),
            gemini_max_output_tokens: env_i32("GEMINI_MAX_OUTPUT_TOKENS", 2048),
            gemini_safety_settings: normalize_gemini_safety_settings(&env_string(
                "GEMINI_SAFETY_SETTINGS",
                "permissive",
            )),
            gemini_timeout_seconds: env_u64("GEMINI_TIMEOUT_SECONDS", 90).max(1),
        }
    }

    /// Checks the settings a running session cannot do without.
    pub fn validate(&self) -> Result<()> {
        if self.gemini_api_key.is_empty() {
            return Err(anyhow!("GEMINI_API_KEY is required"));
        }
        if self.gemini_model.trim().is_empty() {
            return Err(anyhow!("GEMINI_MODEL must not be empty"));
        }
        Ok(())
    }
}

pub const CAPTION_INSTRUCTION: &str = "Describe this image in a single, detailed sentence. This description will be used to generate a prompt for an AI image generator.";

pub const EXPAND_PROMPT_TEMPLATE: &str = r#"Based on the following image description, generate a detailed prompt for an AI image generator.
The desired style is "{template}".

Image description: "{caption}"

Generate the prompt in the following JSON format. Ensure all fields are populated with creative and relevant details that fit the "{template}" style.
The main 'prompt' field should be a rich, descriptive paragraph. The other fields should be specific details that refine the image generation."#;

pub const RESTYLE_PROMPT_TEMPLATE: &str = r#"You are a prompt engineering expert. Your task is to merge the SUBJECT of a new image description with the artistic STYLE of an existing detailed prompt.

1.  **New Image Subject Description**: "{caption}"
2.  **Existing Style Guide (JSON)**:
    ```json
{style_json}
    ```

**Instructions**:
- Create a new, cohesive prompt that describes the subject from (1) using the detailed artistic style from (2).
- The main "prompt" field should be a single, flowing paragraph that beautifully integrates the subject and the style. Do not just list keywords.
- Preserve the stylistic details from the style guide (camera, lighting, etc.) in the new JSON output.
- Generate a new, relevant "negative_prompt".
- Generate a new random "seed".

Output the result in the specified JSON format."#;
