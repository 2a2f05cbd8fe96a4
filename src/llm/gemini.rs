use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{
    Config, CAPTION_INSTRUCTION, EXPAND_PROMPT_TEMPLATE, RESTYLE_PROMPT_TEMPLATE,
};
use crate::llm::media::ImageUpload;
use crate::llm::service::{PromptService, PromptServiceError};
use crate::prompt::{GeneratedPrompt, TemplateId};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
        #[serde(default)]
        thought: bool,
    },
    Other(Value),
}

/// Connection and sampling settings for the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub max_output_tokens: i32,
    pub safety_profile: String,
    pub timeout: Duration,
}

impl GeminiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.clone(),
            api_base: config.gemini_api_base.clone(),
            model: config.gemini_model.clone(),
            temperature: config.gemini_temperature,
            top_k: config.gemini_top_k,
            top_p: config.gemini_top_p,
            max_output_tokens: config.gemini_max_output_tokens,
            safety_profile: config.gemini_safety_settings.clone(),
            timeout: Duration::from_secs(config.gemini_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaFlavor {
    Expand,
    Restyle,
}

pub struct GeminiPromptService {
    settings: GeminiSettings,
    client: Client,
}

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n?(.*?)\n?```$").expect("valid code fence regex")
});

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn build_safety_settings(profile: &str) -> Vec<Value> {
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        "permissive" => "OFF",
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}', using permissive defaults.",
                profile
            );
            "OFF"
        }
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
    ]
}

fn prompt_response_schema(flavor: SchemaFlavor) -> Value {
    let (prompt_desc, tags_desc, camera_desc, lighting_desc, palette_desc, composition_desc, seed_desc) =
        match flavor {
            SchemaFlavor::Expand => (
                "The main, detailed descriptive prompt for the AI image generator.",
                "An array of keywords describing the artistic style.",
                "Details about the camera lens, angle, and shot type (e.g., 50mm lens, eye-level shot).",
                "A description of the lighting (e.g., soft natural sunlight, cinematic lighting).",
                "A description of the color palette (e.g., vibrant greens and blues, warm tones).",
                "How the scene is framed (e.g., rule of thirds, centered subject).",
                "A random integer for reproducibility.",
            ),
            SchemaFlavor::Restyle => (
                "The main, detailed descriptive prompt for the AI image generator, merging the new subject with the old style.",
                "An array of keywords describing the artistic style, based on the provided style guide.",
                "Details about the camera lens, angle, and shot type, based on the style guide.",
                "A description of the lighting, based on the style guide.",
                "A description of the color palette, based on the style guide.",
                "How the scene is framed, based on the style guide.",
                "A new random integer for reproducibility.",
            ),
        };

    json!({
        "type": "OBJECT",
        "properties": {
            "prompt": { "type": "STRING", "description": prompt_desc },
            "negative_prompt": {
                "type": "STRING",
                "description": "A comma-separated list of things to avoid in the image (e.g., blurry, low quality, text)."
            },
            "style_tags": { "type": "ARRAY", "items": { "type": "STRING" }, "description": tags_desc },
            "camera": { "type": "STRING", "description": camera_desc },
            "lighting": { "type": "STRING", "description": lighting_desc },
            "color_palette": { "type": "STRING", "description": palette_desc },
            "composition": { "type": "STRING", "description": composition_desc },
            "seed": { "type": "INTEGER", "description": seed_desc },
        },
        "required": [
            "prompt", "negative_prompt", "style_tags", "camera",
            "lighting", "color_palette", "composition", "seed"
        ],
    })
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

fn summarize_gemini_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let summarized_contents: Vec<Value> = contents
            .iter()
            .map(|content| {
                let role = content
                    .get("role")
                    .and_then(|value| value.as_str())
                    .unwrap_or("user");
                let parts = content
                    .get("parts")
                    .and_then(|value| value.as_array())
                    .map(|parts| summarize_gemini_parts(parts))
                    .unwrap_or_default();
                json!({ "role": role, "parts": parts })
            })
            .collect();
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        let mut config = config.clone();
        if let Some(object) = config.as_object_mut() {
            if object.remove("responseSchema").is_some() {
                object.insert("responseSchema".to_string(), json!("<prompt schema>"));
            }
        }
        summary.insert("generationConfig".to_string(), config);
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut other_parts = 0usize;
    let mut text_preview = None;

    for candidate in response.candidates.as_deref().unwrap_or(&[]) {
        let parts = candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.as_deref())
            .unwrap_or(&[]);
        for part in parts {
            match part {
                GeminiPart::Text { text, .. } => {
                    text_parts += 1;
                    if text_preview.is_none() && !text.trim().is_empty() {
                        text_preview = Some(truncate_for_log(text, 200));
                    }
                }
                GeminiPart::Other(_) => other_parts += 1,
            }
        }
    }

    json!({
        "candidates": response.candidates.as_ref().map(|candidates| candidates.len()).unwrap_or(0),
        "textParts": text_parts,
        "otherParts": other_parts,
        "textPreview": text_preview
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

/// Concatenates the first candidate's non-thought text parts. Parts can split
/// a JSON string literal, so they are joined as-is and only the result is trimmed.
fn extract_text_from_response(response: &GeminiResponse) -> String {
    let parts = response
        .candidates
        .as_deref()
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.content.as_ref())
        .and_then(|content| content.parts.as_deref())
        .unwrap_or(&[]);
    let mut text = String::new();
    for part in parts {
        if let GeminiPart::Text { text: chunk, thought } = part {
            if !*thought {
                text.push_str(chunk);
            }
        }
    }
    text.trim().to_string()
}

/// A blocked request is a backend refusal; any other empty reply is treated
/// as malformed when structured output was requested.
fn empty_response_error(response: &GeminiResponse, structured: bool) -> PromptServiceError {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        return PromptServiceError::Service(format!("request blocked by Gemini ({reason})"));
    }
    let finish_reason = response
        .candidates
        .as_deref()
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.finish_reason.as_deref());
    let message = match finish_reason {
        Some(reason) => format!("Gemini returned no text (finishReason={reason})"),
        None => "Gemini returned no text".to_string(),
    };
    if structured {
        PromptServiceError::Schema(message)
    } else {
        PromptServiceError::Service(message)
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    CODE_FENCE
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
        .map(|inner| inner.as_str().trim())
        .unwrap_or(trimmed)
}

/// Validates model output against the [`GeneratedPrompt`] shape.
pub fn parse_generated_prompt(text: &str) -> Result<GeneratedPrompt, PromptServiceError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(PromptServiceError::Schema("empty structured response".to_string()));
    }

    let value: Value = serde_json::from_str(body).map_err(|err| {
        PromptServiceError::Schema(format!(
            "response is not JSON ({err}): {}",
            truncate_for_log(body, 200)
        ))
    })?;
    if !value.is_object() {
        return Err(PromptServiceError::Schema(format!(
            "expected a JSON object, got {}",
            truncate_for_log(&value.to_string(), 200)
        )));
    }

    serde_json::from_value::<GeneratedPrompt>(value)
        .map_err(|err| PromptServiceError::Schema(err.to_string()))
}

fn render_expand_instruction(caption: &str, template: TemplateId) -> String {
    EXPAND_PROMPT_TEMPLATE
        .replace("{template}", template.as_str())
        .replace("{caption}", caption)
}

fn render_restyle_instruction(caption: &str, style_source: &GeneratedPrompt) -> String {
    let style_json = style_source
        .style()
        .to_pretty_json()
        .lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    RESTYLE_PROMPT_TEMPLATE
        .replace("{style_json}", &style_json)
        .replace("{caption}", caption)
}

impl GeminiPromptService {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            settings,
            client: get_http_client().clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.api_base, self.settings.model
        )
    }

    fn redact_api_key(&self, text: &str) -> String {
        let key = self.settings.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    fn generation_config(&self, flavor: Option<SchemaFlavor>) -> Value {
        let mut config = json!({
            "temperature": self.settings.temperature,
            "topK": self.settings.top_k,
            "topP": self.settings.top_p,
            "maxOutputTokens": self.settings.max_output_tokens,
        });
        if let (Some(flavor), Some(object)) = (flavor, config.as_object_mut()) {
            object.insert("responseMimeType".to_string(), json!("application/json"));
            object.insert("responseSchema".to_string(), prompt_response_schema(flavor));
        }
        config
    }

    fn build_caption_payload(&self, image: &ImageUpload) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "inlineData": { "mimeType": image.mime_type, "data": image.base64_data() } },
                    { "text": CAPTION_INSTRUCTION },
                ],
            }],
            "generationConfig": self.generation_config(None),
            "safetySettings": build_safety_settings(&self.settings.safety_profile),
        })
    }

    fn build_structured_payload(&self, instruction: &str, flavor: SchemaFlavor) -> Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": instruction }] }],
            "generationConfig": self.generation_config(Some(flavor)),
            "safetySettings": build_safety_settings(&self.settings.safety_profile),
        })
    }

    async fn call_gemini_api(&self, payload: &Value) -> Result<GeminiResponse, PromptServiceError> {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(payload);
            debug!(target: "llm.gemini", model = %self.settings.model, payload = %payload_summary);
        }

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.settings.api_key)
            .timeout(self.settings.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                let err_text = self.redact_api_key(&err.to_string());
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect()
                );
                PromptServiceError::Service(format!("Gemini request failed: {err_text}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!("Gemini API error: status={}, body={}", status, body_summary);
            let detail = self.redact_api_key(&message.unwrap_or(body_summary));
            return Err(PromptServiceError::Service(format!(
                "Gemini request failed with status {status}: {detail}"
            )));
        }

        let value = response.json::<GeminiResponse>().await.map_err(|err| {
            PromptServiceError::Service(format!("failed to decode Gemini response: {err}"))
        })?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let response_summary = summarize_gemini_response(&value);
            debug!(target: "llm.gemini", model = %self.settings.model, response = %response_summary);
        }
        Ok(value)
    }

    async fn generate_structured(
        &self,
        operation: &str,
        instruction: String,
        flavor: SchemaFlavor,
        metadata: Value,
    ) -> Result<GeneratedPrompt, PromptServiceError> {
        let payload = self.build_structured_payload(&instruction, flavor);
        log_llm_timing(
            "gemini",
            &self.settings.model,
            operation,
            Some(metadata),
            move || async move {
                let response = self.call_gemini_api(&payload).await?;
                let text = extract_text_from_response(&response);
                if text.is_empty() {
                    return Err(empty_response_error(&response, true));
                }
                parse_generated_prompt(&text)
            },
        )
        .await
    }
}

#[async_trait]
impl PromptService for GeminiPromptService {
    async fn caption(&self, image: &ImageUpload) -> Result<String, PromptServiceError> {
        let payload = self.build_caption_payload(image);
        let metadata = json!({ "mimeType": image.mime_type, "bytes": image.bytes.len() });
        log_llm_timing(
            "gemini",
            &self.settings.model,
            "caption",
            Some(metadata),
            move || async move {
                let response = self.call_gemini_api(&payload).await?;
                let caption = extract_text_from_response(&response);
                if caption.is_empty() {
                    return Err(empty_response_error(&response, false));
                }
                Ok(caption)
            },
        )
        .await
    }

    async fn expand(
        &self,
        caption: &str,
        template: TemplateId,
    ) -> Result<GeneratedPrompt, PromptServiceError> {
        self.generate_structured(
            "expand",
            render_expand_instruction(caption, template),
            SchemaFlavor::Expand,
            json!({ "template": template.as_str() }),
        )
        .await
    }

    async fn restyle(
        &self,
        new_caption: &str,
        style_source: &GeneratedPrompt,
    ) -> Result<GeneratedPrompt, PromptServiceError> {
        self.generate_structured(
            "restyle",
            render_restyle_instruction(new_caption, style_source),
            SchemaFlavor::Restyle,
            json!({ "styleTags": style_source.style_tags.len() }),
        )
        .await
    }
}
