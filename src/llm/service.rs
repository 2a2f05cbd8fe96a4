use async_trait::async_trait;

use crate::llm::media::ImageUpload;
use crate::prompt::{GeneratedPrompt, TemplateId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptServiceError {
    /// Transport or backend failure.
    #[error("prompt service request failed: {0}")]
    Service(String),
    /// The backend answered, but not with a usable structured prompt.
    #[error("prompt service returned malformed data: {0}")]
    Schema(String),
}

impl PromptServiceError {
    pub const fn kind(&self) -> &'static str {
        match self {
            PromptServiceError::Service(_) => "service",
            PromptServiceError::Schema(_) => "schema",
        }
    }
}

/// The three remote operations the session depends on.
///
/// Each call is a single request/response round trip; implementations must
/// validate structured output before returning it.
#[async_trait]
pub trait PromptService: Send + Sync {
    /// Describes the image in one sentence, with surrounding whitespace trimmed.
    async fn caption(&self, image: &ImageUpload) -> Result<String, PromptServiceError>;

    async fn expand(
        &self,
        caption: &str,
        template: TemplateId,
    ) -> Result<GeneratedPrompt, PromptServiceError>;

    /// Merges the subject of `new_caption` with the style fields of `style_source`.
    async fn restyle(
        &self,
        new_caption: &str,
        style_source: &GeneratedPrompt,
    ) -> Result<GeneratedPrompt, PromptServiceError>;
}
