pub mod gemini;
pub mod media;
pub mod service;

pub use gemini::{GeminiPromptService, GeminiSettings};
