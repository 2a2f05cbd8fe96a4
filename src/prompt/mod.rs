pub mod templates;
pub mod types;

pub use templates::{default_template, TemplateId, TEMPLATES};
pub use types::{ExportKind, GeneratedPrompt};
