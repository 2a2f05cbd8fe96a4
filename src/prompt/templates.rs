use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateId {
    Simple,
    Detailed,
    Cinematic,
    Portrait,
    Cartoon,
}

impl TemplateId {
    pub const fn as_str(self) -> &'static str {
        match self {
            TemplateId::Simple => "simple",
            TemplateId::Detailed => "detailed",
            TemplateId::Cinematic => "cinematic",
            TemplateId::Portrait => "portrait",
            TemplateId::Cartoon => "cartoon",
        }
    }

    pub fn template(self) -> &'static Template {
        // Every id has exactly one registry entry.
        TEMPLATES
            .iter()
            .find(|template| template.id == self)
            .unwrap_or(&TEMPLATES[DEFAULT_TEMPLATE_INDEX])
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown template '{0}' (expected one of: simple, detailed, cinematic, portrait, cartoon)")]
pub struct UnknownTemplate(pub String);

impl FromStr for TemplateId {
    type Err = UnknownTemplate;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_lowercase();
        TEMPLATES
            .iter()
            .find(|template| {
                template.id.as_str() == lowered || template.display_name.to_lowercase() == lowered
            })
            .map(|template| template.id)
            .ok_or_else(|| UnknownTemplate(value.trim().to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    pub id: TemplateId,
    pub display_name: &'static str,
    pub icon: &'static str,
}

pub static TEMPLATES: [Template; 5] = [
    Template {
        id: TemplateId::Simple,
        display_name: "Simple",
        icon: "document-text",
    },
    Template {
        id: TemplateId::Detailed,
        display_name: "Detailed",
        icon: "sparkles",
    },
    Template {
        id: TemplateId::Cinematic,
        display_name: "Cinematic",
        icon: "film",
    },
    Template {
        id: TemplateId::Portrait,
        display_name: "Portrait",
        icon: "user",
    },
    Template {
        id: TemplateId::Cartoon,
        display_name: "Cartoon",
        icon: "pencil",
    },
];

const DEFAULT_TEMPLATE_INDEX: usize = 1;

/// Template used for the first expansion of a freshly captioned image.
pub fn default_template() -> &'static Template {
    &TEMPLATES[DEFAULT_TEMPLATE_INDEX]
}
