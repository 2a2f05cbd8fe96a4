use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::handlers::session::{PromptForge, SubmitOutcome, TemplateOutcome};
use crate::llm::media::ImageUpload;
use crate::llm::service::PromptService;
use crate::prompt::{ExportKind, GeneratedPrompt, TemplateId, TEMPLATES};
use crate::state::{Phase, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Upload(PathBuf),
    Template(TemplateId),
    Templates,
    Copy(ExportKind),
    ApplyStyle,
    Reset,
    Show,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneShotArgs {
    pub image: PathBuf,
    pub template: Option<TemplateId>,
    pub style_from: Option<PathBuf>,
    pub json: bool,
}

pub fn interactive_help() -> &'static str {
    "Commands:\n  upload <path>        caption an image and forge a prompt\n  template <id>        re-expand the caption (simple, detailed, cinematic, portrait, cartoon)\n  templates            list templates\n  copy prompt|style    print the prompt text or the style JSON\n  apply-style          reuse the current style for the next uploaded image\n  reset                start over\n  show                 print the current session\n  help                 show this help\n  quit                 exit"
}

pub fn parse_intent(line: &str) -> Result<Option<Intent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let intent = match command.to_lowercase().as_str() {
        "upload" | "u" => {
            if argument.is_empty() {
                return Err(anyhow!("Usage: upload <path>"));
            }
            Intent::Upload(PathBuf::from(argument))
        }
        "template" | "t" => {
            if argument.is_empty() {
                return Err(anyhow!("Usage: template <id>"));
            }
            Intent::Template(argument.parse::<TemplateId>()?)
        }
        "templates" => Intent::Templates,
        "copy" | "c" => {
            let kind = argument
                .parse::<ExportKind>()
                .map_err(|_| anyhow!("Usage: copy prompt|style"))?;
            Intent::Copy(kind)
        }
        "apply-style" | "apply" => Intent::ApplyStyle,
        "reset" | "start-over" => Intent::Reset,
        "show" | "s" => Intent::Show,
        "help" | "h" | "?" => Intent::Help,
        "quit" | "exit" | "q" => Intent::Quit,
        other => return Err(anyhow!("Unknown command: {other}. Type 'help' for commands.")),
    };
    Ok(Some(intent))
}

pub fn render_templates(active: Option<TemplateId>) -> String {
    TEMPLATES
        .iter()
        .map(|template| {
            let marker = if Some(template.id) == active { "*" } else { " " };
            format!(
                "{marker} {:<10} [{}] {}",
                template.id.as_str(),
                template.icon,
                template.display_name
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_prompt(prompt: &GeneratedPrompt) -> String {
    let mut lines = vec![
        format!("Prompt:\n  {}", prompt.prompt),
        format!("Negative prompt:\n  {}", prompt.negative_prompt),
        format!("Style tags: {}", prompt.style_tags.join(", ")),
        format!("Camera: {}", prompt.camera),
        format!("Lighting: {}", prompt.lighting),
        format!("Color palette: {}", prompt.color_palette),
        format!("Composition: {}", prompt.composition),
    ];
    if let Some(seed) = prompt.seed {
        lines.push(format!("Seed: {seed}"));
    }
    lines.join("\n")
}

pub fn processing_message(session: &Session) -> &'static str {
    if session.pending_style_transfer.is_some() {
        "Applying style to new image..."
    } else {
        "Forging your prompt, please wait..."
    }
}

pub fn render_session(session: &Session) -> String {
    let mut sections = Vec::new();
    match session.phase {
        Phase::Upload => {
            if session.pending_style_transfer.is_some() {
                sections.push(
                    "Style ready. Upload a new image to apply the saved style.".to_string(),
                );
            } else {
                sections.push("Upload an image (PNG, JPEG or WEBP) to begin.".to_string());
            }
        }
        Phase::Processing => sections.push(processing_message(session).to_string()),
        Phase::Results => {
            if let Some(image) = &session.image {
                sections.push(format!("Image: {}", image.describe()));
            }
            if let Some(caption) = &session.caption {
                sections.push(format!("Caption: {caption}"));
            }
            let template = session
                .active_template
                .map(|id| id.template().display_name)
                .unwrap_or("Style transfer");
            sections.push(format!("Template: {template}"));
            if session.is_expanding {
                sections.push("Generating a new variation...".to_string());
            }
            if let Some(prompt) = &session.current_prompt {
                sections.push(render_prompt(prompt));
            }
        }
    }
    if let Some(error) = &session.last_error {
        sections.push(format!("Error: {error}"));
    }
    sections.join("\n\n")
}

async fn load_image(path: &Path) -> Result<ImageUpload> {
    ImageUpload::from_path(path)
        .await
        .with_context(|| format!("Cannot use {}", path.display()))
}

async fn submit_path<S: PromptService>(forge: &PromptForge<S>, path: &Path) -> Result<SubmitOutcome> {
    let image = load_image(path).await?;
    eprintln!("{}", processing_message(&forge.snapshot()));
    Ok(forge.submit_image(image).await)
}

/// Runs one intent. Returns `false` when the loop should stop.
pub async fn handle_intent<S: PromptService>(forge: &PromptForge<S>, intent: Intent) -> bool {
    match intent {
        Intent::Upload(path) => match submit_path(forge, &path).await {
            Ok(_) => println!("{}", render_session(&forge.snapshot())),
            Err(err) => {
                warn!("Rejected upload {}: {:#}", path.display(), err);
                println!("Error: {err:#}");
            }
        },
        Intent::Template(template) => {
            if forge.change_template(template).await == TemplateOutcome::Ignored {
                println!("Upload an image first; templates apply to the current caption.");
            } else {
                println!("{}", render_session(&forge.snapshot()));
            }
        }
        Intent::Templates => println!("{}", render_templates(forge.snapshot().active_template)),
        Intent::Copy(kind) => match forge.export(kind) {
            Some(payload) => println!("{payload}"),
            None => println!("Nothing to copy yet."),
        },
        Intent::ApplyStyle => {
            if forge.apply_style_to_new_image() {
                println!("{}", render_session(&forge.snapshot()));
            } else {
                println!("No prompt to take the style from yet.");
            }
        }
        Intent::Reset => {
            forge.reset();
            println!("{}", render_session(&forge.snapshot()));
        }
        Intent::Show => println!("{}", render_session(&forge.snapshot())),
        Intent::Help => println!("{}", interactive_help()),
        Intent::Quit => return false,
    }
    true
}

pub async fn run_interactive<S: PromptService>(forge: &PromptForge<S>) -> Result<()> {
    println!("{}", render_session(&forge.snapshot()));
    println!("Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match parse_intent(&line) {
            Ok(Some(intent)) => {
                if !handle_intent(forge, intent).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => println!("{err}"),
        }
    }
    info!("Interactive session ended");
    Ok(())
}

fn submit_result(forge_session: &Session, outcome: SubmitOutcome) -> Result<()> {
    match outcome {
        SubmitOutcome::Results => Ok(()),
        _ => Err(anyhow!(
            "{}",
            forge_session
                .last_error
                .clone()
                .unwrap_or_else(|| "Image processing was interrupted.".to_string())
        )),
    }
}

pub async fn run_once<S: PromptService>(forge: &PromptForge<S>, args: OneShotArgs) -> Result<()> {
    if let Some(style_path) = &args.style_from {
        let outcome = submit_path(forge, style_path).await?;
        submit_result(&forge.snapshot(), outcome)?;
        if !forge.apply_style_to_new_image() {
            return Err(anyhow!("No style could be taken from {}", style_path.display()));
        }
    }

    let outcome = submit_path(forge, &args.image).await?;
    submit_result(&forge.snapshot(), outcome)?;

    if let Some(template) = args.template {
        let already_active = forge.snapshot().active_template == Some(template);
        if !already_active && forge.change_template(template).await != TemplateOutcome::Applied {
            let session = forge.snapshot();
            return Err(anyhow!(
                "{}",
                session
                    .last_error
                    .unwrap_or_else(|| format!("Template {template} was not applied"))
            ));
        }
    }

    let session = forge.snapshot();
    if args.json {
        let prompt = session
            .current_prompt
            .as_ref()
            .ok_or_else(|| anyhow!("No prompt was generated"))?;
        println!("{}", serde_json::to_string_pretty(prompt)?);
    } else {
        println!("{}", render_session(&session));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::types::sample_prompt;

    #[test]
    fn parses_commands_and_arguments() {
        assert_eq!(
            parse_intent("upload  ./photos/bike one.png ").unwrap(),
            Some(Intent::Upload(PathBuf::from("./photos/bike one.png")))
        );
        assert_eq!(
            parse_intent("template Cinematic").unwrap(),
            Some(Intent::Template(TemplateId::Cinematic))
        );
        assert_eq!(
            parse_intent("copy style").unwrap(),
            Some(Intent::Copy(ExportKind::StyleJson))
        );
        assert_eq!(parse_intent("apply-style").unwrap(), Some(Intent::ApplyStyle));
        assert_eq!(parse_intent("   ").unwrap(), None);
    }

    #[test]
    fn rejects_bad_commands() {
        assert!(parse_intent("upload").is_err());
        assert!(parse_intent("template neon").is_err());
        assert!(parse_intent("copy image").is_err());
        assert!(parse_intent("dance").is_err());
    }

    #[test]
    fn renders_results_with_template_and_prompt() {
        let session = Session {
            phase: Phase::Results,
            caption: Some("a red bicycle".to_string()),
            current_prompt: Some(sample_prompt("P1")),
            active_template: Some(TemplateId::Detailed),
            ..Session::default()
        };
        let rendered = render_session(&session);
        assert!(rendered.contains("Caption: a red bicycle"));
        assert!(rendered.contains("Template: Detailed"));
        assert!(rendered.contains("Seed: 42"));
    }

    #[test]
    fn upload_screen_mentions_pending_style_and_error() {
        let session = Session {
            pending_style_transfer: Some(sample_prompt("P1")),
            last_error: Some("boom".to_string()),
            ..Session::default()
        };
        let rendered = render_session(&session);
        assert!(rendered.contains("Style ready"));
        assert!(rendered.contains("Error: boom"));
        assert_eq!(processing_message(&session), "Applying style to new image...");
    }

    #[test]
    fn template_list_marks_active_entry() {
        let listing = render_templates(Some(TemplateId::Portrait));
        let portrait = listing
            .lines()
            .find(|line| line.contains("portrait"))
            .unwrap();
        assert!(portrait.starts_with('*'));
        assert_eq!(listing.lines().count(), 5);
    }
}
