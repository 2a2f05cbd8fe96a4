use std::path::PathBuf;

use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use tracing::{error, info};

mod config;
mod handlers;
mod llm;
mod prompt;
mod state;
mod utils;

use config::CONFIG;
use handlers::commands::{run_interactive, run_once, OneShotArgs};
use handlers::session::PromptForge;
use llm::{GeminiPromptService, GeminiSettings};
use prompt::TemplateId;
use utils::logging::init_logging;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Interactive,
    OneShot(OneShotArgs),
    Help,
}

fn usage() -> &'static str {
    "Usage: prompt_forge [IMAGE] [--template <simple|detailed|cinematic|portrait|cartoon>] [--style-from <IMAGE>] [--json]\n\nWithout IMAGE an interactive session starts. Requires GEMINI_API_KEY."
}

fn parse_cli_args(args: &[String]) -> Result<CliMode> {
    let mut image: Option<PathBuf> = None;
    let mut template = None;
    let mut style_from = None;
    let mut json = false;

    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "--template" | "-t" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --template"))?;
                template = Some(value.parse::<TemplateId>()?);
            }
            "--style-from" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --style-from"))?;
                style_from = Some(PathBuf::from(value));
            }
            "--json" => {
                json = true;
            }
            "--help" | "-h" => {
                return Ok(CliMode::Help);
            }
            other if other.starts_with('-') => {
                return Err(anyhow!("Unknown argument: {other}\n{}", usage()));
            }
            other => {
                if image.is_some() {
                    return Err(anyhow!("Only one IMAGE may be given\n{}", usage()));
                }
                image = Some(PathBuf::from(other));
            }
        }
        index += 1;
    }

    match image {
        Some(image) => Ok(CliMode::OneShot(OneShotArgs {
            image,
            template,
            style_from,
            json,
        })),
        None if template.is_some() || style_from.is_some() || json => Err(anyhow!(
            "--template, --style-from and --json need an IMAGE\n{}",
            usage()
        )),
        None => Ok(CliMode::Interactive),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let mode = parse_cli_args(&args)?;
    if mode == CliMode::Help {
        println!("{}", usage());
        return Ok(());
    }

    let _guards = init_logging(&CONFIG);
    CONFIG.validate()?;

    let service = GeminiPromptService::new(GeminiSettings::from_config(&CONFIG));
    info!("Using Gemini model {}", service.model());
    let forge = PromptForge::new(service);

    let result = match mode {
        CliMode::OneShot(one_shot) => run_once(&forge, one_shot).await,
        CliMode::Interactive => run_interactive(&forge).await,
        CliMode::Help => Ok(()),
    };
    if let Err(err) = &result {
        error!("prompt_forge failed: {:#}", err);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        std::iter::once("prompt_forge")
            .chain(values.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn no_arguments_starts_interactive_mode() {
        assert_eq!(parse_cli_args(&args(&[])).unwrap(), CliMode::Interactive);
    }

    #[test]
    fn one_shot_collects_flags() {
        let mode = parse_cli_args(&args(&[
            "cat.webp",
            "--template",
            "cartoon",
            "--style-from",
            "bike.png",
            "--json",
        ]))
        .unwrap();
        assert_eq!(
            mode,
            CliMode::OneShot(OneShotArgs {
                image: PathBuf::from("cat.webp"),
                template: Some(TemplateId::Cartoon),
                style_from: Some(PathBuf::from("bike.png")),
                json: true,
            })
        );
    }

    #[test]
    fn flags_without_image_are_rejected() {
        assert!(parse_cli_args(&args(&["--json"])).is_err());
        assert!(parse_cli_args(&args(&["a.png", "--template"])).is_err());
        assert!(parse_cli_args(&args(&["a.png", "b.png"])).is_err());
        assert!(parse_cli_args(&args(&["a.png", "--template", "neon"])).is_err());
        assert_eq!(parse_cli_args(&args(&["-h"])).unwrap(), CliMode::Help);
    }
}
