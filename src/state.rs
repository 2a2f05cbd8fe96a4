use tracing::{debug, info, warn};

use crate::llm::media::ImageUpload;
use crate::llm::service::PromptServiceError;
use crate::prompt::{default_template, ExportKind, GeneratedPrompt, TemplateId};

pub const SUBMIT_ERROR_MESSAGE: &str =
    "An error occurred while processing the image. Please try again.";
pub const TEMPLATE_ERROR_MESSAGE: &str = "Failed to generate a new variation.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Upload,
    Processing,
    Results,
}

/// Everything the front end renders. Replaced wholesale on reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub phase: Phase,
    pub image: Option<ImageUpload>,
    pub image_url: Option<String>,
    pub caption: Option<String>,
    pub current_prompt: Option<GeneratedPrompt>,
    pub active_template: Option<TemplateId>,
    pub pending_style_transfer: Option<GeneratedPrompt>,
    pub last_error: Option<String>,
    pub is_expanding: bool,
}

/// How a fresh caption is turned into a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitPlan {
    Expand(TemplateId),
    Restyle(GeneratedPrompt),
}

#[derive(Debug, Clone)]
pub struct SubmitTicket {
    pub generation: u64,
    pub image: ImageUpload,
}

#[derive(Debug, Clone)]
pub struct ExpansionTicket {
    pub generation: u64,
    pub sequence: u64,
    pub template: TemplateId,
    pub caption: String,
}

/// Pure transitions over a [`Session`].
///
/// `generation` moves on every submit, reset and style hand-off; responses
/// carrying an older generation are dropped. `expansion_sequence` orders
/// template changes so only the most recent one lands.
#[derive(Debug, Default)]
pub struct StateMachine {
    session: Session,
    generation: u64,
    expansion_sequence: u64,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn begin_submit(&mut self, image: ImageUpload) -> SubmitTicket {
        self.generation += 1;
        let session = &mut self.session;
        session.image_url = Some(image.data_url());
        session.image = Some(image.clone());
        session.caption = None;
        session.current_prompt = None;
        session.active_template = None;
        session.last_error = None;
        session.is_expanding = false;
        session.phase = Phase::Processing;
        debug!(
            "Submit started: generation={} image={} pending_style={}",
            self.generation,
            image.describe(),
            session.pending_style_transfer.is_some()
        );
        SubmitTicket {
            generation: self.generation,
            image,
        }
    }

    fn is_current_submit(&self, ticket: &SubmitTicket) -> bool {
        ticket.generation == self.generation && self.session.phase == Phase::Processing
    }

    /// Stores the caption and picks the expansion branch. `None` means the
    /// ticket is stale and the flow must stop.
    pub fn record_caption(&mut self, ticket: &SubmitTicket, caption: String) -> Option<SubmitPlan> {
        if !self.is_current_submit(ticket) {
            info!(
                "Discarding stale caption for generation {} (current {})",
                ticket.generation, self.generation
            );
            return None;
        }
        self.session.caption = Some(caption);
        Some(match &self.session.pending_style_transfer {
            Some(style_source) => SubmitPlan::Restyle(style_source.clone()),
            None => SubmitPlan::Expand(default_template().id),
        })
    }

    pub fn finish_submit(
        &mut self,
        ticket: &SubmitTicket,
        plan: &SubmitPlan,
        prompt: GeneratedPrompt,
    ) -> bool {
        if !self.is_current_submit(ticket) || self.session.caption.is_none() {
            info!(
                "Discarding stale prompt for generation {} (current {})",
                ticket.generation, self.generation
            );
            return false;
        }
        let session = &mut self.session;
        session.current_prompt = Some(prompt);
        session.pending_style_transfer = None;
        session.active_template = match plan {
            SubmitPlan::Expand(template) => Some(*template),
            SubmitPlan::Restyle(_) => None,
        };
        session.phase = Phase::Results;
        true
    }

    pub fn fail_submit(&mut self, ticket: &SubmitTicket, err: &PromptServiceError) -> bool {
        if !self.is_current_submit(ticket) {
            info!(
                "Discarding stale {} error for generation {}: {}",
                err.kind(),
                ticket.generation,
                err
            );
            return false;
        }
        warn!("Image processing failed ({}): {}", err.kind(), err);
        let session = &mut self.session;
        session.phase = Phase::Upload;
        session.image = None;
        session.image_url = None;
        session.caption = None;
        session.current_prompt = None;
        session.active_template = None;
        session.pending_style_transfer = None;
        session.last_error = Some(SUBMIT_ERROR_MESSAGE.to_string());
        true
    }

    /// Starts a re-expansion of the current caption. Only valid in `Results`.
    pub fn begin_template_change(&mut self, template: TemplateId) -> Option<ExpansionTicket> {
        if self.session.phase != Phase::Results {
            return None;
        }
        let caption = self
            .session
            .caption
            .as_deref()
            .filter(|caption| !caption.trim().is_empty())?
            .to_string();
        self.expansion_sequence += 1;
        self.session.is_expanding = true;
        self.session.last_error = None;
        Some(ExpansionTicket {
            generation: self.generation,
            sequence: self.expansion_sequence,
            template,
            caption,
        })
    }

    pub fn complete_template_change(
        &mut self,
        ticket: &ExpansionTicket,
        result: Result<GeneratedPrompt, PromptServiceError>,
    ) -> bool {
        if ticket.generation != self.generation || self.session.phase != Phase::Results {
            info!(
                "Discarding {} expansion from generation {} (current {})",
                ticket.template, ticket.generation, self.generation
            );
            return false;
        }
        if ticket.sequence != self.expansion_sequence {
            info!(
                "Discarding superseded {} expansion #{} (latest #{})",
                ticket.template, ticket.sequence, self.expansion_sequence
            );
            return false;
        }

        let session = &mut self.session;
        match result {
            Ok(prompt) => {
                session.current_prompt = Some(prompt);
                session.active_template = Some(ticket.template);
            }
            Err(err) => {
                warn!(
                    "Template change to {} failed ({}): {}",
                    ticket.template,
                    err.kind(),
                    err
                );
                session.last_error = Some(TEMPLATE_ERROR_MESSAGE.to_string());
            }
        }
        session.is_expanding = false;
        true
    }

    pub fn reset(&mut self) {
        self.generation += 1;
        self.session = Session::default();
    }

    /// Hands the current prompt's style to the next submitted image.
    pub fn apply_style_to_new_image(&mut self) -> bool {
        if self.session.phase != Phase::Results {
            return false;
        }
        let Some(prompt) = self.session.current_prompt.take() else {
            return false;
        };
        self.generation += 1;
        self.session = Session {
            pending_style_transfer: Some(prompt),
            ..Session::default()
        };
        true
    }

    pub fn export(&self, kind: ExportKind) -> Option<String> {
        self.session
            .current_prompt
            .as_ref()
            .map(|prompt| prompt.export(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::media::png_bytes;
    use crate::prompt::types::sample_prompt;

    fn image() -> ImageUpload {
        ImageUpload::from_bytes(png_bytes(2, 2), Some("a.png".to_string())).unwrap()
    }

    fn machine_in_results(prompt: GeneratedPrompt) -> StateMachine {
        let mut machine = StateMachine::new();
        let ticket = machine.begin_submit(image());
        let plan = machine
            .record_caption(&ticket, "a red bicycle".to_string())
            .unwrap();
        assert!(machine.finish_submit(&ticket, &plan, prompt));
        machine
    }

    fn service_error() -> PromptServiceError {
        PromptServiceError::Service("boom".to_string())
    }

    #[test]
    fn initial_session_is_empty_upload() {
        let machine = StateMachine::new();
        assert_eq!(machine.session(), &Session::default());
        assert_eq!(machine.session().phase, Phase::Upload);
    }

    #[test]
    fn submit_uses_default_template_without_pending_style() {
        let mut machine = StateMachine::new();
        let ticket = machine.begin_submit(image());
        assert_eq!(machine.session().phase, Phase::Processing);
        assert!(machine.session().image.is_some());
        assert!(machine.session().current_prompt.is_none());

        let plan = machine
            .record_caption(&ticket, "a red bicycle".to_string())
            .unwrap();
        assert_eq!(plan, SubmitPlan::Expand(TemplateId::Detailed));

        let p1 = sample_prompt("P1");
        assert!(machine.finish_submit(&ticket, &plan, p1.clone()));
        let session = machine.session();
        assert_eq!(session.phase, Phase::Results);
        assert_eq!(session.caption.as_deref(), Some("a red bicycle"));
        assert_eq!(session.current_prompt.as_ref(), Some(&p1));
        assert_eq!(session.active_template, Some(TemplateId::Detailed));
        assert!(session
            .image_url
            .as_deref()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn submit_failure_returns_to_upload_and_clears_everything() {
        let mut machine = StateMachine::new();
        let ticket = machine.begin_submit(image());
        machine.record_caption(&ticket, "caption".to_string()).unwrap();
        assert!(machine.fail_submit(&ticket, &service_error()));

        let session = machine.session();
        assert_eq!(session.phase, Phase::Upload);
        assert!(session.image.is_none());
        assert!(session.image_url.is_none());
        assert!(session.caption.is_none());
        assert!(session.current_prompt.is_none());
        assert_eq!(session.last_error.as_deref(), Some(SUBMIT_ERROR_MESSAGE));
    }

    #[test]
    fn apply_style_then_submit_restyles_and_consumes_pending() {
        let p1 = sample_prompt("P1");
        let mut machine = machine_in_results(p1.clone());
        assert!(machine.apply_style_to_new_image());
        assert_eq!(machine.session().phase, Phase::Upload);
        assert_eq!(machine.session().pending_style_transfer.as_ref(), Some(&p1));
        assert!(machine.session().caption.is_none());
        assert!(machine.session().image.is_none());

        let ticket = machine.begin_submit(image());
        let plan = machine
            .record_caption(&ticket, "a sleeping cat".to_string())
            .unwrap();
        assert_eq!(plan, SubmitPlan::Restyle(p1));

        let p2 = sample_prompt("P2");
        assert!(machine.finish_submit(&ticket, &plan, p2.clone()));
        let session = machine.session();
        assert_eq!(session.phase, Phase::Results);
        assert_eq!(session.current_prompt.as_ref(), Some(&p2));
        assert!(session.pending_style_transfer.is_none());
        assert_eq!(session.active_template, None);
    }

    #[test]
    fn failed_restyle_also_consumes_pending() {
        let mut machine = machine_in_results(sample_prompt("P1"));
        machine.apply_style_to_new_image();
        let ticket = machine.begin_submit(image());
        assert!(machine.fail_submit(&ticket, &PromptServiceError::Schema("bad".into())));
        assert!(machine.session().pending_style_transfer.is_none());
        assert_eq!(machine.session().phase, Phase::Upload);
    }

    #[test]
    fn apply_style_is_ignored_outside_results() {
        let mut machine = StateMachine::new();
        assert!(!machine.apply_style_to_new_image());
        machine.begin_submit(image());
        assert!(!machine.apply_style_to_new_image());
        assert_eq!(machine.session().phase, Phase::Processing);
    }

    #[test]
    fn template_change_keeps_phase_caption_and_image() {
        let mut machine = machine_in_results(sample_prompt("P1"));
        let url_before = machine.session().image_url.clone();

        let ticket = machine.begin_template_change(TemplateId::Cinematic).unwrap();
        assert!(machine.session().is_expanding);
        assert_eq!(ticket.caption, "a red bicycle");

        let cinematic = sample_prompt("cinematic");
        assert!(machine.complete_template_change(&ticket, Ok(cinematic.clone())));
        let session = machine.session();
        assert_eq!(session.phase, Phase::Results);
        assert!(!session.is_expanding);
        assert_eq!(session.caption.as_deref(), Some("a red bicycle"));
        assert_eq!(session.image_url, url_before);
        assert_eq!(session.current_prompt.as_ref(), Some(&cinematic));
        assert_eq!(session.active_template, Some(TemplateId::Cinematic));
    }

    #[test]
    fn template_change_failure_keeps_previous_prompt() {
        let p1 = sample_prompt("P1");
        let mut machine = machine_in_results(p1.clone());
        let ticket = machine.begin_template_change(TemplateId::Cartoon).unwrap();
        assert!(machine.complete_template_change(&ticket, Err(service_error())));

        let session = machine.session();
        assert_eq!(session.phase, Phase::Results);
        assert_eq!(session.current_prompt.as_ref(), Some(&p1));
        assert_eq!(session.active_template, Some(TemplateId::Detailed));
        assert_eq!(session.last_error.as_deref(), Some(TEMPLATE_ERROR_MESSAGE));
        assert!(!session.is_expanding);
    }

    #[test]
    fn template_change_requires_results() {
        let mut machine = StateMachine::new();
        assert!(machine.begin_template_change(TemplateId::Simple).is_none());
        machine.begin_submit(image());
        assert!(machine.begin_template_change(TemplateId::Simple).is_none());
        assert!(!machine.session().is_expanding);
    }

    #[test]
    fn later_template_change_wins() {
        let mut machine = machine_in_results(sample_prompt("P1"));
        let first = machine.begin_template_change(TemplateId::Cinematic).unwrap();
        let second = machine.begin_template_change(TemplateId::Portrait).unwrap();

        assert!(machine.complete_template_change(&second, Ok(sample_prompt("portrait"))));
        assert!(!machine.complete_template_change(&first, Ok(sample_prompt("cinematic"))));
        assert_eq!(
            machine.session().current_prompt.as_ref().map(|p| p.prompt.as_str()),
            Some("portrait")
        );
        assert_eq!(machine.session().active_template, Some(TemplateId::Portrait));
    }

    #[test]
    fn superseded_expansion_does_not_clear_expanding_flag() {
        let mut machine = machine_in_results(sample_prompt("P1"));
        let first = machine.begin_template_change(TemplateId::Cinematic).unwrap();
        let second = machine.begin_template_change(TemplateId::Portrait).unwrap();

        assert!(!machine.complete_template_change(&first, Err(service_error())));
        assert!(machine.session().is_expanding);
        assert!(machine.session().last_error.is_none());

        assert!(machine.complete_template_change(&second, Ok(sample_prompt("portrait"))));
        assert!(!machine.session().is_expanding);
    }

    #[test]
    fn reset_discards_in_flight_submit() {
        let mut machine = StateMachine::new();
        let ticket = machine.begin_submit(image());
        machine.reset();
        assert!(machine
            .record_caption(&ticket, "late caption".to_string())
            .is_none());
        assert!(!machine.fail_submit(&ticket, &service_error()));
        assert_eq!(machine.session(), &Session::default());
    }

    #[test]
    fn newer_submit_discards_older_result() {
        let mut machine = StateMachine::new();
        let old = machine.begin_submit(image());
        let old_plan = machine.record_caption(&old, "old".to_string()).unwrap();
        let new = machine.begin_submit(image());

        assert!(!machine.finish_submit(&old, &old_plan, sample_prompt("old")));
        assert_eq!(machine.session().phase, Phase::Processing);

        let plan = machine.record_caption(&new, "new".to_string()).unwrap();
        assert!(machine.finish_submit(&new, &plan, sample_prompt("new")));
        assert_eq!(machine.session().caption.as_deref(), Some("new"));
    }

    #[test]
    fn reset_drops_in_flight_template_change() {
        let mut machine = machine_in_results(sample_prompt("P1"));
        let ticket = machine.begin_template_change(TemplateId::Simple).unwrap();
        machine.reset();
        assert!(!machine.complete_template_change(&ticket, Ok(sample_prompt("late"))));
        assert_eq!(machine.session(), &Session::default());
    }

    #[test]
    fn reset_yields_empty_session_from_any_phase() {
        let mut machine = machine_in_results(sample_prompt("P1"));
        machine.apply_style_to_new_image();
        machine.reset();
        assert_eq!(machine.session(), &Session::default());

        let mut machine = machine_in_results(sample_prompt("P1"));
        machine.reset();
        assert_eq!(machine.session(), &Session::default());
    }

    #[test]
    fn export_requires_a_prompt() {
        let machine = StateMachine::new();
        assert!(machine.export(ExportKind::PromptText).is_none());

        let machine = machine_in_results(sample_prompt("P1"));
        assert_eq!(machine.export(ExportKind::PromptText).as_deref(), Some("P1"));
        assert!(machine
            .export(ExportKind::StyleJson)
            .unwrap()
            .contains("\"lighting\""));
    }
}
