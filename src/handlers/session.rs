use parking_lot::Mutex;
use tracing::info;

use crate::llm::media::ImageUpload;
use crate::llm::service::PromptService;
use crate::prompt::{ExportKind, TemplateId};
use crate::state::{Session, StateMachine, SubmitPlan};
use crate::utils::timing::ActionTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Results,
    Failed,
    /// A reset or newer submit overtook this one.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateOutcome {
    Applied,
    Failed,
    Discarded,
    /// No caption to expand, or not showing results.
    Ignored,
}

/// Drives the state machine across the remote calls.
///
/// The lock is only taken around synchronous transitions, never across an
/// `.await`, so intents issued while a call is outstanding are handled
/// immediately and the late response is checked against the current
/// generation when it lands.
pub struct PromptForge<S> {
    service: S,
    machine: Mutex<StateMachine>,
}

impl<S: PromptService> PromptForge<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            machine: Mutex::new(StateMachine::new()),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.machine.lock().session().clone()
    }

    pub async fn submit_image(&self, image: ImageUpload) -> SubmitOutcome {
        let ticket = self.machine.lock().begin_submit(image);
        let mut timer = ActionTimer::start(
            "submit_image",
            ticket.generation,
            Some(ticket.image.describe()),
        );

        let caption = match self.service.caption(&ticket.image).await {
            Ok(caption) => caption,
            Err(err) => {
                let applied = self.machine.lock().fail_submit(&ticket, &err);
                return finish_submit_timer(&mut timer, applied, SubmitOutcome::Failed);
            }
        };
        info!("Caption for generation {}: {}", ticket.generation, caption);

        let Some(plan) = self.machine.lock().record_caption(&ticket, caption.clone()) else {
            timer.complete("discarded");
            return SubmitOutcome::Discarded;
        };

        let result = match &plan {
            SubmitPlan::Expand(template) => self.service.expand(&caption, *template).await,
            SubmitPlan::Restyle(style_source) => {
                self.service.restyle(&caption, style_source).await
            }
        };

        let mut machine = self.machine.lock();
        match result {
            Ok(prompt) => {
                let applied = machine.finish_submit(&ticket, &plan, prompt);
                finish_submit_timer(&mut timer, applied, SubmitOutcome::Results)
            }
            Err(err) => {
                let applied = machine.fail_submit(&ticket, &err);
                finish_submit_timer(&mut timer, applied, SubmitOutcome::Failed)
            }
        }
    }

    pub async fn change_template(&self, template: TemplateId) -> TemplateOutcome {
        let Some(ticket) = self.machine.lock().begin_template_change(template) else {
            info!("Ignoring template change to {}: no results to re-expand", template);
            return TemplateOutcome::Ignored;
        };
        let mut timer = ActionTimer::start(
            "change_template",
            ticket.generation,
            Some(template.to_string()),
        );

        let result = self.service.expand(&ticket.caption, template).await;
        let succeeded = result.is_ok();
        let applied = self.machine.lock().complete_template_change(&ticket, result);

        let outcome = match (applied, succeeded) {
            (false, _) => TemplateOutcome::Discarded,
            (true, true) => TemplateOutcome::Applied,
            (true, false) => TemplateOutcome::Failed,
        };
        timer.complete(match outcome {
            TemplateOutcome::Applied => "success",
            TemplateOutcome::Failed => "error",
            _ => "discarded",
        });
        outcome
    }

    pub fn reset(&self) {
        self.machine.lock().reset();
        info!("Session reset");
    }

    pub fn apply_style_to_new_image(&self) -> bool {
        let applied = self.machine.lock().apply_style_to_new_image();
        if applied {
            info!("Style queued for the next image");
        }
        applied
    }

    pub fn export(&self, kind: ExportKind) -> Option<String> {
        self.machine.lock().export(kind)
    }
}

fn finish_submit_timer(
    timer: &mut ActionTimer,
    applied: bool,
    outcome: SubmitOutcome,
) -> SubmitOutcome {
    if !applied {
        timer.complete("discarded");
        return SubmitOutcome::Discarded;
    }
    timer.complete(match outcome {
        SubmitOutcome::Results => "success",
        _ => "error",
    });
    outcome
}
