use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

/// Tracks one user intent from receipt until its outcome is applied.
#[derive(Debug)]
pub struct ActionTimer {
    action: String,
    generation: u64,
    detail: Option<String>,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    completed: bool,
}

impl ActionTimer {
    pub fn start(action: &str, generation: u64, detail: Option<String>) -> Self {
        let timer = ActionTimer {
            action: action.to_string(),
            generation,
            detail,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            completed: false,
        };
        info!(
            target: "forge.timing",
            "event=action_received action={} generation={} received_at={} detail={}",
            timer.action,
            timer.generation,
            timer.started_at.to_rfc3339(),
            timer.detail.clone().unwrap_or_default()
        );
        timer
    }

    pub fn complete(&mut self, status: &str) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.status = status.to_string();
        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: "forge.timing",
            "event=action_completed action={} generation={} started_at={} completed_at={} duration_s={:.3} status={}",
            self.action,
            self.generation,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            self.status
        );
    }
}

impl Drop for ActionTimer {
    fn drop(&mut self) {
        if !self.completed {
            self.complete("abandoned");
        }
    }
}

pub async fn log_llm_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "forge.timing",
        "event=llm_request provider={} model={} operation={} started_at={} metadata={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "forge.timing",
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        model,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}
