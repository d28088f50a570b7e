//! # Bootstrap orchestrator
//!
//! Runs stages strictly in order: apply desired state, then wait for it to
//! converge. A required stage's failure aborts the run and every later
//! stage is reported `Skipped`; an optional stage's failure is recorded as
//! `Warned` and the run continues. Every stage gets exactly one outcome.

use crate::backoff::RetryPolicy;
use crate::error::Error;
use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One step of the bootstrap pipeline.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    /// Name shown in the report, e.g. `credentials:aws`.
    fn name(&self) -> String;

    /// Required stages abort the pipeline on failure.
    fn required(&self) -> bool;

    /// Why the stage has nothing to do, if so.
    fn skip_reason(&self) -> Option<String> {
        None
    }

    /// Push desired state to the cluster. Retried on transient errors.
    async fn apply(&self, cancel: &CancellationToken) -> Result<(), Error>;

    /// Wait for the applied state to report healthy.
    async fn converge(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        Ok(())
    }

    /// Human-readable explanation gathered after a failure.
    async fn diagnose(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum StageOutcome {
    Succeeded,
    Failed(String),
    Skipped(String),
    Warned(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub name: String,
    pub required: bool,
    pub outcome: StageOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    pub elapsed_ms: u64,
}

/// Per-stage outcomes of one run, in stage order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    pub stages: Vec<StageReport>,
}

impl PipelineResult {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn failed(&self) -> bool {
        self.stages
            .iter()
            .any(|s| matches!(s.outcome, StageOutcome::Failed(_)))
    }

    pub fn warned(&self) -> bool {
        self.stages
            .iter()
            .any(|s| matches!(s.outcome, StageOutcome::Warned(_)))
    }

    /// 0 on success, 1 when a required stage failed, 2 when only optional
    /// stages warned.
    pub fn exit_code(&self) -> u8 {
        if self.failed() {
            1
        } else if self.warned() {
            2
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub async fn run(&self, stages: &[Box<dyn Stage>], cancel: &CancellationToken) -> PipelineResult {
        let mut result = PipelineResult::default();
        let mut abort: Option<String> = None;

        for stage in stages {
            let name = stage.name();
            let required = stage.required();
            let skip = abort.clone().or_else(|| stage.skip_reason());
            if let Some(reason) = skip {
                info!("Skipping stage {}: {}", name, reason);
                result.stages.push(StageReport {
                    name,
                    required,
                    outcome: StageOutcome::Skipped(reason),
                    diagnostics: Vec::new(),
                    elapsed_ms: 0,
                });
                continue;
            }

            info!("Running stage {}", name);
            let started = Instant::now();
            let (outcome, diagnostics) = match self.run_stage(stage.as_ref(), cancel).await {
                Ok(()) => {
                    info!("Stage {} succeeded", name);
                    (StageOutcome::Succeeded, Vec::new())
                }
                Err(e) => {
                    let reason = e.to_string();
                    let mut diagnostics = stage.diagnose().await;
                    if let Error::Convergence(convergence) = &e {
                        if let Some(last) = convergence.last_snapshot() {
                            diagnostics.push(format!(
                                "{}: last seen installed={} healthy={}",
                                last.resource, last.installed, last.healthy
                            ));
                        }
                    }
                    if required {
                        error!("Required stage {} failed: {}", name, reason);
                        abort = Some(format!("stage {} failed", name));
                        (StageOutcome::Failed(reason), diagnostics)
                    } else {
                        warn!("Optional stage {} failed: {}", name, reason);
                        (StageOutcome::Warned(reason), diagnostics)
                    }
                }
            };
            if abort.is_none() && cancel.is_cancelled() {
                abort = Some("cancelled".to_string());
            }
            result.stages.push(StageReport {
                name,
                required,
                outcome,
                diagnostics,
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
        }
        result
    }

    async fn run_stage(&self, stage: &dyn Stage, cancel: &CancellationToken) -> Result<(), Error> {
        let mut backoff = self.retry.backoff();
        let mut attempt = 1;
        loop {
            match stage.apply(cancel).await {
                Ok(()) => break,
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = backoff.next_backoff();
                    warn!(
                        "Stage {} apply failed (attempt {}/{}): {}, retrying in {:?}",
                        stage.name(),
                        attempt,
                        self.retry.max_attempts,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
        stage.converge(cancel).await
    }
}
