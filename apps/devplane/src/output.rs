//! Report rendering: JSON for scripts, aligned text for people.

use crate::cli::OutputFormat;
use crate::commands::Report;
use crate::orchestrator::{PipelineResult, StageOutcome};
use colored::Colorize;
use serde_json::json;

pub fn render(report: &Report, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => render_json(report),
        OutputFormat::Text => Ok(render_text(report)),
    }
}

fn render_json(report: &Report) -> Result<String, serde_json::Error> {
    match report {
        Report::Pipeline(result) => serde_json::to_string_pretty(result),
        Report::Cluster(status) => serde_json::to_string_pretty(status),
        Report::Message(message) => serde_json::to_string_pretty(&json!({ "message": message })),
        Report::Kubeconfig(document) => serde_json::to_string_pretty(&json!({ "kubeconfig": document })),
        Report::Health(snapshots) => serde_json::to_string_pretty(snapshots),
        Report::Credentials(records) => serde_json::to_string_pretty(records),
        Report::Release(state) => serde_json::to_string_pretty(state),
        Report::Releases(states) => serde_json::to_string_pretty(states),
    }
}

fn render_text(report: &Report) -> String {
    match report {
        Report::Pipeline(result) => pipeline(result),
        Report::Cluster(status) => {
            let mut out = if status.exists {
                format!("{} cluster {} exists", "✓".green(), status.name)
            } else {
                format!("{} cluster {} not found", "✗".red(), status.name)
            };
            for node in &status.nodes {
                let marker = if node.is_healthy() { "✓".green() } else { "⚠".yellow() };
                let conditions: Vec<String> = node
                    .conditions
                    .iter()
                    .map(|c| format!("{}={}", c.type_, c.status))
                    .collect();
                out.push_str(&format!("\n  {} {} {}", marker, node.name, conditions.join(" ")));
            }
            out
        }
        Report::Message(message) => format!("{} {}", "✓".green(), message),
        Report::Kubeconfig(document) => document.trim_end().to_string(),
        Report::Health(snapshots) => table(
            &["NAME", "INSTALLED", "HEALTHY"],
            snapshots
                .iter()
                .map(|s| vec![s.resource.clone(), s.installed.to_string(), s.healthy.to_string()])
                .collect(),
            "no plugins installed",
        ),
        Report::Credentials(records) => table(
            &["BACKEND", "SECRET", "PROVIDERCONFIG", "CONFIGURED"],
            records
                .iter()
                .map(|r| {
                    vec![
                        r.backend.to_string(),
                        r.secret_name.clone(),
                        r.config_name.clone(),
                        r.configured.to_string(),
                    ]
                })
                .collect(),
            "no backends",
        ),
        Report::Release(state) if !state.installed => {
            format!("release {} in {} is not installed", state.release, state.namespace)
        }
        Report::Release(state) => format!(
            "release {} in {}: {} (revision {}, chart {})",
            state.release,
            state.namespace,
            state.status.as_deref().unwrap_or("unknown"),
            state.revision.map_or_else(|| "-".to_string(), |r| r.to_string()),
            state.chart.as_deref().unwrap_or("-"),
        ),
        Report::Releases(states) => table(
            &["RELEASE", "NAMESPACE", "REVISION", "STATUS", "CHART"],
            states
                .iter()
                .map(|s| {
                    vec![
                        s.release.clone(),
                        s.namespace.clone(),
                        s.revision.map_or_else(|| "-".to_string(), |r| r.to_string()),
                        s.status.clone().unwrap_or_else(|| "-".to_string()),
                        s.chart.clone().unwrap_or_else(|| "-".to_string()),
                    ]
                })
                .collect(),
            "no releases",
        ),
    }
}

fn pipeline(result: &PipelineResult) -> String {
    let width = result.stages.iter().map(|s| s.name.len()).max().unwrap_or(0);
    let mut lines = Vec::with_capacity(result.stages.len() + 1);
    for stage in &result.stages {
        let (marker, status) = match &stage.outcome {
            StageOutcome::Succeeded => ("✓".green(), "succeeded".to_string()),
            StageOutcome::Failed(reason) => ("✗".red(), format!("failed: {}", reason)),
            StageOutcome::Warned(reason) => ("⚠".yellow(), format!("warning: {}", reason)),
            StageOutcome::Skipped(reason) => ("-".dimmed(), format!("skipped: {}", reason)),
        };
        lines.push(format!(
            "{} {:<width$}  {} ({}ms)",
            marker,
            stage.name,
            status,
            stage.elapsed_ms,
            width = width
        ));
        for diagnostic in &stage.diagnostics {
            lines.push(format!("    {}", diagnostic));
        }
    }
    lines.push(match result.exit_code() {
        0 => "environment ready".to_string(),
        1 => "required stage failed".to_string(),
        _ => "environment ready with warnings".to_string(),
    });
    lines.join("\n")
}

/// Left-aligned columns separated by two spaces.
fn table(headers: &[&str], rows: Vec<Vec<String>>, empty: &str) -> String {
    if rows.is_empty() {
        return empty.to_string();
    }
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut lines = vec![line(headers.to_vec())];
    for row in &rows {
        lines.push(line(row.iter().map(String::as_str).collect()));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Backend, CredentialRecord};
    use crate::installer::ReleaseState;
    use crate::orchestrator::StageReport;

    fn result() -> PipelineResult {
        PipelineResult {
            stages: vec![
                StageReport {
                    name: "cluster".to_string(),
                    required: true,
                    outcome: StageOutcome::Succeeded,
                    diagnostics: Vec::new(),
                    elapsed_ms: 12,
                },
                StageReport {
                    name: "plugins".to_string(),
                    required: true,
                    outcome: StageOutcome::Failed("timed out waiting for health".to_string()),
                    diagnostics: vec!["example-plugin: Healthy - pod crashlooping".to_string()],
                    elapsed_ms: 60_000,
                },
            ],
        }
    }

    #[test]
    fn test_pipeline_json_carries_outcomes_and_diagnostics() {
        let rendered = render(&Report::Pipeline(result()), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["stages"][0]["outcome"]["status"], "succeeded");
        assert_eq!(value["stages"][1]["outcome"]["reason"], "timed out waiting for health");
        assert_eq!(value["stages"][1]["diagnostics"][0], "example-plugin: Healthy - pod crashlooping");
        assert!(value["stages"][0].get("diagnostics").is_none());
    }

    #[test]
    fn test_pipeline_text_lists_diagnostics_under_stage() {
        let rendered = render(&Report::Pipeline(result()), OutputFormat::Text).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[1].contains("failed: timed out waiting for health"));
        assert_eq!(lines[2], "    example-plugin: Healthy - pod crashlooping");
        assert_eq!(*lines.last().unwrap(), "required stage failed");
    }

    #[test]
    fn test_message_json_is_an_object() {
        let rendered = render(&Report::Message("cluster dev deleted".to_string()), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["message"], "cluster dev deleted");
    }

    #[test]
    fn test_table_aligns_columns() {
        let records = vec![
            CredentialRecord {
                backend: Backend::Aws,
                secret_name: "aws-credentials".to_string(),
                config_name: "default".to_string(),
                configured: true,
            },
            CredentialRecord {
                backend: Backend::Azure,
                secret_name: "azure-credentials".to_string(),
                config_name: "default".to_string(),
                configured: false,
            },
        ];
        let rendered = render(&Report::Credentials(records), OutputFormat::Text).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "BACKEND  SECRET             PROVIDERCONFIG  CONFIGURED");
        assert_eq!(lines[1], "aws      aws-credentials    default         true");
        assert_eq!(lines[2], "azure    azure-credentials  default         false");
    }

    #[test]
    fn test_empty_lists_render_placeholder() {
        assert_eq!(render(&Report::Releases(Vec::new()), OutputFormat::Text).unwrap(), "no releases");
        assert_eq!(
            render(&Report::Release(ReleaseState::absent("app", "apps")), OutputFormat::Text).unwrap(),
            "release app in apps is not installed"
        );
    }
}
