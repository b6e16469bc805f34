//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConstructHasher, ValidationResult};
use crate::model::{ConstructAction, ConstructStatus, Urn};
use crate::orchestrator::{ConstructOutcome, ProgressEvent, RunSummary};
use crate::planner::DeploymentPlan;
use crate::state::{EnvironmentState, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "Wave")]
    wave: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Construct")]
    construct: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Construct row for state display.
#[derive(Tabled)]
struct ConstructRow {
    #[tabled(rename = "Construct")]
    construct: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Outputs")]
    outputs: usize,
    #[tabled(rename = "Hash")]
    hash: String,
}

/// Outcome row for run summaries.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Construct")]
    construct: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when output is machine-readable.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan) -> String {
        let mut output = String::new();
        let _ = write!(output, "\nPlan for {}\n\n", plan.app_urn);

        let rows: Vec<PlanActionRow> = plan
            .waves
            .iter()
            .enumerate()
            .flat_map(|(wave, actions)| {
                actions.iter().map(move |a| PlanActionRow {
                    wave: wave + 1,
                    action: Self::format_action(a.action, a.pending),
                    construct: a.urn.short_name(),
                    status: Self::format_status(a.status),
                    reason: Self::truncate(&a.reason, 40),
                })
            })
            .collect();

        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        for urn in &plan.dropped {
            let _ = writeln!(output, "   {} {urn} (never provisioned)", "forget".dimmed());
        }

        if plan.is_empty() {
            let _ = writeln!(
                output,
                "\n{} No changes required - every construct is up to date.",
                "✓".green()
            );
        } else {
            let _ = writeln!(
                output,
                "\nPlan: {} to create, {} to update, {} to delete across {} waves",
                plan.count(ConstructAction::Create).to_string().green(),
                plan.count(ConstructAction::Update).to_string().yellow(),
                plan.count(ConstructAction::Delete).to_string().red(),
                plan.waves.len()
            );
        }

        output
    }

    /// Formats the result of an `up` or `down` run.
    #[must_use]
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Text => Self::format_summary_text(summary),
        }
    }

    fn format_summary_text(summary: &RunSummary) -> String {
        let mut output = String::new();
        let title = if summary.dry_run.is_dry() {
            format!(
                "{} {} dry run ({}) finished",
                "✓".green(),
                summary.command,
                summary.dry_run
            )
        } else {
            format!("{} {} finished", "✓".green(), summary.command)
        };
        let _ = write!(output, "\n{title} (version {})\n\n", summary.version);

        let rows: Vec<OutcomeRow> = summary
            .outcomes
            .iter()
            .map(|(urn, outcome)| OutcomeRow {
                construct: urn.short_name(),
                outcome: Self::format_outcome(outcome),
            })
            .collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if summary.dry_run.is_dry() {
            let _ = writeln!(
                output,
                "\n   Checked: {}\n   Unchanged: {}",
                summary.previewed(),
                summary.unchanged()
            );
        } else {
            let created = summary.count_status(ConstructStatus::CreateComplete);
            let updated = summary.count_status(ConstructStatus::UpdateComplete);
            let deleted = summary.count_status(ConstructStatus::DeleteComplete);
            let _ = writeln!(output, "\n   Created: {created}");
            let _ = writeln!(output, "   Updated: {updated}");
            let _ = writeln!(output, "   Deleted: {deleted}");
            let _ = writeln!(output, "   Unchanged: {}", summary.unchanged());
            let resources: usize = summary.stacks.values().map(|s| s.resources.len()).sum();
            if resources > 0 {
                let _ = writeln!(output, "   Resources: {resources}");
            }
        }

        output
    }

    /// Formats the environment state document.
    #[must_use]
    pub fn format_state(&self, state: &EnvironmentState, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "state": state, "lock": lock });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_state_text(state, lock),
        }
    }

    fn format_state_text(state: &EnvironmentState, lock: Option<&LockInfo>) -> String {
        let mut output = String::new();

        let _ = write!(output, "\nState: {}\n\n", state.app_urn);
        let _ = writeln!(output, "   Environment: {}", state.environment);
        let _ = writeln!(output, "   Region: {}", state.default_region);
        let _ = writeln!(output, "   Version: {}", state.version);
        let _ = writeln!(output, "   Last updated: {}", state.last_updated);
        let _ = writeln!(output, "   Constructs: {}", state.constructs.len());

        if let Some(lock) = lock {
            let _ = writeln!(
                output,
                "   {} Locked by {} for {} ({}, {}s left)",
                "⚠".yellow(),
                lock.holder,
                lock.command,
                lock.lock_id,
                lock.remaining_secs()
            );
        }

        if !state.constructs.is_empty() {
            let rows: Vec<ConstructRow> = state
                .constructs
                .values()
                .map(|c| ConstructRow {
                    construct: c.urn().short_name(),
                    status: Self::format_status(c.status()),
                    outputs: c.outputs().len(),
                    hash: c
                        .spec_hash()
                        .map_or_else(|| String::from("-"), ConstructHasher::short_hash),
                })
                .collect();
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !state.history.is_empty() {
            let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
            for entry in state.history.iter().rev().take(5) {
                let status = if entry.success { "✓" } else { "✗" };
                let _ = writeln!(
                    output,
                    "     {status} {} - {} ({} constructs)",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.command,
                    entry.constructs.len()
                );
                if let Some(error) = &entry.error {
                    let _ = writeln!(output, "       {}", Self::truncate(error, 100));
                }
            }
        }

        output
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        constructs: usize,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "constructs": constructs,
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Environment description is valid ({constructs} constructs).\n",
                    "✓".green()
                );
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Renders a progress event as a single line, if it deserves one.
    #[must_use]
    pub fn format_event(&self, event: &ProgressEvent) -> Option<String> {
        if self.is_json() {
            return None;
        }
        let line = match event {
            ProgressEvent::RunStarted {
                command,
                waves,
                constructs,
            } => format!(
                "{} {command}: {constructs} constructs in {waves} waves",
                "▶".cyan()
            ),
            ProgressEvent::WaveStarted { index, size } => {
                format!("-- wave {} ({size}) --", index + 1).dimmed().to_string()
            }
            ProgressEvent::ConstructStarted { urn, action } => {
                format!("   {} {}", Self::format_action(*action, true), urn.short_name())
            }
            ProgressEvent::Output { urn, line } => {
                let prefix = urn.as_ref().map_or_else(String::new, Urn::short_name);
                format!("   {} {line}", format!("[{prefix}]").dimmed())
            }
            ProgressEvent::ConstructFinished { urn, outcome } => {
                format!("   {} {}", Self::format_outcome(outcome), urn.short_name())
            }
            ProgressEvent::RunFinished { success } => {
                if *success {
                    format!("{} done", "✓".green())
                } else {
                    format!("{} failed", "✗".red())
                }
            }
        };
        Some(line)
    }

    /// Formats an action with color.
    fn format_action(action: ConstructAction, pending: bool) -> String {
        if !pending {
            return "noop".dimmed().to_string();
        }
        match action {
            ConstructAction::Create => "+create".green().to_string(),
            ConstructAction::Update => "~update".yellow().to_string(),
            ConstructAction::Delete => "-delete".red().to_string(),
        }
    }

    /// Formats a construct status with color.
    fn format_status(status: ConstructStatus) -> String {
        let text = status.to_string();
        match status {
            ConstructStatus::CreateComplete
            | ConstructStatus::UpdateComplete
            | ConstructStatus::DeleteComplete => text.green().to_string(),
            ConstructStatus::CreateFailed
            | ConstructStatus::UpdateFailed
            | ConstructStatus::DeleteFailed => text.red().to_string(),
            ConstructStatus::Creating | ConstructStatus::Updating | ConstructStatus::Deleting => {
                text.yellow().to_string()
            }
            ConstructStatus::CreatePending
            | ConstructStatus::UpdatePending
            | ConstructStatus::DeletePending
            | ConstructStatus::Unknown => text.dimmed().to_string(),
        }
    }

    fn format_outcome(outcome: &ConstructOutcome) -> String {
        match outcome {
            ConstructOutcome::Completed(status) => Self::format_status(*status),
            ConstructOutcome::Previewed => "previewed".cyan().to_string(),
            ConstructOutcome::Compiled => "compiled".cyan().to_string(),
            ConstructOutcome::Generated => "generated".cyan().to_string(),
            ConstructOutcome::Skipped => "unchanged".dimmed().to_string(),
            ConstructOutcome::Failed(message) => {
                format!("{} {}", "failed:".red(), Self::truncate(message, 60))
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstructSpec, ConstructState};
    use crate::planner::PlannedAction;
    use crate::orchestrator::DryRun;
    use crate::state::RunCommand;

    fn urn(id: &str) -> Urn {
        Urn::parse(&format!("urn:acme:shop:dev:web:construct/klotho.aws.Thing:{id}"))
            .expect("valid urn")
    }

    fn plan() -> DeploymentPlan {
        let action = |id: &str, action, pending| PlannedAction {
            urn: urn(id),
            action,
            status: ConstructStatus::CreatePending,
            pending,
            reason: String::from("new construct"),
        };
        DeploymentPlan {
            created_at: chrono::Utc::now(),
            app_urn: Urn::parse("urn:acme:shop:dev:web").expect("valid urn"),
            waves: vec![
                vec![action("db", ConstructAction::Create, true)],
                vec![action("api", ConstructAction::Update, false)],
            ],
            dropped: vec![],
        }
    }

    #[test]
    fn test_plan_text_lists_constructs_and_counts() {
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan());
        assert!(text.contains("db"));
        assert!(text.contains("api"));
        assert!(text.contains("across 2 waves"));
    }

    #[test]
    fn test_plan_json_is_parseable() {
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan());
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["waves"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["waves"][0][0]["action"], "create");
    }

    #[test]
    fn test_state_text_shows_constructs() {
        let mut state = EnvironmentState::new(
            1,
            Urn::parse("urn:acme:shop:dev:web").expect("valid urn"),
            "dev",
            "us-east-1",
        );
        state.insert(ConstructState::new(urn("db"), ConstructSpec::default(), "abcdef0123456789"));

        let text = OutputFormatter::new(OutputFormat::Text).format_state(&state, None);
        assert!(text.contains("us-east-1"));
        assert!(text.contains("Constructs: 1"));
        assert!(text.contains("db"));
    }

    #[test]
    fn test_summary_json_keys_outcomes_by_urn() {
        let mut summary = RunSummary {
            command: RunCommand::Up,
            dry_run: DryRun::Off,
            version: 3,
            waves: 1,
            outcomes: std::collections::BTreeMap::new(),
            stacks: std::collections::BTreeMap::new(),
        };
        summary.outcomes.insert(
            urn("db"),
            ConstructOutcome::Completed(ConstructStatus::CreateComplete),
        );

        let json = OutputFormatter::new(OutputFormat::Json).format_summary(&summary);
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["version"], 3);
        assert_eq!(value["dryRun"], "off");
        assert!(value.get("stacks").is_none());
        assert_eq!(
            value["outcomes"][urn("db").to_string()]["outcome"],
            "completed"
        );
    }

    #[test]
    fn test_dry_run_summary_names_mode() {
        let mut summary = RunSummary {
            command: RunCommand::Up,
            dry_run: DryRun::FileOnly,
            version: 3,
            waves: 1,
            outcomes: std::collections::BTreeMap::new(),
            stacks: std::collections::BTreeMap::new(),
        };
        summary.outcomes.insert(urn("db"), ConstructOutcome::Generated);

        let text = OutputFormatter::new(OutputFormat::Text).format_summary(&summary);
        assert!(text.contains("dry run (file-only)"));
        assert!(text.contains("Checked: 1"));
    }

    #[test]
    fn test_events_are_silent_in_json_mode() {
        let event = ProgressEvent::RunFinished { success: true };
        assert!(OutputFormatter::new(OutputFormat::Json).format_event(&event).is_none());
        assert!(OutputFormatter::new(OutputFormat::Text).format_event(&event).is_some());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééééééé", 6), "ééé...");
    }
}
