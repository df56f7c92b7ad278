// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mission commands
//!
//! Commands: run, status, events, advance, resolve, pause, resume, abort,
//! rebuild, list

use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::{Input, Select};
use futures::StreamExt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use mission_core::application::SubmitRequest;
use mission_core::domain::checkpoint::{
    Checkpoint, CheckpointAction, CheckpointId, CheckpointResponse, CheckpointType,
    RISK_OPTION_SKIP,
};
use mission_core::domain::error::MissionError;
use mission_core::domain::events::{MissionEvent, MissionEventKind};
use mission_core::domain::mission::{Mission, MissionId, MissionMode, MissionStatus};

use crate::embedded::EmbeddedEngine;

#[derive(Subcommand)]
pub enum MissionCommand {
    /// Submit a mission and drive it to completion
    Run {
        /// What the mission should achieve
        #[arg(short, long)]
        objective: String,

        /// Oversight mode
        #[arg(short, long, default_value = "autonomous-automatic")]
        mode: MissionMode,

        /// Spend limit (default: engine.default_budget)
        #[arg(short, long)]
        budget: Option<f64>,

        /// Extra context as a JSON object
        #[arg(long, value_name = "JSON")]
        context: Option<String>,

        /// Answer every checkpoint without prompting
        #[arg(long)]
        auto_approve: bool,

        /// Do not stream events
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show mission status and plan
    Status {
        #[arg(value_name = "MISSION_ID")]
        mission_id: MissionId,
    },

    /// Print the mission event log
    Events {
        #[arg(value_name = "MISSION_ID")]
        mission_id: MissionId,

        /// First sequence number to print
        #[arg(long, default_value = "1")]
        from: u64,

        /// Keep streaming until the mission ends
        #[arg(short, long)]
        follow: bool,
    },

    /// Perform one unit of work on a mission
    Advance {
        #[arg(value_name = "MISSION_ID")]
        mission_id: MissionId,

        /// Keep advancing until the mission suspends or ends
        #[arg(long)]
        drive: bool,
    },

    /// Answer a pending checkpoint
    Resolve {
        #[arg(value_name = "CHECKPOINT_ID")]
        checkpoint_id: CheckpointId,

        /// approve, reject or modify
        #[arg(value_name = "ACTION")]
        action: CheckpointAction,

        /// One of the checkpoint's options (risk decisions: retry, skip, abort)
        #[arg(long)]
        option: Option<String>,

        /// JSON patch for modify
        #[arg(long, value_name = "JSON")]
        patch: Option<String>,

        /// Free-text note recorded with the response
        #[arg(long)]
        note: Option<String>,
    },

    /// Pause a running mission after its current step
    Pause {
        #[arg(value_name = "MISSION_ID")]
        mission_id: MissionId,
    },

    /// Resume a paused mission
    Resume {
        #[arg(value_name = "MISSION_ID")]
        mission_id: MissionId,
    },

    /// Abort a mission
    Abort {
        #[arg(value_name = "MISSION_ID")]
        mission_id: MissionId,

        #[arg(short, long, default_value = "aborted by operator")]
        reason: String,
    },

    /// Rebuild the cached projection from the event log
    Rebuild {
        #[arg(value_name = "MISSION_ID")]
        mission_id: MissionId,
    },

    /// List known missions
    List,
}

pub async fn handle_command(command: MissionCommand, config_path: Option<PathBuf>) -> Result<()> {
    let embedded = EmbeddedEngine::new(config_path).await?;
    if !matches!(command, MissionCommand::Run { .. }) {
        embedded.warn_if_ephemeral();
    }

    match command {
        MissionCommand::Run {
            objective,
            mode,
            budget,
            context,
            auto_approve,
            quiet,
        } => run(&embedded, objective, mode, budget, context, auto_approve, quiet).await,
        MissionCommand::Status { mission_id } => status(&embedded, mission_id).await,
        MissionCommand::Events {
            mission_id,
            from,
            follow,
        } => events(&embedded, mission_id, from, follow).await,
        MissionCommand::Advance { mission_id, drive } => {
            let engine = &embedded.engine;
            let status = if drive {
                engine.drive(mission_id).await?
            } else {
                engine.advance(mission_id).await?
            };
            print_status_line(mission_id, status);
            Ok(())
        }
        MissionCommand::Resolve {
            checkpoint_id,
            action,
            option,
            patch,
            note,
        } => {
            let response = build_response(action, option, patch.as_deref(), note)?;
            let status = embedded
                .engine
                .resolve_checkpoint(checkpoint_id, response)
                .await?;
            println!(
                "{} checkpoint {} → {}",
                "✓".green(),
                checkpoint_id,
                status_label(status)
            );
            Ok(())
        }
        MissionCommand::Pause { mission_id } => {
            let status = embedded.engine.pause(mission_id).await?;
            print_status_line(mission_id, status);
            Ok(())
        }
        MissionCommand::Resume { mission_id } => {
            let status = embedded.engine.resume(mission_id).await?;
            print_status_line(mission_id, status);
            Ok(())
        }
        MissionCommand::Abort { mission_id, reason } => {
            let status = embedded.engine.abort(mission_id, &reason).await?;
            print_status_line(mission_id, status);
            Ok(())
        }
        MissionCommand::Rebuild { mission_id } => {
            let projection = embedded.engine.rebuild(mission_id).await?;
            println!(
                "{} rebuilt mission {} at version {}",
                "✓".green(),
                mission_id,
                projection.version()
            );
            Ok(())
        }
        MissionCommand::List => list(&embedded).await,
    }
}

async fn run(
    embedded: &EmbeddedEngine,
    objective: String,
    mode: MissionMode,
    budget: Option<f64>,
    context: Option<String>,
    auto_approve: bool,
    quiet: bool,
) -> Result<()> {
    let engine = &embedded.engine;

    let mut request = SubmitRequest::new(objective, mode);
    if let Some(budget) = budget {
        request = request.with_budget(budget);
    }
    if let Some(context) = context {
        let value: serde_json::Value =
            serde_json::from_str(&context).context("--context must be valid JSON")?;
        request = request.with_user_context(value);
    }

    let mission_id = engine.submit(request).await?;
    println!("{} {}", "Mission submitted:".bold(), mission_id);

    let printer = (!quiet).then(|| {
        let mut stream = engine.subscribe(mission_id, 1);
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                match event {
                    Ok(event) => println!("{}", render_event(&event)),
                    Err(e) => {
                        eprintln!("{}", format!("Event stream error: {}", e).red());
                        break;
                    }
                }
            }
        })
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = loop {
        match engine.drive_with_cancel(mission_id, &cancel).await {
            Ok(MissionStatus::Checkpoint) => {
                let Some(checkpoint) = engine.pending_checkpoint(mission_id).await? else {
                    break Err(anyhow!("mission {} suspended without a checkpoint", mission_id));
                };
                let response = if auto_approve {
                    auto_response(&checkpoint)
                } else {
                    prompt_checkpoint(&checkpoint)?
                };
                info!(checkpoint_id = %checkpoint.id, action = ?response.action, "Resolving checkpoint");
                engine.resolve_checkpoint(checkpoint.id, response).await?;
            }
            Ok(status) => break Ok(status),
            Err(MissionError::Cancelled(_)) => {
                println!(
                    "{}",
                    "Interrupted; the in-flight step was requeued.".yellow()
                );
                break Ok(engine.get_status(mission_id).await?.status);
            }
            Err(e) => break Err(e.into()),
        }
    };

    if let Some(printer) = printer {
        if matches!(outcome, Ok(status) if status.is_terminal()) {
            let _ = printer.await;
        } else {
            printer.abort();
        }
    }

    let status = outcome?;
    print_status_line(mission_id, status);
    if status == MissionStatus::Completed {
        if let Some(synthesis) = engine
            .list_artifacts(mission_id)
            .await?
            .into_iter()
            .find(|artifact| artifact.step_id.is_none())
        {
            println!();
            println!("{}", synthesis.content);
        }
    }
    Ok(())
}

async fn status(embedded: &EmbeddedEngine, mission_id: MissionId) -> Result<()> {
    let engine = &embedded.engine;
    let mission = engine.get_status(mission_id).await?;
    print_mission(&mission);

    if let Some(checkpoint) = engine.pending_checkpoint(mission_id).await? {
        println!();
        print_checkpoint(&checkpoint);
    }

    let artifacts = engine.list_artifacts(mission_id).await?;
    if !artifacts.is_empty() {
        println!();
        println!("{}", "Artifacts:".bold());
        for artifact in artifacts {
            println!("  {} [{:?}] {}", artifact.id, artifact.artifact_type, artifact.title);
        }
    }
    Ok(())
}

async fn events(
    embedded: &EmbeddedEngine,
    mission_id: MissionId,
    from: u64,
    follow: bool,
) -> Result<()> {
    let engine = &embedded.engine;
    if !follow {
        for event in engine.events(mission_id, from).await? {
            println!("{}", render_event(&event));
        }
        return Ok(());
    }

    let mut stream = engine.subscribe(mission_id, from);
    while let Some(event) = stream.next().await {
        println!("{}", render_event(&event?));
    }
    Ok(())
}

async fn list(embedded: &EmbeddedEngine) -> Result<()> {
    let missions = embedded.engine.list().await?;
    if missions.is_empty() {
        println!("{}", "No missions found".dimmed());
        return Ok(());
    }
    println!(
        "{:<38} {:<12} {:>7}  {}",
        "ID".bold(),
        "STATUS".bold(),
        "VERSION".bold(),
        "OBJECTIVE".bold()
    );
    for summary in missions {
        println!(
            "{:<38} {:<12} {:>7}  {}",
            summary.id,
            status_label(summary.status),
            summary.version,
            truncate(&summary.objective, 60)
        );
    }
    Ok(())
}

/// Response used by `run --auto-approve`: gates and plans are approved,
/// failed steps are skipped.
pub fn auto_response(checkpoint: &Checkpoint) -> CheckpointResponse {
    let response = match checkpoint.checkpoint_type {
        CheckpointType::RiskDecision => CheckpointResponse::choose(RISK_OPTION_SKIP),
        _ => CheckpointResponse::approve(),
    };
    response.with_responder("missionctl --auto-approve")
}

pub fn build_response(
    action: CheckpointAction,
    option: Option<String>,
    patch: Option<&str>,
    note: Option<String>,
) -> Result<CheckpointResponse> {
    let mut response = match action {
        CheckpointAction::Approve => match option {
            Some(option) => CheckpointResponse::choose(option),
            None => CheckpointResponse::approve(),
        },
        CheckpointAction::Reject => CheckpointResponse::reject(),
        CheckpointAction::Modify => {
            let Some(patch) = patch else {
                bail!("modify requires --patch");
            };
            let patch: serde_json::Value =
                serde_json::from_str(patch).context("--patch must be valid JSON")?;
            CheckpointResponse::modify(patch)
        }
    };
    response.note = note;
    Ok(response.with_responder("missionctl"))
}

fn prompt_checkpoint(checkpoint: &Checkpoint) -> Result<CheckpointResponse> {
    println!();
    print_checkpoint(checkpoint);

    let mut choices: Vec<String> = if checkpoint.options.is_empty() {
        vec!["approve".to_string(), "reject".to_string()]
    } else {
        checkpoint.options.clone()
    };
    if checkpoint.step_id.is_some() || checkpoint.checkpoint_type == CheckpointType::PlanApproval {
        choices.push("modify".to_string());
    }

    let selection = Select::new()
        .with_prompt("Decision")
        .items(&choices)
        .default(0)
        .interact()?;

    let response = match choices[selection].as_str() {
        "approve" => CheckpointResponse::approve(),
        "reject" => {
            let note: String = Input::new()
                .with_prompt("Reason (optional)")
                .allow_empty(true)
                .interact_text()?;
            let mut response = CheckpointResponse::reject();
            response.note = (!note.trim().is_empty()).then_some(note);
            response
        }
        "modify" => {
            let hint = if checkpoint.step_id.is_some() {
                r#"{"description": "...", "parameters": {...}}"#
            } else {
                r#"{"steps": [{"position": 0, "description": "..."}]}"#
            };
            let patch: String = Input::new()
                .with_prompt(format!("Patch {}", hint))
                .interact_text()?;
            let patch = serde_json::from_str(&patch).context("Patch must be valid JSON")?;
            CheckpointResponse::modify(patch)
        }
        option => CheckpointResponse::choose(option),
    };
    Ok(response.with_responder("missionctl"))
}

fn print_mission(mission: &Mission) {
    println!("{} {}", "Mission:".bold(), mission.id);
    println!("  Objective: {}", mission.objective);
    println!("  Mode:      {}", mission.mode);
    println!("  Status:    {}", status_label(mission.status));
    println!(
        "  Budget:    {:.4} of {:.4} spent",
        mission.budget_spent, mission.budget_limit
    );
    println!("  Version:   {}", mission.version);
    if let Some(reason) = &mission.reason {
        println!("  Reason:    {}", reason);
    }

    if mission.steps.is_empty() {
        return;
    }
    println!();
    println!("{}", "Plan:".bold());
    for step in &mission.steps {
        let agents = step
            .agents
            .iter()
            .map(|agent| agent.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {}. [{:?}] {} {}",
            step.position + 1,
            step.status,
            step.description,
            format!("({}; {})", step.policy.strategy, agents).dimmed()
        );
        if let Some(error) = &step.error {
            println!("     {}", error.red());
        }
    }
}

fn print_checkpoint(checkpoint: &Checkpoint) {
    println!(
        "{} {} ({})",
        "Checkpoint:".bold().magenta(),
        checkpoint.id,
        checkpoint.checkpoint_type
    );
    println!("  {}", checkpoint.prompt);
    if !checkpoint.context.is_null() {
        if let Ok(context) = serde_json::to_string_pretty(&checkpoint.context) {
            for line in context.lines() {
                println!("  {}", line.dimmed());
            }
        }
    }
    if !checkpoint.options.is_empty() {
        println!("  Options: {}", checkpoint.options.join(", "));
    }
}

fn print_status_line(mission_id: MissionId, status: MissionStatus) {
    println!("Mission {} is {}", mission_id, status_label(status));
}

fn status_label(status: MissionStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        MissionStatus::Completed => label.green(),
        MissionStatus::Failed | MissionStatus::Aborted => label.red(),
        MissionStatus::Checkpoint | MissionStatus::Paused => label.yellow(),
        _ => label.normal(),
    }
}

/// One line per event for terminal output.
pub fn render_event(event: &MissionEvent) -> String {
    let prefix = format!("[{:>4}]", event.sequence).dimmed();
    let body = match &event.kind {
        MissionEventKind::MissionSubmitted {
            objective, mode, budget_limit, ..
        } => format!(
            "{} ({}, budget {:.2}): {}",
            "Submitted".bold(),
            mode,
            budget_limit,
            objective
        ),
        MissionEventKind::BriefingStarted => "Briefing".bold().to_string(),
        MissionEventKind::PlanGenerated {
            steps, unassigned, cost,
        } => {
            let mut line = format!("{} {} step(s), cost {:.4}", "Plan".bold(), steps.len(), cost);
            if !unassigned.is_empty() {
                line.push_str(&format!(", {} unassigned", unassigned.len()).red().to_string());
            }
            line
        }
        MissionEventKind::MissionReady => "Ready".to_string(),
        MissionEventKind::MissionStarted => "Started".bold().to_string(),
        MissionEventKind::StepAssigned { step_id, agents } => format!(
            "Step {} assigned to {}",
            step_id,
            agents.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(", ")
        ),
        MissionEventKind::StepStarted { step_id, attempt } => {
            format!("{} {} (attempt {})", "Step".yellow(), step_id, attempt)
        }
        MissionEventKind::StepCompleted {
            step_id, result, cost,
        } => format!(
            "{} {} {} (confidence {:.2}, cost {:.4})",
            "Step".yellow(),
            step_id,
            "completed".green(),
            result.confidence,
            cost
        ),
        MissionEventKind::StepFailed { step_id, error, .. } => {
            format!("{} {} {}: {}", "Step".yellow(), step_id, "failed".red(), error)
        }
        MissionEventKind::StepRequeued { step_id, reason, .. } => {
            format!("{} {} requeued: {}", "Step".yellow(), step_id, reason)
        }
        MissionEventKind::StepApproved { step_id } => {
            format!("{} {} approved", "Step".yellow(), step_id)
        }
        MissionEventKind::StepRevised { supersedes, step } => format!(
            "{} {} revised as {} (revision {})",
            "Step".yellow(),
            supersedes,
            step.id,
            step.revision
        ),
        MissionEventKind::StepSkipped { step_id, reason } => {
            format!("{} {} skipped: {}", "Step".yellow(), step_id, reason)
        }
        MissionEventKind::CheckpointRaised { checkpoint } => format!(
            "{} {} ({}): {}",
            "Checkpoint".magenta(),
            checkpoint.id,
            checkpoint.checkpoint_type,
            checkpoint.prompt
        ),
        MissionEventKind::CheckpointResolved {
            checkpoint_id, status, ..
        } => format!("{} {} {:?}", "Checkpoint".magenta(), checkpoint_id, status),
        MissionEventKind::ArtifactProduced { artifact } => format!(
            "{} [{:?}] {}",
            "Artifact".cyan(),
            artifact.artifact_type,
            artifact.title
        ),
        MissionEventKind::MissionPaused => "Paused".yellow().to_string(),
        MissionEventKind::MissionResumed => "Resumed".to_string(),
        MissionEventKind::MissionCompleted { .. } => "Mission completed".bold().green().to_string(),
        MissionEventKind::MissionFailed { reason, .. } => {
            format!("{} - {}", "Mission failed".bold().red(), reason)
        }
        MissionEventKind::MissionAborted { reason, .. } => {
            format!("{} - {}", "Mission aborted".bold().red(), reason)
        }
    };
    format!("{} {}", prefix, body)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut shortened: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    shortened.push('…');
    shortened
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_core::domain::mission::MissionStatus;
    use serde_json::json;

    fn checkpoint(checkpoint_type: CheckpointType) -> Checkpoint {
        Checkpoint {
            id: CheckpointId::new(),
            mission_id: MissionId::new(),
            checkpoint_type,
            prompt: "Proceed?".to_string(),
            options: Vec::new(),
            context: serde_json::Value::Null,
            step_id: None,
            gate: None,
            resume_to: MissionStatus::Running,
            status: mission_core::domain::checkpoint::CheckpointStatus::Pending,
            response: None,
            created_at: chrono::Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn test_auto_response_skips_failed_steps() {
        let response = auto_response(&checkpoint(CheckpointType::RiskDecision));
        assert_eq!(response.action, CheckpointAction::Approve);
        assert_eq!(response.option.as_deref(), Some("skip"));

        let response = auto_response(&checkpoint(CheckpointType::PlanApproval));
        assert_eq!(response.action, CheckpointAction::Approve);
        assert!(response.option.is_none());
    }

    #[test]
    fn test_build_response() {
        let response =
            build_response(CheckpointAction::Approve, Some("retry".into()), None, None).unwrap();
        assert_eq!(response.option.as_deref(), Some("retry"));

        let response = build_response(
            CheckpointAction::Modify,
            None,
            Some(r#"{"description": "shorter"}"#),
            Some("tighten scope".into()),
        )
        .unwrap();
        assert_eq!(response.patch, Some(json!({"description": "shorter"})));
        assert_eq!(response.note.as_deref(), Some("tighten scope"));

        assert!(build_response(CheckpointAction::Modify, None, None, None).is_err());
        assert!(build_response(CheckpointAction::Modify, None, Some("{nope"), None).is_err());
    }

    #[test]
    fn test_render_event_includes_sequence_and_reason() {
        colored::control::set_override(false);
        let event = MissionEvent::new(
            MissionId::new(),
            12,
            MissionEventKind::MissionAborted {
                reason: "operator stop".into(),
                last_completed_step: None,
            },
        );
        assert_eq!(render_event(&event), "[  12] Mission aborted - operator stop");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
