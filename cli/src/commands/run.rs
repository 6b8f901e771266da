// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Scenario runner
//!
//! Runs one negotiation session from a scenario file and prints the result.
//! Progress events stream to stdout while rounds run; Ctrl-C cancels the
//! session between rounds.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use concord_core::application::negotiation_engine::{SessionOutcome, SessionReport};
use concord_core::domain::events::NegotiationEvent;
use concord_core::domain::section::SectionStatus;
use concord_core::domain::session_config::SessionConfigManifest;
use concord_core::domain::spec::SpecSnapshot;
use concord_core::infrastructure::event_bus::{EventBus, EventBusError, EventReceiver};

use crate::scenario::Scenario;

#[derive(Args)]
pub struct RunCommand {
    /// Scenario file (YAML)
    #[arg(value_name = "SCENARIO")]
    scenario: PathBuf,

    /// Override the configured round limit
    #[arg(long)]
    round_limit: Option<u64>,

    /// Override the configured escalation threshold
    #[arg(long)]
    escalation_threshold: Option<u32>,

    /// Leave the document unfrozen even if the scenario asks for a freeze
    #[arg(long)]
    no_freeze: bool,

    /// Print the final report and document as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct RunOutput<'a> {
    scenario: &'a str,
    report: &'a SessionReport,
    spec: &'a SpecSnapshot,
}

pub async fn execute(command: RunCommand, config_override: Option<PathBuf>) -> Result<()> {
    let manifest = SessionConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let mut config = manifest.spec;
    if let Some(limit) = command.round_limit {
        config.round_limit = limit;
    }
    if let Some(threshold) = command.escalation_threshold {
        config.escalation_threshold = threshold;
    }
    config
        .validate()
        .context("Session configuration is invalid")?;

    let scenario = Scenario::from_yaml_file(&command.scenario)?;
    info!(scenario = %scenario.name, claims = scenario.claims.len(), "Scenario loaded");

    let bus = EventBus::with_default_capacity();
    let mut engine = scenario.build_engine(config).with_event_bus(bus.clone());

    let stop = CancellationToken::new();
    let printer = (!command.json).then(|| {
        let receiver = bus.subscribe();
        tokio::spawn(print_progress(receiver, stop.clone()))
    });

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current round");
                cancel.cancel();
            }
        })
    };

    let report = engine
        .run_until_done_with_cancel(cancel)
        .await
        .context("Negotiation session halted")?;
    ctrl_c.abort();

    let completed = matches!(report.outcome, SessionOutcome::Completed { .. });
    if completed && scenario.freeze && !command.no_freeze {
        engine.freeze().context("Freeze refused")?;
    }

    stop.cancel();
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    // Coverage may have changed at freeze.
    let report = SessionReport {
        coverage: engine.get_coverage_report(),
        ..report
    };
    let snapshot = engine.snapshot();

    if command.json {
        let output = RunOutput {
            scenario: &scenario.name,
            report: &report,
            spec: &snapshot,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_summary(&scenario, &report, &snapshot);
    Ok(())
}

async fn print_progress(mut receiver: EventReceiver, stop: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            event = receiver.recv() => match event {
                Ok(event) => print_event(&event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => return,
            },
            _ = stop.cancelled() => break,
        }
    }
    while let Ok(event) = receiver.try_recv() {
        print_event(&event);
    }
}

fn print_event(event: &NegotiationEvent) {
    match event {
        NegotiationEvent::RoundStarted {
            round,
            temperature,
            contested,
            ..
        } => {
            println!(
                "{} {} (temperature {:.2}, contested: {})",
                "▸".cyan(),
                format!("Round {}", round).bold(),
                temperature,
                contested.join(", ")
            );
        }
        NegotiationEvent::ResponseApplied {
            section,
            producer,
            action,
            answered,
            ..
        } => {
            let note = if *answered { "" } else { " (no answer)" };
            println!("    {} on {}: {}{}", producer, section, action, note.dimmed());
        }
        NegotiationEvent::SectionResolved {
            section,
            status,
            owner,
            ..
        } => {
            let owner = owner
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string());
            println!("  {} {} is {} (owner {})", "✓".green(), section, status, owner);
        }
        NegotiationEvent::EscalationStarted {
            stuck_rounds,
            sections,
            ..
        } => {
            println!(
                "  {} stuck for {} round(s); arbitrating {}",
                "!".yellow(),
                stuck_rounds,
                sections.join(", ")
            );
        }
        NegotiationEvent::ArbiterDecisionApplied {
            section,
            kind,
            resulting_sections,
            ..
        } => {
            println!(
                "    arbiter {} {} → {}",
                kind.to_string().bold(),
                section,
                resulting_sections.join(", ")
            );
        }
        NegotiationEvent::ArbiterFallback {
            section, reason, ..
        } => {
            println!("    {} {}: {}", "fallback".yellow(), section, reason);
        }
        NegotiationEvent::SessionCompleted { rounds, reason, .. } => {
            println!("{} after {} round(s): {}", "Done".green().bold(), rounds, reason);
        }
        NegotiationEvent::SessionHalted { violation, .. } => {
            println!("{} {}", "Halted:".red().bold(), violation);
        }
        NegotiationEvent::SpecFrozen { round, .. } => {
            println!("{} at round {}", "Frozen".blue().bold(), round);
        }
    }
}

fn print_summary(scenario: &Scenario, report: &SessionReport, snapshot: &SpecSnapshot) {
    println!();
    println!("{} {}", "Scenario:".bold(), scenario.name);
    if let Some(description) = &scenario.description {
        println!("  {}", description.dimmed());
    }
    let outcome = match report.outcome {
        SessionOutcome::Completed { reason } => format!("completed ({})", reason),
        SessionOutcome::Cancelled => "cancelled".to_string(),
    };
    println!("  Outcome: {}", outcome);
    println!(
        "  Rounds: {}  Escalations: {}  Arbiter calls: {}  Fallbacks: {}",
        report.rounds_run, report.escalations, report.arbiter_invocations, report.arbiter_fallbacks
    );
    println!();

    println!("{}", "Sections:".bold());
    for section in &snapshot.sections {
        let status = match section.status {
            SectionStatus::Frozen if section.owner.is_some() => section.status.to_string().blue(),
            SectionStatus::Claimed => section.status.to_string().green(),
            SectionStatus::Contested => section.status.to_string().yellow(),
            _ => section.status.to_string().red(),
        };
        let owner = section
            .owner
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "(none)".to_string());
        println!("  {:<24} {:<10} {}", section.name, status, owner);
    }
    println!();

    let coverage = &report.coverage;
    if coverage.is_complete() {
        println!("{}", "✓ Every section has an owner".green());
    } else {
        if coverage.coverage_gaps > 0 {
            println!(
                "{} {} gap(s): {}",
                "✗".red(),
                coverage.coverage_gaps,
                coverage.gap_sections.join(", ")
            );
        }
        if coverage.unresolved_conflicts > 0 {
            println!(
                "{} {} unresolved: {}",
                "✗".yellow(),
                coverage.unresolved_conflicts,
                coverage.conflict_sections.join(", ")
            );
        }
    }
}
