// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Negotiation Engine
//!
//! Drives one session over one [`Spec`]: solicits every contested section's
//! claimants concurrently, applies their answers in a fixed order, counts
//! stuck rounds, and hands deadlocked sections to the arbiter.
//!
//! ## State Machine
//! | State | Entered when | Leaves to |
//! |-------|--------------|-----------|
//! | `Active` | session start, after an escalation | `Escalating`, `Done` |
//! | `Escalating` | `stuck_count` reaches the escalation threshold | `Active` |
//! | `Done` | no contested sections, temperature at or below the freeze threshold, or round limit reached | terminal |
//!
//! ## Round
//! 1. Stop if a done-condition holds.
//! 2. Advance the spec's round (cools the temperature).
//! 3. Ask every claimant of every contested section, all at once, each call
//!    bounded by the negotiation timeout. Errors and timeouts count as HOLD.
//! 4. Once every answer is in, apply them ordered by producer id.
//! 5. A round in which no contested section changed status is stuck.
//! 6. At the stuck threshold, arbitrate every still-contested section.
//!
//! The engine is the only writer of its `Spec`. Collaborators receive owned
//! snapshots, so nothing is locked. Cancellation is observed between rounds
//! only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::arbitration_service::{ArbitrationOutcome, ArbitrationService};
use crate::domain::arbiter::{ArbiterOracle, ArbitrationContext, ConcessionRecord};
use crate::domain::events::{NegotiationEvent, SessionId};
use crate::domain::negotiation::{
    CollaboratorError, NegotiationRequest, NegotiationResponder, NegotiationResponse,
};
use crate::domain::section::{ProducerId, Proposal, SectionStatus, SectionView};
use crate::domain::session_config::SessionConfig;
use crate::domain::spec::{CoverageReport, InvariantViolation, Rejection, Spec, SpecSnapshot};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Active,
    Escalating,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    NoContestedSections,
    TemperatureThreshold,
    RoundLimit,
}

impl std::fmt::Display for DoneReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DoneReason::NoContestedSections => "no contested sections",
            DoneReason::TemperatureThreshold => "temperature reached freeze threshold",
            DoneReason::RoundLimit => "round limit reached",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed { reason: DoneReason },
    Cancelled,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("spec invariant violated: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    #[error("session halted after an earlier invariant violation: {0}")]
    Halted(InvariantViolation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round: u64,
    pub state: EngineState,
    /// Contested sections whose status changed this round.
    pub resolved: usize,
    pub stuck_count: u32,
    pub arbitrations: Vec<ArbitrationOutcome>,
    pub done_reason: Option<DoneReason>,
}

impl RoundOutcome {
    pub fn escalated(&self) -> bool {
        !self.arbitrations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub outcome: SessionOutcome,
    pub rounds_run: u64,
    pub final_round: u64,
    pub temperature: f64,
    pub escalations: u32,
    pub arbiter_invocations: usize,
    pub arbiter_fallbacks: usize,
    pub coverage: CoverageReport,
}

#[derive(Debug, Default, Clone, Copy)]
struct SessionStats {
    rounds_run: u64,
    escalations: u32,
    arbiter_invocations: usize,
    arbiter_fallbacks: usize,
}

/// A claimant's answer for one section, or the HOLD standing in for it.
#[derive(Debug)]
struct Reply {
    section: String,
    producer: ProducerId,
    response: NegotiationResponse,
    answered: bool,
}

pub struct NegotiationEngine {
    session_id: SessionId,
    config: SessionConfig,
    spec: Spec,
    responders: HashMap<ProducerId, Arc<dyn NegotiationResponder>>,
    arbitration: ArbitrationService,
    event_bus: Option<EventBus>,
    state: EngineState,
    stuck_count: u32,
    concessions: Vec<ConcessionRecord>,
    done_reason: Option<DoneReason>,
    halted: Option<InvariantViolation>,
    stats: SessionStats,
}

impl NegotiationEngine {
    pub fn new(config: SessionConfig, arbiter: Arc<dyn ArbiterOracle>) -> Self {
        let spec = config.new_spec();
        Self::with_spec(config, spec, arbiter)
    }

    /// Runs a session over an existing document.
    pub fn with_spec(config: SessionConfig, spec: Spec, arbiter: Arc<dyn ArbiterOracle>) -> Self {
        let arbitration = ArbitrationService::new(arbiter, config.arbiter_timeout());
        Self {
            session_id: SessionId::new(),
            config,
            spec,
            responders: HashMap::new(),
            arbitration,
            event_bus: None,
            state: EngineState::Active,
            stuck_count: 0,
            concessions: Vec::new(),
            done_reason: None,
            halted: None,
            stats: SessionStats::default(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_responder(
        mut self,
        producer: impl Into<ProducerId>,
        responder: Arc<dyn NegotiationResponder>,
    ) -> Self {
        self.register_responder(producer, responder);
        self
    }

    pub fn register_responder(
        &mut self,
        producer: impl Into<ProducerId>,
        responder: Arc<dyn NegotiationResponder>,
    ) {
        self.responders.insert(producer.into(), responder);
    }

    // ── Orchestrator surface ─────────────────────────────────────────────────

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stuck_count(&self) -> u32 {
        self.stuck_count
    }

    pub fn done_reason(&self) -> Option<DoneReason> {
        self.done_reason
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Registers a claim. A claim that re-opens a contest on a session that
    /// finished for lack of contests makes the session active again.
    pub fn register_claim(
        &mut self,
        producer: impl Into<ProducerId>,
        section: &str,
        proposal: Proposal,
    ) -> bool {
        let accepted = self.spec.register_claim(producer, section, proposal);
        if accepted
            && self.done_reason == Some(DoneReason::NoContestedSections)
            && self.spec.status_of(section) == Some(SectionStatus::Contested)
        {
            debug!(section, "New contest re-opened a finished session");
            self.state = EngineState::Active;
            self.done_reason = None;
        }
        accepted
    }

    /// Checks the document, then seals it. Returns `Ok(false)` when it was
    /// already frozen.
    pub fn freeze(&mut self) -> Result<bool, EngineError> {
        self.ensure_running()?;
        let round = self.spec.round();
        self.verify(round)?;

        let frozen = self.spec.freeze();
        if frozen {
            self.verify(round)?;
            let coverage = self.spec.get_coverage_report();
            info!(
                session_id = %self.session_id,
                round,
                gaps = coverage.coverage_gaps,
                "Session spec frozen"
            );
            self.publish(NegotiationEvent::SpecFrozen {
                session_id: self.session_id,
                round,
                coverage,
                frozen_at: Utc::now(),
            });
            if self.state != EngineState::Done {
                self.finish(DoneReason::NoContestedSections);
            }
        }
        Ok(frozen)
    }

    pub fn get_contested_sections(&self) -> Vec<String> {
        self.spec.get_contested_sections()
    }

    pub fn get_section_owner(&self, name: &str) -> Option<ProducerId> {
        self.spec.get_section_owner(name)
    }

    pub fn get_section_content(&self, name: &str) -> Option<Proposal> {
        self.spec.get_section_content(name)
    }

    pub fn is_frozen(&self) -> bool {
        self.spec.is_frozen()
    }

    pub fn get_coverage_report(&self) -> CoverageReport {
        self.spec.get_coverage_report()
    }

    pub fn section(&self, name: &str) -> Option<SectionView> {
        self.spec.section(name)
    }

    pub fn snapshot(&self) -> SpecSnapshot {
        self.spec.snapshot()
    }

    pub fn rejections(&self) -> Vec<Rejection> {
        self.spec.rejections().to_vec()
    }

    // ── Round loop ───────────────────────────────────────────────────────────

    pub async fn run_until_done(&mut self) -> Result<SessionReport, EngineError> {
        self.run_until_done_with_cancel(CancellationToken::new()).await
    }

    /// Runs rounds until `Done`. The token is checked before each round; a
    /// cancelled session keeps its last applied round and is not frozen.
    pub async fn run_until_done_with_cancel(
        &mut self,
        cancel: CancellationToken,
    ) -> Result<SessionReport, EngineError> {
        loop {
            if let (EngineState::Done, Some(reason)) = (self.state, self.done_reason) {
                return Ok(self.report(SessionOutcome::Completed { reason }));
            }
            if cancel.is_cancelled() {
                info!(
                    session_id = %self.session_id,
                    round = self.spec.round(),
                    "Negotiation cancelled between rounds"
                );
                return Ok(self.report(SessionOutcome::Cancelled));
            }
            self.run_round().await?;
        }
    }

    pub async fn run_round(&mut self) -> Result<RoundOutcome, EngineError> {
        self.ensure_running()?;

        if self.state == EngineState::Done {
            return Ok(self.idle_outcome());
        }
        if let Some(reason) = self.evaluate_done() {
            self.finish(reason);
            return Ok(self.idle_outcome());
        }

        let round = self.spec.advance_round();
        self.stats.rounds_run += 1;
        metrics::counter!("concord_negotiation_rounds_total").increment(1);

        let snapshot = self.spec.snapshot();
        let contested: Vec<SectionView> = snapshot.contested().cloned().collect();
        let names: Vec<String> = contested.iter().map(|s| s.name.clone()).collect();

        info!(
            session_id = %self.session_id,
            round,
            temperature = snapshot.temperature,
            contested = contested.len(),
            "Negotiation round started"
        );
        self.publish(NegotiationEvent::RoundStarted {
            session_id: self.session_id,
            round,
            temperature: snapshot.temperature,
            contested: names,
            started_at: Utc::now(),
        });

        let replies = self
            .solicit_round(round, snapshot.temperature, &contested)
            .await;
        self.apply_replies(round, replies);

        let resolved = self.report_resolutions(round, &contested);
        if resolved == 0 {
            self.stuck_count += 1;
            metrics::counter!("concord_stuck_rounds_total").increment(1);
            debug!(round, stuck_count = self.stuck_count, "Round made no progress");
        } else {
            self.stuck_count = 0;
        }

        let mut arbitrations = Vec::new();
        if self.stuck_count >= self.config.escalation_threshold
            && !self.spec.get_contested_sections().is_empty()
        {
            arbitrations = self.escalate(round).await;
        }

        self.verify(round)?;

        let done_reason = self.evaluate_done();
        if let Some(reason) = done_reason {
            self.finish(reason);
        }

        Ok(RoundOutcome {
            round,
            state: self.state,
            resolved,
            stuck_count: self.stuck_count,
            arbitrations,
            done_reason,
        })
    }

    async fn solicit_round(
        &self,
        round: u64,
        temperature: f64,
        contested: &[SectionView],
    ) -> Vec<Reply> {
        let timeout = self.config.negotiation_timeout();
        let responders = &self.responders;

        let calls: Vec<_> = contested
            .iter()
            .flat_map(move |section| {
                section.claimants.iter().map(move |producer| {
                    let request = NegotiationRequest {
                        section: section.name.clone(),
                        producer: producer.clone(),
                        round,
                        temperature,
                        competing_proposals: section.proposals.clone(),
                    };
                    ask(responders.get(producer).cloned(), request, timeout)
                })
            })
            .collect();

        join_all(calls).await
    }

    fn apply_replies(&mut self, round: u64, mut replies: Vec<Reply>) {
        replies.sort_by(|a, b| {
            a.producer
                .cmp(&b.producer)
                .then_with(|| a.section.cmp(&b.section))
        });

        for reply in replies {
            let action = reply.response.label();
            match reply.response {
                NegotiationResponse::Concede => {
                    if self.spec.concede(reply.producer.clone(), &reply.section) {
                        self.concessions.push(ConcessionRecord {
                            round,
                            section: reply.section.clone(),
                            producer: reply.producer.clone(),
                        });
                    }
                }
                NegotiationResponse::Revise { proposal } => {
                    self.spec
                        .update_proposal(reply.producer.clone(), &reply.section, proposal);
                }
                NegotiationResponse::Hold => {}
            }

            self.publish(NegotiationEvent::ResponseApplied {
                session_id: self.session_id,
                round,
                section: reply.section,
                producer: reply.producer,
                action: action.to_string(),
                answered: reply.answered,
                applied_at: Utc::now(),
            });
        }
    }

    /// Counts contested sections whose status moved this round.
    fn report_resolutions(&self, round: u64, contested: &[SectionView]) -> usize {
        let mut resolved = 0;
        for before in contested {
            let after = self.spec.status_of(&before.name);
            if after == Some(before.status) {
                continue;
            }
            resolved += 1;
            let owner = self.spec.get_section_owner(&before.name);
            info!(
                section = %before.name,
                status = ?after,
                owner = ?owner,
                "Section resolved by negotiation"
            );
            if let Some(status) = after {
                self.publish(NegotiationEvent::SectionResolved {
                    session_id: self.session_id,
                    round,
                    section: before.name.clone(),
                    status,
                    owner,
                    resolved_at: Utc::now(),
                });
            }
        }
        resolved
    }

    async fn escalate(&mut self, round: u64) -> Vec<ArbitrationOutcome> {
        self.state = EngineState::Escalating;
        self.stats.escalations += 1;
        metrics::counter!("concord_escalations_total").increment(1);

        let snapshot = self.spec.snapshot();
        let contested: Vec<&SectionView> = snapshot.contested().collect();
        let names: Vec<String> = contested.iter().map(|s| s.name.clone()).collect();

        warn!(
            session_id = %self.session_id,
            round,
            stuck_rounds = self.stuck_count,
            sections = ?names,
            "Negotiation stuck; escalating to arbiter"
        );
        self.publish(NegotiationEvent::EscalationStarted {
            session_id: self.session_id,
            round,
            stuck_rounds: self.stuck_count,
            sections: names,
            started_at: Utc::now(),
        });

        let context = ArbitrationContext {
            round,
            temperature: snapshot.temperature,
            stuck_rounds: self.stuck_count,
            prior_concessions: self.concessions.clone(),
        };
        let arbitration = &self.arbitration;
        let arbitrations = join_all(contested.iter().map(|section| {
            arbitration.solicit(ArbitrationService::build_request(section, context.clone()))
        }))
        .await;
        self.stats.arbiter_invocations += arbitrations.len();

        let mut outcomes = Vec::with_capacity(arbitrations.len());
        for arbitration in arbitrations {
            let outcome = ArbitrationService::apply(&mut self.spec, arbitration);

            if let Some(fallback) = &outcome.fallback {
                self.stats.arbiter_fallbacks += 1;
                self.publish(NegotiationEvent::ArbiterFallback {
                    session_id: self.session_id,
                    round,
                    section: outcome.section.clone(),
                    reason: fallback.reason.clone(),
                    winner: fallback.winner.clone(),
                    fell_back_at: Utc::now(),
                });
            }
            if let Some(applied) = &outcome.applied {
                self.publish(NegotiationEvent::ArbiterDecisionApplied {
                    session_id: self.session_id,
                    round,
                    section: applied.section.clone(),
                    kind: applied.kind,
                    resulting_sections: applied.resulting_sections.clone(),
                    applied_at: Utc::now(),
                });
            }
            outcomes.push(outcome);
        }

        self.stuck_count = 0;
        self.state = EngineState::Active;
        outcomes
    }

    fn evaluate_done(&self) -> Option<DoneReason> {
        if self.spec.get_contested_sections().is_empty() {
            Some(DoneReason::NoContestedSections)
        } else if self.spec.temperature() <= self.config.freeze_threshold {
            Some(DoneReason::TemperatureThreshold)
        } else if self.spec.round() >= self.config.round_limit {
            Some(DoneReason::RoundLimit)
        } else {
            None
        }
    }

    fn finish(&mut self, reason: DoneReason) {
        if self.state == EngineState::Done {
            return;
        }
        self.state = EngineState::Done;
        self.done_reason = Some(reason);
        info!(
            session_id = %self.session_id,
            round = self.spec.round(),
            %reason,
            "Negotiation session done"
        );
        self.publish(NegotiationEvent::SessionCompleted {
            session_id: self.session_id,
            rounds: self.spec.round(),
            reason: reason.to_string(),
            completed_at: Utc::now(),
        });
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        match &self.halted {
            Some(violation) => Err(EngineError::Halted(violation.clone())),
            None => Ok(()),
        }
    }

    fn verify(&mut self, round: u64) -> Result<(), EngineError> {
        let Err(violation) = self.spec.check_invariants() else {
            return Ok(());
        };
        error!(
            session_id = %self.session_id,
            round,
            %violation,
            "Spec invariant violated; halting session"
        );
        self.publish(NegotiationEvent::SessionHalted {
            session_id: self.session_id,
            round,
            violation: violation.to_string(),
            halted_at: Utc::now(),
        });
        self.halted = Some(violation.clone());
        Err(EngineError::InvariantViolation(violation))
    }

    fn idle_outcome(&self) -> RoundOutcome {
        RoundOutcome {
            round: self.spec.round(),
            state: self.state,
            resolved: 0,
            stuck_count: self.stuck_count,
            arbitrations: Vec::new(),
            done_reason: self.done_reason,
        }
    }

    fn report(&self, outcome: SessionOutcome) -> SessionReport {
        SessionReport {
            session_id: self.session_id,
            outcome,
            rounds_run: self.stats.rounds_run,
            final_round: self.spec.round(),
            temperature: self.spec.temperature(),
            escalations: self.stats.escalations,
            arbiter_invocations: self.stats.arbiter_invocations,
            arbiter_fallbacks: self.stats.arbiter_fallbacks,
            coverage: self.spec.get_coverage_report(),
        }
    }

    fn publish(&self, event: NegotiationEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// One bounded negotiation call. Never fails: problems become an implicit HOLD.
async fn ask(
    responder: Option<Arc<dyn NegotiationResponder>>,
    request: NegotiationRequest,
    timeout: Duration,
) -> Reply {
    let result = match responder {
        None => Err(CollaboratorError::Unavailable(format!(
            "no responder registered for {}",
            request.producer
        ))),
        Some(responder) => {
            match tokio::time::timeout(timeout, responder.negotiate(&request)).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }),
            }
        }
    };

    match result {
        Ok(response) => Reply {
            section: request.section,
            producer: request.producer,
            response,
            answered: true,
        },
        Err(e) => {
            let label = match &e {
                CollaboratorError::Timeout { .. } => "timeout",
                _ => "error",
            };
            metrics::counter!("concord_negotiation_failures_total", "kind" => label).increment(1);
            warn!(
                section = %request.section,
                producer = %request.producer,
                round = request.round,
                error = %e,
                "Negotiation call failed; treating as HOLD"
            );
            Reply {
                section: request.section,
                producer: request.producer,
                response: NegotiationResponse::Hold,
                answered: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arbiter::{ArbiterDecision, ArbitrationRequest};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    struct Always(NegotiationResponse);

    #[async_trait]
    impl NegotiationResponder for Always {
        async fn negotiate(
            &self,
            _request: &NegotiationRequest,
        ) -> Result<NegotiationResponse, CollaboratorError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingArbiter {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArbiterOracle for RecordingArbiter {
        async fn decide(
            &self,
            request: &ArbitrationRequest,
        ) -> Result<ArbiterDecision, CollaboratorError> {
            self.calls.lock().await.push(request.section.clone());
            Ok(ArbiterDecision::Assign {
                winner: request.proposals[request.proposals.len() - 1].producer.clone(),
            })
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            round_limit: 6,
            escalation_threshold: 2,
            negotiation_timeout_ms: 200,
            arbiter_timeout_ms: 200,
            ..SessionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_concession_resolves_in_one_round() {
        let arbiter = Arc::new(RecordingArbiter::default());
        let mut engine = NegotiationEngine::new(config(), arbiter.clone())
            .with_responder("A", Arc::new(Always(NegotiationResponse::Hold)))
            .with_responder("B", Arc::new(Always(NegotiationResponse::Concede)));
        engine.register_claim("A", "layout", json!("a"));
        engine.register_claim("B", "layout", json!("b"));

        let outcome = engine.run_round().await.unwrap();
        assert_eq!(outcome.round, 1);
        assert_eq!(outcome.resolved, 1);
        assert_eq!(outcome.state, EngineState::Done);
        assert_eq!(outcome.done_reason, Some(DoneReason::NoContestedSections));
        assert_eq!(engine.get_section_owner("layout"), Some(ProducerId::new("A")));
        assert!(arbiter.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_stuck_rounds_escalate_once() {
        let arbiter = Arc::new(RecordingArbiter::default());
        let mut engine = NegotiationEngine::new(config(), arbiter.clone())
            .with_responder("A", Arc::new(Always(NegotiationResponse::Hold)))
            .with_responder("B", Arc::new(Always(NegotiationResponse::Hold)));
        engine.register_claim("A", "layout", json!("a"));
        engine.register_claim("B", "layout", json!("b"));

        let first = engine.run_round().await.unwrap();
        assert_eq!(first.stuck_count, 1);
        assert!(!first.escalated());

        let second = engine.run_round().await.unwrap();
        assert!(second.escalated());
        assert_eq!(second.stuck_count, 0);
        assert_eq!(*arbiter.calls.lock().await, vec!["layout".to_string()]);
        assert_eq!(engine.get_section_owner("layout"), Some(ProducerId::new("B")));
        assert_eq!(engine.state(), EngineState::Done);
    }

    #[tokio::test]
    async fn test_missing_responder_is_hold() {
        let arbiter = Arc::new(RecordingArbiter::default());
        let mut engine = NegotiationEngine::new(config(), arbiter)
            .with_responder("A", Arc::new(Always(NegotiationResponse::Hold)));
        engine.register_claim("A", "nav", json!("a"));
        engine.register_claim("ghost", "nav", json!("g"));

        let outcome = engine.run_round().await.unwrap();
        assert_eq!(outcome.resolved, 0);
        assert_eq!(engine.get_contested_sections(), vec!["nav".to_string()]);
    }

    #[tokio::test]
    async fn test_revise_updates_proposal() {
        let arbiter = Arc::new(RecordingArbiter::default());
        let mut engine = NegotiationEngine::new(config(), arbiter)
            .with_responder(
                "A",
                Arc::new(Always(NegotiationResponse::Revise {
                    proposal: json!("a2"),
                })),
            )
            .with_responder("B", Arc::new(Always(NegotiationResponse::Hold)));
        engine.register_claim("A", "nav", json!("a1"));
        engine.register_claim("B", "nav", json!("b1"));

        engine.run_round().await.unwrap();
        let view = engine.section("nav").unwrap();
        assert_eq!(view.proposal_of(&ProducerId::new("A")), Some(&json!("a2")));
    }

    #[tokio::test]
    async fn test_invariant_violation_halts_session() {
        let mut spec = config().new_spec();
        spec.register_claim("A", "nav", json!("a"));
        spec.register_claim("B", "nav", json!("b"));
        spec.section_mut("nav")
            .unwrap()
            .proposals_mut()
            .insert(ProducerId::new("Z"), json!("z"));

        let bus = EventBus::with_default_capacity();
        let mut receiver = bus.subscribe();
        let arbiter = Arc::new(RecordingArbiter::default());
        let mut engine = NegotiationEngine::with_spec(config(), spec, arbiter)
            .with_event_bus(bus)
            .with_responder("A", Arc::new(Always(NegotiationResponse::Hold)))
            .with_responder("B", Arc::new(Always(NegotiationResponse::Hold)));

        let err = engine.run_round().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvariantViolation(InvariantViolation::OrphanProposal { .. })
        ));

        let mut halted = None;
        while let Ok(event) = receiver.try_recv() {
            if let NegotiationEvent::SessionHalted {
                round, violation, ..
            } = event
            {
                halted = Some((round, violation));
            }
        }
        let (round, violation) = halted.unwrap();
        assert_eq!(round, 1);
        assert!(violation.contains("Z"));

        let again = engine.run_round().await.unwrap_err();
        assert!(matches!(
            again,
            EngineError::Halted(InvariantViolation::OrphanProposal { .. })
        ));
        assert!(matches!(
            engine.run_until_done().await,
            Err(EngineError::Halted(_))
        ));
        assert!(matches!(engine.freeze(), Err(EngineError::Halted(_))));
        assert_eq!(engine.snapshot().round, 1);
    }

    #[tokio::test]
    async fn test_freeze_ends_session() {
        let arbiter = Arc::new(RecordingArbiter::default());
        let mut engine = NegotiationEngine::new(config(), arbiter);
        engine.register_claim("A", "nav", json!("a"));
        engine.register_claim("B", "nav", json!("b"));

        assert!(engine.freeze().unwrap());
        assert!(!engine.freeze().unwrap());
        assert_eq!(engine.state(), EngineState::Done);

        let report = engine.run_until_done().await.unwrap();
        assert_eq!(report.rounds_run, 0);
        assert_eq!(engine.get_section_content("nav"), Some(json!("a")));
    }
}
