// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::arbiter::DecisionKind;
use crate::domain::section::{ProducerId, SectionStatus};
use crate::domain::spec::CoverageReport;

/// Identifies one negotiation session (one engine over one Spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NegotiationEvent {
    RoundStarted {
        session_id: SessionId,
        round: u64,
        temperature: f64,
        contested: Vec<String>,
        started_at: DateTime<Utc>,
    },
    ResponseApplied {
        session_id: SessionId,
        round: u64,
        section: String,
        producer: ProducerId,
        action: String,
        /// `false` when the response was an implicit HOLD after an error or timeout.
        answered: bool,
        applied_at: DateTime<Utc>,
    },
    SectionResolved {
        session_id: SessionId,
        round: u64,
        section: String,
        status: SectionStatus,
        owner: Option<ProducerId>,
        resolved_at: DateTime<Utc>,
    },
    EscalationStarted {
        session_id: SessionId,
        round: u64,
        stuck_rounds: u32,
        sections: Vec<String>,
        started_at: DateTime<Utc>,
    },
    ArbiterDecisionApplied {
        session_id: SessionId,
        round: u64,
        section: String,
        kind: DecisionKind,
        resulting_sections: Vec<String>,
        applied_at: DateTime<Utc>,
    },
    ArbiterFallback {
        session_id: SessionId,
        round: u64,
        section: String,
        reason: String,
        winner: Option<ProducerId>,
        fell_back_at: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: SessionId,
        rounds: u64,
        reason: String,
        completed_at: DateTime<Utc>,
    },
    SessionHalted {
        session_id: SessionId,
        round: u64,
        violation: String,
        halted_at: DateTime<Utc>,
    },
    SpecFrozen {
        session_id: SessionId,
        round: u64,
        coverage: CoverageReport,
        frozen_at: DateTime<Utc>,
    },
}

impl NegotiationEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            NegotiationEvent::RoundStarted { session_id, .. }
            | NegotiationEvent::ResponseApplied { session_id, .. }
            | NegotiationEvent::SectionResolved { session_id, .. }
            | NegotiationEvent::EscalationStarted { session_id, .. }
            | NegotiationEvent::ArbiterDecisionApplied { session_id, .. }
            | NegotiationEvent::ArbiterFallback { session_id, .. }
            | NegotiationEvent::SessionCompleted { session_id, .. }
            | NegotiationEvent::SessionHalted { session_id, .. }
            | NegotiationEvent::SpecFrozen { session_id, .. } => *session_id,
        }
    }

    /// The section an event is about, for per-section subscribers.
    pub fn section(&self) -> Option<&str> {
        match self {
            NegotiationEvent::ResponseApplied { section, .. }
            | NegotiationEvent::SectionResolved { section, .. }
            | NegotiationEvent::ArbiterDecisionApplied { section, .. }
            | NegotiationEvent::ArbiterFallback { section, .. } => Some(section),
            _ => None,
        }
    }
}
