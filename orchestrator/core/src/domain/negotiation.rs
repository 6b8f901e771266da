// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Negotiation Contract
//!
//! What a triad sees each round and what it may answer. The answer is a
//! closed enum so the engine's apply step is checked exhaustively.
//!
//! Triads are external collaborators reached through [`NegotiationResponder`].
//! The engine treats any error or timeout from a responder as an implicit
//! [`NegotiationResponse::Hold`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::section::{CompetingProposal, ProducerId, Proposal};

/// Snapshot of one contested section, addressed to one of its claimants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationRequest {
    pub section: String,
    /// The claimant being asked.
    pub producer: ProducerId,
    pub round: u64,
    pub temperature: f64,
    /// Every claimant's current proposal, in claim order.
    pub competing_proposals: Vec<CompetingProposal>,
}

impl NegotiationRequest {
    /// Proposals belonging to the other claimants.
    pub fn rivals(&self) -> impl Iterator<Item = &CompetingProposal> {
        self.competing_proposals
            .iter()
            .filter(move |p| p.producer != self.producer)
    }

    pub fn own_proposal(&self) -> Option<&Proposal> {
        self.competing_proposals
            .iter()
            .find(|p| p.producer == self.producer)
            .map(|p| &p.proposal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NegotiationResponse {
    Concede,
    Revise { proposal: Proposal },
    Hold,
}

impl NegotiationResponse {
    pub fn label(&self) -> &'static str {
        match self {
            NegotiationResponse::Concede => "concede",
            NegotiationResponse::Revise { .. } => "revise",
            NegotiationResponse::Hold => "hold",
        }
    }
}

/// Failure reported by, or on behalf of, an external collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("collaborator did not answer within {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait NegotiationResponder: Send + Sync {
    /// Decide whether to concede, revise or hold on one contested section.
    async fn negotiate(
        &self,
        request: &NegotiationRequest,
    ) -> Result<NegotiationResponse, CollaboratorError>;
}
