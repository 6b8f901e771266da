// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Scripted Collaborators
//
// Deterministic stand-ins for triads and the arbiter, driven by data instead of
// a model. Used by the CLI's scenario runner and by tests.
//
// - ScriptedResponder plays a fixed list of moves per section, then repeats its
//   fallback move (HOLD unless configured otherwise).
// - PolicyArbiter answers every escalation with one fixed policy.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::arbiter::{ArbiterDecision, ArbiterOracle, ArbitrationRequest, SplitPart};
use crate::domain::negotiation::{
    CollaboratorError, NegotiationRequest, NegotiationResponder, NegotiationResponse,
};
use crate::domain::section::{ProducerId, Proposal};

/// One scripted answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptedMove {
    Hold,
    Concede,
    Revise { proposal: Proposal },
    /// Answer with an error.
    Fail { message: String },
    /// Sleep before holding; long enough delays trip the negotiation timeout.
    Stall { ms: u64 },
}

pub struct ScriptedResponder {
    producer: ProducerId,
    script: HashMap<String, Vec<ScriptedMove>>,
    fallback: ScriptedMove,
    cursor: Mutex<HashMap<String, usize>>,
}

impl ScriptedResponder {
    pub fn new(producer: impl Into<ProducerId>) -> Self {
        Self {
            producer: producer.into(),
            script: HashMap::new(),
            fallback: ScriptedMove::Hold,
            cursor: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_moves(mut self, section: impl Into<String>, moves: Vec<ScriptedMove>) -> Self {
        self.script.insert(section.into(), moves);
        self
    }

    /// Move played once a section's script is exhausted, or for unscripted sections.
    pub fn with_fallback(mut self, fallback: ScriptedMove) -> Self {
        self.fallback = fallback;
        self
    }

    fn next_move(&self, section: &str) -> ScriptedMove {
        let mut cursor = self.cursor.lock();
        let position = cursor.entry(section.to_string()).or_insert(0);
        let next = self
            .script
            .get(section)
            .and_then(|moves| moves.get(*position))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        *position += 1;
        next
    }
}

#[async_trait]
impl NegotiationResponder for ScriptedResponder {
    async fn negotiate(
        &self,
        request: &NegotiationRequest,
    ) -> Result<NegotiationResponse, CollaboratorError> {
        let next = self.next_move(&request.section);
        debug!(
            producer = %self.producer,
            section = %request.section,
            round = request.round,
            next = ?next,
            "Scripted move"
        );
        match next {
            ScriptedMove::Hold => Ok(NegotiationResponse::Hold),
            ScriptedMove::Concede => Ok(NegotiationResponse::Concede),
            ScriptedMove::Revise { proposal } => Ok(NegotiationResponse::Revise { proposal }),
            ScriptedMove::Fail { message } => Err(CollaboratorError::Failed(message)),
            ScriptedMove::Stall { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(NegotiationResponse::Hold)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterPolicy {
    /// ASSIGN to the earliest claimant.
    #[default]
    AssignFirst,
    /// ASSIGN to the claimant with the largest proposal (serialized size).
    AssignLargest,
    /// SPLIT into `<section>/<producer>` parts, one per claimant.
    SplitPerClaimant,
    /// MERGE every proposal into an object keyed by producer.
    MergeAll,
}

pub struct PolicyArbiter {
    policy: ArbiterPolicy,
}

impl PolicyArbiter {
    pub fn new(policy: ArbiterPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl ArbiterOracle for PolicyArbiter {
    async fn decide(
        &self,
        request: &ArbitrationRequest,
    ) -> Result<ArbiterDecision, CollaboratorError> {
        let Some(first) = request.proposals.first() else {
            return Err(CollaboratorError::Failed(format!(
                "section {} has no proposals to arbitrate",
                request.section
            )));
        };

        let decision = match self.policy {
            ArbiterPolicy::AssignFirst => ArbiterDecision::Assign {
                winner: first.producer.clone(),
            },
            ArbiterPolicy::AssignLargest => {
                // max_by_key keeps the last maximum; reverse so ties go to the earliest.
                let winner = request
                    .proposals
                    .iter()
                    .rev()
                    .max_by_key(|p| p.proposal.to_string().len())
                    .unwrap_or(first);
                ArbiterDecision::Assign {
                    winner: winner.producer.clone(),
                }
            }
            ArbiterPolicy::SplitPerClaimant => ArbiterDecision::Split {
                parts: request
                    .proposals
                    .iter()
                    .map(|p| SplitPart {
                        section: format!("{}/{}", request.section, p.producer),
                        owner: p.producer.clone(),
                        proposal: p.proposal.clone(),
                    })
                    .collect(),
            },
            ArbiterPolicy::MergeAll => {
                let merged: Map<String, Value> = request
                    .proposals
                    .iter()
                    .map(|p| (p.producer.to_string(), p.proposal.clone()))
                    .collect();
                ArbiterDecision::Merge {
                    merged_content: Value::Object(merged),
                    contributors: request.proposals.iter().map(|p| p.producer.clone()).collect(),
                }
            }
        };

        debug!(
            section = %request.section,
            policy = ?self.policy,
            kind = %decision.kind(),
            "Policy arbiter decided"
        );
        Ok(decision)
    }
}
