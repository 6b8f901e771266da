// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Arbiter Decision Contract
//!
//! The arbiter is an external oracle consulted when negotiation stalls. This
//! module owns everything about it except the decision-making itself:
//!
//! | Type | Role |
//! |------|------|
//! | [`ArbitrationRequest`] | What the oracle is told about a deadlocked section |
//! | [`ArbiterDecision`] | ASSIGN / SPLIT / MERGE, the only answers accepted |
//! | [`DecisionError`] | Why a decision was rejected before application |
//! | [`ArbiterOracle`] | Collaborator seam |
//!
//! A decision is validated against the section it targets before anything is
//! mutated. Rejected decisions are recoverable: the caller falls back to
//! [`ArbiterDecision::fallback_for`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::domain::negotiation::CollaboratorError;
use crate::domain::section::{CompetingProposal, ProducerId, Proposal, SectionView};

/// A concession observed earlier in the session, passed to the arbiter as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcessionRecord {
    pub round: u64,
    pub section: String,
    pub producer: ProducerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationContext {
    pub round: u64,
    pub temperature: f64,
    /// Consecutive rounds without a status change that led to escalation.
    pub stuck_rounds: u32,
    pub prior_concessions: Vec<ConcessionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationRequest {
    pub section: String,
    pub proposals: Vec<CompetingProposal>,
    pub context: ArbitrationContext,
}

/// One slice of a SPLIT decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPart {
    pub section: String,
    pub owner: ProducerId,
    pub proposal: Proposal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArbiterDecision {
    Assign {
        winner: ProducerId,
    },
    Split {
        parts: Vec<SplitPart>,
    },
    Merge {
        merged_content: Proposal,
        contributors: Vec<ProducerId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Assign,
    Split,
    Merge,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DecisionKind::Assign => "ASSIGN",
            DecisionKind::Split => "SPLIT",
            DecisionKind::Merge => "MERGE",
        };
        f.write_str(label)
    }
}

/// Who owns a section after a MERGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOwnership {
    /// A joint owner id derived from the contributors, e.g. `merge(A+B)`.
    #[default]
    Synthetic,
    FirstContributor,
}

impl MergeOwnership {
    pub fn owner_for(&self, contributors: &[ProducerId]) -> Option<ProducerId> {
        match self {
            MergeOwnership::FirstContributor => contributors.first().cloned(),
            MergeOwnership::Synthetic if contributors.is_empty() => None,
            MergeOwnership::Synthetic => {
                let joined: Vec<&str> = contributors.iter().map(ProducerId::as_str).collect();
                Some(ProducerId::new(format!("merge({})", joined.join("+"))))
            }
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecisionError {
    #[error("decision is missing required field `{0}`")]
    MissingField(String),

    #[error("unknown decision kind `{0}`")]
    UnknownKind(String),

    #[error("decision could not be parsed: {0}")]
    Parse(String),

    #[error("winner `{winner}` is not a claimant of section `{section}`")]
    WinnerNotClaimant { section: String, winner: ProducerId },

    #[error("split owner `{owner}` is not a claimant of section `{section}`")]
    SplitOwnerNotClaimant { section: String, owner: ProducerId },

    #[error("merge contributor `{contributor}` is not a claimant of section `{section}`")]
    ContributorNotClaimant {
        section: String,
        contributor: ProducerId,
    },

    #[error("split names section `{0}` more than once")]
    DuplicateSplitSection(String),

    #[error("split target `{0}` already exists")]
    SectionExists(String),

    #[error("section `{section}` cannot be arbitrated: {reason}")]
    SectionUnavailable { section: String, reason: String },

    #[error("arbiter did not produce a decision: {0}")]
    Collaborator(#[from] CollaboratorError),
}

impl ArbiterDecision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            ArbiterDecision::Assign { .. } => DecisionKind::Assign,
            ArbiterDecision::Split { .. } => DecisionKind::Split,
            ArbiterDecision::Merge { .. } => DecisionKind::Merge,
        }
    }

    /// ASSIGN to the earliest-inserted claimant. `None` when nobody claims the section.
    pub fn fallback_for(section: &SectionView) -> Option<Self> {
        section
            .claimants
            .first()
            .map(|winner| ArbiterDecision::Assign {
                winner: winner.clone(),
            })
    }

    /// Parses the JSON an external arbiter emits, reporting absent fields by name.
    pub fn from_json(value: &Value) -> Result<Self, DecisionError> {
        let obj = value
            .as_object()
            .ok_or_else(|| DecisionError::Parse("decision must be a JSON object".to_string()))?;
        let kind = obj
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| DecisionError::MissingField("kind".to_string()))?;

        match kind.to_ascii_lowercase().as_str() {
            "assign" => {
                let winner = required_str(value, "winner", "winner")?;
                Ok(ArbiterDecision::Assign {
                    winner: ProducerId::new(winner),
                })
            }
            "split" => {
                let raw_parts = obj
                    .get("parts")
                    .and_then(Value::as_array)
                    .ok_or_else(|| DecisionError::MissingField("parts".to_string()))?;
                let mut parts = Vec::with_capacity(raw_parts.len());
                for (i, raw) in raw_parts.iter().enumerate() {
                    let section = required_str(raw, "section", &format!("parts[{i}].section"))?;
                    let owner = required_str(raw, "owner", &format!("parts[{i}].owner"))?;
                    let proposal =
                        required_value(raw, "proposal", &format!("parts[{i}].proposal"))?;
                    parts.push(SplitPart {
                        section: section.to_string(),
                        owner: ProducerId::new(owner),
                        proposal,
                    });
                }
                Ok(ArbiterDecision::Split { parts })
            }
            "merge" => {
                let merged_content = required_value(value, "merged_content", "merged_content")?;
                let contributors = obj
                    .get("contributors")
                    .and_then(Value::as_array)
                    .ok_or_else(|| DecisionError::MissingField("contributors".to_string()))?
                    .iter()
                    .map(|c| {
                        c.as_str().map(ProducerId::new).ok_or_else(|| {
                            DecisionError::Parse("contributors must be strings".to_string())
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ArbiterDecision::Merge {
                    merged_content,
                    contributors,
                })
            }
            other => Err(DecisionError::UnknownKind(other.to_string())),
        }
    }

    /// Checks the decision against the section it targets. Does not look at
    /// other sections; name collisions for SPLIT are checked by the `Spec`.
    pub fn validate(&self, section: &SectionView) -> Result<(), DecisionError> {
        match self {
            ArbiterDecision::Assign { winner } => {
                if winner.as_str().is_empty() {
                    return Err(DecisionError::MissingField("winner".to_string()));
                }
                if !section.is_claimant(winner) {
                    return Err(DecisionError::WinnerNotClaimant {
                        section: section.name.clone(),
                        winner: winner.clone(),
                    });
                }
            }
            ArbiterDecision::Split { parts } => {
                if parts.is_empty() {
                    return Err(DecisionError::MissingField("parts".to_string()));
                }
                let mut seen = HashSet::new();
                for (i, part) in parts.iter().enumerate() {
                    if part.section.is_empty() {
                        return Err(DecisionError::MissingField(format!("parts[{i}].section")));
                    }
                    if part.proposal.is_null() {
                        return Err(DecisionError::MissingField(format!("parts[{i}].proposal")));
                    }
                    if !section.is_claimant(&part.owner) {
                        return Err(DecisionError::SplitOwnerNotClaimant {
                            section: section.name.clone(),
                            owner: part.owner.clone(),
                        });
                    }
                    if !seen.insert(part.section.as_str()) {
                        return Err(DecisionError::DuplicateSplitSection(part.section.clone()));
                    }
                }
            }
            ArbiterDecision::Merge {
                merged_content,
                contributors,
            } => {
                if merged_content.is_null() {
                    return Err(DecisionError::MissingField("merged_content".to_string()));
                }
                if contributors.is_empty() {
                    return Err(DecisionError::MissingField("contributors".to_string()));
                }
                if let Some(outsider) = contributors.iter().find(|c| !section.is_claimant(c)) {
                    return Err(DecisionError::ContributorNotClaimant {
                        section: section.name.clone(),
                        contributor: outsider.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn required_str<'a>(value: &'a Value, key: &str, label: &str) -> Result<&'a str, DecisionError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DecisionError::MissingField(label.to_string()))
}

fn required_value(value: &Value, key: &str, label: &str) -> Result<Value, DecisionError> {
    value
        .get(key)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| DecisionError::MissingField(label.to_string()))
}

/// Result of a decision that passed validation and was applied to a `Spec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedDecision {
    pub section: String,
    pub kind: DecisionKind,
    /// Sections that exist as a result: the original for ASSIGN/MERGE, the parts for SPLIT.
    pub resulting_sections: Vec<String>,
    /// Claimants that lost their claim on the original section.
    pub discarded: Vec<ProducerId>,
}

#[async_trait]
pub trait ArbiterOracle: Send + Sync {
    /// Break a deadlock on one section.
    async fn decide(&self, request: &ArbitrationRequest)
        -> Result<ArbiterDecision, CollaboratorError>;
}
