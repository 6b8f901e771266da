// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Spec Aggregate
//!
//! The shared negotiable document: every [`Section`], a `temperature`
//! measuring how malleable the document still is, and a `round` counter.
//!
//! ## Lifecycle
//!
//! | Phase | Allowed |
//! |-------|---------|
//! | open | claims, concessions, revisions, arbiter decisions, round advances |
//! | frozen | nothing; every mutator is recorded as a [`Rejection`] |
//!
//! ## Invariants
//!
//! Held after every public call and checkable with [`Spec::check_invariants`]:
//!
//! - `status` matches the claimant count (or is `FROZEN` once frozen)
//! - `owner` is set iff the section is `CLAIMED`, or `FROZEN` with a claimant
//! - every proposal belongs to a current claimant and vice versa
//! - `temperature` stays in `[0.0, 1.0]` and never rises
//! - `temperature` and `round` do not move once frozen
//!
//! The `Spec` performs no I/O and has no interior mutability. A single writer
//! (the negotiation engine) owns it for the whole session.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::arbiter::{
    AppliedDecision, ArbiterDecision, DecisionError, MergeOwnership, SplitPart,
};
use crate::domain::section::{
    HistoryAction, MergedContent, ProducerId, Proposal, Section, SectionStatus, SectionView,
};

pub const DEFAULT_TEMPERATURE_DECAY: f64 = 0.1;

/// Temperatures are kept to nine decimal places so repeated decay lands on
/// the same value a configured threshold parses to.
const TEMPERATURE_SCALE: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    RegisterClaim,
    Concede,
    UpdateProposal,
    AdvanceRound,
    ArbiterDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    Frozen,
    UnknownSection,
    NotAClaimant,
    InvalidDecision { detail: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Frozen => f.write_str("spec is frozen"),
            RejectionReason::UnknownSection => f.write_str("section does not exist"),
            RejectionReason::NotAClaimant => f.write_str("producer is not a claimant"),
            RejectionReason::InvalidDecision { detail } => {
                write!(f, "invalid arbiter decision: {detail}")
            }
        }
    }
}

/// A mutation that was refused. Rejections never raise; they are logged here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub round: u64,
    pub operation: MutationKind,
    pub producer: Option<ProducerId>,
    pub section: Option<String>,
    pub reason: RejectionReason,
}

/// Counts (and names) of sections that would not yield content as things stand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub total_sections: usize,
    /// Ownerless sections.
    pub coverage_gaps: usize,
    /// Sections still contested.
    pub unresolved_conflicts: usize,
    pub gap_sections: Vec<String>,
    pub conflict_sections: Vec<String>,
}

impl CoverageReport {
    pub fn is_complete(&self) -> bool {
        self.coverage_gaps == 0 && self.unresolved_conflicts == 0
    }
}

/// Owned copy of the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecSnapshot {
    pub round: u64,
    pub temperature: f64,
    pub frozen: bool,
    pub sections: Vec<SectionView>,
}

impl SpecSnapshot {
    pub fn section(&self, name: &str) -> Option<&SectionView> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn contested(&self) -> impl Iterator<Item = &SectionView> {
        self.sections
            .iter()
            .filter(|s| s.status == SectionStatus::Contested)
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvariantViolation {
    #[error("section `{section}` has status {actual} but {claimants} claimant(s) imply {expected}")]
    StatusMismatch {
        section: String,
        expected: SectionStatus,
        actual: SectionStatus,
        claimants: usize,
    },

    #[error("section `{section}` owner is inconsistent with status {status}")]
    OwnerMismatch {
        section: String,
        status: SectionStatus,
    },

    #[error("section `{section}` holds a proposal from non-claimant `{producer}`")]
    OrphanProposal {
        section: String,
        producer: ProducerId,
    },

    #[error("section `{section}` has claimant `{producer}` without a proposal")]
    MissingProposal {
        section: String,
        producer: ProducerId,
    },

    #[error("section `{section}` lists claimant `{producer}` more than once")]
    DuplicateClaimant {
        section: String,
        producer: ProducerId,
    },

    #[error("section `{section}` is not frozen although the spec is")]
    ThawedSection { section: String },

    #[error("temperature {0} is outside [0.0, 1.0]")]
    TemperatureOutOfRange(f64),

    #[error("frozen spec has temperature {0}")]
    FrozenTemperature(f64),
}

#[derive(Debug, Clone)]
pub struct Spec {
    sections: BTreeMap<String, Section>,
    temperature: f64,
    round: u64,
    frozen: bool,
    decay: f64,
    merge_ownership: MergeOwnership,
    rejections: Vec<Rejection>,
}

impl Default for Spec {
    fn default() -> Self {
        Self::new()
    }
}

impl Spec {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_TEMPERATURE_DECAY, MergeOwnership::default())
    }

    /// `decay` is clamped into `[0.0, 1.0]`.
    pub fn with_settings(decay: f64, merge_ownership: MergeOwnership) -> Self {
        Self {
            sections: BTreeMap::new(),
            temperature: 1.0,
            round: 0,
            frozen: false,
            decay: decay.clamp(0.0, 1.0),
            merge_ownership,
            rejections: Vec::new(),
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    pub fn section(&self, name: &str) -> Option<SectionView> {
        self.sections.get(name).map(Section::view)
    }

    pub fn section_names(&self) -> Vec<String> {
        self.sections.keys().cloned().collect()
    }

    pub fn status_of(&self, name: &str) -> Option<SectionStatus> {
        self.sections.get(name).map(Section::status)
    }

    // ── Mutators ─────────────────────────────────────────────────────────────

    /// Registers interest in a section, creating it if needed. Returns `false`
    /// when the spec is frozen.
    pub fn register_claim(
        &mut self,
        producer: impl Into<ProducerId>,
        section: &str,
        proposal: Proposal,
    ) -> bool {
        let producer = producer.into();
        if self.frozen {
            self.reject(
                MutationKind::RegisterClaim,
                Some(&producer),
                Some(section),
                RejectionReason::Frozen,
            );
            return false;
        }

        let round = self.round;
        let entry = self
            .sections
            .entry(section.to_string())
            .or_insert_with(|| Section::new(section));
        let is_new = entry.upsert_claim(producer.clone(), proposal);
        let (action, detail) = if is_new {
            (HistoryAction::Claim, format!("status now {}", entry.status()))
        } else {
            (HistoryAction::Reclaim, "proposal overwritten".to_string())
        };
        entry.record(round, action, Some(&producer), detail);
        debug!(section, producer = %producer, status = %entry.status(), "Claim registered");
        true
    }

    /// Withdraws a claim. Returns `false` if the section is missing, the spec
    /// is frozen, or the producer was not a claimant.
    pub fn concede(&mut self, producer: impl Into<ProducerId>, section: &str) -> bool {
        let producer = producer.into();
        if self.frozen {
            self.reject(
                MutationKind::Concede,
                Some(&producer),
                Some(section),
                RejectionReason::Frozen,
            );
            return false;
        }

        let round = self.round;
        let Some(entry) = self.sections.get_mut(section) else {
            self.reject(
                MutationKind::Concede,
                Some(&producer),
                Some(section),
                RejectionReason::UnknownSection,
            );
            return false;
        };
        if !entry.remove_claimant(&producer) {
            self.reject(
                MutationKind::Concede,
                Some(&producer),
                Some(section),
                RejectionReason::NotAClaimant,
            );
            return false;
        }

        let detail = match entry.owner() {
            Some(owner) => format!("{owner} now owns the section"),
            None => format!("status now {}", entry.status()),
        };
        entry.record(round, HistoryAction::Concede, Some(&producer), detail);
        debug!(section, producer = %producer, status = %entry.status(), "Claim conceded");
        true
    }

    /// Replaces a claimant's proposal.
    pub fn update_proposal(
        &mut self,
        producer: impl Into<ProducerId>,
        section: &str,
        proposal: Proposal,
    ) -> bool {
        let producer = producer.into();
        if self.frozen {
            self.reject(
                MutationKind::UpdateProposal,
                Some(&producer),
                Some(section),
                RejectionReason::Frozen,
            );
            return false;
        }

        let round = self.round;
        let Some(entry) = self.sections.get_mut(section) else {
            self.reject(
                MutationKind::UpdateProposal,
                Some(&producer),
                Some(section),
                RejectionReason::UnknownSection,
            );
            return false;
        };
        if !entry.replace_proposal(&producer, proposal) {
            self.reject(
                MutationKind::UpdateProposal,
                Some(&producer),
                Some(section),
                RejectionReason::NotAClaimant,
            );
            return false;
        }
        entry.record(round, HistoryAction::Revise, Some(&producer), "proposal revised");
        true
    }

    /// Moves to the next round and cools the document. Returns the new round,
    /// or the unchanged round when frozen.
    pub fn advance_round(&mut self) -> u64 {
        if self.frozen {
            self.reject(MutationKind::AdvanceRound, None, None, RejectionReason::Frozen);
            return self.round;
        }
        self.round += 1;
        self.temperature = self.cooled_temperature();
        self.round
    }

    /// Temperature after `round` rounds of decay, derived from the round count
    /// rather than accumulated so that error does not build up.
    fn cooled_temperature(&self) -> f64 {
        let raw = 1.0 - self.decay * self.round as f64;
        let snapped = (raw * TEMPERATURE_SCALE).round() / TEMPERATURE_SCALE;
        snapped.min(self.temperature).max(0.0)
    }

    /// Validates and applies an arbiter decision. Nothing is mutated when an
    /// error is returned.
    pub fn apply_arbiter_decision(
        &mut self,
        section: &str,
        decision: ArbiterDecision,
    ) -> Result<AppliedDecision, DecisionError> {
        if let Err(err) = self.check_decision(section, &decision) {
            let reason = match &err {
                DecisionError::SectionUnavailable { .. } if self.frozen => RejectionReason::Frozen,
                DecisionError::SectionUnavailable { .. } => RejectionReason::UnknownSection,
                other => RejectionReason::InvalidDecision {
                    detail: other.to_string(),
                },
            };
            self.reject(MutationKind::ArbiterDecision, None, Some(section), reason);
            return Err(err);
        }

        let kind = decision.kind();
        let round = self.round;
        let applied = match decision {
            ArbiterDecision::Assign { winner } => self.apply_assign(section, &winner, round),
            ArbiterDecision::Split { parts } => self.apply_split(section, parts, round),
            ArbiterDecision::Merge {
                merged_content,
                contributors,
            } => self.apply_merge(section, merged_content, contributors, round),
        };

        info!(
            section,
            decision = %kind,
            resulting = ?applied.resulting_sections,
            "Arbiter decision applied"
        );
        Ok(applied)
    }

    fn check_decision(
        &self,
        section: &str,
        decision: &ArbiterDecision,
    ) -> Result<(), DecisionError> {
        if self.frozen {
            return Err(DecisionError::SectionUnavailable {
                section: section.to_string(),
                reason: "spec is frozen".to_string(),
            });
        }
        let view = self
            .sections
            .get(section)
            .map(Section::view)
            .ok_or_else(|| DecisionError::SectionUnavailable {
                section: section.to_string(),
                reason: "section does not exist".to_string(),
            })?;
        decision.validate(&view)?;

        if let ArbiterDecision::Split { parts } = decision {
            if let Some(taken) = parts
                .iter()
                .find(|p| p.section != section && self.sections.contains_key(&p.section))
            {
                return Err(DecisionError::SectionExists(taken.section.clone()));
            }
        }
        if let ArbiterDecision::Merge { contributors, .. } = decision {
            if self.merge_ownership.owner_for(contributors).is_none() {
                return Err(DecisionError::MissingField("contributors".to_string()));
            }
        }
        Ok(())
    }

    fn apply_assign(&mut self, section: &str, winner: &ProducerId, round: u64) -> AppliedDecision {
        let mut discarded = Vec::new();
        if let Some(entry) = self.sections.get_mut(section) {
            discarded = entry.retain_only(winner);
            let names: Vec<&str> = discarded.iter().map(ProducerId::as_str).collect();
            entry.record(
                round,
                HistoryAction::ArbiterAssign,
                Some(winner),
                format!("arbiter assigned; removed [{}]", names.join(", ")),
            );
        }
        AppliedDecision {
            section: section.to_string(),
            kind: crate::domain::arbiter::DecisionKind::Assign,
            resulting_sections: vec![section.to_string()],
            discarded,
        }
    }

    fn apply_split(&mut self, section: &str, parts: Vec<SplitPart>, round: u64) -> AppliedDecision {
        let original = self.sections.remove(section);
        let (history, claimants) = original
            .map(|s| (s.history().to_vec(), s.claimants().to_vec()))
            .unwrap_or_default();

        let owners: HashSet<&ProducerId> = parts.iter().map(|p| &p.owner).collect();
        let discarded: Vec<ProducerId> = claimants
            .into_iter()
            .filter(|c| !owners.contains(c))
            .collect();

        let mut resulting = Vec::with_capacity(parts.len());
        for part in parts {
            let mut created = Section::new(part.section.clone());
            created.carry_history(&history);
            created.upsert_claim(part.owner.clone(), part.proposal);
            created.record(
                round,
                HistoryAction::ArbiterSplit,
                Some(&part.owner),
                format!("split from `{section}`"),
            );
            resulting.push(part.section.clone());
            self.sections.insert(part.section, created);
        }

        AppliedDecision {
            section: section.to_string(),
            kind: crate::domain::arbiter::DecisionKind::Split,
            resulting_sections: resulting,
            discarded,
        }
    }

    fn apply_merge(
        &mut self,
        section: &str,
        merged_content: Proposal,
        contributors: Vec<ProducerId>,
        round: u64,
    ) -> AppliedDecision {
        let mut discarded = Vec::new();
        let owner = self.merge_ownership.owner_for(&contributors);
        if let (Some(entry), Some(owner)) = (self.sections.get_mut(section), owner) {
            let names: Vec<String> = contributors.iter().map(ToString::to_string).collect();
            let replaced = entry.install_merge(MergedContent {
                owner: owner.clone(),
                content: merged_content,
                contributors: contributors.clone(),
            });
            discarded = replaced
                .into_iter()
                .filter(|p| !contributors.contains(p))
                .collect();
            entry.record(
                round,
                HistoryAction::ArbiterMerge,
                Some(&owner),
                format!("merged; contributors [{}]", names.join(", ")),
            );
        }
        AppliedDecision {
            section: section.to_string(),
            kind: crate::domain::arbiter::DecisionKind::Merge,
            resulting_sections: vec![section.to_string()],
            discarded,
        }
    }

    /// Seals ownership and content. Returns `false` if already frozen, in
    /// which case nothing changes.
    pub fn freeze(&mut self) -> bool {
        if self.frozen {
            debug!("Freeze requested on an already frozen spec");
            return false;
        }

        let round = self.round;
        let mut forced = 0usize;
        let mut ownerless = 0usize;
        for section in self.sections.values_mut() {
            match section.status() {
                SectionStatus::Contested => forced += 1,
                SectionStatus::Unclaimed => ownerless += 1,
                _ => {}
            }
            section.seal(round);
        }

        if forced > 0 || ownerless > 0 {
            warn!(
                forced,
                ownerless, "Spec frozen with unresolved sections; defaults applied"
            );
        }

        self.frozen = true;
        self.temperature = 0.0;
        info!(round, sections = self.sections.len(), "Spec frozen");
        true
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Names of contested sections in ascending order.
    pub fn get_contested_sections(&self) -> Vec<String> {
        self.sections
            .values()
            .filter(|s| s.status() == SectionStatus::Contested)
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn get_section_owner(&self, name: &str) -> Option<ProducerId> {
        self.sections.get(name).and_then(|s| s.owner().cloned())
    }

    pub fn get_section_content(&self, name: &str) -> Option<Proposal> {
        self.sections.get(name).and_then(|s| s.content().cloned())
    }

    pub fn get_coverage_report(&self) -> CoverageReport {
        let mut report = CoverageReport {
            total_sections: self.sections.len(),
            ..CoverageReport::default()
        };
        for section in self.sections.values() {
            if section.owner().is_none() {
                report.gap_sections.push(section.name().to_string());
            }
            if section.status() == SectionStatus::Contested {
                report.conflict_sections.push(section.name().to_string());
            }
        }
        report.coverage_gaps = report.gap_sections.len();
        report.unresolved_conflicts = report.conflict_sections.len();
        report
    }

    pub fn snapshot(&self) -> SpecSnapshot {
        SpecSnapshot {
            round: self.round,
            temperature: self.temperature,
            frozen: self.frozen,
            sections: self.sections.values().map(Section::view).collect(),
        }
    }

    /// Returns the first inconsistency found, if any.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(InvariantViolation::TemperatureOutOfRange(self.temperature));
        }
        if self.frozen && self.temperature != 0.0 {
            return Err(InvariantViolation::FrozenTemperature(self.temperature));
        }

        for section in self.sections.values() {
            let name = section.name().to_string();
            let claimants = section.claimants();

            let mut seen = HashSet::new();
            for producer in claimants {
                if !seen.insert(producer) {
                    return Err(InvariantViolation::DuplicateClaimant {
                        section: name,
                        producer: producer.clone(),
                    });
                }
                if section.proposal(producer).is_none() {
                    return Err(InvariantViolation::MissingProposal {
                        section: name,
                        producer: producer.clone(),
                    });
                }
            }
            if section.proposals_len() != claimants.len() {
                if let Some(orphan) = section
                    .proposal_producers()
                    .find(|p| !section.is_claimant(p))
                {
                    return Err(InvariantViolation::OrphanProposal {
                        section: name,
                        producer: orphan.clone(),
                    });
                }
            }

            let status = section.status();
            if self.frozen {
                if status != SectionStatus::Frozen {
                    return Err(InvariantViolation::ThawedSection { section: name });
                }
                if section.owner().is_some() == claimants.is_empty() {
                    return Err(InvariantViolation::OwnerMismatch { section: name, status });
                }
                continue;
            }

            let expected = SectionStatus::for_claimant_count(claimants.len());
            if status != expected {
                return Err(InvariantViolation::StatusMismatch {
                    section: name,
                    expected,
                    actual: status,
                    claimants: claimants.len(),
                });
            }
            let owner_ok = match status {
                SectionStatus::Claimed => section.owner() == claimants.first(),
                _ => section.owner().is_none(),
            };
            if !owner_ok {
                return Err(InvariantViolation::OwnerMismatch { section: name, status });
            }
        }
        Ok(())
    }

    fn reject(
        &mut self,
        operation: MutationKind,
        producer: Option<&ProducerId>,
        section: Option<&str>,
        reason: RejectionReason,
    ) {
        debug!(?operation, section = ?section, %reason, "Mutation rejected");
        self.rejections.push(Rejection {
            round: self.round,
            operation,
            producer: producer.cloned(),
            section: section.map(str::to_string),
            reason,
        });
    }
}

#[cfg(test)]
impl Spec {
    pub(crate) fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arbiter::DecisionKind;
    use serde_json::json;

    #[test]
    fn test_layout_scenario() {
        let mut spec = Spec::new();
        spec.register_claim("A", "layout", json!({"columns": 2}));
        spec.register_claim("B", "layout", json!({"columns": 3}));
        assert_eq!(spec.get_contested_sections(), vec!["layout".to_string()]);

        assert!(spec.concede("B", "layout"));
        assert!(spec.get_contested_sections().is_empty());
        assert_eq!(spec.get_section_owner("layout"), Some(ProducerId::new("A")));

        assert!(spec.freeze());
        assert!(spec.is_frozen());
        assert_eq!(
            spec.get_section_content("layout"),
            Some(json!({"columns": 2}))
        );
        assert!(spec.check_invariants().is_ok());
    }

    #[test]
    fn test_single_claim_survives_freeze_unchanged() {
        let mut spec = Spec::new();
        let proposal = json!({"title": "Welcome", "blocks": [1, 2, 3]});
        spec.register_claim("A", "hero", proposal.clone());
        assert_eq!(spec.status_of("hero"), Some(SectionStatus::Claimed));
        assert_eq!(spec.get_section_owner("hero"), Some(ProducerId::new("A")));

        spec.freeze();
        assert_eq!(spec.get_section_content("hero"), Some(proposal));
    }

    #[test]
    fn test_concede_rejections() {
        let mut spec = Spec::new();
        assert!(!spec.concede("A", "missing"));
        spec.register_claim("A", "nav", json!(1));
        assert!(!spec.concede("B", "nav"));

        let reasons: Vec<_> = spec.rejections().iter().map(|r| r.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![RejectionReason::UnknownSection, RejectionReason::NotAClaimant]
        );
    }

    #[test]
    fn test_last_concession_reverts_to_unclaimed() {
        let mut spec = Spec::new();
        spec.register_claim("A", "nav", json!(1));
        assert!(spec.concede("A", "nav"));
        assert_eq!(spec.status_of("nav"), Some(SectionStatus::Unclaimed));
        assert_eq!(spec.get_section_owner("nav"), None);
        assert!(spec.check_invariants().is_ok());
    }

    #[test]
    fn test_update_proposal_requires_claimant() {
        let mut spec = Spec::new();
        spec.register_claim("A", "nav", json!("v1"));
        assert!(spec.update_proposal("A", "nav", json!("v2")));
        assert!(!spec.update_proposal("B", "nav", json!("v3")));
        assert_eq!(
            spec.section("nav").and_then(|s| s.proposal_of(&"A".into()).cloned()),
            Some(json!("v2"))
        );
    }

    #[test]
    fn test_frozen_spec_rejects_everything() {
        let mut spec = Spec::new();
        spec.register_claim("A", "nav", json!(1));
        spec.freeze();
        let round = spec.round();

        assert!(!spec.register_claim("B", "nav", json!(2)));
        assert!(!spec.concede("A", "nav"));
        assert!(!spec.update_proposal("A", "nav", json!(3)));
        assert_eq!(spec.advance_round(), round);
        assert!(spec
            .apply_arbiter_decision("nav", ArbiterDecision::Assign { winner: "A".into() })
            .is_err());

        assert_eq!(spec.temperature(), 0.0);
        assert!(spec
            .rejections()
            .iter()
            .all(|r| r.reason == RejectionReason::Frozen));
        assert_eq!(spec.rejections().len(), 5);
    }

    #[test]
    fn test_freeze_is_idempotent() {
        let mut spec = Spec::new();
        spec.register_claim("A", "nav", json!(1));
        spec.register_claim("B", "nav", json!(2));
        spec.register_claim("C", "footer", json!(3));
        spec.advance_round();

        assert!(spec.freeze());
        let once = spec.snapshot();
        assert!(!spec.freeze());
        assert_eq!(spec.snapshot(), once);
    }

    #[test]
    fn test_forced_freeze_defaults() {
        let mut spec = Spec::new();
        spec.register_claim("B", "nav", json!("b"));
        spec.register_claim("A", "nav", json!("a"));
        spec.register_claim("A", "aside", json!("x"));
        spec.concede("A", "aside");

        spec.freeze();
        assert_eq!(spec.get_section_owner("nav"), Some(ProducerId::new("B")));
        assert_eq!(spec.get_section_content("nav"), Some(json!("b")));
        assert_eq!(spec.get_section_owner("aside"), None);

        let report = spec.get_coverage_report();
        assert_eq!(report.coverage_gaps, 1);
        assert_eq!(report.gap_sections, vec!["aside".to_string()]);
        assert_eq!(report.unresolved_conflicts, 0);
        assert!(spec.check_invariants().is_ok());
    }

    #[test]
    fn test_temperature_floor_and_monotonic_round() {
        let mut spec = Spec::with_settings(0.3, MergeOwnership::Synthetic);
        let mut last_round = spec.round();
        let mut last_temp = spec.temperature();
        for _ in 0..10 {
            let round = spec.advance_round();
            assert!(round > last_round);
            assert!(spec.temperature() <= last_temp);
            assert!(spec.temperature() >= 0.0);
            last_round = round;
            last_temp = spec.temperature();
        }
        assert_eq!(spec.temperature(), 0.0);
    }

    #[test]
    fn test_decimal_decay_lands_on_boundaries() {
        let mut spec = Spec::with_settings(0.1, MergeOwnership::Synthetic);
        for _ in 0..5 {
            spec.advance_round();
        }
        assert_eq!(spec.temperature(), 0.5);

        spec.advance_round();
        spec.advance_round();
        assert_eq!(spec.temperature(), 0.3);

        for _ in 0..3 {
            spec.advance_round();
        }
        assert_eq!(spec.round(), 10);
        assert_eq!(spec.temperature(), 0.0);
    }

    fn contested_nav() -> Spec {
        let mut spec = Spec::new();
        spec.register_claim("A", "nav", json!("a"));
        spec.register_claim("B", "nav", json!("b"));
        spec.register_claim("C", "hero", json!("c"));
        spec
    }

    #[test]
    fn test_check_invariants_detects_each_violation() {
        let mut spec = contested_nav();
        spec.section_mut("nav").unwrap()
            .claimants_mut()
            .push(ProducerId::new("A"));
        assert!(matches!(
            spec.check_invariants(),
            Err(InvariantViolation::DuplicateClaimant { ref section, .. }) if section == "nav"
        ));

        let mut spec = contested_nav();
        spec.section_mut("nav").unwrap()
            .claimants_mut()
            .push(ProducerId::new("Z"));
        assert!(matches!(
            spec.check_invariants(),
            Err(InvariantViolation::MissingProposal { ref producer, .. })
                if producer.as_str() == "Z"
        ));

        let mut spec = contested_nav();
        spec.section_mut("nav").unwrap()
            .proposals_mut()
            .insert(ProducerId::new("Z"), json!("z"));
        assert!(matches!(
            spec.check_invariants(),
            Err(InvariantViolation::OrphanProposal { ref producer, .. })
                if producer.as_str() == "Z"
        ));

        let mut spec = contested_nav();
        let hero = spec.section_mut("hero").unwrap();
        hero.claimants_mut().push(ProducerId::new("D"));
        hero.proposals_mut().insert(ProducerId::new("D"), json!("d"));
        assert!(matches!(
            spec.check_invariants(),
            Err(InvariantViolation::StatusMismatch {
                expected: SectionStatus::Contested,
                actual: SectionStatus::Claimed,
                claimants: 2,
                ..
            })
        ));

        let mut spec = contested_nav();
        spec.section_mut("hero").unwrap().set_owner(Some(ProducerId::new("B")));
        assert!(matches!(
            spec.check_invariants(),
            Err(InvariantViolation::OwnerMismatch {
                status: SectionStatus::Claimed,
                ..
            })
        ));

        let mut spec = contested_nav();
        spec.temperature = 1.5;
        assert!(matches!(
            spec.check_invariants(),
            Err(InvariantViolation::TemperatureOutOfRange(t)) if t == 1.5
        ));

        let mut spec = contested_nav();
        spec.freeze();
        spec.temperature = 0.2;
        assert!(matches!(
            spec.check_invariants(),
            Err(InvariantViolation::FrozenTemperature(_))
        ));

        let mut spec = contested_nav();
        spec.freeze();
        spec.section_mut("nav").unwrap().set_status(SectionStatus::Claimed);
        assert!(matches!(
            spec.check_invariants(),
            Err(InvariantViolation::ThawedSection { ref section }) if section == "nav"
        ));

        let mut spec = contested_nav();
        spec.freeze();
        spec.section_mut("hero").unwrap().set_owner(None);
        assert!(matches!(
            spec.check_invariants(),
            Err(InvariantViolation::OwnerMismatch {
                status: SectionStatus::Frozen,
                ..
            })
        ));
    }

    #[test]
    fn test_assign_discards_other_claimants() {
        let mut spec = Spec::new();
        for p in ["A", "B", "C"] {
            spec.register_claim(p, "layout", json!(p));
        }
        let applied = spec
            .apply_arbiter_decision("layout", ArbiterDecision::Assign { winner: "B".into() })
            .unwrap();
        assert_eq!(applied.kind, DecisionKind::Assign);
        assert_eq!(applied.discarded, vec![ProducerId::new("A"), ProducerId::new("C")]);
        assert_eq!(spec.status_of("layout"), Some(SectionStatus::Claimed));
        assert_eq!(spec.get_section_owner("layout"), Some(ProducerId::new("B")));
    }

    #[test]
    fn test_invalid_decision_leaves_spec_untouched() {
        let mut spec = Spec::new();
        spec.register_claim("A", "layout", json!(1));
        spec.register_claim("B", "layout", json!(2));
        let before = spec.snapshot();

        let err = spec
            .apply_arbiter_decision("layout", ArbiterDecision::Assign { winner: "Z".into() })
            .unwrap_err();
        assert!(matches!(err, DecisionError::WinnerNotClaimant { .. }));
        assert_eq!(spec.snapshot(), before);
        assert_eq!(spec.rejections().len(), 1);
    }

    #[test]
    fn test_split_replaces_section() {
        let mut spec = Spec::new();
        spec.register_claim("A", "page", json!("a"));
        spec.register_claim("B", "page", json!("b"));
        spec.register_claim("C", "page", json!("c"));

        let decision = ArbiterDecision::Split {
            parts: vec![
                SplitPart {
                    section: "page.left".to_string(),
                    owner: "A".into(),
                    proposal: json!("left"),
                },
                SplitPart {
                    section: "page.right".to_string(),
                    owner: "B".into(),
                    proposal: json!("right"),
                },
            ],
        };
        let applied = spec.apply_arbiter_decision("page", decision).unwrap();

        assert_eq!(applied.resulting_sections, vec!["page.left", "page.right"]);
        assert_eq!(applied.discarded, vec![ProducerId::new("C")]);
        assert!(spec.section("page").is_none());
        assert_eq!(spec.get_section_owner("page.left"), Some(ProducerId::new("A")));
        assert_eq!(spec.status_of("page.right"), Some(SectionStatus::Claimed));
        assert!(spec.check_invariants().is_ok());
    }

    #[test]
    fn test_split_cannot_overwrite_existing_section() {
        let mut spec = Spec::new();
        spec.register_claim("A", "page", json!("a"));
        spec.register_claim("B", "page", json!("b"));
        spec.register_claim("C", "footer", json!("c"));

        let decision = ArbiterDecision::Split {
            parts: vec![SplitPart {
                section: "footer".to_string(),
                owner: "A".into(),
                proposal: json!("x"),
            }],
        };
        assert_eq!(
            spec.apply_arbiter_decision("page", decision),
            Err(DecisionError::SectionExists("footer".to_string()))
        );
        assert_eq!(spec.get_section_owner("footer"), Some(ProducerId::new("C")));
    }

    #[test]
    fn test_merge_content_reaches_freeze() {
        let mut spec = Spec::new();
        spec.register_claim("A", "hero", json!("a"));
        spec.register_claim("B", "hero", json!("b"));

        let merged = json!({"headline": "a", "image": "b"});
        spec.apply_arbiter_decision(
            "hero",
            ArbiterDecision::Merge {
                merged_content: merged.clone(),
                contributors: vec!["A".into(), "B".into()],
            },
        )
        .unwrap();

        assert_eq!(
            spec.get_section_owner("hero"),
            Some(ProducerId::new("merge(A+B)"))
        );
        let view = spec.section("hero").unwrap();
        assert_eq!(view.contributors, vec![ProducerId::new("A"), ProducerId::new("B")]);
        assert_eq!(
            view.history.last().map(|h| h.action),
            Some(HistoryAction::ArbiterMerge)
        );

        spec.freeze();
        assert_eq!(spec.get_section_content("hero"), Some(merged));
    }

    #[test]
    fn test_assign_after_merge_clears_contributors() {
        let mut spec = Spec::new();
        spec.register_claim("A", "hero", json!("a"));
        spec.register_claim("B", "hero", json!("b"));
        spec.apply_arbiter_decision(
            "hero",
            ArbiterDecision::Merge {
                merged_content: json!("ab"),
                contributors: vec!["A".into(), "B".into()],
            },
        )
        .unwrap();

        spec.register_claim("C", "hero", json!("c"));
        spec.apply_arbiter_decision("hero", ArbiterDecision::Assign { winner: "C".into() })
            .unwrap();

        let view = spec.section("hero").unwrap();
        assert_eq!(view.owner, Some(ProducerId::new("C")));
        assert!(view.contributors.is_empty());

        spec.freeze();
        assert_eq!(spec.get_section_content("hero"), Some(json!("c")));
    }

    #[test]
    fn test_merge_first_contributor_ownership() {
        let mut spec = Spec::with_settings(0.1, MergeOwnership::FirstContributor);
        spec.register_claim("A", "hero", json!("a"));
        spec.register_claim("B", "hero", json!("b"));
        spec.register_claim("C", "hero", json!("c"));

        let applied = spec
            .apply_arbiter_decision(
                "hero",
                ArbiterDecision::Merge {
                    merged_content: json!("ab"),
                    contributors: vec!["B".into(), "A".into()],
                },
            )
            .unwrap();
        assert_eq!(applied.discarded, vec![ProducerId::new("C")]);
        assert_eq!(spec.get_section_owner("hero"), Some(ProducerId::new("B")));
        assert!(spec.check_invariants().is_ok());
    }

    #[test]
    fn test_coverage_report_counts() {
        let mut spec = Spec::new();
        spec.register_claim("A", "one", json!(1));
        spec.register_claim("A", "two", json!(2));
        spec.register_claim("B", "two", json!(2));
        spec.register_claim("A", "three", json!(3));
        spec.concede("A", "three");

        let report = spec.get_coverage_report();
        assert_eq!(report.total_sections, 3);
        assert_eq!(report.unresolved_conflicts, 1);
        assert_eq!(report.coverage_gaps, 2);
        assert!(!report.is_complete());
    }
}
