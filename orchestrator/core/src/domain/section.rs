// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Section Entity
//!
//! A [`Section`] is one negotiable unit of territory inside a
//! [`Spec`](crate::domain::spec::Spec). Its `status` and `owner` are derived
//! from the claimant list and are recomputed by [`Section::refresh`] after
//! every mutation, so they cannot drift from the claimants.
//!
//! Mutators are `pub(crate)`: only the owning `Spec` may change a section.
//! Callers outside the crate see sections through [`SectionView`], an owned
//! copy that cannot reach back into the document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque proposed content for a section.
pub type Proposal = serde_json::Value;

/// Identifier of a producer (triad) taking part in negotiation.
///
/// Ordering is lexical and is what the engine uses when it applies a round's
/// responses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(String);

impl ProducerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProducerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProducerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionStatus {
    Unclaimed,
    Claimed,
    Contested,
    Frozen,
}

impl SectionStatus {
    /// Status a non-frozen section must have for the given claimant count.
    pub fn for_claimant_count(count: usize) -> Self {
        match count {
            0 => SectionStatus::Unclaimed,
            1 => SectionStatus::Claimed,
            _ => SectionStatus::Contested,
        }
    }
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SectionStatus::Unclaimed => "UNCLAIMED",
            SectionStatus::Claimed => "CLAIMED",
            SectionStatus::Contested => "CONTESTED",
            SectionStatus::Frozen => "FROZEN",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Claim,
    Reclaim,
    Concede,
    Revise,
    ArbiterAssign,
    ArbiterSplit,
    ArbiterMerge,
    ForcedResolution,
    Freeze,
}

/// One audit record. History is append-only and never drives control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub round: u64,
    pub action: HistoryAction,
    pub actor: Option<ProducerId>,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

/// Content produced by a MERGE decision, pinned to the owner it was granted to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedContent {
    pub owner: ProducerId,
    pub content: Proposal,
    pub contributors: Vec<ProducerId>,
}

#[derive(Debug, Clone)]
pub struct Section {
    name: String,
    status: SectionStatus,
    claimants: Vec<ProducerId>,
    proposals: HashMap<ProducerId, Proposal>,
    owner: Option<ProducerId>,
    content: Option<Proposal>,
    merged: Option<MergedContent>,
    history: Vec<HistoryEntry>,
}

impl Section {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: SectionStatus::Unclaimed,
            claimants: Vec::new(),
            proposals: HashMap::new(),
            owner: None,
            content: None,
            merged: None,
            history: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> SectionStatus {
        self.status
    }

    pub fn claimants(&self) -> &[ProducerId] {
        &self.claimants
    }

    pub fn owner(&self) -> Option<&ProducerId> {
        self.owner.as_ref()
    }

    pub fn proposal(&self, producer: &ProducerId) -> Option<&Proposal> {
        self.proposals.get(producer)
    }

    pub fn content(&self) -> Option<&Proposal> {
        self.content.as_ref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn is_claimant(&self, producer: &ProducerId) -> bool {
        self.claimants.contains(producer)
    }

    pub fn is_frozen(&self) -> bool {
        self.status == SectionStatus::Frozen
    }

    /// Earliest-inserted claimant, used for every deterministic tie-break.
    pub fn earliest_claimant(&self) -> Option<&ProducerId> {
        self.claimants.first()
    }

    /// Adds or re-registers a claimant. Returns `true` when the producer was new.
    pub(crate) fn upsert_claim(&mut self, producer: ProducerId, proposal: Proposal) -> bool {
        let is_new = !self.is_claimant(&producer);
        if is_new {
            self.claimants.push(producer.clone());
        }
        self.proposals.insert(producer, proposal);
        self.refresh();
        is_new
    }

    pub(crate) fn remove_claimant(&mut self, producer: &ProducerId) -> bool {
        let Some(index) = self.claimants.iter().position(|c| c == producer) else {
            return false;
        };
        self.claimants.remove(index);
        self.proposals.remove(producer);
        self.refresh();
        true
    }

    pub(crate) fn replace_proposal(&mut self, producer: &ProducerId, proposal: Proposal) -> bool {
        match self.proposals.get_mut(producer) {
            Some(slot) => {
                *slot = proposal;
                true
            }
            None => false,
        }
    }

    /// Drops every claimant except `winner` and returns the ones removed.
    pub(crate) fn retain_only(&mut self, winner: &ProducerId) -> Vec<ProducerId> {
        let (kept, dropped): (Vec<_>, Vec<_>) =
            self.claimants.drain(..).partition(|c| c == winner);
        self.claimants = kept;
        for producer in &dropped {
            self.proposals.remove(producer);
        }
        self.refresh();
        dropped
    }

    /// Replaces all claimants with a single owner holding `merged.content`.
    pub(crate) fn install_merge(&mut self, merged: MergedContent) -> Vec<ProducerId> {
        let previous: Vec<ProducerId> = self.claimants.drain(..).collect();
        self.proposals.clear();
        self.claimants.push(merged.owner.clone());
        self.proposals
            .insert(merged.owner.clone(), merged.content.clone());
        self.merged = Some(merged);
        self.refresh();
        previous
            .into_iter()
            .filter(|p| self.owner.as_ref() != Some(p))
            .collect()
    }

    pub(crate) fn carry_history(&mut self, history: &[HistoryEntry]) {
        self.history.extend_from_slice(history);
    }

    pub(crate) fn record(
        &mut self,
        round: u64,
        action: HistoryAction,
        actor: Option<&ProducerId>,
        detail: impl Into<String>,
    ) {
        self.history.push(HistoryEntry {
            round,
            action,
            actor: actor.cloned(),
            detail: detail.into(),
            recorded_at: Utc::now(),
        });
    }

    /// Finalizes ownership and content. Contested sections fall to the
    /// earliest claimant; unclaimed sections stay ownerless.
    pub(crate) fn seal(&mut self, round: u64) {
        if self.is_frozen() {
            return;
        }

        if self.status == SectionStatus::Contested {
            if let Some(winner) = self.earliest_claimant().cloned() {
                let dropped = self.retain_only(&winner);
                let names: Vec<&str> = dropped.iter().map(ProducerId::as_str).collect();
                self.record(
                    round,
                    HistoryAction::ForcedResolution,
                    Some(&winner),
                    format!("forced at freeze; dropped [{}]", names.join(", ")),
                );
            }
        }

        self.content = match (&self.owner, &self.merged) {
            (Some(owner), Some(merged)) if &merged.owner == owner => Some(merged.content.clone()),
            (Some(owner), _) => self.proposals.get(owner).cloned(),
            (None, _) => None,
        };

        let detail = match &self.owner {
            Some(owner) => format!("sealed for {owner}"),
            None => "sealed without owner".to_string(),
        };
        let owner = self.owner.clone();
        self.status = SectionStatus::Frozen;
        self.record(round, HistoryAction::Freeze, owner.as_ref(), detail);
    }

    /// Recomputes `status` and `owner` from the claimant list. Merge credit
    /// lapses once the merge owner is no longer a claimant.
    pub(crate) fn refresh(&mut self) {
        if self.is_frozen() {
            return;
        }
        if let Some(merged) = &self.merged {
            if !self.claimants.contains(&merged.owner) {
                self.merged = None;
            }
        }
        self.status = SectionStatus::for_claimant_count(self.claimants.len());
        self.owner = match self.status {
            SectionStatus::Claimed => self.claimants.first().cloned(),
            _ => None,
        };
    }

    pub(crate) fn proposals_len(&self) -> usize {
        self.proposals.len()
    }

    pub(crate) fn proposal_producers(&self) -> impl Iterator<Item = &ProducerId> {
        self.proposals.keys()
    }

    pub fn view(&self) -> SectionView {
        SectionView {
            name: self.name.clone(),
            status: self.status,
            claimants: self.claimants.clone(),
            proposals: self
                .claimants
                .iter()
                .filter_map(|c| {
                    self.proposals.get(c).map(|p| CompetingProposal {
                        producer: c.clone(),
                        proposal: p.clone(),
                    })
                })
                .collect(),
            owner: self.owner.clone(),
            content: self.content.clone(),
            contributors: self
                .merged
                .as_ref()
                .map(|m| m.contributors.clone())
                .unwrap_or_default(),
            history: self.history.clone(),
        }
    }
}

#[cfg(test)]
impl Section {
    /// Raw access that skips `refresh`, for building inconsistent states.
    pub(crate) fn claimants_mut(&mut self) -> &mut Vec<ProducerId> {
        &mut self.claimants
    }

    pub(crate) fn proposals_mut(&mut self) -> &mut HashMap<ProducerId, Proposal> {
        &mut self.proposals
    }

    pub(crate) fn set_owner(&mut self, owner: Option<ProducerId>) {
        self.owner = owner;
    }

    pub(crate) fn set_status(&mut self, status: SectionStatus) {
        self.status = status;
    }
}

/// A producer's proposal as seen by other parties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetingProposal {
    pub producer: ProducerId,
    pub proposal: Proposal,
}

/// Owned, read-only copy of a [`Section`]. Proposals are listed in claimant
/// insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionView {
    pub name: String,
    pub status: SectionStatus,
    pub claimants: Vec<ProducerId>,
    pub proposals: Vec<CompetingProposal>,
    pub owner: Option<ProducerId>,
    pub content: Option<Proposal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributors: Vec<ProducerId>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl SectionView {
    pub fn is_claimant(&self, producer: &ProducerId) -> bool {
        self.claimants.contains(producer)
    }

    pub fn proposal_of(&self, producer: &ProducerId) -> Option<&Proposal> {
        self.proposals
            .iter()
            .find(|p| &p.producer == producer)
            .map(|p| &p.proposal)
    }
}
