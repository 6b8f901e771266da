// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Scenario files
//!
//! A scenario is a YAML description of one negotiation: the initial claims,
//! how each producer answers (scripted moves), and which arbiter policy
//! settles deadlocks.
//!
//! ```yaml
//! name: homepage
//! claims:
//!   - { producer: A, section: nav, proposal: { links: 4 } }
//!   - { producer: B, section: nav, proposal: { links: 6 } }
//! responders:
//!   B:
//!     moves:
//!       nav: [ { action: hold }, { action: concede } ]
//! arbiter: assign_first
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use concord_core::application::negotiation_engine::NegotiationEngine;
use concord_core::domain::section::Proposal;
use concord_core::domain::session_config::SessionConfig;
use concord_core::infrastructure::scripted::{
    ArbiterPolicy, PolicyArbiter, ScriptedMove, ScriptedResponder,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub claims: Vec<ScenarioClaim>,

    /// Producers without an entry here always HOLD.
    #[serde(default)]
    pub responders: BTreeMap<String, ResponderScript>,

    #[serde(default)]
    pub arbiter: ArbiterPolicy,

    /// Freeze the document once the session is done.
    #[serde(default = "default_freeze")]
    pub freeze: bool,
}

fn default_freeze() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioClaim {
    pub producer: String,
    pub section: String,
    pub proposal: Proposal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponderScript {
    #[serde(default)]
    pub moves: BTreeMap<String, Vec<ScriptedMove>>,

    #[serde(default)]
    pub fallback: Option<ScriptedMove>,
}

impl Scenario {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {:?}", path))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse scenario {:?}", path))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("scenario name cannot be empty");
        }
        if self.claims.is_empty() {
            anyhow::bail!("scenario '{}' has no claims", self.name);
        }
        if let Some(claim) = self
            .claims
            .iter()
            .find(|c| c.producer.is_empty() || c.section.is_empty())
        {
            anyhow::bail!(
                "claim needs both producer and section (got producer '{}', section '{}')",
                claim.producer,
                claim.section
            );
        }
        Ok(())
    }

    /// Every producer mentioned by a claim or a script, sorted.
    pub fn producers(&self) -> Vec<String> {
        let mut producers: Vec<String> = self
            .claims
            .iter()
            .map(|c| c.producer.clone())
            .chain(self.responders.keys().cloned())
            .collect();
        producers.sort();
        producers.dedup();
        producers
    }

    /// Builds an engine with scripted responders and claims registered.
    pub fn build_engine(&self, config: SessionConfig) -> NegotiationEngine {
        let arbiter = Arc::new(PolicyArbiter::new(self.arbiter));
        let mut engine = NegotiationEngine::new(config, arbiter);

        for producer in self.producers() {
            let script = self.responders.get(&producer).cloned().unwrap_or_default();
            let mut responder = ScriptedResponder::new(producer.as_str());
            for (section, moves) in script.moves {
                responder = responder.with_moves(section, moves);
            }
            if let Some(fallback) = script.fallback {
                responder = responder.with_fallback(fallback);
            }
            engine.register_responder(producer.as_str(), Arc::new(responder));
        }

        for claim in &self.claims {
            engine.register_claim(
                claim.producer.as_str(),
                &claim.section,
                claim.proposal.clone(),
            );
        }
        engine
    }
}
