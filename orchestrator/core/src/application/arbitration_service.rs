// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Arbitration Service
//!
//! Wraps the external [`ArbiterOracle`]: builds the request for a deadlocked
//! section, bounds the call with a timeout, and applies the answer to the
//! `Spec`. Anything that prevents a decision from applying cleanly (oracle
//! error, timeout, malformed or invalid decision) is recovered by assigning
//! the section to its earliest-inserted claimant.
//!
//! Soliciting and applying are separate steps so the engine can ask about
//! every section concurrently and still apply the answers one at a time.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::arbiter::{
    AppliedDecision, ArbiterDecision, ArbiterOracle, ArbitrationContext, ArbitrationRequest,
    DecisionError,
};
use crate::domain::negotiation::CollaboratorError;
use crate::domain::section::{ProducerId, SectionView};
use crate::domain::spec::Spec;

/// An oracle's answer for one section, not yet applied.
#[derive(Debug, Clone)]
pub struct Arbitration {
    pub section: String,
    pub result: Result<ArbiterDecision, DecisionError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fallback {
    pub reason: String,
    pub winner: Option<ProducerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationOutcome {
    pub section: String,
    /// `None` only when neither the decision nor the fallback could be applied.
    pub applied: Option<AppliedDecision>,
    pub fallback: Option<Fallback>,
}

pub struct ArbitrationService {
    oracle: Arc<dyn ArbiterOracle>,
    timeout: Duration,
}

impl ArbitrationService {
    pub fn new(oracle: Arc<dyn ArbiterOracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    pub fn build_request(section: &SectionView, context: ArbitrationContext) -> ArbitrationRequest {
        ArbitrationRequest {
            section: section.name.clone(),
            proposals: section.proposals.clone(),
            context,
        }
    }

    /// Asks the oracle, turning errors and timeouts into a `DecisionError`.
    pub async fn solicit(&self, request: ArbitrationRequest) -> Arbitration {
        let result = match tokio::time::timeout(self.timeout, self.oracle.decide(&request)).await {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(e)) => Err(DecisionError::Collaborator(e)),
            Err(_) => Err(DecisionError::Collaborator(CollaboratorError::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            })),
        };
        Arbitration {
            section: request.section,
            result,
        }
    }

    /// Applies an arbitration, falling back to the earliest claimant when the
    /// decision is unusable.
    pub fn apply(spec: &mut Spec, arbitration: Arbitration) -> ArbitrationOutcome {
        let section = arbitration.section;
        let err = match arbitration
            .result
            .and_then(|decision| spec.apply_arbiter_decision(&section, decision))
        {
            Ok(applied) => {
                return ArbitrationOutcome {
                    section,
                    applied: Some(applied),
                    fallback: None,
                }
            }
            Err(err) => err,
        };

        metrics::counter!("concord_arbiter_fallbacks_total").increment(1);
        let reason = err.to_string();
        let fallback = spec
            .section(&section)
            .as_ref()
            .and_then(ArbiterDecision::fallback_for);

        let Some(decision) = fallback else {
            warn!(
                section = %section,
                reason = %reason,
                "Arbiter decision unusable and section has no claimant to fall back to"
            );
            return ArbitrationOutcome {
                section,
                applied: None,
                fallback: Some(Fallback {
                    reason,
                    winner: None,
                }),
            };
        };

        let winner = match &decision {
            ArbiterDecision::Assign { winner } => Some(winner.clone()),
            _ => None,
        };
        warn!(
            section = %section,
            reason = %reason,
            winner = ?winner,
            "Arbiter decision rejected; assigning earliest claimant"
        );

        match spec.apply_arbiter_decision(&section, decision) {
            Ok(applied) => ArbitrationOutcome {
                section,
                applied: Some(applied),
                fallback: Some(Fallback { reason, winner }),
            },
            Err(e) => {
                error!(section = %section, error = %e, "Fallback assignment failed");
                ArbitrationOutcome {
                    section,
                    applied: None,
                    fallback: Some(Fallback { reason, winner }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arbiter::DecisionKind;
    use crate::domain::section::SectionStatus;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedOracle(Result<ArbiterDecision, CollaboratorError>);

    #[async_trait]
    impl ArbiterOracle for FixedOracle {
        async fn decide(
            &self,
            _request: &ArbitrationRequest,
        ) -> Result<ArbiterDecision, CollaboratorError> {
            self.0.clone()
        }
    }

    struct SlowOracle;

    #[async_trait]
    impl ArbiterOracle for SlowOracle {
        async fn decide(
            &self,
            _request: &ArbitrationRequest,
        ) -> Result<ArbiterDecision, CollaboratorError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(CollaboratorError::Failed("unreachable".to_string()))
        }
    }

    fn contested_spec() -> Spec {
        let mut spec = Spec::new();
        spec.register_claim("B", "layout", json!("b"));
        spec.register_claim("A", "layout", json!("a"));
        spec
    }

    fn context() -> ArbitrationContext {
        ArbitrationContext {
            round: 3,
            temperature: 0.7,
            stuck_rounds: 2,
            prior_concessions: vec![],
        }
    }

    async fn arbitrate(service: &ArbitrationService, spec: &mut Spec) -> ArbitrationOutcome {
        let view = spec.section("layout").unwrap();
        let arbitration = service
            .solicit(ArbitrationService::build_request(&view, context()))
            .await;
        ArbitrationService::apply(spec, arbitration)
    }

    #[tokio::test]
    async fn test_valid_decision_applies() {
        let service = ArbitrationService::new(
            Arc::new(FixedOracle(Ok(ArbiterDecision::Assign {
                winner: "A".into(),
            }))),
            Duration::from_secs(1),
        );
        let mut spec = contested_spec();
        let outcome = arbitrate(&service, &mut spec).await;

        assert!(outcome.fallback.is_none());
        assert_eq!(outcome.applied.map(|a| a.kind), Some(DecisionKind::Assign));
        assert_eq!(spec.get_section_owner("layout"), Some(ProducerId::new("A")));
    }

    #[tokio::test]
    async fn test_invalid_winner_falls_back_to_earliest() {
        let service = ArbitrationService::new(
            Arc::new(FixedOracle(Ok(ArbiterDecision::Assign {
                winner: "nobody".into(),
            }))),
            Duration::from_secs(1),
        );
        let mut spec = contested_spec();
        let outcome = arbitrate(&service, &mut spec).await;

        let fallback = outcome.fallback.unwrap();
        assert_eq!(fallback.winner, Some(ProducerId::new("B")));
        assert!(fallback.reason.contains("nobody"));
        assert_eq!(spec.status_of("layout"), Some(SectionStatus::Claimed));
        assert_eq!(spec.get_section_owner("layout"), Some(ProducerId::new("B")));
    }

    #[tokio::test]
    async fn test_oracle_error_falls_back() {
        let service = ArbitrationService::new(
            Arc::new(FixedOracle(Err(CollaboratorError::Unavailable(
                "arbiter offline".to_string(),
            )))),
            Duration::from_secs(1),
        );
        let mut spec = contested_spec();
        let outcome = arbitrate(&service, &mut spec).await;

        assert!(outcome.fallback.is_some());
        assert_eq!(spec.get_section_owner("layout"), Some(ProducerId::new("B")));
    }

    #[tokio::test]
    async fn test_oracle_timeout_falls_back() {
        let service = ArbitrationService::new(Arc::new(SlowOracle), Duration::from_millis(20));
        let mut spec = contested_spec();
        let view = spec.section("layout").unwrap();
        let arbitration = service
            .solicit(ArbitrationService::build_request(&view, context()))
            .await;

        assert!(matches!(
            arbitration.result,
            Err(DecisionError::Collaborator(CollaboratorError::Timeout { after_ms: 20 }))
        ));
        let outcome = ArbitrationService::apply(&mut spec, arbitration);
        assert!(outcome.applied.is_some());
    }
}
