// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod arbitration_service;
pub mod negotiation_engine;

// Re-export use cases for convenience
pub use arbitration_service::{Arbitration, ArbitrationOutcome, ArbitrationService, Fallback};
pub use negotiation_engine::{
    DoneReason, EngineError, EngineState, NegotiationEngine, RoundOutcome, SessionOutcome,
    SessionReport,
};
