// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Concord Core
//!
//! Negotiation engine for a shared specification document written by
//! competing producers.
//!
//! # Architecture
//!
//! - **Domain:** `Spec`, sections, negotiation and arbiter contracts, session config
//! - **Application:** `NegotiationEngine`, `ArbitrationService`
//! - **Infrastructure:** event bus, scripted collaborators

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
