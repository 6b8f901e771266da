// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! The shared document and the contracts of its collaborators.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Owns every rule about sections, claims and arbiter decisions

pub mod section;
pub mod spec;
pub mod negotiation;
pub mod arbiter;
pub mod events;
pub mod session_config;
