// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod scripted;

pub use event_bus::{EventBus, EventBusError, EventReceiver, SessionEventReceiver};
pub use scripted::{ArbiterPolicy, PolicyArbiter, ScriptedMove, ScriptedResponder};
