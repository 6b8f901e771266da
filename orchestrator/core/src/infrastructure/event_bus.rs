// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Negotiation Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Observers (CLI progress output, audit sinks) subscribe without touching the Spec.
//
// In-memory only: events are lost when the process exits.

use crate::domain::events::{NegotiationEvent, SessionId};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to negotiation events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<NegotiationEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: NegotiationEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is listening
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all negotiation events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of one session, optionally narrowed to one section
    pub fn subscribe_session(
        &self,
        session_id: SessionId,
        section: Option<String>,
    ) -> SessionEventReceiver {
        SessionEventReceiver {
            receiver: self.sender.subscribe(),
            session_id,
            section,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all negotiation events
pub struct EventReceiver {
    receiver: broadcast::Receiver<NegotiationEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<NegotiationEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<NegotiationEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered by session and, optionally, section
pub struct SessionEventReceiver {
    receiver: broadcast::Receiver<NegotiationEvent>,
    session_id: SessionId,
    section: Option<String>,
}

impl SessionEventReceiver {
    pub async fn recv(&mut self) -> Result<NegotiationEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    fn matches(&self, event: &NegotiationEvent) -> bool {
        if event.session_id() != self.session_id {
            return false;
        }
        match &self.section {
            Some(wanted) => event.section() == Some(wanted.as_str()),
            None => true,
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::section::ProducerId;
    use chrono::Utc;

    fn response(session_id: SessionId, section: &str) -> NegotiationEvent {
        NegotiationEvent::ResponseApplied {
            session_id,
            round: 1,
            section: section.to_string(),
            producer: ProducerId::new("A"),
            action: "hold".to_string(),
            answered: true,
            applied_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let session_id = SessionId::new();

        event_bus.publish(NegotiationEvent::RoundStarted {
            session_id,
            round: 1,
            temperature: 0.9,
            contested: vec!["layout".to_string()],
            started_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            NegotiationEvent::RoundStarted { round, contested, .. } => {
                assert_eq!(round, 1);
                assert_eq!(contested, vec!["layout".to_string()]);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_and_section_filtering() {
        let event_bus = EventBus::new(10);
        let session_id = SessionId::new();
        let mut receiver = event_bus.subscribe_session(session_id, Some("nav".to_string()));

        event_bus.publish(response(SessionId::new(), "nav"));
        event_bus.publish(response(session_id, "layout"));
        event_bus.publish(response(session_id, "nav"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.session_id(), session_id);
        assert_eq!(received.section(), Some("nav"));
    }

    #[test]
    fn test_try_recv_empty() {
        let event_bus = EventBus::new(4);
        let mut receiver = event_bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
        assert_eq!(event_bus.subscriber_count(), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::default();
        event_bus.publish(response(SessionId::new(), "nav"));
        assert_eq!(event_bus.subscriber_count(), 0);
    }
}
