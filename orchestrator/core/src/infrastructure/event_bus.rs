// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for Domain Events
//
// In-memory event streaming over tokio broadcast channels. The daemon
// subscribes to operator alerts; the CLI can follow a single cycle.
// Events are not persisted; the thought log and the relational tables are the
// durable record.

use crate::domain::cycle::CycleId;
use crate::domain::events::{CycleEvent, LearningEvent, MeasurementEvent, OperatorAlert};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Cycle(CycleEvent),
    Learning(LearningEvent),
    Measurement(MeasurementEvent),
    Alert(OperatorAlert),
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity is how many events are buffered before slow receivers lag.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_cycle_event(&self, event: CycleEvent) {
        self.publish(DomainEvent::Cycle(event));
    }

    pub fn publish_learning_event(&self, event: LearningEvent) {
        self.publish(DomainEvent::Learning(event));
    }

    pub fn publish_measurement_event(&self, event: MeasurementEvent) {
        self.publish(DomainEvent::Measurement(event));
    }

    /// Publish a condition a human operator must see.
    pub fn publish_alert(&self, alert: OperatorAlert) {
        self.publish(DomainEvent::Alert(alert));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() errors only when nobody is subscribed.
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Events for one cycle only.
    pub fn subscribe_cycle(&self, cycle_id: CycleId) -> CycleEventReceiver {
        CycleEventReceiver {
            receiver: self.sender.subscribe(),
            cycle_id,
        }
    }

    pub fn subscribe_alerts(&self) -> AlertReceiver {
        AlertReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
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

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
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

/// Receiver for cycle events of a single cycle (filtered)
pub struct CycleEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    cycle_id: CycleId,
}

impl CycleEventReceiver {
    pub async fn recv(&mut self) -> Result<CycleEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Cycle(cycle_event) = event {
                if cycle_event.cycle_id() == self.cycle_id {
                    return Ok(cycle_event);
                }
            }
        }
    }
}

/// Receiver for operator alerts (filtered)
pub struct AlertReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl AlertReceiver {
    pub async fn recv(&mut self) -> Result<OperatorAlert, EventBusError> {
        loop {
            if let DomainEvent::Alert(alert) = self.receiver.recv().await.map_err(map_recv_error)? {
                return Ok(alert);
            }
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

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish_cycle_event(CycleEvent::CycleStarted {
            cycle_id: CycleId(4),
            cycle_number: 4,
            started_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            DomainEvent::Cycle(CycleEvent::CycleStarted { cycle_id, .. }) => assert_eq!(cycle_id, CycleId(4)),
            other => panic!("Wrong event type received: {other:?}"),
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[tokio::test]
    async fn test_cycle_event_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_cycle(CycleId(2));

        event_bus.publish_cycle_event(CycleEvent::CycleResumed {
            cycle_id: CycleId(1),
            resumed_at: Utc::now(),
        });
        event_bus.publish_alert(OperatorAlert::CycleFailed {
            cycle_id: CycleId(2),
            reason: "boom".into(),
        });
        event_bus.publish_cycle_event(CycleEvent::CycleResumed {
            cycle_id: CycleId(2),
            resumed_at: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.cycle_id(), CycleId(2));
    }

    #[tokio::test]
    async fn test_alert_subscription_skips_other_events() {
        let event_bus = EventBus::new(10);
        let mut alerts = event_bus.subscribe_alerts();
        let mut everything = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_cycle_event(CycleEvent::CycleCompleted {
            cycle_id: CycleId(9),
            completed_at: Utc::now(),
        });
        event_bus.publish_alert(OperatorAlert::CycleFailed {
            cycle_id: CycleId(9),
            reason: "cancelled".into(),
        });

        assert_eq!(alerts.recv().await.unwrap().kind(), "cycle_failed");
        let _ = everything.recv().await.unwrap();
        let _ = everything.recv().await.unwrap();
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = DomainEvent::Alert(OperatorAlert::CycleFailed {
            cycle_id: CycleId(3),
            reason: "x".into(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "alert");
    }
}
