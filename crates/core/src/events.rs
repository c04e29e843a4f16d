use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::round::{EntityRef, RoundId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundEventKind {
    RoundCreated,
    RoundUpdated,
}

/// Cache-invalidation signal for external viewers. Carries no payload
/// beyond the keys needed to re-fetch details; delivery is best-effort and
/// never part of the transactional consistency contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEvent {
    pub kind: RoundEventKind,
    pub entity: EntityRef,
    pub round_id: RoundId,
    pub occurred_at: DateTime<Utc>,
}

impl RoundEvent {
    pub fn new(kind: RoundEventKind, entity: EntityRef, round_id: RoundId) -> Self {
        Self { kind, entity, round_id, occurred_at: Utc::now() }
    }
}

pub trait EventSink: Send + Sync {
    fn notify(&self, event: RoundEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<RoundEvent>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<RoundEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for InMemoryEventSink {
    fn notify(&self, event: RoundEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Logs each signal as a structured tracing event. Useful as a default
/// sink when no refresh subscriber is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn notify(&self, event: RoundEvent) {
        tracing::info!(
            event_name = "approval.event.emitted",
            kind = ?event.kind,
            entity_type = %event.entity.entity_type,
            entity_id = %event.entity.entity_id,
            round_id = %event.round_id.0,
            "round lifecycle event emitted"
        );
    }
}
