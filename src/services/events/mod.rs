pub mod webhook;

use std::sync::Mutex;

use crate::db::queries;
use crate::models::{DomainEvent, EventEnvelope};
use crate::state::AppState;

/// External consumer of domain events (notifications, audit). Delivery is
/// fire-and-forget: an error here is logged and never undoes the state change.
pub trait EventSink: Send + Sync {
    fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _envelope: &EventEnvelope) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps every published envelope in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event.kind()).collect()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(envelope.clone());
        Ok(())
    }
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        (**self).publish(envelope)
    }
}

/// Records the event in the local log, broadcasts it to live subscribers and
/// hands it to the external sink. Must be called after the state change committed
/// and without holding the database lock.
pub fn emit(state: &AppState, event: DomainEvent) -> EventEnvelope {
    let mut envelope = EventEnvelope {
        seq: 0,
        id: uuid::Uuid::new_v4().to_string(),
        occurred_at: state.clock.now(),
        event,
    };

    let logged = state
        .conn()
        .map_err(anyhow::Error::from)
        .and_then(|db| queries::insert_event(&db, &envelope));
    match logged {
        Ok(seq) => envelope.seq = seq,
        Err(e) => tracing::error!(error = %e, kind = envelope.event.kind(), "failed to log event"),
    }

    // No receivers is fine.
    let _ = state.events_tx.send(envelope.clone());

    if let Err(e) = state.event_sink.publish(&envelope) {
        tracing::error!(error = %e, kind = envelope.event.kind(), "event sink rejected event");
    }

    envelope
}
