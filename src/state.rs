use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::models::EventEnvelope;
use crate::services::capability::CapabilityCheck;
use crate::services::clock::Clock;
use crate::services::events::EventSink;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub capabilities: Box<dyn CapabilityCheck>,
    pub event_sink: Box<dyn EventSink>,
    pub events_tx: broadcast::Sender<EventEnvelope>,
}

impl AppState {
    pub fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| AppError::Storage("database lock poisoned".to_string()))
    }
}
