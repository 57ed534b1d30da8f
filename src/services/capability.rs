use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::db::queries;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Booking,
}

impl Module {
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Booking => "booking",
        }
    }
}

/// Answers whether a business may use a module. How the effective flag is
/// derived from category and plan belongs to the caller of `set_module_enabled`.
pub trait CapabilityCheck: Send + Sync {
    fn is_module_enabled(&self, business_id: &str, module: Module) -> AppResult<bool>;
}

/// Reads effective flags from `business_modules`, with a default for businesses
/// that have no row yet.
pub struct SqliteCapabilities {
    db: Arc<Mutex<Connection>>,
    default_enabled: bool,
}

impl SqliteCapabilities {
    pub fn new(db: Arc<Mutex<Connection>>, default_enabled: bool) -> Self {
        Self { db, default_enabled }
    }
}

impl CapabilityCheck for SqliteCapabilities {
    fn is_module_enabled(&self, business_id: &str, module: Module) -> AppResult<bool> {
        let db = self
            .db
            .lock()
            .map_err(|_| AppError::Storage("database lock poisoned".to_string()))?;
        let flag = queries::get_module_flag(&db, business_id, module.as_str())?;
        Ok(flag.unwrap_or(self.default_enabled))
    }
}

pub fn set_module_enabled(
    conn: &Connection,
    business_id: &str,
    module: Module,
    enabled: bool,
) -> AppResult<()> {
    queries::set_module_flag(conn, business_id, module.as_str(), enabled)?;
    tracing::info!(business_id, module = module.as_str(), enabled, "module flag updated");
    Ok(())
}
