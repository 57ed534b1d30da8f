pub mod migrations;
pub mod queries;

use std::thread;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use crate::errors::AppResult;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=250;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Runs `op` again when SQLite reports a competing writer, up to `attempts` times.
/// Business-rule failures are returned on the first occurrence.
pub fn with_busy_retry<T>(attempts: u32, mut op: impl FnMut() -> AppResult<T>) -> AppResult<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_busy() && attempt < attempts.max(1) => {
                tracing::warn!(attempt, error = %e, "database busy, retrying");
                thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
                attempt += 1;
            }
            result => return result,
        }
    }
}

pub fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn fmt_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
