use std::env;
use std::str::FromStr;

use crate::services::cancellation::{CancellationPolicy, MAX_FULL_REFUND_HOURS};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub api_token: String,
    pub full_refund_hours: i64,
    pub partial_refund_percent: u8,
    pub no_show_refund_percent: u8,
    pub check_in_hour: u32,
    pub review_edit_window_hours: i64,
    pub busy_retry_attempts: u32,
    pub booking_module_default: bool,
    pub event_webhook_url: String,
    pub event_webhook_secret: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: parse_var("PORT", 3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "staybook.db".to_string()),
            api_token: env::var("API_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            full_refund_hours: parse_var("FULL_REFUND_HOURS", 48).clamp(0, MAX_FULL_REFUND_HOURS),
            partial_refund_percent: parse_var("PARTIAL_REFUND_PERCENT", 50).min(100),
            no_show_refund_percent: parse_var("NO_SHOW_REFUND_PERCENT", 0).min(100),
            check_in_hour: parse_var("CHECK_IN_HOUR", 14).min(23),
            review_edit_window_hours: parse_var("REVIEW_EDIT_WINDOW_HOURS", 24).clamp(0, MAX_FULL_REFUND_HOURS),
            busy_retry_attempts: parse_var("BUSY_RETRY_ATTEMPTS", 3),
            booking_module_default: parse_var("BOOKING_MODULE_DEFAULT", true),
            event_webhook_url: env::var("EVENT_WEBHOOK_URL").unwrap_or_default(),
            event_webhook_secret: env::var("EVENT_WEBHOOK_SECRET").unwrap_or_default(),
        }
    }

    /// Policy applied to businesses without their own override.
    pub fn default_policy(&self) -> CancellationPolicy {
        CancellationPolicy {
            full_refund_hours: self.full_refund_hours,
            partial_refund_percent: self.partial_refund_percent,
            no_show_refund_percent: self.no_show_refund_percent,
            check_in_hour: self.check_in_hour,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: ":memory:".to_string(),
            api_token: "changeme".to_string(),
            full_refund_hours: 48,
            partial_refund_percent: 50,
            no_show_refund_percent: 0,
            check_in_hour: 14,
            review_edit_window_hours: 24,
            busy_retry_attempts: 3,
            booking_module_default: true,
            event_webhook_url: String::new(),
            event_webhook_secret: String::new(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_hours_are_clamped() {
        env::set_var("FULL_REFUND_HOURS", i64::MAX.to_string());
        env::set_var("REVIEW_EDIT_WINDOW_HOURS", "-5");
        let config = AppConfig::from_env();
        env::remove_var("FULL_REFUND_HOURS");
        env::remove_var("REVIEW_EDIT_WINDOW_HOURS");

        assert_eq!(config.full_refund_hours, MAX_FULL_REFUND_HOURS);
        assert_eq!(config.review_edit_window_hours, 0);
        assert_eq!(config.default_policy().full_refund_hours, MAX_FULL_REFUND_HOURS);
    }
}
