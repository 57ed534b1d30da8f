use anyhow::Context;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::EventSink;
use crate::models::EventEnvelope;

pub const SIGNATURE_HEADER: &str = "x-staybook-signature";

/// Posts each envelope as JSON to a configured URL, signed with HMAC-SHA1.
pub struct WebhookSink {
    url: String,
    secret: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String, secret: String) -> Self {
        Self {
            url,
            secret,
            client: reqwest::Client::new(),
        }
    }
}

/// Base64 HMAC-SHA1 of the raw body. Empty when no secret is configured.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

impl EventSink for WebhookSink {
    fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let body = serde_json::to_vec(envelope).context("failed to encode event")?;
        let signature = sign_payload(&self.secret, &body);
        let runtime = tokio::runtime::Handle::try_current()
            .context("webhook delivery needs a tokio runtime")?;

        let client = self.client.clone();
        let url = self.url.clone();
        let kind = envelope.event.kind();
        runtime.spawn(async move {
            let result = client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(SIGNATURE_HEADER, signature)
                .body(body)
                .send()
                .await
                .and_then(|res| res.error_for_status());
            match result {
                Ok(_) => tracing::debug!(kind, "event delivered"),
                Err(e) => tracing::warn!(error = %e, kind, "event webhook delivery failed"),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DomainEvent;

    #[test]
    fn test_signature_verifies() {
        let body = br#"{"type":"booking_confirmed","booking_id":"b1"}"#;
        let signature = sign_payload("s3cret", body);
        let raw = base64::engine::general_purpose::STANDARD
            .decode(signature)
            .unwrap();

        let mut mac = Hmac::<Sha1>::new_from_slice(b"s3cret").unwrap();
        mac.update(body);
        assert!(mac.verify_slice(&raw).is_ok());
    }

    #[test]
    fn test_unsigned_without_secret() {
        assert_eq!(sign_payload("", b"{}"), "");
    }

    #[test]
    fn test_publish_outside_runtime_fails() {
        let sink = WebhookSink::new("http://127.0.0.1:9/hook".to_string(), String::new());
        let envelope = EventEnvelope {
            seq: 1,
            id: "e1".to_string(),
            occurred_at: chrono::Utc::now().naive_utc(),
            event: DomainEvent::BookingConfirmed {
                booking_id: "b1".to_string(),
            },
        };
        assert!(sink.publish(&envelope).is_err());
    }
}
