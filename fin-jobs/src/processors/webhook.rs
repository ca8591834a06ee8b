use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use fin_queue::{ActiveJob, JobError, JobRecord, Processor};

use crate::payloads::{job_names, DispatchWebhookData, JobResult, Keyed};
use crate::processors::dead_letter_on_exhaustion;
use crate::queues::QueueName;
use crate::service::QueueService;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// `sha256=<hex>` HMAC of the JSON-encoded payload
pub fn sign_payload(secret: &str, payload: &Value) -> Result<String, JobError> {
    let body = serde_json::to_vec(payload)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| JobError::new(format!("Invalid signing secret: {}", e)))?;
    mac.update(&body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Headers the dispatcher sets itself
fn is_reserved_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) || name.eq_ignore_ascii_case(SIGNATURE_HEADER)
}

/// Outbound webhook delivery
pub struct WebhookDispatchProcessor {
    client: reqwest::Client,
    service: QueueService,
}

impl WebhookDispatchProcessor {
    pub fn new(client: reqwest::Client, service: QueueService) -> Self {
        Self { client, service }
    }

    /// Client with a per-request timeout
    pub fn client_with_timeout(timeout: Duration) -> Result<reqwest::Client, JobError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JobError::new(format!("Failed to build HTTP client: {}", e)))
    }

    async fn dispatch(&self, data: &DispatchWebhookData, started: Instant) -> Result<Value, JobError> {
        let mut request = self
            .client
            .post(&data.endpoint)
            .header(CONTENT_TYPE, "application/json");

        if let Some(headers) = &data.headers {
            for (name, value) in headers {
                if is_reserved_header(name) {
                    debug!(webhook_id = %data.webhook_id, header = %name, "Ignoring caller header");
                    continue;
                }
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if let Some(secret) = &data.signing_secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret, &data.payload)?);
        }

        debug!(webhook_id = %data.webhook_id, endpoint = %data.endpoint, event = %data.event, "Dispatching webhook");

        let response = request
            .json(&json!({ "event": data.event, "payload": data.payload }))
            .send()
            .await
            .map_err(|e| JobError::new(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(JobError::new(format!(
                "Webhook delivery failed with status {}",
                status.as_u16()
            )));
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            webhook_id = %data.webhook_id,
            status = status.as_u16(),
            duration_ms,
            "Webhook delivered"
        );

        Ok(json!({
            "statusCode": status.as_u16(),
            "success": true,
            "webhookId": data.webhook_id,
            "event": data.event,
            "endpoint": data.endpoint,
            "durationMs": duration_ms,
        }))
    }
}

#[async_trait]
impl Processor for WebhookDispatchProcessor {
    async fn process(&self, job: &ActiveJob) -> Result<Value, JobError> {
        let started = Instant::now();

        match job.name() {
            job_names::DISPATCH_WEBHOOK => {
                let Keyed { data, idempotency_key } = job.payload::<Keyed<DispatchWebhookData>>()?;
                let outcome = self.dispatch(&data, started).await?;
                JobResult::success(outcome, started, idempotency_key).into_value()
            }
            _ => Err(JobError::new("Unknown webhook job")),
        }
    }

    async fn on_failed(&self, job: &JobRecord, error: &JobError) {
        dead_letter_on_exhaustion(&self.service, QueueName::WebhookDispatch, job, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_hex() {
        let payload = json!({ "orderId": 42 });
        let a = sign_payload("whsec", &payload).unwrap();
        let b = sign_payload("whsec", &payload).unwrap();

        assert_eq!(a, b);
        assert!(a.starts_with("sha256="));
        let hex_part = &a["sha256=".len()..];
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn different_secrets_sign_differently() {
        let payload = json!({ "orderId": 42 });
        assert_ne!(sign_payload("a", &payload).unwrap(), sign_payload("b", &payload).unwrap());
    }

    #[test]
    fn content_type_and_signature_are_reserved() {
        assert!(is_reserved_header("content-type"));
        assert!(is_reserved_header("Content-Type"));
        assert!(is_reserved_header("x-webhook-signature"));
        assert!(!is_reserved_header("X-Tenant"));
    }
}
