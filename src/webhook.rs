//! Persistent, signed, retrying webhook delivery.
//!
//! Events are materialized as [`WebhookDelivery`] rows first, so a restart
//! never loses one. A background worker picks due deliveries, signs the
//! JSON body with the webhook's secret *as it is at send time* (secret
//! rotation is a single patch; no mixed-secret window), POSTs with a 30 s
//! timeout and reschedules failures on a fixed backoff ladder. Delivery is
//! at-least-once and order-approximate; consumers dedupe on
//! `X-Webhook-Id`.

use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use apitoll_store::document::{IndexKey, Order};
use apitoll_store::tables::{
    DeliveryStatus, Organization, Webhook, WebhookDelivery, WebhookEventType,
};
use apitoll_store::{Id, Store, StoreError};
use apitoll_types::netguard::is_forbidden_ip;
use apitoll_types::timestamp::{iso8601, now_millis};

type HmacSha256 = Hmac<Sha256>;

/// Retry delays by failure number; the sixth failure is terminal.
pub const RETRY_DELAYS_SECS: [u64; 5] = [60, 300, 1800, 7200, 86_400];
/// Terminal failures before the parent webhook is flagged `failing`.
pub const FAILING_THRESHOLD: u32 = 3;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_SCAN_INTERVAL: Duration = Duration::from_secs(5);
const BATCH: usize = 32;

/// Errors validating a webhook registration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebhookUrlError {
    #[error("webhook URL is not a valid URL")]
    Malformed,
    #[error("webhook URL must be https")]
    NotHttps,
    #[error("webhook URL has no host")]
    NoHost,
    #[error("webhook URL resolves to a forbidden address range")]
    ForbiddenRange,
    #[error("webhook URL hostname did not resolve")]
    Unresolvable,
}

/// Validates a seller-supplied webhook URL: HTTPS only, and the host must
/// not be or resolve into loopback/private ranges.
pub async fn validate_webhook_url(raw: &str) -> Result<url::Url, WebhookUrlError> {
    let url = url::Url::parse(raw).map_err(|_| WebhookUrlError::Malformed)?;
    if url.scheme() != "https" {
        return Err(WebhookUrlError::NotHttps);
    }
    let host = url.host_str().ok_or(WebhookUrlError::NoHost)?;
    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_forbidden_ip(ip) {
            return Err(WebhookUrlError::ForbiddenRange);
        }
        return Ok(url);
    }
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = lookup_host((host, port))
        .await
        .map_err(|_| WebhookUrlError::Unresolvable)?
        .collect();
    if addrs.is_empty() {
        return Err(WebhookUrlError::Unresolvable);
    }
    if addrs.iter().any(|addr| is_forbidden_ip(addr.ip())) {
        return Err(WebhookUrlError::ForbiddenRange);
    }
    Ok(url)
}

/// Hex HMAC-SHA256 of a delivery body.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Delay before retry number `failures` (1-based), or `None` when the
/// failure is terminal.
pub fn retry_delay(failures: u32) -> Option<Duration> {
    RETRY_DELAYS_SECS
        .get(failures as usize - 1)
        .map(|secs| Duration::from_secs(*secs))
}

/// Queues `event` for every enabled webhook of `org` subscribed to it.
/// Returns the created delivery ids.
pub fn emit(
    store: &Store,
    org: &Id<Organization>,
    event: WebhookEventType,
    payload: serde_json::Value,
) -> Result<Vec<Id<WebhookDelivery>>, StoreError> {
    let now = now_millis();
    let org = org.clone();
    store.mutate(move |inner| {
        let targets: Vec<Id<Webhook>> = inner
            .webhooks
            .by_index("by_org", IndexKey::single(org.to_string()))
            .collect()
            .into_iter()
            .filter(|(_, webhook)| webhook.enabled && webhook.events.contains(&event))
            .map(|(id, _)| id)
            .collect();
        let mut created = Vec::with_capacity(targets.len());
        for webhook in targets {
            let id = inner.insert_delivery(WebhookDelivery {
                webhook,
                event,
                payload: payload.clone(),
                delivery_id: format!("evt_{}", Uuid::new_v4().simple()),
                status: DeliveryStatus::Pending,
                attempts: 0,
                next_attempt_at: now,
                last_status_code: None,
                last_duration_ms: None,
                created_at: now,
            })?;
            created.push(id);
        }
        Ok(created)
    })
}

/// Handle used by HTTP handlers to emit events and wake the worker.
#[derive(Clone)]
pub struct DispatcherHandle {
    store: Store,
    notify: Arc<Notify>,
}

impl DispatcherHandle {
    /// Emits an event and nudges the worker.
    pub fn emit(
        &self,
        org: &Id<Organization>,
        event: WebhookEventType,
        payload: serde_json::Value,
    ) -> Result<usize, StoreError> {
        let created = emit(&self.store, org, event, payload)?;
        if !created.is_empty() {
            self.notify.notify_one();
        }
        Ok(created.len())
    }

    /// Wakes the worker without emitting (used after direct delivery
    /// inserts such as `test.ping`).
    pub fn nudge(&self) {
        self.notify.notify_one();
    }
}

/// The background delivery worker.
pub struct Dispatcher {
    store: Store,
    client: Client,
    notify: Arc<Notify>,
}

impl Dispatcher {
    /// Spawns the worker and returns the emit handle.
    pub fn spawn(store: Store, shutdown: CancellationToken) -> DispatcherHandle {
        let notify = Arc::new(Notify::new());
        let dispatcher = Dispatcher {
            store: store.clone(),
            client: Client::new(),
            notify: notify.clone(),
        };
        tokio::spawn(dispatcher.run(shutdown));
        DispatcherHandle { store, notify }
    }

    async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(IDLE_SCAN_INTERVAL) => {}
            }
            loop {
                let due = self.due_deliveries();
                if due.is_empty() {
                    break;
                }
                for (id, delivery) in due {
                    if shutdown.is_cancelled() {
                        return;
                    }
                    self.deliver(&id, &delivery).await;
                }
            }
        }
    }

    fn due_deliveries(&self) -> Vec<(Id<WebhookDelivery>, WebhookDelivery)> {
        let now = now_millis();
        self.store.read(|inner| {
            inner
                .webhook_deliveries
                .by_index(
                    "by_status",
                    IndexKey::single(DeliveryStatus::Pending.as_str()),
                )
                .order(Order::Asc)
                .take(BATCH)
                .collect()
                .into_iter()
                .filter(|(_, delivery)| delivery.next_attempt_at <= now)
                .collect()
        })
    }

    async fn deliver(&self, id: &Id<WebhookDelivery>, delivery: &WebhookDelivery) {
        // Read the webhook at send time so a rotated secret takes effect
        // for everything still queued.
        let Some(webhook) = self
            .store
            .read(|inner| inner.webhooks.get(&delivery.webhook).cloned())
        else {
            let _ = self.store.mutate(|inner| {
                inner.webhook_deliveries.patch(id, |delivery| {
                    delivery.status = DeliveryStatus::Failed;
                    Ok(())
                })
            });
            return;
        };

        let now = now_millis();
        let body = serde_json::json!({
            "id": delivery.delivery_id,
            "type": delivery.event.as_str(),
            "timestamp": iso8601(now),
            "data": delivery.payload,
        });
        let body_bytes = body.to_string();
        let signature = sign(body_bytes.as_bytes(), &webhook.secret);

        let started = std::time::Instant::now();
        let result = self
            .client
            .post(&webhook.url)
            .timeout(DELIVERY_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", signature)
            .header("X-Webhook-Id", &delivery.delivery_id)
            .header("X-Webhook-Timestamp", iso8601(now))
            .body(body_bytes)
            .send()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().is_success() => {
                self.settle_success(id, response.status().as_u16(), duration_ms);
            }
            Ok(response) => {
                self.settle_failure(id, delivery, Some(response.status().as_u16()), duration_ms);
            }
            Err(err) => {
                tracing::debug!(url = %webhook.url, error = %err, "webhook delivery error");
                self.settle_failure(id, delivery, None, duration_ms);
            }
        }
    }

    fn settle_success(&self, id: &Id<WebhookDelivery>, status_code: u16, duration_ms: u64) {
        let result = self.store.mutate(|inner| {
            inner.webhook_deliveries.patch(id, |delivery| {
                delivery.status = DeliveryStatus::Delivered;
                delivery.attempts += 1;
                delivery.last_status_code = Some(status_code);
                delivery.last_duration_ms = Some(duration_ms);
                Ok(())
            })
        });
        if let Err(err) = result {
            tracing::error!(error = %err, "failed to record webhook success");
        }
    }

    fn settle_failure(
        &self,
        id: &Id<WebhookDelivery>,
        delivery: &WebhookDelivery,
        status_code: Option<u16>,
        duration_ms: u64,
    ) {
        let failures = delivery.attempts + 1;
        let webhook_id = delivery.webhook.clone();
        let result = self.store.mutate(|inner| {
            inner.webhook_deliveries.patch(id, |delivery| {
                delivery.attempts = failures;
                delivery.last_status_code = status_code;
                delivery.last_duration_ms = Some(duration_ms);
                match retry_delay(failures) {
                    Some(delay) => {
                        delivery.next_attempt_at = now_millis() + delay.as_millis() as u64;
                    }
                    None => {
                        delivery.status = DeliveryStatus::Failed;
                    }
                }
                Ok(())
            })?;
            if retry_delay(failures).is_none() {
                inner.webhooks.patch(&webhook_id, |webhook| {
                    webhook.failure_count += 1;
                    Ok(())
                })?;
            }
            Ok(())
        });
        if let Err(err) = result {
            tracing::error!(error = %err, "failed to record webhook failure");
        }
    }
}
