//! Webhook subscriptions and delivery
//!
//! Each subscription gets its own [`CircuitBreaker`]; inside the breaker a
//! delivery is retried with exponential backoff when the subscription asks
//! for it. A subscription that keeps failing is therefore skipped quickly
//! instead of stalling every event behind a full retry schedule.

use crate::error::WebhookError;
use archdesk_resilience::{retry_with_backoff, BreakerError, CircuitBreaker, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

/// Request timeout for HTTP delivery (10 seconds)
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before the first redelivery (1 second, doubling per attempt)
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

/// A registered webhook endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscription {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Event names this endpoint receives, e.g. `activity.file.uploaded`
    #[serde(default)]
    pub events: Vec<String>,
    /// HMAC-SHA256 signing secret
    #[serde(default)]
    pub secret: Option<String>,
    /// Extra request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub retry_on_failure: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl WebhookSubscription {
    pub fn wants(&self, event: &str) -> bool {
        self.active && self.events.iter().any(|e| e == event)
    }
}

/// JSON body posted to a webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub timestamp: String,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl WebhookPayload {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
            signature: None,
        }
    }

    /// Sign the unsigned JSON form of this payload with `secret`
    pub fn sign(&mut self, secret: &str) -> Result<(), WebhookError> {
        self.signature = None;
        let unsigned = serde_json::to_string(self)?;
        self.signature = Some(sign_payload(&unsigned, secret)?);
        Ok(())
    }

    /// Delivery headers: event, timestamp, signature when signed, then `extra`
    pub fn headers(&self, extra: &HashMap<String, String>) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("X-Webhook-Event".to_string(), self.event.clone());
        headers.insert("X-Webhook-Timestamp".to_string(), self.timestamp.clone());
        if let Some(signature) = &self.signature {
            headers.insert("X-Webhook-Signature".to_string(), signature.clone());
        }
        for (name, value) in extra {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

/// Hex-encoded HMAC-SHA256 of `payload`
pub fn sign_payload(payload: &str, secret: &str) -> Result<String, WebhookError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Other(format!("invalid signing key: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Delivers one payload to one URL.
///
/// `Ok(())` means the endpoint accepted it; any error counts as a failed delivery.
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    async fn deliver(
        &self,
        url: &str,
        payload: &WebhookPayload,
        headers: &HashMap<String, String>,
    ) -> Result<(), WebhookError>;
}

/// Posts payloads as JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpWebhookDispatcher {
    client: reqwest::Client,
}

impl HttpWebhookDispatcher {
    pub fn new() -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(DELIVERY_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookDispatcher {
    async fn deliver(
        &self,
        url: &str,
        payload: &WebhookPayload,
        headers: &HashMap<String, String>,
    ) -> Result<(), WebhookError> {
        let mut request = self.client.post(url).json(payload);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::Status(status.as_u16()))
        }
    }
}

/// Delivery counters for one subscription
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Outcome of delivering one event to one subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub subscription_id: String,
    pub success: bool,
    /// Failure reason, including "circuit open" rejections
    pub error: Option<String>,
}

struct Endpoint {
    subscription: WebhookSubscription,
    breaker: CircuitBreaker,
}

/// Fans events out to every interested subscription
pub struct WebhookFanout {
    endpoints: Vec<Endpoint>,
    dispatcher: Arc<dyn WebhookDispatcher>,
    retry_base_delay: Duration,
    stats: Mutex<HashMap<String, WebhookStats>>,
}

impl std::fmt::Debug for WebhookFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookFanout")
            .field("subscriptions", &self.endpoints.len())
            .field("retry_base_delay", &self.retry_base_delay)
            .finish_non_exhaustive()
    }
}

impl WebhookFanout {
    pub fn new(subscriptions: Vec<WebhookSubscription>, dispatcher: Arc<dyn WebhookDispatcher>) -> Self {
        let endpoints = subscriptions
            .into_iter()
            .map(|subscription| Endpoint {
                breaker: CircuitBreaker::new(format!("webhook:{}", subscription.name)),
                subscription,
            })
            .collect();

        Self {
            endpoints,
            dispatcher,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Replace every subscription's breaker with one using these settings
    pub fn with_breaker_config(mut self, failure_threshold: u32, timeout: Duration) -> Self {
        for endpoint in &mut self.endpoints {
            endpoint.breaker = CircuitBreaker::with_config(
                format!("webhook:{}", endpoint.subscription.name),
                failure_threshold,
                timeout,
            );
        }
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &WebhookSubscription> {
        self.endpoints.iter().map(|endpoint| &endpoint.subscription)
    }

    /// Counters for subscription `id`
    pub fn stats(&self, id: &str) -> WebhookStats {
        self.stats_lock().get(id).cloned().unwrap_or_default()
    }

    /// Deliver `data` as `event` to all active subscriptions that want it.
    ///
    /// Deliveries to different subscriptions run concurrently; one report is
    /// returned per subscription attempted.
    pub async fn trigger(&self, event: &str, data: &serde_json::Value) -> Vec<DeliveryReport> {
        let deliveries = self
            .endpoints
            .iter()
            .filter(|endpoint| endpoint.subscription.wants(event))
            .map(|endpoint| self.deliver_to(endpoint, event, data));

        join_all(deliveries).await
    }

    async fn deliver_to(&self, endpoint: &Endpoint, event: &str, data: &serde_json::Value) -> DeliveryReport {
        let subscription = &endpoint.subscription;
        let mut payload = WebhookPayload::new(event, data.clone());

        let outcome = match &subscription.secret {
            Some(secret) => payload.sign(secret),
            None => Ok(()),
        };
        let outcome = match outcome {
            Ok(()) => {
                let headers = payload.headers(&subscription.headers);
                let policy = self.retry_policy(subscription);
                let payload = &payload;
                let headers = &headers;
                endpoint
                    .breaker
                    .execute(|| {
                        retry_with_backoff(
                            || self.dispatcher.deliver(&subscription.url, payload, headers),
                            &policy,
                        )
                    })
                    .await
                    .map_err(|e| match e {
                        BreakerError::Open { name } => format!("circuit breaker {name} is open"),
                        BreakerError::Inner(e) => e.to_string(),
                    })
            }
            Err(e) => Err(e.to_string()),
        };

        self.record(subscription, outcome.is_ok());
        match &outcome {
            Ok(()) => info!(webhook = %subscription.name, event, "webhook delivered"),
            Err(e) => warn!(webhook = %subscription.name, event, "webhook delivery failed: {e}"),
        }

        DeliveryReport {
            subscription_id: subscription.id.clone(),
            success: outcome.is_ok(),
            error: outcome.err(),
        }
    }

    fn retry_policy(&self, subscription: &WebhookSubscription) -> RetryPolicy<WebhookError> {
        let retries = if subscription.retry_on_failure {
            subscription.max_retries
        } else {
            0
        };
        let name = subscription.name.clone();
        RetryPolicy::new()
            .with_max_retries(retries)
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_base_delay.saturating_mul(64))
            .with_backoff_factor(2.0)
            .with_jitter(false)
            .on_retry(move |err, attempt, delay| {
                warn!(
                    webhook = %name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying webhook delivery: {err}"
                );
            })
    }

    fn record(&self, subscription: &WebhookSubscription, success: bool) {
        let mut stats = self.stats_lock();
        let entry = stats.entry(subscription.id.clone()).or_default();
        entry.last_triggered = Some(Utc::now());
        if success {
            entry.success_count += 1;
        } else {
            entry.failure_count += 1;
        }
    }

    fn stats_lock(&self) -> MutexGuard<'_, HashMap<String, WebhookStats>> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Records deliveries and replays scripted outcomes (success once the script runs out)
    #[derive(Default)]
    pub(crate) struct ScriptedDispatcher {
        pub(crate) delivered: Mutex<Vec<(String, WebhookPayload, HashMap<String, String>)>>,
        script: Mutex<VecDeque<bool>>,
    }

    impl ScriptedDispatcher {
        pub(crate) fn failing(times: usize) -> Self {
            Self {
                delivered: Mutex::default(),
                script: Mutex::new(std::iter::repeat(false).take(times).collect()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.delivered.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl WebhookDispatcher for ScriptedDispatcher {
        async fn deliver(
            &self,
            url: &str,
            payload: &WebhookPayload,
            headers: &HashMap<String, String>,
        ) -> Result<(), WebhookError> {
            self.delivered
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone(), headers.clone()));
            if self.script.lock().unwrap().pop_front().unwrap_or(true) {
                Ok(())
            } else {
                Err(WebhookError::Status(503))
            }
        }
    }

    pub(crate) fn subscription(id: &str, events: &[&str]) -> WebhookSubscription {
        WebhookSubscription {
            id: id.to_string(),
            name: format!("hook-{id}"),
            url: format!("https://hooks.example.com/{id}"),
            events: events.iter().map(|e| e.to_string()).collect(),
            secret: None,
            headers: HashMap::new(),
            active: true,
            retry_on_failure: true,
            max_retries: 2,
        }
    }

    #[test]
    fn test_signature_matches_unsigned_body() {
        let mut payload = WebhookPayload::new("activity.file.uploaded", serde_json::json!({"filename": "a.zip"}));
        let unsigned = serde_json::to_string(&payload).unwrap();
        payload.sign("s3cret").unwrap();

        let signature = payload.signature.clone().unwrap();
        assert_eq!(signature, sign_payload(&unsigned, "s3cret").unwrap());
        assert_eq!(signature.len(), 64);

        let headers = payload.headers(&HashMap::from([("X-Team".to_string(), "ops".to_string())]));
        assert_eq!(headers["X-Webhook-Signature"], signature);
        assert_eq!(headers["X-Webhook-Event"], "activity.file.uploaded");
        assert_eq!(headers["X-Team"], "ops");
    }

    #[test]
    fn test_subscription_defaults_from_json() {
        let sub: WebhookSubscription = serde_json::from_str(
            r#"{"id":"1","name":"ops","url":"https://x","events":["activity.file.uploaded"]}"#,
        )
        .unwrap();
        assert!(sub.active);
        assert!(sub.retry_on_failure);
        assert_eq!(sub.max_retries, 3);
        assert!(sub.wants("activity.file.uploaded"));
        assert!(!sub.wants("activity.file.deleted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_interested_active_subscriptions_receive() {
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let mut inactive = subscription("c", &["activity.file.uploaded"]);
        inactive.active = false;
        let fanout = WebhookFanout::new(
            vec![
                subscription("a", &["activity.file.uploaded"]),
                subscription("b", &["activity.file.deleted"]),
                inactive,
            ],
            dispatcher.clone(),
        );

        let reports = fanout.trigger("activity.file.uploaded", &serde_json::json!({})).await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].success);
        assert_eq!(dispatcher.calls(), 1);
        assert_eq!(fanout.stats("a").success_count, 1);
        assert!(fanout.stats("a").last_triggered.is_some());
        assert_eq!(fanout.stats("b"), WebhookStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_is_retried() {
        let dispatcher = Arc::new(ScriptedDispatcher::failing(2));
        let fanout = WebhookFanout::new(vec![subscription("a", &["activity.x"])], dispatcher.clone());

        let reports = fanout.trigger("activity.x", &serde_json::json!({"n": 1})).await;
        assert!(reports[0].success);
        assert_eq!(dispatcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_after_repeated_failures() {
        let dispatcher = Arc::new(ScriptedDispatcher::failing(100));
        let mut sub = subscription("a", &["activity.x"]);
        sub.retry_on_failure = false;
        let fanout = WebhookFanout::new(vec![sub], dispatcher.clone())
            .with_breaker_config(2, Duration::from_secs(60));

        for _ in 0..2 {
            let reports = fanout.trigger("activity.x", &serde_json::json!({})).await;
            assert!(!reports[0].success);
        }
        let reports = fanout.trigger("activity.x", &serde_json::json!({})).await;
        assert!(reports[0].error.as_deref().unwrap().contains("open"));
        assert_eq!(dispatcher.calls(), 2, "open breaker skips delivery");
        assert_eq!(fanout.stats("a").failure_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signed_delivery_headers() {
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let mut sub = subscription("a", &["activity.x"]);
        sub.secret = Some("key".to_string());
        let fanout = WebhookFanout::new(vec![sub], dispatcher.clone());

        fanout.trigger("activity.x", &serde_json::json!({"k": "v"})).await;

        let delivered = dispatcher.delivered.lock().unwrap();
        let (url, payload, headers) = &delivered[0];
        assert_eq!(url, "https://hooks.example.com/a");
        assert!(payload.signature.is_some());
        assert_eq!(headers.get("X-Webhook-Signature"), payload.signature.as_ref());
    }
}
