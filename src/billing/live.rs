//! Live billing-provider client.
//!
//! Talks to the Stripe REST API with retry logic, secure API key handling,
//! and idempotency keys on mutating calls.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::warn;

use crate::config::BillingConfig;
use crate::error::{PawsyncError, Result};
use crate::service::ServiceCode;
use crate::store::Client;

use super::provider::{
    BillingProvider, FinalizedInvoice, ProviderSubscription, SubscriptionStatus,
};

const API_BASE: &str = "https://api.stripe.com/v1";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the live provider client.
#[derive(Debug, Clone)]
pub struct LiveProviderConfig {
    /// Maximum number of retry attempts for transient failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LiveProviderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_seconds: 30,
        }
    }
}

impl LiveProviderConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

// ============================================================================
// API Key Validation
// ============================================================================

/// Error returned when API key validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidApiKeyError {
    pub reason: String,
}

impl std::fmt::Display for InvalidApiKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid API key: {}", self.reason)
    }
}

impl std::error::Error for InvalidApiKeyError {}

/// Validate a secret API key format.
///
/// Valid prefixes: `sk_test_`, `sk_live_`, `rk_test_`, `rk_live_`.
fn validate_api_key(key: &str) -> std::result::Result<(), InvalidApiKeyError> {
    const MIN_KEY_LENGTH: usize = 20;

    if key.is_empty() {
        return Err(InvalidApiKeyError {
            reason: "API key cannot be empty".to_string(),
        });
    }

    if key.len() < MIN_KEY_LENGTH {
        return Err(InvalidApiKeyError {
            reason: format!("API key too short (minimum {} characters)", MIN_KEY_LENGTH),
        });
    }

    let valid_prefixes = ["sk_test_", "sk_live_", "rk_test_", "rk_live_"];
    if !valid_prefixes.iter().any(|prefix| key.starts_with(prefix)) {
        return Err(InvalidApiKeyError {
            reason: "API key must start with sk_test_, sk_live_, rk_test_, or rk_live_"
                .to_string(),
        });
    }

    Ok(())
}

// ============================================================================
// Live Provider
// ============================================================================

/// Production implementation of [`BillingProvider`].
pub struct LiveBillingProvider {
    http: reqwest::Client,
    config: LiveProviderConfig,
    billing: BillingConfig,
    api_key: SecretString,
    /// invoice id -> customer id, so line-item pushes within a run skip a
    /// lookup round trip.
    invoice_customers: Mutex<HashMap<String, String>>,
}

impl LiveBillingProvider {
    /// Create a new live provider client.
    ///
    /// The API key is validated and stored securely; it is never exposed in
    /// debug output.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key format is invalid or the HTTP client
    /// cannot be built.
    pub fn new(
        api_key: impl Into<SecretString>,
        config: LiveProviderConfig,
        billing: BillingConfig,
    ) -> Result<Self> {
        let api_key: SecretString = api_key.into();
        validate_api_key(api_key.expose_secret())
            .map_err(|e| PawsyncError::config(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| PawsyncError::config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            billing,
            api_key,
            invoice_customers: Mutex::new(HashMap::new()),
        })
    }

    /// Create a client with default retry configuration.
    pub fn with_default_config(
        api_key: impl Into<SecretString>,
        billing: BillingConfig,
    ) -> Result<Self> {
        Self::new(api_key, LiveProviderConfig::default(), billing)
    }

    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        let key = self.api_key.expose_secret();
        key.starts_with("sk_test_") || key.starts_with("rk_test_")
    }

    #[must_use]
    pub fn is_live_mode(&self) -> bool {
        let key = self.api_key.expose_secret();
        key.starts_with("sk_live_") || key.starts_with("rk_live_")
    }

    fn generate_idempotency_key(operation: &str) -> String {
        format!("{}_{}", operation, uuid::Uuid::new_v4())
    }

    /// Send one request with retry on 429, 5xx, and timeouts.
    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(String, String)],
        form: Option<&[(String, String)]>,
        idempotency_key: Option<&str>,
        operation: &str,
    ) -> Result<Value> {
        let url = format!("{}{}", API_BASE, path);
        let mut attempts = 0;

        loop {
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(self.api_key.expose_secret())
                .query(query);
            if let Some(form) = form {
                builder = builder.form(form);
            }
            if let Some(key) = idempotency_key {
                builder = builder.header("Idempotency-Key", key);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    if !retryable || attempts >= self.config.max_retries {
                        return Err(PawsyncError::provider(operation, e.to_string()));
                    }
                    self.log_retry(operation, attempts, &e.to_string());
                    self.sleep_with_backoff(attempts).await;
                    attempts += 1;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<Value>()
                    .await
                    .map_err(|e| PawsyncError::provider(operation, e.to_string()));
            }

            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if !retryable || attempts >= self.config.max_retries {
                return Err(PawsyncError::provider(
                    operation,
                    format!("HTTP {}: {}", status.as_u16(), message),
                ));
            }

            self.log_retry(operation, attempts, &message);
            self.sleep_with_backoff(attempts).await;
            attempts += 1;
        }
    }

    fn log_retry(&self, operation: &str, attempts: u32, error: &str) {
        let delay =
            calculate_backoff_delay(attempts, self.config.base_delay_ms, self.config.max_delay_ms);
        warn!(
            operation = operation,
            attempt = attempts + 1,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying provider call after transient error"
        );
    }

    async fn sleep_with_backoff(&self, attempts: u32) {
        let delay =
            calculate_backoff_delay(attempts, self.config.base_delay_ms, self.config.max_delay_ms);
        tokio::time::sleep(delay).await;
    }

    /// Pull every page of subscriptions with the given status.
    async fn list_subscriptions_page(
        &self,
        status: &str,
        out: &mut Vec<ProviderSubscription>,
    ) -> Result<()> {
        let mut starting_after: Option<String> = None;

        loop {
            let mut query = vec![
                ("status".to_string(), status.to_string()),
                ("limit".to_string(), "100".to_string()),
                ("expand[]".to_string(), "data.customer".to_string()),
            ];
            if let Some(after) = &starting_after {
                query.push(("starting_after".to_string(), after.clone()));
            }

            let page = self
                .request(
                    reqwest::Method::GET,
                    "/subscriptions",
                    &query,
                    None,
                    None,
                    "list_subscriptions",
                )
                .await?;

            let data = page
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for raw in &data {
                out.push(parse_subscription(raw)?);
            }

            let has_more = page.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            if !has_more {
                return Ok(());
            }
            starting_after = data
                .last()
                .and_then(|s| s.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if starting_after.is_none() {
                return Ok(());
            }
        }
    }

    async fn invoice_customer(&self, invoice_id: &str) -> Result<String> {
        if let Ok(cache) = self.invoice_customers.lock() {
            if let Some(customer) = cache.get(invoice_id) {
                return Ok(customer.clone());
            }
        }
        let invoice = self
            .request(
                reqwest::Method::GET,
                &format!("/invoices/{}", invoice_id),
                &[],
                None,
                None,
                "get_invoice",
            )
            .await?;
        let customer = string_field(&invoice, "customer", "get_invoice")?;
        if let Ok(mut cache) = self.invoice_customers.lock() {
            cache.insert(invoice_id.to_string(), customer.clone());
        }
        Ok(customer)
    }

    fn remember_invoice_customer(&self, invoice_id: &str, customer_id: &str) {
        if let Ok(mut cache) = self.invoice_customers.lock() {
            cache.insert(invoice_id.to_string(), customer_id.to_string());
        }
    }
}

impl std::fmt::Debug for LiveBillingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBillingProvider")
            .field("config", &self.config)
            .field("is_test_mode", &self.is_test_mode())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BillingProvider for LiveBillingProvider {
    async fn list_active_subscriptions(&self) -> Result<Vec<ProviderSubscription>> {
        let mut subscriptions = Vec::new();
        self.list_subscriptions_page("active", &mut subscriptions).await?;
        self.list_subscriptions_page("trialing", &mut subscriptions).await?;
        Ok(subscriptions)
    }

    async fn ensure_customer(&self, client: &Client) -> Result<String> {
        if let Some(existing) = &client.billing_customer_id {
            return Ok(existing.clone());
        }

        if let Some(email) = &client.email {
            let found = self
                .request(
                    reqwest::Method::GET,
                    "/customers",
                    &[
                        ("email".to_string(), email.clone()),
                        ("limit".to_string(), "1".to_string()),
                    ],
                    None,
                    None,
                    "find_customer",
                )
                .await?;
            if let Some(id) = found
                .pointer("/data/0/id")
                .and_then(Value::as_str)
            {
                return Ok(id.to_string());
            }
        }

        let mut form = vec![("name".to_string(), client.name.clone())];
        if let Some(email) = &client.email {
            form.push(("email".to_string(), email.clone()));
        }
        if let Some(phone) = &client.phone {
            form.push(("phone".to_string(), phone.clone()));
        }
        let key = Self::generate_idempotency_key("create_customer");
        let created = self
            .request(
                reqwest::Method::POST,
                "/customers",
                &[],
                Some(&form),
                Some(&key),
                "create_customer",
            )
            .await?;
        string_field(&created, "id", "create_customer")
    }

    async fn create_or_reuse_draft_invoice(&self, customer_id: &str) -> Result<String> {
        let drafts = self
            .request(
                reqwest::Method::GET,
                "/invoices",
                &[
                    ("customer".to_string(), customer_id.to_string()),
                    ("status".to_string(), "draft".to_string()),
                    ("limit".to_string(), "1".to_string()),
                ],
                None,
                None,
                "list_invoices",
            )
            .await?;
        if let Some(id) = drafts.pointer("/data/0/id").and_then(Value::as_str) {
            self.remember_invoice_customer(id, customer_id);
            return Ok(id.to_string());
        }

        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("collection_method".to_string(), "send_invoice".to_string()),
            (
                "days_until_due".to_string(),
                self.billing.days_until_due.to_string(),
            ),
            ("auto_advance".to_string(), "false".to_string()),
            ("currency".to_string(), self.billing.currency.clone()),
        ];
        let key = Self::generate_idempotency_key("create_invoice");
        let created = self
            .request(
                reqwest::Method::POST,
                "/invoices",
                &[],
                Some(&form),
                Some(&key),
                "create_invoice",
            )
            .await?;
        let id = string_field(&created, "id", "create_invoice")?;
        self.remember_invoice_customer(&id, customer_id);
        Ok(id)
    }

    async fn push_invoice_line_item(
        &self,
        invoice_id: &str,
        idempotency_key: &str,
        amount_cents: i64,
        description: &str,
    ) -> Result<()> {
        let customer = self.invoice_customer(invoice_id).await?;
        let form = vec![
            ("customer".to_string(), customer),
            ("invoice".to_string(), invoice_id.to_string()),
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), self.billing.currency.clone()),
            ("description".to_string(), description.to_string()),
        ];
        self.request(
            reqwest::Method::POST,
            "/invoiceitems",
            &[],
            Some(&form),
            Some(idempotency_key),
            "push_line_item",
        )
        .await?;
        Ok(())
    }

    async fn finalize_invoice(&self, invoice_id: &str) -> Result<FinalizedInvoice> {
        let key = Self::generate_idempotency_key("finalize_invoice");
        let finalized = self
            .request(
                reqwest::Method::POST,
                &format!("/invoices/{}/finalize", invoice_id),
                &[],
                Some(&[("auto_advance".to_string(), "false".to_string())]),
                Some(&key),
                "finalize_invoice",
            )
            .await?;
        Ok(FinalizedInvoice {
            status: finalized
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("open")
                .to_string(),
            hosted_url: finalized
                .get("hosted_invoice_url")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

fn string_field(value: &Value, field: &str, operation: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            PawsyncError::provider(operation, format!("response missing '{}'", field))
        })
}

fn parse_subscription(raw: &Value) -> Result<ProviderSubscription> {
    let id = string_field(raw, "id", "list_subscriptions")?;

    // customer may be expanded or a bare id
    let (customer_ref, customer_email, customer_name) = match raw.get("customer") {
        Some(Value::String(id)) => (id.clone(), None, None),
        Some(customer @ Value::Object(_)) => (
            string_field(customer, "id", "list_subscriptions")?,
            customer
                .get("email")
                .and_then(Value::as_str)
                .map(str::to_string),
            customer
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
        _ => {
            return Err(PawsyncError::provider(
                "list_subscriptions",
                format!("subscription {} has no customer", id),
            ))
        }
    };

    let status = SubscriptionStatus::from_provider(
        raw.get("status").and_then(Value::as_str).unwrap_or(""),
    );

    let metadata: HashMap<String, String> = raw
        .get("metadata")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(ProviderSubscription {
        id,
        customer_ref,
        customer_email,
        customer_name,
        status,
        service_code: derive_service_code(raw),
        metadata,
    })
}

/// The service sold by a subscription lives on its price: an explicit
/// `service_code` metadata entry, or a nickname that matches a catalog
/// label exactly.
fn derive_service_code(raw: &Value) -> Option<String> {
    let price = raw.pointer("/items/data/0/price")?;

    if let Some(code) = price
        .pointer("/metadata/service_code")
        .and_then(Value::as_str)
    {
        if ServiceCode::from_code(code).is_ok() {
            return Some(code.to_string());
        }
    }

    let nickname = price.get("nickname").and_then(Value::as_str)?;
    ServiceCode::from_label(nickname.trim())
        .ok()
        .map(|code| code.as_str().to_string())
}

/// Calculate backoff delay with exponential backoff and jitter.
fn calculate_backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
    let delay_ms = delay_ms.min(max_ms);

    // 0-25% jitter
    let jitter = if delay_ms > 0 {
        fastrand::u64(0..=delay_ms / 4)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter))
}
