use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::Sha256;
use tracing::error;

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Stripe's own libraries reject signatures older than five minutes.
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Minimal Stripe client built on reqwest.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    pub livemode: Option<bool>,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// Parameters for a subscription-mode Checkout Session.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub price_id: String,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub trial_period_days: Option<u32>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    param: Option<String>,
}

#[derive(Deserialize)]
struct SessionUrlResp {
    url: Option<String>,
}

impl StripeClient {
    pub fn new(
        secret_key: String,
        webhook_secret: String,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            webhook_secret,
            success_url,
            cancel_url,
        }
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.error);

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.as_ref().and_then(|d| d.type_.clone()),
            stripe_error_code = ?details.as_ref().and_then(|d| d.code.clone()),
            stripe_error_param = ?details.as_ref().and_then(|d| d.param.clone()),
            stripe_error_message = ?details.as_ref().and_then(|d| d.message.clone()),
            context = %context,
            "stripe: api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    /// Creates a subscription Checkout Session and returns its hosted URL.
    pub async fn create_checkout_session(&self, request: CheckoutSessionRequest) -> Result<String> {
        // https://stripe.com/docs/api/checkout/sessions/create
        let body = self.checkout_form(&request);

        let resp = self
            .http
            .post(format!("{STRIPE_API_BASE}/checkout/sessions"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await
            .context("stripe checkout session request failed")?;
        let resp = Self::ensure_success(resp, "create checkout session").await?;

        let parsed: SessionUrlResp = resp.json().await?;
        parsed
            .url
            .ok_or_else(|| anyhow::anyhow!("Stripe Checkout session URL is missing"))
    }

    fn checkout_form(&self, request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let mut body: Vec<(String, String)> = vec![
            ("mode".to_string(), "subscription".to_string()),
            ("line_items[0][price]".to_string(), request.price_id.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
        ];

        // Stripe refuses `customer` and `customer_email` together.
        match (&request.customer_id, &request.customer_email) {
            (Some(customer), _) => body.push(("customer".to_string(), customer.clone())),
            (None, Some(email)) => body.push(("customer_email".to_string(), email.clone())),
            (None, None) => {}
        }

        if let Some(days) = request.trial_period_days.filter(|days| *days > 0) {
            body.push((
                "subscription_data[trial_period_days]".to_string(),
                days.to_string(),
            ));
        }

        let mut metadata: Vec<_> = request.metadata.iter().collect();
        metadata.sort();
        for (key, value) in metadata {
            body.push((format!("metadata[{key}]"), value.clone()));
            body.push((
                format!("subscription_data[metadata][{key}]"),
                value.clone(),
            ));
        }

        body
    }

    /// Creates a Billing Portal session for an existing customer and returns its URL.
    pub async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String> {
        // https://stripe.com/docs/api/customer_portal/sessions/create
        let body = [
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];

        let resp = self
            .http
            .post(format!("{STRIPE_API_BASE}/billing_portal/sessions"))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await
            .context("stripe billing portal request failed")?;
        let resp = Self::ensure_success(resp, "create billing portal session").await?;

        let parsed: SessionUrlResp = resp.json().await?;
        parsed
            .url
            .ok_or_else(|| anyhow::anyhow!("Stripe billing portal URL is missing"))
    }

    /// Verifies the webhook signature. https://stripe.com/docs/webhooks/signatures
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent> {
        self.verify_webhook_signature_at(
            payload,
            signature_header,
            Utc::now().timestamp(),
            DEFAULT_SIGNATURE_TOLERANCE_SECS,
        )
    }

    pub fn verify_webhook_signature_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: i64,
        tolerance_secs: i64,
    ) -> Result<StripeEvent> {
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let part = part.trim();
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = Some(rest);
            } else if let Some(rest) = part.strip_prefix("v1=") {
                signatures.push(rest);
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| anyhow::anyhow!("missing timestamp in stripe-signature"))?;
        if signatures.is_empty() {
            anyhow::bail!("missing v1 in stripe-signature");
        }

        let signed_at: i64 = timestamp
            .parse()
            .context("invalid timestamp in stripe-signature")?;
        if (now - signed_at).abs() > tolerance_secs {
            anyhow::bail!("stripe-signature timestamp outside tolerance");
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);

        let matched = signatures.iter().any(|signature| {
            hex::decode(signature)
                .map(|provided| mac.clone().verify_slice(&provided).is_ok())
                .unwrap_or(false)
        });
        if !matched {
            anyhow::bail!("invalid webhook signature");
        }

        let event: StripeEvent =
            serde_json::from_slice(payload).context("webhook body is not a stripe event")?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_750_000_000;

    fn client() -> StripeClient {
        StripeClient::new(
            "sk_test_xxx".to_string(),
            SECRET.to_string(),
            "https://app.test/dashboard?checkout=success".to_string(),
            "https://app.test/pricing?checkout=canceled".to_string(),
        )
    }

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn payload() -> Vec<u8> {
        br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1"}}}"#
            .to_vec()
    }

    #[test]
    fn accepts_a_valid_signature() {
        let body = payload();
        let header = format!("t={NOW},v1={}", sign(&body, SECRET, NOW));

        let event = client()
            .verify_webhook_signature_at(&body, &header, NOW + 10, 300)
            .expect("valid signature");

        assert_eq!(event.type_, "checkout.session.completed");
        assert_eq!(event.data.object["id"], "cs_1");
    }

    #[test]
    fn accepts_when_any_v1_signature_matches() {
        let body = payload();
        let header = format!(
            "t={NOW},v1={},v1={}",
            sign(&body, "whsec_rotated_out", NOW),
            sign(&body, SECRET, NOW)
        );

        assert!(
            client()
                .verify_webhook_signature_at(&body, &header, NOW, 300)
                .is_ok()
        );
    }

    #[test]
    fn rejects_a_signature_made_with_another_secret() {
        let body = payload();
        let header = format!("t={NOW},v1={}", sign(&body, "wrong_secret", NOW));

        assert!(
            client()
                .verify_webhook_signature_at(&body, &header, NOW, 300)
                .is_err()
        );
    }

    #[test]
    fn rejects_a_modified_body() {
        let body = payload();
        let header = format!("t={NOW},v1={}", sign(&body, SECRET, NOW));
        let tampered = br#"{"id":"evt_1","type":"customer.subscription.deleted","data":{"object":{}}}"#;

        assert!(
            client()
                .verify_webhook_signature_at(tampered, &header, NOW, 300)
                .is_err()
        );
    }

    #[test]
    fn rejects_stale_timestamps() {
        let body = payload();
        let header = format!("t={NOW},v1={}", sign(&body, SECRET, NOW));

        assert!(
            client()
                .verify_webhook_signature_at(&body, &header, NOW + 600, 300)
                .is_err()
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        let body = payload();
        for header in ["garbage", "v1=abcd", "t=1750000000", "t=soon,v1=abcd"] {
            assert!(
                client()
                    .verify_webhook_signature_at(&body, header, NOW, 300)
                    .is_err(),
                "{header}"
            );
        }
    }

    #[test]
    fn checkout_form_prefers_customer_over_email_and_copies_metadata() {
        let request = CheckoutSessionRequest {
            price_id: "price_pro".to_string(),
            customer_id: Some("cus_abc".to_string()),
            customer_email: Some("ada@example.com".to_string()),
            trial_period_days: Some(7),
            metadata: HashMap::from([("userId".to_string(), "42".to_string())]),
        };

        let form = client().checkout_form(&request);
        let has = |key: &str, value: &str| form.iter().any(|(k, v)| k == key && v == value);

        assert!(has("mode", "subscription"));
        assert!(has("line_items[0][price]", "price_pro"));
        assert!(has("customer", "cus_abc"));
        assert!(!form.iter().any(|(k, _)| k == "customer_email"));
        assert!(has("subscription_data[trial_period_days]", "7"));
        assert!(has("metadata[userId]", "42"));
        assert!(has("subscription_data[metadata][userId]", "42"));
    }

    #[test]
    fn checkout_form_skips_zero_day_trials() {
        let request = CheckoutSessionRequest {
            price_id: "price_pro".to_string(),
            customer_id: None,
            customer_email: Some("ada@example.com".to_string()),
            trial_period_days: Some(0),
            metadata: HashMap::new(),
        };

        let form = client().checkout_form(&request);

        assert!(form.iter().any(|(k, v)| k == "customer_email" && v == "ada@example.com"));
        assert!(!form.iter().any(|(k, _)| k.contains("trial_period_days")));
    }
}
