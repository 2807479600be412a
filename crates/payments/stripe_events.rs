//! Typed views over the `data.object` payloads the reconciler cares about.
//!
//! Stripe sends the same envelope for every event; only the declared `type` says
//! which object shape to expect. Decoding each shape up front means handlers never
//! poke at untyped JSON, and an event whose object does not match its type is
//! rejected in one place.

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::stripe_client::StripeEvent;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_CREATED: &str = "customer.subscription.created";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";

/// Metadata key the checkout flow stamps with the internal user id.
pub const USER_ID_METADATA_KEY: &str = "userId";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<CustomerDetails>,
    pub subscription: Option<String>,
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CustomerDetails {
    pub email: Option<String>,
}

impl CheckoutSessionObject {
    pub fn user_id_hint(&self) -> Option<&str> {
        metadata_user_id(&self.metadata).or(self.client_reference_id.as_deref())
    }

    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|details| details.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: Option<String>,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub current_period_end: Option<i64>,
    pub cancel_at: Option<i64>,
    #[serde(default)]
    pub items: SubscriptionItems,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SubscriptionItem {
    pub current_period_end: Option<i64>,
}

impl SubscriptionObject {
    pub fn user_id_hint(&self) -> Option<&str> {
        metadata_user_id(&self.metadata)
    }

    /// Newer API versions moved the period onto the items; fall back to the first
    /// item, then to an explicit `cancel_at`.
    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| {
                self.items
                    .data
                    .first()
                    .and_then(|item| item.current_period_end)
            })
            .or(self.cancel_at)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InvoiceObject {
    pub id: Option<String>,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub parent: Option<InvoiceParent>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InvoiceParent {
    pub subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InvoiceSubscriptionDetails {
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl InvoiceObject {
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_deref().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.subscription_details.as_ref())
                .and_then(|details| details.subscription.as_deref())
        })
    }

    pub fn user_id_hint(&self) -> Option<&str> {
        self.parent
            .as_ref()
            .and_then(|parent| parent.subscription_details.as_ref())
            .and_then(|details| metadata_user_id(&details.metadata))
    }
}

/// A verified Stripe event decoded into the shape its type promises.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    CheckoutCompleted(CheckoutSessionObject),
    SubscriptionCreated(SubscriptionObject),
    SubscriptionUpdated(SubscriptionObject),
    SubscriptionDeleted(SubscriptionObject),
    InvoicePaymentSucceeded(InvoiceObject),
    InvoicePaymentFailed(InvoiceObject),
    Unrecognized,
}

impl BillingEvent {
    pub fn from_stripe_event(event: &StripeEvent) -> Result<Self, serde_json::Error> {
        let event = match event.type_.as_str() {
            CHECKOUT_SESSION_COMPLETED => BillingEvent::CheckoutCompleted(decode(event)?),
            SUBSCRIPTION_CREATED => BillingEvent::SubscriptionCreated(decode(event)?),
            SUBSCRIPTION_UPDATED => BillingEvent::SubscriptionUpdated(decode(event)?),
            SUBSCRIPTION_DELETED => BillingEvent::SubscriptionDeleted(decode(event)?),
            INVOICE_PAYMENT_SUCCEEDED => BillingEvent::InvoicePaymentSucceeded(decode(event)?),
            INVOICE_PAYMENT_FAILED => BillingEvent::InvoicePaymentFailed(decode(event)?),
            _ => BillingEvent::Unrecognized,
        };
        Ok(event)
    }
}

fn decode<T: DeserializeOwned>(event: &StripeEvent) -> Result<T, serde_json::Error> {
    T::deserialize(&event.data.object)
}

fn metadata_user_id(metadata: &HashMap<String, String>) -> Option<&str> {
    metadata
        .get(USER_ID_METADATA_KEY)
        .or_else(|| metadata.get("user_id"))
        .map(|value| value.as_str())
        .filter(|value| !value.trim().is_empty())
}
