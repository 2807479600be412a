use std::{collections::HashMap, sync::Arc};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use axum::http::StatusCode;
use bff_core::{
    domain::{
        entities::users::UserEntity,
        repositories::users::UserRepository,
        value_objects::{billing::BillingTransition, enums::subscription_statuses::SubscriptionStatus},
    },
    payments::{
        stripe_client::{CheckoutSessionRequest, StripeClient, StripeEvent},
        stripe_events::{
            BillingEvent, CheckoutSessionObject, InvoiceObject, SubscriptionObject,
            USER_ID_METADATA_KEY,
        },
    },
};
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StripeGateway: Send + Sync {
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent>;

    async fn create_checkout_session(&self, request: CheckoutSessionRequest) -> AnyResult<String>;

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> AnyResult<String>;
}

#[async_trait]
impl StripeGateway for StripeClient {
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent> {
        self.verify_webhook_signature(payload, signature)
    }

    async fn create_checkout_session(&self, request: CheckoutSessionRequest) -> AnyResult<String> {
        self.create_checkout_session(request).await
    }

    async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> AnyResult<String> {
        self.create_billing_portal_session(customer_id, return_url)
            .await
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("User not found")]
    UserNotFound,
    #[error("No subscription found")]
    NoBillingCustomer,
    #[error("Already subscribed")]
    AlreadySubscribed,
    #[error("Payment provider request failed")]
    Provider(#[source] anyhow::Error),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl BillingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::InvalidSignature
            | BillingError::UserNotFound
            | BillingError::NoBillingCustomer
            | BillingError::AlreadySubscribed => StatusCode::BAD_REQUEST,
            BillingError::Provider(_) | BillingError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Value of the `error` query parameter on the browser redirect.
    pub fn redirect_code(&self) -> &'static str {
        match self {
            BillingError::UserNotFound => "user_not_found",
            BillingError::NoBillingCustomer => "no_subscription",
            BillingError::AlreadySubscribed => "already_subscribed",
            BillingError::InvalidSignature
            | BillingError::Provider(_)
            | BillingError::Internal(_) => "portal_failed",
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, BillingError>;

/// What became of a verified webhook event. Every variant is acknowledged with 200.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Applied {
        user_id: i32,
        status: SubscriptionStatus,
    },
    Ignored,
    /// Recognized but unusable: no matching user or a payload that does not fit its type.
    Dropped,
}

#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub price_id: String,
    pub trial_days: u32,
    pub portal_return_url: String,
}

/// The identifiers an event offers for finding its user, strongest first.
#[derive(Debug)]
struct Subject<'a> {
    user_id_hint: Option<&'a str>,
    customer_id: Option<&'a str>,
    email: Option<&'a str>,
}

pub struct BillingUseCase<U, G>
where
    U: UserRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    user_repo: Arc<U>,
    stripe_client: Arc<G>,
    settings: BillingSettings,
}

impl<U, G> BillingUseCase<U, G>
where
    U: UserRepository + Send + Sync + 'static,
    G: StripeGateway + 'static,
{
    pub fn new(user_repo: Arc<U>, stripe_client: Arc<G>, settings: BillingSettings) -> Self {
        Self {
            user_repo,
            stripe_client,
            settings,
        }
    }

    pub async fn handle_stripe_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> UseCaseResult<WebhookOutcome> {
        let Some(signature) = signature.filter(|value| !value.is_empty()) else {
            warn!("billing: stripe webhook without stripe-signature header");
            return Err(BillingError::InvalidSignature);
        };

        let event = self
            .stripe_client
            .verify_webhook_signature(payload, signature)
            .map_err(|err| {
                warn!(
                    error = %err,
                    status = BillingError::InvalidSignature.status_code().as_u16(),
                    "billing: stripe webhook verification failed"
                );
                BillingError::InvalidSignature
            })?;

        let event_type = event.type_.clone();
        info!(
            event_id = ?event.id,
            event_type = %event_type,
            "billing: stripe webhook verified"
        );

        let billing_event = match BillingEvent::from_stripe_event(&event) {
            Ok(billing_event) => billing_event,
            Err(err) => {
                error!(
                    event_id = ?event.id,
                    event_type = %event_type,
                    error = %err,
                    "billing: webhook payload does not match its event type, dropping"
                );
                return Ok(WebhookOutcome::Dropped);
            }
        };

        let outcome = match billing_event {
            BillingEvent::CheckoutCompleted(session) => {
                self.handle_checkout_completed(&event_type, &session).await
            }
            BillingEvent::SubscriptionCreated(subscription) => {
                self.handle_subscription_created(&event_type, &subscription)
                    .await
            }
            BillingEvent::SubscriptionUpdated(subscription) => {
                self.handle_subscription_updated(&event_type, &subscription)
                    .await
            }
            BillingEvent::SubscriptionDeleted(subscription) => {
                let subject = Subject {
                    user_id_hint: subscription.user_id_hint(),
                    customer_id: subscription.customer.as_deref(),
                    email: None,
                };
                self.apply(&event_type, subject, BillingTransition::DowngradeToFree)
                    .await
            }
            BillingEvent::InvoicePaymentSucceeded(invoice) => {
                self.handle_invoice_paid(&event_type, &invoice).await
            }
            BillingEvent::InvoicePaymentFailed(invoice) => {
                self.handle_invoice_failed(&event_type, &invoice).await
            }
            BillingEvent::Unrecognized => {
                debug!(event_type = %event_type, "billing: unhandled stripe event type");
                Ok(WebhookOutcome::Ignored)
            }
        }?;

        info!(
            event_type = %event_type,
            outcome = ?outcome,
            "billing: stripe webhook processed"
        );
        Ok(outcome)
    }

    pub async fn create_portal_session(&self, user_id: i32) -> UseCaseResult<String> {
        let user = self.load_user(user_id).await?;

        let customer_id = user.stripe_customer_id.as_deref().ok_or_else(|| {
            info!(user_id, "billing: portal requested without a billing customer");
            BillingError::NoBillingCustomer
        })?;

        let url = self
            .stripe_client
            .create_billing_portal_session(customer_id, &self.settings.portal_return_url)
            .await
            .map_err(|err| {
                error!(
                    user_id,
                    customer_id,
                    error = ?err,
                    "billing: failed to create billing portal session"
                );
                BillingError::Provider(err)
            })?;

        info!(user_id, "billing: billing portal session created");
        Ok(url)
    }

    pub async fn create_checkout_session(&self, user_id: i32) -> UseCaseResult<String> {
        let user = self.load_user(user_id).await?;

        let status = SubscriptionStatus::from_str(&user.subscription_status);
        if status.has_access() {
            info!(user_id, status = %status, "billing: checkout refused, already subscribed");
            return Err(BillingError::AlreadySubscribed);
        }

        let request = CheckoutSessionRequest {
            price_id: self.settings.price_id.clone(),
            customer_email: user.stripe_customer_id.is_none().then(|| user.email.clone()),
            customer_id: user.stripe_customer_id.clone(),
            trial_period_days: Some(self.settings.trial_days).filter(|days| *days > 0),
            metadata: HashMap::from([(USER_ID_METADATA_KEY.to_string(), user.id.to_string())]),
        };

        let url = self
            .stripe_client
            .create_checkout_session(request)
            .await
            .map_err(|err| {
                error!(user_id, error = ?err, "billing: failed to create checkout session");
                BillingError::Provider(err)
            })?;

        info!(user_id, "billing: checkout session created");
        Ok(url)
    }

    async fn handle_checkout_completed(
        &self,
        event_type: &str,
        session: &CheckoutSessionObject,
    ) -> UseCaseResult<WebhookOutcome> {
        let Some(customer_id) = session.customer.as_deref() else {
            info!(
                session_id = %session.id,
                "billing: checkout session carries no customer, nothing to attach"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let subject = Subject {
            user_id_hint: session.user_id_hint(),
            customer_id: Some(customer_id),
            email: session.email(),
        };
        self.apply(
            event_type,
            subject,
            BillingTransition::AttachCustomer {
                customer_id: customer_id.to_string(),
            },
        )
        .await
    }

    async fn handle_subscription_created(
        &self,
        event_type: &str,
        subscription: &SubscriptionObject,
    ) -> UseCaseResult<WebhookOutcome> {
        let subject = Subject {
            user_id_hint: subscription.user_id_hint(),
            customer_id: subscription.customer.as_deref(),
            email: None,
        };
        self.apply(
            event_type,
            subject,
            BillingTransition::StartTrial {
                subscription_id: subscription.id.clone(),
            },
        )
        .await
    }

    async fn handle_subscription_updated(
        &self,
        event_type: &str,
        subscription: &SubscriptionObject,
    ) -> UseCaseResult<WebhookOutcome> {
        let transition = if subscription.cancel_at_period_end {
            let Some(ends_at) = subscription.period_end().and_then(ts_to_datetime) else {
                error!(
                    subscription_id = %subscription.id,
                    "billing: canceling subscription has no period end, dropping"
                );
                return Ok(WebhookOutcome::Dropped);
            };
            BillingTransition::MarkCanceling {
                subscription_id: subscription.id.clone(),
                ends_at,
            }
        } else if subscription.status == "active" {
            BillingTransition::Activate {
                subscription_id: subscription.id.clone(),
            }
        } else {
            debug!(
                subscription_id = %subscription.id,
                subscription_status = %subscription.status,
                "billing: subscription update needs no transition"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let subject = Subject {
            user_id_hint: subscription.user_id_hint(),
            customer_id: subscription.customer.as_deref(),
            email: None,
        };
        self.apply(event_type, subject, transition).await
    }

    async fn handle_invoice_paid(
        &self,
        event_type: &str,
        invoice: &InvoiceObject,
    ) -> UseCaseResult<WebhookOutcome> {
        let Some(subscription_id) = invoice.subscription_id() else {
            debug!(invoice_id = ?invoice.id, "billing: invoice is not for a subscription");
            return Ok(WebhookOutcome::Ignored);
        };

        let subject = Subject {
            user_id_hint: invoice.user_id_hint(),
            customer_id: invoice.customer.as_deref(),
            email: None,
        };
        self.apply(
            event_type,
            subject,
            BillingTransition::Activate {
                subscription_id: subscription_id.to_string(),
            },
        )
        .await
    }

    async fn handle_invoice_failed(
        &self,
        event_type: &str,
        invoice: &InvoiceObject,
    ) -> UseCaseResult<WebhookOutcome> {
        let subject = Subject {
            user_id_hint: invoice.user_id_hint(),
            customer_id: invoice.customer.as_deref(),
            email: None,
        };
        let Some(user) = self.resolve_user(event_type, &subject).await? else {
            return Ok(WebhookOutcome::Dropped);
        };

        error!(
            user_id = user.id,
            invoice_id = ?invoice.id,
            subscription_id = ?invoice.subscription_id(),
            customer_id = ?invoice.customer,
            "billing: invoice payment failed"
        );
        Ok(WebhookOutcome::Ignored)
    }

    async fn apply(
        &self,
        event_type: &str,
        subject: Subject<'_>,
        transition: BillingTransition,
    ) -> UseCaseResult<WebhookOutcome> {
        let Some(user) = self.resolve_user(event_type, &subject).await? else {
            return Ok(WebhookOutcome::Dropped);
        };

        info!(
            user_id = user.id,
            event_type,
            transition = %transition,
            "billing: applying billing transition"
        );

        let updated = self
            .user_repo
            .apply_billing_transition(user.id, transition)
            .await
            .map_err(|err| {
                error!(
                    user_id = user.id,
                    event_type,
                    db_error = ?err,
                    "billing: failed to apply billing transition"
                );
                BillingError::Internal(err)
            })?;

        Ok(WebhookOutcome::Applied {
            user_id: updated.id,
            status: SubscriptionStatus::from_str(&updated.subscription_status),
        })
    }

    /// Metadata user id first, then the billing customer, then the checkout email.
    async fn resolve_user(
        &self,
        event_type: &str,
        subject: &Subject<'_>,
    ) -> UseCaseResult<Option<UserEntity>> {
        let hinted_id = subject
            .user_id_hint
            .and_then(|raw| raw.trim().parse::<i32>().ok())
            .filter(|id| *id > 0);

        if let Some(user_id) = hinted_id {
            if let Some(user) = self.user_repo.find_by_id(user_id).await.map_err(|err| {
                error!(user_id, event_type, db_error = ?err, "billing: user lookup failed");
                BillingError::Internal(err)
            })? {
                return Ok(Some(user));
            }
            warn!(user_id, event_type, "billing: metadata user id matches no user");
        }

        if let Some(customer_id) = subject.customer_id {
            if let Some(user) = self
                .user_repo
                .find_by_stripe_customer_id(customer_id)
                .await
                .map_err(|err| {
                    error!(customer_id, event_type, db_error = ?err, "billing: customer lookup failed");
                    BillingError::Internal(err)
                })?
            {
                return Ok(Some(user));
            }
        }

        if let Some(email) = subject.email {
            if let Some(user) = self.user_repo.find_by_email(email).await.map_err(|err| {
                error!(event_type, db_error = ?err, "billing: email lookup failed");
                BillingError::Internal(err)
            })? {
                return Ok(Some(user));
            }
        }

        error!(
            event_type,
            user_id_hint = ?subject.user_id_hint,
            customer_id = ?subject.customer_id,
            "billing: webhook event matches no user, dropping"
        );
        Ok(None)
    }

    async fn load_user(&self, user_id: i32) -> UseCaseResult<UserEntity> {
        self.user_repo
            .find_by_id(user_id)
            .await
            .map_err(|err| {
                error!(user_id, db_error = ?err, "billing: failed to load user");
                BillingError::Internal(err)
            })?
            .ok_or_else(|| {
                warn!(user_id, "billing: session user has no record");
                BillingError::UserNotFound
            })
    }
}

fn ts_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}
