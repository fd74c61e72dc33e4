//! Stripe Webhook Handling
//!
//! Verifies and reconciles Stripe events into local subscription and token
//! state. Each event id is claimed in the processed-events ledger before its
//! handler runs, so redeliveries are acknowledged without side effects.
//!
//! Each handler applies at most one mutation and fails only before it. A
//! retryable failure releases the claim so Stripe's retry runs the handler
//! again. Notifications run after the mutation and never fail the event.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cortex_core::model::{STATUS_ACTIVE, STATUS_CANCELED};
use cortex_core::{EventLedger, PlanTier, Store, SubscriptionUpdate, User, UserId, UserStore};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::catalog;
use crate::email::{self, EmailMessage, EmailRecipient, EmailSender};
use crate::error::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed payload
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Ids of dashboard test deliveries
pub const TEST_EVENT_PREFIX: &str = "evt_test_";

/// Default retention of processed event ids
pub const DEFAULT_EVENT_RETENTION_DAYS: i64 = 30;

const BILLING_URL: &str = "https://omnicortex.ai/dashboard/billing";

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=<hex>...]`)
pub fn verify_signature(payload: &str, header: &str, secret: &str, now: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| PaymentError::WebhookSignature("Missing timestamp in signature header".into()))?;
    if candidates.is_empty() {
        return Err(PaymentError::WebhookSignature(
            "Missing v1 signature in signature header".into(),
        ));
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(PaymentError::WebhookSignature(
            "Timestamp outside the tolerance zone".into(),
        ));
    }

    let mac = signed_mac(payload, secret, timestamp)?;
    let matched = candidates.into_iter().any(|candidate| {
        hex::decode(candidate).is_ok_and(|bytes| mac.clone().verify_slice(&bytes).is_ok())
    });

    if matched {
        Ok(())
    } else {
        Err(PaymentError::WebhookSignature(
            "No signature matches the payload".into(),
        ))
    }
}

/// Build a `Stripe-Signature` header value for `payload`
pub fn signature_header(payload: &str, secret: &str, timestamp: i64) -> Result<String> {
    let mac = signed_mac(payload, secret, timestamp)?;
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn signed_mac(payload: &str, secret: &str, timestamp: i64) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(format!("Invalid webhook secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// The part of a Stripe event we read
#[derive(Clone, Debug, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventData {
    pub object: Value,
}

fn jget<'a>(val: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str(val: &Value, path: &[&str]) -> Option<String> {
    jget(val, path)?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Expandable reference: either an id string or an object with an `id`
fn extract_id(val: &Value, key: &str) -> Option<String> {
    let field = val.get(key)?;
    field
        .as_str()
        .or_else(|| field.get("id").and_then(Value::as_str))
        .map(str::to_string)
}

fn extract_time(val: &Value, key: &str) -> Option<DateTime<Utc>> {
    val.get(key)?
        .as_i64()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
}

fn metadata_user_id(object: &Value) -> Option<UserId> {
    extract_str(object, &["metadata", "user_id"])?.trim().parse().ok()
}

fn object_id(object: &Value) -> Result<String> {
    extract_str(object, &["id"])
        .ok_or_else(|| PaymentError::WebhookParse("Event object has no id".into()))
}

/// Parsed webhook event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Checkout finished; subscription or credit purchase
    CheckoutCompleted {
        session_id: String,
        user_id: Option<UserId>,
        customer_id: Option<String>,
        subscription_id: Option<String>,
        customer_email: Option<String>,
        plan_id: Option<String>,
        credit_purchase: bool,
    },

    SubscriptionCreated {
        subscription_id: String,
        user_id: Option<UserId>,
        plan_id: Option<String>,
        status: String,
    },

    SubscriptionUpdated {
        subscription_id: String,
        status: String,
    },

    /// Subscription ended; `ended_at` is the last day of access
    SubscriptionDeleted {
        subscription_id: String,
        ended_at: Option<DateTime<Utc>>,
    },

    InvoicePaid {
        invoice_id: String,
        customer_id: Option<String>,
        amount_paid: i64,
        hosted_invoice_url: Option<String>,
        billing_reason: Option<String>,
    },

    InvoicePaymentFailed {
        invoice_id: String,
        customer_id: Option<String>,
    },

    InvoiceUpcoming {
        customer_id: Option<String>,
        amount_due: i64,
        next_payment_attempt: Option<DateTime<Utc>>,
    },

    /// One-time payment; credit packs carry their metadata here
    PaymentSucceeded {
        payment_intent_id: String,
        user_id: Option<UserId>,
        credit_pack_id: Option<String>,
    },

    /// Unhandled event type
    Other { event_type: String },
}

impl WebhookEvent {
    /// Map an event envelope onto the events we reconcile
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self> {
        let object = &envelope.data.object;

        Ok(match envelope.event_type.as_str() {
            "checkout.session.completed" => Self::CheckoutCompleted {
                session_id: object_id(object)?,
                user_id: metadata_user_id(object),
                customer_id: extract_id(object, "customer"),
                subscription_id: extract_id(object, "subscription"),
                customer_email: extract_str(object, &["customer_details", "email"])
                    .or_else(|| extract_str(object, &["customer_email"]))
                    .or_else(|| extract_str(object, &["metadata", "customer_email"])),
                plan_id: extract_str(object, &["metadata", "plan_id"]),
                credit_purchase: extract_str(object, &["mode"]).as_deref() == Some("payment")
                    || extract_str(object, &["metadata", "type"]).as_deref()
                        == Some("credit_purchase"),
            },

            "customer.subscription.created" => Self::SubscriptionCreated {
                subscription_id: object_id(object)?,
                user_id: metadata_user_id(object),
                plan_id: extract_str(object, &["metadata", "plan_id"]),
                status: extract_str(object, &["status"]).unwrap_or_else(|| "incomplete".into()),
            },

            "customer.subscription.updated" => Self::SubscriptionUpdated {
                subscription_id: object_id(object)?,
                status: extract_str(object, &["status"])
                    .ok_or_else(|| PaymentError::WebhookParse("Subscription has no status".into()))?,
            },

            "customer.subscription.deleted" => Self::SubscriptionDeleted {
                subscription_id: object_id(object)?,
                ended_at: extract_time(object, "current_period_end")
                    .or_else(|| extract_time(object, "ended_at")),
            },

            "invoice.paid" => Self::InvoicePaid {
                invoice_id: object_id(object)?,
                customer_id: extract_id(object, "customer"),
                amount_paid: object.get("amount_paid").and_then(Value::as_i64).unwrap_or(0),
                hosted_invoice_url: extract_str(object, &["hosted_invoice_url"]),
                billing_reason: extract_str(object, &["billing_reason"]),
            },

            "invoice.payment_failed" => Self::InvoicePaymentFailed {
                invoice_id: object_id(object)?,
                customer_id: extract_id(object, "customer"),
            },

            // Upcoming invoices have no id yet
            "invoice.upcoming" => Self::InvoiceUpcoming {
                customer_id: extract_id(object, "customer"),
                amount_due: object.get("amount_due").and_then(Value::as_i64).unwrap_or(0),
                next_payment_attempt: extract_time(object, "next_payment_attempt"),
            },

            "payment_intent.succeeded" => Self::PaymentSucceeded {
                payment_intent_id: object_id(object)?,
                user_id: metadata_user_id(object),
                credit_pack_id: extract_str(object, &["metadata", "credit_pack_id"]),
            },

            other => Self::Other {
                event_type: other.to_string(),
            },
        })
    }
}

/// What `process` did with a delivery
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Handler ran (possibly as a logged no-op)
    Processed,
    /// Dashboard test event, verified and ignored
    TestEvent,
    /// Already processed, ignored
    Duplicate,
}

/// Webhook settings
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub secret: String,
    pub retention: Duration,
}

impl WebhookConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            retention: Duration::days(DEFAULT_EVENT_RETENTION_DAYS),
        }
    }

    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Reconciles verified Stripe events into the store
pub struct WebhookReconciler {
    store: Arc<dyn Store>,
    mailer: Arc<dyn EmailSender>,
    config: WebhookConfig,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn Store>, mailer: Arc<dyn EmailSender>, config: WebhookConfig) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    /// Verify, de-duplicate and handle one delivery
    pub async fn process(&self, payload: &str, signature: &str) -> Result<Outcome> {
        verify_signature(payload, signature, &self.config.secret, Utc::now().timestamp())?;

        let envelope: EventEnvelope = serde_json::from_str(payload)
            .map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

        if envelope.id.starts_with(TEST_EVENT_PREFIX) {
            tracing::info!(event_id = %envelope.id, "Test event verified");
            return Ok(Outcome::TestEvent);
        }

        let event = WebhookEvent::from_envelope(&envelope)?;

        let claimed = self
            .store
            .claim_event(&envelope.id, &envelope.event_type, self.config.retention)
            .await?;
        if !claimed {
            tracing::info!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                "Duplicate webhook delivery ignored"
            );
            return Ok(Outcome::Duplicate);
        }

        tracing::info!(
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            "Processing Stripe webhook"
        );

        if let Err(err) = self.handle(event).await {
            tracing::error!(
                event_id = %envelope.id,
                event_type = %envelope.event_type,
                error = %err,
                "Webhook handler failed"
            );
            if err.is_retryable() {
                if let Err(release_err) = self.store.release_event(&envelope.id).await {
                    tracing::error!(event_id = %envelope.id, error = %release_err, "Failed to release event claim");
                }
            }
            return Err(err);
        }

        Ok(Outcome::Processed)
    }

    /// Apply one event to the store
    pub async fn handle(&self, event: WebhookEvent) -> Result<()> {
        match event {
            WebhookEvent::CheckoutCompleted {
                session_id,
                user_id,
                customer_id,
                subscription_id,
                customer_email,
                plan_id,
                credit_purchase,
            } => {
                let Some(user_id) = user_id else {
                    tracing::warn!(session_id = %session_id, "No user_id in checkout session metadata");
                    return Ok(());
                };

                if credit_purchase {
                    let update = SubscriptionUpdate {
                        customer_id,
                        ..Default::default()
                    };
                    if !self.store.update_subscription(user_id, &update).await? {
                        tracing::warn!(user_id, session_id = %session_id, "Checkout for unknown user");
                    }
                    return Ok(());
                }

                let plan = plan_or_default(plan_id.as_deref());
                let update = SubscriptionUpdate {
                    customer_id,
                    subscription_id,
                    plan: Some(plan),
                    status: Some(STATUS_ACTIVE.to_string()),
                };
                if !self.store.update_subscription(user_id, &update).await? {
                    tracing::warn!(user_id, session_id = %session_id, "Checkout for unknown user");
                    return Ok(());
                }
                tracing::info!(user_id, plan = %plan, "User subscribed");

                if let Some(user) = self.reload_user(user_id).await {
                    let entry = catalog::plan_for_tier(plan);
                    let message = EmailMessage::Welcome {
                        name: user.display_name(),
                        plan: entry.name.to_string(),
                        credits: catalog::format_token_quota(entry.limits.tokens_per_month),
                    };
                    self.notify(&user, customer_email.as_deref(), &message).await;
                }
            }

            WebhookEvent::SubscriptionCreated {
                subscription_id,
                user_id,
                plan_id,
                status,
            } => {
                let Some(user_id) = user_id else {
                    tracing::warn!(subscription_id = %subscription_id, "No user_id in subscription metadata");
                    return Ok(());
                };

                let update = SubscriptionUpdate {
                    subscription_id: Some(subscription_id.clone()),
                    plan: Some(plan_or_default(plan_id.as_deref())),
                    status: Some(status),
                    ..Default::default()
                };
                if !self.store.update_subscription(user_id, &update).await? {
                    tracing::warn!(user_id, subscription_id = %subscription_id, "Subscription for unknown user");
                }
            }

            WebhookEvent::SubscriptionUpdated {
                subscription_id,
                status,
            } => {
                let update = SubscriptionUpdate {
                    status: Some(status.clone()),
                    ..Default::default()
                };
                let touched = self
                    .store
                    .update_subscription_by_subscription_id(&subscription_id, &update)
                    .await?;
                if touched == 0 {
                    tracing::info!(subscription_id = %subscription_id, "Update for unknown subscription ignored");
                } else {
                    tracing::info!(subscription_id = %subscription_id, status = %status, "Subscription status updated");
                }
            }

            WebhookEvent::SubscriptionDeleted {
                subscription_id,
                ended_at,
            } => {
                let Some(user) = self.store.find_user_by_subscription_id(&subscription_id).await? else {
                    tracing::info!(subscription_id = %subscription_id, "Deletion for unknown subscription ignored");
                    return Ok(());
                };
                let previous_plan = catalog::plan_for_tier(user.subscription_plan).name;

                let update = SubscriptionUpdate {
                    plan: Some(PlanTier::Free),
                    status: Some(STATUS_CANCELED.to_string()),
                    ..Default::default()
                };
                self.store
                    .update_subscription_by_subscription_id(&subscription_id, &update)
                    .await?;
                tracing::info!(user_id = user.id, subscription_id = %subscription_id, "Subscription canceled");

                let message = EmailMessage::CancellationConfirmation {
                    name: user.display_name(),
                    plan: previous_plan.to_string(),
                    end_date: format_date(ended_at.unwrap_or_else(Utc::now)),
                };
                self.notify(&user, None, &message).await;
            }

            WebhookEvent::InvoicePaid {
                invoice_id,
                customer_id,
                amount_paid,
                hosted_invoice_url,
                billing_reason,
            } => {
                let Some(user) = self.user_by_customer(customer_id.as_deref()).await? else {
                    tracing::info!(invoice_id = %invoice_id, "Paid invoice for unknown customer");
                    return Ok(());
                };

                if billing_reason.as_deref() == Some("subscription_cycle") {
                    self.store.reset_monthly_usage(user.id).await?;
                    tracing::info!(user_id = user.id, "Monthly usage reset for new billing cycle");
                }

                let message = EmailMessage::PaymentConfirmation {
                    name: user.display_name(),
                    amount: catalog::format_amount(amount_paid),
                    plan: catalog::plan_for_tier(user.subscription_plan).name.to_string(),
                    invoice_url: hosted_invoice_url.unwrap_or_else(|| BILLING_URL.to_string()),
                };
                self.notify(&user, None, &message).await;
            }

            WebhookEvent::InvoicePaymentFailed {
                invoice_id,
                customer_id,
            } => {
                let user_id = self
                    .user_by_customer(customer_id.as_deref())
                    .await?
                    .map(|u| u.id);
                tracing::warn!(
                    invoice_id = %invoice_id,
                    customer_id = ?customer_id,
                    user_id = ?user_id,
                    "Invoice payment failed"
                );
            }

            WebhookEvent::InvoiceUpcoming {
                customer_id,
                amount_due,
                next_payment_attempt,
            } => {
                let Some(user) = self.user_by_customer(customer_id.as_deref()).await? else {
                    tracing::info!(customer_id = ?customer_id, "Upcoming invoice for unknown customer");
                    return Ok(());
                };
                let Some(renewal) = next_payment_attempt else {
                    tracing::info!(user_id = user.id, "Upcoming invoice without a payment attempt");
                    return Ok(());
                };

                let message = EmailMessage::RenewalReminder {
                    name: user.display_name(),
                    plan: catalog::plan_for_tier(user.subscription_plan).name.to_string(),
                    renewal_date: format_date(renewal),
                    amount: catalog::format_amount(amount_due),
                };
                self.notify(&user, None, &message).await;
            }

            WebhookEvent::PaymentSucceeded {
                payment_intent_id,
                user_id,
                credit_pack_id,
            } => {
                let (Some(user_id), Some(pack_id)) = (user_id, credit_pack_id) else {
                    tracing::debug!(payment_intent_id = %payment_intent_id, "Payment without credit pack metadata");
                    return Ok(());
                };
                let Some(pack) = catalog::credit_pack_by_id(&pack_id) else {
                    tracing::warn!(payment_intent_id = %payment_intent_id, pack = %pack_id, "Unknown credit pack");
                    return Ok(());
                };

                let Some(balance) = self.store.credit_tokens(user_id, pack.tokens).await? else {
                    tracing::warn!(user_id, payment_intent_id = %payment_intent_id, "Credit purchase for unknown user");
                    return Ok(());
                };
                tracing::info!(user_id, tokens = pack.tokens, balance, "Credit pack applied");

                if let Some(user) = self.reload_user(user_id).await {
                    let message = EmailMessage::PaymentConfirmation {
                        name: user.display_name(),
                        amount: catalog::format_amount(pack.price_cents),
                        plan: pack.name.to_string(),
                        invoice_url: BILLING_URL.to_string(),
                    };
                    self.notify(&user, None, &message).await;
                }
            }

            WebhookEvent::Other { event_type } => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event");
            }
        }

        Ok(())
    }

    async fn user_by_customer(&self, customer_id: Option<&str>) -> Result<Option<User>> {
        match customer_id {
            Some(id) => Ok(self.store.find_user_by_customer_id(id).await?),
            None => Ok(None),
        }
    }

    /// Re-read a user after a committed mutation. Errors are logged, not returned.
    async fn reload_user(&self, user_id: UserId) -> Option<User> {
        match self.store.get_user(user_id).await {
            Ok(user) => user,
            Err(err) => {
                tracing::error!(user_id, error = %err, "Failed to reload user for notification");
                None
            }
        }
    }

    /// Runs after the event's mutation is committed, so failures are logged only
    async fn notify(&self, user: &User, fallback_email: Option<&str>, message: &EmailMessage) {
        let Some(address) = user.email.as_deref().or(fallback_email) else {
            tracing::warn!(user_id = user.id, template = message.kind(), "No e-mail address, skipping");
            return;
        };

        let recipient = EmailRecipient {
            email: address.to_string(),
            name: user.name.clone(),
        };
        match self.mailer.send(&recipient, &email::render(message), None).await {
            Ok(()) => tracing::info!(user_id = user.id, template = message.kind(), "Notification sent"),
            Err(err) => tracing::error!(
                user_id = user.id,
                template = message.kind(),
                error = %err,
                "Notification failed"
            ),
        }
    }
}

fn plan_or_default(plan_id: Option<&str>) -> PlanTier {
    plan_id.and_then(PlanTier::from_id).unwrap_or(PlanTier::Pro)
}

fn format_date(at: DateTime<Utc>) -> String {
    at.format("%B %-d, %Y").to_string()
}
