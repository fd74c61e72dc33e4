//! Transactional E-mail
//!
//! Rendering is pure: the same message always yields the same subject and
//! bodies. Delivery goes through the `EmailSender` trait so the reconciler
//! and API surface never depend on a concrete transport.

use async_trait::async_trait;
use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

/// From address used when the caller does not pick one
pub const DEFAULT_FROM: &str = "OmniCortex AI Labs <noreply@omnicortex.ai>";

const SITE: &str = "https://omnicortex.ai";
const COPYRIGHT: &str = "© 2025 OmniCortex AI Labs. All rights reserved.";

/// A rendered e-mail
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecipient {
    pub email: String,
    pub name: Option<String>,
}

/// Template selection with its data. All values are display-ready strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum EmailMessage {
    Welcome {
        name: String,
        plan: String,
        credits: String,
    },
    PaymentConfirmation {
        name: String,
        amount: String,
        plan: String,
        invoice_url: String,
    },
    RenewalReminder {
        name: String,
        plan: String,
        renewal_date: String,
        amount: String,
    },
    CancellationConfirmation {
        name: String,
        plan: String,
        end_date: String,
    },
    CreditsLow {
        name: String,
        remaining: String,
        plan: String,
    },
}

impl EmailMessage {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::PaymentConfirmation { .. } => "payment_confirmation",
            Self::RenewalReminder { .. } => "renewal_reminder",
            Self::CancellationConfirmation { .. } => "cancellation_confirmation",
            Self::CreditsLow { .. } => "credits_low",
        }
    }
}

/// Render a message into subject, HTML and plain-text bodies
pub fn render(message: &EmailMessage) -> EmailTemplate {
    match message {
        EmailMessage::Welcome { name, plan, credits } => EmailTemplate {
            subject: format!("🎉 Welcome to OmniCortex AI Labs, {name}!"),
            html: layout(
                "Welcome to OmniCortex!",
                "#00d4ff",
                &format!(
                    "{greeting}\
                     {para}Thank you for subscribing to the <strong>{plan} Plan</strong>! \
                     You now have access to our cutting-edge AI models and {credits} API credits per month.</p>\
                     {para}Your plan: <strong>{plan}</strong><br>Monthly credits: <strong>{credits}</strong></p>\
                     {button}",
                    greeting = greeting(name),
                    para = PARA,
                    plan = encode_text(plan),
                    credits = encode_text(credits),
                    button = button(&format!("{SITE}/dashboard"), "Go to Dashboard →"),
                ),
            ),
            text: format!(
                "Welcome to OmniCortex AI Labs, {name}!\n\n\
                 Thank you for subscribing to the {plan} Plan! You now have access to our \
                 cutting-edge AI models and {credits} API credits per month.\n\n\
                 Quick Start Guide:\n\
                 1. Get your API key from the Dashboard\n\
                 2. Try our interactive Playground\n\
                 3. Read the documentation for integration guides\n\
                 4. Join our Discord community for support\n\n\
                 Go to Dashboard: {SITE}/dashboard\n\n\
                 Need help? Visit our support center at {SITE}/support\n\n\
                 {COPYRIGHT}\n"
            ),
        },

        EmailMessage::PaymentConfirmation { name, amount, plan, invoice_url } => EmailTemplate {
            subject: format!("✅ Payment Confirmed - OmniCortex {plan}"),
            html: layout(
                "Payment Confirmed",
                "#22c55e",
                &format!(
                    "{greeting}\
                     {para}Your payment of <strong>{amount}</strong> for the {plan} Plan has been processed successfully.</p>\
                     {button}",
                    greeting = greeting(name),
                    para = PARA,
                    amount = encode_text(amount),
                    plan = encode_text(plan),
                    button = button(invoice_url, "View Invoice →"),
                ),
            ),
            text: format!(
                "Payment Confirmed - OmniCortex {plan}\n\n\
                 Hi {name},\n\n\
                 Your payment of {amount} for the {plan} Plan has been processed successfully.\n\n\
                 View Invoice: {invoice_url}\n\n\
                 {COPYRIGHT}\n"
            ),
        },

        EmailMessage::RenewalReminder { name, plan, renewal_date, amount } => EmailTemplate {
            subject: "⏰ Subscription Renewal Reminder - OmniCortex".into(),
            html: layout(
                "Subscription Renewal Reminder",
                "#fbbf24",
                &format!(
                    "{greeting}\
                     {para}Your <strong>{plan} Plan</strong> subscription will renew on <strong>{date}</strong>.</p>\
                     {para}Amount: <strong>{amount}</strong></p>\
                     {button}",
                    greeting = greeting(name),
                    para = PARA,
                    plan = encode_text(plan),
                    date = encode_text(renewal_date),
                    amount = encode_text(amount),
                    button = button(&format!("{SITE}/dashboard/billing"), "Manage Subscription →"),
                ),
            ),
            text: format!(
                "Subscription Renewal Reminder - OmniCortex\n\n\
                 Hi {name},\n\n\
                 Your {plan} Plan subscription will renew on {renewal_date}.\n\n\
                 Amount: {amount}\n\n\
                 Manage Subscription: {SITE}/dashboard/billing\n\n\
                 {COPYRIGHT}\n"
            ),
        },

        EmailMessage::CancellationConfirmation { name, plan, end_date } => EmailTemplate {
            subject: "😢 Subscription Cancelled - OmniCortex".into(),
            html: layout(
                "We're Sorry to See You Go",
                "#ef4444",
                &format!(
                    "{greeting}\
                     {para}Your <strong>{plan} Plan</strong> subscription has been cancelled. \
                     You'll continue to have access until <strong>{date}</strong>.</p>\
                     {para}Changed your mind? You can reactivate your subscription anytime from your dashboard.</p>\
                     {button}",
                    greeting = greeting(name),
                    para = PARA,
                    plan = encode_text(plan),
                    date = encode_text(end_date),
                    button = button(&format!("{SITE}/pricing"), "Reactivate Subscription →"),
                ),
            ),
            text: format!(
                "Subscription Cancelled - OmniCortex\n\n\
                 Hi {name},\n\n\
                 Your {plan} Plan subscription has been cancelled. You'll continue to have access until {end_date}.\n\n\
                 Changed your mind? You can reactivate your subscription anytime from your dashboard.\n\n\
                 Reactivate Subscription: {SITE}/pricing\n\n\
                 We'd love to hear your feedback: {SITE}/feedback\n\n\
                 {COPYRIGHT}\n"
            ),
        },

        EmailMessage::CreditsLow { name, remaining, plan } => EmailTemplate {
            subject: "⚠️ Low Credits Alert - OmniCortex".into(),
            html: layout(
                "⚠️ Low Credits Alert",
                "#fbbf24",
                &format!(
                    "{greeting}\
                     {para}You have <strong>{remaining} credits</strong> remaining on your {plan} Plan. \
                     To avoid service interruption, consider upgrading your plan or purchasing additional credits.</p>\
                     {upgrade}{buy}",
                    greeting = greeting(name),
                    para = PARA,
                    remaining = encode_text(remaining),
                    plan = encode_text(plan),
                    upgrade = button(&format!("{SITE}/pricing"), "Upgrade Plan"),
                    buy = button(&format!("{SITE}/dashboard/billing"), "Buy Credits"),
                ),
            ),
            text: format!(
                "Low Credits Alert - OmniCortex\n\n\
                 Hi {name},\n\n\
                 You have {remaining} credits remaining on your {plan} Plan.\n\
                 To avoid service interruption, consider upgrading your plan or purchasing additional credits.\n\n\
                 Upgrade Plan: {SITE}/pricing\n\
                 Buy Credits: {SITE}/dashboard/billing\n\n\
                 {COPYRIGHT}\n"
            ),
        },
    }
}

const PARA: &str = r#"<p style="color: #a0a0a0; font-size: 16px; line-height: 1.6; margin: 0 0 24px 0;">"#;

fn greeting(name: &str) -> String {
    format!(
        r#"<p style="color: #ffffff; font-size: 16px; margin: 0 0 16px 0;">Hi {},</p>"#,
        encode_text(name)
    )
}

fn button(href: &str, label: &str) -> String {
    format!(
        r#"<a href="{}" style="display: inline-block; background: #00b4d8; color: #ffffff; text-decoration: none; padding: 12px 24px; border-radius: 8px; font-size: 14px; margin-right: 8px;">{}</a>"#,
        encode_double_quoted_attribute(href),
        encode_text(label)
    )
}

fn layout(title: &str, accent: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
</head>
<body style="margin: 0; padding: 0; background-color: #0a0a1a; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif;">
  <table role="presentation" width="100%" cellspacing="0" cellpadding="0" style="max-width: 600px; margin: 0 auto; padding: 40px 20px;">
    <tr><td align="center"><h1 style="color: #ffffff; font-size: 24px; margin: 0 0 32px 0;">{title}</h1></td></tr>
    <tr><td style="border: 1px solid {accent}; border-radius: 16px; padding: 32px;">{body}</td></tr>
    <tr><td align="center" style="padding-top: 24px;"><p style="color: #444444; font-size: 12px; margin: 0;">{COPYRIGHT}</p></td></tr>
  </table>
</body>
</html>
"#,
        title = encode_text(title),
    )
}

/// Delivery transport for rendered e-mails
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver `template` to `to`. `from` falls back to the sender's default.
    async fn send(&self, to: &EmailRecipient, template: &EmailTemplate, from: Option<&str>) -> Result<()>;
}

/// Writes e-mails to the log instead of delivering them
pub struct LogEmailSender {
    from: String,
}

impl LogEmailSender {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }

    /// Reads `EMAIL_FROM`, falling back to the default address
    pub fn from_env() -> Self {
        Self::new(std::env::var("EMAIL_FROM").unwrap_or_else(|_| DEFAULT_FROM.to_string()))
    }
}

impl Default for LogEmailSender {
    fn default() -> Self {
        Self::new(DEFAULT_FROM)
    }
}

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &EmailRecipient, template: &EmailTemplate, from: Option<&str>) -> Result<()> {
        tracing::info!(
            from = from.unwrap_or(&self.from),
            to = %to.email,
            name = to.name.as_deref().unwrap_or("No name"),
            subject = %template.subject,
            "Email sent"
        );
        Ok(())
    }
}

/// One delivered e-mail, as seen by `RecordingEmailSender`
#[derive(Clone, Debug)]
pub struct SentEmail {
    pub from: String,
    pub to: EmailRecipient,
    pub template: EmailTemplate,
}

/// Keeps every e-mail in memory (tests and local development)
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, to: &EmailRecipient, template: &EmailTemplate, from: Option<&str>) -> Result<()> {
        self.sent.lock().await.push(SentEmail {
            from: from.unwrap_or(DEFAULT_FROM).to_string(),
            to: to.clone(),
            template: template.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn welcome() -> EmailMessage {
        EmailMessage::Welcome {
            name: "John".into(),
            plan: "Pro".into(),
            credits: "500,000".into(),
        }
    }

    #[test]
    fn test_welcome_template() {
        let template = render(&welcome());
        assert!(template.subject.contains("Welcome to OmniCortex AI Labs, John"));
        assert!(template.html.contains("Pro Plan"));
        assert!(template.html.contains("500,000"));
        assert!(template.text.contains("500,000 API credits per month"));
        assert!(template.text.contains("https://omnicortex.ai/dashboard"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        assert_eq!(render(&welcome()), render(&welcome()));
    }

    #[test]
    fn test_payment_confirmation_template() {
        let template = render(&EmailMessage::PaymentConfirmation {
            name: "Jane".into(),
            amount: "$49.00".into(),
            plan: "Pro".into(),
            invoice_url: "https://invoice.stripe.com/i/abc?x=1&y=2".into(),
        });
        assert_eq!(template.subject, "✅ Payment Confirmed - OmniCortex Pro");
        assert!(template.html.contains("$49.00"));
        assert!(template.html.contains("href=\"https://invoice.stripe.com/i/abc?x=1&amp;y=2\""));
        assert!(template.text.contains("View Invoice: https://invoice.stripe.com/i/abc?x=1&y=2"));
    }

    #[test]
    fn test_remaining_templates() {
        let renewal = render(&EmailMessage::RenewalReminder {
            name: "Bob".into(),
            plan: "Business".into(),
            renewal_date: "January 15, 2026".into(),
            amount: "$199.00".into(),
        });
        assert!(renewal.subject.contains("Renewal Reminder"));
        assert!(renewal.text.contains("will renew on January 15, 2026"));

        let cancel = render(&EmailMessage::CancellationConfirmation {
            name: "Alice".into(),
            plan: "Enterprise".into(),
            end_date: "February 28, 2026".into(),
        });
        assert!(cancel.subject.contains("Cancelled"));
        assert!(cancel.html.contains("February 28, 2026"));

        let low = render(&EmailMessage::CreditsLow {
            name: "Charlie".into(),
            remaining: "5,000".into(),
            plan: "Starter".into(),
        });
        assert!(low.subject.contains("Low Credits"));
        assert!(low.text.contains("You have 5,000 credits remaining on your Starter Plan"));
    }

    #[test]
    fn test_html_values_are_escaped() {
        let template = render(&EmailMessage::Welcome {
            name: "<script>alert(1)</script>".into(),
            plan: "Pro".into(),
            credits: "1".into(),
        });
        assert!(!template.html.contains("<script>"));
        assert!(template.html.contains("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn test_recording_sender() {
        let sender = RecordingEmailSender::new();
        let to = EmailRecipient {
            email: "test@example.com".into(),
            name: Some("Test".into()),
        };
        sender.send(&to, &render(&welcome()), None).await.unwrap();

        let sent = sender.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, DEFAULT_FROM);
        assert_eq!(sent[0].to.email, "test@example.com");
    }

    #[tokio::test]
    async fn test_log_sender_succeeds() {
        let sender = LogEmailSender::default();
        let to = EmailRecipient {
            email: "test@example.com".into(),
            name: None,
        };
        assert!(sender.send(&to, &render(&welcome()), Some("ops@omnicortex.ai")).await.is_ok());
    }
}
