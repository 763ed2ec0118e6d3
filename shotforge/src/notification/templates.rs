//! Message templates for every email and Discord job kind.

use chrono::{DateTime, Utc};

use super::discord::{DiscordChannel, Embed, EmbedField};
use super::email::EmailMessage;
use crate::queue::payload::{DiscordJob, EmailJob};

const BRAND: &str = "ShotForge";

const COLOR_GREEN: u32 = 0x2ecc71;
const COLOR_BLUE: u32 = 0x3498db;
const COLOR_ORANGE: u32 = 0xf39c12;
const COLOR_RED: u32 = 0xe74c3c;
const COLOR_PURPLE: u32 = 0x9b59b6;

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

/// Renders transactional emails.
#[derive(Debug, Clone)]
pub struct EmailTemplates {
    app_url: String,
}

impl EmailTemplates {
    pub fn new(app_url: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn render(&self, job: &EmailJob) -> EmailMessage {
        let greeting = match job.recipient_name() {
            Some(name) if !name.trim().is_empty() => format!("Hi {},", name.trim()),
            _ => "Hi there,".to_string(),
        };

        let (subject, paragraphs, cta): (String, Vec<String>, Option<(String, String)>) = match job
        {
            EmailJob::Welcome { .. } => (
                format!("Welcome to {}", BRAND),
                vec![
                    format!(
                        "Thanks for joining {}. Upload a product photo and we will turn it into studio-quality campaign shots in minutes.",
                        BRAND
                    ),
                    "Your first campaign is a good place to start.".to_string(),
                ],
                Some((
                    "Create a campaign".to_string(),
                    format!("{}/campaigns/new", self.app_url),
                )),
            ),
            EmailJob::SubscriptionConfirmation { plan, credits, .. } => (
                format!("Your {} plan is active", plan.display_name()),
                vec![
                    format!(
                        "Your {} subscription is confirmed. {} credits have been added to your account.",
                        plan.display_name(),
                        credits
                    ),
                    "Credits are topped up automatically on the first day of every month.".to_string(),
                ],
                Some(("Open dashboard".to_string(), format!("{}/dashboard", self.app_url))),
            ),
            EmailJob::CreditTopup {
                credits, balance, ..
            } => (
                format!("{} credits added to your account", credits),
                vec![
                    format!("We just added {} credits to your account.", credits),
                    format!("Your balance is now {} credits.", balance),
                ],
                Some(("Start generating".to_string(), format!("{}/campaigns/new", self.app_url))),
            ),
            EmailJob::PaymentFailure {
                plan,
                amount_cents,
                retry_url,
                ..
            } => {
                let amount = amount_cents
                    .map(|c| format!(" of ${}", format_cents(c)))
                    .unwrap_or_default();
                (
                    "Action needed: your payment failed".to_string(),
                    vec![
                        format!(
                            "We could not process your payment{} for the {} plan.",
                            amount,
                            plan.display_name()
                        ),
                        "Please update your payment method to keep your subscription active.".to_string(),
                    ],
                    Some((
                        "Update payment method".to_string(),
                        retry_url
                            .clone()
                            .unwrap_or_else(|| format!("{}/billing", self.app_url)),
                    )),
                )
            }
            EmailJob::SubscriptionSuspended { plan, .. } => (
                format!("Your {} subscription is suspended", plan.display_name()),
                vec![
                    format!(
                        "Your {} subscription has been suspended after repeated payment failures.",
                        plan.display_name()
                    ),
                    "Your campaigns are safe. Reactivate any time to keep generating.".to_string(),
                ],
                Some(("Reactivate".to_string(), format!("{}/billing", self.app_url))),
            ),
        };

        let mut text = format!("{}\n\n{}\n", greeting, paragraphs.join("\n\n"));
        let mut html = format!("<p>{}</p>", escape_html(&greeting));
        for p in &paragraphs {
            html.push_str(&format!("<p>{}</p>", escape_html(p)));
        }
        if let Some((label, url)) = &cta {
            text.push_str(&format!("\n{}: {}\n", label, url));
            html.push_str(&format!(
                r#"<p><a href="{}" style="background:#111;color:#fff;padding:10px 18px;border-radius:6px;text-decoration:none">{}</a></p>"#,
                escape_html(url),
                escape_html(label)
            ));
        }
        text.push_str(&format!("\nThe {} team\n", BRAND));
        html.push_str(&format!("<p>The {} team</p>", BRAND));

        EmailMessage {
            to: job.recipient().to_string(),
            subject,
            html: format!(
                r#"<!DOCTYPE html><html><body style="font-family:Arial,sans-serif;line-height:1.5">{}</body></html>"#,
                html
            ),
            text,
            template: job.kind().to_string(),
        }
    }
}

/// Channel and embed for a Discord job.
pub fn discord_message(job: &DiscordJob, now: DateTime<Utc>) -> (DiscordChannel, Embed) {
    let (channel, title, description, color, fields) = match job {
        DiscordJob::NewUser {
            user_id,
            email,
            name,
        } => (
            DiscordChannel::Signups,
            "New signup".to_string(),
            format!("{} just created an account", name.as_deref().unwrap_or(email)),
            COLOR_GREEN,
            vec![
                EmbedField::inline("Email", email.as_str()),
                EmbedField::inline("User", user_id.as_str()),
            ],
        ),
        DiscordJob::SubscriptionCreated {
            user_id,
            email,
            plan,
        } => (
            DiscordChannel::Payments,
            "New subscription".to_string(),
            format!("{} subscribed to {}", email, plan.display_name()),
            COLOR_GREEN,
            vec![
                EmbedField::inline("Plan", plan.display_name()),
                EmbedField::inline("User", user_id.as_str()),
            ],
        ),
        DiscordJob::PaymentSuccess {
            user_id,
            email,
            plan,
            amount_cents,
            currency,
        } => (
            DiscordChannel::Payments,
            "Payment received".to_string(),
            format!(
                "{} paid {} {}",
                email,
                format_cents(*amount_cents),
                currency.to_uppercase()
            ),
            COLOR_BLUE,
            vec![
                EmbedField::inline("Plan", plan.display_name()),
                EmbedField::inline("User", user_id.as_str()),
            ],
        ),
        DiscordJob::PaymentFailure {
            user_id,
            email,
            plan,
            amount_cents,
            reason,
        } => {
            let mut fields = vec![
                EmbedField::inline("Plan", plan.display_name()),
                EmbedField::inline("User", user_id.as_str()),
            ];
            if let Some(cents) = amount_cents {
                fields.push(EmbedField::inline("Amount", format_cents(*cents)));
            }
            if let Some(reason) = reason {
                fields.push(EmbedField::new("Reason", reason.as_str()));
            }
            (
                DiscordChannel::Payments,
                "Payment failed".to_string(),
                format!("Payment from {} failed", email),
                COLOR_ORANGE,
                fields,
            )
        }
        DiscordJob::SubscriptionSuspended {
            user_id,
            email,
            plan,
        } => (
            DiscordChannel::Payments,
            "Subscription suspended".to_string(),
            format!("{} ({}) was suspended", email, plan.display_name()),
            COLOR_RED,
            vec![EmbedField::inline("User", user_id.as_str())],
        ),
        DiscordJob::SubscriptionActivated {
            user_id,
            email,
            plan,
        } => (
            DiscordChannel::Payments,
            "Subscription reactivated".to_string(),
            format!("{} is back on {}", email, plan.display_name()),
            COLOR_GREEN,
            vec![EmbedField::inline("User", user_id.as_str())],
        ),
        DiscordJob::CreditTopup {
            user_id,
            email,
            credits,
        } => (
            DiscordChannel::Payments,
            "Credit top-up".to_string(),
            format!("{} bought {} credits", email, credits),
            COLOR_BLUE,
            vec![EmbedField::inline("User", user_id.as_str())],
        ),
        DiscordJob::CampaignFeedback {
            user_id,
            campaign_id,
            rating,
            comment,
        } => {
            let stars: String = "★".repeat(*rating as usize) + &"☆".repeat(5 - (*rating as usize).min(5));
            let mut fields = vec![
                EmbedField::inline("Rating", stars),
                EmbedField::inline("Campaign", campaign_id.as_str()),
                EmbedField::inline("User", user_id.as_str()),
            ];
            if let Some(comment) = comment.as_deref().filter(|c| !c.trim().is_empty()) {
                fields.push(EmbedField::new("Comment", comment));
            }
            (
                DiscordChannel::Feedback,
                "Campaign feedback".to_string(),
                format!("New {}-star rating", rating),
                COLOR_PURPLE,
                fields,
            )
        }
    };

    (
        channel,
        Embed {
            title,
            description,
            color,
            fields,
            timestamp: now,
        },
    )
}
