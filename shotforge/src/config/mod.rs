//! Process configuration read from the environment (and `.env`).

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::notification::DiscordChannel;
use crate::queue::{PurgeConfig, QueueName};
use crate::scheduler::SchedulerConfig;
use crate::worker::WorkerConfig;
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:shotforge.db?mode=rwc";
pub const DEFAULT_PROMPT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_PROMPT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com/emails";
pub const DEFAULT_EMAIL_FROM: &str = "ShotForge <hello@shotforge.io>";
pub const DEFAULT_APP_URL: &str = "https://app.shotforge.io";

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub base_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptApiConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageApiConfig {
    pub api_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailConfig {
    pub api_url: String,
    /// None means email is not configured and email jobs are skipped.
    pub api_key: Option<String>,
    pub from: String,
    /// Base URL for links in email bodies.
    pub app_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: String,
    pub log_json: bool,
    pub shutdown_grace: Duration,
    pub http_timeout: Duration,
    pub workers: HashMap<QueueName, WorkerConfig>,
    pub scheduler: SchedulerConfig,
    pub purge: PurgeConfig,
    pub storage: StorageConfig,
    pub prompt: PromptApiConfig,
    pub image: ImageApiConfig,
    pub email: EmailConfig,
    pub discord_webhooks: HashMap<DiscordChannel, String>,
}

/// Environment variable prefix for per-queue worker settings, e.g. `IMAGE_GENERATION`.
pub fn queue_env_prefix(queue: QueueName) -> String {
    queue.as_str().replace('-', "_").to_uppercase()
}

struct Lookup<F> {
    lookup: F,
}

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; empty counts as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn require(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| Error::config(format!("{} must be set", key)))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::config(format!("{}='{}' is invalid: {}", key, raw, e))),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(Error::config(format!(
                "{}='{}' is not a boolean",
                key, other
            ))),
        }
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup { lookup };

        let shutdown_grace_secs: u64 = env.parse("SHUTDOWN_GRACE_SECS", 30)?;
        let poll_interval_ms: u64 = env.parse("WORKER_POLL_INTERVAL_MS", 500)?;

        let mut workers = HashMap::new();
        for queue in QueueName::ALL {
            let prefix = queue_env_prefix(queue);
            let defaults = WorkerConfig::for_queue(queue);
            let config = defaults
                .clone()
                .with_concurrency(env.parse(&format!("{}_CONCURRENCY", prefix), defaults.concurrency)?)
                .with_lease_duration_secs(
                    env.parse(&format!("{}_LEASE_SECS", prefix), defaults.lease_duration_secs)?,
                )
                .with_job_timeout_secs(
                    env.parse(&format!("{}_JOB_TIMEOUT_SECS", prefix), defaults.job_timeout_secs)?,
                )
                .with_poll_interval_ms(poll_interval_ms)
                .with_shutdown_grace_secs(shutdown_grace_secs);
            if config.concurrency == 0 {
                return Err(Error::config(format!("{}_CONCURRENCY must be at least 1", prefix)));
            }
            workers.insert(queue, config);
        }

        let scheduler_defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig {
            cleanup_cron: env.string("CLEANUP_CRON", &scheduler_defaults.cleanup_cron),
            cleanup_hours_old: env.parse("CLEANUP_HOURS_OLD", scheduler_defaults.cleanup_hours_old)?,
            renewal_cron: env.string("RENEWAL_CRON", &scheduler_defaults.renewal_cron),
            tick_interval: Duration::from_secs(
                env.parse("SCHEDULER_TICK_SECS", scheduler_defaults.tick_interval.as_secs())?,
            ),
        };

        let purge = PurgeConfig::new()
            .with_retention_days(env.parse("JOB_RETENTION_DAYS", 14)?)
            .with_time_window(env.get("JOB_PURGE_WINDOW"));

        let discord_webhooks = [
            (DiscordChannel::Signups, "DISCORD_WEBHOOK_SIGNUPS"),
            (DiscordChannel::Payments, "DISCORD_WEBHOOK_PAYMENTS"),
            (DiscordChannel::Feedback, "DISCORD_WEBHOOK_FEEDBACK"),
        ]
        .into_iter()
        .filter_map(|(channel, key)| env.get(key).map(|url| (channel, url)))
        .collect();

        Ok(Self {
            database_url: env.string("DATABASE_URL", DEFAULT_DATABASE_URL),
            log_dir: env.string("LOG_DIR", "logs"),
            log_json: env.flag("LOG_JSON", false)?,
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
            http_timeout: Duration::from_secs(env.parse("HTTP_TIMEOUT_SECS", 60)?),
            workers,
            scheduler,
            purge,
            storage: StorageConfig {
                base_url: env.require("STORAGE_BASE_URL")?,
                token: env.get("STORAGE_TOKEN"),
            },
            prompt: PromptApiConfig {
                api_url: env.string("PROMPT_API_URL", DEFAULT_PROMPT_API_URL),
                api_key: env.require("PROMPT_API_KEY")?,
                model: env.string("PROMPT_MODEL", DEFAULT_PROMPT_MODEL),
            },
            image: ImageApiConfig {
                api_url: env.require("IMAGE_API_URL")?,
                api_key: env.get("IMAGE_API_KEY"),
            },
            email: EmailConfig {
                api_url: env.string("EMAIL_API_URL", DEFAULT_EMAIL_API_URL),
                api_key: env.get("EMAIL_API_KEY"),
                from: env.string("EMAIL_FROM", DEFAULT_EMAIL_FROM),
                app_url: env.string("APP_URL", DEFAULT_APP_URL),
            },
            discord_webhooks,
        })
    }

    pub fn worker(&self, queue: QueueName) -> WorkerConfig {
        self.workers
            .get(&queue)
            .cloned()
            .unwrap_or_else(|| WorkerConfig::for_queue(queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("STORAGE_BASE_URL", "https://bucket.example.com"),
        ("PROMPT_API_KEY", "sk-test"),
        ("IMAGE_API_URL", "https://img.example.com/v1/generate"),
    ];

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert!(!config.log_json);
        assert_eq!(config.worker(QueueName::ImageGeneration).concurrency, 2);
        assert_eq!(config.worker(QueueName::ImageGeneration).lease_duration_secs, 600);
        assert_eq!(config.worker(QueueName::Email).concurrency, 4);
        assert_eq!(config.worker(QueueName::Cleanup).lease_duration_secs, 120);
        assert_eq!(config.scheduler.cleanup_cron, "0 */2 * * *");
        assert_eq!(config.purge.retention_days, 14);
        assert!(config.email.api_key.is_none());
        assert!(config.discord_webhooks.is_empty());
    }

    #[test]
    fn test_overrides_and_blank_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("IMAGE_GENERATION_CONCURRENCY", "5"),
            ("SUBSCRIPTION_RENEWAL_LEASE_SECS", "300"),
            ("LOG_JSON", "true"),
            ("EMAIL_API_KEY", "  "),
            ("DISCORD_WEBHOOK_PAYMENTS", "https://discord.com/api/webhooks/1/a"),
            ("SHUTDOWN_GRACE_SECS", "5"),
        ]);
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.worker(QueueName::ImageGeneration).concurrency, 5);
        assert_eq!(
            config.worker(QueueName::SubscriptionRenewal).lease_duration_secs,
            300
        );
        assert_eq!(config.worker(QueueName::Email).shutdown_grace_secs, 5);
        assert!(config.log_json);
        assert!(config.email.api_key.is_none());
        assert_eq!(config.discord_webhooks.len(), 1);
        assert!(config.discord_webhooks.contains_key(&DiscordChannel::Payments));
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CLEANUP_HOURS_OLD", "soon"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("CLEANUP_HOURS_OLD"));

        let err = AppConfig::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(err.to_string().contains("STORAGE_BASE_URL"));
    }

    #[test]
    fn test_queue_env_prefix() {
        assert_eq!(queue_env_prefix(QueueName::DiscordNotifications), "DISCORD_NOTIFICATIONS");
        assert_eq!(queue_env_prefix(QueueName::Cleanup), "CLEANUP");
    }
}
