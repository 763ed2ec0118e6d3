#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use shotforge::config::AppConfig;
use shotforge::database::{DbPool, WritePool, init_pool, init_write_pool, run_migrations};
use shotforge::notification::{DiscordChannel, EmailMessage, EmailSender, Embed, WebhookSender};
use shotforge::queue::{JobStatus, JobStatusReport, QueueHandle};
use shotforge::services::container::Collaborators;
use shotforge::services::{ImageGenerator, ImageRequest, ObjectStorage, PromptGenerator};
use shotforge::utils::clock::{Clock, SystemClock};
use shotforge::{Error, Result};

pub struct TestDb {
    // Dropping the directory deletes the database file.
    pub dir: TempDir,
    pub url: String,
    pub pool: DbPool,
    pub write_pool: WritePool,
}

pub async fn setup_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("shotforge.db").display());
    let pool = init_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let write_pool = init_write_pool(&url).await.unwrap();
    TestDb {
        dir,
        url,
        pool,
        write_pool,
    }
}

/// Config with every required key set and fast polling.
pub fn test_config(database_url: &str) -> AppConfig {
    let pairs: HashMap<&str, String> = [
        ("DATABASE_URL", database_url.to_string()),
        ("STORAGE_BASE_URL", "https://bucket.test".to_string()),
        ("PROMPT_API_KEY", "sk-test".to_string()),
        ("IMAGE_API_URL", "https://images.test/v1/generate".to_string()),
        ("EMAIL_API_KEY", "re-test".to_string()),
        ("WORKER_POLL_INTERVAL_MS", "20".to_string()),
        ("SHUTDOWN_GRACE_SECS", "5".to_string()),
        ("SCHEDULER_TICK_SECS", "1".to_string()),
    ]
    .into_iter()
    .collect();
    AppConfig::from_lookup(|key| pairs.get(key).cloned()).unwrap()
}

pub async fn seed_user(pool: &DbPool, id: &str, email: &str, credits: i64) {
    sqlx::query("INSERT INTO users (id, email, name, credits, created_at) VALUES (?, ?, ?, ?, 0)")
        .bind(id)
        .bind(email)
        .bind(format!("User {}", id))
        .bind(credits)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_campaign(pool: &DbPool, id: &str, user_id: &str, title: &str) {
    sqlx::query(
        "INSERT INTO campaigns (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, 0, 0)",
    )
    .bind(id)
    .bind(user_id)
    .bind(title)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_upload(
    pool: &DbPool,
    id: &str,
    user_id: &str,
    storage_key: &str,
    campaign_id: Option<&str>,
    created_at: DateTime<Utc>,
) {
    sqlx::query(
        "INSERT INTO product_uploads (id, user_id, storage_key, campaign_id, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(user_id)
    .bind(storage_key)
    .bind(campaign_id)
    .bind(created_at.timestamp_millis())
    .execute(pool)
    .await
    .unwrap();
}

pub async fn seed_subscription(pool: &DbPool, id: &str, user_id: &str, plan: &str, status: &str) {
    sqlx::query(
        "INSERT INTO subscriptions (id, user_id, plan, status, created_at) VALUES (?, ?, ?, ?, 0)",
    )
    .bind(id)
    .bind(user_id)
    .bind(plan)
    .bind(status)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn user_credits(pool: &DbPool, user_id: &str) -> i64 {
    let (credits,): (i64,) = sqlx::query_as("SELECT credits FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap();
    credits
}

/// Poll until the job is completed or failed.
pub async fn wait_for_terminal(handle: &QueueHandle, job_id: &str) -> JobStatusReport {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let report = handle.get_job_status(job_id).await.unwrap();
        if matches!(report.status, JobStatus::Completed | JobStatus::Failed) {
            return report;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} still {:?}",
            job_id,
            report.status
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub objects: Mutex<HashMap<String, Bytes>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_delete: Mutex<HashSet<String>>,
}

impl FakeStorage {
    pub fn with_object(self, key: &str, body: &'static [u8]) -> Self {
        self.objects
            .lock()
            .insert(key.to_string(), Bytes::from_static(body));
        self
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.fail_delete.lock().insert(key.to_string());
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn get(&self, key: &str) -> Result<Bytes> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::permanent(format!("object {} does not exist", key)))
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<String> {
        self.objects.lock().insert(key.to_string(), body);
        Ok(format!("https://bucket.test/{}", key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_delete.lock().contains(key) {
            return Err(Error::remote("storage", "503 Service Unavailable"));
        }
        self.objects.lock().remove(key);
        self.deleted.lock().push(key.to_string());
        Ok(())
    }
}

pub struct FakePrompts {
    pub calls: AtomicUsize,
}

impl FakePrompts {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PromptGenerator for FakePrompts {
    async fn generate_prompt(&self, instruction: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(instruction.contains("exact shape"));
        Ok("A ceramic mug on a marble counter, soft window light".to_string())
    }
}

/// Fails every call from the `fail_from`-th (1-based) on.
pub struct FakeImages {
    pub calls: AtomicUsize,
    pub fail_from: Option<usize>,
}

impl FakeImages {
    pub fn working() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_from: None,
        }
    }

    pub fn failing_from(call: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_from: Some(call),
        }
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn generate_image(&self, request: &ImageRequest) -> Result<Bytes> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_from.is_some_and(|n| call >= n) {
            return Err(Error::remote("image", "model overloaded"));
        }
        assert_eq!(request.reference, Bytes::from_static(b"product-photo"));
        Ok(Bytes::from(format!("png-{}", call)))
    }
}

/// Email sender that fails its first `failures` sends.
pub struct FlakyEmail {
    failures: AtomicU32,
    pub sent: Mutex<Vec<EmailMessage>>,
}

impl FlakyEmail {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EmailSender for FlakyEmail {
    fn is_configured(&self) -> bool {
        true
    }

    async fn send_email(&self, message: &EmailMessage) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::remote("email", "502 Bad Gateway"));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingWebhook {
    pub configured: HashSet<DiscordChannel>,
    pub sent: Mutex<Vec<(DiscordChannel, Embed)>>,
}

#[async_trait]
impl WebhookSender for RecordingWebhook {
    fn is_configured(&self, channel: DiscordChannel) -> bool {
        self.configured.contains(&channel)
    }

    async fn send_webhook_message(&self, channel: DiscordChannel, embed: &Embed) -> Result<()> {
        self.sent.lock().push((channel, embed.clone()));
        Ok(())
    }
}

pub fn collaborators(
    storage: Arc<FakeStorage>,
    images: Arc<FakeImages>,
    email: Arc<FlakyEmail>,
) -> Collaborators {
    Collaborators {
        storage,
        prompts: Arc::new(FakePrompts::new()),
        images,
        email,
        discord: Arc::new(RecordingWebhook::default()),
        clock: Arc::new(SystemClock) as Arc<dyn Clock>,
    }
}
