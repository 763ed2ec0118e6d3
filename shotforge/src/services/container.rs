//! Service container for dependency injection.
//!
//! Everything the job subsystem needs is built here once, from [`AppConfig`],
//! and handed to the components that use it. Nothing is reachable through globals.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::config::AppConfig;
use crate::database::{self, DbPool, WritePool};
use crate::database::repositories::{
    CampaignRepository, SqlxCampaignRepository, SqlxSubscriptionRepository, SqlxUploadRepository,
    SubscriptionRepository, UploadRepository,
};
use crate::notification::{
    DiscordWebhookSender, EmailSender, EmailTemplates, HttpEmailSender, WebhookSender,
};
use crate::processors::{
    CleanupProcessor, DiscordProcessor, EmailProcessor, ImageGenerationProcessor,
    SubscriptionRenewalProcessor,
};
use crate::queue::{JobPurgeService, JobStore, QueueName, Queues, SqliteJobStore};
use crate::scheduler::Scheduler;
use crate::services::{
    HttpImageGenerator, HttpObjectStorage, ImageGenerator, ObjectStorage, OpenAiPromptGenerator,
    PromptGenerator,
};
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::http_client::create_client;
use crate::worker::{Processor, Worker};

/// Remote collaborators, replaceable in tests.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn ObjectStorage>,
    pub prompts: Arc<dyn PromptGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub email: Arc<dyn EmailSender>,
    pub discord: Arc<dyn WebhookSender>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// HTTP adapters configured from `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let client = create_client(config.http_timeout);
        Self {
            storage: Arc::new(HttpObjectStorage::new(
                client.clone(),
                &config.storage.base_url,
                config.storage.token.clone(),
            )),
            prompts: Arc::new(OpenAiPromptGenerator::new(
                client.clone(),
                &config.prompt.api_url,
                &config.prompt.api_key,
                &config.prompt.model,
            )),
            images: Arc::new(HttpImageGenerator::new(
                client.clone(),
                &config.image.api_url,
                config.image.api_key.clone(),
            )),
            email: Arc::new(HttpEmailSender::new(
                client.clone(),
                &config.email.api_url,
                config.email.api_key.clone(),
                &config.email.from,
            )),
            discord: Arc::new(DiscordWebhookSender::new(
                client,
                config.discord_webhooks.clone(),
            )),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Service container holding all job-subsystem services.
pub struct ServiceContainer {
    pub config: AppConfig,
    /// Read pool.
    pub pool: DbPool,
    /// Single-connection pool for store transactions and repository writes.
    pub write_pool: WritePool,
    pub store: Arc<dyn JobStore>,
    /// Producer handles, one per queue.
    pub queues: Queues,
    pub workers: Vec<Arc<Worker>>,
    pub scheduler: Arc<Scheduler>,
    pub purge: Arc<JobPurgeService>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Open the database, run migrations and wire the HTTP collaborators.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let pool = database::init_pool(&config.database_url).await?;
        let write_pool = database::init_write_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;

        let collaborators = Collaborators::from_config(&config);
        Ok(Self::with_collaborators(config, pool, write_pool, collaborators))
    }

    /// Wire the container over existing pools (migrations already applied).
    pub fn with_collaborators(
        config: AppConfig,
        pool: SqlitePool,
        write_pool: SqlitePool,
        collaborators: Collaborators,
    ) -> Self {
        info!("Initializing service container");

        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(pool.clone(), write_pool.clone()));
        let queues = Queues::new(store.clone());

        let campaigns: Arc<dyn CampaignRepository> =
            Arc::new(SqlxCampaignRepository::new(pool.clone(), write_pool.clone()));
        let uploads: Arc<dyn UploadRepository> =
            Arc::new(SqlxUploadRepository::new(pool.clone(), write_pool.clone()));
        let subscriptions: Arc<dyn SubscriptionRepository> =
            Arc::new(SqlxSubscriptionRepository::new(pool.clone(), write_pool.clone()));

        let processors: Vec<Arc<dyn Processor>> = vec![
            Arc::new(ImageGenerationProcessor::new(
                campaigns,
                collaborators.storage.clone(),
                collaborators.prompts.clone(),
                collaborators.images.clone(),
            )),
            Arc::new(CleanupProcessor::new(
                uploads,
                collaborators.storage.clone(),
                collaborators.clock.clone(),
            )),
            Arc::new(EmailProcessor::new(
                collaborators.email.clone(),
                EmailTemplates::new(&config.email.app_url),
            )),
            Arc::new(DiscordProcessor::new(
                collaborators.discord.clone(),
                collaborators.clock.clone(),
            )),
            Arc::new(
                SubscriptionRenewalProcessor::new(subscriptions, collaborators.clock.clone())
                    .with_email(queues.get(QueueName::Email).clone()),
            ),
        ];

        let workers = processors
            .into_iter()
            .map(|processor| {
                let queue = processor.queue();
                Arc::new(Worker::new(
                    queues.get(queue).clone(),
                    processor,
                    config.worker(queue),
                ))
            })
            .collect();

        let scheduler = Arc::new(
            Scheduler::new(queues.clone(), &config.scheduler).with_clock(collaborators.clock),
        );
        let purge = Arc::new(JobPurgeService::new(config.purge.clone(), store.clone()));

        info!("Service container initialized");

        Self {
            config,
            pool,
            write_pool,
            store,
            queues,
            workers,
            scheduler,
            purge,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn worker(&self, queue: QueueName) -> Option<&Arc<Worker>> {
        self.workers.iter().find(|w| w.queue() == queue)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
