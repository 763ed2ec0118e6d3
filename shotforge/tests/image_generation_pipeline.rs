mod common;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use shotforge::Result;
use shotforge::database::repositories::{CampaignRepository, SqlxCampaignRepository};
use shotforge::domain::CampaignStatus;
use shotforge::processors::ImageGenerationProcessor;
use shotforge::queue::payload::{
    ImageGenerationJob, JobPayload, OutputFormat, StylePreset, StyleSelection,
};
use shotforge::queue::{EnqueueOptions, JobStatus, JobStore, QueueName, Queues, SqliteJobStore};
use shotforge::services::{ImageGenerator, ImageRequest, ServiceContainer};
use shotforge::worker::{Worker, WorkerConfig};

use common::{
    FakeImages, FakePrompts, FakeStorage, FlakyEmail, TestDb, collaborators, seed_campaign,
    seed_user, setup_db, test_config, wait_for_terminal,
};

const PRODUCT_KEY: &str = "uploads/u1/mug.png";

fn generate(campaign_id: &str, user_id: &str) -> JobPayload {
    JobPayload::GenerateImages(ImageGenerationJob {
        campaign_id: campaign_id.to_string(),
        user_id: user_id.to_string(),
        product_image_key: PRODUCT_KEY.to_string(),
        title: "Stoneware mug".to_string(),
        description: "Hand-glazed, 350ml".to_string(),
        style: StyleSelection::Preset(StylePreset::Lifestyle),
        format: OutputFormat::Portrait,
    })
}

async fn container(db: &TestDb, storage: Arc<FakeStorage>, images: Arc<FakeImages>) -> ServiceContainer {
    seed_user(&db.pool, "u1", "ana@example.com", 0).await;
    seed_campaign(&db.pool, "c1", "u1", "Spring launch").await;
    ServiceContainer::with_collaborators(
        test_config(&db.url),
        db.pool.clone(),
        db.write_pool.clone(),
        collaborators(storage, images, Arc::new(FlakyEmail::new(0))),
    )
}

#[tokio::test]
async fn campaign_gets_three_generated_images() {
    let db = setup_db().await;
    let storage = Arc::new(FakeStorage::default().with_object(PRODUCT_KEY, b"product-photo"));
    let images = Arc::new(FakeImages::working());
    let container = container(&db, storage.clone(), images.clone()).await;
    let worker = container.worker(QueueName::ImageGeneration).unwrap().clone();
    worker.start().unwrap();

    let handle = container.queues.get(QueueName::ImageGeneration);
    let job_id = handle
        .enqueue(&generate("c1", "u1"), EnqueueOptions::new())
        .await
        .unwrap();

    let report = wait_for_terminal(handle, &job_id).await;
    assert_eq!(report.status, JobStatus::Completed, "{:?}", report.failed_reason);
    assert_eq!(report.progress, Some(100));
    assert_eq!(images.calls.load(Ordering::SeqCst), 3);

    let generated = storage.keys_with_prefix("generated/c1/");
    assert_eq!(generated.len(), 3);

    let campaigns = SqlxCampaignRepository::new(db.pool.clone(), db.write_pool.clone());
    let campaign = campaigns.get_campaign("c1").await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.generated_images.len(), 3);
    assert!(campaign.prompt.unwrap().contains("ceramic mug"));

    let result = report.result.unwrap();
    assert_eq!(result["campaign_id"], "c1");
    assert_eq!(result["images"].as_array().unwrap().len(), 3);

    worker.stop().await;
}

#[tokio::test]
async fn one_failed_candidate_fails_the_whole_campaign() {
    let db = setup_db().await;
    let storage = Arc::new(FakeStorage::default().with_object(PRODUCT_KEY, b"product-photo"));
    let images = Arc::new(FakeImages::failing_from(2));
    let container = container(&db, storage.clone(), images).await;
    let worker = container.worker(QueueName::ImageGeneration).unwrap().clone();
    worker.start().unwrap();

    let handle = container.queues.get(QueueName::ImageGeneration);
    let job_id = handle
        .enqueue(&generate("c1", "u1"), EnqueueOptions::new().with_attempts(1))
        .await
        .unwrap();

    let report = wait_for_terminal(handle, &job_id).await;
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.attempts_made, 1);
    assert!(report.failed_reason.unwrap().contains("model overloaded"));

    assert!(storage.keys_with_prefix("generated/").is_empty());
    let campaigns = SqlxCampaignRepository::new(db.pool.clone(), db.write_pool.clone());
    let campaign = campaigns.get_campaign("c1").await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);
    assert!(campaign.generated_images.is_empty());

    worker.stop().await;
}

#[tokio::test]
async fn missing_product_photo_is_not_retried() {
    let db = setup_db().await;
    let storage = Arc::new(FakeStorage::default());
    let container = container(&db, storage, Arc::new(FakeImages::working())).await;
    let worker = container.worker(QueueName::ImageGeneration).unwrap().clone();
    worker.start().unwrap();

    let handle = container.queues.get(QueueName::ImageGeneration);
    let job_id = handle
        .enqueue(&generate("c1", "u1"), EnqueueOptions::new())
        .await
        .unwrap();

    let report = wait_for_terminal(handle, &job_id).await;
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.attempts_made, 1);
    assert!(report.max_attempts > 1);

    worker.stop().await;
}

#[tokio::test]
async fn campaign_owned_by_someone_else_is_rejected() {
    let db = setup_db().await;
    let storage = Arc::new(FakeStorage::default().with_object(PRODUCT_KEY, b"product-photo"));
    let images = Arc::new(FakeImages::working());
    let container = container(&db, storage, images.clone()).await;
    let worker = container.worker(QueueName::ImageGeneration).unwrap().clone();
    worker.start().unwrap();

    let handle = container.queues.get(QueueName::ImageGeneration);
    let job_id = handle
        .enqueue(&generate("c1", "intruder"), EnqueueOptions::new())
        .await
        .unwrap();

    let report = wait_for_terminal(handle, &job_id).await;
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.attempts_made, 1);
    assert_eq!(images.calls.load(Ordering::SeqCst), 0);

    let campaigns = SqlxCampaignRepository::new(db.pool.clone(), db.write_pool.clone());
    let campaign = campaigns.get_campaign("c1").await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Pending);

    worker.stop().await;
}

/// Never answers within any reasonable job timeout.
struct StalledImages;

#[async_trait]
impl ImageGenerator for StalledImages {
    async fn generate_image(&self, _request: &ImageRequest) -> Result<Bytes> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Bytes::from_static(b"late"))
    }
}

fn image_worker(db: &TestDb, storage: Arc<FakeStorage>, images: Arc<dyn ImageGenerator>) -> (Queues, Worker) {
    let queues = Queues::new(Arc::new(SqliteJobStore::new(
        db.pool.clone(),
        db.write_pool.clone(),
    )));
    let processor = ImageGenerationProcessor::new(
        Arc::new(SqlxCampaignRepository::new(db.pool.clone(), db.write_pool.clone())),
        storage,
        Arc::new(FakePrompts::new()),
        images,
    );
    let worker = Worker::new(
        queues.get(QueueName::ImageGeneration).clone(),
        Arc::new(processor),
        WorkerConfig::for_queue(QueueName::ImageGeneration)
            .with_job_timeout_secs(1)
            .with_poll_interval_ms(10)
            .with_shutdown_grace_secs(1),
    );
    (queues, worker)
}

#[tokio::test]
async fn timed_out_last_attempt_fails_the_campaign() {
    let db = setup_db().await;
    seed_user(&db.pool, "u1", "ana@example.com", 0).await;
    seed_campaign(&db.pool, "c1", "u1", "Spring launch").await;
    let storage = Arc::new(FakeStorage::default().with_object(PRODUCT_KEY, b"product-photo"));
    let (queues, worker) = image_worker(&db, storage.clone(), Arc::new(StalledImages));
    worker.start().unwrap();

    let handle = queues.get(QueueName::ImageGeneration);
    let job_id = handle
        .enqueue(&generate("c1", "u1"), EnqueueOptions::new().with_attempts(1))
        .await
        .unwrap();

    let report = wait_for_terminal(handle, &job_id).await;
    assert_eq!(report.status, JobStatus::Failed);
    assert!(report.failed_reason.unwrap().contains("timed out"));

    let campaigns = SqlxCampaignRepository::new(db.pool.clone(), db.write_pool.clone());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let campaign = campaigns.get_campaign("c1").await.unwrap().unwrap();
        if campaign.status == CampaignStatus::Failed {
            assert!(campaign.generated_images.is_empty());
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "campaign left {:?}", campaign.status);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(storage.keys_with_prefix("generated/").is_empty());

    worker.stop().await;
}

#[tokio::test]
async fn campaign_of_a_crashed_worker_fails_once_its_lease_expires() {
    let db = setup_db().await;
    seed_user(&db.pool, "u1", "ana@example.com", 0).await;
    seed_campaign(&db.pool, "c1", "u1", "Spring launch").await;
    let storage = Arc::new(FakeStorage::default().with_object(PRODUCT_KEY, b"product-photo"));
    let (queues, worker) = image_worker(&db, storage, Arc::new(FakeImages::working()));

    let handle = queues.get(QueueName::ImageGeneration);
    let job_id = handle
        .enqueue(&generate("c1", "u1"), EnqueueOptions::new().with_attempts(1))
        .await
        .unwrap();

    // A worker that took the job, started the campaign and then died.
    queues
        .store()
        .lease(QueueName::ImageGeneration, "crashed", Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    let campaigns = SqlxCampaignRepository::new(db.pool.clone(), db.write_pool.clone());
    campaigns.mark_processing("c1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut events = worker.subscribe();
    worker.start().unwrap();

    let report = wait_for_terminal(handle, &job_id).await;
    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.attempts_made, 1);
    assert!(report.failed_reason.unwrap().contains("crashed"));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while campaigns.get_campaign("c1").await.unwrap().unwrap().status != CampaignStatus::Failed {
        assert!(tokio::time::Instant::now() < deadline, "campaign never failed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        shotforge::worker::WorkerEvent::DeadLettered { attempts: 1, .. }
    ));

    worker.stop().await;
}
