mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use shotforge::database::repositories::{SqlxUploadRepository, UploadRepository};
use shotforge::domain::UploadStatus;
use shotforge::processors::{CleanupProcessor, CleanupSummary};
use shotforge::queue::payload::{CleanupJob, JobPayload};
use shotforge::queue::{EnqueueOptions, JobStatus, QueueName};
use shotforge::services::ServiceContainer;
use shotforge::utils::clock::FixedClock;
use shotforge::worker::JobContext;

use common::{
    FakeImages, FakeStorage, FlakyEmail, TestDb, collaborators, seed_campaign, seed_upload,
    seed_user, setup_db, test_config, wait_for_terminal,
};

/// Five stale orphans, one fresh orphan and one stale upload linked to a campaign.
async fn seed(db: &TestDb, storage: &FakeStorage) {
    let now = Utc::now();
    seed_user(&db.pool, "u1", "ana@example.com", 0).await;
    seed_campaign(&db.pool, "c1", "u1", "Spring").await;
    for n in 1..=5 {
        let key = format!("uploads/u1/orphan-{}.png", n);
        storage.objects.lock().insert(key.clone(), bytes::Bytes::from_static(b"x"));
        seed_upload(
            &db.pool,
            &format!("up{}", n),
            "u1",
            &key,
            None,
            now - ChronoDuration::hours(30 + n),
        )
        .await;
    }
    seed_upload(&db.pool, "fresh", "u1", "uploads/u1/fresh.png", None, now - ChronoDuration::hours(1)).await;
    seed_upload(&db.pool, "linked", "u1", "uploads/u1/linked.png", Some("c1"), now - ChronoDuration::hours(48)).await;
}

#[tokio::test]
async fn failing_delete_is_reported_and_the_sweep_continues() {
    let db = setup_db().await;
    let storage = Arc::new(FakeStorage::default());
    seed(&db, &storage).await;
    storage.fail_delete_of("uploads/u1/orphan-3.png");

    let uploads = Arc::new(SqlxUploadRepository::new(db.pool.clone(), db.write_pool.clone()));
    let processor = CleanupProcessor::new(
        uploads.clone(),
        storage.clone(),
        Arc::new(FixedClock::new(Utc::now())),
    );

    let ctx = JobContext::detached(QueueName::Cleanup, JobPayload::CLEANUP_ORPHANED_UPLOADS);
    let summary = processor.sweep(&ctx, 24).await.unwrap();

    assert_eq!(summary.deleted_records, 4);
    assert_eq!(summary.deleted_keys.len(), 4);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("uploads/u1/orphan-3.png"));

    let failed = uploads.get_upload("up3").await.unwrap().unwrap();
    assert_eq!(failed.status, UploadStatus::Uploaded);
    for id in ["up1", "up2", "up4", "up5"] {
        let upload = uploads.get_upload(id).await.unwrap().unwrap();
        assert_eq!(upload.status, UploadStatus::Deleted, "{}", id);
    }
    for id in ["fresh", "linked"] {
        let upload = uploads.get_upload(id).await.unwrap().unwrap();
        assert_eq!(upload.status, UploadStatus::Uploaded, "{}", id);
    }

    // The failed one is picked up again by the next sweep.
    storage.fail_delete.lock().clear();
    let summary = processor.sweep(&ctx, 24).await.unwrap();
    assert_eq!(summary.deleted_records, 1);
    assert_eq!(summary.deleted_keys, vec!["uploads/u1/orphan-3.png".to_string()]);
    assert!(summary.errors.is_empty());
}

#[tokio::test]
async fn cleanup_job_runs_through_the_worker() {
    let db = setup_db().await;
    let storage = Arc::new(FakeStorage::default());
    seed(&db, &storage).await;

    let container = ServiceContainer::with_collaborators(
        test_config(&db.url),
        db.pool.clone(),
        db.write_pool.clone(),
        collaborators(
            storage.clone(),
            Arc::new(FakeImages::working()),
            Arc::new(FlakyEmail::new(0)),
        ),
    );
    let worker = container.worker(QueueName::Cleanup).unwrap().clone();
    worker.start().unwrap();

    let handle = container.queues.get(QueueName::Cleanup);
    let job_id = handle
        .enqueue(
            &JobPayload::CleanupOrphanedUploads(CleanupJob { hours_old: 24 }),
            EnqueueOptions::new(),
        )
        .await
        .unwrap();

    let report = wait_for_terminal(handle, &job_id).await;
    assert_eq!(report.status, JobStatus::Completed);
    let summary: CleanupSummary = serde_json::from_value(report.result.unwrap()).unwrap();
    assert_eq!(summary.deleted_records, 5);
    assert!(summary.errors.is_empty());
    assert_eq!(storage.deleted.lock().len(), 5);
    assert!(storage.keys_with_prefix("uploads/u1/orphan-").is_empty());

    worker.stop().await;
}
