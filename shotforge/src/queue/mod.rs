//! Durable job queue: job model, typed payloads, stores and producer handles.

pub mod handle;
pub mod job;
pub mod memory;
pub mod payload;
pub mod purge;
pub mod schedule;
pub mod sqlite;
pub mod store;

pub use handle::{QueueHandle, Queues};
pub use job::{
    BackoffPolicy, EnqueueOptions, Job, JobCounts, JobFailure, JobId, JobOptions, JobState,
    JobStatus, JobStatusReport, Lease, NackOutcome, NewJob, Retention,
};
pub use memory::MemoryJobStore;
pub use payload::{
    CleanupJob, DiscordJob, EmailJob, ImageGenerationJob, JobPayload, OutputFormat, QueueName,
    RenewalJob, StylePreset, StyleSelection,
};
pub use purge::{JobPurgeService, PurgeConfig};
pub use schedule::{CronPattern, RecurringSchedule, RecurringSpec};
pub use sqlite::SqliteJobStore;
pub use store::JobStore;
