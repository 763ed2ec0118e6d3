//! Campaign image generation: prompt, reference fetch, three img2img candidates, upload, persist.
//!
//! The pipeline is all-or-nothing. A failing step returns the error and a retry
//! starts again from the prompt. The campaign is marked failed once no retry is
//! left, including when the last attempt timed out or its worker died. Objects
//! uploaded by a failed attempt are left for the orphan sweep.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::future::try_join_all;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::repositories::CampaignRepository;
use crate::domain::CampaignStatus;
use crate::queue::payload::{ImageGenerationJob, JobPayload, QueueName};
use crate::services::{ImageGenerator, ImageRequest, ObjectStorage, PromptGenerator};
use crate::worker::{JobContext, Processor};
use crate::{Error, Result};

/// Images generated per campaign.
pub const CANDIDATE_COUNT: usize = 3;

/// How closely the candidates follow the reference photo.
pub const IMAGE_STRENGTH: f32 = 0.35;

const GENERATED_CONTENT_TYPE: &str = "image/png";

/// Instruction sent to the prompt writer.
pub fn build_instruction(job: &ImageGenerationJob) -> String {
    let (width, height) = job.format.dimensions();
    let description = match job.description.trim() {
        "" => "(none provided)",
        text => text,
    };
    format!(
        "Write a single image-generation prompt for a commercial product photo.\n\
         Product: {title}\n\
         Description: {description}\n\
         Style: {style}\n\
         Format: {aspect} ({width}x{height})\n\n\
         Rules:\n\
         - The product must keep its exact shape, proportions, texture and color. Do not redesign it.\n\
         - Only vary the environment, lighting, props and background to match the style.\n\
         - Use the vocabulary of editorial commercial photography (lens, lighting setup, composition).\n\
         - Keep the prompt under 120 words and return only the prompt text.",
        title = job.title.trim(),
        description = description,
        style = job.style.describe(),
        aspect = job.format.aspect_label(),
        width = width,
        height = height,
    )
}

/// Storage key for candidate `index` (1-based).
pub fn candidate_key(campaign_id: &str, index: usize, timestamp_ms: i64) -> String {
    format!("generated/{}/{}-{}.png", campaign_id, index, timestamp_ms)
}

pub struct ImageGenerationProcessor {
    campaigns: Arc<dyn CampaignRepository>,
    storage: Arc<dyn ObjectStorage>,
    prompts: Arc<dyn PromptGenerator>,
    images: Arc<dyn ImageGenerator>,
}

impl ImageGenerationProcessor {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        storage: Arc<dyn ObjectStorage>,
        prompts: Arc<dyn PromptGenerator>,
        images: Arc<dyn ImageGenerator>,
    ) -> Self {
        Self {
            campaigns,
            storage,
            prompts,
            images,
        }
    }

    async fn run_pipeline(&self, ctx: &JobContext, job: &ImageGenerationJob) -> Result<Value> {
        let prompt = self
            .prompts
            .generate_prompt(&build_instruction(job))
            .await?
            .trim()
            .to_string();
        if prompt.is_empty() {
            return Err(Error::remote("prompt", "generator returned an empty prompt"));
        }
        ctx.progress.report(30).await;

        let reference = self.storage.get(&job.product_image_key).await?;
        ctx.progress.report(40).await;

        let request = ImageRequest {
            prompt: prompt.clone(),
            reference,
            format: job.format,
            strength: IMAGE_STRENGTH,
        };
        let candidates: Vec<Bytes> = try_join_all(
            (0..CANDIDATE_COUNT).map(|_| self.images.generate_image(&request)),
        )
        .await?;
        ctx.progress.report(80).await;

        let timestamp_ms = Utc::now().timestamp_millis();
        let uploads = candidates.into_iter().enumerate().map(|(i, image)| {
            let key = candidate_key(&job.campaign_id, i + 1, timestamp_ms);
            async move { self.storage.put(&key, image, GENERATED_CONTENT_TYPE).await }
        });
        let keys = try_join_all(uploads).await?;
        ctx.progress.report(95).await;

        self.campaigns
            .complete_campaign(&job.campaign_id, &keys, &prompt)
            .await?;
        ctx.progress.report(100).await;

        Ok(json!({
            "campaign_id": job.campaign_id,
            "images": keys,
            "prompt": prompt,
        }))
    }
}

#[async_trait]
impl Processor for ImageGenerationProcessor {
    fn name(&self) -> &'static str {
        "image_generation"
    }

    fn queue(&self) -> QueueName {
        QueueName::ImageGeneration
    }

    async fn process(&self, ctx: &JobContext, payload: JobPayload) -> Result<Option<Value>> {
        let JobPayload::GenerateImages(job) = payload else {
            return Err(Error::permanent(format!(
                "{} cannot run {} jobs",
                self.name(),
                payload.kind()
            )));
        };

        let campaign = self
            .campaigns
            .get_campaign(&job.campaign_id)
            .await?
            .ok_or_else(|| {
                Error::permanent(format!("campaign {} no longer exists", job.campaign_id))
            })?;
        if campaign.user_id != job.user_id {
            return Err(Error::permanent(format!(
                "campaign {} does not belong to user {}",
                job.campaign_id, job.user_id
            )));
        }

        self.campaigns.mark_processing(&job.campaign_id).await?;
        ctx.progress.report(10).await;

        match self.run_pipeline(ctx, &job).await {
            Ok(result) => {
                info!(
                    job_id = %ctx.job_id,
                    campaign_id = %job.campaign_id,
                    images = CANDIDATE_COUNT,
                    "Campaign images generated"
                );
                Ok(Some(result))
            }
            Err(e) => {
                if e.is_permanent() || ctx.is_last_attempt() {
                    if let Err(mark_err) = self.campaigns.mark_failed(&job.campaign_id).await {
                        warn!(
                            campaign_id = %job.campaign_id,
                            error = %mark_err,
                            "Failed to mark campaign as failed"
                        );
                    }
                }
                warn!(
                    job_id = %ctx.job_id,
                    campaign_id = %job.campaign_id,
                    attempt = ctx.attempt,
                    error = %e,
                    "Image generation failed"
                );
                Err(e)
            }
        }
    }

    async fn on_dead_letter(&self, ctx: &JobContext, payload: &JobPayload) -> Result<()> {
        let JobPayload::GenerateImages(job) = payload else {
            return Ok(());
        };
        let Some(campaign) = self.campaigns.get_campaign(&job.campaign_id).await? else {
            return Ok(());
        };
        // Only a campaign this job moved to processing, and that no run completed.
        if campaign.user_id != job.user_id || campaign.status != CampaignStatus::Processing {
            return Ok(());
        }
        self.campaigns.mark_failed(&job.campaign_id).await?;
        warn!(
            job_id = %ctx.job_id,
            campaign_id = %job.campaign_id,
            attempts = ctx.attempt,
            "Campaign marked failed after its job was dead-lettered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::payload::{OutputFormat, StylePreset, StyleSelection};

    fn job() -> ImageGenerationJob {
        ImageGenerationJob {
            campaign_id: "c1".to_string(),
            user_id: "u1".to_string(),
            product_image_key: "uploads/u1/mug.png".to_string(),
            title: "Ceramic mug".to_string(),
            description: String::new(),
            style: StyleSelection::Preset(StylePreset::Luxury),
            format: OutputFormat::Portrait,
        }
    }

    #[test]
    fn test_instruction_embeds_job_details() {
        let instruction = build_instruction(&job());
        assert!(instruction.contains("Ceramic mug"));
        assert!(instruction.contains("(none provided)"));
        assert!(instruction.contains(StylePreset::Luxury.scene()));
        assert!(instruction.contains("832x1216"));
        assert!(instruction.contains("exact shape, proportions, texture and color"));
        assert!(instruction.contains("under 120 words"));
    }

    #[test]
    fn test_custom_style_is_used_verbatim() {
        let mut job = job();
        job.style = StyleSelection::Custom("  on a snowy cabin porch ".to_string());
        assert!(build_instruction(&job).contains("Style: on a snowy cabin porch\n"));
    }

    #[test]
    fn test_candidate_key() {
        assert_eq!(
            candidate_key("c1", 2, 1_767_225_600_000),
            "generated/c1/2-1767225600000.png"
        );
    }
}
