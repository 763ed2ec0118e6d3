//! Job processors, one per queue.

pub mod cleanup;
pub mod image_generation;
pub mod notification;
pub mod subscription_renewal;

pub use cleanup::{CleanupProcessor, CleanupSummary};
pub use image_generation::{
    CANDIDATE_COUNT, IMAGE_STRENGTH, ImageGenerationProcessor, build_instruction,
};
pub use notification::{DiscordProcessor, EmailProcessor};
pub use subscription_renewal::{RenewalSummary, SubscriptionRenewalProcessor};
