//! Domain types shared by payloads, repositories and processors.

mod campaign;
mod plan;
mod upload;

pub use campaign::{Campaign, CampaignStatus};
pub use plan::PlanTier;
pub use upload::{ProductUpload, UploadStatus};
