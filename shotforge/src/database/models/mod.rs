//! Database row models.
//!
//! Rows keep SQLite's native column types (`TEXT`, `INTEGER`); conversion to
//! domain types happens in `into_*`/`from_*` helpers next to each model.

pub mod campaign;
pub mod job;
pub mod subscription;
pub mod upload;

pub use campaign::CampaignDbModel;
pub use job::{JobDbModel, RecurringScheduleDbModel};
pub use subscription::ActiveSubscriptionDbModel;
pub use upload::ProductUploadDbModel;
