//! Repository layer over the collaborator tables the processors touch.

pub mod campaign;
pub mod subscription;
pub mod upload;

pub use campaign::*;
pub use subscription::*;
pub use upload::*;
