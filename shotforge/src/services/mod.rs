//! Remote collaborators and the service container that wires everything together.

pub mod container;
pub mod generative;
pub mod storage;

pub use container::ServiceContainer;
pub use generative::{
    HttpImageGenerator, ImageGenerator, ImageRequest, OpenAiPromptGenerator, PromptGenerator,
};
pub use storage::{HttpObjectStorage, ObjectStorage};
