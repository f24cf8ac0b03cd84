//! Core of the numbers tutor: the lesson script, the conversation store that
//! walks a student through it, and the clients that reach the generative
//! backend.

pub mod gateway;
pub mod lesson;
pub mod prompts;
pub mod store;
pub mod tutor;
pub mod types;

pub use gateway::{AiGateway, GatewayError, GatewaySettings, Provider};
pub use lesson::{LessonConfig, LessonStep, StepKind};
pub use prompts::{PromptKey, PromptLibrary};
pub use store::{ConversationState, ConversationStore, Pacing, StoreConfig, StoreError};
pub use tutor::TutorClient;
