//! Structured content: what the engine asks for, how the external generator
//! is called, and the deterministic fallback that masks every failure.

pub mod broker;
pub mod fallback;
pub mod generator;
pub mod prompt;
pub mod types;
pub mod validate;

pub use broker::ContentBroker;
pub use generator::{ContentGenerator, GeneratorError, OpenAiGenerator, OpenAiGeneratorConfig};
pub use prompt::GenerationPrompt;
pub use types::{
    ContentKind, ContentOrigin, ContentRequest, IfThenPlan, Intervention, StepContent,
    StructuredContent, Validated,
};
