//! Text completion and observation synthesis.

pub mod completion;
pub mod mock;
pub mod openai;
pub mod synthesizer;

pub use completion::{CompletionError, CompletionRequest, CompletionService};
pub use mock::MockCompletion;
pub use openai::OpenAiCompletion;
pub use synthesizer::{ObservationSynthesizer, SynthesisSettings, fallback_observation};
