//! # Guardian Model
//!
//! The only component that performs network I/O on the request path.
//!
//! Everything model-related hides behind the [`LanguageModel`] trait so the
//! validation pipeline, learning service and discovery worker can be driven
//! by a scripted stub in tests. The HTTP implementation speaks the
//! chat-completions dialect with temperature 0 for determinism.
//!
//! The companion parser enforces the fail-closed contract on the model's
//! reply: anything that is not a JSON object with a strictly boolean
//! `result` field is a block, tagged with the precise reason.

mod client;
mod error;
mod parser;

pub use client::{
    CompletionRequest, GuardianClient, HttpLanguageModel, LanguageModel, ModelSettings, NullModel,
    GUARDIAN_SYSTEM_PROMPT,
};
pub use error::ModelError;
pub use parser::{extract_json_object, parse_verdict, GuardianVerdict, ParseRejection};

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
