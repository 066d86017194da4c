//! Typed Antigravity (`v1internal:generateContent`) wire schema.
//!
//! The upstream speaks the Gemini generate-content grammar wrapped in a
//! `{project, model, request, ...}` envelope. Known fields are modeled,
//! unrecognized ones are preserved in `extra` catch-alls.

mod content;
mod generate_request;
mod generate_response;
mod generation;
mod tool;

pub use content::{Content, FunctionCall, FunctionResponse, Part};
pub use generate_request::{GenerateContentRequest, UpstreamEnvelope};
pub use generate_response::{Candidate, GenerateContentResponse, UsageMetadata};
pub use generation::GenerationConfig;
pub use tool::{FunctionDeclaration, Tool, ToolConfig};
