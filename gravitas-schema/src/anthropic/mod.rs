//! Typed subset of the Anthropic Messages API spoken by inbound clients.
//!
//! Requests are parsed into properly typed structs instead of raw
//! `serde_json::Value`. This gives us:
//! - Compile-time access to known fields (e.g. `system`, `tools`).
//! - Forward compatibility via `extra` catch-all maps at every level.
//! - Validation-friendly request shape (e.g. required `messages`).

mod content;
mod messages_request;
mod messages_response;
mod stream_event;

pub use content::{ContentBlock, ImageSource, Message, MessageContent, ToolResultContent};
pub use messages_request::{MessagesRequest, SystemPrompt, ToolChoice, ToolDeclaration};
pub use messages_response::{ErrorBody, ErrorObject, MessagesResponse, Usage};
pub use stream_event::{ContentBlockDelta, MessageDelta, MessageStartBody, StreamEvent};
