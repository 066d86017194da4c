pub mod anthropic;
pub mod antigravity;

pub use anthropic::{
    ContentBlock, Message, MessageContent, MessagesRequest, MessagesResponse, StreamEvent,
    ToolDeclaration, Usage,
};
pub use antigravity::{
    Candidate, Content, FunctionCall, GenerateContentRequest, GenerateContentResponse,
    GenerationConfig, Part, UpstreamEnvelope,
};
