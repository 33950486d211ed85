//! Protocol definitions for the inbound OpenAI-compatible surface.

pub mod openai;

pub use openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice,
    ChunkChoice, ContentPart, Delta, MessageContent, ModelInfo, ModelList, ToolCall, ToolFunction,
    Usage,
};
