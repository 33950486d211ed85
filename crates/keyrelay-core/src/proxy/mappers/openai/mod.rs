// OpenAI mapper module
// Handles OpenAI <-> upstream protocol conversion

pub mod fake_stream;
pub mod model_limits;
pub mod request;
pub mod response;
pub mod sse;
pub mod streaming;
pub mod xml_tools;


pub use fake_stream::create_fake_sse_stream;
pub use model_limits::{adaptive_max_tokens, model_max_tokens, DEFAULT_MAX_TOKENS};
pub use request::{build_upstream_request, resolve_model, sanitize_messages, ResolvedModel};
pub use response::{extract_usage, transform_completion};
pub use sse::{ChunkMeta, SseStream};
pub use streaming::{create_openai_sse_stream, CompletionHook};
pub use xml_tools::extract_xml_tool_calls;
