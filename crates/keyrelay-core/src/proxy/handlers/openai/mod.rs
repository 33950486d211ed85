// OpenAI-compatible API handlers

mod chat;
mod models;

pub use chat::handle_chat_completions;
pub use models::handle_list_models;

// Shared imports for submodules
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::AppError;
use crate::proxy::server::AppState;
