// OpenAI models listing
use super::*;

use keyrelay_types::protocol::ModelList;

/// Fixed `created` stamp; upstream does not report one.
const MODEL_CREATED_AT: i64 = 1_706_745_600;

pub async fn handle_list_models(State(state): State<AppState>) -> impl IntoResponse {
    let models = state.config.read().await.upstream.models.clone();
    debug!("Listing {} enabled models", models.len());
    Json(ModelList::from_ids(models, MODEL_CREATED_AT))
}
