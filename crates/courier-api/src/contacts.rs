use axum::{Extension, Json, extract::State};

use courier_db::feed;
use courier_types::api::{Claims, ContactSummary};

use crate::AppState;
use crate::error::ApiError;

/// GET /api/contacts — every friend with their latest visible message
/// preview, unread count, and live presence, most recently active first.
pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ContactSummary>>, ApiError> {
    let viewer = claims.sub;

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.contacts(viewer))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))??;

    // Presence is process-local, so it gets merged here rather than queried
    let presence = &state.chat.presence;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let is_online = presence.is_online(row.id).await;
        let device_count = presence.device_count(row.id).await;
        out.push(feed::contact_view(row, is_online, device_count));
    }

    Ok(Json(out))
}
