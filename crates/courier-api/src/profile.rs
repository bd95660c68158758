use axum::{Extension, Json, extract::State};

use courier_db::feed;
use courier_types::ChatError;
use courier_types::api::{Claims, UserProfile};

use crate::AppState;
use crate::error::ApiError;

/// GET /api/me — the authenticated user's own profile.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserProfile>, ApiError> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user(claims.sub))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))??
        .ok_or(ChatError::NotFound("user not found"))?;

    Ok(Json(UserProfile {
        id: user.id,
        username: user.username,
        email: user.email,
        avatar_url: user.avatar_url,
        last_seen: user.last_seen.as_deref().and_then(feed::parse_ts),
    }))
}
