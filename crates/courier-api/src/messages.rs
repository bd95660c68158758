use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use courier_db::feed;
use courier_db::models::{MessageRow, ReactionRow};
use courier_types::ChatError;
use courier_types::api::{Claims, MessagePage};
use courier_types::models::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Pass the oldest message id from the previous page to fetch older
    /// history.
    pub before_id: Option<i64>,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

/// GET /api/messages/{peer_id} — one page of the conversation, oldest first.
/// Reading the page marks everything from the peer as seen and notifies
/// them, same as joining the conversation over the gateway.
pub async fn page(
    State(state): State<AppState>,
    Path(peer_id): Path<i64>,
    Query(query): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessagePage>, ApiError> {
    let viewer = claims.sub;
    let limit = query.limit.clamp(1, MAX_PAGE_LIMIT);
    let before_id = query.before_id;

    let db = state.db.clone();
    let page_rows = tokio::task::spawn_blocking(
        move || -> Result<(Vec<MessageRow>, Vec<ReactionRow>), ChatError> {
            if peer_id == viewer
                || db.get_user(peer_id)?.is_none()
                || !db.are_friends(viewer, peer_id)?
            {
                return Err(ChatError::NotFound("contact not found"));
            }

            let rows = db.message_page(viewer, peer_id, limit, before_id)?;
            let message_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            let reaction_rows = db.reactions_for_messages(&message_ids)?;
            Ok((rows, reaction_rows))
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?;
    let (rows, reaction_rows) = page_rows?;

    let has_more = rows.len() == limit as usize;
    let rows_asc: Vec<_> = rows.into_iter().rev().collect();

    // Side effect of reading the page: everything from the peer is now seen.
    state.chat.mark_seen_bulk(viewer, peer_id).await?;

    Ok(Json(MessagePage {
        messages: feed::assemble(rows_asc, reaction_rows, viewer),
        has_more,
    }))
}
