use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, FixedOffset};
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{message, user};
use crate::error::AppResult;
use crate::utils::jwt::Claims;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageHistoryQuery {
    pub counterpart: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub receiver_id: Uuid,
    pub text: String,
    pub created_at: DateTime<FixedOffset>,
}

/// Chat history for a ride in created_at order — the authoritative log that
/// reconnecting clients reconcile against. With `counterpart` set, only the
/// pairwise conversation between the caller and that user is returned.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<Uuid>,
    Query(query): Query<MessageHistoryQuery>,
) -> AppResult<Json<Vec<MessageResponse>>> {
    let mut find = message::Entity::find().filter(message::Column::RideId.eq(ride_id));

    if let Some(counterpart) = query.counterpart {
        find = find.filter(
            Condition::any()
                .add(
                    Condition::all()
                        .add(message::Column::SenderId.eq(claims.sub))
                        .add(message::Column::ReceiverId.eq(counterpart)),
                )
                .add(
                    Condition::all()
                        .add(message::Column::SenderId.eq(counterpart))
                        .add(message::Column::ReceiverId.eq(claims.sub)),
                ),
        );
    }

    let messages = find
        .order_by_asc(message::Column::CreatedAt)
        .all(&state.db)
        .await?;

    let users = user::Entity::find().all(&state.db).await?;

    let responses: Vec<MessageResponse> = messages
        .into_iter()
        .map(|m| {
            let sender = users.iter().find(|u| u.id == m.sender_id);
            MessageResponse {
                id: m.id,
                ride_id: m.ride_id,
                sender_id: m.sender_id,
                sender_name: sender.map(|u| u.name.clone()).unwrap_or_default(),
                receiver_id: m.receiver_id,
                text: m.text,
                created_at: m.created_at,
            }
        })
        .collect();

    Ok(Json(responses))
}
