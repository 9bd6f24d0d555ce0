use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use hostel_allotment_core::models::{HistoryEntry, Profile, RoomId};
use hostel_allotment_core::ReadStore;
use serde::Serialize;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::routes::{allotment_view, AllotmentView};

const HISTORY_LIMIT: usize = 10;

#[derive(Serialize)]
pub struct HistoryView {
    #[serde(flatten)]
    pub entry: HistoryEntry,
    pub new_room_number: Option<String>,
}

#[derive(Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub profile: Profile,
    pub allotment: Option<AllotmentView>,
    #[serde(rename = "roomHistory")]
    pub room_history: Vec<HistoryView>,
}

async fn room_number(
    store: &dyn ReadStore,
    room: Option<RoomId>,
) -> Result<Option<String>, AppError> {
    let Some(room) = room else {
        return Ok(None);
    };
    Ok(store.room(room).await?.map(|room| room.room_number))
}

pub async fn profile(
    user: CurrentUser,
    State(store): State<Arc<dyn ReadStore>>,
) -> Result<Json<ProfileResponse>, AppError> {
    let profile = user
        .profile
        .ok_or_else(|| AppError::NotFound("Profile not found".to_owned()))?;
    let allotment = match store.allotment_for_student(profile.id).await? {
        Some(allotment) => Some(allotment_view(store.as_ref(), allotment).await?),
        None => None,
    };

    let mut room_history = Vec::new();
    for entry in store.history_for_student(profile.id, HISTORY_LIMIT).await? {
        room_history.push(HistoryView {
            new_room_number: room_number(store.as_ref(), entry.new_room_id).await?,
            entry,
        });
    }

    Ok(Json(ProfileResponse {
        profile,
        allotment,
        room_history,
    }))
}
