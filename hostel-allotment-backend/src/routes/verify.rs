//! Public lookup behind the QR code on an allotment slip.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use hostel_allotment_core::models::AllotmentId;
use hostel_allotment_core::{ReadStore, StoreError};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::routes::hostel_name;

#[derive(Serialize)]
pub struct VerifiedAllotment {
    pub id: AllotmentId,
    pub student_name: String,
    pub email: String,
    pub branch: String,
    pub year: i32,
    pub hostel: String,
    pub room_number: String,
    pub floor: i32,
    pub allotted_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allotment: Option<VerifiedAllotment>,
}

const NOT_FOUND: &str = "Allotment not found. This may be an invalid or expired QR code.";

async fn lookup(
    store: &dyn ReadStore,
    id: AllotmentId,
) -> Result<Option<VerifiedAllotment>, StoreError> {
    let Some(allotment) = store.allotment(id).await? else {
        return Ok(None);
    };
    let student = store.profile(allotment.student_id).await?;
    let room = store.room(allotment.room_id).await?;
    let hostel = match &room {
        Some(room) => hostel_name(&store.hostels().await?, room.hostel_id),
        None => None,
    };
    Ok(Some(VerifiedAllotment {
        id: allotment.id,
        student_name: student
            .as_ref()
            .map_or_else(|| "Unknown".to_owned(), |s| s.name.clone()),
        email: student.as_ref().map(|s| s.email.clone()).unwrap_or_default(),
        branch: student
            .as_ref()
            .and_then(|s| s.branch.clone())
            .unwrap_or_default(),
        year: student.as_ref().and_then(|s| s.year).unwrap_or_default(),
        hostel: hostel.unwrap_or_else(|| "Unknown".to_owned()),
        room_number: room
            .as_ref()
            .map(|r| r.room_number.clone())
            .unwrap_or_default(),
        floor: room.as_ref().map(|r| r.floor).unwrap_or_default(),
        allotted_at: allotment.allotted_at,
    }))
}

/// Malformed ids answer the same as unknown ones.
pub async fn verify(
    State(store): State<Arc<dyn ReadStore>>,
    Path(id): Path<String>,
) -> Response {
    let found = match Uuid::parse_str(&id) {
        Ok(id) => lookup(store.as_ref(), AllotmentId::from(id)).await,
        Err(_) => Ok(None),
    };
    match found {
        Ok(Some(allotment)) => Json(VerifyResponse {
            valid: true,
            message: "Allotment verified successfully",
            allotment: Some(allotment),
        })
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(VerifyResponse {
                valid: false,
                message: NOT_FOUND,
                allotment: None,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("allotment verification failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(VerifyResponse {
                    valid: false,
                    message: "Verification failed",
                    allotment: None,
                }),
            )
                .into_response()
        }
    }
}
