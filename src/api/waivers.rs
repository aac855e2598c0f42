use chrono::{DateTime, Utc};
use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use crate::auth::{Permission, User};
use crate::db::{
    get_gym, get_gym_waiver, get_waiver_signature, has_active_membership, set_waiver_signature,
    upsert_gym_waiver,
};
use crate::error::AppError;
use crate::models::{GymWaiver, WaiverSignature, WaiverStatus};
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PermissionCheckExt, ToValidationResponse,
};

use super::require_gym_staff;

#[derive(Deserialize, Validate)]
pub struct WaiverRequest {
    #[validate(length(min = 1, max = 200, message = "Waiver title is required"))]
    pub title: String,
    #[validate(length(min = 1, message = "Waiver content is required"))]
    pub content: String,
}

async fn require_waiver(db: &Pool<Sqlite>, gym_id: i64) -> Result<GymWaiver, ApiError> {
    get_gym_waiver(db, gym_id)
        .await
        .validate_custom()?
        .ok_or_else(|| {
            AppError::NotFound("This gym has no waiver".to_string()).to_validation_response()
        })
}

#[put("/gyms/<gym_id>/waiver", data = "<request>")]
pub async fn api_save_waiver(
    gym_id: i64,
    request: Json<WaiverRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<GymWaiver>, ApiError> {
    user.require_permission(Permission::ManageWaivers)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    get_gym(db, gym_id).await.validate_custom()?;
    require_gym_staff(db, &user, gym_id).await?;

    let waiver = upsert_gym_waiver(db, gym_id, validated.title.trim(), &validated.content)
        .await
        .validate_custom()?;
    Ok(Json(waiver))
}

#[get("/gyms/<gym_id>/waiver")]
pub async fn api_get_waiver(
    gym_id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<GymWaiver>, ApiError> {
    let waiver = require_waiver(db, gym_id).await?;
    Ok(Json(waiver))
}

#[derive(Deserialize, Default)]
pub struct SignWaiverRequest {
    pub status: Option<WaiverStatus>,
}

#[post("/gyms/<gym_id>/waiver/sign", data = "<request>")]
pub async fn api_sign_waiver(
    gym_id: i64,
    request: Option<Json<SignWaiverRequest>>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<WaiverSignature>, ApiError> {
    user.require_permission(Permission::SignWaiver)
        .validate_custom()?;

    let waiver = require_waiver(db, gym_id).await?;

    if !has_active_membership(db, user.id, gym_id)
        .await
        .validate_custom()?
    {
        return Err(
            AppError::Authorization("You don't have access to this gym".to_string())
                .to_validation_response(),
        );
    }

    let status = request
        .map(|r| r.into_inner())
        .unwrap_or_default()
        .status
        .unwrap_or(WaiverStatus::Signed);

    let signature = set_waiver_signature(db, waiver.id, user.id, status)
        .await
        .validate_custom()?;
    info!(gym_id, user_id = user.id, status = status.as_str(), "Waiver response recorded");

    Ok(Json(signature))
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WaiverStatusResponse {
    pub waiver_id: i64,
    pub status: WaiverStatus,
    pub signed_at: Option<DateTime<Utc>>,
}

#[get("/gyms/<gym_id>/waiver/status")]
pub async fn api_waiver_status(
    gym_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<WaiverStatusResponse>, ApiError> {
    let waiver = require_waiver(db, gym_id).await?;

    let signature = get_waiver_signature(db, waiver.id, user.id)
        .await
        .validate_custom()?;

    Ok(Json(WaiverStatusResponse {
        waiver_id: waiver.id,
        status: signature
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(WaiverStatus::Pending),
        signed_at: signature.and_then(|s| s.signed_at),
    }))
}
