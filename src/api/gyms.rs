use std::path::PathBuf;

use chrono::Local;
use rocket::State;
use rocket::http::{ContentType, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::tokio::task;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use crate::auth::{Permission, User};
use crate::db::{
    create_gym, find_gym, first_gym, first_membership_gym_id, get_gym, get_gym_analytics,
    get_gym_hours,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::{Gym, GymAnalytics, GymHours, GymHoursInput, NewGym};
use crate::qr::render_checkin_qr;
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PHONE_RE, PermissionCheckExt, ToValidationResponse,
    required,
};

use super::{parse_time, require_gym_staff};

#[derive(Deserialize, Debug)]
pub struct GymHoursRequest {
    pub day: i64,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
    #[serde(default)]
    pub is_closed: bool,
}

impl GymHoursRequest {
    fn into_input(self) -> Result<GymHoursInput, ApiError> {
        let open_time = match self.open_time.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(time) => Some(parse_time(time, "schedule")?),
            None => None,
        };
        let close_time = match self.close_time.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(time) => Some(parse_time(time, "schedule")?),
            None => None,
        };

        Ok(GymHoursInput {
            day: self.day,
            open_time,
            close_time,
            is_closed: self.is_closed,
        })
    }
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGymRequest {
    pub gym_name: Option<String>,
    #[validate(email(message = "Enter a valid email address"))]
    pub gym_email: Option<String>,
    #[validate(regex(path = *PHONE_RE, message = "Enter a valid phone number"))]
    pub gym_phone_number: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub address2: String,
    pub city: Option<String>,
    pub state: Option<String>,
    #[serde(default, rename = "postal_code")]
    pub postal_code: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub schedule: Vec<GymHoursRequest>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateGymResponse {
    pub success: bool,
    pub message: String,
    pub gym: Gym,
}

/// Onboards a gym. A logged-in caller becomes its owner.
#[post("/gyms", data = "<request>")]
pub async fn api_create_gym(
    request: Json<CreateGymRequest>,
    owner: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreateGymResponse>>, ApiError> {
    let validated = request.validate_custom()?;

    let missing = "Missing required fields";
    let filled = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    let schedule = validated
        .schedule
        .into_iter()
        .map(GymHoursRequest::into_input)
        .collect::<Result<Vec<_>, _>>()?;

    let new_gym = NewGym {
        name: required(filled(validated.gym_name), "gymName", missing)?,
        email: required(filled(validated.gym_email), "gymEmail", missing)?,
        phone_number: required(filled(validated.gym_phone_number), "gymPhoneNumber", missing)?,
        street_line1: required(filled(validated.address), "address", missing)?,
        street_line2: validated.address2,
        city: required(filled(validated.city), "city", missing)?,
        state: required(filled(validated.state), "state", missing)?,
        postal_code: validated.postal_code,
        country: validated.country,
        schedule,
    };

    let gym = create_gym(db, &new_gym, owner.as_ref().map(|u| u.id))
        .await
        .validate_custom()?;

    info!(gym_id = gym.id, owner = ?owner.map(|u| u.id), "Gym onboarded");

    Ok(Custom(
        Status::Created,
        Json(CreateGymResponse {
            success: true,
            message: "Gym added successfully".to_string(),
            gym,
        }),
    ))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GymHoursResponse {
    pub success: bool,
    pub gym_id: i64,
    pub gym_name: String,
    pub hours: Vec<GymHours>,
}

async fn hours_for(db: &Pool<Sqlite>, gym: Gym) -> Result<Json<GymHoursResponse>, ApiError> {
    let hours = get_gym_hours(db, gym.id).await.validate_custom()?;

    Ok(Json(GymHoursResponse {
        success: true,
        gym_id: gym.id,
        gym_name: gym.name,
        hours,
    }))
}

/// Hours for the caller's gym, or the first gym when there is no caller or
/// the caller has no active membership.
#[get("/gym-hours")]
pub async fn api_gym_hours(
    user: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<GymHoursResponse>, ApiError> {
    let member_gym = match &user {
        Some(user) => first_membership_gym_id(db, user.id)
            .await
            .validate_custom()?,
        None => None,
    };

    let gym = match member_gym {
        Some(gym_id) => find_gym(db, gym_id).await.validate_custom()?,
        None => first_gym(db).await.validate_custom()?,
    };

    let gym = gym.ok_or_else(|| {
        AppError::NotFound("No gyms in the system".to_string()).to_validation_response()
    })?;

    hours_for(db, gym).await
}

#[get("/gym-hours/<gym_id>")]
pub async fn api_gym_hours_for_gym(
    gym_id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<GymHoursResponse>, ApiError> {
    let gym = get_gym(db, gym_id).await.validate_custom()?;
    hours_for(db, gym).await
}

#[get("/gyms/<gym_id>/analytics")]
pub async fn api_gym_analytics(
    gym_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<GymAnalytics>, ApiError> {
    user.require_permission(Permission::ViewAnalytics)
        .validate_custom()?;
    get_gym(db, gym_id).await.validate_custom()?;
    require_gym_staff(db, &user, gym_id).await?;

    let analytics = get_gym_analytics(db, gym_id, Local::now().date_naive())
        .await
        .validate_custom()?;
    Ok(Json(analytics))
}

/// PNG QR code pointing members at the gym's check-in page.
#[get("/generate-qr/<gym_id>")]
pub async fn api_generate_qr(
    gym_id: i64,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<(ContentType, Vec<u8>), ApiError> {
    get_gym(db, gym_id).await.validate_custom()?;

    let frontend_url = config.frontend_url.clone();
    let logo_path = PathBuf::from(&config.qr_logo_path);

    let png = task::spawn_blocking(move || {
        render_checkin_qr(&frontend_url, gym_id, Some(logo_path.as_path()))
    })
    .await
    .map_err(|err| AppError::Internal(format!("QR rendering task failed: {}", err)))
    .and_then(|rendered| rendered)
    .validate_custom()?;

    Ok((ContentType::PNG, png))
}
