use chrono::NaiveTime;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Request, Route};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::auth::User;
use crate::db::is_gym_staff;
use crate::error::AppError;
use crate::validation::{ApiError, AppErrorExt, ToValidationResponse, ValidationResponse};

pub mod auth;
pub mod checkin;
pub mod classes;
pub mod gyms;
pub mod health;
pub mod waivers;

#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: &str) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub belt: Option<String>,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role.to_string(),
            belt: user.belt,
        }
    }
}

/// Owners of the gym and instructors who are active members there.
pub(crate) async fn require_gym_staff(
    db: &Pool<Sqlite>,
    user: &User,
    gym_id: i64,
) -> Result<(), ApiError> {
    if is_gym_staff(db, user.id, user.role, gym_id)
        .await
        .validate_custom()?
    {
        return Ok(());
    }

    tracing::warn!(email = %user.email, gym_id, "Staff action attempted by non-staff user");
    Err(AppError::Authorization("You don't have access to this gym".to_string())
        .to_validation_response())
}

/// Numeric id sent either as a JSON number or as a string such as `"12"`.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum IdParam {
    Number(i64),
    Text(String),
}

impl IdParam {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            IdParam::Number(id) => Some(*id),
            IdParam::Text(text) => text.trim().parse().ok(),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, IdParam::Text(text) if text.trim().is_empty())
    }
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub(crate) fn parse_time(value: &str, field: &str) -> Result<NaiveTime, ApiError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| {
            Custom(
                Status::BadRequest,
                Json(ValidationResponse::with_error(
                    field,
                    "Expected a time in HH:MM format",
                )),
            )
        })
}

#[catch(default)]
pub fn default_api(status: Status, _req: &Request) -> ApiError {
    status.to_validation_response()
}

pub fn auth_routes() -> Vec<Route> {
    routes![
        auth::api_login,
        auth::api_logout,
        auth::api_me,
        auth::api_register,
        auth::api_member_signup,
        auth::api_request_password_reset,
        auth::api_reset_password,
    ]
}

pub fn api_routes() -> Vec<Route> {
    routes![
        classes::api_available_classes_today,
        classes::api_available_classes_for_gym,
        classes::api_class_details,
        classes::api_list_templates,
        classes::api_create_template,
        classes::api_update_template,
        classes::api_delete_template,
        classes::api_schedule_classes,
        classes::api_cancel_class,
        checkin::api_checkin,
        checkin::api_check_student,
        checkin::api_my_attendance_history,
        checkin::api_attendance_history,
        checkin::api_guest_checkin,
        gyms::api_create_gym,
        gyms::api_gym_hours,
        gyms::api_gym_hours_for_gym,
        gyms::api_gym_analytics,
        gyms::api_generate_qr,
        waivers::api_save_waiver,
        waivers::api_get_waiver,
        waivers::api_sign_waiver,
        waivers::api_waiver_status,
    ]
}
