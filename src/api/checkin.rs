use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use super::IdParam;
use crate::auth::{Permission, User};
use crate::db::{
    find_user_by_email, get_attendance_history, is_staff_for_member, record_check_in,
    record_guest_visit,
};
use crate::error::AppError;
use crate::models::{AttendanceHistoryEntry, CheckInConfirmation, NewGuestVisit};
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PHONE_RE, PermissionCheckExt, ToValidationResponse,
    required,
};

#[derive(Deserialize, Validate)]
pub struct CheckInRequest {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: Option<String>,
    #[serde(rename = "classID")]
    pub class_id: Option<IdParam>,
    pub gym_id: Option<IdParam>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CheckInResponse {
    pub success: bool,
    pub message: String,
    pub checkin: CheckInConfirmation,
}

/// Kiosk check-in: no session is needed, the member identifies by email.
#[post("/checkin", data = "<request>")]
pub async fn api_checkin(
    request: Json<CheckInRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CheckInResponse>, ApiError> {
    let missing = "Email and class ID are required";
    let email = required(
        request
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string),
        "email",
        missing,
    )?;
    let class_id = required(
        request.class_id.as_ref().and_then(IdParam::as_i64),
        "classID",
        missing,
    )?;

    let validated = request.validate_custom()?;
    let gym_id = match &validated.gym_id {
        Some(id) if !id.is_blank() => Some(required(id.as_i64(), "gym_id", "Invalid gym ID")?),
        _ => None,
    };

    let checkin = record_check_in(db, &email, class_id, gym_id)
        .await
        .validate_custom()?;

    let message = if checkin.already_checked_in {
        "Already checked in"
    } else {
        "Check-in successful!"
    };

    Ok(Json(CheckInResponse {
        success: true,
        message: message.to_string(),
        checkin,
    }))
}

#[derive(Deserialize)]
pub struct CheckStudentRequest {
    pub email: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CheckStudentResponse {
    pub success: bool,
    pub exists: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<StudentSummary>,
}

#[post("/check_student", data = "<request>")]
pub async fn api_check_student(
    request: Json<CheckStudentRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CheckStudentResponse>>, ApiError> {
    let student = find_user_by_email(db, &request.email)
        .await
        .validate_custom()?;

    let response = match student {
        Some(student) => Custom(
            Status::Ok,
            Json(CheckStudentResponse {
                success: true,
                exists: true,
                message: "Student found".to_string(),
                student: Some(StudentSummary {
                    id: student.id,
                    email: student.email,
                    first_name: student.first_name,
                    last_name: student.last_name,
                }),
            }),
        ),
        None => {
            info!(email = %request.email, "Student lookup found no match");
            Custom(
                Status::NotFound,
                Json(CheckStudentResponse {
                    success: false,
                    exists: false,
                    message: "Student not found".to_string(),
                    student: None,
                }),
            )
        }
    };

    Ok(response)
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HistoryStudent {
    pub id: i64,
    pub email: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceHistoryResponse {
    pub success: bool,
    pub student: HistoryStudent,
    pub attendance_count: usize,
    pub attendance_records: Vec<AttendanceHistoryEntry>,
}

async fn history_for(
    db: &Pool<Sqlite>,
    student: User,
) -> Result<Json<AttendanceHistoryResponse>, ApiError> {
    let records = get_attendance_history(db, student.id)
        .await
        .validate_custom()?;

    Ok(Json(AttendanceHistoryResponse {
        success: true,
        student: HistoryStudent {
            id: student.id,
            name: student.display_name(),
            email: student.email,
        },
        attendance_count: records.len(),
        attendance_records: records,
    }))
}

#[get("/attendance/history")]
pub async fn api_my_attendance_history(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AttendanceHistoryResponse>, ApiError> {
    user.require_permission(Permission::ViewOwnAttendance)
        .validate_custom()?;
    history_for(db, user).await
}

/// Another member's history; members may still look up their own email.
/// Staff only see members of gyms they run.
#[get("/attendance/history/<email>")]
pub async fn api_attendance_history(
    email: &str,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AttendanceHistoryResponse>, ApiError> {
    let own_history = user.email.eq_ignore_ascii_case(email.trim());
    if !own_history {
        user.require_permission(Permission::ViewMemberAttendance)
            .validate_custom()?;
    }

    let student = find_user_by_email(db, email)
        .await
        .validate_custom()?
        .ok_or_else(|| AppError::NotFound("Student not found".to_string()).to_validation_response())?;

    if !own_history && !is_staff_for_member(db, &user, student.id).await.validate_custom()? {
        tracing::warn!(email = %user.email, student_id = student.id, "History lookup outside the caller's gyms");
        return Err(AppError::Authorization("You don't have access to this member".to_string())
            .to_validation_response());
    }

    history_for(db, student).await
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GuestCheckInRequest {
    pub name: Option<String>,
    #[validate(email(message = "Enter a valid email address"))]
    pub email: Option<String>,
    #[validate(regex(path = *PHONE_RE, message = "Enter a valid phone number"))]
    pub phone: Option<String>,
    pub experience_level: Option<String>,
    pub referral_source: Option<String>,
    #[serde(default = "default_first_time")]
    pub first_time_visit: bool,
    #[serde(default)]
    pub marketing_consent: bool,
    #[serde(default)]
    pub other_dojos: String,
    pub gym_id: Option<i64>,
}

fn default_first_time() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GuestCheckInResponse {
    pub success: bool,
    pub message: String,
    pub guest_id: i64,
}

#[post("/guest-checkin", data = "<request>")]
pub async fn api_guest_checkin(
    request: Json<GuestCheckInRequest>,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<GuestCheckInResponse>>, ApiError> {
    let validated = request.validate_custom()?;

    let missing = "Please fill in all required fields";
    let filled = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    let visit = NewGuestVisit {
        gym_id: validated.gym_id,
        name: required(filled(validated.name), "name", missing)?,
        email: required(filled(validated.email), "email", missing)?,
        phone: required(filled(validated.phone), "phone", missing)?,
        experience_level: required(
            filled(validated.experience_level),
            "experienceLevel",
            missing,
        )?,
        referral_source: required(filled(validated.referral_source), "referralSource", missing)?,
        first_time_visit: validated.first_time_visit,
        marketing_consent: validated.marketing_consent,
        other_dojos: validated.other_dojos,
    };

    let guest_id = record_guest_visit(db, &visit).await.validate_custom()?;

    Ok(Custom(
        Status::Created,
        Json(GuestCheckInResponse {
            success: true,
            message: "Guest check-in successful".to_string(),
            guest_id,
        }),
    ))
}
