use std::net::IpAddr;

use chrono::{Duration, NaiveDate, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use validator::Validate;

use crate::auth::{Permission, Role, SESSION_COOKIE, User, UserSession};
use crate::cache::{LoginThrottle, TtlCache};
use crate::db::{
    NewUser, authenticate_user, create_member_with_membership, create_password_reset_token,
    create_user, create_user_session, email_exists, find_gym, find_user_by_email,
    has_active_membership, invalidate_session, reset_password_with_token,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::mailer::{Mailer, password_reset_link};
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PHONE_RE, PermissionCheckExt, ToValidationResponse,
    ValidationResponse, required,
};

use super::{MessageResponse, UserData};

const ROLE_COOKIE: &str = "user_role";

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
    pub gym_id: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GymSummary {
    pub id: i64,
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub user: Option<UserData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gym: Option<GymSummary>,
}

fn throttle_key(client_ip: Option<IpAddr>) -> String {
    match client_ip {
        Some(ip) => format!("login_attempt:{}", ip),
        None => "login_attempt:unknown".to_string(),
    }
}

/// Counts one login attempt against `key`. Returns false once the client has
/// used every attempt in the current window; rejected attempts are not counted.
pub(crate) fn register_login_attempt(
    throttle: &dyn TtlCache<u32>,
    key: &str,
    config: &AppConfig,
) -> bool {
    let attempts = throttle.get(key).unwrap_or(0);
    if attempts >= config.login_max_attempts {
        return false;
    }

    throttle.set(key, attempts + 1, config.login_window);
    true
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    client_ip: Option<IpAddr>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
    throttle: &State<LoginThrottle>,
) -> Result<Json<LoginResponse>, ApiError> {
    let key = throttle_key(client_ip);
    if !register_login_attempt(&**throttle.inner(), &key, config) {
        warn!(key = %key, "Login attempt throttled");
        return Err(Custom(
            Status::TooManyRequests,
            Json(ValidationResponse::with_error(
                "rate_limit",
                "Too many login attempts. Please try again later.",
            )),
        ));
    }

    let validated = login.validate_custom()?;

    let user = authenticate_user(db, &validated.email, &validated.password)
        .await
        .validate_custom()?
        .ok_or_else(|| {
            AppError::Authentication("Invalid credentials".to_string()).to_validation_response()
        })?;

    let gym = match validated.gym_id {
        Some(gym_id) => {
            if !has_active_membership(db, user.id, gym_id)
                .await
                .validate_custom()?
            {
                return Err(AppError::Authorization(
                    "You don't have access to this gym".to_string(),
                )
                .to_validation_response());
            }

            let gym = find_gym(db, gym_id).await.validate_custom()?;
            Some(GymSummary {
                id: gym_id,
                name: gym.map(|g| g.name),
            })
        }
        None => None,
    };

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + Duration::hours(config.session_ttl_hours);

    create_user_session(db, user.id, &token, expires_at.naive_utc())
        .await
        .validate_custom()?;

    let max_age = rocket::time::Duration::hours(config.session_ttl_hours);
    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(max_age),
    );
    cookies.add_private(
        Cookie::build((ROLE_COOKIE, user.role.to_string()))
            .same_site(SameSite::Lax)
            .max_age(max_age),
    );

    info!(email = %user.email, gym = ?gym.as_ref().map(|g| g.id), "User logged in");

    Ok(Json(LoginResponse {
        success: true,
        message: "Login successful".to_string(),
        user: Some(UserData::from(user)),
        gym,
    }))
}

#[post("/logout")]
pub async fn api_logout(
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Json<MessageResponse> {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout session invalidation");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));
    cookies.remove_private(Cookie::build(ROLE_COOKIE));

    MessageResponse::ok("Logged out successfully")
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[derive(Deserialize, Validate)]
pub struct RegistrationRequest {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub belt: Option<i64>,
    pub role: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub success: bool,
    pub message: String,
    pub user_id: i64,
}

fn email_taken() -> ApiError {
    Custom(
        Status::BadRequest,
        Json(ValidationResponse::with_error(
            "email",
            "Email already registered",
        )),
    )
}

/// Open registration creates members. Any other role needs a logged-in
/// caller who may manage the gym.
#[post("/register", data = "<registration>")]
pub async fn api_register(
    registration: Json<RegistrationRequest>,
    caller: Option<User>,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<RegistrationResponse>>, ApiError> {
    let validated = registration.validate_custom()?;

    let role = match validated.role.as_deref() {
        None => Role::Member,
        Some(role) => Role::from_str(role).map_err(|_| {
            Custom(
                Status::BadRequest,
                Json(ValidationResponse::with_error("role", "Unknown role")),
            )
        })?,
    };

    if role != Role::Member {
        match &caller {
            Some(caller) => caller
                .require_permission(Permission::ManageGym)
                .validate_custom()?,
            None => return Err(Status::Unauthorized.to_validation_response()),
        }
    }

    if email_exists(db, &validated.email).await.validate_custom()? {
        return Err(email_taken());
    }

    let new_user = NewUser {
        role,
        belt_id: validated.belt,
        ..NewUser::member(
            &validated.email,
            &validated.password,
            &validated.first_name,
            &validated.last_name,
        )
    };

    let user_id = create_user(db, &new_user).await.validate_custom()?;
    info!(user_id, role = %role, "Registered user");

    Ok(Custom(
        Status::Created,
        Json(RegistrationResponse {
            success: true,
            message: "User registered successfully".to_string(),
            user_id,
        }),
    ))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MemberSignupRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[validate(email(message = "Enter a valid email address"))]
    pub email: Option<String>,
    #[validate(regex(path = *PHONE_RE, message = "Enter a valid phone number"))]
    pub phone: Option<String>,
    pub dob: Option<NaiveDate>,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: Option<String>,
    pub belt: Option<i64>,
    pub gym_id: Option<i64>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Creates a member and their gym membership together; nothing is stored if
/// either part fails.
#[post("/member-signup", data = "<signup>")]
pub async fn api_member_signup(
    signup: Json<MemberSignupRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<RegistrationResponse>>, ApiError> {
    let signup = signup.validate_custom()?;

    let missing = "Missing required fields";
    let first_name = required(present(signup.first_name), "firstName", missing)?;
    let last_name = required(present(signup.last_name), "lastName", missing)?;
    let email = required(present(signup.email), "email", missing)?;
    let phone = required(present(signup.phone), "phone", missing)?;
    let dob = required(signup.dob, "dob", missing)?;
    let password = required(present(signup.password), "password", missing)?;
    let gym_id = required(signup.gym_id, "gymId", "Gym ID is required")?;

    if email_exists(db, &email).await.validate_custom()? {
        return Err(email_taken());
    }

    let new_user = NewUser {
        phone_number: Some(phone),
        date_of_birth: Some(dob),
        belt_id: signup.belt,
        ..NewUser::member(&email, &password, &first_name, &last_name)
    };

    let user_id = create_member_with_membership(db, &new_user, gym_id)
        .await
        .validate_custom()?;
    info!(user_id, gym_id, "Member signed up");

    Ok(Custom(
        Status::Created,
        Json(RegistrationResponse {
            success: true,
            message: "Member registered successfully".to_string(),
            user_id,
        }),
    ))
}

#[derive(Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
}

#[post("/password-reset", data = "<request>")]
pub async fn api_request_password_reset(
    request: Json<PasswordResetRequest>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
    mailer: &State<Box<dyn Mailer>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let validated = request.validate_custom()?;

    let user = find_user_by_email(db, &validated.email)
        .await
        .validate_custom()?
        .ok_or_else(|| {
            AppError::NotFound("No user with that email".to_string()).to_validation_response()
        })?;

    let token = create_password_reset_token(db, user.id, config.reset_token_ttl_hours)
        .await
        .validate_custom()?;

    let link = password_reset_link(&config.frontend_url, &token);
    let body = format!(
        "Hi {},\n\nUse the link below to choose a new password. It expires in {} hour(s).\n\n{}\n",
        user.display_name(),
        config.reset_token_ttl_hours,
        link
    );

    mailer
        .send(&user.email, "Reset your password", &body)
        .await
        .map_err(|err| {
            err.log_and_record("Password reset email");
            AppError::ExternalService("Email sending failed".to_string())
        })
        .validate_custom()?;

    Ok(MessageResponse::ok("Password reset email sent"))
}

#[derive(Deserialize, Validate)]
pub struct NewPasswordRequest {
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
}

#[post("/password-reset/<token>", data = "<request>")]
pub async fn api_reset_password(
    token: &str,
    request: Json<NewPasswordRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let validated = request.validate_custom()?;

    let user_id = reset_password_with_token(db, token, &validated.password)
        .await
        .validate_custom()?;
    info!(user_id, "Password reset");

    Ok(MessageResponse::ok("Password has been reset"))
}
