use chrono::{Duration, NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::{DbUserSession, UserSession};
use crate::error::AppError;

use super::BCRYPT_COST;

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(pool: &Pool<Sqlite>, token: &str) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Issues a single-use reset token for the user, valid for `ttl_hours`.
#[instrument(skip(pool))]
pub async fn create_password_reset_token(
    pool: &Pool<Sqlite>,
    user_id: i64,
    ttl_hours: i64,
) -> Result<String, AppError> {
    info!("Creating password reset token");

    let token = Uuid::new_v4().to_string();
    let expires_at = (Utc::now() + Duration::hours(ttl_hours)).naive_utc();

    sqlx::query("INSERT INTO password_reset_tokens (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(&token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(token)
}

/// Sets a new password for the token's owner and consumes the token. Unknown
/// and expired tokens are rejected without touching the password.
#[instrument(skip_all)]
pub async fn reset_password_with_token(
    pool: &Pool<Sqlite>,
    token: &str,
    new_password: &str,
) -> Result<i64, AppError> {
    info!("Resetting password with token");

    let mut tx = pool.begin().await?;

    let row: Option<(i64, i64, NaiveDateTime)> = sqlx::query_as(
        "SELECT id, user_id, expires_at FROM password_reset_tokens WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(&mut *tx)
    .await?;

    let invalid = || AppError::Validation("Invalid or expired token".to_string());

    let (token_id, user_id, expires_at) = row.ok_or_else(invalid)?;
    if expires_at <= Utc::now().naive_utc() {
        sqlx::query("DELETE FROM password_reset_tokens WHERE id = ?")
            .bind(token_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        return Err(invalid());
    }

    let hashed_password = bcrypt::hash(new_password, BCRYPT_COST)?;
    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hashed_password)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM password_reset_tokens WHERE id = ?")
        .bind(token_id)
        .execute(&mut *tx)
        .await?;

    // Outstanding sessions were opened with the old password.
    sqlx::query("DELETE FROM user_sessions WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(user_id)
}

#[instrument(skip(pool))]
pub async fn clean_expired_reset_tokens(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM password_reset_tokens WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
