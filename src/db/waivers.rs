use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{DbWaiverSignature, GymWaiver, WaiverSignature, WaiverStatus};

#[instrument]
pub async fn get_gym_waiver(pool: &Pool<Sqlite>, gym_id: i64) -> Result<Option<GymWaiver>, AppError> {
    let waiver = sqlx::query_as::<_, GymWaiver>(
        "SELECT id, gym_id, title, content, updated_at FROM gym_waivers WHERE gym_id = ?",
    )
    .bind(gym_id)
    .fetch_optional(pool)
    .await?;
    Ok(waiver)
}

/// Creates or replaces the gym's waiver and flags the gym as requiring one.
#[instrument(skip(pool, content))]
pub async fn upsert_gym_waiver(
    pool: &Pool<Sqlite>,
    gym_id: i64,
    title: &str,
    content: &str,
) -> Result<GymWaiver, AppError> {
    info!("Saving gym waiver");
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO gym_waivers (gym_id, title, content, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (gym_id) DO UPDATE
         SET title = excluded.title, content = excluded.content, updated_at = excluded.updated_at",
    )
    .bind(gym_id)
    .bind(title)
    .bind(content)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE gyms SET has_waiver = 1 WHERE id = ?")
        .bind(gym_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    get_gym_waiver(pool, gym_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Waiver for gym {} missing after save", gym_id)))
}

#[instrument]
pub async fn get_waiver_signature(
    pool: &Pool<Sqlite>,
    waiver_id: i64,
    user_id: i64,
) -> Result<Option<WaiverSignature>, AppError> {
    let row = sqlx::query_as::<_, DbWaiverSignature>(
        "SELECT waiver_id, user_id, status, signed_at
         FROM waiver_signatures WHERE waiver_id = ? AND user_id = ?",
    )
    .bind(waiver_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(WaiverSignature::try_from).transpose()
}

/// Records the user's response to a waiver. Only a `Signed` status stamps
/// `signed_at`; any other status clears it.
#[instrument(skip(pool))]
pub async fn set_waiver_signature(
    pool: &Pool<Sqlite>,
    waiver_id: i64,
    user_id: i64,
    status: WaiverStatus,
) -> Result<WaiverSignature, AppError> {
    info!("Recording waiver signature");
    let signed_at = (status == WaiverStatus::Signed).then(Utc::now);

    sqlx::query(
        "INSERT INTO waiver_signatures (waiver_id, user_id, status, signed_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (waiver_id, user_id) DO UPDATE
         SET status = excluded.status, signed_at = excluded.signed_at",
    )
    .bind(waiver_id)
    .bind(user_id)
    .bind(status.as_str())
    .bind(signed_at)
    .execute(pool)
    .await?;

    get_waiver_signature(pool, waiver_id, user_id)
        .await?
        .ok_or_else(|| AppError::Internal("Waiver signature missing after save".to_string()))
}
