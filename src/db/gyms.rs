use chrono::{Duration, Local, NaiveDate};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::auth::{Role, User};
use crate::error::AppError;
use crate::models::{DbGymHours, Gym, GymAnalytics, GymHours, NewGym, TemplateAttendance};

const GYM_SELECT: &str =
    "SELECT id, name, alternate_name, email, phone_number, has_waiver FROM gyms";

#[instrument]
pub async fn find_gym(pool: &Pool<Sqlite>, gym_id: i64) -> Result<Option<Gym>, AppError> {
    let gym = sqlx::query_as::<_, Gym>(&format!("{} WHERE id = ?", GYM_SELECT))
        .bind(gym_id)
        .fetch_optional(pool)
        .await?;
    Ok(gym)
}

#[instrument]
pub async fn get_gym(pool: &Pool<Sqlite>, gym_id: i64) -> Result<Gym, AppError> {
    find_gym(pool, gym_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Gym {} not found", gym_id)))
}

#[instrument]
pub async fn first_gym(pool: &Pool<Sqlite>) -> Result<Option<Gym>, AppError> {
    let gym = sqlx::query_as::<_, Gym>(&format!("{} ORDER BY id LIMIT 1", GYM_SELECT))
        .fetch_optional(pool)
        .await?;
    Ok(gym)
}

/// Whether `user_id` holds an active membership in `gym_id`. Read-only.
#[instrument]
pub async fn has_active_membership(
    pool: &Pool<Sqlite>,
    user_id: i64,
    gym_id: i64,
) -> Result<bool, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM gym_memberships WHERE user_id = ? AND gym_id = ? AND active = 1",
    )
    .bind(user_id)
    .bind(gym_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

#[instrument]
pub async fn first_membership_gym_id(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Option<i64>, AppError> {
    let gym_id = sqlx::query_scalar(
        "SELECT gym_id FROM gym_memberships WHERE user_id = ? AND active = 1 ORDER BY join_date, id LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(gym_id)
}

/// Owners of the gym, plus instructors holding an active membership there.
#[instrument]
pub async fn is_gym_staff(
    pool: &Pool<Sqlite>,
    user_id: i64,
    role: Role,
    gym_id: i64,
) -> Result<bool, AppError> {
    let owns: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM gym_owners WHERE gym_id = ? AND user_id = ?")
            .bind(gym_id)
            .bind(user_id)
            .fetch_one(pool)
            .await?;
    if owns > 0 {
        return Ok(true);
    }

    Ok(role != Role::Member && has_active_membership(pool, user_id, gym_id).await?)
}

/// Whether `staff` is staff at any gym where `student_id` holds an active
/// membership.
#[instrument(skip(pool, staff), fields(staff_id = staff.id))]
pub async fn is_staff_for_member(
    pool: &Pool<Sqlite>,
    staff: &User,
    student_id: i64,
) -> Result<bool, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM gym_memberships m
         WHERE m.user_id = ? AND m.active = 1 AND (
             EXISTS (SELECT 1 FROM gym_owners o WHERE o.gym_id = m.gym_id AND o.user_id = ?)
             OR (? AND EXISTS (
                 SELECT 1 FROM gym_memberships s
                 WHERE s.gym_id = m.gym_id AND s.user_id = ? AND s.active = 1
             ))
         )",
    )
    .bind(student_id)
    .bind(staff.id)
    .bind(staff.role != Role::Member)
    .bind(staff.id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Adds or reactivates a membership.
pub(crate) async fn insert_membership(
    conn: &mut SqliteConnection,
    user_id: i64,
    gym_id: i64,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO gym_memberships (user_id, gym_id, join_date, active) VALUES (?, ?, ?, 1)
         ON CONFLICT (user_id, gym_id) DO UPDATE SET active = 1",
    )
    .bind(user_id)
    .bind(gym_id)
    .bind(Local::now().date_naive())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn add_membership(pool: &Pool<Sqlite>, user_id: i64, gym_id: i64) -> Result<(), AppError> {
    info!("Adding gym membership");
    let mut conn = pool.acquire().await?;
    insert_membership(&mut conn, user_id, gym_id).await
}

#[instrument(skip(pool))]
pub async fn set_membership_active(
    pool: &Pool<Sqlite>,
    user_id: i64,
    gym_id: i64,
    active: bool,
) -> Result<(), AppError> {
    info!("Setting membership active flag");
    sqlx::query("UPDATE gym_memberships SET active = ? WHERE user_id = ? AND gym_id = ?")
        .bind(active)
        .bind(user_id)
        .bind(gym_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Onboards a gym with its address and weekly hours. When `owner_id` is given
/// that user is promoted to owner and joined to the gym.
#[instrument(skip(pool, gym), fields(name = %gym.name))]
pub async fn create_gym(
    pool: &Pool<Sqlite>,
    gym: &NewGym,
    owner_id: Option<i64>,
) -> Result<Gym, AppError> {
    info!("Creating gym");
    let mut tx = pool.begin().await?;

    let gym_id = sqlx::query("INSERT INTO gyms (name, email, phone_number) VALUES (?, ?, ?)")
        .bind(&gym.name)
        .bind(&gym.email)
        .bind(&gym.phone_number)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

    sqlx::query(
        "INSERT INTO gym_addresses
            (gym_id, street_line1, street_line2, city, state, postal_code, country)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(gym_id)
    .bind(&gym.street_line1)
    .bind(&gym.street_line2)
    .bind(&gym.city)
    .bind(&gym.state)
    .bind(&gym.postal_code)
    .bind(&gym.country)
    .execute(&mut *tx)
    .await?;

    for entry in &gym.schedule {
        if !(0..=6).contains(&entry.day) {
            return Err(AppError::Validation(format!(
                "Day {} is not a valid day of the week",
                entry.day
            )));
        }

        sqlx::query(
            "INSERT INTO gym_hours (gym_id, day_of_week, open_time, close_time, is_closed)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(gym_id)
        .bind(entry.day)
        .bind(entry.open_time)
        .bind(entry.close_time)
        .bind(entry.is_closed)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(owner_id) = owner_id {
        sqlx::query("INSERT INTO gym_owners (gym_id, user_id) VALUES (?, ?)")
            .bind(gym_id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(Role::Owner.as_str())
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        insert_membership(&mut tx, owner_id, gym_id).await?;
    }

    tx.commit().await?;

    get_gym(pool, gym_id).await
}

#[instrument]
pub async fn get_gym_hours(pool: &Pool<Sqlite>, gym_id: i64) -> Result<Vec<GymHours>, AppError> {
    let rows = sqlx::query_as::<_, DbGymHours>(
        "SELECT day_of_week, open_time, close_time, is_closed
         FROM gym_hours WHERE gym_id = ? ORDER BY day_of_week",
    )
    .bind(gym_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(GymHours::from).collect())
}

/// Headline numbers for the 30 days up to and including `today`.
#[instrument]
pub async fn get_gym_analytics(
    pool: &Pool<Sqlite>,
    gym_id: i64,
    today: NaiveDate,
) -> Result<GymAnalytics, AppError> {
    info!("Computing gym analytics");
    let since = today - Duration::days(30);

    let active_members: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM gym_memberships WHERE gym_id = ? AND active = 1",
    )
    .bind(gym_id)
    .fetch_one(pool)
    .await?;

    let check_ins: i64 = sqlx::query_scalar(
        "SELECT COUNT(*)
         FROM class_attendance a
         JOIN scheduled_classes sc ON sc.id = a.scheduled_class_id
         JOIN class_templates t ON t.id = sc.template_id
         WHERE t.gym_id = ? AND sc.date >= ? AND sc.date <= ?",
    )
    .bind(gym_id)
    .bind(since)
    .bind(today)
    .fetch_one(pool)
    .await?;

    let (held, canceled): (i64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(CASE WHEN sc.is_canceled = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN sc.is_canceled = 1 THEN 1 ELSE 0 END), 0)
         FROM scheduled_classes sc
         JOIN class_templates t ON t.id = sc.template_id
         WHERE t.gym_id = ? AND sc.date >= ? AND sc.date <= ?",
    )
    .bind(gym_id)
    .bind(since)
    .bind(today)
    .fetch_one(pool)
    .await?;

    let top_classes = sqlx::query_as::<_, TemplateAttendance>(
        "SELECT t.id AS template_id, t.name, COUNT(a.id) AS check_ins
         FROM class_templates t
         JOIN scheduled_classes sc ON sc.template_id = t.id
         JOIN class_attendance a ON a.scheduled_class_id = sc.id
         WHERE t.gym_id = ? AND sc.date >= ? AND sc.date <= ?
         GROUP BY t.id, t.name
         ORDER BY check_ins DESC, t.name
         LIMIT 5",
    )
    .bind(gym_id)
    .bind(since)
    .bind(today)
    .fetch_all(pool)
    .await?;

    Ok(GymAnalytics {
        gym_id,
        active_members,
        check_ins_last_30_days: check_ins,
        classes_last_30_days: held,
        canceled_last_30_days: canceled,
        top_classes,
    })
}
