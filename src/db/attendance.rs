use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::error::AppError;
use crate::models::{
    AttendanceHistoryEntry, AttendanceRecord, CheckInConfirmation, DbAttendanceHistoryRow,
    NewGuestVisit,
};

use super::{fetch_class_listing, find_user_by_email, has_active_membership};

#[instrument]
pub async fn get_attendance_record(
    pool: &Pool<Sqlite>,
    user_id: i64,
    class_id: i64,
) -> Result<Option<AttendanceRecord>, AppError> {
    let record = sqlx::query_as::<_, AttendanceRecord>(
        "SELECT id, user_id, scheduled_class_id, check_in_time
         FROM class_attendance WHERE user_id = ? AND scheduled_class_id = ?",
    )
    .bind(user_id)
    .bind(class_id)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

#[instrument]
pub async fn count_attendance_for_class(pool: &Pool<Sqlite>, class_id: i64) -> Result<i64, AppError> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM class_attendance WHERE scheduled_class_id = ?")
        .bind(class_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Records that the user with `email` attended `class_id`.
///
/// Checks run in order: the student exists and is not archived, the class
/// exists, it is not canceled, its template resolves, it belongs to `gym_id`
/// when one is given and the student is an active member there. The attendance row is then
/// created if absent. The UNIQUE (user, class) constraint with
/// `ON CONFLICT DO NOTHING` makes concurrent calls converge on one row, and
/// every call reports that row's original timestamp.
#[instrument(skip(pool))]
pub async fn record_check_in(
    pool: &Pool<Sqlite>,
    email: &str,
    class_id: i64,
    gym_id: Option<i64>,
) -> Result<CheckInConfirmation, AppError> {
    info!("Recording check-in");

    let student = find_user_by_email(pool, email)
        .await?
        .filter(|user| !user.archived)
        .ok_or_else(|| AppError::NotFound("Student not found".to_string()))?;

    let class = fetch_class_listing(pool, class_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Class not found".to_string()))?;

    if class.is_canceled {
        return Err(AppError::Conflict(
            "This class has been canceled".to_string(),
        ));
    }

    let (Some(class_name), Some(class_gym_id)) = (class.template_name.clone(), class.gym_id) else {
        warn!(class_id, template_id = ?class.template_id, "Check-in for class without a template");
        return Err(AppError::NotFound("Class template not found".to_string()));
    };

    if let Some(gym_id) = gym_id {
        if class_gym_id != gym_id {
            return Err(AppError::Validation(
                "This class does not belong to the specified gym".to_string(),
            ));
        }

        if !has_active_membership(pool, student.id, gym_id).await? {
            return Err(AppError::Authorization(
                "You don't have access to this gym".to_string(),
            ));
        }
    }

    let inserted = sqlx::query(
        "INSERT INTO class_attendance (user_id, scheduled_class_id, check_in_time)
         VALUES (?, ?, ?)
         ON CONFLICT (user_id, scheduled_class_id) DO NOTHING",
    )
    .bind(student.id)
    .bind(class_id)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .rows_affected();

    let record = get_attendance_record(pool, student.id, class_id)
        .await?
        .ok_or_else(|| {
            AppError::Internal(format!(
                "Attendance for user {} in class {} missing after insert",
                student.id, class_id
            ))
        })?;

    if inserted == 0 {
        info!(record_id = record.id, "Student already checked in");
    } else {
        info!(record_id = record.id, "Check-in recorded");
    }

    Ok(CheckInConfirmation {
        student_name: student.display_name(),
        class_name,
        date: class.date,
        checkin_time: record.check_in_time,
        already_checked_in: inserted == 0,
    })
}

/// Attendance for one user, most recent check-in first.
#[instrument]
pub async fn get_attendance_history(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<AttendanceHistoryEntry>, AppError> {
    info!("Loading attendance history");
    let rows = sqlx::query_as::<_, DbAttendanceHistoryRow>(
        "SELECT a.scheduled_class_id, sc.date, sc.start_time, sc.end_time, a.check_in_time,
                t.name AS template_name, t.description
         FROM class_attendance a
         JOIN scheduled_classes sc ON sc.id = a.scheduled_class_id
         LEFT JOIN class_templates t ON t.id = sc.template_id
         WHERE a.user_id = ?
         ORDER BY a.check_in_time DESC, a.id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(AttendanceHistoryEntry::from).collect())
}

#[instrument(skip(pool, visit), fields(email = %visit.email))]
pub async fn record_guest_visit(pool: &Pool<Sqlite>, visit: &NewGuestVisit) -> Result<i64, AppError> {
    info!("Recording guest visit");
    let id = sqlx::query(
        "INSERT INTO guest_visits
            (gym_id, name, email, phone, experience_level, referral_source,
             first_time_visit, marketing_consent, other_dojos, visited_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(visit.gym_id)
    .bind(&visit.name)
    .bind(&visit.email)
    .bind(&visit.phone)
    .bind(&visit.experience_level)
    .bind(&visit.referral_source)
    .bind(visit.first_time_visit)
    .bind(visit.marketing_consent)
    .bind(&visit.other_dojos)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(id)
}
