use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{debug, info, instrument, warn};

use crate::cache::TtlCache;
use crate::error::AppError;
use crate::models::{
    AvailableClass, ClassDetails, ClassTemplate, DbClassListing, DbClassTemplate, NewTemplate,
    ScheduledClass, TemplateUpdate,
};

const TEMPLATE_SELECT: &str = "SELECT t.id, t.gym_id, g.name AS gym_name, t.level_id,
        l.name AS level_name, t.name, t.description, t.duration_minutes, t.max_capacity
    FROM class_templates t
    LEFT JOIN gyms g ON g.id = t.gym_id
    LEFT JOIN class_levels l ON l.id = t.level_id";

const LISTING_SELECT: &str = "SELECT sc.id, sc.date, sc.start_time, sc.end_time, sc.is_canceled,
        sc.notes, sc.template_id, t.name AS template_name, t.description, t.max_capacity,
        t.gym_id, g.name AS gym_name, l.name AS level_name,
        (SELECT COUNT(*) FROM class_attendance a WHERE a.scheduled_class_id = sc.id)
            AS current_attendance
    FROM scheduled_classes sc
    LEFT JOIN class_templates t ON t.id = sc.template_id
    LEFT JOIN gyms g ON g.id = t.gym_id
    LEFT JOIN class_levels l ON l.id = t.level_id";

const SCHEDULED_SELECT: &str =
    "SELECT id, template_id, date, start_time, end_time, is_canceled, notes FROM scheduled_classes";

pub const DEFAULT_DURATION_MINUTES: i64 = 60;
pub const DEFAULT_MAX_CAPACITY: i64 = 20;

/// Looks up a level by name within a gym, creating it on first use.
async fn get_or_create_level(
    conn: &mut SqliteConnection,
    gym_id: i64,
    name: &str,
) -> Result<i64, AppError> {
    sqlx::query(
        "INSERT INTO class_levels (gym_id, name, description) VALUES (?, ?, ?)
         ON CONFLICT (gym_id, name) DO NOTHING",
    )
    .bind(gym_id)
    .bind(name)
    .bind(format!("{} level", name))
    .execute(&mut *conn)
    .await?;

    let id = sqlx::query_scalar("SELECT id FROM class_levels WHERE gym_id = ? AND name = ?")
        .bind(gym_id)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

#[instrument]
pub async fn list_templates(
    pool: &Pool<Sqlite>,
    gym_id: Option<i64>,
) -> Result<Vec<ClassTemplate>, AppError> {
    info!("Listing class templates");
    let rows = sqlx::query_as::<_, DbClassTemplate>(&format!(
        "{} WHERE (?1 IS NULL OR t.gym_id = ?1) ORDER BY t.name, t.id",
        TEMPLATE_SELECT
    ))
    .bind(gym_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ClassTemplate::from).collect())
}

#[instrument]
pub async fn get_template(pool: &Pool<Sqlite>, template_id: i64) -> Result<ClassTemplate, AppError> {
    let row = sqlx::query_as::<_, DbClassTemplate>(&format!("{} WHERE t.id = ?", TEMPLATE_SELECT))
        .bind(template_id)
        .fetch_optional(pool)
        .await?;

    row.map(ClassTemplate::from)
        .ok_or_else(|| AppError::NotFound(format!("Template {} not found", template_id)))
}

#[instrument(skip(pool))]
pub async fn create_template(
    pool: &Pool<Sqlite>,
    template: &NewTemplate,
) -> Result<ClassTemplate, AppError> {
    info!(name = %template.name, gym_id = template.gym_id, "Creating class template");
    let mut tx = pool.begin().await?;

    let level_id = match template.level.as_deref() {
        Some(level) if !level.trim().is_empty() => {
            Some(get_or_create_level(&mut tx, template.gym_id, level.trim()).await?)
        }
        _ => None,
    };

    let description = template
        .description
        .clone()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| format!("{} template", template.name));

    let template_id = sqlx::query(
        "INSERT INTO class_templates
            (gym_id, level_id, name, description, duration_minutes, max_capacity)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(template.gym_id)
    .bind(level_id)
    .bind(&template.name)
    .bind(description)
    .bind(template.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES))
    .bind(template.max_capacity.unwrap_or(DEFAULT_MAX_CAPACITY))
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    tx.commit().await?;

    get_template(pool, template_id).await
}

#[instrument(skip(pool))]
pub async fn update_template(
    pool: &Pool<Sqlite>,
    template_id: i64,
    update: &TemplateUpdate,
) -> Result<ClassTemplate, AppError> {
    info!("Updating class template");
    let current = get_template(pool, template_id).await?;

    let mut tx = pool.begin().await?;

    let level_id = match update.level.as_deref() {
        Some(level) if level.trim().is_empty() => None,
        Some(level) => Some(get_or_create_level(&mut tx, current.gym_id, level.trim()).await?),
        None => current.level_id,
    };

    sqlx::query(
        "UPDATE class_templates
         SET name = ?, description = ?, duration_minutes = ?, max_capacity = ?, level_id = ?
         WHERE id = ?",
    )
    .bind(update.name.as_ref().unwrap_or(&current.name))
    .bind(update.description.as_ref().unwrap_or(&current.description))
    .bind(update.duration_minutes.unwrap_or(current.duration_minutes))
    .bind(update.max_capacity.unwrap_or(current.max_capacity))
    .bind(level_id)
    .bind(template_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    get_template(pool, template_id).await
}

/// Deletes a template. Its scheduled classes are detached first, in the same
/// transaction, so past attendance survives. Returns the number detached.
#[instrument(skip(pool))]
pub async fn delete_template(pool: &Pool<Sqlite>, template_id: i64) -> Result<u64, AppError> {
    info!("Deleting class template");
    let mut tx = pool.begin().await?;

    let detached = sqlx::query("UPDATE scheduled_classes SET template_id = NULL WHERE template_id = ?")
        .bind(template_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let deleted = sqlx::query("DELETE FROM class_templates WHERE id = ?")
        .bind(template_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound(format!(
            "Template {} not found",
            template_id
        )));
    }

    tx.commit().await?;
    info!(detached, "Detached scheduled classes from deleted template");
    Ok(detached)
}

/// Schedules `template_id` on `date`, then once a week for `repeat_weeks`
/// further weeks.
#[instrument(skip(pool))]
pub async fn create_scheduled_classes(
    pool: &Pool<Sqlite>,
    template_id: i64,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    notes: Option<String>,
    repeat_weeks: u32,
) -> Result<Vec<ScheduledClass>, AppError> {
    info!("Scheduling classes");
    if end_time <= start_time {
        return Err(AppError::Validation(
            "End time must be after start time".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let mut ids = Vec::with_capacity(repeat_weeks as usize + 1);

    for week in 0..=repeat_weeks {
        let occurrence = date + ChronoDuration::weeks(i64::from(week));
        let id = sqlx::query(
            "INSERT INTO scheduled_classes (template_id, date, start_time, end_time, notes)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(template_id)
        .bind(occurrence)
        .bind(start_time)
        .bind(end_time)
        .bind(&notes)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        ids.push(id);
    }

    tx.commit().await?;

    let mut classes = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(class) = get_scheduled_class(pool, id).await? {
            classes.push(class);
        }
    }
    Ok(classes)
}

#[instrument]
pub async fn get_scheduled_class(
    pool: &Pool<Sqlite>,
    class_id: i64,
) -> Result<Option<ScheduledClass>, AppError> {
    let class = sqlx::query_as::<_, ScheduledClass>(&format!("{} WHERE id = ?", SCHEDULED_SELECT))
        .bind(class_id)
        .fetch_optional(pool)
        .await?;
    Ok(class)
}

/// Flags a class as canceled. Classes are never deleted.
#[instrument]
pub async fn cancel_scheduled_class(pool: &Pool<Sqlite>, class_id: i64) -> Result<(), AppError> {
    info!("Canceling scheduled class");
    let res = sqlx::query("UPDATE scheduled_classes SET is_canceled = 1 WHERE id = ?")
        .bind(class_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound("Class not found".to_string()));
    }
    Ok(())
}

#[instrument]
pub async fn fetch_class_listing(
    pool: &Pool<Sqlite>,
    class_id: i64,
) -> Result<Option<DbClassListing>, AppError> {
    let row = sqlx::query_as::<_, DbClassListing>(&format!("{} WHERE sc.id = ?", LISTING_SELECT))
        .bind(class_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

#[instrument]
pub async fn get_class_details(pool: &Pool<Sqlite>, class_id: i64) -> Result<ClassDetails, AppError> {
    let row = fetch_class_listing(pool, class_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Class not found".to_string()))?;

    ClassDetails::try_from(row)
}

pub fn availability_cache_key(today: NaiveDate, gym_id: Option<i64>) -> String {
    match gym_id {
        Some(gym_id) => format!("available_classes_{}_{}", today, gym_id),
        None => format!("available_classes_{}", today),
    }
}

/// Today's bookable classes, ordered by start time. Served from `cache` when
/// a fresh entry exists; otherwise recomputed and stored for `ttl`.
#[instrument(skip(pool, cache))]
pub async fn get_available_classes(
    pool: &Pool<Sqlite>,
    cache: &dyn TtlCache<Vec<AvailableClass>>,
    gym_id: Option<i64>,
    today: NaiveDate,
    ttl: Duration,
) -> Result<Vec<AvailableClass>, AppError> {
    let cache_key = availability_cache_key(today, gym_id);
    if let Some(classes) = cache.get(&cache_key) {
        debug!(key = %cache_key, "Available classes served from cache");
        return Ok(classes);
    }

    info!("Loading available classes");
    let rows = sqlx::query_as::<_, DbClassListing>(&format!(
        "{} WHERE sc.date = ?1
            AND sc.is_canceled = 0
            AND sc.template_id IS NOT NULL
            AND (?2 IS NULL OR t.gym_id = ?2)
         ORDER BY sc.start_time, sc.id",
        LISTING_SELECT
    ))
    .bind(today)
    .bind(gym_id)
    .fetch_all(pool)
    .await?;

    let mut classes = Vec::with_capacity(rows.len());
    for row in rows {
        let class_id = row.id;
        match AvailableClass::try_from(row) {
            Ok(class) => classes.push(class),
            Err(err) => {
                warn!(class_id, error = %err, "Skipping class with unresolved template");
            }
        }
    }

    cache.set(&cache_key, classes.clone(), ttl);
    Ok(classes)
}
