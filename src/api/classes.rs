use chrono::{Local, NaiveDate};
use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use crate::auth::{Permission, User};
use crate::cache::ClassListCache;
use crate::db::{
    cancel_scheduled_class, create_scheduled_classes, create_template, delete_template,
    fetch_class_listing, get_available_classes, get_class_details, get_template, list_templates,
    update_template,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::{
    AvailableClass, ClassDetails, ClassTemplate, NewTemplate, ScheduledClass, TemplateUpdate,
};
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PermissionCheckExt, ToValidationResponse, required,
};

use super::{parse_time, require_gym_staff};

#[derive(Serialize, Deserialize, Debug)]
pub struct AvailableClassesResponse {
    pub success: bool,
    pub classes: Vec<AvailableClass>,
}

async fn available_classes(
    db: &Pool<Sqlite>,
    cache: &ClassListCache,
    config: &AppConfig,
    gym_id: Option<i64>,
) -> Result<Json<AvailableClassesResponse>, ApiError> {
    let today = Local::now().date_naive();
    let classes = get_available_classes(db, &**cache, gym_id, today, config.class_cache_ttl)
        .await
        .validate_custom()?;

    Ok(Json(AvailableClassesResponse {
        success: true,
        classes,
    }))
}

#[get("/available_classes_today")]
pub async fn api_available_classes_today(
    db: &State<Pool<Sqlite>>,
    cache: &State<ClassListCache>,
    config: &State<AppConfig>,
) -> Result<Json<AvailableClassesResponse>, ApiError> {
    available_classes(db, cache, config, None).await
}

#[get("/available_classes_today/<gym_id>")]
pub async fn api_available_classes_for_gym(
    gym_id: i64,
    db: &State<Pool<Sqlite>>,
    cache: &State<ClassListCache>,
    config: &State<AppConfig>,
) -> Result<Json<AvailableClassesResponse>, ApiError> {
    available_classes(db, cache, config, Some(gym_id)).await
}

#[get("/class_details/<class_id>")]
pub async fn api_class_details(
    class_id: i64,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ClassDetails>, ApiError> {
    let details = get_class_details(db, class_id).await.validate_custom()?;
    Ok(Json(details))
}

#[get("/templates?<gym_id>")]
pub async fn api_list_templates(
    gym_id: Option<i64>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ClassTemplate>>, ApiError> {
    user.require_permission(Permission::ManageSchedule)
        .validate_custom()?;

    if let Some(gym_id) = gym_id {
        require_gym_staff(db, &user, gym_id).await?;
    }

    let templates = list_templates(db, gym_id).await.validate_custom()?;
    Ok(Json(templates))
}

#[derive(Deserialize, Validate)]
pub struct CreateTemplateRequest {
    pub gym_id: i64,
    #[validate(length(min = 1, max = 100, message = "Template name is required"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 1, message = "Duration must be at least one minute"))]
    pub duration_minutes: Option<i64>,
    #[validate(range(min = 1, message = "Capacity must be at least one"))]
    pub max_capacity: Option<i64>,
    pub level: Option<String>,
}

#[post("/templates", data = "<request>")]
pub async fn api_create_template(
    request: Json<CreateTemplateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<ClassTemplate>>, ApiError> {
    user.require_permission(Permission::ManageTemplates)
        .validate_custom()?;
    let validated = request.validate_custom()?;
    require_gym_staff(db, &user, validated.gym_id).await?;

    let template = create_template(
        db,
        &NewTemplate {
            gym_id: validated.gym_id,
            name: validated.name.trim().to_string(),
            description: validated.description,
            duration_minutes: validated.duration_minutes,
            max_capacity: validated.max_capacity,
            level: validated.level,
        },
    )
    .await
    .validate_custom()?;

    Ok(Custom(Status::Created, Json(template)))
}

#[derive(Deserialize, Validate)]
pub struct UpdateTemplateRequest {
    #[validate(length(min = 1, max = 100, message = "Template name cannot be empty"))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 1, message = "Duration must be at least one minute"))]
    pub duration_minutes: Option<i64>,
    #[validate(range(min = 1, message = "Capacity must be at least one"))]
    pub max_capacity: Option<i64>,
    pub level: Option<String>,
}

#[put("/templates/<template_id>", data = "<request>")]
pub async fn api_update_template(
    template_id: i64,
    request: Json<UpdateTemplateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ClassTemplate>, ApiError> {
    user.require_permission(Permission::ManageTemplates)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let existing = get_template(db, template_id).await.validate_custom()?;
    require_gym_staff(db, &user, existing.gym_id).await?;

    let update = TemplateUpdate {
        name: validated.name,
        description: validated.description,
        duration_minutes: validated.duration_minutes,
        max_capacity: validated.max_capacity,
        level: validated.level,
    };

    let template = update_template(db, template_id, &update)
        .await
        .validate_custom()?;
    Ok(Json(template))
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTemplateResponse {
    pub success: bool,
    pub message: String,
    pub detached_classes: u64,
}

#[delete("/templates/<template_id>")]
pub async fn api_delete_template(
    template_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<DeleteTemplateResponse>, ApiError> {
    user.require_permission(Permission::ManageTemplates)
        .validate_custom()?;

    let existing = get_template(db, template_id).await.validate_custom()?;
    require_gym_staff(db, &user, existing.gym_id).await?;

    let detached_classes = delete_template(db, template_id).await.validate_custom()?;

    Ok(Json(DeleteTemplateResponse {
        success: true,
        message: "Template deleted successfully".to_string(),
        detached_classes,
    }))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleClassRequest {
    pub template_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub notes: Option<String>,
    #[validate(range(max = 52, message = "Classes can repeat for at most 52 weeks"))]
    #[serde(default)]
    pub repeat_weeks: u32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ScheduleClassResponse {
    pub success: bool,
    pub classes: Vec<ScheduledClass>,
}

/// Schedules a class from a template, optionally repeating weekly.
#[post("/classes", data = "<request>")]
pub async fn api_schedule_classes(
    request: Json<ScheduleClassRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<ScheduleClassResponse>>, ApiError> {
    user.require_permission(Permission::ManageSchedule)
        .validate_custom()?;
    let validated = request.validate_custom()?;

    let missing = "Missing required fields";
    let template_id = required(validated.template_id, "templateId", missing)?;
    let date = required(validated.date, "date", missing)?;
    let start_time = parse_time(
        &required(validated.start_time, "startTime", missing)?,
        "startTime",
    )?;
    let end_time = parse_time(
        &required(validated.end_time, "endTime", missing)?,
        "endTime",
    )?;

    let template = get_template(db, template_id).await.validate_custom()?;
    require_gym_staff(db, &user, template.gym_id).await?;

    let classes = create_scheduled_classes(
        db,
        template_id,
        date,
        start_time,
        end_time,
        validated.notes,
        validated.repeat_weeks,
    )
    .await
    .validate_custom()?;

    info!(template_id, count = classes.len(), "Scheduled classes");

    Ok(Custom(
        Status::Created,
        Json(ScheduleClassResponse {
            success: true,
            classes,
        }),
    ))
}

#[post("/classes/<class_id>/cancel")]
pub async fn api_cancel_class(
    class_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<super::MessageResponse>, ApiError> {
    user.require_permission(Permission::ManageSchedule)
        .validate_custom()?;

    let class = fetch_class_listing(db, class_id)
        .await
        .validate_custom()?
        .ok_or_else(|| AppError::NotFound("Class not found".to_string()).to_validation_response())?;

    match class.gym_id {
        Some(gym_id) => require_gym_staff(db, &user, gym_id).await?,
        // Detached classes have no gym to check staff against.
        None => user
            .require_permission(Permission::ManageGym)
            .validate_custom()?,
    }

    cancel_scheduled_class(db, class_id).await.validate_custom()?;
    info!(class_id, "Class canceled");

    Ok(super::MessageResponse::ok("Class canceled"))
}
