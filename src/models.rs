use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const ALL_LEVELS: &str = "All Levels";

pub fn format_hhmm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

#[derive(Serialize, Deserialize, sqlx::FromRow, Clone, Debug)]
pub struct Belt {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize, Deserialize, sqlx::FromRow, Clone, Debug)]
pub struct Gym {
    pub id: i64,
    pub name: String,
    pub alternate_name: Option<String>,
    pub email: String,
    pub phone_number: String,
    pub has_waiver: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GymHours {
    pub day: i64,
    pub open: Option<String>,
    pub close: Option<String>,
    pub is_closed: bool,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbGymHours {
    pub day_of_week: i64,
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
    pub is_closed: bool,
}

impl From<DbGymHours> for GymHours {
    fn from(db: DbGymHours) -> Self {
        let open = db.open_time.map(format_hhmm);
        let close = db.close_time.map(format_hhmm);
        Self {
            day: db.day_of_week,
            is_closed: db.is_closed || open.is_none() || close.is_none(),
            open,
            close,
        }
    }
}

/// One weekday entry of a gym's opening schedule as submitted by the owner.
#[derive(Deserialize, Clone, Debug)]
pub struct GymHoursInput {
    pub day: i64,
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
    #[serde(default)]
    pub is_closed: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClassTemplate {
    pub id: i64,
    pub gym_id: i64,
    pub gym_name: Option<String>,
    pub level_id: Option<i64>,
    pub level: String,
    pub name: String,
    pub description: String,
    pub duration_minutes: i64,
    pub max_capacity: i64,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbClassTemplate {
    pub id: i64,
    pub gym_id: i64,
    pub gym_name: Option<String>,
    pub level_id: Option<i64>,
    pub level_name: Option<String>,
    pub name: String,
    pub description: String,
    pub duration_minutes: i64,
    pub max_capacity: i64,
}

impl From<DbClassTemplate> for ClassTemplate {
    fn from(db: DbClassTemplate) -> Self {
        Self {
            id: db.id,
            gym_id: db.gym_id,
            gym_name: db.gym_name,
            level_id: db.level_id,
            level: db.level_name.unwrap_or_else(|| ALL_LEVELS.to_string()),
            name: db.name,
            description: db.description,
            duration_minutes: db.duration_minutes,
            max_capacity: db.max_capacity,
        }
    }
}

#[derive(Serialize, Deserialize, sqlx::FromRow, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledClass {
    pub id: i64,
    pub template_id: Option<i64>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_canceled: bool,
    pub notes: Option<String>,
}

/// A scheduled class joined with its template, as loaded for listing.
/// Template columns are `None` when the reference does not resolve.
#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbClassListing {
    pub id: i64,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_canceled: bool,
    pub notes: Option<String>,
    pub template_id: Option<i64>,
    pub template_name: Option<String>,
    pub description: Option<String>,
    pub max_capacity: Option<i64>,
    pub gym_id: Option<i64>,
    pub gym_name: Option<String>,
    pub level_name: Option<String>,
    pub current_attendance: i64,
}

impl DbClassListing {
    /// The resolved template fields, or an error naming the broken class.
    fn resolved_template(&self) -> Result<(String, i64, i64), AppError> {
        match (&self.template_name, self.max_capacity, self.gym_id) {
            (Some(name), Some(capacity), Some(gym_id)) => Ok((name.clone(), capacity, gym_id)),
            _ => Err(AppError::Internal(format!(
                "Scheduled class {} references template {:?} which could not be resolved",
                self.id, self.template_id
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableClass {
    pub id: i64,
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    pub level: String,
    pub max_capacity: i64,
    pub current_attendance: i64,
    pub description: String,
    pub notes: Option<String>,
    pub gym_id: i64,
}

impl TryFrom<DbClassListing> for AvailableClass {
    type Error = AppError;

    fn try_from(row: DbClassListing) -> Result<Self, Self::Error> {
        let (name, max_capacity, gym_id) = row.resolved_template()?;
        Ok(Self {
            id: row.id,
            name,
            start_time: format_hhmm(row.start_time),
            end_time: format_hhmm(row.end_time),
            level: row.level_name.unwrap_or_else(|| ALL_LEVELS.to_string()),
            max_capacity,
            current_attendance: row.current_attendance,
            description: row.description.unwrap_or_default(),
            notes: row.notes,
            gym_id,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClassDetails {
    pub id: i64,
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    pub date: NaiveDate,
    pub is_canceled: bool,
    pub notes: String,
    pub description: String,
    pub max_capacity: i64,
    pub current_attendance: i64,
    pub gym_id: i64,
    pub gym_name: Option<String>,
    pub level: Option<String>,
}

impl TryFrom<DbClassListing> for ClassDetails {
    type Error = AppError;

    fn try_from(row: DbClassListing) -> Result<Self, Self::Error> {
        let (name, max_capacity, gym_id) = row
            .resolved_template()
            .map_err(|_| AppError::Validation("Class has incomplete data".to_string()))?;
        Ok(Self {
            id: row.id,
            name,
            start_time: format_hhmm(row.start_time),
            end_time: format_hhmm(row.end_time),
            date: row.date,
            is_canceled: row.is_canceled,
            notes: row.notes.unwrap_or_default(),
            description: row.description.unwrap_or_default(),
            max_capacity,
            current_attendance: row.current_attendance,
            gym_id,
            gym_name: row.gym_name,
            level: row.level_name,
        })
    }
}

#[derive(Serialize, Deserialize, sqlx::FromRow, Clone, Debug, PartialEq)]
pub struct AttendanceRecord {
    pub id: i64,
    pub user_id: i64,
    pub scheduled_class_id: i64,
    pub check_in_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CheckInConfirmation {
    pub student_name: String,
    pub class_name: String,
    pub date: NaiveDate,
    pub checkin_time: DateTime<Utc>,
    pub already_checked_in: bool,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbAttendanceHistoryRow {
    pub scheduled_class_id: i64,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub check_in_time: DateTime<Utc>,
    pub template_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceHistoryEntry {
    pub id: i64,
    pub date: NaiveDate,
    pub check_in_time: String,
    pub class_name: String,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl From<DbAttendanceHistoryRow> for AttendanceHistoryEntry {
    fn from(row: DbAttendanceHistoryRow) -> Self {
        let has_template = row.template_name.is_some();
        Self {
            id: row.scheduled_class_id,
            date: row.date,
            check_in_time: row.check_in_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            class_name: row.template_name.unwrap_or_else(|| "Class".to_string()),
            description: row.description,
            start_time: has_template.then(|| format_hhmm(row.start_time)),
            end_time: has_template.then(|| format_hhmm(row.end_time)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WaiverStatus {
    Pending,
    Signed,
    Rejected,
    Expired,
}

impl WaiverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaiverStatus::Pending => "pending",
            WaiverStatus::Signed => "signed",
            WaiverStatus::Rejected => "rejected",
            WaiverStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WaiverStatus::Pending),
            "signed" => Some(WaiverStatus::Signed),
            "rejected" => Some(WaiverStatus::Rejected),
            "expired" => Some(WaiverStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, sqlx::FromRow, Clone, Debug)]
pub struct GymWaiver {
    pub id: i64,
    pub gym_id: i64,
    pub title: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WaiverSignature {
    pub waiver_id: i64,
    pub user_id: i64,
    pub status: WaiverStatus,
    pub signed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbWaiverSignature {
    pub waiver_id: i64,
    pub user_id: i64,
    pub status: String,
    pub signed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbWaiverSignature> for WaiverSignature {
    type Error = AppError;

    fn try_from(db: DbWaiverSignature) -> Result<Self, Self::Error> {
        let status = WaiverStatus::parse(&db.status).ok_or_else(|| {
            AppError::Internal(format!("Unknown waiver status '{}'", db.status))
        })?;
        Ok(Self {
            waiver_id: db.waiver_id,
            user_id: db.user_id,
            status,
            signed_at: db.signed_at,
        })
    }
}

#[derive(Clone, Debug)]
pub struct NewGuestVisit {
    pub gym_id: Option<i64>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub experience_level: String,
    pub referral_source: String,
    pub first_time_visit: bool,
    pub marketing_consent: bool,
    pub other_dojos: String,
}

#[derive(Clone, Debug)]
pub struct NewGym {
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub street_line1: String,
    pub street_line2: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub schedule: Vec<GymHoursInput>,
}

#[derive(Clone, Debug)]
pub struct NewTemplate {
    pub gym_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: Option<i64>,
    pub max_capacity: Option<i64>,
    pub level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct TemplateUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub duration_minutes: Option<i64>,
    pub max_capacity: Option<i64>,
    pub level: Option<String>,
}

#[derive(Serialize, Deserialize, sqlx::FromRow, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAttendance {
    pub template_id: i64,
    pub name: String,
    pub check_ins: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GymAnalytics {
    pub gym_id: i64,
    pub active_members: i64,
    pub check_ins_last_30_days: i64,
    pub classes_last_30_days: i64,
    pub canceled_last_30_days: i64,
    pub top_classes: Vec<TemplateAttendance>,
}
