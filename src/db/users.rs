use chrono::{Local, NaiveDate};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::auth::{DbUser, Role, User};
use crate::error::AppError;
use crate::models::Belt;

use super::BCRYPT_COST;

const USER_SELECT: &str = "SELECT u.id, u.email, u.first_name, u.last_name, u.phone_number,
        u.role, b.name AS belt, u.date_enrolled, u.archived
    FROM users u
    LEFT JOIN belts b ON b.id = u.belt_id";

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub role: Role,
    pub belt_id: Option<i64>,
    pub date_of_birth: Option<NaiveDate>,
}

impl NewUser {
    pub fn member(email: &str, password: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone_number: None,
            role: Role::Member,
            belt_id: None,
            date_of_birth: None,
        }
    }
}

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!("{} WHERE u.id = ?", USER_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_email(pool: &Pool<Sqlite>, email: &str) -> Result<Option<User>, AppError> {
    info!("Finding user by email");
    let row = sqlx::query_as::<_, DbUser>(&format!("{} WHERE u.email = ?", USER_SELECT))
        .bind(email.trim())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(User::from))
}

#[instrument]
pub async fn email_exists(pool: &Pool<Sqlite>, email: &str) -> Result<bool, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(email.trim())
        .fetch_one(pool)
        .await?;

    Ok(count > 0)
}

#[instrument(skip_all, fields(email))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let hash: Option<(i64, String)> =
        sqlx::query_as("SELECT id, password FROM users WHERE email = ? AND archived = 0")
            .bind(email.trim())
            .fetch_optional(pool)
            .await?;

    let Some((user_id, hash)) = hash else {
        return Ok(None);
    };

    match bcrypt::verify(password, &hash) {
        Ok(true) => Ok(Some(get_user(pool, user_id).await?)),
        Ok(false) => Ok(None),
        Err(err) => {
            warn!(error = %err, "Stored password hash could not be verified");
            Ok(None)
        }
    }
}

/// Inserts a user on an open connection so callers can group it with other
/// writes in one transaction. A duplicate email is a `Conflict`.
pub(crate) async fn insert_user(
    conn: &mut SqliteConnection,
    user: &NewUser,
) -> Result<i64, AppError> {
    let hashed_password = bcrypt::hash(&user.password, BCRYPT_COST)?;
    let today = Local::now().date_naive();

    let res = sqlx::query(
        "INSERT INTO users
            (email, password, first_name, last_name, phone_number, role, belt_id, date_enrolled, date_of_birth)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user.email.trim())
    .bind(hashed_password)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.phone_number)
    .bind(user.role.as_str())
    .bind(user.belt_id)
    .bind(today)
    .bind(user.date_of_birth)
    .execute(&mut *conn)
    .await
    .map_err(AppError::from);

    match res {
        Ok(res) => Ok(res.last_insert_rowid()),
        Err(err) if err.is_unique_violation() => {
            Err(AppError::Conflict("Email already registered".to_string()))
        }
        Err(err) => Err(err),
    }
}

#[instrument(skip_all, fields(email = %user.email, role = %user.role))]
pub async fn create_user(pool: &Pool<Sqlite>, user: &NewUser) -> Result<i64, AppError> {
    info!("Creating new user");
    if let Some(belt_id) = user.belt_id {
        get_belt(pool, belt_id).await?;
    }

    let mut conn = pool.acquire().await?;
    insert_user(&mut conn, user).await
}

/// Creates the user and an active membership in `gym_id` atomically. Nothing
/// is persisted when the gym does not exist or the email is taken.
#[instrument(skip_all, fields(email = %user.email, gym_id))]
pub async fn create_member_with_membership(
    pool: &Pool<Sqlite>,
    user: &NewUser,
    gym_id: i64,
) -> Result<i64, AppError> {
    info!("Creating member with gym membership");
    if let Some(belt_id) = user.belt_id {
        get_belt(pool, belt_id).await?;
    }

    let mut tx = pool.begin().await?;

    let gym_exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gyms WHERE id = ?")
        .bind(gym_id)
        .fetch_one(&mut *tx)
        .await?;
    if gym_exists == 0 {
        return Err(AppError::Validation("Invalid gym ID".to_string()));
    }

    let user_id = insert_user(&mut tx, user).await?;
    super::gyms::insert_membership(&mut tx, user_id, gym_id).await?;

    tx.commit().await?;
    Ok(user_id)
}

#[instrument]
pub async fn get_belt(pool: &Pool<Sqlite>, id: i64) -> Result<Belt, AppError> {
    sqlx::query_as::<_, Belt>("SELECT id, name FROM belts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::Validation(format!("Belt with ID {} does not exist.", id)))
}

#[instrument]
pub async fn get_all_belts(pool: &Pool<Sqlite>) -> Result<Vec<Belt>, AppError> {
    let belts = sqlx::query_as::<_, Belt>("SELECT id, name FROM belts ORDER BY rank_order")
        .fetch_all(pool)
        .await?;
    Ok(belts)
}
