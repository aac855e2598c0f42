use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::error;

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

#[get("/health")]
pub async fn health(db: &State<Pool<Sqlite>>) -> Custom<Json<HealthResponse>> {
    match sqlx::query("SELECT 1").execute(db.inner()).await {
        Ok(_) => Custom(
            Status::Ok,
            Json(HealthResponse {
                status: "ok".to_string(),
                database: "ok".to_string(),
            }),
        ),
        Err(err) => {
            error!(error = %err, "Health check database probe failed");
            Custom(
                Status::ServiceUnavailable,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    database: "unavailable".to_string(),
                }),
            )
        }
    }
}
