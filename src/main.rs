#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod cache;
mod db;
mod env;
mod error;
mod mailer;
mod models;
mod qr;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use std::time::Duration;

use api::{api_routes, auth_routes, default_api, health::health};
use auth::{forbidden_api, unauthorized_api};
use cache::{ClassListCache, LoginThrottle, MemoryCache};
use db::{clean_expired_reset_tokens, clean_expired_sessions};
use env::{AppConfig, load_environment};
use error::AppError;
use mailer::{LogMailer, Mailer};
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use telemetry::{TelemetryFairing, init_tracing, shutdown_telemetry};
use thiserror::Error;
use tracing::{error, info};

const CLEANUP_INITIAL_DELAY: Duration = Duration::from_secs(5);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

#[launch]
async fn rocket() -> _ {
    if let Err(err) = load_environment() {
        eprintln!("Failed to load environment files: {}", err);
    }
    init_tracing();

    match build_rocket().await {
        Ok(rocket) => rocket,
        Err(err) => {
            error!("Startup failed: {}", err);
            shutdown_telemetry();
            std::process::exit(1);
        }
    }
}

async fn build_rocket() -> Result<Rocket<Build>, Error> {
    let config = AppConfig::from_env()?;

    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(AppError::from)?;
    info!("Migrations completed successfully");

    spawn_cleanup(pool.clone());

    Ok(init_rocket(pool, config, Box::new(LogMailer)).await)
}

/// Hourly sweep of expired sessions and password reset tokens.
fn spawn_cleanup(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(CLEANUP_INITIAL_DELAY).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) if count > 0 => info!("Cleaned up {} expired sessions", count),
                Ok(_) => {}
                Err(e) => error!("Failed to clean expired sessions: {}", e),
            }

            match clean_expired_reset_tokens(&pool).await {
                Ok(count) if count > 0 => info!("Cleaned up {} expired reset tokens", count),
                Ok(_) => {}
                Err(e) => error!("Failed to clean expired reset tokens: {}", e),
            }

            tokio::time::sleep(CLEANUP_INTERVAL).await;
        }
    });
}

pub async fn init_rocket(
    pool: SqlitePool,
    config: AppConfig,
    mailer: Box<dyn Mailer>,
) -> Rocket<Build> {
    info!(frontend_url = %config.frontend_url, "Starting rolltrack");

    let class_cache: ClassListCache = Box::new(MemoryCache::new());
    let login_throttle: LoginThrottle = Box::new(MemoryCache::new());

    rocket::build()
        .manage(pool)
        .manage(config)
        .manage(class_cache)
        .manage(login_throttle)
        .manage(mailer)
        .mount("/auth", auth_routes())
        .mount("/api", api_routes())
        .mount("/", routes![health])
        .register("/", catchers![unauthorized_api, forbidden_api, default_api])
        .attach(TelemetryFairing)
        .attach(AdHoc::on_shutdown("Telemetry shutdown", |_| {
            Box::pin(async { shutdown_telemetry() })
        }))
}
