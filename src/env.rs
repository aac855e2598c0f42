use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub frontend_url: String,
    pub qr_logo_path: String,
    pub class_cache_ttl: Duration,
    pub session_ttl_hours: i64,
    pub reset_token_ttl_hours: i64,
    pub login_max_attempts: u32,
    pub login_window: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://rolltrack.db?mode=rwc".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            qr_logo_path: "static/logo.png".to_string(),
            class_cache_ttl: Duration::from_secs(30),
            session_ttl_hours: 1,
            reset_token_ttl_hours: 1,
            login_max_attempts: 5,
            login_window: Duration::from_secs(300),
        }
    }
}

impl AppConfig {
    /// Reads settings from the process environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            database_url: dotenvy::var("DATABASE_URL").unwrap_or(defaults.database_url),
            frontend_url: dotenvy::var("FRONTEND_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.frontend_url),
            qr_logo_path: dotenvy::var("QR_LOGO_PATH").unwrap_or(defaults.qr_logo_path),
            class_cache_ttl: Duration::from_secs(parse_var(
                "CLASS_CACHE_TTL_SECS",
                defaults.class_cache_ttl.as_secs(),
            )?),
            session_ttl_hours: parse_var("SESSION_TTL_HOURS", defaults.session_ttl_hours)?,
            reset_token_ttl_hours: parse_var(
                "RESET_TOKEN_TTL_HOURS",
                defaults.reset_token_ttl_hours,
            )?,
            login_max_attempts: parse_var("LOGIN_MAX_ATTEMPTS", defaults.login_max_attempts)?,
            login_window: Duration::from_secs(parse_var(
                "LOGIN_WINDOW_SECS",
                defaults.login_window.as_secs(),
            )?),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenvy::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a number, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 4] = [
        "FRONTEND_URL",
        "CLASS_CACHE_TTL_SECS",
        "LOGIN_MAX_ATTEMPTS",
        "QR_LOGO_PATH",
    ];

    #[test]
    #[serial]
    fn defaults_apply_when_unset() {
        temp_env::with_vars_unset(VARS, || {
            let config = AppConfig::from_env().expect("defaults should parse");
            assert_eq!(config.frontend_url, "http://localhost:3000");
            assert_eq!(config.class_cache_ttl, Duration::from_secs(30));
            assert_eq!(config.login_max_attempts, 5);
        });
    }

    #[test]
    #[serial]
    fn overrides_are_read_and_trailing_slash_trimmed() {
        temp_env::with_vars(
            [
                ("FRONTEND_URL", Some("https://checkin.example.com/")),
                ("CLASS_CACHE_TTL_SECS", Some("45")),
                ("LOGIN_MAX_ATTEMPTS", Some("3")),
                ("QR_LOGO_PATH", Some("/srv/logo.jpeg")),
            ],
            || {
                let config = AppConfig::from_env().expect("overrides should parse");
                assert_eq!(config.frontend_url, "https://checkin.example.com");
                assert_eq!(config.class_cache_ttl, Duration::from_secs(45));
                assert_eq!(config.login_max_attempts, 3);
                assert_eq!(config.qr_logo_path, "/srv/logo.jpeg");
            },
        );
    }

    #[test]
    #[serial]
    fn non_numeric_values_are_rejected() {
        temp_env::with_var("CLASS_CACHE_TTL_SECS", Some("soon"), || {
            let err = AppConfig::from_env().expect_err("should fail");
            assert!(err.to_string().contains("CLASS_CACHE_TTL_SECS"));
        });
    }
}
