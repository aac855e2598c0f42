use tracing::{debug, info};

use crate::error::AppError;

/// Outbound email. Delivery is best-effort from the caller's point of view:
/// a failure surfaces as an `AppError` and nothing is retried.
#[rocket::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError>;
}

/// Writes messages to the log instead of sending them.
pub struct LogMailer;

#[rocket::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AppError> {
        info!(to = %to, subject = %subject, "Outgoing email");
        debug!(to = %to, body = %body, "Outgoing email body");
        Ok(())
    }
}

pub fn password_reset_link(frontend_url: &str, token: &str) -> String {
    format!("{}/reset-password/{}", frontend_url.trim_end_matches('/'), token)
}
