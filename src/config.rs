//! Environment-backed configuration for the outbound integrations.

use crate::vouchers::notify::DispatchPolicy;
use std::env;
use std::time::Duration;

pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    Duration::from_millis(env_u64(key, default_millis))
}

pub(crate) fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// SMTP settings for voucher mails.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub from_mail: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Use STARTTLS instead of implicit TLS.
    pub starttls: bool,
    pub timeout: Duration,
}

impl MailConfig {
    pub fn from_env() -> Self {
        let port = env_u64("SMTP_PORT", 587);
        Self {
            from_mail: env_string("FROM_MAIL", "noreply@mulearn.org"),
            smtp_host: env_string("SMTP_HOST", "localhost"),
            smtp_port: u16::try_from(port).unwrap_or(587),
            smtp_username: env_optional("SMTP_USERNAME"),
            smtp_password: env_optional("SMTP_PASSWORD"),
            starttls: env_bool("SMTP_STARTTLS", port != 465),
            timeout: env_duration_millis("SMTP_TIMEOUT_MS", 30_000),
        }
    }
}

/// Location of the voucher image render service.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl RenderConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("VOUCHER_RENDER_URL", "http://voucher-render:8080"),
            request_timeout: env_duration_millis("VOUCHER_RENDER_TIMEOUT_MS", 15_000),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportConfig {
    pub dispatch_policy: DispatchPolicy,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        let dispatch_policy = match env_optional("VOUCHER_DISPATCH_POLICY") {
            Some(raw) => raw.parse().unwrap_or_else(|err| {
                log::warn!("{err}; falling back to {}", DispatchPolicy::default());
                DispatchPolicy::default()
            }),
            None => DispatchPolicy::default(),
        };
        Self { dispatch_policy }
    }
}
