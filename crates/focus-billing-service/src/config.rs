//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default time after which an unpaid INACTIVE subscription is no longer
/// treated as a retry of the same checkout.
const DEFAULT_ABANDONED_CHECKOUT_TIMEOUT_SECONDS: u64 = 30 * 60;

/// Default upper bound on a single payment gateway call.
const DEFAULT_GATEWAY_TIMEOUT_SECONDS: u64 = 15;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string.
    pub database_url: String,

    /// Maximum database connections (default: 10).
    pub database_max_connections: u32,

    /// HS256 secret used to validate user JWTs.
    pub auth_jwt_secret: Option<String>,

    /// Razorpay key id (public, sent to checkout).
    pub razorpay_key_id: Option<String>,

    /// Razorpay key secret (API auth and payment signatures).
    pub razorpay_key_secret: Option<String>,

    /// Razorpay webhook secret.
    pub razorpay_webhook_secret: Option<String>,

    /// Whether new subscriptions can be created.
    pub subscriptions_enabled: bool,

    /// Window in which a repeated checkout replaces the previous unpaid one.
    pub abandoned_checkout_timeout: Duration,

    /// Upper bound on a single gateway call.
    pub gateway_timeout: Duration,

    /// Cross-check the gateway's subscription status during verification.
    pub verify_remote_subscription: bool,

    /// Merchant name shown in the hosted checkout.
    pub checkout_display_name: String,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Razorpay secrets file structure.
#[derive(Debug, Deserialize)]
struct RazorpaySecrets {
    key_id: String,
    key_secret: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        // Try to load Razorpay secrets from file first, then fall back to env vars
        let (razorpay_key_id, razorpay_key_secret, razorpay_webhook_secret) =
            load_razorpay_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/focus_billing".into()),
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            razorpay_key_id,
            razorpay_key_secret,
            razorpay_webhook_secret,
            subscriptions_enabled: env_flag("SUBSCRIPTIONS_ENABLED").unwrap_or(true),
            abandoned_checkout_timeout: Duration::from_secs(
                env_parse("ABANDONED_CHECKOUT_TIMEOUT_SECONDS")
                    .unwrap_or(DEFAULT_ABANDONED_CHECKOUT_TIMEOUT_SECONDS),
            ),
            gateway_timeout: Duration::from_secs(
                env_parse("GATEWAY_TIMEOUT_SECONDS").unwrap_or(DEFAULT_GATEWAY_TIMEOUT_SECONDS),
            ),
            verify_remote_subscription: env_flag("VERIFY_REMOTE_SUBSCRIPTION").unwrap_or(false),
            checkout_display_name: std::env::var("CHECKOUT_DISPLAY_NAME")
                .unwrap_or_else(|_| "Focus".into()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS").unwrap_or(30),
        }
    }

    /// The subset of configuration the lifecycle core needs.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            subscriptions_enabled: self.subscriptions_enabled,
            abandoned_checkout_timeout: self.abandoned_checkout_timeout,
            gateway_timeout: self.gateway_timeout,
            key_secret: self.razorpay_key_secret.clone().unwrap_or_default(),
            verify_remote_subscription: self.verify_remote_subscription,
            checkout_display_name: self.checkout_display_name.clone(),
        }
    }
}

/// Settings consumed by [`crate::lifecycle::SubscriptionLifecycle`].
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Whether new subscriptions can be created.
    pub subscriptions_enabled: bool,
    /// Window in which a repeated checkout replaces the previous unpaid one.
    pub abandoned_checkout_timeout: Duration,
    /// Upper bound on a single gateway call.
    pub gateway_timeout: Duration,
    /// Secret for payment signature verification.
    pub key_secret: String,
    /// Cross-check the gateway's subscription status during verification.
    pub verify_remote_subscription: bool,
    /// Merchant name shown in the hosted checkout.
    pub checkout_display_name: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        ServiceConfig::default().lifecycle()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .and_then(|s| match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

/// Load Razorpay secrets from file or environment.
fn load_razorpay_secrets() -> (Option<String>, Option<String>, Option<String>) {
    // Try multiple paths for the secrets file
    let secret_paths = [
        ".secrets/razorpay.json",
        "focus-billing/.secrets/razorpay.json",
        "../.secrets/razorpay.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<RazorpaySecrets>(Path::new(path)) {
            tracing::info!(path = %path, "Loaded Razorpay secrets from file");
            return (
                Some(secrets.key_id),
                Some(secrets.key_secret),
                secrets.webhook_secret,
            );
        }
    }

    // Fall back to environment variables
    tracing::debug!("Razorpay secrets file not found, using environment variables");
    (
        std::env::var("RAZORPAY_KEY_ID").ok(),
        std::env::var("RAZORPAY_KEY_SECRET").ok(),
        std::env::var("RAZORPAY_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, std::io::Error> {
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: "postgres://localhost/focus_billing".into(),
            database_max_connections: 10,
            auth_jwt_secret: None,
            razorpay_key_id: None,
            razorpay_key_secret: None,
            razorpay_webhook_secret: None,
            subscriptions_enabled: true,
            abandoned_checkout_timeout: Duration::from_secs(
                DEFAULT_ABANDONED_CHECKOUT_TIMEOUT_SECONDS,
            ),
            gateway_timeout: Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECONDS),
            verify_remote_subscription: false,
            checkout_display_name: "Focus".into(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn secrets_file_is_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"key_id": "rzp_test_1", "key_secret": "secret", "webhook_secret": "whsec"}}"#
        )
        .unwrap();

        let secrets: RazorpaySecrets = load_secrets_file(file.path()).unwrap();
        assert_eq!(secrets.key_id, "rzp_test_1");
        assert_eq!(secrets.webhook_secret.as_deref(), Some("whsec"));
    }

    #[test]
    fn missing_secrets_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_secrets_file::<RazorpaySecrets>(&dir.path().join("razorpay.json"))
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn lifecycle_defaults() {
        let config = LifecycleConfig::default();
        assert!(config.subscriptions_enabled);
        assert_eq!(config.abandoned_checkout_timeout, Duration::from_secs(1800));
        assert_eq!(config.gateway_timeout, Duration::from_secs(15));
        assert!(!config.verify_remote_subscription);
    }
}
