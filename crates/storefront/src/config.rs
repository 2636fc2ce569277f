//! Storefront engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `HEARTH_API_URL` - Base URL of the REST backend (e.g., `https://api.example.es/api`)
//!
//! ## Optional
//! - `HEARTH_API_TOKEN` - Bearer token of an authenticated customer session
//! - `HEARTH_USER_ID` - Customer id paired with the token
//! - `HEARTH_USER_EMAIL` - Customer email paired with the token
//! - `HEARTH_REQUEST_TIMEOUT_SECS` - Timeout for every outbound call (default: 15)
//! - `HEARTH_GEOCODER_URL` - Postal-code lookup service (default: Nominatim)
//! - `HEARTH_GEOCODER_COUNTRY` - Country filter for lookups (default: spain)
//! - `HEARTH_STORE_LAT` / `HEARTH_STORE_LON` - Store coordinates
//! - `HEARTH_FREE_RADIUS_KM` - Free delivery radius in km (default: 20)
//! - `HEARTH_DATA_DIR` - Directory for the on-disk guest cart (default: .hearth)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use hearth_core::{Email, UserId};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use crate::geo::Coordinates;
use crate::shipping::ShippingPolicy;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.0;
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront engine configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// REST backend settings
    pub api: ApiConfig,
    /// Authenticated customer, when a session token is configured
    pub session: Option<SessionConfig>,
    /// Geocoding collaborator settings
    pub geocoder: GeocoderConfig,
    /// Store location and delivery fee schedule
    pub shipping: ShippingPolicy,
    /// Directory holding the persisted guest cart
    pub data_dir: PathBuf,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// REST backend configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL; endpoint paths are appended as segments
    pub base_url: Url,
    /// Timeout applied to every request
    pub timeout: Duration,
}

/// Credentials of an authenticated customer.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct SessionConfig {
    /// Bearer token issued by the backend at login
    pub token: SecretString,
    /// Customer id
    pub user_id: UserId,
    /// Customer email, sent with coupon validation
    pub email: Option<Email>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .finish()
    }
}

/// Geocoding collaborator configuration.
#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    /// Base URL of the lookup service
    pub base_url: Url,
    /// Country filter sent with every lookup
    pub country: String,
    /// Timeout applied to every lookup
    pub timeout: Duration,
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid, or
    /// if the session token fails validation (placeholder detection, entropy
    /// check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let timeout = Duration::from_secs(parse_env_or(
            "HEARTH_REQUEST_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
        )?);

        let api = ApiConfig {
            base_url: validate_base_url("HEARTH_API_URL", &get_required_env("HEARTH_API_URL")?)?,
            timeout,
        };

        let session = SessionConfig::from_env()?;

        let geocoder = GeocoderConfig {
            base_url: validate_base_url(
                "HEARTH_GEOCODER_URL",
                &get_env_or_default("HEARTH_GEOCODER_URL", DEFAULT_GEOCODER_URL),
            )?,
            country: get_env_or_default("HEARTH_GEOCODER_COUNTRY", "spain"),
            timeout,
        };

        let defaults = ShippingPolicy::default();
        let store_location = Coordinates::new(
            parse_env_or("HEARTH_STORE_LAT", defaults.store_location.latitude)?,
            parse_env_or("HEARTH_STORE_LON", defaults.store_location.longitude)?,
        );
        let free_radius_km: Decimal = parse_env_or("HEARTH_FREE_RADIUS_KM", defaults.free_radius_km)?;
        if free_radius_km.is_sign_negative() {
            return Err(ConfigError::InvalidEnvVar(
                "HEARTH_FREE_RADIUS_KM".to_string(),
                "must not be negative".to_string(),
            ));
        }
        let shipping = ShippingPolicy {
            store_location,
            free_radius_km,
            ..defaults
        };

        Ok(Self {
            api,
            session,
            geocoder,
            shipping,
            data_dir: PathBuf::from(get_env_or_default("HEARTH_DATA_DIR", ".hearth")),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

impl SessionConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(token) = get_optional_env("HEARTH_API_TOKEN") else {
            return Ok(None);
        };
        validate_secret_strength(&token, "HEARTH_API_TOKEN")?;

        let user_id = get_required_env("HEARTH_USER_ID")?
            .parse::<i64>()
            .map_err(|e| ConfigError::InvalidEnvVar("HEARTH_USER_ID".to_string(), e.to_string()))?;
        let email = get_optional_env("HEARTH_USER_EMAIL")
            .map(|raw| Email::parse(&raw))
            .transpose()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("HEARTH_USER_EMAIL".to_string(), e.to_string())
            })?;

        Ok(Some(Self {
            token: SecretString::from(token),
            user_id: UserId::new(user_id),
            email,
        }))
    }

    /// Header value for authenticated requests.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable, treating empty values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, falling back to `default`.
fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Validate an http(s) base URL.
fn validate_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    Ok(url)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}
