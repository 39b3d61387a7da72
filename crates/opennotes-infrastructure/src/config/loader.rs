//! Configuration loader.
//!
//! Loads [`AppConfig`] from the `settings:` key of `config/{env}.yaml`
//! (environment resolved from `OPENNOTES_ENV`, default `development`),
//! then applies environment-variable overrides and validates fail-fast.

use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

use opennotes_domain::error::{Error, Result};

use super::data::{AppConfig, Environment};

/// Minimum accepted JWT secret length.
const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Configuration loader service.
#[derive(Clone, Default)]
pub struct ConfigLoader {
    /// Optional explicit config file path (overrides environment resolution).
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit configuration file path.
    #[must_use]
    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load, override and validate the configuration.
    ///
    /// Resolution order:
    /// 1. Explicit path (via `with_config_path`)
    /// 2. `config/{env}.local.yaml`
    /// 3. `config/{env}.yaml`
    ///
    /// # Errors
    ///
    /// Returns an error when no config file is found, parsing fails, or
    /// validation detects an invalid value.
    pub fn load(&self) -> Result<AppConfig> {
        let yaml_path = self.find_yaml_config_path()?;
        info!(path = %yaml_path.display(), "Configuration loaded");

        let content = std::fs::read_to_string(&yaml_path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {e}", yaml_path.display()))
        })?;
        let yaml: serde_yaml::Value = serde_yaml::from_str(&content)
            .map_err(|e| Error::config(format!("Failed to parse YAML config: {e}")))?;

        let settings = yaml.get("settings").ok_or_else(|| {
            Error::ConfigMissing("No 'settings' key found in YAML configuration file".to_owned())
        })?;

        let mut config: AppConfig = serde_yaml::from_value(settings.clone())
            .map_err(|e| Error::config(format!("Failed to deserialize settings: {e}")))?;

        apply_env_overrides(&mut config);
        validate_app_config(&config)?;
        Ok(config)
    }

    /// Build a config purely from defaults and environment variables, for
    /// containerized deployments without a config file.
    pub fn load_from_env(&self) -> Result<AppConfig> {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config);
        validate_app_config(&config)?;
        Ok(config)
    }

    fn find_yaml_config_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(Error::ConfigMissing(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let env_name = env::var("OPENNOTES_ENV").unwrap_or_else(|_| "development".to_owned());
        let filenames = [format!("{env_name}.local.yaml"), format!("{env_name}.yaml")];

        if let Ok(current_dir) = env::current_dir() {
            for dir in current_dir.ancestors() {
                for filename in &filenames {
                    let candidate = dir.join("config").join(filename);
                    if candidate.exists() {
                        return Ok(candidate);
                    }
                }
            }
        }

        Err(Error::ConfigMissing(format!(
            "No YAML configuration file found for environment '{env_name}'. \
             Expected config/{env_name}.yaml"
        )))
    }
}

/// Apply environment-variable overrides for the documented options.
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(value) = env::var("OPENNOTES_ENV") {
        config.environment = match value.as_str() {
            "production" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        };
    }
    if let Ok(value) = env::var("DATABASE_URL") {
        config.database_url = value;
    }
    if let Ok(value) = env::var("REDIS_URL") {
        config.redis_url = value;
    }
    if let Ok(value) = env::var("NATS_URL") {
        config.nats_url = value;
    }
    if let Ok(value) = env::var("JWT_SECRET_KEY") {
        config.auth.jwt_secret_key = value;
    }
    if let Ok(value) = env::var("JWT_ALGORITHM") {
        config.auth.jwt_algorithm = value;
    }
    if let Ok(value) = env::var("ACCESS_TOKEN_EXPIRE_MINUTES") {
        if let Ok(parsed) = value.parse() {
            config.auth.access_token_expire_minutes = parsed;
        }
    }
    if let Ok(value) = env::var("REFRESH_TOKEN_EXPIRE_DAYS") {
        if let Ok(parsed) = value.parse() {
            config.auth.refresh_token_expire_days = parsed;
        }
    }
    if let Ok(value) = env::var("MAX_TOKEN_AGE_SECONDS") {
        if let Ok(parsed) = value.parse() {
            config.auth.max_token_age_seconds = parsed;
        }
    }
    if let Ok(value) = env::var("SESSION_TTL") {
        if let Ok(parsed) = value.parse() {
            config.auth.session_ttl = parsed;
        }
    }
    if let Ok(value) = env::var("CREDENTIALS_ENCRYPTION_KEY") {
        config.credentials_encryption_key = value;
    }
    if let Ok(value) = env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD") {
        if let Ok(parsed) = value.parse() {
            config.circuit_breaker.failure_threshold = parsed;
        }
    }
    if let Ok(value) = env::var("CIRCUIT_BREAKER_TIMEOUT") {
        if let Ok(parsed) = value.parse() {
            config.circuit_breaker.timeout = parsed;
        }
    }
    if let Ok(value) = env::var("HEALTH_CHECK_HEARTBEAT_INTERVAL") {
        if let Ok(parsed) = value.parse() {
            config.health_check.heartbeat_interval = parsed;
        }
    }
    if let Ok(value) = env::var("HEALTH_CHECK_UNHEALTHY_TIMEOUT") {
        if let Ok(parsed) = value.parse() {
            config.health_check.unhealthy_timeout = parsed;
        }
    }
    if let Ok(value) = env::var("VISION_MAX_TOKENS") {
        if let Ok(parsed) = value.parse() {
            config.vision_max_tokens = parsed;
        }
    }
    if let Ok(value) = env::var("MIN_RATINGS_NEEDED") {
        if let Ok(parsed) = value.parse() {
            config.min_ratings_needed = parsed;
        }
    }
    if let Ok(value) = env::var("DISCORD_PUBLIC_KEY") {
        config.webhooks.discord_public_key = value;
    }
    if let Ok(value) = env::var("MAX_WEBHOOK_AGE_SECONDS") {
        if let Ok(parsed) = value.parse() {
            config.webhooks.max_webhook_age_seconds = parsed;
        }
    }
}

/// Fail-fast validation of the assembled configuration.
fn validate_app_config(config: &AppConfig) -> Result<()> {
    if config.environment.is_production() && config.auth.jwt_secret_key.is_empty() {
        return Err(Error::ConfigInvalid {
            key: "auth.jwt_secret_key".to_owned(),
            message: "JWT secret cannot be empty in production".to_owned(),
        });
    }
    if !config.auth.jwt_secret_key.is_empty()
        && config.auth.jwt_secret_key.len() < MIN_JWT_SECRET_LENGTH
    {
        return Err(Error::ConfigInvalid {
            key: "auth.jwt_secret_key".to_owned(),
            message: format!("JWT secret must be at least {MIN_JWT_SECRET_LENGTH} characters"),
        });
    }
    if config.auth.session_ttl == 0 {
        return Err(Error::ConfigInvalid {
            key: "auth.session_ttl".to_owned(),
            message: "Session TTL cannot be 0".to_owned(),
        });
    }
    validate_discord_public_key(&config.webhooks.discord_public_key)?;
    if config.rate_limit.window_seconds == 0 {
        return Err(Error::ConfigInvalid {
            key: "rate_limit.window_seconds".to_owned(),
            message: "Rate limit window cannot be 0".to_owned(),
        });
    }
    if config.token_pool.capacity <= 0 {
        return Err(Error::ConfigInvalid {
            key: "token_pool.capacity".to_owned(),
            message: "Token pool capacity must be positive".to_owned(),
        });
    }
    for (key, expr) in [
        ("scheduler.stale_sweep_cron", &config.scheduler.stale_sweep_cron),
        ("scheduler.stuck_monitor_cron", &config.scheduler.stuck_monitor_cron),
        ("scheduler.token_reclaim_cron", &config.scheduler.token_reclaim_cron),
    ] {
        if config.scheduler.enabled && expr.parse::<cron::Schedule>().is_err() {
            return Err(Error::ConfigInvalid {
                key: key.to_owned(),
                message: format!("Invalid cron expression: {expr}"),
            });
        }
    }
    Ok(())
}

/// An empty key is allowed at config time (verification refuses it in
/// production at runtime); a non-empty key must be exactly 64 hex chars.
pub fn validate_discord_public_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Ok(());
    }
    if key.len() != 64 {
        return Err(Error::ConfigInvalid {
            key: "webhooks.discord_public_key".to_owned(),
            message: "Discord public key must be exactly 64 hex characters".to_owned(),
        });
    }
    if !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::ConfigInvalid {
            key: "webhooks.discord_public_key".to_owned(),
            message: "Discord public key must be valid hexadecimal".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn empty_public_key_is_allowed_at_config_time() {
        assert!(validate_discord_public_key("").is_ok());
    }

    #[test]
    fn valid_64_hex_key_passes() {
        assert!(validate_discord_public_key(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn wrong_length_key_is_rejected() {
        let err = validate_discord_public_key(&"a".repeat(63)).unwrap_err();
        assert!(err.to_string().contains("exactly 64 hex characters"));
        assert!(validate_discord_public_key(&"a".repeat(65)).is_err());
    }

    #[test]
    fn non_hex_key_of_correct_length_is_rejected() {
        let err = validate_discord_public_key(&"g".repeat(64)).unwrap_err();
        assert!(err.to_string().contains("valid hexadecimal"));
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_app_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret_key = "short".to_owned();
        assert!(validate_app_config(&config).is_err());
    }

    #[test]
    fn zero_session_ttl_is_rejected() {
        let mut config = AppConfig::default();
        config.auth.session_ttl = 0;
        assert!(validate_app_config(&config).is_err());
    }

    #[test]
    fn invalid_cron_is_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.stale_sweep_cron = "not a cron".to_owned();
        assert!(validate_app_config(&config).is_err());
    }

    #[test]
    #[serial]
    fn loads_settings_section_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        let mut file = std::fs::File::create(config_dir.join("development.yaml")).unwrap();
        writeln!(
            file,
            "settings:\n  database_url: postgres://db/notes\n  server:\n    port: 9000"
        )
        .unwrap();

        let loader =
            ConfigLoader::new().with_config_path(config_dir.join("development.yaml"));
        let config = loader.load().unwrap();
        assert_eq!(config.database_url, "postgres://db/notes");
        assert_eq!(config.server.port, 9000);
        // Untouched fields keep their defaults.
        assert_eq!(config.token_pool.capacity, 10);
    }

    #[test]
    #[serial]
    fn missing_settings_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        std::fs::write(&path, "server:\n  port: 9000\n").unwrap();
        let loader = ConfigLoader::new().with_config_path(&path);
        assert!(matches!(loader.load(), Err(Error::ConfigMissing(_))));
    }
}
