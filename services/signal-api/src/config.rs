//! Service configuration
//!
//! Sources, lowest precedence first: built-in defaults, optional
//! `config/default.toml`, `APP__SECTION__KEY` environment variables, then the
//! conventional `DATABASE_URL`, `GEMINI_API_KEY`, `JWT_SECRET` and `PORT`.

use crate::analysis::AnalysisConfig;
use crate::oracle::GeminiConfig;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
    pub oracle: OracleSettings,
    pub market: MarketSettings,
    pub analysis: AnalysisSettings,
    pub tracker: TrackerSettings,
    pub charts: ChartSettings,
    pub strategies: StrategySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: 24 * 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub temperature: f32,
}

impl Default for OracleSettings {
    fn default() -> Self {
        let gemini = GeminiConfig::default();
        Self {
            base_url: gemini.base_url,
            api_key: gemini.api_key,
            model: gemini.model,
            timeout_seconds: gemini.timeout_seconds,
            temperature: gemini.temperature,
        }
    }
}

impl OracleSettings {
    pub fn gemini(&self) -> GeminiConfig {
        GeminiConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            timeout_seconds: self.timeout_seconds,
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    /// Binance REST base URL; the public endpoint when unset
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub target_successes: usize,
    pub max_attempts: usize,
    pub quorum: usize,
    pub self_validation: bool,
    pub call_timeout_secs: u64,
    pub oracle_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        let analysis = AnalysisConfig::default();
        Self {
            target_successes: analysis.target_successes,
            max_attempts: analysis.max_attempts,
            quorum: analysis.quorum,
            self_validation: analysis.self_validation,
            call_timeout_secs: analysis.call_timeout.as_secs(),
            oracle_retries: analysis.oracle_retries,
            retry_delay_ms: analysis.retry_delay.as_millis() as u64,
        }
    }
}

impl AnalysisSettings {
    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            target_successes: self.target_successes,
            max_attempts: self.max_attempts,
            quorum: self.quorum,
            self_validation: self.self_validation,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            oracle_retries: self.oracle_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Exactly one replica per database may run the tracker
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub max_connections: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 300,
            max_connections: 2,
        }
    }
}

impl TrackerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartSettings {
    pub dir: PathBuf,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("signal-api-charts"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub file: PathBuf,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from("config/strategies.json"),
        }
    }
}

impl Settings {
    /// Load from files and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("oracle.api_key", std::env::var("GEMINI_API_KEY").ok())?
            .set_override_option("auth.jwt_secret", std::env::var("JWT_SECRET").ok())?
            .set_override_option("server.port", std::env::var("PORT").ok())?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Missing("database.url (DATABASE_URL)"));
        }
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Missing("auth.jwt_secret (JWT_SECRET)"));
        }
        if self.oracle.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("oracle.api_key (GEMINI_API_KEY)"));
        }

        let analysis = &self.analysis;
        if analysis.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "analysis.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if analysis.target_successes == 0 || analysis.target_successes > analysis.max_attempts {
            return Err(ConfigError::Invalid {
                key: "analysis.target_successes",
                reason: format!("must be between 1 and {}", analysis.max_attempts),
            });
        }
        if analysis.quorum == 0 {
            return Err(ConfigError::Invalid {
                key: "analysis.quorum",
                reason: "must be at least 1".to_string(),
            });
        }
        if analysis.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "analysis.call_timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.tracker.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "tracker.poll_interval_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.auth.token_ttl_hours <= 0 {
            return Err(ConfigError::Invalid {
                key: "auth.token_ttl_hours",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Settings {
        let mut settings = Settings::default();
        settings.database.url = "postgres://localhost/signals".to_string();
        settings.auth.jwt_secret = "secret".to_string();
        settings.oracle.api_key = "key".to_string();
        settings
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.tracker.poll_interval(), Duration::from_secs(300));
        assert_eq!(settings.auth.token_ttl_hours, 168);

        let analysis = settings.analysis.analysis_config();
        assert_eq!(analysis.target_successes, 3);
        assert_eq!(analysis.max_attempts, 5);
        assert_eq!(analysis.quorum, 2);
        assert!(analysis.self_validation);
        assert_eq!(analysis.call_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_required_settings() {
        assert!(complete().validate().is_ok());

        let mut missing_key = complete();
        missing_key.oracle.api_key.clear();
        assert!(matches!(missing_key.validate(), Err(ConfigError::Missing(_))));

        let mut missing_db = complete();
        missing_db.database.url = "  ".to_string();
        assert!(matches!(missing_db.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_attempt_bounds() {
        let mut settings = complete();
        settings.analysis.target_successes = 6;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "analysis.target_successes", .. })
        ));

        settings.analysis.target_successes = 3;
        settings.analysis.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::builder()
            .add_source(File::from_str(
                "[analysis]\nself_validation = false\n[tracker]\nenabled = false\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let settings: Settings = config.try_deserialize().unwrap();
        assert!(!settings.analysis.self_validation);
        assert_eq!(settings.analysis.max_attempts, 5);
        assert!(!settings.tracker.enabled);
        assert_eq!(settings.tracker.poll_interval_secs, 300);
    }
}
