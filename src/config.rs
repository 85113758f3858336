use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIG_FILE_TOML: &str = "WorkoutTracker.toml";
pub const CONFIG_FILE_JSON: &str = "WorkoutTracker.json";
pub const ENV_PREFIX: &str = "WT_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_file: String,
    pub bind: String,

    // Logging
    pub logging: bool,
    pub debug: bool,

    // Users & sessions
    pub registration_disabled: bool,
    pub session_lifetime_hours: u64,

    // Uploads & background processing
    pub worker_interval_seconds: u64,
    pub upload_limit_bytes: usize,

    /// Comma separated; `*` allows any origin.
    pub cors_allowed_origins: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_file: "database.db".to_string(),
            bind: "127.0.0.1:8080".to_string(),
            logging: true,
            debug: false,
            registration_disabled: false,
            session_lifetime_hours: 24 * 30,
            worker_interval_seconds: 60,
            upload_limit_bytes: 32 * 1024 * 1024,
            cors_allowed_origins: "*".to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults, then `WorkoutTracker.toml`, then `WorkoutTracker.json`, then
    /// `WT_*` environment variables. An explicit file is merged after the
    /// default ones.
    pub fn load(extra_file: Option<&str>) -> Result<Self, figment::Error> {
        Self::figment(extra_file).extract()
    }

    fn figment(extra_file: Option<&str>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(CONFIG_FILE_TOML))
            .merge(Json::file(CONFIG_FILE_JSON));

        if let Some(path) = extra_file {
            figment = if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }

        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime_hours.saturating_mul(3600))
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_secs(self.worker_interval_seconds.max(1))
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }
}
