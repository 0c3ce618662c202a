use anyhow::{Context, Result};
use chrono_tz::Tz;
use dotenvy::dotenv;
use sqlx::postgres::PgConnectOptions;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CACHE_DIR: &str = "tmp/cache";
const DEFAULT_TIMEZONE: &str = "Europe/Amsterdam";
const DEFAULT_BACKEND_TIMEOUT_SECONDS: u64 = 30;
const MAX_BACKEND_TIMEOUT_SECONDS: u64 = 300;

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub host: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    pub use_ssl: bool,
}

#[derive(Debug, Clone)]
pub struct TimescaleConfig {
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
}

impl TimescaleConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.database_url {
            return url
                .parse::<PgConnectOptions>()
                .context("DATABASE_URL is not a valid postgres url");
        }
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user);
        Ok(match &self.password {
            Some(password) => options.password(password),
            None => options,
        })
    }
}

#[derive(Debug, Clone)]
pub enum BackendConfig {
    Influx(InfluxConfig),
    Timescale(TimescaleConfig),
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub backend: BackendConfig,
    pub cache_dir: PathBuf,
    pub timezone: Tz,
    pub backend_timeout: Duration,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);

        let backend = match env.string("USAGE_API_BACKEND", "influx").as_str() {
            "influx" | "influxdb" => BackendConfig::Influx(InfluxConfig {
                host: env.required("INFLUXDB_HOST")?,
                org: env.required("INFLUXDB_ORG")?,
                bucket: env.required("INFLUXDB_BUCKET")?,
                token: env.required("INFLUXDB_TOKEN")?,
                use_ssl: env.bool("INFLUXDB_USE_SSL", true),
            }),
            "timescale" | "postgres" => {
                let database_url = env.optional_string("DATABASE_URL");
                let (host, database) = if database_url.is_some() {
                    (String::new(), String::new())
                } else {
                    (
                        env.required("POSTGRES_HOST")?,
                        env.required("POSTGRES_DATABASE")?,
                    )
                };
                BackendConfig::Timescale(TimescaleConfig {
                    database_url,
                    host,
                    port: env.u16("POSTGRES_PORT", 5432),
                    database,
                    user: env.string("POSTGRES_USER", "postgres"),
                    password: env.optional_string("POSTGRES_PASSWORD"),
                })
            }
            other => anyhow::bail!("USAGE_API_BACKEND must be influx or timescale, got {other:?}"),
        };

        let timezone_name = env.string("USAGE_API_TIMEZONE", DEFAULT_TIMEZONE);
        let timezone = timezone_name
            .parse::<Tz>()
            .map_err(|err| anyhow::anyhow!("invalid USAGE_API_TIMEZONE {timezone_name:?}: {err}"))?;

        let timeout_seconds = env
            .u64("USAGE_API_BACKEND_TIMEOUT_SECONDS", DEFAULT_BACKEND_TIMEOUT_SECONDS)
            .clamp(1, MAX_BACKEND_TIMEOUT_SECONDS);

        Ok(Self {
            backend,
            cache_dir: PathBuf::from(env.string("USAGE_API_CACHE_DIR", DEFAULT_CACHE_DIR)),
            timezone,
            backend_timeout: Duration::from_secs(timeout_seconds),
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn optional_string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional_string(key)
            .unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional_string(key)
            .with_context(|| format!("{key} must be set"))
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.optional_string(key).map(|value| value.to_lowercase()) {
            Some(value) if value == "1" || value == "true" || value == "yes" => true,
            Some(value) if value == "0" || value == "false" || value == "no" => false,
            _ => default,
        }
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.optional_string(key)
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(default)
    }

    fn u64(&self, key: &str, default: u64) -> u64 {
        self.optional_string(key)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(default)
    }
}
