use std::{env, path::PathBuf, str::FromStr, time::Duration};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub auto_migrate: bool,
    pub snapshot_dir: PathBuf,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub max_images: usize,
    pub image_placeholder_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            db_acquire_timeout: Duration::from_secs(5),
            auto_migrate: false,
            snapshot_dir: PathBuf::from("./data"),
            default_page_size: 50,
            max_page_size: 200,
            max_images: 12,
            image_placeholder_url: None,
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment (after `.env`, if any).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_page_size = parse_or("MAX_PAGE_SIZE", defaults.max_page_size, |v| *v >= 1);
        let default_page_size = parse_or("DEFAULT_PAGE_SIZE", defaults.default_page_size, |v| {
            *v >= 1 && *v <= max_page_size
        });
        Self {
            database_url: non_empty("DATABASE_URL"),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", defaults.db_max_connections, |v| {
                *v >= 1
            }),
            db_acquire_timeout: Duration::from_secs(parse_or(
                "DB_ACQUIRE_TIMEOUT_SECS",
                5u64,
                |v| *v >= 1,
            )),
            auto_migrate: parse_env_bool("AUTO_MIGRATE"),
            snapshot_dir: non_empty("SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_dir),
            default_page_size,
            max_page_size,
            max_images: parse_or("MAX_IMAGES", defaults.max_images, |v| *v >= 1),
            image_placeholder_url: non_empty("IMAGE_PLACEHOLDER_URL"),
        }
    }

    pub fn offline(&self) -> bool {
        self.database_url.is_none()
    }
}

pub fn parse_env_bool(key: &str) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(key: &str, default: T, valid: impl Fn(&T) -> bool) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = non_empty(key) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            warn!(target = "ops.config", key, value = %raw, "invalid value; using {default}");
            default
        }
    }
}
