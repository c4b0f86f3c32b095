use anyhow::{Context, Result};
use platform_db::DatabaseSettings;

pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub cors_allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database =
            DatabaseSettings::from_lookup(&lookup).context("invalid database settings")?;
        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.into())
            .split(',')
            .filter_map(|s| {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect::<Vec<_>>();

        Ok(Self {
            database,
            cors_allowed_origins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_frontend_origin() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.cors_allowed_origins, vec![DEFAULT_CORS_ORIGIN]);
        assert_eq!(config.database, DatabaseSettings::default());
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let config = AppConfig::from_lookup(|key| {
            (key == "CORS_ALLOWED_ORIGINS")
                .then(|| " https://crm.example , ,http://localhost:3000".to_string())
        })
        .unwrap();
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://crm.example", "http://localhost:3000"]
        );
    }

    #[test]
    fn bad_pool_size_is_reported() {
        let err = AppConfig::from_lookup(|key| {
            (key == "DB_MAX_CONNECTIONS").then(|| "zero".to_string())
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("DB_MAX_CONNECTIONS"));
    }
}
