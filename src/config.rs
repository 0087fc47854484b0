use std::env;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

fn get_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_bool(key: &str, default: bool) -> bool {
    match get_env(key) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
    }
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<usize>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_string(key: &str, default: &str) -> String {
    get_env(key).unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // HTTP
    pub http_host: String,
    pub http_port: u16,
    pub cors_enabled: bool,

    // Storage
    pub sqlite_path: String,

    // Request validation bounds
    pub max_comment_chars: usize,
    pub max_name_chars: usize,

    // Admin surface
    pub admin_enable_reset: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let s = Self {
            http_host: get_env_string("HTTP_HOST", "127.0.0.1"),
            http_port: get_env_usize("HTTP_PORT", 8000)? as u16,
            cors_enabled: get_env_bool("CORS_ENABLED", true),
            sqlite_path: get_env_string("SQLITE_PATH", "./data/gcatalog_engage.sqlite"),
            max_comment_chars: get_env_usize("MAX_COMMENT_CHARS", 2000)?,
            max_name_chars: get_env_usize("MAX_NAME_CHARS", 64)?,
            admin_enable_reset: get_env_bool("ADMIN_ENABLE_RESET", false),
        };

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.http_host.is_empty() {
            return Err(anyhow!("HTTP_HOST must not be empty"));
        }
        if self.http_port == 0 {
            return Err(anyhow!("HTTP_PORT must be >= 1"));
        }
        if self.sqlite_path.trim().is_empty() {
            return Err(anyhow!("SQLITE_PATH must not be empty"));
        }
        if self.max_comment_chars < 1 {
            return Err(anyhow!(
                "MAX_COMMENT_CHARS must be >= 1 (got {})",
                self.max_comment_chars
            ));
        }
        if self.max_name_chars < 1 {
            return Err(anyhow!(
                "MAX_NAME_CHARS must be >= 1 (got {})",
                self.max_name_chars
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Settings {
        Settings {
            http_host: "127.0.0.1".to_string(),
            http_port: 8000,
            cors_enabled: true,
            sqlite_path: ":memory:".to_string(),
            max_comment_chars: 2000,
            max_name_chars: 64,
            admin_enable_reset: false,
        }
    }

    #[test]
    fn valid_settings_pass() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn empty_sqlite_path_rejected() {
        let mut s = base();
        s.sqlite_path = "  ".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_comment_bound_rejected() {
        let mut s = base();
        s.max_comment_chars = 0;
        assert!(s.validate().is_err());
    }
}
