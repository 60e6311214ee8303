use std::path::PathBuf;

use anyhow::Context;

/// Settings read from the environment (and `.env`, when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub session_file: PathBuf,
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Config {
            database_url: non_empty("DATABASE_URL"),
            supabase_url: non_empty("SUPABASE_URL"),
            supabase_anon_key: non_empty("SUPABASE_ANON_KEY"),
            session_file: non_empty("ATTENDANCE_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(default_session_file),
            log_file: non_empty("LOG_FILE_PATH").map(PathBuf::from),
        }
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to the attendance Postgres instance")
    }

    pub fn identity_provider(&self) -> anyhow::Result<(&str, &str)> {
        let url = self
            .supabase_url
            .as_deref()
            .context("SUPABASE_URL must be set to sign in")?;
        let key = self
            .supabase_anon_key
            .as_deref()
            .context("SUPABASE_ANON_KEY must be set to sign in")?;
        Ok((url, key))
    }
}

fn default_session_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("attendance-tracker")
        .join("session.json")
}
