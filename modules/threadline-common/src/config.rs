use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;

use crate::error::ThreadlineError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_url: Option<String>,

    // Account
    pub account: String,
    pub username: String,
    pub user_id: Option<String>,

    // Polling
    pub poll_interval_secs: u64,
    pub tracked_authors: Vec<String>,
    pub max_thread_depth: usize,
    pub search_max: u32,
    pub max_search_pages: u32,
    pub dry_run: bool,

    // Request lane
    pub max_retries: Option<u32>,

    // Offline runs
    pub replay_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ThreadlineError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup. `from_env` delegates here.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ThreadlineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = lookup("THREADLINE_USERNAME").ok_or_else(|| {
            ThreadlineError::Config("THREADLINE_USERNAME environment variable is required".into())
        })?;

        Ok(Self {
            database_url: lookup("DATABASE_URL"),
            account: lookup("THREADLINE_ACCOUNT").unwrap_or_else(|| username.clone()),
            user_id: lookup("THREADLINE_USER_ID"),
            poll_interval_secs: parse_or(&lookup, "THREADLINE_POLL_INTERVAL_SECS", 120)?,
            tracked_authors: lookup("THREADLINE_TRACKED_AUTHORS")
                .map(|raw| {
                    raw.split(',')
                        .map(|a| a.trim().trim_start_matches('@').to_string())
                        .filter(|a| !a.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            max_thread_depth: parse_or(&lookup, "THREADLINE_MAX_THREAD_DEPTH", 10)?,
            search_max: parse_or(&lookup, "THREADLINE_SEARCH_MAX", 20)?,
            max_search_pages: parse_or(&lookup, "THREADLINE_MAX_SEARCH_PAGES", 1)?,
            dry_run: parse_or(&lookup, "THREADLINE_DRY_RUN", false)?,
            max_retries: lookup("THREADLINE_MAX_RETRIES")
                .map(|raw| parse_value("THREADLINE_MAX_RETRIES", &raw))
                .transpose()?,
            replay_path: lookup("THREADLINE_REPLAY_PATH").map(PathBuf::from),
            username,
        })
    }

    /// Log the effective configuration with the connection string redacted.
    pub fn log_redacted(&self) {
        info!(
            account = self.account.as_str(),
            username = self.username.as_str(),
            database = if self.database_url.is_some() { "[set]" } else { "[in-memory]" },
            poll_interval_secs = self.poll_interval_secs,
            tracked_authors = ?self.tracked_authors,
            max_thread_depth = self.max_thread_depth,
            search_max = self.search_max,
            max_search_pages = self.max_search_pages,
            dry_run = self.dry_run,
            max_retries = ?self.max_retries,
            "Loaded config"
        );
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ThreadlineError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ThreadlineError> {
    raw.trim()
        .parse()
        .map_err(|_| ThreadlineError::Config(format!("{key} has an invalid value: {raw}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ThreadlineError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_username_is_set() {
        let config = config_from(&[("THREADLINE_USERNAME", "threadbot")]).unwrap();
        assert_eq!(config.account, "threadbot");
        assert_eq!(config.poll_interval_secs, 120);
        assert_eq!(config.max_thread_depth, 10);
        assert_eq!(config.search_max, 20);
        assert!(config.max_retries.is_none());
        assert!(config.tracked_authors.is_empty());
        assert!(!config.dry_run);
    }

    #[test]
    fn tracked_authors_are_split_and_trimmed() {
        let config = config_from(&[
            ("THREADLINE_USERNAME", "threadbot"),
            ("THREADLINE_TRACKED_AUTHORS", "@alice, bob,,carol "),
        ])
        .unwrap();
        assert_eq!(config.tracked_authors, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn missing_username_is_a_config_error() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, ThreadlineError::Config(_)));
    }

    #[test]
    fn unparsable_number_is_a_config_error() {
        let err = config_from(&[
            ("THREADLINE_USERNAME", "threadbot"),
            ("THREADLINE_POLL_INTERVAL_SECS", "soon"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("THREADLINE_POLL_INTERVAL_SECS"));
    }
}
