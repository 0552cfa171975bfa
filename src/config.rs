// Application configuration, loaded from environment variables and CLI flags.

use std::time::Duration;

use crate::engine::EngineConfig;
use crate::links::DEFAULT_LINK_HOSTS;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// How long players have to submit once a round starts.
    pub submission_window: Duration,
    /// How long a match stays open for voting.
    pub voting_window: Duration,
    /// Hosts accepted in song submissions (subdomains included).
    pub accepted_link_hosts: Vec<String>,
    /// Prompt image URLs drawn at random for each match.
    pub prompt_images: Vec<String>,
    /// Bearer token for admin routes. No token means no admin outside local mode.
    pub admin_token: Option<String>,
    /// Whether to run in local mode (admin routes open to everyone).
    pub local_mode: bool,
    /// Extra attempts for a failed session save.
    pub save_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:auxbattle.db?mode=rwc".to_string(),
            port: 3000,
            submission_window: Duration::from_secs(43_200),
            voting_window: Duration::from_secs(86_400),
            accepted_link_hosts: DEFAULT_LINK_HOSTS.iter().map(|h| h.to_string()).collect(),
            prompt_images: Vec::new(),
            admin_token: None,
            local_mode: false,
            save_retries: 3,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:auxbattle.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `AUX_SUBMISSION_WINDOW_SECS` - submission window (default: 43200)
    /// - `AUX_VOTING_WINDOW_SECS` - voting window (default: 86400)
    /// - `AUX_ACCEPTED_LINK_HOSTS` - comma separated host allow-list
    /// - `AUX_PROMPT_IMAGES` - comma separated prompt image URLs
    /// - `AUX_ADMIN_TOKEN` - bearer token for admin routes
    /// - `AUX_LOCAL_MODE` - Set to `true` to enable local mode
    /// - `AUX_SAVE_RETRIES` - retries for failed saves (default: 3)
    ///
    /// CLI flags:
    /// - `--local` - Enable local mode (same as `AUX_LOCAL_MODE=true`)
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    /// Build a config from CLI args and an environment lookup.
    pub fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let database_url = env("DATABASE_URL").unwrap_or(defaults.database_url);

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(defaults.port);

        let secs = |key: &str, default: Duration| {
            env(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let submission_window = secs("AUX_SUBMISSION_WINDOW_SECS", defaults.submission_window);
        let voting_window = secs("AUX_VOTING_WINDOW_SECS", defaults.voting_window);

        let accepted_link_hosts = env("AUX_ACCEPTED_LINK_HOSTS")
            .map(|v| split_list(&v))
            .filter(|hosts| !hosts.is_empty())
            .unwrap_or(defaults.accepted_link_hosts);

        let prompt_images = env("AUX_PROMPT_IMAGES")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        let admin_token = env("AUX_ADMIN_TOKEN").filter(|t| !t.trim().is_empty());

        let local_mode = args.iter().any(|a| a == "--local")
            || env("AUX_LOCAL_MODE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);

        let save_retries = env("AUX_SAVE_RETRIES")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.save_retries);

        Config {
            database_url,
            port,
            submission_window,
            voting_window,
            accepted_link_hosts,
            prompt_images,
            admin_token,
            local_mode,
            save_retries,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            submission_window: self.submission_window,
            voting_window: self.voting_window,
            prompt_images: self.prompt_images.clone(),
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(args: &[&str], vars: &[(&str, &str)]) -> Config {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_sources(&args, |k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&["auxbattle"], &[]);
        assert_eq!(config.database_url, "sqlite:auxbattle.db?mode=rwc");
        assert_eq!(config.port, 3000);
        assert_eq!(config.submission_window, Duration::from_secs(12 * 3600));
        assert_eq!(config.voting_window, Duration::from_secs(24 * 3600));
        assert_eq!(config.accepted_link_hosts.len(), DEFAULT_LINK_HOSTS.len());
        assert!(config.prompt_images.is_empty());
        assert!(config.admin_token.is_none());
        assert!(!config.local_mode);
        assert_eq!(config.save_retries, 3);
    }

    #[test]
    fn test_cli_port_overrides_env() {
        let config = load(&["auxbattle", "--port", "8080", "--local"], &[("PORT", "9000")]);
        assert_eq!(config.port, 8080);
        assert!(config.local_mode);

        let config = load(&["auxbattle"], &[("PORT", "9000"), ("AUX_LOCAL_MODE", "1")]);
        assert_eq!(config.port, 9000);
        assert!(config.local_mode);
    }

    #[test]
    fn test_lists_and_windows() {
        let config = load(
            &["auxbattle"],
            &[
                ("AUX_ACCEPTED_LINK_HOSTS", "bandcamp.com, tidal.com,,"),
                ("AUX_PROMPT_IMAGES", "https://img/1.png,https://img/2.png"),
                ("AUX_SUBMISSION_WINDOW_SECS", "60"),
                ("AUX_VOTING_WINDOW_SECS", "0"),
                ("AUX_ADMIN_TOKEN", "tok"),
            ],
        );
        assert_eq!(config.accepted_link_hosts, vec!["bandcamp.com", "tidal.com"]);
        assert_eq!(config.prompt_images.len(), 2);
        assert_eq!(config.submission_window, Duration::from_secs(60));
        // Zero is rejected in favour of the default
        assert_eq!(config.voting_window, Duration::from_secs(86_400));
        assert_eq!(config.admin_token.as_deref(), Some("tok"));

        let engine = config.engine_config();
        assert_eq!(engine.submission_window, Duration::from_secs(60));
        assert_eq!(engine.prompt_images, config.prompt_images);
    }
}
