use crate::secret_string::SecretString;
use anyhow::{Context, Result, bail};
use std::{env, fmt, time::Duration};
use tracing::{Level, debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://gitlab.com/api/v4";
pub const DEFAULT_URL_PATH: &str = "/projects/PROJECT_ID/trigger/pipeline";
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(70);
pub const DEFAULT_WEBSERVER_PORT: u16 = 8080;

/// A setting together with whether its value came from the fallback rather than the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub defaulted: bool,
}

impl<T> Resolved<T> {
    pub fn explicit(value: T) -> Self {
        Self {
            value,
            defaulted: false,
        }
    }

    pub fn fallback(value: T) -> Self {
        Self {
            value,
            defaulted: true,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Resolved<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.defaulted {
            write!(f, "{} (default)", self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSelection {
    pub pods: bool,
    pub deployments: bool,
    pub statefulsets: bool,
}

impl WatchSelection {
    pub fn is_empty(&self) -> bool {
        !(self.pods || self.deployments || self.statefulsets)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub log_level: Resolved<Level>,
    pub auth_token: SecretString,
    pub base_url: Resolved<String>,
    pub url_path: Resolved<String>,
    pub watch: WatchSelection,
    pub readiness_timeout: Resolved<Duration>,
    pub webserver_port: Resolved<u16>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves all settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let log_level = match get("LOG_LEVEL") {
            Some(level) => Resolved::explicit(parse_log_level(&level)),
            None => Resolved::fallback(Level::INFO),
        };

        let auth_token = SecretString::new(get("AUTH_TOKEN").unwrap_or_default());

        let base_url = string_or(get("URL"), DEFAULT_BASE_URL);
        let url_path = string_or(get("URL_PATH"), DEFAULT_URL_PATH);

        let watch = WatchSelection {
            pods: bool_or(get("WATCH_PODS"), "WATCH_PODS", true)?.value,
            deployments: bool_or(get("WATCH_DEPLOYMENTS"), "WATCH_DEPLOYMENTS", true)?.value,
            statefulsets: bool_or(get("WATCH_STATEFULSETS"), "WATCH_STATEFULSETS", true)?.value,
        };

        let readiness_timeout = match get("READINESS_TIMEOUT_SECONDS") {
            Some(secs) => Resolved::explicit(Duration::from_secs(secs.parse().with_context(
                || format!("READINESS_TIMEOUT_SECONDS is not a number of seconds: {}", secs),
            )?)),
            None => Resolved::fallback(DEFAULT_READINESS_TIMEOUT),
        };

        let webserver_port = match get("WEBSERVER_PORT") {
            Some(port) => Resolved::explicit(
                port.parse()
                    .with_context(|| format!("WEBSERVER_PORT is not a valid port: {}", port))?,
            ),
            None => Resolved::fallback(DEFAULT_WEBSERVER_PORT),
        };

        Ok(Settings {
            log_level,
            auth_token,
            base_url,
            url_path,
            watch,
            readiness_timeout,
            webserver_port,
        })
    }

    /// Must be called after the subscriber is installed.
    pub fn log_resolved(&self) {
        debug!("LOG_LEVEL={}", self.log_level);
        debug!("URL={}", self.base_url);
        debug!("URL_PATH={}", self.url_path);
        debug!("READINESS_TIMEOUT_SECONDS={}", self.readiness_timeout.value.as_secs());
        debug!("WEBSERVER_PORT={}", self.webserver_port);
        debug!("Watch selection {:?}", self.watch);
        if self.auth_token.is_empty() {
            warn!("AUTH_TOKEN is not set, pipeline triggers will be sent with an empty token");
        }
    }
}

fn parse_log_level(value: &str) -> Level {
    match value.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn string_or(value: Option<String>, default: &str) -> Resolved<String> {
    match value {
        Some(v) => Resolved::explicit(v),
        None => Resolved::fallback(default.to_string()),
    }
}

fn bool_or(value: Option<String>, key: &str, default: bool) -> Result<Resolved<bool>> {
    let Some(value) = value else {
        return Ok(Resolved::fallback(default));
    };
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Resolved::explicit(true)),
        "false" | "0" | "no" => Ok(Resolved::explicit(false)),
        _ => bail!("{} must be a boolean, got {}", key, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let settings = settings_from(&[]).expect("Defaults should resolve");

        assert_eq!(settings.log_level, Resolved::fallback(Level::INFO));
        assert_eq!(settings.base_url, Resolved::fallback(DEFAULT_BASE_URL.to_string()));
        assert_eq!(settings.url_path, Resolved::fallback(DEFAULT_URL_PATH.to_string()));
        assert_eq!(settings.readiness_timeout.value, Duration::from_secs(70));
        assert!(settings.readiness_timeout.defaulted);
        assert_eq!(settings.webserver_port.value, 8080);
        assert!(settings.auth_token.is_empty());
        assert!(settings.watch.pods && settings.watch.deployments && settings.watch.statefulsets);
    }

    #[test]
    fn test_explicit_values() {
        let settings = settings_from(&[
            ("LOG_LEVEL", "DEBUG"),
            ("AUTH_TOKEN", "glptt-secret"),
            ("URL", "https://gitlab.example.com/api/v4"),
            ("URL_PATH", "/p/PROJECT_ID/t"),
            ("WATCH_PODS", "false"),
            ("WATCH_STATEFULSETS", "No"),
            ("READINESS_TIMEOUT_SECONDS", "5"),
            ("WEBSERVER_PORT", "9090"),
        ])
        .expect("Settings should resolve");

        assert_eq!(settings.log_level, Resolved::explicit(Level::DEBUG));
        assert_eq!(settings.auth_token.expose_secret(), "glptt-secret");
        assert_eq!(settings.base_url.value, "https://gitlab.example.com/api/v4");
        assert!(!settings.base_url.defaulted);
        assert_eq!(settings.url_path.value, "/p/PROJECT_ID/t");
        assert_eq!(
            settings.watch,
            WatchSelection {
                pods: false,
                deployments: true,
                statefulsets: false
            }
        );
        assert_eq!(settings.readiness_timeout, Resolved::explicit(Duration::from_secs(5)));
        assert_eq!(settings.webserver_port, Resolved::explicit(9090));
    }

    #[test]
    fn test_empty_value_counts_as_unset() {
        let settings = settings_from(&[("URL", ""), ("LOG_LEVEL", "")]).unwrap();
        assert_eq!(settings.base_url, Resolved::fallback(DEFAULT_BASE_URL.to_string()));
        assert!(settings.log_level.defaulted);
    }

    #[test]
    fn test_unknown_log_level_falls_back_to_info() {
        let settings = settings_from(&[("LOG_LEVEL", "trace")]).unwrap();
        assert_eq!(settings.log_level.value, Level::INFO);
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        assert!(settings_from(&[("WATCH_PODS", "maybe")]).is_err());
        assert!(settings_from(&[("READINESS_TIMEOUT_SECONDS", "70s")]).is_err());
        assert!(settings_from(&[("WEBSERVER_PORT", "70000")]).is_err());
    }

    #[test]
    fn test_watch_selection_is_empty() {
        let settings = settings_from(&[
            ("WATCH_PODS", "0"),
            ("WATCH_DEPLOYMENTS", "false"),
            ("WATCH_STATEFULSETS", "no"),
        ])
        .unwrap();
        assert!(settings.watch.is_empty());
    }
}
