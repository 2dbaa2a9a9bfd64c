use once_cell::sync::Lazy;
use std::{collections::HashMap, env, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

use crate::{
    client::{DEFAULT_DATA_PATH, DEFAULT_REQUEST_TIMEOUT},
    coordinator::DEFAULT_POLL_INTERVAL,
};

pub static ENV_PREFIX: Lazy<String> = Lazy::new(|| "KSTAR".to_string());

pub const CHANNEL_CAPACITY: usize = 1024;

pub fn env_name(name: &str) -> String {
    format!("{}_{}", *ENV_PREFIX, name)
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid value [{value}] for {name}: {reason}")]
    Invalid { name: String, value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub inverter: InverterSettings,
    pub app: AppSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InverterSettings {
    /// Host from the environment. Takes precedence over a stored config record.
    pub host: Option<String>,
    pub data_path: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppSettings {
    pub poll_interval: Duration,
    /// Overrides the platform data directory holding the config record and log file.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// Level for this crate when `RUST_LOG` is not set.
    pub level: Option<String>,
    pub to_file: bool,
    pub color: bool,
    pub source_files: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            inverter: InverterSettings {
                host: None,
                data_path: DEFAULT_DATA_PATH.to_string(),
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
            },
            app: AppSettings {
                poll_interval: DEFAULT_POLL_INTERVAL,
                data_dir: None,
            },
            log: LogSettings {
                level: None,
                to_file: false,
                color: true,
                source_files: false,
            },
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, SettingsError> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let defaults = Settings::default();
        let host = lookup(&env_name("HOST"))
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());
        let data_path = string_setting(&lookup, "DATA_PATH", defaults.inverter.data_path);
        let request_timeout = seconds_setting(&lookup, "REQUEST_TIMEOUT", defaults.inverter.request_timeout)?;
        let poll_interval = seconds_setting(&lookup, "POLL_INTERVAL", defaults.app.poll_interval)?;
        let data_dir = lookup(&env_name("DATA")).map(PathBuf::from);

        let log = LogSettings {
            level: lookup(&env_name("LOGLEVEL")),
            to_file: parsed_setting(&lookup, "LOG_TO_FILE", defaults.log.to_file)?,
            color: parsed_setting(&lookup, "ENV_COLOR_LOG", defaults.log.color)?,
            source_files: parsed_setting(&lookup, "LOG_SOURCE_FILES", defaults.log.source_files)?,
        };

        Ok(Self {
            inverter: InverterSettings {
                host,
                data_path,
                request_timeout,
            },
            app: AppSettings { poll_interval, data_dir },
            log,
        })
    }
}

fn string_setting(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: impl Into<String>) -> String {
    lookup(&env_name(name)).unwrap_or(default.into())
}

fn parsed_setting<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, SettingsError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(&env_name(name)) {
        Some(value) => value.trim().parse::<T>().map_err(|err| SettingsError::Invalid {
            name: env_name(name),
            value,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn seconds_setting(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, SettingsError> {
    let seconds = parsed_setting(lookup, name, default.as_secs())?;
    if seconds == 0 {
        return Err(SettingsError::Invalid {
            name: env_name(name),
            value: seconds.to_string(),
            reason: "must be at least one second".to_string(),
        });
    }
    Ok(Duration::from_secs(seconds))
}
