use crate::engine::EngineConfig;
use crate::error::ConfigError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_REGION: &str = "us";
const DEFAULT_CONFIG_PATH: &str = "/etc/openalpr/openalpr.conf";
const DEFAULT_RUNTIME_DATA_PATH: &str = "/usr/share/openalpr/runtime_data";
const DEFAULT_TOP_N: usize = 7;
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub engine: EngineConfig,
    pub alpr_binary: PathBuf,
    pub top_n: usize,
    pub port: u16,
    pub max_payload_bytes: usize,
    pub request_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from `lookup`, which returns the raw value of a
    /// variable if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let region = lookup("ALPR_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
        if region.trim().is_empty() {
            return Err(ConfigError::Empty {
                name: "ALPR_REGION",
            });
        }
        let mut engine = EngineConfig::new(
            region,
            lookup("ALPR_CONFIG").unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
            lookup("ALPR_RUNTIME_DATA").unwrap_or_else(|| DEFAULT_RUNTIME_DATA_PATH.to_string()),
        );
        engine.default_region = lookup("ALPR_DEFAULT_REGION").filter(|r| !r.trim().is_empty());
        engine.detect_region = parse(&lookup, "ALPR_DETECT_REGION", false)?;

        let config = Config {
            engine,
            alpr_binary: lookup("ALPR_BINARY")
                .unwrap_or_else(|| "alpr".to_string())
                .into(),
            top_n: positive(&lookup, "ALPR_TOP_N", DEFAULT_TOP_N)?,
            port: parse(&lookup, "PORT", DEFAULT_PORT)?,
            max_payload_bytes: positive(&lookup, "MAX_PAYLOAD_BYTES", DEFAULT_MAX_PAYLOAD_BYTES)?,
            request_timeout: Duration::from_secs(positive(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            drain_timeout: Duration::from_secs(positive(
                &lookup,
                "DRAIN_TIMEOUT_SECS",
                DEFAULT_DRAIN_TIMEOUT_SECS,
            )?),
        };
        Ok(config)
    }
}

fn parse<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: ToString,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|e| ConfigError::Invalid {
                name,
                value,
                reason: e.to_string(),
            })
        }
    }
}

fn positive<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default + ToString,
    T::Err: ToString,
{
    let value = parse(lookup, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
