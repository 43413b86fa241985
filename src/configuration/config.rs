#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::env;
use std::path;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::ArgMatches;
use clap::Command;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use strum::EnumIter;
use strum::EnumVariantNames;
use strum::IntoEnumIterator;
use tokio::fs;

use crate::domain::models::ModelSelection;
use crate::domain::services::AskOptions;
use crate::domain::services::SyncOptions;
use crate::infrastructure::opencode::ReconnectPolicy;
use crate::infrastructure::opencode::TransportOptions;

static CONFIG: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

#[derive(Clone, Copy, Eq, PartialEq, EnumIter, EnumVariantNames, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ConfigKey {
    Agent,
    ApiReadyRetries,
    AskTimeout,
    BaseUrl,
    ConfigFile,
    Directory,
    MaxReconnectAttempts,
    Model,
    ReconnectDelay,
    SessionID,
}

impl ConfigKey {
    /// Counts rather than durations, they must fit a `u32`.
    fn is_count(&self) -> bool {
        return matches!(
            self,
            ConfigKey::ApiReadyRetries | ConfigKey::MaxReconnectAttempts
        );
    }

    fn is_numeric(&self) -> bool {
        return matches!(
            self,
            ConfigKey::ApiReadyRetries
                | ConfigKey::AskTimeout
                | ConfigKey::MaxReconnectAttempts
                | ConfigKey::ReconnectDelay
        );
    }
}

fn parse_count(key: ConfigKey, val: &str) -> Result<u32> {
    return val
        .parse::<u32>()
        .with_context(|| return format!("Invalid value for '{key}': {val}"));
}

fn validate(key: ConfigKey, val: &str) -> Result<()> {
    if key.is_numeric() && val.parse::<u64>().is_err() {
        bail!(format!(
            "config.toml has an invalid value for key '{key}': {val}\nExpected a positive number"
        ));
    }

    if key.is_count() {
        parse_count(key, val)?;
    }

    if key == ConfigKey::Model {
        ModelSelection::parse(val)
            .with_context(|| return format!("config.toml has an invalid value for key '{key}'"))?;
    }

    return Ok(());
}

pub struct Config {}

impl Config {
    pub fn get(key: ConfigKey) -> String {
        if let Some(val) = CONFIG.get(&key.to_string()) {
            return val.to_string();
        }

        return "".to_string();
    }

    pub fn get_u64(key: ConfigKey) -> Result<u64> {
        let val = Config::get(key);
        return val
            .parse::<u64>()
            .with_context(|| return format!("Invalid value for '{key}': {val}"));
    }

    pub fn get_u32(key: ConfigKey) -> Result<u32> {
        return parse_count(key, &Config::get(key));
    }

    pub fn set(key: ConfigKey, value: &str) {
        CONFIG.insert(key.to_string(), value.to_string());
    }

    pub fn default(key: ConfigKey) -> String {
        let config_path = dirs::config_dir()
            .unwrap_or_default()
            .join("opencode-sync/config.toml");

        let directory = env::current_dir()
            .map(|dir| return dir.to_string_lossy().to_string())
            .unwrap_or_default();

        let res: &str = match key {
            ConfigKey::Agent => "",
            ConfigKey::ApiReadyRetries => "5",
            ConfigKey::AskTimeout => "90000",
            ConfigKey::BaseUrl => "http://localhost:4096",
            ConfigKey::Directory => &directory,
            ConfigKey::MaxReconnectAttempts => "10",
            ConfigKey::Model => "",
            ConfigKey::ReconnectDelay => "1000",

            // Special
            ConfigKey::ConfigFile => return config_path.to_string_lossy().to_string(),
            ConfigKey::SessionID => "",
        };

        return res.to_string();
    }

    pub async fn load(cmd: Command, clap_arg_matches: Vec<&ArgMatches>) -> Result<()> {
        for key in ConfigKey::iter() {
            Config::set(key, &Config::default(key))
        }

        let mut config_file = Config::default(ConfigKey::ConfigFile);
        for matches in clap_arg_matches.as_slice() {
            if let Ok(Some(arg_config_file)) =
                matches.try_get_one::<String>(&ConfigKey::ConfigFile.to_string())
            {
                config_file = arg_config_file.to_string();
            }
        }

        let config_path = path::PathBuf::from(config_file);
        if config_path.exists() {
            let toml_str = fs::read_to_string(config_path).await?;
            let doc = toml_str.parse::<toml_edit::Document>()?;

            for key in ConfigKey::iter() {
                let val = match doc.get(&key.to_string()) {
                    Some(val) => val,
                    None => continue,
                };

                // Only keys that are also flags may be set from the file.
                if !cmd
                    .get_arguments()
                    .any(|arg| return arg.get_long() == Some(key.to_string().as_str()))
                {
                    bail!(format!("config.toml does not support the key '{key}'"));
                }

                if let Some(val_int) = val.as_integer() {
                    validate(key, &val_int.to_string())?;
                    Config::set(key, &val_int.to_string());
                } else if let Some(val_str) = val.as_str() {
                    if val_str.is_empty() {
                        continue;
                    }
                    validate(key, val_str)?;
                    Config::set(key, val_str);
                }
            }
        }

        for key in ConfigKey::iter() {
            for matches in clap_arg_matches.as_slice() {
                if let Ok(Some(val)) = matches.try_get_one::<String>(&key.to_string()) {
                    if val.is_empty() {
                        continue;
                    }
                    validate(key, val)?;
                    Config::set(key, val)
                }
            }
        }

        tracing::debug!(
            base_url = Config::get(ConfigKey::BaseUrl),
            directory = Config::get(ConfigKey::Directory),
            agent = Config::get(ConfigKey::Agent),
            model = Config::get(ConfigKey::Model),
            "config"
        );

        return Ok(());
    }

    pub fn transport_options() -> Result<TransportOptions> {
        let reconnect = ReconnectPolicy {
            base_delay: Duration::from_millis(Config::get_u64(ConfigKey::ReconnectDelay)?),
            max_attempts: Config::get_u32(ConfigKey::MaxReconnectAttempts)?,
        };

        return Ok(TransportOptions::new(&Config::get(ConfigKey::BaseUrl))
            .with_directory(Some(Config::get(ConfigKey::Directory)))
            .with_reconnect(reconnect));
    }

    fn model() -> Result<Option<ModelSelection>> {
        let model = Config::get(ConfigKey::Model);
        if model.is_empty() {
            return Ok(None);
        }

        return Ok(Some(ModelSelection::parse(&model)?));
    }

    fn agent() -> Option<String> {
        return Some(Config::get(ConfigKey::Agent)).filter(|agent| return !agent.is_empty());
    }

    pub fn sync_options() -> Result<SyncOptions> {
        return Ok(SyncOptions {
            agent: Config::agent(),
            model: Config::model()?,
            api_ready_retries: Config::get_u32(ConfigKey::ApiReadyRetries)?,
            select_latest_session: Config::get(ConfigKey::SessionID).is_empty(),
            ..SyncOptions::default()
        });
    }

    pub fn ask_options() -> Result<AskOptions> {
        return Ok(AskOptions {
            timeout: Duration::from_millis(Config::get_u64(ConfigKey::AskTimeout)?),
            agent: Config::agent(),
            model: Config::model()?,
            ..AskOptions::default()
        });
    }

    pub fn serialize_default(cmd: Command) -> String {
        let toml_str = ConfigKey::iter()
            .filter_map(|key| {
                if key == ConfigKey::SessionID || key == ConfigKey::ConfigFile {
                    return None;
                }

                let arg = cmd
                    .get_arguments()
                    .find(|e| return e.get_long() == Some(key.to_string().as_str()))?;

                let description = arg
                    .get_help()
                    .map(|help| return help.to_string())
                    .unwrap_or_default()
                    .split("[default:")
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();

                let mut val = Config::default(key);
                if key == ConfigKey::Directory || val.is_empty() {
                    val = format!("# {key} = \"\"");
                } else if val.parse::<i32>().is_ok() {
                    val = format!("{key} = {val}");
                } else {
                    val = format!("{key} = \"{val}\"");
                }

                return Some(format!("# {description}\n{val}"));
            })
            .collect::<Vec<String>>()
            .join("\n\n");

        return toml_str;
    }
}
