//! Configuration for Telegram API credentials and relay limits
//!
//! Loads configuration from config.yml file; environment variables
//! (optionally via .env) take precedence over file values.

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default constants (fallback if config.yml not found)
pub const SESSION_NAME: &str = "music_relay_session";
pub const LOCK_FILE: &str = "music_relay_session.lock";

/// Files per batch shown to the user.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Messages processed per "fetch more" round.
pub const DEFAULT_ROUND_LIMIT: usize = 5000;

/// Overall processing ceiling across all rounds of one scan.
pub const DEFAULT_MAX_MESSAGES: usize = 50_000;

/// Messages requested per history page.
pub const PAGE_SIZE: usize = 100;

/// YAML config structures
#[derive(Debug, Deserialize)]
struct YamlConfig {
    telegram: Option<TelegramConfig>,
    relay: Option<RelayConfig>,
    limits: Option<LimitsConfig>,
}

#[derive(Debug, Deserialize)]
struct TelegramConfig {
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    api_id: Option<String>,
    api_hash: Option<String>,
    phone: Option<String>,
    session_name: Option<String>,
    bot_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelayConfig {
    target_bot: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LimitsConfig {
    batch_size: Option<usize>,
    round_limit: Option<usize>,
    max_messages: Option<usize>,
}

/// Deserialize a value that can be either a string or a number
fn deserialize_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub phone: String,
    pub api_id: i32,
    pub api_hash: String,
    pub session_name: String,
    pub lock_file: String,
    pub bot_token: String,
    /// Bot account that receives the relayed files (e.g. "@remixuploadbot").
    pub target_bot: String,
    pub batch_size: usize,
    pub round_limit: usize,
    pub max_messages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults.
    /// Environment variables take precedence over config.yml values.
    pub fn new() -> Self {
        Self::load_from_file("config.yml")
            .or_else(|_| Self::load_from_file("../config.yml"))
            .unwrap_or_else(|_| Self::defaults())
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> String {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    return env_val;
                }
            }
        }
        // Also check explicit env_key as fallback
        if let Ok(env_val) = std::env::var(env_key) {
            return env_val;
        }
        value.unwrap_or_default()
    }

    /// Resolve an integer value from string config or env var
    fn resolve_env_i32(value: Option<String>, env_key: &str) -> i32 {
        if let Some(ref v) = value {
            if v.starts_with("${") && v.ends_with('}') {
                let var_name = &v[2..v.len() - 1];
                if let Ok(env_val) = std::env::var(var_name) {
                    if let Ok(parsed) = env_val.parse::<i32>() {
                        return parsed;
                    }
                }
            }
            if let Ok(parsed) = v.parse::<i32>() {
                return parsed;
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            if let Ok(parsed) = env_val.parse::<i32>() {
                return parsed;
            }
        }
        0
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        let telegram = yaml.telegram.unwrap_or(TelegramConfig {
            api_id: None,
            api_hash: None,
            phone: None,
            session_name: None,
            bot_token: None,
        });

        let relay = yaml.relay.unwrap_or(RelayConfig { target_bot: None });

        let limits = yaml.limits.unwrap_or(LimitsConfig {
            batch_size: None,
            round_limit: None,
            max_messages: None,
        });

        let api_id = Self::resolve_env_i32(telegram.api_id, "TELEGRAM_API_ID");
        let api_hash = Self::resolve_env_string(telegram.api_hash, "TELEGRAM_API_HASH");
        let phone = Self::resolve_env_string(telegram.phone, "TELEGRAM_PHONE");
        let bot_token = Self::resolve_env_string(telegram.bot_token, "BOT_TOKEN");
        let target_bot = Self::resolve_env_string(relay.target_bot, "TARGET_BOT");

        Ok(Self {
            phone,
            api_id,
            api_hash,
            session_name: telegram
                .session_name
                .unwrap_or_else(|| SESSION_NAME.to_string()),
            lock_file: LOCK_FILE.to_string(),
            bot_token,
            target_bot,
            batch_size: limits.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
            round_limit: limits.round_limit.unwrap_or(DEFAULT_ROUND_LIMIT).max(1),
            max_messages: limits.max_messages.unwrap_or(DEFAULT_MAX_MESSAGES),
        })
    }

    /// Create config with empty defaults (fallback)
    /// User MUST provide config.yml with actual credentials
    fn defaults() -> Self {
        Self {
            phone: String::new(),
            api_id: 0,
            api_hash: String::new(),
            session_name: SESSION_NAME.to_string(),
            lock_file: LOCK_FILE.to_string(),
            bot_token: String::new(),
            target_bot: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            round_limit: DEFAULT_ROUND_LIMIT,
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{LazyLock, Mutex};

    static ENV_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(value) => std::env::set_var(&self.key, value),
                None => std::env::remove_var(&self.key),
            }
        }
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::defaults();
        assert_eq!(config.session_name, SESSION_NAME);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.round_limit, DEFAULT_ROUND_LIMIT);
        assert_eq!(config.max_messages, DEFAULT_MAX_MESSAGES);
        assert!(config.target_bot.is_empty());
    }

    #[test]
    fn load_from_yaml_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        let mut file = std::fs::File::create(&path).expect("create config");
        writeln!(
            file,
            r#"
telegram:
  api_id: 12345
  api_hash: "abcdef"
  session_name: "custom_session"
relay:
  target_bot: "@remixuploadbot"
limits:
  batch_size: 50
  round_limit: 2000
  max_messages: 10000
"#
        )
        .expect("write config");

        let config = Config::load_from_file(&path).expect("load config");
        assert_eq!(config.api_id, 12345);
        assert_eq!(config.api_hash, "abcdef");
        assert_eq!(config.session_name, "custom_session");
        assert_eq!(config.target_bot, "@remixuploadbot");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.round_limit, 2000);
        assert_eq!(config.max_messages, 10000);
    }

    #[test]
    fn env_placeholder_is_resolved() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::set("RELAY_TEST_TARGET", "@env_bot");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "relay:\n  target_bot: \"${RELAY_TEST_TARGET}\"\n",
        )
        .expect("write config");

        let config = Config::load_from_file(&path).expect("load config");
        assert_eq!(config.target_bot, "@env_bot");
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "limits:\n  batch_size: 0\n").expect("write config");

        let config = Config::load_from_file(&path).expect("load config");
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = Config::load_from_file("/nonexistent/config.yml");
        assert!(result.is_err());
    }

    #[test]
    fn numeric_api_id_parses_from_yaml_number() {
        let _lock = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "telegram:\n  api_id: 777\n").expect("write config");

        let config = Config::load_from_file(&path).expect("load config");
        assert_eq!(config.api_id, 777);
    }
}
