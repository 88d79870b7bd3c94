use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::Category;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "MD365_CONFIG";

const SAMPLE_CONFIG: &str = "\
timezone: Europe/Berlin
accounts:
  work:
    token_env: MD365_TOKEN_WORK";

/// Application configuration loaded from `config.yaml`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the local mirror (records and `.sync` state)
    pub data_dir: PathBuf,
    /// Zone that event times are rendered in
    pub time_zone: Tz,
    pub calendar: CalendarConfig,
    /// Per-request timeout for Graph calls
    pub request_timeout: Duration,
    /// Configured accounts by name
    pub accounts: BTreeMap<String, AccountConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Days before today covered by the calendar window
    pub past_days: u32,
    /// Days after today covered by the calendar window
    pub future_days: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            past_days: 30,
            future_days: 90,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Environment variable holding the bearer token for this account
    pub token_env: Option<String>,
}

/// On-disk shape of the config file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    data_dir: Option<String>,
    timezone: Option<String>,
    #[serde(default)]
    calendar: CalendarConfig,
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    accounts: BTreeMap<String, Option<AccountConfig>>,
}

impl Config {
    /// Load configuration.
    ///
    /// The file is looked up in order: `explicit` (the `--config` flag),
    /// `$MD365_CONFIG`, then `<config dir>/md365/config.yaml`.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var(CONFIG_ENV) {
                Ok(path) if !path.is_empty() => expand_tilde(&path),
                _ => default_config_path().ok_or(ConfigError::NoConfigDir)?,
            },
        };
        Self::load_from(&path)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(raw).map_err(ConfigError::Parse)?;

        let data_dir = match raw.data_dir {
            Some(dir) => expand_tilde(&dir),
            None => default_data_dir().ok_or(ConfigError::NoDataDir)?,
        };

        let time_zone = match raw.timezone.as_deref() {
            None | Some("") => Tz::UTC,
            Some(name) => name
                .parse()
                .map_err(|_| ConfigError::InvalidTimeZone(name.to_string()))?,
        };

        let mut accounts = BTreeMap::new();
        for (name, account) in raw.accounts {
            if !is_valid_account_name(&name) {
                return Err(ConfigError::InvalidAccountName(name));
            }
            accounts.insert(name, account.unwrap_or_default());
        }

        Ok(Self {
            data_dir,
            time_zone,
            calendar: raw.calendar,
            request_timeout: Duration::from_secs(raw.request_timeout_secs.unwrap_or(30)),
            accounts,
        })
    }

    /// Directory holding an account's records of one category
    pub fn category_dir(&self, account: &str, category: Category) -> PathBuf {
        self.data_dir.join(account).join(category.dir_name())
    }

    /// All configured account names, sorted
    pub fn account_names(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }

    /// Resolve an `--account` selector: `None` or `all` means every account.
    pub fn select_accounts(&self, selector: Option<&str>) -> Result<Vec<String>, ConfigError> {
        match selector {
            None | Some("all") => Ok(self.account_names()),
            Some(name) if self.accounts.contains_key(name) => Ok(vec![name.to_string()]),
            Some(name) => Err(ConfigError::UnknownAccount(name.to_string())),
        }
    }
}

/// Account names become directory names under the data directory
fn is_valid_account_name(name: &str) -> bool {
    !name.is_empty()
        && name != "all"
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("md365").join("config.yaml"))
}

fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("md365"))
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}\n\nCreate it with:\n{}", .path.display(), SAMPLE_CONFIG)]
    NotFound { path: PathBuf },

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("Unknown time zone '{0}' (expected an IANA name such as Europe/Berlin)")]
    InvalidTimeZone(String),

    #[error("Invalid account name '{0}'")]
    InvalidAccountName(String),

    #[error("Account '{0}' not found in config")]
    UnknownAccount(String),

    #[error("Could not determine the configuration directory")]
    NoConfigDir,

    #[error("Could not determine the data directory; set data_dir in the config file")]
    NoDataDir,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml("data_dir: /tmp/md365\naccounts:\n  work:\n").unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/md365"));
        assert_eq!(config.time_zone, Tz::UTC);
        assert_eq!(config.calendar, CalendarConfig::default());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.account_names(), vec!["work".to_string()]);
        assert_eq!(config.accounts["work"].token_env, None);
    }

    #[test]
    fn test_full_config() {
        let yaml = "\
data_dir: /srv/mirror
timezone: Europe/Berlin
request_timeout_secs: 10
calendar:
  past_days: 7
accounts:
  work:
    token_env: WORK_TOKEN
  home: {}
";
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.time_zone, chrono_tz::Europe::Berlin);
        assert_eq!(config.calendar.past_days, 7);
        assert_eq!(config.calendar.future_days, 90);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.account_names(), vec!["home".to_string(), "work".to_string()]);
        assert_eq!(config.accounts["work"].token_env.as_deref(), Some("WORK_TOKEN"));
        assert_eq!(
            config.category_dir("work", Category::Contacts),
            PathBuf::from("/srv/mirror/work/contacts")
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_yaml("data_dir: /x\ntimezone: Mars/Olympus\n"),
            Err(ConfigError::InvalidTimeZone(_))
        ));
        assert!(matches!(
            Config::from_yaml("data_dir: /x\naccounts:\n  ../evil: {}\n"),
            Err(ConfigError::InvalidAccountName(_))
        ));
        assert!(matches!(
            Config::from_yaml("data_dir: /x\naccounts:\n  all: {}\n"),
            Err(ConfigError::InvalidAccountName(_))
        ));
        assert!(matches!(
            Config::from_yaml("data_dir: /x\nclient_id: abc\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_select_accounts() {
        let config =
            Config::from_yaml("data_dir: /x\naccounts:\n  work: {}\n  home: {}\n").unwrap();

        assert_eq!(config.select_accounts(None).unwrap().len(), 2);
        assert_eq!(config.select_accounts(Some("all")).unwrap().len(), 2);
        assert_eq!(config.select_accounts(Some("work")).unwrap(), vec!["work".to_string()]);
        assert!(matches!(
            config.select_accounts(Some("school")),
            Err(ConfigError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "data_dir: ~/mirror\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.data_dir, home.join("mirror"));
        }
    }

    #[test]
    fn test_missing_file_shows_sample() {
        let temp_dir = TempDir::new().unwrap();
        let err = Config::load_from(&temp_dir.path().join("missing.yaml")).unwrap_err();

        assert!(matches!(err, ConfigError::NotFound { .. }));
        assert!(err.to_string().contains("token_env"));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~"), home);
            assert_eq!(expand_tilde("~/data"), home.join("data"));
        }
    }
}
