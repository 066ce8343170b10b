//! Configuration management
//!
//! Settings live in `settings.json` inside the ledger directory:
//! ```json
//! {
//!   "ledger": {
//!     "maxAccountsPerOwner": 3,
//!     "defaultPageSize": 20,
//!     "maxPageSize": 100,
//!     "dbFile": "ledger.duckdb",
//!     "argon2": { "timeCost": 2, "memoryCost": 19456, "parallelism": 1 }
//!   }
//! }
//! ```
//! Keys this crate does not manage are kept as-is when saving.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{Error, Result};

const DEFAULT_MAX_ACCOUNTS_PER_OWNER: u32 = 3;
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_DB_FILE: &str = "ledger.duckdb";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    ledger: LedgerSettings,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_accounts_per_owner: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_page_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_page_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    db_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    argon2: Option<Argon2Params>,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Argon2Params {
    pub time_cost: u32,
    /// KiB
    pub memory_cost: u32,
    pub parallelism: u32,
    #[serde(default = "default_hash_len")]
    pub hash_len: u32,
}

fn default_hash_len() -> u32 {
    32
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            time_cost: 2,
            memory_cost: 19 * 1024,
            parallelism: 1,
            hash_len: default_hash_len(),
        }
    }
}

/// Resolved ledger configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub max_accounts_per_owner: u32,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub db_file: String,
    pub argon2: Argon2Params,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_accounts_per_owner: DEFAULT_MAX_ACCOUNTS_PER_OWNER,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            db_file: DEFAULT_DB_FILE.to_string(),
            argon2: Argon2Params::default(),
        }
    }
}

impl Config {
    /// Load config from the ledger directory
    ///
    /// Environment variables take precedence over the file:
    /// `LEDGER_MAX_ACCOUNTS_PER_OWNER`, `LEDGER_DEFAULT_PAGE_SIZE`,
    /// `LEDGER_MAX_PAGE_SIZE` and `LEDGER_DB_FILE`.
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_with(dir, |key| std::env::var(key).ok())
    }

    fn load_with(dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = read_settings(dir)?;
        let ledger = &raw.ledger;

        let max_accounts_per_owner = env_u32(&env, "LEDGER_MAX_ACCOUNTS_PER_OWNER")?
            .or(ledger.max_accounts_per_owner)
            .unwrap_or(DEFAULT_MAX_ACCOUNTS_PER_OWNER);
        let default_page_size = env_u32(&env, "LEDGER_DEFAULT_PAGE_SIZE")?
            .or(ledger.default_page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let max_page_size = env_u32(&env, "LEDGER_MAX_PAGE_SIZE")?
            .or(ledger.max_page_size)
            .unwrap_or(DEFAULT_MAX_PAGE_SIZE);
        let db_file = env("LEDGER_DB_FILE")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| ledger.db_file.clone())
            .unwrap_or_else(|| DEFAULT_DB_FILE.to_string());
        let argon2 = ledger.argon2.unwrap_or_default();

        let config = Self {
            max_accounts_per_owner,
            default_page_size,
            max_page_size,
            db_file,
            argon2,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_page_size == 0 {
            return Err(Error::config("maxPageSize must be at least 1"));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(Error::config(format!(
                "defaultPageSize must be between 1 and {}",
                self.max_page_size
            )));
        }
        Ok(())
    }

    /// Save config to the ledger directory, preserving unmanaged keys
    pub fn save(&self, dir: &Path) -> Result<()> {
        let mut settings = read_settings(dir)?;
        let ledger = &mut settings.ledger;
        ledger.max_accounts_per_owner = Some(self.max_accounts_per_owner);
        ledger.default_page_size = Some(self.default_page_size);
        ledger.max_page_size = Some(self.max_page_size);
        ledger.db_file = Some(self.db_file.clone());
        ledger.argon2 = Some(self.argon2);

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(dir.join("settings.json"), content)?;
        Ok(())
    }
}

fn read_settings(dir: &Path) -> Result<SettingsFile> {
    let settings_path = dir.join("settings.json");
    if !settings_path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(&settings_path)?;
    match serde_json::from_str(&content) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            tracing::warn!(error = %e, path = %settings_path.display(), "ignoring unreadable settings");
            Ok(SettingsFile::default())
        }
    }
}

fn env_u32(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u32>> {
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| Error::config(format!("{} must be a non-negative integer, got '{}'", key, raw))),
    }
}
