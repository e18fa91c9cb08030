use std::fs;
use std::path::Path;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

pub static CONFIG: OnceCell<Config> = OnceCell::new();

pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "SCHEMA_EVOLVE_";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// Write logs to files in this directory instead of stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            level: Self::DEFAULT_LEVEL.to_string(),
            directory: None,
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.level.clone();
        self.level = self.level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.level.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_LEVEL
            );
            self.level = Self::DEFAULT_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpgradeConfig {
    /// Release being upgraded to, `major.minor`.
    pub target_version: String,
    /// Overrides the prefix derived from `target_version`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_prefix: Option<String>,
}

impl UpgradeConfig {
    const DEFAULT_VERSION: &str = "9.0";

    fn default() -> Self {
        UpgradeConfig {
            target_version: Self::DEFAULT_VERSION.to_owned(),
            legacy_prefix: None,
        }
    }

    /// Prefix for legacy column names, e.g. `openupgrade_legacy_9_0`.
    pub fn legacy_prefix(&self) -> String {
        match &self.legacy_prefix {
            Some(prefix) => prefix.clone(),
            None => format!(
                "openupgrade_legacy_{}",
                self.target_version.replace('.', "_")
            ),
        }
    }

    /// Prefix for a plan targeting `plan_version`. A configured prefix wins,
    /// then the plan's own `major.minor`, then `target_version`.
    pub fn legacy_prefix_for(&self, plan_version: Option<&str>) -> String {
        if let Some(prefix) = &self.legacy_prefix {
            return prefix.clone();
        }
        plan_version
            .and_then(legacy_prefix_from_version)
            .unwrap_or_else(|| self.legacy_prefix())
    }

    fn ensure_valid(&mut self) {
        let version = self.target_version.trim();
        let valid = match version.split_once('.') {
            Some((major, minor)) => {
                !major.is_empty()
                    && !minor.is_empty()
                    && major.chars().all(|c| c.is_ascii_digit())
                    && minor.chars().all(|c| c.is_ascii_digit())
            }
            None => false,
        };

        if valid {
            self.target_version = version.to_owned();
        } else {
            eprintln!(
                "Config error: target version '{}' is invalid - using default of '{}'",
                self.target_version,
                Self::DEFAULT_VERSION
            );
            self.target_version = Self::DEFAULT_VERSION.to_owned();
        }
    }
}

/// `openupgrade_legacy_<major>_<minor>` from a version such as `7.0.1.3`.
pub fn legacy_prefix_from_version(version: &str) -> Option<String> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?;
    let minor = parts.next()?;
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    (numeric(major) && numeric(minor))
        .then(|| format!("openupgrade_legacy_{}_{}", major, minor))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub upgrade: UpgradeConfig,
}

impl Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            upgrade: UpgradeConfig::default(),
        }
    }

    /// Loads the configuration from a TOML file located in the app's config directory.
    /// Writes the default config to disk if no file exists.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.config_dir().join(CONFIG_FILE);

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!(
                        "Failed to create configuration directory {}: {}",
                        parent.display(),
                        e
                    );
                }
            }
            if let Ok(toml_string) = toml::to_string_pretty(&Config::default()) {
                if let Err(e) = fs::write(&config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            } else {
                eprintln!("Failed to serialize default config.");
            }
        }

        Self::load_from(&config_path)
    }

    /// Defaults, merged with the TOML file (if it exists), merged with
    /// `SCHEMA_EVOLVE_*` environment variables (`__` separates sections).
    /// On error, reports it and falls back to defaults.
    pub fn load_from(config_path: &Path) -> Self {
        let default_config = Config::default();

        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.upgrade.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load_from(Path::new("missing.toml"));
            assert_eq!(config.logging.level, "info");
            assert_eq!(config.logging.directory, None);
            assert_eq!(config.upgrade.target_version, "9.0");
            assert_eq!(config.upgrade.legacy_prefix(), "openupgrade_legacy_9_0");
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [logging]
                level = "debug"

                [upgrade]
                target_version = "7.0"
                "#,
            )?;
            jail.set_env("SCHEMA_EVOLVE_LOGGING__LEVEL", "warn");

            let config = Config::load_from(Path::new("config.toml"));
            assert_eq!(config.logging.level, "warn");
            assert_eq!(config.upgrade.target_version, "7.0");
            assert_eq!(config.upgrade.legacy_prefix(), "openupgrade_legacy_7_0");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_fall_back() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [logging]
                level = " LOUD "

                [upgrade]
                target_version = "nine"
                legacy_prefix = "old"
                "#,
            )?;

            let config = Config::load_from(Path::new("config.toml"));
            assert_eq!(config.logging.level, "info");
            assert_eq!(config.upgrade.target_version, "9.0");
            assert_eq!(config.upgrade.legacy_prefix(), "old");
            Ok(())
        });
    }

    #[test]
    fn test_legacy_prefix_follows_plan_version() {
        assert_eq!(
            legacy_prefix_from_version("7.0.1.3").as_deref(),
            Some("openupgrade_legacy_7_0")
        );
        assert_eq!(
            legacy_prefix_from_version("10.0").as_deref(),
            Some("openupgrade_legacy_10_0")
        );
        assert_eq!(legacy_prefix_from_version("7"), None);
        assert_eq!(legacy_prefix_from_version("seven.0"), None);

        let mut upgrade = UpgradeConfig::default();
        assert_eq!(upgrade.legacy_prefix_for(Some("7.0.1.3")), "openupgrade_legacy_7_0");
        assert_eq!(upgrade.legacy_prefix_for(Some("latest")), "openupgrade_legacy_9_0");
        assert_eq!(upgrade.legacy_prefix_for(None), "openupgrade_legacy_9_0");

        upgrade.legacy_prefix = Some("old".to_owned());
        assert_eq!(upgrade.legacy_prefix_for(Some("7.0.1.3")), "old");
    }

    #[test]
    fn test_level_is_normalized() {
        let mut logging = LoggingConfig {
            level: " DEBUG ".to_owned(),
            directory: None,
        };
        logging.ensure_valid();
        assert_eq!(logging.level, "debug");
    }
}
