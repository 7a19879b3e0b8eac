use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::parser::CapacityPolicy;

const CONFIG_FILE: &str = "timetable";
const ENV_PREFIX: &str = "TIMETABLE";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    pub output: PathBuf,
    pub workers: usize,
    pub capacity_policy: CapacityPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            cache_dir: PathBuf::from("data/pages"),
            db_path: PathBuf::from("data/timetable.sqlite"),
            output: PathBuf::from("timetable_bookings_insert.sql"),
            workers: 8,
            capacity_policy: CapacityPolicy::Keep,
        }
    }
}

impl Settings {
    /// Optional `timetable.toml` in the working directory, then `TIMETABLE_*` variables.
    pub fn load() -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        Self::from_builder(builder)
    }

    fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings: Settings = builder
            .build()
            .context("Failed to load settings")?
            .try_deserialize()
            .context("Invalid settings")?;
        Ok(Settings {
            workers: settings.workers.max(1),
            ..settings
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(text: &str) -> Result<Settings> {
        Settings::from_builder(Config::builder().add_source(File::from_str(text, FileFormat::Toml)))
    }

    #[test]
    fn empty_source_gives_defaults() {
        assert_eq!(from_toml("").unwrap(), Settings::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let s = from_toml(
            r#"
            cache_dir = "/tmp/sws"
            workers = 2
            capacity_policy = "require"
            "#,
        )
        .unwrap();
        assert_eq!(s.cache_dir, PathBuf::from("/tmp/sws"));
        assert_eq!(s.workers, 2);
        assert_eq!(s.capacity_policy, CapacityPolicy::Require);
        assert_eq!(s.db_path, Settings::default().db_path);
    }

    #[test]
    fn zero_workers_clamped() {
        assert_eq!(from_toml("workers = 0").unwrap().workers, 1);
    }

    #[test]
    fn unknown_policy_rejected() {
        assert!(from_toml(r#"capacity_policy = "maybe""#).is_err());
    }
}
