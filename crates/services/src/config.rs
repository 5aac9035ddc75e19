use std::path::PathBuf;
use std::time::Duration;

use storage::StorageKeys;

use crate::error::ConfigError;

pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_NOTES_DEBOUNCE: Duration = Duration::from_secs(1);

/// Runtime knobs shared by the tracker services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub keys: StorageKeys,
    pub backup_interval: Duration,
    pub notes_debounce: Duration,
    pub export_dir: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            keys: StorageKeys::default(),
            backup_interval: DEFAULT_BACKUP_INTERVAL,
            notes_debounce: DEFAULT_NOTES_DEBOUNCE,
            export_dir: PathBuf::from("."),
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `STUDY_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`TrackerConfig::from_env`] over an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(prefix) = lookup("STUDY_KEY_PREFIX").filter(|p| !p.trim().is_empty()) {
            config.keys = StorageKeys::with_prefix(prefix.trim());
        }
        if let Some(raw) = lookup("STUDY_BACKUP_INTERVAL_SECS") {
            let secs = parse_positive(&raw, "STUDY_BACKUP_INTERVAL_SECS")?;
            config.backup_interval = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("STUDY_NOTES_DEBOUNCE_MS") {
            let millis = parse_positive(&raw, "STUDY_NOTES_DEBOUNCE_MS")?;
            config.notes_debounce = Duration::from_millis(millis);
        }
        if let Some(dir) = lookup("STUDY_EXPORT_DIR").filter(|d| !d.trim().is_empty()) {
            config.export_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

fn parse_positive(raw: &str, var: &'static str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            var,
            raw: raw.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = TrackerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.backup_interval, Duration::from_secs(300));
        assert_eq!(config.notes_debounce, Duration::from_secs(1));
    }

    #[test]
    fn env_overrides_apply() {
        let config = TrackerConfig::from_lookup(lookup(&[
            ("STUDY_KEY_PREFIX", "course"),
            ("STUDY_BACKUP_INTERVAL_SECS", "60"),
            ("STUDY_NOTES_DEBOUNCE_MS", "250"),
            ("STUDY_EXPORT_DIR", "/tmp/exports"),
        ]))
        .unwrap();

        assert_eq!(config.keys.backup, "course_backup");
        assert_eq!(config.backup_interval, Duration::from_secs(60));
        assert_eq!(config.notes_debounce, Duration::from_millis(250));
        assert_eq!(config.export_dir, PathBuf::from("/tmp/exports"));
    }

    #[test]
    fn rejects_zero_and_garbage() {
        let err = TrackerConfig::from_lookup(lookup(&[("STUDY_BACKUP_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "STUDY_BACKUP_INTERVAL_SECS",
                raw: "0".into()
            }
        );
        assert!(TrackerConfig::from_lookup(lookup(&[("STUDY_NOTES_DEBOUNCE_MS", "soon")])).is_err());
    }
}
